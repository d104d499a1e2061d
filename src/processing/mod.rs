//! # Frame Processing Module
//!
//! Per-cycle work: turn the live preview into a transportable still and hand
//! it to the recognition service.

pub mod dispatcher;
pub mod encoder;

pub use dispatcher::{CycleResult, DetectionDispatcher};
pub use encoder::{EncodedFrame, FrameEncoder};
