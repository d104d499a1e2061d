//! # Configuration Module
//!
//! Runtime configuration and the session context that scopes every remote call.

pub mod config;
pub mod context;

pub use config::SessionConfig;
pub use context::{ContextStore, Selection, SessionContext};
