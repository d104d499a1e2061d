//! Progress notifications emitted by a running session.

use crate::error::LifecyclePhase;

/// What happened, in the order it happened. Errors are carried as rendered
/// messages so events stay `Clone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Camera acquired; the raw preview is live.
    CaptureReady { device: String },
    /// The service confirmed the session start.
    Began,
    /// A begin or end call failed. Sampling is not affected.
    LifecycleFailed { phase: LifecyclePhase, message: String },
    /// A cycle's detections were merged into the seen set.
    CycleApplied {
        cycle: u64,
        new_identities: Vec<String>,
        attendance: usize,
    },
    /// No frame could be produced; nothing was sent.
    CycleSkipped { cycle: u64, reason: String },
    /// Dispatch failed.
    CycleFailed {
        cycle: u64,
        consecutive: u32,
        message: String,
    },
    /// A cycle finished after sampling had stopped; its result was dropped.
    StaleResultDiscarded { cycle: u64 },
    /// Too many consecutive failures; sampling stopped on its own.
    Halted { consecutive_failures: u32, message: String },
    Ended,
    CaptureReleased,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::CaptureReleased)
    }
}
