//! # Live Attendance Client
//!
//! Takes class attendance from a live camera feed. Once per second the
//! current frame is encoded as JPEG and sent to a remote recognition
//! service; every identity the service reports is added to a seen-set whose
//! size is the attendance count.
//!
//! ## Architecture
//!
//! - `capture`: camera ownership and the raw live preview
//! - `processing`: per-cycle JPEG encoding and dispatch to the service
//! - `session`: scheduler, seen-set, remote lifecycle and orchestration
//! - `config`: session configuration, session context and the stored selection
//! - `error`: error taxonomy shared by every module
//!
//! The HTTP client and wire types live in the `attend-api` crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use live_attendance::capture::TestPatternSource;
//! use live_attendance::{LiveSession, SessionConfig, SessionContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = LiveSession::builder()
//!     .with_config(SessionConfig::default())
//!     .with_capture_source(TestPatternSource::default())
//!     .build()?;
//!
//! let context = SessionContext::new("Computer Science", "A", "Data Structures")?;
//! let mut active = session.start(context).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//! let summary = active.stop().await?;
//! println!("{} present", summary.attendance_count());
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod processing;
pub mod session;

/// Re-export error types for convenience
pub use error::{
    HasRecoverySuggestion, HasSeverity, Recoverable, Retryable, SessionError, SessionResult,
};

pub use config::{ContextStore, Selection, SessionConfig, SessionContext};
pub use session::{ActiveSession, LiveSession, LiveSessionBuilder, SessionEvent, SessionSummary};

/// Re-export the service client so callers need only one dependency.
pub use attend_api;
