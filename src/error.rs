//! # Session Error Handling
//!
//! Error taxonomy for the live attendance pipeline. Every failure carries an
//! [`ErrorContext`] with a timestamp, severity, retry/recovery flags and an
//! optional recovery suggestion, so the CLI can tell the user what happened
//! and what to do next.
//!
//! ## Classification
//!
//! | Variant | Raised by | Effect on the session |
//! |---------|-----------|-----------------------|
//! | `PreconditionMissing` | context validation | fatal to start, no remote call |
//! | `CameraUnavailable` | capture acquisition | fatal to start |
//! | `EncodingUnavailable` | frame encoder | cycle skipped |
//! | `Network` / `Service` | dispatcher | cycle skipped, halts after repeats |
//! | `Lifecycle` | begin/end calls | reported, scheduler unaffected |
//! | `State` | scheduler / capture misuse | caller bug |
//!
//! ## Usage
//!
//! ```rust
//! use live_attendance::error::{SessionError, Retryable};
//!
//! let error = SessionError::network("process_frame")
//!     .with_context("cycle 12")
//!     .with_recovery_suggestion("Check that the recognition service is running");
//!
//! assert!(error.is_retryable());
//! ```

use std::{error::Error as StdError, fmt, time::SystemTime};

use attend_api::ApiError;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational errors
    Info,
    /// Warnings that may indicate potential issues
    Warning,
    /// Errors that affect operation but can be recovered from
    Error,
    /// Critical errors that require immediate attention
    Critical,
    /// Fatal errors that cannot be recovered from
    Fatal,
}

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action
    pub recovery_suggestion: Option<String>,
    /// Error severity level
    pub severity: ErrorSeverity,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Whether this error is recoverable
    pub recoverable: bool,
    /// Additional metadata as key-value pairs
    pub metadata: std::collections::HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            severity: ErrorSeverity::Error,
            retryable: false,
            recoverable: false,
            metadata: std::collections::HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Base error type for the attendance pipeline
#[derive(Debug)]
pub enum SessionError {
    /// Invalid configuration value
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Session context incomplete
    PreconditionMissing {
        missing: Vec<&'static str>,
        context: ErrorContext,
    },
    /// Camera could not be acquired, or was already released
    CameraUnavailable {
        device: String,
        reason: String,
        context: ErrorContext,
    },
    /// No still image could be produced from the preview
    EncodingUnavailable {
        reason: String,
        context: ErrorContext,
    },
    /// The request never reached the service
    Network {
        operation: String,
        address: Option<String>,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// The service answered but rejected the request or replied with garbage
    Service {
        operation: String,
        status: Option<u16>,
        reason: String,
        context: ErrorContext,
    },
    /// Begin/end session call failed
    Lifecycle {
        phase: LifecyclePhase,
        reason: String,
        context: ErrorContext,
    },
    /// Invalid state transitions
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

/// Which remote lifecycle call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Begin,
    End,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Begin => f.write_str("begin"),
            LifecyclePhase::End => f.write_str("end"),
        }
    }
}

impl SessionError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a missing-precondition error naming the absent context fields
    pub fn precondition_missing(missing: Vec<&'static str>) -> Self {
        Self::PreconditionMissing {
            missing,
            context: ErrorContext::new().with_severity(ErrorSeverity::Fatal),
        }
    }

    /// Create a camera acquisition error
    pub fn camera_unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CameraUnavailable {
            device: device.into(),
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    /// Create a frame encoding error
    pub fn encoding_unavailable(reason: impl Into<String>) -> Self {
        Self::EncodingUnavailable {
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Warning),
        }
    }

    /// Create a network error
    pub fn network(operation: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            address: None,
            source: None,
            context: ErrorContext::new(),
        }
    }

    /// Create a service error
    pub fn service(
        operation: impl Into<String>,
        status: Option<u16>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Service {
            operation: operation.into(),
            status,
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a lifecycle error
    pub fn lifecycle(phase: LifecyclePhase, reason: impl Into<String>) -> Self {
        Self::Lifecycle {
            phase,
            reason: reason.into(),
            context: ErrorContext::new().with_severity(ErrorSeverity::Critical),
        }
    }

    /// Create a state error
    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: Option<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path,
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an external library error
    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Translate a service client failure raised while performing `operation`.
    pub fn from_api(operation: impl Into<String>, error: ApiError) -> Self {
        let operation = operation.into();
        match error {
            ApiError::Transport { source, .. } => {
                let address = source.url().map(|url| url.to_string());
                Self::Network {
                    operation,
                    address,
                    source: Some(Box::new(source)),
                    context: ErrorContext::new(),
                }
            }
            ApiError::InvalidUrl { url, reason } => Self::config("service_url", url, reason),
            other => Self::service(operation, other.status(), other.to_string()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.context_mut().severity = severity;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::PreconditionMissing { context, .. } => context,
            Self::CameraUnavailable { context, .. } => context,
            Self::EncodingUnavailable { context, .. } => context,
            Self::Network { context, .. } => context,
            Self::Service { context, .. } => context,
            Self::Lifecycle { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::PreconditionMissing { context, .. } => context,
            Self::CameraUnavailable { context, .. } => context,
            Self::EncodingUnavailable { context, .. } => context,
            Self::Network { context, .. } => context,
            Self::Service { context, .. } => context,
            Self::Lifecycle { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::PreconditionMissing { .. } => "precondition_missing",
            Self::CameraUnavailable { .. } => "camera_unavailable",
            Self::EncodingUnavailable { .. } => "encoding_unavailable",
            Self::Network { .. } => "network",
            Self::Service { .. } => "service",
            Self::Lifecycle { .. } => "lifecycle",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Config {
                field,
                value,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    field, reason, value
                )
            }
            SessionError::PreconditionMissing { missing, .. } => {
                write!(
                    f,
                    "Missing session information: {} not selected",
                    missing.join(", ")
                )
            }
            SessionError::CameraUnavailable { device, reason, .. } => {
                write!(f, "Camera {} unavailable: {}", device, reason)
            }
            SessionError::EncodingUnavailable { reason, .. } => {
                write!(f, "Frame encoding unavailable: {}", reason)
            }
            SessionError::Network {
                operation,
                address,
                source,
                ..
            } => {
                match address {
                    Some(address) => write!(f, "Network error during {} on {}", operation, address)?,
                    None => write!(f, "Network error during {}", operation)?,
                }
                if let Some(source) = source {
                    write!(f, ": {}", source)?;
                }
                Ok(())
            }
            SessionError::Service {
                operation,
                status,
                reason,
                ..
            } => {
                if let Some(status) = status {
                    write!(f, "Service rejected {} (HTTP {}): {}", operation, status, reason)
                } else {
                    write!(f, "Service error during {}: {}", operation, reason)
                }
            }
            SessionError::Lifecycle { phase, reason, .. } => {
                write!(f, "Failed to {} attendance session: {}", phase, reason)
            }
            SessionError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Invalid state transition from '{}' when attempting '{}': {}",
                    current_state, attempted_operation, reason
                )
            }
            SessionError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(f, "I/O error during {} on '{}': {}", operation, path, source)
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            SessionError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for SessionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            Self::Network {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using our custom error type
pub type SessionResult<T> = Result<T, SessionError>;

/// Trait for errors that can be retried
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;
}

impl Retryable for SessionError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::Network { .. }
                    | Self::Service { .. }
                    | Self::Lifecycle { .. }
                    | Self::EncodingUnavailable { .. }
            )
    }
}

/// Trait for errors that can be recovered from
pub trait Recoverable {
    /// Check if the session can keep running after this error
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for SessionError {
    fn is_recoverable(&self) -> bool {
        self.context().recoverable
            || matches!(
                self,
                Self::Network { .. }
                    | Self::Service { .. }
                    | Self::EncodingUnavailable { .. }
                    | Self::Lifecycle { .. }
            )
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for SessionError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for SessionError {
    fn recovery_suggestion(&self) -> Option<&str> {
        if let Some(suggestion) = self.context().recovery_suggestion.as_deref() {
            return Some(suggestion);
        }
        match self {
            Self::PreconditionMissing { .. } => {
                Some("Select group, subgroup and course again (attend select ...)")
            }
            Self::CameraUnavailable { .. } => {
                Some("Check that a camera is connected, not in use, and permitted")
            }
            Self::Network { .. } => Some("Check that the recognition service is reachable"),
            _ => None,
        }
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is transient (may resolve itself)
    pub fn is_transient(error: &SessionError) -> bool {
        matches!(
            error,
            SessionError::Network { .. } | SessionError::EncodingUnavailable { .. }
        )
    }

    /// Check if an error is fatal to starting or continuing a session
    pub fn is_fatal(error: &SessionError) -> bool {
        matches!(
            error,
            SessionError::Config { .. }
                | SessionError::PreconditionMissing { .. }
                | SessionError::CameraUnavailable { .. }
        ) || error.severity() == ErrorSeverity::Fatal
    }

    /// Check if an error requires user intervention
    pub fn requires_user_intervention(error: &SessionError) -> bool {
        error.severity() >= ErrorSeverity::Critical
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", None, error)
    }
}

impl From<image::ImageError> for SessionError {
    fn from(error: image::ImageError) -> Self {
        Self::external("image", error)
    }
}
