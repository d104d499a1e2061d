//! Remote begin/end of an attendance session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use attend_api::AttendanceService;
use tracing::{debug, info};

use crate::config::SessionContext;
use crate::error::{LifecyclePhase, SessionError, SessionResult};

/// Issues the begin and end notifications for one session.
///
/// `end` goes out at most once even when it fails, and is sent whether or
/// not `begin` was ever confirmed.
pub struct LifecycleController {
    service: Arc<dyn AttendanceService>,
    begun: AtomicBool,
    end_issued: AtomicBool,
}

impl LifecycleController {
    pub fn new(service: Arc<dyn AttendanceService>) -> Self {
        Self {
            service,
            begun: AtomicBool::new(false),
            end_issued: AtomicBool::new(false),
        }
    }

    pub async fn begin(&self, context: &SessionContext) -> SessionResult<()> {
        self.service
            .begin_session(context.key())
            .await
            .map_err(|e| SessionError::lifecycle(LifecyclePhase::Begin, e.to_string()))?;
        self.begun.store(true, Ordering::SeqCst);
        info!(session = %context, "attendance session begun");
        Ok(())
    }

    pub async fn end(&self, context: &SessionContext) -> SessionResult<()> {
        if self.end_issued.swap(true, Ordering::SeqCst) {
            debug!(session = %context, "end already issued");
            return Ok(());
        }
        if !self.was_begun() {
            debug!(session = %context, "ending a session whose begin was never confirmed");
        }

        self.service
            .end_session(context.key())
            .await
            .map_err(|e| SessionError::lifecycle(LifecyclePhase::End, e.to_string()))?;
        info!(session = %context, "attendance session ended");
        Ok(())
    }

    pub fn was_begun(&self) -> bool {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn end_issued(&self) -> bool {
        self.end_issued.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("begun", &self.was_begun())
            .field("end_issued", &self.end_issued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use attend_api::{ApiError, ApiResult, FrameRequest, FrameResponse, SessionKey};

    #[derive(Default)]
    struct Recorder {
        begins: AtomicUsize,
        ends: AtomicUsize,
        fail: bool,
    }

    impl Recorder {
        fn outcome(&self, endpoint: &'static str) -> ApiResult<()> {
            if self.fail {
                Err(ApiError::Status {
                    endpoint,
                    status: 500,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl AttendanceService for Recorder {
        async fn courses(&self, _: &str, _: &str) -> ApiResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn begin_session(&self, _: SessionKey<'_>) -> ApiResult<()> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.outcome("start_attendance")
        }

        async fn process_frame(&self, _: &FrameRequest<'_>) -> ApiResult<FrameResponse> {
            Ok(FrameResponse::default())
        }

        async fn end_session(&self, _: SessionKey<'_>) -> ApiResult<()> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            self.outcome("stop_attendance")
        }

        async fn download_record(&self, _: SessionKey<'_>) -> ApiResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn context() -> SessionContext {
        SessionContext::new("CS", "A", "Compilers").unwrap()
    }

    #[tokio::test]
    async fn test_end_without_begin_is_sent_once() {
        let service = Arc::new(Recorder::default());
        let controller = LifecycleController::new(service.clone());

        controller.end(&context()).await.unwrap();
        controller.end(&context()).await.unwrap();

        assert!(!controller.was_begun());
        assert!(controller.end_issued());
        assert_eq!(service.ends.load(Ordering::SeqCst), 1);
        assert_eq!(service.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_end_is_not_retried() {
        let service = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let controller = LifecycleController::new(service.clone());

        let err = controller.begin(&context()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Lifecycle {
                phase: LifecyclePhase::Begin,
                ..
            }
        ));
        assert!(!controller.was_begun());

        let err = controller.end(&context()).await.unwrap_err();
        assert_eq!(err.category(), "lifecycle");
        controller.end(&context()).await.unwrap();
        assert_eq!(service.ends.load(Ordering::SeqCst), 1);
    }
}
