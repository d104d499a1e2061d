//! Sends encoded frames to the recognition service.

use std::sync::Arc;

use attend_api::{AttendanceService, FrameRequest};
use base64::{Engine as _, engine::general_purpose};
use tracing::debug;

use super::encoder::EncodedFrame;
use crate::config::SessionContext;
use crate::error::{SessionError, SessionResult};

/// Outcome of one successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleResult {
    /// Annotated preview from the service, as JPEG bytes.
    pub processed_image: Option<Vec<u8>>,
    /// Identities recognised in this frame. May repeat earlier sightings.
    pub new_detections: Vec<String>,
}

/// One request per cycle, no retries: a failed cycle is superseded by the
/// next tick.
#[derive(Clone)]
pub struct DetectionDispatcher {
    service: Arc<dyn AttendanceService>,
}

impl DetectionDispatcher {
    pub fn new(service: Arc<dyn AttendanceService>) -> Self {
        Self { service }
    }

    pub async fn dispatch(
        &self,
        frame: &EncodedFrame,
        context: &SessionContext,
    ) -> SessionResult<CycleResult> {
        let request = FrameRequest::new(frame.payload(), context.key());
        let response = self
            .service
            .process_frame(&request)
            .await
            .map_err(|e| SessionError::from_api("process_frame", e))?;

        let processed_image = match response.processed_frame.as_deref() {
            Some(encoded) if !encoded.trim().is_empty() => Some(decode_preview(encoded)?),
            _ => None,
        };
        let new_detections = response.detected_students.unwrap_or_default();
        debug!(
            detections = new_detections.len(),
            preview_bytes = processed_image.as_ref().map_or(0, Vec::len),
            "frame dispatched"
        );

        Ok(CycleResult {
            processed_image,
            new_detections,
        })
    }
}

/// Accepts bare base64 or a full `data:image/...;base64,` URL.
fn decode_preview(encoded: &str) -> SessionResult<Vec<u8>> {
    let body = match encoded.split_once(";base64,") {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => encoded,
    };
    general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| {
            SessionError::service(
                "process_frame",
                None,
                format!("processed frame is not valid base64: {e}"),
            )
        })
}
