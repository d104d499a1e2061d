// SPDX-License-Identifier: MIT
//! # Attendance Service Client
//!
//! Typed async client for the face-recognition attendance service. The service
//! owns recognition and durable attendance storage; this crate only moves
//! requests and responses.
//!
//! ## Endpoints
//!
//! | Operation | Method | Path |
//! |-----------|--------|------|
//! | courses | GET | `/get_courses/{group}/{subgroup}` |
//! | begin session | GET | `/start_attendance/{group}/{subgroup}/{course}` |
//! | process frame | POST | `/process_frame` |
//! | end session | GET | `/stop_attendance/{group}/{subgroup}/{course}` |
//! | download record | GET | `/download_excel/{group}/{subgroup}/{course}` |
//!
//! Path segments are percent-encoded, so course names with spaces or slashes
//! are safe to pass through unchanged.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use attend_api::{AttendanceService, HttpAttendanceService, SessionKey};
//!
//! # async fn example() -> Result<(), attend_api::ApiError> {
//! let service = HttpAttendanceService::new("http://127.0.0.1:5000")?;
//! let courses = service.courses("CS", "A").await?;
//!
//! let key = SessionKey { group: "CS", subgroup: "A", course: &courses[0] };
//! service.begin_session(key).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The [`AttendanceService`] trait is the seam the capture pipeline depends
//! on; tests substitute in-memory implementations for it.

use std::time::Duration;

use async_trait::async_trait;
pub use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Base URL used by the reference deployment of the service.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

/// Longest slice of an error body kept in [`ApiError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Failures talking to the attendance service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid service URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("could not decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl ApiError {
    /// True when the request never produced an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Endpoint the failing request was addressed to, if one was reached.
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidUrl { .. } => None,
            Self::Transport { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Decode { endpoint, .. } => Some(endpoint),
        }
    }

    /// HTTP status of a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The three identifiers that scope every session call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey<'a> {
    pub group: &'a str,
    pub subgroup: &'a str,
    pub course: &'a str,
}

impl<'a> SessionKey<'a> {
    fn segments(&self, endpoint: &'a str) -> [&'a str; 4] {
        [endpoint, self.group, self.subgroup, self.course]
    }
}

/// Body of a `process_frame` request.
///
/// The service still uses its original field names (`major`, `section`) for
/// group and subgroup.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRequest<'a> {
    /// Base64 JPEG payload without a `data:` URL header.
    pub frame: &'a str,
    #[serde(rename = "major")]
    pub group: &'a str,
    #[serde(rename = "section")]
    pub subgroup: &'a str,
    pub course: &'a str,
}

impl<'a> FrameRequest<'a> {
    pub fn new(frame: &'a str, key: SessionKey<'a>) -> Self {
        Self {
            frame,
            group: key.group,
            subgroup: key.subgroup,
            course: key.course,
        }
    }
}

/// Reply to a `process_frame` request. Both fields may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FrameResponse {
    /// Annotated preview as base64 JPEG.
    #[serde(rename = "processedFrame", default)]
    pub processed_frame: Option<String>,
    /// Identities newly recognised in this frame.
    #[serde(rename = "detectedStudents", default)]
    pub detected_students: Option<Vec<String>>,
}

/// Operations offered by the attendance service.
#[async_trait]
pub trait AttendanceService: Send + Sync {
    /// Course identifiers available to a group/subgroup, in service order.
    async fn courses(&self, group: &str, subgroup: &str) -> ApiResult<Vec<String>>;

    /// Mark the start of an attendance session.
    async fn begin_session(&self, key: SessionKey<'_>) -> ApiResult<()>;

    /// Submit one frame for recognition.
    async fn process_frame(&self, request: &FrameRequest<'_>) -> ApiResult<FrameResponse>;

    /// Mark the end of an attendance session.
    async fn end_session(&self, key: SessionKey<'_>) -> ApiResult<()>;

    /// Fetch the persisted attendance record (a spreadsheet).
    async fn download_record(&self, key: SessionKey<'_>) -> ApiResult<Vec<u8>>;
}

/// [`AttendanceService`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAttendanceService {
    client: reqwest::Client,
    base: Url,
}

impl HttpAttendanceService {
    /// Client relying on the transport's default timeouts.
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_timeout(base_url, None)
    }

    /// Client with an optional per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> ApiResult<Self> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl {
                url: base_url.to_string(),
                reason: "URL cannot carry a path".to_string(),
            });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|source| ApiError::Transport {
            endpoint: "client",
            source,
        })?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint_url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl {
                url: self.base.to_string(),
                reason: "URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, endpoint: &'static str, segments: &[&str]) -> ApiResult<reqwest::Response> {
        let url = self.endpoint_url(segments)?;
        debug!(%url, endpoint, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Transport { endpoint, source })?;
        ensure_success(endpoint, response).await
    }
}

async fn ensure_success(
    endpoint: &'static str,
    response: reqwest::Response,
) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(ApiError::Status {
        endpoint,
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn read_body(endpoint: &'static str, response: reqwest::Response) -> ApiResult<Vec<u8>> {
    let bytes = response
        .bytes()
        .await
        .map_err(|source| ApiError::Transport { endpoint, source })?;
    Ok(bytes.to_vec())
}

fn parse_courses(body: &[u8]) -> ApiResult<Vec<String>> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ApiError::Decode {
            endpoint: "get_courses",
            reason: e.to_string(),
        })?;
    let items = value.as_array().ok_or_else(|| ApiError::Decode {
        endpoint: "get_courses",
        reason: format!("expected an array of course identifiers, got {value}"),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| ApiError::Decode {
                endpoint: "get_courses",
                reason: format!("course identifier is not a string: {item}"),
            })
        })
        .collect()
}

#[async_trait]
impl AttendanceService for HttpAttendanceService {
    async fn courses(&self, group: &str, subgroup: &str) -> ApiResult<Vec<String>> {
        let response = self
            .get("get_courses", &["get_courses", group, subgroup])
            .await?;
        let body = read_body("get_courses", response).await?;
        parse_courses(&body)
    }

    async fn begin_session(&self, key: SessionKey<'_>) -> ApiResult<()> {
        self.get("start_attendance", &key.segments("start_attendance"))
            .await?;
        Ok(())
    }

    async fn process_frame(&self, request: &FrameRequest<'_>) -> ApiResult<FrameResponse> {
        const ENDPOINT: &str = "process_frame";
        let url = self.endpoint_url(&[ENDPOINT])?;
        debug!(%url, frame_len = request.frame.len(), "POST");
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;
        let response = ensure_success(ENDPOINT, response).await?;
        let body = read_body(ENDPOINT, response).await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
            endpoint: ENDPOINT,
            reason: e.to_string(),
        })
    }

    async fn end_session(&self, key: SessionKey<'_>) -> ApiResult<()> {
        self.get("stop_attendance", &key.segments("stop_attendance"))
            .await?;
        Ok(())
    }

    async fn download_record(&self, key: SessionKey<'_>) -> ApiResult<Vec<u8>> {
        let response = self
            .get("download_excel", &key.segments("download_excel"))
            .await?;
        read_body("download_excel", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_request_uses_service_field_names() {
        let key = SessionKey {
            group: "CS",
            subgroup: "A",
            course: "Compilers",
        };
        let body = serde_json::to_value(FrameRequest::new("abc", key)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "frame": "abc",
                "major": "CS",
                "section": "A",
                "course": "Compilers",
            })
        );
    }

    #[test]
    fn frame_response_tolerates_missing_and_null_fields() {
        let empty: FrameResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, FrameResponse::default());

        let nulls: FrameResponse =
            serde_json::from_str(r#"{"processedFrame": null, "detectedStudents": null}"#).unwrap();
        assert!(nulls.processed_frame.is_none());
        assert!(nulls.detected_students.is_none());
    }

    #[test]
    fn courses_must_be_an_array_of_strings() {
        assert_eq!(
            parse_courses(br#"["OOP", "DSA"]"#).unwrap(),
            vec!["OOP".to_string(), "DSA".to_string()]
        );
        assert!(matches!(
            parse_courses(br#"{"courses": []}"#),
            Err(ApiError::Decode { .. })
        ));
        assert!(matches!(
            parse_courses(br#"["OOP", 7]"#),
            Err(ApiError::Decode { .. })
        ));
    }

    #[test]
    fn endpoint_urls_keep_base_path_and_encode_segments() {
        let service = HttpAttendanceService::new("http://localhost:5000/api/").unwrap();
        let url = service
            .endpoint_url(&["start_attendance", "CS", "A", "Data Structures/Lab"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/start_attendance/CS/A/Data%20Structures%2FLab"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            HttpAttendanceService::new("not a url"),
            Err(ApiError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpAttendanceService::new("mailto:someone@example.com"),
            Err(ApiError::InvalidUrl { .. })
        ));
    }
}
