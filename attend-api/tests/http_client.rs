//! HTTP-level tests for the attendance service client against a mock server.

use attend_api::{ApiError, AttendanceService, FrameRequest, HttpAttendanceService, SessionKey};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: SessionKey<'static> = SessionKey {
    group: "CS",
    subgroup: "A",
    course: "Data Structures",
};

#[tokio::test]
async fn lists_courses_for_group_and_subgroup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_courses/CS/A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["OOP", "Data Structures"])))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    let courses = service.courses("CS", "A").await.unwrap();

    assert_eq!(courses, vec!["OOP".to_string(), "Data Structures".to_string()]);
}

#[tokio::test]
async fn course_listing_rejects_non_array_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_courses/CS/A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    let err = service.courses("CS", "A").await.unwrap_err();

    assert!(matches!(err, ApiError::Decode { endpoint: "get_courses", .. }));
}

#[tokio::test]
async fn begin_and_end_hit_encoded_session_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start_attendance/CS/A/Data%20Structures"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "started"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stop_attendance/CS/A/Data%20Structures"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    service.begin_session(KEY).await.unwrap();
    service.end_session(KEY).await.unwrap();
}

#[tokio::test]
async fn process_frame_posts_payload_and_reads_detections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process_frame"))
        .and(body_json(json!({
            "frame": "aGVsbG8=",
            "major": "CS",
            "section": "A",
            "course": "Data Structures",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "processedFrame": "d29ybGQ=",
            "detectedStudents": ["ali", "sara"],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    let response = service
        .process_frame(&FrameRequest::new("aGVsbG8=", KEY))
        .await
        .unwrap();

    assert_eq!(response.processed_frame.as_deref(), Some("d29ybGQ="));
    assert_eq!(
        response.detected_students,
        Some(vec!["ali".to_string(), "sara".to_string()])
    );
}

#[tokio::test]
async fn server_errors_surface_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process_frame"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    let err = service
        .process_frame(&FrameRequest::new("x", KEY))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(err.endpoint(), Some("process_frame"));
    assert!(err.to_string().contains("model not loaded"));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let server = MockServer::start().await;
    let payload = vec![0x50, 0x4B, 0x03, 0x04, 0x00, 0xFF];
    Mock::given(method("GET"))
        .and(path("/download_excel/CS/A/Data%20Structures"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let service = HttpAttendanceService::new(&server.uri()).unwrap();
    let record = service.download_record(KEY).await.unwrap();

    assert_eq!(record, payload);
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    // Port 9 (discard) is not served by anything in the test environment.
    let service = HttpAttendanceService::new("http://127.0.0.1:9").unwrap();
    let err = service.begin_session(KEY).await.unwrap_err();

    assert!(err.is_transport());
    assert_eq!(err.endpoint(), Some("start_attendance"));
}
