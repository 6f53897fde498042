//! Session service client tests against a mock HTTP server

use serde_json::json;
use std::time::Duration;
use telecare_rtc_core::{
    DirectoryError, HttpSessionDirectory, ParticipantId, ParticipantRole, SessionDirectory,
    SessionId, SessionServiceConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn directory_for(server: &MockServer) -> HttpSessionDirectory {
    HttpSessionDirectory::new(&SessionServiceConfig {
        base_url: format!("{}/api/telemedicine/", server.uri()),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn fetches_session_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/S1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "S1",
            "participants": [
                {"id": "dr-osei", "role": "clinician"},
                {"id": "pt-17", "role": "patient"}
            ],
            "scheduledTime": "2026-10-16T14:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = directory_for(&server)
        .fetch(&SessionId::new("S1"))
        .await
        .unwrap();

    assert_eq!(session.id, SessionId::new("S1"));
    assert!(session.validate().is_ok());
    assert!(session.scheduled_time.is_some());
    let clinician = session.participant(&ParticipantId::new("dr-osei")).unwrap();
    assert_eq!(clinician.role, ParticipantRole::Clinician);
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = directory_for(&server).fetch(&SessionId::new("gone")).await;
    assert!(matches!(result, Err(DirectoryError::NotFound(id)) if id == SessionId::new("gone")));
}

#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/S1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    match directory_for(&server).fetch(&SessionId::new("S1")).await {
        Err(DirectoryError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_record_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/S1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "S1"})))
        .mount(&server)
        .await;

    let result = directory_for(&server).fetch(&SessionId::new("S1")).await;
    assert!(matches!(result, Err(DirectoryError::Decode(_))));
}

#[tokio::test]
async fn record_for_another_session_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/S1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "S2",
            "participants": [
                {"id": "dr-osei", "role": "clinician"},
                {"id": "pt-17", "role": "patient"}
            ]
        })))
        .mount(&server)
        .await;

    let result = directory_for(&server).fetch(&SessionId::new("S1")).await;
    assert!(matches!(result, Err(DirectoryError::Decode(_))));
}

#[tokio::test]
async fn session_id_with_reserved_characters_stays_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/telemedicine/sessions/ward%203%2Fbed%3F2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ward 3/bed?2",
            "participants": [
                {"id": "dr-osei", "role": "clinician"},
                {"id": "pt-17", "role": "patient"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = directory_for(&server)
        .fetch(&SessionId::new("ward 3/bed?2"))
        .await
        .unwrap();
    assert_eq!(session.id, SessionId::new("ward 3/bed?2"));
}
