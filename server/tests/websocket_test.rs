//! WebSocket protocol tests.
//!
//! Exercises message dispatch for requests that are answered without touching
//! the database.

use rollcall_server::config::Config;
use rollcall_server::handlers::process_message;
use rollcall_server::websocket::{ClientMessage, ServerMessage};
use rollcall_server::{db, AppState};
use tokio::sync::mpsc;

fn test_state() -> AppState {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "postgres://localhost/rollcall_test".to_string(),
        auth_secret: None,
    };
    let pool = db::create_lazy_pool(&config.database_url).unwrap();
    AppState::new(pool, config)
}

#[tokio::test]
async fn test_ping_pong() {
    let state = test_state();
    let reply = process_message(r#"{"type":"ping"}"#, &state, "conn").await;
    assert!(matches!(reply, ServerMessage::Pong));
}

#[tokio::test]
async fn test_malformed_message() {
    let state = test_state();
    let reply = process_message("not json", &state, "conn").await;
    match reply {
        ServerMessage::Error { message, request_id } => {
            assert!(message.starts_with("Invalid message format"));
            assert_eq!(request_id, None);
        }
        other => panic!("Expected error, got {:?}", other),
    }

    let reply = process_message(r#"{"type":"pull","since":null}"#, &state, "conn").await;
    assert!(matches!(reply, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn test_invalid_documents_keep_request_id() {
    let state = test_state();

    let put = r#"{"type":"put","collection":"attendanceApp","key":"adminSessionActive","value":true,"request_id":"r1"}"#;
    match process_message(put, &state, "conn").await {
        ServerMessage::Error { request_id, .. } => assert_eq!(request_id.as_deref(), Some("r1")),
        other => panic!("Expected error, got {:?}", other),
    }

    let subscribe = r#"{"type":"subscribe","collection":"bad collection","key":"roster","request_id":"r2"}"#;
    match process_message(subscribe, &state, "conn").await {
        ServerMessage::Error { request_id, .. } => assert_eq!(request_id.as_deref(), Some("r2")),
        other => panic!("Expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsubscribe_is_acknowledged() {
    let state = test_state();
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn_id = state.hub.register(tx);

    let msg = r#"{"type":"unsubscribe","collection":"attendanceApp","key":"roster","request_id":"r3"}"#;
    match process_message(msg, &state, &conn_id).await {
        ServerMessage::Ack { revision, request_id } => {
            assert_eq!(revision, None);
            assert_eq!(request_id.as_deref(), Some("r3"));
        }
        other => panic!("Expected ack, got {:?}", other),
    }
}

#[test]
fn test_client_message_variants() {
    let get: ClientMessage =
        serde_json::from_str(r#"{"type":"get","collection":"attendanceApp","key":"roster"}"#)
            .unwrap();
    assert!(matches!(get, ClientMessage::Get { request_id: None, .. }));

    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
}
