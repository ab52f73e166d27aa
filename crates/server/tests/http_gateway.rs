use axum::body::Body;
use axum::http::{Request, StatusCode};
use commonio_server::app;
use commonio_server::config::{AppState, ServerConfig};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

async fn setup() -> (TempDir, AppState) {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;
    let state = AppState::new(config).await.unwrap();
    (dir, state)
}

#[tokio::test]
async fn test_health_check() {
    let (_dir, state) = setup().await;

    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.starts_with(b"OK"));
}

#[tokio::test]
async fn test_static_files_are_served() {
    let (dir, state) = setup().await;
    std::fs::write(dir.path().join("public").join("index.html"), "<h1>CommonIO</h1>").unwrap();

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/index.html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"<h1>CommonIO</h1>");
}

async fn next_json<S>(stream: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await.expect("socket open").expect("frame") {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_websocket_session_and_reply() {
    let (_dir, state) = setup().await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let (mut sink, mut stream) = socket.split();

    let hello = next_json(&mut stream).await;
    assert_eq!(hello["event"], "session");
    assert_eq!(hello["data"]["err"], Value::Null);
    let session_id = hello["data"]["sessionId"].as_str().unwrap().to_string();
    assert_eq!(session_id.len(), 64);

    let request = json!({
        "event": "register",
        "data": {
            "sessionId": session_id,
            "username": "alice",
            "password": "pw",
            "nickname": "Alice",
        }
    });
    sink.send(Message::Text(request.to_string())).await.unwrap();
    let reply = next_json(&mut stream).await;
    assert_eq!(reply, json!({ "event": "register", "data": { "err": null } }));

    let request = json!({
        "event": "login",
        "data": { "sessionId": session_id, "username": "alice" }
    });
    sink.send(Message::Text(request.to_string())).await.unwrap();
    let reply = next_json(&mut stream).await;
    assert_eq!(reply["event"], "login");
    assert_eq!(reply["data"]["err"], "ERROR_TYPE_NOT_MATCH: password");

    sink.close().await.unwrap();
}
