use futures_util::{SinkExt, StreamExt};
use rc_client::{
    ConnectionManager, ConnectionOptions, ConnectionStatus, MemoryStateStore, StateKey, StateStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn fast_retry() -> ConnectionOptions {
    ConnectionOptions {
        retry_interval: Duration::from_millis(50),
    }
}

/// Accepts sockets forever and reports each request target. The first
/// connection assigns an identity, pushes one event and drops without a
/// close frame; later connections stay open and silent.
async fn spawn_flaky_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (uri_tx, uri_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut accepted = 0usize;
        while let Ok((stream, _)) = listener.accept().await {
            accepted += 1;
            let uri_tx = uri_tx.clone();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            };
            let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                continue;
            };
            if accepted == 1 {
                let _ = ws
                    .send(Message::Text(json!({ "connectionId": "abc" }).to_string()))
                    .await;
                let _ = ws
                    .send(Message::Text(
                        json!({
                            "type": "info",
                            "timestamp": "2025-03-01T10:00:00Z",
                            "data": { "message": "warming up" }
                        })
                        .to_string(),
                    ))
                    .await;
                drop(ws);
            } else {
                tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
            }
        }
    });

    (format!("http://{addr}"), uri_rx)
}

/// Accepts sockets forever; each one is greeted with `{"connectionId":"abc"}`
/// after `delay` and then kept open.
async fn spawn_greeting_server(delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                tokio::time::sleep(delay).await;
                let hello = json!({ "connectionId": "abc" }).to_string();
                if ws.send(Message::Text(hello)).await.is_err() {
                    return;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    format!("http://{addr}")
}

async fn wait_for_status(manager: &ConnectionManager, wanted: ConnectionStatus) {
    let mut status = manager.watch_status();
    timeout(WAIT, async {
        loop {
            if *status.borrow_and_update() == wanted {
                break;
            }
            status.changed().await.expect("status sender alive");
        }
    })
    .await
    .expect("status reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn captures_identity_and_resumes_after_abrupt_close() {
    let (server_url, mut uris) = spawn_flaky_server().await;
    let store = Arc::new(MemoryStateStore::new());
    let mut manager = ConnectionManager::new(store.clone(), fast_retry());
    let (_subscription, mut frames) = manager.subscribe_channel();

    manager.connect(&server_url).expect("connect");

    let first = timeout(WAIT, uris.recv()).await.expect("first connect").expect("uri");
    assert_eq!(first, "/ws");

    let event = timeout(WAIT, frames.recv()).await.expect("event").expect("frame");
    assert_eq!(event["type"], "info");
    assert_eq!(event["data"]["message"], "warming up");

    let second = timeout(WAIT, uris.recv()).await.expect("reconnect").expect("uri");
    assert_eq!(second, "/ws?connectionId=abc");

    assert_eq!(manager.connection_id().as_deref(), Some("abc"));
    assert_eq!(store.load(StateKey::ConnectionId).as_deref(), Some("abc"));
    assert!(manager.reconnect_count() >= 1);
    assert!(frames.try_recv().is_err(), "identity frame must not be forwarded");

    manager.disconnect();
    assert_eq!(manager.connection_id().as_deref(), Some("abc"));
    assert!(
        timeout(Duration::from_millis(300), uris.recv()).await.is_err(),
        "no reconnect after explicit disconnect"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stored_identity_is_sent_on_first_connect() {
    let (server_url, mut uris) = spawn_flaky_server().await;
    let store = Arc::new(MemoryStateStore::new().with(StateKey::ConnectionId, "resume-me"));
    let mut manager = ConnectionManager::new(store, fast_retry());

    manager.connect(&server_url).expect("connect");
    let first = timeout(WAIT, uris.recv()).await.expect("connect").expect("uri");
    assert_eq!(first, "/ws?connectionId=resume-me");
    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_tracks_connection_lifecycle() {
    let (server_url, _uris) = spawn_flaky_server().await;
    let mut manager = ConnectionManager::new(Arc::new(MemoryStateStore::new()), fast_retry());

    manager.connect(&server_url).expect("connect");
    wait_for_status(&manager, ConnectionStatus::Connected).await;

    manager.disconnect();
    assert_eq!(manager.status(), ConnectionStatus::Idle);
    assert!(!manager.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keeps_retrying_while_server_is_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut manager = ConnectionManager::new(Arc::new(MemoryStateStore::new()), fast_retry());
    manager.connect(&format!("http://{addr}")).expect("connect");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ne!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.connection_id(), None);
    manager.disconnect();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stored_identity_counts_only_after_the_server_confirms_it() {
    let server_url = spawn_greeting_server(Duration::from_millis(300)).await;
    let store = Arc::new(MemoryStateStore::new().with(StateKey::ConnectionId, "stale"));
    let mut manager = ConnectionManager::new(store.clone(), fast_retry());

    manager.connect(&server_url).expect("connect");
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    assert_eq!(manager.session_id(), None);
    assert_eq!(manager.connection_id().as_deref(), Some("stale"));

    let assigned = manager.wait_for_connection_id(WAIT).await;
    assert_eq!(assigned.as_deref(), Some("abc"));
    assert_eq!(manager.session_id().as_deref(), Some("abc"));
    assert_eq!(store.load(StateKey::ConnectionId).as_deref(), Some("abc"));

    manager.disconnect();
    assert_eq!(manager.session_id(), None);
    assert_eq!(manager.connection_id().as_deref(), Some("abc"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaced_loop_does_not_reset_the_new_status() {
    let server_url = spawn_greeting_server(Duration::ZERO).await;
    let mut manager = ConnectionManager::new(Arc::new(MemoryStateStore::new()), fast_retry());

    manager.connect(&server_url).expect("connect");
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.wait_for_connection_id(WAIT).await.expect("assigned");

    manager.connect(&server_url).expect("reconnect");
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    manager.wait_for_connection_id(WAIT).await.expect("assigned again");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(manager.session_id().as_deref(), Some("abc"));
    manager.disconnect();
}
