//! Connection lifecycle against a real local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async, accept_hdr_async};

use sessync_client::MockSessionResource;
use sessync_core::{Dataset, Operation, Session, SessionId};
use sessync_sync::{
    ConnectionConfig, ConnectionError, ConnectionState, SessionData, SessionEventService,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_DELAY: Duration = Duration::from_millis(200);

type ServerWs = WebSocketStream<TcpStream>;
type Errors = Arc<Mutex<Vec<ConnectionError>>>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}", listener.local_addr().unwrap());
    (listener, base)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
}

fn event(resource_type: &str, operation: &str, id: &str) -> Message {
    Message::Text(
        json!({ "resourceType": resource_type, "type": operation, "resourceId": id })
            .to_string()
            .into(),
    )
}

async fn close_with(ws: &mut ServerWs, code: CloseCode, reason: &str) {
    ws.close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
    .await
    .unwrap();
}

/// Read until the client goes away so the close handshake can finish.
fn drain(mut ws: ServerWs) {
    drop(tokio::spawn(async move {
        while let Some(Ok(_)) = ws.next().await {}
    }));
}

fn config(base: &str) -> ConnectionConfig {
    ConnectionConfig {
        events_url: base.to_owned(),
        ping_interval: None,
        connect_timeout: TIMEOUT,
        idle_reconnect_delay: IDLE_DELAY,
    }
}

fn start(base: &str, mock: &Arc<MockSessionResource>) -> (SessionEventService, Errors) {
    let data = Arc::new(SessionData::new(Session::new(SessionId::from_raw("s1"), "demo")));
    let errors: Errors = Arc::default();
    let sink = Arc::clone(&errors);
    let service = SessionEventService::builder(data, mock.clone())
        .connect(config(base), SecretString::from("secret"))
        .on_connection_error(move |e| sink.lock().push(e.clone()))
        .start()
        .unwrap();
    (service, errors)
}

async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    let _ = timeout(TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}

fn mock_with(ids: &[&str]) -> Arc<MockSessionResource> {
    let mock = Arc::new(MockSessionResource::new());
    mock.set_session(Session::new(SessionId::from_raw("s1"), "demo"));
    for id in ids {
        mock.put_dataset(Dataset::new(*id, "a.txt"));
    }
    mock
}

#[tokio::test]
async fn connects_to_session_events_path_with_token() {
    let (listener, base) = bind().await;
    let mock = mock_with(&["d1"]);
    let (service, errors) = start(&base, &mock);
    let mut records = service.subscribe_datasets();
    let mut state = service.watch_connection_state().unwrap();

    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    let mut ws = accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        },
    )
    .await
    .unwrap();
    assert_eq!(uri_rx.await.unwrap(), "/events/s1?token=secret");

    wait_for(&mut state, ConnectionState::Connected).await;
    ws.send(event("DATASET", "CREATE", "d1")).await.unwrap();

    let record = timeout(TIMEOUT, records.recv()).await.unwrap().unwrap();
    assert_eq!(record.event.operation, Operation::Create);
    assert!(errors.lock().is_empty());
}

#[tokio::test]
async fn idle_timeout_reconnects_silently() {
    let (listener, base) = bind().await;
    let mock = mock_with(&["d1"]);
    let (service, errors) = start(&base, &mock);
    let mut records = service.subscribe_datasets();

    let mut first = accept(&listener).await;
    first.send(event("DATASET", "CREATE", "d1")).await.unwrap();
    close_with(&mut first, CloseCode::Away, "Idle Timeout").await;
    drain(first);

    let mut second = accept(&listener).await;
    second.send(event("DATASET", "UPDATE", "d1")).await.unwrap();

    let create = timeout(TIMEOUT, records.recv()).await.unwrap().unwrap();
    let update = timeout(TIMEOUT, records.recv()).await.unwrap().unwrap();
    assert_eq!(create.event.operation, Operation::Create);
    assert_eq!(update.event.operation, Operation::Update);
    assert!(errors.lock().is_empty());
    let mut state = service.watch_connection_state().unwrap();
    wait_for(&mut state, ConnectionState::Connected).await;
}

#[tokio::test]
async fn idle_timeout_pauses_before_reopening() {
    let (listener, base) = bind().await;
    let mock = mock_with(&[]);
    let (service, errors) = start(&base, &mock);

    let mut first = accept(&listener).await;
    let closed_at = tokio::time::Instant::now();
    close_with(&mut first, CloseCode::Away, "Idle Timeout").await;
    drain(first);

    let _second = accept(&listener).await;
    assert!(
        closed_at.elapsed() >= IDLE_DELAY,
        "reopened after {:?}",
        closed_at.elapsed()
    );
    assert!(errors.lock().is_empty());
    assert_ne!(service.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn other_close_reports_once_and_stays_down() {
    let (listener, base) = bind().await;
    let mock = mock_with(&["d1"]);
    let (service, errors) = start(&base, &mock);
    let mut state = service.watch_connection_state().unwrap();

    let mut ws = accept(&listener).await;
    close_with(&mut ws, CloseCode::Away, "Going away").await;
    drain(ws);

    wait_for(&mut state, ConnectionState::Disconnected).await;
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err(),
        "client reconnected on its own"
    );
    {
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ConnectionError::Closed { code: 1001, reason } if reason == "Going away"
        ));
        assert_eq!(errors[0].user_message(), "Connection lost, please reload the page");
    }

    // A manual reconnect opens a fresh connection.
    let mut records = service.subscribe_datasets();
    assert!(service.reconnect());
    assert!(!service.reconnect());
    let mut ws = accept(&listener).await;
    ws.send(event("DATASET", "CREATE", "d1")).await.unwrap();
    let _ = timeout(TIMEOUT, records.recv()).await.unwrap().unwrap();
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn dropped_socket_is_an_error() {
    let (listener, base) = bind().await;
    let mock = mock_with(&[]);
    let (service, errors) = start(&base, &mock);
    let mut state = service.watch_connection_state().unwrap();

    drop(accept(&listener).await);

    wait_for(&mut state, ConnectionState::Disconnected).await;
    assert_eq!(errors.lock().len(), 1);
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let (listener, base) = bind().await;
    drop(listener);
    let mock = mock_with(&[]);
    let (service, errors) = start(&base, &mock);
    let mut state = service.watch_connection_state().unwrap();

    wait_for(&mut state, ConnectionState::Disconnected).await;
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ConnectionError::Open(_)));
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let (listener, base) = bind().await;
    let mock = mock_with(&["d1"]);
    let (service, errors) = start(&base, &mock);
    let mut records = service.subscribe_datasets();

    let mut ws = accept(&listener).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(event("WIDGET", "CREATE", "w1")).await.unwrap();
    ws.send(event("DATASET", "CREATE", "d1")).await.unwrap();

    let record = timeout(TIMEOUT, records.recv()).await.unwrap().unwrap();
    assert_eq!(record.event.resource_id, "d1");
    assert!(errors.lock().is_empty());
    assert_eq!(service.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn explicit_close_is_terminal_and_silent() {
    let (listener, base) = bind().await;
    let mock = mock_with(&[]);
    let (service, errors) = start(&base, &mock);
    let mut state = service.watch_connection_state().unwrap();

    let mut ws = accept(&listener).await;
    wait_for(&mut state, ConnectionState::Connected).await;

    service.close();
    assert_eq!(service.connection_state(), ConnectionState::Closed);

    // The server sees the client's close frame or the end of the stream.
    let seen = timeout(TIMEOUT, ws.next()).await.unwrap();
    assert!(matches!(seen, None | Some(Ok(Message::Close(_)) | Err(_))));

    assert!(!service.reconnect());
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
    assert!(errors.lock().is_empty());
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}
