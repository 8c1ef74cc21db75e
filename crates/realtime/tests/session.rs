//! Integration tests for `JobSession` against an in-process WebSocket
//! server.
//!
//! Each test binds a loopback listener, points a session at it, and
//! scripts the server side of the conversation: frames, abnormal drops,
//! close codes. Reconnection delays are shrunk via `ReconnectPolicy` so
//! the backoff paths run in milliseconds.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use trafficlens_realtime::messages::{LogData, ProgressData};
use trafficlens_realtime::{
    AnalysisMessage, MessageKind, RealtimeConfig, ReconnectPolicy, SessionDirectory, SessionState,
};

const PROGRESS_FRAME: &str = r#"{"type":"progress_update","data":{"processed_frames":10,"total_frames":100,"vehicles_detected":3,"percentage":10.0,"status":"running"}}"#;
const COMPLETE_FRAME: &str = r#"{"type":"processing_complete","data":{"analysis_id":42,"total_vehicles":57,"processing_time":182.4,"stats":{}}}"#;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    (listener, format!("ws://{addr}"))
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept TCP connection");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("accept WebSocket handshake")
}

fn fast_directory(url: String, base_delay_ms: u64, max_attempts: u32) -> SessionDirectory {
    SessionDirectory::new(RealtimeConfig {
        ws_base_url: url,
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(base_delay_ms),
            max_attempts,
        },
    })
}

// ---------------------------------------------------------------------------
// Test: subscribed handlers receive exactly their kind, with the payload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatches_to_matching_subscribers_only() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressData>();
    session.subscribe(MessageKind::ProgressUpdate, move |message| {
        if let AnalysisMessage::ProgressUpdate(data) = message {
            let _ = progress_tx.send(data.clone());
        }
    });
    let (complete_tx, mut complete_rx) = mpsc::unbounded_channel::<i64>();
    session.subscribe(MessageKind::ProcessingComplete, move |message| {
        if let AnalysisMessage::ProcessingComplete(data) = message {
            let _ = complete_tx.send(data.total_vehicles);
        }
    });

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Text(PROGRESS_FRAME.into())).await.unwrap();
        ws.send(Message::Text(COMPLETE_FRAME.into())).await.unwrap();
        // Hold the connection open until the client closes it.
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    session.connect().await.expect("connect");

    let progress = timeout(Duration::from_secs(5), progress_rx.recv())
        .await
        .expect("progress within deadline")
        .expect("progress handler fired");
    assert_eq!(progress.processed_frames, 10);
    assert_eq!(progress.total_frames, 100);
    assert_eq!(progress.vehicles_detected, 3);
    assert_eq!(progress.status, "running");

    let total = timeout(Duration::from_secs(5), complete_rx.recv())
        .await
        .expect("completion within deadline")
        .expect("completion handler fired");
    assert_eq!(total, 57);

    // Frames arrive in transport order, so by now the progress handler
    // has seen everything it will ever see: exactly one message.
    assert!(progress_rx.try_recv().is_err());

    session.disconnect();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: malformed and unknown frames are dropped, the connection survives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_and_unknown_frames_do_not_kill_the_session() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<ProgressData>();
    session.subscribe(MessageKind::ProgressUpdate, move |message| {
        if let AnalysisMessage::ProgressUpdate(data) = message {
            let _ = seen_tx.send(data.clone());
        }
    });

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Text("not json at all".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"mystery","data":{"x":1}}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"{"type":"progress_update","data":{"wrong":"shape"}}"#.into()))
            .await
            .unwrap();
        ws.send(Message::Text(PROGRESS_FRAME.into())).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    session.connect().await.expect("connect");

    let progress = timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("valid frame within deadline")
        .expect("handler fired");
    assert_eq!(progress.processed_frames, 10);
    // Only the one well-formed frame was dispatched.
    assert!(seen_rx.try_recv().is_err());
    assert!(session.is_connected());

    session.disconnect();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: send() reaches the server while open, is a no-op otherwise
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_enqueues_only_while_open() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let control = AnalysisMessage::LogMessage(LogData {
        level: "info".into(),
        message: "client ready".into(),
        timestamp: "2024-04-01T12:00:00Z".into(),
    });

    // Not yet connected: dropped with a warning, nothing else happens.
    session.send(&control);

    let (got_tx, got_rx) = oneshot::channel::<String>();
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let frame = ws.next().await.expect("frame").expect("frame ok");
        match frame {
            Message::Text(text) => {
                let _ = got_tx.send(text);
            }
            other => panic!("Expected text frame, got {other:?}"),
        }
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    session.connect().await.expect("connect");
    session.send(&control);

    let received = timeout(Duration::from_secs(5), got_rx)
        .await
        .expect("frame within deadline")
        .expect("server received the frame");
    assert!(received.contains(r#""type":"log_message""#));
    assert!(received.contains("client ready"));

    session.disconnect();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits after close")
        .unwrap();
    // Disconnected: again a silent no-op.
    session.send(&control);
}

// ---------------------------------------------------------------------------
// Test: disconnect closes with code 1000 and suppresses reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_sends_close_1000_and_never_reconnects() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => {
                    let frame = frame.expect("close frame carries a code");
                    assert_eq!(frame.code, CloseCode::Normal);
                    break;
                }
                Some(Ok(_)) => continue,
                other => panic!("Expected close frame, got {other:?}"),
            }
        }
        listener
    });

    session.connect().await.expect("connect");
    session.disconnect();

    let listener = timeout(Duration::from_secs(5), server)
        .await
        .expect("server sees the close frame")
        .unwrap();

    // With a 25 ms base delay a (buggy) reconnect would land well within
    // this window.
    let reconnect = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(reconnect.is_err(), "no reconnection after disconnect");
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Closed);
}

// ---------------------------------------------------------------------------
// Test: a server close with code 1000 also suppresses reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_normal_close_is_intentional() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "analysis finished".into(),
        }))
        .await
        .unwrap();
        // Drain until the peer acknowledges.
        while ws.next().await.is_some() {}
        listener
    });

    session.connect().await.expect("connect");

    let listener = timeout(Duration::from_secs(5), server)
        .await
        .expect("server closes")
        .unwrap();

    let reconnect = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(reconnect.is_err(), "close 1000 must not trigger backoff");
    assert_eq!(session.state(), SessionState::Closed);
}

// ---------------------------------------------------------------------------
// Test: abnormal closure reconnects with backoff and resets the counter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abnormal_close_reconnects_and_success_resets_counter() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 25, 5);
    let session = directory.get_or_create(42).await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<ProgressData>();
    session.subscribe(MessageKind::ProgressUpdate, move |message| {
        if let AnalysisMessage::ProgressUpdate(data) = message {
            let _ = seen_tx.send(data.clone());
        }
    });

    let server = tokio::spawn(async move {
        // First connection: abnormal server-side close.
        let mut first = accept(&listener).await;
        first
            .close(Some(CloseFrame {
                code: CloseCode::Error,
                reason: "worker crashed".into(),
            }))
            .await
            .unwrap();
        drop(first);

        // The session must come back on its own and keep its subscribers.
        let mut second = accept(&listener).await;
        second
            .send(Message::Text(PROGRESS_FRAME.into()))
            .await
            .unwrap();
        while let Some(Ok(frame)) = second.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    });

    session.connect().await.expect("connect");

    let progress = timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("frame after reconnect")
        .expect("handler survived the reconnect");
    assert_eq!(progress.processed_frames, 10);
    assert!(session.is_connected());
    assert_eq!(session.reconnect_attempts(), 0, "success resets the counter");

    session.disconnect();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server exits")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: exhausting the attempt cap gives up silently
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_retries_give_up_silently() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 10, 2);
    let session = directory.get_or_create(42).await;

    let first = tokio::spawn(async move {
        let ws = accept(&listener).await;
        // Drop the connection *and* the listener: every reconnect attempt
        // will be refused.
        drop(ws);
        drop(listener);
    });

    session.connect().await.expect("connect");
    timeout(Duration::from_secs(5), first)
        .await
        .expect("server drops everything")
        .unwrap();

    // 2 attempts at 10 ms and 20 ms, each refused immediately.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.state() != SessionState::Closed {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session should give up within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!session.is_connected());
}

// ---------------------------------------------------------------------------
// Test: disconnect wins against a pending reconnect timer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_cancels_a_pending_reconnect_timer() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 400, 5);
    let session = directory.get_or_create(42).await;

    let server = tokio::spawn(async move {
        let ws = accept(&listener).await;
        drop(ws);
        listener
    });

    session.connect().await.expect("connect");
    let listener = timeout(Duration::from_secs(5), server)
        .await
        .expect("first connection dropped")
        .unwrap();

    // Let the session enter its 400 ms backoff sleep, then tear it down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.disconnect();

    let reconnect = timeout(Duration::from_millis(800), listener.accept()).await;
    assert!(
        reconnect.is_err(),
        "a cancelled timer must not re-open a socket"
    );
    assert_eq!(session.state(), SessionState::Closed);
}

// ---------------------------------------------------------------------------
// Test: a newer connect supersedes a stale reconnect timer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_reconnect_timer_cannot_duplicate_a_newer_connection() {
    let (listener, url) = bind().await;
    let directory = fast_directory(url, 300, 5);
    let session = directory.get_or_create(42).await;

    let server = tokio::spawn(async move {
        let ws = accept(&listener).await;
        drop(ws);
        listener
    });

    session.connect().await.expect("connect");
    let listener = timeout(Duration::from_secs(5), server)
        .await
        .expect("first connection dropped")
        .unwrap();

    // While the old generation sleeps toward its 300 ms retry, connect
    // again by hand.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // Report whether anything else dialled in after us.
        let extra =
            timeout(Duration::from_millis(600), listener.accept()).await;
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        extra.is_ok()
    });
    session.connect().await.expect("second connect");
    assert!(session.is_connected());

    session.disconnect();
    let extra_connection = timeout(Duration::from_secs(5), second)
        .await
        .expect("server exits")
        .unwrap();
    assert!(
        !extra_connection,
        "the stale timer must observe the newer generation and stand down"
    );
}
