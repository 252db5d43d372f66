//! Reconnect loop against a local websocket server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use max_market_data::{ErrorFlag, FeedHandler, MarketDataError, ReconnectingStream, Result, StreamSettings};

const SUBSCRIBE: &str = r#"{"action":"sub","id":"test"}"#;

/// Records routed frames and whether the error flag was raised at the time
struct RecordingFeed {
    flag: ErrorFlag,
    routed: Arc<Mutex<Vec<(String, bool)>>>,
}

#[async_trait]
impl FeedHandler for RecordingFeed {
    fn name(&self) -> &str {
        "recording"
    }

    fn subscribe_frame(&self) -> Result<String> {
        Ok(SUBSCRIBE.to_string())
    }

    async fn route(&self, raw: &str) -> Result<()> {
        self.routed
            .lock()
            .unwrap()
            .push((raw.to_string(), self.flag.is_set()));
        if raw == "ok" {
            Ok(())
        } else {
            Err(MarketDataError::Decode(raw.to_string()))
        }
    }
}

fn settings(endpoint: String, read_timeout: Duration) -> StreamSettings {
    StreamSettings {
        endpoint,
        dial_timeout: Duration::from_secs(1),
        read_timeout,
        heartbeat_interval: Duration::from_secs(10),
        retry_backoff: Duration::from_millis(50),
        jitter_min: Duration::from_millis(5),
        jitter_max: Duration::from_millis(20),
    }
}

/// Accepts connections; the n-th one gets `replies[n]` (if any) after its
/// first inbound frame, which is forwarded on `first_frames`.
async fn serve(replies: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let reply = replies.get(index).copied();
            index += 1;
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                if let Some(Ok(Message::Text(first))) = ws.next().await {
                    let _ = tx.send(first);
                }
                if let Some(reply) = reply {
                    let _ = ws.send(Message::Text(reply.to_string())).await;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (format!("ws://{}", addr), rx)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_bad_frame_triggers_fresh_generation() {
    let (endpoint, mut first_frames) = serve(vec!["not json", "ok"]).await;

    let flag = ErrorFlag::new();
    let routed = Arc::new(Mutex::new(Vec::new()));
    let feed = RecordingFeed {
        flag: flag.clone(),
        routed: routed.clone(),
    };

    let root = CancellationToken::new();
    let handle = ReconnectingStream::new(settings(endpoint, Duration::from_secs(5)), feed)
        .with_error_flag(flag)
        .spawn(&root)
        .unwrap();

    wait_until(|| routed.lock().unwrap().iter().any(|(raw, _)| raw == "ok")).await;

    // Every connection saw the subscribe frame first
    assert_eq!(first_frames.recv().await.unwrap(), SUBSCRIBE);
    assert_eq!(first_frames.recv().await.unwrap(), SUBSCRIBE);

    let stats = handle.stats();
    assert_eq!(stats.generations(), 2);
    assert!(!handle.error_flag().is_set());

    handle.stop().await;
    assert_eq!(stats.closes(), 2);

    let routed = routed.lock().unwrap().clone();
    assert_eq!(
        routed,
        vec![("not json".to_string(), false), ("ok".to_string(), false)]
    );
}

#[tokio::test]
async fn test_silent_connection_times_out_and_reconnects() {
    let (endpoint, _first_frames) = serve(Vec::new()).await;

    let root = CancellationToken::new();
    let feed = RecordingFeed {
        flag: ErrorFlag::new(),
        routed: Arc::new(Mutex::new(Vec::new())),
    };
    let handle = ReconnectingStream::new(settings(endpoint, Duration::from_millis(100)), feed)
        .spawn(&root)
        .unwrap();

    let stats = handle.stats();
    wait_until(|| stats.generations() >= 3).await;

    root.cancel();
    handle.stop().await;
    // A generation cancelled mid-dial never gets a connection to close
    assert!(stats.generations() - stats.closes() <= 1);
    assert!(stats.closes() >= 2);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_retrying_until_stopped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let root = CancellationToken::new();
    let feed = RecordingFeed {
        flag: ErrorFlag::new(),
        routed: Arc::new(Mutex::new(Vec::new())),
    };
    let handle = ReconnectingStream::new(settings(endpoint, Duration::from_secs(1)), feed)
        .spawn(&root)
        .unwrap();

    let stats = handle.stats();
    wait_until(|| stats.generations() >= 2).await;

    handle.stop().await;
    assert_eq!(stats.closes(), 0);
}
