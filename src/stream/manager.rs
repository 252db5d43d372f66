//! Reconnecting stream manager
//!
//! One generic connection loop shared by every feed: dial, subscribe,
//! heartbeat, read, tear down, and relaunch after a short delay. A feed only
//! supplies a [`FeedHandler`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{self, WebSocketClient, WsWriter};
use crate::config::{Config, FeedTimings};
use crate::error::{MarketDataError, Result};
use crate::metrics::feed_metrics;

/// Per-feed behaviour plugged into [`ReconnectingStream`]
#[async_trait]
pub trait FeedHandler: Send + Sync + 'static {
    /// Feed identity used in logs and metrics
    fn name(&self) -> &str;

    /// Subscribe or auth frame, rebuilt for every generation
    fn subscribe_frame(&self) -> Result<String>;

    /// Apply one inbound frame. Any error ends the generation.
    async fn route(&self, raw: &str) -> Result<()>;

    /// Called after teardown of a generation that got past the dial
    async fn on_disconnect(&self) {}

    /// Called once when the stream is stopped
    async fn on_shutdown(&self) {}
}

#[async_trait]
impl<T: FeedHandler + ?Sized> FeedHandler for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn subscribe_frame(&self) -> Result<String> {
        (**self).subscribe_frame()
    }

    async fn route(&self, raw: &str) -> Result<()> {
        (**self).route(raw).await
    }

    async fn on_disconnect(&self) {
        (**self).on_disconnect().await
    }

    async fn on_shutdown(&self) {
        (**self).on_shutdown().await
    }
}

/// Per-connection error flag.
///
/// Cleared at the start of every generation; once set, no further frame of
/// that generation is routed.
#[derive(Debug, Clone, Default)]
pub struct ErrorFlag(Arc<AtomicBool>);

impl ErrorFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connection settings for one stream
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub endpoint: String,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Delay after a failed dial
    pub retry_backoff: Duration,
    /// Delay range after any other failure
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &Config, timings: FeedTimings) -> Self {
        Self {
            endpoint: config.ws_endpoint.clone(),
            dial_timeout: config.dial_timeout,
            read_timeout: timings.read_timeout,
            heartbeat_interval: timings.heartbeat_interval,
            retry_backoff: config.retry_backoff,
            jitter_min: config.reconnect_jitter_min,
            jitter_max: config.reconnect_jitter_max,
        }
    }

    fn reconnect_delay(&self, err: &MarketDataError) -> Duration {
        if err.is_dial() {
            return self.retry_backoff;
        }
        let lo = self.jitter_min.as_millis() as u64;
        let hi = (self.jitter_max.as_millis() as u64).max(lo);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Counters for one stream, shared with its handle
#[derive(Debug, Default)]
pub struct StreamStats {
    generations: AtomicU64,
    closes: AtomicU64,
    frames: AtomicU64,
}

impl StreamStats {
    /// Generations started (including failed dials)
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Sockets actually closed
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Frames routed to the handler
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

/// How a generation ended
enum GenerationEnd {
    Cancelled,
    Failed {
        error: MarketDataError,
        connected: bool,
    },
}

/// Self-healing stream driving one [`FeedHandler`]
pub struct ReconnectingStream<H: FeedHandler> {
    settings: StreamSettings,
    handler: H,
    flag: ErrorFlag,
    stats: Arc<StreamStats>,
}

impl<H: FeedHandler> ReconnectingStream<H> {
    pub fn new(settings: StreamSettings, handler: H) -> Self {
        Self {
            settings,
            handler,
            flag: ErrorFlag::new(),
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Use an externally owned error flag
    pub fn with_error_flag(mut self, flag: ErrorFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn error_flag(&self) -> ErrorFlag {
        self.flag.clone()
    }

    /// Run on a background task until `parent` (or the handle) is cancelled.
    ///
    /// The subscribe frame is built once up front so a frame that can never
    /// be encoded fails here instead of looping forever.
    pub fn spawn(self, parent: &CancellationToken) -> Result<StreamHandle> {
        self.handler.subscribe_frame()?;

        let cancel = parent.child_token();
        let name = self.handler.name().to_string();
        let flag = self.flag.clone();
        let stats = self.stats.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(task_cancel).await });

        Ok(StreamHandle {
            name,
            flag,
            stats,
            cancel,
            join,
        })
    }

    /// Run the connection loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.handler.name().to_string();
        info!(feed = %name, endpoint = %self.settings.endpoint, "Starting stream");

        while !cancel.is_cancelled() {
            let (error, connected) = match self.run_generation(&cancel).await {
                GenerationEnd::Cancelled => break,
                GenerationEnd::Failed { error, connected } => (error, connected),
            };

            feed_metrics()
                .failures
                .with_label_values(&[name.as_str(), error.kind()])
                .inc();

            if connected {
                self.handler.on_disconnect().await;
            }

            let delay = self.settings.reconnect_delay(&error);
            warn!(
                feed = %name,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Stream generation ended, reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.handler.on_shutdown().await;
        info!(feed = %name, "Stream stopped");
    }

    async fn run_generation(&self, cancel: &CancellationToken) -> GenerationEnd {
        self.flag.clear();
        self.stats.generations.fetch_add(1, Ordering::SeqCst);
        feed_metrics()
            .generations
            .with_label_values(&[self.handler.name()])
            .inc();

        let mut client = WebSocketClient::new(&self.settings.endpoint);
        let dialed = tokio::select! {
            _ = cancel.cancelled() => return GenerationEnd::Cancelled,
            dialed = client.connect(self.settings.dial_timeout) => dialed,
        };
        if let Err(error) = dialed {
            self.flag.set();
            return GenerationEnd::Failed {
                error,
                connected: false,
            };
        }

        let heartbeat_cancel = cancel.child_token();
        let end = match self.subscribe(&client).await {
            Ok(()) => {
                let heartbeat = client.writer().map(|writer| {
                    spawn_heartbeat(
                        writer,
                        self.settings.heartbeat_interval,
                        self.flag.clone(),
                        heartbeat_cancel.clone(),
                        self.handler.name().to_string(),
                    )
                });

                let end = self.read_loop(&mut client, cancel).await;

                heartbeat_cancel.cancel();
                if let Some(heartbeat) = heartbeat {
                    let _ = heartbeat.await;
                }
                end
            }
            Err(error) => GenerationEnd::Failed {
                error,
                connected: true,
            },
        };

        if client.close().await {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        if matches!(end, GenerationEnd::Failed { .. }) {
            self.flag.set();
        }
        end
    }

    async fn subscribe(&self, client: &WebSocketClient) -> Result<()> {
        let frame = self.handler.subscribe_frame()?;
        client
            .send_text(frame)
            .await
            .map_err(|e| MarketDataError::Subscribe(e.to_string()))
    }

    async fn read_loop(&self, client: &mut WebSocketClient, cancel: &CancellationToken) -> GenerationEnd {
        let name = self.handler.name();
        let read_timeout = self.settings.read_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GenerationEnd::Cancelled,
                next = timeout(read_timeout, client.recv()) => next,
            };

            let text = match next {
                Ok(Ok(Some(text))) => text,
                Ok(Ok(None)) => continue,
                Ok(Err(error)) => return failed(error),
                Err(_) => return failed(MarketDataError::ReadTimeout(read_timeout.as_millis() as u64)),
            };

            if self.flag.is_set() {
                return failed(MarketDataError::ConnectionClosed("error flag raised".to_string()));
            }

            self.stats.frames.fetch_add(1, Ordering::SeqCst);
            feed_metrics().frames.with_label_values(&[name]).inc();

            if let Err(error) = self.handler.route(&text).await {
                error!(feed = %name, error = %error, "Failed to route frame");
                return failed(error);
            }

            if self.flag.is_set() {
                return failed(MarketDataError::ConnectionClosed("error flag raised".to_string()));
            }
        }
    }
}

fn failed(error: MarketDataError) -> GenerationEnd {
    GenerationEnd::Failed {
        error,
        connected: true,
    }
}

/// Floor for the ping period so a zero setting cannot flood the socket
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

fn heartbeat_period(interval: Duration) -> Duration {
    interval.max(MIN_HEARTBEAT_INTERVAL)
}

fn spawn_heartbeat(
    writer: WsWriter,
    interval: Duration,
    flag: ErrorFlag,
    cancel: CancellationToken,
    name: String,
) -> JoinHandle<()> {
    let interval = heartbeat_period(interval);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
            if flag.is_set() {
                break;
            }
            if let Err(e) = client::ping(&writer).await {
                warn!(feed = %name, error = %e, "Failed to send heartbeat ping");
                break;
            }
            debug!(feed = %name, "Heartbeat ping sent");
        }
    })
}

/// Handle to a spawned stream
pub struct StreamHandle {
    name: String,
    flag: ErrorFlag,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_flag(&self) -> ErrorFlag {
        self.flag.clone()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the stream and wait for it to finish its teardown
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(feed = %self.name, error = %e, "Stream task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamSettings {
        StreamSettings {
            endpoint: "ws://127.0.0.1:1".to_string(),
            dial_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(1000),
            jitter_min: Duration::from_millis(200),
            jitter_max: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_error_flag_shared_between_clones() {
        let flag = ErrorFlag::new();
        let other = flag.clone();
        other.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!other.is_set());
    }

    #[test]
    fn test_dial_failure_uses_fixed_backoff() {
        let err = MarketDataError::Dial {
            endpoint: "ws://x".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(settings().reconnect_delay(&err), Duration::from_millis(1000));
    }

    #[test]
    fn test_other_failures_use_jitter_window() {
        let s = settings();
        for _ in 0..50 {
            let delay = s.reconnect_delay(&MarketDataError::ReadTimeout(1000));
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_zero_heartbeat_interval_is_floored() {
        assert_eq!(heartbeat_period(Duration::ZERO), MIN_HEARTBEAT_INTERVAL);
        assert_eq!(heartbeat_period(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[test]
    fn test_inverted_jitter_window_does_not_panic() {
        let mut s = settings();
        s.jitter_min = Duration::from_millis(400);
        s.jitter_max = Duration::from_millis(100);
        assert_eq!(
            s.reconnect_delay(&MarketDataError::ReadTimeout(1)),
            Duration::from_millis(400)
        );
    }
}
