//! Prometheus counters for the stream managers
//!
//! Registered once in the default registry; `/metrics` gathers them.

use std::sync::OnceLock;

use prometheus::{IntCounterVec, Opts};

/// Per-feed connection and frame counters
pub struct FeedMetrics {
    pub generations: IntCounterVec,
    pub failures: IntCounterVec,
    pub frames: IntCounterVec,
    pub stale_events: IntCounterVec,
}

static FEED_METRICS: OnceLock<FeedMetrics> = OnceLock::new();

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let vec = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("metric definition is constant and valid");
    // A second registration (tests creating several managers) is harmless.
    let _ = prometheus::register(Box::new(vec.clone()));
    vec
}

/// Shared feed metrics
pub fn feed_metrics() -> &'static FeedMetrics {
    FEED_METRICS.get_or_init(|| FeedMetrics {
        generations: counter(
            "max_feed_generations_total",
            "Connection generations started",
            &["feed"],
        ),
        failures: counter(
            "max_feed_failures_total",
            "Connection generations ended by an error",
            &["feed", "kind"],
        ),
        frames: counter(
            "max_feed_frames_total",
            "Frames routed to a feed handler",
            &["feed"],
        ),
        stale_events: counter(
            "max_book_stale_events_total",
            "Book events rejected or flagged by the staleness check",
            &["market"],
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared() {
        feed_metrics().frames.with_label_values(&["unit"]).inc();
        let value = feed_metrics().frames.with_label_values(&["unit"]).get();
        assert!(value >= 1);
    }
}
