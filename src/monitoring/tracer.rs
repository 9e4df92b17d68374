/*!
 * Structured Tracing
 * Subscriber setup and spans for transformation passes
 *
 * Features:
 * - Env-filtered output (RUST_LOG, default info)
 * - JSON-formatted logs for structured parsing
 * - Pass spans with sequence numbers and embedded durations
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Passes slower than this are reported at warn level
const SLOW_PASS_MS: u128 = 1_000;

static PASS_SEQ: AtomicU64 = AtomicU64::new(1);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - VIC_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("VIC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one transformation pass, from prepare to commit or rollback
pub struct PassSpan {
    span: tracing::Span,
    start: Instant,
    seq: u64,
}

impl PassSpan {
    pub fn new(direction: &str, pid: i32) -> Self {
        let seq = PASS_SEQ.fetch_add(1, Ordering::Relaxed);

        let span = span!(
            Level::INFO,
            "transform_pass",
            seq = seq,
            direction = direction,
            pid = pid,
            affected = tracing::field::Empty,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        {
            let _entered = span.enter();
            debug!(seq, direction, pid, "pass started");
        }

        Self {
            span,
            start: Instant::now(),
            seq,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn record_affected(&self, count: usize) {
        self.span.record("affected", count);
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.span.record("outcome", outcome);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PassSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_ms", duration.as_millis());

        if duration.as_millis() > SLOW_PASS_MS {
            warn!(
                seq = self.seq,
                duration_ms = duration.as_millis(),
                slow = true,
                "slow transformation pass"
            );
        } else {
            debug!(seq = self.seq, duration_ms = duration.as_millis(), "pass completed");
        }
    }
}

/// Helper to create a pass span
#[inline]
pub fn span_pass(direction: &str, pid: i32) -> PassSpan {
    PassSpan::new(direction, pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_pass_sequence_increases() {
        let a = span_pass("split", 1);
        let b = span_pass("merge", 1);
        assert!(b.seq() > a.seq());
        a.record_affected(2);
        a.record_outcome("committed");
    }
}
