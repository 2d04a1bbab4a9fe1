//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges the allocation cycle and webhook ingress
//!   need to report on, mirroring the stats surfaced by the HTTP API.

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across the application.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    cycle_duration_ms: IntGauge,
    cycles_completed_total: IntCounter,
    torrents_managed: IntGauge,
    limits_changed_total: IntCounter,
    api_calls_total: IntCounterVec,
    circuit_breaker_open: IntGauge,
    webhook_events_received_total: IntCounterVec,
    webhook_events_processed_total: IntCounterVec,
    webhook_events_dropped_total: IntCounter,
    webhook_queue_depth: IntGauge,
    rollback_entries_pending: IntGauge,
    cross_seed_forwards_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Duration of the most recently completed allocation cycle, in ms.
    pub cycle_duration_ms: i64,
    /// Total number of allocation cycles completed since startup.
    pub cycles_completed_total: u64,
    /// Number of torrents under active management.
    pub torrents_managed: i64,
    /// Total number of upload-limit changes pushed since startup.
    pub limits_changed_total: u64,
    /// Whether the qBittorrent client circuit breaker is currently open.
    pub circuit_breaker_open: bool,
    /// Total webhook events dropped due to a full queue.
    pub webhook_events_dropped_total: u64,
    /// Current webhook ingress queue depth.
    pub webhook_queue_depth: i64,
    /// Unrestored rollback journal entries outstanding.
    pub rollback_entries_pending: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let cycle_duration_ms = IntGauge::with_opts(Opts::new(
            "cycle_duration_ms",
            "Duration of the most recent allocation cycle in milliseconds",
        ))?;
        let cycles_completed_total = IntCounter::with_opts(Opts::new(
            "cycles_completed_total",
            "Total allocation cycles completed",
        ))?;
        let torrents_managed = IntGauge::with_opts(Opts::new(
            "torrents_managed",
            "Torrents currently under active management",
        ))?;
        let limits_changed_total = IntCounter::with_opts(Opts::new(
            "limits_changed_total",
            "Total upload-limit changes pushed to qBittorrent",
        ))?;
        let api_calls_total = IntCounterVec::new(
            Opts::new("qbittorrent_api_calls_total", "qBittorrent API calls by outcome"),
            &["outcome"],
        )?;
        let circuit_breaker_open = IntGauge::with_opts(Opts::new(
            "qbittorrent_circuit_breaker_open",
            "1 when the qBittorrent client circuit breaker is open",
        ))?;
        let webhook_events_received_total = IntCounterVec::new(
            Opts::new(
                "webhook_events_received_total",
                "Webhook events received by kind",
            ),
            &["kind"],
        )?;
        let webhook_events_processed_total = IntCounterVec::new(
            Opts::new(
                "webhook_events_processed_total",
                "Webhook events processed by kind",
            ),
            &["kind"],
        )?;
        let webhook_events_dropped_total = IntCounter::with_opts(Opts::new(
            "webhook_events_dropped_total",
            "Webhook events dropped because the ingress queue was full",
        ))?;
        let webhook_queue_depth = IntGauge::with_opts(Opts::new(
            "webhook_queue_depth",
            "Current depth of the webhook ingress queue",
        ))?;
        let rollback_entries_pending = IntGauge::with_opts(Opts::new(
            "rollback_entries_pending",
            "Unrestored rollback journal entries outstanding",
        ))?;
        let cross_seed_forwards_total = IntCounterVec::new(
            Opts::new(
                "cross_seed_forwards_total",
                "Cross-seed forward attempts by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(cycle_duration_ms.clone()))?;
        registry.register(Box::new(cycles_completed_total.clone()))?;
        registry.register(Box::new(torrents_managed.clone()))?;
        registry.register(Box::new(limits_changed_total.clone()))?;
        registry.register(Box::new(api_calls_total.clone()))?;
        registry.register(Box::new(circuit_breaker_open.clone()))?;
        registry.register(Box::new(webhook_events_received_total.clone()))?;
        registry.register(Box::new(webhook_events_processed_total.clone()))?;
        registry.register(Box::new(webhook_events_dropped_total.clone()))?;
        registry.register(Box::new(webhook_queue_depth.clone()))?;
        registry.register(Box::new(rollback_entries_pending.clone()))?;
        registry.register(Box::new(cross_seed_forwards_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                cycle_duration_ms,
                cycles_completed_total,
                torrents_managed,
                limits_changed_total,
                api_calls_total,
                circuit_breaker_open,
                webhook_events_received_total,
                webhook_events_processed_total,
                webhook_events_dropped_total,
                webhook_queue_depth,
                rollback_entries_pending,
                cross_seed_forwards_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record the duration of a completed allocation cycle.
    pub fn observe_cycle_duration(&self, duration: Duration) {
        self.inner.cycle_duration_ms.set(Self::duration_to_ms(duration));
        self.inner.cycles_completed_total.inc();
    }

    /// Set the number of torrents currently under active management.
    pub fn set_torrents_managed(&self, count: i64) {
        self.inner.torrents_managed.set(count);
    }

    /// Increment the total count of upload-limit changes pushed.
    pub fn inc_limits_changed(&self, count: u64) {
        self.inner.limits_changed_total.inc_by(count);
    }

    /// Record the outcome of a qBittorrent API call.
    pub fn inc_api_call(&self, outcome: &str) {
        self.inner.api_calls_total.with_label_values(&[outcome]).inc();
    }

    /// Set whether the qBittorrent client circuit breaker is open.
    pub fn set_circuit_breaker_open(&self, open: bool) {
        self.inner.circuit_breaker_open.set(i64::from(open));
    }

    /// Increment the received-webhook counter for the given event kind.
    pub fn inc_webhook_received(&self, kind: &str) {
        self.inner
            .webhook_events_received_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Increment the processed-webhook counter for the given event kind.
    pub fn inc_webhook_processed(&self, kind: &str) {
        self.inner
            .webhook_events_processed_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Increment the count of webhook events dropped due to a full queue.
    pub fn inc_webhook_dropped(&self) {
        self.inner.webhook_events_dropped_total.inc();
    }

    /// Set the current webhook ingress queue depth.
    pub fn set_webhook_queue_depth(&self, depth: i64) {
        self.inner.webhook_queue_depth.set(depth);
    }

    /// Set the number of unrestored rollback journal entries outstanding.
    pub fn set_rollback_entries_pending(&self, count: i64) {
        self.inner.rollback_entries_pending.set(count);
    }

    /// Record the outcome of a cross-seed forward attempt.
    pub fn inc_cross_seed_forward(&self, outcome: &str) {
        self.inner
            .cross_seed_forwards_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycle_duration_ms: self.inner.cycle_duration_ms.get(),
            cycles_completed_total: u64::try_from(self.inner.cycles_completed_total.get())
                .unwrap_or(u64::MAX),
            torrents_managed: self.inner.torrents_managed.get(),
            limits_changed_total: u64::try_from(self.inner.limits_changed_total.get())
                .unwrap_or(u64::MAX),
            circuit_breaker_open: self.inner.circuit_breaker_open.get() != 0,
            webhook_events_dropped_total: u64::try_from(
                self.inner.webhook_events_dropped_total.get(),
            )
            .unwrap_or(u64::MAX),
            webhook_queue_depth: self.inner.webhook_queue_depth.get(),
            rollback_entries_pending: self.inner.rollback_entries_pending.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/stats", 200);
        metrics.observe_cycle_duration(Duration::from_millis(250));
        metrics.set_torrents_managed(42);
        metrics.inc_limits_changed(3);
        metrics.inc_api_call("success");
        metrics.set_circuit_breaker_open(true);
        metrics.inc_webhook_received("add");
        metrics.inc_webhook_processed("add");
        metrics.inc_webhook_dropped();
        metrics.set_webhook_queue_depth(5);
        metrics.set_rollback_entries_pending(7);
        metrics.inc_cross_seed_forward("success");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycle_duration_ms, 250);
        assert_eq!(snapshot.cycles_completed_total, 1);
        assert_eq!(snapshot.torrents_managed, 42);
        assert_eq!(snapshot.limits_changed_total, 3);
        assert!(snapshot.circuit_breaker_open);
        assert_eq!(snapshot.webhook_events_dropped_total, 1);
        assert_eq!(snapshot.webhook_queue_depth, 5);
        assert_eq!(snapshot.rollback_entries_pending, 7);

        let rendered = metrics.render()?;
        assert!(rendered.contains("cycle_duration_ms"));
        assert!(rendered.contains("webhook_events_dropped_total"));
        assert!(rendered.contains("cross_seed_forwards_total"));
        Ok(())
    }
}
