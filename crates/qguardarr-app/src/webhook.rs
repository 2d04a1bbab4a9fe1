//! Webhook ingress: a bounded queue fed by the HTTP handler and drained by a
//! single background worker that dispatches to cycle-orchestrator hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use qguardarr_events::{WebhookEvent, WebhookKind};
use qguardarr_telemetry::Metrics;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::cross_seed::CrossSeedForwarder;

/// Queue capacity, per spec: bounded so a stalled worker cannot grow memory
/// without bound, generous enough to absorb a burst of qBittorrent hooks.
pub const QUEUE_CAPACITY: usize = 1_000;

/// Outcome of attempting to enqueue a webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The event was accepted into the queue.
    Accepted,
    /// The queue was full; the event was dropped.
    Dropped,
}

/// Hooks the webhook worker invokes on the cycle orchestrator. Kept as a
/// trait so the worker can be exercised in tests against a recording fake.
pub trait WebhookHooks: Send + Sync {
    /// Queue a torrent for an out-of-band cache refresh on the next cycle.
    fn mark_for_check(&self, hash: &str);
    /// Hint that a tracker's torrents may need a current-limit refresh.
    fn schedule_tracker_update(&self, tracker: &str);
    /// Remove a torrent from the cache and discard any pending check.
    fn handle_delete(&self, hash: &str);
}

/// Queue depth and processing counters shared between [`WebhookIngress`] and
/// the worker loop, for `GET /stats`'s `webhook` block.
#[derive(Default)]
pub(crate) struct WebhookCounters {
    events_received: AtomicU64,
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
    processing_errors: AtomicU64,
    last_event_at: Mutex<Option<Instant>>,
}

impl WebhookCounters {
    fn snapshot(&self, queue_size: usize) -> qguardarr_api_models::WebhookStatsDto {
        let events_processed = self.events_processed.load(Ordering::Relaxed);
        let processing_rate = if events_processed == 0 {
            0.0
        } else {
            let elapsed = self
                .last_event_at
                .lock()
                .expect("webhook counters lock poisoned")
                .map_or(0.0, |at| at.elapsed().as_secs_f64());
            if elapsed <= 0.0 {
                0.0
            } else {
                #[expect(clippy::cast_precision_loss, reason = "event counts fit comfortably in f64")]
                let rate = events_processed as f64 / elapsed;
                rate
            }
        };
        qguardarr_api_models::WebhookStatsDto {
            queue_size,
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed,
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            processing_rate,
        }
    }
}

/// Producer handle cloned into the HTTP layer.
#[derive(Clone)]
pub struct WebhookIngress {
    sender: mpsc::Sender<WebhookEvent>,
    metrics: Arc<Metrics>,
    counters: Arc<WebhookCounters>,
}

impl WebhookIngress {
    /// Enqueue an event. Never blocks: a full queue drops the event rather
    /// than applying backpressure to the HTTP handler.
    pub fn enqueue(&self, event: WebhookEvent) -> EnqueueOutcome {
        let kind = kind_label(event.event);
        self.metrics.inc_webhook_received(kind);
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        *self.counters.last_event_at.lock().expect("webhook counters lock poisoned") = Some(Instant::now());

        let outcome = match self.sender.try_send(event) {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(_) => {
                self.metrics.inc_webhook_dropped();
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Dropped
            }
        };
        #[expect(clippy::cast_possible_wrap, reason = "queue capacity never approaches i64::MAX")]
        let depth = (QUEUE_CAPACITY - self.sender.capacity()) as i64;
        self.metrics.set_webhook_queue_depth(depth);
        outcome
    }

    /// Snapshot of queue depth and processing counters, for `GET /stats`.
    #[must_use]
    pub fn stats(&self) -> qguardarr_api_models::WebhookStatsDto {
        let queue_size = QUEUE_CAPACITY.saturating_sub(self.sender.capacity());
        self.counters.snapshot(queue_size)
    }

    /// Share this ingress's processing counters with the worker loop.
    pub(crate) fn counters_handle(&self) -> Arc<WebhookCounters> {
        Arc::clone(&self.counters)
    }
}

impl qguardarr_api::WebhookSink for WebhookIngress {
    fn enqueue(&self, event: WebhookEvent) -> bool {
        matches!(Self::enqueue(self, event), EnqueueOutcome::Accepted)
    }
}

const fn kind_label(kind: WebhookKind) -> &'static str {
    match kind {
        WebhookKind::Add => "add",
        WebhookKind::Complete => "complete",
        WebhookKind::Delete => "delete",
    }
}

/// Build a bounded webhook channel: a producer [`WebhookIngress`] and the
/// receiving half the worker loop drains.
#[must_use]
pub fn channel(metrics: Arc<Metrics>) -> (WebhookIngress, mpsc::Receiver<WebhookEvent>) {
    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let counters = Arc::new(WebhookCounters::default());
    (WebhookIngress { sender, metrics, counters }, receiver)
}

/// Drain `receiver` until the channel is closed, dispatching each event to
/// `hooks` and forwarding completions through `cross_seed`. Each event's
/// dispatch runs in its own task so a panic in one handler cannot stop the
/// loop or starve the next event.
pub async fn run_worker(
    mut receiver: mpsc::Receiver<WebhookEvent>,
    hooks: Arc<dyn WebhookHooks>,
    cross_seed: Arc<CrossSeedForwarder>,
    metrics: Arc<Metrics>,
    counters: Arc<WebhookCounters>,
) {
    while let Some(event) = receiver.recv().await {
        let kind = kind_label(event.event);
        let hooks = Arc::clone(&hooks);
        let cross_seed = Arc::clone(&cross_seed);
        let outcome = tokio::spawn(async move {
            dispatch(&event, hooks.as_ref(), cross_seed.as_ref()).await;
        })
        .await;

        if let Err(join_err) = outcome {
            error!(kind, panicked = join_err.is_panic(), "webhook event handler failed");
            counters.processing_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.events_processed.fetch_add(1, Ordering::Relaxed);
        }
        metrics.inc_webhook_processed(kind);
    }
}

async fn dispatch(event: &WebhookEvent, hooks: &dyn WebhookHooks, cross_seed: &CrossSeedForwarder) {
    match event.event {
        WebhookKind::Add => {
            hooks.mark_for_check(&event.hash);
            if !event.tracker.is_empty() {
                hooks.schedule_tracker_update(&event.tracker);
            }
        }
        WebhookKind::Complete => {
            if !cross_seed.forward(event).await {
                warn!(hash = %event.hash, "cross-seed forward exhausted retries");
            }
            hooks.mark_for_check(&event.hash);
        }
        WebhookKind::Delete => {
            hooks.handle_delete(&event.hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qguardarr_config::CrossSeedSettings;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        checked: Mutex<Vec<String>>,
        tracker_updates: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl WebhookHooks for RecordingHooks {
        fn mark_for_check(&self, hash: &str) {
            self.checked.lock().expect("mutex poisoned").push(hash.to_string());
        }
        fn schedule_tracker_update(&self, tracker: &str) {
            self.tracker_updates
                .lock()
                .expect("mutex poisoned")
                .push(tracker.to_string());
        }
        fn handle_delete(&self, hash: &str) {
            self.deleted.lock().expect("mutex poisoned").push(hash.to_string());
        }
    }

    fn event(kind: WebhookKind, hash: &str, tracker: &str) -> WebhookEvent {
        WebhookEvent {
            event: kind,
            hash: hash.to_string(),
            name: String::new(),
            tracker: tracker.to_string(),
            category: String::new(),
            tags: String::new(),
            save_path: String::new(),
        }
    }

    #[tokio::test]
    async fn add_event_marks_for_check_and_schedules_tracker_update() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let (ingress, receiver) = channel(Arc::clone(&metrics));
        let hooks = Arc::new(RecordingHooks::default());
        let cross_seed =
            Arc::new(CrossSeedForwarder::new(CrossSeedSettings::default(), Arc::clone(&metrics)).expect("build"));

        assert_eq!(
            ingress.enqueue(event(WebhookKind::Add, "h1", "https://tracker.example/announce")),
            EnqueueOutcome::Accepted
        );
        let counters = ingress.counters_handle();
        drop(ingress);

        run_worker(receiver, Arc::clone(&hooks) as Arc<dyn WebhookHooks>, cross_seed, metrics, counters).await;

        assert_eq!(hooks.checked.lock().expect("mutex poisoned").as_slice(), ["h1".to_string()]);
        assert_eq!(
            hooks.tracker_updates.lock().expect("mutex poisoned").as_slice(),
            ["https://tracker.example/announce".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_event_invokes_handle_delete() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let (ingress, receiver) = channel(Arc::clone(&metrics));
        let hooks = Arc::new(RecordingHooks::default());
        let cross_seed =
            Arc::new(CrossSeedForwarder::new(CrossSeedSettings::default(), Arc::clone(&metrics)).expect("build"));

        ingress.enqueue(event(WebhookKind::Delete, "h2", ""));
        let counters = ingress.counters_handle();
        drop(ingress);

        run_worker(receiver, Arc::clone(&hooks) as Arc<dyn WebhookHooks>, cross_seed, metrics, counters).await;
        assert_eq!(hooks.deleted.lock().expect("mutex poisoned").as_slice(), ["h2".to_string()]);
    }

    #[tokio::test]
    async fn full_queue_drops_and_still_reports_accepted_elsewhere() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let (sender, _receiver) = mpsc::channel(1);
        let ingress = WebhookIngress { sender, metrics, counters: Arc::new(WebhookCounters::default()) };
        assert_eq!(
            ingress.enqueue(event(WebhookKind::Add, "h1", "")),
            EnqueueOutcome::Accepted
        );
        assert_eq!(
            ingress.enqueue(event(WebhookKind::Add, "h2", "")),
            EnqueueOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn stats_reports_received_and_processed_counts() {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let (ingress, receiver) = channel(Arc::clone(&metrics));
        let hooks = Arc::new(RecordingHooks::default());
        let cross_seed =
            Arc::new(CrossSeedForwarder::new(CrossSeedSettings::default(), Arc::clone(&metrics)).expect("build"));

        ingress.enqueue(event(WebhookKind::Add, "h1", ""));
        ingress.enqueue(event(WebhookKind::Delete, "h2", ""));
        assert_eq!(ingress.stats().events_received, 2);

        let counters = ingress.counters_handle();
        drop(ingress);
        run_worker(receiver, hooks as Arc<dyn WebhookHooks>, cross_seed, metrics, Arc::clone(&counters)).await;

        let stats = counters.snapshot(0);
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.processing_errors, 0);
    }
}
