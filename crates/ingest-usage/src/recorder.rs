use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::RecorderConfig;
use crate::store::UsageStore;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    requests: u64,
    errors: u64,
}

/// Aggregate outcome of one flush cycle (periodic, overflow-triggered, or the
/// final flush inside `close`). Exposed for logging and tests; callers don't
/// otherwise need it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed_keys: usize,
    pub failed_keys: usize,
    pub flushed_requests: u64,
    pub flushed_errors: u64,
}

/// Concurrent in-memory per-API-key request/error counter (component H).
///
/// `record_request` is the only hot-path entry point: it never awaits and
/// never touches the store. A background ticker and, on overflow, ad-hoc
/// tasks spawned from `record_request` itself do the actual I/O against
/// `S`. `close` is the sole termination signal; it is idempotent and waits
/// for every outstanding flush before returning.
pub struct UsageRecorder<S: UsageStore + 'static> {
    live: Mutex<HashMap<String, Counters>>,
    store: Arc<S>,
    config: RecorderConfig,
    closed: AtomicBool,
    outstanding: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: UsageStore + 'static> UsageRecorder<S> {
    /// Builds the recorder and spawns its background flush ticker. Must be
    /// called from within a running Tokio runtime.
    pub fn start(store: S, config: RecorderConfig) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        let recorder = Arc::new(UsageRecorder {
            live: Mutex::new(HashMap::new()),
            store: Arc::new(store),
            config,
            closed: AtomicBool::new(false),
            outstanding: Mutex::new(Vec::new()),
            shutdown: Mutex::new(Some(tx)),
            ticker: Mutex::new(None),
        });
        let ticker_recorder = recorder.clone();
        let handle = tokio::spawn(async move { ticker_recorder.run_ticker(rx).await });
        *recorder.ticker.lock().expect("usage recorder mutex poisoned") = Some(handle);
        recorder
    }

    async fn run_ticker(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so the real cadence
        // starts a full interval after `start`.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = self.take_snapshot();
                    if !snapshot.is_empty() {
                        Self::flush_snapshot(&self.store, snapshot, self.config.flush_deadline).await;
                    }
                }
                _ = &mut shutdown_rx => {
                    return;
                }
            }
        }
    }

    fn take_snapshot(&self) -> HashMap<String, Counters> {
        let mut guard = self.live.lock().expect("usage recorder mutex poisoned");
        std::mem::take(&mut *guard)
    }

    /// Records one request for `key_id`, bumping the error counter too when
    /// `is_error`. Never blocks on I/O: the critical section is a map lookup,
    /// a counter bump, and (rarely) a pointer swap.
    pub fn record_request(&self, key_id: &str, is_error: bool) {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(key_id, "record_request called after close; counters dropped");
            return;
        }
        let overflowed = {
            let mut guard = self.live.lock().expect("usage recorder mutex poisoned");
            let counters = guard.entry(key_id.to_string()).or_default();
            counters.requests += 1;
            if is_error {
                counters.errors += 1;
            }
            if guard.len() >= self.config.max_buffer_size {
                Some(std::mem::take(&mut *guard))
            } else {
                None
            }
        };
        if let Some(snapshot) = overflowed {
            self.spawn_overflow_flush(snapshot);
        }
    }

    fn spawn_overflow_flush(&self, snapshot: HashMap<String, Counters>) {
        let store = self.store.clone();
        let deadline = self.config.flush_deadline;
        let handle = tokio::spawn(async move {
            Self::flush_snapshot(&store, snapshot, deadline).await;
        });
        self.outstanding
            .lock()
            .expect("usage recorder mutex poisoned")
            .push(handle);
        // Outstanding handles only accumulate; reap finished ones so the
        // vector doesn't grow without bound across a long-lived recorder.
        self.outstanding
            .lock()
            .expect("usage recorder mutex poisoned")
            .retain(|h| !h.is_finished());
    }

    async fn flush_snapshot(
        store: &Arc<S>,
        snapshot: HashMap<String, Counters>,
        deadline: Duration,
    ) -> FlushReport {
        let today = Utc::now().date_naive();
        let total_keys = snapshot.len();
        let mut report = FlushReport::default();
        let started = tokio::time::Instant::now();
        let mut iter = snapshot.into_iter();
        for (key_id, counters) in &mut iter {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                break;
            }
            let remaining = deadline - elapsed;
            match tokio::time::timeout(
                remaining,
                store.record_usage(&key_id, today, counters.requests, counters.errors),
            )
            .await
            {
                Ok(Ok(())) => {
                    report.flushed_keys += 1;
                    report.flushed_requests += counters.requests;
                    report.flushed_errors += counters.errors;
                }
                Ok(Err(err)) => {
                    tracing::warn!(key_id = %key_id, error = %err, "usage flush upsert failed");
                    report.failed_keys += 1;
                }
                Err(_) => {
                    tracing::warn!(key_id = %key_id, "usage flush upsert timed out");
                    report.failed_keys += 1;
                }
            }
        }
        let skipped = iter.count();
        if skipped > 0 {
            tracing::warn!(
                skipped,
                total_keys,
                "usage flush deadline exceeded before all keys were attempted"
            );
            report.failed_keys += skipped;
        }
        report
    }

    /// Idempotent shutdown: stops the ticker, performs one last synchronous
    /// flush of whatever is still live, and waits for every flush spawned by
    /// an overflow trigger to finish. Safe to call more than once; the
    /// second and later calls are a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.shutdown.lock().expect("usage recorder mutex poisoned").take() {
            let _ = tx.send(());
        }
        if let Some(ticker) = self.ticker.lock().expect("usage recorder mutex poisoned").take() {
            let _ = ticker.await;
        }
        let snapshot = self.take_snapshot();
        if !snapshot.is_empty() {
            Self::flush_snapshot(&self.store, snapshot, self.config.flush_deadline).await;
        }
        let outstanding = std::mem::take(
            &mut *self.outstanding.lock().expect("usage recorder mutex poisoned"),
        );
        for handle in outstanding {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::UsageError;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordedUsage {
        requests: u64,
        errors: u64,
    }

    #[derive(Default)]
    struct MockStore {
        recorded: Mutex<HashMap<String, RecordedUsage>>,
        fail_once_for: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl UsageStore for MockStore {
        async fn record_usage(
            &self,
            key_id: &str,
            _date: NaiveDate,
            requests: u64,
            errors: u64,
        ) -> Result<(), UsageError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut fail_once = self.fail_once_for.lock().unwrap();
            if fail_once.as_deref() == Some(key_id) {
                *fail_once = None;
                return Err(anyhow::anyhow!("transient failure").into());
            }
            let mut recorded = self.recorded.lock().unwrap();
            let entry = recorded.entry(key_id.to_string()).or_default();
            entry.requests += requests;
            entry.errors += errors;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn record_request_never_awaits_and_is_commutative() {
        let store = MockStore::default();
        let recorder = UsageRecorder::start(store, RecorderConfig::default());
        for _ in 0..5 {
            recorder.record_request("key-a", false);
        }
        recorder.record_request("key-a", true);
        recorder.close().await;
        let recorded = recorder.store.recorded.lock().unwrap();
        let entry = recorded.get("key-a").unwrap();
        assert_eq!(entry.requests, 6);
        assert_eq!(entry.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_triggers_an_immediate_flush_without_blocking() {
        let store = MockStore::default();
        let config = RecorderConfig {
            max_buffer_size: 3,
            ..RecorderConfig::default()
        };
        let recorder = UsageRecorder::start(store, config);
        recorder.record_request("a", false);
        recorder.record_request("b", false);
        // The third distinct key reaches max_buffer_size and triggers a swap.
        recorder.record_request("c", false);
        // Give the spawned flush task a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        recorder.close().await;
        let recorded = recorder.store.recorded.lock().unwrap();
        assert_eq!(recorded.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_flushes_exactly_once() {
        let store = MockStore::default();
        let recorder = UsageRecorder::start(store, RecorderConfig::default());
        recorder.record_request("key-a", false);
        recorder.close().await;
        recorder.close().await;
        let recorded = recorder.store.recorded.lock().unwrap();
        assert_eq!(recorded.get("key-a").unwrap().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_key_upsert_failure_is_logged_and_does_not_stop_the_rest() {
        let store = MockStore::default();
        *store.fail_once_for.lock().unwrap() = Some("flaky".to_string());
        let recorder = UsageRecorder::start(store, RecorderConfig::default());
        recorder.record_request("flaky", false);
        recorder.record_request("steady", false);
        recorder.close().await;
        let recorded = recorder.store.recorded.lock().unwrap();
        assert!(recorded.get("flaky").is_none());
        assert_eq!(recorded.get("steady").unwrap().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_ticker_flushes_without_a_close() {
        let store = MockStore::default();
        let config = RecorderConfig {
            flush_interval: Duration::from_millis(10),
            ..RecorderConfig::default()
        };
        let recorder = UsageRecorder::start(store, config);
        recorder.record_request("key-a", false);
        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
        let recorded_before_close = recorder.store.recorded.lock().unwrap().len();
        recorder.close().await;
        assert_eq!(recorded_before_close, 1);
    }
}
