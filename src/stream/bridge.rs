//! The streaming bridge between the blocking scheduler and async subscribers.
//!
//! Publishers push into one bounded queue with `try_send`, so `publish`
//! never waits on a subscriber and works the same from a plain thread or
//! from inside a runtime. A dedicated thread runs a current-thread tokio
//! runtime that drains the queue in FIFO order and hands each record to the
//! subscriber under a timeout. Anything that cannot be queued or delivered
//! is counted, logged and dropped.

use super::subscriber::EventSubscriber;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tribunal_common::EventRecord;

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Bridge settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub queue_capacity: usize,
    pub delivery_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Counters reported when the bridge closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Records accepted into the queue.
    pub published: u64,
    pub delivered: u64,
    /// Records rejected because the queue was full or closed.
    pub dropped: u64,
    /// Records the subscriber refused or did not take in time.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Cheap, cloneable handle for pushing records into the bridge.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<EventRecord>,
    counters: Arc<Counters>,
}

impl EventPublisher {
    /// Queue a record for delivery. Never blocks and never fails the caller.
    ///
    /// Returns whether the record was queued.
    pub fn publish(&self, record: EventRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session = %record.session_id, kind = %record.kind, "Event queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(record)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(session = %record.session_id, kind = %record.kind, "Event bridge closed, dropping event");
                false
            }
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }
}

/// Owns the delivery thread.
pub struct StreamBridge {
    publisher: EventPublisher,
    shutdown: CancellationToken,
    finished: Mutex<std_mpsc::Receiver<()>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamBridge {
    /// Start the delivery thread for `subscriber`.
    pub fn spawn(
        subscriber: Arc<dyn EventSubscriber>,
        config: BridgeConfig,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();
        let (finished_tx, finished_rx) = std_mpsc::channel();

        let thread = {
            let counters = Arc::clone(&counters);
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("tribunal-delivery".to_string())
                .spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(drain(
                            rx,
                            subscriber,
                            counters,
                            config.delivery_timeout,
                            shutdown,
                        )),
                        Err(e) => error!(error = %e, "Failed to start event delivery runtime"),
                    }
                    let _ = finished_tx.send(());
                })?
        };

        Ok(Self {
            publisher: EventPublisher { tx, counters },
            shutdown,
            finished: Mutex::new(finished_rx),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// A handle for publishing from any thread.
    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    /// See [`EventPublisher::publish`].
    pub fn publish(&self, record: EventRecord) -> bool {
        self.publisher.publish(record)
    }

    pub fn stats(&self) -> BridgeStats {
        self.publisher.stats()
    }

    /// Stop accepting records and wait up to `timeout` for the queue to drain.
    ///
    /// If delivery is still running when the timeout expires the thread is
    /// left to finish on its own.
    pub fn close(&self, timeout: Duration) -> BridgeStats {
        self.shutdown.cancel();

        let drained = match self.finished.lock() {
            Ok(finished) => finished.recv_timeout(timeout).is_ok(),
            Err(_) => false,
        };

        if drained {
            let handle = self.thread.lock().ok().and_then(|mut t| t.take());
            if let Some(handle) = handle
                && handle.join().is_err()
            {
                error!("Event delivery thread panicked");
            }
        } else {
            warn!(?timeout, "Event queue did not drain before close timeout");
        }

        self.stats()
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn drain(
    mut rx: mpsc::Receiver<EventRecord>,
    subscriber: Arc<dyn EventSubscriber>,
    counters: Arc<Counters>,
    delivery_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut closing = false;
    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled(), if !closing => {
                // Refuse new records but keep what is already queued.
                rx.close();
                closing = true;
                continue;
            }
            record = rx.recv() => record,
        };
        let Some(record) = record else {
            break;
        };

        match tokio::time::timeout(delivery_timeout, subscriber.deliver(&record)).await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %record.session_id, kind = %record.kind, error = %e, "Event delivery failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(session = %record.session_id, kind = %record.kind, "Event delivery timed out");
            }
        }
    }
    debug!("Event delivery loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DeliveryError;
    use crate::stream::{ChannelSubscriber, NullSubscriber};
    use async_trait::async_trait;
    use std::time::Instant;
    use tribunal_common::{EventKind, Phase, SessionId, WorkerRole};

    struct StuckSubscriber;

    #[async_trait]
    impl EventSubscriber for StuckSubscriber {
        async fn deliver(&self, _record: &EventRecord) -> Result<(), DeliveryError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn record(session: SessionId, n: usize) -> EventRecord {
        EventRecord::new(session, EventKind::ToolCall, serde_json::json!({ "n": n }))
            .with_phase(Phase::Independent)
            .with_role(WorkerRole::News)
    }

    #[test]
    fn test_publish_never_blocks_on_stuck_subscriber() {
        let bridge = StreamBridge::spawn(
            Arc::new(StuckSubscriber),
            BridgeConfig {
                queue_capacity: 64,
                delivery_timeout: Duration::from_millis(50),
            },
        )
        .unwrap();
        let session = SessionId::new();

        let start = Instant::now();
        for n in 0..10_000 {
            bridge.publish(record(session, n));
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        let stats = bridge.stats();
        assert_eq!(stats.published + stats.dropped, 10_000);
        assert!(stats.dropped > 0);
        bridge.close(Duration::from_millis(10));
    }

    #[test]
    fn test_delivery_preserves_publish_order() {
        let (subscriber, mut rx) = ChannelSubscriber::channel(256);
        let bridge = StreamBridge::spawn(Arc::new(subscriber), BridgeConfig::default()).unwrap();
        let session = SessionId::new();
        for n in 0..100 {
            assert!(bridge.publish(record(session, n)));
        }
        let stats = bridge.close(Duration::from_secs(5));
        assert_eq!(stats.delivered, 100);

        let mut seen = Vec::new();
        while let Ok(record) = rx.try_recv() {
            seen.push(record.payload["n"].as_u64().unwrap());
        }
        assert_eq!(seen, (0..100).collect::<Vec<u64>>());
    }

    #[test]
    fn test_publish_after_close_is_dropped() {
        let bridge = StreamBridge::spawn(Arc::new(NullSubscriber), BridgeConfig::default()).unwrap();
        bridge.close(Duration::from_secs(5));
        assert!(!bridge.publish(record(SessionId::new(), 0)));
        assert_eq!(bridge.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_publish_from_inside_a_runtime() {
        let bridge = StreamBridge::spawn(Arc::new(NullSubscriber), BridgeConfig::default()).unwrap();
        let publisher = bridge.publisher();
        assert!(publisher.publish(record(SessionId::new(), 1)));
        let stats = tokio::task::spawn_blocking(move || bridge.close(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(stats.published, 1);
    }
}
