//! Event subscribers: the asynchronous side of the streaming bridge.

use crate::errors::DeliveryError;
use async_trait::async_trait;
use futures::future::join_all;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use tribunal_common::EventRecord;

/// Receives records from the bridge's delivery task.
///
/// Deliveries are sequential, so an implementation sees records in the
/// order they were published. A slow `deliver` only delays later records;
/// the bridge cuts it off after its delivery timeout.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSubscriber;

#[async_trait]
impl EventSubscriber for NullSubscriber {
    async fn deliver(&self, _record: &EventRecord) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Re-broadcasts records to any number of late-joining receivers.
///
/// Receivers that join mid-session only see records from that point on.
#[derive(Debug, Clone)]
pub struct BroadcastSubscriber {
    tx: broadcast::Sender<EventRecord>,
}

impl BroadcastSubscriber {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSubscriber for BroadcastSubscriber {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError> {
        self.tx
            .send(record.clone())
            .map(|_| ())
            .map_err(|_| DeliveryError::NoSubscribers)
    }
}

/// Forwards records into a bounded channel owned by the caller.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<EventRecord>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<EventRecord>) -> Self {
        Self { tx }
    }

    /// A subscriber and the receiver it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSubscriber for ChannelSubscriber {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError> {
        self.tx
            .send(record.clone())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesSubscriber<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSubscriber<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl JsonLinesSubscriber<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> EventSubscriber for JsonLinesSubscriber<W> {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(record)?;
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Delivers each record to several subscribers concurrently.
///
/// A failing subscriber is logged and does not affect the others.
#[derive(Default, Clone)]
pub struct FanOutSubscriber {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl FanOutSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[async_trait]
impl EventSubscriber for FanOutSubscriber {
    async fn deliver(&self, record: &EventRecord) -> Result<(), DeliveryError> {
        let results = join_all(self.subscribers.iter().map(|s| s.deliver(record))).await;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(subscriber = index, error = %e, kind = %record.kind, "Subscriber rejected event");
            }
        }
        Ok(())
    }
}
