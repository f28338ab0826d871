//! In-memory sinks for exercising the registry, notifier and sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::registry::{DeliveryError, EventSink};

/// Accepts every write and keeps the payloads.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        self.received.lock().unwrap().push(payload.to_owned());
        Ok(())
    }
}

/// Rejects every write, counting the attempts.
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for FailingSink {
    async fn send_text(&self, _payload: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError("broken pipe".into()))
    }
}

/// Never finishes a write. `started` fires once the first write is underway.
#[derive(Default)]
pub struct StalledSink {
    pub started: tokio::sync::Notify,
}

#[async_trait]
impl EventSink for StalledSink {
    async fn send_text(&self, _payload: &str) -> Result<(), DeliveryError> {
        self.started.notify_one();
        std::future::pending().await
    }
}

/// Records payloads, yielding to the scheduler before each one lands.
#[derive(Default)]
pub struct YieldingSink {
    inner: RecordingSink,
}

impl YieldingSink {
    pub fn received(&self) -> Vec<String> {
        self.inner.received()
    }
}

#[async_trait]
impl EventSink for YieldingSink {
    async fn send_text(&self, payload: &str) -> Result<(), DeliveryError> {
        tokio::task::yield_now().await;
        self.inner.send_text(payload).await
    }
}
