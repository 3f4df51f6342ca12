//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::delivery_log::DeliveryRecord;
use crate::error::StoreError;
use crate::reading::ReadingVector;
use crate::store::{MemoryNodeStore, NodeRecord, NodeStore, ServiceState};
use crate::transmitter::Transmitter;

/// Transmitter that records every call instead of touching the network.
#[derive(Default)]
pub struct RecordingTransmitter {
    calls: Mutex<HashMap<String, Vec<(Instant, ReadingVector)>>>,
    fail: AtomicBool,
    delay: Duration,
    panic_on: Option<String>,
}

impl RecordingTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send produces a failure record.
    pub fn failing() -> Self {
        let transmitter = Self::default();
        transmitter.fail.store(true, Ordering::SeqCst);
        transmitter
    }

    /// Each send takes `delay` to complete.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Sends for `node_id` panic, killing that job's task.
    pub fn panicking_for(node_id: &str) -> Self {
        Self {
            panic_on: Some(node_id.to_string()),
            ..Self::default()
        }
    }

    pub fn count(&self, node_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(node_id)
            .map_or(0, |c| c.len())
    }

    pub fn instants(&self, node_id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(node_id)
            .map(|c| c.iter().map(|(at, _)| *at).collect())
            .unwrap_or_default()
    }

    pub fn readings(&self, node_id: &str) -> Vec<ReadingVector> {
        self.calls
            .lock()
            .unwrap()
            .get(node_id)
            .map(|c| c.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transmitter for RecordingTransmitter {
    async fn send(&self, node_id: &str, reading: &ReadingVector) -> DeliveryRecord {
        if self.panic_on.as_deref() == Some(node_id) {
            panic!("simulated transmitter crash for {}", node_id);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.calls
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push((Instant::now(), reading.clone()));

        if self.fail.load(Ordering::SeqCst) {
            DeliveryRecord::failure(node_id, None, "simulated network error")
        } else {
            DeliveryRecord::success(node_id, 201, serde_json::json!({"ok": true}))
        }
    }
}

/// Store that knows every node in `inner` but refuses all writes.
pub struct ReadOnlyStore {
    pub inner: MemoryNodeStore,
}

#[async_trait]
impl NodeStore for ReadOnlyStore {
    async fn get_by_id(&self, node_id: &str) -> Result<NodeRecord, StoreError> {
        self.inner.get_by_id(node_id).await
    }

    async fn set_services(&self, _node_id: &str, _state: ServiceState) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("database is read-only".to_string()))
    }
}

/// Memory store pre-populated with `node_ids`.
pub fn store_with(node_ids: &[&str]) -> MemoryNodeStore {
    let store = MemoryNodeStore::new();
    for id in node_ids {
        store.insert(NodeRecord {
            node_id: id.to_string(),
            vertical_id: 1,
            parameter_ids: vec![1],
            platform: "onem2m".to_string(),
            protocol: "https".to_string(),
            frequency: 5,
            services: ServiceState::Stop,
        });
    }
    store
}
