use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::Mutex;

use crate::model::{attendance::DeviceClass, location::LocationSample};
use crate::utils::geo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPolicy {
    pub max_samples: usize,
    pub max_delay: Duration,
    pub min_movement_m: f64,
    pub freshness: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_samples: 5,
            max_delay: Duration::from_millis(3_000),
            min_movement_m: 10.0,
            freshness: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationBatch {
    pub user_id: u64,
    pub device_class: DeviceClass,
    pub samples: Vec<LocationSample>,
}

impl LocationBatch {
    /// Most accurate sample; the latest one wins ties.
    pub fn representative(&self) -> Option<&LocationSample> {
        self.samples.iter().reduce(|best, s| {
            if s.accuracy_m < best.accuracy_m
                || (s.accuracy_m == best.accuracy_m && s.timestamp >= best.timestamp)
            {
                s
            } else {
                best
            }
        })
    }
}

#[async_trait]
pub trait BatchConsumer: Send + Sync {
    async fn consume(&self, batch: LocationBatch);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// Jitter around the last accepted sample.
    Discarded,
    Buffered,
    Flushed,
}

struct UserBuffer {
    pending: Vec<LocationSample>,
    device_class: DeviceClass,
    last_accepted: Option<LocationSample>,
    // bumped on every flush so a stale timer can tell its batch is gone
    epoch: u64,
}

impl UserBuffer {
    fn new(device_class: DeviceClass) -> Self {
        Self {
            pending: Vec::new(),
            device_class,
            last_accepted: None,
            epoch: 0,
        }
    }

    fn take(&mut self, user_id: u64) -> Option<LocationBatch> {
        if self.pending.is_empty() {
            return None;
        }
        self.epoch += 1;
        Some(LocationBatch {
            user_id,
            device_class: self.device_class,
            samples: std::mem::take(&mut self.pending),
        })
    }
}

/// Groups raw GPS samples per user and hands them on by size or age.
///
/// The buffer lock is held while the consumer runs, so one user's batches
/// are delivered in order.
///
/// A buffer is dropped once untouched for `freshness + max_delay`. By then
/// its flush timer has fired and its last sample no longer filters jitter.
pub struct LocationUpdateBatcher {
    policy: BatchPolicy,
    buffers: Cache<u64, Arc<Mutex<UserBuffer>>>,
    consumer: Arc<dyn BatchConsumer>,
}

impl LocationUpdateBatcher {
    pub fn new(policy: BatchPolicy, consumer: Arc<dyn BatchConsumer>) -> Self {
        Self {
            policy,
            buffers: Cache::builder()
                .time_to_idle(policy.freshness + policy.max_delay)
                .build(),
            consumer,
        }
    }

    async fn buffer(&self, user_id: u64, device_class: DeviceClass) -> Arc<Mutex<UserBuffer>> {
        self.buffers
            .get_with(user_id, async move {
                Arc::new(Mutex::new(UserBuffer::new(device_class)))
            })
            .await
    }

    pub async fn observe(
        self: &Arc<Self>,
        user_id: u64,
        device_class: DeviceClass,
        sample: LocationSample,
    ) -> ObserveOutcome {
        let buffer = self.buffer(user_id, device_class).await;
        let mut buf = buffer.lock().await;

        if let Some(last) = buf.last_accepted {
            let age = sample.timestamp - last.timestamp;
            let fresh = age
                .to_std()
                .map(|age| age < self.policy.freshness)
                .unwrap_or(true);
            if fresh && geo::distance_meters(last.coordinate, sample.coordinate) < self.policy.min_movement_m {
                tracing::trace!(user_id, "Location sample discarded as jitter");
                return ObserveOutcome::Discarded;
            }
        }

        buf.last_accepted = Some(sample);
        buf.device_class = device_class;
        buf.pending.push(sample);

        if buf.pending.len() >= self.policy.max_samples {
            if let Some(batch) = buf.take(user_id) {
                tracing::debug!(user_id, samples = batch.samples.len(), "Location batch full");
                self.consumer.consume(batch).await;
            }
            return ObserveOutcome::Flushed;
        }

        if buf.pending.len() == 1 {
            let epoch = buf.epoch;
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(this.policy.max_delay).await;
                this.flush_epoch(user_id, epoch).await;
            });
        }
        ObserveOutcome::Buffered
    }

    async fn flush_epoch(&self, user_id: u64, epoch: u64) {
        let Some(buffer) = self.existing(user_id).await else {
            return;
        };
        let mut buf = buffer.lock().await;
        if buf.epoch != epoch {
            return;
        }
        if let Some(batch) = buf.take(user_id) {
            tracing::debug!(user_id, samples = batch.samples.len(), "Location batch aged out");
            self.consumer.consume(batch).await;
        }
    }

    /// Delivers whatever is buffered for the user now. False when there was
    /// nothing to deliver.
    pub async fn flush(&self, user_id: u64) -> bool {
        let Some(buffer) = self.existing(user_id).await else {
            return false;
        };
        let mut buf = buffer.lock().await;
        match buf.take(user_id) {
            Some(batch) => {
                self.consumer.consume(batch).await;
                true
            }
            None => false,
        }
    }

    pub async fn pending_len(&self, user_id: u64) -> usize {
        match self.existing(user_id).await {
            Some(buffer) => buffer.lock().await.pending.len(),
            None => 0,
        }
    }

    async fn existing(&self, user_id: u64) -> Option<Arc<Mutex<UserBuffer>>> {
        self.buffers.get(&user_id).await
    }

    /// Users that currently hold a buffer.
    pub async fn tracked_users(&self) -> u64 {
        self.buffers.run_pending_tasks().await;
        self.buffers.entry_count()
    }
}
