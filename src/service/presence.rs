use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{attendance::DeviceClass, location::LocationSample};
use crate::service::{
    batcher::{BatchConsumer, LocationBatch},
    proximity::Direction,
    resolver::{Classification, LocationResolver},
};
use crate::store::AttendanceStore;

const STATUS_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PresenceStatus {
    pub user_id: u64,
    pub device_class: DeviceClass,
    pub position: LocationSample,
    pub classification: Classification,
    pub samples_in_batch: usize,
}

/// Latest on-site/off-site reading per user, fed by location batches.
pub struct PresenceTracker {
    store: Arc<dyn AttendanceStore>,
    resolver: Arc<LocationResolver>,
    statuses: Cache<u64, PresenceStatus>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn AttendanceStore>, resolver: Arc<LocationResolver>) -> Self {
        Self {
            store,
            resolver,
            statuses: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(STATUS_TTL)
                .build(),
        }
    }

    pub async fn status(&self, user_id: u64) -> Option<PresenceStatus> {
        self.statuses.get(&user_id).await
    }

    /// Time of the position the current status was computed from.
    pub async fn last_seen(&self, user_id: u64) -> Option<DateTime<Utc>> {
        self.status(user_id).await.map(|s| s.position.timestamp)
    }
}

#[async_trait]
impl BatchConsumer for PresenceTracker {
    async fn consume(&self, batch: LocationBatch) {
        let Some(position) = batch.representative().copied() else {
            return;
        };

        let assigned = match self.store.staff_profile(batch.user_id).await {
            Ok(profile) => profile.and_then(|p| p.assigned_location),
            Err(e) => {
                tracing::warn!(error = %e, user_id = batch.user_id, "Presence update skipped");
                return;
            }
        };
        let classification = match self
            .resolver
            .classify(
                assigned.as_ref(),
                position.coordinate,
                batch.device_class,
                Direction::CheckIn,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, user_id = batch.user_id, "Presence classification failed");
                return;
            }
        };

        tracing::debug!(
            user_id = batch.user_id,
            proximity = ?classification.proximity,
            samples = batch.samples.len(),
            "Presence updated"
        );
        self.statuses
            .insert(
                batch.user_id,
                PresenceStatus {
                    user_id: batch.user_id,
                    device_class: batch.device_class,
                    position,
                    classification,
                    samples_in_batch: batch.samples.len(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures::{Harness, at_hms, near_office};
    use crate::service::resolver::Proximity;

    fn batch(user_id: u64, samples: Vec<LocationSample>) -> LocationBatch {
        LocationBatch {
            user_id,
            device_class: DeviceClass::Mobile,
            samples,
        }
    }

    #[tokio::test]
    async fn representative_sample_decides_presence() {
        let h = Harness::new().await;
        let tracker = PresenceTracker::new(h.store.clone(), h.resolver.clone());

        tracker
            .consume(batch(
                h.staff_id,
                vec![
                    LocationSample {
                        coordinate: near_office(&h.office, 900.0),
                        accuracy_m: 60.0,
                        timestamp: at_hms(3, 0, 0),
                    },
                    LocationSample {
                        coordinate: near_office(&h.office, 120.0),
                        accuracy_m: 6.0,
                        timestamp: at_hms(3, 0, 2),
                    },
                ],
            ))
            .await;

        let status = tracker.status(h.staff_id).await.unwrap();
        assert_eq!(status.classification.proximity, Proximity::OnSite);
        assert_eq!(status.samples_in_batch, 2);
        assert_eq!(tracker.last_seen(h.staff_id).await, Some(at_hms(3, 0, 2)));
    }

    #[tokio::test]
    async fn unknown_user_is_off_site() {
        let h = Harness::new().await;
        let tracker = PresenceTracker::new(h.store.clone(), h.resolver.clone());
        tracker
            .consume(batch(
                999,
                vec![LocationSample {
                    coordinate: h.office.coordinate,
                    accuracy_m: 5.0,
                    timestamp: at_hms(3, 0, 0),
                }],
            ))
            .await;
        assert_eq!(
            tracker.status(999).await.unwrap().classification.proximity,
            Proximity::OffSite
        );
    }

    #[tokio::test]
    async fn store_failure_keeps_previous_status() {
        let h = Harness::new().await;
        let tracker = PresenceTracker::new(h.store.clone(), h.resolver.clone());
        h.store.set_unavailable(true);
        tracker
            .consume(batch(
                h.staff_id,
                vec![LocationSample {
                    coordinate: h.office.coordinate,
                    accuracy_m: 5.0,
                    timestamp: at_hms(3, 0, 0),
                }],
            ))
            .await;
        assert!(tracker.status(h.staff_id).await.is_none());
    }
}
