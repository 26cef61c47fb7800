use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::IntoEnumIterator;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::model::{attendance::DeviceClass, device_setting::DeviceProximitySetting};
use crate::store::AttendanceStore;

pub const MIN_RADIUS_M: f64 = 50.0;
pub const MAX_RADIUS_M: f64 = 5_000.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    CheckIn,
    CheckOut,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DeviceRadius {
    pub check_in_m: f64,
    pub check_out_m: f64,
}

/// Effective radius per device class.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRadiusTable {
    radii: HashMap<DeviceClass, DeviceRadius>,
}

impl Default for DeviceRadiusTable {
    fn default() -> Self {
        let radii = DeviceClass::iter()
            .map(|class| (class, default_radius(class)))
            .collect();
        Self { radii }
    }
}

fn default_radius(class: DeviceClass) -> DeviceRadius {
    let (check_in_m, check_out_m) = match class {
        DeviceClass::Mobile | DeviceClass::Tablet => (400.0, 400.0),
        DeviceClass::Laptop => (700.0, 700.0),
        DeviceClass::Desktop => (2_000.0, 1_000.0),
    };
    DeviceRadius {
        check_in_m,
        check_out_m,
    }
}

impl DeviceRadiusTable {
    /// Defaults overlaid with stored rows.
    pub fn from_settings(settings: &[DeviceProximitySetting]) -> Self {
        let mut table = Self::default();
        table.overlay(settings);
        table
    }

    fn overlay(&mut self, settings: &[DeviceProximitySetting]) {
        for s in settings {
            self.radii.insert(
                s.device_class,
                DeviceRadius {
                    check_in_m: s.check_in_radius_m,
                    check_out_m: s.check_out_radius_m,
                },
            );
        }
    }

    pub fn threshold(&self, class: DeviceClass, direction: Direction) -> f64 {
        let radius = self
            .radii
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_radius(class));
        match direction {
            Direction::CheckIn => radius.check_in_m,
            Direction::CheckOut => radius.check_out_m,
        }
    }

    pub fn to_settings(&self) -> Vec<DeviceProximitySetting> {
        DeviceClass::iter()
            .map(|class| {
                DeviceProximitySetting::new(
                    class,
                    self.threshold(class, Direction::CheckIn),
                    self.threshold(class, Direction::CheckOut),
                )
            })
            .collect()
    }
}

/// Checks a bulk update; every offending entry is reported together.
pub fn validate_settings(settings: &[DeviceProximitySetting]) -> AppResult<()> {
    if settings.is_empty() {
        return Err(AppError::validation("at least one device radius entry is required"));
    }

    let mut problems = Vec::new();
    let mut seen = Vec::with_capacity(settings.len());
    for s in settings {
        if seen.contains(&s.device_class) {
            problems.push(json!({
                "device_class": s.device_class,
                "problem": "listed more than once",
            }));
            continue;
        }
        seen.push(s.device_class);

        for (field, value) in [
            ("check_in_radius_m", s.check_in_radius_m),
            ("check_out_radius_m", s.check_out_radius_m),
        ] {
            if !value.is_finite() || !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&value) {
                problems.push(json!({
                    "device_class": s.device_class,
                    "field": field,
                    "value": value,
                    "problem": format!("must be between {MIN_RADIUS_M} and {MAX_RADIUS_M} meters"),
                }));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation_with(
            "device radius update rejected; no settings were changed",
            json!({ "problems": problems }),
        ))
    }
}

/// Device class → radius policy, cached for a short TTL.
///
/// The update gate makes a cache refill and an admin update mutually
/// exclusive: once `replace` returns, no reader can observe or re-cache the
/// previous table.
pub struct DeviceProximityPolicy {
    store: Arc<dyn AttendanceStore>,
    cache: Cache<(), Arc<DeviceRadiusTable>>,
    update_gate: RwLock<()>,
}

impl DeviceProximityPolicy {
    pub fn new(store: Arc<dyn AttendanceStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
            update_gate: RwLock::new(()),
        }
    }

    pub async fn table(&self) -> AppResult<Arc<DeviceRadiusTable>> {
        if let Some(table) = self.cache.get(&()).await {
            return Ok(table);
        }

        let _reading = self.update_gate.read().await;
        if let Some(table) = self.cache.get(&()).await {
            return Ok(table);
        }
        let settings = self.store.device_settings().await?;
        let table = Arc::new(DeviceRadiusTable::from_settings(&settings));
        self.cache.insert((), Arc::clone(&table)).await;
        tracing::debug!("Device radius table loaded into cache");
        Ok(table)
    }

    pub async fn threshold_for(&self, class: DeviceClass, direction: Direction) -> AppResult<f64> {
        Ok(self.table().await?.threshold(class, direction))
    }

    /// All-or-nothing bulk update. Classes not listed keep their values.
    pub async fn replace(
        &self,
        updates: &[DeviceProximitySetting],
    ) -> AppResult<Arc<DeviceRadiusTable>> {
        validate_settings(updates)?;

        let _writing = self.update_gate.write().await;
        let current = self.store.device_settings().await?;
        let mut table = DeviceRadiusTable::from_settings(&current);
        table.overlay(updates);

        self.store.replace_device_settings(&table.to_settings()).await?;

        let table = Arc::new(table);
        self.cache.insert((), Arc::clone(&table)).await;
        tracing::info!(entries = updates.len(), "Device radius settings replaced");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn policy(store: Arc<MemoryStore>) -> DeviceProximityPolicy {
        DeviceProximityPolicy::new(store, Duration::from_secs(30))
    }

    #[test]
    fn defaults_match_device_classes() {
        let t = DeviceRadiusTable::default();
        assert_eq!(t.threshold(DeviceClass::Mobile, Direction::CheckIn), 400.0);
        assert_eq!(t.threshold(DeviceClass::Tablet, Direction::CheckOut), 400.0);
        assert_eq!(t.threshold(DeviceClass::Laptop, Direction::CheckIn), 700.0);
        assert_eq!(t.threshold(DeviceClass::Desktop, Direction::CheckIn), 2_000.0);
        assert_eq!(t.threshold(DeviceClass::Desktop, Direction::CheckOut), 1_000.0);
    }

    #[test]
    fn bounds_are_inclusive() {
        let ok = [DeviceProximitySetting::new(DeviceClass::Mobile, 50.0, 5_000.0)];
        assert!(validate_settings(&ok).is_ok());

        let nan = [DeviceProximitySetting::new(DeviceClass::Mobile, f64::NAN, 100.0)];
        assert!(validate_settings(&nan).is_err());

        let dup = [
            DeviceProximitySetting::new(DeviceClass::Mobile, 100.0, 100.0),
            DeviceProximitySetting::new(DeviceClass::Mobile, 200.0, 200.0),
        ];
        assert!(validate_settings(&dup).is_err());
    }

    #[tokio::test]
    async fn one_bad_entry_rejects_the_whole_batch() {
        let store = Arc::new(MemoryStore::new());
        let policy = policy(Arc::clone(&store));

        let err = policy
            .replace(&[
                DeviceProximitySetting::new(DeviceClass::Mobile, 300.0, 300.0),
                DeviceProximitySetting::new(DeviceClass::Laptop, 6_000.0, 700.0),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation_error");
        assert_eq!(store.settings_write_count(), 0);
        assert!(store.device_settings().await.unwrap().is_empty());
        assert_eq!(
            policy
                .threshold_for(DeviceClass::Mobile, Direction::CheckIn)
                .await
                .unwrap(),
            400.0
        );
    }

    #[tokio::test]
    async fn update_is_visible_immediately_despite_warm_cache() {
        let store = Arc::new(MemoryStore::new());
        let policy = policy(Arc::clone(&store));

        // warm the cache with defaults
        assert_eq!(
            policy
                .threshold_for(DeviceClass::Desktop, Direction::CheckIn)
                .await
                .unwrap(),
            2_000.0
        );

        policy
            .replace(&[DeviceProximitySetting::new(DeviceClass::Desktop, 150.0, 120.0)])
            .await
            .unwrap();

        assert_eq!(
            policy
                .threshold_for(DeviceClass::Desktop, Direction::CheckIn)
                .await
                .unwrap(),
            150.0
        );
        // untouched classes keep their values and every class is persisted
        let stored = store.device_settings().await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.contains(&DeviceProximitySetting::new(DeviceClass::Laptop, 700.0, 700.0)));
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_table() {
        let store = Arc::new(MemoryStore::new());
        let policy = policy(Arc::clone(&store));
        store.fail_operation("replace_device_settings", true);

        let err = policy
            .replace(&[DeviceProximitySetting::new(DeviceClass::Mobile, 100.0, 100.0)])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(
            policy
                .threshold_for(DeviceClass::Mobile, Direction::CheckIn)
                .await
                .unwrap(),
            400.0
        );
    }
}
