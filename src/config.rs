use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::FixedOffset;
use dotenvy::dotenv;

use crate::service::batcher::BatchPolicy;

/// Tunables of the attendance core, independent of how the process is run.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub utc_offset_minutes: i32,
    pub admission_timeout: Duration,
    pub device_radius_cache_ttl: Duration,
    pub provisional_records: bool,
    pub location_batch: BatchPolicy,
    pub notification_queue_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            admission_timeout: Duration::from_millis(10_000),
            device_radius_cache_ttl: Duration::from_secs(30),
            provisional_records: true,
            location_batch: BatchPolicy::default(),
            notification_queue_capacity: 1024,
        }
    }
}

impl CoreConfig {
    pub fn day_offset(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            anyhow!(
                "ATTENDANCE_UTC_OFFSET_MINUTES={} is not a valid UTC offset",
                self.utc_offset_minutes
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,

    pub rate_protected_per_min: u32,
    pub api_prefix: String,
    pub run_migrations: bool,

    pub log_dir: String,
    pub log_level: String,

    pub core: CoreConfig,
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} must be set"))
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name}={raw:?} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let defaults = CoreConfig::default();
        let batch = defaults.location_batch;
        let core = CoreConfig {
            utc_offset_minutes: env_or("ATTENDANCE_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes)?,
            admission_timeout: Duration::from_millis(env_or("CHECKIN_ADMISSION_TIMEOUT_MS", 10_000u64)?),
            device_radius_cache_ttl: Duration::from_secs(env_or("DEVICE_RADIUS_CACHE_TTL_SECS", 30u64)?),
            provisional_records: env_or("OFFPREMISES_PROVISIONAL_RECORD", defaults.provisional_records)?,
            location_batch: BatchPolicy {
                max_samples: env_or("LOCATION_BATCH_SIZE", batch.max_samples)?,
                max_delay: Duration::from_millis(env_or("LOCATION_BATCH_INTERVAL_MS", 3_000u64)?),
                min_movement_m: env_or("LOCATION_MIN_MOVEMENT_M", batch.min_movement_m)?,
                freshness: Duration::from_secs(env_or("LOCATION_FRESHNESS_SECS", 30u64)?),
            },
            notification_queue_capacity: env_or(
                "NOTIFICATION_QUEUE_CAPACITY",
                defaults.notification_queue_capacity,
            )?,
        };
        if core.location_batch.max_samples == 0 {
            return Err(anyhow!("LOCATION_BATCH_SIZE must be at least 1"));
        }
        core.day_offset()?;

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            rate_protected_per_min: env_or("RATE_PROTECTED_PER_MIN", 1000)?,
            api_prefix: env_or("API_PREFIX", "/api/v1".to_string())?,
            run_migrations: env_or("RUN_MIGRATIONS", false)?,
            log_dir: env_or("LOG_DIR", "logs".to_string())?,
            log_level: env_or("LOG_LEVEL", "info".to_string())?,
            core,
        })
    }

    /// Configuration with every optional value at its default.
    pub fn with_defaults(server_addr: &str, database_url: &str, jwt_secret: &str) -> Self {
        Self {
            server_addr: server_addr.to_string(),
            database_url: database_url.to_string(),
            jwt_secret: jwt_secret.to_string(),
            rate_protected_per_min: 1000,
            api_prefix: "/api/v1".to_string(),
            run_migrations: false,
            log_dir: "logs".to_string(),
            log_level: "info".to_string(),
            core: CoreConfig::default(),
        }
    }
}
