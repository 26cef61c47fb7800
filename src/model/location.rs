use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema, Display)]
#[display(fmt = "({:.6}, {:.6})", latitude, longitude)]
pub struct Coordinate {
    #[schema(example = 23.8103)]
    pub latitude: f64,
    #[schema(example = 90.4125)]
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Rejects NaN/infinite values and anything outside WGS84 ranges.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::validation(format!(
                "latitude {} is out of range [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::validation(format!(
                "longitude {} is out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// A position as reported by a client, with whatever the client resolved
/// about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "coordinate": { "latitude": 23.8103, "longitude": 90.4125 },
    "place_name": "Head Office, Gulshan",
    "accuracy_m": 12.5
}))]
pub struct ReportedLocation {
    pub coordinate: Coordinate,
    #[schema(example = "Head Office, Gulshan", nullable = true)]
    pub place_name: Option<String>,
    #[schema(example = 12.5, nullable = true)]
    pub accuracy_m: Option<f64>,
}

impl ReportedLocation {
    pub fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            place_name: None,
            accuracy_m: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.coordinate.validate()?;
        if let Some(accuracy) = self.accuracy_m {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(AppError::validation(format!(
                    "accuracy_m {accuracy} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// Raw GPS reading. Never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationSample {
    pub coordinate: Coordinate,
    #[schema(example = 8.0)]
    pub accuracy_m: f64,
    #[schema(example = "2026-01-01T09:00:00Z", format = "date-time", value_type = String)]
    pub timestamp: DateTime<Utc>,
}

/// Registered premises a member of staff is posted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssignedLocation {
    pub id: u64,
    pub name: String,
    pub coordinate: Coordinate,
}
