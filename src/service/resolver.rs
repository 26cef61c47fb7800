use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::model::{
    attendance::DeviceClass,
    location::{AssignedLocation, Coordinate},
};
use crate::service::proximity::{DeviceProximityPolicy, Direction};
use crate::utils::geo;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    OnSite,
    OffSite,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Classification {
    pub proximity: Proximity,
    /// None when the user has no assigned location.
    #[schema(example = 812.4, nullable = true)]
    pub distance_m: Option<f64>,
    #[schema(example = 400.0)]
    pub threshold_m: f64,
    #[schema(example = "Head Office", nullable = true)]
    pub location_name: Option<String>,
}

impl Classification {
    pub fn is_on_site(&self) -> bool {
        self.proximity == Proximity::OnSite
    }
}

/// OnSite iff within `threshold_m` of the assigned location. Without an
/// assigned location there is nothing to be on-site of.
pub fn classify_against(
    assigned: Option<&AssignedLocation>,
    position: Coordinate,
    threshold_m: f64,
) -> Classification {
    let Some(location) = assigned else {
        return Classification {
            proximity: Proximity::OffSite,
            distance_m: None,
            threshold_m,
            location_name: None,
        };
    };

    let distance = geo::distance_meters(location.coordinate, position);
    Classification {
        proximity: if distance <= threshold_m {
            Proximity::OnSite
        } else {
            Proximity::OffSite
        },
        distance_m: Some(distance),
        threshold_m,
        location_name: Some(location.name.clone()),
    }
}

pub struct LocationResolver {
    policy: Arc<DeviceProximityPolicy>,
}

impl LocationResolver {
    pub fn new(policy: Arc<DeviceProximityPolicy>) -> Self {
        Self { policy }
    }

    pub async fn classify(
        &self,
        assigned: Option<&AssignedLocation>,
        position: Coordinate,
        device_class: DeviceClass,
        direction: Direction,
    ) -> AppResult<Classification> {
        let threshold = self.policy.threshold_for(device_class, direction).await?;
        let classification = classify_against(assigned, position, threshold);
        tracing::debug!(
            %position,
            %device_class,
            ?direction,
            distance_m = classification.distance_m,
            threshold_m = threshold,
            proximity = ?classification.proximity,
            "Position classified"
        );
        Ok(classification)
    }
}
