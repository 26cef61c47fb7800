use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::attendance::DeviceClass;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_class": "mobile",
    "check_in_radius_m": 400.0,
    "check_out_radius_m": 400.0
}))]
pub struct DeviceProximitySetting {
    pub device_class: DeviceClass,
    pub check_in_radius_m: f64,
    pub check_out_radius_m: f64,
}

impl DeviceProximitySetting {
    pub const fn new(device_class: DeviceClass, check_in_radius_m: f64, check_out_radius_m: f64) -> Self {
        Self {
            device_class,
            check_in_radius_m,
            check_out_radius_m,
        }
    }
}
