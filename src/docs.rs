use crate::api::attendance::AttendancePunch;
use crate::api::location::{SampleUpload, SampleUploadResult};
use crate::api::offpremises::{RejectBody, SubmitOffPremisesBody};
use crate::api::settings::DeviceRadiusSettings;
use crate::model::attendance::{ApprovalStatus, AttendanceRecord, DeviceClass};
use crate::model::device_setting::DeviceProximitySetting;
use crate::model::location::{Coordinate, LocationSample, ReportedLocation};
use crate::model::offpremises::{OffPremisesRequest, RequestStatus};
use crate::service::attendance::{CheckInOutcome, TodayView};
use crate::service::presence::PresenceStatus;
use crate::service::resolver::{Classification, Proximity};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Attendance API",
        version = "1.0.0",
        description = r#"
## Attendance core of the HRM system

Geofenced check-in and check-out with a supervisor approval workflow for
staff working away from their assigned premises.

### 🔹 Key Features
- **Attendance**
  - Check-in and check-out validated against the assigned location, with a radius per device class
  - At most one attendance record per user per day
- **Off-premises requests**
  - Submit from outside the geofence, approve/reject by department heads, regional managers and admins
  - Revert an approval, deleting the record it created
- **Settings**
  - Admin-managed radius table per device class
- **Location**
  - Batched GPS sample upload and latest presence status

### 🔐 Security
Every endpoint requires a **JWT Bearer** access token.

### 📦 Errors
Failures use one envelope: `{"error": {"kind": "...", "message": "..."}}`.
Kinds `admission_timeout` and `storage_error` are transient; retry after the `Retry-After` delay.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::today,

        crate::api::offpremises::submit,
        crate::api::offpremises::list_pending,
        crate::api::offpremises::get_request,
        crate::api::offpremises::approve,
        crate::api::offpremises::reject,
        crate::api::offpremises::revert,

        crate::api::settings::get_device_radius,
        crate::api::settings::update_device_radius,

        crate::api::location::upload_samples,
        crate::api::location::status
    ),
    components(
        schemas(
            AttendancePunch,
            AttendanceRecord,
            ApprovalStatus,
            DeviceClass,
            Coordinate,
            ReportedLocation,
            LocationSample,
            CheckInOutcome,
            Classification,
            Proximity,
            TodayView,
            SubmitOffPremisesBody,
            RejectBody,
            OffPremisesRequest,
            RequestStatus,
            DeviceProximitySetting,
            DeviceRadiusSettings,
            SampleUpload,
            SampleUploadResult,
            PresenceStatus
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Check-in and check-out APIs"),
        (name = "Off-premises", description = "Off-premises approval workflow APIs"),
        (name = "Settings", description = "Device radius configuration APIs"),
        (name = "Location", description = "Location sample and presence APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
