use crate::auth::auth::AuthUser;
use crate::model::{
    attendance::{AttendanceRecord, DeviceClass},
    location::ReportedLocation,
};
use crate::service::attendance::{CheckInOutcome, PositionReport, TodayView};
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttendancePunch {
    pub location: ReportedLocation,
    #[schema(example = "mobile")]
    pub device_class: DeviceClass,
}

impl From<AttendancePunch> for PositionReport {
    fn from(p: AttendancePunch) -> Self {
        PositionReport {
            location: p.location,
            device_class: p.device_class,
        }
    }
}

/// Check-in endpoint
///
/// Inside the geofence a normal session is opened. Outside it the response
/// has `status = "off_premises_required"` and no record is created.
#[utoipa::path(
    post,
    path = "/api/v1/attendance/checkin",
    request_body = AttendancePunch,
    responses(
        (status = 200, description = "Checked in, or off-premises request required", body = CheckInOutcome),
        (status = 400, description = "Invalid coordinates"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Already checked in today, or a request is awaiting approval"),
        (status = 503, description = "Busy or storage unavailable; retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<AttendancePunch>,
) -> actix_web::Result<impl Responder> {
    let outcome = state
        .attendance
        .check_in(&auth.caller(), body.into_inner().into(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/v1/attendance/checkout",
    request_body = AttendancePunch,
    responses(
        (status = 200, description = "Checked out successfully", body = AttendanceRecord),
        (status = 400, description = "Invalid coordinates or outside the geofence"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "No open session, or the session is awaiting approval"),
        (status = 503, description = "Storage unavailable; retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<AttendancePunch>,
) -> actix_web::Result<impl Responder> {
    let record = state
        .attendance
        .check_out(&auth.caller(), body.into_inner().into(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Today's record and pending off-premises request of the caller
#[utoipa::path(
    get,
    path = "/api/v1/attendance/today",
    responses(
        (status = 200, description = "Attendance state for today", body = TodayView),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn today(auth: AuthUser, state: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let view = state.attendance.today(&auth.caller(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(view))
}
