use crate::auth::auth::AuthUser;
use crate::model::{audit::AuditAction, device_setting::DeviceProximitySetting};
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceRadiusSettings {
    pub settings: Vec<DeviceProximitySetting>,
}

/// Effective radius per device class
#[utoipa::path(
    get,
    path = "/api/v1/settings/device-radius",
    responses(
        (status = 200, description = "Current radius table, one entry per device class", body = DeviceRadiusSettings),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Storage unavailable; retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Settings"
)]
pub async fn get_device_radius(
    _auth: AuthUser,
    state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let table = state.policy.table().await?;
    Ok(HttpResponse::Ok().json(DeviceRadiusSettings {
        settings: table.to_settings(),
    }))
}

/// Bulk update of device radii (admin only)
///
/// Every radius must be within 50..=5000 m. One bad entry rejects the whole
/// batch; device classes not listed keep their values.
#[utoipa::path(
    put,
    path = "/api/v1/settings/device-radius",
    request_body = DeviceRadiusSettings,
    responses(
        (status = 200, description = "Updated radius table", body = DeviceRadiusSettings),
        (status = 400, description = "Batch rejected; nothing changed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
        (status = 503, description = "Storage unavailable; retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Settings"
)]
pub async fn update_device_radius(
    auth: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<DeviceRadiusSettings>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let updates = body.into_inner().settings;
    let table = state.policy.replace(&updates).await?;
    state
        .audit
        .record(
            Some(auth.user_id),
            AuditAction::DeviceRadiusUpdated,
            "device_proximity_settings",
            None,
            serde_json::json!({ "updates": updates }),
            Utc::now(),
        )
        .await;

    Ok(HttpResponse::Ok().json(DeviceRadiusSettings {
        settings: table.to_settings(),
    }))
}
