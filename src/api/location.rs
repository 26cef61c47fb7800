use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::{attendance::DeviceClass, location::LocationSample};
use crate::service::{batcher::ObserveOutcome, presence::PresenceStatus};
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const MAX_SAMPLES_PER_UPLOAD: usize = 100;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SampleUpload {
    #[schema(example = "mobile")]
    pub device_class: DeviceClass,
    pub samples: Vec<LocationSample>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct SampleUploadResult {
    pub accepted: usize,
    pub discarded: usize,
    pub batches_flushed: usize,
}

/// Upload raw GPS samples
///
/// Samples are batched per user; jitter around the last accepted position is
/// dropped.
#[utoipa::path(
    post,
    path = "/api/v1/location/samples",
    request_body = SampleUpload,
    responses(
        (status = 202, description = "Samples taken into the batcher", body = SampleUploadResult),
        (status = 400, description = "Invalid sample"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Location"
)]
pub async fn upload_samples(
    auth: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<SampleUpload>,
) -> actix_web::Result<impl Responder> {
    let upload = body.into_inner();
    if upload.samples.is_empty() || upload.samples.len() > MAX_SAMPLES_PER_UPLOAD {
        return Err(AppError::validation(format!(
            "between 1 and {MAX_SAMPLES_PER_UPLOAD} samples are accepted per upload"
        ))
        .into());
    }
    for sample in &upload.samples {
        sample.coordinate.validate()?;
        if !sample.accuracy_m.is_finite() || sample.accuracy_m < 0.0 {
            return Err(AppError::validation("accuracy_m must be a non-negative number").into());
        }
    }

    let mut result = SampleUploadResult::default();
    for sample in upload.samples {
        match state
            .batcher
            .observe(auth.user_id, upload.device_class, sample)
            .await
        {
            ObserveOutcome::Discarded => result.discarded += 1,
            ObserveOutcome::Buffered => result.accepted += 1,
            ObserveOutcome::Flushed => {
                result.accepted += 1;
                result.batches_flushed += 1;
            }
        }
    }
    Ok(HttpResponse::Accepted().json(result))
}

/// Latest presence reading of the caller
#[utoipa::path(
    get,
    path = "/api/v1/location/status",
    responses(
        (status = 200, description = "Most recent on-site/off-site reading", body = PresenceStatus),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No recent location data")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Location"
)]
pub async fn status(auth: AuthUser, state: web::Data<AppState>) -> actix_web::Result<impl Responder> {
    let status = state
        .presence
        .status(auth.user_id)
        .await
        .ok_or(AppError::NotFound {
            entity: "presence_status",
            id: auth.user_id,
        })?;
    Ok(HttpResponse::Ok().json(status))
}
