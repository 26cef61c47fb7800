use crate::api::attendance::AttendancePunch;
use crate::auth::auth::AuthUser;
use crate::model::offpremises::OffPremisesRequest;
use crate::state::AppState;
use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitOffPremisesBody {
    #[serde(flatten)]
    pub punch: AttendancePunch,
    #[schema(example = "Pixel 8 / Android 15")]
    pub device_info: Option<String>,
    #[schema(example = "Client site visit")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectBody {
    #[schema(example = "No client visit scheduled")]
    pub reason: String,
}

/// Submit an off-premises check-in for approval
#[utoipa::path(
    post,
    path = "/api/v1/offpremises/submit",
    request_body = SubmitOffPremisesBody,
    responses(
        (status = 201, description = "Request created and awaiting approval", body = OffPremisesRequest),
        (status = 400, description = "Invalid coordinates, or the position is on-site"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Already checked in, or a request is already pending"),
        (status = 503, description = "Busy or storage unavailable; retry")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn submit(
    auth: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<SubmitOffPremisesBody>,
) -> actix_web::Result<impl Responder> {
    let body = body.into_inner();
    let request = state
        .attendance
        .submit_off_premises(
            &auth.caller(),
            body.punch.into(),
            body.device_info,
            body.reason,
            Utc::now(),
        )
        .await?;
    Ok(HttpResponse::Created().json(request))
}

/// Pending requests visible to the calling approver
#[utoipa::path(
    get,
    path = "/api/v1/offpremises/pending",
    responses(
        (status = 200, description = "Pending requests in the approver's scope", body = [OffPremisesRequest]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not an approver")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn list_pending(
    auth: AuthUser,
    state: web::Data<AppState>,
) -> actix_web::Result<impl Responder> {
    let requests = state.workflow.list_pending(&auth.caller()).await?;
    Ok(HttpResponse::Ok().json(requests))
}

#[utoipa::path(
    get,
    path = "/api/v1/offpremises/{request_id}",
    params(
        ("request_id" = u64, Path, description = "ID of the off-premises request")
    ),
    responses(
        (status = 200, description = "The request", body = OffPremisesRequest),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Neither the requester nor an approver in scope"),
        (status = 404, description = "No such request")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn get_request(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request = state.workflow.get(&auth.caller(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[utoipa::path(
    post,
    path = "/api/v1/offpremises/{request_id}/approve",
    params(
        ("request_id" = u64, Path, description = "ID of the request to approve")
    ),
    responses(
        (status = 200, description = "Approved; the linked record counts as present", body = OffPremisesRequest),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Wrong role or department"),
        (status = 404, description = "No such request"),
        (status = 409, description = "Request is not pending")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn approve(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request = state
        .workflow
        .approve(&auth.caller(), path.into_inner(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(request))
}

#[utoipa::path(
    post,
    path = "/api/v1/offpremises/{request_id}/reject",
    params(
        ("request_id" = u64, Path, description = "ID of the request to reject")
    ),
    request_body = RejectBody,
    responses(
        (status = 200, description = "Rejected", body = OffPremisesRequest),
        (status = 400, description = "Missing reason"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Wrong role or department"),
        (status = 404, description = "No such request"),
        (status = 409, description = "Request is not pending")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn reject(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
    body: web::Json<RejectBody>,
) -> actix_web::Result<impl Responder> {
    let request = state
        .workflow
        .reject(&auth.caller(), path.into_inner(), &body.reason, Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(request))
}

/// Undo an approval. The record it created is deleted and the request is
/// pending again.
#[utoipa::path(
    post,
    path = "/api/v1/offpremises/{request_id}/revert",
    params(
        ("request_id" = u64, Path, description = "ID of the approved request")
    ),
    responses(
        (status = 200, description = "Reverted to pending", body = OffPremisesRequest),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Wrong role or department"),
        (status = 404, description = "No such request"),
        (status = 409, description = "Request is not approved")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Off-premises"
)]
pub async fn revert(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request = state
        .workflow
        .revert(&auth.caller(), path.into_inner(), Utc::now())
        .await?;
    Ok(HttpResponse::Ok().json(request))
}
