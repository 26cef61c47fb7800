use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{
    App,
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    http::StatusCode,
    test,
    web::Data,
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use hrm_attendance::auth::jwt::generate_access_token;
use hrm_attendance::config::Config;
use hrm_attendance::model::{
    location::{AssignedLocation, Coordinate},
    role::Role,
    staff::StaffProfile,
};
use hrm_attendance::routes;
use hrm_attendance::service::notify::{NotificationKind, RecordingSink};
use hrm_attendance::state::AppState;
use hrm_attendance::store::MemoryStore;
use hrm_attendance::utils::geo;

const SECRET: &str = "integration-secret";
const STAFF: u64 = 10;
const HEAD: u64 = 20;
const OTHER_HEAD: u64 = 21;
const ADMIN: u64 = 1;

struct TestEnv {
    state: Data<AppState>,
    config: Config,
    notes: Arc<RecordingSink>,
}

fn office() -> AssignedLocation {
    AssignedLocation {
        id: 1,
        name: "Head Office".into(),
        coordinate: Coordinate::new(23.7806, 90.4070),
    }
}

async fn env() -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    for (user_id, role, department_id) in [
        (STAFF, Role::Staff, Some(1)),
        (HEAD, Role::DepartmentHead, Some(1)),
        (OTHER_HEAD, Role::DepartmentHead, Some(2)),
        (ADMIN, Role::Admin, None),
    ] {
        store
            .put_staff(StaffProfile {
                user_id,
                role,
                department_id,
                assigned_location: Some(office()),
            })
            .await;
    }

    let config = Config::with_defaults("127.0.0.1:0", "mysql://unused", SECRET);
    let notes = Arc::new(RecordingSink::new());
    let state = AppState::new(&config.core, store, notes.clone()).unwrap();
    TestEnv {
        state: Data::from(state),
        config,
        notes,
    }
}

fn app(
    state: Data<AppState>,
    config: Config,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(state)
        .app_data(Data::new(config.clone()))
        .configure(move |cfg| routes::configure(cfg, config))
}

fn bearer(user_id: u64, role: Role, department_id: Option<u64>) -> (&'static str, String) {
    let token = generate_access_token(
        user_id,
        format!("user{user_id}"),
        role.id(),
        department_id,
        SECRET,
        3600,
    )
    .unwrap();
    ("Authorization", format!("Bearer {token}"))
}

fn staff() -> (&'static str, String) {
    bearer(STAFF, Role::Staff, Some(1))
}

fn head() -> (&'static str, String) {
    bearer(HEAD, Role::DepartmentHead, Some(1))
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn punch(meters_north: f64) -> Value {
    let c = geo::offset_north(office().coordinate, meters_north);
    json!({
        "location": {
            "coordinate": { "latitude": c.latitude, "longitude": c.longitude },
            "accuracy_m": 8.0
        },
        "device_class": "mobile"
    })
}

fn post(uri: &str, auth: (&'static str, String), body: Value) -> test::TestRequest {
    test::TestRequest::post()
        .uri(uri)
        .peer_addr(peer())
        .insert_header(auth)
        .set_json(body)
}

fn get(uri: &str, auth: (&'static str, String)) -> test::TestRequest {
    test::TestRequest::get()
        .uri(uri)
        .peer_addr(peer())
        .insert_header(auth)
}

#[actix_web::test]
async fn requests_without_token_are_unauthorized() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/attendance/today")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "authentication_error");
}

#[actix_web::test]
async fn on_site_check_in_then_duplicate() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let resp = test::call_service(&app, post("/api/v1/attendance/checkin", staff(), punch(350.0)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "checked_in");
    assert_eq!(body["record"]["approval_status"], "normal");

    let resp = test::call_service(&app, post("/api/v1/attendance/checkin", staff(), punch(10.0)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "duplicate_session");
    assert!(body["error"]["existing_check_in_time"].is_string());
}

#[actix_web::test]
async fn off_site_flow_through_approval_and_checkout() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let resp = test::call_service(&app, post("/api/v1/attendance/checkin", staff(), punch(800.0)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "off_premises_required");

    let mut submit = punch(800.0);
    submit["reason"] = json!("Client site visit");
    let resp = test::call_service(&app, post("/api/v1/offpremises/submit", staff(), submit).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let request: Value = test::read_body_json(resp).await;
    let id = request["id"].as_u64().unwrap();
    assert_eq!(request["status"], "pending");

    // checkout is blocked until someone approves
    let resp = test::call_service(&app, post("/api/v1/attendance/checkout", staff(), punch(800.0)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "not_approved");

    let resp = test::call_service(&app, get("/api/v1/offpremises/pending", head()).to_request()).await;
    let pending: Value = test::read_body_json(resp).await;
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    let resp = test::call_service(&app, post(&format!("/api/v1/offpremises/{id}/approve"), head(), json!({})).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let approved: Value = test::read_body_json(resp).await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["approved_by_id"], HEAD);

    let resp = test::call_service(&app, post("/api/v1/attendance/checkout", staff(), punch(800.0)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let record: Value = test::read_body_json(resp).await;
    assert_eq!(record["approval_status"], "approved_offpremises");
    assert!(record["work_hours"].is_number());

    let kinds: Vec<NotificationKind> = env.notes.sent().iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::Submitted));
    assert!(kinds.contains(&NotificationKind::Approved));
}

#[actix_web::test]
async fn head_of_other_department_is_forbidden() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let resp = test::call_service(&app, post("/api/v1/offpremises/submit", staff(), punch(900.0)).to_request()).await;
    let request: Value = test::read_body_json(resp).await;
    let id = request["id"].as_u64().unwrap();

    let other = bearer(OTHER_HEAD, Role::DepartmentHead, Some(2));
    let resp = test::call_service(&app, post(&format!("/api/v1/offpremises/{id}/approve"), other, json!({})).to_request()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "authorization_error");

    let resp = test::call_service(&app, get(&format!("/api/v1/offpremises/{id}"), staff()).to_request()).await;
    let current: Value = test::read_body_json(resp).await;
    assert_eq!(current["status"], "pending");
}

#[actix_web::test]
async fn approve_revert_round_trip_leaves_no_record() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;
    let admin = || bearer(ADMIN, Role::Admin, None);

    let resp = test::call_service(&app, post("/api/v1/offpremises/submit", staff(), punch(900.0)).to_request()).await;
    let request: Value = test::read_body_json(resp).await;
    let id = request["id"].as_u64().unwrap();

    let resp = test::call_service(&app, post(&format!("/api/v1/offpremises/{id}/approve"), admin(), json!({})).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, post(&format!("/api/v1/offpremises/{id}/revert"), admin(), json!({})).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reverted: Value = test::read_body_json(resp).await;
    assert_eq!(reverted["status"], "pending");
    assert!(reverted["linked_attendance_record_id"].is_null());

    let resp = test::call_service(&app, get("/api/v1/attendance/today", staff()).to_request()).await;
    let today: Value = test::read_body_json(resp).await;
    assert!(today["record"].is_null());
    assert_eq!(today["pending_request"]["id"], id);

    // a second revert has nothing to undo
    let resp = test::call_service(&app, post(&format!("/api/v1/offpremises/{id}/revert"), admin(), json!({})).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "invalid_state_transition");
}

#[actix_web::test]
async fn reject_requires_reason_and_approver() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let resp = test::call_service(&app, post("/api/v1/offpremises/submit", staff(), punch(900.0)).to_request()).await;
    let request: Value = test::read_body_json(resp).await;
    let id = request["id"].as_u64().unwrap();
    let uri = format!("/api/v1/offpremises/{id}/reject");

    let resp = test::call_service(&app, post(&uri, staff(), json!({ "reason": "self" })).to_request()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(&app, post(&uri, head(), json!({ "reason": "" })).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(&app, post(&uri, head(), json!({ "reason": "Not scheduled" })).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rejected: Value = test::read_body_json(resp).await;
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejection_reason"], "Not scheduled");
}

#[actix_web::test]
async fn device_radius_update_is_admin_only_and_all_or_nothing() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;
    let uri = "/api/v1/settings/device-radius";
    let admin = || bearer(ADMIN, Role::Admin, None);

    let batch = json!({ "settings": [
        { "device_class": "mobile", "check_in_radius_m": 300.0, "check_out_radius_m": 300.0 },
        { "device_class": "laptop", "check_in_radius_m": 6000.0, "check_out_radius_m": 700.0 }
    ]});

    let req = test::TestRequest::put().uri(uri).peer_addr(peer()).insert_header(staff()).set_json(&batch).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::put().uri(uri).peer_addr(peer()).insert_header(admin()).set_json(&batch).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "validation_error");

    let resp = test::call_service(&app, get(uri, staff()).to_request()).await;
    let current: Value = test::read_body_json(resp).await;
    let mobile = current["settings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["device_class"] == "mobile")
        .cloned()
        .unwrap();
    assert_eq!(mobile["check_in_radius_m"], 400.0);

    let ok = json!({ "settings": [
        { "device_class": "mobile", "check_in_radius_m": 900.0, "check_out_radius_m": 900.0 }
    ]});
    let req = test::TestRequest::put().uri(uri).peer_addr(peer()).insert_header(admin()).set_json(&ok).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    // 800 m is now inside the mobile geofence
    let resp = test::call_service(&app, post("/api/v1/attendance/checkin", staff(), punch(800.0)).to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "checked_in");
}

#[actix_web::test]
async fn location_samples_feed_presence_status() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let resp = test::call_service(&app, get("/api/v1/location/status", staff()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let start = Utc::now();
    let samples: Vec<Value> = (0..5)
        .map(|i| {
            let c = geo::offset_north(office().coordinate, 40.0 * i as f64);
            json!({
                "coordinate": { "latitude": c.latitude, "longitude": c.longitude },
                "accuracy_m": 10.0 - i as f64,
                "timestamp": start + Duration::seconds(i)
            })
        })
        .collect();
    let resp = test::call_service(
        &app,
        post("/api/v1/location/samples", staff(), json!({ "device_class": "mobile", "samples": samples })).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let result: Value = test::read_body_json(resp).await;
    assert_eq!(result["accepted"], 5);
    assert_eq!(result["batches_flushed"], 1);

    let resp = test::call_service(&app, get("/api/v1/location/status", staff()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let status: Value = test::read_body_json(resp).await;
    assert_eq!(status["classification"]["proximity"], "on_site");
    assert_eq!(status["samples_in_batch"], 5);
}

#[actix_web::test]
async fn malformed_coordinates_are_rejected() {
    let env = env().await;
    let app = test::init_service(app(env.state.clone(), env.config.clone())).await;

    let body = json!({
        "location": { "coordinate": { "latitude": 123.0, "longitude": 90.0 } },
        "device_class": "mobile"
    });
    let resp = test::call_service(&app, post("/api/v1/attendance/checkin", staff(), body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "validation_error");
}
