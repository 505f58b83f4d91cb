//! HTTP-level tests: every request goes through the full router.

use axum::body::Bytes;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use alexandria::api::{self, AppState};
use alexandria::config::Config;
use alexandria::db::{create_test_pool, migrations};
use alexandria::services::payment::{sign_payload, SIGNATURE_HEADER};

const SECRET: &str = "whsec_integration";

async fn server() -> TestServer {
    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();

    let mut config = Config::default();
    config.payments.platform_fee_percent = 15.0;
    config.payments.webhook_secret = SECRET.to_string();
    config.payments.min_payout = 1_000;

    let app = api::build_router(AppState::new(pool, config), "*");
    TestServer::new(app).unwrap()
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

/// Register and return the session token
async fn register(server: &TestServer, username: &str, role: &str) -> String {
    let response = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "correct horse",
            "role": role,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn signed_webhook(server: &TestServer, body: Value) -> axum_test::TestResponse {
    let raw = serde_json::to_vec(&body).unwrap();
    let signature = sign_payload(SECRET, &raw).unwrap();
    server
        .post("/api/v1/webhooks/payments")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .content_type("application/json")
        .bytes(Bytes::from(raw))
        .await
}

/// Educator with one published paid course; returns (admin, educator,
/// learner) tokens and the course id
async fn marketplace(server: &TestServer, price: i64) -> (String, String, String, i64) {
    let admin = register(server, "root", "learner").await;
    let educator = register(server, "prof_ada", "educator").await;
    let learner = register(server, "student", "learner").await;

    let course = server
        .post("/api/v1/courses")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .json(&json!({ "title": "Ownership in depth", "price": price }))
        .await;
    course.assert_status(StatusCode::CREATED);
    let course_id = course.json::<Value>()["id"].as_i64().unwrap();

    server
        .post(&format!("/api/v1/courses/{}/publish", course_id))
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .await
        .assert_status_ok();

    (admin, educator, learner, course_id)
}

#[tokio::test]
async fn health_reports_database() {
    let server = server().await;
    let response = server.get("/api/v1/health").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["driver"], "sqlite");
}

#[tokio::test]
async fn first_user_is_admin_and_duplicates_conflict() {
    let server = server().await;

    let first = server
        .post("/api/v1/auth/register")
        .json(&json!({ "username": "founder", "email": "f@example.com", "password": "long enough" }))
        .await;
    first.assert_status(StatusCode::CREATED);
    assert_eq!(first.json::<Value>()["user"]["role"], "admin");

    let duplicate = server
        .post("/api/v1/auth/register")
        .json(&json!({ "username": "founder", "email": "other@example.com", "password": "long enough" }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    assert_eq!(duplicate.json::<Value>()["error"]["code"], "CONFLICT");

    let invalid = server
        .post("/api/v1/auth/register")
        .json(&json!({ "username": "x!", "email": "x@example.com", "password": "long enough" }))
        .await;
    invalid.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(invalid.json::<Value>()["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn login_me_and_logout() {
    let server = server().await;
    register(&server, "reader", "learner").await;

    server
        .post("/api/v1/auth/login")
        .json(&json!({ "username_or_email": "reader", "password": "wrong password" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let login = server
        .post("/api/v1/auth/login")
        .json(&json!({ "username_or_email": "reader@example.com", "password": "correct horse" }))
        .await;
    login.assert_status_ok();
    let token = login.json::<Value>()["token"].as_str().unwrap().to_string();

    let me = server
        .get("/api/v1/auth/me")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    me.assert_status_ok();
    assert_eq!(me.json::<Value>()["username"], "reader");

    server
        .post("/api/v1/auth/logout")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let after = server
        .get("/api/v1/auth/me")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    after.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(after.json::<Value>()["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn session_cookie_authenticates() {
    let server = server().await;
    let token = register(&server, "cookie_user", "learner").await;

    server
        .get("/api/v1/auth/me")
        .add_header(
            header::COOKIE,
            HeaderValue::from_str(&format!("session={}", token)).unwrap(),
        )
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn follow_rules() {
    let server = server().await;
    let alice = register(&server, "alice", "learner").await;
    register(&server, "bob", "learner").await;

    server
        .post("/api/v1/follow/bob")
        .add_header(header::AUTHORIZATION, bearer(&alice))
        .await
        .assert_status(StatusCode::CREATED);
    server
        .post("/api/v1/follow/bob")
        .add_header(header::AUTHORIZATION, bearer(&alice))
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .post("/api/v1/follow/alice")
        .add_header(header::AUTHORIZATION, bearer(&alice))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .post("/api/v1/follow/nobody")
        .add_header(header::AUTHORIZATION, bearer(&alice))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let counts = server.get("/api/v1/users/bob/counts").await;
    counts.assert_status_ok();
    assert_eq!(counts.json::<Value>()["followers"], 1);

    let relationship = server
        .get("/api/v1/users/bob/relationship")
        .add_header(header::AUTHORIZATION, bearer(&alice))
        .await;
    relationship.assert_status_ok();
    assert_eq!(relationship.json::<Value>()["following"], true);

    server
        .post("/api/v1/follow/bob")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn library_approval_needs_five_items() {
    let server = server().await;
    let admin = register(&server, "curator", "learner").await;
    let owner = register(&server, "owner", "learner").await;

    let created = server
        .post("/api/v1/libraries")
        .add_header(header::AUTHORIZATION, bearer(&owner))
        .json(&json!({ "title": "Systems reading list" }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let id = created.json::<Value>()["id"].as_i64().unwrap();

    // Pending libraries stay hidden from the public
    server
        .get(&format!("/api/v1/libraries/{}", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let too_early = server
        .post(&format!("/api/v1/admin/libraries/{}/approve", id))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    too_early.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(too_early.json::<Value>()["error"]["code"], "UNPROCESSABLE");

    for n in 1..=5 {
        server
            .post(&format!("/api/v1/libraries/{}/items", id))
            .add_header(header::AUTHORIZATION, bearer(&owner))
            .json(&json!({ "content_type": "course", "content_id": n, "title": format!("Course {}", n) }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    server
        .post(&format!("/api/v1/admin/libraries/{}/approve", id))
        .add_header(header::AUTHORIZATION, bearer(&owner))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let approved = server
        .post(&format!("/api/v1/admin/libraries/{}/approve", id))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    approved.assert_status_ok();
    assert_eq!(approved.json::<Value>()["approval_status"], "approved");

    let public = server.get(&format!("/api/v1/libraries/{}", id)).await;
    public.assert_status_ok();
    assert_eq!(public.json::<Value>()["items"].as_array().unwrap().len(), 5);

    let points = server
        .get("/api/v1/points")
        .add_header(header::AUTHORIZATION, bearer(&owner))
        .await;
    points.assert_status_ok();
    // daily login 5 + create 10 + five items 5 + approval 50
    assert_eq!(points.json::<Value>()["points"], 70);
}

#[tokio::test]
async fn checkout_is_idempotent_and_webhook_settles() {
    let server = server().await;
    let (admin, educator, learner, course_id) = marketplace(&server, 10_000).await;

    let first = server
        .post(&format!("/api/v1/courses/{}/checkout", course_id))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await;
    first.assert_status(StatusCode::CREATED);
    let checkout = first.json::<Value>();
    let reference = checkout["reference"].as_str().unwrap().to_string();
    assert_eq!(checkout["status"], "pending");
    assert_eq!(checkout["splits"].as_array().unwrap().len(), 2);

    let again = server
        .post(&format!("/api/v1/courses/{}/checkout", course_id))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await;
    again.assert_status_ok();
    assert_eq!(again.json::<Value>()["reference"], reference.as_str());

    let event = json!({
        "event": "charge.success",
        "id": "evt_001",
        "data": { "reference": reference, "amount": 10_000 }
    });

    server
        .post("/api/v1/webhooks/payments")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_static("deadbeef"),
        )
        .json(&event)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let processed = signed_webhook(&server, event.clone()).await;
    processed.assert_status_ok();
    let ack = processed.json::<Value>();
    assert_eq!(ack["status"], "processed");
    assert_eq!(ack["outcome"], "applied");
    assert_eq!(ack["transaction_status"], "success");
    assert_eq!(ack["duplicate"], false);

    let replay = signed_webhook(&server, event).await;
    replay.assert_status_ok();
    assert_eq!(replay.json::<Value>()["duplicate"], true);

    let earnings = server
        .get("/api/v1/educator/earnings")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .await;
    earnings.assert_status_ok();
    let summary = earnings.json::<Value>();
    assert_eq!(summary["earned"], 8_500);
    assert_eq!(summary["available"], 8_500);

    server
        .get("/api/v1/educator/earnings")
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let overview = server
        .get("/api/v1/admin/analytics/overview")
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    overview.assert_status_ok();
    let overview = overview.json::<Value>();
    assert_eq!(overview["revenue"]["gross"], 10_000);
    assert_eq!(overview["revenue"]["platform"], 1_500);
    assert_eq!(overview["users"]["total"], 3);

    // Enrolled now, so a second purchase conflicts
    server
        .post(&format!("/api/v1/courses/{}/checkout", course_id))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn webhook_ignores_unknown_events_and_references() {
    let server = server().await;

    let unknown_type = signed_webhook(
        &server,
        json!({ "event": "transfer.success", "data": { "reference": "ALX-x" } }),
    )
    .await;
    unknown_type.assert_status_ok();
    assert_eq!(unknown_type.json::<Value>()["status"], "ignored");

    let unknown_reference = signed_webhook(
        &server,
        json!({ "event": "charge.success", "data": { "reference": "ALX-missing", "amount": 1 } }),
    )
    .await;
    unknown_reference.assert_status_ok();
    assert_eq!(unknown_reference.json::<Value>()["status"], "ignored");
}

#[tokio::test]
async fn admin_verify_rejects_amount_mismatch_then_refund() {
    let server = server().await;
    let (admin, _educator, learner, course_id) = marketplace(&server, 5_000).await;

    let checkout = server
        .post(&format!("/api/v1/courses/{}/checkout", course_id))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await;
    let reference = checkout.json::<Value>()["reference"].as_str().unwrap().to_string();

    let mismatch = server
        .post(&format!("/api/v1/admin/payments/{}/verify", reference))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "amount": 4_000 }))
        .await;
    mismatch.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(mismatch.json::<Value>()["error"]["details"]["expected"], 5_000);

    let verified = server
        .post(&format!("/api/v1/admin/payments/{}/verify", reference))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "amount": 5_000 }))
        .await;
    verified.assert_status_ok();
    assert_eq!(verified.json::<Value>()["transaction_status"], "success");

    let refunded = server
        .post(&format!("/api/v1/admin/payments/{}/refund", reference))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .json(&json!({ "reason": "requested by learner" }))
        .await;
    refunded.assert_status_ok();
    assert_eq!(refunded.json::<Value>()["transaction_status"], "refunded");

    let detail = server
        .get(&format!("/api/v1/payments/{}", reference))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await;
    detail.assert_status_ok();
    let detail = detail.json::<Value>();
    assert_eq!(detail["status"], "refunded");
    assert!(detail["splits"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == "refunded"));

    // A refunded transaction cannot be cancelled
    server
        .post(&format!("/api/v1/payments/{}/cancel", reference))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn preview_split_uses_configured_fee() {
    let server = server().await;

    let preview = server
        .post("/api/v1/payment-splits/preview")
        .json(&json!({ "amount": 999 }))
        .await;
    preview.assert_status_ok();
    let split = preview.json::<Value>();
    assert_eq!(split["platform_fee"], 150);
    assert_eq!(split["educator_amount"], 849);
    assert_eq!(split["currency"], "NGN");

    server
        .post("/api/v1/payment-splits/preview")
        .json(&json!({ "amount": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payout_request_and_approval() {
    let server = server().await;
    let (admin, educator, learner, course_id) = marketplace(&server, 20_000).await;

    let checkout = server
        .post(&format!("/api/v1/courses/{}/checkout", course_id))
        .add_header(header::AUTHORIZATION, bearer(&learner))
        .await;
    let reference = checkout.json::<Value>()["reference"].as_str().unwrap().to_string();
    signed_webhook(
        &server,
        json!({ "event": "charge.success", "data": { "reference": reference, "amount": 20_000 } }),
    )
    .await
    .assert_status_ok();

    // 85% of 20 000 is available
    server
        .post("/api/v1/educator/payouts")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .json(&json!({ "amount": 17_001 }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let requested = server
        .post("/api/v1/educator/payouts")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .json(&json!({ "amount": 10_000 }))
        .await;
    requested.assert_status(StatusCode::CREATED);
    let payout_id = requested.json::<Value>()["id"].as_i64().unwrap();

    server
        .post("/api/v1/educator/payouts")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .json(&json!({ "amount": 2_000 }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let paid = server
        .post(&format!("/api/v1/admin/payouts/{}/approve", payout_id))
        .add_header(header::AUTHORIZATION, bearer(&admin))
        .await;
    paid.assert_status_ok();
    assert_eq!(paid.json::<Value>()["status"], "paid");

    let summary = server
        .get("/api/v1/educator/earnings")
        .add_header(header::AUTHORIZATION, bearer(&educator))
        .await
        .json::<Value>();
    assert_eq!(summary["paid_out"], 10_000);
    assert_eq!(summary["available"], 7_000);
}
