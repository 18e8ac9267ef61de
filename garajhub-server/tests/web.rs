//! Dashboard API tests, driving the router in-process.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use garajhub_server::db::Db;
use garajhub_server::moderation::types::StartupDraft;
use garajhub_server::moderation::{Coordinator, CoordinatorConfig};
use garajhub_server::notify::LogNotifier;
use garajhub_server::web::{AppState, router};

const ADMIN: i64 = 1;
const OWNER: i64 = 10;

fn app() -> (Router, Arc<Coordinator>) {
    let db = Arc::new(Db::open_memory().unwrap());
    let config = CoordinatorConfig {
        admin_id: ADMIN,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(db, Arc::new(LogNotifier), config));
    coordinator.seed_admin().unwrap();
    coordinator.register_user(OWNER, "owner", "Owner").unwrap();
    let app = router(Arc::new(AppState::new(coordinator.clone())));
    (app, coordinator)
}

async fn submit(coordinator: &Coordinator, name: &str) -> i64 {
    coordinator
        .submit_for_review(StartupDraft {
            owner_id: OWNER,
            name: name.into(),
            description: "d".into(),
            logo: Some("l".into()),
            group_link: "https://t.me/x".into(),
        })
        .await
        .unwrap()
        .startup_id
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, session: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, format!("session_id={session}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, session: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn login(app: &Router) -> String {
    let (status, body) = send(app, post("/api/login", "", json!({ "user_id": ADMIN }))).await;
    assert_eq!(status, StatusCode::OK);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_needs_no_session() {
    let (app, _) = app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_sets_cookie() {
    let (app, _) = app();
    let resp = app
        .clone()
        .oneshot(post("/api/login", "", json!({ "user_id": ADMIN })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("session_id="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn non_admin_cannot_log_in() {
    let (app, _) = app();
    let (status, body) = send(&app, post("/api/login", "", json!({ "user_id": OWNER }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn api_requires_a_session() {
    let (app, _) = app();
    let req = Request::builder().uri("/api/stats").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, get("/api/stats", "not-a-session")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (app, _) = app();
    let session = login(&app).await;
    let (status, _) = send(&app, post("/api/logout", &session, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get("/api/stats", &session)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stats_and_paging() {
    let (app, coordinator) = app();
    for name in ["A", "B", "C"] {
        submit(&coordinator, name).await;
    }
    let session = login(&app).await;

    let (status, body) = send(&app, get("/api/stats", &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total_users"], 2);
    assert_eq!(body["pending_startups"], 3);

    let (status, body) = send(&app, get("/api/startups?status=pending&page=2&per_page=2", &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 2);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, get("/api/startups?status=bogus", &session)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = send(&app, get("/api/users", &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn approve_then_conflict() {
    let (app, coordinator) = app();
    let sid = submit(&coordinator, "Acme").await;
    let session = login(&app).await;

    let uri = format!("/api/startup/{sid}/approve");
    let (status, body) = send(&app, post(&uri, &session, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["startup"]["status"], "active");

    let (status, body) = send(&app, post(&uri, &session, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let reject = format!("/api/startup/{sid}/reject");
    let (status, _) = send(&app, post(&reject, &session, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, get(&format!("/api/startup/{sid}"), &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["member_count"], 0);

    let (status, _) = send(&app, get("/api/startup/999", &session)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn broadcast_reports_counts() {
    let (app, _) = app();
    let session = login(&app).await;

    let (status, body) = send(
        &app,
        post("/api/broadcast", &session, json!({ "message": "Demo day" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 2);
    assert_eq!(body["sent"], 2);
    assert_eq!(body["failed"], 0);

    let (status, _) = send(&app, post("/api/broadcast", &session, json!({ "message": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn huge_page_numbers_read_as_empty() {
    let (app, coordinator) = app();
    submit(&coordinator, "Acme").await;
    let session = login(&app).await;

    let uri = format!("/api/startups?status=all&page={}&per_page=10", i64::MAX);
    let (status, body) = send(&app, get(&uri, &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert!(body["data"].as_array().unwrap().is_empty());

    let uri = format!("/api/users?page={}&per_page=100", i64::MAX / 50);
    let (status, body) = send(&app, get(&uri, &session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert!(body["data"].as_array().unwrap().is_empty());
}
