mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{CRON_SECRET, create_test_app, create_user, json_body, send};
use sessionwarden::clock::unix_now;
use sessionwarden::db::UserRole;

fn cleanup_request(method: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/api/cron/cleanup-tokens");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_cleanup_requires_secret() {
    let (app, _db) = create_test_app().await;

    let response = send(&app, cleanup_request("POST", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, cleanup_request("POST", Some("Bearer wrong"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_cleanup_deletes_stale_tokens() {
    let (app, db) = create_test_app().await;
    let user_id = create_user(&db, "uuid-alice", "alice", UserRole::User).await;

    let store = db.refresh_tokens();
    let now = unix_now();
    // Expired long ago.
    store.create_family(user_id, now - 30 * 86400, 86400).await.unwrap();
    // Revoked recently: kept for the retention window.
    let recent = store.create_family(user_id, now, 86400).await.unwrap();
    store.revoke_family(&recent.family_id, now).await.unwrap();
    // Live.
    store.create_family(user_id, now, 86400).await.unwrap();

    let auth = format!("Bearer {}", CRON_SECRET);
    let response = send(&app, cleanup_request("GET", Some(&auth))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["deletedCount"], 1);
    assert!(json["executedAt"].as_str().unwrap().ends_with('Z'));
    assert_eq!(common::token_states(&db).await, vec!["revoked", "active"]);

    // Running again finds nothing more.
    let response = send(&app, cleanup_request("POST", Some(&auth))).await;
    let json = json_body(response).await;
    assert_eq!(json["deletedCount"], 0);
}

#[tokio::test]
async fn test_cleanup_disabled_without_secret() {
    let db = sessionwarden::db::Database::open(":memory:").await.unwrap();
    let mut config = common::test_config(db, Default::default());
    config.cron_secret = None;
    let app = sessionwarden::create_app(&config);

    let response = send(&app, cleanup_request("POST", Some("Bearer "))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
