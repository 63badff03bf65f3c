mod common;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Router, body::Body};
use common::{CookieJar, PASSWORD, create_expiring_app, create_test_app, create_user, login};
use futures::future::BoxFuture;
use sessionwarden::client::{ClientError, RefreshMutex, SessionEndpoint, SessionSnapshot};
use sessionwarden::db::UserRole;

/// Talks to the in-process router the way a browser tab would.
struct RouterEndpoint {
    app: Router,
    jar: Mutex<CookieJar>,
    calls: AtomicUsize,
}

impl RouterEndpoint {
    fn new(app: Router, jar: CookieJar) -> Self {
        Self {
            app,
            jar: Mutex::new(jar),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SessionEndpoint for RouterEndpoint {
    fn fetch_session(&self) -> BoxFuture<'_, Result<SessionSnapshot, ClientError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let jar = self.jar.lock().unwrap().clone();
            let response = common::send(
                &self.app,
                common::request("GET", "/api/auth/session", &jar)
                    .body(Body::empty())
                    .map_err(|e| ClientError::Transport(e.to_string()))?,
            )
            .await;
            self.jar.lock().unwrap().absorb(&response);

            let status = response.status().as_u16();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            SessionSnapshot::from_response(status, &body)
        })
    }
}

#[tokio::test]
async fn test_fresh_login_needs_no_refresh() {
    let (app, db) = create_test_app().await;
    create_user(&db, "uuid-alice", "alice", UserRole::User).await;

    let mut jar = CookieJar::default();
    let (_, json) = login(&app, &mut jar, "alice", PASSWORD, true).await;

    let client = RefreshMutex::new(RouterEndpoint::new(app, jar));
    client.update_expiry(json["accessTokenExpires"].as_u64());

    assert!(client.ensure_valid_token().await);
    assert_eq!(client.endpoint().calls(), 0);
}

#[tokio::test]
async fn test_concurrent_callers_rotate_once() {
    let (app, db) = create_expiring_app().await;
    create_user(&db, "uuid-alice", "alice", UserRole::User).await;

    let mut jar = CookieJar::default();
    login(&app, &mut jar, "alice", PASSWORD, true).await;

    let client = RefreshMutex::new(RouterEndpoint::new(app, jar)).into_shared();
    let results = futures::future::join_all((0..5).map(|_| client.ensure_valid_token())).await;

    // One rotation served everyone; a second one would have replayed the
    // same refresh token and burned the family.
    assert!(results.iter().all(|ok| *ok));
    assert_eq!(client.endpoint().calls(), 1);
    assert_eq!(common::token_states(&db).await, vec!["rotated", "active"]);
}

#[tokio::test]
async fn test_terminal_session_reports_failure() {
    let (app, db) = create_expiring_app().await;
    create_user(&db, "uuid-alice", "alice", UserRole::User).await;

    let mut jar = CookieJar::default();
    login(&app, &mut jar, "alice", PASSWORD, false).await;

    let client = RefreshMutex::new(RouterEndpoint::new(app, jar));
    assert!(!client.force_refresh().await);
    assert_eq!(client.endpoint().calls(), 1);
}
