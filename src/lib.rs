pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod clock;
pub mod db;
pub mod jwt;
pub mod password;
pub mod presence;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use auth::{EdgeGate, GateState, edge_gate};
use axum::{Router, middleware, routing::get};
use db::Database;
use jwt::AccessTokenCodec;
use presence::PresenceCodec;
use rate_limit::RateLimitConfig;
use session::{SessionConfig, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Secret the presence cookie key is derived from
    pub session_secret: Vec<u8>,
    /// Bearer secret for the cron cleanup endpoint; None disables it
    pub cron_secret: Option<Arc<str>>,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    pub session: SessionConfig,
    /// Time between background cleanup runs
    pub cleanup_interval: Duration,
}

impl ServerConfig {
    /// Build the session manager shared by the API and the gate.
    pub fn session_manager(&self) -> SessionManager {
        let codec =
            AccessTokenCodec::new(&self.jwt_secret).with_max_age(self.session.refresh_ttl);
        let presence = PresenceCodec::new(&self.session_secret);
        SessionManager::new(self.db.clone(), codec, presence, self.session.clone())
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_app_with(config, Router::new())
}

/// Create the application router with additional protected routes.
/// `routes` sit behind the edge gate like everything else; paths under
/// `/admin` require the admin role.
pub fn create_app_with(config: &ServerConfig, routes: Router) -> Router {
    let sessions = config.session_manager();

    let api_router = create_api_router(
        sessions.clone(),
        config.secure_cookies,
        config.cron_secret.clone(),
        Arc::new(RateLimitConfig::new()),
    );

    let gate_state = GateState {
        sessions,
        gate: Arc::new(EdgeGate::default()),
        secure_cookies: config.secure_cookies,
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api_router)
        .merge(routes)
        .layer(middleware::from_fn_with_state(gate_state, edge_gate))
}

/// Run cleanup once and spawn the background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(&config.db, config.session.retention).await;
    cleanup::spawn_cleanup_scheduler(
        config.db.clone(),
        config.session.retention,
        config.cleanup_interval,
    );
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
