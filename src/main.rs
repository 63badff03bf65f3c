use clap::Parser;
use sessionwarden::cli::{
    Args, build_config, handle_create_admin, init_logging, load_cron_secret, load_secret,
    open_database,
};
use sessionwarden::{init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_secret("JWT_SECRET", args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };
    let Some(session_secret) = load_secret("SESSION_SECRET", args.session_secret_file.as_deref())
    else {
        std::process::exit(1);
    };
    let cron_secret = load_cron_secret();

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(login_id) = args.create_admin.as_deref() {
        handle_create_admin(&db, login_id).await;
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "Failed to get local address");
            std::process::exit(1);
        }
    };

    let config = build_config(&args, db, jwt_secret, session_secret, cron_secret);
    init_cleanup(&config).await;

    info!(address = %local_addr, "Listening");

    #[cfg(feature = "test-mode")]
    println!("SESSIONWARDEN_READY port={}", local_addr.port());

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
