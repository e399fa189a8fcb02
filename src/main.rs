//! ke_backend server
//!
//! Serves the public site API, the admin API and the static frontend.
//! Configuration comes from the environment (a `.env` file is honored).
//!
//! Usage:
//!   cargo run --bin seed_content    # optional sample products/incentives
//!   cargo run --bin ke_backend      # start server
//!   cargo run --bin ke_backend -- set-admin-password -u admin -p <password>

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ke_backend::auth::AdminCredential;
use ke_backend::config::Config;
use ke_backend::rest::{create_router, AppState};

#[derive(Parser)]
#[command(name = "ke_backend", version, about = "Website backend: contacts, content and admin API")]
struct Cli {
    /// Overrides PORT
    #[arg(long)]
    port: Option<u16>,

    /// Overrides DATA_DIR
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Replace the admin credential and exit
    SetAdminPassword {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
}

/// Console output (plain or JSON via LOG_FORMAT=json), plus a daily rolling
/// JSON file when LOG_DIR is set. The guard must live as long as the process.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ke_backend=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let (file_layer, guard) = match std::env::var("LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "ke_backend.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    guard
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::SetAdminPassword { username, password } => {
            tokio::fs::create_dir_all(&config.data_dir).await?;
            let credential = AdminCredential::store(&config.data_dir, &username, &password).await?;
            info!(user = %credential.username, "admin credential updated");
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        %addr,
        data_dir = %config.data_dir.display(),
        uploads_dir = %config.uploads_dir.display(),
        production = config.production,
        "starting server"
    );

    let state = AppState::init(config).await?;
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C, shutting down"),
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
