use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opsbox_server::{App, AppConfig};

#[derive(Parser)]
#[command(name = "opsbox-server", about = "Operational knowledge retrieval service")]
struct Cli {
    /// Path of the YAML configuration file.
    #[arg(long, default_value = "opsbox.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the HTTP/JSON API.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
    /// Serve the line-delimited JSON tool protocol on stdin/stdout.
    Stdio,
}

#[tokio::main]
async fn main() {
    // Logs always go to stderr so the stdio ingress owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match AppConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "cannot load configuration");
            std::process::exit(2);
        }
    };

    let app = match App::build(config).await {
        Ok(app) => Arc::new(app),
        Err(err) => {
            error!(error = %err, "service failed to start");
            std::process::exit(1);
        }
    };

    let outcome = match cli.mode {
        Mode::Serve { listen } => serve_http(Arc::clone(&app), listen).await,
        Mode::Stdio => opsbox_server::stdio::run(Arc::clone(&app.dispatcher))
            .await
            .map_err(|e| e.to_string()),
    };

    app.shutdown().await;
    if let Err(err) = outcome {
        error!(error = %err, "ingress terminated with an error");
        std::process::exit(1);
    }
}

async fn serve_http(app: Arc<App>, listen: SocketAddr) -> Result<(), String> {
    let router = opsbox_server::http::router(app);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| format!("cannot bind {listen}: {e}"))?;
    info!(%listen, "http ingress ready");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| e.to_string())
}
