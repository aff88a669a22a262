//! Streamgate - debrid streaming gateway
//!
//! # Usage
//!
//! ```bash
//! # Run the server
//! STREAMGATE_DEBRID_TOKEN=... streamgate serve --listen 0.0.0.0:8974
//!
//! # One-shot diagnostics
//! streamgate resolve "magnet:?xt=urn:btih:..."
//! streamgate health
//! ```

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use streamgate::api::DebridClient;
use streamgate::cli::{Cli, Command};
use streamgate::config::Config;
use streamgate::models::Resolution;
use streamgate::server::{self, AppState};
use streamgate::stream::StreamResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streamgate=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut c = Config::load_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            c.apply_env_overrides();
            c
        }
        None => Config::load(),
    };
    if let Some(token) = &cli.token {
        config.debrid_token = Some(token.clone());
    }

    let token = config
        .debrid_token()
        .ok_or_else(|| {
            anyhow!("no debrid token configured (set STREAMGATE_DEBRID_TOKEN or the config file)")
        })?
        .to_string();

    let resolver = StreamResolver::new(DebridClient::new(token));

    match cli.command_or_default() {
        Command::Serve { listen } => {
            let state = Arc::new(AppState::new(&config, resolver));
            let app = server::router(Arc::clone(&state));

            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("binding {}", listen))?;
            tracing::info!(%listen, "streamgate listening");

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(server::shutdown_signal())
            .await?;

            // kill any encoder still running before the process exits
            state.transcoder.shutdown();
            Ok(())
        }
        Command::Resolve { magnet } => {
            match resolver.resolve(&magnet).await {
                Resolution::Ready(stream) => {
                    println!("ready: {} ({} bytes)", stream.filename, stream.size_bytes);
                    println!("{}", stream.direct_url);
                    Ok(())
                }
                Resolution::Processing { status } => {
                    println!("processing: debrid job is {}", status);
                    Ok(())
                }
                Resolution::Error(e) => Err(anyhow!("resolution failed: {}", e)),
            }
        }
        Command::Health => {
            let account = resolver
                .client()
                .account_status()
                .await
                .context("debrid health check failed")?;
            println!(
                "ok: {} ({} account)",
                account.username, account.account_type
            );
            Ok(())
        }
    }
}
