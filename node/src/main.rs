use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use url::Url;

use stonerace_execution::{HttpGateway, Ledger, Memory, WithdrawalPipeline};
use stonerace_node::api::{Api, AppState};
use stonerace_node::config::NodeConfig;
use stonerace_node::coordinator::Coordinator;
use stonerace_node::reconciler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    config
        .board
        .validate()
        .context("invalid board configuration")?;

    // The deployment's persistence layer plugs in behind the Store trait;
    // the bundled store keeps everything in process.
    let store = Memory::new();
    let ledger = Ledger::new(store.clone());
    let base = Url::parse(&config.provider.base_url).context("invalid provider base url")?;
    let gateway = HttpGateway::new(base, config.provider.secret.clone());

    let coordinator = Coordinator::new(
        store.clone(),
        ledger.clone(),
        config.board.clone(),
        config.seed,
        Duration::from_millis(config.turn_timeout_ms),
        Duration::from_millis(config.evict_after_ms),
    );
    let pipeline = WithdrawalPipeline::new(
        store.clone(),
        ledger.clone(),
        gateway.clone(),
        config.review_attempts,
    );
    reconciler::spawn(
        pipeline.clone(),
        Duration::from_millis(config.reconcile_interval_ms),
    );

    let api = Api::new(AppState {
        coordinator,
        pipeline,
        ledger,
        store,
        gateway,
    });
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
