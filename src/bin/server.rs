//! `chatcore-server`: wires the reference WebSocket transport, the
//! configured `StateStore` backend, and an in-process `ClusterBus` into one
//! running `ChatService`, per the composition the spec's §2 control-flow
//! paragraph describes. Startup/teardown CLI shape is out of scope (spec
//! §1), so this binary is deliberately thin.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatcore::config::{ConfigBuilder, StoreConfig};
use chatcore::state::{MemoryStateStore, SqliteStateStore, StateStore};

#[derive(Debug, Parser)]
#[command(name = "chatcore-server", version, about = "Multi-tenant chat service core")]
struct Cli {
    /// Path to a TOML config file layered over the built-in defaults.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let mut builder = ConfigBuilder::new().with_defaults();
    if let Some(path) = &cli.config {
        builder = builder.with_file(path)?;
    }
    let config = Arc::new(builder.with_environment()?.build());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(namespace = %config.namespace, "starting chatcore");

    match &config.store {
        StoreConfig::Memory => run(Arc::new(MemoryStateStore::new()), config).await,
        StoreConfig::Sqlite { database_url } => {
            let store = Arc::new(SqliteStateStore::connect(database_url).await?);
            run(store, config).await
        }
    }
}

async fn run<S: StateStore + 'static>(
    store: Arc<S>,
    config: Arc<chatcore::ServiceConfig>,
) -> color_eyre::Result<()> {
    let transport = chatcore::transport::WsTransport::new();
    let cluster = chatcore::cluster_bus::LocalClusterBus::new(transport.clone(), config.bus_ack_timeout());
    let hooks = chatcore::hooks::HookRegistry::new();
    let service = chatcore::ChatService::new(store, transport.clone(), cluster, hooks, config.clone());
    service.attach(&transport).await;

    let addr = config.transport.bind_addr.parse()?;
    let shutdown = shutdown_signal();
    tokio::select! {
        result = transport.serve(addr) => result.map_err(Into::into),
        _ = shutdown => {
            tracing::info!("shutdown signal received");
            service.close().await;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
