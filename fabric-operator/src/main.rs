//! Fabric operator binary: reconcilers plus the admission webhook server.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use fabric_operator::{
    admission::{self, WebhookState},
    config::Args,
    controller::{Context, Manager},
    logging, reconcilers,
    sdk::{FabricSdk, MockSdk},
    store::{MemoryStore, ObjectStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, &args.log_format);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("======================================");
    info!("  Fabric Operator");
    info!("======================================");
    info!("Operator: {}/{}", config.operator_namespace, config.operator_name);
    info!("Label prefix: {}", config.label_prefix);
    info!("Chaincode store: {}", config.store.display());
    info!("Webhooks: {}", config.webhook_listen);
    info!("Workers per kind: {}", config.workers_per_kind);
    info!("Backend: in-memory store, mock SDK (dev mode)");
    info!("======================================");

    let listen = config.webhook_listen;
    // Dev-only wiring; validation refuses to start without DEV_MODE.
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let sdk: Arc<dyn FabricSdk> = Arc::new(MockSdk::new());
    let ctx = Context::new(store, sdk, config);

    let manager = reconcilers::controllers(&ctx)
        .into_iter()
        .fold(Manager::new(ctx.clone()), Manager::register);
    let handle = manager.start().await;

    let state = Arc::new(WebhookState {
        ctx,
        router: admission::webhooks(),
    });
    let server = tokio::spawn(admission::server::run(listen, state));

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => info!("webhook server stopped"),
                Ok(Err(e)) => error!("webhook server failed: {}", e),
                Err(e) => error!("webhook server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    handle.shutdown().await;
    info!("Fabric operator stopped");
    Ok(())
}
