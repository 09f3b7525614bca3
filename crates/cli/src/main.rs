use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cc_broker::BrokerClient;
use cc_config::Config;
use cc_container::HttpContainerDriver;
use cc_node_proxy::NodeProxy;
use cc_scheduler::{NotificationHookConfig, Scheduler};
use cc_store::{InMemoryStore, Store};
use cc_types::Node;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "cc-agency", about = "Batch orchestrator: scheduler, node proxies, and secret broker client")]
struct Cli {
    /// Path to the YAML configuration file (spec.md §6).
    #[arg(long, env = "CC_AGENCY_CONFIG")]
    config: PathBuf,

    /// Overrides `RUST_LOG` when set; otherwise `tracing-subscriber` reads it from the
    /// environment.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::from_default_env(),
    };
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = Config::load(&cli.config)?;

    let store = Arc::new(InMemoryStore::new());
    let broker = BrokerClient::new(
        config.trustee.internal_url.clone(),
        config.trustee.username.clone(),
        config.trustee.password.clone(),
    )
    .context("failed to build secret broker client")?;

    let scheduler_wake = Arc::new(Notify::new());
    let image_prune_duration = std::time::Duration::from_secs(config.controller.docker.image_prune_duration);
    let allow_insecure_capabilities = config.controller.docker.allow_insecure_capabilities;

    let mut proxies = HashMap::new();
    let mut live_proxies = Vec::new();
    let mut join_handles = Vec::new();
    for (name, node) in &config.controller.docker.nodes {
        store
            .upsert_node(Node::new(name.clone()))
            .await
            .with_context(|| format!("failed to register node {name}"))?;

        let driver = Arc::new(
            HttpContainerDriver::new(node.base_url.clone())
                .with_context(|| format!("failed to build container driver for node {name}"))?,
        );
        let proxy = NodeProxy::new(
            name.clone(),
            driver,
            Arc::clone(&store) as _,
            broker.clone(),
            node.environment.clone(),
            node.network.clone(),
            node.hardware.gpu_blacklist.clone(),
            allow_insecure_capabilities,
            image_prune_duration,
            Arc::clone(&scheduler_wake),
        );
        join_handles.extend(proxy.spawn());
        live_proxies.push(Arc::clone(&proxy));
        proxies.insert(name.clone(), proxy);
    }

    let notification_hooks = config
        .controller
        .notification_hooks
        .iter()
        .map(|hook| NotificationHookConfig {
            url: hook.url.clone(),
            username: hook.auth.as_ref().map(|auth| auth.username.clone()),
            password: hook.auth.as_ref().map(|auth| auth.password.clone()),
        })
        .collect();

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store) as _,
        broker,
        proxies,
        notification_hooks,
        allow_insecure_capabilities,
        scheduler_wake,
    ));
    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run());

    info!(nodes = live_proxies.len(), "orchestrator started, waiting for ctrl-c");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested, letting in-flight container operations finish");

    scheduler.request_shutdown();
    for proxy in &live_proxies {
        proxy.request_shutdown();
    }

    let _ = scheduler_handle.await;
    for handle in join_handles {
        let _ = handle.await;
    }

    Ok(())
}
