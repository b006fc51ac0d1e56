//! Tiered database proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   client session ──▶ routing (classifier + affinity) ──▶ PoolManager
//!                                                          │
//!                                     ┌────────────────────┴────────────────────┐
//!                                     ▼                                         ▼
//!                              admin tier pool                          readonly tier pool
//!                                     │                                         │
//!                                     ▼                                         ▼
//!                              primary endpoints                        replica endpoints
//!
//!   discovery feed ─┐
//!   config watcher ─┼──▶ topology channel ──▶ Coordinator ──▶ PoolManager::apply_topology
//!   admin API ──────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use tier_proxy::admin::{setup_admin_router, AdminState};
use tier_proxy::auth::UserList;
use tier_proxy::backend::TcpConnector;
use tier_proxy::config::watcher::forward_endpoint_changes;
use tier_proxy::config::{load_config, ConfigWatcher};
use tier_proxy::lifecycle::{wait_for_termination, Shutdown};
use tier_proxy::observability::{init_logging, init_metrics};
use tier_proxy::session::SessionRegistry;
use tier_proxy::topology::{Coordinator, DiscoveryFeed};
use tier_proxy::{PoolManager, Tier, TopologyEvent};

#[derive(Parser)]
#[command(name = "tier-proxy", version, about = "Tiered database proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tier-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let users = UserList::from_config(&config.userlist);
    tracing::info!(
        users = users.len(),
        admin_endpoints = config.tiers.admin.endpoints.len(),
        readonly_endpoints = config.tiers.readonly.endpoints.len(),
        "Configuration loaded"
    );

    let connector = TcpConnector::new(config.pool.connect_timeout());
    let manager = Arc::new(PoolManager::new(
        connector,
        config.pool_config(Tier::Admin),
        config.pool_config(Tier::Readonly),
    )?);

    for tier in Tier::ALL {
        for address in &config.tier(tier).endpoints {
            manager.apply_topology(&TopologyEvent::added(tier, address)).await?;
        }
    }

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    tasks.push(
        manager
            .clone()
            .spawn_maintenance(config.pool.maintenance_interval(), shutdown.subscribe()),
    );

    let (coordinator, topology_tx) = Coordinator::new(manager.clone(), config.discovery.channel_capacity);
    let coordinator_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let applied = coordinator.run(coordinator_shutdown).await;
        tracing::info!(applied, "Topology coordinator stopped");
    }));

    if config.discovery.enabled {
        let feed = DiscoveryFeed::new(
            config.discovery.address.clone(),
            config.discovery.reconnect_backoff(),
            topology_tx.clone(),
        );
        tasks.push(tokio::spawn(feed.run(shutdown.subscribe())));
    }

    let (watcher, updates) = ConfigWatcher::new(&args.config);
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };
    {
        let initial = config.clone();
        let events = topology_tx.clone();
        let reload_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            forward_endpoint_changes(updates, &initial, events, reload_shutdown).await;
        }));
    }

    let sessions = SessionRegistry::new();
    if config.admin.enabled {
        let state = AdminState {
            pools: manager.clone(),
            sessions: sessions.clone(),
            topology: topology_tx.clone(),
            api_key: config.admin.api_key.as_str().into(),
        };
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let mut admin_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, setup_admin_router(state))
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }));
    }
    drop(topology_tx);

    wait_for_termination().await;
    shutdown.trigger();

    let report = manager.shutdown(config.pool.shutdown_grace()).await;
    for task in tasks {
        let _ = task.await;
    }

    tracing::info!(
        idle_closed = report.idle_closed,
        returned = report.returned,
        forced = report.forced,
        sessions = sessions.len(),
        "Shutdown complete"
    );
    Ok(())
}
