//! Configuration file watcher for hot reload.
//!
//! Reloaded configs only feed endpoint changes into the topology channel;
//! pool bounds stay as they were at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::backend::Tier;
use crate::config::loader::load_config;
use crate::config::schema::{ProxyConfig, TiersConfig};
use crate::topology::{diff_endpoints, TopologyEvent, TopologySender};

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                let _ = tx.send(new_config);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reload config: {}. Keeping current configuration.",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Events that turn the `previous` endpoint lists into the `next` ones.
pub fn endpoint_changes(previous: &TiersConfig, next: &TiersConfig) -> Vec<TopologyEvent> {
    let mut events = diff_endpoints(Tier::Admin, &previous.admin.endpoints, &next.admin.endpoints);
    events.extend(diff_endpoints(
        Tier::Readonly,
        &previous.readonly.endpoints,
        &next.readonly.endpoints,
    ));
    events
}

/// Turn reloaded configs into topology events until shutdown or until either
/// channel closes.
pub async fn forward_endpoint_changes(
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    initial: &ProxyConfig,
    events: TopologySender,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut current_tiers = initial.tiers.clone();
    let current_pool = initial.pool.clone();

    loop {
        let next = tokio::select! {
            next = updates.recv() => match next {
                Some(next) => next,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        if next.pool != current_pool {
            tracing::warn!("Pool settings changed on disk; they take effect after a restart");
        }

        let changes = endpoint_changes(&current_tiers, &next.tiers);
        tracing::info!(changes = changes.len(), "Applying endpoint changes from reloaded config");
        for event in changes {
            if events.send(event).await.is_err() {
                tracing::warn!("Topology channel closed, config reload forwarding stopped");
                return;
            }
        }
        current_tiers = next.tiers;
    }
}
