//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tier_proxy::pool::PoolConfig;
use tier_proxy::resilience::BackoffPolicy;
use tier_proxy::topology::TopologyEvent;
use tier_proxy::{Connector, PoolManager, Tier};

/// A TCP backend that accepts links and keeps them open until told otherwise.
pub struct MockBackend {
    address: String,
    sockets: Arc<Mutex<Vec<TcpStream>>>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let sockets = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let sockets = sockets.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    sockets.lock().unwrap().push(socket);
                }
            })
        };

        Self {
            address,
            sockets,
            accepted,
            task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Close every link accepted so far, as a restarting backend would.
    pub fn drop_links(&self) {
        self.sockets.lock().unwrap().clear();
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub addr: String,
    pub serial: u64,
}

#[derive(Debug, Default)]
struct ConnectorState {
    refused: Mutex<HashSet<String>>,
    connects: AtomicUsize,
    serial: AtomicU64,
}

/// In-memory connector: every connect succeeds unless the address is refused.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<ConnectorState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, addr: &str) {
        self.state.refused.lock().unwrap().insert(addr.to_string());
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = Link;

    async fn connect(&self, addr: &str) -> io::Result<Link> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.refused.lock().unwrap().contains(addr) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        Ok(Link {
            addr: addr.to_string(),
            serial: self.state.serial.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn ping(&self, _conn: &mut Link) -> io::Result<()> {
        Ok(())
    }
}

pub fn pool_config(min_alive: usize, max_alive: usize) -> PoolConfig {
    PoolConfig {
        min_alive,
        max_alive,
        max_idle: max_alive,
        connect_timeout: Duration::from_millis(500),
        warm_backoff: BackoffPolicy::new(5, 20, 2),
        ..PoolConfig::default()
    }
}

/// A manager over `connector` with the given endpoints already added.
pub async fn manager_with<C: Connector>(
    connector: C,
    config: PoolConfig,
    admin: &[&str],
    readonly: &[&str],
) -> Arc<PoolManager<C>> {
    let manager = PoolManager::new(connector, config.clone(), config).unwrap();
    for addr in admin {
        manager.apply_topology(&TopologyEvent::added(Tier::Admin, *addr)).await.unwrap();
    }
    for addr in readonly {
        manager.apply_topology(&TopologyEvent::added(Tier::Readonly, *addr)).await.unwrap();
    }
    Arc::new(manager)
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
