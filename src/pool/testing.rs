//! In-memory connector for pool tests.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::Connector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockLink {
    pub(crate) addr: String,
    pub(crate) serial: u64,
}

#[derive(Debug, Default)]
struct MockState {
    refused: Mutex<HashSet<String>>,
    failing_pings: Mutex<HashSet<u64>>,
    connect_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    pings: AtomicUsize,
    serial: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refuse(&self, addr: &str) {
        self.state.refused.lock().unwrap().insert(addr.to_string());
    }

    pub(crate) fn accept(&self, addr: &str) {
        self.state.refused.lock().unwrap().remove(addr);
    }

    pub(crate) fn fail_pings_for_serial(&self, serial: u64) {
        self.state.failing_pings.lock().unwrap().insert(serial);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    type Connection = MockLink;

    async fn connect(&self, addr: &str) -> io::Result<MockLink> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.refused.lock().unwrap().contains(addr) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        Ok(MockLink {
            addr: addr.to_string(),
            serial: self.state.serial.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn ping(&self, conn: &mut MockLink) -> io::Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.failing_pings.lock().unwrap().contains(&conn.serial) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link gone"));
        }
        Ok(())
    }
}
