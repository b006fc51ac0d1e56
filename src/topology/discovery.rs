//! Discovery feed subscriber.
//!
//! Reads newline-delimited JSON [`TopologyEvent`] records from a TCP peer and
//! forwards them, in order, onto the topology channel. The subscriber only
//! reads; it never writes to the peer. Lost connections are retried with
//! exponential backoff and jitter.

use std::io;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::resilience::BackoffPolicy;
use super::{TopologyEvent, TopologySender};

/// Parse one feed line.
pub fn parse_event(line: &str) -> Result<TopologyEvent, serde_json::Error> {
    serde_json::from_str(line.trim())
}

enum FeedEnd {
    /// Peer closed the stream after delivering this many events.
    Eof(u64),
    /// Nobody is consuming events anymore.
    ChannelClosed,
}

pub struct DiscoveryFeed {
    address: String,
    backoff: BackoffPolicy,
    events: TopologySender,
}

impl DiscoveryFeed {
    pub fn new(address: impl Into<String>, backoff: BackoffPolicy, events: TopologySender) -> Self {
        Self {
            address: address.into(),
            backoff,
            events,
        }
    }

    /// Subscribe until shutdown or until the topology channel closes.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut failures = 0u32;
        loop {
            let outcome = tokio::select! {
                outcome = self.subscribe() => outcome,
                _ = shutdown.recv() => return,
            };

            match outcome {
                Ok(FeedEnd::ChannelClosed) => {
                    tracing::info!("Topology channel closed, discovery feed stopped");
                    return;
                }
                Ok(FeedEnd::Eof(delivered)) => {
                    tracing::warn!(feed = %self.address, delivered, "Discovery feed closed by peer");
                    if delivered > 0 {
                        failures = 0;
                    }
                }
                Err(e) => {
                    tracing::warn!(feed = %self.address, error = %e, "Discovery feed connection failed");
                }
            }

            failures = failures.saturating_add(1);
            if !self.backoff.allows(failures) {
                tracing::error!(feed = %self.address, failures, "Discovery feed giving up");
                return;
            }
            let delay = self.backoff.delay(failures);
            tracing::debug!(feed = %self.address, retry_in_ms = delay.as_millis() as u64, "Reconnecting discovery feed");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return,
            }
        }
    }

    async fn subscribe(&self) -> io::Result<FeedEnd> {
        let stream = TcpStream::connect(&self.address).await?;
        tracing::info!(feed = %self.address, "Discovery feed connected");

        let mut lines = BufReader::new(stream).lines();
        let mut delivered = 0u64;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_event(&line) {
                Ok(event) => {
                    tracing::debug!(event = %event, "Topology event received");
                    if self.events.send(event).await.is_err() {
                        return Ok(FeedEnd::ChannelClosed);
                    }
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(feed = %self.address, error = %e, line = %line, "Skipping malformed topology event");
                }
            }
        }
        Ok(FeedEnd::Eof(delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Tier;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn parses_feed_lines() {
        let event = parse_event(r#" {"kind":"endpoint_added","tier":"admin","address":"p1:5432"} "#).unwrap();
        assert_eq!(event, TopologyEvent::added(Tier::Admin, "p1:5432"));
        assert!(parse_event(r#"{"kind":"rebooted","tier":"admin","address":"p1:5432"}"#).is_err());
    }

    #[tokio::test]
    async fn forwards_events_in_order_and_skips_garbage() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let feed = concat!(
                "{\"kind\":\"endpoint_added\",\"tier\":\"readonly\",\"address\":\"r1:5432\"}\n",
                "not json\n",
                "\n",
                "{\"kind\":\"endpoint_removed\",\"tier\":\"readonly\",\"address\":\"r1:5432\"}\n",
            );
            socket.write_all(feed.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let feed = DiscoveryFeed::new(addr, BackoffPolicy::new(10, 50, 0), tx);
        let task = tokio::spawn(feed.run(shutdown_rx));

        assert_eq!(rx.recv().await.unwrap(), TopologyEvent::added(Tier::Readonly, "r1:5432"));
        assert_eq!(rx.recv().await.unwrap(), TopologyEvent::removed(Tier::Readonly, "r1:5432"));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for address in ["r1:5432", "r2:5432"] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let line = format!(
                    "{{\"kind\":\"endpoint_added\",\"tier\":\"readonly\",\"address\":\"{}\"}}\n",
                    address
                );
                socket.write_all(line.as_bytes()).await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(DiscoveryFeed::new(addr, BackoffPolicy::new(10, 50, 0), tx).run(shutdown_rx));

        assert_eq!(rx.recv().await.unwrap().address, "r1:5432");
        assert_eq!(rx.recv().await.unwrap().address, "r2:5432");
    }
}
