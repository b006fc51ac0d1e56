//! TCP connector.
//!
//! Opens plain TCP links to backend endpoints. Protocol handshakes are the
//! codec's job; the liveness probe here only detects links the backend has
//! closed (or that carry unsolicited bytes) while parked in the pool.

use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

use super::Connector;

#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl Connector for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {} timed out", addr)))??;
        stream.set_nodelay(true)?;
        tracing::trace!(backend = %addr, "TCP link established");
        Ok(stream)
    }

    async fn ping(&self, conn: &mut TcpStream) -> io::Result<()> {
        let mut probe = [0u8; 1];
        match conn.try_read(&mut probe) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "backend closed the connection",
            )),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsolicited bytes on idle connection",
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn ping_succeeds_on_open_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let connector = TcpConnector::default();
        let mut conn = connector.connect(&addr).await.unwrap();
        let _server_side = accept.await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(connector.ping(&mut conn).await.is_ok());
    }

    #[tokio::test]
    async fn ping_detects_closed_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let connector = TcpConnector::default();
        let mut conn = connector.connect(&addr).await.unwrap();
        accept.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(connector.ping(&mut conn).await.is_err());
    }

    #[tokio::test]
    async fn connect_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_millis(500));
        assert!(connector.connect(&addr).await.is_err());
    }
}
