//! # Transport Abstraction
//!
//! A minimal, async interface for moving whole frames between nodes.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: a transport knows nothing about packets, RPC or
//!   channel messages. It moves opaque, already-delimited frames.
//! - **Full-Duplex**: sending and receiving are independent. Request/response
//!   correlation lives in `NetworkChannel`, not here.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional frame pipe.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Waits for the next frame. `Ok(None)` means the peer hung up.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Stops sending. The peer observes end-of-stream once it has drained
    /// what was already sent.
    fn close(&self) {}
}

/// An in-memory transport over tokio mpsc channels.
///
/// Frames sent on one end of a `pair()` are received by the other.
pub struct DuplexTransport {
    tx: SyncMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexTransport {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx: SyncMutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(frame.to_vec())
                .map_err(|_| Error::ConnectionLost("peer dropped".into())),
            None => Err(Error::ConnectionLost("transport closed".into())),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}
