//! Connection Writer
//!
//! The write half of each connection is owned by one writer task. Every
//! other activity (supervisor commands, heartbeat pings, pong replies)
//! enqueues [`OutboundFrame`]s through a cloneable [`ConnectionHandle`], so
//! frames reach the transport one at a time in queue order.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::{Sink, SinkExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::OutboundFrame;

/// Default writer queue capacity.
pub const DEFAULT_WRITE_QUEUE: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection handle errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is closed or its writer has stopped.
    #[error("connection closed")]
    Closed,
}

/// Cloneable sender side of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Process-unique connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether frames can still be written.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a frame for the writer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is closed.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| ConnectionError::Closed)
    }

    /// Mark the connection closed; queued frames are still flushed.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Convert an outbound frame to a WebSocket message.
#[must_use]
pub fn to_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Text(text) => Message::Text(text.into()),
        OutboundFrame::Ping(payload) => Message::Ping(payload.into()),
        OutboundFrame::Pong(payload) => Message::Pong(payload.into()),
    }
}

/// Spawn the writer task owning `sink`.
///
/// The task ends when every handle is dropped or a write fails; either way
/// the handle reports closed afterwards and the sink is closed.
pub fn spawn_writer<S, E>(sink: S, capacity: usize) -> (ConnectionHandle, JoinHandle<()>)
where
    S: Sink<Message, Error = E> + Send + 'static,
    E: Display + Send,
{
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let open = Arc::new(AtomicBool::new(true));
    let handle = ConnectionHandle {
        id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        tx,
        open: Arc::clone(&open),
    };
    let connection_id = handle.id;

    let task = tokio::spawn(async move {
        let mut sink = std::pin::pin!(sink);

        while let Some(frame) = rx.recv().await {
            let label = frame.label();
            if let Err(e) = sink.send(to_message(frame)).await {
                tracing::warn!(connection_id, frame = label, error = %e, "Write failed, closing writer");
                break;
            }
            tracing::trace!(connection_id, frame = label, "Frame written");
        }

        open.store(false, Ordering::Release);
        rx.close();
        if let Err(e) = sink.close().await {
            tracing::trace!(connection_id, error = %e, "Sink close failed");
        }
        tracing::debug!(connection_id, "Writer stopped");
    });

    (handle, task)
}

/// Holder of the current connection (at most one).
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    current: RwLock<Option<ConnectionHandle>>,
}

impl ConnectionSlot {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new connection, closing any previous one.
    pub fn set(&self, handle: ConnectionHandle) {
        if let Some(previous) = self.current.write().replace(handle) {
            previous.close();
        }
    }

    /// Remove and close the current connection.
    pub fn clear(&self) {
        if let Some(previous) = self.current.write().take() {
            previous.close();
        }
    }

    /// Clone of the current handle.
    #[must_use]
    pub fn current(&self) -> Option<ConnectionHandle> {
        self.current.read().clone()
    }

    /// Whether an open connection is installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current.read().as_ref().is_some_and(ConnectionHandle::is_open)
    }
}
