//! Live connection handles
//!
//! The transport owns each [`Connection`] through an `Arc`. Sessions hold
//! only a `Weak` to it, so a closed socket turns every later delivery into a
//! no-op.

use crate::protocol::Envelope;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", &self.0.simple().to_string()[..8])
    }
}

/// Outbound side of one live client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    /// Create a connection handle and the queue its writer drains.
    pub fn open() -> (Arc<Connection>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection {
            id: ConnectionId::new(),
            tx,
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for the client. Returns `false` when the writer is
    /// gone; that is not an error.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        let delivered = self.tx.send(Envelope::new(event, data)).is_ok();
        if !delivered {
            trace!(conn = %self.id, event, "dropped event for closed connection");
        }
        delivered
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_queues_envelope() {
        let (conn, mut rx) = Connection::open();
        assert!(conn.emit("message", json!({"from": "a"})));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.event, "message");
        assert_eq!(envelope.data["from"], "a");
    }

    #[test]
    fn test_emit_after_close_is_noop() {
        let (conn, rx) = Connection::open();
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.emit("message", json!({})));
    }
}
