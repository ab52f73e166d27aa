//! Direct message routing
//!
//! Resolves a target identity through the presence registry and hands the
//! message to that identity's live connection. Delivery is fire-and-forget:
//! nothing is queued, retried or persisted for an offline target.

use crate::error::{Error, Result};
use crate::protocol::MESSAGE_EVENT;
use crate::session::{Session, SessionDirectory};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct MessageRouter {
    sessions: Arc<SessionDirectory>,
}

impl MessageRouter {
    pub fn new(sessions: Arc<SessionDirectory>) -> Self {
        Self { sessions }
    }

    /// Deliver `message` from `sender` to whoever currently holds `to`.
    ///
    /// `sender` must be logged in. Fails with [`Error::UserOffline`] when the
    /// target has no presence entry or its connection is already gone.
    pub fn route(&self, sender: &Session, to: &str, message: Value) -> Result<()> {
        let from = sender.identity().ok_or(Error::SessionNotLogin)?;

        let target = self
            .sessions
            .presence()
            .lookup(to)
            .and_then(|id| self.sessions.get(id.as_str()))
            .ok_or(Error::UserOffline)?;

        if !target.emit(MESSAGE_EVENT, json!({ "from": from, "message": message })) {
            debug!(from = %from, to, "target connection already closed");
            return Err(Error::UserOffline);
        }

        debug!(from = %from, to, session = %target.id(), "message routed");
        Ok(())
    }
}
