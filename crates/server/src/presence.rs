//! Presence registry
//!
//! Maps an authenticated identity to the session that currently represents
//! its live connection. At most one entry exists per identity; the most
//! recent publish wins.

use crate::session::SessionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<String, SessionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `identity` at `session`, returning the entry it replaced.
    pub fn publish(&self, identity: &str, session: &SessionId) -> Option<SessionId> {
        let previous = self
            .entries
            .write()
            .insert(identity.to_string(), session.clone());

        match &previous {
            Some(old) if old != session => {
                debug!(identity, from = %old, to = %session, "presence superseded")
            }
            Some(_) => {}
            None => debug!(identity, session = %session, "presence published"),
        }
        previous
    }

    /// Remove the entry for `identity`, but only while it still belongs to
    /// `session`. A stale session cannot remove a newer login's entry.
    pub fn unpublish(&self, identity: &str, session: &SessionId) -> bool {
        let mut entries = self.entries.write();
        match entries.get(identity) {
            Some(current) if current == session => {
                entries.remove(identity);
                debug!(identity, session = %session, "presence removed");
                true
            }
            Some(current) => {
                debug!(
                    identity,
                    stale = %session,
                    current = %current,
                    "kept newer presence entry"
                );
                false
            }
            None => false,
        }
    }

    pub fn lookup(&self, identity: &str) -> Option<SessionId> {
        self.entries.read().get(identity).cloned()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.entries.read().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
