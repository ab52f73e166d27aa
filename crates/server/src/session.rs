//! Session directory
//!
//! The directory is the only owner of [`Session`] records. A session is
//! created on first contact, optionally bound to an identity by login, and
//! attached to whichever live connection most recently presented its id.
//!
//! Lock order: directory map, then a session's state, then the presence
//! registry. Presence changes that depend on a session's connection are made
//! while that session's state is locked, so a concurrent disconnect cannot
//! interleave between the check and the publish.

use crate::connection::{Connection, ConnectionId};
use crate::presence::PresenceRegistry;
use crate::protocol::SESSION_EVENT;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde_json::json;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Random bytes behind every session id (hex-encoded to twice this length).
const SESSION_ID_BYTES: usize = 32;

/// Opaque session token presented by clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are credentials; only a prefix goes to the logs.
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "{prefix}…")
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct SessionState {
    identity: Option<String>,
    last_activity: DateTime<Utc>,
    connection: Option<(ConnectionId, Weak<Connection>)>,
}

impl SessionState {
    fn live_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .as_ref()
            .and_then(|(_, conn)| conn.upgrade())
            .filter(|conn| conn.is_open())
    }
}

/// Server-side record for one client token.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            state: Mutex::new(SessionState {
                identity: None,
                last_activity: now,
                connection: None,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The authenticated principal, if login has succeeded.
    pub fn identity(&self) -> Option<String> {
        self.state.lock().identity.clone()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.state.lock().last_activity
    }

    /// The attached connection, if it is still open.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.state.lock().live_connection()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.state.lock().connection.as_ref().map(|(id, _)| *id)
    }

    /// Send an event to the attached connection. No-op when detached.
    pub fn emit(&self, event: &str, data: serde_json::Value) -> bool {
        match self.connection() {
            Some(conn) => conn.emit(event, data),
            None => false,
        }
    }
}

pub struct SessionDirectory {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    presence: Arc<PresenceRegistry>,
}

impl SessionDirectory {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            presence,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Return the session for `provided`, minting a fresh one when the id is
    /// absent or unknown.
    ///
    /// When `conn` is given the session is attached to it. A newly minted
    /// session announces its id on that connection; an authenticated session
    /// that moved to a different connection republishes its presence there.
    pub fn resolve(&self, provided: Option<&str>, conn: Option<&Arc<Connection>>) -> Arc<Session> {
        let now = Utc::now();

        let existing = provided
            .filter(|id| !id.is_empty())
            .and_then(|id| self.sessions.read().get(id).cloned());

        let (session, created) = match existing {
            Some(session) => (session, false),
            None => (self.create(now), true),
        };

        let mut state = session.state.lock();
        state.last_activity = now;

        if let Some(conn) = conn {
            let changed = state
                .connection
                .as_ref()
                .map_or(true, |(current, _)| *current != conn.id());

            if changed {
                state.connection = Some((conn.id(), Arc::downgrade(conn)));
                debug!(session = %session.id, conn = %conn.id(), "session attached");

                if let Some(identity) = &state.identity {
                    self.presence.publish(identity, &session.id);
                }
            }

            if created {
                conn.emit(
                    SESSION_EVENT,
                    json!({ "err": null, "sessionId": session.id.as_str() }),
                );
            }
        }
        drop(state);

        session
    }

    fn create(&self, now: DateTime<Utc>) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate = SessionId::generate();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(id.clone(), now));
        sessions.insert(id, session.clone());
        info!(session = %session.id, total = sessions.len(), "session created");
        session
    }

    /// Look up a session without touching it.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Bind `identity` to the session and publish presence if it is attached
    /// to a live connection. A different identity held before is unpublished.
    pub fn login(&self, session: &Session, identity: &str) {
        let mut state = session.state.lock();

        if let Some(previous) = state.identity.take() {
            if previous != identity {
                self.presence.unpublish(&previous, &session.id);
            }
        }
        state.identity = Some(identity.to_string());

        if state.live_connection().is_some() {
            self.presence.publish(identity, &session.id);
        }
        info!(session = %session.id, identity, "session logged in");
    }

    /// Clear the session's identity, returning it.
    pub fn logout(&self, session: &Session) -> Option<String> {
        let mut state = session.state.lock();
        let identity = state.identity.take()?;
        self.presence.unpublish(&identity, &session.id);
        info!(session = %session.id, identity = %identity, "session logged out");
        Some(identity)
    }

    /// Detach `conn` from the session if it is still the attached one.
    ///
    /// Detaching clears the identity and removes the presence entry bound to
    /// this session. Returns `false` when a newer connection already took
    /// the session over.
    pub fn detach(&self, id: &SessionId, conn: ConnectionId) -> bool {
        let Some(session) = self.get(id.as_str()) else {
            return false;
        };

        let mut state = session.state.lock();
        match &state.connection {
            Some((current, _)) if *current == conn => {}
            _ => return false,
        }
        state.connection = None;

        if let Some(identity) = state.identity.take() {
            self.presence.unpublish(&identity, &session.id);
        }
        debug!(session = %session.id, conn = %conn, "session detached");
        true
    }

    /// Drop a session that never logged in and is still attached to `conn`.
    ///
    /// Used when the connection has moved on to another session, so that
    /// requests without a valid id cannot pile up sessions on one socket.
    pub fn discard_anonymous(&self, id: &SessionId, conn: ConnectionId) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get(id.as_str()) else {
            return false;
        };

        {
            let state = session.state.lock();
            let attached_here = matches!(&state.connection, Some((current, _)) if *current == conn);
            if !attached_here || state.identity.is_some() {
                return false;
            }
        }

        sessions.remove(id.as_str());
        debug!(session = %id, conn = %conn, "discarded superseded anonymous session");
        true
    }

    /// Remove sessions that have no live connection and have been idle for
    /// longer than `ttl`. Returns how many were evicted.
    pub fn evict_idle(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let cutoff = now - ttl;
        let mut sessions = self.sessions.write();
        let before = sessions.len();

        sessions.retain(|_, session| {
            let mut state = session.state.lock();
            if state.live_connection().is_some() || state.last_activity > cutoff {
                return true;
            }
            if let Some(identity) = state.identity.take() {
                self.presence.unpublish(&identity, &session.id);
            }
            false
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
