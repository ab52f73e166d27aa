//! Authorization guard
//!
//! Every guarded operation is listed in [`Operation`] and checked by the same
//! predicate: the session must carry an authenticated identity.

use crate::error::{Error, Result};
use crate::protocol::Event;
use crate::session::Session;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Logout,
    ContactList,
    GroupList,
    ContactAdd,
    GroupAdd,
    GroupJoin,
    GroupChat,
    ProfileEdit,
    Chat,
}

impl Operation {
    /// The guard protecting `event`, if any.
    pub fn for_event(event: Event) -> Option<Operation> {
        match event {
            Event::Logout => Some(Operation::Logout),
            Event::Contacts => Some(Operation::ContactList),
            Event::Groups => Some(Operation::GroupList),
            Event::ContactAdd => Some(Operation::ContactAdd),
            Event::GroupAdd => Some(Operation::GroupAdd),
            Event::GroupJoin => Some(Operation::GroupJoin),
            Event::GroupChat => Some(Operation::GroupChat),
            Event::ProfileEdit => Some(Operation::ProfileEdit),
            Event::Chat => Some(Operation::Chat),
            Event::Register
            | Event::Login
            | Event::UserSearch
            | Event::GroupSearch
            | Event::ProfileGet => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Logout => "logout",
            Operation::ContactList => "contact-list",
            Operation::GroupList => "group-list",
            Operation::ContactAdd => "contact-add",
            Operation::GroupAdd => "group-add",
            Operation::GroupJoin => "group-join",
            Operation::GroupChat => "group-chat",
            Operation::ProfileEdit => "profile-edit",
            Operation::Chat => "chat",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check `op` against `session`, returning the identity it acts as.
pub fn authorize(session: &Session, op: Operation) -> Result<String> {
    match session.identity() {
        Some(identity) if !identity.is_empty() => Ok(identity),
        _ => {
            debug!(session = %session.id(), operation = %op, "denied: not logged in");
            Err(Error::SessionNotLogin)
        }
    }
}
