//! Wire protocol
//!
//! Every frame in either direction is an [`Envelope`]: an event name plus a
//! JSON payload. Replies reuse the request's event name and always carry an
//! `err` field, `null` on success.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Server to client, once per new session.
pub const SESSION_EVENT: &str = "session";
/// Server to client, a direct message from another user.
pub const MESSAGE_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Client to server request events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Register,
    Login,
    Logout,
    Contacts,
    Groups,
    UserSearch,
    ContactAdd,
    GroupSearch,
    GroupAdd,
    GroupJoin,
    ProfileGet,
    ProfileEdit,
    Chat,
    GroupChat,
}

impl Event {
    pub const ALL: [Event; 14] = [
        Event::Register,
        Event::Login,
        Event::Logout,
        Event::Contacts,
        Event::Groups,
        Event::UserSearch,
        Event::ContactAdd,
        Event::GroupSearch,
        Event::GroupAdd,
        Event::GroupJoin,
        Event::ProfileGet,
        Event::ProfileEdit,
        Event::Chat,
        Event::GroupChat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Event::Register => "register",
            Event::Login => "login",
            Event::Logout => "logout",
            Event::Contacts => "contacts",
            Event::Groups => "groups",
            Event::UserSearch => "user.search",
            Event::ContactAdd => "contact.add",
            Event::GroupSearch => "group.search",
            Event::GroupAdd => "group.add",
            Event::GroupJoin => "group.join",
            Event::ProfileGet => "profile.get",
            Event::ProfileEdit => "profile.edit",
            Event::Chat => "chat",
            Event::GroupChat => "group.chat",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Event {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.name() == s)
            .ok_or_else(|| format!("unknown event: {s}"))
    }
}

/// Build a reply payload from a handler outcome.
///
/// Successful payloads are merged with `err: null`; failures carry only the
/// error's wire string.
pub fn reply(outcome: Result<Map<String, Value>, Error>) -> Value {
    let mut body = Map::new();
    match outcome {
        Ok(fields) => {
            body.insert("err".into(), Value::Null);
            for (key, value) in fields {
                if key != "err" {
                    body.insert(key, value);
                }
            }
        }
        Err(err) => {
            body.insert("err".into(), Value::String(err.wire()));
        }
    }
    Value::Object(body)
}
