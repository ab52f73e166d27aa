//! Event handlers
//!
//! One handler per client event. Each runs as a [`Flow`] so that store calls
//! read as straight-line steps, and each produces exactly one reply on the
//! request's event name.

pub mod auth;
pub mod chat;
pub mod contacts;
pub mod groups;
pub mod profile;

use crate::config::AppState;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::guard::{self, Operation};
use crate::protocol::{self, Envelope, Event};
use crate::session::Session;
use crate::store::Store;
use crate::validate::{self, Shape};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reply fields of a successful handler, merged with `err: null`.
pub type Fields = Map<String, Value>;

/// Everything a handler sees about one request.
pub struct Ctx {
    pub state: AppState,
    pub session: Arc<Session>,
    pub data: Value,
}

impl Ctx {
    pub fn validate(&self, shape: Shape) -> Result<()> {
        validate::validate(&self.data, shape)
    }

    pub fn authorize(&self, op: Operation) -> Result<String> {
        guard::authorize(&self.session, op)
    }

    /// A string field that [`Ctx::validate`] already checked.
    pub fn str(&self, field: &str) -> Result<&str> {
        validate::str_field(&self.data, field)
    }

    pub fn optional_str(&self, field: &str) -> Result<Option<&str>> {
        validate::optional_str(&self.data, field)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.state.store
    }
}

/// Turn a `json!({...})` object into reply fields.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Handle one inbound envelope from `conn` and emit its reply there.
///
/// Returns the session the request resolved to, or `None` for an unknown
/// event, which gets no reply.
pub async fn dispatch(
    state: &AppState,
    conn: &Arc<Connection>,
    envelope: Envelope,
) -> Option<Arc<Session>> {
    let event = match envelope.event.parse::<Event>() {
        Ok(event) => event,
        Err(e) => {
            warn!(conn = %conn.id(), "{}", e);
            return None;
        }
    };

    let provided = envelope.data.get("sessionId").and_then(Value::as_str);
    let session = state.sessions.resolve(provided, Some(conn));
    debug!(
        conn = %conn.id(),
        session = %session.id(),
        %event,
        guarded = Operation::for_event(event).is_some(),
        "request"
    );

    let ctx = Ctx {
        state: state.clone(),
        session: session.clone(),
        data: envelope.data,
    };
    let outcome = Flow::run(event.name(), |flow| handle(event, ctx, flow)).await;

    // The client may be gone by now; emitting is then a no-op.
    conn.emit(event.name(), protocol::reply(outcome));
    Some(session)
}

async fn handle(event: Event, ctx: Ctx, flow: Flow) -> std::result::Result<Fields, Error> {
    match event {
        Event::Register => auth::register(ctx, flow).await,
        Event::Login => auth::login(ctx, flow).await,
        Event::Logout => auth::logout(ctx).await,
        Event::Contacts => contacts::list(ctx, flow).await,
        Event::UserSearch => contacts::search_users(ctx, flow).await,
        Event::ContactAdd => contacts::add(ctx, flow).await,
        Event::Groups => groups::list(ctx, flow).await,
        Event::GroupSearch => groups::search(ctx, flow).await,
        Event::GroupAdd => groups::add(ctx, flow).await,
        Event::GroupJoin => groups::join(ctx, flow).await,
        Event::GroupChat => groups::chat(ctx, flow).await,
        Event::ProfileGet => profile::get(ctx, flow).await,
        Event::ProfileEdit => profile::edit(ctx, flow).await,
        Event::Chat => chat::send(ctx).await,
    }
}
