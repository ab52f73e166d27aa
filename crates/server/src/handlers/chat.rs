//! Direct chat

use super::{Ctx, Fields};
use crate::error::Result;
use crate::guard::Operation;
use crate::validate::{Kind, Shape};
use serde_json::Value;

const CHAT: Shape = &[
    ("sessionId", Kind::String),
    ("to", Kind::String),
    ("message", Kind::String),
];

/// `chat`: deliver `message` to the live connection of `to`.
pub async fn send(ctx: Ctx) -> Result<Fields> {
    ctx.validate(CHAT)?;
    ctx.authorize(Operation::Chat)?;

    let to = ctx.str("to")?;
    let message = Value::String(ctx.str("message")?.to_string());

    ctx.state.router.route(&ctx.session, to, message)?;
    Ok(Fields::new())
}
