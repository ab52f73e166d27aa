//! Profile handlers: profile.get, profile.edit

use super::{fields, Ctx, Fields};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::guard::Operation;
use crate::store::{Entity, UserProfile};
use crate::validate::{Kind, Shape};
use serde_json::json;

const GET: Shape = &[("sessionId", Kind::String)];

const EDIT: Shape = &[
    ("sessionId", Kind::String),
    ("nickname", Kind::String),
    ("description", Kind::String),
];

/// `profile.get`: someone else's profile with `username`, otherwise the
/// caller's own.
pub async fn get(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(GET)?;

    let username = match ctx.optional_str("username")? {
        Some(name) => name.to_string(),
        None => ctx.session.identity().ok_or(Error::UserNotFound)?,
    };

    let user = flow
        .step(ctx.store().find_user(&username))
        .await?
        .ok_or(Error::UserNotFound)?;

    Ok(fields(json!(UserProfile::from(&user))))
}

/// `profile.edit`
pub async fn edit(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(EDIT)?;
    let me = ctx.authorize(Operation::ProfileEdit)?;

    let mut user = flow
        .step(ctx.store().find_user(&me))
        .await?
        .ok_or(Error::UserNotFound)?;

    user.nickname = ctx.str("nickname")?.to_string();
    user.description = ctx.str("description")?.to_string();
    let reply = json!({ "nickname": user.nickname, "description": user.description });

    flow.step(ctx.store().save(Entity::User(user))).await?;
    Ok(fields(reply))
}
