//! Account handlers: register, login, logout

use super::{fields, Ctx, Fields};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::guard::Operation;
use crate::store::{NewUser, StoreError};
use crate::validate::{Kind, Shape};
use serde_json::json;
use tracing::{info, warn};

const REGISTER: Shape = &[
    ("sessionId", Kind::String),
    ("username", Kind::String),
    ("password", Kind::String),
    ("nickname", Kind::String),
];

const LOGIN: Shape = &[
    ("sessionId", Kind::String),
    ("username", Kind::String),
    ("password", Kind::String),
];

const LOGOUT: Shape = &[("sessionId", Kind::String)];

/// `register`
pub async fn register(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(REGISTER)?;

    let username = ctx.str("username")?.to_string();
    let new = NewUser {
        username: username.clone(),
        password: ctx.str("password")?.to_string(),
        nickname: ctx.str("nickname")?.to_string(),
        description: ctx.optional_str("description")?.map(str::to_string),
        avatar_url: ctx.optional_str("avatarUrl")?.map(str::to_string),
    };

    if flow.step(ctx.store().find_user(&username)).await?.is_some() {
        return Err(Error::UsernameExists);
    }

    // A concurrent register can win between the lookup and the insert.
    let user = match flow.step(ctx.store().add_user(new)).await {
        Ok(user) => user,
        Err(StoreError::UserExists) => return Err(Error::UsernameExists),
        Err(e) => return Err(e.into()),
    };

    info!("[Register] {} ({})", user.username, user.uid);
    Ok(Fields::new())
}

/// `login`
pub async fn login(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(LOGIN)?;

    let username = ctx.str("username")?;
    let password = ctx.str("password")?;

    if !flow.step(ctx.store().authorize_user(username, password)).await? {
        warn!("[Login] Failed for {}", username);
        return Err(Error::LoginFailed);
    }

    ctx.state.sessions.login(&ctx.session, username);
    Ok(fields(json!({ "username": username })))
}

/// `logout`
pub async fn logout(ctx: Ctx) -> Result<Fields> {
    ctx.validate(LOGOUT)?;
    ctx.authorize(Operation::Logout)?;

    ctx.state.sessions.logout(&ctx.session);
    Ok(Fields::new())
}
