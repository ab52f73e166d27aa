//! Contact handlers: contacts, user.search, contact.add

use super::{fields, Ctx, Fields};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::guard::Operation;
use crate::store::UserProfile;
use crate::validate::{Kind, Shape};
use serde::Serialize;
use serde_json::json;
use tracing::info;

const CONTACTS: Shape = &[("sessionId", Kind::String)];

const SEARCH: Shape = &[("sessionId", Kind::String), ("pattern", Kind::String)];

const ADD: Shape = &[("sessionId", Kind::String), ("username", Kind::String)];

#[derive(Debug, Serialize)]
struct ContactEntry {
    #[serde(flatten)]
    profile: UserProfile,
    online: bool,
}

#[derive(Debug, Serialize)]
struct SearchHit {
    username: String,
    nickname: String,
    description: String,
}

/// `contacts`: the caller's contact list with live presence.
pub async fn list(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(CONTACTS)?;
    let me = ctx.authorize(Operation::ContactList)?;

    let user = flow
        .step(ctx.store().find_user(&me))
        .await?
        .ok_or(Error::UserNotFound)?;

    let store = ctx.store().clone();
    let profiles = flow
        .nest("profiles", |mut child| async move {
            let mut profiles = Vec::with_capacity(user.contacts.len());
            for name in &user.contacts {
                // Contacts whose account vanished are skipped.
                if let Some(contact) = child.step(store.find_user(name)).await? {
                    profiles.push(UserProfile::from(&contact));
                }
            }
            Ok::<_, Error>(profiles)
        })
        .await?;

    let presence = &ctx.state.presence;
    let contacts: Vec<ContactEntry> = profiles
        .into_iter()
        .map(|profile| ContactEntry {
            online: presence.is_online(&profile.username),
            profile,
        })
        .collect();

    Ok(fields(json!({ "contacts": contacts })))
}

/// `user.search`: regex over usernames and nicknames.
pub async fn search_users(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(SEARCH)?;

    let users = flow.step(ctx.store().search_users(ctx.str("pattern")?)).await?;
    let hits: Vec<SearchHit> = users
        .into_iter()
        .map(|u| SearchHit {
            username: u.username,
            nickname: u.nickname,
            description: u.description,
        })
        .collect();

    Ok(fields(json!({ "users": hits })))
}

/// `contact.add`
pub async fn add(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(ADD)?;
    let me = ctx.authorize(Operation::ContactAdd)?;
    let username = ctx.str("username")?;

    if flow.step(ctx.store().find_user(username)).await?.is_none() {
        return Err(Error::UserNotFound);
    }

    let owner = flow
        .step(ctx.store().find_user(&me))
        .await?
        .ok_or(Error::UserNotFound)?;
    if owner.has_contact(username) {
        return Err(Error::ContactExists);
    }

    flow.step(ctx.store().add_contact(&me, username)).await?;

    info!("[Contacts] {} added {}", me, username);
    Ok(Fields::new())
}
