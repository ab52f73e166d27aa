//! Group handlers: groups, group.search, group.add, group.join, group.chat

use super::{fields, Ctx, Fields};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::guard::Operation;
use crate::store::{Group, NewGroup, StoreError};
use crate::validate::{Kind, Shape};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

const GROUPS: Shape = &[("sessionId", Kind::String)];

const SEARCH: Shape = &[("sessionId", Kind::String), ("pattern", Kind::String)];

const ADD: Shape = &[("sessionId", Kind::String), ("name", Kind::String)];

const JOIN: Shape = &[("sessionId", Kind::String), ("groupId", Kind::String)];

const CHAT: Shape = &[
    ("sessionId", Kind::String),
    ("groupId", Kind::String),
    ("message", Kind::String),
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupSummary {
    group_id: String,
    name: String,
    creator: String,
    members: Vec<String>,
}

impl From<Group> for GroupSummary {
    fn from(group: Group) -> Self {
        Self {
            group_id: group.gid,
            name: group.name,
            creator: group.creator,
            members: group.members,
        }
    }
}

/// `groups`: groups the caller belongs to.
pub async fn list(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(GROUPS)?;
    let me = ctx.authorize(Operation::GroupList)?;

    let user = flow
        .step(ctx.store().find_user(&me))
        .await?
        .ok_or(Error::UserNotFound)?;

    let store = ctx.store().clone();
    let groups = flow
        .nest("groups", |mut child| async move {
            let mut groups = Vec::with_capacity(user.groups.len());
            for gid in &user.groups {
                if let Some(group) = child.step(store.find_group(gid)).await? {
                    groups.push(GroupSummary::from(group));
                }
            }
            Ok::<_, Error>(groups)
        })
        .await?;

    Ok(fields(json!({ "groups": groups })))
}

/// `group.search`: regex over group names.
pub async fn search(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(SEARCH)?;

    let groups = flow.step(ctx.store().search_groups(ctx.str("pattern")?)).await?;
    let groups: Vec<GroupSummary> = groups.into_iter().map(GroupSummary::from).collect();

    Ok(fields(json!({ "groups": groups })))
}

/// `group.add`: create a group, optionally with a chosen `groupId`.
pub async fn add(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(ADD)?;
    let me = ctx.authorize(Operation::GroupAdd)?;
    let gid = ctx.optional_str("groupId")?.map(str::to_string);

    if let Some(gid) = &gid {
        if flow.step(ctx.store().find_group(gid)).await?.is_some() {
            return Err(Error::GroupIdExists);
        }
    }

    let new = NewGroup {
        gid,
        name: ctx.str("name")?.to_string(),
        creator: me.clone(),
    };
    let group = match flow.step(ctx.store().add_group(new)).await {
        Ok(group) => group,
        Err(StoreError::GroupExists) => return Err(Error::GroupIdExists),
        Err(e) => return Err(e.into()),
    };

    info!("[Groups] {} created {} ({})", me, group.gid, group.name);
    Ok(fields(json!({ "groupId": group.gid })))
}

/// `group.join`
pub async fn join(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(JOIN)?;
    let me = ctx.authorize(Operation::GroupJoin)?;
    let gid = ctx.str("groupId")?;

    let group = flow
        .step(ctx.store().find_group(gid))
        .await?
        .ok_or(Error::GroupNotFound)?;
    if group.has_member(&me) {
        return Err(Error::MemberExists);
    }

    flow.step(ctx.store().join_group(&me, gid)).await?;

    info!("[Groups] {} joined {}", me, gid);
    Ok(fields(json!({ "groupId": gid })))
}

/// `group.chat`: accepted for an existing group, but not fanned out.
pub async fn chat(ctx: Ctx, mut flow: Flow) -> Result<Fields> {
    ctx.validate(CHAT)?;
    let me = ctx.authorize(Operation::GroupChat)?;
    let gid = ctx.str("groupId")?;

    flow.step(ctx.store().find_group(gid))
        .await?
        .ok_or(Error::GroupNotFound)?;

    debug!("[Groups] {} -> {}: group delivery is not implemented", me, gid);
    Ok(Fields::new())
}
