//! JSON snapshot store
//!
//! Users and groups live in memory and are persisted as a single JSON
//! document. A mutation is applied to a copy of the data, the copy is handed
//! to one writer task (temp file, then rename), and only an acknowledged
//! write replaces the live data. The write lock is held throughout, so a
//! failed write leaves memory and disk unchanged.

use super::{Entity, Group, NewGroup, NewUser, Store, StoreError, StoreResult, User};
use crate::flow::{completion, Completion, Pending};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Database {
    #[serde(default)]
    users: BTreeMap<String, User>,
    #[serde(default)]
    groups: BTreeMap<String, Group>,
}

struct WriteJob {
    snapshot: String,
    done: Completion<(), StoreError>,
}

pub struct JsonStore {
    path: PathBuf,
    data: RwLock<Database>,
    writer: mpsc::UnboundedSender<WriteJob>,
    bcrypt_cost: u32,
}

impl JsonStore {
    /// Open the store at `path`, loading an existing snapshot if present.
    ///
    /// Must be called inside a Tokio runtime; the writer task is spawned here.
    pub async fn open(path: impl Into<PathBuf>, bcrypt_cost: u32) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            Database::default()
        };

        info!(
            "JSON store opened at {:?}: {} users, {} groups",
            path,
            data.users.len(),
            data.groups.len()
        );

        let (writer, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(path.clone(), rx));

        Ok(Self {
            path,
            data: RwLock::new(data),
            writer,
            bcrypt_cost,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a snapshot of `db` and hand back the write acknowledgement.
    fn queue_snapshot(&self, db: &Database) -> StoreResult<Pending<(), StoreError>> {
        let snapshot = serde_json::to_string_pretty(db)?;
        let (done, pending) = completion();
        self.writer
            .send(WriteJob { snapshot, done })
            .map_err(|_| StoreError::Closed)?;
        Ok(pending)
    }

    /// Apply `change` to a copy of the data, persist the copy and install it.
    ///
    /// Nothing becomes visible unless `change` succeeds and the snapshot
    /// write is acknowledged.
    async fn commit<R>(
        &self,
        change: impl FnOnce(&mut Database) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut db = self.data.write().await;
        let mut next = db.clone();
        let out = change(&mut next)?;
        self.queue_snapshot(&next)?.await?;
        *db = next;
        Ok(out)
    }

    async fn hash_password(&self, password: String) -> StoreResult<String> {
        let cost = self.bcrypt_cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))??;
        Ok(hashed)
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let result = write_atomic(&path, &job.snapshot).await;
        if let Err(e) = &result {
            error!("Failed to write store snapshot {:?}: {}", path, e);
        }
        job.done.complete(result);
    }
    debug!("Store writer for {:?} stopped", path);
}

async fn write_atomic(path: &Path, contents: &str) -> StoreResult<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

fn compile(pattern: &str) -> StoreResult<Regex> {
    Regex::new(pattern).map_err(|e| StoreError::InvalidPattern(e.to_string()))
}

fn require(value: String, field: &'static str) -> StoreResult<String> {
    if value.is_empty() {
        Err(StoreError::MissingField(field))
    } else {
        Ok(value)
    }
}

fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl Store for JsonStore {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.data.read().await.users.get(username).cloned())
    }

    async fn add_user(&self, new: NewUser) -> StoreResult<User> {
        let username = require(new.username, "USERNAME")?;
        let password = require(new.password, "PASSWORD")?;
        let nickname = require(new.nickname, "NICKNAME")?;

        let password_hash = self.hash_password(password).await?;

        let user = User {
            uid: new_record_id(),
            username,
            password_hash,
            nickname,
            description: new.description.unwrap_or_default(),
            avatar_url: new.avatar_url.unwrap_or_default(),
            contacts: Vec::new(),
            groups: Vec::new(),
            created_at: Utc::now(),
        };

        self.commit(|db| {
            if db.users.contains_key(&user.username) {
                return Err(StoreError::UserExists);
            }
            db.users.insert(user.username.clone(), user.clone());
            Ok(())
        })
        .await?;

        info!("[Store] User added: {}", user.username);
        Ok(user)
    }

    async fn authorize_user(&self, username: &str, password: &str) -> StoreResult<bool> {
        let Some(hash) = self
            .data
            .read()
            .await
            .users
            .get(username)
            .map(|u| u.password_hash.clone())
        else {
            return Ok(false);
        };

        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))??;

        if !valid {
            warn!("[Store] Failed password check for {}", username);
        }
        Ok(valid)
    }

    async fn search_users(&self, pattern: &str) -> StoreResult<Vec<User>> {
        let re = compile(pattern)?;
        let db = self.data.read().await;
        Ok(db
            .users
            .values()
            .filter(|u| re.is_match(&u.username) || re.is_match(&u.nickname))
            .cloned()
            .collect())
    }

    async fn add_contact(&self, owner: &str, contact: &str) -> StoreResult<()> {
        self.commit(|db| {
            if !db.users.contains_key(contact) {
                return Err(StoreError::NotFound(contact.to_string()));
            }
            let user = db
                .users
                .get_mut(owner)
                .ok_or_else(|| StoreError::NotFound(owner.to_string()))?;
            if !user.has_contact(contact) {
                user.contacts.push(contact.to_string());
            }
            Ok(())
        })
        .await?;

        info!("[Store] Contact added: {} -> {}", owner, contact);
        Ok(())
    }

    async fn add_group(&self, new: NewGroup) -> StoreResult<Group> {
        let name = require(new.name, "GROUP_NAME")?;
        let creator = require(new.creator, "GROUP_CREATOR")?;
        let gid = match new.gid {
            Some(gid) => require(gid, "GROUP_ID")?,
            None => new_record_id(),
        };

        let group = Group {
            gid,
            name,
            creator: creator.clone(),
            administrators: vec![creator.clone()],
            members: vec![creator.clone()],
            created_at: Utc::now(),
        };

        self.commit(|db| {
            if db.groups.contains_key(&group.gid) {
                return Err(StoreError::GroupExists);
            }
            let user = db
                .users
                .get_mut(&creator)
                .ok_or_else(|| StoreError::NotFound(creator.clone()))?;
            user.groups.push(group.gid.clone());
            db.groups.insert(group.gid.clone(), group.clone());
            Ok(())
        })
        .await?;

        info!("[Store] Group {} ({}) created by {}", group.gid, group.name, creator);
        Ok(group)
    }

    async fn find_group(&self, gid: &str) -> StoreResult<Option<Group>> {
        Ok(self.data.read().await.groups.get(gid).cloned())
    }

    async fn search_groups(&self, pattern: &str) -> StoreResult<Vec<Group>> {
        let re = compile(pattern)?;
        let db = self.data.read().await;
        Ok(db
            .groups
            .values()
            .filter(|g| re.is_match(&g.name))
            .cloned()
            .collect())
    }

    async fn join_group(&self, username: &str, gid: &str) -> StoreResult<()> {
        self.commit(|db| {
            let Database { users, groups } = db;

            let group = groups
                .get_mut(gid)
                .ok_or_else(|| StoreError::NotFound(gid.to_string()))?;
            let user = users
                .get_mut(username)
                .ok_or_else(|| StoreError::NotFound(username.to_string()))?;

            if !group.has_member(username) {
                group.members.push(username.to_string());
            }
            if !user.groups.iter().any(|g| g == gid) {
                user.groups.push(gid.to_string());
            }
            Ok(())
        })
        .await?;

        info!("[Store] {} joined group {}", username, gid);
        Ok(())
    }

    async fn save(&self, entity: Entity) -> StoreResult<()> {
        self.commit(|db| match entity {
            Entity::User(user) => {
                let stored = db
                    .users
                    .get_mut(&user.username)
                    .ok_or_else(|| StoreError::NotFound(user.username.clone()))?;
                stored.nickname = user.nickname;
                stored.description = user.description;
                stored.avatar_url = user.avatar_url;
                Ok(())
            }
            Entity::Group(group) => {
                let stored = db
                    .groups
                    .get_mut(&group.gid)
                    .ok_or_else(|| StoreError::NotFound(group.gid.clone()))?;
                stored.name = group.name;
                Ok(())
            }
        })
        .await
    }
}
