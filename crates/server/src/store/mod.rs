//! User and group storage
//!
//! Handlers reach storage only through the [`Store`] trait, one single-shot
//! async call per operation. [`JsonStore`] is the bundled implementation.

pub mod json_store;

pub use json_store::JsonStore;

use crate::flow::FlowError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store failures. The `Display` text is forwarded to clients unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ERROR_USER_DATA_{0}")]
    MissingField(&'static str),
    #[error("ERROR_USER_EXISTS")]
    UserExists,
    #[error("ERROR_GROUP_EXISTS")]
    GroupExists,
    #[error("ERROR_RECORD_NOT_FOUND: {0}")]
    NotFound(String),
    #[error("ERROR_INVALID_PATTERN: {0}")]
    InvalidPattern(String),
    #[error("ERROR_STORE_IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("ERROR_STORE_SERDE: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("ERROR_STORE_HASH: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("ERROR_STORE_WORKER: {0}")]
    Worker(String),
    #[error("ERROR_STORE_CLOSED")]
    Closed,
    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub username: String,
    pub password_hash: String,
    pub nickname: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn has_contact(&self, username: &str) -> bool {
        self.contacts.iter().any(|c| c == username)
    }
}

/// Public view of a user returned to other clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    pub nickname: String,
    pub description: String,
    pub avatar_url: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            nickname: user.nickname.clone(),
            description: user.description.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub nickname: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// Stored group record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub gid: String,
    pub name: String,
    pub creator: String,
    #[serde(default)]
    pub administrators: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    /// Caller-chosen id; generated when absent.
    pub gid: Option<String>,
    pub name: String,
    pub creator: String,
}

/// A record handed back to [`Store::save`].
#[derive(Debug, Clone)]
pub enum Entity {
    User(User),
    Group(Group),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>>;

    async fn add_user(&self, new: NewUser) -> StoreResult<User>;

    /// `Ok(false)` for an unknown user or a wrong password.
    async fn authorize_user(&self, username: &str, password: &str) -> StoreResult<bool>;

    /// Users whose username or nickname matches the regular expression.
    async fn search_users(&self, pattern: &str) -> StoreResult<Vec<User>>;

    /// Record `contact` in `owner`'s contact list.
    async fn add_contact(&self, owner: &str, contact: &str) -> StoreResult<()>;

    /// Create a group. The creator becomes its first member and administrator.
    async fn add_group(&self, new: NewGroup) -> StoreResult<Group>;

    async fn find_group(&self, gid: &str) -> StoreResult<Option<Group>>;

    async fn search_groups(&self, pattern: &str) -> StoreResult<Vec<Group>>;

    async fn join_group(&self, username: &str, gid: &str) -> StoreResult<()>;

    /// Persist the editable fields of `entity`: nickname, description and
    /// avatar for a user, the name for a group. Contact, group and member
    /// lists belong to their own operations and are left as stored.
    async fn save(&self, entity: Entity) -> StoreResult<()>;
}
