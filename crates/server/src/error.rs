//! Error codes returned to clients.
//!
//! Every variant renders to a stable identifier that clients match on, so the
//! `Display` output of this type is part of the wire contract.

use crate::flow::{FlowError, FlowFailure};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // Validation
    #[error("ERROR_TYPE_NOT_MATCH: {0}")]
    TypeNotMatch(String),

    // Auth
    #[error("ERROR_SESSION_NOT_LOGIN")]
    SessionNotLogin,
    #[error("ERROR_LOGIN_FAILED")]
    LoginFailed,

    // Domain conflicts
    #[error("ERROR_USERNAME_EXISTS")]
    UsernameExists,
    #[error("ERROR_USER_NOT_FOUND")]
    UserNotFound,
    #[error("ERROR_GROUP_NOT_FOUND")]
    GroupNotFound,
    #[error("ERROR_CONTACT_EXISTS")]
    ContactExists,
    #[error("ERROR_GROUPID_EXISTS")]
    GroupIdExists,
    #[error("ERROR_MEMBER_EXISTS")]
    MemberExists,
    #[error("ERROR_USER_OFFLINE")]
    UserOffline,

    // Store failures, passed through verbatim
    #[error("{0}")]
    Store(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// The `err` string placed in a reply payload.
    pub fn wire(&self) -> String {
        self.to_string()
    }
}

impl FlowFailure for Error {
    /// Validation, auth and domain outcomes are replies, not faults.
    fn is_routine(&self) -> bool {
        !matches!(self, Error::Store(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<FlowError> for Error {
    fn from(err: FlowError) -> Self {
        Error::Store(err.to_string())
    }
}
