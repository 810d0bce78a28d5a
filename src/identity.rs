use std::collections::HashMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    User(UserId),
    Anonymous,
}

impl Identity {
    pub fn user(self) -> Option<UserId> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Anonymous => None,
        }
    }
}

/// Resolves the caller behind a session token. The booking engine trusts the answer.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve_current_user(&self, session_token: Option<&str>) -> Identity;

    /// Forget a session. Returns whether it existed.
    async fn end_session(&self, session_token: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum SessionFileError {
    #[error("cannot read sessions file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed sessions file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// In-process session table: opaque token to user id.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, UserId>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON object mapping tokens to user ids.
    pub fn from_json_file(path: &Path) -> Result<Self, SessionFileError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, UserId> = serde_json::from_str(&raw)?;
        let table = Self::new();
        for (token, user) in entries {
            table.sessions.insert(token, user);
        }
        tracing::info!("loaded {} sessions from {}", table.len(), path.display());
        Ok(table)
    }

    /// Start a session for `user` and return its token.
    pub fn issue(&self, user: UserId) -> String {
        let token = Ulid::new().to_string();
        self.sessions.insert(token.clone(), user);
        token
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for SessionTable {
    async fn resolve_current_user(&self, session_token: Option<&str>) -> Identity {
        session_token
            .and_then(|t| self.sessions.get(t).map(|e| *e.value()))
            .map_or(Identity::Anonymous, Identity::User)
    }

    async fn end_session(&self, session_token: &str) -> bool {
        self.revoke(session_token)
    }
}
