//! Shared domain types: users, viewers and polymorphic target references.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyturnError;

/// Reference to any other stored entity, as a (type tag, numeric id) pair.
///
/// Resolution goes through a tag-to-repository table owned by the
/// action crate; this type only carries the coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub content_type: String,
    pub object_id: i64,
}

impl TargetRef {
    pub fn new(content_type: impl Into<String>, object_id: i64) -> Self {
        Self {
            content_type: content_type.into(),
            object_id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.object_id)
    }
}

impl std::str::FromStr for TargetRef {
    type Err = KeyturnError;

    /// Parse the `type:id` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, id) = s
            .rsplit_once(':')
            .ok_or_else(|| KeyturnError::Validation(format!("Invalid target reference: {}", s)))?;
        if tag.is_empty() {
            return Err(KeyturnError::Validation(format!(
                "Target reference has no type: {}",
                s
            )));
        }
        let object_id = id
            .parse::<i64>()
            .map_err(|e| KeyturnError::Validation(format!("Invalid target id '{}': {}", id, e)))?;
        Ok(Self::new(tag, object_id))
    }
}

/// A user account able to consume tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_staff: bool,
    pub email_verified: bool,
    /// Bearer credential; never serialized.
    #[serde(skip_serializing, default)]
    pub auth_token: String,
    pub created_at: DateTime<Utc>,
}

/// The party looking at a landing page or attempting a consumption.
#[derive(Debug, Clone, Default)]
pub enum Viewer {
    #[default]
    Anonymous,
    User(User),
}

impl Viewer {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Viewer::User(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Viewer::User(user) => Some(user),
            Viewer::Anonymous => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.user().is_some_and(|u| u.is_staff)
    }
}

impl From<User> for Viewer {
    fn from(user: User) -> Self {
        Viewer::User(user)
    }
}
