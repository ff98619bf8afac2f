//! The account action token entity and its derived state.
//!
//! Expiration, consumption and consumability are computed from stored
//! timestamps and flags, never stored themselves. Everything that depends
//! on the configured validity window takes a [`TokenPolicy`].

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{TokenConfig, MAX_VALIDITY_DAYS};
use crate::error::{KeyturnError, Result};
use crate::key::KEY_LENGTH;
use crate::types::TargetRef;

pub const MAX_ACTION_LENGTH: usize = 100;
pub const MAX_NAME_LENGTH: usize = 30;

/// Validity window applied to every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    validity: Duration,
}

impl TokenPolicy {
    /// Windows longer than [`MAX_VALIDITY_DAYS`] are capped.
    pub fn new(validity_days: u32) -> Self {
        Self {
            validity: Duration::days(i64::from(validity_days.min(MAX_VALIDITY_DAYS))),
        }
    }

    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.validity_duration_days)
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self::from_config(&TokenConfig::default())
    }
}

/// Display status of a token. `can_be_consumed` remains the only gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Pending,
    Consumed,
    Canceled,
    Expired,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStatus::Pending => write!(f, "pending"),
            TokenStatus::Consumed => write!(f, "consumed"),
            TokenStatus::Canceled => write!(f, "canceled"),
            TokenStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for TokenStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TokenStatus::Pending),
            "consumed" => Ok(TokenStatus::Consumed),
            "canceled" => Ok(TokenStatus::Canceled),
            "expired" => Ok(TokenStatus::Expired),
            _ => Err(format!("Unknown token status: {}", s)),
        }
    }
}

/// A single issuable, consumable account action token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionToken {
    pub id: i64,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumer_id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub is_canceled: bool,
    pub action: String,
    pub target: Option<TargetRef>,
}

impl ActionToken {
    pub fn expiration_date(&self, policy: &TokenPolicy) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(policy.validity())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, policy: &TokenPolicy) -> bool {
        self.is_expired_at(policy, Utc::now())
    }

    pub fn is_expired_at(&self, policy: &TokenPolicy, now: DateTime<Utc>) -> bool {
        now > self.expiration_date(policy)
    }

    /// Both the consumer and the consumption date must be present.
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some() && self.consumer_id.is_some()
    }

    pub fn can_be_consumed(&self, policy: &TokenPolicy) -> bool {
        self.can_be_consumed_at(policy, Utc::now())
    }

    pub fn can_be_consumed_at(&self, policy: &TokenPolicy, now: DateTime<Utc>) -> bool {
        !self.is_canceled && !self.is_expired_at(policy, now) && !self.is_consumed()
    }

    pub fn status(&self, policy: &TokenPolicy) -> TokenStatus {
        self.status_at(policy, Utc::now())
    }

    pub fn status_at(&self, policy: &TokenPolicy, now: DateTime<Utc>) -> TokenStatus {
        if self.is_consumed() {
            TokenStatus::Consumed
        } else if self.is_canceled {
            TokenStatus::Canceled
        } else if self.is_expired_at(policy, now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Pending
        }
    }

    /// Record consumption by `user_id`.
    ///
    /// Unconditional: callers must check `can_be_consumed` first. A second
    /// call overwrites the consumer and date. Returns `true` when this call
    /// moved the token from not consumed to consumed.
    pub fn consume(&mut self, user_id: i64, now: DateTime<Utc>) -> bool {
        let was_consumed = self.is_consumed();
        self.consumer_id = Some(user_id);
        self.consumed_at = Some(now);
        self.updated_at = now;
        !was_consumed
    }

    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.created_at.to_rfc3339(), self.action)
    }
}

/// Data supplied by whoever issues a token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewToken {
    pub email: String,
    pub action: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub target: Option<TargetRef>,
    /// Explicit key; generated at insertion when absent.
    #[serde(default)]
    pub key: Option<String>,
}

impl NewToken {
    pub fn new(email: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn with_names(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Check the field constraints enforced by storage.
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(KeyturnError::Validation(format!(
                "Invalid email address: '{}'",
                self.email
            )));
        }
        if self.action.trim().is_empty() {
            return Err(KeyturnError::Validation(
                "Action name must not be empty".to_string(),
            ));
        }
        if self.action.len() > MAX_ACTION_LENGTH {
            return Err(KeyturnError::Validation(format!(
                "Action name exceeds {} characters",
                MAX_ACTION_LENGTH
            )));
        }
        for (field, value) in [("first_name", &self.first_name), ("last_name", &self.last_name)] {
            if value.as_ref().is_some_and(|v| v.chars().count() > MAX_NAME_LENGTH) {
                return Err(KeyturnError::Validation(format!(
                    "{} exceeds {} characters",
                    field, MAX_NAME_LENGTH
                )));
            }
        }
        if let Some(key) = &self.key {
            if key.is_empty() || key.len() > KEY_LENGTH {
                return Err(KeyturnError::Validation(format!(
                    "Token key must be 1 to {} characters",
                    KEY_LENGTH
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_created_at(created_at: DateTime<Utc>) -> ActionToken {
        ActionToken {
            id: 1,
            key: "k".repeat(KEY_LENGTH),
            created_at,
            updated_at: created_at,
            consumed_at: None,
            consumer_id: None,
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: "ada@example.com".to_string(),
            is_canceled: false,
            action: "confirm-email".to_string(),
            target: None,
        }
    }

    fn fresh_token() -> ActionToken {
        token_created_at(Utc::now())
    }

    #[test]
    fn test_oversized_validity_is_capped() {
        let config = TokenConfig {
            validity_duration_days: u32::MAX,
        };
        let policy = TokenPolicy::from_config(&config);
        assert_eq!(policy.validity(), Duration::days(i64::from(MAX_VALIDITY_DAYS)));

        let token = fresh_token();
        assert!(token.can_be_consumed(&policy));
        assert_eq!(token.status(&policy), TokenStatus::Pending);
    }

    #[test]
    fn test_expiration_saturates_at_max_date() {
        let token = token_created_at(DateTime::<Utc>::MAX_UTC - Duration::days(1));
        let policy = TokenPolicy::new(MAX_VALIDITY_DAYS);
        assert_eq!(token.expiration_date(&policy), DateTime::<Utc>::MAX_UTC);
        assert!(!token.is_expired_at(&policy, Utc::now()));
    }

    #[test]
    fn test_expiration_date() {
        let policy = TokenPolicy::new(2);
        let token = fresh_token();
        assert_eq!(
            token.expiration_date(&policy),
            token.created_at + Duration::days(2)
        );
    }

    #[test]
    fn test_new_token_is_not_expired() {
        let policy = TokenPolicy::default();
        assert!(!fresh_token().is_expired(&policy));
    }

    #[test]
    fn test_backdated_token_is_expired() {
        let policy = TokenPolicy::new(2);
        let token = token_created_at(Utc::now() - Duration::days(100));
        assert!(token.is_expired(&policy));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let policy = TokenPolicy::new(1);
        let token = fresh_token();
        let deadline = token.expiration_date(&policy);
        assert!(!token.is_expired_at(&policy, deadline));
        assert!(token.is_expired_at(&policy, deadline + Duration::seconds(1)));
    }

    #[test]
    fn test_partial_consumption_is_not_consumed() {
        let mut token = fresh_token();
        assert!(!token.is_consumed());

        token.consumed_at = Some(Utc::now());
        assert!(!token.is_consumed());

        token.consumed_at = None;
        token.consumer_id = Some(3);
        assert!(!token.is_consumed());
    }

    #[test]
    fn test_consume_marks_consumed() {
        let mut token = fresh_token();
        let now = Utc::now();
        assert!(token.consume(3, now));
        assert!(token.is_consumed());
        assert_eq!(token.consumer_id, Some(3));
        assert_eq!(token.consumed_at, Some(now));
        assert_eq!(token.updated_at, now);
    }

    #[test]
    fn test_second_consume_overwrites_consumer() {
        let mut token = fresh_token();
        let first = Utc::now();
        assert!(token.consume(3, first));

        let second = first + Duration::seconds(5);
        assert!(!token.consume(4, second));
        assert_eq!(token.consumer_id, Some(4));
        assert_eq!(token.consumed_at, Some(second));
        assert!(token.is_consumed());
    }

    #[test]
    fn test_can_be_consumed_all_combinations() {
        let policy = TokenPolicy::new(2);
        for canceled in [false, true] {
            for expired in [false, true] {
                for consumed in [false, true] {
                    let created_at = if expired {
                        Utc::now() - Duration::days(10)
                    } else {
                        Utc::now()
                    };
                    let mut token = token_created_at(created_at);
                    token.is_canceled = canceled;
                    if consumed {
                        token.consume(1, Utc::now());
                    }
                    let expected = !canceled && !expired && !consumed;
                    assert_eq!(
                        token.can_be_consumed(&policy),
                        expected,
                        "canceled={} expired={} consumed={}",
                        canceled,
                        expired,
                        consumed
                    );
                }
            }
        }
    }

    #[test]
    fn test_status_precedence() {
        let policy = TokenPolicy::new(2);
        let mut token = token_created_at(Utc::now() - Duration::days(10));
        assert_eq!(token.status(&policy), TokenStatus::Expired);

        token.is_canceled = true;
        assert_eq!(token.status(&policy), TokenStatus::Canceled);

        token.consume(1, Utc::now());
        assert_eq!(token.status(&policy), TokenStatus::Consumed);

        assert_eq!(fresh_token().status(&policy), TokenStatus::Pending);
    }

    #[test]
    fn test_status_from_str() {
        for status in [
            TokenStatus::Pending,
            TokenStatus::Consumed,
            TokenStatus::Canceled,
            TokenStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<TokenStatus>(), Ok(status));
        }
        assert!("used".parse::<TokenStatus>().is_err());
    }

    #[test]
    fn test_full_name() {
        let mut token = fresh_token();
        assert_eq!(token.full_name().as_deref(), Some("Ada Lovelace"));
        token.last_name = None;
        assert_eq!(token.full_name().as_deref(), Some("Ada"));
        token.first_name = Some(String::new());
        assert_eq!(token.full_name(), None);
    }

    #[test]
    fn test_display_includes_action() {
        assert!(fresh_token().to_string().ends_with(" - confirm-email"));
    }

    #[test]
    fn test_new_token_validation() {
        assert!(NewToken::new("ada@example.com", "confirm-email").validate().is_ok());
        assert!(NewToken::new("", "confirm-email").validate().is_err());
        assert!(NewToken::new("not-an-email", "confirm-email").validate().is_err());
        assert!(NewToken::new("ada@example.com", "  ").validate().is_err());
        assert!(NewToken::new("ada@example.com", "a".repeat(101)).validate().is_err());
        assert!(NewToken::new("ada@example.com", "x")
            .with_names(Some("a".repeat(31)), None)
            .validate()
            .is_err());
        assert!(NewToken::new("ada@example.com", "x")
            .with_key("k".repeat(41))
            .validate()
            .is_err());
    }
}
