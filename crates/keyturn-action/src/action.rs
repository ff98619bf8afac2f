//! The account action contract.
//!
//! An account action decides what a token allows, where its landing page
//! lives, and what happens once the token is consumed.

use async_trait::async_trait;
use serde_json::{Map, Value};

use keyturn_core::token::{ActionToken, TokenPolicy, MAX_ACTION_LENGTH};
use keyturn_core::types::Viewer;

use crate::error::ActionError;

/// Reserved name. No concrete action may use it.
pub const BASE_ACTION_NAME: &str = "base";

/// Template rendered when an action does not name its own landing page.
pub const DEFAULT_LANDING_TEMPLATE: &str = "account_actions/landing.html";

/// Behavior attached to tokens carrying this action's name.
///
/// Only `name` is required. Every other method has the default behavior
/// of a plain confirmation link; override what the action needs.
#[async_trait]
pub trait AccountAction: Send + Sync {
    /// Unique registry name. Must satisfy [`validate_action_name`].
    fn name(&self) -> &str;

    /// Landing page template, if the action has its own.
    fn landing_page_template_name(&self) -> Option<&str> {
        None
    }

    /// Extra values merged into the landing page context.
    fn get_extra_context(&self, _token: &ActionToken, _viewer: &Viewer) -> Map<String, Value> {
        Map::new()
    }

    /// Whether `viewer` may consume `token` right now.
    fn can_be_consumed(&self, token: &ActionToken, _viewer: &Viewer, policy: &TokenPolicy) -> bool {
        token.can_be_consumed(policy)
    }

    /// Where to send the user after a successful consumption.
    fn get_consumption_redirect_url(&self, _token: &ActionToken) -> String {
        "/".to_string()
    }

    /// Flash message shown after a successful consumption.
    fn get_consumption_success_message(&self, _token: &ActionToken) -> String {
        "Your request has been processed.".to_string()
    }

    /// Side effect run exactly once, when the token becomes consumed.
    async fn execute(&self, _token: &ActionToken) -> Result<(), ActionError> {
        Err(ActionError::NotImplemented(self.name().to_string()))
    }

    /// Called once after a token for this action is created.
    async fn send_notification_email(&self, _token: &ActionToken) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Resolve the landing template of an action, falling back to the default.
pub fn landing_template(action: &dyn AccountAction) -> &str {
    action
        .landing_page_template_name()
        .unwrap_or(DEFAULT_LANDING_TEMPLATE)
}

const fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Whether `name` is usable as an action name.
///
/// Names are 1 to 100 characters of `[a-z0-9_-]` and never `"base"`.
pub const fn is_valid_action_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_ACTION_LENGTH {
        return false;
    }
    if bytes_eq(bytes, BASE_ACTION_NAME.as_bytes()) {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_') {
            return false;
        }
        i += 1;
    }
    true
}

/// Checks an action name at compile time.
///
/// Meant for `const` items, where an invalid name fails the build:
///
/// ```
/// use keyturn_action::action_name;
/// const INVITE: &str = action_name("accept-invite");
/// assert_eq!(INVITE, "accept-invite");
/// ```
///
/// The reserved name is rejected:
///
/// ```compile_fail
/// use keyturn_action::action_name;
/// const BASE: &str = action_name("base");
/// println!("{}", BASE);
/// ```
///
/// So is anything outside `[a-z0-9_-]`:
///
/// ```compile_fail
/// use keyturn_action::action_name;
/// const UPPER: &str = action_name("Accept-Invite");
/// println!("{}", UPPER);
/// ```
pub const fn action_name(name: &'static str) -> &'static str {
    assert!(is_valid_action_name(name), "invalid account action name");
    name
}

/// Runtime name check used by the registry.
pub fn validate_action_name(name: &str) -> Result<(), ActionError> {
    if name.is_empty() {
        return Err(ActionError::Configuration(
            "Action name must not be empty".to_string(),
        ));
    }
    if name == BASE_ACTION_NAME {
        return Err(ActionError::Configuration(format!(
            "Action name '{}' is reserved",
            BASE_ACTION_NAME
        )));
    }
    if name.len() > MAX_ACTION_LENGTH {
        return Err(ActionError::Configuration(format!(
            "Action name '{}' exceeds {} characters",
            name, MAX_ACTION_LENGTH
        )));
    }
    if !is_valid_action_name(name) {
        return Err(ActionError::Configuration(format!(
            "Action name '{}' may only contain lowercase letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}
