//! Email address confirmation.
//!
//! The token is mailed to the address being confirmed. Consuming it marks
//! the consuming user's address as verified, which is only allowed when
//! that user owns the address.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use keyturn_core::token::{ActionToken, TokenPolicy};
use keyturn_core::types::Viewer;
use keyturn_storage::UserRepository;

use crate::action::{action_name, AccountAction};
use crate::error::ActionError;
use crate::notifier::{Notification, Notifier};

pub const CONFIRM_EMAIL: &str = action_name("confirm-email");

pub struct ConfirmEmailAction {
    users: Arc<UserRepository>,
    notifier: Arc<dyn Notifier>,
    public_url: String,
}

impl ConfirmEmailAction {
    pub fn new(users: Arc<UserRepository>, notifier: Arc<dyn Notifier>, public_url: &str) -> Self {
        Self {
            users,
            notifier,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    fn landing_url(&self, token: &ActionToken) -> String {
        format!("{}/actions/{}", self.public_url, token.key)
    }
}

fn owns_address(viewer: &Viewer, email: &str) -> bool {
    viewer
        .user()
        .is_some_and(|user| user.email.eq_ignore_ascii_case(email))
}

#[async_trait]
impl AccountAction for ConfirmEmailAction {
    fn name(&self) -> &str {
        CONFIRM_EMAIL
    }

    fn landing_page_template_name(&self) -> Option<&str> {
        Some("account_actions/confirm_email.html")
    }

    fn get_extra_context(&self, token: &ActionToken, viewer: &Viewer) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("email".to_string(), json!(token.email));
        context.insert("owns_address".to_string(), json!(owns_address(viewer, &token.email)));
        context
    }

    fn can_be_consumed(&self, token: &ActionToken, viewer: &Viewer, policy: &TokenPolicy) -> bool {
        token.can_be_consumed(policy) && owns_address(viewer, &token.email)
    }

    fn get_consumption_redirect_url(&self, _token: &ActionToken) -> String {
        "/account/".to_string()
    }

    fn get_consumption_success_message(&self, token: &ActionToken) -> String {
        format!("The address {} has been confirmed.", token.email)
    }

    async fn execute(&self, token: &ActionToken) -> Result<(), ActionError> {
        let user_id = token
            .consumer_id
            .ok_or_else(|| ActionError::HandlerFailed("Token has no consumer".to_string()))?;

        if !self.users.mark_email_verified(user_id)? {
            return Err(ActionError::HandlerFailed(format!(
                "User {} not found",
                user_id
            )));
        }
        tracing::info!(user_id, email = %token.email, "Email address confirmed");
        Ok(())
    }

    async fn send_notification_email(&self, token: &ActionToken) -> Result<(), ActionError> {
        let greeting = match token.full_name() {
            Some(name) => format!("Hello {},", name),
            None => "Hello,".to_string(),
        };
        let notification = Notification {
            to: token.email.clone(),
            subject: "Confirm your email address".to_string(),
            body: format!(
                "{}\n\nOpen this link to confirm {}:\n{}\n",
                greeting,
                token.email,
                self.landing_url(token)
            ),
        };
        self.notifier.send(&notification).await
    }
}
