//! Token lifecycle controller.
//!
//! Owns the two lifecycle hooks: a new token triggers its action's
//! notification, and a token's transition into the consumed state runs its
//! action exactly once. Both resolve the action through the shared registry
//! at the moment of the event.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use keyturn_core::error::KeyturnError;
use keyturn_core::token::{ActionToken, NewToken, TokenPolicy};
use keyturn_core::types::User;
use keyturn_storage::{TokenFilters, TokenRepository};

use crate::error::ActionError;
use crate::registry::ActionRegistry;

/// Creates, consumes and cancels tokens, firing action hooks on the way.
pub struct TokenLifecycle {
    registry: Arc<ActionRegistry>,
    tokens: Arc<TokenRepository>,
    policy: TokenPolicy,
}

impl TokenLifecycle {
    pub fn new(
        registry: Arc<ActionRegistry>,
        tokens: Arc<TokenRepository>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            registry,
            tokens,
            policy,
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn tokens(&self) -> &Arc<TokenRepository> {
        &self.tokens
    }

    /// Persist a new token and send its notification.
    ///
    /// A missing action or a failed notification is logged; the token is
    /// still returned.
    pub async fn create(&self, new: &NewToken) -> Result<ActionToken, ActionError> {
        let token = self.tokens.insert(new)?;
        info!(token_id = token.id, action = %token.action, "Action token created");

        match self.registry.get_action(&token.action) {
            Some(action) => {
                if let Err(e) = action.send_notification_email(&token).await {
                    error!(
                        token_id = token.id,
                        action = %token.action,
                        error = %e,
                        "Failed to send token notification"
                    );
                }
            }
            None => warn!(
                token_id = token.id,
                action = %token.action,
                "Token created for an unregistered action; no notification sent"
            ),
        }

        Ok(token)
    }

    /// Mark a token consumed by `user`, unconditionally.
    ///
    /// The action runs only if the token was not consumed before. Consuming
    /// an already consumed token overwrites the consumer and timestamp
    /// without running the action again.
    pub async fn consume(&self, token: &ActionToken, user: &User) -> Result<ActionToken, ActionError> {
        let outcome = self
            .tokens
            .consume(token.id, user.id, Utc::now())?
            .ok_or_else(|| KeyturnError::Storage(format!("Token {} not found", token.id)))?;

        if outcome.transitioned {
            self.run_action(&outcome.token).await?;
        }
        Ok(outcome.token)
    }

    /// Consume the token with `key` only if it is still consumable.
    ///
    /// Returns `None` when the key is unknown or the token stopped being
    /// consumable, including when another request consumed it first.
    pub async fn try_consume(&self, key: &str, user: &User) -> Result<Option<ActionToken>, ActionError> {
        let consumed = self
            .tokens
            .consume_if_consumable(key, user.id, Utc::now(), &self.policy)?;

        match consumed {
            Some(token) => {
                self.run_action(&token).await?;
                Ok(Some(token))
            }
            None => {
                debug!("Token was not consumable at commit time");
                Ok(None)
            }
        }
    }

    async fn run_action(&self, token: &ActionToken) -> Result<(), ActionError> {
        let Some(action) = self.registry.get_action(&token.action) else {
            debug!(
                token_id = token.id,
                action = %token.action,
                "Consumed token has no registered action; nothing to execute"
            );
            return Ok(());
        };

        action.execute(token).await.map_err(|e| {
            error!(token_id = token.id, action = %token.action, error = %e, "Action execution failed");
            e
        })?;
        info!(token_id = token.id, action = %token.action, "Action executed");
        Ok(())
    }

    pub fn cancel(&self, ids: &[i64]) -> Result<usize, ActionError> {
        let count = self.tokens.set_canceled(ids, true)?;
        info!(count, "Tokens canceled");
        Ok(count)
    }

    pub fn uncancel(&self, ids: &[i64]) -> Result<usize, ActionError> {
        let count = self.tokens.set_canceled(ids, false)?;
        info!(count, "Tokens uncanceled");
        Ok(count)
    }

    pub fn cancel_keys(&self, keys: &[String]) -> Result<usize, ActionError> {
        Ok(self.tokens.set_canceled_by_keys(keys, true)?)
    }

    pub fn uncancel_keys(&self, keys: &[String]) -> Result<usize, ActionError> {
        Ok(self.tokens.set_canceled_by_keys(keys, false)?)
    }

    pub fn find_by_key(&self, key: &str) -> Result<Option<ActionToken>, ActionError> {
        Ok(self.tokens.find_by_key(key)?)
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<ActionToken>, ActionError> {
        Ok(self.tokens.find_by_id(id)?)
    }

    pub fn list(&self, filters: &TokenFilters) -> Result<Vec<ActionToken>, ActionError> {
        Ok(self.tokens.list(filters, &self.policy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use keyturn_storage::{Database, NewUser, UserRepository};

    use crate::action::AccountAction;

    #[derive(Default)]
    struct Counting {
        executed: AtomicUsize,
        notified: AtomicUsize,
    }

    #[async_trait]
    impl AccountAction for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn execute(&self, _token: &ActionToken) -> Result<(), ActionError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_notification_email(&self, _token: &ActionToken) -> Result<(), ActionError> {
            self.notified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Broken;

    #[async_trait]
    impl AccountAction for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send_notification_email(&self, _token: &ActionToken) -> Result<(), ActionError> {
            Err(ActionError::Notification("mailbox full".to_string()))
        }
    }

    struct Fixture {
        lifecycle: TokenLifecycle,
        counting: Arc<Counting>,
        user: User,
        other: User,
    }

    fn setup() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let users = UserRepository::new(Arc::clone(&db));
        let user = users.create(&NewUser::new("ann@example.com")).unwrap();
        let other = users.create(&NewUser::new("bob@example.com")).unwrap();

        let registry = Arc::new(ActionRegistry::new());
        let counting = Arc::new(Counting::default());
        registry.register_instance(counting.clone()).unwrap();
        registry.register::<Broken>().unwrap();

        let tokens = Arc::new(TokenRepository::new(db));
        Fixture {
            lifecycle: TokenLifecycle::new(registry, tokens, TokenPolicy::default()),
            counting,
            user,
            other,
        }
    }

    #[tokio::test]
    async fn test_create_sends_notification_once() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "counting"))
            .await
            .unwrap();
        assert_eq!(token.key.len(), 40);
        assert_eq!(f.counting.notified.load(Ordering::SeqCst), 1);
        assert_eq!(f.counting.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_survives_failed_notification_and_missing_action() {
        let f = setup();
        let broken = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "broken"))
            .await
            .unwrap();
        assert!(f.lifecycle.find_by_key(&broken.key).unwrap().is_some());

        let orphan = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "gone"))
            .await
            .unwrap();
        assert_eq!(orphan.action, "gone");
    }

    #[tokio::test]
    async fn test_consume_executes_only_on_transition() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "counting"))
            .await
            .unwrap();

        let consumed = f.lifecycle.consume(&token, &f.user).await.unwrap();
        assert!(consumed.is_consumed());
        assert_eq!(consumed.consumer_id, Some(f.user.id));
        assert_eq!(f.counting.executed.load(Ordering::SeqCst), 1);

        let again = f.lifecycle.consume(&consumed, &f.other).await.unwrap();
        assert_eq!(again.consumer_id, Some(f.other.id));
        assert_eq!(f.counting.executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_consume_unregistered_action_is_silent() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "gone"))
            .await
            .unwrap();
        let consumed = f.lifecycle.consume(&token, &f.user).await.unwrap();
        assert!(consumed.is_consumed());
    }

    #[tokio::test]
    async fn test_consume_default_execute_surfaces_error() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "broken"))
            .await
            .unwrap();
        let err = f.lifecycle.consume(&token, &f.user).await.unwrap_err();
        assert!(matches!(err, ActionError::NotImplemented(_)));
        // The state change itself is kept.
        assert!(f
            .lifecycle
            .find_by_id(token.id)
            .unwrap()
            .unwrap()
            .is_consumed());
    }

    #[tokio::test]
    async fn test_try_consume_guards() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "counting"))
            .await
            .unwrap();

        let first = f.lifecycle.try_consume(&token.key, &f.user).await.unwrap();
        assert!(first.is_some());
        let second = f.lifecycle.try_consume(&token.key, &f.other).await.unwrap();
        assert!(second.is_none());
        assert_eq!(f.counting.executed.load(Ordering::SeqCst), 1);

        assert!(f
            .lifecycle
            .try_consume("missing", &f.user)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cancel_blocks_consumption() {
        let f = setup();
        let token = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "counting"))
            .await
            .unwrap();

        assert_eq!(f.lifecycle.cancel(&[token.id]).unwrap(), 1);
        assert!(f.lifecycle.try_consume(&token.key, &f.user).await.unwrap().is_none());

        assert_eq!(f.lifecycle.uncancel(&[token.id]).unwrap(), 1);
        assert!(f.lifecycle.try_consume(&token.key, &f.user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_pending() {
        let f = setup();
        let a = f
            .lifecycle
            .create(&NewToken::new("ann@example.com", "counting"))
            .await
            .unwrap();
        f.lifecycle
            .create(&NewToken::new("bob@example.com", "counting"))
            .await
            .unwrap();
        f.lifecycle.consume(&a, &f.user).await.unwrap();

        let pending = f.lifecycle.list(&TokenFilters::pending()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].email, "bob@example.com");
    }
}
