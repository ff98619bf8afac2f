//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use keyturn_action::{ActionRegistry, TargetResolvers, TokenLifecycle};
use keyturn_core::config::KeyturnConfig;
use keyturn_core::token::TokenPolicy;
use keyturn_storage::{Database, TokenRepository, UserRepository};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KeyturnConfig>,
    pub database: Arc<Database>,
    /// Resolves bearer credentials to users.
    pub users: Arc<UserRepository>,
    /// Token operations and action hooks.
    pub lifecycle: Arc<TokenLifecycle>,
    pub targets: Arc<TargetResolvers>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: KeyturnConfig,
        database: Arc<Database>,
        registry: Arc<ActionRegistry>,
        targets: TargetResolvers,
    ) -> Self {
        let policy = TokenPolicy::from_config(&config.tokens);
        let tokens = Arc::new(TokenRepository::new(Arc::clone(&database)));
        Self {
            config: Arc::new(config),
            users: Arc::new(UserRepository::new(Arc::clone(&database))),
            lifecycle: Arc::new(TokenLifecycle::new(registry, tokens, policy)),
            database,
            targets: Arc::new(targets),
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        self.lifecycle.registry()
    }

    pub fn policy(&self) -> &TokenPolicy {
        self.lifecycle.policy()
    }
}
