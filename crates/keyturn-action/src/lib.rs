//! Account action engine for keyturn.
//!
//! Holds the action contract, the registry that maps token action names to
//! implementations, and the lifecycle controller that fires notification
//! and execution hooks as tokens are created and consumed.

pub mod action;
pub mod builtin;
pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod registry;
pub mod target;

pub use action::{
    action_name, is_valid_action_name, landing_template, validate_action_name, AccountAction,
    BASE_ACTION_NAME, DEFAULT_LANDING_TEMPLATE,
};
pub use builtin::{register_builtin_actions, ConfirmEmailAction, CONFIRM_EMAIL};
pub use error::ActionError;
pub use lifecycle::TokenLifecycle;
pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use registry::ActionRegistry;
pub use target::{TargetResolver, TargetResolvers};
