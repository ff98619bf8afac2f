//! Actions shipped with keyturn.

pub mod confirm_email;

use std::sync::Arc;

use keyturn_storage::UserRepository;

use crate::error::ActionError;
use crate::notifier::Notifier;
use crate::registry::ActionRegistry;

pub use confirm_email::{ConfirmEmailAction, CONFIRM_EMAIL};

/// Register every built-in action with `registry`.
pub fn register_builtin_actions(
    registry: &ActionRegistry,
    users: Arc<UserRepository>,
    notifier: Arc<dyn Notifier>,
    public_url: &str,
) -> Result<(), ActionError> {
    registry.register_instance(Arc::new(ConfirmEmailAction::new(
        users, notifier, public_url,
    )))?;
    Ok(())
}
