//! Process-wide pool of account actions, keyed by name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::action::{validate_action_name, AccountAction};
use crate::error::ActionError;

/// Registry of action instances.
///
/// Each registered action is instantiated once and shared: every lookup
/// returns a clone of the same `Arc`. Build one at startup and share it
/// behind an `Arc` with everything that needs to resolve actions.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn AccountAction>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate `A` once and register it under its own name.
    pub fn register<A>(&self) -> Result<Arc<dyn AccountAction>, ActionError>
    where
        A: AccountAction + Default + 'static,
    {
        self.register_instance(Arc::new(A::default()))
    }

    /// Register an already-built action, for actions that carry dependencies.
    pub fn register_instance(
        &self,
        action: Arc<dyn AccountAction>,
    ) -> Result<Arc<dyn AccountAction>, ActionError> {
        let name = action.name().to_string();
        validate_action_name(&name)?;

        let mut actions = self.write();
        if actions.contains_key(&name) {
            return Err(ActionError::AlreadyRegistered(name));
        }
        actions.insert(name.clone(), Arc::clone(&action));
        info!(action = %name, "Account action registered");
        Ok(action)
    }

    /// Remove an action. Fails if nothing is registered under `name`.
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn AccountAction>, ActionError> {
        let removed = self
            .write()
            .remove(name)
            .ok_or_else(|| ActionError::NotRegistered(name.to_string()))?;
        debug!(action = %name, "Account action unregistered");
        Ok(removed)
    }

    pub fn unregister_all(&self) {
        self.write().clear();
    }

    pub fn get_action(&self, name: &str) -> Option<Arc<dyn AccountAction>> {
        self.read().get(name).cloned()
    }

    /// All registered actions, ordered by name.
    pub fn get_actions(&self) -> Vec<Arc<dyn AccountAction>> {
        let mut actions: Vec<_> = self.read().values().cloned().collect();
        actions.sort_by(|a, b| a.name().cmp(b.name()));
        actions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Every mutation is a single map operation, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn AccountAction>>> {
        self.actions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn AccountAction>>> {
        self.actions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Invite;

    #[async_trait]
    impl AccountAction for Invite {
        fn name(&self) -> &str {
            "invite"
        }
    }

    #[derive(Default)]
    struct ResetPassword;

    #[async_trait]
    impl AccountAction for ResetPassword {
        fn name(&self) -> &str {
            "reset-password"
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl AccountAction for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_and_get_returns_same_instance() {
        let registry = ActionRegistry::new();
        let registered = registry.register::<Invite>().unwrap();

        let first = registry.get_action("invite").unwrap();
        let second = registry.get_action("invite").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &registered));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ActionRegistry::new();
        registry.register::<Invite>().unwrap();
        let err = registry.register::<Invite>().err().unwrap();
        assert!(matches!(err, ActionError::AlreadyRegistered(ref n) if n == "invite"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let registry = ActionRegistry::new();
        for name in ["", "base", "Has Caps"] {
            let err = registry.register_instance(Arc::new(Named(name))).err().unwrap();
            assert!(matches!(err, ActionError::Configuration(_)));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = ActionRegistry::new();
        registry.register::<Invite>().unwrap();

        registry.unregister("invite").unwrap();
        assert!(registry.get_action("invite").is_none());

        let err = registry.unregister("invite").err().unwrap();
        assert!(matches!(err, ActionError::NotRegistered(_)));

        // Can be registered again after removal.
        registry.register::<Invite>().unwrap();
        assert!(registry.contains("invite"));
    }

    #[test]
    fn test_get_actions_sorted_and_unregister_all() {
        let registry = ActionRegistry::new();
        registry.register::<ResetPassword>().unwrap();
        registry.register::<Invite>().unwrap();

        let names: Vec<String> = registry
            .get_actions()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["invite", "reset-password"]);
        assert_eq!(registry.names(), names);

        registry.unregister_all();
        assert!(registry.is_empty());
        assert!(registry.get_action("invite").is_none());
    }

    #[test]
    fn test_shared_across_threads() {
        let registry = Arc::new(ActionRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register::<Invite>().is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
