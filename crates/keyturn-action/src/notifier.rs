//! Outbound notification delivery.
//!
//! Actions use a [`Notifier`] to send the link of a freshly created token.
//! The default [`LogNotifier`] only writes to the log; deployments plug in
//! real delivery by implementing the trait.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ActionError;

/// A message addressed to a token's recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ActionError>;
}

/// Logs each notification at info level.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ActionError> {
        tracing::info!(
            to = %notification.to,
            subject = %notification.subject,
            "Notification dispatched"
        );
        Ok(())
    }
}

/// Keeps sent notifications in memory. Can be told to fail every send.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ActionError> {
        if self.fail {
            return Err(ActionError::Notification(format!(
                "delivery to {} refused",
                notification.to
            )));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| ActionError::Notification(format!("Outbox lock poisoned: {}", e)))?;
        sent.push(notification.clone());
        Ok(())
    }
}
