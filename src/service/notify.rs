//! Change notifications.
//!
//! Every successful mutation emits a [`ChangeEvent`]. Delivery is best-effort:
//! the service logs and swallows notifier failures.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Result;

/// Event type emitted for every configuration change.
pub const CONFIG_UPDATE: &str = "config_update";

/// Message telling consumers the rule set changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix timestamp in milliseconds at emission
    pub version: i64,
    pub environment: String,
}

impl ChangeEvent {
    /// A `config_update` event stamped with the current time.
    pub fn config_update(environment: &str) -> Self {
        Self {
            event_type: CONFIG_UPDATE.to_string(),
            version: Utc::now().timestamp_millis(),
            environment: environment.to_string(),
        }
    }
}

/// Trait for change notification sinks.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<()>;
}

/// Fans events out to in-process subscribers.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        // No subscribers is not a failure.
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        debug!(receivers, version = event.version, "Broadcast change event");
        Ok(())
    }
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl ChangeNotifier for TracingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        info!(
            event_type = %event.event_type,
            version = event.version,
            environment = %event.environment,
            "Configuration changed"
        );
        Ok(())
    }
}

/// Discards events.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl ChangeNotifier for NoopNotifier {
    async fn notify(&self, _event: &ChangeEvent) -> Result<()> {
        Ok(())
    }
}
