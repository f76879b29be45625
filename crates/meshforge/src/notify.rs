//! Resource change notifications.
//!
//! Every persisted asset fires one [`ResourceEvent::ListChanged`]; each SSE
//! listener holds its own receiver.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceEvent {
    ListChanged,
}

impl ResourceEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceEvent::ListChanged => "resources/list_changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceNotifier {
    tx: broadcast::Sender<ResourceEvent>,
}

impl Default for ResourceNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ResourceNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.tx.subscribe()
    }

    /// Tell every listener the resource list changed. Returns how many
    /// listeners were reached; zero listeners is not an error.
    pub fn notify_list_changed(&self) -> usize {
        match self.tx.send(ResourceEvent::ListChanged) {
            Ok(n) => {
                tracing::debug!(listeners = n, "Resources list changed");
                n
            }
            Err(_) => 0,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
