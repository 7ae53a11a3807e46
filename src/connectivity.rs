//! Explicit connectivity input.
//!
//! The host platform reports online/offline transitions through
//! [`ConnectivityMonitor::set`]; the sync orchestrator watches the channel.

use log::info;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.sender.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    /// Publishes a new state; repeated identical states do not wake watchers.
    pub fn set(&self, state: Connectivity) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!("Connectivity changed: {:?}", state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}
