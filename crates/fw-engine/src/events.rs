//! Engine state-change notifications
//!
//! Structural changes and control-room toggles are announced to observers
//! (GUI, session layer) over channels; sends never block and a lagging or
//! dropped subscriber never stalls the engine.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::channel::ChannelId;

/// State-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    DimChanged(bool),
    ChannelAdded(ChannelId),
    ChannelRemoved(ChannelId),
    ChannelsReordered,
}

/// Broadcast bus for engine events
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Emit an event to every live subscriber, dropping disconnected ones
    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
