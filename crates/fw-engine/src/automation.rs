//! Read-only automation queries
//!
//! The track/automation layer lives outside the engine; per-channel control
//! values are resolved through this interface before each channel's
//! `process` call and applied as a snapshot.

use crate::channel::ChannelId;

/// Control values resolved for one channel at the current position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationSnapshot {
    /// Fader position in dB
    pub gain_db: f64,
    /// Pan position, -1.0 (left) to 1.0 (right)
    pub pan: f64,
    pub mute: bool,
    pub solo: bool,
}

/// Read-only view onto the timeline/automation data a channel represents.
///
/// Implemented by the session layer; the engine never mutates it.
pub trait AutomationSource: Send + Sync {
    /// Resolve the current control values for `channel`, or `None` when the
    /// channel has no automation and keeps its manual settings.
    fn snapshot(&self, channel: ChannelId) -> Option<AutomationSnapshot>;
}
