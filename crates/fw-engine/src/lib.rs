//! fw-engine: Real-time audio mixing and routing engine
//!
//! The component that, once per audio-hardware callback, pulls audio through
//! a graph of mixer channels, applies their insert chains, and produces the
//! final mix plus a control-room monitoring tap.
//!
//! - Typed, directional port/connection graph with cycle rejection
//! - Per-channel insert chains hosting plugins behind a uniform lifecycle
//! - Completion barrier: the mixer spin-waits on per-channel `processed`
//!   flags (acquire/release) before the master bus consumes their output
//! - Structural changes (add/remove/reorder channels, plugin loads) are
//!   staged against cycle boundaries, never performed on the audio thread

// Audio processing uses explicit indexing in hot loops
#![allow(clippy::needless_range_loop)]

mod automation;
mod channel;
mod control_room;
mod events;
mod fader;
mod mixer;
mod port;
mod slot;

pub use automation::{AutomationSnapshot, AutomationSource};
pub use channel::{Channel, ChannelId, ChannelPorts};
pub use control_room::{ControlRoom, DIM_DB};
pub use events::{EngineEvent, EventBus};
pub use fader::{pan_gains, Fader};
pub use mixer::{Mixer, MixerCommand, MixerError, MixerHandle, PluginLoadFailure};
pub use port::{ConnectError, PortDirection, PortEvent, PortGraph, PortId, PortKind, PortOwner};
pub use slot::{InsertChain, InsertSlot, STRIP_SIZE};
