//! Mixer orchestration: channel collection, completion barrier, master bus
//!
//! `process(nframes)` is the engine's single real-time entry point. The
//! mixer never spawns threads — channel work may be dispatched to workers
//! by an upstream scheduler, or run in-process via `run_channels`; either
//! way the mixer only consumes the per-channel `processed` flags, spinning
//! cooperatively (no OS blocking) until every non-master channel is done,
//! then lets the master channel pull the finished outputs.
//!
//! Structural mutations (add/remove/reorder channels, wiring, plugin loads)
//! are serialized by one structural lock that is never taken on the
//! real-time path, and staged against cycle boundaries: stop the real-time
//! path, wait until no cycle is in flight, mutate, resume.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rtrb::{Consumer, Producer, RingBuffer};
use thiserror::Error;

use fw_core::{BufferSize, Sample, SampleRate};
use fw_plugin::{PluginError, PluginHost};

use crate::automation::AutomationSource;
use crate::channel::{Channel, ChannelId, ChannelPorts};
use crate::control_room::ControlRoom;
use crate::events::{EngineEvent, EventBus};
use crate::port::{PortDirection, PortGraph, PortId, PortKind, PortOwner};

/// UI command queue depth
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Mixer operation errors (structural paths only; the real-time path is
/// error-free by contract)
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("no channel at position {0}")]
    NotFound(usize),

    #[error("channel {0:?} is not part of this mixer")]
    UnknownChannel(ChannelId),
}

/// Control change sent from the UI thread over the lock-free queue
#[derive(Debug, Clone, Copy)]
pub enum MixerCommand {
    SetChannelGain(ChannelId, f64),
    SetChannelPan(ChannelId, f64),
    SetChannelMute(ChannelId, bool),
    SetChannelSolo(ChannelId, bool),
    SetChannelListen(ChannelId, bool),
    SetMasterGain(f64),
    SetDimOutput(bool),
    SetMonitorVolume(f64),
    SetListenVolume(f64),
}

/// One slot that failed to instantiate during `load_plugins` (reported,
/// non-fatal: the slot stays a pass-through)
#[derive(Debug)]
pub struct PluginLoadFailure {
    pub channel: ChannelId,
    pub slot: usize,
    pub error: PluginError,
}

struct ListenBus {
    left: Vec<Sample>,
    right: Vec<Sample>,
}

/// The mixing engine
pub struct Mixer {
    channels: RwLock<Vec<Arc<Channel>>>,
    master: RwLock<Option<Arc<Channel>>>,
    graph: RwLock<PortGraph>,
    control_room: ControlRoom,
    events: Arc<EventBus>,
    automation: RwLock<Option<Arc<dyn AutomationSource>>>,
    commands: Mutex<Consumer<MixerCommand>>,
    /// Real-time path enable; cleared to stage structural changes
    run: AtomicBool,
    /// True from `begin_cycle` until `process` returns
    cycle_in_flight: AtomicBool,
    /// "Any channel soloed" for the current cycle
    solo_active: AtomicBool,
    /// Serializes all structural mutation; never taken on the RT path
    structural: Mutex<()>,
    /// Cycles abandoned with channels still pending (observability)
    deadline_misses: AtomicU64,
    listen_bus: Mutex<ListenBus>,
    sample_rate: f64,
    block_size: usize,
}

impl Mixer {
    pub fn new(sample_rate: f64, block_size: usize) -> (Arc<Self>, MixerHandle) {
        let (command_tx, command_rx) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let events = Arc::new(EventBus::new());

        log::info!(
            "initializing mixer ({} Hz, {} frames)",
            sample_rate,
            block_size
        );

        let mixer = Arc::new(Self {
            channels: RwLock::new(Vec::new()),
            master: RwLock::new(None),
            graph: RwLock::new(PortGraph::new(block_size)),
            control_room: ControlRoom::new(block_size, events.clone()),
            events,
            automation: RwLock::new(None),
            commands: Mutex::new(command_rx),
            run: AtomicBool::new(true),
            cycle_in_flight: AtomicBool::new(false),
            solo_active: AtomicBool::new(false),
            structural: Mutex::new(()),
            deadline_misses: AtomicU64::new(0),
            listen_bus: Mutex::new(ListenBus {
                left: vec![0.0; block_size],
                right: vec![0.0; block_size],
            }),
            sample_rate,
            block_size,
        });

        (mixer, MixerHandle { command_tx })
    }

    /// Construct from the typed audio configuration
    pub fn with_config(sample_rate: SampleRate, buffer_size: BufferSize) -> (Arc<Self>, MixerHandle) {
        Self::new(sample_rate.as_f64(), buffer_size.as_usize())
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn control_room(&self) -> &ControlRoom {
        &self.control_room
    }

    pub fn set_automation_source(&self, source: Arc<dyn AutomationSource>) {
        *self.automation.write() = Some(source);
    }

    pub fn deadline_misses(&self) -> u64 {
        self.deadline_misses.load(Ordering::Relaxed)
    }

    // ---- run control ----

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    /// Engine-wide stop: interrupts a spinning completion wait at its next
    /// poll and keeps further cycles from starting.
    pub fn stop(&self) {
        self.run.store(false, Ordering::Release);
    }

    pub fn start(&self) {
        self.run.store(true, Ordering::Release);
    }

    /// Stop the real-time path and wait until no cycle is in flight.
    /// Returns whether it was running, for a paired `resume`.
    /// SeqCst against `begin_cycle`'s flag-then-run sequence, so exactly
    /// one side ever observes the other's stale value.
    fn pause(&self) -> bool {
        let was_running = self.run.swap(false, Ordering::SeqCst);
        while self.cycle_in_flight.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        was_running
    }

    fn resume(&self) {
        self.run.store(true, Ordering::Release);
    }

    // ---- structural operations (non-real-time) ----

    /// Create and append a channel
    pub fn create_channel(&self, name: &str) -> Arc<Channel> {
        let channel = Arc::new(Channel::new(name, self.block_size));
        self.add_channel(channel.clone());
        channel
    }

    /// Append a channel; its order index becomes the previous count.
    pub fn add_channel(&self, channel: Arc<Channel>) {
        let _guard = self.structural.lock();
        let was_running = self.pause();

        self.register_ports(&channel);
        {
            let mut channels = self.channels.write();
            channel.set_order(channels.len());
            channels.push(channel.clone());
        }

        log::info!("added channel '{}' {:?}", channel.name(), channel.id());
        self.events.emit(EngineEvent::ChannelAdded(channel.id()));
        if was_running {
            self.resume();
        }
    }

    /// Install the master channel. It is not part of the regular
    /// collection and is never removable.
    pub fn add_master_channel(&self, channel: Arc<Channel>) {
        debug_assert!(channel.is_master());
        let _guard = self.structural.lock();
        let was_running = self.pause();

        self.register_ports(&channel);
        *self.master.write() = Some(channel.clone());

        log::info!("installed master channel '{}'", channel.name());
        if was_running {
            self.resume();
        }
    }

    pub fn master(&self) -> Option<Arc<Channel>> {
        self.master.read().clone()
    }

    fn register_ports(&self, channel: &Arc<Channel>) {
        let mut graph = self.graph.write();
        let owner = PortOwner(channel.id().0);
        let ports = ChannelPorts {
            input: [
                graph.register_port(owner, PortDirection::Input, PortKind::Audio, "in L"),
                graph.register_port(owner, PortDirection::Input, PortKind::Audio, "in R"),
            ],
            output: [
                graph.register_port(owner, PortDirection::Output, PortKind::Audio, "out L"),
                graph.register_port(owner, PortDirection::Output, PortKind::Audio, "out R"),
            ],
        };
        channel.set_ports(Some(ports));
    }

    /// Remove a channel: mark it non-processing, wait for in-flight work,
    /// detach its ports, close the order gap and release its resources.
    pub fn remove_channel(&self, id: ChannelId) -> Result<(), MixerError> {
        let _guard = self.structural.lock();
        let was_running = self.pause();

        let removed = {
            let mut channels = self.channels.write();
            match channels.iter().position(|c| c.id() == id) {
                Some(pos) => {
                    let channel = channels.remove(pos);
                    channel.set_enabled(false);
                    channel.wait_idle();
                    for (i, c) in channels.iter().enumerate() {
                        c.set_order(i);
                    }
                    Some(channel)
                }
                None => None,
            }
        };

        let result = match removed {
            Some(channel) => {
                self.graph.write().remove_ports_of(PortOwner(id.0));
                channel.set_ports(None);
                channel.unload_plugins();
                log::info!("removed channel '{}' {:?}", channel.name(), id);
                self.events.emit(EngineEvent::ChannelRemoved(id));
                Ok(())
            }
            None => Err(MixerError::UnknownChannel(id)),
        };

        if was_running {
            self.resume();
        }
        result
    }

    /// Stable reorder: channels between the old and new position shift by
    /// one, then order indices are renormalized.
    pub fn set_channel_position(&self, id: ChannelId, position: usize) -> Result<(), MixerError> {
        let _guard = self.structural.lock();
        let was_running = self.pause();

        let result = {
            let mut channels = self.channels.write();
            match channels.iter().position(|c| c.id() == id) {
                Some(old) => {
                    let channel = channels.remove(old);
                    let new = position.min(channels.len());
                    channels.insert(new, channel);
                    for (i, c) in channels.iter().enumerate() {
                        c.set_order(i);
                    }
                    Ok(())
                }
                None => Err(MixerError::UnknownChannel(id)),
            }
        };

        if result.is_ok() {
            self.events.emit(EngineEvent::ChannelsReordered);
        }
        if was_running {
            self.resume();
        }
        result
    }

    /// O(n) lookup by order index. A miss is reported, not fatal — a
    /// caller holding a stale position after a concurrent removal must
    /// tolerate it.
    pub fn get_channel_at_position(&self, position: usize) -> Result<Arc<Channel>, MixerError> {
        let channels = self.channels.read();
        for channel in channels.iter() {
            if channel.order() == position {
                return Ok(channel.clone());
            }
        }
        log::warn!("no channel found at position {}", position);
        Err(MixerError::NotFound(position))
    }

    pub fn num_channels(&self) -> usize {
        self.channels.read().len()
    }

    /// Snapshot of the ordered channel collection
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().clone()
    }

    pub fn channel_by_id(&self, id: ChannelId) -> Option<Arc<Channel>> {
        if let Some(master) = self.master.read().as_ref() {
            if master.id() == id {
                return Some(master.clone());
            }
        }
        self.channels
            .read()
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Structural access to the connection graph (wiring external sources,
    /// inspecting the processing order). Staged against cycle boundaries.
    pub fn wire<R>(&self, f: impl FnOnce(&mut PortGraph) -> R) -> R {
        let _guard = self.structural.lock();
        let was_running = self.pause();
        let result = f(&mut self.graph.write());
        if was_running {
            self.resume();
        }
        result
    }

    /// Instantiate every deferred plugin descriptor across all strips,
    /// master included. Project-load path only. A failure on one slot is
    /// reported and does not abort the rest.
    pub fn load_plugins(&self, host: &PluginHost) -> Vec<PluginLoadFailure> {
        let _guard = self.structural.lock();
        let was_running = self.pause();

        let mut failures = Vec::new();
        let mut strips = self.channels.read().clone();
        if let Some(master) = self.master.read().clone() {
            strips.push(master);
        }
        for channel in strips {
            for (slot, error) in channel.instantiate_plugins(host) {
                log::warn!(
                    "channel {:?} slot {}: plugin load failed: {}",
                    channel.id(),
                    slot,
                    error
                );
                failures.push(PluginLoadFailure {
                    channel: channel.id(),
                    slot,
                    error,
                });
            }
        }

        if was_running {
            self.resume();
        }
        failures
    }

    // ---- real-time path ----

    /// Sum audio into a channel's input accumulator (driver/source path)
    pub fn feed_channel(
        &self,
        id: ChannelId,
        left: &[Sample],
        right: &[Sample],
    ) -> Result<(), MixerError> {
        match self.channel_by_id(id) {
            Some(channel) => {
                channel.feed_input(left, right);
                Ok(())
            }
            None => Err(MixerError::UnknownChannel(id)),
        }
    }

    /// Write into a graph port's cycle buffer (external source path,
    /// between `begin_cycle` and channel dispatch)
    pub fn write_port(&self, port: PortId, data: &[Sample]) {
        self.graph.write().write(port, data);
    }

    /// Start a cycle: drain pending UI commands, reset completion flags,
    /// capture the cycle's solo state, open the graph's cycle buffers.
    /// Returns false when the engine is stopped.
    pub fn begin_cycle(&self, nframes: usize) -> bool {
        // Raise the in-flight flag before checking `run` (SeqCst, paired
        // with `pause`): a pauser either sees the flag and waits, or we see
        // its stop and back out.
        self.cycle_in_flight.store(true, Ordering::SeqCst);
        if !self.run.load(Ordering::SeqCst) {
            self.cycle_in_flight.store(false, Ordering::SeqCst);
            return false;
        }

        self.drain_commands();

        let mut any_solo = false;
        {
            let channels = self.channels.read();
            for channel in channels.iter() {
                channel.mark_unprocessed();
                if channel.is_enabled() && channel.is_soloed() {
                    any_solo = true;
                }
            }
        }
        if let Some(master) = self.master.read().as_ref() {
            master.mark_unprocessed();
        }
        self.solo_active.store(any_solo, Ordering::Relaxed);

        self.graph.write().begin_cycle(nframes);
        true
    }

    /// The cycle-wide "any channel soloed" state captured by `begin_cycle`
    pub fn solo_active(&self) -> bool {
        self.solo_active.load(Ordering::Relaxed)
    }

    /// In-process sequential dispatch of channel work. Hosts with a worker
    /// pool dispatch `Channel::process` themselves instead; the barrier in
    /// `process` works either way.
    pub fn run_channels(&self, nframes: usize) {
        let automation = self.automation.read().clone();
        let solo_active = self.solo_active();
        let channels = self.channels.read();
        let graph = self.graph.read();

        for channel in channels.iter().filter(|c| c.is_enabled()) {
            if let Some(source) = automation.as_ref() {
                if let Some(snapshot) = source.snapshot(channel.id()) {
                    channel.apply_snapshot(&snapshot);
                }
            }
            channel.pull_graph_input(&graph, nframes);
            channel.process(nframes, solo_active);
        }
    }

    /// Real-time entry point: wait for every non-master channel to finish,
    /// then let the master pull, process and hand the result to the
    /// control room.
    ///
    /// The wait is a cooperative spin (no blocking syscalls), interrupted
    /// by `stop` at the next poll. Flag loads use acquire ordering, paired
    /// with each channel's release store, so a channel's buffer writes are
    /// visible once its flag is.
    pub fn process(&self, nframes: usize) {
        {
            let channels = self.channels.read();
            loop {
                if !self.run.load(Ordering::Acquire) {
                    // Engine-wide stop: abandon the cycle
                    if channels
                        .iter()
                        .any(|c| c.is_enabled() && !c.is_processed())
                    {
                        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
                    }
                    // Unprocessed channels still hold this cycle's fed
                    // input; drop it so it is not double-counted later.
                    for channel in channels.iter() {
                        channel.clear_input();
                    }
                    if let Some(master) = self.master.read().as_ref() {
                        master.clear_input();
                    }
                    self.graph.write().end_cycle();
                    self.cycle_in_flight.store(false, Ordering::Release);
                    return;
                }
                if channels
                    .iter()
                    .all(|c| !c.is_enabled() || c.is_processed())
                {
                    break;
                }
                std::hint::spin_loop();
            }
        }

        if let Some(master) = self.master.read().clone() {
            {
                let channels = self.channels.read();
                let mut listen = self.listen_bus.lock();
                let n = nframes.min(listen.left.len());
                listen.left[..n].fill(0.0);
                listen.right[..n].fill(0.0);

                // The master is the final bus every channel routes to:
                // pull and sum the finished outputs.
                for channel in channels.iter().filter(|c| c.is_enabled()) {
                    let listened = channel.is_listened();
                    channel.with_output(nframes, |left, right| {
                        master.feed_input(left, right);
                        if listened {
                            for i in 0..n.min(left.len()) {
                                listen.left[i] += left[i];
                                listen.right[i] += right[i];
                            }
                        }
                    });
                }
            }

            master.process(nframes, false);

            let listen = self.listen_bus.lock();
            master.with_output(nframes, |left, right| {
                let n = nframes.min(listen.left.len());
                self.control_room
                    .monitor(left, right, &listen.left[..n], &listen.right[..n]);
            });
        }

        self.graph.write().end_cycle();
        self.cycle_in_flight.store(false, Ordering::Release);
    }

    /// Convenience for single-threaded hosts and tests: one full cycle.
    pub fn run_cycle(&self, nframes: usize) {
        if self.begin_cycle(nframes) {
            self.run_channels(nframes);
            self.process(nframes);
        }
    }

    fn drain_commands(&self) {
        // try_lock: the queue consumer is only ever contended by another
        // cycle, never held across one
        if let Some(mut commands) = self.commands.try_lock() {
            while let Ok(command) = commands.pop() {
                self.apply_command(command);
            }
        }
    }

    fn apply_command(&self, command: MixerCommand) {
        match command {
            MixerCommand::SetChannelGain(id, db) => {
                if let Some(channel) = self.channel_by_id(id) {
                    channel.fader().set_gain_db(db);
                }
            }
            MixerCommand::SetChannelPan(id, pan) => {
                if let Some(channel) = self.channel_by_id(id) {
                    channel.set_pan(pan);
                }
            }
            MixerCommand::SetChannelMute(id, mute) => {
                if let Some(channel) = self.channel_by_id(id) {
                    channel.set_mute(mute);
                }
            }
            MixerCommand::SetChannelSolo(id, solo) => {
                if let Some(channel) = self.channel_by_id(id) {
                    channel.set_solo(solo);
                }
            }
            MixerCommand::SetChannelListen(id, listen) => {
                if let Some(channel) = self.channel_by_id(id) {
                    channel.set_listen(listen);
                }
            }
            MixerCommand::SetMasterGain(db) => {
                if let Some(master) = self.master.read().as_ref() {
                    master.fader().set_gain_db(db);
                }
            }
            MixerCommand::SetDimOutput(dim) => {
                self.control_room.set_dim_output(dim);
            }
            MixerCommand::SetMonitorVolume(db) => {
                self.control_room.vol_fader().set_gain_db(db);
            }
            MixerCommand::SetListenVolume(db) => {
                self.control_room.listen_vol_fader().set_gain_db(db);
            }
        }
    }
}

/// Handle for controlling the mixer from the UI thread over the lock-free
/// command queue
pub struct MixerHandle {
    command_tx: Producer<MixerCommand>,
}

impl MixerHandle {
    pub fn set_channel_gain(&mut self, id: ChannelId, db: f64) {
        let _ = self.command_tx.push(MixerCommand::SetChannelGain(id, db));
    }

    pub fn set_channel_pan(&mut self, id: ChannelId, pan: f64) {
        let _ = self.command_tx.push(MixerCommand::SetChannelPan(id, pan));
    }

    pub fn set_channel_mute(&mut self, id: ChannelId, mute: bool) {
        let _ = self.command_tx.push(MixerCommand::SetChannelMute(id, mute));
    }

    pub fn set_channel_solo(&mut self, id: ChannelId, solo: bool) {
        let _ = self.command_tx.push(MixerCommand::SetChannelSolo(id, solo));
    }

    pub fn set_channel_listen(&mut self, id: ChannelId, listen: bool) {
        let _ = self
            .command_tx
            .push(MixerCommand::SetChannelListen(id, listen));
    }

    pub fn set_master_gain(&mut self, db: f64) {
        let _ = self.command_tx.push(MixerCommand::SetMasterGain(db));
    }

    pub fn set_dim_output(&mut self, dim: bool) {
        let _ = self.command_tx.push(MixerCommand::SetDimOutput(dim));
    }

    pub fn set_monitor_volume(&mut self, db: f64) {
        let _ = self.command_tx.push(MixerCommand::SetMonitorVolume(db));
    }

    pub fn set_listen_volume(&mut self, db: f64) {
        let _ = self.command_tx.push(MixerCommand::SetListenVolume(db));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_plugin::{InternalKind, PluginDescriptor};
    use std::f64::consts::FRAC_1_SQRT_2;
    use std::path::PathBuf;

    const BLOCK: usize = 64;

    fn setup(num_channels: usize) -> (Arc<Mixer>, MixerHandle, Vec<Arc<Channel>>, Arc<Channel>) {
        let (mixer, handle) = Mixer::new(48000.0, BLOCK);
        let master = Arc::new(Channel::new_master("Master", BLOCK));
        mixer.add_master_channel(master.clone());

        let channels = (0..num_channels)
            .map(|i| mixer.create_channel(&format!("Ch {}", i + 1)))
            .collect();
        (mixer, handle, channels, master)
    }

    fn impulse() -> Vec<Sample> {
        let mut buf = vec![0.0; BLOCK];
        buf[0] = 1.0;
        buf
    }

    #[test]
    fn test_impulse_sum_reaches_master() {
        let (mixer, _handle, channels, master) = setup(2);

        for ch in &channels {
            ch.feed_input(&impulse(), &impulse());
        }
        mixer.run_cycle(BLOCK);

        for ch in &channels {
            assert!(ch.is_processed());
        }
        // Two unit impulses, unity gain, centre pan (constant power):
        // master holds their sum.
        master.with_output(BLOCK, |left, right| {
            assert!((left[0] - 2.0 * FRAC_1_SQRT_2).abs() < 1e-12);
            assert!((right[0] - 2.0 * FRAC_1_SQRT_2).abs() < 1e-12);
            assert!(left[1..].iter().all(|&s| s == 0.0));
        });
    }

    #[test]
    fn test_order_indices_track_positions() {
        let (mixer, _handle, channels, _master) = setup(5);
        for (i, ch) in channels.iter().enumerate() {
            assert_eq!(ch.order(), i);
        }
        assert_eq!(mixer.num_channels(), 5);
    }

    #[test]
    fn test_remove_renumbers_contiguously() {
        let (mixer, _handle, channels, _master) = setup(5);

        mixer.remove_channel(channels[2].id()).unwrap();

        assert_eq!(mixer.num_channels(), 4);
        let remaining = mixer.channels();
        for (i, ch) in remaining.iter().enumerate() {
            assert_eq!(ch.order(), i);
        }
        // The channels after the removed one shifted down by one
        assert_eq!(remaining[2].id(), channels[3].id());
        assert_eq!(remaining[3].id(), channels[4].id());

        // Stale position: reported, not fatal
        assert!(matches!(
            mixer.get_channel_at_position(4),
            Err(MixerError::NotFound(4))
        ));
        // Removing again is an error, not a panic
        assert!(matches!(
            mixer.remove_channel(channels[2].id()),
            Err(MixerError::UnknownChannel(_))
        ));
    }

    #[test]
    fn test_reorder_is_stable() {
        let (mixer, _handle, channels, _master) = setup(4);

        // Move the first channel to position 2
        mixer.set_channel_position(channels[0].id(), 2).unwrap();

        let order: Vec<ChannelId> = mixer.channels().iter().map(|c| c.id()).collect();
        assert_eq!(
            order,
            vec![
                channels[1].id(),
                channels[2].id(),
                channels[0].id(),
                channels[3].id()
            ]
        );
        for (i, ch) in mixer.channels().iter().enumerate() {
            assert_eq!(ch.order(), i);
        }
        assert_eq!(mixer.get_channel_at_position(2).unwrap().id(), channels[0].id());
    }

    #[test]
    fn test_solo_is_cycle_scoped() {
        let (mixer, _handle, channels, master) = setup(2);
        channels[0].set_solo(true);

        for ch in &channels {
            ch.feed_input(&impulse(), &impulse());
        }
        mixer.run_cycle(BLOCK);
        master.with_output(BLOCK, |left, _| {
            // Only the soloed channel contributes
            assert!((left[0] - FRAC_1_SQRT_2).abs() < 1e-12);
        });

        // Clearing solo reverts automatically on the next cycle
        channels[0].set_solo(false);
        for ch in &channels {
            ch.feed_input(&impulse(), &impulse());
        }
        mixer.run_cycle(BLOCK);
        master.with_output(BLOCK, |left, _| {
            assert!((left[0] - 2.0 * FRAC_1_SQRT_2).abs() < 1e-12);
        });
    }

    #[test]
    fn test_listen_spared_from_solo_and_tapped() {
        let (mixer, _handle, channels, _master) = setup(3);
        channels[0].set_solo(true);
        channels[1].set_listen(true);

        for ch in &channels {
            ch.feed_input(&impulse(), &impulse());
        }
        mixer.run_cycle(BLOCK);

        // Listened channel still sounds; the third channel is silent
        channels[1].with_output(BLOCK, |left, _| assert!(left[0] > 0.0));
        channels[2].with_output(BLOCK, |left, _| assert_eq!(left[0], 0.0));

        // The listen tap reaches the control room monitor
        mixer.control_room().with_monitor(|left, _| {
            assert!(left[0] > 2.0 * FRAC_1_SQRT_2 - 1e-9);
        });
    }

    #[test]
    fn test_dim_never_touches_master_output() {
        let (mixer, _handle, channels, master) = setup(1);

        channels[0].feed_input(&impulse(), &impulse());
        mixer.run_cycle(BLOCK);
        let loud = master.with_output(BLOCK, |left, _| left[0]);
        let monitor_loud = mixer.control_room().with_monitor(|left, _| left[0]);

        mixer.control_room().set_dim_output(true);
        channels[0].feed_input(&impulse(), &impulse());
        mixer.run_cycle(BLOCK);
        let dimmed = master.with_output(BLOCK, |left, _| left[0]);
        let monitor_dimmed = mixer.control_room().with_monitor(|left, _| left[0]);

        // The mix/export signal is identical; only the monitor tap dims
        assert!((loud - dimmed).abs() < 1e-12);
        assert!(monitor_dimmed < monitor_loud * 0.2);
    }

    #[test]
    fn test_commands_applied_at_cycle_start() {
        let (mixer, mut handle, channels, master) = setup(1);

        handle.set_channel_mute(channels[0].id(), true);
        channels[0].feed_input(&impulse(), &impulse());
        mixer.run_cycle(BLOCK);

        assert!(channels[0].is_muted());
        master.with_output(BLOCK, |left, _| assert_eq!(left[0], 0.0));
    }

    #[test]
    fn test_load_plugins_reports_and_continues() {
        let (mixer, _handle, channels, _master) = setup(2);
        let host = PluginHost::new(48000.0, BLOCK);

        channels[0].with_chain_mut(|chain| {
            chain
                .slot_mut(0)
                .unwrap()
                .set_descriptor(PluginDescriptor::Vst3 {
                    path: PathBuf::from("/missing.vst3"),
                });
            chain
                .slot_mut(1)
                .unwrap()
                .set_descriptor(PluginDescriptor::Internal(InternalKind::Gain));
        });

        let failures = mixer.load_plugins(&host);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].channel, channels[0].id());
        assert_eq!(failures[0].slot, 0);

        // The slot after the failed one still instantiated
        channels[0].with_chain_mut(|chain| {
            assert!(!chain.slot(0).unwrap().is_loaded());
            assert!(chain.slot(1).unwrap().is_loaded());
        });
    }

    #[test]
    fn test_graph_wired_source_feeds_channel() {
        let (mixer, _handle, channels, master) = setup(1);

        let source_out = mixer.wire(|graph| {
            let out = graph.register_port(
                PortOwner(9000),
                PortDirection::Output,
                PortKind::Audio,
                "synth out",
            );
            let ports = channels[0].ports().unwrap();
            graph.connect(out, ports.input[0]).unwrap();
            graph.connect(out, ports.input[1]).unwrap();
            out
        });

        assert!(mixer.begin_cycle(BLOCK));
        mixer.write_port(source_out, &impulse());
        mixer.run_channels(BLOCK);
        mixer.process(BLOCK);

        master.with_output(BLOCK, |left, _| {
            assert!((left[0] - FRAC_1_SQRT_2).abs() < 1e-12);
        });
    }

    #[test]
    fn test_structural_change_events() {
        let (mixer, _handle, _channels, _master) = setup(0);
        let rx = mixer.events().subscribe();

        let ch = mixer.create_channel("New");
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::ChannelAdded(ch.id()));

        mixer.remove_channel(ch.id()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::ChannelRemoved(ch.id()));
    }

    #[test]
    fn test_abandoned_cycle_discards_fed_input() {
        let (mixer, _handle, channels, master) = setup(1);

        channels[0].feed_input(&impulse(), &impulse());
        assert!(mixer.begin_cycle(BLOCK));
        mixer.stop();
        mixer.process(BLOCK);
        assert_eq!(mixer.deadline_misses(), 1);

        // The abandoned impulse must not be double-counted: the next cycle
        // carries exactly its own input.
        mixer.start();
        channels[0].feed_input(&impulse(), &impulse());
        mixer.run_cycle(BLOCK);
        master.with_output(BLOCK, |left, _| {
            assert!((left[0] - FRAC_1_SQRT_2).abs() < 1e-12);
        });
    }

    #[test]
    fn test_stopped_engine_skips_cycles() {
        let (mixer, _handle, channels, master) = setup(1);
        mixer.stop();

        channels[0].feed_input(&impulse(), &impulse());
        mixer.run_cycle(BLOCK);

        assert!(!channels[0].is_processed());
        master.with_output(BLOCK, |left, _| assert_eq!(left[0], 0.0));
    }
}
