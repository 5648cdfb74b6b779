//! Mixer channel (strip): insert chain, pan/fader, flags, per-cycle state
//!
//! A channel has a stable identity independent of its position in the
//! mixer; the order index is maintained separately and renumbered on every
//! structural change, so external references survive reordering.
//!
//! Processing contract per cycle: sum inputs, run the insert chain in slot
//! order, apply pan then fader gain, apply mute/solo, write the output
//! buffer, and only then set the `processed` flag with release ordering —
//! the waiting thread's acquire load makes the buffer writes visible
//! together with the flag.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use fw_core::{Decibels, Sample, StereoSample};
use fw_plugin::{PluginError, PluginHost};

use crate::automation::AutomationSnapshot;
use crate::fader::{pan_gains, Fader};
use crate::port::{PortGraph, PortId};
use crate::slot::InsertChain;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Stable channel identity (never reused, never equal to a position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChannelId(pub u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Port ids registered for a channel in the mixer's connection graph
#[derive(Debug, Clone, Copy)]
pub struct ChannelPorts {
    pub input: [PortId; 2],
    pub output: [PortId; 2],
}

/// Buffers and the insert chain, mutated only by whoever processes the
/// channel this cycle (uncontended by the scheduling discipline).
struct ChannelDsp {
    chain: InsertChain,
    input_left: Vec<Sample>,
    input_right: Vec<Sample>,
    output_left: Vec<Sample>,
    output_right: Vec<Sample>,
}

/// One mixer strip
pub struct Channel {
    id: ChannelId,
    name: String,
    is_master: bool,
    /// Position in the mixer's ordered collection; kept equal to the
    /// storage index by the mixer's renumbering
    order: AtomicUsize,
    /// Cleared while a removal is staged so no new work is dispatched
    enabled: AtomicBool,
    /// Per-cycle completion flag (release store / acquire load)
    processed: AtomicBool,
    mute: AtomicBool,
    solo: AtomicBool,
    listen: AtomicBool,
    record_arm: AtomicBool,
    fader: Fader,
    /// Pan position, f64 bits
    pan: AtomicU64,
    /// Post-fader output peaks of the last cycle, f64 bits (meter readout)
    peak_left: AtomicU64,
    peak_right: AtomicU64,
    ports: Mutex<Option<ChannelPorts>>,
    state: Mutex<ChannelDsp>,
}

impl Channel {
    pub fn new(name: &str, max_block: usize) -> Self {
        Self::with_role(name, max_block, false)
    }

    /// The master channel: fixed identity in the mixer, not part of the
    /// regular collection, pan stage bypassed (the master bus has no pan).
    pub fn new_master(name: &str, max_block: usize) -> Self {
        Self::with_role(name, max_block, true)
    }

    fn with_role(name: &str, max_block: usize, is_master: bool) -> Self {
        Self {
            id: ChannelId::next(),
            name: name.to_string(),
            is_master,
            order: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
            processed: AtomicBool::new(false),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            listen: AtomicBool::new(false),
            record_arm: AtomicBool::new(false),
            fader: Fader::default(),
            pan: AtomicU64::new(0.0_f64.to_bits()),
            peak_left: AtomicU64::new(0.0_f64.to_bits()),
            peak_right: AtomicU64::new(0.0_f64.to_bits()),
            ports: Mutex::new(None),
            state: Mutex::new(ChannelDsp {
                chain: InsertChain::new(max_block),
                input_left: vec![0.0; max_block],
                input_right: vec![0.0; max_block],
                output_left: vec![0.0; max_block],
                output_right: vec![0.0; max_block],
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn order(&self) -> usize {
        self.order.load(Ordering::Relaxed)
    }

    pub(crate) fn set_order(&self, order: usize) {
        self.order.store(order, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::Acquire)
    }

    /// Reset the completion flag at the start of a cycle
    pub fn mark_unprocessed(&self) {
        self.processed.store(false, Ordering::Relaxed);
    }

    pub fn fader(&self) -> &Fader {
        &self.fader
    }

    pub fn pan(&self) -> f64 {
        f64::from_bits(self.pan.load(Ordering::Relaxed))
    }

    pub fn set_pan(&self, pan: f64) {
        self.pan
            .store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Relaxed);
    }

    pub fn is_soloed(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    pub fn is_listened(&self) -> bool {
        self.listen.load(Ordering::Relaxed)
    }

    pub fn set_listen(&self, listen: bool) {
        self.listen.store(listen, Ordering::Relaxed);
    }

    pub fn is_record_armed(&self) -> bool {
        self.record_arm.load(Ordering::Relaxed)
    }

    pub fn set_record_arm(&self, armed: bool) {
        self.record_arm.store(armed, Ordering::Relaxed);
    }

    pub fn ports(&self) -> Option<ChannelPorts> {
        *self.ports.lock()
    }

    pub(crate) fn set_ports(&self, ports: Option<ChannelPorts>) {
        *self.ports.lock() = ports;
    }

    /// Apply a resolved automation snapshot (called before `process`)
    pub fn apply_snapshot(&self, snapshot: &AutomationSnapshot) {
        self.fader.set_gain_db(snapshot.gain_db);
        self.set_pan(snapshot.pan);
        self.set_mute(snapshot.mute);
        self.set_solo(snapshot.solo);
    }

    /// Sum audio into the channel's input accumulator (fan-in is sample
    /// addition, no implicit gain)
    pub fn feed_input(&self, left: &[Sample], right: &[Sample]) {
        let mut state = self.state.lock();
        let len = left
            .len()
            .min(right.len())
            .min(state.input_left.len());
        for i in 0..len {
            state.input_left[i] += left[i];
            state.input_right[i] += right[i];
        }
    }

    /// Pull and sum all graph connections into the input accumulator
    pub fn pull_graph_input(&self, graph: &PortGraph, nframes: usize) {
        let Some(ports) = self.ports() else { return };
        let mut state = self.state.lock();
        let n = nframes.min(state.input_left.len());
        graph.mix_into(ports.input[0], &mut state.input_left[..n]);
        graph.mix_into(ports.input[1], &mut state.input_right[..n]);
    }

    /// Process one cycle.
    ///
    /// `solo_active` is the mixer-wide "any channel soloed" state for this
    /// cycle; a non-soloed, non-listened channel is implicitly silent while
    /// it holds (policy for this cycle only, not a persistent mute).
    /// Explicit mute always wins.
    pub fn process(&self, nframes: usize, solo_active: bool) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            let n = nframes.min(state.output_left.len());

            state.output_left[..n].copy_from_slice(&state.input_left[..n]);
            state.output_right[..n].copy_from_slice(&state.input_right[..n]);

            state
                .chain
                .process(&mut state.output_left[..n], &mut state.output_right[..n]);

            let silent = self.is_muted()
                || (solo_active && !self.is_master && !self.is_soloed() && !self.is_listened());

            if silent {
                state.output_left[..n].fill(0.0);
                state.output_right[..n].fill(0.0);
            } else {
                let amp = self.fader.amp();
                let (pan_l, pan_r) = if self.is_master {
                    (1.0, 1.0)
                } else {
                    pan_gains(self.pan())
                };
                for i in 0..n {
                    state.output_left[i] *= amp * pan_l;
                    state.output_right[i] *= amp * pan_r;
                }
            }

            let mut peak_l: Sample = 0.0;
            let mut peak_r: Sample = 0.0;
            for i in 0..n {
                peak_l = peak_l.max(state.output_left[i].abs());
                peak_r = peak_r.max(state.output_right[i].abs());
            }
            self.peak_left.store(peak_l.to_bits(), Ordering::Relaxed);
            self.peak_right.store(peak_r.to_bits(), Ordering::Relaxed);

            // Input accumulator is consumed; clear it for the next cycle
            state.input_left.fill(0.0);
            state.input_right.fill(0.0);
        }

        // Last externally-visible step: after this store nothing may touch
        // the output buffer for the remainder of the cycle.
        self.processed.store(true, Ordering::Release);
    }

    /// Post-fader output peaks of the last processed cycle (meter readout,
    /// safe from any thread)
    pub fn output_peak(&self) -> StereoSample {
        StereoSample::new(
            f64::from_bits(self.peak_left.load(Ordering::Relaxed)),
            f64::from_bits(self.peak_right.load(Ordering::Relaxed)),
        )
    }

    /// Last-cycle output peaks in dB, for meter displays
    pub fn output_peak_db(&self) -> (Decibels, Decibels) {
        let peak = self.output_peak();
        (
            Decibels::from_amplitude(peak.left),
            Decibels::from_amplitude(peak.right),
        )
    }

    /// Read the finished output (valid once `processed` is observed true)
    pub fn with_output<R>(&self, nframes: usize, f: impl FnOnce(&[Sample], &[Sample]) -> R) -> R {
        let state = self.state.lock();
        let n = nframes.min(state.output_left.len());
        f(&state.output_left[..n], &state.output_right[..n])
    }

    /// Structural access to the insert chain (never on the audio thread)
    pub fn with_chain_mut<R>(&self, f: impl FnOnce(&mut InsertChain) -> R) -> R {
        f(&mut self.state.lock().chain)
    }

    /// Instantiate every staged plugin in the strip (project-load path)
    pub fn instantiate_plugins(&self, host: &PluginHost) -> Vec<(usize, PluginError)> {
        self.state.lock().chain.instantiate_all(host)
    }

    /// Discard accumulated input without processing it (abandoned-cycle
    /// path: fed input must not leak into the next cycle)
    pub(crate) fn clear_input(&self) {
        let mut state = self.state.lock();
        state.input_left.fill(0.0);
        state.input_right.fill(0.0);
    }

    /// Deactivate and destroy all hosted plugins
    pub(crate) fn unload_plugins(&self) {
        self.state.lock().chain.unload_all();
    }

    /// Block until no processing is in flight on this channel
    pub(crate) fn wait_idle(&self) {
        drop(self.state.lock());
    }
}
