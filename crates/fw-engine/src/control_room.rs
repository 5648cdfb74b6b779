//! Control room: post-master monitoring bus
//!
//! Sits after the master channel in the signal path the user actually
//! monitors. Dim attenuation and listen volume only ever shape the monitor
//! tap — what is written to the final mix/export is untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use fw_core::{db_to_amplitude, Sample};

use crate::events::{EngineEvent, EventBus};
use crate::fader::Fader;

/// Dim attenuation applied to the monitor output
pub const DIM_DB: f64 = -18.0;

struct MonitorBuffers {
    left: Vec<Sample>,
    right: Vec<Sample>,
    frames: usize,
}

/// Monitoring bus after the master channel
pub struct ControlRoom {
    /// Temporarily dim the monitored output
    dim_output: AtomicBool,
    /// Monitor output volume (independent of the master fader)
    vol_fader: Fader,
    /// Volume applied to channels under listen
    listen_vol_fader: Fader,
    monitor: Mutex<MonitorBuffers>,
    events: Arc<EventBus>,
}

impl ControlRoom {
    pub fn new(max_block: usize, events: Arc<EventBus>) -> Self {
        Self {
            dim_output: AtomicBool::new(false),
            vol_fader: Fader::default(),
            listen_vol_fader: Fader::default(),
            monitor: Mutex::new(MonitorBuffers {
                left: vec![0.0; max_block],
                right: vec![0.0; max_block],
                frames: 0,
            }),
            events,
        }
    }

    pub fn dim_output(&self) -> bool {
        self.dim_output.load(Ordering::Relaxed)
    }

    /// Toggle dim and notify observers. A state change, not a
    /// processing-time operation.
    pub fn set_dim_output(&self, dim: bool) {
        self.dim_output.store(dim, Ordering::Relaxed);
        log::debug!("control room dim: {}", dim);
        self.events.emit(EngineEvent::DimChanged(dim));
    }

    pub fn vol_fader(&self) -> &Fader {
        &self.vol_fader
    }

    pub fn listen_vol_fader(&self) -> &Fader {
        &self.listen_vol_fader
    }

    /// Fill the monitor tap from the finished master output and the listen
    /// bus. Never mutates its inputs.
    pub fn monitor(
        &self,
        master_left: &[Sample],
        master_right: &[Sample],
        listen_left: &[Sample],
        listen_right: &[Sample],
    ) {
        let mut vol = self.vol_fader.amp();
        if self.dim_output() {
            vol *= db_to_amplitude(DIM_DB);
        }
        let listen_vol = self.listen_vol_fader.amp();

        let mut buffers = self.monitor.lock();
        let n = master_left
            .len()
            .min(master_right.len())
            .min(buffers.left.len());
        for i in 0..n {
            let listen_l = listen_left.get(i).copied().unwrap_or(0.0);
            let listen_r = listen_right.get(i).copied().unwrap_or(0.0);
            buffers.left[i] = master_left[i] * vol + listen_l * listen_vol;
            buffers.right[i] = master_right[i] * vol + listen_r * listen_vol;
        }
        buffers.frames = n;
    }

    /// Read the most recent monitor tap
    pub fn with_monitor<R>(&self, f: impl FnOnce(&[Sample], &[Sample]) -> R) -> R {
        let buffers = self.monitor.lock();
        let n = buffers.frames;
        f(&buffers.left[..n], &buffers.right[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_room() -> ControlRoom {
        ControlRoom::new(64, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_dim_affects_monitor_only() {
        let cr = control_room();
        let master = vec![0.5; 64];
        let silence = vec![0.0; 64];

        cr.monitor(&master, &master, &silence, &silence);
        let undimmed = cr.with_monitor(|l, _| l[0]);
        assert!((undimmed - 0.5).abs() < 1e-12);

        cr.set_dim_output(true);
        cr.monitor(&master, &master, &silence, &silence);
        let dimmed = cr.with_monitor(|l, _| l[0]);
        assert!((dimmed - 0.5 * db_to_amplitude(DIM_DB)).abs() < 1e-12);

        // The master buffer itself is untouched
        assert_eq!(master, vec![0.5; 64]);
    }

    #[test]
    fn test_listen_volume_is_independent() {
        let cr = control_room();
        cr.listen_vol_fader().set_gain_db(-6.0);
        let silence = vec![0.0; 64];
        let listen = vec![1.0; 64];

        cr.monitor(&silence, &silence, &listen, &listen);
        let tapped = cr.with_monitor(|l, _| l[0]);
        assert!((tapped - db_to_amplitude(-6.0)).abs() < 1e-12);

        // Changing the monitor volume does not touch the listen path gain
        cr.vol_fader().set_gain_db(-60.0);
        cr.monitor(&silence, &silence, &listen, &listen);
        let tapped = cr.with_monitor(|l, _| l[0]);
        assert!((tapped - db_to_amplitude(-6.0)).abs() < 1e-12);
    }

    #[test]
    fn test_dim_toggle_notifies_observers() {
        let events = Arc::new(EventBus::new());
        let cr = ControlRoom::new(64, events.clone());
        let rx = events.subscribe();

        cr.set_dim_output(true);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::DimChanged(true));
    }
}
