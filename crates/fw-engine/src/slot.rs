//! Plugin host slots and the per-channel insert chain
//!
//! A channel owns a fixed strip of insert slots. A slot holds at most one
//! plugin instance; an empty or bypassed slot is an identity transform.
//! Plugins attach through an explicit instantiate step (project load, never
//! during real-time processing) and are deactivated before destruction.

use std::sync::atomic::{AtomicBool, Ordering};

use fw_core::Sample;
use fw_plugin::{AudioBuffer, PluginDescriptor, PluginError, PluginHost, PluginInstance};

/// Insert slots per channel strip
pub const STRIP_SIZE: usize = 9;

/// One insert slot in a channel strip
pub struct InsertSlot {
    index: usize,
    /// Deferred plugin to instantiate on the project-load path
    descriptor: Option<PluginDescriptor>,
    plugin: Option<Box<dyn PluginInstance>>,
    bypassed: AtomicBool,
    /// Pre-allocated plugin I/O, no allocation on the audio thread
    input: AudioBuffer,
    output: AudioBuffer,
}

impl InsertSlot {
    pub fn new(index: usize, max_block: usize) -> Self {
        Self {
            index,
            descriptor: None,
            plugin: None,
            bypassed: AtomicBool::new(false),
            input: AudioBuffer::new(2, max_block),
            output: AudioBuffer::new(2, max_block),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_loaded(&self) -> bool {
        self.plugin.is_some()
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypassed.store(bypass, Ordering::Relaxed);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    /// Stage a plugin for deferred instantiation
    pub fn set_descriptor(&mut self, descriptor: PluginDescriptor) {
        self.descriptor = Some(descriptor);
    }

    pub fn descriptor(&self) -> Option<&PluginDescriptor> {
        self.descriptor.as_ref()
    }

    /// Instantiate and activate the staged plugin. On failure the slot
    /// stays empty and keeps passing audio through; the error goes back to
    /// the caller for reporting. Never called on the real-time path.
    pub fn instantiate(&mut self, host: &PluginHost) -> Result<(), PluginError> {
        let Some(descriptor) = self.descriptor.clone() else {
            return Ok(());
        };
        if self.plugin.is_some() {
            return Ok(());
        }

        match host.instantiate(&descriptor) {
            Ok(mut plugin) => {
                plugin.activate()?;
                log::info!("slot {}: loaded plugin {}", self.index, plugin.name());
                self.plugin = Some(plugin);
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "slot {}: failed to instantiate {}: {}",
                    self.index,
                    descriptor.name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Attach an already-built instance (activating it)
    pub fn load(&mut self, mut plugin: Box<dyn PluginInstance>) -> Result<(), PluginError> {
        plugin.activate()?;
        self.plugin = Some(plugin);
        Ok(())
    }

    /// Deactivate and destroy the hosted plugin, clearing the slot
    pub fn remove_plugin(&mut self) {
        if let Some(mut plugin) = self.plugin.take() {
            if let Err(e) = plugin.deactivate() {
                log::warn!("slot {}: deactivate failed: {}", self.index, e);
            }
        }
        self.descriptor = None;
    }

    /// Process one block in place. Empty and bypassed slots are identity
    /// transforms.
    #[inline]
    pub fn process(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        if self.is_bypassed() {
            return;
        }
        let Some(plugin) = self.plugin.as_mut() else {
            return;
        };

        let nframes = left.len().min(right.len()).min(self.input.samples());
        if let Some(ch) = self.input.channel_mut(0) {
            ch[..nframes].copy_from_slice(&left[..nframes]);
        }
        if let Some(ch) = self.input.channel_mut(1) {
            ch[..nframes].copy_from_slice(&right[..nframes]);
        }

        // Process is error-free by contract on an activated instance; on a
        // contract violation the dry signal is kept.
        if plugin.process(&self.input, &mut self.output, nframes).is_ok() {
            if let Some(ch) = self.output.channel(0) {
                left[..nframes].copy_from_slice(&ch[..nframes]);
            }
            if let Some(ch) = self.output.channel(1) {
                right[..nframes].copy_from_slice(&ch[..nframes]);
            }
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.as_ref().map(|p| p.name()).unwrap_or("Empty")
    }
}

/// Ordered insert chain of a channel strip
pub struct InsertChain {
    slots: Vec<InsertSlot>,
}

impl InsertChain {
    pub fn new(max_block: usize) -> Self {
        Self {
            slots: (0..STRIP_SIZE).map(|i| InsertSlot::new(i, max_block)).collect(),
        }
    }

    pub fn slot(&self, index: usize) -> Option<&InsertSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut InsertSlot> {
        self.slots.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| !s.is_loaded())
    }

    /// Run the chain in ascending slot order; each slot's output feeds the
    /// next slot's input.
    #[inline]
    pub fn process(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        for slot in &mut self.slots {
            slot.process(left, right);
        }
    }

    /// Instantiate every staged plugin (project-load path). A failure on
    /// one slot is recorded and does not abort the remaining slots.
    pub fn instantiate_all(&mut self, host: &PluginHost) -> Vec<(usize, PluginError)> {
        let mut failures = Vec::new();
        for slot in &mut self.slots {
            if let Err(e) = slot.instantiate(host) {
                failures.push((slot.index(), e));
            }
        }
        failures
    }

    /// Deactivate and drop every hosted plugin
    pub fn unload_all(&mut self) {
        for slot in &mut self.slots {
            slot.remove_plugin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fw_plugin::InternalKind;
    use std::path::PathBuf;

    fn host() -> PluginHost {
        PluginHost::new(48000.0, 256)
    }

    #[test]
    fn test_empty_slot_is_identity() {
        let mut slot = InsertSlot::new(0, 256);
        let mut left = vec![0.25; 64];
        let mut right = vec![-0.5; 64];
        slot.process(&mut left, &mut right);
        assert_eq!(left, vec![0.25; 64]);
        assert_eq!(right, vec![-0.5; 64]);
    }

    #[test]
    fn test_bypassed_slot_is_identity() {
        let host = host();
        let mut slot = InsertSlot::new(0, 256);
        let mut plugin = host
            .instantiate(&PluginDescriptor::Internal(InternalKind::Gain))
            .unwrap();
        plugin.set_parameter(0, -12.0).unwrap();
        slot.load(plugin).unwrap();
        slot.set_bypass(true);

        let mut left = vec![1.0; 16];
        let mut right = vec![1.0; 16];
        slot.process(&mut left, &mut right);
        assert_eq!(left, vec![1.0; 16]);
        assert_eq!(right, vec![1.0; 16]);
    }

    #[test]
    fn test_chain_runs_in_slot_order() {
        let host = host();
        let mut chain = InsertChain::new(256);

        // Two -6 dB gains in series
        for index in [0, 3] {
            let mut plugin = host
                .instantiate(&PluginDescriptor::Internal(InternalKind::Gain))
                .unwrap();
            plugin.set_parameter(0, -6.0).unwrap();
            chain.slot_mut(index).unwrap().load(plugin).unwrap();
        }

        let mut left = vec![1.0; 8];
        let mut right = vec![1.0; 8];
        chain.process(&mut left, &mut right);

        let expected = fw_core::db_to_amplitude(-12.0);
        assert!((left[0] - expected).abs() < 1e-12);
        assert!((right[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_failed_instantiate_leaves_slot_passthrough() {
        let host = host();
        let mut slot = InsertSlot::new(0, 256);
        slot.set_descriptor(PluginDescriptor::Vst3 {
            path: PathBuf::from("/missing.vst3"),
        });

        assert!(slot.instantiate(&host).is_err());
        assert!(!slot.is_loaded());

        let mut left = vec![0.7; 8];
        let mut right = vec![0.7; 8];
        slot.process(&mut left, &mut right);
        assert_eq!(left, vec![0.7; 8]);
    }

    #[test]
    fn test_instantiate_all_continues_past_failures() {
        let host = host();
        let mut chain = InsertChain::new(256);
        chain.slot_mut(0).unwrap().set_descriptor(PluginDescriptor::Vst3 {
            path: PathBuf::from("/missing.vst3"),
        });
        chain
            .slot_mut(1)
            .unwrap()
            .set_descriptor(PluginDescriptor::Internal(InternalKind::Gain));

        let failures = chain.instantiate_all(&host);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 0);
        assert!(chain.slot(1).unwrap().is_loaded());
    }

    #[test]
    fn test_remove_plugin_clears_slot() {
        let host = host();
        let mut slot = InsertSlot::new(2, 256);
        slot.set_descriptor(PluginDescriptor::Internal(InternalKind::PassThrough));
        slot.instantiate(&host).unwrap();
        assert!(slot.is_loaded());

        slot.remove_plugin();
        assert!(!slot.is_loaded());
        assert!(slot.descriptor().is_none());
    }
}
