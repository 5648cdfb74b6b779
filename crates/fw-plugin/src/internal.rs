//! Internal plugin backend
//!
//! Built-in utility processors exposed through the same `PluginInstance`
//! interface as external formats, so the insert chain treats them alike.

use serde::{Deserialize, Serialize};

use crate::{AudioBuffer, PluginError, PluginInstance, PluginResult, ProcessContext};

/// Built-in processor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalKind {
    /// Null processor, copies input to output
    PassThrough,
    /// Gain utility (one parameter, gain in dB)
    Gain,
    /// Polarity invert utility
    Invert,
}

impl InternalKind {
    /// Stable identifier, used by session files
    pub fn id(&self) -> &'static str {
        match self {
            Self::PassThrough => "fw.utility.passthrough",
            Self::Gain => "fw.utility.gain",
            Self::Invert => "fw.utility.invert",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "fw.utility.passthrough" => Some(Self::PassThrough),
            "fw.utility.gain" => Some(Self::Gain),
            "fw.utility.invert" => Some(Self::Invert),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PassThrough => "Pass-Through",
            Self::Gain => "Gain",
            Self::Invert => "Invert",
        }
    }
}

/// Internal plugin instance
pub struct InternalPlugin {
    kind: InternalKind,
    active: bool,
    #[allow(dead_code)]
    sample_rate: f64,
    /// Gain parameter in dB (only meaningful for `InternalKind::Gain`)
    gain_db: f64,
}

impl InternalPlugin {
    pub fn new(kind: InternalKind, context: &ProcessContext) -> Self {
        Self {
            kind,
            active: false,
            sample_rate: context.sample_rate,
            gain_db: 0.0,
        }
    }

    pub fn kind(&self) -> InternalKind {
        self.kind
    }
}

impl PluginInstance for InternalPlugin {
    fn name(&self) -> &str {
        self.kind.display_name()
    }

    fn activate(&mut self) -> PluginResult<()> {
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> PluginResult<()> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn process(
        &mut self,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
        nframes: usize,
    ) -> PluginResult<()> {
        if !self.active {
            return Err(PluginError::NotActive);
        }

        let factor = match self.kind {
            InternalKind::PassThrough => 1.0,
            InternalKind::Gain => fw_core::db_to_amplitude(self.gain_db),
            InternalKind::Invert => -1.0,
        };

        let channels = input.channels().min(output.channels());
        for ch in 0..channels {
            let src = input.channel(ch).unwrap_or(&[]);
            if let Some(dst) = output.channel_mut(ch) {
                let len = nframes.min(src.len()).min(dst.len());
                for i in 0..len {
                    dst[i] = src[i] * factor;
                }
            }
        }
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        match self.kind {
            InternalKind::Gain => 1,
            _ => 0,
        }
    }

    fn get_parameter(&self, index: usize) -> PluginResult<f64> {
        match (self.kind, index) {
            (InternalKind::Gain, 0) => Ok(self.gain_db),
            _ => Err(PluginError::UnknownParameter(index)),
        }
    }

    fn set_parameter(&mut self, index: usize, value: f64) -> PluginResult<()> {
        match (self.kind, index) {
            (InternalKind::Gain, 0) => {
                self.gain_db = value;
                Ok(())
            }
            _ => Err(PluginError::UnknownParameter(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: f64, frames: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::new(2, frames);
        buf.channel_mut(0).unwrap().fill(value);
        buf.channel_mut(1).unwrap().fill(value);
        buf
    }

    #[test]
    fn test_pass_through_is_identity() {
        let mut plugin = InternalPlugin::new(InternalKind::PassThrough, &ProcessContext::default());
        plugin.activate().unwrap();

        let input = block(0.5, 8);
        let mut output = AudioBuffer::new(2, 8);
        plugin.process(&input, &mut output, 8).unwrap();

        assert_eq!(output.channel(0).unwrap(), input.channel(0).unwrap());
        assert_eq!(output.channel(1).unwrap(), input.channel(1).unwrap());
    }

    #[test]
    fn test_gain_parameter() {
        let mut plugin = InternalPlugin::new(InternalKind::Gain, &ProcessContext::default());
        plugin.activate().unwrap();
        plugin.set_parameter(0, -6.0).unwrap();

        let input = block(1.0, 4);
        let mut output = AudioBuffer::new(2, 4);
        plugin.process(&input, &mut output, 4).unwrap();

        let expected = fw_core::db_to_amplitude(-6.0);
        assert!((output.channel(0).unwrap()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_process_requires_activation() {
        let mut plugin = InternalPlugin::new(InternalKind::Gain, &ProcessContext::default());
        let input = block(1.0, 4);
        let mut output = AudioBuffer::new(2, 4);
        assert!(matches!(
            plugin.process(&input, &mut output, 4),
            Err(PluginError::NotActive)
        ));
    }

    #[test]
    fn test_id_round_trip() {
        for kind in [
            InternalKind::PassThrough,
            InternalKind::Gain,
            InternalKind::Invert,
        ] {
            assert_eq!(InternalKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(InternalKind::from_id("fw.unknown"), None);
    }
}
