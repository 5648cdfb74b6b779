//! fw-plugin: Plugin hosting for the FaderWorks mix engine
//!
//! Wraps externally-implemented processing units behind one capability
//! interface with a uniform lifecycle:
//!
//! - instantiate (via [`PluginHost`], selected by the descriptor's format tag)
//! - activate / deactivate
//! - process (bounded, real-time safe by caller contract)
//! - destroy (dropping the boxed instance)
//!
//! Instantiation failures are reported and non-fatal: the hosting slot is
//! left empty and treated as a pass-through by the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fw_core::Sample;

pub mod internal;

pub use internal::{InternalKind, InternalPlugin};

/// Plugin hosting errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("plugin format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("plugin is not active")]
    NotActive,

    #[error("unknown parameter index: {0}")]
    UnknownParameter(usize),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Per-channel (non-interleaved) audio buffer for plugin processing
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<Vec<Sample>>,
    channels: usize,
    samples: usize,
}

impl AudioBuffer {
    pub fn new(channels: usize, samples: usize) -> Self {
        let data = (0..channels).map(|_| vec![0.0; samples]).collect();
        Self {
            data,
            channels,
            samples,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        self.data.get(index).map(|v| v.as_slice())
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [Sample]> {
        self.data.get_mut(index).map(|v| v.as_mut_slice())
    }

    /// Zero all channels
    pub fn clear(&mut self) {
        for channel in &mut self.data {
            channel.fill(0.0);
        }
    }

    /// Copy data from another buffer in-place (no allocation)
    #[inline]
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            let len = dst.len().min(src.len());
            dst[..len].copy_from_slice(&src[..len]);
        }
    }
}

/// Describes a plugin to instantiate, tagged by format.
///
/// The tag selects the hosting backend. Only the internal backend lives in
/// this crate; external formats are instantiated by their format crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginDescriptor {
    /// Built-in processor
    Internal(InternalKind),
    /// VST3 module on disk
    Vst3 { path: PathBuf },
    /// CLAP module on disk
    Clap { path: PathBuf },
}

impl PluginDescriptor {
    /// Display name for reporting
    pub fn name(&self) -> String {
        match self {
            Self::Internal(kind) => kind.display_name().to_string(),
            Self::Vst3 { path } | Self::Clap { path } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Processing context handed to plugins at instantiation
#[derive(Debug, Clone)]
pub struct ProcessContext {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Maximum block size in frames
    pub max_block_size: usize,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 512,
        }
    }
}

/// Common interface for all hosted plugin instances.
///
/// Destruction is `Drop`; an instance must be deactivated before it is
/// dropped (the hosting slot enforces this).
pub trait PluginInstance: Send {
    /// Plugin display name
    fn name(&self) -> &str;

    /// Activate processing (called before any `process` call)
    fn activate(&mut self) -> PluginResult<()>;

    /// Deactivate processing
    fn deactivate(&mut self) -> PluginResult<()>;

    /// Whether the instance is currently active
    fn is_active(&self) -> bool;

    /// Process one block of audio.
    ///
    /// Only ever called on an activated instance, must complete in time
    /// proportional to `nframes`, and must not touch anything beyond its
    /// own buffers (caller contract).
    fn process(
        &mut self,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
        nframes: usize,
    ) -> PluginResult<()>;

    /// Latency in samples
    fn latency(&self) -> usize {
        0
    }

    /// Number of parameters
    fn parameter_count(&self) -> usize {
        0
    }

    /// Get parameter value
    fn get_parameter(&self, index: usize) -> PluginResult<f64> {
        Err(PluginError::UnknownParameter(index))
    }

    /// Set parameter value
    fn set_parameter(&mut self, index: usize, _value: f64) -> PluginResult<()> {
        Err(PluginError::UnknownParameter(index))
    }
}

/// Instantiates plugins from descriptors, dispatching on the format tag.
pub struct PluginHost {
    context: ProcessContext,
}

impl PluginHost {
    pub fn new(sample_rate: f64, max_block_size: usize) -> Self {
        Self {
            context: ProcessContext {
                sample_rate,
                max_block_size,
            },
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// Instantiate a plugin. Never called from the real-time path.
    pub fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
    ) -> PluginResult<Box<dyn PluginInstance>> {
        match descriptor {
            PluginDescriptor::Internal(kind) => {
                log::debug!("instantiating internal plugin {:?}", kind);
                Ok(Box::new(InternalPlugin::new(*kind, &self.context)))
            }
            PluginDescriptor::Vst3 { path } => Err(PluginError::UnsupportedFormat(format!(
                "vst3: {}",
                path.display()
            ))),
            PluginDescriptor::Clap { path } => Err(PluginError::UnsupportedFormat(format!(
                "clap: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_instantiate() {
        let host = PluginHost::new(48000.0, 256);
        let plugin = host
            .instantiate(&PluginDescriptor::Internal(InternalKind::Gain))
            .unwrap();
        assert_eq!(plugin.name(), "Gain");
        assert!(!plugin.is_active());
    }

    #[test]
    fn test_external_formats_are_reported() {
        let host = PluginHost::new(48000.0, 256);
        let result = host.instantiate(&PluginDescriptor::Vst3 {
            path: PathBuf::from("/missing/plugin.vst3"),
        });
        assert!(matches!(result, Err(PluginError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_descriptor_name() {
        let desc = PluginDescriptor::Vst3 {
            path: PathBuf::from("/plugins/SuperComp.vst3"),
        };
        assert_eq!(desc.name(), "SuperComp");
    }

    #[test]
    fn test_buffer_copy_from() {
        let mut a = AudioBuffer::new(2, 4);
        let mut b = AudioBuffer::new(2, 4);
        b.channel_mut(0).unwrap().fill(0.5);
        a.copy_from(&b);
        assert_eq!(a.channel(0).unwrap(), &[0.5; 4]);
        assert_eq!(a.channel(1).unwrap(), &[0.0; 4]);
    }
}
