//! Engine construction options.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::listener::MAX_LISTENERS;
use crate::node::MAX_CHANNELS;
use crate::spatial::ComponentRegistry;

/// Options for [`Engine::new`](crate::Engine::new).
///
/// ```
/// use klangraum::EngineConfig;
///
/// let config = EngineConfig::new()
///     .sample_rate(44_100)
///     .channels(2)
///     .no_device(true)
///     .durations_in_frames(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub listeners: usize,
    /// Times passed to and returned by the engine and mixers are in frames rather
    /// than milliseconds.
    pub durations_in_frames: bool,
    /// Start rendering as soon as the engine is built.
    pub auto_start: bool,
    /// Do not open an output device. Audio is pulled with [`Engine::read`](crate::Engine::read).
    pub no_device: bool,
    /// Mixer volumes are given in decibels instead of linear gain.
    pub percentage_attributes: bool,
    pub command_queue_capacity: usize,
    pub reconfigure_queue_capacity: usize,
    /// Registry to take spatialization components from. Defaults to
    /// [`ComponentRegistry::global`].
    pub registry: Option<Arc<ComponentRegistry>>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn listeners(mut self, listeners: usize) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn durations_in_frames(mut self, enabled: bool) -> Self {
        self.durations_in_frames = enabled;
        self
    }

    pub fn auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = enabled;
        self
    }

    pub fn no_device(mut self, enabled: bool) -> Self {
        self.no_device = enabled;
        self
    }

    pub fn percentage_attributes(mut self, enabled: bool) -> Self {
        self.percentage_attributes = enabled;
        self
    }

    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    pub fn reconfigure_queue_capacity(mut self, capacity: usize) -> Self {
        self.reconfigure_queue_capacity = capacity;
        self
    }

    pub fn registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!("sample rate {} out of range", self.sample_rate)));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(Error::InvalidConfig(format!(
                "channel count {} not in 1..={MAX_CHANNELS}",
                self.channels
            )));
        }
        if self.listeners == 0 || self.listeners > MAX_LISTENERS {
            return Err(Error::InvalidConfig(format!(
                "listener count {} not in 1..={MAX_LISTENERS}",
                self.listeners
            )));
        }
        if self.command_queue_capacity == 0 || self.reconfigure_queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue capacities must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            listeners: 1,
            durations_in_frames: false,
            auto_start: true,
            no_device: false,
            percentage_attributes: false,
            command_queue_capacity: 1024,
            reconfigure_queue_capacity: 256,
            registry: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("listeners", &self.listeners)
            .field("durations_in_frames", &self.durations_in_frames)
            .field("auto_start", &self.auto_start)
            .field("no_device", &self.no_device)
            .field("percentage_attributes", &self.percentage_attributes)
            .field("command_queue_capacity", &self.command_queue_capacity)
            .field("reconfigure_queue_capacity", &self.reconfigure_queue_capacity)
            .field("private_registry", &self.registry.is_some())
            .finish()
    }
}
