//! Sine wave oscillator

use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};

/// A sine wave source writing the same signal to every output channel.
pub struct Sine {
    frequency: f32,
    amplitude: f32,
    phase: f32,
    channels: usize,
}

impl Sine {
    pub fn new(frequency: f32, channels: usize) -> Self {
        Self {
            frequency: frequency.max(0.0),
            amplitude: 0.25, // -12dB, safe default
            phase: 0.0,
            channels,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl AudioNode for Sine {
    fn process(&mut self, ctx: &ProcessContext, _inputs: &[Bus], outputs: &mut [Bus]) {
        let Some((first, rest)) = outputs.first_mut().and_then(|bus| bus.split_first_mut()) else {
            return;
        };

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        for sample in first.iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * self.amplitude;
            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::source(self.channels)
    }

    fn name(&self) -> &'static str {
        "sine"
    }
}
