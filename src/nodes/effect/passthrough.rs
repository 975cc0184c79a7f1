//! Passthrough node - forwards its input unchanged

use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::copy_bus;

/// Forwards input bus 0 to output bus 0.
///
/// Used as a stable attachment point: sources attach into it once, and its own output
/// can be re-pointed without touching them. Mixer group nodes and reverb buses are
/// passthroughs.
pub struct Passthrough {
    channels: usize,
}

impl Passthrough {
    pub fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl AudioNode for Passthrough {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            copy_bus(input, output);
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
