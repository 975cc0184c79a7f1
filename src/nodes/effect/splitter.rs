//! Splitter node - forks one input into several outputs

use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::copy_bus;

/// Copies input bus 0 to every output bus.
///
/// Each output bus has its own volume and destination, which is how a reverb send is
/// forked off a dry path.
pub struct Splitter {
    channels: usize,
    outputs: usize,
}

impl Splitter {
    pub fn new(channels: usize, outputs: usize) -> Self {
        Self { channels, outputs }
    }

    /// A splitter with two output buses.
    pub fn pair(channels: usize) -> Self {
        Self::new(channels, 2)
    }
}

impl AudioNode for Splitter {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        let Some(input) = inputs.first() else {
            return;
        };
        for output in outputs.iter_mut() {
            copy_bus(input, output);
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::splitter(self.channels, self.outputs)
    }

    fn name(&self) -> &'static str {
        "splitter"
    }
}
