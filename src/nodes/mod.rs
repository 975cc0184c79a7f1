//! Built-in audio nodes.
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no input buses:
//! - [`Sine`] - Sine wave oscillator, mostly for tests and demos
//! - [`SamplePlayer`] - Play in-memory interleaved PCM
//!
//! ## Effects ([`effect`])
//!
//! Route audio from input buses to output buses:
//! - [`Passthrough`] - Stable attachment point that forwards its input unchanged
//! - [`Splitter`] - Fork one input into several identical outputs

pub mod effect;
pub mod source;

pub use effect::{Passthrough, Splitter};
pub use source::{PlayerControl, PlayerMessage, PlayerStatus, SamplePlayer, Sine};

use crate::node::Bus;

/// Copy `src` into `dst` channel by channel.
#[inline]
pub(crate) fn copy_bus(src: &Bus, dst: &mut Bus) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        d.copy_from_slice(s);
    }
}

#[inline]
pub(crate) fn silence_bus(bus: &mut Bus) {
    for buffer in bus.iter_mut() {
        buffer.fill(0.0);
    }
}
