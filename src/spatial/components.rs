//! Built-in panner and attenuator components.
//!
//! Each reads its spatializer's [`SpatialParams`] once per block. While the parameters
//! are not valid yet (no listener found) or spatialization is disabled, components pass
//! audio through unchanged.

use std::sync::Arc;

use crate::math::{db_to_linear, pan_db_to_linear};
use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::copy_bus;
use crate::spatial::{SpatialParams, SpatialSnapshot};

/// Decibels of attenuation per unit of distance past `min_distance`, at rolloff 1.
pub const ATTENUATION_DB_PER_UNIT: f32 = 1.75;

/// Scale the inverse-distance model applies to rolloff, so both attenuators lose
/// roughly the same volume for the same rolloff.
pub const INVERSE_DISTANCE_ROLLOFF_SCALE: f32 = 0.7;

fn active(snapshot: &SpatialSnapshot) -> bool {
    snapshot.valid && snapshot.enabled
}

/// Stereo balance panner driven by the listener-space direction.
///
/// The pan in decibels is `direction.x × distance × directional_attenuation_factor ×
/// pan_scale`, converted with [`pan_db_to_linear`]; the far side is attenuated. Channels
/// past the first two are left untouched.
pub struct BasicPanner {
    channels: usize,
    params: Arc<SpatialParams>,
}

impl BasicPanner {
    pub fn new(channels: usize, params: Arc<SpatialParams>) -> Self {
        Self { channels, params }
    }

    pub fn pan_for(snapshot: &SpatialSnapshot) -> f32 {
        let db = snapshot.direction.x
            * snapshot.distance
            * snapshot.directional_attenuation_factor
            * snapshot.pan_scale;
        pan_db_to_linear(db)
    }
}

impl AudioNode for BasicPanner {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };
        copy_bus(input, output);

        let snapshot = self.params.snapshot();
        if !active(&snapshot) || output.len() < 2 {
            return;
        }
        let pan = Self::pan_for(&snapshot);
        let (channel, gain) = if pan > 0.0 { (0, 1.0 - pan) } else { (1, 1.0 + pan) };
        for sample in output[channel].iter_mut() {
            *sample *= gain;
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "basic_panner"
    }
}

/// Per-block linear gain ramp, so attenuation changes do not click.
struct GainRamp {
    current: f32,
}

impl GainRamp {
    fn new() -> Self {
        Self { current: 1.0 }
    }

    fn apply(&mut self, target: f32, bus: &mut Bus) {
        let frames = bus.first().map_or(0, |b| b.len());
        if frames == 0 {
            return;
        }
        let step = (target - self.current) / frames as f32;
        for buffer in bus.iter_mut() {
            let mut gain = self.current;
            for sample in buffer.iter_mut() {
                gain += step;
                *sample *= gain;
            }
        }
        self.current = target;
    }
}

/// Exponential (decibel-linear) distance attenuation.
///
/// Past `min_distance`, volume drops by [`ATTENUATION_DB_PER_UNIT`] × rolloff decibels
/// per unit. Beyond `max_distance` the source is silent. The result is clamped to
/// `[min_gain, max_gain]`.
pub struct BasicAttenuator {
    channels: usize,
    params: Arc<SpatialParams>,
    ramp: GainRamp,
}

impl BasicAttenuator {
    pub fn new(channels: usize, params: Arc<SpatialParams>) -> Self {
        Self {
            channels,
            params,
            ramp: GainRamp::new(),
        }
    }

    pub fn gain_for(snapshot: &SpatialSnapshot) -> f32 {
        let mut distance = snapshot.distance;
        if distance >= snapshot.min_distance {
            distance -= snapshot.min_distance;
        }
        let gain = if distance <= snapshot.max_distance - snapshot.min_distance {
            db_to_linear(-distance * snapshot.rolloff * ATTENUATION_DB_PER_UNIT)
        } else {
            0.0
        };
        gain.max(snapshot.min_gain).min(snapshot.max_gain)
    }
}

impl AudioNode for BasicAttenuator {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };
        copy_bus(input, output);

        let snapshot = self.params.snapshot();
        let target = if active(&snapshot) { Self::gain_for(&snapshot) } else { 1.0 };
        self.ramp.apply(target, output);
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "basic_attenuator"
    }
}

/// Inverse-distance attenuation, paired with the binaural panner.
///
/// Gain is `reference / distance` once the rolloff-scaled distance passes the reference
/// distance (`min_distance`, at least 1). Beyond `max_distance` it falls to `min_gain`.
pub struct InverseDistanceAttenuator {
    channels: usize,
    params: Arc<SpatialParams>,
    ramp: GainRamp,
}

impl InverseDistanceAttenuator {
    pub fn new(channels: usize, params: Arc<SpatialParams>) -> Self {
        Self {
            channels,
            params,
            ramp: GainRamp::new(),
        }
    }

    pub fn gain_for(snapshot: &SpatialSnapshot) -> f32 {
        if snapshot.distance > snapshot.max_distance {
            return snapshot.min_gain;
        }
        let reference = snapshot.min_distance.max(1.0);
        let distance = snapshot.distance * snapshot.rolloff * INVERSE_DISTANCE_ROLLOFF_SCALE;
        let gain = if distance <= reference { 1.0 } else { reference / distance };
        gain.max(snapshot.min_gain).min(snapshot.max_gain)
    }
}

impl AudioNode for InverseDistanceAttenuator {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };
        copy_bus(input, output);

        let snapshot = self.params.snapshot();
        let target = if active(&snapshot) { Self::gain_for(&snapshot) } else { 1.0 };
        self.ramp.apply(target, output);
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "inverse_distance_attenuator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use approx::assert_relative_eq;

    fn snapshot(distance: f32, direction: Vec3) -> SpatialSnapshot {
        SpatialSnapshot {
            valid: true,
            enabled: true,
            distance,
            direction,
            min_distance: 0.0,
            max_distance: 100.0,
            min_gain: 0.0,
            max_gain: 1.0,
            rolloff: 1.0,
            directional_attenuation_factor: 1.0,
            pan_scale: 1.75,
        }
    }

    #[test]
    fn pan_follows_the_side_of_the_source() {
        assert_relative_eq!(BasicPanner::pan_for(&snapshot(0.0, Vec3::new(1.0, 0.0, 0.0))), 0.0);
        assert!(BasicPanner::pan_for(&snapshot(4.0, Vec3::new(1.0, 0.0, 0.0))) > 0.5);
        assert!(BasicPanner::pan_for(&snapshot(4.0, Vec3::new(-1.0, 0.0, 0.0))) < -0.5);
        assert_relative_eq!(BasicPanner::pan_for(&snapshot(4.0, Vec3::FORWARD)), 0.0);
    }

    #[test]
    fn basic_attenuation_curve() {
        assert_relative_eq!(BasicAttenuator::gain_for(&snapshot(0.0, Vec3::FORWARD)), 1.0);
        assert_relative_eq!(
            BasicAttenuator::gain_for(&snapshot(4.0, Vec3::FORWARD)),
            db_to_linear(-7.0),
            epsilon = 1e-6
        );
        assert_eq!(BasicAttenuator::gain_for(&snapshot(150.0, Vec3::FORWARD)), 0.0);

        let mut near = snapshot(2.0, Vec3::FORWARD);
        near.min_distance = 3.0;
        assert_relative_eq!(BasicAttenuator::gain_for(&near), db_to_linear(-3.5), epsilon = 1e-6);

        let mut floor = snapshot(150.0, Vec3::FORWARD);
        floor.min_gain = 0.1;
        assert_relative_eq!(BasicAttenuator::gain_for(&floor), 0.1);
    }

    #[test]
    fn inverse_distance_curve() {
        assert_relative_eq!(InverseDistanceAttenuator::gain_for(&snapshot(1.0, Vec3::FORWARD)), 1.0);
        let far = InverseDistanceAttenuator::gain_for(&snapshot(20.0, Vec3::FORWARD));
        assert_relative_eq!(far, 1.0 / 14.0, epsilon = 1e-6);
        assert_eq!(InverseDistanceAttenuator::gain_for(&snapshot(101.0, Vec3::FORWARD)), 0.0);
    }

    #[test]
    fn components_pass_through_until_parameters_are_valid() {
        let params = Arc::new(SpatialParams::new());
        let mut attenuator = BasicAttenuator::new(2, params);
        let layout = attenuator.layout();
        let mut inputs = layout.allocate_inputs();
        let mut outputs = layout.allocate_outputs();
        for buffer in inputs[0].iter_mut() {
            buffer.fill(0.5);
        }
        let ctx = ProcessContext {
            sample_rate: 48_000,
            buffer_size: 64,
            time: 0,
        };
        attenuator.process(&ctx, &inputs, &mut outputs);
        assert!(outputs[0].iter().all(|b| b.iter().all(|s| *s == 0.5)));
    }
}
