//! Headphone spatialization from interaural time and level differences.
//!
//! A lightweight stand-in for HRTF convolution: the far ear hears the source a little
//! later (ITD, Woodworth approximation) and quieter (ILD). The shared lookup data is
//! built once per process on first use.

use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::math::{db_to_linear, Vec3};
use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::copy_bus;
use crate::spatial::SpatialParams;

const HEAD_RADIUS: f32 = 0.0875;
const SPEED_OF_SOUND: f32 = 343.0;
const MAX_ILD_DB: f32 = 10.0;
const MAX_ITD_SAMPLES: usize = 64;
const SMOOTH_TIME: f32 = 0.05;
const ILD_TABLE_SIZE: usize = 181;

static CONTEXT: OnceLock<BinauralContext> = OnceLock::new();
static CONTEXT_INITS: AtomicUsize = AtomicUsize::new(0);

/// Process-wide lookup data shared by every binaural panner.
#[derive(Debug)]
pub struct BinauralContext {
    /// Far-ear gain for |azimuth| from 0 to π/2, in one-degree steps past which the
    /// table saturates.
    ild: Box<[f32]>,
}

impl BinauralContext {
    /// The shared context, built on first call. Concurrent first calls still build it
    /// exactly once.
    pub fn get() -> &'static BinauralContext {
        CONTEXT.get_or_init(|| {
            CONTEXT_INITS.fetch_add(1, Ordering::AcqRel);
            debug!("initialising binaural context");
            let ild = (0..ILD_TABLE_SIZE)
                .map(|i| {
                    let azimuth = (i as f32).to_radians().min(FRAC_PI_2);
                    db_to_linear(-(azimuth / FRAC_PI_2) * MAX_ILD_DB)
                })
                .collect();
            BinauralContext { ild }
        })
    }

    /// How many times the context has been built. Never more than one.
    pub fn init_count() -> usize {
        CONTEXT_INITS.load(Ordering::Acquire)
    }

    fn far_ear_gain(&self, azimuth: f32) -> f32 {
        let degrees = azimuth.abs().to_degrees().round() as usize;
        self.ild[degrees.min(ILD_TABLE_SIZE - 1)]
    }
}

/// One-pole smoother reaching ~63% of a step after `time` seconds.
#[derive(Debug, Clone, Copy)]
struct Smoother {
    current: f32,
    coeff: f32,
}

impl Smoother {
    fn new(time: f32, sample_rate: f32) -> Self {
        Self {
            current: 0.0,
            coeff: 1.0 - (-1.0 / (time * sample_rate)).exp(),
        }
    }

    #[inline]
    fn next(&mut self, target: f32) -> f32 {
        self.current += (target - self.current) * self.coeff;
        self.current
    }
}

/// Azimuth (positive to the right) and elevation of a listener-space direction.
pub fn angles(direction: Vec3) -> (f32, f32) {
    let length = direction.length();
    if length <= f32::EPSILON || !direction.is_finite() {
        return (0.0, 0.0);
    }
    let azimuth = direction.x.atan2(-direction.z);
    let elevation = (direction.y / length).clamp(-1.0, 1.0).asin();
    (azimuth, elevation)
}

/// Binaural panner component.
///
/// Downmixes the first two channels to mono, applies ITD and ILD, and crossfades the
/// result with the dry signal using the blend the monitor computes from distance, so
/// sources at the listener's head stay unprocessed.
pub struct BinauralPanner {
    channels: usize,
    sample_rate: f32,
    params: Arc<SpatialParams>,
    context: &'static BinauralContext,
    azimuth: Smoother,
    elevation: Smoother,
    delay_left: [f32; MAX_ITD_SAMPLES],
    delay_right: [f32; MAX_ITD_SAMPLES],
    write_pos: usize,
}

impl BinauralPanner {
    pub fn new(sample_rate: u32, channels: usize, params: Arc<SpatialParams>) -> Result<Self> {
        if channels < 2 {
            return Err(Error::InvalidLayout(format!(
                "binaural panning needs at least 2 channels, got {channels}"
            )));
        }
        let sample_rate = sample_rate as f32;
        Ok(Self {
            channels,
            sample_rate,
            params,
            context: BinauralContext::get(),
            azimuth: Smoother::new(SMOOTH_TIME, sample_rate),
            elevation: Smoother::new(SMOOTH_TIME, sample_rate),
            delay_left: [0.0; MAX_ITD_SAMPLES],
            delay_right: [0.0; MAX_ITD_SAMPLES],
            write_pos: 0,
        })
    }

    fn render(&mut self, input: f32, azimuth_target: f32, elevation_target: f32) -> (f32, f32) {
        let azimuth = self.azimuth.next(azimuth_target);
        let elevation = self.elevation.next(elevation_target);

        let lateral = azimuth.clamp(-FRAC_PI_2, FRAC_PI_2);
        let itd = HEAD_RADIUS / SPEED_OF_SOUND * (lateral + lateral.sin()) / PI * 2.0;
        let delay = ((itd.abs() * self.sample_rate).round() as usize).min(MAX_ITD_SAMPLES - 1);

        let far = self.context.far_ear_gain(lateral);
        let level = input * (1.0 - elevation.abs() / FRAC_PI_2 * 0.3).max(0.7);
        // Source on the right: the left ear is the far one.
        let (left_gain, right_gain, left_delay, right_delay) = if azimuth > 0.0 {
            (far, 1.0, delay, 0)
        } else {
            (1.0, far, 0, delay)
        };

        self.delay_left[self.write_pos] = level * left_gain;
        self.delay_right[self.write_pos] = level * right_gain;
        let read = |offset: usize| (self.write_pos + MAX_ITD_SAMPLES - offset) % MAX_ITD_SAMPLES;
        let out = (self.delay_left[read(left_delay)], self.delay_right[read(right_delay)]);
        self.write_pos = (self.write_pos + 1) % MAX_ITD_SAMPLES;
        out
    }
}

impl AudioNode for BinauralPanner {
    fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };
        copy_bus(input, output);
        if output.len() < 2 {
            return;
        }

        let snapshot = self.params.snapshot();
        let (direction, blend) = self.params.binaural();
        let (azimuth, elevation) = angles(direction);
        let blend = if snapshot.valid && snapshot.enabled {
            blend.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let (left, rest) = output.split_at_mut(1);
        let (left, right) = (&mut left[0], &mut rest[0]);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let (wet_l, wet_r) = self.render((*l + *r) * 0.5, azimuth, elevation);
            *l = blend * wet_l + (1.0 - blend) * *l;
            *r = blend * wet_r + (1.0 - blend) * *r;
        }
    }

    fn layout(&self) -> BusLayout {
        BusLayout::effect(self.channels)
    }

    fn name(&self) -> &'static str {
        "binaural_panner"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::Ordering;

    fn run(panner: &mut BinauralPanner, blocks: usize) -> (f32, f32) {
        let layout = panner.layout();
        let mut inputs = layout.allocate_inputs();
        let mut outputs = layout.allocate_outputs();
        for buffer in inputs[0].iter_mut() {
            buffer.fill(1.0);
        }
        let ctx = ProcessContext {
            sample_rate: 48_000,
            buffer_size: 64,
            time: 0,
        };
        for _ in 0..blocks {
            panner.process(&ctx, &inputs, &mut outputs);
        }
        (outputs[0][0][63], outputs[0][1][63])
    }

    fn params(direction: Vec3, blend: f32) -> Arc<SpatialParams> {
        let params = Arc::new(SpatialParams::new());
        params.valid.store(true, Ordering::Release);
        params.binaural_direction.store(direction);
        params.binaural_blend.set(blend);
        params
    }

    #[test]
    fn angles_follow_listener_space() {
        assert_eq!(angles(Vec3::FORWARD), (0.0, 0.0));
        let (right, _) = angles(Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(right, FRAC_PI_2);
        let (left, _) = angles(Vec3::new(-2.0, 0.0, 0.0));
        assert_relative_eq!(left, -FRAC_PI_2);
        let (_, up) = angles(Vec3::new(0.0, 3.0, 0.0));
        assert_relative_eq!(up, FRAC_PI_2);
        assert_eq!(angles(Vec3::ZERO), (0.0, 0.0));
    }

    #[test]
    fn mono_layouts_are_rejected() {
        let result = BinauralPanner::new(48_000, 1, Arc::new(SpatialParams::new()));
        assert!(matches!(result, Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn source_on_the_right_is_louder_on_the_right() {
        let mut panner = BinauralPanner::new(48_000, 2, params(Vec3::new(3.0, 0.0, 0.0), 1.0)).unwrap();
        let (left, right) = run(&mut panner, 200);
        assert!(right > left * 2.0, "left {left} right {right}");
    }

    #[test]
    fn zero_blend_is_dry() {
        let mut panner = BinauralPanner::new(48_000, 2, params(Vec3::new(-3.0, 0.0, 0.0), 0.0)).unwrap();
        let (left, right) = run(&mut panner, 4);
        assert_relative_eq!(left, 1.0);
        assert_relative_eq!(right, 1.0);
    }

    #[test]
    fn context_is_built_once_under_contention() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| BinauralContext::get() as *const _ as usize))
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(BinauralContext::init_count(), 1);
    }
}
