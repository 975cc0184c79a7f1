//! Spatialization parameters shared between a mixer, its monitor and its components.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::graph::NodeShared;
use crate::lockfree::{AtomicParam, AtomicVec3};
use crate::math::Vec3;
use crate::reverb::ReverbCurve;
use crate::spatial::ComponentId;

const NONE: u32 = u32::MAX;

/// Scale applied to `direction.x × distance` before it becomes a pan in decibels.
pub const DEFAULT_PAN_SCALE: f32 = 1.75;

/// Distance (scaled by the directional attenuation factor) at which the binaural blend
/// reaches full spatialization.
pub const FULLY_SPATIALIZED_DISTANCE: f32 = 5.0;

/// Something that moves a mixer around, polled by its monitor every block.
pub trait Shape: Send + Sync + 'static {
    /// Current world-space position. Called on the render thread; must not block.
    fn position(&self) -> Vec3;

    /// Whether the position changed since the last call. The default reports a change
    /// every block.
    fn take_moved(&self) -> bool {
        true
    }
}

pub(crate) struct ShapeBinding(pub(crate) Arc<dyn Shape>);

/// A spatializer's active reverb send, as the monitor needs it.
pub(crate) struct ReverbSend {
    pub(crate) splitter: Arc<NodeShared>,
    pub(crate) curve: Arc<ReverbCurve>,
}

/// Plain copy of the values components compute with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialSnapshot {
    pub valid: bool,
    pub enabled: bool,
    /// Distance from the nearest (or pinned) listener.
    pub distance: f32,
    /// Unit vector from the listener towards the source, in listener space.
    pub direction: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub rolloff: f32,
    pub directional_attenuation_factor: f32,
    pub pan_scale: f32,
}

/// Atomically readable spatial state of one mixer.
///
/// Callers write the mixer attributes, the monitor writes the listener-relative values,
/// and components read a [`SpatialSnapshot`] every block.
pub struct SpatialParams {
    pub(crate) position: AtomicVec3,
    pub(crate) velocity: AtomicVec3,
    pub(crate) direction: AtomicVec3,
    pub(crate) min_distance: AtomicParam,
    pub(crate) max_distance: AtomicParam,
    pub(crate) min_gain: AtomicParam,
    pub(crate) max_gain: AtomicParam,
    pub(crate) rolloff: AtomicParam,
    pub(crate) directional_attenuation_factor: AtomicParam,
    pub(crate) pan_scale: AtomicParam,
    pub(crate) pinned_listener: AtomicU32,
    pub(crate) enabled: AtomicBool,

    pub(crate) valid: AtomicBool,
    pub(crate) listener: AtomicU32,
    pub(crate) listener_distance: AtomicParam,
    pub(crate) listener_direction: AtomicVec3,
    pub(crate) binaural_direction: AtomicVec3,
    pub(crate) binaural_blend: AtomicParam,

    pub(crate) force_resync: AtomicBool,
    pub(crate) reconfigure_pending: AtomicBool,
    pub(crate) preferred_panner: AtomicU32,
    pub(crate) preferred_attenuator: AtomicU32,
    pub(crate) current_panner: AtomicU32,
    pub(crate) current_attenuator: AtomicU32,
    pub(crate) resyncs: AtomicU64,

    pub(crate) reverb_send: ArcSwapOption<ReverbSend>,
    pub(crate) shape: ArcSwapOption<ShapeBinding>,
}

impl SpatialParams {
    pub fn new() -> Self {
        Self {
            position: AtomicVec3::default(),
            velocity: AtomicVec3::default(),
            direction: AtomicVec3::new(Vec3::FORWARD),
            min_distance: AtomicParam::new(0.0),
            max_distance: AtomicParam::new(f32::MAX),
            min_gain: AtomicParam::new(0.0),
            max_gain: AtomicParam::new(1.0),
            rolloff: AtomicParam::new(1.0),
            directional_attenuation_factor: AtomicParam::new(1.0),
            pan_scale: AtomicParam::new(DEFAULT_PAN_SCALE),
            pinned_listener: AtomicU32::new(NONE),
            enabled: AtomicBool::new(true),

            valid: AtomicBool::new(false),
            listener: AtomicU32::new(NONE),
            listener_distance: AtomicParam::new(0.0),
            listener_direction: AtomicVec3::new(Vec3::FORWARD),
            binaural_direction: AtomicVec3::new(Vec3::FORWARD),
            binaural_blend: AtomicParam::new(0.0),

            force_resync: AtomicBool::new(true),
            reconfigure_pending: AtomicBool::new(false),
            preferred_panner: AtomicU32::new(NONE),
            preferred_attenuator: AtomicU32::new(NONE),
            current_panner: AtomicU32::new(NONE),
            current_attenuator: AtomicU32::new(NONE),
            resyncs: AtomicU64::new(0),

            reverb_send: ArcSwapOption::empty(),
            shape: ArcSwapOption::empty(),
        }
    }

    pub fn snapshot(&self) -> SpatialSnapshot {
        SpatialSnapshot {
            valid: self.valid.load(Ordering::Acquire),
            enabled: self.enabled.load(Ordering::Acquire),
            distance: self.listener_distance.get(),
            direction: self.listener_direction.load(),
            min_distance: self.min_distance.get(),
            max_distance: self.max_distance.get(),
            min_gain: self.min_gain.get(),
            max_gain: self.max_gain.get(),
            rolloff: self.rolloff.get(),
            directional_attenuation_factor: self.directional_attenuation_factor.get(),
            pan_scale: self.pan_scale.get(),
        }
    }

    /// Direction and blend for binaural panners.
    pub fn binaural(&self) -> (Vec3, f32) {
        (self.binaural_direction.load(), self.binaural_blend.get())
    }

    /// Make the monitor recompute on its next block even if no listener moved.
    pub fn request_resync(&self) {
        self.force_resync.store(true, Ordering::Release);
    }

    /// How many times the monitor took its recompute path.
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Acquire)
    }

    pub fn listener(&self) -> Option<usize> {
        decode(self.listener.load(Ordering::Acquire)).map(|l| l as usize)
    }

    pub fn pinned_listener(&self) -> Option<usize> {
        decode(self.pinned_listener.load(Ordering::Acquire)).map(|l| l as usize)
    }

    pub(crate) fn set_pinned_listener(&self, listener: Option<usize>) {
        self.pinned_listener
            .store(encode(listener.map(|l| l as u32)), Ordering::Release);
    }

    pub(crate) fn load_id(slot: &AtomicU32) -> Option<ComponentId> {
        decode(slot.load(Ordering::Acquire))
    }

    pub(crate) fn store_id(slot: &AtomicU32, id: Option<ComponentId>) {
        slot.store(encode(id), Ordering::Release);
    }
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(raw: u32) -> Option<u32> {
    Some(raw).filter(|&v| v != NONE)
}

fn encode(value: Option<u32>) -> u32 {
    value.unwrap_or(NONE)
}
