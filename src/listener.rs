//! Listeners and the epoch counter that tells monitors when any of them moved.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::lockfree::{AtomicParam, AtomicVec3};
use crate::math::Vec3;

/// Maximum number of listeners an engine can have.
pub const MAX_LISTENERS: usize = 4;

/// A wrapping change counter shared by callers (writers) and the render thread (reader).
///
/// Every listener mutation and every component enable/disable bumps it once. Monitors
/// remember the last value they saw; a different value means "recompute".
#[derive(Debug)]
pub struct EpochCounter {
    value: AtomicU32,
}

impl EpochCounter {
    /// Never produced by [`bump`](Self::bump); monitors start from it so their first
    /// block always resyncs.
    pub const SENTINEL: u32 = u32::MAX;

    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// A counter starting at `value`. Mostly useful to exercise wraparound.
    pub const fn starting_at(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    /// The process-wide counter used by engines that are not given their own registry.
    pub fn global() -> Arc<EpochCounter> {
        static GLOBAL: OnceLock<Arc<EpochCounter>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(EpochCounter::new())).clone()
    }

    #[inline]
    pub fn current(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance the counter, skipping [`SENTINEL`](Self::SENTINEL). Returns the new value.
    pub fn bump(&self) -> u32 {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let mut next = current.wrapping_add(1);
            if next == Self::SENTINEL {
                next = next.wrapping_add(1);
            }
            match self
                .value
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for EpochCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sound cone of a listener, in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cone {
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub outer_gain: f32,
}

impl Default for Cone {
    fn default() -> Self {
        Self {
            inner_angle: std::f32::consts::TAU,
            outer_angle: std::f32::consts::TAU,
            outer_gain: 0.0,
        }
    }
}

/// Plain copy of one listener's state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ListenerSnapshot {
    pub position: Vec3,
    pub direction: Vec3,
    pub velocity: Vec3,
    pub world_up: Vec3,
    pub cone: Cone,
    pub enabled: bool,
}

impl ListenerSnapshot {
    /// Express a world-space offset from the listener in listener space:
    /// `+x` right, `+y` up, `-z` forward.
    pub fn to_local(&self, offset: Vec3) -> Vec3 {
        let forward = self.direction.normalize_or_zero();
        let forward = if forward == Vec3::ZERO { Vec3::FORWARD } else { forward };
        let mut right = forward.cross(self.world_up).normalize_or_zero();
        if right == Vec3::ZERO {
            right = forward.cross(Vec3::UP).normalize_or_zero();
        }
        let up = right.cross(forward);
        Vec3::new(offset.dot(right), offset.dot(up), -offset.dot(forward))
    }
}

#[derive(Debug)]
struct ListenerState {
    position: AtomicVec3,
    direction: AtomicVec3,
    velocity: AtomicVec3,
    world_up: AtomicVec3,
    cone_inner: AtomicParam,
    cone_outer: AtomicParam,
    cone_outer_gain: AtomicParam,
    enabled: AtomicBool,
}

impl ListenerState {
    fn new() -> Self {
        let cone = Cone::default();
        Self {
            position: AtomicVec3::default(),
            direction: AtomicVec3::new(Vec3::FORWARD),
            velocity: AtomicVec3::default(),
            world_up: AtomicVec3::new(Vec3::UP),
            cone_inner: AtomicParam::new(cone.inner_angle),
            cone_outer: AtomicParam::new(cone.outer_angle),
            cone_outer_gain: AtomicParam::new(cone.outer_gain),
            enabled: AtomicBool::new(true),
        }
    }

    fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            position: self.position.load(),
            direction: self.direction.load(),
            velocity: self.velocity.load(),
            world_up: self.world_up.load(),
            cone: Cone {
                inner_angle: self.cone_inner.get(),
                outer_angle: self.cone_outer.get(),
                outer_gain: self.cone_outer_gain.get(),
            },
            enabled: self.enabled.load(Ordering::Acquire),
        }
    }
}

/// The engine's fixed set of listeners.
///
/// Mutators are lock-free and each ends with exactly one epoch bump.
#[derive(Debug)]
pub struct Listeners {
    listeners: Box<[ListenerState]>,
    epoch: Arc<EpochCounter>,
}

impl Listeners {
    pub(crate) fn new(count: usize, epoch: Arc<EpochCounter>) -> Self {
        Self {
            listeners: (0..count.clamp(1, MAX_LISTENERS))
                .map(|_| ListenerState::new())
                .collect(),
            epoch,
        }
    }

    pub fn count(&self) -> usize {
        self.listeners.len()
    }

    fn get(&self, index: usize) -> Result<&ListenerState> {
        self.listeners.get(index).ok_or(Error::InvalidListener(index))
    }

    fn update(&self, index: usize, f: impl FnOnce(&ListenerState)) -> Result<()> {
        f(self.get(index)?);
        self.epoch.bump();
        Ok(())
    }

    pub fn set_position(&self, index: usize, position: Vec3) -> Result<()> {
        self.update(index, |l| l.position.store(position))
    }

    pub fn set_direction(&self, index: usize, direction: Vec3) -> Result<()> {
        self.update(index, |l| l.direction.store(direction))
    }

    pub fn set_velocity(&self, index: usize, velocity: Vec3) -> Result<()> {
        self.update(index, |l| l.velocity.store(velocity))
    }

    pub fn set_world_up(&self, index: usize, up: Vec3) -> Result<()> {
        self.update(index, |l| l.world_up.store(up))
    }

    pub fn set_cone(&self, index: usize, cone: Cone) -> Result<()> {
        self.update(index, |l| {
            l.cone_inner.set(cone.inner_angle);
            l.cone_outer.set(cone.outer_angle);
            l.cone_outer_gain.set(cone.outer_gain);
        })
    }

    pub fn set_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        self.update(index, |l| l.enabled.store(enabled, Ordering::Release))
    }

    pub fn snapshot(&self, index: usize) -> Result<ListenerSnapshot> {
        self.get(index).map(ListenerState::snapshot)
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.listeners
            .get(index)
            .is_some_and(|l| l.enabled.load(Ordering::Acquire))
    }

    /// Index of the enabled listener nearest to `position`, or `None` if every listener
    /// is disabled. Lock-free; called from the render thread.
    pub fn find_closest(&self, position: Vec3) -> Option<usize> {
        let mut closest = None;
        let mut best = f32::INFINITY;
        for (index, listener) in self.listeners.iter().enumerate() {
            if !listener.enabled.load(Ordering::Acquire) {
                continue;
            }
            let d = listener.position.load().distance(position);
            if closest.is_none() || d < best {
                best = d;
                closest = Some(index);
            }
        }
        closest
    }
}
