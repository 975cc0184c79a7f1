//! Atomic helpers for values the render thread reads while callers write them.

use std::sync::atomic::Ordering;

use atomic_float::AtomicF32;

use crate::math::Vec3;

/// Three independently atomic floats.
///
/// Components are stored one by one, so a reader racing a writer may observe a mix of
/// old and new components for a single block. Spatial code recomputes from fresh values
/// every time it runs, so such a tear lasts at most one block.
#[derive(Debug)]
pub struct AtomicVec3 {
    x: AtomicF32,
    y: AtomicF32,
    z: AtomicF32,
}

impl AtomicVec3 {
    pub fn new(value: Vec3) -> Self {
        Self {
            x: AtomicF32::new(value.x),
            y: AtomicF32::new(value.y),
            z: AtomicF32::new(value.z),
        }
    }

    #[inline]
    pub fn load(&self) -> Vec3 {
        Vec3::new(
            self.x.load(Ordering::Acquire),
            self.y.load(Ordering::Acquire),
            self.z.load(Ordering::Acquire),
        )
    }

    #[inline]
    pub fn store(&self, value: Vec3) {
        self.x.store(value.x, Ordering::Release);
        self.y.store(value.y, Ordering::Release);
        self.z.store(value.z, Ordering::Release);
    }
}

impl Default for AtomicVec3 {
    fn default() -> Self {
        Self::new(Vec3::ZERO)
    }
}

/// An atomic `f32` with acquire/release accessors.
#[derive(Debug)]
pub struct AtomicParam {
    value: AtomicF32,
}

impl AtomicParam {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }
}
