//! Small vector and gain helpers shared by listeners and spatial components.

use std::ops::{Add, Mul, Neg, Sub};

/// A position, direction or velocity in world space.
///
/// The coordinate system is right handed with `-z` pointing forward, matching the
/// default listener orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const UP: Self = Self::new(0.0, 1.0, 0.0);
    pub const FORWARD: Self = Self::new(0.0, 0.0, -1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Unit vector in the same direction, or zero for a degenerate vector.
    pub fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len > f32::EPSILON {
            self * (1.0 / len)
        } else {
            Self::ZERO
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

/// Convert decibels to a linear gain factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels. Silence maps to negative infinity.
#[inline]
pub fn linear_to_db(gain: f32) -> f32 {
    20.0 * gain.log10()
}

/// Map a pan expressed in decibels of attenuation to a linear pan in `-1..=1`.
///
/// Positive values pan right. `0` is centre, `±100` is hard left/right.
pub fn pan_db_to_linear(db: f32) -> f32 {
    let db = db.clamp(-100.0, 100.0);
    let remaining = db_to_linear(-db.abs());
    if db > 0.0 {
        1.0 - remaining
    } else {
        -1.0 + remaining
    }
}

/// Inverse of [`pan_db_to_linear`].
pub fn pan_linear_to_db(pan: f32) -> f32 {
    let pan = pan.clamp(-1.0, 1.0);
    if pan > 0.0 {
        -linear_to_db(1.0 - pan)
    } else {
        linear_to_db(1.0 + pan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cross_follows_right_hand_rule() {
        let right = Vec3::FORWARD.cross(Vec3::UP);
        assert_relative_eq!(right.x, 1.0);
        assert_relative_eq!(right.y, 0.0);
        assert_relative_eq!(right.z, 0.0);
    }

    #[test]
    fn normalizing_zero_stays_zero() {
        assert_eq!(Vec3::ZERO.normalize_or_zero(), Vec3::ZERO);
        assert_relative_eq!(Vec3::new(3.0, 4.0, 0.0).normalize_or_zero().length(), 1.0);
    }

    #[test]
    fn decibel_conversions() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-6.0), 0.501_187, epsilon = 1e-5);
        assert_relative_eq!(linear_to_db(db_to_linear(-7.0)), -7.0, epsilon = 1e-4);
    }

    #[test]
    fn pan_db_is_centred_and_bounded() {
        assert_relative_eq!(pan_db_to_linear(0.0), 0.0);
        assert!(pan_db_to_linear(100.0) > 0.99);
        assert!(pan_db_to_linear(-100.0) < -0.99);
        assert!(pan_db_to_linear(6.0) > 0.0);
        assert_relative_eq!(pan_linear_to_db(pan_db_to_linear(-12.0)), -12.0, epsilon = 1e-3);
    }
}
