//! Absolute motion limits and stopped-state thresholds.
//!
//! Whatever a behavior or an operator asks for, the command that reaches the
//! hardware is bounded by the robot's absolute maxima. [`AxisLimits`] holds
//! those bounds for one axis; [`MotionLimits`] groups the three axes.
//!
//! Velocities are clamped into `[-max_neg_vel, +max_vel]`, optionally
//! narrowed further by caps requested at runtime. Accelerations and
//! decelerations are magnitudes and are clamped into `[0, max]`.

use mvr_types::{MotionAxis, RobotState};
use serde::{Deserialize, Serialize};

/// Absolute bounds for a single motion axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    /// Largest forward (positive) velocity.
    pub max_vel: f64,
    /// Largest backward (negative) velocity, as a magnitude.
    pub max_neg_vel: f64,
    pub max_accel: f64,
    pub max_decel: f64,
}

impl AxisLimits {
    pub const fn new(max_vel: f64, max_neg_vel: f64, max_accel: f64, max_decel: f64) -> Self {
        Self {
            max_vel,
            max_neg_vel,
            max_accel,
            max_decel,
        }
    }

    /// Clamp `vel` into `[-max_neg_vel, +max_vel]`.
    pub fn clamp_vel(&self, vel: f64) -> f64 {
        self.clamp_vel_capped(vel, None, None)
    }

    /// Clamp `vel` into the absolute range, narrowed by the optional caps.
    ///
    /// A cap can only tighten the range; a cap larger than the absolute
    /// maximum is ignored.
    pub fn clamp_vel_capped(&self, vel: f64, pos_cap: Option<f64>, neg_cap: Option<f64>) -> f64 {
        let hi = match pos_cap {
            Some(cap) => cap.abs().min(self.max_vel.abs()),
            None => self.max_vel.abs(),
        };
        let lo = match neg_cap {
            Some(cap) => -cap.abs().min(self.max_neg_vel.abs()),
            None => -self.max_neg_vel.abs(),
        };
        vel.clamp(lo, hi)
    }

    pub fn clamp_accel(&self, accel: f64) -> f64 {
        accel.abs().min(self.max_accel.abs())
    }

    pub fn clamp_decel(&self, decel: f64) -> f64 {
        decel.abs().min(self.max_decel.abs())
    }
}

/// Absolute limits for every axis, loaded from the robot's parameter profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionLimits {
    pub trans: AxisLimits,
    pub rot: AxisLimits,
    pub lat: AxisLimits,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            trans: AxisLimits::new(1500.0, 1500.0, 2000.0, 2000.0),
            rot: AxisLimits::new(360.0, 360.0, 500.0, 500.0),
            // Differential drive: no lateral motion unless configured.
            lat: AxisLimits::new(0.0, 0.0, 0.0, 0.0),
        }
    }
}

impl MotionLimits {
    pub fn axis(&self, axis: MotionAxis) -> &AxisLimits {
        match axis {
            MotionAxis::Trans => &self.trans,
            MotionAxis::Rot => &self.rot,
            MotionAxis::Lat => &self.lat,
        }
    }
}

/// Velocity magnitudes below which the robot counts as stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppedThresholds {
    pub vel: f64,
    pub rot_vel: f64,
    pub lat_vel: f64,
}

impl Default for StoppedThresholds {
    fn default() -> Self {
        Self {
            vel: 4.0,
            rot_vel: 1.0,
            lat_vel: 4.0,
        }
    }
}

impl StoppedThresholds {
    pub fn is_stopped(&self, state: &RobotState) -> bool {
        state.vel.abs() <= self.vel
            && state.rot_vel.abs() <= self.rot_vel
            && state.lat_vel.abs() <= self.lat_vel
    }
}

/// Round a floating value to the hardware's native integer units.
///
/// Out-of-range values saturate at `i32::MIN`/`i32::MAX`; NaN maps to 0.
pub fn to_native(value: f64) -> i32 {
    value.round() as i32
}
