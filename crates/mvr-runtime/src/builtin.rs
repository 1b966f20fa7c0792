//! Built-in behaviors.
//!
//! Small, stateless building blocks that cover the common cases: stopping,
//! driving at a fixed speed, capping speed, and holding a heading.

use mvr_types::RobotState;

use crate::behavior::Behavior;
use crate::desired_motion::{DesiredMotion, MAX_STRENGTH};

/// Requests zero velocity on every axis at full strength.
pub struct StopBehavior {
    name: String,
}

impl StopBehavior {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Behavior for StopBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn fire(&mut self, _so_far: &DesiredMotion, _robot: &RobotState) -> DesiredMotion {
        let mut out = DesiredMotion::new();
        out.set_vel(0.0, MAX_STRENGTH);
        out.set_rot_vel(0.0, MAX_STRENGTH);
        out.set_lat_vel(0.0, MAX_STRENGTH);
        out
    }
}

/// Drives forward at a fixed velocity.
pub struct ConstantVelocity {
    name: String,
    vel: f64,
    strength: f64,
}

impl ConstantVelocity {
    pub fn new(name: impl Into<String>, vel: f64) -> Self {
        Self {
            name: name.into(),
            vel,
            strength: MAX_STRENGTH,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn set_vel(&mut self, vel: f64) {
        self.vel = vel;
    }
}

impl Behavior for ConstantVelocity {
    fn name(&self) -> &str {
        &self.name
    }

    fn fire(&mut self, _so_far: &DesiredMotion, _robot: &RobotState) -> DesiredMotion {
        let mut out = DesiredMotion::new();
        out.set_vel(self.vel, self.strength);
        out
    }
}

/// Caps translational speed in both directions.
///
/// Only the `MaxVel` / `MaxNegVel` channels are requested; the reflector
/// applies them to whatever velocity was resolved.
pub struct SpeedCap {
    name: String,
    max_vel: f64,
    max_neg_vel: f64,
}

impl SpeedCap {
    pub fn new(name: impl Into<String>, max_vel: f64, max_neg_vel: f64) -> Self {
        Self {
            name: name.into(),
            max_vel: max_vel.abs(),
            max_neg_vel: max_neg_vel.abs(),
        }
    }
}

impl Behavior for SpeedCap {
    fn name(&self) -> &str {
        &self.name
    }

    fn fire(&mut self, _so_far: &DesiredMotion, _robot: &RobotState) -> DesiredMotion {
        let mut out = DesiredMotion::new();
        out.set_max_vel(self.max_vel, MAX_STRENGTH);
        out.set_max_neg_vel(self.max_neg_vel, MAX_STRENGTH);
        out
    }
}

/// Holds an absolute heading unless a higher priority already decided the
/// rotation.
pub struct HoldHeading {
    name: String,
    heading: f64,
    strength: f64,
}

impl HoldHeading {
    pub fn new(name: impl Into<String>, heading: f64, strength: f64) -> Self {
        Self {
            name: name.into(),
            heading,
            strength,
        }
    }

    pub fn set_heading(&mut self, heading: f64) {
        self.heading = heading;
    }
}

impl Behavior for HoldHeading {
    fn name(&self) -> &str {
        &self.name
    }

    fn fire(&mut self, so_far: &DesiredMotion, _robot: &RobotState) -> DesiredMotion {
        use crate::desired_motion::Channel;

        let mut out = DesiredMotion::new();
        let decided = [Channel::RotVel, Channel::Heading, Channel::DeltaHeading]
            .into_iter()
            .any(|ch| so_far.is_requested(ch));
        if !decided {
            out.set_heading(self.heading, self.strength);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired_motion::Channel;

    fn fire(b: &mut dyn Behavior, so_far: &DesiredMotion) -> DesiredMotion {
        b.fire(so_far, &RobotState::default())
    }

    #[test]
    fn stop_zeroes_all_axes_at_full_strength() {
        let out = fire(&mut StopBehavior::new("stop"), &DesiredMotion::new());
        for ch in [Channel::Vel, Channel::RotVel, Channel::LatVel] {
            assert_eq!(out.get(ch), Some(0.0));
            assert_eq!(out.strength(ch), MAX_STRENGTH);
        }
    }

    #[test]
    fn constant_velocity_uses_configured_strength() {
        let mut b = ConstantVelocity::new("wander", 300.0).with_strength(0.5);
        let out = fire(&mut b, &DesiredMotion::new());
        assert_eq!(out.get(Channel::Vel), Some(300.0));
        assert_eq!(out.strength(Channel::Vel), 0.5);
        b.set_vel(120.0);
        assert_eq!(fire(&mut b, &DesiredMotion::new()).get(Channel::Vel), Some(120.0));
    }

    #[test]
    fn speed_cap_requests_only_caps() {
        let out = fire(&mut SpeedCap::new("cap", 400.0, -200.0), &DesiredMotion::new());
        assert_eq!(out.get(Channel::MaxVel), Some(400.0));
        assert_eq!(out.get(Channel::MaxNegVel), Some(200.0));
        assert!(!out.is_requested(Channel::Vel));
    }

    #[test]
    fn hold_heading_yields_to_decided_rotation() {
        let mut b = HoldHeading::new("hold", 90.0, 0.5);
        assert_eq!(fire(&mut b, &DesiredMotion::new()).get(Channel::Heading), Some(90.0));

        let mut decided = DesiredMotion::new();
        decided.set_rot_vel(10.0, 1.0);
        assert!(fire(&mut b, &decided).is_empty());
    }
}
