//! [`DirectMotion`] – operator commands that pre-empt behavior output.
//!
//! When the application issues a direct motion command (set a velocity, a
//! heading, an acceleration) that command wins over whatever the resolver
//! produced for the same axis, for a configurable precedence window. With a
//! window of zero the direct command wins until it is explicitly cleared.
//!
//! Each request is stamped with the time it was issued; every query takes the
//! current time so the decision follows the runtime clock.

use std::time::{Duration, Instant};

use mvr_types::MotionAxis;

/// A direct request on the rotational axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotRequest {
    /// Rotational velocity, deg/s.
    Vel(f64),
    /// Absolute heading, deg.
    Heading(f64),
}

#[derive(Debug, Clone, Copy)]
struct Stamped<T> {
    value: T,
    issued_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct DirectAxis<T> {
    motion: Option<Stamped<T>>,
    accel: Option<Stamped<f64>>,
    decel: Option<Stamped<f64>>,
}

impl<T> Default for DirectAxis<T> {
    fn default() -> Self {
        Self {
            motion: None,
            accel: None,
            decel: None,
        }
    }
}

/// Direct motion requests for every axis, with their precedence window.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use mvr_kernel::DirectMotion;
///
/// let t = Instant::now();
/// let mut direct = DirectMotion::new(Duration::from_millis(500));
/// direct.set_trans_vel(100.0, t);
///
/// assert_eq!(direct.trans_vel(t + Duration::from_millis(500)), Some(100.0));
/// assert_eq!(direct.trans_vel(t + Duration::from_millis(501)), None);
/// ```
#[derive(Debug, Clone)]
pub struct DirectMotion {
    precedence: Duration,
    trans: DirectAxis<f64>,
    rot: DirectAxis<RotRequest>,
    lat: DirectAxis<f64>,
}

impl DirectMotion {
    /// `precedence` is how long a direct request beats behavior output.
    /// `Duration::ZERO` means until cleared.
    pub fn new(precedence: Duration) -> Self {
        Self {
            precedence,
            trans: DirectAxis::default(),
            rot: DirectAxis::default(),
            lat: DirectAxis::default(),
        }
    }

    pub fn precedence(&self) -> Duration {
        self.precedence
    }

    pub fn set_precedence(&mut self, precedence: Duration) {
        self.precedence = precedence;
    }

    pub fn set_trans_vel(&mut self, vel: f64, now: Instant) {
        self.trans.motion = Some(Stamped {
            value: vel,
            issued_at: now,
        });
    }

    pub fn set_rot_vel(&mut self, vel: f64, now: Instant) {
        self.rot.motion = Some(Stamped {
            value: RotRequest::Vel(vel),
            issued_at: now,
        });
    }

    pub fn set_heading(&mut self, heading: f64, now: Instant) {
        self.rot.motion = Some(Stamped {
            value: RotRequest::Heading(heading),
            issued_at: now,
        });
    }

    pub fn set_lat_vel(&mut self, vel: f64, now: Instant) {
        self.lat.motion = Some(Stamped {
            value: vel,
            issued_at: now,
        });
    }

    pub fn set_accel(&mut self, axis: MotionAxis, accel: f64, now: Instant) {
        let stamped = Some(Stamped {
            value: accel,
            issued_at: now,
        });
        match axis {
            MotionAxis::Trans => self.trans.accel = stamped,
            MotionAxis::Rot => self.rot.accel = stamped,
            MotionAxis::Lat => self.lat.accel = stamped,
        }
    }

    pub fn set_decel(&mut self, axis: MotionAxis, decel: f64, now: Instant) {
        let stamped = Some(Stamped {
            value: decel,
            issued_at: now,
        });
        match axis {
            MotionAxis::Trans => self.trans.decel = stamped,
            MotionAxis::Rot => self.rot.decel = stamped,
            MotionAxis::Lat => self.lat.decel = stamped,
        }
    }

    /// Request zero velocity on every axis.
    pub fn stop(&mut self, now: Instant) {
        self.set_trans_vel(0.0, now);
        self.set_rot_vel(0.0, now);
        self.set_lat_vel(0.0, now);
    }

    /// Drop every direct request; behavior output takes over next tick.
    pub fn clear(&mut self) {
        self.trans = DirectAxis::default();
        self.rot = DirectAxis::default();
        self.lat = DirectAxis::default();
    }

    fn is_active(&self, issued_at: Instant, now: Instant) -> bool {
        self.precedence.is_zero() || now.saturating_duration_since(issued_at) <= self.precedence
    }

    fn active<T: Copy>(&self, slot: &Option<Stamped<T>>, now: Instant) -> Option<T> {
        slot.filter(|s| self.is_active(s.issued_at, now)).map(|s| s.value)
    }

    /// Forget every request whose precedence window has passed.
    pub fn expire(&mut self, now: Instant) {
        if self.precedence.is_zero() {
            return;
        }
        let window = self.precedence;
        let live = |issued_at: Instant| now.saturating_duration_since(issued_at) <= window;
        fn retain<T>(slot: &mut Option<Stamped<T>>, live: &impl Fn(Instant) -> bool) {
            if slot.as_ref().is_some_and(|s| !live(s.issued_at)) {
                *slot = None;
            }
        }
        retain(&mut self.trans.motion, &live);
        retain(&mut self.trans.accel, &live);
        retain(&mut self.trans.decel, &live);
        retain(&mut self.rot.motion, &live);
        retain(&mut self.rot.accel, &live);
        retain(&mut self.rot.decel, &live);
        retain(&mut self.lat.motion, &live);
        retain(&mut self.lat.accel, &live);
        retain(&mut self.lat.decel, &live);
    }

    pub fn trans_vel(&self, now: Instant) -> Option<f64> {
        self.active(&self.trans.motion, now)
    }

    pub fn rot(&self, now: Instant) -> Option<RotRequest> {
        self.active(&self.rot.motion, now)
    }

    pub fn lat_vel(&self, now: Instant) -> Option<f64> {
        self.active(&self.lat.motion, now)
    }

    pub fn accel(&self, axis: MotionAxis, now: Instant) -> Option<f64> {
        match axis {
            MotionAxis::Trans => self.active(&self.trans.accel, now),
            MotionAxis::Rot => self.active(&self.rot.accel, now),
            MotionAxis::Lat => self.active(&self.lat.accel, now),
        }
    }

    pub fn decel(&self, axis: MotionAxis, now: Instant) -> Option<f64> {
        match axis {
            MotionAxis::Trans => self.active(&self.trans.decel, now),
            MotionAxis::Rot => self.active(&self.rot.decel, now),
            MotionAxis::Lat => self.active(&self.lat.decel, now),
        }
    }

    /// `true` while a direct velocity/heading request owns `axis`.
    pub fn overrides(&self, axis: MotionAxis, now: Instant) -> bool {
        match axis {
            MotionAxis::Trans => self.trans_vel(now).is_some(),
            MotionAxis::Rot => self.rot(now).is_some(),
            MotionAxis::Lat => self.lat_vel(now).is_some(),
        }
    }
}

impl Default for DirectMotion {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
