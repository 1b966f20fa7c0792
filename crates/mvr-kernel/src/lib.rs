//! `mvr-kernel` – Safety primitives
//!
//! The rules every command obeys on its way to the hardware. Nothing here
//! decides *what* the robot should do; it bounds and times what was decided.
//!
//! # Modules
//!
//! - [`motion_limits`] – [`MotionLimits`][motion_limits::MotionLimits]:
//!   per-axis absolute velocity/acceleration bounds used to clamp every
//!   outgoing command, plus [`StoppedThresholds`][motion_limits::StoppedThresholds].
//! - [`direct_motion`] – [`DirectMotion`][direct_motion::DirectMotion]:
//!   operator commands that pre-empt behavior output for a precedence window.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]:
//!   deadline tracking, used for command refresh, keepalive pulses and
//!   connection loss detection.

pub mod direct_motion;
pub mod motion_limits;
pub mod watchdog;

pub use direct_motion::{DirectMotion, RotRequest};
pub use motion_limits::{AxisLimits, MotionLimits, StoppedThresholds, to_native};
pub use watchdog::{ComponentHealth, Watchdog};
