//! `mvr-types` – shared vocabulary for the MVR control runtime.
//!
//! Every other crate in the workspace speaks in these types: the discrete
//! [`MotionCommand`]s written to the hardware, the [`RobotState`] snapshot read
//! by behaviors, the [`RawPacket`]s handed over by the receiver thread, the
//! [`Clock`] that drives every time-based decision, and the global
//! [`MvrError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the three independent motion axes of a wheeled base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionAxis {
    /// Forward/backward motion (mm/s).
    Trans,
    /// Rotation about the vertical axis (deg/s, or an absolute heading in deg).
    Rot,
    /// Sideways motion for holonomic bases (mm/s).
    Lat,
}

impl MotionAxis {
    pub const ALL: [MotionAxis; 3] = [MotionAxis::Trans, MotionAxis::Rot, MotionAxis::Lat];

    /// Stable lowercase label, used as a watchdog component id and in logs.
    pub fn label(self) -> &'static str {
        match self {
            MotionAxis::Trans => "trans",
            MotionAxis::Rot => "rot",
            MotionAxis::Lat => "lat",
        }
    }
}

/// Discriminant of a [`MotionCommand`] without its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    TransVel,
    RotVel,
    Heading,
    LatVel,
    TransAccel,
    TransDecel,
    RotAccel,
    RotDecel,
    LatAccel,
    LatDecel,
    Pulse,
}

/// A discrete command for the device command sink.
///
/// Every argument is already rounded to the hardware's native integer units
/// (mm/s, mm/s², deg/s, deg/s², deg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "value")]
pub enum MotionCommand {
    TransVel(i32),
    RotVel(i32),
    /// Absolute heading in degrees, normalised into `(-180, 180]`.
    Heading(i32),
    LatVel(i32),
    TransAccel(i32),
    TransDecel(i32),
    RotAccel(i32),
    RotDecel(i32),
    LatAccel(i32),
    LatDecel(i32),
    /// No-op keepalive that resets the hardware watchdog.
    Pulse,
}

impl MotionCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            MotionCommand::TransVel(_) => CommandKind::TransVel,
            MotionCommand::RotVel(_) => CommandKind::RotVel,
            MotionCommand::Heading(_) => CommandKind::Heading,
            MotionCommand::LatVel(_) => CommandKind::LatVel,
            MotionCommand::TransAccel(_) => CommandKind::TransAccel,
            MotionCommand::TransDecel(_) => CommandKind::TransDecel,
            MotionCommand::RotAccel(_) => CommandKind::RotAccel,
            MotionCommand::RotDecel(_) => CommandKind::RotDecel,
            MotionCommand::LatAccel(_) => CommandKind::LatAccel,
            MotionCommand::LatDecel(_) => CommandKind::LatDecel,
            MotionCommand::Pulse => CommandKind::Pulse,
        }
    }

    /// The axis this command acts on. `Pulse` belongs to no axis.
    pub fn axis(&self) -> Option<MotionAxis> {
        match self {
            MotionCommand::TransVel(_)
            | MotionCommand::TransAccel(_)
            | MotionCommand::TransDecel(_) => Some(MotionAxis::Trans),
            MotionCommand::RotVel(_)
            | MotionCommand::Heading(_)
            | MotionCommand::RotAccel(_)
            | MotionCommand::RotDecel(_) => Some(MotionAxis::Rot),
            MotionCommand::LatVel(_)
            | MotionCommand::LatAccel(_)
            | MotionCommand::LatDecel(_) => Some(MotionAxis::Lat),
            MotionCommand::Pulse => None,
        }
    }

    /// The integer argument, if the command carries one.
    pub fn value(&self) -> Option<i32> {
        match *self {
            MotionCommand::TransVel(v)
            | MotionCommand::RotVel(v)
            | MotionCommand::Heading(v)
            | MotionCommand::LatVel(v)
            | MotionCommand::TransAccel(v)
            | MotionCommand::TransDecel(v)
            | MotionCommand::RotAccel(v)
            | MotionCommand::RotDecel(v)
            | MotionCommand::LatAccel(v)
            | MotionCommand::LatDecel(v) => Some(v),
            MotionCommand::Pulse => None,
        }
    }

    /// Rebuild a command of `kind` carrying `value`.
    ///
    /// Returns `MotionCommand::Pulse` for `CommandKind::Pulse` regardless of
    /// `value`.
    pub fn from_kind(kind: CommandKind, value: i32) -> Self {
        match kind {
            CommandKind::TransVel => MotionCommand::TransVel(value),
            CommandKind::RotVel => MotionCommand::RotVel(value),
            CommandKind::Heading => MotionCommand::Heading(value),
            CommandKind::LatVel => MotionCommand::LatVel(value),
            CommandKind::TransAccel => MotionCommand::TransAccel(value),
            CommandKind::TransDecel => MotionCommand::TransDecel(value),
            CommandKind::RotAccel => MotionCommand::RotAccel(value),
            CommandKind::RotDecel => MotionCommand::RotDecel(value),
            CommandKind::LatAccel => MotionCommand::LatAccel(value),
            CommandKind::LatDecel => MotionCommand::LatDecel(value),
            CommandKind::Pulse => MotionCommand::Pulse,
        }
    }
}

/// Planar pose: position in mm, heading in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub th: f64,
}

/// Snapshot of the robot as last reported by the hardware.
///
/// Updated by packet handlers during the Packet Handler phase; read by
/// behaviors and the state reflector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub pose: Pose,
    /// Translational velocity, mm/s.
    pub vel: f64,
    /// Rotational velocity, deg/s.
    pub rot_vel: f64,
    /// Lateral velocity, mm/s.
    pub lat_vel: f64,
    /// Battery voltage, if the hardware reports it.
    pub battery_voltage: Option<f64>,
    /// Number of motor packets folded into this state so far.
    pub motor_packets: u64,
}

/// A raw packet as delivered by the receiver thread.
///
/// The payload framing is owned by whatever produced it; the core only routes
/// packets to the registered packet handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub kind: u8,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

impl RawPacket {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Global error type for hardware, channel and configuration failures.
///
/// The control core itself never fails: only the boundaries (command sink,
/// packet channel, configuration loading) produce these.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MvrError {
    #[error("Hardware Fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel full")]
    ChannelFull,

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Packet Decode Error: {0}")]
    Decode(String),

    #[error("Control Cycle Error: {0}")]
    Cycle(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Clocks
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic time source used by every time-window decision in the runtime.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The wall clock: [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
///
/// ```
/// use std::time::Duration;
/// use mvr_types::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now() - t0, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: Instant) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Angles
// ─────────────────────────────────────────────────────────────────────────────

/// Normalise `deg` into `(-180, 180]`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let mut a = deg % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Signed shortest difference `to - from`, in `(-180, 180]`.
pub fn angle_diff_degrees(from: f64, to: f64) -> f64 {
    normalize_degrees(to - from)
}
