//! In-process simulated drive for tests and headless runs.
//!
//! [`SimDrive`] integrates the last commanded velocities into a pose.
//! [`SimCommandSink`] is the [`CommandSink`] side: it applies commands to a
//! shared drive and records them in a [`SimCommandLog`]. [`SimPacketSource`]
//! plays the receiver thread, periodically encoding the drive state into
//! motor packets, and [`SimMotorHandler`] decodes those packets back into the
//! robot state during the Packet Handler phase.
//!
//! # Example
//!
//! ```rust
//! use mvr_hal::command_sink::CommandSink;
//! use mvr_hal::sim::{SimCommandSink, SimDrive};
//! use mvr_types::MotionCommand;
//!
//! let drive = SimDrive::shared();
//! let mut sink = SimCommandSink::new(drive.clone());
//! let log = sink.log();
//!
//! sink.send(MotionCommand::TransVel(200)).expect("sim send must succeed");
//! assert_eq!(log.commands(), vec![MotionCommand::TransVel(200)]);
//! assert_eq!(drive.lock().vel, 200.0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mvr_types::{MotionCommand, MvrError, Pose, RawPacket, RobotState, angle_diff_degrees, normalize_degrees};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command_sink::CommandSink;
use crate::packet::{PacketHandler, PacketSender};

/// Packet kind used for motor state packets.
pub const MOTOR_PACKET: u8 = 0x32;

/// Turn rate used when the drive is tracking an absolute heading, deg/s.
const HEADING_TRACK_RATE: f64 = 90.0;

// ────────────────────────────────────────────────────────────────────────────
// Drive model
// ────────────────────────────────────────────────────────────────────────────

/// Kinematic model of a wheeled base driven by motion commands.
#[derive(Debug, Clone, Default)]
pub struct SimDrive {
    pub pose: Pose,
    pub vel: f64,
    pub rot_vel: f64,
    pub lat_vel: f64,
    /// Absolute heading being tracked instead of a rotational velocity.
    pub heading_target: Option<f64>,
    pub trans_accel: Option<i32>,
    pub trans_decel: Option<i32>,
    pub rot_accel: Option<i32>,
    pub rot_decel: Option<i32>,
    pub lat_accel: Option<i32>,
    pub lat_decel: Option<i32>,
    pub pulses: u64,
}

pub type SharedSimDrive = Arc<Mutex<SimDrive>>;

impl SimDrive {
    pub fn shared() -> SharedSimDrive {
        Arc::new(Mutex::new(SimDrive::default()))
    }

    pub fn apply(&mut self, command: MotionCommand) {
        match command {
            MotionCommand::TransVel(v) => self.vel = f64::from(v),
            MotionCommand::RotVel(v) => {
                self.heading_target = None;
                self.rot_vel = f64::from(v);
            }
            MotionCommand::Heading(h) => self.heading_target = Some(f64::from(h)),
            MotionCommand::LatVel(v) => self.lat_vel = f64::from(v),
            MotionCommand::TransAccel(a) => self.trans_accel = Some(a),
            MotionCommand::TransDecel(d) => self.trans_decel = Some(d),
            MotionCommand::RotAccel(a) => self.rot_accel = Some(a),
            MotionCommand::RotDecel(d) => self.rot_decel = Some(d),
            MotionCommand::LatAccel(a) => self.lat_accel = Some(a),
            MotionCommand::LatDecel(d) => self.lat_decel = Some(d),
            MotionCommand::Pulse => self.pulses += 1,
        }
    }

    /// Advance the pose by `dt` seconds at the current velocities.
    pub fn step(&mut self, dt: f64) {
        if let Some(target) = self.heading_target {
            let err = angle_diff_degrees(self.pose.th, target);
            let max_turn = HEADING_TRACK_RATE * dt;
            let turn = err.clamp(-max_turn, max_turn);
            self.rot_vel = if dt > 0.0 { turn / dt } else { 0.0 };
        }
        let th = self.pose.th.to_radians();
        self.pose.x += (self.vel * th.cos() - self.lat_vel * th.sin()) * dt;
        self.pose.y += (self.vel * th.sin() + self.lat_vel * th.cos()) * dt;
        self.pose.th = normalize_degrees(self.pose.th + self.rot_vel * dt);
    }

    pub fn sample(&self) -> MotorSample {
        MotorSample {
            x: self.pose.x,
            y: self.pose.y,
            th: self.pose.th,
            vel: self.vel,
            rot_vel: self.rot_vel,
            lat_vel: self.lat_vel,
            battery_voltage: 12.8,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Command sink
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LogInner {
    commands: Vec<MotionCommand>,
    offline: bool,
}

/// Shared record of every command a [`SimCommandSink`] accepted.
#[derive(Debug, Clone, Default)]
pub struct SimCommandLog {
    inner: Arc<Mutex<LogInner>>,
}

impl SimCommandLog {
    pub fn commands(&self) -> Vec<MotionCommand> {
        self.inner.lock().commands.clone()
    }

    /// Return and forget everything recorded so far.
    pub fn take(&self) -> Vec<MotionCommand> {
        std::mem::take(&mut self.inner.lock().commands)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().commands.is_empty()
    }

    /// While offline, every send fails with [`MvrError::Hardware`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }
}

/// [`CommandSink`] that drives a [`SimDrive`].
pub struct SimCommandSink {
    id: String,
    drive: SharedSimDrive,
    log: SimCommandLog,
}

impl SimCommandSink {
    pub fn new(drive: SharedSimDrive) -> Self {
        Self {
            id: "sim".to_string(),
            drive,
            log: SimCommandLog::default(),
        }
    }

    pub fn log(&self) -> SimCommandLog {
        self.log.clone()
    }
}

impl CommandSink for SimCommandSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&mut self, command: MotionCommand) -> Result<(), MvrError> {
        let mut log = self.log.inner.lock();
        if log.offline {
            return Err(MvrError::Hardware {
                component: self.id.clone(),
                details: "simulated link offline".to_string(),
            });
        }
        self.drive.lock().apply(command);
        log.commands.push(command);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motor packets
// ────────────────────────────────────────────────────────────────────────────

/// Body of a [`MOTOR_PACKET`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorSample {
    pub x: f64,
    pub y: f64,
    pub th: f64,
    pub vel: f64,
    pub rot_vel: f64,
    pub lat_vel: f64,
    pub battery_voltage: f64,
}

impl MotorSample {
    pub fn to_packet(&self) -> Result<RawPacket, MvrError> {
        let payload = serde_json::to_vec(self).map_err(|e| MvrError::Decode(e.to_string()))?;
        Ok(RawPacket::new(MOTOR_PACKET, payload))
    }

    pub fn from_packet(packet: &RawPacket) -> Result<Self, MvrError> {
        serde_json::from_slice(&packet.payload).map_err(|e| MvrError::Decode(e.to_string()))
    }
}

/// Folds [`MOTOR_PACKET`]s into the robot state.
#[derive(Debug, Default)]
pub struct SimMotorHandler;

impl PacketHandler for SimMotorHandler {
    fn name(&self) -> &str {
        "sim_motor"
    }

    fn handle(&mut self, packet: &RawPacket, state: &mut RobotState) -> bool {
        if packet.kind != MOTOR_PACKET {
            return false;
        }
        match MotorSample::from_packet(packet) {
            Ok(sample) => {
                state.pose = Pose {
                    x: sample.x,
                    y: sample.y,
                    th: sample.th,
                };
                state.vel = sample.vel;
                state.rot_vel = sample.rot_vel;
                state.lat_vel = sample.lat_vel;
                state.battery_voltage = Some(sample.battery_voltage);
                state.motor_packets += 1;
            }
            Err(e) => warn!(error = %e, "dropping malformed motor packet"),
        }
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Receiver thread
// ────────────────────────────────────────────────────────────────────────────

/// Background thread that steps a [`SimDrive`] and publishes motor packets.
///
/// The thread stops when [`SimPacketSource::stop`] is called, when the source
/// is dropped, or when the packet queue is closed.
pub struct SimPacketSource {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimPacketSource {
    pub fn spawn(drive: SharedSimDrive, sender: PacketSender, period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let thread = thread::spawn(move || {
            let mut last = Instant::now();
            while running_clone.load(Ordering::Relaxed) {
                thread::sleep(period);
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;

                let sample = {
                    let mut drive = drive.lock();
                    drive.step(dt);
                    drive.sample()
                };
                let packet = match sample.to_packet() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to encode motor packet");
                        continue;
                    }
                };
                match sender.try_send(packet) {
                    Ok(()) => {}
                    Err(MvrError::ChannelFull) => debug!("packet queue full, dropping motor packet"),
                    Err(_) => {
                        debug!("packet queue closed, sim receiver exiting");
                        break;
                    }
                }
            }
        });

        Self {
            running,
            thread: Some(thread),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("sim receiver thread panicked");
            }
        }
    }
}

impl Drop for SimPacketSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::packet_channel;

    #[test]
    fn drive_integrates_forward_motion() {
        let mut drive = SimDrive::default();
        drive.apply(MotionCommand::TransVel(100));
        drive.step(2.0);
        assert!((drive.pose.x - 200.0).abs() < 1e-9);
        assert!(drive.pose.y.abs() < 1e-9);
    }

    #[test]
    fn drive_tracks_heading_at_bounded_rate() {
        let mut drive = SimDrive::default();
        drive.apply(MotionCommand::Heading(45));
        drive.step(0.25);
        assert!((drive.pose.th - 22.5).abs() < 1e-9);
        drive.step(1.0);
        assert!((drive.pose.th - 45.0).abs() < 1e-9);
    }

    #[test]
    fn rot_vel_cancels_heading_tracking() {
        let mut drive = SimDrive::default();
        drive.apply(MotionCommand::Heading(90));
        drive.apply(MotionCommand::RotVel(10));
        assert!(drive.heading_target.is_none());
        drive.step(1.0);
        assert!((drive.pose.th - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sink_records_and_applies() {
        let drive = SimDrive::shared();
        let mut sink = SimCommandSink::new(drive.clone());
        let log = sink.log();
        sink.send(MotionCommand::LatVel(30)).unwrap();
        sink.send(MotionCommand::Pulse).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(drive.lock().lat_vel, 30.0);
        assert_eq!(drive.lock().pulses, 1);
        assert_eq!(log.take().len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn offline_sink_fails_without_recording() {
        let drive = SimDrive::shared();
        let mut sink = SimCommandSink::new(drive.clone());
        let log = sink.log();
        log.set_offline(true);
        assert!(matches!(
            sink.send(MotionCommand::TransVel(5)),
            Err(MvrError::Hardware { .. })
        ));
        assert!(log.is_empty());
        assert_eq!(drive.lock().vel, 0.0);
    }

    #[test]
    fn motor_handler_decodes_sample() {
        let sample = MotorSample {
            x: 1.0,
            y: 2.0,
            th: 30.0,
            vel: 150.0,
            rot_vel: 5.0,
            lat_vel: 0.0,
            battery_voltage: 12.1,
        };
        let packet = sample.to_packet().unwrap();
        let mut state = RobotState::default();
        assert!(SimMotorHandler.handle(&packet, &mut state));
        assert_eq!(state.pose.th, 30.0);
        assert_eq!(state.vel, 150.0);
        assert_eq!(state.battery_voltage, Some(12.1));
        assert_eq!(state.motor_packets, 1);
    }

    #[test]
    fn motor_handler_ignores_other_kinds_and_consumes_garbage() {
        let mut state = RobotState::default();
        assert!(!SimMotorHandler.handle(&RawPacket::new(0x10, vec![]), &mut state));
        assert!(SimMotorHandler.handle(&RawPacket::new(MOTOR_PACKET, b"not json".to_vec()), &mut state));
        assert_eq!(state.motor_packets, 0);
    }

    #[test]
    fn packet_source_publishes_until_stopped() {
        let drive = SimDrive::shared();
        let (tx, queue) = packet_channel(64);
        let source = SimPacketSource::spawn(drive, tx, Duration::from_millis(5));
        thread::sleep(Duration::from_millis(60));
        assert!(source.is_running());
        source.stop();
        let mut received = 0;
        while let Some(p) = queue.try_pop() {
            assert_eq!(p.kind, MOTOR_PACKET);
            received += 1;
        }
        assert!(received > 0);
    }
}
