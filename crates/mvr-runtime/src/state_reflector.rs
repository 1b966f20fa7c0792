//! [`StateReflector`] – decides which commands reach the hardware each tick.
//!
//! Per axis, independently:
//!
//! 1. an active direct request wins and the resolved output for that axis is
//!    ignored; it is clamped to the absolute limits only,
//! 2. otherwise the resolved request is used, clamped to the absolute limits
//!    narrowed by any requested `Max*` caps,
//! 3. nothing at all is sent for an axis nobody asked about.
//!
//! Every value is rounded to native units first. A motion command goes out
//! when it differs from the last transmitted one by more than the deadband,
//! changes kind (velocity ↔ heading), or when the refresh interval for that
//! axis has passed. Accel/decel limits go out only when they change. When
//! nothing was sent for a whole refresh interval, a keepalive pulse is sent.

use std::time::{Duration, Instant};

use mvr_hal::CommandSink;
use mvr_kernel::{ComponentHealth, DirectMotion, MotionLimits, RotRequest, Watchdog, to_native};
use mvr_types::{MotionAxis, MotionCommand, RobotState, normalize_degrees};
use tracing::{debug, warn};

use crate::desired_motion::{Channel, ChannelRequest, DesiredMotion};

const PULSE: &str = "pulse";

fn axis_index(axis: MotionAxis) -> usize {
    match axis {
        MotionAxis::Trans => 0,
        MotionAxis::Rot => 1,
        MotionAxis::Lat => 2,
    }
}

fn accel_channels(axis: MotionAxis) -> (Channel, Channel) {
    match axis {
        MotionAxis::Trans => (Channel::TransAccel, Channel::TransDecel),
        MotionAxis::Rot => (Channel::RotAccel, Channel::RotDecel),
        MotionAxis::Lat => (Channel::LatAccel, Channel::LatDecel),
    }
}

fn accel_command(axis: MotionAxis, value: i32) -> MotionCommand {
    match axis {
        MotionAxis::Trans => MotionCommand::TransAccel(value),
        MotionAxis::Rot => MotionCommand::RotAccel(value),
        MotionAxis::Lat => MotionCommand::LatAccel(value),
    }
}

fn decel_command(axis: MotionAxis, value: i32) -> MotionCommand {
    match axis {
        MotionAxis::Trans => MotionCommand::TransDecel(value),
        MotionAxis::Rot => MotionCommand::RotDecel(value),
        MotionAxis::Lat => MotionCommand::LatDecel(value),
    }
}

/// `true` when `next` is worth sending compared to `last`.
fn differs(last: Option<MotionCommand>, next: MotionCommand, deadband: u32) -> bool {
    let Some(last) = last else { return true };
    if last.kind() != next.kind() {
        return true;
    }
    let (Some(a), Some(b)) = (last.value(), next.value()) else {
        return true;
    };
    let diff = match next {
        MotionCommand::Heading(_) => normalize_degrees(f64::from(b) - f64::from(a)).abs(),
        _ => (i64::from(b) - i64::from(a)).abs() as f64,
    };
    diff > f64::from(deadband)
}

pub struct StateReflector {
    sink: Box<dyn CommandSink>,
    limits: MotionLimits,
    refresh: Duration,
    deadband: u32,
    watchdog: Watchdog,
    last_motion: [Option<MotionCommand>; 3],
    last_accel: [Option<i32>; 3],
    last_decel: [Option<i32>; 3],
}

impl StateReflector {
    /// `deadband` is in native units; 0 resends on any rounded change.
    pub fn new(
        sink: Box<dyn CommandSink>,
        limits: MotionLimits,
        refresh: Duration,
        deadband: u32,
        now: Instant,
    ) -> Self {
        let mut watchdog = Watchdog::new();
        watchdog.register(PULSE, refresh, now);
        Self {
            sink,
            limits,
            refresh,
            deadband,
            watchdog,
            last_motion: [None; 3],
            last_accel: [None; 3],
            last_decel: [None; 3],
        }
    }

    pub fn sink_id(&self) -> &str {
        self.sink.id()
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: MotionLimits) {
        self.limits = limits;
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    pub fn set_refresh(&mut self, refresh: Duration) {
        self.refresh = refresh;
        for id in [PULSE, "trans", "rot", "lat"] {
            self.watchdog.set_timeout(id, refresh);
        }
    }

    /// Last motion command transmitted on `axis`.
    pub fn last_sent(&self, axis: MotionAxis) -> Option<MotionCommand> {
        self.last_motion[axis_index(axis)]
    }

    /// Forget what was transmitted so everything is resent on the next tick.
    pub fn reset(&mut self) {
        self.last_motion = [None; 3];
        self.last_accel = [None; 3];
        self.last_decel = [None; 3];
    }

    /// Reflect one tick and return the commands actually transmitted.
    pub fn reflect(
        &mut self,
        resolved: &DesiredMotion,
        direct: &DirectMotion,
        robot: &RobotState,
        now: Instant,
    ) -> Vec<MotionCommand> {
        let mut sent = Vec::new();

        for axis in MotionAxis::ALL {
            let overridden = direct.overrides(axis, now);
            let (accel_ch, decel_ch) = accel_channels(axis);
            let limits = *self.limits.axis(axis);

            let accel = direct
                .accel(axis, now)
                .or_else(|| (!overridden).then(|| resolved.get(accel_ch)).flatten())
                .map(|a| to_native(limits.clamp_accel(a)));
            let decel = direct
                .decel(axis, now)
                .or_else(|| (!overridden).then(|| resolved.get(decel_ch)).flatten())
                .map(|d| to_native(limits.clamp_decel(d)));

            let idx = axis_index(axis);
            if let Some(a) = accel.filter(|&a| self.last_accel[idx] != Some(a)) {
                if self.transmit(accel_command(axis, a), now, &mut sent) {
                    self.last_accel[idx] = Some(a);
                }
            }
            if let Some(d) = decel.filter(|&d| self.last_decel[idx] != Some(d)) {
                if self.transmit(decel_command(axis, d), now, &mut sent) {
                    self.last_decel[idx] = Some(d);
                }
            }

            let motion = if overridden {
                self.direct_command(axis, direct, now)
            } else {
                self.resolved_command(axis, resolved, robot)
            };
            if let Some(command) = motion {
                self.reflect_motion(axis, command, now, &mut sent);
            }
        }

        if sent.is_empty() && self.watchdog.health(PULSE, now) == ComponentHealth::TimedOut {
            debug!("nothing sent for a refresh interval, sending keepalive");
            self.transmit(MotionCommand::Pulse, now, &mut sent);
        }
        sent
    }

    fn direct_command(
        &self,
        axis: MotionAxis,
        direct: &DirectMotion,
        now: Instant,
    ) -> Option<MotionCommand> {
        let limits = self.limits.axis(axis);
        match axis {
            MotionAxis::Trans => direct
                .trans_vel(now)
                .map(|v| MotionCommand::TransVel(to_native(limits.clamp_vel(v)))),
            MotionAxis::Rot => direct.rot(now).map(|rot| match rot {
                RotRequest::Vel(v) => MotionCommand::RotVel(to_native(limits.clamp_vel(v))),
                RotRequest::Heading(h) => MotionCommand::Heading(to_native(normalize_degrees(h))),
            }),
            MotionAxis::Lat => direct
                .lat_vel(now)
                .map(|v| MotionCommand::LatVel(to_native(limits.clamp_vel(v)))),
        }
    }

    fn resolved_command(
        &self,
        axis: MotionAxis,
        resolved: &DesiredMotion,
        robot: &RobotState,
    ) -> Option<MotionCommand> {
        let limits = self.limits.axis(axis);
        let capped = |vel: f64, max: Channel, max_neg: Channel| {
            to_native(limits.clamp_vel_capped(vel, resolved.get(max), resolved.get(max_neg)))
        };
        match axis {
            MotionAxis::Trans => resolved
                .get(Channel::Vel)
                .map(|v| MotionCommand::TransVel(capped(v, Channel::MaxVel, Channel::MaxNegVel))),
            MotionAxis::Lat => resolved.get(Channel::LatVel).map(|v| {
                MotionCommand::LatVel(capped(v, Channel::MaxLatVel, Channel::MaxNegLatVel))
            }),
            MotionAxis::Rot => {
                let requested = |ch: Channel| {
                    let req = resolved.request(ch);
                    req.is_requested().then_some(req)
                };
                let heading = requested(Channel::Heading).or_else(|| {
                    requested(Channel::DeltaHeading).map(|d| ChannelRequest {
                        value: normalize_degrees(robot.pose.th + d.value),
                        strength: d.strength,
                    })
                });
                match (heading, requested(Channel::RotVel)) {
                    (Some(h), Some(v)) if h.strength < v.strength => Some(MotionCommand::RotVel(
                        capped(v.value, Channel::MaxRotVel, Channel::MaxNegRotVel),
                    )),
                    (Some(h), _) => Some(MotionCommand::Heading(to_native(h.value))),
                    (None, Some(v)) => Some(MotionCommand::RotVel(capped(
                        v.value,
                        Channel::MaxRotVel,
                        Channel::MaxNegRotVel,
                    ))),
                    (None, None) => None,
                }
            }
        }
    }

    fn reflect_motion(
        &mut self,
        axis: MotionAxis,
        command: MotionCommand,
        now: Instant,
        sent: &mut Vec<MotionCommand>,
    ) {
        let idx = axis_index(axis);
        let label = axis.label();
        let changed = differs(self.last_motion[idx], command, self.deadband);
        let stale = self.watchdog.health(label, now) == ComponentHealth::TimedOut;
        if !changed && !stale {
            return;
        }
        if self.transmit(command, now, sent) {
            self.last_motion[idx] = Some(command);
            if self.watchdog.is_registered(label) {
                self.watchdog.heartbeat(label, now);
            } else {
                self.watchdog.register(label, self.refresh, now);
            }
        }
    }

    fn transmit(&mut self, command: MotionCommand, now: Instant, sent: &mut Vec<MotionCommand>) -> bool {
        match self.sink.send(command) {
            Ok(()) => {
                self.watchdog.heartbeat(PULSE, now);
                sent.push(command);
                true
            }
            Err(e) => {
                warn!(sink = self.sink.id(), ?command, error = %e, "command not delivered");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mvr_hal::{SimCommandLog, SimCommandSink, SimDrive};

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn reflector(t0: Instant, deadband: u32) -> (StateReflector, SimCommandLog) {
        let sink = SimCommandSink::new(SimDrive::shared());
        let log = sink.log();
        let r = StateReflector::new(Box::new(sink), MotionLimits::default(), ms(500), deadband, t0);
        (r, log)
    }

    fn vel(v: f64) -> DesiredMotion {
        let mut d = DesiredMotion::new();
        d.set_vel(v, 1.0);
        d
    }

    #[test]
    fn resolved_velocity_is_rounded_and_sent() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let sent = r.reflect(&vel(299.6), &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::TransVel(300)]);
        assert_eq!(r.last_sent(MotionAxis::Trans), Some(MotionCommand::TransVel(300)));
    }

    #[test]
    fn velocity_is_clamped_to_absolute_limits() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let sent = r.reflect(&vel(9000.0), &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::TransVel(1500)]);
        let sent = r.reflect(&vel(-9000.0), &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::TransVel(-1500)]);
    }

    #[test]
    fn caps_narrow_resolved_velocity() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut d = vel(900.0);
        d.set_max_vel(400.0, 1.0);
        let sent = r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::TransVel(400)]);
    }

    #[test]
    fn direct_request_overrides_axis_and_ignores_caps() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut direct = DirectMotion::default();
        direct.set_trans_vel(800.0, t0);
        let mut d = vel(100.0);
        d.set_max_vel(400.0, 1.0);
        d.set_trans_accel(50.0, 1.0);
        let sent = r.reflect(&d, &direct, &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::TransVel(800)]);
    }

    #[test]
    fn unchanged_command_waits_for_refresh() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        assert_eq!(r.reflect(&vel(300.0), &direct, &robot, t0).len(), 1);
        assert!(r.reflect(&vel(300.4), &direct, &robot, t0 + ms(100)).is_empty());
        assert!(r.reflect(&vel(300.0), &direct, &robot, t0 + ms(500)).is_empty());
        assert_eq!(
            r.reflect(&vel(300.0), &direct, &robot, t0 + ms(501)),
            vec![MotionCommand::TransVel(300)]
        );
    }

    #[test]
    fn deadband_suppresses_small_changes() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 5);
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        r.reflect(&vel(300.0), &direct, &robot, t0);
        assert!(r.reflect(&vel(305.0), &direct, &robot, t0).is_empty());
        assert_eq!(r.reflect(&vel(306.0), &direct, &robot, t0).len(), 1);
    }

    #[test]
    fn keepalive_pulse_after_silence() {
        let t0 = Instant::now();
        let (mut r, log) = reflector(t0, 0);
        let empty = DesiredMotion::new();
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        assert!(r.reflect(&empty, &direct, &robot, t0 + ms(400)).is_empty());
        assert_eq!(r.reflect(&empty, &direct, &robot, t0 + ms(501)), vec![MotionCommand::Pulse]);
        assert!(r.reflect(&empty, &direct, &robot, t0 + ms(600)).is_empty());
        assert_eq!(log.commands(), vec![MotionCommand::Pulse]);
    }

    #[test]
    fn heading_wins_over_weaker_rot_vel() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut d = DesiredMotion::new();
        d.set_heading(90.0, 0.8);
        d.set_rot_vel(20.0, 0.5);
        let sent = r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::Heading(90)]);

        d.set_rot_vel(20.0, 0.9);
        let sent = r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::RotVel(20)]);
    }

    #[test]
    fn delta_heading_is_taken_from_the_pose() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut robot = RobotState::default();
        robot.pose.th = 170.0;
        let mut d = DesiredMotion::new();
        d.set_delta_heading(30.0, 1.0);
        let sent = r.reflect(&d, &DirectMotion::default(), &robot, t0);
        assert_eq!(sent, vec![MotionCommand::Heading(-160)]);
    }

    #[test]
    fn heading_change_across_wrap_respects_deadband() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 2);
        let mut d = DesiredMotion::new();
        d.set_heading(179.0, 1.0);
        r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0);
        d.set_heading(-179.0, 1.0);
        assert!(r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0).is_empty());
    }

    #[test]
    fn accel_limits_are_sent_only_on_change() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut d = DesiredMotion::new();
        d.set_trans_accel(5000.0, 1.0);
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        assert_eq!(r.reflect(&d, &direct, &robot, t0), vec![MotionCommand::TransAccel(2000)]);
        assert!(r.reflect(&d, &direct, &robot, t0 + ms(100)).is_empty());
    }

    #[test]
    fn failed_send_is_retried_next_tick() {
        let t0 = Instant::now();
        let (mut r, log) = reflector(t0, 0);
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        log.set_offline(true);
        assert!(r.reflect(&vel(200.0), &direct, &robot, t0).is_empty());
        assert_eq!(r.last_sent(MotionAxis::Trans), None);
        log.set_offline(false);
        assert_eq!(r.reflect(&vel(200.0), &direct, &robot, t0 + ms(100)), vec![MotionCommand::TransVel(200)]);
    }

    #[test]
    fn reset_forces_resend() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let direct = DirectMotion::default();
        let robot = RobotState::default();
        r.reflect(&vel(200.0), &direct, &robot, t0);
        r.reset();
        assert_eq!(r.reflect(&vel(200.0), &direct, &robot, t0).len(), 1);
    }

    #[test]
    fn lateral_axis_is_zero_by_default() {
        let t0 = Instant::now();
        let (mut r, _log) = reflector(t0, 0);
        let mut d = DesiredMotion::new();
        d.set_lat_vel(200.0, 1.0);
        let sent = r.reflect(&d, &DirectMotion::default(), &RobotState::default(), t0);
        assert_eq!(sent, vec![MotionCommand::LatVel(0)]);
    }
}
