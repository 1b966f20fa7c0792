//! [`RobotCore`] – the state guarded by the robot lock.
//!
//! Everything the cycle reads or writes between Robot Lock and Robot Unlock
//! lives here: the latest [`RobotState`], the registered behaviors and the
//! resolver, pending direct motion requests, and the connection flag.
//! Other threads reach it through [`SharedRobot`] and must hold the lock for
//! every multi-field update. The lock is re-entrant, so a task running inside
//! the tick may lock it again from the cycle thread.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use mvr_kernel::{DirectMotion, StoppedThresholds};
use mvr_types::{Clock, MotionAxis, RobotState, normalize_degrees};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::behavior::{Behavior, BehaviorSet};
use crate::desired_motion::DesiredMotion;
use crate::resolver::{PriorityResolver, Resolver};

/// The robot lock.
///
/// Re-entrant per thread. A guard derefs to the `RefCell`, so callers borrow
/// the core for as long as they need it:
///
/// ```ignore
/// robot.lock().borrow_mut().stop();
/// ```
#[derive(Clone)]
pub struct SharedRobot(Arc<ReentrantMutex<RefCell<RobotCore>>>);

pub type RobotGuard<'a> = ReentrantMutexGuard<'a, RefCell<RobotCore>>;

impl SharedRobot {
    pub fn lock(&self) -> RobotGuard<'_> {
        self.0.lock()
    }

    pub fn try_lock(&self) -> Option<RobotGuard<'_>> {
        self.0.try_lock()
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Option<RobotGuard<'_>> {
        self.0.try_lock_for(timeout)
    }

    /// Lock and run `f` on the core.
    ///
    /// Panics if the core is already borrowed further up this thread's stack,
    /// for instance from inside a behavior's `fire`.
    pub fn with<R>(&self, f: impl FnOnce(&mut RobotCore) -> R) -> R {
        let guard = self.0.lock();
        let mut core = guard.borrow_mut();
        f(&mut core)
    }

    /// Take the lock without a guard. Must be paired with
    /// [`release`](Self::release) on the same thread.
    pub(crate) fn hold(&self) {
        std::mem::forget(self.0.lock());
    }

    /// # Safety
    ///
    /// The calling thread must own a lock taken by [`hold`](Self::hold) that
    /// has not been released yet.
    pub(crate) unsafe fn release(&self) {
        // SAFETY: forwarded to the caller.
        unsafe { self.0.force_unlock() }
    }
}

pub struct RobotCore {
    state: RobotState,
    behaviors: BehaviorSet,
    resolver: Box<dyn Resolver>,
    direct: DirectMotion,
    stopped: StoppedThresholds,
    clock: Arc<dyn Clock>,
    last_resolved: DesiredMotion,
    connected: bool,
}

impl RobotCore {
    pub fn new(clock: Arc<dyn Clock>, direct: DirectMotion, stopped: StoppedThresholds) -> Self {
        Self {
            state: RobotState::default(),
            behaviors: BehaviorSet::new(),
            resolver: Box::new(PriorityResolver::new()),
            direct,
            stopped,
            clock,
            last_resolved: DesiredMotion::new(),
            connected: true,
        }
    }

    pub fn shared(self) -> SharedRobot {
        SharedRobot(Arc::new(ReentrantMutex::new(RefCell::new(self))))
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RobotState {
        &mut self.state
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ── Direct motion ──────────────────────────────────────────────────────

    pub fn direct(&self) -> &DirectMotion {
        &self.direct
    }

    pub fn set_vel(&mut self, vel: f64) {
        let now = self.clock.now();
        self.direct.set_trans_vel(vel, now);
    }

    pub fn set_rot_vel(&mut self, rot_vel: f64) {
        let now = self.clock.now();
        self.direct.set_rot_vel(rot_vel, now);
    }

    pub fn set_heading(&mut self, heading: f64) {
        let now = self.clock.now();
        self.direct.set_heading(normalize_degrees(heading), now);
    }

    /// Turn by `delta` degrees from the current pose.
    pub fn set_delta_heading(&mut self, delta: f64) {
        let heading = self.state.pose.th + delta;
        self.set_heading(heading);
    }

    pub fn set_lat_vel(&mut self, lat_vel: f64) {
        let now = self.clock.now();
        self.direct.set_lat_vel(lat_vel, now);
    }

    pub fn set_trans_accel(&mut self, accel: f64) {
        self.set_accel(MotionAxis::Trans, accel);
    }

    pub fn set_trans_decel(&mut self, decel: f64) {
        self.set_decel(MotionAxis::Trans, decel);
    }

    pub fn set_rot_accel(&mut self, accel: f64) {
        self.set_accel(MotionAxis::Rot, accel);
    }

    pub fn set_rot_decel(&mut self, decel: f64) {
        self.set_decel(MotionAxis::Rot, decel);
    }

    pub fn set_lat_accel(&mut self, accel: f64) {
        self.set_accel(MotionAxis::Lat, accel);
    }

    pub fn set_lat_decel(&mut self, decel: f64) {
        self.set_decel(MotionAxis::Lat, decel);
    }

    fn set_accel(&mut self, axis: MotionAxis, accel: f64) {
        let now = self.clock.now();
        self.direct.set_accel(axis, accel, now);
    }

    fn set_decel(&mut self, axis: MotionAxis, decel: f64) {
        let now = self.clock.now();
        self.direct.set_decel(axis, decel, now);
    }

    /// Direct zero velocity on every axis.
    pub fn stop(&mut self) {
        let now = self.clock.now();
        self.direct.stop(now);
    }

    /// Hand every axis back to the behaviors.
    pub fn clear_direct_motion(&mut self) {
        self.direct.clear();
    }

    /// Drop direct requests whose precedence window has passed.
    pub fn expire_direct_motion(&mut self) {
        let now = self.clock.now();
        self.direct.expire(now);
    }

    pub fn set_direct_motion_precedence(&mut self, precedence: Duration) {
        self.direct.set_precedence(precedence);
    }

    // ── Behaviors ──────────────────────────────────────────────────────────

    pub fn behaviors(&self) -> &BehaviorSet {
        &self.behaviors
    }

    pub fn add_behavior(&mut self, behavior: Box<dyn Behavior>, priority: i32) -> bool {
        self.behaviors.add(behavior, priority)
    }

    pub fn remove_behavior(&mut self, name: &str) -> Option<Box<dyn Behavior>> {
        self.behaviors.remove(name)
    }

    pub fn activate_behavior(&mut self, name: &str) -> bool {
        self.behaviors.activate(name)
    }

    pub fn deactivate_behavior(&mut self, name: &str) -> bool {
        self.behaviors.deactivate(name)
    }

    /// Replace the resolver, returning the previous one.
    pub fn set_resolver(&mut self, resolver: Box<dyn Resolver>) -> Box<dyn Resolver> {
        std::mem::replace(&mut self.resolver, resolver)
    }

    pub fn resolver_name(&self) -> &str {
        self.resolver.name()
    }

    /// Run the resolver over the registered behaviors and keep the result
    /// until the next call.
    pub fn resolve(&mut self) -> DesiredMotion {
        self.last_resolved = self.resolver.resolve(&mut self.behaviors, &self.state);
        self.last_resolved
    }

    /// Result of the most recent [`resolve`](Self::resolve).
    pub fn last_resolved(&self) -> &DesiredMotion {
        &self.last_resolved
    }

    // ── Status ─────────────────────────────────────────────────────────────

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_stopped(&self.state)
    }

    pub fn set_stopped_thresholds(&mut self, stopped: StoppedThresholds) {
        self.stopped = stopped;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}
