//! [`ControlCycle`] – the fixed-rate perception → decide → act loop.
//!
//! One tick runs a [`TaskTree`] whose top level is a fixed sequence of
//! phases (position in parentheses, highest first):
//!
//! | Phase                        | Position | Work                                             |
//! |------------------------------|----------|--------------------------------------------------|
//! | Packet Handler               | 85       | drain the packet queue into the robot state      |
//! | Robot Lock                   | 70       | take the robot lock for the rest of the tick     |
//! | Sensor Interpretation branch | 65       | application sensor tasks                         |
//! | Action Handler               | 55       | expire direct motion, resolve behaviors          |
//! | State Reflection             | 45       | turn the decision into hardware commands         |
//! | User Tasks branch            | 25       | application tasks                                |
//! | Robot Unlock                 | 20       | release the robot lock                           |
//!
//! The tick runs on one thread: either the caller's ([`ControlCycle::run`],
//! [`ControlCycle::run_once`]) or a dedicated one ([`ControlCycle::spawn`]).
//! The only other thread involved is the packet receiver, which talks to the
//! cycle exclusively through the bounded packet queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mvr_hal::{CommandSink, PacketDispatcher, PacketHandler, PacketQueue};
use mvr_kernel::{ComponentHealth, DirectMotion, MotionLimits, StoppedThresholds, Watchdog};
use mvr_types::{Clock, MotionCommand, MvrError, SystemClock};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::behavior::Behavior;
use crate::desired_motion::DesiredMotion;
use crate::resolver::{PriorityResolver, Resolver};
use crate::robot::{RobotCore, SharedRobot};
use crate::state_reflector::StateReflector;
use crate::task_tree::{RunningProbe, TaskId, TaskScope, TaskTree};

pub const PACKET_HANDLER: (&str, i32) = ("Packet Handler", 85);
pub const ROBOT_LOCK: (&str, i32) = ("Robot Lock", 70);
pub const SENSOR_INTERPRETATION: (&str, i32) = ("Sensor Interpretation", 65);
pub const ACTION_HANDLER: (&str, i32) = ("Action Handler", 55);
pub const STATE_REFLECTION: (&str, i32) = ("State Reflection", 45);
pub const USER_TASKS: (&str, i32) = ("User Tasks", 25);
pub const ROBOT_UNLOCK: (&str, i32) = ("Robot Unlock", 20);

const CONNECTION: &str = "connection";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing and limits consumed by the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Tick period.
    pub cycle_time_ms: u64,
    /// Log a warning when a tick takes longer than this. 0 disables.
    pub cycle_warning_time_ms: u64,
    /// How long a direct motion command beats behavior output. 0 means
    /// until cleared.
    pub direct_motion_precedence_ms: u64,
    /// Resend an unchanged command (or a keepalive pulse) after this long.
    pub state_reflection_refresh_ms: u64,
    /// Change, in native units, below which a command is not resent early.
    pub command_deadband: u32,
    /// Mark the robot disconnected when no packet arrives for this long.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_timeout_ms: Option<u64>,
    /// Capacity callers should use for [`mvr_hal::packet_channel`].
    pub packet_queue_capacity: usize,
    /// Log every behavior's request each tick.
    pub log_resolver: bool,
    pub limits: MotionLimits,
    pub stopped: StoppedThresholds,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_time_ms: 100,
            cycle_warning_time_ms: 250,
            direct_motion_precedence_ms: 0,
            state_reflection_refresh_ms: 500,
            command_deadband: 0,
            connection_timeout_ms: None,
            packet_queue_capacity: 256,
            log_resolver: false,
            limits: MotionLimits::default(),
            stopped: StoppedThresholds::default(),
        }
    }
}

impl CycleConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    pub fn cycle_warning_time(&self) -> Duration {
        Duration::from_millis(self.cycle_warning_time_ms)
    }

    pub fn direct_motion_precedence(&self) -> Duration {
        Duration::from_millis(self.direct_motion_precedence_ms)
    }

    pub fn state_reflection_refresh(&self) -> Duration {
        Duration::from_millis(self.state_reflection_refresh_ms)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms.map(Duration::from_millis)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-tick context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a phase or an application task can reach during a tick.
pub struct CycleContext {
    robot: SharedRobot,
    /// Robot Lock ran and Robot Unlock has not.
    holding: bool,
    packets: PacketQueue,
    dispatcher: PacketDispatcher,
    reflector: StateReflector,
    connection: Option<Watchdog>,
    clock: Arc<dyn Clock>,
    tick: u64,
    resolved: DesiredMotion,
    last_sent: Vec<MotionCommand>,
}

impl CycleContext {
    /// Number of the tick in progress, starting at 1.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Run `f` on the robot core. Re-enters the tick's robot lock when held.
    pub fn with_robot<R>(&mut self, f: impl FnOnce(&mut RobotCore) -> R) -> R {
        self.robot.with(f)
    }

    /// The robot lock itself, for code that wants to hold a guard.
    pub fn robot(&self) -> &SharedRobot {
        &self.robot
    }

    /// This tick's resolved request (valid from the Action Handler on).
    pub fn resolved(&self) -> &DesiredMotion {
        &self.resolved
    }

    /// Commands transmitted by this tick's State Reflection.
    pub fn last_sent(&self) -> &[MotionCommand] {
        &self.last_sent
    }

    fn handle_packets(&mut self) {
        let now = self.clock.now();
        // Packets arriving while this drain runs wait for the next tick.
        let queued = self.packets.len();
        let mut handled = 0usize;
        {
            let guard = self.robot.lock();
            let mut core = guard.borrow_mut();
            while handled < queued {
                let Some(packet) = self.packets.try_pop() else { break };
                self.dispatcher.dispatch(&packet, core.state_mut());
                handled += 1;
            }
        }
        if handled > 0 {
            debug!(handled, "packets handled");
        }

        let Some(watchdog) = self.connection.as_mut() else { return };
        if handled > 0 {
            watchdog.heartbeat(CONNECTION, now);
        }
        let healthy = watchdog.health(CONNECTION, now) == ComponentHealth::Healthy;
        let reconnected = self.robot.with(|core| {
            if core.is_connected() && !healthy {
                warn!("no packets within the connection timeout, robot marked disconnected");
                core.set_connected(false);
            } else if !core.is_connected() && healthy {
                info!("packets flowing again, robot reconnected");
                core.set_connected(true);
                return true;
            }
            false
        });
        if reconnected {
            self.reflector.reset();
        }
    }

    fn lock_robot(&mut self) {
        if !self.holding {
            self.robot.hold();
            self.holding = true;
        }
    }

    fn unlock_robot(&mut self) {
        if self.holding {
            // SAFETY: `holding` is only set by `lock_robot` during a tick, and
            // `TickScope` clears it before `run_once` returns, so the hold was
            // taken on this thread.
            unsafe { self.robot.release() };
            self.holding = false;
        }
    }

    fn handle_actions(&mut self) {
        self.resolved = self.with_robot(|core| {
            core.expire_direct_motion();
            core.resolve()
        });
    }

    fn reflect_state(&mut self) {
        let now = self.clock.now();
        let Self {
            robot,
            reflector,
            resolved,
            last_sent,
            ..
        } = self;
        let guard = robot.lock();
        let core = guard.borrow();
        *last_sent = if core.is_connected() {
            reflector.reflect(resolved, core.direct(), core.state(), now)
        } else {
            debug!("robot disconnected, skipping state reflection");
            Vec::new()
        };
    }
}

/// Releases the robot lock when a tick ends, including by panic, so Robot
/// Unlock being suspended or removed cannot leave it held.
struct TickScope<'a>(&'a mut CycleContext);

impl Drop for TickScope<'_> {
    fn drop(&mut self) {
        self.0.unlock_robot();
    }
}

fn packet_phase(ctx: &mut CycleContext, _: &TaskScope<'_>) {
    ctx.handle_packets();
}

fn lock_phase(ctx: &mut CycleContext, _: &TaskScope<'_>) {
    ctx.lock_robot();
}

fn action_phase(ctx: &mut CycleContext, _: &TaskScope<'_>) {
    ctx.handle_actions();
}

fn reflection_phase(ctx: &mut CycleContext, _: &TaskScope<'_>) {
    ctx.reflect_state();
}

fn unlock_phase(ctx: &mut CycleContext, _: &TaskScope<'_>) {
    ctx.unlock_robot();
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStats {
    pub ticks: u64,
    /// Ticks that took longer than the cycle time.
    pub overruns: u64,
    pub last_tick: Duration,
    pub max_tick: Duration,
}

impl CycleStats {
    fn record(&mut self, elapsed: Duration, budget: Duration) {
        self.ticks += 1;
        self.last_tick = elapsed;
        self.max_tick = self.max_tick.max(elapsed);
        if !budget.is_zero() && elapsed > budget {
            self.overruns += 1;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle
// ─────────────────────────────────────────────────────────────────────────────

pub struct ControlCycle {
    config: CycleConfig,
    tasks: TaskTree<CycleContext>,
    ctx: CycleContext,
    sensor_branch: TaskId,
    user_branch: TaskId,
    stop: Arc<AtomicBool>,
    stats: CycleStats,
}

impl ControlCycle {
    /// Build a cycle on the system clock. `packets` is the consumer half of
    /// the receiver's packet channel.
    pub fn new(config: CycleConfig, sink: Box<dyn CommandSink>, packets: PacketQueue) -> Self {
        Self::with_clock(config, sink, packets, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CycleConfig,
        sink: Box<dyn CommandSink>,
        packets: PacketQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let mut core = RobotCore::new(
            Arc::clone(&clock),
            DirectMotion::new(config.direct_motion_precedence()),
            config.stopped,
        );
        core.set_resolver(Box::new(PriorityResolver::new().with_logging(config.log_resolver)));

        let connection = config.connection_timeout().map(|timeout| {
            let mut watchdog = Watchdog::new();
            watchdog.register(CONNECTION, timeout, now);
            watchdog
        });
        let reflector = StateReflector::new(
            sink,
            config.limits,
            config.state_reflection_refresh(),
            config.command_deadband,
            now,
        );
        let ctx = CycleContext {
            robot: core.shared(),
            holding: false,
            packets,
            dispatcher: PacketDispatcher::new(),
            reflector,
            connection,
            clock,
            tick: 0,
            resolved: DesiredMotion::new(),
            last_sent: Vec::new(),
        };

        let (tasks, sensor_branch, user_branch) = Self::build_phases(config.cycle_warning_time());
        Self {
            config,
            tasks,
            ctx,
            sensor_branch,
            user_branch,
            stop: Arc::new(AtomicBool::new(false)),
            stats: CycleStats::default(),
        }
    }

    fn build_phases(warning_time: Duration) -> (TaskTree<CycleContext>, TaskId, TaskId) {
        let mut tasks = TaskTree::new("Control Cycle");
        tasks.set_warning_time(warning_time);
        let root = tasks.root();

        tasks.add_leaf(root, PACKET_HANDLER.0, PACKET_HANDLER.1, packet_phase);
        tasks.add_leaf(root, ROBOT_LOCK.0, ROBOT_LOCK.1, lock_phase);
        tasks.add_leaf(root, ACTION_HANDLER.0, ACTION_HANDLER.1, action_phase);
        tasks.add_leaf(root, STATE_REFLECTION.0, STATE_REFLECTION.1, reflection_phase);
        tasks.add_leaf(root, ROBOT_UNLOCK.0, ROBOT_UNLOCK.1, unlock_phase);
        // The root and its fixed children always exist, so these cannot collide.
        let sensor = tasks
            .add_branch(root, SENSOR_INTERPRETATION.0, SENSOR_INTERPRETATION.1)
            .unwrap_or(root);
        let user = tasks.add_branch(root, USER_TASKS.0, USER_TASKS.1).unwrap_or(root);
        (tasks, sensor, user)
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// The robot lock. Tasks on the cycle thread may lock it again while
    /// the tick holds it.
    pub fn robot(&self) -> SharedRobot {
        self.ctx.robot.clone()
    }

    // ── Behaviors and direct motion ────────────────────────────────────────

    pub fn add_behavior(&self, behavior: Box<dyn Behavior>, priority: i32) -> bool {
        self.ctx.robot.with(|core| core.add_behavior(behavior, priority))
    }

    pub fn remove_behavior(&self, name: &str) -> Option<Box<dyn Behavior>> {
        self.ctx.robot.with(|core| core.remove_behavior(name))
    }

    pub fn set_resolver(&self, resolver: Box<dyn Resolver>) -> Box<dyn Resolver> {
        self.ctx.robot.with(|core| core.set_resolver(resolver))
    }

    pub fn set_direct_vel(&self, vel: f64) {
        self.ctx.robot.with(|core| core.set_vel(vel));
    }

    pub fn set_direct_rot_vel(&self, rot_vel: f64) {
        self.ctx.robot.with(|core| core.set_rot_vel(rot_vel));
    }

    pub fn set_direct_heading(&self, heading: f64) {
        self.ctx.robot.with(|core| core.set_heading(heading));
    }

    // ── Tasks and packet handlers ──────────────────────────────────────────

    /// Add a task under "Sensor Interpretation".
    pub fn add_sensor_task<F>(&mut self, name: &str, position: i32, f: F) -> Option<TaskId>
    where
        F: FnMut(&mut CycleContext, &TaskScope<'_>) + Send + 'static,
    {
        self.tasks.add_leaf(self.sensor_branch, name, position, f)
    }

    /// Add a task under "User Tasks".
    pub fn add_user_task<F>(&mut self, name: &str, position: i32, f: F) -> Option<TaskId>
    where
        F: FnMut(&mut CycleContext, &TaskScope<'_>) + Send + 'static,
    {
        self.tasks.add_leaf(self.user_branch, name, position, f)
    }

    pub fn remove_task(&mut self, id: TaskId) -> bool {
        self.tasks.remove(id)
    }

    pub fn tasks(&self) -> &TaskTree<CycleContext> {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskTree<CycleContext> {
        &mut self.tasks
    }

    pub fn running_probe(&self) -> RunningProbe {
        self.tasks.running_probe()
    }

    pub fn add_packet_handler(&mut self, handler: Box<dyn PacketHandler>) -> bool {
        self.ctx.dispatcher.add(handler)
    }

    /// Skip the overrun warning for the next tick.
    pub fn suppress_cycle_warning(&mut self) {
        self.tasks.suppress_warning_this_cycle();
    }

    // ── Running ────────────────────────────────────────────────────────────

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Commands transmitted by the most recent tick.
    pub fn last_sent(&self) -> &[MotionCommand] {
        &self.ctx.last_sent
    }

    /// Run exactly one tick on the calling thread.
    pub fn run_once(&mut self) -> Duration {
        self.ctx.tick += 1;
        let elapsed = {
            let mut tick = TickScope(&mut self.ctx);
            self.tasks.run(&mut *tick.0)
        };
        self.stats.record(elapsed, self.config.cycle_time());
        elapsed
    }

    /// Flag checked once per tick boundary by [`run`](Self::run) and by the
    /// thread behind [`spawn`](Self::spawn).
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Tick at the configured rate on the calling thread until the stop flag
    /// is raised.
    pub fn run(&mut self) {
        info!(cycle_ms = self.config.cycle_time_ms, "control cycle running");
        while !self.stop.load(Ordering::Acquire) {
            let started = Instant::now();
            self.run_once();
            if let Some(rest) = self.config.cycle_time().checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        info!(ticks = self.stats.ticks, overruns = self.stats.overruns, "control cycle stopped");
    }

    /// Tick on a dedicated thread.
    pub fn spawn(self) -> CycleHandle {
        let stop = Arc::clone(&self.stop);
        let cycle_time = self.config.cycle_time();
        let cycle = Arc::new(Mutex::new(self));
        let signal = Arc::new((Mutex::new(CycleSignal::default()), Condvar::new()));

        let thread = {
            let cycle = Arc::clone(&cycle);
            let stop = Arc::clone(&stop);
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let _stopped = StoppedOnExit(Arc::clone(&signal));
                while !stop.load(Ordering::Acquire) {
                    let started = Instant::now();
                    let stats = {
                        let mut cycle = cycle.lock();
                        cycle.run_once();
                        cycle.stats
                    };
                    let (lock, cv) = &*signal;
                    lock.lock().stats = stats;
                    cv.notify_all();
                    if let Some(rest) = cycle_time.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
            })
        };

        CycleHandle {
            cycle,
            stop,
            signal,
            thread: Some(thread),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background thread handle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CycleSignal {
    stats: CycleStats,
    stopped: bool,
}

type Signal = Arc<(Mutex<CycleSignal>, Condvar)>;

/// Marks the cycle stopped when the thread exits, including by panic.
struct StoppedOnExit(Signal);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        let (lock, cv) = &*self.0;
        lock.lock().stopped = true;
        cv.notify_all();
    }
}

/// Handle to a cycle running on its own thread.
pub struct CycleHandle {
    cycle: Arc<Mutex<ControlCycle>>,
    stop: Arc<AtomicBool>,
    signal: Signal,
    thread: Option<JoinHandle<()>>,
}

impl CycleHandle {
    /// Ask the thread to stop after the current tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        !self.signal.0.lock().stopped
    }

    pub fn stats(&self) -> CycleStats {
        self.signal.0.lock().stats
    }

    /// Run `f` under the cycle lock, between two ticks.
    pub fn with_cycle<R>(&self, f: impl FnOnce(&mut ControlCycle) -> R) -> R {
        f(&mut *self.cycle.lock())
    }

    /// Block until at least `ticks` ticks completed. `false` on timeout or
    /// when the thread stopped first.
    pub fn wait_for_ticks(&self, ticks: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cv) = &*self.signal;
        let mut signal = lock.lock();
        while signal.stats.ticks < ticks {
            if signal.stopped || cv.wait_until(&mut signal, deadline).timed_out() {
                return signal.stats.ticks >= ticks;
            }
        }
        true
    }

    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cv) = &*self.signal;
        let mut signal = lock.lock();
        while !signal.stopped {
            if cv.wait_until(&mut signal, deadline).timed_out() {
                return signal.stopped;
            }
        }
        true
    }

    /// Stop, wait for the thread and hand the cycle back.
    pub fn join(mut self) -> Result<ControlCycle, MvrError> {
        self.stop();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| MvrError::Cycle("cycle thread panicked".to_string()))?;
        }
        let cycle = Arc::clone(&self.cycle);
        drop(self);
        Arc::try_unwrap(cycle)
            .map(Mutex::into_inner)
            .map_err(|_| MvrError::Cycle("cycle still shared".to_string()))
    }
}

impl Drop for CycleHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
