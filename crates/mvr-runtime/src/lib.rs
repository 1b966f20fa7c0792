//! `mvr-runtime` – behavior arbitration and the control cycle.
//!
//! Each tick, every active [`Behavior`] proposes a [`DesiredMotion`]; the
//! [`Resolver`] merges the proposals by priority; the [`StateReflector`]
//! turns the merged decision (or a direct operator command) into hardware
//! commands. A [`TaskTree`] sequences the whole thing inside the
//! [`ControlCycle`].
//!
//! # Modules
//!
//! - [`desired_motion`] – [`DesiredMotion`]: per-channel value and strength,
//!   with the merge rules used by the resolver.
//! - [`behavior`] – the [`Behavior`] trait and the priority-keyed
//!   [`BehaviorSet`].
//! - [`builtin`] – stop, constant velocity, speed cap and heading hold.
//! - [`resolver`] – the [`Resolver`] strategy and [`PriorityResolver`].
//! - [`task_tree`] – the cooperative [`TaskTree`] scheduler.
//! - [`robot`] – [`RobotCore`], the state behind the robot lock.
//! - [`state_reflector`] – deadband, refresh and keepalive decisions.
//! - [`control_cycle`] – [`ControlCycle`], its phases, and the
//!   background-thread [`CycleHandle`].
//! - [`telemetry`] – [`init_tracing`](telemetry::init_tracing).

pub mod behavior;
pub mod builtin;
pub mod control_cycle;
pub mod desired_motion;
pub mod resolver;
pub mod robot;
pub mod state_reflector;
pub mod task_tree;
pub mod telemetry;

pub use behavior::{Behavior, BehaviorSet};
pub use builtin::{ConstantVelocity, HoldHeading, SpeedCap, StopBehavior};
pub use control_cycle::{ControlCycle, CycleConfig, CycleContext, CycleHandle, CycleStats};
pub use desired_motion::{Channel, ChannelRequest, DesiredMotion, MAX_STRENGTH, MIN_STRENGTH};
pub use resolver::{PriorityResolver, Resolver};
pub use robot::{RobotCore, RobotGuard, SharedRobot};
pub use state_reflector::StateReflector;
pub use task_tree::{
    RunningProbe, SharedTaskState, TaskId, TaskRemover, TaskScope, TaskState, TaskStateHandle, TaskTree,
};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
