//! [`Resolver`] strategy and the default [`PriorityResolver`].
//!
//! The resolver turns every active behavior's opinion into one
//! [`DesiredMotion`] per tick. [`PriorityResolver`] walks the priority
//! buckets from highest to lowest:
//!
//! 1. every active behavior in the bucket fires against the accumulator,
//! 2. the bucket's outputs are combined among themselves
//!    ([`DesiredMotion::combine`], independent of registration order),
//! 3. the combined bucket fills the accumulator only where it is stronger
//!    ([`DesiredMotion::accumulate`]).
//!
//! No active behavior at all yields an empty request.

use mvr_types::RobotState;
use tracing::info;

use crate::behavior::BehaviorSet;
use crate::desired_motion::DesiredMotion;

/// Merges all active behaviors into one request.
pub trait Resolver: Send {
    fn name(&self) -> &str;

    fn resolve(&mut self, behaviors: &mut BehaviorSet, robot: &RobotState) -> DesiredMotion;
}

/// Highest priority first, strength-weighted override.
#[derive(Debug, Default, Clone)]
pub struct PriorityResolver {
    log: bool,
}

impl PriorityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log one line per active behavior each tick.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn set_logging(&mut self, log: bool) {
        self.log = log;
    }

    pub fn logging(&self) -> bool {
        self.log
    }
}

impl Resolver for PriorityResolver {
    fn name(&self) -> &str {
        "priority"
    }

    fn resolve(&mut self, behaviors: &mut BehaviorSet, robot: &RobotState) -> DesiredMotion {
        let mut accumulator = DesiredMotion::new();
        let mut group = Vec::new();

        for priority in behaviors.priorities() {
            group.clear();
            for slot in behaviors.bucket_mut(priority) {
                if !slot.active {
                    continue;
                }
                let desired = slot.behavior.fire(&accumulator, robot);
                if self.log {
                    info!(
                        behavior = slot.behavior.name(),
                        priority,
                        desired = %desired,
                        "behavior fired"
                    );
                }
                group.push(desired);
            }
            if !group.is_empty() {
                accumulator.accumulate(&DesiredMotion::combine(&group));
            }
        }

        if self.log {
            info!(resolved = %accumulator, "resolved");
        }
        accumulator
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::behavior::Behavior;
    use crate::builtin::{ConstantVelocity, SpeedCap, StopBehavior};
    use crate::desired_motion::{Channel, MIN_STRENGTH};

    fn resolve(set: &mut BehaviorSet) -> DesiredMotion {
        PriorityResolver::new().resolve(set, &RobotState::default())
    }

    #[test]
    fn empty_set_resolves_to_nothing() {
        assert!(resolve(&mut BehaviorSet::new()).is_empty());
    }

    #[test]
    fn higher_priority_dominates() {
        let mut set = BehaviorSet::new();
        set.add(Box::new(StopBehavior::new("stop")), 100);
        set.add(Box::new(ConstantVelocity::new("wander", 500.0)), 50);
        assert_eq!(resolve(&mut set).get(Channel::Vel), Some(0.0));
    }

    #[test]
    fn weaker_higher_priority_is_overridden_by_stronger_lower_priority() {
        let mut set = BehaviorSet::new();
        set.add(Box::new(ConstantVelocity::new("hint", 100.0).with_strength(0.2)), 100);
        set.add(Box::new(ConstantVelocity::new("wander", 500.0)), 50);
        assert_eq!(resolve(&mut set).get(Channel::Vel), Some(500.0));
    }

    #[test]
    fn same_priority_is_averaged_regardless_of_order() {
        let mut ab = BehaviorSet::new();
        ab.add(Box::new(ConstantVelocity::new("a", 200.0)), 10);
        ab.add(Box::new(ConstantVelocity::new("b", 300.0)), 10);
        let mut ba = BehaviorSet::new();
        ba.add(Box::new(ConstantVelocity::new("b", 300.0)), 10);
        ba.add(Box::new(ConstantVelocity::new("a", 200.0)), 10);

        let r1 = resolve(&mut ab);
        let r2 = resolve(&mut ba);
        assert_eq!(r1.get(Channel::Vel), Some(250.0));
        assert_eq!(r1, r2);
    }

    #[test]
    fn inactive_behaviors_are_skipped() {
        let mut set = BehaviorSet::new();
        set.add(Box::new(StopBehavior::new("stop")), 100);
        set.add(Box::new(ConstantVelocity::new("wander", 300.0)), 50);
        set.deactivate("stop");
        assert_eq!(resolve(&mut set).get(Channel::Vel), Some(300.0));
    }

    #[test]
    fn sub_threshold_requests_never_influence_output() {
        let mut set = BehaviorSet::new();
        set.add(
            Box::new(ConstantVelocity::new("ghost", 9999.0).with_strength(MIN_STRENGTH / 2.0)),
            100,
        );
        set.add(Box::new(ConstantVelocity::new("wander", 300.0).with_strength(0.3)), 10);
        assert_eq!(resolve(&mut set).get(Channel::Vel), Some(300.0));
    }

    #[test]
    fn lower_priorities_fill_undecided_channels() {
        let mut set = BehaviorSet::new();
        set.add(Box::new(SpeedCap::new("cap", 400.0, 100.0)), 75);
        set.add(Box::new(ConstantVelocity::new("wander", 300.0)), 50);
        let out = resolve(&mut set);
        assert_eq!(out.get(Channel::MaxVel), Some(400.0));
        assert_eq!(out.get(Channel::Vel), Some(300.0));
    }

    struct Follower {
        seen: Arc<Mutex<Vec<Option<f64>>>>,
    }

    impl Behavior for Follower {
        fn name(&self) -> &str {
            "follower"
        }

        fn fire(&mut self, so_far: &DesiredMotion, _robot: &RobotState) -> DesiredMotion {
            self.seen.lock().push(so_far.get(Channel::Vel));
            DesiredMotion::new()
        }
    }

    #[test]
    fn behaviors_see_only_higher_priority_results() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut set = BehaviorSet::new();
        set.add(Box::new(ConstantVelocity::new("lead", 150.0)), 100);
        set.add(Box::new(ConstantVelocity::new("peer", 900.0)), 50);
        set.add(Box::new(Follower { seen: Arc::clone(&seen) }), 50);
        resolve(&mut set);
        assert_eq!(*seen.lock(), vec![Some(150.0)]);

        set.remove("lead");
        resolve(&mut set);
        assert_eq!(seen.lock().last(), Some(&None));
    }

    #[test]
    fn logging_does_not_change_the_result() {
        let mut set = BehaviorSet::new();
        set.add(Box::new(ConstantVelocity::new("wander", 300.0)), 50);
        let quiet = PriorityResolver::new().resolve(&mut set, &RobotState::default());
        let loud = PriorityResolver::new()
            .with_logging(true)
            .resolve(&mut set, &RobotState::default());
        assert_eq!(quiet, loud);
    }
}
