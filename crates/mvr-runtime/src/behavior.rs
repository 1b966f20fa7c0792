//! [`Behavior`] trait and the priority-keyed [`BehaviorSet`].
//!
//! A behavior looks at the robot state and at what strictly higher-priority
//! behaviors already decided, and answers with its own [`DesiredMotion`].
//! Behaviors never fail; having no opinion means leaving channels
//! unrequested.
//!
//! Priorities are supplied at registration and live on the registry entry,
//! not on the behavior. Several behaviors may share a priority; the resolver
//! treats them as one cooperating group.

use std::collections::BTreeMap;

use mvr_types::RobotState;
use tracing::warn;

use crate::desired_motion::DesiredMotion;

/// A unit producing a motion opinion once per tick.
pub trait Behavior: Send {
    /// Unique name within a [`BehaviorSet`].
    fn name(&self) -> &str;

    /// Produce this tick's request.
    ///
    /// `so_far` is the partially resolved result of strictly higher
    /// priorities, so a behavior can choose to fill only undecided channels.
    fn fire(&mut self, so_far: &DesiredMotion, robot: &RobotState) -> DesiredMotion;

    /// Called when the behavior becomes active again.
    fn on_activate(&mut self) {}

    /// Called when the behavior is deactivated.
    fn on_deactivate(&mut self) {}
}

struct Entry {
    active: bool,
    behavior: Box<dyn Behavior>,
}

/// A registered behavior as seen while resolving.
pub struct BehaviorSlot<'a> {
    pub priority: i32,
    pub active: bool,
    pub behavior: &'a mut dyn Behavior,
}

/// Priority → behaviors multimap.
///
/// # Example
///
/// ```rust
/// use mvr_runtime::behavior::BehaviorSet;
/// use mvr_runtime::builtin::{ConstantVelocity, StopBehavior};
///
/// let mut set = BehaviorSet::new();
/// assert!(set.add(Box::new(StopBehavior::new("stop")), 100));
/// assert!(set.add(Box::new(ConstantVelocity::new("wander", 300.0)), 50));
/// assert!(set.deactivate("stop"));
///
/// assert_eq!(set.is_active("stop"), Some(false));
/// assert_eq!(set.names(), vec!["stop".to_string(), "wander".to_string()]);
/// ```
#[derive(Default)]
pub struct BehaviorSet {
    by_priority: BTreeMap<i32, Vec<Entry>>,
}

impl BehaviorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behavior` at `priority`, active. Returns `false` (and logs)
    /// when a behavior with the same name is already registered.
    pub fn add(&mut self, behavior: Box<dyn Behavior>, priority: i32) -> bool {
        if self.find(behavior.name()).is_some() {
            warn!(behavior = behavior.name(), "behavior already registered");
            return false;
        }
        self.by_priority.entry(priority).or_default().push(Entry {
            active: true,
            behavior,
        });
        true
    }

    /// Unregister and return the behavior called `name`.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Behavior>> {
        let (priority, idx) = self.find(name)?;
        let bucket = self.by_priority.get_mut(&priority)?;
        let entry = bucket.remove(idx);
        if bucket.is_empty() {
            self.by_priority.remove(&priority);
        }
        Some(entry.behavior)
    }

    pub fn activate(&mut self, name: &str) -> bool {
        self.set_active(name, true)
    }

    pub fn deactivate(&mut self, name: &str) -> bool {
        self.set_active(name, false)
    }

    fn set_active(&mut self, name: &str, active: bool) -> bool {
        let Some(entry) = self.entry_mut(name) else {
            warn!(behavior = name, "behavior not found");
            return false;
        };
        if entry.active != active {
            entry.active = active;
            if active {
                entry.behavior.on_activate();
            } else {
                entry.behavior.on_deactivate();
            }
        }
        true
    }

    pub fn is_active(&self, name: &str) -> Option<bool> {
        let (priority, idx) = self.find(name)?;
        Some(self.by_priority[&priority][idx].active)
    }

    pub fn priority(&self, name: &str) -> Option<i32> {
        self.find(name).map(|(priority, _)| priority)
    }

    pub fn len(&self) -> usize {
        self.by_priority.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_priority.is_empty()
    }

    /// Names in resolve order: highest priority first, registration order
    /// within a priority.
    pub fn names(&self) -> Vec<String> {
        self.by_priority
            .iter()
            .rev()
            .flat_map(|(_, bucket)| bucket.iter().map(|e| e.behavior.name().to_string()))
            .collect()
    }

    /// Distinct priorities, highest first.
    pub fn priorities(&self) -> Vec<i32> {
        self.by_priority.keys().rev().copied().collect()
    }

    /// Mutable view of one priority bucket.
    pub fn bucket_mut(&mut self, priority: i32) -> Vec<BehaviorSlot<'_>> {
        self.by_priority
            .get_mut(&priority)
            .map(|bucket| {
                bucket
                    .iter_mut()
                    .map(|e| BehaviorSlot {
                        priority,
                        active: e.active,
                        behavior: e.behavior.as_mut(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find(&self, name: &str) -> Option<(i32, usize)> {
        self.by_priority.iter().find_map(|(&priority, bucket)| {
            bucket
                .iter()
                .position(|e| e.behavior.name() == name)
                .map(|idx| (priority, idx))
        })
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        let (priority, idx) = self.find(name)?;
        self.by_priority.get_mut(&priority)?.get_mut(idx)
    }
}
