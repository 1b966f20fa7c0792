//! Cooperative task tree.
//!
//! A [`TaskTree`] is a tree of named, positioned units of work. Branches only
//! group children; leaves wrap a callable. [`TaskTree::run`] visits the tree
//! depth-first: a node's callable runs first, then its children in
//! descending position (ties keep insertion order). A node whose state is
//! `Suspend`, `Success` or `Failure` is skipped together with its subtree.
//!
//! Nodes live in an arena and are addressed by generation-checked
//! [`TaskId`]s, so a stale id never aliases a newer node. Removal is safe
//! from inside a running callable: the node is tombstoned (`deleting`),
//! skipped by the rest of the traversal, and physically purged once the
//! traversal finishes.
//!
//! ```rust
//! use mvr_runtime::task_tree::TaskTree;
//!
//! let mut tree: TaskTree<Vec<&'static str>> = TaskTree::new("root");
//! let root = tree.root();
//! tree.add_leaf(root, "C", 10, |log, _| log.push("C"));
//! tree.add_leaf(root, "A", 90, |log, _| log.push("A"));
//! tree.add_leaf(root, "B", 50, |log, _| log.push("B"));
//!
//! let mut log = Vec::new();
//! tree.run(&mut log);
//! assert_eq!(log, ["A", "B", "C"]);
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// First numeric code available for application-defined states.
pub const USER_STATE_BASE: u8 = 20;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    #[default]
    Init,
    Resume,
    Active,
    Suspend,
    Success,
    Failure,
    /// Application-defined state `n`, numbered from [`USER_STATE_BASE`].
    User(u8),
}

impl TaskState {
    pub fn code(self) -> u8 {
        match self {
            TaskState::Init => 0,
            TaskState::Resume => 1,
            TaskState::Active => 2,
            TaskState::Suspend => 3,
            TaskState::Success => 4,
            TaskState::Failure => 5,
            TaskState::User(n) => USER_STATE_BASE.saturating_add(n),
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskState::Init),
            1 => Some(TaskState::Resume),
            2 => Some(TaskState::Active),
            3 => Some(TaskState::Suspend),
            4 => Some(TaskState::Success),
            5 => Some(TaskState::Failure),
            n if n >= USER_STATE_BASE => Some(TaskState::User(n - USER_STATE_BASE)),
            _ => None,
        }
    }

    /// Terminal for scheduling: the node is not run.
    pub fn is_skipped(self) -> bool {
        matches!(self, TaskState::Suspend | TaskState::Success | TaskState::Failure)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// Task state owned outside the tree, e.g. by the component the task drives.
#[derive(Debug, Clone, Default)]
pub struct SharedTaskState(Arc<Mutex<TaskState>>);

impl SharedTaskState {
    pub fn new(state: TaskState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> TaskState {
        *self.0.lock()
    }

    pub fn set(&self, state: TaskState) {
        *self.0.lock() = state;
    }
}

/// Where a node keeps its state.
#[derive(Debug, Clone)]
pub enum TaskStateHandle {
    Owned(TaskState),
    External(SharedTaskState),
}

impl TaskStateHandle {
    pub fn get(&self) -> TaskState {
        match self {
            TaskStateHandle::Owned(state) => *state,
            TaskStateHandle::External(shared) => shared.get(),
        }
    }

    pub fn set(&mut self, state: TaskState) {
        match self {
            TaskStateHandle::Owned(s) => *s = state,
            TaskStateHandle::External(shared) => shared.set(state),
        }
    }
}

/// Stable handle to a node. Stale after the node is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

/// Deferred removal requests, shareable with callables and other owners.
#[derive(Debug, Clone, Default)]
pub struct TaskRemover(Arc<Mutex<Vec<TaskId>>>);

impl TaskRemover {
    /// Queue `id` for removal; applied after the current callable returns,
    /// or at the start of the next run.
    pub fn remove(&self, id: TaskId) {
        self.0.lock().push(id);
    }

    fn drain(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// Names of the nodes currently executing, outermost first.
///
/// Cloneable so another thread can ask what a stuck cycle is doing.
#[derive(Debug, Clone, Default)]
pub struct RunningProbe(Arc<Mutex<Vec<String>>>);

impl RunningProbe {
    /// Deepest node currently executing.
    pub fn current(&self) -> Option<String> {
        self.0.lock().last().cloned()
    }

    pub fn path(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn push(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }

    fn pop(&self) {
        self.0.lock().pop();
    }
}

/// Handed to a callable while it runs.
pub struct TaskScope<'a> {
    id: TaskId,
    name: &'a str,
    remover: &'a TaskRemover,
}

impl TaskScope<'_> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Remove the running task once its callable returns.
    pub fn remove_self(&self) {
        self.remover.remove(self.id);
    }

    pub fn remove(&self, id: TaskId) {
        self.remover.remove(id);
    }
}

pub type TaskFn<C> = Box<dyn FnMut(&mut C, &TaskScope<'_>) + Send>;

struct Node<C> {
    name: String,
    position: i32,
    leaf: bool,
    callable: Option<TaskFn<C>>,
    state: TaskStateHandle,
    parent: Option<TaskId>,
    children: Vec<TaskId>,
    deleting: bool,
}

struct Slot<C> {
    generation: u32,
    node: Option<Node<C>>,
}

/// Arena-backed scheduling tree, generic over the context passed to every
/// callable.
pub struct TaskTree<C> {
    slots: Vec<Slot<C>>,
    free: Vec<u32>,
    root: TaskId,
    remover: TaskRemover,
    probe: RunningProbe,
    warning_time: Duration,
    suppress_warning: bool,
    warned_overruns: u64,
    suppressed_overruns: u64,
}

impl<C> TaskTree<C> {
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = Node {
            name: root_name.into(),
            position: 0,
            leaf: false,
            callable: None,
            state: TaskStateHandle::Owned(TaskState::Active),
            parent: None,
            children: Vec::new(),
            deleting: false,
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(root),
            }],
            free: Vec::new(),
            root: TaskId {
                index: 0,
                generation: 0,
            },
            remover: TaskRemover::default(),
            probe: RunningProbe::default(),
            warning_time: Duration::ZERO,
            suppress_warning: false,
            warned_overruns: 0,
            suppressed_overruns: 0,
        }
    }

    pub fn root(&self) -> TaskId {
        self.root
    }

    // ─────────────────────────────────────────────────────────────────────
    // Structure
    // ─────────────────────────────────────────────────────────────────────

    /// Add a branch under `parent`. `None` (and a warning) when `parent` is
    /// gone or a sibling already uses `name`.
    pub fn add_branch(&mut self, parent: TaskId, name: &str, position: i32) -> Option<TaskId> {
        self.insert(parent, name, position, None, TaskStateHandle::Owned(TaskState::Active))
    }

    pub fn add_leaf<F>(&mut self, parent: TaskId, name: &str, position: i32, f: F) -> Option<TaskId>
    where
        F: FnMut(&mut C, &TaskScope<'_>) + Send + 'static,
    {
        self.insert(
            parent,
            name,
            position,
            Some(Box::new(f)),
            TaskStateHandle::Owned(TaskState::Active),
        )
    }

    /// Add a leaf whose state is owned by the caller.
    pub fn add_leaf_with_state<F>(
        &mut self,
        parent: TaskId,
        name: &str,
        position: i32,
        state: SharedTaskState,
        f: F,
    ) -> Option<TaskId>
    where
        F: FnMut(&mut C, &TaskScope<'_>) + Send + 'static,
    {
        self.insert(
            parent,
            name,
            position,
            Some(Box::new(f)),
            TaskStateHandle::External(state),
        )
    }

    fn insert(
        &mut self,
        parent: TaskId,
        name: &str,
        position: i32,
        callable: Option<TaskFn<C>>,
        state: TaskStateHandle,
    ) -> Option<TaskId> {
        if !self.contains(parent) {
            warn!(task = name, "parent task not found");
            return None;
        }
        if self.find_child(parent, name).is_some() {
            warn!(task = name, "task name already used by a sibling");
            return None;
        }

        let node = Node {
            name: name.to_string(),
            position,
            leaf: callable.is_some(),
            callable,
            state,
            parent: Some(parent),
            children: Vec::new(),
            deleting: false,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                TaskId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                TaskId {
                    index,
                    generation: 0,
                }
            }
        };

        // Children stay sorted: position descending, then insertion order.
        let at = {
            let siblings = &self.node(parent)?.children;
            siblings
                .iter()
                .position(|&c| self.node(c).is_some_and(|n| n.position < position))
                .unwrap_or(siblings.len())
        };
        self.node_mut(parent)?.children.insert(at, id);
        debug!(task = name, position, "task added");
        Some(id)
    }

    /// Remove `id` and its subtree. Returns `false` (and logs) for the root
    /// or an unknown id.
    pub fn remove(&mut self, id: TaskId) -> bool {
        if id == self.root {
            warn!("refusing to remove the root task");
            return false;
        }
        if !self.contains(id) {
            warn!(?id, "task not found");
            return false;
        }
        self.tombstone(id);
        self.purge();
        true
    }

    /// Handle for removing tasks from inside callables or other owners.
    pub fn remover(&self) -> TaskRemover {
        self.remover.clone()
    }

    fn tombstone(&mut self, id: TaskId) {
        let Some(node) = self.node_mut(id) else { return };
        if node.deleting {
            return;
        }
        node.deleting = true;
        let parent = node.parent;
        let children = node.children.clone();
        if let Some(parent) = parent.and_then(|p| self.node_mut(p)) {
            parent.children.retain(|&c| c != id);
        }
        for child in children {
            self.tombstone(child);
        }
    }

    fn apply_pending(&mut self) {
        for id in self.remover.drain() {
            if id == self.root || !self.contains(id) {
                debug!(?id, "ignoring removal of unknown task");
                continue;
            }
            self.tombstone(id);
        }
    }

    fn purge(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.as_ref().is_some_and(|n| n.deleting) {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────

    fn node(&self, id: TaskId) -> Option<&Node<C>> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    fn node_mut(&mut self, id: TaskId) -> Option<&mut Node<C>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    fn live(&self, id: TaskId) -> Option<&Node<C>> {
        self.node(id).filter(|n| !n.deleting)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.live(id).is_some()
    }

    /// Recursive search from the root, in traversal order.
    ///
    /// Callables cannot be compared, so a task is found by name here or
    /// addressed directly through the [`TaskId`] returned by
    /// [`add_leaf`](Self::add_leaf).
    pub fn find(&self, name: &str) -> Option<TaskId> {
        if self.live(self.root).is_some_and(|n| n.name == name) {
            return Some(self.root);
        }
        self.find_under(self.root, name)
    }

    /// Recursive search among the descendants of `parent`.
    pub fn find_under(&self, parent: TaskId, name: &str) -> Option<TaskId> {
        for &child in &self.live(parent)?.children {
            if self.live(child).is_some_and(|n| n.name == name) {
                return Some(child);
            }
            if let Some(found) = self.find_under(child, name) {
                return Some(found);
            }
        }
        None
    }

    /// Direct children of `parent` only.
    pub fn find_child(&self, parent: TaskId, name: &str) -> Option<TaskId> {
        self.live(parent)?
            .children
            .iter()
            .copied()
            .find(|&c| self.live(c).is_some_and(|n| n.name == name))
    }

    pub fn name(&self, id: TaskId) -> Option<&str> {
        self.live(id).map(|n| n.name.as_str())
    }

    pub fn position(&self, id: TaskId) -> Option<i32> {
        self.live(id).map(|n| n.position)
    }

    pub fn parent(&self, id: TaskId) -> Option<TaskId> {
        self.live(id)?.parent
    }

    /// Children in run order.
    pub fn children(&self, id: TaskId) -> Vec<TaskId> {
        self.live(id)
            .map(|n| n.children.iter().copied().filter(|&c| self.contains(c)).collect())
            .unwrap_or_default()
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.live(id).map(|n| n.state.get())
    }

    pub fn set_state(&mut self, id: TaskId, state: TaskState) -> bool {
        match self.node_mut(id).filter(|n| !n.deleting) {
            Some(node) => {
                node.state.set(state);
                true
            }
            None => {
                warn!(?id, "task not found");
                false
            }
        }
    }

    /// Live leaves not yet in `Success` or `Failure`, in traversal order.
    pub fn unfinished_leaves(&self) -> Vec<TaskId> {
        let mut out = Vec::new();
        self.collect_unfinished(self.root, &mut out);
        out
    }

    fn collect_unfinished(&self, id: TaskId, out: &mut Vec<TaskId>) {
        let Some(node) = self.live(id) else { return };
        if node.leaf && !node.state.get().is_finished() {
            out.push(id);
        }
        for &child in &node.children {
            self.collect_unfinished(child, out);
        }
    }

    pub fn running_probe(&self) -> RunningProbe {
        self.probe.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Overrun signaling
    // ─────────────────────────────────────────────────────────────────────

    /// Warn when a run takes longer than `warning_time`. Zero disables.
    pub fn set_warning_time(&mut self, warning_time: Duration) {
        self.warning_time = warning_time;
    }

    pub fn warning_time(&self) -> Duration {
        self.warning_time
    }

    /// Skip the overrun warning for the current (or next) run only.
    pub fn suppress_warning_this_cycle(&mut self) {
        self.suppress_warning = true;
    }

    /// Runs that exceeded the warning time and were logged.
    pub fn warned_overruns(&self) -> u64 {
        self.warned_overruns
    }

    /// Runs that exceeded the warning time while the warning was suppressed.
    pub fn suppressed_overruns(&self) -> u64 {
        self.suppressed_overruns
    }

    // ─────────────────────────────────────────────────────────────────────
    // Traversal
    // ─────────────────────────────────────────────────────────────────────

    /// Run the whole tree once and return how long it took.
    pub fn run(&mut self, ctx: &mut C) -> Duration {
        let started = Instant::now();
        self.apply_pending();
        self.run_node(self.root, ctx);
        self.apply_pending();
        self.purge();

        let elapsed = started.elapsed();
        if !self.warning_time.is_zero() && elapsed > self.warning_time {
            if self.suppress_warning {
                self.suppressed_overruns += 1;
                debug!(elapsed_ms = elapsed.as_millis() as u64, "cycle overrun suppressed");
            } else {
                self.warned_overruns += 1;
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    warning_ms = self.warning_time.as_millis() as u64,
                    "cycle took longer than the warning time"
                );
            }
        }
        self.suppress_warning = false;
        elapsed
    }

    fn run_node(&mut self, id: TaskId, ctx: &mut C) {
        let Some(node) = self.node_mut(id) else { return };
        if node.deleting || node.state.get().is_skipped() {
            return;
        }
        let name = node.name.clone();
        let callable = node.callable.take();
        self.probe.push(&name);

        if let Some(mut f) = callable {
            let scope = TaskScope {
                id,
                name: &name,
                remover: &self.remover,
            };
            f(ctx, &scope);
            if let Some(node) = self.node_mut(id) {
                node.callable = Some(f);
            }
            self.apply_pending();
        }

        let children = self.live(id).map(|n| n.children.clone()).unwrap_or_default();
        for child in children {
            self.run_node(child, ctx);
        }
        self.probe.pop();
    }

    /// Indented dump of the live tree, one node per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_node(self.root, 0, &mut out);
        out
    }

    fn describe_node(&self, id: TaskId, depth: usize, out: &mut String) {
        let Some(node) = self.live(id) else { return };
        let _ = writeln!(
            out,
            "{:indent$}{} ({}) [{:?}]{}",
            "",
            node.name,
            node.position,
            node.state.get(),
            if node.leaf { "" } else { "/" },
            indent = depth * 2
        );
        for &child in &node.children {
            self.describe_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Vec<String>;

    fn tree() -> TaskTree<Log> {
        TaskTree::new("root")
    }

    fn push(name: &'static str) -> impl FnMut(&mut Log, &TaskScope<'_>) + Send + 'static {
        move |log: &mut Log, _: &TaskScope<'_>| log.push(name.to_string())
    }

    fn run(tree: &mut TaskTree<Log>) -> Log {
        let mut log = Vec::new();
        tree.run(&mut log);
        log
    }

    #[test]
    fn children_run_in_descending_position() {
        let mut t = tree();
        let root = t.root();
        t.add_leaf(root, "C", 10, push("C"));
        t.add_leaf(root, "A", 90, push("A"));
        t.add_leaf(root, "B", 50, push("B"));
        for _ in 0..3 {
            assert_eq!(run(&mut t), ["A", "B", "C"]);
        }
    }

    #[test]
    fn equal_positions_keep_insertion_order() {
        let mut t = tree();
        let root = t.root();
        t.add_leaf(root, "first", 5, push("first"));
        t.add_leaf(root, "second", 5, push("second"));
        t.add_leaf(root, "top", 6, push("top"));
        assert_eq!(run(&mut t), ["top", "first", "second"]);
    }

    #[test]
    fn branches_run_depth_first() {
        let mut t = tree();
        let root = t.root();
        let sensors = t.add_branch(root, "sensors", 65).unwrap();
        let user = t.add_branch(root, "user", 25).unwrap();
        t.add_leaf(user, "u1", 1, push("u1"));
        t.add_leaf(sensors, "s1", 2, push("s1"));
        t.add_leaf(sensors, "s2", 1, push("s2"));
        t.add_leaf(root, "act", 55, push("act"));
        assert_eq!(run(&mut t), ["s1", "s2", "act", "u1"]);
    }

    #[test]
    fn sibling_name_collision_is_rejected() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_branch(root, "a", 1).unwrap();
        assert!(t.add_leaf(root, "a", 2, push("dup")).is_none());
        // Same name under a different parent is fine.
        assert!(t.add_leaf(a, "a", 1, push("nested")).is_some());
    }

    #[test]
    fn find_recursive_and_direct() {
        let mut t = tree();
        let root = t.root();
        let branch = t.add_branch(root, "branch", 1).unwrap();
        let leaf = t.add_leaf(branch, "leaf", 1, push("leaf")).unwrap();
        assert_eq!(t.find("leaf"), Some(leaf));
        assert_eq!(t.find("root"), Some(root));
        assert_eq!(t.find_child(root, "leaf"), None);
        assert_eq!(t.find_child(branch, "leaf"), Some(leaf));
        assert_eq!(t.find_under(branch, "leaf"), Some(leaf));
        assert_eq!(t.find("missing"), None);
        assert_eq!(t.parent(leaf), Some(branch));
        assert_eq!(t.children(root), vec![branch]);
    }

    #[test]
    fn suspended_and_finished_subtrees_are_skipped() {
        let mut t = tree();
        let root = t.root();
        let branch = t.add_branch(root, "branch", 2).unwrap();
        t.add_leaf(branch, "inner", 1, push("inner"));
        let done = t.add_leaf(root, "done", 1, push("done")).unwrap();

        t.set_state(branch, TaskState::Suspend);
        t.set_state(done, TaskState::Success);
        assert!(run(&mut t).is_empty());

        t.set_state(branch, TaskState::Resume);
        assert_eq!(run(&mut t), ["inner"]);
    }

    #[test]
    fn external_state_is_followed() {
        let shared = SharedTaskState::new(TaskState::Active);
        let mut t = tree();
        let root = t.root();
        let id = t
            .add_leaf_with_state(root, "ext", 1, shared.clone(), push("ext"))
            .unwrap();
        assert_eq!(run(&mut t), ["ext"]);

        shared.set(TaskState::Suspend);
        assert!(run(&mut t).is_empty());
        assert_eq!(t.state(id), Some(TaskState::Suspend));

        t.set_state(id, TaskState::Failure);
        assert_eq!(shared.get(), TaskState::Failure);
    }

    #[test]
    fn self_removal_is_safe_and_permanent() {
        let mut t = tree();
        let root = t.root();
        t.add_leaf(root, "once", 2, |log: &mut Log, scope: &TaskScope<'_>| {
            log.push(scope.name().to_string());
            scope.remove_self();
        });
        t.add_leaf(root, "after", 1, push("after"));

        assert_eq!(run(&mut t), ["once", "after"]);
        assert_eq!(run(&mut t), ["after"]);
        assert_eq!(t.find("once"), None);
    }

    #[test]
    fn removing_a_later_sibling_skips_it_this_run() {
        let mut t = tree();
        let root = t.root();
        let victim = t.add_leaf(root, "victim", 1, push("victim")).unwrap();
        t.add_leaf(root, "killer", 2, move |log: &mut Log, scope: &TaskScope<'_>| {
            log.push("killer".to_string());
            scope.remove(victim);
        });
        assert_eq!(run(&mut t), ["killer"]);
        assert!(!t.contains(victim));
    }

    #[test]
    fn removing_a_branch_removes_its_subtree() {
        let mut t = tree();
        let root = t.root();
        let branch = t.add_branch(root, "branch", 1).unwrap();
        let leaf = t.add_leaf(branch, "leaf", 1, push("leaf")).unwrap();
        assert!(t.remove(branch));
        assert!(!t.contains(leaf));
        assert!(!t.remove(branch));
        assert!(run(&mut t).is_empty());
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut t = tree();
        let root = t.root();
        let old = t.add_leaf(root, "old", 1, push("old")).unwrap();
        t.remove(old);
        let new = t.add_leaf(root, "new", 1, push("new")).unwrap();
        assert_ne!(old, new);
        assert!(!t.contains(old));
        assert_eq!(t.name(new), Some("new"));
        assert!(!t.remove(old));
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut t = tree();
        let root = t.root();
        assert!(!t.remove(root));
        assert!(t.contains(root));
    }

    #[test]
    fn remover_applies_on_next_run() {
        let mut t = tree();
        let root = t.root();
        let id = t.add_leaf(root, "x", 1, push("x")).unwrap();
        let remover = t.remover();
        remover.remove(id);
        assert!(run(&mut t).is_empty());
        assert!(!t.contains(id));
    }

    #[test]
    fn running_probe_reports_deepest_node() {
        let mut t: TaskTree<Vec<Vec<String>>> = TaskTree::new("root");
        let probe = t.running_probe();
        let root = t.root();
        let branch = t.add_branch(root, "sensors", 1).unwrap();
        t.add_leaf(branch, "lidar", 1, move |seen: &mut Vec<Vec<String>>, _: &TaskScope<'_>| {
            seen.push(probe.path());
        });
        let mut seen = Vec::new();
        t.run(&mut seen);
        assert_eq!(seen, vec![vec!["root", "sensors", "lidar"]]);
        assert_eq!(t.running_probe().current(), None);
    }

    #[test]
    fn unfinished_leaves_excludes_success_and_failure() {
        let mut t = tree();
        let root = t.root();
        let a = t.add_leaf(root, "a", 3, push("a")).unwrap();
        let b = t.add_leaf(root, "b", 2, push("b")).unwrap();
        let c = t.add_leaf(root, "c", 1, push("c")).unwrap();
        t.set_state(b, TaskState::Success);
        t.set_state(c, TaskState::Suspend);
        assert_eq!(t.unfinished_leaves(), vec![a, c]);
    }

    #[test]
    fn overrun_is_measured_and_warning_time_configurable() {
        let mut t = tree();
        let root = t.root();
        t.add_leaf(root, "slow", 1, |_: &mut Log, _: &TaskScope<'_>| {
            std::thread::sleep(Duration::from_millis(5));
        });
        t.set_warning_time(Duration::from_millis(1));
        assert_eq!(t.warning_time(), Duration::from_millis(1));

        t.suppress_warning_this_cycle();
        let elapsed = t.run(&mut Vec::new());
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!((t.suppressed_overruns(), t.warned_overruns()), (1, 0));

        // Suppression covers a single run.
        t.run(&mut Vec::new());
        assert_eq!((t.suppressed_overruns(), t.warned_overruns()), (1, 1));
    }

    #[test]
    fn zero_warning_time_never_counts_overruns() {
        let mut t = tree();
        let root = t.root();
        t.add_leaf(root, "slow", 1, |_: &mut Log, _: &TaskScope<'_>| {
            std::thread::sleep(Duration::from_millis(2));
        });
        t.run(&mut Vec::new());
        assert_eq!((t.suppressed_overruns(), t.warned_overruns()), (0, 0));
    }

    #[test]
    fn state_codes_reserve_user_range() {
        assert_eq!(TaskState::User(0).code(), USER_STATE_BASE);
        assert_eq!(TaskState::from_code(22), Some(TaskState::User(2)));
        assert_eq!(TaskState::from_code(10), None);
        assert_eq!(TaskState::from_code(TaskState::Failure.code()), Some(TaskState::Failure));
    }

    #[test]
    fn describe_indents_children() {
        let mut t = tree();
        let root = t.root();
        let branch = t.add_branch(root, "branch", 5).unwrap();
        t.add_leaf(branch, "leaf", 1, push("leaf"));
        let text = t.describe();
        assert_eq!(
            text,
            "root (0) [Active]/\n  branch (5) [Active]/\n    leaf (1) [Active]\n"
        );
    }
}
