//! [`Watchdog`] – deadline tracker for periodic obligations.
//!
//! A component is registered with a timeout and fed with
//! [`Watchdog::heartbeat`]. Once the time since its last heartbeat exceeds the
//! timeout the component is reported as [`ComponentHealth::TimedOut`].
//!
//! The runtime uses one watchdog to decide when an unchanged motion command
//! must be refreshed and when a keepalive pulse is due, and another to detect
//! that the hardware stopped sending packets. All methods take the current
//! time explicitly so decisions follow the runtime's [`Clock`] rather than
//! the wall clock.
//!
//! [`Clock`]: mvr_types::Clock

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Health state reported for a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// The component has sent a heartbeat within its deadline.
    Healthy,
    /// The component has not sent a heartbeat within its deadline.
    TimedOut,
}

struct ComponentEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

/// Tracks heartbeats of named components against per-component deadlines.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use mvr_kernel::watchdog::{ComponentHealth, Watchdog};
///
/// let t0 = Instant::now();
/// let mut wd = Watchdog::new();
/// wd.register("trans", Duration::from_millis(500), t0);
///
/// assert_eq!(wd.health("trans", t0 + Duration::from_millis(500)), ComponentHealth::Healthy);
/// assert_eq!(wd.health("trans", t0 + Duration::from_millis(501)), ComponentHealth::TimedOut);
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<String, ComponentEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `component_id` with a maximum heartbeat `timeout`, counting
    /// `now` as its first heartbeat.
    ///
    /// Re-registering an existing component resets its deadline.
    pub fn register(&mut self, component_id: &str, timeout: Duration, now: Instant) {
        self.components.insert(
            component_id.to_string(),
            ComponentEntry {
                last_heartbeat: now,
                timeout,
            },
        );
    }

    /// Record a heartbeat for `component_id` at `now`.
    ///
    /// No-ops for components that have not been registered.
    pub fn heartbeat(&mut self, component_id: &str, now: Instant) {
        if let Some(entry) = self.components.get_mut(component_id) {
            entry.last_heartbeat = now;
        }
    }

    /// Change the timeout of a registered component. Returns `false` for
    /// unknown components.
    pub fn set_timeout(&mut self, component_id: &str, timeout: Duration) -> bool {
        match self.components.get_mut(component_id) {
            Some(entry) => {
                entry.timeout = timeout;
                true
            }
            None => false,
        }
    }

    /// Health of `component_id` at `now`.
    ///
    /// Returns [`ComponentHealth::TimedOut`] for unknown components.
    pub fn health(&self, component_id: &str, now: Instant) -> ComponentHealth {
        match self.components.get(component_id) {
            Some(entry) if now.saturating_duration_since(entry.last_heartbeat) <= entry.timeout => {
                ComponentHealth::Healthy
            }
            _ => ComponentHealth::TimedOut,
        }
    }

    pub fn is_registered(&self, component_id: &str) -> bool {
        self.components.contains_key(component_id)
    }

    pub fn last_heartbeat(&self, component_id: &str) -> Option<Instant> {
        self.components.get(component_id).map(|e| e.last_heartbeat)
    }

    /// IDs of every component whose deadline is exceeded at `now`, sorted.
    pub fn check_all(&self, now: Instant) -> Vec<String> {
        let mut frozen: Vec<String> = self
            .components
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_heartbeat) > entry.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        frozen.sort();
        frozen
    }
}
