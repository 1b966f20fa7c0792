//! [`DesiredMotion`] – per-channel motion request with strengths.
//!
//! Every behavior answers each tick with a `DesiredMotion`: for each
//! [`Channel`] it may request a value together with a strength in
//! `[0, MAX_STRENGTH]`. A channel only counts as requested when its strength
//! reaches [`MIN_STRENGTH`]; a freshly reset instance requests nothing.
//!
//! Three combination rules are used by the resolver:
//!
//! | Operation                      | Rule                                                         |
//! |--------------------------------|--------------------------------------------------------------|
//! | [`DesiredMotion::merge`]       | higher strength overwrites, equal strength averages           |
//! | [`DesiredMotion::combine`]     | `merge` over a same-priority group, independent of order      |
//! | [`DesiredMotion::accumulate`]  | lower priority only fills where it is strictly stronger       |
//!
//! Value and strength of a channel always move together.
//!
//! # Example
//!
//! ```rust
//! use mvr_runtime::desired_motion::{Channel, DesiredMotion, MAX_STRENGTH};
//!
//! let mut desired = DesiredMotion::new();
//! assert!(desired.is_empty());
//!
//! desired.set_vel(300.0, MAX_STRENGTH);
//! assert_eq!(desired.get(Channel::Vel), Some(300.0));
//! assert_eq!(desired.get(Channel::RotVel), None);
//! ```

use std::fmt;

use mvr_types::normalize_degrees;

/// Strongest possible request.
pub const MAX_STRENGTH: f64 = 1.0;

/// Requests weaker than this do not count.
pub const MIN_STRENGTH: f64 = 0.01;

/// A motion channel a behavior can express an opinion on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Translational velocity, mm/s.
    Vel,
    TransAccel,
    TransDecel,
    /// Rotational velocity, deg/s.
    RotVel,
    /// Absolute heading, deg.
    Heading,
    /// Heading change relative to the current pose, deg.
    DeltaHeading,
    RotAccel,
    RotDecel,
    /// Lateral velocity, mm/s.
    LatVel,
    LatAccel,
    LatDecel,
    /// Cap on forward translational velocity.
    MaxVel,
    /// Cap on backward translational velocity (magnitude).
    MaxNegVel,
    MaxRotVel,
    MaxNegRotVel,
    MaxLatVel,
    MaxNegLatVel,
}

impl Channel {
    pub const COUNT: usize = 17;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::Vel,
        Channel::TransAccel,
        Channel::TransDecel,
        Channel::RotVel,
        Channel::Heading,
        Channel::DeltaHeading,
        Channel::RotAccel,
        Channel::RotDecel,
        Channel::LatVel,
        Channel::LatAccel,
        Channel::LatDecel,
        Channel::MaxVel,
        Channel::MaxNegVel,
        Channel::MaxRotVel,
        Channel::MaxNegRotVel,
        Channel::MaxLatVel,
        Channel::MaxNegLatVel,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Angular channels wrap around and are averaged on the circle.
    pub fn is_angular(self) -> bool {
        matches!(self, Channel::Heading | Channel::DeltaHeading)
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Vel => "vel",
            Channel::TransAccel => "trans_accel",
            Channel::TransDecel => "trans_decel",
            Channel::RotVel => "rot_vel",
            Channel::Heading => "heading",
            Channel::DeltaHeading => "delta_heading",
            Channel::RotAccel => "rot_accel",
            Channel::RotDecel => "rot_decel",
            Channel::LatVel => "lat_vel",
            Channel::LatAccel => "lat_accel",
            Channel::LatDecel => "lat_decel",
            Channel::MaxVel => "max_vel",
            Channel::MaxNegVel => "max_neg_vel",
            Channel::MaxRotVel => "max_rot_vel",
            Channel::MaxNegRotVel => "max_neg_rot_vel",
            Channel::MaxLatVel => "max_lat_vel",
            Channel::MaxNegLatVel => "max_neg_lat_vel",
        }
    }
}

/// Value and strength of a single channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelRequest {
    pub value: f64,
    pub strength: f64,
}

impl ChannelRequest {
    pub const NONE: ChannelRequest = ChannelRequest {
        value: 0.0,
        strength: 0.0,
    };

    pub fn is_requested(&self) -> bool {
        self.strength >= MIN_STRENGTH
    }
}

/// A full motion request: one [`ChannelRequest`] per [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesiredMotion {
    channels: [ChannelRequest; Channel::COUNT],
}

impl Default for DesiredMotion {
    fn default() -> Self {
        Self {
            channels: [ChannelRequest::NONE; Channel::COUNT],
        }
    }
}

fn average(channel: Channel, values: &[f64]) -> f64 {
    if channel.is_angular() {
        let (sin, cos) = values.iter().fold((0.0, 0.0), |(s, c), v| {
            let r = v.to_radians();
            (s + r.sin(), c + r.cos())
        });
        normalize_degrees(sin.atan2(cos).to_degrees())
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl DesiredMotion {
    /// A request with every channel unrequested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every channel back to "not requested".
    pub fn reset(&mut self) {
        self.channels = [ChannelRequest::NONE; Channel::COUNT];
    }

    /// Set `channel` to `value` at `strength` (clamped into
    /// `[0, MAX_STRENGTH]`). Last write wins.
    pub fn set(&mut self, channel: Channel, value: f64, strength: f64) {
        let value = if channel.is_angular() {
            normalize_degrees(value)
        } else {
            value
        };
        self.channels[channel.index()] = ChannelRequest {
            value,
            strength: strength.clamp(0.0, MAX_STRENGTH),
        };
    }

    pub fn clear(&mut self, channel: Channel) {
        self.channels[channel.index()] = ChannelRequest::NONE;
    }

    pub fn set_vel(&mut self, vel: f64, strength: f64) {
        self.set(Channel::Vel, vel, strength);
    }

    pub fn set_trans_accel(&mut self, accel: f64, strength: f64) {
        self.set(Channel::TransAccel, accel, strength);
    }

    pub fn set_trans_decel(&mut self, decel: f64, strength: f64) {
        self.set(Channel::TransDecel, decel, strength);
    }

    pub fn set_rot_vel(&mut self, rot_vel: f64, strength: f64) {
        self.set(Channel::RotVel, rot_vel, strength);
    }

    pub fn set_heading(&mut self, heading: f64, strength: f64) {
        self.set(Channel::Heading, heading, strength);
    }

    pub fn set_delta_heading(&mut self, delta: f64, strength: f64) {
        self.set(Channel::DeltaHeading, delta, strength);
    }

    pub fn set_rot_accel(&mut self, accel: f64, strength: f64) {
        self.set(Channel::RotAccel, accel, strength);
    }

    pub fn set_rot_decel(&mut self, decel: f64, strength: f64) {
        self.set(Channel::RotDecel, decel, strength);
    }

    pub fn set_lat_vel(&mut self, lat_vel: f64, strength: f64) {
        self.set(Channel::LatVel, lat_vel, strength);
    }

    pub fn set_lat_accel(&mut self, accel: f64, strength: f64) {
        self.set(Channel::LatAccel, accel, strength);
    }

    pub fn set_lat_decel(&mut self, decel: f64, strength: f64) {
        self.set(Channel::LatDecel, decel, strength);
    }

    pub fn set_max_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxVel, max, strength);
    }

    pub fn set_max_neg_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxNegVel, max, strength);
    }

    pub fn set_max_rot_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxRotVel, max, strength);
    }

    pub fn set_max_neg_rot_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxNegRotVel, max, strength);
    }

    pub fn set_max_lat_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxLatVel, max, strength);
    }

    pub fn set_max_neg_lat_vel(&mut self, max: f64, strength: f64) {
        self.set(Channel::MaxNegLatVel, max, strength);
    }

    pub fn request(&self, channel: Channel) -> ChannelRequest {
        self.channels[channel.index()]
    }

    pub fn strength(&self, channel: Channel) -> f64 {
        self.channels[channel.index()].strength
    }

    pub fn is_requested(&self, channel: Channel) -> bool {
        self.channels[channel.index()].is_requested()
    }

    /// The requested value of `channel`, or `None` when the channel is not
    /// requested.
    pub fn get(&self, channel: Channel) -> Option<f64> {
        let req = self.channels[channel.index()];
        req.is_requested().then_some(req.value)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|c| !c.is_requested())
    }

    /// Requested channels in declaration order.
    pub fn requested(&self) -> impl Iterator<Item = (Channel, ChannelRequest)> + '_ {
        Channel::ALL
            .iter()
            .map(|&ch| (ch, self.channels[ch.index()]))
            .filter(|(_, req)| req.is_requested())
    }

    /// Merge a single request into `channel`.
    ///
    /// A stronger request overwrites the channel, an equally strong one is
    /// averaged with it (strength kept), and a request below
    /// [`MIN_STRENGTH`] is ignored.
    pub fn merge(&mut self, channel: Channel, value: f64, strength: f64) {
        if strength < MIN_STRENGTH {
            return;
        }
        let strength = strength.min(MAX_STRENGTH);
        let value = if channel.is_angular() {
            normalize_degrees(value)
        } else {
            value
        };
        let current = &mut self.channels[channel.index()];
        if !current.is_requested() || strength > current.strength {
            *current = ChannelRequest { value, strength };
        } else if strength == current.strength {
            current.value = average(channel, &[current.value, value]);
        }
    }

    /// [`merge`](Self::merge) every channel of `other` into `self`.
    pub fn merge_all(&mut self, other: &DesiredMotion) {
        for (channel, req) in other.requested() {
            self.merge(channel, req.value, req.strength);
        }
    }

    /// Merge a group of same-priority requests.
    ///
    /// Per channel the strongest request wins; requests sharing the top
    /// strength are averaged. The result does not depend on the order of
    /// `group`.
    pub fn combine(group: &[DesiredMotion]) -> DesiredMotion {
        let mut out = DesiredMotion::new();
        let mut values: Vec<f64> = Vec::with_capacity(group.len());
        for channel in Channel::ALL {
            let top = group
                .iter()
                .map(|d| d.request(channel))
                .filter(ChannelRequest::is_requested)
                .map(|r| r.strength.min(MAX_STRENGTH))
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
            let Some(top) = top else { continue };

            values.clear();
            values.extend(
                group
                    .iter()
                    .map(|d| d.request(channel))
                    .filter(|r| r.is_requested() && r.strength.min(MAX_STRENGTH) == top)
                    .map(|r| r.value),
            );
            values.sort_by(f64::total_cmp);
            out.channels[channel.index()] = ChannelRequest {
                value: average(channel, &values),
                strength: top,
            };
        }
        out
    }

    /// Fill `self` from a lower-priority request.
    ///
    /// A channel of `lower` is taken only where it is requested and strictly
    /// stronger than what `self` already holds.
    pub fn accumulate(&mut self, lower: &DesiredMotion) {
        for (channel, req) in lower.requested() {
            let current = &mut self.channels[channel.index()];
            if !current.is_requested() || req.strength > current.strength {
                *current = req;
            }
        }
    }
}

impl fmt::Display for DesiredMotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (channel, req) in self.requested() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}={:.1}@{:.2}", channel.label(), req.value, req.strength)?;
        }
        if first {
            write!(f, "<none>")?;
        }
        Ok(())
    }
}
