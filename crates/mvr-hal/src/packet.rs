//! The receiver → cycle packet boundary.
//!
//! A receiver thread owns the raw link and pushes every decoded frame into a
//! bounded channel through a [`PacketSender`]. The control cycle drains the
//! other end with [`PacketQueue::try_pop`] at the start of every tick and hands
//! each packet to a [`PacketDispatcher`]. Packets only ever flow from the
//! receiver to the cycle.
//!
//! ```
//! use mvr_hal::packet::packet_channel;
//! use mvr_types::RawPacket;
//!
//! let (tx, queue) = packet_channel(8);
//! tx.try_send(RawPacket::new(0x32, vec![1, 2, 3])).unwrap();
//! assert_eq!(queue.try_pop().map(|p| p.kind), Some(0x32));
//! assert!(queue.try_pop().is_none());
//! ```

use crossbeam_channel::{self as cc, TryRecvError, TrySendError};
use mvr_types::{MvrError, RawPacket, RobotState};
use tracing::{debug, warn};

/// Create a bounded packet channel holding at most `capacity` packets.
pub fn packet_channel(capacity: usize) -> (PacketSender, PacketQueue) {
    let (tx, rx) = cc::bounded(capacity.max(1));
    (PacketSender { inner: tx }, PacketQueue { inner: rx })
}

/// Producer half, owned by the receiver thread.
#[derive(Debug, Clone)]
pub struct PacketSender {
    inner: cc::Sender<RawPacket>,
}

impl PacketSender {
    /// Send a packet, blocking while the queue is full.
    pub fn send(&self, packet: RawPacket) -> Result<(), MvrError> {
        self.inner.send(packet).map_err(|_| MvrError::ChannelClosed)
    }

    /// Send without blocking.
    pub fn try_send(&self, packet: RawPacket) -> Result<(), MvrError> {
        match self.inner.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(MvrError::ChannelFull),
            Err(TrySendError::Disconnected(_)) => Err(MvrError::ChannelClosed),
        }
    }
}

/// Consumer half, drained by the Packet Handler phase.
#[derive(Debug)]
pub struct PacketQueue {
    inner: cc::Receiver<RawPacket>,
}

impl PacketQueue {
    /// Pop the oldest pending packet, if any. Never blocks.
    pub fn try_pop(&self) -> Option<RawPacket> {
        match self.inner.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Interprets one kind of packet and folds it into the robot state.
pub trait PacketHandler: Send {
    fn name(&self) -> &str;

    /// Returns `true` when the packet was consumed; later handlers are then
    /// not consulted.
    fn handle(&mut self, packet: &RawPacket, state: &mut RobotState) -> bool;
}

/// A [`PacketHandler`] built from a closure.
pub struct FnPacketHandler<F> {
    name: String,
    f: F,
}

impl<F> PacketHandler for FnPacketHandler<F>
where
    F: FnMut(&RawPacket, &mut RobotState) -> bool + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, packet: &RawPacket, state: &mut RobotState) -> bool {
        (self.f)(packet, state)
    }
}

/// Wrap a closure as a named packet handler.
pub fn handler_fn<F>(name: impl Into<String>, f: F) -> FnPacketHandler<F>
where
    F: FnMut(&RawPacket, &mut RobotState) -> bool + Send,
{
    FnPacketHandler {
        name: name.into(),
        f,
    }
}

/// Ordered list of packet handlers.
#[derive(Default)]
pub struct PacketDispatcher {
    handlers: Vec<Box<dyn PacketHandler>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Rejected (returns `false`) when a handler with the
    /// same name is already registered.
    pub fn add(&mut self, handler: Box<dyn PacketHandler>) -> bool {
        if self.handlers.iter().any(|h| h.name() == handler.name()) {
            warn!(handler = handler.name(), "packet handler already registered");
            return false;
        }
        self.handlers.push(handler);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name() != name);
        self.handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer `packet` to each handler in registration order until one
    /// consumes it. Returns whether any handler did.
    pub fn dispatch(&mut self, packet: &RawPacket, state: &mut RobotState) -> bool {
        for handler in &mut self.handlers {
            if handler.handle(packet, state) {
                return true;
            }
        }
        debug!(kind = packet.kind, len = packet.payload.len(), "unhandled packet");
        false
    }
}
