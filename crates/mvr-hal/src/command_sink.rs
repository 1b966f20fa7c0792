//! Generic [`CommandSink`] trait for the device that executes motion commands.
//!
//! The state reflector only ever talks to this trait, so a serial robot
//! driver, a network bridge and the in-process simulator are interchangeable.

use mvr_types::{MotionCommand, MvrError};

/// The device command sink: accepts discrete, already-rounded motion commands.
pub trait CommandSink: Send {
    /// Stable identifier for logs, e.g. `"serial:/dev/ttyS0"` or `"sim"`.
    fn id(&self) -> &str;

    /// Transmit `command` to the device.
    ///
    /// # Errors
    ///
    /// Returns [`MvrError::Hardware`] when the command could not be delivered.
    /// The caller treats the command as not sent and retries on a later tick.
    fn send(&mut self, command: MotionCommand) -> Result<(), MvrError>;
}

impl<S: CommandSink + ?Sized> CommandSink for Box<S> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn send(&mut self, command: MotionCommand) -> Result<(), MvrError> {
        (**self).send(command)
    }
}
