//! `mvr-hal` – Hardware boundary
//!
//! Everything the control core needs from the outside world, expressed as
//! narrow interfaces so the real robot link and the simulator are
//! interchangeable.
//!
//! # Modules
//!
//! - [`command_sink`] – [`CommandSink`][command_sink::CommandSink]: the device
//!   command sink that executes rounded motion commands.
//! - [`packet`] – the bounded receiver → cycle packet queue
//!   ([`packet_channel`][packet::packet_channel]) and the
//!   [`PacketDispatcher`][packet::PacketDispatcher] that routes packets to
//!   [`PacketHandler`][packet::PacketHandler]s.
//! - [`sim`] – an in-process simulated drive, command sink and receiver
//!   thread for tests and headless runs.

pub mod command_sink;
pub mod packet;
pub mod sim;

pub use command_sink::CommandSink;
pub use packet::{PacketDispatcher, PacketHandler, PacketQueue, PacketSender, handler_fn, packet_channel};
pub use sim::{
    MotorSample, SharedSimDrive, SimCommandLog, SimCommandSink, SimDrive, SimMotorHandler, SimPacketSource,
};
