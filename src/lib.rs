#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// The LocoNet message family: opcodes, typed frames, checksums.
pub mod message;

/// Framing between the raw byte stream and messages, with resync.
pub mod codec;

/// The transceiver over a serial port, a capture file or a dummy port.
pub mod interface;

/// Capture files and replay pacing.
pub mod capture;

/// The mirrored layout entities: sensors, switches, slots.
pub mod state;

/// The layout state mirror.
pub mod scrollkeeper;

/// High-level layout commands for scripts and throttles.
pub mod script;

/// Relates to config files.
pub mod config;

/// The command line interface.
pub mod cli;

/// Logging/tracing setup.
pub mod logging;

/// Possible errors in this library.
pub mod error;

/// The snapshot web server for browser views.
pub mod server;

/// Handles incoming websockets.
pub(crate) mod websocket;
