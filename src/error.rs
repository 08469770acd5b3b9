use std::io;

use thiserror::Error;

/// Errors this library surfaces to callers.
///
/// Wire noise (stray bytes, truncated frames, checksum failures) never shows
/// up here; the framer recovers locally and counts it in
/// [`FrameStats`](crate::codec::FrameStats).
#[derive(Debug, Error)]
pub enum Error {
    /// The interface has seen EOF or a write failure and will not carry any
    /// further traffic.
    #[error("the interface is closed")]
    TransportClosed,

    /// A command referenced an entity that stayed unknown after repeated
    /// status requests.
    #[error("no state for {0} after repeated status requests")]
    UnknownEntity(String),

    /// A `wait_for_*` deadline expired before the layout reached the
    /// requested state.
    #[error("timed out waiting for the layout")]
    Timeout,

    /// Out-of-range slot number, speed or function index.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration is inconsistent.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// Opening or driving the serial port failed.
    #[error("serial port problem")]
    Serial(#[from] tokio_serial::Error),

    /// Underlying IO problem.
    #[error("underlying IO problem")]
    Io(#[from] io::Error),
}

impl Error {
    /// The message of a [`Error::BadConfig`], if that is what this is.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(message) = self {
            Some(message)
        } else {
            None
        }
    }
}
