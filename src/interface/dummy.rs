//! An in-memory stand-in for the serial port, useful for running the
//! monitor without hardware and for exercising the interface in tests.

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::codec::FramedRead;

use crate::codec::LocoNetCodec;
use crate::message::Message;

/// The far end of a dummy transport.
///
/// What the interface writes can be read back here as decoded messages, and
/// bytes fed in here arrive at the interface reader as if they came from the
/// bus. Dropping the port closes both pipes, which the interface sees as a
/// transport EOF.
#[derive(Debug)]
pub struct DummyPort {
    inject: DuplexStream,
    outbound: FramedRead<DuplexStream, LocoNetCodec>,
}

impl DummyPort {
    /// The port plus the read and write halves handed to the interface.
    ///
    /// `capacity` sizes the in-memory pipes; a generous value keeps an
    /// unobserved port from stalling the writer, a tiny one lets tests
    /// exercise backpressure.
    pub(crate) fn new(
        capacity: usize,
    ) -> (
        Self,
        Box<dyn AsyncRead + Send + Unpin>,
        Box<dyn AsyncWrite + Send + Unpin>,
    ) {
        let (inject, interface_read) = tokio::io::duplex(capacity);
        let (interface_write, outbound) = tokio::io::duplex(capacity);
        (
            Self {
                inject,
                outbound: FramedRead::new(outbound, LocoNetCodec::default()),
            },
            Box::new(interface_read),
            Box::new(interface_write),
        )
    }

    /// Feed a message to the interface as if it arrived from the bus.
    pub async fn inject(&mut self, message: &Message) -> std::io::Result<()> {
        self.inject_bytes(&message.encode()).await
    }

    /// Feed raw bytes to the interface reader.
    pub async fn inject_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inject.write_all(bytes).await
    }

    /// The next message the interface put on the wire, or `None` once the
    /// interface has shut down.
    pub async fn next_outbound(&mut self) -> Option<Message> {
        loop {
            match self.outbound.next().await? {
                Ok(message) => return Some(message),
                Err(_) => return None,
            }
        }
    }
}
