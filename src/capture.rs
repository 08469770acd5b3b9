use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::message::Message;

/// Appends raw frames to a capture file.
///
/// The format is a flat concatenation of frames with no header or index;
/// the regular framer reads it back. With `timestamps` on, every frame is
/// preceded by a [`Message::CaptureTimeStamp`] pseudo-frame so a later
/// replay can reproduce the original timing.
#[derive(Debug)]
pub struct CaptureWriter {
    file: File,
    timestamps: bool,
}

impl CaptureWriter {
    /// Create (or truncate) the capture file.
    pub async fn create<P: AsRef<Path>>(path: P, timestamps: bool) -> std::io::Result<Self> {
        let file = File::create(&path).await?;
        debug!(path = ?path.as_ref(), timestamps, "capturing traffic");
        Ok(Self { file, timestamps })
    }

    /// Append one frame, re-encoded from the message.
    pub async fn append(&mut self, message: &Message) -> std::io::Result<()> {
        if self.timestamps {
            let stamp = Message::timestamp(chrono::Local::now().time());
            self.file.write_all(&stamp.encode()).await?;
        }
        self.file.write_all(&message.encode()).await
    }

    /// Flush and sync the file out.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

const HUNDREDTHS_PER_DAY: u32 = 24 * 60 * 60 * 100;

/// Turns consecutive capture timestamps into sleeps during replay.
///
/// Timestamp pseudo-messages are consumed here and never dispatched; under
/// fast pacing they are swallowed without sleeping.
#[derive(Debug)]
pub(crate) struct ReplayPacer {
    realtime: bool,
    last: Option<u32>,
}

impl ReplayPacer {
    pub(crate) fn new(realtime: bool) -> Self {
        Self {
            realtime,
            last: None,
        }
    }

    /// Returns `true` when the message was a timestamp and has been
    /// consumed, sleeping out the recorded gap first if pacing is on.
    pub(crate) async fn observe(&mut self, message: &Message) -> bool {
        let Some(now) = message.hundredths_of_day() else {
            return false;
        };
        if self.realtime {
            if let Some(last) = self.last {
                // A recording may run over midnight.
                let gap = if now >= last {
                    now - last
                } else {
                    now + HUNDREDTHS_PER_DAY - last
                };
                trace!(gap, "pacing replay");
                tokio::time::sleep(Duration::from_millis(gap as u64 * 10)).await;
            }
        }
        self.last = Some(now);
        true
    }
}
