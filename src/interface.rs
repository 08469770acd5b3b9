use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::capture::{CaptureWriter, ReplayPacer};
use crate::codec::{FrameStats, LocoNetCodec};
use crate::error::Error;
use crate::message::Message;

mod dummy;

pub use dummy::DummyPort;

/// How fast replayed capture data is fed to the dispatcher.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Pacing {
    /// Deliver frames as fast as they decode.
    FastAsPossible,
    /// Sleep between frames so the gaps match the recorded timestamps.
    Realtime,
}

/// Where the interface reads and writes its bytes.
#[derive(Debug, Clone)]
pub enum Transport {
    /// A live serial port, opened 8N1.
    Serial {
        /// Path to the port, e.g. `/dev/ttyACM0`.
        path: String,
        /// Baud rate; the DR5000 runs its LocoNet tap at 57600.
        baud: u32,
    },
    /// A previously captured byte stream; writes are discarded.
    Replay {
        /// Path to the capture file.
        path: PathBuf,
        /// Replay pacing.
        pacing: Pacing,
    },
    /// No physical port; bytes loop through an in-memory pair.
    Dummy,
}

type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;
type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

type SharedCapture = Arc<Mutex<Option<CaptureWriter>>>;

const DEFAULT_OUTBOUND_CAPACITY: usize = 32;
const DEFAULT_INBOUND_CAPACITY: usize = 256;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_DUMMY_PIPE_CAPACITY: usize = 1 << 20;

/// Builder for an [`Interface`].
#[derive(Debug)]
pub struct InterfaceBuilder {
    transport: Transport,
    capture: Option<(PathBuf, bool)>,
    outbound_capacity: usize,
    inbound_capacity: usize,
    drain_timeout: Duration,
    dummy_pipe_capacity: usize,
}

impl InterfaceBuilder {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            capture: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            dummy_pipe_capacity: DEFAULT_DUMMY_PIPE_CAPACITY,
        }
    }

    /// An interface over a live serial port.
    pub fn serial(path: &str, baud: u32) -> Self {
        Self::new(Transport::Serial {
            path: path.to_string(),
            baud,
        })
    }

    /// An interface replaying a capture file.
    pub fn replay<P: Into<PathBuf>>(path: P, pacing: Pacing) -> Self {
        Self::new(Transport::Replay {
            path: path.into(),
            pacing,
        })
    }

    /// An interface over an in-memory port.
    pub fn dummy() -> Self {
        Self::new(Transport::Dummy)
    }

    /// Capture all traffic (both directions) to a file, optionally preceded
    /// by timestamp pseudo-frames.
    pub fn capture<P: Into<PathBuf>>(mut self, path: P, timestamps: bool) -> Self {
        self.capture = Some((path.into(), timestamps));
        self
    }

    /// Size of the outbound queue. Senders block once it is full.
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Size of the inbound queue. On overflow the oldest messages are
    /// dropped and counted; the bus keeps running regardless.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// How long [`Interface::shutdown`] waits for pending writes.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Byte capacity of the in-memory pipes of a dummy transport.
    pub fn dummy_pipe_capacity(mut self, capacity: usize) -> Self {
        self.dummy_pipe_capacity = capacity.max(1);
        self
    }

    /// Open the transport and spawn the reader, writer and dispatcher.
    pub async fn build(self) -> Result<Interface, Error> {
        let replaying = matches!(self.transport, Transport::Replay { .. });
        if self.capture.is_some() && replaying {
            return Err(Error::BadConfig(
                "cannot capture while replaying a capture".into(),
            ));
        }

        let stats = Arc::new(FrameStats::default());
        let codec = LocoNetCodec::new(stats.clone());

        let capture: SharedCapture = match &self.capture {
            Some((path, timestamps)) => Arc::new(Mutex::new(Some(
                CaptureWriter::create(path, *timestamps).await?,
            ))),
            None => Arc::new(Mutex::new(None)),
        };

        let (source, sink, dummy, pacer): (
            BoxedSource,
            BoxedSink,
            Option<DummyPort>,
            Option<ReplayPacer>,
        ) = match &self.transport {
            Transport::Serial { path, baud } => {
                let stream = tokio_serial::new(path, *baud)
                    .data_bits(tokio_serial::DataBits::Eight)
                    .parity(tokio_serial::Parity::None)
                    .stop_bits(tokio_serial::StopBits::One)
                    .open_native_async()?;
                info!(%path, %baud, "serial port open");
                let (read, write) = tokio::io::split(stream);
                (Box::new(read), Box::new(write), None, None)
            }
            Transport::Replay { path, pacing } => {
                let file = tokio::fs::File::open(path).await?;
                debug!(?path, ?pacing, "replaying captured traffic");
                (
                    Box::new(file),
                    Box::new(tokio::io::sink()),
                    None,
                    Some(ReplayPacer::new(*pacing == Pacing::Realtime)),
                )
            }
            Transport::Dummy => {
                let (port, read, write) = DummyPort::new(self.dummy_pipe_capacity);
                debug!("running against a dummy port");
                (read, write, Some(port), None)
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = broadcast::channel(self.inbound_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(CallbackRegistry::default());
        let dropped_inbound = Arc::new(AtomicU64::new(0));

        let reader = tokio::spawn(read_task(
            source,
            codec.clone(),
            inbound_tx.clone(),
            if replaying { None } else { Some(capture.clone()) },
            pacer,
            closed.clone(),
        ));
        let writer = tokio::spawn(write_task(
            sink,
            codec,
            outbound_rx,
            capture.clone(),
            closed.clone(),
        ));
        let dispatcher = tokio::spawn(dispatch_task(
            inbound_rx,
            callbacks.clone(),
            dropped_inbound.clone(),
        ));

        Ok(Interface {
            outbound: RwLock::new(Some(outbound_tx)),
            inbound: inbound_tx,
            callbacks,
            closed,
            stats,
            dropped_inbound,
            capture,
            drain_timeout: self.drain_timeout,
            workers: Mutex::new(Some(Workers {
                reader,
                writer,
                dispatcher,
            })),
            dummy: std::sync::Mutex::new(dummy),
        })
    }
}

/// Token identifying a registered message callback.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CallbackToken(Uuid);

type Callback = Box<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct CallbackRegistry {
    entries: RwLock<Vec<(CallbackToken, Callback)>>,
}

impl CallbackRegistry {
    fn register(&self, callback: Callback) -> CallbackToken {
        let token = CallbackToken(Uuid::new_v4());
        self.entries
            .write()
            .expect("callback registry lock poisoned")
            .push((token, callback));
        token
    }

    fn unregister(&self, token: CallbackToken) -> bool {
        let mut entries = self
            .entries
            .write()
            .expect("callback registry lock poisoned");
        let before = entries.len();
        entries.retain(|(registered, _)| *registered != token);
        entries.len() != before
    }

    /// Invoke every callback in registration order. A panicking callback is
    /// logged and does not disturb the rest of the dispatch.
    fn dispatch(&self, message: &Message) {
        let entries = self
            .entries
            .read()
            .expect("callback registry lock poisoned");
        for (token, callback) in entries.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(?token, "message callback panicked");
            }
        }
    }
}

struct Workers {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// A thread-safe LocoNet transceiver.
///
/// Three workers run behind the handle: a reader framing the byte source, a
/// writer draining the outbound queue, and a dispatcher fanning inbound
/// messages out to registered callbacks. Async consumers subscribe to the
/// same inbound stream with [`Interface::subscribe`].
pub struct Interface {
    outbound: RwLock<Option<mpsc::Sender<Message>>>,
    inbound: broadcast::Sender<Message>,
    callbacks: Arc<CallbackRegistry>,
    closed: Arc<AtomicBool>,
    stats: Arc<FrameStats>,
    dropped_inbound: Arc<AtomicU64>,
    capture: SharedCapture,
    drain_timeout: Duration,
    workers: Mutex<Option<Workers>>,
    dummy: std::sync::Mutex<Option<DummyPort>>,
}

impl Interface {
    /// Enqueue a message for transmission.
    ///
    /// Returns once the message is queued, never waiting on actual IO; if
    /// the queue is full this waits for the writer to drain (backpressure).
    /// Fails fast with [`Error::TransportClosed`] after EOF, a write error
    /// or shutdown.
    pub async fn send(&self, message: Message) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportClosed);
        }
        let sender = self
            .outbound
            .read()
            .expect("outbound sender lock poisoned")
            .clone()
            .ok_or(Error::TransportClosed)?;
        sender
            .send(message)
            .await
            .map_err(|_| Error::TransportClosed)
    }

    /// Subscribe to the inbound message stream.
    ///
    /// Messages arrive in wire order. A receiver that falls behind the
    /// inbound queue capacity loses the oldest messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inbound.subscribe()
    }

    /// Register a callback invoked by the dispatcher for every inbound
    /// message, in registration order.
    ///
    /// Callbacks run on the dispatcher worker and must not block for long;
    /// [`Interface::send`] from a callback is fine.
    pub fn register_callback<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.callbacks.register(Box::new(callback))
    }

    /// Remove a previously registered callback. Safe to call repeatedly;
    /// returns whether the token was still registered.
    pub fn unregister_callback(&self, token: CallbackToken) -> bool {
        self.callbacks.unregister(token)
    }

    /// Whether the transport has stopped carrying traffic.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Counters for wire noise the framer recovered from.
    pub fn frame_stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Inbound messages dropped because the queue overflowed.
    pub fn dropped_inbound(&self) -> u64 {
        self.dropped_inbound.load(Ordering::Relaxed)
    }

    /// For a dummy transport, the far end of the in-memory port. The first
    /// caller takes it; the port stays alive inside the interface otherwise.
    pub fn take_dummy_port(&self) -> Option<DummyPort> {
        self.dummy
            .lock()
            .expect("dummy port lock poisoned")
            .take()
    }

    /// Stop the workers: pending writes are drained (bounded by the drain
    /// timeout), the reader and dispatcher stop, and the capture sink gets
    /// a final flush.
    ///
    /// Idempotent, and safe to call concurrently; every call returns only
    /// after the workers are down.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let mut workers = self.workers.lock().await;
        let Some(Workers {
            reader,
            writer,
            dispatcher,
        }) = workers.take()
        else {
            return Ok(());
        };

        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender lets the writer drain the queue and exit.
        self.outbound
            .write()
            .expect("outbound sender lock poisoned")
            .take();

        let writer_abort = writer.abort_handle();
        if tokio::time::timeout(self.drain_timeout, writer)
            .await
            .is_err()
        {
            warn!("writer did not drain in time, aborting it");
            writer_abort.abort();
        }

        reader.abort();
        let _ = reader.await;
        dispatcher.abort();
        let _ = dispatcher.await;

        if let Some(capture) = self.capture.lock().await.take() {
            if let Err(e) = capture.close().await {
                warn!(%e, "could not flush the capture file");
            }
        }

        info!("interface shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_task(
    source: BoxedSource,
    codec: LocoNetCodec,
    inbound: broadcast::Sender<Message>,
    capture: Option<SharedCapture>,
    mut pacer: Option<ReplayPacer>,
    closed: Arc<AtomicBool>,
) {
    let mut frames = FramedRead::new(source, codec);
    while let Some(next) = frames.next().await {
        match next {
            Ok(message) => {
                if let Some(capture) = &capture {
                    if let Some(writer) = capture.lock().await.as_mut() {
                        if let Err(e) = writer.append(&message).await {
                            warn!(%e, "capture write failed");
                        }
                    }
                }
                if let Some(pacer) = pacer.as_mut() {
                    if pacer.observe(&message).await {
                        continue;
                    }
                }
                trace!(%message, "rx");
                if inbound.send(message).is_err() {
                    debug!("no inbound consumers left");
                    break;
                }
            }
            Err(e) => {
                error!(%e, "transport read failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    debug!("reader finished");
}

async fn write_task(
    sink: BoxedSink,
    codec: LocoNetCodec,
    mut outbound: mpsc::Receiver<Message>,
    capture: SharedCapture,
    closed: Arc<AtomicBool>,
) {
    let mut frames = FramedWrite::new(sink, codec);
    while let Some(message) = outbound.recv().await {
        trace!(%message, "tx");
        if let Err(e) = frames.send(message.clone()).await {
            error!(%e, "transport write failed, closing the interface");
            closed.store(true, Ordering::SeqCst);
            outbound.close();
            break;
        }
        if let Some(writer) = capture.lock().await.as_mut() {
            if let Err(e) = writer.append(&message).await {
                warn!(%e, "capture write failed");
            }
        }
    }
    debug!("writer finished");
}

async fn dispatch_task(
    mut inbound: broadcast::Receiver<Message>,
    callbacks: Arc<CallbackRegistry>,
    dropped: Arc<AtomicU64>,
) {
    loop {
        match inbound.recv().await {
            Ok(message) => callbacks.dispatch(&message),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                dropped.fetch_add(missed, Ordering::Relaxed);
                warn!(missed, "inbound queue overflowed, dropped oldest messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("dispatcher finished");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn injected_frames_reach_subscribers() {
        let interface = InterfaceBuilder::dummy().build().await.unwrap();
        let mut port = interface.take_dummy_port().unwrap();
        let mut messages = interface.subscribe();

        port.inject(&Message::GpOn).await.unwrap();
        port.inject(&Message::LocoSpd { slot: 5, speed: 40 })
            .await
            .unwrap();

        assert_eq!(messages.recv().await.unwrap(), Message::GpOn);
        assert_eq!(
            messages.recv().await.unwrap(),
            Message::LocoSpd { slot: 5, speed: 40 }
        );
    }

    #[tokio::test]
    async fn sent_messages_appear_on_the_wire() {
        let interface = InterfaceBuilder::dummy().build().await.unwrap();
        let mut port = interface.take_dummy_port().unwrap();

        interface.send(Message::GpOff).await.unwrap();
        assert_eq!(port.next_outbound().await, Some(Message::GpOff));
    }

    #[tokio::test]
    async fn callbacks_fire_in_registration_order() {
        let interface = InterfaceBuilder::dummy().build().await.unwrap();
        let mut port = interface.take_dummy_port().unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = order.clone();
        interface.register_callback(move |_| first.lock().unwrap().push("first"));
        let second = order.clone();
        let token = interface.register_callback(move |_| second.lock().unwrap().push("second"));

        port.inject(&Message::GpOn).await.unwrap();
        // Callback dispatch runs on its own worker; poll until it caught up.
        tokio::time::timeout(Duration::from_secs(5), async {
            while order.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callbacks should have fired");

        assert!(interface.unregister_callback(token));
        assert!(!interface.unregister_callback(token));

        let seen = order.lock().unwrap().clone();
        assert_eq!(seen, ["first", "second"]);
    }
}
