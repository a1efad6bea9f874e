// Connection channel: one byte-stream connection turned into events.
//
// A `Channel` wraps an already-established `TcpStream` (accepted by the host
// or connected by a client) and splits it into two independent directions:
//
// - **Read loop** (`start_reading`): a dedicated thread that reads frames,
//   decodes them, and pushes `ChannelEvent::MessageReceived` to the owner's
//   event sink. Undecodable payloads are logged and dropped. On EOF or a read
//   error it pushes `ChannelEvent::Disconnected` and exits for good.
// - **Writes** (`send`): synchronous, serialized behind a mutex so frames
//   from concurrent callers never interleave. A write failure raises the same
//   `Disconnected` event and closes the channel.
//
// The read loop never touches session state. It only hands immutable events
// to the sink, which forwards them into the owning session's mpsc queue.
//
// `Disconnected` is raised at most once per channel, whichever direction
// fails first. `close()` shuts the socket down exactly once; that makes any
// blocked read return so the loop terminates without interrupting the
// thread. An owner-initiated close does not raise `Disconnected`, since the
// owner already knows.

use std::fmt;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use partyqueue_protocol::{ConnectionId, Framing, ProtocolMessage};
use tracing::{debug, trace, warn};

use crate::error::ChannelError;

/// Events a channel reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    MessageReceived {
        peer: ConnectionId,
        message: ProtocolMessage,
    },
    Disconnected {
        peer: ConnectionId,
    },
}

/// Connection lifecycle. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Connecting,
    Open,
    Closed,
}

impl Liveness {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where a channel delivers its events.
pub type EventSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Forward channel events into an owner's mpsc queue.
pub fn event_sink<E>(tx: Sender<E>) -> EventSink
where
    E: From<ChannelEvent> + Send + 'static,
{
    Arc::new(move |event| {
        // The owner dropping its receiver means it is shutting down.
        let _ = tx.send(E::from(event));
    })
}

/// One point-to-point connection with an independent read loop.
pub struct Channel {
    peer: ConnectionId,
    framing: Framing,
    writer: Mutex<BufWriter<TcpStream>>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

/// State visible to both the read loop and the owner.
struct Shared {
    peer: ConnectionId,
    transport: TcpStream,
    sink: EventSink,
    liveness: AtomicU8,
    reported: AtomicBool,
    released: AtomicBool,
}

impl Shared {
    fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::SeqCst))
    }

    fn mark_closed(&self) {
        self.liveness.store(Liveness::Closed as u8, Ordering::SeqCst);
    }

    fn report_disconnected(&self) {
        self.mark_closed();
        if !self.reported.swap(true, Ordering::SeqCst) {
            debug!(peer = %self.peer, "channel disconnected");
            (self.sink)(ChannelEvent::Disconnected { peer: self.peer });
        }
    }

    fn release(&self) {
        self.mark_closed();
        if !self.released.swap(true, Ordering::SeqCst) {
            if let Err(error) = self.transport.shutdown(Shutdown::Both) {
                // Already torn down by the remote side.
                debug!(peer = %self.peer, %error, "transport shutdown");
            }
        }
    }
}

impl Channel {
    /// Wrap an established stream. The channel starts in `Connecting` and
    /// becomes `Open` once its read loop is running.
    pub fn open(
        peer: ConnectionId,
        stream: TcpStream,
        framing: Framing,
        sink: EventSink,
    ) -> std::io::Result<Self> {
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%peer, %error, "set_nodelay failed");
        }
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            peer,
            framing,
            writer: Mutex::new(writer),
            shared: Arc::new(Shared {
                peer,
                transport: stream,
                sink,
                liveness: AtomicU8::new(Liveness::Connecting as u8),
                reported: AtomicBool::new(false),
                released: AtomicBool::new(false),
            }),
            reader: None,
        })
    }

    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn liveness(&self) -> Liveness {
        self.shared.liveness()
    }

    pub fn is_open(&self) -> bool {
        self.liveness() != Liveness::Closed
    }

    /// Spawn the read loop. Calling it again is a no-op.
    pub fn start_reading(&mut self) -> std::io::Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let stream = self.shared.transport.try_clone()?;
        let shared = Arc::clone(&self.shared);
        let framing = self.framing;
        // Only a fresh channel becomes Open; a closed one stays closed.
        let _ = self.shared.liveness.compare_exchange(
            Liveness::Connecting as u8,
            Liveness::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let handle = thread::Builder::new()
            .name(format!("pq-read-{}", self.peer))
            .spawn(move || read_loop(BufReader::new(stream), framing, &shared))?;
        self.reader = Some(handle);
        Ok(())
    }

    /// Encode and write one message. Fails with `ChannelError::Closed` if the
    /// channel is already closed, and with `ChannelError::TooLarge` (leaving
    /// the channel open) if the message does not fit in one frame.
    pub fn send(&self, message: &ProtocolMessage) -> Result<(), ChannelError> {
        if self.liveness() == Liveness::Closed {
            return Err(ChannelError::Closed { peer: self.peer });
        }
        let payload = message.encode();
        let max = self.framing.max_payload();
        if payload.len() > max {
            warn!(peer = %self.peer, len = payload.len(), max, kind = message.kind(), "message too large, not sent");
            return Err(ChannelError::TooLarge {
                peer: self.peer,
                len: payload.len(),
                max,
            });
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(source) = self.framing.write_frame(&mut *writer, &payload) {
            warn!(peer = %self.peer, error = %source, kind = message.kind(), "write failed");
            self.shared.report_disconnected();
            self.shared.release();
            return Err(ChannelError::Io {
                peer: self.peer,
                source,
            });
        }
        trace!(peer = %self.peer, kind = message.kind(), "sent");
        Ok(())
    }

    /// Close the channel and release the transport. Safe to call any number
    /// of times, including while the read loop is failing.
    pub fn close(&self) {
        self.shared.reported.store(true, Ordering::SeqCst);
        self.shared.release();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read loop for a single channel. Runs in its own thread until the stream
/// fails or is shut down.
fn read_loop(mut reader: BufReader<TcpStream>, framing: Framing, shared: &Shared) {
    loop {
        match framing.read_frame(&mut reader) {
            Ok(payload) => match ProtocolMessage::decode(&payload) {
                Ok(message) => {
                    trace!(peer = %shared.peer, kind = message.kind(), "received");
                    (shared.sink)(ChannelEvent::MessageReceived {
                        peer: shared.peer,
                        message,
                    });
                }
                Err(error) => {
                    debug!(
                        peer = %shared.peer,
                        %error,
                        payload = %String::from_utf8_lossy(&payload),
                        "discarding undecodable payload"
                    );
                }
            },
            Err(error) => {
                debug!(peer = %shared.peer, %error, "read loop ended");
                shared.report_disconnected();
                return;
            }
        }
    }
}
