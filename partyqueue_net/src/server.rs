// Host runtime: advertising plus the session event loop.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Accept thread** (owned by `discovery::Advertising`): pushes
//   `HostEvent::Incoming` for every new TCP connection.
// - **Channel read loops** (one per client, see `channel.rs`): push
//   `HostEvent::Channel` for each decoded message and for disconnects.
// - **Handle calls** (`HostHandle`): push local commands such as playback
//   advancement or host-local add-track.
// - **Event-loop thread**: owns the `HostSession` and applies events one at a
//   time. It is the only thread that touches queue state.
//
// Shutdown: `HostHandle::stop` (or dropping the handle) sends
// `HostEvent::Stop`. The loop stops advertising, lets the session broadcast
// `HostDisconnect` and close every channel, and exits. Closing the channels
// unblocks their read loops.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::channel::{ChannelEvent, EventSink, event_sink};
use crate::collaborators::PlaybackEngine;
use crate::config::HostConfig;
use crate::discovery::{Advertising, IncomingConnectionRequest, LanDiscovery};
use crate::error::{Error, Result};
use crate::host_session::{HostNotification, HostSession, HostSnapshot};

/// Everything the host event loop reacts to.
enum HostEvent {
    Incoming(IncomingConnectionRequest),
    Channel(ChannelEvent),
    PlaybackAdvanced,
    AddLocalTrack(String),
    Snapshot(Sender<HostSnapshot>),
    Stop,
}

impl From<IncomingConnectionRequest> for HostEvent {
    fn from(request: IncomingConnectionRequest) -> Self {
        Self::Incoming(request)
    }
}

impl From<ChannelEvent> for HostEvent {
    fn from(event: ChannelEvent) -> Self {
        Self::Channel(event)
    }
}

/// Handle returned by `start_host` to control the running host.
pub struct HostHandle {
    tx: Sender<HostEvent>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl HostHandle {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Local playback finished a track; move to the next one.
    pub fn playback_advanced(&self) -> Result<()> {
        self.send(HostEvent::PlaybackAdvanced)
    }

    /// Queue a track as the host user.
    pub fn add_track(&self, track_uri: impl Into<String>) -> Result<()> {
        self.send(HostEvent::AddLocalTrack(track_uri.into()))
    }

    /// Current session state, taken on the event-loop thread.
    pub fn snapshot(&self) -> Result<HostSnapshot> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(HostEvent::Snapshot(reply_tx))?;
        reply_rx.recv().map_err(|_| Error::SessionStopped)
    }

    /// Signal the host to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn send(&self, event: HostEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::SessionStopped)
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.tx.send(HostEvent::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start advertising and run the host on a background thread. The returned
/// handle reports the bound address (useful when port 0 lets the OS pick).
pub fn start_host(
    config: HostConfig,
    discovery: &LanDiscovery,
    playback: Box<dyn PlaybackEngine>,
    notify: Option<Sender<HostNotification>>,
) -> Result<HostHandle> {
    let (tx, rx) = mpsc::channel();
    let mut session = HostSession::new(config, playback, notify);
    let advertising = discovery.advertise(&session.advertisement(), tx.clone())?;
    session.mark_advertising();
    let local_addr = advertising.local_addr();

    let sink = event_sink(tx.clone());
    let thread = thread::Builder::new()
        .name("pq-host".into())
        .spawn(move || run_host(session, advertising, rx, sink))?;

    Ok(HostHandle {
        tx,
        local_addr,
        thread: Some(thread),
    })
}

/// Main host loop. Runs until `HostEvent::Stop`.
fn run_host(
    mut session: HostSession,
    mut advertising: Advertising,
    rx: Receiver<HostEvent>,
    sink: EventSink,
) {
    while let Ok(event) = rx.recv() {
        match event {
            HostEvent::Incoming(request) => {
                let endpoint = request.endpoint();
                if let Err(error) = session.accept(request, sink.clone()) {
                    warn!(%endpoint, %error, "failed to accept connection");
                }
            }
            HostEvent::Channel(event) => session.handle_channel_event(event),
            HostEvent::PlaybackAdvanced => {
                session.advance();
            }
            HostEvent::AddLocalTrack(track_uri) => {
                session.add_local_track(track_uri);
            }
            HostEvent::Snapshot(reply) => {
                let _ = reply.send(session.snapshot());
            }
            HostEvent::Stop => break,
        }
    }
    advertising.stop();
    session.shutdown();
    info!("host stopped");
}
