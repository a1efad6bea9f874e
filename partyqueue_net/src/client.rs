// Client runtime: connect to a host and follow its queue.
//
// `join` connects to a known endpoint; `discover_and_join` scans first and
// joins the first host the caller picks. Either way the result is a
// `ClientHandle` backed by two kinds of threads:
//
// - the channel's read loop, which pushes `ClientEvent::Channel`;
// - the event-loop thread, which owns the `ClientSession` and applies events.
//
// Add-track requests are fire-and-forget and go straight out through the
// shared channel from the caller's thread; the channel serializes writes.
// Once the host disconnects (or the link drops) the loop closes the channel,
// so later `add_track` calls fail with `ChannelError::Closed`. The loop keeps
// answering snapshots until the handle is dropped.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use partyqueue_protocol::{ConnectionId, ProtocolMessage};
use tracing::info;

use crate::channel::{Channel, ChannelEvent, event_sink};
use crate::client_session::{ClientNotification, ClientSession, ClientSnapshot};
use crate::collaborators::Catalog;
use crate::config::ClientConfig;
use crate::discovery::{DiscoveredHost, EndpointId, LanDiscovery};
use crate::error::{Error, Result};

/// The host is the only peer a client talks to.
const HOST_CONNECTION: ConnectionId = ConnectionId(0);

enum ClientEvent {
    Channel(ChannelEvent),
    Snapshot(Sender<ClientSnapshot>),
    Leave,
}

impl From<ChannelEvent> for ClientEvent {
    fn from(event: ChannelEvent) -> Self {
        Self::Channel(event)
    }
}

/// Handle to a joined client session.
pub struct ClientHandle {
    channel: Arc<Channel>,
    user_id: String,
    tx: Sender<ClientEvent>,
    thread: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Ask the host to queue `track_uri`. No acknowledgement; the result only
    /// shows up as a `TrackAdded` broadcast.
    pub fn add_track(&self, track_uri: impl Into<String>) -> Result<()> {
        let request = ProtocolMessage::AddTrackRequest {
            track_uri: track_uri.into(),
            requester_id: self.user_id.clone(),
        };
        self.channel.send(&request)?;
        Ok(())
    }

    /// Current session state, taken on the event-loop thread.
    pub fn snapshot(&self) -> Result<ClientSnapshot> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(ClientEvent::Snapshot(reply_tx))
            .map_err(|_| Error::SessionStopped)?;
        reply_rx.recv().map_err(|_| Error::SessionStopped)
    }

    /// Leave the queue and wait for the session to wind down.
    pub fn leave(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = self.tx.send(ClientEvent::Leave);
            let _ = handle.join();
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Connect to `endpoint` and start following its queue.
pub fn join<C: Catalog>(
    config: ClientConfig,
    discovery: &LanDiscovery,
    endpoint: EndpointId,
    catalog: C,
    notify: Option<Sender<ClientNotification>>,
) -> Result<ClientHandle> {
    let session = ClientSession::new(config, catalog, notify);
    connect_session(session, discovery, endpoint)
}

/// Scan for hosts, surfacing each one to `notify`, and join the first one
/// `choose` accepts. Fails with `Error::NoHostSelected` if the scan ends
/// first.
pub fn discover_and_join<C, F>(
    config: ClientConfig,
    discovery: &LanDiscovery,
    catalog: C,
    notify: Option<Sender<ClientNotification>>,
    mut choose: F,
) -> Result<ClientHandle>
where
    C: Catalog,
    F: FnMut(&DiscoveredHost) -> bool,
{
    let mut session = ClientSession::new(config, catalog, notify);
    session.begin_discovery();
    for host in discovery.scan()? {
        session.host_found(&host);
        if choose(&host) {
            return connect_session(session, discovery, host.endpoint);
        }
    }
    Err(Error::NoHostSelected)
}

fn connect_session<C: Catalog>(
    mut session: ClientSession<C>,
    discovery: &LanDiscovery,
    endpoint: EndpointId,
) -> Result<ClientHandle> {
    session.begin_connect(endpoint);
    let stream = match discovery.connect(&endpoint) {
        Ok(stream) => stream,
        Err(error) => {
            session.connect_failed();
            return Err(error.into());
        }
    };

    let (tx, rx) = mpsc::channel();
    let mut channel = Channel::open(
        HOST_CONNECTION,
        stream,
        session.config().framing,
        event_sink(tx.clone()),
    )?;
    channel.start_reading()?;
    session.connected();
    info!(%endpoint, "joined host");

    let channel = Arc::new(channel);
    let user_id = session.config().user_id.clone();
    let loop_channel = Arc::clone(&channel);
    let thread = thread::Builder::new()
        .name("pq-client".into())
        .spawn(move || run_client(session, &loop_channel, rx))?;

    Ok(ClientHandle {
        channel,
        user_id,
        tx,
        thread: Some(thread),
    })
}

/// Main client loop. Runs until the handle leaves.
fn run_client<C: Catalog>(
    mut session: ClientSession<C>,
    channel: &Channel,
    rx: Receiver<ClientEvent>,
) {
    while let Ok(event) = rx.recv() {
        match event {
            ClientEvent::Channel(ChannelEvent::MessageReceived { message, .. }) => {
                session.handle_message(message);
                if session.is_disconnected() {
                    channel.close();
                }
            }
            ClientEvent::Channel(ChannelEvent::Disconnected { .. }) => {
                session.handle_disconnected();
            }
            ClientEvent::Snapshot(reply) => {
                let _ = reply.send(session.snapshot());
            }
            ClientEvent::Leave => break,
        }
    }
    channel.close();
    session.leave();
}
