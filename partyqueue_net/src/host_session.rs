// Host-side session state machine.
//
// `HostSession` owns the authoritative `PlaylistState`, one `Channel` per
// joined client, and the requester roster. `server.rs` drives it from a
// single event-loop thread; every method here runs on that thread, so there
// is no internal locking. Channel read loops only push events into the loop.
//
// State machine: Idle -> Advertising -> Active -> ShuttingDown -> Stopped.
//
// - Accepting a connection opens a channel, sends `InitiateClient` (so the
//   client can seed its mirror before any broadcast reaches it), starts the
//   read loop and moves the session to Active.
// - An `AddTrackRequest` is validated, placed by the queue policy, handed to
//   the playback engine, then announced with `TrackAdded{index}` to every
//   open connection, the requester included.
// - Local playback advancement moves the cursor, tells the playback engine,
//   then broadcasts `NowPlayingUpdate{index}`.
// - A lost connection is dropped silently. There is no peer-left broadcast.
// - Shutdown broadcasts `HostDisconnect`, closes every channel and stops.
//
// A failed send during a broadcast is not handled here: the channel has
// already queued its `Disconnected` event, and the peer is removed when that
// event is processed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::Sender;

use partyqueue_protocol::{ConnectionId, HostAdvertisement, PeerIdentity, ProtocolMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, EventSink};
use crate::collaborators::PlaybackEngine;
use crate::config::HostConfig;
use crate::discovery::{EndpointId, IncomingConnectionRequest};
use crate::error::Error;
use crate::playlist::{PlaylistState, QueueEntry, QueuePolicy, policy_for};

/// Host lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Idle,
    Advertising,
    Active,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Advertising => "advertising",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Events a host session reports to its UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostNotification {
    StateChanged { state: HostState },
    PeerJoined { peer: ConnectionId, endpoint: EndpointId },
    PeerLeft { peer: ConnectionId },
    TrackQueued { entry: QueueEntry },
    NowPlaying { entry: QueueEntry },
    RequestRejected {
        peer: Option<ConnectionId>,
        reason: String,
    },
}

/// One joined client, as reported in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub peer: ConnectionId,
    pub endpoint: EndpointId,
    pub liveness: String,
    /// Requester ids currently bound to this connection.
    pub requesters: Vec<String>,
}

/// Point-in-time view of a host session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HostSnapshot {
    pub state: HostState,
    pub host: PeerIdentity,
    pub advertisement: HostAdvertisement,
    pub peers: Vec<PeerSummary>,
    pub playlist: PlaylistState,
}

struct Peer {
    channel: Channel,
    endpoint: EndpointId,
}

/// Authoritative queue plus every client connection.
pub struct HostSession {
    config: HostConfig,
    state: HostState,
    playlist: PlaylistState,
    policy: Box<dyn QueuePolicy>,
    peers: BTreeMap<ConnectionId, Peer>,
    /// requester id -> connection that last used it.
    roster: BTreeMap<String, ConnectionId>,
    next_peer: u32,
    playback: Box<dyn PlaybackEngine>,
    notify: Option<Sender<HostNotification>>,
}

impl HostSession {
    pub fn new(
        config: HostConfig,
        playback: Box<dyn PlaybackEngine>,
        notify: Option<Sender<HostNotification>>,
    ) -> Self {
        let policy = policy_for(config.fair_play);
        Self {
            config,
            state: HostState::Idle,
            playlist: PlaylistState::new(),
            policy,
            peers: BTreeMap::new(),
            roster: BTreeMap::new(),
            next_peer: 0,
            playback,
            notify,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn playlist(&self) -> &PlaylistState {
        &self.playlist
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn advertisement(&self) -> HostAdvertisement {
        self.config.advertisement()
    }

    /// Connection currently bound to `requester_id`, if any.
    pub fn requester_connection(&self, requester_id: &str) -> Option<ConnectionId> {
        self.roster.get(requester_id).copied()
    }

    /// Record that the host-start command succeeded.
    pub fn mark_advertising(&mut self) {
        if self.state == HostState::Idle {
            self.set_state(HostState::Advertising);
        }
    }

    /// Accept an incoming connection: open its channel, send
    /// `InitiateClient`, start reading, and become Active.
    pub fn accept(
        &mut self,
        request: IncomingConnectionRequest,
        sink: EventSink,
    ) -> Result<ConnectionId, Error> {
        if matches!(self.state, HostState::ShuttingDown | HostState::Stopped) {
            return Err(Error::SessionStopped);
        }
        let endpoint = request.endpoint();
        let stream = request.accept()?;
        let peer = ConnectionId(self.next_peer);
        self.next_peer += 1;

        let mut channel = Channel::open(peer, stream, self.config.framing, sink)?;
        channel.send(&self.initiate_message())?;
        channel.start_reading()?;
        self.peers.insert(peer, Peer { channel, endpoint });

        info!(%peer, %endpoint, peers = self.peers.len(), "client joined");
        self.emit(HostNotification::PeerJoined { peer, endpoint });
        if self.state != HostState::Active {
            self.set_state(HostState::Active);
        }
        Ok(peer)
    }

    /// Dispatch one event from a channel read loop.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::MessageReceived { peer, message } => match message {
                ProtocolMessage::AddTrackRequest {
                    track_uri,
                    requester_id,
                } => {
                    self.add_track(Some(peer), track_uri, requester_id);
                }
                other => {
                    debug!(%peer, kind = other.kind(), "ignoring host-bound message");
                }
            },
            ChannelEvent::Disconnected { peer } => self.remove_peer(peer),
        }
    }

    /// Queue a track on behalf of the host user.
    pub fn add_local_track(&mut self, track_uri: String) -> Option<usize> {
        let requester_id = self.config.host_user_id.clone();
        self.add_track(None, track_uri, requester_id)
    }

    /// Validate, insert and broadcast one add-track request. `origin` is the
    /// connection it arrived on, or `None` for a local request. Returns the
    /// inserted position.
    pub fn add_track(
        &mut self,
        origin: Option<ConnectionId>,
        track_uri: String,
        requester_id: String,
    ) -> Option<usize> {
        if matches!(self.state, HostState::ShuttingDown | HostState::Stopped) {
            return None;
        }
        if track_uri.is_empty() || requester_id.is_empty() {
            let reason = if track_uri.is_empty() {
                "empty track uri"
            } else {
                "empty requester id"
            };
            warn!(peer = ?origin, reason, "rejecting add-track request");
            self.emit(HostNotification::RequestRejected {
                peer: origin,
                reason: reason.into(),
            });
            return None;
        }

        if let Some(peer) = origin {
            self.bind_requester(&requester_id, peer);
        }

        let entry = self
            .playlist
            .insert(track_uri, requester_id, self.policy.as_ref())
            .clone();
        self.playback.entry_queued(&entry, &self.playlist);
        info!(
            track = entry.track_id(),
            requester = entry.requester_id(),
            position = entry.position(),
            "track queued"
        );
        self.broadcast(&ProtocolMessage::TrackAdded {
            index: wire_index(entry.position()),
        });
        let position = entry.position();
        self.emit(HostNotification::TrackQueued { entry });
        Some(position)
    }

    /// Local playback moved on. Returns the new now-playing index, or `None`
    /// if the queue has nothing after the current track.
    pub fn advance(&mut self) -> Option<usize> {
        if matches!(self.state, HostState::ShuttingDown | HostState::Stopped) {
            return None;
        }
        let Some(index) = self.playlist.advance() else {
            debug!(len = self.playlist.len(), "advance past end of queue ignored");
            return None;
        };
        let entry = self.playlist.entries()[index].clone();
        self.playback.now_playing(&entry);
        info!(index, track = entry.track_id(), "now playing");
        self.broadcast(&ProtocolMessage::NowPlayingUpdate {
            index: wire_index(index),
        });
        self.emit(HostNotification::NowPlaying { entry });
        Some(index)
    }

    /// Send `message` to every open connection. Returns how many sends
    /// succeeded.
    pub fn broadcast(&self, message: &ProtocolMessage) -> usize {
        let mut delivered = 0;
        for (peer, entry) in &self.peers {
            if !entry.channel.is_open() {
                continue;
            }
            match entry.channel.send(message) {
                Ok(()) => delivered += 1,
                Err(error) => debug!(%peer, %error, "broadcast send failed"),
            }
        }
        delivered
    }

    /// Broadcast `HostDisconnect`, close every channel and stop. Idempotent.
    pub fn shutdown(&mut self) {
        if matches!(self.state, HostState::ShuttingDown | HostState::Stopped) {
            return;
        }
        self.set_state(HostState::ShuttingDown);
        let notified = self.broadcast(&ProtocolMessage::HostDisconnect);
        debug!(notified, "host disconnect sent");
        for (_, peer) in std::mem::take(&mut self.peers) {
            peer.channel.close();
        }
        self.roster.clear();
        self.set_state(HostState::Stopped);
    }

    pub fn snapshot(&self) -> HostSnapshot {
        let peers = self
            .peers
            .iter()
            .map(|(peer, entry)| PeerSummary {
                peer: *peer,
                endpoint: entry.endpoint,
                liveness: entry.channel.liveness().to_string(),
                requesters: self
                    .roster
                    .iter()
                    .filter(|(_, bound)| *bound == peer)
                    .map(|(requester, _)| requester.clone())
                    .collect(),
            })
            .collect();
        HostSnapshot {
            state: self.state,
            host: PeerIdentity::host(&self.config.host_user_id, &self.config.owner_name),
            advertisement: self.advertisement(),
            peers,
            playlist: self.playlist.clone(),
        }
    }

    // The wire index has no "nothing playing" value, so an idle queue is sent
    // as 0. A client seeded with entries but no playback therefore shows
    // entry 0 as playing until the first `NowPlayingUpdate` arrives.
    fn initiate_message(&self) -> ProtocolMessage {
        ProtocolMessage::InitiateClient {
            host_user_id: self.config.host_user_id.clone(),
            playlist_id: self.config.playlist_id.clone(),
            now_playing_index: self.playlist.now_playing().map_or(0, wire_index),
        }
    }

    /// Last writer wins: a requester id seen on a new connection moves there.
    fn bind_requester(&mut self, requester_id: &str, peer: ConnectionId) {
        match self.roster.insert(requester_id.to_owned(), peer) {
            Some(previous) if previous != peer => {
                info!(requester = requester_id, from = %previous, to = %peer, "requester id rebound");
            }
            Some(_) => {}
            None => debug!(requester = requester_id, %peer, "requester id bound"),
        }
    }

    fn remove_peer(&mut self, peer: ConnectionId) {
        let Some(entry) = self.peers.remove(&peer) else {
            return;
        };
        entry.channel.close();
        self.roster.retain(|_, bound| *bound != peer);
        info!(%peer, peers = self.peers.len(), "client left");
        self.emit(HostNotification::PeerLeft { peer });
    }

    fn set_state(&mut self, state: HostState) {
        info!(from = %self.state, to = %state, "host state");
        self.state = state;
        self.emit(HostNotification::StateChanged { state });
    }

    fn emit(&self, notification: HostNotification) {
        if let Some(tx) = &self.notify {
            let _ = tx.send(notification);
        }
    }
}

/// Queue positions are `usize` locally and `u32` on the wire.
fn wire_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}
