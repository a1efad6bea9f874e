// Client-side session state machine.
//
// A client never owns queue state. It keeps a `PlaylistMirror` derived from
// host broadcasts and the catalog collaborator:
//
// - `InitiateClient` seeds the mirror: host identity, playlist id, the
//   catalog's current view of the playlist, and the now-playing index (kept
//   only if it points into the seeded entries).
// - `TrackAdded{index}` inserts an entry at `index`, resolved through
//   `Catalog::track_at`. The host's playback engine publishes the playlist
//   before broadcasting, so the lookup sees the new track. Lookup failures
//   leave an unresolved entry rather than dropping the update.
// - `NowPlayingUpdate{index}` sets the now-playing index to exactly `index`.
//   It is the only signal for what is playing.
// - `HostDisconnect` or a lost channel ends the session for good.
//
// States: Idle -> Discovering -> Connecting -> Joined -> Synced, with
// Disconnected terminal. Joined means the channel is open; the first message
// received from the host (whatever it is) confirms the join and moves the
// session to Synced. There is no handshake, acknowledgement or reconnect.

use std::fmt;
use std::sync::mpsc::Sender;

use partyqueue_protocol::{PeerIdentity, ProtocolMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{Catalog, TrackMetadata};
use crate::config::ClientConfig;
use crate::discovery::{DiscoveredHost, EndpointId};

/// Client lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Idle,
    Discovering,
    Connecting,
    Joined,
    Synced,
    Disconnected,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Joined => "joined",
            Self::Synced => "synced",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Why a client session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The host sent `HostDisconnect`.
    HostLeft,
    /// The connection failed or was closed by the peer.
    ConnectionLost,
    /// The connect attempt failed.
    ConnectFailed,
    /// The local user left.
    Left,
}

/// Events a client session reports to its UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientNotification {
    StateChanged { state: ClientState },
    HostFound { host: DiscoveredHost },
    Seeded { entries: usize, now_playing: Option<usize> },
    TrackAdded { index: usize, track: Option<TrackMetadata> },
    NowPlaying { index: usize },
    Disconnected { reason: DisconnectReason },
}

/// One mirrored queue position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub index: usize,
    /// `None` when the catalog could not resolve the track.
    pub track: Option<TrackMetadata>,
}

/// Read-only projection of the host's queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMirror {
    host: Option<PeerIdentity>,
    playlist_id: Option<String>,
    entries: Vec<MirrorEntry>,
    now_playing: Option<usize>,
}

impl PlaylistMirror {
    pub fn host(&self) -> Option<&PeerIdentity> {
        self.host.as_ref()
    }

    pub fn playlist_id(&self) -> Option<&str> {
        self.playlist_id.as_deref()
    }

    pub fn entries(&self) -> &[MirrorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exactly the last index the host announced. May point past the
    /// mirrored entries if the catalog lags behind.
    pub fn now_playing(&self) -> Option<usize> {
        self.now_playing
    }

    fn seed(&mut self, host: PeerIdentity, playlist_id: String, tracks: Vec<TrackMetadata>) {
        self.host = Some(host);
        self.playlist_id = Some(playlist_id);
        self.entries = tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| MirrorEntry {
                index,
                track: Some(track),
            })
            .collect();
        self.now_playing = None;
    }

    fn insert(&mut self, index: usize, track: Option<TrackMetadata>) -> usize {
        let at = index.min(self.entries.len());
        self.entries.insert(at, MirrorEntry { index: at, track });
        for (i, entry) in self.entries.iter_mut().enumerate().skip(at) {
            entry.index = i;
        }
        at
    }
}

/// Point-in-time view of a client session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub state: ClientState,
    pub me: PeerIdentity,
    pub endpoint: Option<EndpointId>,
    pub mirror: PlaylistMirror,
}

/// Follower state machine for one host.
pub struct ClientSession<C: Catalog> {
    config: ClientConfig,
    state: ClientState,
    endpoint: Option<EndpointId>,
    catalog: C,
    mirror: PlaylistMirror,
    notify: Option<Sender<ClientNotification>>,
}

impl<C: Catalog> ClientSession<C> {
    pub fn new(config: ClientConfig, catalog: C, notify: Option<Sender<ClientNotification>>) -> Self {
        Self {
            config,
            state: ClientState::Idle,
            endpoint: None,
            catalog,
            mirror: PlaylistMirror::default(),
            notify,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn mirror(&self) -> &PlaylistMirror {
        &self.mirror
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::Disconnected
    }

    pub fn begin_discovery(&mut self) {
        if self.state == ClientState::Idle {
            self.set_state(ClientState::Discovering);
        }
    }

    /// Surface a scan result to the UI.
    pub fn host_found(&self, host: &DiscoveredHost) {
        info!(endpoint = %host.endpoint, queue = %host.queue_name, "host found");
        self.emit(ClientNotification::HostFound { host: host.clone() });
    }

    pub fn begin_connect(&mut self, endpoint: EndpointId) {
        if matches!(self.state, ClientState::Idle | ClientState::Discovering) {
            self.endpoint = Some(endpoint);
            self.set_state(ClientState::Connecting);
        }
    }

    pub fn connect_failed(&mut self) {
        self.disconnect(DisconnectReason::ConnectFailed);
    }

    /// The channel is open and reading.
    pub fn connected(&mut self) {
        if self.state == ClientState::Connecting {
            self.set_state(ClientState::Joined);
        }
    }

    /// Build the request to send for `track_uri`.
    pub fn add_track_request(&self, track_uri: impl Into<String>) -> ProtocolMessage {
        ProtocolMessage::AddTrackRequest {
            track_uri: track_uri.into(),
            requester_id: self.config.user_id.clone(),
        }
    }

    /// Apply one message from the host.
    pub fn handle_message(&mut self, message: ProtocolMessage) {
        if self.is_disconnected() {
            debug!(kind = message.kind(), "ignoring message after disconnect");
            return;
        }
        if self.state == ClientState::Joined {
            self.set_state(ClientState::Synced);
        }
        match message {
            ProtocolMessage::InitiateClient {
                host_user_id,
                playlist_id,
                now_playing_index,
            } => self.seed(host_user_id, playlist_id, now_playing_index as usize),
            ProtocolMessage::TrackAdded { index } => self.track_added(index as usize),
            ProtocolMessage::NowPlayingUpdate { index } => {
                let index = index as usize;
                self.mirror.now_playing = Some(index);
                debug!(index, "now playing");
                self.emit(ClientNotification::NowPlaying { index });
            }
            ProtocolMessage::HostDisconnect => self.disconnect(DisconnectReason::HostLeft),
            ProtocolMessage::AddTrackRequest { .. } => {
                debug!("ignoring client-bound add-track request");
            }
        }
    }

    /// The channel to the host was lost.
    pub fn handle_disconnected(&mut self) {
        self.disconnect(DisconnectReason::ConnectionLost);
    }

    /// The local user left.
    pub fn leave(&mut self) {
        self.disconnect(DisconnectReason::Left);
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            state: self.state,
            me: PeerIdentity {
                display_name: self.config.display_name.clone(),
                ..PeerIdentity::client(&self.config.user_id)
            },
            endpoint: self.endpoint,
            mirror: self.mirror.clone(),
        }
    }

    fn seed(&mut self, host_user_id: String, playlist_id: String, now_playing: usize) {
        let tracks = match self.catalog.playlist(&playlist_id) {
            Ok(tracks) => tracks,
            Err(error) => {
                debug!(%playlist_id, %error, "playlist lookup failed; starting empty");
                Vec::new()
            }
        };
        self.mirror
            .seed(PeerIdentity::host(host_user_id.clone(), host_user_id), playlist_id, tracks);
        // Hosts send 0 when nothing is playing yet, so an idle host with a
        // non-empty queue shows up here as entry 0 playing. Only the next
        // `NowPlayingUpdate` can tell the two apart.
        if now_playing < self.mirror.len() {
            self.mirror.now_playing = Some(now_playing);
        }
        info!(
            entries = self.mirror.len(),
            now_playing = ?self.mirror.now_playing,
            "mirror seeded"
        );
        self.emit(ClientNotification::Seeded {
            entries: self.mirror.len(),
            now_playing: self.mirror.now_playing,
        });
    }

    fn track_added(&mut self, index: usize) {
        if self.already_seeded(index) {
            debug!(index, "track already mirrored from seed");
            return;
        }
        let track = match self.mirror.playlist_id.as_deref() {
            Some(playlist_id) => match self.catalog.track_at(playlist_id, index) {
                Ok(track) => Some(track),
                Err(error) => {
                    debug!(index, %error, "track lookup failed");
                    None
                }
            },
            None => None,
        };
        let at = self.mirror.insert(index, track.clone());
        debug!(index = at, "track added");
        self.emit(ClientNotification::TrackAdded { index: at, track });
    }

    /// A track added on the host before we joined can be in both the seeded
    /// playlist and a `TrackAdded` that was already in flight. It counts as
    /// seeded when the catalog holds no more tracks than the mirror and both
    /// agree on the track at `index`.
    fn already_seeded(&self, index: usize) -> bool {
        let Some(playlist_id) = self.mirror.playlist_id.as_deref() else {
            return false;
        };
        let Some(mirrored) = self.mirror.entries.get(index).and_then(|e| e.track.as_ref()) else {
            return false;
        };
        match self.catalog.playlist(playlist_id) {
            Ok(tracks) => {
                tracks.len() == self.mirror.len()
                    && tracks
                        .get(index)
                        .is_some_and(|track| track.track_id == mirrored.track_id)
            }
            Err(error) => {
                debug!(index, %error, "playlist lookup failed");
                false
            }
        }
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        if self.is_disconnected() {
            return;
        }
        info!(?reason, "left queue");
        self.set_state(ClientState::Disconnected);
        self.emit(ClientNotification::Disconnected { reason });
    }

    fn set_state(&mut self, state: ClientState) {
        info!(from = %self.state, to = %state, "client state");
        self.state = state;
        self.emit(ClientNotification::StateChanged { state });
    }

    fn emit(&self, notification: ClientNotification) {
        if let Some(tx) = &self.notify {
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::mpsc::{self, Receiver};

    use super::*;
    use crate::collaborators::NullCatalog;
    use crate::error::CatalogError;

    struct FixedCatalog(Vec<TrackMetadata>);

    impl Catalog for FixedCatalog {
        fn resolve(&self, track_id: &str) -> Result<TrackMetadata, CatalogError> {
            self.0
                .iter()
                .find(|t| t.track_id == track_id)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(track_id.into()))
        }

        fn playlist(&self, _playlist_id: &str) -> Result<Vec<TrackMetadata>, CatalogError> {
            Ok(self.0.clone())
        }
    }

    fn endpoint() -> EndpointId {
        EndpointId(SocketAddr::from(([127, 0, 0, 1], 47474)))
    }

    fn joined<C: Catalog>(catalog: C) -> (ClientSession<C>, Receiver<ClientNotification>) {
        let (tx, rx) = mpsc::channel();
        let mut session = ClientSession::new(ClientConfig::default(), catalog, Some(tx));
        session.begin_discovery();
        session.begin_connect(endpoint());
        session.connected();
        (session, rx)
    }

    fn initiate(now_playing_index: u32) -> ProtocolMessage {
        ProtocolMessage::InitiateClient {
            host_user_id: "dj".into(),
            playlist_id: "pl".into(),
            now_playing_index,
        }
    }

    fn tracks(ids: &[&str]) -> Vec<TrackMetadata> {
        ids.iter().map(|id| TrackMetadata::bare(*id)).collect()
    }

    #[test]
    fn walks_states_and_first_message_confirms_join() {
        let (mut session, rx) = joined(NullCatalog);
        assert_eq!(session.state(), ClientState::Joined);

        session.handle_message(ProtocolMessage::NowPlayingUpdate { index: 0 });
        assert_eq!(session.state(), ClientState::Synced);

        let states: Vec<ClientState> = rx
            .try_iter()
            .filter_map(|n| match n {
                ClientNotification::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ClientState::Discovering,
                ClientState::Connecting,
                ClientState::Joined,
                ClientState::Synced
            ]
        );
    }

    #[test]
    fn initiate_client_seeds_mirror_from_catalog() {
        let (mut session, _rx) = joined(FixedCatalog(tracks(&["t0", "t1", "t2"])));
        session.handle_message(initiate(1));

        let mirror = session.mirror();
        assert_eq!(mirror.host().unwrap().peer_id, "dj");
        assert_eq!(mirror.playlist_id(), Some("pl"));
        assert_eq!(mirror.len(), 3);
        assert_eq!(mirror.now_playing(), Some(1));
        assert_eq!(
            mirror.entries()[2].track.as_ref().unwrap().track_id,
            "t2"
        );
    }

    #[test]
    fn initiate_client_ignores_index_past_seeded_entries() {
        let (mut session, _rx) = joined(FixedCatalog(Vec::new()));
        session.handle_message(initiate(0));
        assert!(session.mirror().is_empty());
        assert_eq!(session.mirror().now_playing(), None);
    }

    #[test]
    fn track_added_resolves_through_catalog() {
        let (mut session, rx) = joined(FixedCatalog(tracks(&["t0", "t1"])));
        session.handle_message(initiate(0));
        // Mirror already holds the catalog's two tracks; the host announces
        // a third the catalog does not know yet.
        session.handle_message(ProtocolMessage::TrackAdded { index: 2 });
        session.handle_message(ProtocolMessage::TrackAdded { index: 1 });

        let mirror = session.mirror();
        assert_eq!(mirror.len(), 4);
        assert_eq!(mirror.entries()[1].track.as_ref().unwrap().track_id, "t1");
        assert_eq!(mirror.entries()[3].track, None);
        for (i, entry) in mirror.entries().iter().enumerate() {
            assert_eq!(entry.index, i);
        }
        assert!(rx.try_iter().any(|n| n
            == ClientNotification::TrackAdded {
                index: 2,
                track: None
            }));
    }

    #[test]
    fn seeded_track_is_not_inserted_twice() {
        let (mut session, rx) = joined(FixedCatalog(tracks(&["t0"])));
        session.handle_message(initiate(0));
        // The host queued t0 just before we joined; its announcement arrives
        // after the seed already picked it up.
        session.handle_message(ProtocolMessage::TrackAdded { index: 0 });

        let mirror = session.mirror();
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.entries()[0].track.as_ref().unwrap().track_id, "t0");
        assert!(
            !rx.try_iter()
                .any(|n| matches!(n, ClientNotification::TrackAdded { .. }))
        );
    }

    #[test]
    fn idle_host_index_zero_marks_first_seeded_entry() {
        let (mut session, _rx) = joined(FixedCatalog(tracks(&["t0", "t1"])));
        session.handle_message(initiate(0));
        assert_eq!(session.mirror().now_playing(), Some(0));

        session.handle_message(ProtocolMessage::NowPlayingUpdate { index: 1 });
        assert_eq!(session.mirror().now_playing(), Some(1));
    }

    #[test]
    fn now_playing_is_set_exactly() {
        let (mut session, _rx) = joined(NullCatalog);
        session.handle_message(ProtocolMessage::NowPlayingUpdate { index: 2 });
        assert_eq!(session.mirror().now_playing(), Some(2));
        session.handle_message(ProtocolMessage::NowPlayingUpdate { index: 0 });
        assert_eq!(session.mirror().now_playing(), Some(0));
    }

    #[test]
    fn host_disconnect_is_terminal() {
        let (mut session, rx) = joined(NullCatalog);
        session.handle_message(ProtocolMessage::HostDisconnect);
        assert_eq!(session.state(), ClientState::Disconnected);

        session.handle_message(ProtocolMessage::NowPlayingUpdate { index: 3 });
        session.handle_disconnected();
        assert_eq!(session.mirror().now_playing(), None);

        let reasons: Vec<DisconnectReason> = rx
            .try_iter()
            .filter_map(|n| match n {
                ClientNotification::Disconnected { reason } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec![DisconnectReason::HostLeft]);
    }

    #[test]
    fn add_track_request_carries_user_id() {
        let (tx, _rx) = mpsc::channel();
        let config = ClientConfig {
            user_id: "u1".into(),
            ..ClientConfig::default()
        };
        let session = ClientSession::new(config, NullCatalog, Some(tx));
        assert_eq!(
            session.add_track_request("track:123"),
            ProtocolMessage::AddTrackRequest {
                track_uri: "track:123".into(),
                requester_id: "u1".into(),
            }
        );
    }

    #[test]
    fn connect_failure_ends_session() {
        let mut session = ClientSession::new(ClientConfig::default(), NullCatalog, None);
        session.begin_connect(endpoint());
        session.connect_failed();
        assert!(session.is_disconnected());
        assert_eq!(session.snapshot().endpoint, Some(endpoint()));
    }
}
