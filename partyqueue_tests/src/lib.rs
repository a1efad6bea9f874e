// Test-only host and client wrappers for end-to-end queue tests.
//
// Wraps the real host runtime (`start_host`) and client runtime (`join`,
// `discover_and_join`) from `partyqueue_net` behind a synchronous,
// test-friendly API: start a host on loopback, join clients, and block
// until a client's mirror reaches an expected state.
//
// `RemotePlaylist` stands in for the external catalog: the host's playback
// engine publishes every queue change into it, and clients resolve tracks
// from it. Host and clients share one instance, like devices sharing one
// remote playlist.
//
// Hosts and clients started here opt in to length-prefixed framing: the
// scenarios fire messages back to back, and raw reads may merge them.
//
// The only test-specific code here is the polling wrappers and the shared
// playlist. All networking and session logic uses the real code paths.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use partyqueue_net::collaborators::{Catalog, PlaybackEngine, TrackMetadata};
use partyqueue_net::config::{ClientConfig, DiscoveryConfig, HostConfig};
use partyqueue_net::error::CatalogError;
use partyqueue_net::{
    ClientHandle, ClientNotification, ClientSnapshot, ClientState, EndpointId, HostHandle, HostNotification,
    LanDiscovery, PlaylistState, QueueEntry, discover_and_join, join, start_host,
};
use partyqueue_protocol::Framing;

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared stand-in for the remote playlist service.
#[derive(Clone, Default)]
pub struct RemotePlaylist {
    tracks: Arc<Mutex<Vec<TrackMetadata>>>,
}

impl RemotePlaylist {
    pub fn tracks(&self) -> Vec<TrackMetadata> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn metadata(entry: &QueueEntry) -> TrackMetadata {
    TrackMetadata {
        track_id: entry.track_id().to_owned(),
        title: entry.track_id().to_owned(),
        artist: entry.requester_id().to_owned(),
        duration_ms: None,
    }
}

impl PlaybackEngine for RemotePlaylist {
    fn entry_queued(&mut self, _entry: &QueueEntry, playlist: &PlaylistState) {
        let published = playlist.entries().iter().map(metadata).collect();
        *self.tracks.lock().unwrap_or_else(PoisonError::into_inner) = published;
    }

    fn now_playing(&mut self, _entry: &QueueEntry) {}
}

impl Catalog for RemotePlaylist {
    fn resolve(&self, track_id: &str) -> Result<TrackMetadata, CatalogError> {
        self.tracks()
            .into_iter()
            .find(|t| t.track_id == track_id)
            .ok_or_else(|| CatalogError::NotFound(track_id.into()))
    }

    fn playlist(&self, _playlist_id: &str) -> Result<Vec<TrackMetadata>, CatalogError> {
        Ok(self.tracks())
    }
}

/// A host running on a loopback port.
pub struct TestHost {
    pub handle: HostHandle,
    pub notifications: Receiver<HostNotification>,
    pub playlist: RemotePlaylist,
}

impl TestHost {
    pub fn start(mut config: HostConfig) -> Self {
        config.framing = Framing::LengthPrefixed;
        let playlist = RemotePlaylist::default();
        let (tx, notifications) = mpsc::channel();
        let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
        let handle = start_host(config, &discovery, Box::new(playlist.clone()), Some(tx))
            .expect("start_host failed");
        Self {
            handle,
            notifications,
            playlist,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Block until `count` clients are connected.
    pub fn wait_for_peers(&self, count: usize) {
        let start = Instant::now();
        loop {
            let snapshot = self.handle.snapshot().expect("host stopped");
            if snapshot.peers.len() == count {
                return;
            }
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {count} peers (have {})",
                snapshot.peers.len()
            );
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// A joined client with blocking helpers.
pub struct TestClient {
    handle: ClientHandle,
    pub notifications: Receiver<ClientNotification>,
}

impl TestClient {
    /// Join the host at `addr` as `user_id`.
    pub fn join(addr: SocketAddr, user_id: &str, catalog: RemotePlaylist) -> Self {
        let (tx, notifications) = mpsc::channel();
        let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
        let handle = join(
            client_config(user_id),
            &discovery,
            EndpointId(addr),
            catalog,
            Some(tx),
        )
        .expect("join failed");
        Self::synced(handle, notifications)
    }

    /// Wait for the host's `InitiateClient` to land so the mirror is seeded
    /// before the test changes the queue.
    fn synced(handle: ClientHandle, notifications: Receiver<ClientNotification>) -> Self {
        let client = Self {
            handle,
            notifications,
        };
        client.poll_until("initial sync", |s| s.state == ClientState::Synced);
        client
    }

    /// Scan `addr` over UDP and join the first host named `queue_name`.
    pub fn discover(
        addr: SocketAddr,
        queue_name: &str,
        user_id: &str,
        catalog: RemotePlaylist,
    ) -> Self {
        let (tx, notifications) = mpsc::channel();
        let discovery = LanDiscovery::new(DiscoveryConfig {
            scan_targets: vec![addr],
            ..DiscoveryConfig::loopback()
        });
        let handle = discover_and_join(
            client_config(user_id),
            &discovery,
            catalog,
            Some(tx),
            |host| host.queue_name == queue_name,
        )
        .expect("discover_and_join failed");
        Self::synced(handle, notifications)
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub fn add_track(&self, track_uri: &str) {
        self.handle.add_track(track_uri).expect("add_track failed");
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.handle.snapshot().expect("client loop stopped")
    }

    /// Blocking poll until `done` holds for the client's snapshot. Returns
    /// that snapshot.
    pub fn poll_until(
        &self,
        what: &str,
        done: impl Fn(&ClientSnapshot) -> bool,
    ) -> ClientSnapshot {
        let start = Instant::now();
        loop {
            let snapshot = self.snapshot();
            if done(&snapshot) {
                return snapshot;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Leave the queue and wait for the client loop to exit.
    pub fn leave(self) {
        self.handle.leave();
    }
}

fn client_config(user_id: &str) -> ClientConfig {
    ClientConfig {
        user_id: user_id.into(),
        display_name: user_id.into(),
        framing: Framing::LengthPrefixed,
    }
}
