// Smoke tests for the host runtime, driven by raw TCP clients.
//
// Each test starts a real host on a loopback port via `start_host` and talks
// to it with plain `TcpStream`s. Most tests opt in to length-prefixed frames
// so back-to-back messages stay apart; one speaks the default raw framing.
// No client runtime is involved, so these pin down exactly what goes over
// the wire.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use partyqueue_net::config::{DiscoveryConfig, HostConfig};
use partyqueue_net::{
    HostHandle, HostNotification, HostState, LanDiscovery, NoPlayback, start_host,
};
use partyqueue_protocol::framing::read_chunk;
use partyqueue_protocol::{Framing, ProtocolMessage, read_message, write_message};

const WAIT: Duration = Duration::from_secs(5);

fn start(config: HostConfig) -> (HostHandle, Receiver<HostNotification>) {
    start_with_framing(config, Framing::LengthPrefixed)
}

fn start_with_framing(
    mut config: HostConfig,
    framing: Framing,
) -> (HostHandle, Receiver<HostNotification>) {
    config.framing = framing;
    let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
    let (tx, rx) = mpsc::channel();
    let handle = start_host(config, &discovery, Box::new(NoPlayback), Some(tx)).unwrap();
    (handle, rx)
}

struct MockClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl MockClient {
    /// Connect and consume the host's `InitiateClient`.
    fn join(addr: SocketAddr) -> (Self, ProtocolMessage) {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        let mut client = Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        };
        let initiate = client.recv();
        (client, initiate)
    }

    fn send(&mut self, message: &ProtocolMessage) {
        write_message(&mut self.writer, &message.encode()).unwrap();
        self.writer.flush().unwrap();
    }

    fn send_raw(&mut self, payload: &[u8]) {
        write_message(&mut self.writer, payload).unwrap();
    }

    fn recv(&mut self) -> ProtocolMessage {
        let bytes = read_message(&mut self.reader).unwrap();
        ProtocolMessage::decode(&bytes).unwrap()
    }
}

/// Wait until the host reports `count` joined peers.
fn wait_for_peers(handle: &HostHandle, count: usize) {
    let start = Instant::now();
    while handle.snapshot().unwrap().peers.len() != count {
        assert!(start.elapsed() < WAIT, "timed out waiting for {count} peers");
        thread::sleep(Duration::from_millis(10));
    }
}

fn add(uri: &str, who: &str) -> ProtocolMessage {
    ProtocolMessage::AddTrackRequest {
        track_uri: uri.into(),
        requester_id: who.into(),
    }
}

#[test]
fn joiner_receives_initiate_client() {
    let (handle, _rx) = start(HostConfig {
        host_user_id: "dj".into(),
        playlist_id: "friday".into(),
        ..HostConfig::default()
    });
    let (_client, initiate) = MockClient::join(handle.local_addr());
    assert_eq!(
        initiate,
        ProtocolMessage::InitiateClient {
            host_user_id: "dj".into(),
            playlist_id: "friday".into(),
            now_playing_index: 0,
        }
    );
    wait_for_peers(&handle, 1);
    assert_eq!(handle.snapshot().unwrap().state, HostState::Active);
    handle.stop();
}

#[test]
fn request_is_broadcast_to_all_including_requester() {
    let (handle, _rx) = start(HostConfig::default());
    let addr = handle.local_addr();
    let (mut u1, _) = MockClient::join(addr);
    let (mut u2, _) = MockClient::join(addr);
    let (mut u3, _) = MockClient::join(addr);
    wait_for_peers(&handle, 3);

    u1.send(&add("track:123", "u1"));
    for client in [&mut u1, &mut u2, &mut u3] {
        assert_eq!(client.recv(), ProtocolMessage::TrackAdded { index: 0 });
    }

    let snapshot = handle.snapshot().unwrap();
    let entry = &snapshot.playlist.entries()[0];
    assert_eq!(entry.track_id(), "track:123");
    assert_eq!(entry.requester_id(), "u1");
    handle.stop();
}

#[test]
fn garbage_does_not_tear_down_the_connection() {
    let (handle, _rx) = start(HostConfig::default());
    let (mut client, _) = MockClient::join(handle.local_addr());

    client.send_raw(b"garbage");
    client.send_raw(b"");
    client.send_raw(b"#CURRENTLY_PLAYING#-1");
    client.send(&add("track:1", "u1"));
    assert_eq!(client.recv(), ProtocolMessage::TrackAdded { index: 0 });
    handle.stop();
}

#[test]
fn disconnect_of_one_client_leaves_others_working() {
    let (handle, rx) = start(HostConfig::default());
    let addr = handle.local_addr();
    let (mut a, _) = MockClient::join(addr);
    let (b, _) = MockClient::join(addr);
    let (mut c, _) = MockClient::join(addr);
    wait_for_peers(&handle, 3);

    b.writer.shutdown(Shutdown::Both).unwrap();
    drop(b);
    wait_for_peers(&handle, 2);

    a.send(&add("track:1", "a"));
    assert_eq!(a.recv(), ProtocolMessage::TrackAdded { index: 0 });
    assert_eq!(c.recv(), ProtocolMessage::TrackAdded { index: 0 });

    handle.stop();
    let left = rx
        .try_iter()
        .filter(|n| matches!(n, HostNotification::PeerLeft { .. }))
        .count();
    assert_eq!(left, 1, "no peer-left for clients closed by shutdown");
}

#[test]
fn playback_advance_and_local_adds_reach_clients() {
    let (handle, _rx) = start(HostConfig::default());
    let (mut client, _) = MockClient::join(handle.local_addr());
    wait_for_peers(&handle, 1);

    handle.add_track("track:a").unwrap();
    handle.add_track("track:b").unwrap();
    handle.add_track("track:c").unwrap();
    for i in 0..3 {
        assert_eq!(client.recv(), ProtocolMessage::TrackAdded { index: i });
    }

    handle.playback_advanced().unwrap();
    handle.playback_advanced().unwrap();
    handle.playback_advanced().unwrap();
    for i in 0..3 {
        assert_eq!(client.recv(), ProtocolMessage::NowPlayingUpdate { index: i });
    }

    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.playlist.now_playing(), Some(2));
    assert_eq!(snapshot.playlist.entries()[0].requester_id(), "host");
    handle.stop();
}

#[test]
fn stop_sends_host_disconnect() {
    let (handle, _rx) = start(HostConfig::default());
    let (mut client, _) = MockClient::join(handle.local_addr());
    wait_for_peers(&handle, 1);

    handle.stop();
    assert_eq!(client.recv(), ProtocolMessage::HostDisconnect);
    assert!(read_message(&mut client.reader).is_err());
}

#[test]
fn default_framing_exchanges_raw_payloads() {
    let (handle, _rx) = start_with_framing(HostConfig::default(), Framing::default());
    let mut stream = TcpStream::connect(handle.local_addr()).unwrap();
    stream.set_read_timeout(Some(WAIT)).unwrap();

    let initiate = read_chunk(&mut stream).unwrap();
    assert!(initiate.starts_with(b"#HOST_USER_ID#"));
    wait_for_peers(&handle, 1);

    stream.write_all(b"#SONG_REQUEST#track:raw#CLIENT_USER_ID#u1").unwrap();
    stream.flush().unwrap();
    assert_eq!(read_chunk(&mut stream).unwrap(), b"#NEW_SONG_ADDED#0");
    assert_eq!(handle.snapshot().unwrap().playlist.entries()[0].track_id(), "track:raw");

    handle.stop();
    assert_eq!(read_chunk(&mut stream).unwrap(), b"#HOST_DISCONNECT#");
}
