// LAN discovery: advertising a host and scanning for hosts.
//
// A host advertises on one port number with two sockets:
//
// - **TCP listener**: clients connect here. The accept loop runs on its own
//   thread with a non-blocking listener, sleeping 50ms between polls so it
//   can notice `stop()`. Every accepted stream is wrapped in an
//   `IncomingConnectionRequest` and pushed into the owner's mpsc queue; the
//   owner decides whether to accept it.
// - **UDP beacon**: answers each `PROBE` datagram with the tagged
//   advertisement name (`#QUEUE_NAME#..#OWNER_NAME#..#IS_FAIR_PLAY#T|F`).
//
// A scan is a lazy iterator over `DiscoveredHost`s. It sends a probe to every
// configured target (usually the broadcast address) at the probe interval and
// yields each replying host once, or again when its advertisement changes.
// Malformed replies are dropped. The iterator never ends on its own; a
// `ScanStopper` from another thread ends it, and `restart()` forgets what
// has been seen.
//
// The endpoint id of a host is the address its beacon replied from, which
// is also the address its TCP listener is bound to.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use partyqueue_protocol::HostAdvertisement;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::error::{ConnectFailed, DiscoveryError};

/// Datagram a scanner sends to ask hosts for their advertisement.
pub const PROBE: &[u8] = b"#QUEUE_SCAN#";

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const SOCKET_POLL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 1024;

/// Address of a discoverable host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub SocketAddr);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A host found by a scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub endpoint: EndpointId,
    pub queue_name: String,
    pub owner_name: String,
    pub fair_play: bool,
}

impl DiscoveredHost {
    fn new(endpoint: EndpointId, advert: HostAdvertisement) -> Self {
        Self {
            endpoint,
            queue_name: advert.queue_name,
            owner_name: advert.owner_name,
            fair_play: advert.fair_play,
        }
    }
}

/// A peer that connected to an advertising host. Dropping it without calling
/// `accept` closes the connection.
#[derive(Debug)]
pub struct IncomingConnectionRequest {
    endpoint: EndpointId,
    stream: TcpStream,
}

impl IncomingConnectionRequest {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let endpoint = EndpointId(stream.peer_addr()?);
        Ok(Self { endpoint, stream })
    }

    /// The remote address of the connecting peer.
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Take the connection. The stream is returned in blocking mode.
    pub fn accept(self) -> io::Result<TcpStream> {
        self.stream.set_nonblocking(false)?;
        Ok(self.stream)
    }
}

/// Discovery adapter for one local network.
#[derive(Clone, Debug, Default)]
pub struct LanDiscovery {
    config: DiscoveryConfig,
}

impl LanDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Start advertising `advert`. Incoming connections are delivered to
    /// `events` until the returned `Advertising` is stopped or dropped.
    pub fn advertise<E>(
        &self,
        advert: &HostAdvertisement,
        events: Sender<E>,
    ) -> Result<Advertising, DiscoveryError>
    where
        E: From<IncomingConnectionRequest> + Send + 'static,
    {
        let listener = TcpListener::bind((self.config.bind_ip, self.config.port))
            .map_err(|source| DiscoveryError::Bind {
                what: "tcp listener",
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let beacon = UdpSocket::bind(local_addr).map_err(|source| DiscoveryError::Bind {
            what: "udp beacon",
            source,
        })?;
        beacon.set_read_timeout(Some(SOCKET_POLL))?;

        // Non-blocking so the accept thread can check keep_running.
        listener.set_nonblocking(true)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::with_capacity(2);

        let keep_running_listener = Arc::clone(&keep_running);
        threads.push(
            thread::Builder::new()
                .name("pq-accept".into())
                .spawn(move || accept_loop(listener, events, &keep_running_listener))?,
        );

        let keep_running_beacon = Arc::clone(&keep_running);
        let name = advert.encode();
        threads.push(
            thread::Builder::new()
                .name("pq-beacon".into())
                .spawn(move || beacon_loop(beacon, name, &keep_running_beacon))?,
        );

        info!(%local_addr, queue = %advert.queue_name, "advertising");
        Ok(Advertising {
            local_addr,
            keep_running,
            threads,
        })
    }

    /// Start scanning. The returned iterator blocks in `next()` until a host
    /// replies or the scan is stopped.
    pub fn scan(&self) -> Result<Scan, DiscoveryError> {
        let socket =
            UdpSocket::bind((self.config.bind_ip, 0)).map_err(|source| DiscoveryError::Bind {
                what: "scan",
                source,
            })?;
        socket.set_broadcast(true)?;
        socket.set_read_timeout(Some(SOCKET_POLL))?;
        debug!(targets = ?self.config.scan_targets, "scan started");
        Ok(Scan {
            socket,
            targets: self.config.scan_targets.clone(),
            probe_interval: self.config.probe_interval(),
            last_probe: None,
            seen: HashMap::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open a connection to a discovered host. Not retried.
    pub fn connect(&self, endpoint: &EndpointId) -> Result<TcpStream, ConnectFailed> {
        TcpStream::connect(endpoint.0).map_err(|source| {
            warn!(%endpoint, error = %source, "connect failed");
            ConnectFailed {
                endpoint: *endpoint,
                source,
            }
        })
    }
}

fn accept_loop<E>(listener: TcpListener, events: Sender<E>, keep_running: &AtomicBool)
where
    E: From<IncomingConnectionRequest>,
{
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(error) = stream.set_nonblocking(false) {
                    debug!(%addr, %error, "set_nonblocking failed");
                }
                debug!(%addr, "incoming connection");
                let request = IncomingConnectionRequest {
                    endpoint: EndpointId(addr),
                    stream,
                };
                if events.send(E::from(request)).is_err() {
                    // Owner is gone.
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(error) => {
                warn!(%error, "accept failed; no longer accepting connections");
                break;
            }
        }
    }
}

fn beacon_loop(beacon: UdpSocket, name: Vec<u8>, keep_running: &AtomicBool) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while keep_running.load(Ordering::SeqCst) {
        match beacon.recv_from(&mut buf) {
            Ok((n, from)) if &buf[..n] == PROBE => {
                trace!(%from, "probe");
                if let Err(error) = beacon.send_to(&name, from) {
                    debug!(%from, %error, "advertisement reply failed");
                }
            }
            Ok((_, from)) => trace!(%from, "ignoring stray datagram"),
            Err(ref e) if is_poll_timeout(e) => {}
            Err(error) => {
                warn!(%error, "beacon socket failed");
                break;
            }
        }
    }
}

fn is_poll_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// A running advertisement. Stops on drop.
pub struct Advertising {
    local_addr: SocketAddr,
    keep_running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Advertising {
    /// Bound address of the TCP listener (and the beacon).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and answering probes, and wait for both threads.
    pub fn stop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Advertising {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ends a `Scan` from another thread.
#[derive(Clone, Debug)]
pub struct ScanStopper(Arc<AtomicBool>);

impl ScanStopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// An in-progress scan. See the module comment.
pub struct Scan {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    probe_interval: Duration,
    last_probe: Option<Instant>,
    seen: HashMap<EndpointId, HostAdvertisement>,
    stop: Arc<AtomicBool>,
}

impl Scan {
    pub fn stopper(&self) -> ScanStopper {
        ScanStopper(Arc::clone(&self.stop))
    }

    /// Forget every host seen so far and probe again immediately.
    pub fn restart(&mut self) {
        self.seen.clear();
        self.last_probe = None;
        self.stop.store(false, Ordering::SeqCst);
    }

    fn probe(&mut self) {
        for target in &self.targets {
            if let Err(error) = self.socket.send_to(PROBE, target) {
                debug!(%target, %error, "probe failed");
            }
        }
        self.last_probe = Some(Instant::now());
    }

    fn probe_due(&self) -> bool {
        self.last_probe
            .is_none_or(|sent| sent.elapsed() >= self.probe_interval)
    }
}

impl Iterator for Scan {
    type Item = DiscoveredHost;

    fn next(&mut self) -> Option<DiscoveredHost> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return None;
            }
            if self.probe_due() {
                self.probe();
            }
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                // ICMP unreachable from an earlier probe surfaces here on
                // some platforms.
                Err(ref e) if is_poll_timeout(e) || e.kind() == ErrorKind::ConnectionReset => {
                    continue;
                }
                Err(error) => {
                    warn!(%error, "scan socket failed");
                    return None;
                }
            };
            let advert = match HostAdvertisement::decode(&buf[..n]) {
                Ok(advert) => advert,
                Err(error) => {
                    debug!(%from, %error, "dropping malformed advertisement");
                    continue;
                }
            };
            let endpoint = EndpointId(from);
            if self.seen.get(&endpoint) == Some(&advert) {
                continue;
            }
            self.seen.insert(endpoint, advert.clone());
            debug!(%endpoint, queue = %advert.queue_name, "host discovered");
            return Some(DiscoveredHost::new(endpoint, advert));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn advert(name: &str) -> HostAdvertisement {
        HostAdvertisement {
            queue_name: name.into(),
            owner_name: "owner".into(),
            fair_play: false,
        }
    }

    /// Stop `scan` after `WAIT` so a broken test fails instead of hanging.
    fn with_deadline(scan: &Scan) {
        let stopper = scan.stopper();
        thread::spawn(move || {
            thread::sleep(WAIT);
            stopper.stop();
        });
    }

    #[test]
    fn scan_finds_advertising_host() {
        let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
        let (tx, _rx) = mpsc::channel::<IncomingConnectionRequest>();
        let advertising = discovery.advertise(&advert("Kitchen"), tx).unwrap();

        let mut config = DiscoveryConfig::loopback();
        config.scan_targets = vec![advertising.local_addr()];
        let mut scan = LanDiscovery::new(config).scan().unwrap();
        with_deadline(&scan);

        let host = scan.next().expect("host should reply");
        assert_eq!(host.endpoint, EndpointId(advertising.local_addr()));
        assert_eq!(host.queue_name, "Kitchen");
        assert_eq!(host.owner_name, "owner");
        assert!(!host.fair_play);
    }

    #[test]
    fn incoming_connections_are_delivered() {
        let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
        let (tx, rx) = mpsc::channel::<IncomingConnectionRequest>();
        let advertising = discovery.advertise(&advert("Den"), tx).unwrap();

        let client = discovery
            .connect(&EndpointId(advertising.local_addr()))
            .unwrap();
        let request = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(request.endpoint(), EndpointId(client.local_addr().unwrap()));
        request.accept().unwrap();
    }

    #[test]
    fn stopped_advertising_refuses_connections() {
        let discovery = LanDiscovery::new(DiscoveryConfig::loopback());
        let (tx, _rx) = mpsc::channel::<IncomingConnectionRequest>();
        let mut advertising = discovery.advertise(&advert("Attic"), tx).unwrap();
        let endpoint = EndpointId(advertising.local_addr());
        advertising.stop();
        drop(advertising);

        let err = discovery.connect(&endpoint).unwrap_err();
        assert_eq!(err.endpoint, endpoint);
    }

    #[test]
    fn malformed_and_duplicate_replies_are_skipped() {
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let responder_addr = responder.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (_, scanner) = responder.recv_from(&mut buf).unwrap();
            let first = advert("Garage").encode();
            let changed = HostAdvertisement {
                fair_play: true,
                ..advert("Garage")
            }
            .encode();
            responder.send_to(b"#QUEUE_NAME#Garage", scanner).unwrap();
            responder.send_to(&first, scanner).unwrap();
            responder.send_to(&first, scanner).unwrap();
            responder.send_to(&changed, scanner).unwrap();
        });

        let mut config = DiscoveryConfig::loopback();
        config.scan_targets = vec![responder_addr];
        let mut scan = LanDiscovery::new(config).scan().unwrap();
        with_deadline(&scan);

        let first = scan.next().unwrap();
        assert_eq!(first.endpoint, EndpointId(responder_addr));
        assert!(!first.fair_play);

        let second = scan.next().unwrap();
        assert_eq!(second.endpoint, EndpointId(responder_addr));
        assert!(second.fair_play, "changed advertisement is reported again");
    }

    #[test]
    fn stopper_ends_scan() {
        let mut scan = LanDiscovery::new(DiscoveryConfig::loopback()).scan().unwrap();
        scan.stopper().stop();
        assert_eq!(scan.next(), None);

        scan.restart();
        scan.stopper().stop();
        assert_eq!(scan.next(), None);
    }
}
