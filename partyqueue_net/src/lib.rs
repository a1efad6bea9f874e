// partyqueue_net: host and client sessions for PartyQueue shared queues.
//
// One device hosts a queue; nearby devices discover it over the LAN, connect
// over TCP, and append tracks. The host owns the only authoritative
// `PlaylistState` and broadcasts every change; clients keep a read-only
// mirror. There is no central server.
//
// Module overview:
// - `channel.rs`:         One TCP connection: a read-loop thread that turns
//                         frames into `ChannelEvent`s, and serialized sends.
// - `discovery.rs`:       LAN advertising (TCP listener + UDP beacon),
//                         scanning, and connecting.
// - `playlist.rs`:        `PlaylistState`, `QueueEntry`, and the FIFO /
//                         fair-play ordering policies.
// - `collaborators.rs`:   `PlaybackEngine` and `Catalog` traits for the
//                         external playback engine and track catalog.
// - `host_session.rs`:    Host state machine (accept, add-track, advance,
//                         disconnect, shutdown).
// - `server.rs`:          Host runtime: advertising plus the single-threaded
//                         event loop that drives `HostSession`.
// - `client_session.rs`:  Client state machine and `PlaylistMirror`.
// - `client.rs`:          Client runtime: join/discover and `ClientHandle`.
// - `config.rs`:          Host/client/discovery settings and TOML loading.
// - `error.rs`:           Error types.
//
// Concurrency: std threads with an `mpsc` queue per session. Read loops and
// the accept thread only push immutable events; each session's state is
// touched by its event-loop thread alone.
//
// Dependencies: `partyqueue_protocol` for messages and framing, `tracing`
// for logs. The `partyqueue` binary (`main.rs`) wires everything to a CLI.

pub mod channel;
pub mod client;
pub mod client_session;
pub mod collaborators;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host_session;
pub mod playlist;
pub mod server;

pub use client::{ClientHandle, discover_and_join, join};
pub use client_session::{ClientNotification, ClientSnapshot, ClientState, PlaylistMirror};
pub use collaborators::{Catalog, NoPlayback, NullCatalog, PlaybackEngine, TrackMetadata};
pub use config::{ClientConfig, DiscoveryConfig, FileConfig, HostConfig};
pub use discovery::{DiscoveredHost, EndpointId, LanDiscovery};
pub use error::{Error, Result};
pub use host_session::{HostNotification, HostSnapshot, HostState};
pub use playlist::{PlaylistState, QueueEntry};
pub use server::{HostHandle, start_host};
