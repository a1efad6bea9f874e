// Core identity types for the queue-sync protocol.
//
// `ConnectionId` is a session-scoped handle the host assigns to each accepted
// connection (the client uses a single fixed id for its link to the host).
// It never goes on the wire. `PeerIdentity` is the user-facing identity of a
// peer: the `peer_id` is supplied by the peer itself (the requester id in
// `AddTrackRequest`, or the host user id in `InitiateClient`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-assigned connection handle (compact u32, never sent on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side of a session a peer is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Host,
    Client,
}

/// Public identity of a peer in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub peer_id: String,
    pub display_name: String,
    pub role: PeerRole,
}

impl PeerIdentity {
    pub fn host(peer_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            role: PeerRole::Host,
        }
    }

    /// A client identity. Clients never announce a display name on the wire,
    /// so the peer id doubles as one until a UI supplies something better.
    pub fn client(peer_id: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        Self {
            display_name: peer_id.clone(),
            peer_id,
            role: PeerRole::Client,
        }
    }
}
