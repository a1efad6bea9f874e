// Protocol messages and the tagged-prefix text codec.
//
// Every message is a UTF-8 string in which each field is preceded by a fixed
// literal tag (see `tag`). There are no length prefixes and no escaping: a
// field value that itself contains a tag literal makes decoding ambiguous.
// That weakness is part of the wire format and is kept as-is so peers stay
// compatible. Transport-level delimiting lives in `framing.rs`, not here.
//
// Decoding tries each message pattern in a fixed priority order (the order of
// the `ProtocolMessage` variants). A pattern only matches the whole payload;
// string fields behave like greedy `(.*)` captures and index fields must be
// one or more ASCII digits. The first full match wins, and no match yields a
// `DecodeError`, which callers log and discard.

use thiserror::Error;

/// Literal tags used by the wire format.
pub mod tag {
    pub const SONG_REQUEST: &str = "#SONG_REQUEST#";
    pub const CLIENT_USER_ID: &str = "#CLIENT_USER_ID#";
    pub const HOST_USER_ID: &str = "#HOST_USER_ID#";
    pub const PLAYLIST_ID: &str = "#PLAYLIST_ID#";
    pub const CURRENTLY_PLAYING: &str = "#CURRENTLY_PLAYING#";
    pub const NEW_SONG_ADDED: &str = "#NEW_SONG_ADDED#";
    pub const HOST_DISCONNECT: &str = "#HOST_DISCONNECT#";
    pub const QUEUE_NAME: &str = "#QUEUE_NAME#";
    pub const OWNER_NAME: &str = "#OWNER_NAME#";
    pub const IS_FAIR_PLAY: &str = "#IS_FAIR_PLAY#";
}

/// A payload that is not a valid protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("payload matches no known message pattern")]
    Unmatched,
}

/// Messages exchanged between a host and its clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// Client asks the host to queue a track.
    AddTrackRequest {
        track_uri: String,
        requester_id: String,
    },
    /// Host seeds a freshly connected client's mirror.
    InitiateClient {
        host_user_id: String,
        playlist_id: String,
        now_playing_index: u32,
    },
    /// Host moved playback to `index`.
    NowPlayingUpdate { index: u32 },
    /// Host inserted a track at `index`.
    TrackAdded { index: u32 },
    /// Host is shutting the session down.
    HostDisconnect,
}

impl ProtocolMessage {
    /// Render the tagged text form of this message.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::AddTrackRequest {
                track_uri,
                requester_id,
            } => format!(
                "{}{track_uri}{}{requester_id}",
                tag::SONG_REQUEST,
                tag::CLIENT_USER_ID
            ),
            Self::InitiateClient {
                host_user_id,
                playlist_id,
                now_playing_index,
            } => format!(
                "{}{host_user_id}{}{playlist_id}{}{now_playing_index}",
                tag::HOST_USER_ID,
                tag::PLAYLIST_ID,
                tag::CURRENTLY_PLAYING
            ),
            Self::NowPlayingUpdate { index } => format!("{}{index}", tag::CURRENTLY_PLAYING),
            Self::TrackAdded { index } => format!("{}{index}", tag::NEW_SONG_ADDED),
            Self::HostDisconnect => tag::HOST_DISCONNECT.to_string(),
        }
    }

    /// Encode to raw payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.to_wire_string().into_bytes()
    }

    /// Decode a raw payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        Self::parse(text)
    }

    /// Decode a payload that is already text.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        const PATTERNS: [fn(&str) -> Option<ProtocolMessage>; 5] = [
            match_add_track_request,
            match_initiate_client,
            match_now_playing_update,
            match_track_added,
            match_host_disconnect,
        ];
        PATTERNS
            .iter()
            .find_map(|pattern| pattern(text))
            .ok_or(DecodeError::Unmatched)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddTrackRequest { .. } => "AddTrackRequest",
            Self::InitiateClient { .. } => "InitiateClient",
            Self::NowPlayingUpdate { .. } => "NowPlayingUpdate",
            Self::TrackAdded { .. } => "TrackAdded",
            Self::HostDisconnect => "HostDisconnect",
        }
    }
}

/// Parse one-or-more ASCII digits. Rejects signs, whitespace and values that
/// overflow `u32`.
pub(crate) fn parse_index(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

// `#SONG_REQUEST#(.*)#CLIENT_USER_ID#(.*)`
fn match_add_track_request(text: &str) -> Option<ProtocolMessage> {
    let rest = text.strip_prefix(tag::SONG_REQUEST)?;
    // Greedy first capture: split at the last requester tag.
    let (track_uri, requester_id) = rest.rsplit_once(tag::CLIENT_USER_ID)?;
    Some(ProtocolMessage::AddTrackRequest {
        track_uri: track_uri.to_string(),
        requester_id: requester_id.to_string(),
    })
}

// `#HOST_USER_ID#(.*)#PLAYLIST_ID#(.*)#CURRENTLY_PLAYING#(\d+)`
fn match_initiate_client(text: &str) -> Option<ProtocolMessage> {
    let rest = text.strip_prefix(tag::HOST_USER_ID)?;
    let (head, digits) = rest.rsplit_once(tag::CURRENTLY_PLAYING)?;
    let now_playing_index = parse_index(digits)?;
    let (host_user_id, playlist_id) = head.rsplit_once(tag::PLAYLIST_ID)?;
    Some(ProtocolMessage::InitiateClient {
        host_user_id: host_user_id.to_string(),
        playlist_id: playlist_id.to_string(),
        now_playing_index,
    })
}

// `#CURRENTLY_PLAYING#(\d+)`
fn match_now_playing_update(text: &str) -> Option<ProtocolMessage> {
    let index = parse_index(text.strip_prefix(tag::CURRENTLY_PLAYING)?)?;
    Some(ProtocolMessage::NowPlayingUpdate { index })
}

// `#NEW_SONG_ADDED#(\d+)`
fn match_track_added(text: &str) -> Option<ProtocolMessage> {
    let index = parse_index(text.strip_prefix(tag::NEW_SONG_ADDED)?)?;
    Some(ProtocolMessage::TrackAdded { index })
}

// `#HOST_DISCONNECT#`
fn match_host_disconnect(text: &str) -> Option<ProtocolMessage> {
    (text == tag::HOST_DISCONNECT).then_some(ProtocolMessage::HostDisconnect)
}
