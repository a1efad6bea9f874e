// partyqueue_protocol: wire protocol for shared-queue sessions.
//
// This crate defines the message types, the tagged-prefix text codec, and the
// stream framing used between a PartyQueue host and its clients. It is shared
// by both sides, has no threads and does no I/O beyond the `Read`/`Write`
// helpers in `framing.rs`.
//
// Module overview:
// - `types.rs`:    `ConnectionId`, `PeerRole`, `PeerIdentity`.
// - `message.rs`:  `ProtocolMessage` and its tagged text encode/decode.
// - `advert.rs`:   `HostAdvertisement`, the discoverable host name.
// - `framing.rs`:  Payload delimiting over a byte stream (length-prefixed or
//                  raw reads).
//
// Design decisions:
// - **Tagged text, no escaping.** Field values are concatenated after fixed
//   tags. Values containing a tag literal decode ambiguously; peers depend on
//   this exact format, so it is kept and isolated behind `ProtocolMessage`.
// - **Framing is separate from encoding.** Swapping the text codec or the
//   stream framing does not touch session logic.

pub mod advert;
pub mod framing;
pub mod message;
pub mod types;

pub use advert::HostAdvertisement;
pub use framing::{Framing, MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{DecodeError, ProtocolMessage};
pub use types::{ConnectionId, PeerIdentity, PeerRole};
