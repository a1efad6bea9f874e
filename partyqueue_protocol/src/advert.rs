// Host advertisement names.
//
// A host makes itself discoverable under a name built with the same
// tagged-prefix scheme as protocol messages:
//
//     #QUEUE_NAME#<name>#OWNER_NAME#<owner>#IS_FAIR_PLAY#<T|F>
//
// Scanners decode the name back into a `HostAdvertisement`; a name that does
// not match (missing tags, bad flag character) is dropped by the caller.

use serde::{Deserialize, Serialize};

use crate::message::{DecodeError, tag};

const FAIR_PLAY_ON: char = 'T';
const FAIR_PLAY_OFF: char = 'F';

/// What a host announces about its queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAdvertisement {
    pub queue_name: String,
    pub owner_name: String,
    pub fair_play: bool,
}

impl HostAdvertisement {
    pub fn to_wire_string(&self) -> String {
        let flag = if self.fair_play {
            FAIR_PLAY_ON
        } else {
            FAIR_PLAY_OFF
        };
        format!(
            "{}{}{}{}{}{flag}",
            tag::QUEUE_NAME,
            self.queue_name,
            tag::OWNER_NAME,
            self.owner_name,
            tag::IS_FAIR_PLAY
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_wire_string().into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
        Self::parse(text)
    }

    // `#QUEUE_NAME#(.*)#OWNER_NAME#(.*)#IS_FAIR_PLAY#([TF])`
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let rest = text
            .strip_prefix(tag::QUEUE_NAME)
            .ok_or(DecodeError::Unmatched)?;
        let (head, flag) = rest
            .rsplit_once(tag::IS_FAIR_PLAY)
            .ok_or(DecodeError::Unmatched)?;
        let fair_play = match flag {
            "T" => true,
            "F" => false,
            _ => return Err(DecodeError::Unmatched),
        };
        let (queue_name, owner_name) = head
            .rsplit_once(tag::OWNER_NAME)
            .ok_or(DecodeError::Unmatched)?;
        Ok(Self {
            queue_name: queue_name.to_string(),
            owner_name: owner_name.to_string(),
            fair_play,
        })
    }
}
