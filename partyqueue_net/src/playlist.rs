// Authoritative queue state and ordering policies.
//
// `PlaylistState` is owned by the host session and only mutated from its
// event loop. Clients never hold one; they keep a `PlaylistMirror` (see
// `client_session.rs`) derived from host broadcasts.
//
// Invariants:
// - `now_playing` is `None` (nothing started yet) or a valid index into
//   `entries`.
// - Entries at or before `now_playing` are history: never removed, never
//   moved. Policies may only place new entries after it.
// - `entries[i].position == i` after every mutation.

use serde::{Deserialize, Serialize};

/// One queued track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    track_id: String,
    requester_id: String,
    position: usize,
}

impl QueueEntry {
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// The host's queue: ordered entries plus the now-playing cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistState {
    entries: Vec<QueueEntry>,
    now_playing: Option<usize>,
}

impl PlaylistState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn now_playing(&self) -> Option<usize> {
        self.now_playing
    }

    pub fn now_playing_entry(&self) -> Option<&QueueEntry> {
        self.now_playing.and_then(|i| self.entries.get(i))
    }

    /// Index of the first entry that has not been played yet.
    pub fn first_upcoming(&self) -> usize {
        self.now_playing.map_or(0, |i| i + 1)
    }

    /// Entries that have not started playing.
    pub fn upcoming(&self) -> &[QueueEntry] {
        &self.entries[self.first_upcoming()..]
    }

    /// Insert a new entry where `policy` places it and renumber positions.
    /// Returns the inserted entry.
    pub fn insert(
        &mut self,
        track_id: String,
        requester_id: String,
        policy: &dyn QueuePolicy,
    ) -> &QueueEntry {
        let position = policy
            .placement(self, &requester_id)
            .clamp(self.first_upcoming(), self.entries.len());
        self.entries.insert(
            position,
            QueueEntry {
                track_id,
                requester_id,
                position,
            },
        );
        for (i, entry) in self.entries.iter_mut().enumerate().skip(position) {
            entry.position = i;
        }
        &self.entries[position]
    }

    /// Move the cursor to the next entry. Returns the new index, or `None`
    /// if there is nothing after the current track (cursor unchanged).
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.first_upcoming();
        if next >= self.entries.len() {
            return None;
        }
        self.now_playing = Some(next);
        Some(next)
    }
}

/// Decides where a new request lands in the queue.
///
/// Implementations return an index in `first_upcoming()..=len()`; anything
/// outside that range is clamped by `PlaylistState::insert`.
pub trait QueuePolicy: Send {
    fn placement(&self, playlist: &PlaylistState, requester_id: &str) -> usize;
}

/// Requests play in the order they were received.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fifo;

impl QueuePolicy for Fifo {
    fn placement(&self, playlist: &PlaylistState, _requester_id: &str) -> usize {
        playlist.len()
    }
}

/// Round-robin between requesters among the upcoming entries.
///
/// Each upcoming entry belongs to a "round" equal to how many earlier
/// upcoming entries share its requester. A requester with `n` upcoming tracks
/// gets their next one placed in round `n`, i.e. just before the first entry
/// of a later round.
#[derive(Clone, Copy, Debug, Default)]
pub struct FairPlay;

impl QueuePolicy for FairPlay {
    fn placement(&self, playlist: &PlaylistState, requester_id: &str) -> usize {
        let upcoming = playlist.upcoming();
        let own_round = upcoming
            .iter()
            .filter(|e| e.requester_id == requester_id)
            .count();

        let mut seen: Vec<(&str, usize)> = Vec::new();
        for (offset, entry) in upcoming.iter().enumerate() {
            let round = match seen.iter_mut().find(|(r, _)| *r == entry.requester_id.as_str()) {
                Some((_, count)) => {
                    *count += 1;
                    *count - 1
                }
                None => {
                    seen.push((entry.requester_id.as_str(), 1));
                    0
                }
            };
            if round > own_round {
                return playlist.first_upcoming() + offset;
            }
        }
        playlist.len()
    }
}

/// Build the policy matching an advertisement's fair-play flag.
pub fn policy_for(fair_play: bool) -> Box<dyn QueuePolicy> {
    if fair_play {
        Box::new(FairPlay)
    } else {
        Box::new(Fifo)
    }
}
