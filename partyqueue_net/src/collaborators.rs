// Interfaces to the external collaborators the sessions call into.
//
// - `PlaybackEngine` (host side) is told about every queued entry and every
//   now-playing change, synchronously and before the matching broadcast goes
//   out, so anything it publishes (e.g. a remote playlist) is already current
//   when clients react to the broadcast.
// - `Catalog` (client side) turns track ids / playlist positions into
//   metadata for the client's read-only mirror.
//
// Audio, search and UI live behind these traits; the sessions never do more
// than call them. Null implementations are provided for headless use.

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::playlist::{PlaylistState, QueueEntry};

/// Display metadata for a track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl TrackMetadata {
    /// Metadata carrying only the track id, for when nothing better is known.
    pub fn bare(track_id: impl Into<String>) -> Self {
        let track_id = track_id.into();
        Self {
            title: track_id.clone(),
            track_id,
            artist: String::new(),
            duration_ms: None,
        }
    }
}

/// Host-side playback engine.
pub trait PlaybackEngine: Send {
    /// A new entry was inserted. `playlist` already contains it.
    fn entry_queued(&mut self, entry: &QueueEntry, playlist: &PlaylistState);

    /// Playback moved to `entry`.
    fn now_playing(&mut self, entry: &QueueEntry);
}

/// Playback engine that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPlayback;

impl PlaybackEngine for NoPlayback {
    fn entry_queued(&mut self, _entry: &QueueEntry, _playlist: &PlaylistState) {}

    fn now_playing(&mut self, _entry: &QueueEntry) {}
}

/// Client-side catalog service.
pub trait Catalog: Send + 'static {
    /// Metadata for a single track id.
    fn resolve(&self, track_id: &str) -> Result<TrackMetadata, CatalogError>;

    /// The full shared playlist as the catalog currently knows it.
    fn playlist(&self, playlist_id: &str) -> Result<Vec<TrackMetadata>, CatalogError>;

    /// The track at `index` in the shared playlist.
    fn track_at(&self, playlist_id: &str, index: usize) -> Result<TrackMetadata, CatalogError> {
        self.playlist(playlist_id)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| CatalogError::NotFound(format!("{playlist_id}[{index}]")))
    }
}

/// Catalog that knows nothing. Mirrors built with it hold unresolved
/// entries only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCatalog;

impl Catalog for NullCatalog {
    fn resolve(&self, track_id: &str) -> Result<TrackMetadata, CatalogError> {
        Err(CatalogError::Unavailable(format!("no catalog to resolve {track_id}")))
    }

    fn playlist(&self, playlist_id: &str) -> Result<Vec<TrackMetadata>, CatalogError> {
        Err(CatalogError::Unavailable(format!("no catalog to fetch {playlist_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn track_at_defaults_to_playlist_lookup() {
        let catalog = FixedCatalog(vec![TrackMetadata::bare("t0"), TrackMetadata::bare("t1")]);
        assert_eq!(catalog.track_at("pl", 1).unwrap().track_id, "t1");
        assert_eq!(
            catalog.track_at("pl", 2),
            Err(CatalogError::NotFound("pl[2]".into()))
        );
    }

    #[test]
    fn null_catalog_is_unavailable() {
        assert!(matches!(
            NullCatalog.resolve("t0"),
            Err(CatalogError::Unavailable(_))
        ));
        assert!(matches!(
            NullCatalog.track_at("pl", 0),
            Err(CatalogError::Unavailable(_))
        ));
    }
}
