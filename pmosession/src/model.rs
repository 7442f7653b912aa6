//! Value types shared by every layer of the session engine.
//!
//! Everything in here is an immutable value: snapshots are compared
//! structurally by the merge engine, so none of these types carries
//! interior mutability.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Descriptive metadata of a media item or of a whole playlist.
///
/// Missing fields stay `None`: adapters never invent a default title or
/// artwork when the source model does not carry one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_title: Option<String>,
    pub album_artist: Option<String>,
    pub display_title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub artwork_uri: Option<String>,
    pub media_uri: Option<String>,
    pub duration_ms: Option<u64>,
    pub is_playable: Option<bool>,
    pub user_rating: Option<String>,
    pub extras: BTreeMap<String, String>,
}

impl MediaMetadata {
    /// Canonical empty metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns a copy carrying only a title (used for queue titles).
    pub fn titled(title: impl Into<String>) -> Self {
        MediaMetadata {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// One entry of a playlist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaItem {
    /// Logical identity of the item. Empty when the source gave none.
    pub media_id: String,
    /// Playback URI, when known.
    pub uri: Option<String>,
    pub metadata: MediaMetadata,
}

impl MediaItem {
    pub fn new(media_id: impl Into<String>) -> Self {
        MediaItem {
            media_id: media_id.into(),
            uri: None,
            metadata: MediaMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MediaMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.metadata.duration_ms
    }
}

/// High-level playback phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
    Error,
}

impl PlaybackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "IDLE",
            PlaybackPhase::Buffering => "BUFFERING",
            PlaybackPhase::Ready => "READY",
            PlaybackPhase::Ended => "ENDED",
            PlaybackPhase::Error => "ERROR",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
    Group,
}

impl RepeatMode {
    /// Whether navigation past the last item wraps to the first one.
    pub fn wraps_playlist(&self) -> bool {
        matches!(self, RepeatMode::All | RepeatMode::Group)
    }
}

/// Error reported by the remote player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerError {
    pub code: i32,
    pub message: String,
}

impl PlayerError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        PlayerError {
            code,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackType {
    #[default]
    Local,
    Remote,
}

/// Output device description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub playback_type: PlaybackType,
    pub min_volume: u32,
    pub max_volume: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    #[default]
    Audio,
    Video,
    Text,
    Other,
}

/// A group of renditions the player can choose from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackGroup {
    pub id: String,
    pub kind: TrackKind,
    pub label: Option<String>,
    pub language: Option<String>,
    pub selected: bool,
}

/// Current track selection. Shared storage: cloning is cheap and the merge
/// engine can carry an excluded value over by reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<TrackGroup>", into = "Vec<TrackGroup>")]
pub struct Tracks(Arc<Vec<TrackGroup>>);

impl Tracks {
    pub fn new(groups: Vec<TrackGroup>) -> Self {
        Tracks(Arc::new(groups))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[TrackGroup] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &Tracks) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Tracks {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl From<Vec<TrackGroup>> for Tracks {
    fn from(groups: Vec<TrackGroup>) -> Self {
        Tracks::new(groups)
    }
}

impl From<Tracks> for Vec<TrackGroup> {
    fn from(tracks: Tracks) -> Self {
        tracks.0.as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metadata() {
        assert!(MediaMetadata::empty().is_empty());
        assert!(!MediaMetadata::titled("Queue").is_empty());
    }

    #[test]
    fn test_tracks_identity() {
        let tracks = Tracks::new(vec![TrackGroup {
            id: "a".into(),
            ..TrackGroup::default()
        }]);
        let same = tracks.clone();
        let equal = Tracks::new(tracks.groups().to_vec());

        assert!(tracks.ptr_eq(&same));
        assert!(!tracks.ptr_eq(&equal));
        assert_eq!(tracks, equal);
    }

    #[test]
    fn test_repeat_wrap() {
        assert!(RepeatMode::All.wraps_playlist());
        assert!(RepeatMode::Group.wraps_playlist());
        assert!(!RepeatMode::One.wraps_playlist());
        assert!(!RepeatMode::Off.wraps_playlist());
    }
}
