//! Playback snapshots: the unit exchanged between the authority, the merge
//! engine and the masking layer.
//!
//! A snapshot is a plain value. Expensive parts (playlist, tracks) live in
//! shared storage so that carrying them from one snapshot to the next is a
//! pointer copy, and so that "nothing changed" can be checked by identity
//! before falling back to a structural comparison.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::CapabilitySet;
use crate::model::{
    DeviceInfo, MediaItem, MediaMetadata, PlaybackPhase, PlayerError, RepeatMode, Tracks,
};
use crate::position;

pub const DEFAULT_SEEK_BACK_INCREMENT_MS: u64 = 5_000;
pub const DEFAULT_SEEK_FORWARD_INCREMENT_MS: u64 = 15_000;
pub const DEFAULT_MAX_SEEK_TO_PREVIOUS_POSITION_MS: u64 = 3_000;

/// Ordered list of media items.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MediaItem>", into = "Vec<MediaItem>")]
pub struct Playlist(Arc<Vec<MediaItem>>);

impl Playlist {
    pub fn new(items: Vec<MediaItem>) -> Self {
        Playlist(Arc::new(items))
    }

    /// Canonical empty playlist.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MediaItem> {
        self.0.get(index)
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.0
    }

    /// Returns a mutable copy of the items, leaving `self` untouched.
    pub fn to_vec(&self) -> Vec<MediaItem> {
        self.0.as_ref().clone()
    }

    /// Same backing storage (reference identity).
    pub fn ptr_eq(&self, other: &Playlist) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Index of the first item carrying `media_id`.
    pub fn position_of(&self, media_id: &str) -> Option<usize> {
        self.0.iter().position(|item| item.media_id == media_id)
    }
}

impl PartialEq for Playlist {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl From<Vec<MediaItem>> for Playlist {
    fn from(items: Vec<MediaItem>) -> Self {
        Playlist::new(items)
    }
}

impl From<Playlist> for Vec<MediaItem> {
    fn from(playlist: Playlist) -> Self {
        playlist.to_vec()
    }
}

/// Position bookkeeping of a snapshot.
///
/// `position_ms` was valid at `updated_at_ms` (controller clock); readers
/// extrapolate from there with [`PlaybackSnapshot::current_position`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionState {
    pub position_ms: u64,
    pub content_position_ms: u64,
    pub updated_at_ms: u64,
    pub duration_ms: Option<u64>,
    pub buffered_position_ms: u64,
    pub total_buffered_duration_ms: u64,
    pub is_playing_ad: bool,
}

impl PositionState {
    /// Position reset to `position_ms` on a fresh item.
    pub fn starting_at(position_ms: u64, now_ms: u64, duration_ms: Option<u64>) -> Self {
        PositionState {
            position_ms,
            content_position_ms: position_ms,
            updated_at_ms: now_ms,
            duration_ms,
            buffered_position_ms: position_ms,
            total_buffered_duration_ms: 0,
            is_playing_ad: false,
        }
    }
}

/// Fields the authority left out of a partial update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionFlags {
    pub timeline_excluded: bool,
    pub tracks_excluded: bool,
}

impl ExclusionFlags {
    pub const NONE: ExclusionFlags = ExclusionFlags {
        timeline_excluded: false,
        tracks_excluded: false,
    };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Full playback state as seen by the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSnapshot {
    pub playlist: Playlist,
    pub current_index: Option<usize>,
    pub position: PositionState,
    pub speed: f32,
    pub play_when_ready: bool,
    pub playback_suppressed: bool,
    pub phase: PlaybackPhase,
    pub is_loading: bool,
    pub repeat_mode: RepeatMode,
    pub shuffle_enabled: bool,
    pub media_metadata: MediaMetadata,
    pub playlist_metadata: MediaMetadata,
    pub capabilities: CapabilitySet,
    pub device_info: DeviceInfo,
    pub device_volume: u32,
    pub device_muted: bool,
    pub error: Option<PlayerError>,
    pub tracks: Tracks,
    pub seek_back_increment_ms: u64,
    pub seek_forward_increment_ms: u64,
    pub max_seek_to_previous_position_ms: u64,
    /// Highest command sequence number this snapshot already reflects.
    pub sequence: u64,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        PlaybackSnapshot {
            playlist: Playlist::empty(),
            current_index: None,
            position: PositionState::default(),
            speed: 1.0,
            play_when_ready: false,
            playback_suppressed: false,
            phase: PlaybackPhase::Idle,
            is_loading: false,
            repeat_mode: RepeatMode::Off,
            shuffle_enabled: false,
            media_metadata: MediaMetadata::empty(),
            playlist_metadata: MediaMetadata::empty(),
            capabilities: CapabilitySet::empty(),
            device_info: DeviceInfo::default(),
            device_volume: 0,
            device_muted: false,
            error: None,
            tracks: Tracks::empty(),
            seek_back_increment_ms: DEFAULT_SEEK_BACK_INCREMENT_MS,
            seek_forward_increment_ms: DEFAULT_SEEK_FORWARD_INCREMENT_MS,
            max_seek_to_previous_position_ms: DEFAULT_MAX_SEEK_TO_PREVIOUS_POSITION_MS,
            sequence: 0,
        }
    }
}

impl PlaybackSnapshot {
    pub fn current_item(&self) -> Option<&MediaItem> {
        self.current_index.and_then(|i| self.playlist.get(i))
    }

    /// Whether the position is currently moving.
    pub fn is_advancing(&self) -> bool {
        self.phase == PlaybackPhase::Ready && self.play_when_ready && !self.playback_suppressed
    }

    pub fn is_playing(&self) -> bool {
        self.is_advancing()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.position
            .duration_ms
            .or_else(|| self.current_item().and_then(|item| item.duration_ms()))
    }

    /// Position extrapolated to `now_ms`.
    pub fn current_position(&self, now_ms: u64) -> u64 {
        position::current_position(
            self.position.position_ms,
            self.position.updated_at_ms,
            self.speed,
            self.is_advancing(),
            self.duration_ms(),
            now_ms,
        )
    }

    /// Content position at `now_ms`; frozen while an ad plays.
    pub fn content_position(&self, now_ms: u64) -> u64 {
        position::content_position(
            self.position.content_position_ms,
            self.position.updated_at_ms,
            self.speed,
            self.is_advancing(),
            self.position.is_playing_ad,
            self.duration_ms(),
            now_ms,
        )
    }

    pub fn buffered_position(&self, now_ms: u64) -> u64 {
        position::buffered_position(
            self.position.buffered_position_ms,
            self.current_position(now_ms),
            self.duration_ms(),
        )
    }

    pub fn total_buffered_duration(&self, now_ms: u64) -> u64 {
        position::total_buffered_duration(self.buffered_position(now_ms), self.current_position(now_ms))
    }

    pub fn buffered_percentage(&self, now_ms: u64) -> u8 {
        position::buffered_percentage(Some(self.buffered_position(now_ms)), self.duration_ms())
    }

    /// Re-anchors the position at `now_ms`, e.g. before a speed or
    /// play/pause change, so the extrapolation restarts from the right value.
    pub fn with_position_rebased(&self, now_ms: u64) -> PlaybackSnapshot {
        let mut next = self.clone();
        next.position.position_ms = self.current_position(now_ms);
        next.position.content_position_ms = self.content_position(now_ms);
        next.position.updated_at_ms = now_ms;
        next
    }

    pub fn with_playlist(&self, playlist: Playlist, current_index: Option<usize>) -> PlaybackSnapshot {
        let mut next = self.clone();
        next.playlist = playlist;
        next.current_index = current_index;
        next
    }

    pub fn with_tracks(&self, tracks: Tracks) -> PlaybackSnapshot {
        let mut next = self.clone();
        next.tracks = tracks;
        next
    }

    pub fn with_phase(&self, phase: PlaybackPhase) -> PlaybackSnapshot {
        let mut next = self.clone();
        next.phase = phase;
        next
    }

    /// Restores the index invariant: in range, or unset on an empty playlist.
    pub fn normalized(mut self) -> PlaybackSnapshot {
        let len = self.playlist.len();
        self.current_index = match (len, self.current_index) {
            (0, _) => None,
            (_, None) => Some(0),
            (len, Some(i)) if i >= len => Some(len - 1),
            (_, index) => index,
        };
        self
    }

    pub fn index_invariant_holds(&self) -> bool {
        match self.current_index {
            None => self.playlist.is_empty(),
            Some(i) => i < self.playlist.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<MediaItem> {
        ids.iter().map(|id| MediaItem::new(*id)).collect()
    }

    #[test]
    fn test_playlist_identity_and_equality() {
        let playlist = Playlist::new(items(&["a", "b"]));
        let shared = playlist.clone();
        let rebuilt = Playlist::new(items(&["a", "b"]));

        assert!(playlist.ptr_eq(&shared));
        assert!(!playlist.ptr_eq(&rebuilt));
        assert_eq!(playlist, rebuilt);
        assert_eq!(playlist.position_of("b"), Some(1));
        assert_eq!(playlist.position_of("z"), None);
    }

    #[test]
    fn test_normalized_restores_index_invariant() {
        let snapshot = PlaybackSnapshot {
            playlist: Playlist::new(items(&["a", "b"])),
            current_index: Some(7),
            ..PlaybackSnapshot::default()
        }
        .normalized();
        assert_eq!(snapshot.current_index, Some(1));

        let empty = PlaybackSnapshot {
            current_index: Some(3),
            ..PlaybackSnapshot::default()
        }
        .normalized();
        assert_eq!(empty.current_index, None);
        assert!(empty.index_invariant_holds());
    }

    #[test]
    fn test_rebase_keeps_extrapolated_position() {
        let snapshot = PlaybackSnapshot {
            playlist: Playlist::new(items(&["a"])),
            current_index: Some(0),
            phase: PlaybackPhase::Ready,
            play_when_ready: true,
            position: PositionState::starting_at(1_000, 10, None),
            ..PlaybackSnapshot::default()
        };

        let rebased = snapshot.with_position_rebased(510);
        assert_eq!(rebased.position.position_ms, 1_500);
        assert_eq!(rebased.position.updated_at_ms, 510);
        assert_eq!(rebased.current_position(510), snapshot.current_position(510));
    }

    #[test]
    fn test_duration_falls_back_to_item_metadata() {
        let item = MediaItem::new("a").with_metadata(MediaMetadata {
            duration_ms: Some(90_000),
            ..MediaMetadata::default()
        });
        let snapshot = PlaybackSnapshot {
            playlist: Playlist::new(vec![item]),
            current_index: Some(0),
            ..PlaybackSnapshot::default()
        };
        assert_eq!(snapshot.duration_ms(), Some(90_000));
    }

    #[test]
    fn test_snapshot_serde() {
        let snapshot = PlaybackSnapshot {
            playlist: Playlist::new(items(&["a", "b"])),
            current_index: Some(1),
            ..PlaybackSnapshot::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: PlaybackSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
