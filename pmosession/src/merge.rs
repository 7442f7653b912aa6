//! Reconciliation of authoritative snapshots with the controller state.
//!
//! [`merge`] is a pure function. [`StateMergeEngine`] wraps it with the
//! snapshot lifecycle, so that nothing changes once the session is released.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capabilities::{Capability, CapabilitySet};
use crate::events::{
    DiscontinuityReason, MediaItemTransitionReason, TimelineChangeReason, TransitionHint,
};
use crate::model::{MediaItem, RepeatMode, Tracks};
use crate::snapshot::{ExclusionFlags, PlaybackSnapshot, Playlist};

/// Semantic fields tracked by change detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedField {
    Timeline,
    CurrentItem,
    MediaItemTransition,
    PositionDiscontinuity,
    PlaybackPhase,
    PlayWhenReady,
    IsPlaying,
    IsLoading,
    PlaybackParameters,
    RepeatMode,
    ShuffleMode,
    MediaMetadata,
    PlaylistMetadata,
    Tracks,
    AvailableCapabilities,
    DeviceInfo,
    DeviceVolume,
    PlayerError,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet(BTreeSet<ChangedField>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: ChangedField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: ChangedField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangedField> + '_ {
        self.0.iter().copied()
    }

    /// Adds the transition fields named by `hint`.
    pub fn with_transition(mut self, hint: &TransitionHint) -> Self {
        if hint.transition.is_some() {
            self.insert(ChangedField::MediaItemTransition);
        }
        if hint.discontinuity.is_some() {
            self.insert(ChangedField::PositionDiscontinuity);
        }
        self
    }
}

impl FromIterator<ChangedField> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ChangedField>>(iter: I) -> Self {
        ChangeSet(iter.into_iter().collect())
    }
}

/// Structural diff of two snapshots. Position is not compared: it moves
/// continuously and is reported through discontinuities instead.
pub fn diff(old: &PlaybackSnapshot, new: &PlaybackSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::new();
    let mut mark = |changed: bool, field: ChangedField| {
        if changed {
            changes.insert(field);
        }
    };

    mark(old.playlist != new.playlist, ChangedField::Timeline);
    mark(
        old.current_index != new.current_index || old.current_item() != new.current_item(),
        ChangedField::CurrentItem,
    );
    mark(old.phase != new.phase, ChangedField::PlaybackPhase);
    mark(
        old.play_when_ready != new.play_when_ready,
        ChangedField::PlayWhenReady,
    );
    mark(old.is_playing() != new.is_playing(), ChangedField::IsPlaying);
    mark(old.is_loading != new.is_loading, ChangedField::IsLoading);
    mark(old.speed != new.speed, ChangedField::PlaybackParameters);
    mark(old.repeat_mode != new.repeat_mode, ChangedField::RepeatMode);
    mark(
        old.shuffle_enabled != new.shuffle_enabled,
        ChangedField::ShuffleMode,
    );
    mark(
        old.media_metadata != new.media_metadata,
        ChangedField::MediaMetadata,
    );
    mark(
        old.playlist_metadata != new.playlist_metadata,
        ChangedField::PlaylistMetadata,
    );
    mark(old.tracks != new.tracks, ChangedField::Tracks);
    mark(
        old.capabilities != new.capabilities,
        ChangedField::AvailableCapabilities,
    );
    mark(old.device_info != new.device_info, ChangedField::DeviceInfo);
    mark(
        old.device_volume != new.device_volume || old.device_muted != new.device_muted,
        ChangedField::DeviceVolume,
    );
    mark(old.error != new.error, ChangedField::PlayerError);

    changes
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub snapshot: PlaybackSnapshot,
    pub exclusions: ExclusionFlags,
    pub changes: ChangeSet,
}

/// Merges `new` into `old`.
///
/// Excluded fields are carried over from `old` by reference. Fields the
/// capability set does not allow to observe are forced empty and flagged
/// excluded, whatever the flags said. Everything else comes from `new`.
pub fn merge(
    old: &PlaybackSnapshot,
    old_exclusions: &ExclusionFlags,
    new: &PlaybackSnapshot,
    new_exclusions: &ExclusionFlags,
    capabilities: &CapabilitySet,
) -> MergeOutcome {
    let mut merged = new.clone();
    let mut exclusions = ExclusionFlags::NONE;

    if new_exclusions.timeline_excluded {
        merged.playlist = old.playlist.clone();
        exclusions.timeline_excluded = true;
    }
    if new_exclusions.tracks_excluded {
        merged.tracks = old.tracks.clone();
        exclusions.tracks_excluded = true;
    }

    if !capabilities.contains(Capability::GetTimeline) {
        merged.playlist = Playlist::empty();
        merged.current_index = None;
        exclusions.timeline_excluded = true;
    }
    if !capabilities.contains(Capability::GetTracks) {
        merged.tracks = Tracks::empty();
        exclusions.tracks_excluded = true;
    }

    merged.capabilities = *capabilities;
    let merged = merged.normalized();
    let changes = diff(old, &merged);

    trace!(
        previously_excluded = ?old_exclusions,
        excluded = ?exclusions,
        changed = changes.len(),
        "snapshot merged"
    );

    MergeOutcome {
        snapshot: merged,
        exclusions,
        changes,
    }
}

/// Lifecycle of the controller-side snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SnapshotLifecycle {
    #[default]
    PendingFirstConnect,
    SteadyState,
    Released,
}

/// Merge entry point bound to a snapshot lifecycle.
#[derive(Debug, Default)]
pub struct StateMergeEngine {
    lifecycle: SnapshotLifecycle,
}

impl StateMergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifecycle(&self) -> SnapshotLifecycle {
        self.lifecycle
    }

    pub fn is_released(&self) -> bool {
        self.lifecycle == SnapshotLifecycle::Released
    }

    /// Same as [`merge`], except that a released engine returns `old`
    /// unchanged with no changes.
    pub fn merge(
        &mut self,
        old: &PlaybackSnapshot,
        old_exclusions: &ExclusionFlags,
        new: &PlaybackSnapshot,
        new_exclusions: &ExclusionFlags,
        capabilities: &CapabilitySet,
    ) -> MergeOutcome {
        if self.is_released() {
            trace!("merge ignored, session released");
            return MergeOutcome {
                snapshot: old.clone(),
                exclusions: *old_exclusions,
                changes: ChangeSet::new(),
            };
        }
        if self.lifecycle == SnapshotLifecycle::PendingFirstConnect {
            debug!("first authoritative snapshot received");
            self.lifecycle = SnapshotLifecycle::SteadyState;
        }
        merge(old, old_exclusions, new, new_exclusions, capabilities)
    }

    pub fn release(&mut self) {
        if !self.is_released() {
            debug!("session snapshot released");
        }
        self.lifecycle = SnapshotLifecycle::Released;
    }
}

/// Finds `item` in `playlist`, preferring `near` when several entries match.
fn locate(playlist: &Playlist, item: &MediaItem, near: usize) -> Option<usize> {
    let matches = |candidate: &MediaItem| {
        if item.media_id.is_empty() {
            candidate == item
        } else {
            candidate.media_id == item.media_id
        }
    };

    if playlist.get(near).is_some_and(matches) {
        return Some(near);
    }
    playlist.items().iter().position(matches)
}

/// Reasons for the position jump and item change between two authoritative
/// snapshots, when no local command explains them.
pub fn infer_transition(
    old: &PlaybackSnapshot,
    new: &PlaybackSnapshot,
    now_ms: u64,
    tolerance_ms: u64,
) -> TransitionHint {
    item_transition(old, new, now_ms, tolerance_ms).with_timeline_reason(timeline_reason(old, new))
}

/// Same media ids in the same order: the authority refreshed the items
/// themselves rather than editing the playlist.
fn timeline_reason(old: &PlaybackSnapshot, new: &PlaybackSnapshot) -> TimelineChangeReason {
    let same_ids = old.playlist.len() == new.playlist.len()
        && old
            .playlist
            .items()
            .iter()
            .zip(new.playlist.items())
            .all(|(a, b)| a.media_id == b.media_id);
    if same_ids && !old.playlist.is_empty() {
        TimelineChangeReason::SourceUpdate
    } else {
        TimelineChangeReason::PlaylistChanged
    }
}

fn item_transition(
    old: &PlaybackSnapshot,
    new: &PlaybackSnapshot,
    now_ms: u64,
    tolerance_ms: u64,
) -> TransitionHint {
    if new.playlist.is_empty() && old.playlist.is_empty() {
        return TransitionHint::NONE;
    }
    if old.playlist.is_empty() {
        return TransitionHint::new(
            Some(DiscontinuityReason::AutoTransition),
            Some(MediaItemTransitionReason::PlaylistChanged),
        );
    }

    let (Some(old_index), Some(old_item)) = (old.current_index, old.current_item()) else {
        return TransitionHint::NONE;
    };

    match locate(&new.playlist, old_item, old_index) {
        None => TransitionHint::new(
            Some(DiscontinuityReason::Remove),
            Some(MediaItemTransitionReason::PlaylistChanged),
        ),
        Some(found) if Some(found) == new.current_index => {
            let old_position = old.current_position(now_ms);
            let new_position = new.current_position(now_ms);
            if new.repeat_mode == RepeatMode::One
                && new_position == 0
                && old_position > tolerance_ms
            {
                TransitionHint::new(
                    Some(DiscontinuityReason::AutoTransition),
                    Some(MediaItemTransitionReason::Repeat),
                )
            } else if old_position.abs_diff(new_position) > tolerance_ms {
                TransitionHint::new(Some(DiscontinuityReason::Internal), None)
            } else {
                TransitionHint::NONE
            }
        }
        Some(_) => TransitionHint::new(
            Some(DiscontinuityReason::AutoTransition),
            Some(MediaItemTransitionReason::Auto),
        ),
    }
}
