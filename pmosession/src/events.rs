//! Change notifications emitted after every merge or masking cycle.
//!
//! Each cycle produces an ordered list of granular [`SessionEvent`]s followed
//! by a single [`SessionEvent::Events`] batch naming every field that
//! changed. Observers either implement [`SessionListener`] (closures work
//! too) or subscribe to the [`SessionEventBus`].

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::capabilities::CapabilitySet;
use crate::merge::{ChangeSet, ChangedField};
use crate::model::{
    DeviceInfo, MediaItem, MediaMetadata, PlaybackPhase, PlayerError, RepeatMode, Tracks,
};
use crate::snapshot::{PlaybackSnapshot, Playlist};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityReason {
    AutoTransition,
    Seek,
    Remove,
    Internal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaItemTransitionReason {
    Repeat,
    Auto,
    Seek,
    PlaylistChanged,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineChangeReason {
    #[default]
    PlaylistChanged,
    SourceUpdate,
}

/// Why the position and current item moved in a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransitionHint {
    pub discontinuity: Option<DiscontinuityReason>,
    pub transition: Option<MediaItemTransitionReason>,
    pub timeline_reason: TimelineChangeReason,
}

impl TransitionHint {
    pub const NONE: TransitionHint = TransitionHint {
        discontinuity: None,
        transition: None,
        timeline_reason: TimelineChangeReason::PlaylistChanged,
    };

    pub fn new(
        discontinuity: Option<DiscontinuityReason>,
        transition: Option<MediaItemTransitionReason>,
    ) -> Self {
        TransitionHint {
            discontinuity,
            transition,
            timeline_reason: TimelineChangeReason::PlaylistChanged,
        }
    }

    pub fn with_timeline_reason(mut self, reason: TimelineChangeReason) -> Self {
        self.timeline_reason = reason;
        self
    }
}

/// Position of the playhead at one side of a discontinuity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub media_item_index: Option<usize>,
    pub media_id: Option<String>,
    pub position_ms: u64,
    pub content_position_ms: u64,
}

impl PositionInfo {
    pub fn of(snapshot: &PlaybackSnapshot, now_ms: u64) -> Self {
        PositionInfo {
            media_item_index: snapshot.current_index,
            media_id: snapshot.current_item().map(|item| item.media_id.clone()),
            position_ms: snapshot.current_position(now_ms),
            content_position_ms: snapshot.content_position(now_ms),
        }
    }
}

/// The fields of a cycle, listed once after the granular events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub fields: ChangeSet,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    TimelineChanged {
        playlist: Playlist,
        reason: TimelineChangeReason,
    },
    MediaItemTransition {
        item: Option<MediaItem>,
        old_index: Option<usize>,
        new_index: Option<usize>,
        reason: MediaItemTransitionReason,
    },
    PositionDiscontinuity {
        old: PositionInfo,
        new: PositionInfo,
        reason: DiscontinuityReason,
    },
    PlaybackPhaseChanged(PlaybackPhase),
    PlayWhenReadyChanged(bool),
    IsPlayingChanged(bool),
    IsLoadingChanged(bool),
    PlaybackParametersChanged {
        speed: f32,
    },
    RepeatModeChanged(RepeatMode),
    ShuffleModeChanged(bool),
    MediaMetadataChanged(MediaMetadata),
    PlaylistMetadataChanged(MediaMetadata),
    TracksChanged(Tracks),
    AvailableCapabilitiesChanged(CapabilitySet),
    DeviceInfoChanged(DeviceInfo),
    DeviceVolumeChanged {
        volume: u32,
        muted: bool,
    },
    PlayerErrorChanged(Option<PlayerError>),
    Disconnected,
    Events(EventBatch),
}

impl SessionEvent {
    /// Short name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::TimelineChanged { .. } => "timeline_changed",
            SessionEvent::MediaItemTransition { .. } => "media_item_transition",
            SessionEvent::PositionDiscontinuity { .. } => "position_discontinuity",
            SessionEvent::PlaybackPhaseChanged(_) => "playback_phase_changed",
            SessionEvent::PlayWhenReadyChanged(_) => "play_when_ready_changed",
            SessionEvent::IsPlayingChanged(_) => "is_playing_changed",
            SessionEvent::IsLoadingChanged(_) => "is_loading_changed",
            SessionEvent::PlaybackParametersChanged { .. } => "playback_parameters_changed",
            SessionEvent::RepeatModeChanged(_) => "repeat_mode_changed",
            SessionEvent::ShuffleModeChanged(_) => "shuffle_mode_changed",
            SessionEvent::MediaMetadataChanged(_) => "media_metadata_changed",
            SessionEvent::PlaylistMetadataChanged(_) => "playlist_metadata_changed",
            SessionEvent::TracksChanged(_) => "tracks_changed",
            SessionEvent::AvailableCapabilitiesChanged(_) => "available_capabilities_changed",
            SessionEvent::DeviceInfoChanged(_) => "device_info_changed",
            SessionEvent::DeviceVolumeChanged { .. } => "device_volume_changed",
            SessionEvent::PlayerErrorChanged(_) => "player_error_changed",
            SessionEvent::Disconnected => "disconnected",
            SessionEvent::Events(_) => "events",
        }
    }
}

/// Builds the ordered events of one cycle.
///
/// `changes` is the structural diff between `old` and `new`; `hint` carries
/// the discontinuity and transition reasons, which cannot be derived from a
/// plain diff. Nothing is emitted, not even the batch, when neither has
/// anything to report.
pub fn build_events(
    old: &PlaybackSnapshot,
    new: &PlaybackSnapshot,
    changes: &ChangeSet,
    hint: &TransitionHint,
    now_ms: u64,
) -> Vec<SessionEvent> {
    let fields = changes.clone().with_transition(hint);
    let mut events = Vec::new();

    if fields.contains(ChangedField::Timeline) {
        events.push(SessionEvent::TimelineChanged {
            playlist: new.playlist.clone(),
            reason: hint.timeline_reason,
        });
    }
    if let Some(reason) = hint.transition {
        events.push(SessionEvent::MediaItemTransition {
            item: new.current_item().cloned(),
            old_index: old.current_index,
            new_index: new.current_index,
            reason,
        });
    }
    if let Some(reason) = hint.discontinuity {
        events.push(SessionEvent::PositionDiscontinuity {
            old: PositionInfo::of(old, now_ms),
            new: PositionInfo::of(new, now_ms),
            reason,
        });
    }
    if fields.contains(ChangedField::PlaybackPhase) {
        events.push(SessionEvent::PlaybackPhaseChanged(new.phase));
    }
    if fields.contains(ChangedField::PlayWhenReady) {
        events.push(SessionEvent::PlayWhenReadyChanged(new.play_when_ready));
    }
    if fields.contains(ChangedField::IsPlaying) {
        events.push(SessionEvent::IsPlayingChanged(new.is_playing()));
    }
    if fields.contains(ChangedField::IsLoading) {
        events.push(SessionEvent::IsLoadingChanged(new.is_loading));
    }
    if fields.contains(ChangedField::PlaybackParameters) {
        events.push(SessionEvent::PlaybackParametersChanged { speed: new.speed });
    }
    if fields.contains(ChangedField::RepeatMode) {
        events.push(SessionEvent::RepeatModeChanged(new.repeat_mode));
    }
    if fields.contains(ChangedField::ShuffleMode) {
        events.push(SessionEvent::ShuffleModeChanged(new.shuffle_enabled));
    }
    if fields.contains(ChangedField::MediaMetadata) {
        events.push(SessionEvent::MediaMetadataChanged(new.media_metadata.clone()));
    }
    if fields.contains(ChangedField::PlaylistMetadata) {
        events.push(SessionEvent::PlaylistMetadataChanged(
            new.playlist_metadata.clone(),
        ));
    }
    if fields.contains(ChangedField::Tracks) {
        events.push(SessionEvent::TracksChanged(new.tracks.clone()));
    }
    if fields.contains(ChangedField::DeviceInfo) {
        events.push(SessionEvent::DeviceInfoChanged(new.device_info.clone()));
    }
    if fields.contains(ChangedField::DeviceVolume) {
        events.push(SessionEvent::DeviceVolumeChanged {
            volume: new.device_volume,
            muted: new.device_muted,
        });
    }
    if fields.contains(ChangedField::AvailableCapabilities) {
        events.push(SessionEvent::AvailableCapabilitiesChanged(new.capabilities));
    }
    if fields.contains(ChangedField::PlayerError) {
        events.push(SessionEvent::PlayerErrorChanged(new.error.clone()));
    }

    if !fields.is_empty() {
        events.push(SessionEvent::Events(EventBatch { fields }));
    }

    trace!(count = events.len(), "session events built");
    events
}

/// Observer of session events, called on the owning thread.
pub trait SessionListener: Send {
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Delivers `events`, in order, to every listener.
pub fn dispatch_events(listeners: &mut [Box<dyn SessionListener>], events: &[SessionEvent]) {
    for event in events {
        for listener in listeners.iter_mut() {
            listener.on_event(event);
        }
    }
}

/// Fan-out of session events to channel subscribers.
#[derive(Clone, Default)]
pub struct SessionEventBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionEvent>>>>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded::<SessionEvent>();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.push(tx);
        }
        rx
    }

    /// Sends `event` to every live subscriber; dropped receivers are pruned.
    pub fn broadcast(&self, event: SessionEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::diff;

    fn playlist(ids: &[&str]) -> Playlist {
        Playlist::new(ids.iter().map(|id| MediaItem::new(*id)).collect())
    }

    #[test]
    fn test_no_change_no_event() {
        let snapshot = PlaybackSnapshot::default();
        let events = build_events(
            &snapshot,
            &snapshot,
            &diff(&snapshot, &snapshot),
            &TransitionHint::NONE,
            0,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_batch_closes_the_cycle() {
        let old = PlaybackSnapshot::default();
        let new = PlaybackSnapshot {
            repeat_mode: RepeatMode::All,
            shuffle_enabled: true,
            ..PlaybackSnapshot::default()
        };
        let events = build_events(&old, &new, &diff(&old, &new), &TransitionHint::NONE, 0);

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SessionEvent::RepeatModeChanged(RepeatMode::All));
        assert_eq!(events[1], SessionEvent::ShuffleModeChanged(true));
        match &events[2] {
            SessionEvent::Events(batch) => {
                assert!(batch.fields.contains(ChangedField::RepeatMode));
                assert!(batch.fields.contains(ChangedField::ShuffleMode));
                assert_eq!(batch.fields.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_transition_events_follow_hint() {
        let old = PlaybackSnapshot {
            playlist: playlist(&["a", "b", "c"]),
            current_index: Some(0),
            ..PlaybackSnapshot::default()
        };
        let new = PlaybackSnapshot {
            current_index: Some(2),
            ..old.clone()
        };
        let hint = TransitionHint::new(
            Some(DiscontinuityReason::AutoTransition),
            Some(MediaItemTransitionReason::Auto),
        );
        let events = build_events(&old, &new, &diff(&old, &new), &hint, 0);

        let transitions: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::MediaItemTransition { .. }))
            .collect();
        let discontinuities: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::PositionDiscontinuity { .. }))
            .collect();
        assert_eq!(transitions.len(), 1);
        assert_eq!(discontinuities.len(), 1);
        assert!(matches!(
            transitions[0],
            SessionEvent::MediaItemTransition {
                old_index: Some(0),
                new_index: Some(2),
                reason: MediaItemTransitionReason::Auto,
                ..
            }
        ));
    }

    #[test]
    fn test_bus_prunes_dropped_subscribers() {
        let bus = SessionEventBus::new();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.broadcast(SessionEvent::Disconnected);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), SessionEvent::Disconnected);
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut listeners: Vec<Box<dyn SessionListener>> =
            vec![Box::new(move |event: &SessionEvent| {
                sink.lock().unwrap().push(event.name());
            })];

        dispatch_events(
            &mut listeners,
            &[SessionEvent::ShuffleModeChanged(true), SessionEvent::Disconnected],
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["shuffle_mode_changed", "disconnected"]
        );
    }
}
