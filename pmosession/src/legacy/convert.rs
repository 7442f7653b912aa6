//! Builds full playback snapshots from accumulated legacy state.

use tracing::debug;

use crate::capabilities::{AvailableActions, LegacyActions, VolumeControlMode, translate};
use crate::legacy::adapter::to_timeline;
use crate::legacy::model::{
    LegacyMetadata, LegacyPlaybackState, LegacyPlayerInfo, LegacyQueue, LegacyState, repeat,
    shuffle,
};
use crate::model::{DeviceInfo, MediaMetadata, PlaybackPhase, PlayerError, RepeatMode};
use crate::snapshot::{ExclusionFlags, PlaybackSnapshot, Playlist, PositionState};

/// Keeps the last converted timeline so that an unchanged queue, metadata
/// and active id give back the very same playlist storage.
#[derive(Debug, Default)]
pub struct TimelineConverter {
    last: Option<LastTimeline>,
}

#[derive(Debug)]
struct LastTimeline {
    metadata: Option<LegacyMetadata>,
    queue: Option<LegacyQueue>,
    active_id: i64,
    playlist: Playlist,
    index: Option<usize>,
}

fn same_metadata(a: &Option<LegacyMetadata>, b: Option<&LegacyMetadata>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    }
}

fn same_queue(a: &Option<LegacyQueue>, b: Option<&LegacyQueue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    }
}

impl TimelineConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(
        &mut self,
        metadata: Option<&LegacyMetadata>,
        queue: Option<&LegacyQueue>,
        active_id: i64,
    ) -> (Playlist, Option<usize>) {
        if let Some(last) = &self.last {
            if last.active_id == active_id
                && same_metadata(&last.metadata, metadata)
                && same_queue(&last.queue, queue)
            {
                return (last.playlist.clone(), last.index);
            }
        }

        let (playlist, index) = to_timeline(metadata, queue, active_id);
        self.last = Some(LastTimeline {
            metadata: metadata.cloned(),
            queue: queue.cloned(),
            active_id,
            playlist: playlist.clone(),
            index,
        });
        (playlist, index)
    }
}

/// Phase of a legacy state. A paused item sitting at or past its known
/// duration is reported as ended.
pub fn phase_of(state: LegacyState, position_ms: u64, duration_ms: Option<u64>) -> PlaybackPhase {
    match state {
        LegacyState::Error => PlaybackPhase::Error,
        LegacyState::None | LegacyState::Stopped | LegacyState::Connecting => PlaybackPhase::Idle,
        LegacyState::Buffering
        | LegacyState::FastForwarding
        | LegacyState::Rewinding
        | LegacyState::SkippingToNext
        | LegacyState::SkippingToPrevious
        | LegacyState::SkippingToQueueItem => PlaybackPhase::Buffering,
        LegacyState::Playing => PlaybackPhase::Ready,
        LegacyState::Paused => match duration_ms {
            Some(duration) if position_ms >= duration => PlaybackPhase::Ended,
            _ => PlaybackPhase::Ready,
        },
    }
}

pub fn play_when_ready_of(state: LegacyState) -> bool {
    matches!(
        state,
        LegacyState::Playing
            | LegacyState::Buffering
            | LegacyState::FastForwarding
            | LegacyState::Rewinding
            | LegacyState::SkippingToNext
            | LegacyState::SkippingToPrevious
            | LegacyState::SkippingToQueueItem
    )
}

pub fn repeat_mode_of(code: i32) -> RepeatMode {
    match code {
        repeat::ONE => RepeatMode::One,
        repeat::ALL => RepeatMode::All,
        repeat::GROUP => RepeatMode::Group,
        // NONE, INVALID and unknown codes.
        _ => RepeatMode::Off,
    }
}

pub fn shuffle_enabled_of(code: i32) -> bool {
    matches!(code, shuffle::ALL | shuffle::GROUP)
}

pub fn error_of(state: &LegacyPlaybackState) -> Option<PlayerError> {
    if state.state != LegacyState::Error {
        return None;
    }
    Some(PlayerError::new(
        state.error_code,
        state.error_message.clone().unwrap_or_default(),
    ))
}

fn speed_of(state: &LegacyPlaybackState) -> f32 {
    if state.speed > 0.0 { state.speed } else { 1.0 }
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

/// Converts everything a legacy session published into a snapshot.
///
/// Legacy sessions do not report track selections, so the result always
/// flags tracks as excluded. The sequence number is left at 0: the caller
/// stamps it.
pub fn to_snapshot(
    info: &LegacyPlayerInfo,
    converter: &mut TimelineConverter,
    base: &PlaybackSnapshot,
    now_ms: u64,
) -> (PlaybackSnapshot, ExclusionFlags) {
    let (playlist, current_index) = converter.timeline(
        info.metadata.as_ref(),
        info.queue.as_ref(),
        info.active_queue_item_id(),
    );

    let default_state = LegacyPlaybackState::default();
    let state = info.playback_state.as_ref().unwrap_or(&default_state);
    let duration_ms = info.metadata.as_ref().and_then(|m| m.duration_ms());
    let position_ms = non_negative(state.position_ms);
    let is_playing_ad = info.metadata.as_ref().is_some_and(|m| m.is_advertisement());

    let capabilities = translate(
        &AvailableActions::Legacy {
            actions: LegacyActions::new(state.actions),
            handles_queue_commands: info.handles_queue_commands(),
        },
        info.playback_info
            .as_ref()
            .map(|p| p.volume_control)
            .unwrap_or(VolumeControlMode::Fixed),
        info.session_ready,
    );

    let (device_info, device_volume) = match &info.playback_info {
        Some(playback) => (
            DeviceInfo {
                playback_type: playback.playback_type,
                min_volume: 0,
                max_volume: playback.max_volume,
            },
            playback.current_volume,
        ),
        None => (base.device_info.clone(), base.device_volume),
    };

    let snapshot = PlaybackSnapshot {
        playlist,
        current_index,
        position: PositionState {
            position_ms,
            content_position_ms: position_ms,
            updated_at_ms: if state.last_update_time_ms == 0 {
                now_ms
            } else {
                state.last_update_time_ms
            },
            duration_ms,
            buffered_position_ms: non_negative(state.buffered_position_ms),
            total_buffered_duration_ms: non_negative(state.buffered_position_ms)
                .saturating_sub(position_ms),
            is_playing_ad,
        },
        speed: speed_of(state),
        play_when_ready: play_when_ready_of(state.state),
        playback_suppressed: false,
        phase: phase_of(state.state, position_ms, duration_ms),
        is_loading: false,
        repeat_mode: repeat_mode_of(info.repeat_mode),
        shuffle_enabled: shuffle_enabled_of(info.shuffle_mode),
        media_metadata: info
            .metadata
            .as_ref()
            .map(|m| m.to_media_metadata())
            .unwrap_or_default(),
        playlist_metadata: info
            .queue_title
            .as_ref()
            .map(MediaMetadata::titled)
            .unwrap_or_default(),
        capabilities,
        device_info,
        device_volume,
        device_muted: device_volume == 0,
        error: error_of(state),
        tracks: base.tracks.clone(),
        seek_back_increment_ms: base.seek_back_increment_ms,
        seek_forward_increment_ms: base.seek_forward_increment_ms,
        max_seek_to_previous_position_ms: base.max_seek_to_previous_position_ms,
        sequence: 0,
    };

    debug!(
        len = snapshot.playlist.len(),
        index = ?snapshot.current_index,
        phase = snapshot.phase.as_str(),
        "legacy state converted"
    );

    (
        snapshot,
        ExclusionFlags {
            timeline_excluded: false,
            tracks_excluded: true,
        },
    )
}
