//! Optimistic masking of user commands.
//!
//! A command's expected effect is applied to the visible snapshot as soon as
//! it is issued. The command stays pending until an authoritative snapshot
//! confirming its sequence number is merged; until then it is re-applied on
//! top of every authoritative snapshot, in issue order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capabilities::{Capability, CapabilitySet};
use crate::events::{DiscontinuityReason, MediaItemTransitionReason, TransitionHint};
use crate::model::{MediaItem, MediaMetadata, PlaybackPhase, RepeatMode};
use crate::snapshot::{PlaybackSnapshot, Playlist, PositionState};

/// User commands understood by the masking layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetMediaItems {
        items: Vec<MediaItem>,
        start_index: Option<usize>,
        start_position_ms: Option<u64>,
    },
    SeekTo {
        index: usize,
        position_ms: u64,
    },
    SeekInCurrent {
        position_ms: u64,
    },
    SeekToDefaultPosition,
    SeekBack,
    SeekForward,
    SeekToNextItem,
    SeekToPreviousItem,
    SeekToNext,
    SeekToPrevious,
    AddMediaItems {
        index: usize,
        items: Vec<MediaItem>,
    },
    RemoveMediaItems {
        from: usize,
        to: usize,
    },
    MoveMediaItems {
        from: usize,
        to: usize,
        new_index: usize,
    },
    ReplaceMediaItems {
        from: usize,
        to: usize,
        items: Vec<MediaItem>,
    },
    SetRepeatMode {
        mode: RepeatMode,
    },
    SetShuffle {
        enabled: bool,
    },
    SetPlayWhenReady {
        play_when_ready: bool,
    },
    Stop,
    Prepare,
    SetSpeed {
        speed: f32,
    },
    SetDeviceVolume {
        volume: u32,
    },
    SetDeviceMuted {
        muted: bool,
    },
    SetPlaylistMetadata {
        metadata: MediaMetadata,
    },
}

impl Command {
    pub fn required_capability(&self) -> Capability {
        match self {
            Command::SetMediaItems { .. }
            | Command::AddMediaItems { .. }
            | Command::RemoveMediaItems { .. }
            | Command::MoveMediaItems { .. }
            | Command::ReplaceMediaItems { .. } => Capability::ChangeMediaItems,
            Command::SeekTo { .. } => Capability::SeekToItem,
            Command::SeekInCurrent { .. } => Capability::SeekInCurrentItem,
            Command::SeekToDefaultPosition => Capability::SeekToDefaultPosition,
            Command::SeekBack => Capability::SeekBack,
            Command::SeekForward => Capability::SeekForward,
            Command::SeekToNextItem => Capability::SeekToNextItem,
            Command::SeekToPreviousItem => Capability::SeekToPreviousItem,
            Command::SeekToNext => Capability::SeekToNext,
            Command::SeekToPrevious => Capability::SeekToPrevious,
            Command::SetRepeatMode { .. } => Capability::SetRepeat,
            Command::SetShuffle { .. } => Capability::SetShuffle,
            Command::SetPlayWhenReady { .. } => Capability::PlayPause,
            Command::Stop => Capability::Stop,
            Command::Prepare => Capability::Prepare,
            Command::SetSpeed { .. } => Capability::SetSpeed,
            Command::SetDeviceVolume { .. } => Capability::SetDeviceVolume,
            Command::SetDeviceMuted { .. } => Capability::AdjustDeviceVolume,
            Command::SetPlaylistMetadata { .. } => Capability::SetPlaylistMetadata,
        }
    }

    /// Whether `capabilities` allow this command. A single item may also be
    /// set through the narrower set-media-item capability.
    pub fn is_allowed(&self, capabilities: &CapabilitySet) -> bool {
        if capabilities.contains(self.required_capability()) {
            return true;
        }
        match self {
            Command::SetMediaItems { items, .. } => {
                items.len() <= 1 && capabilities.contains(Capability::SetMediaItem)
            }
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SetMediaItems { .. } => "set_media_items",
            Command::SeekTo { .. } => "seek_to",
            Command::SeekInCurrent { .. } => "seek_in_current",
            Command::SeekToDefaultPosition => "seek_to_default_position",
            Command::SeekBack => "seek_back",
            Command::SeekForward => "seek_forward",
            Command::SeekToNextItem => "seek_to_next_item",
            Command::SeekToPreviousItem => "seek_to_previous_item",
            Command::SeekToNext => "seek_to_next",
            Command::SeekToPrevious => "seek_to_previous",
            Command::AddMediaItems { .. } => "add_media_items",
            Command::RemoveMediaItems { .. } => "remove_media_items",
            Command::MoveMediaItems { .. } => "move_media_items",
            Command::ReplaceMediaItems { .. } => "replace_media_items",
            Command::SetRepeatMode { .. } => "set_repeat_mode",
            Command::SetShuffle { .. } => "set_shuffle",
            Command::SetPlayWhenReady { .. } => "set_play_when_ready",
            Command::Stop => "stop",
            Command::Prepare => "prepare",
            Command::SetSpeed { .. } => "set_speed",
            Command::SetDeviceVolume { .. } => "set_device_volume",
            Command::SetDeviceMuted { .. } => "set_device_muted",
            Command::SetPlaylistMetadata { .. } => "set_playlist_metadata",
        }
    }
}

/// Result of applying one command to a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum MaskEffect {
    /// The command has no effect on this snapshot and is not sent.
    Ignored,
    Applied {
        snapshot: PlaybackSnapshot,
        hint: TransitionHint,
    },
}

impl MaskEffect {
    fn applied(snapshot: PlaybackSnapshot, hint: TransitionHint) -> Self {
        MaskEffect::Applied { snapshot, hint }
    }

    fn quiet(snapshot: PlaybackSnapshot) -> Self {
        MaskEffect::Applied {
            snapshot,
            hint: TransitionHint::NONE,
        }
    }

    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            MaskEffect::Ignored => None,
            MaskEffect::Applied { snapshot, .. } => Some(snapshot),
        }
    }
}

/// A command waiting for authoritative confirmation.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskedCommand {
    pub seq: u64,
    pub command: Command,
    pub issued_at_ms: u64,
}

impl MaskedCommand {
    pub fn new(seq: u64, command: Command, issued_at_ms: u64) -> Self {
        MaskedCommand {
            seq,
            command,
            issued_at_ms,
        }
    }

    /// Expected effect of the command on `snapshot`. Pure.
    pub fn apply(&self, snapshot: &PlaybackSnapshot) -> MaskEffect {
        let now = self.issued_at_ms.max(snapshot.position.updated_at_ms);
        let s = snapshot;

        match &self.command {
            Command::SetMediaItems {
                items,
                start_index,
                start_position_ms,
            } => set_media_items(s, items, *start_index, *start_position_ms, now),
            Command::SeekTo { index, position_ms } => seek_to_item(s, *index, *position_ms, now),
            Command::SeekInCurrent { position_ms } => seek_in_current(s, *position_ms, now),
            Command::SeekToDefaultPosition => seek_in_current(s, 0, now),
            Command::SeekBack => {
                let target = s
                    .current_position(now)
                    .saturating_sub(s.seek_back_increment_ms);
                seek_in_current(s, target, now)
            }
            Command::SeekForward => {
                let target = s
                    .current_position(now)
                    .saturating_add(s.seek_forward_increment_ms);
                seek_in_current(s, target, now)
            }
            Command::SeekToNextItem | Command::SeekToNext => match next_index(s) {
                Some(index) => seek_to_item(s, index, 0, now),
                None => MaskEffect::Ignored,
            },
            Command::SeekToPreviousItem => match previous_index(s) {
                Some(index) => seek_to_item(s, index, 0, now),
                None => MaskEffect::Ignored,
            },
            Command::SeekToPrevious => {
                let position = s.current_position(now);
                match previous_index(s) {
                    Some(index) if position <= s.max_seek_to_previous_position_ms => {
                        seek_to_item(s, index, 0, now)
                    }
                    _ => seek_in_current(s, 0, now),
                }
            }
            Command::AddMediaItems { index, items } => add_media_items(s, *index, items, now),
            Command::RemoveMediaItems { from, to } => remove_media_items(s, *from, *to, now),
            Command::MoveMediaItems {
                from,
                to,
                new_index,
            } => move_media_items(s, *from, *to, *new_index),
            Command::ReplaceMediaItems { from, to, items } => {
                replace_media_items(s, *from, *to, items, now)
            }
            Command::SetRepeatMode { mode } => {
                let mut next = s.clone();
                next.repeat_mode = *mode;
                MaskEffect::quiet(next)
            }
            Command::SetShuffle { enabled } => {
                let mut next = s.clone();
                next.shuffle_enabled = *enabled;
                MaskEffect::quiet(next)
            }
            Command::SetPlayWhenReady { play_when_ready } => {
                let mut next = s.with_position_rebased(now);
                next.play_when_ready = *play_when_ready;
                MaskEffect::quiet(next)
            }
            Command::Stop => {
                let mut next = s.with_position_rebased(now);
                next.phase = PlaybackPhase::Idle;
                next.is_loading = false;
                next.error = None;
                next.position.buffered_position_ms = next.position.position_ms;
                next.position.total_buffered_duration_ms = 0;
                MaskEffect::quiet(next)
            }
            Command::Prepare => {
                if s.phase != PlaybackPhase::Idle && s.phase != PlaybackPhase::Error {
                    return MaskEffect::Ignored;
                }
                let mut next = s.clone();
                next.error = None;
                next.phase = if s.playlist.is_empty() {
                    PlaybackPhase::Ended
                } else {
                    PlaybackPhase::Buffering
                };
                MaskEffect::quiet(next)
            }
            Command::SetSpeed { speed } => {
                if !(*speed > 0.0) {
                    return MaskEffect::Ignored;
                }
                let mut next = s.with_position_rebased(now);
                next.speed = *speed;
                MaskEffect::quiet(next)
            }
            Command::SetDeviceVolume { volume } => {
                let mut next = s.clone();
                next.device_volume = if s.device_info.max_volume > 0 {
                    (*volume).clamp(s.device_info.min_volume, s.device_info.max_volume)
                } else {
                    *volume
                };
                MaskEffect::quiet(next)
            }
            Command::SetDeviceMuted { muted } => {
                let mut next = s.clone();
                next.device_muted = *muted;
                MaskEffect::quiet(next)
            }
            Command::SetPlaylistMetadata { metadata } => {
                let mut next = s.clone();
                next.playlist_metadata = metadata.clone();
                MaskEffect::quiet(next)
            }
        }
    }
}

/// Phase after jumping to another item.
fn phase_after_seek(phase: PlaybackPhase) -> PlaybackPhase {
    match phase {
        PlaybackPhase::Idle | PlaybackPhase::Error => phase,
        _ => PlaybackPhase::Buffering,
    }
}

/// Makes `index` current, starting at `position_ms`.
fn enter_item(
    mut next: PlaybackSnapshot,
    index: Option<usize>,
    position_ms: u64,
    now: u64,
) -> PlaybackSnapshot {
    next.current_index = index;
    let duration = next.current_item().and_then(|item| item.duration_ms());
    next.position = PositionState::starting_at(position_ms, now, duration);
    next.media_metadata = next
        .current_item()
        .map(|item| item.metadata.clone())
        .unwrap_or_default();
    next
}

/// Transition reasons when the current item changed through a playlist edit.
fn playlist_edit_hint(old: &PlaybackSnapshot, new: &PlaybackSnapshot) -> TransitionHint {
    if old.current_item() == new.current_item() {
        return TransitionHint::NONE;
    }
    let discontinuity = old.current_item().map(|_| DiscontinuityReason::Remove);
    TransitionHint::new(discontinuity, Some(MediaItemTransitionReason::PlaylistChanged))
}

fn next_index(s: &PlaybackSnapshot) -> Option<usize> {
    let current = s.current_index?;
    if current + 1 < s.playlist.len() {
        Some(current + 1)
    } else if s.repeat_mode.wraps_playlist() {
        Some(0)
    } else {
        None
    }
}

fn previous_index(s: &PlaybackSnapshot) -> Option<usize> {
    let current = s.current_index?;
    if current > 0 {
        Some(current - 1)
    } else if s.repeat_mode.wraps_playlist() {
        s.playlist.len().checked_sub(1)
    } else {
        None
    }
}

fn set_media_items(
    s: &PlaybackSnapshot,
    items: &[MediaItem],
    start_index: Option<usize>,
    start_position_ms: Option<u64>,
    now: u64,
) -> MaskEffect {
    if items.is_empty() {
        let mut next = s.with_playlist(Playlist::empty(), None);
        next.phase = PlaybackPhase::Idle;
        let next = enter_item(next, None, 0, now);
        let hint = playlist_edit_hint(s, &next);
        return MaskEffect::applied(next, hint);
    }

    let index = start_index.unwrap_or(0);
    if index >= items.len() {
        trace!(index = index, len = items.len(), "start index out of range");
        return MaskEffect::Ignored;
    }

    let mut next = s.with_playlist(Playlist::new(items.to_vec()), Some(index));
    next.phase = PlaybackPhase::Buffering;
    let next = enter_item(next, Some(index), start_position_ms.unwrap_or(0), now);
    let hint = playlist_edit_hint(s, &next);
    MaskEffect::applied(next, hint)
}

fn seek_to_item(s: &PlaybackSnapshot, index: usize, position_ms: u64, now: u64) -> MaskEffect {
    if index >= s.playlist.len() || s.position.is_playing_ad {
        return MaskEffect::Ignored;
    }
    if Some(index) == s.current_index {
        return seek_in_current(s, position_ms, now);
    }

    let mut next = enter_item(s.clone(), Some(index), position_ms, now);
    next.phase = phase_after_seek(s.phase);
    MaskEffect::applied(
        next,
        TransitionHint::new(
            Some(DiscontinuityReason::Seek),
            Some(MediaItemTransitionReason::Seek),
        ),
    )
}

fn seek_in_current(s: &PlaybackSnapshot, position_ms: u64, now: u64) -> MaskEffect {
    if s.current_index.is_none() || s.position.is_playing_ad {
        return MaskEffect::Ignored;
    }
    let target = match s.duration_ms() {
        Some(duration) => position_ms.min(duration),
        None => position_ms,
    };

    let mut next = s.clone();
    next.position = PositionState {
        buffered_position_ms: s.position.buffered_position_ms.max(target),
        ..PositionState::starting_at(target, now, s.position.duration_ms)
    };
    if next.phase == PlaybackPhase::Ended {
        next.phase = PlaybackPhase::Buffering;
    }
    MaskEffect::applied(next, TransitionHint::new(Some(DiscontinuityReason::Seek), None))
}

fn add_media_items(s: &PlaybackSnapshot, index: usize, items: &[MediaItem], now: u64) -> MaskEffect {
    if items.is_empty() {
        return MaskEffect::Ignored;
    }
    let len = s.playlist.len();
    let at = index.min(len);

    let mut list = s.playlist.to_vec();
    list.splice(at..at, items.iter().cloned());

    match s.current_index {
        Some(current) => {
            let current = if current >= at {
                current + items.len()
            } else {
                current
            };
            let next = s.with_playlist(Playlist::new(list), Some(current));
            MaskEffect::quiet(next)
        }
        None => {
            let next = enter_item(s.with_playlist(Playlist::new(list), None), Some(0), 0, now);
            let hint = playlist_edit_hint(s, &next);
            MaskEffect::applied(next, hint)
        }
    }
}

fn remove_media_items(s: &PlaybackSnapshot, from: usize, to: usize, now: u64) -> MaskEffect {
    let len = s.playlist.len();
    let to = to.min(len);
    if from >= to {
        return MaskEffect::Ignored;
    }
    let removed = to - from;

    let mut list = s.playlist.to_vec();
    list.drain(from..to);
    let remaining = list.len();
    let playlist = Playlist::new(list);

    let Some(current) = s.current_index else {
        return MaskEffect::quiet(s.with_playlist(playlist, None).normalized());
    };

    if current < from {
        return MaskEffect::quiet(s.with_playlist(playlist, Some(current)));
    }
    if current >= to {
        return MaskEffect::quiet(s.with_playlist(playlist, Some(current - removed)));
    }

    // The current item is gone. Removing the tail that held it ends
    // playback, repeat mode notwithstanding.
    let index = if remaining == 0 {
        None
    } else if from < remaining {
        Some(from)
    } else {
        Some(0)
    };
    let phase = if index.is_none() || to == len {
        if s.phase == PlaybackPhase::Idle {
            PlaybackPhase::Idle
        } else {
            PlaybackPhase::Ended
        }
    } else {
        phase_after_seek(s.phase)
    };

    let mut next = enter_item(s.with_playlist(playlist, index), index, 0, now);
    next.phase = phase;
    let hint = playlist_edit_hint(s, &next);
    MaskEffect::applied(next, hint)
}

fn move_media_items(s: &PlaybackSnapshot, from: usize, to: usize, new_index: usize) -> MaskEffect {
    let len = s.playlist.len();
    let to = to.min(len);
    if from >= to {
        return MaskEffect::Ignored;
    }
    let count = to - from;
    let new_index = new_index.min(len - count);
    if new_index == from {
        return MaskEffect::Ignored;
    }

    let mut list = s.playlist.to_vec();
    let moved: Vec<MediaItem> = list.drain(from..to).collect();
    list.splice(new_index..new_index, moved);

    let current = s.current_index.map(|current| {
        if (from..to).contains(&current) {
            new_index + (current - from)
        } else {
            let without = if current >= to { current - count } else { current };
            if without >= new_index {
                without + count
            } else {
                without
            }
        }
    });

    MaskEffect::quiet(s.with_playlist(Playlist::new(list), current))
}

fn replace_media_items(
    s: &PlaybackSnapshot,
    from: usize,
    to: usize,
    items: &[MediaItem],
    now: u64,
) -> MaskEffect {
    let len = s.playlist.len();
    let to = to.min(len);
    let from = from.min(to);
    if from == to && items.is_empty() {
        return MaskEffect::Ignored;
    }

    let mut list = s.playlist.to_vec();
    list.splice(from..to, items.iter().cloned());
    let new_len = list.len();
    let playlist = Playlist::new(list);

    let current = match s.current_index {
        Some(current) if current < from => Some(current),
        Some(current) if current >= to => Some(current - (to - from) + items.len()),
        Some(_) => None,
        None if new_len > 0 => Some(0),
        None => None,
    };
    if current.is_some() && s.current_index.is_some() {
        return MaskEffect::quiet(s.with_playlist(playlist, current));
    }

    // The current item was replaced, or the playlist was empty.
    let index = if new_len == 0 {
        None
    } else if s.current_index.is_none() {
        Some(0)
    } else if !items.is_empty() || from < new_len {
        Some(from)
    } else {
        Some(new_len - 1)
    };

    let mut next = enter_item(s.with_playlist(playlist, index), index, 0, now);
    if index.is_some() {
        next.phase = phase_after_seek(s.phase);
    } else if s.phase != PlaybackPhase::Idle {
        next.phase = PlaybackPhase::Ended;
    }
    let hint = playlist_edit_hint(s, &next);
    MaskEffect::applied(next, hint)
}

/// Arena of pending commands keyed by sequence number.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingCommands {
    commands: BTreeMap<u64, MaskedCommand>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, command: MaskedCommand) {
        self.commands.insert(command.seq, command);
    }

    /// Drops every command with `seq <= sequence`; returns how many went.
    pub fn retire_through(&mut self, sequence: u64) -> usize {
        let before = self.commands.len();
        self.commands = self.commands.split_off(&sequence.saturating_add(1));
        before - self.commands.len()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Commands in issue order.
    pub fn iter(&self) -> impl Iterator<Item = &MaskedCommand> {
        self.commands.values()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Applies `command` to the visible snapshot.
pub fn issue(command: &MaskedCommand, current_masked: &PlaybackSnapshot) -> MaskEffect {
    command.apply(current_masked)
}

/// Rebuilds the visible snapshot from an authoritative one: confirmed
/// commands are retired, the others are re-applied in issue order.
pub fn reconcile(
    authoritative: &PlaybackSnapshot,
    pending: &PendingCommands,
) -> (PlaybackSnapshot, PendingCommands) {
    let mut still_pending = pending.clone();
    let retired = still_pending.retire_through(authoritative.sequence);

    let mut masked = authoritative.clone();
    for command in still_pending.iter() {
        if let MaskEffect::Applied { snapshot, .. } = command.apply(&masked) {
            masked = snapshot;
        }
    }

    trace!(
        sequence = authoritative.sequence,
        retired = retired,
        pending = still_pending.len(),
        "pending commands reconciled"
    );
    (masked, still_pending)
}

/// What happened to an issued command.
#[derive(Clone, Debug, PartialEq)]
pub enum IssueOutcome {
    /// Applied locally and to be sent to the authority.
    Masked {
        command: MaskedCommand,
        snapshot: PlaybackSnapshot,
        hint: TransitionHint,
    },
    /// No effect on the current state; nothing is sent.
    Ignored,
    /// Capability absent.
    Rejected,
    /// Session already released.
    Skipped,
}

/// Per-controller masking state.
#[derive(Debug, Default)]
pub struct MaskingLayer {
    last_seq: u64,
    pending: PendingCommands,
    released: bool,
}

impl MaskingLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PendingCommands {
        &self.pending
    }

    pub fn last_issued_sequence(&self) -> u64 {
        self.last_seq
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn issue(
        &mut self,
        command: Command,
        current_masked: &PlaybackSnapshot,
        now_ms: u64,
    ) -> IssueOutcome {
        if self.released {
            return IssueOutcome::Skipped;
        }
        if !command.is_allowed(&current_masked.capabilities) {
            debug!(command = command.name(), "command rejected, capability not available");
            return IssueOutcome::Rejected;
        }

        let masked = MaskedCommand::new(self.last_seq + 1, command, now_ms);
        match issue(&masked, current_masked) {
            MaskEffect::Ignored => {
                debug!(command = masked.command.name(), "command has no effect, not sent");
                IssueOutcome::Ignored
            }
            MaskEffect::Applied { snapshot, hint } => {
                self.last_seq = masked.seq;
                self.pending.insert(masked.clone());
                trace!(
                    seq = masked.seq,
                    command = masked.command.name(),
                    index = ?snapshot.current_index,
                    len = snapshot.playlist.len(),
                    "command masked"
                );
                IssueOutcome::Masked {
                    command: masked,
                    snapshot,
                    hint,
                }
            }
        }
    }

    pub fn reconcile(&mut self, authoritative: &PlaybackSnapshot) -> PlaybackSnapshot {
        if self.released {
            return authoritative.clone();
        }
        let (masked, still_pending) = reconcile(authoritative, &self.pending);
        self.pending = still_pending;
        masked
    }

    /// Drops in-flight commands; later calls are no-ops.
    pub fn release(&mut self) {
        self.released = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilitySet;

    fn items(ids: &[&str]) -> Vec<MediaItem> {
        ids.iter().map(|id| MediaItem::new(*id)).collect()
    }

    fn base(ids: &[&str], index: Option<usize>) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playlist: Playlist::new(items(ids)),
            current_index: index,
            phase: PlaybackPhase::Ready,
            capabilities: CapabilitySet::all(),
            ..PlaybackSnapshot::default()
        }
    }

    fn masked(layer: &mut MaskingLayer, command: Command, s: &PlaybackSnapshot) -> PlaybackSnapshot {
        match layer.issue(command, s, 0) {
            IssueOutcome::Masked { snapshot, .. } => snapshot,
            other => panic!("command not masked: {:?}", other),
        }
    }

    fn ids(s: &PlaybackSnapshot) -> Vec<&str> {
        s.playlist.items().iter().map(|i| i.media_id.as_str()).collect()
    }

    #[test]
    fn test_set_seek_set_before_confirmation() {
        let mut layer = MaskingLayer::new();
        let start = PlaybackSnapshot {
            capabilities: CapabilitySet::all(),
            ..PlaybackSnapshot::default()
        };

        let s = masked(
            &mut layer,
            Command::SetMediaItems {
                items: items(&["A", "B", "C"]),
                start_index: None,
                start_position_ms: None,
            },
            &start,
        );
        let s = masked(&mut layer, Command::SeekTo { index: 2, position_ms: 0 }, &s);
        assert_eq!(s.current_index, Some(2));

        let s = masked(
            &mut layer,
            Command::SetMediaItems {
                items: items(&["A", "B"]),
                start_index: None,
                start_position_ms: None,
            },
            &s,
        );
        assert_eq!(s.current_index, Some(0));
        assert_eq!(s.phase, PlaybackPhase::Buffering);
        assert_eq!(layer.pending().len(), 3);
    }

    #[test]
    fn test_set_empty_list_goes_idle() {
        let mut layer = MaskingLayer::new();
        let s = masked(
            &mut layer,
            Command::SetMediaItems {
                items: vec![],
                start_index: None,
                start_position_ms: Some(500),
            },
            &base(&["a"], Some(0)),
        );
        assert!(s.playlist.is_empty());
        assert_eq!(s.current_index, None);
        assert_eq!(s.phase, PlaybackPhase::Idle);
    }

    #[test]
    fn test_remove_before_current_shifts_index() {
        let mut layer = MaskingLayer::new();
        let s = masked(
            &mut layer,
            Command::RemoveMediaItems { from: 1, to: 3 },
            &base(&["a", "b", "c", "d", "e"], Some(4)),
        );
        assert_eq!(s.current_index, Some(2));
        assert_eq!(ids(&s), vec!["a", "d", "e"]);
    }

    #[test]
    fn test_remove_current_item() {
        let mut layer = MaskingLayer::new();
        // Item now in the slot becomes current.
        let s = masked(
            &mut layer,
            Command::RemoveMediaItems { from: 1, to: 2 },
            &base(&["a", "b", "c"], Some(1)),
        );
        assert_eq!(s.current_index, Some(1));
        assert_eq!(s.current_item().unwrap().media_id, "c");

        // Tail removed: back to the first item, ended.
        let s = masked(
            &mut layer,
            Command::RemoveMediaItems { from: 1, to: 10 },
            &base(&["a", "b", "c"], Some(2)),
        );
        assert_eq!(s.current_index, Some(0));
        assert_eq!(s.phase, PlaybackPhase::Ended);

        let s = masked(
            &mut layer,
            Command::RemoveMediaItems { from: 2, to: 4 },
            &base(&["a", "b", "c", "d"], Some(2)),
        );
        assert_eq!(s.current_index, Some(0));
        assert_eq!(s.current_item().unwrap().media_id, "a");
        assert_eq!(s.phase, PlaybackPhase::Ended);

        // Repeat-all does not keep a tail removal playing.
        let repeating = PlaybackSnapshot {
            repeat_mode: RepeatMode::All,
            ..base(&["a", "b", "c"], Some(2))
        };
        let s = masked(&mut layer, Command::RemoveMediaItems { from: 2, to: 3 }, &repeating);
        assert_eq!(s.current_index, Some(0));
        assert_eq!(s.phase, PlaybackPhase::Ended);

        // An idle player stays idle.
        let idle = PlaybackSnapshot {
            phase: PlaybackPhase::Idle,
            ..base(&["a", "b", "c"], Some(2))
        };
        let s = masked(&mut layer, Command::RemoveMediaItems { from: 2, to: 3 }, &idle);
        assert_eq!(s.current_index, Some(0));
        assert_eq!(s.phase, PlaybackPhase::Idle);
    }

    #[test]
    fn test_remove_empty_range_is_ignored() {
        let mut layer = MaskingLayer::new();
        let outcome = layer.issue(
            Command::RemoveMediaItems { from: 5, to: 9 },
            &base(&["a", "b"], Some(0)),
            0,
        );
        assert_eq!(outcome, IssueOutcome::Ignored);
        assert!(layer.pending().is_empty());
    }

    #[test]
    fn test_seek_out_of_range_ignored_but_add_clamps() {
        let mut layer = MaskingLayer::new();
        let s = base(&["a", "b"], Some(0));

        assert_eq!(
            layer.issue(Command::SeekTo { index: 2, position_ms: 0 }, &s, 0),
            IssueOutcome::Ignored
        );

        let added = masked(
            &mut layer,
            Command::AddMediaItems {
                index: 99,
                items: items(&["z"]),
            },
            &s,
        );
        assert_eq!(ids(&added), vec!["a", "b", "z"]);
        assert_eq!(added.current_index, Some(0));
    }

    #[test]
    fn test_add_before_current_shifts_index() {
        let mut layer = MaskingLayer::new();
        let s = masked(
            &mut layer,
            Command::AddMediaItems {
                index: 1,
                items: items(&["x", "y"]),
            },
            &base(&["a", "b", "c"], Some(1)),
        );
        assert_eq!(s.current_index, Some(3));
        assert_eq!(s.current_item().unwrap().media_id, "b");
    }

    #[test]
    fn test_add_to_empty_playlist() {
        let mut layer = MaskingLayer::new();
        let empty = PlaybackSnapshot {
            capabilities: CapabilitySet::all(),
            ..PlaybackSnapshot::default()
        };
        match layer.issue(
            Command::AddMediaItems {
                index: 0,
                items: items(&["a"]),
            },
            &empty,
            0,
        ) {
            IssueOutcome::Masked { snapshot, hint, .. } => {
                assert_eq!(snapshot.current_index, Some(0));
                assert_eq!(hint.transition, Some(MediaItemTransitionReason::PlaylistChanged));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_move_tracks_current_item() {
        let mut layer = MaskingLayer::new();
        let s = base(&["a", "b", "c", "d", "e"], Some(3));

        let moved = masked(
            &mut layer,
            Command::MoveMediaItems {
                from: 0,
                to: 2,
                new_index: 3,
            },
            &s,
        );
        assert_eq!(ids(&moved), vec!["c", "d", "e", "a", "b"]);
        assert_eq!(moved.current_item().unwrap().media_id, "d");

        let moved = masked(
            &mut layer,
            Command::MoveMediaItems {
                from: 3,
                to: 4,
                new_index: 0,
            },
            &s,
        );
        assert_eq!(ids(&moved), vec!["d", "a", "b", "c", "e"]);
        assert_eq!(moved.current_index, Some(0));

        // Destination clamped to the end.
        let moved = masked(
            &mut layer,
            Command::MoveMediaItems {
                from: 0,
                to: 1,
                new_index: 42,
            },
            &s,
        );
        assert_eq!(ids(&moved), vec!["b", "c", "d", "e", "a"]);
        assert_eq!(moved.current_item().unwrap().media_id, "d");
    }

    #[test]
    fn test_replace_keeps_or_moves_current() {
        let mut layer = MaskingLayer::new();
        let s = base(&["a", "b", "c", "d"], Some(3));

        let outside = masked(
            &mut layer,
            Command::ReplaceMediaItems {
                from: 0,
                to: 2,
                items: items(&["x"]),
            },
            &s,
        );
        assert_eq!(ids(&outside), vec!["x", "c", "d"]);
        assert_eq!(outside.current_item().unwrap().media_id, "d");

        let inside = masked(
            &mut layer,
            Command::ReplaceMediaItems {
                from: 2,
                to: 4,
                items: items(&["y", "z"]),
            },
            &s,
        );
        assert_eq!(inside.current_index, Some(2));
        assert_eq!(inside.current_item().unwrap().media_id, "y");

        let emptied_tail = masked(
            &mut layer,
            Command::ReplaceMediaItems {
                from: 3,
                to: 4,
                items: vec![],
            },
            &s,
        );
        assert_eq!(emptied_tail.current_index, Some(2));

        let emptied_middle = masked(
            &mut layer,
            Command::ReplaceMediaItems {
                from: 1,
                to: 2,
                items: vec![],
            },
            &base(&["a", "b", "c"], Some(1)),
        );
        assert_eq!(emptied_middle.current_item().unwrap().media_id, "c");
    }

    #[test]
    fn test_missing_capability_rejects() {
        let mut layer = MaskingLayer::new();
        let s = PlaybackSnapshot {
            capabilities: CapabilitySet::all().without(Capability::SetShuffle),
            ..base(&["a"], Some(0))
        };
        assert_eq!(
            layer.issue(Command::SetShuffle { enabled: true }, &s, 0),
            IssueOutcome::Rejected
        );
        assert_eq!(layer.last_issued_sequence(), 0);
    }

    #[test]
    fn test_single_item_needs_only_set_media_item() {
        let caps = CapabilitySet::empty().with(Capability::SetMediaItem);
        let one = Command::SetMediaItems {
            items: items(&["a"]),
            start_index: None,
            start_position_ms: None,
        };
        let two = Command::SetMediaItems {
            items: items(&["a", "b"]),
            start_index: None,
            start_position_ms: None,
        };
        assert!(one.is_allowed(&caps));
        assert!(!two.is_allowed(&caps));
    }

    #[test]
    fn test_seek_back_forward_and_previous() {
        let mut layer = MaskingLayer::new();
        let s = PlaybackSnapshot {
            position: PositionState::starting_at(10_000, 0, Some(20_000)),
            ..base(&["a", "b"], Some(1))
        };

        let back = masked(&mut layer, Command::SeekBack, &s);
        assert_eq!(back.position.position_ms, 5_000);

        let forward = masked(&mut layer, Command::SeekForward, &s);
        assert_eq!(forward.position.position_ms, 20_000);

        // Past the threshold: restart the current item.
        let previous = masked(&mut layer, Command::SeekToPrevious, &s);
        assert_eq!(previous.current_index, Some(1));
        assert_eq!(previous.position.position_ms, 0);

        // Near the start: previous item.
        let near_start = PlaybackSnapshot {
            position: PositionState::starting_at(1_000, 0, Some(20_000)),
            ..s.clone()
        };
        let previous = masked(&mut layer, Command::SeekToPrevious, &near_start);
        assert_eq!(previous.current_index, Some(0));
    }

    #[test]
    fn test_next_item_wraps_only_with_repeat() {
        let mut layer = MaskingLayer::new();
        let last = base(&["a", "b"], Some(1));
        assert_eq!(layer.issue(Command::SeekToNextItem, &last, 0), IssueOutcome::Ignored);

        let repeating = PlaybackSnapshot {
            repeat_mode: RepeatMode::All,
            ..last
        };
        let wrapped = masked(&mut layer, Command::SeekToNextItem, &repeating);
        assert_eq!(wrapped.current_index, Some(0));
        assert_eq!(wrapped.phase, PlaybackPhase::Buffering);
    }

    #[test]
    fn test_play_pause_rebases_position() {
        let mut layer = MaskingLayer::new();
        let playing = PlaybackSnapshot {
            play_when_ready: true,
            position: PositionState::starting_at(1_000, 0, None),
            ..base(&["a"], Some(0))
        };
        let paused = match layer.issue(
            Command::SetPlayWhenReady {
                play_when_ready: false,
            },
            &playing,
            2_000,
        ) {
            IssueOutcome::Masked { snapshot, .. } => snapshot,
            other => panic!("unexpected {:?}", other),
        };
        assert!(!paused.play_when_ready);
        assert_eq!(paused.current_position(9_000), 3_000);
    }

    #[test]
    fn test_reconcile_retires_confirmed_commands() {
        let mut layer = MaskingLayer::new();
        let authoritative = base(&["a", "b", "c"], Some(0));

        let s = masked(&mut layer, Command::SetShuffle { enabled: true }, &authoritative);
        let s = masked(&mut layer, Command::SetRepeatMode { mode: RepeatMode::All }, &s);
        assert!(s.shuffle_enabled);
        assert_eq!(layer.pending().len(), 2);

        // Confirms the first command only.
        let confirmed = PlaybackSnapshot {
            shuffle_enabled: true,
            sequence: 1,
            ..authoritative.clone()
        };
        let visible = layer.reconcile(&confirmed);
        assert_eq!(layer.pending().len(), 1);
        assert!(visible.shuffle_enabled);
        assert_eq!(visible.repeat_mode, RepeatMode::All);

        // A stale snapshot does not retire anything but masking survives.
        let visible = layer.reconcile(&authoritative);
        assert_eq!(layer.pending().len(), 1);
        assert_eq!(visible.repeat_mode, RepeatMode::All);

        let all_confirmed = PlaybackSnapshot {
            sequence: 2,
            ..authoritative.clone()
        };
        let visible = layer.reconcile(&all_confirmed);
        assert!(layer.pending().is_empty());
        assert_eq!(visible, all_confirmed);
    }

    #[test]
    fn test_commands_compose_in_issue_order() {
        let mut pending = PendingCommands::new();
        pending.insert(MaskedCommand::new(
            1,
            Command::AddMediaItems {
                index: 0,
                items: items(&["x"]),
            },
            0,
        ));
        pending.insert(MaskedCommand::new(
            2,
            Command::SeekTo {
                index: 0,
                position_ms: 0,
            },
            0,
        ));

        let (visible, still) = reconcile(&base(&["a", "b"], Some(1)), &pending);
        assert_eq!(still.len(), 2);
        assert_eq!(visible.current_item().unwrap().media_id, "x");
    }

    #[test]
    fn test_release_skips_commands() {
        let mut layer = MaskingLayer::new();
        let s = base(&["a"], Some(0));
        let _ = masked(&mut layer, Command::SetShuffle { enabled: true }, &s);
        layer.release();
        assert!(layer.pending().is_empty());
        assert_eq!(
            layer.issue(Command::SetShuffle { enabled: false }, &s, 0),
            IssueOutcome::Skipped
        );
    }
}
