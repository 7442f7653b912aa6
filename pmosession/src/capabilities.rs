//! Capability sets and their translation from the two authority models.
//!
//! A legacy authority advertises a bitmask of actions plus a volume control
//! mode; a modern authority advertises an explicit command set. Both are
//! normalized into a [`CapabilitySet`], which the merge engine consults to
//! decide which snapshot fields are observable and the masking layer consults
//! to reject commands locally.

use serde::{Deserialize, Serialize};

/// A single operation the remote session may permit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Capability {
    PlayPause = 0,
    Prepare,
    Stop,
    SeekToDefaultPosition,
    SeekInCurrentItem,
    SeekToPreviousItem,
    SeekToPrevious,
    SeekToNextItem,
    SeekToNext,
    SeekToItem,
    SeekBack,
    SeekForward,
    SetSpeed,
    SetShuffle,
    SetRepeat,
    GetCurrentItem,
    GetTimeline,
    GetMetadata,
    SetPlaylistMetadata,
    SetMediaItem,
    ChangeMediaItems,
    GetTracks,
    GetDeviceVolume,
    SetDeviceVolume,
    AdjustDeviceVolume,
    SetRating,
    Release,
}

impl Capability {
    pub const ALL: [Capability; 27] = [
        Capability::PlayPause,
        Capability::Prepare,
        Capability::Stop,
        Capability::SeekToDefaultPosition,
        Capability::SeekInCurrentItem,
        Capability::SeekToPreviousItem,
        Capability::SeekToPrevious,
        Capability::SeekToNextItem,
        Capability::SeekToNext,
        Capability::SeekToItem,
        Capability::SeekBack,
        Capability::SeekForward,
        Capability::SetSpeed,
        Capability::SetShuffle,
        Capability::SetRepeat,
        Capability::GetCurrentItem,
        Capability::GetTimeline,
        Capability::GetMetadata,
        Capability::SetPlaylistMetadata,
        Capability::SetMediaItem,
        Capability::ChangeMediaItems,
        Capability::GetTracks,
        Capability::GetDeviceVolume,
        Capability::SetDeviceVolume,
        Capability::AdjustDeviceVolume,
        Capability::SetRating,
        Capability::Release,
    ];

    fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// Immutable set of capabilities. Every operation returns a new value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn empty() -> Self {
        Self::EMPTY
    }

    pub fn all() -> Self {
        Self::from_iter(Capability::ALL)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability.bit())
    }

    pub fn with_all(self, capabilities: &[Capability]) -> Self {
        capabilities.iter().fold(self, |set, c| set.with(*c))
    }

    pub fn without(self, capability: Capability) -> Self {
        CapabilitySet(self.0 & !capability.bit())
    }

    pub fn intersection(self, other: CapabilitySet) -> Self {
        CapabilitySet(self.0 & other.0)
    }

    pub fn union(self, other: CapabilitySet) -> Self {
        CapabilitySet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + use<> {
        let set = *self;
        Capability::ALL.into_iter().filter(move |c| set.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter()
            .fold(CapabilitySet::EMPTY, |set, c| set.with(c))
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(list: Vec<Capability>) -> Self {
        list.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.iter().collect()
    }
}

/// Legacy action bitmask as advertised by a legacy authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegacyActions(pub u64);

impl LegacyActions {
    pub const STOP: u64 = 1 << 0;
    pub const PAUSE: u64 = 1 << 1;
    pub const PLAY: u64 = 1 << 2;
    pub const REWIND: u64 = 1 << 3;
    pub const SKIP_TO_PREVIOUS: u64 = 1 << 4;
    pub const SKIP_TO_NEXT: u64 = 1 << 5;
    pub const FAST_FORWARD: u64 = 1 << 6;
    pub const SET_RATING: u64 = 1 << 7;
    pub const SEEK_TO: u64 = 1 << 8;
    pub const PLAY_PAUSE: u64 = 1 << 9;
    pub const PLAY_FROM_MEDIA_ID: u64 = 1 << 10;
    pub const PLAY_FROM_SEARCH: u64 = 1 << 11;
    pub const SKIP_TO_QUEUE_ITEM: u64 = 1 << 12;
    pub const PLAY_FROM_URI: u64 = 1 << 13;
    pub const PREPARE: u64 = 1 << 14;
    pub const PREPARE_FROM_MEDIA_ID: u64 = 1 << 15;
    pub const PREPARE_FROM_SEARCH: u64 = 1 << 16;
    pub const PREPARE_FROM_URI: u64 = 1 << 17;
    pub const SET_REPEAT_MODE: u64 = 1 << 18;
    pub const SET_SHUFFLE_MODE: u64 = 1 << 21;
    pub const SET_PLAYBACK_SPEED: u64 = 1 << 22;

    pub fn new(bits: u64) -> Self {
        LegacyActions(bits)
    }

    pub fn has(&self, action: u64) -> bool {
        self.0 & action != 0
    }

    fn has_both(&self, first: u64, second: u64) -> bool {
        self.has(first) && self.has(second)
    }
}

/// How the remote output volume can be driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeControlMode {
    #[default]
    Fixed,
    Relative,
    Absolute,
}

/// What the authority advertised, in its own model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AvailableActions {
    Legacy {
        actions: LegacyActions,
        handles_queue_commands: bool,
    },
    Explicit(CapabilitySet),
}

/// Capabilities that need a fully established two-way session.
const READY_ONLY: [Capability; 3] = [
    Capability::SetRepeat,
    Capability::SetShuffle,
    Capability::SetRating,
];

/// Normalizes advertised actions into a capability set.
pub fn translate(
    available: &AvailableActions,
    volume_mode: VolumeControlMode,
    session_ready: bool,
) -> CapabilitySet {
    let base = match available {
        AvailableActions::Legacy {
            actions,
            handles_queue_commands,
        } => from_legacy_actions(*actions, *handles_queue_commands),
        AvailableActions::Explicit(set) => *set,
    };

    let mut set = match volume_mode {
        VolumeControlMode::Fixed => base,
        VolumeControlMode::Relative => base.with(Capability::AdjustDeviceVolume),
        VolumeControlMode::Absolute => {
            base.with_all(&[Capability::AdjustDeviceVolume, Capability::SetDeviceVolume])
        }
    };

    if !session_ready {
        set = READY_ONLY.iter().fold(set, |s, c| s.without(*c));
    }

    // Release is always possible once connected.
    set.with(Capability::Release)
}

fn from_legacy_actions(actions: LegacyActions, handles_queue_commands: bool) -> CapabilitySet {
    let mut set = CapabilitySet::empty();

    if actions.has_both(LegacyActions::PLAY, LegacyActions::PAUSE)
        || actions.has(LegacyActions::PLAY_PAUSE)
    {
        set = set.with(Capability::PlayPause);
    }
    if actions.has(LegacyActions::PREPARE) {
        set = set.with(Capability::Prepare);
    }
    // Prepare and play have to come together, one alone is not usable.
    if actions.has_both(
        LegacyActions::PREPARE_FROM_MEDIA_ID,
        LegacyActions::PLAY_FROM_MEDIA_ID,
    ) || actions.has_both(
        LegacyActions::PREPARE_FROM_SEARCH,
        LegacyActions::PLAY_FROM_SEARCH,
    ) || actions.has_both(LegacyActions::PREPARE_FROM_URI, LegacyActions::PLAY_FROM_URI)
    {
        set = set.with_all(&[Capability::SetMediaItem, Capability::Prepare]);
    }
    if actions.has(LegacyActions::REWIND) {
        set = set.with(Capability::SeekBack);
    }
    if actions.has(LegacyActions::FAST_FORWARD) {
        set = set.with(Capability::SeekForward);
    }
    if actions.has(LegacyActions::SEEK_TO) {
        set = set.with_all(&[
            Capability::SeekInCurrentItem,
            Capability::SeekToDefaultPosition,
        ]);
    }
    if actions.has(LegacyActions::SKIP_TO_NEXT) {
        set = set.with_all(&[Capability::SeekToNext, Capability::SeekToNextItem]);
    }
    if actions.has(LegacyActions::SKIP_TO_PREVIOUS) {
        set = set.with_all(&[Capability::SeekToPrevious, Capability::SeekToPreviousItem]);
    }
    if actions.has(LegacyActions::SET_PLAYBACK_SPEED) {
        set = set.with(Capability::SetSpeed);
    }
    if actions.has(LegacyActions::STOP) {
        set = set.with(Capability::Stop);
    }
    if actions.has(LegacyActions::SET_RATING) {
        set = set.with(Capability::SetRating);
    }
    if actions.has(LegacyActions::SET_REPEAT_MODE) {
        set = set.with(Capability::SetRepeat);
    }
    if actions.has(LegacyActions::SET_SHUFFLE_MODE) {
        set = set.with(Capability::SetShuffle);
    }

    set = set.with_all(&[
        Capability::GetDeviceVolume,
        Capability::GetTimeline,
        Capability::GetMetadata,
        Capability::GetCurrentItem,
    ]);

    if handles_queue_commands {
        set = set.with(Capability::ChangeMediaItems);
        if actions.has(LegacyActions::SKIP_TO_QUEUE_ITEM) {
            set = set.with(Capability::SeekToItem);
        }
    }

    set
}
