//! The flat legacy session model: one metadata map for the current item,
//! a separately updated queue and an "active queue item id".
//!
//! All values here are immutable once built. Maps and queues sit behind an
//! `Arc` so the incremental converter can tell "unchanged" by identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::VolumeControlMode;
use crate::errors::SessionError;
use crate::model::{MediaItem, MediaMetadata, PlaybackType};

/// Queue id of "no active item".
pub const UNKNOWN_QUEUE_ID: i64 = -1;

/// Session flag: the remote session accepts queue editing commands.
pub const FLAG_HANDLES_QUEUE_COMMANDS: u64 = 1 << 2;

/// Metadata keys understood by the adapter.
pub mod keys {
    pub const MEDIA_ID: &str = "media_id";
    pub const TITLE: &str = "title";
    pub const ARTIST: &str = "artist";
    pub const ALBUM: &str = "album";
    pub const ALBUM_ARTIST: &str = "album_artist";
    pub const DISPLAY_TITLE: &str = "display_title";
    pub const DISPLAY_SUBTITLE: &str = "display_subtitle";
    pub const DISPLAY_DESCRIPTION: &str = "display_description";
    pub const ART_URI: &str = "art_uri";
    pub const MEDIA_URI: &str = "media_uri";
    pub const DURATION: &str = "duration";
    pub const USER_RATING: &str = "user_rating";
    pub const ADVERTISEMENT: &str = "advertisement";

    pub(crate) const KNOWN: [&str; 13] = [
        MEDIA_ID,
        TITLE,
        ARTIST,
        ALBUM,
        ALBUM_ARTIST,
        DISPLAY_TITLE,
        DISPLAY_SUBTITLE,
        DISPLAY_DESCRIPTION,
        ART_URI,
        MEDIA_URI,
        DURATION,
        USER_RATING,
        ADVERTISEMENT,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Long(i64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Long(value)
    }
}

/// Immutable key/value description of the current item.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, MetadataValue>",
    into = "BTreeMap<String, MetadataValue>"
)]
pub struct LegacyMetadata(Arc<BTreeMap<String, MetadataValue>>);

impl LegacyMetadata {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        LegacyMetadata(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &LegacyMetadata) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetadataValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn long(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(MetadataValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn media_id(&self) -> Option<&str> {
        self.text(keys::MEDIA_ID)
    }

    /// Duration in ms; zero or negative values mean "unknown".
    pub fn duration_ms(&self) -> Option<u64> {
        self.long(keys::DURATION)
            .filter(|d| *d > 0)
            .map(|d| d as u64)
    }

    pub fn is_advertisement(&self) -> bool {
        self.long(keys::ADVERTISEMENT).is_some_and(|v| v != 0)
    }

    /// Whether the map carries anything an item can be built from.
    pub fn describes_playable_item(&self) -> bool {
        !self.is_empty()
    }

    pub fn to_media_metadata(&self) -> MediaMetadata {
        let owned = |key: &str| self.text(key).map(str::to_string);
        let extras = self
            .0
            .iter()
            .filter(|(key, _)| !keys::KNOWN.contains(&key.as_str()))
            .filter_map(|(key, value)| match value {
                MetadataValue::Text(text) => Some((key.clone(), text.clone())),
                MetadataValue::Long(_) => None,
            })
            .collect();

        MediaMetadata {
            title: owned(keys::TITLE).or_else(|| owned(keys::DISPLAY_TITLE)),
            artist: owned(keys::ARTIST),
            album_title: owned(keys::ALBUM),
            album_artist: owned(keys::ALBUM_ARTIST),
            display_title: owned(keys::DISPLAY_TITLE),
            subtitle: owned(keys::DISPLAY_SUBTITLE),
            description: owned(keys::DISPLAY_DESCRIPTION),
            artwork_uri: owned(keys::ART_URI),
            media_uri: owned(keys::MEDIA_URI),
            duration_ms: self.duration_ms(),
            is_playable: Some(true),
            user_rating: owned(keys::USER_RATING),
            extras,
        }
    }

    /// Item described by this map, with its own media id.
    pub fn to_media_item(&self) -> MediaItem {
        let metadata = self.to_media_metadata();
        MediaItem {
            media_id: self.media_id().unwrap_or_default().to_string(),
            uri: metadata.media_uri.clone(),
            metadata,
        }
    }

    pub fn from_media_item(item: &MediaItem) -> Self {
        let meta = &item.metadata;
        let mut entries: BTreeMap<String, MetadataValue> = BTreeMap::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                entries.insert(key.to_string(), MetadataValue::Text(value.clone()));
            }
        };

        put(keys::TITLE, &meta.title);
        put(keys::ARTIST, &meta.artist);
        put(keys::ALBUM, &meta.album_title);
        put(keys::ALBUM_ARTIST, &meta.album_artist);
        put(keys::DISPLAY_TITLE, &meta.display_title);
        put(keys::DISPLAY_SUBTITLE, &meta.subtitle);
        put(keys::DISPLAY_DESCRIPTION, &meta.description);
        put(keys::ART_URI, &meta.artwork_uri);
        put(keys::MEDIA_URI, &meta.media_uri.clone().or_else(|| item.uri.clone()));
        put(keys::USER_RATING, &meta.user_rating);

        if !item.media_id.is_empty() {
            entries.insert(
                keys::MEDIA_ID.to_string(),
                MetadataValue::Text(item.media_id.clone()),
            );
        }
        if let Some(duration) = meta.duration_ms {
            entries.insert(
                keys::DURATION.to_string(),
                MetadataValue::Long(duration.min(i64::MAX as u64) as i64),
            );
        }
        for (key, value) in &meta.extras {
            entries
                .entry(key.clone())
                .or_insert_with(|| MetadataValue::Text(value.clone()));
        }

        LegacyMetadata(Arc::new(entries))
    }
}

impl PartialEq for LegacyMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl From<BTreeMap<String, MetadataValue>> for LegacyMetadata {
    fn from(map: BTreeMap<String, MetadataValue>) -> Self {
        LegacyMetadata(Arc::new(map))
    }
}

impl From<LegacyMetadata> for BTreeMap<String, MetadataValue> {
    fn from(metadata: LegacyMetadata) -> Self {
        metadata.0.as_ref().clone()
    }
}

/// Short description carried by a queue entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyDescription {
    pub media_id: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub icon_uri: Option<String>,
    pub media_uri: Option<String>,
}

impl LegacyDescription {
    pub fn to_media_item(&self) -> MediaItem {
        MediaItem {
            media_id: self.media_id.clone().unwrap_or_default(),
            uri: self.media_uri.clone(),
            metadata: MediaMetadata {
                title: self.title.clone(),
                display_title: self.title.clone(),
                subtitle: self.subtitle.clone(),
                description: self.description.clone(),
                artwork_uri: self.icon_uri.clone(),
                media_uri: self.media_uri.clone(),
                ..MediaMetadata::default()
            },
        }
    }

    pub fn from_media_item(item: &MediaItem) -> Self {
        let meta = &item.metadata;
        LegacyDescription {
            media_id: (!item.media_id.is_empty()).then(|| item.media_id.clone()),
            title: meta.display_title.clone().or_else(|| meta.title.clone()),
            subtitle: meta.subtitle.clone(),
            description: meta.description.clone(),
            icon_uri: meta.artwork_uri.clone(),
            media_uri: item.uri.clone().or_else(|| meta.media_uri.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyQueueItem {
    pub queue_id: i64,
    pub description: LegacyDescription,
}

/// Queue as published by the legacy session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<LegacyQueueItem>", into = "Vec<LegacyQueueItem>")]
pub struct LegacyQueue(Arc<Vec<LegacyQueueItem>>);

impl LegacyQueue {
    pub fn new(items: Vec<LegacyQueueItem>) -> Self {
        LegacyQueue(Arc::new(items))
    }

    pub fn items(&self) -> &[LegacyQueueItem] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &LegacyQueue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn index_of(&self, queue_id: i64) -> Option<usize> {
        if queue_id == UNKNOWN_QUEUE_ID {
            return None;
        }
        self.0.iter().position(|item| item.queue_id == queue_id)
    }
}

impl PartialEq for LegacyQueue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl From<Vec<LegacyQueueItem>> for LegacyQueue {
    fn from(items: Vec<LegacyQueueItem>) -> Self {
        LegacyQueue::new(items)
    }
}

impl From<LegacyQueue> for Vec<LegacyQueueItem> {
    fn from(queue: LegacyQueue) -> Self {
        queue.0.as_ref().clone()
    }
}

/// Legacy playback state codes.
///
/// Encoded as the numeric code. Decoding also accepts the snake_case name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LegacyStateValue", into = "i64")]
pub enum LegacyState {
    #[default]
    None,
    Stopped,
    Paused,
    Playing,
    FastForwarding,
    Rewinding,
    Buffering,
    Error,
    Connecting,
    SkippingToPrevious,
    SkippingToNext,
    SkippingToQueueItem,
}

impl LegacyState {
    pub fn from_code(code: i64) -> Result<Self, SessionError> {
        let state = match code {
            0 => LegacyState::None,
            1 => LegacyState::Stopped,
            2 => LegacyState::Paused,
            3 => LegacyState::Playing,
            4 => LegacyState::FastForwarding,
            5 => LegacyState::Rewinding,
            6 => LegacyState::Buffering,
            7 => LegacyState::Error,
            8 => LegacyState::Connecting,
            9 => LegacyState::SkippingToPrevious,
            10 => LegacyState::SkippingToNext,
            11 => LegacyState::SkippingToQueueItem,
            other => return Err(SessionError::bad_legacy_value("state", other)),
        };
        Ok(state)
    }

    pub fn code(&self) -> i64 {
        match self {
            LegacyState::None => 0,
            LegacyState::Stopped => 1,
            LegacyState::Paused => 2,
            LegacyState::Playing => 3,
            LegacyState::FastForwarding => 4,
            LegacyState::Rewinding => 5,
            LegacyState::Buffering => 6,
            LegacyState::Error => 7,
            LegacyState::Connecting => 8,
            LegacyState::SkippingToPrevious => 9,
            LegacyState::SkippingToNext => 10,
            LegacyState::SkippingToQueueItem => 11,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, SessionError> {
        let state = match name {
            "none" => LegacyState::None,
            "stopped" => LegacyState::Stopped,
            "paused" => LegacyState::Paused,
            "playing" => LegacyState::Playing,
            "fast_forwarding" => LegacyState::FastForwarding,
            "rewinding" => LegacyState::Rewinding,
            "buffering" => LegacyState::Buffering,
            "error" => LegacyState::Error,
            "connecting" => LegacyState::Connecting,
            "skipping_to_previous" => LegacyState::SkippingToPrevious,
            "skipping_to_next" => LegacyState::SkippingToNext,
            "skipping_to_queue_item" => LegacyState::SkippingToQueueItem,
            other => return Err(SessionError::UnknownLegacyState(other.to_string())),
        };
        Ok(state)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyStateValue {
    Code(i64),
    Name(String),
}

impl TryFrom<LegacyStateValue> for LegacyState {
    type Error = SessionError;

    fn try_from(value: LegacyStateValue) -> Result<Self, SessionError> {
        match value {
            LegacyStateValue::Code(code) => LegacyState::from_code(code),
            LegacyStateValue::Name(name) => LegacyState::from_name(&name),
        }
    }
}

impl From<LegacyState> for i64 {
    fn from(state: LegacyState) -> i64 {
        state.code()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyPlaybackState {
    pub state: LegacyState,
    pub position_ms: i64,
    pub buffered_position_ms: i64,
    pub speed: f32,
    /// Controller clock time at which `position_ms` was sampled.
    pub last_update_time_ms: u64,
    pub actions: u64,
    pub active_queue_item_id: i64,
    pub error_code: i32,
    pub error_message: Option<String>,
}

impl Default for LegacyPlaybackState {
    fn default() -> Self {
        LegacyPlaybackState {
            state: LegacyState::None,
            position_ms: 0,
            buffered_position_ms: 0,
            speed: 1.0,
            last_update_time_ms: 0,
            actions: 0,
            active_queue_item_id: UNKNOWN_QUEUE_ID,
            error_code: 0,
            error_message: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyPlaybackInfo {
    pub playback_type: PlaybackType,
    pub volume_control: VolumeControlMode,
    pub max_volume: u32,
    pub current_volume: u32,
}

/// Legacy repeat codes.
pub mod repeat {
    pub const INVALID: i32 = -1;
    pub const NONE: i32 = 0;
    pub const ONE: i32 = 1;
    pub const ALL: i32 = 2;
    pub const GROUP: i32 = 3;
}

/// Legacy shuffle codes.
pub mod shuffle {
    pub const INVALID: i32 = -1;
    pub const NONE: i32 = 0;
    pub const ALL: i32 = 1;
    pub const GROUP: i32 = 2;
}

/// Everything the legacy session published so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyPlayerInfo {
    pub playback_state: Option<LegacyPlaybackState>,
    pub metadata: Option<LegacyMetadata>,
    pub queue: Option<LegacyQueue>,
    pub queue_title: Option<String>,
    pub repeat_mode: i32,
    pub shuffle_mode: i32,
    pub playback_info: Option<LegacyPlaybackInfo>,
    pub session_flags: u64,
    pub session_ready: bool,
}

impl Default for LegacyPlayerInfo {
    fn default() -> Self {
        LegacyPlayerInfo {
            playback_state: None,
            metadata: None,
            queue: None,
            queue_title: None,
            repeat_mode: repeat::NONE,
            shuffle_mode: shuffle::NONE,
            playback_info: None,
            session_flags: 0,
            session_ready: false,
        }
    }
}

impl LegacyPlayerInfo {
    pub fn handles_queue_commands(&self) -> bool {
        self.session_flags & FLAG_HANDLES_QUEUE_COMMANDS != 0
    }

    pub fn active_queue_item_id(&self) -> i64 {
        self.playback_state
            .as_ref()
            .map(|s| s.active_queue_item_id)
            .unwrap_or(UNKNOWN_QUEUE_ID)
    }

    /// Returns a copy with `change` applied. Untouched parts keep their
    /// shared storage.
    pub fn apply(&self, change: LegacyChange) -> LegacyPlayerInfo {
        let mut next = self.clone();
        match change {
            LegacyChange::PlaybackState(state) => next.playback_state = Some(state),
            LegacyChange::Metadata(metadata) => next.metadata = metadata,
            LegacyChange::Queue(queue) => next.queue = queue,
            LegacyChange::QueueTitle(title) => next.queue_title = title,
            LegacyChange::RepeatMode(mode) => next.repeat_mode = mode,
            LegacyChange::ShuffleMode(mode) => next.shuffle_mode = mode,
            LegacyChange::PlaybackInfo(info) => next.playback_info = Some(info),
            LegacyChange::SessionFlags(flags) => next.session_flags = flags,
            LegacyChange::SessionReady(ready) => next.session_ready = ready,
        }
        next
    }
}

/// One partial update pushed by a legacy session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LegacyChange {
    PlaybackState(LegacyPlaybackState),
    Metadata(Option<LegacyMetadata>),
    Queue(Option<LegacyQueue>),
    QueueTitle(Option<String>),
    RepeatMode(i32),
    ShuffleMode(i32),
    PlaybackInfo(LegacyPlaybackInfo),
    SessionFlags(u64),
    SessionReady(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_accessors() {
        let metadata = LegacyMetadata::new([
            (keys::MEDIA_ID, MetadataValue::from("id-1")),
            (keys::TITLE, MetadataValue::from("Blue")),
            (keys::DURATION, MetadataValue::from(0)),
            ("station", MetadataValue::from("FIP")),
        ]);

        assert_eq!(metadata.media_id(), Some("id-1"));
        assert_eq!(metadata.duration_ms(), None);
        assert!(!metadata.is_advertisement());

        let converted = metadata.to_media_metadata();
        assert_eq!(converted.title.as_deref(), Some("Blue"));
        assert_eq!(converted.artwork_uri, None);
        assert_eq!(converted.extras.get("station").map(String::as_str), Some("FIP"));
    }

    #[test]
    fn test_metadata_from_item_roundtrip() {
        let item = MediaItem::new("song").with_metadata(MediaMetadata {
            title: Some("Song".into()),
            artwork_uri: Some("http://host/cover.jpg".into()),
            duration_ms: Some(180_000),
            ..MediaMetadata::default()
        });
        let metadata = LegacyMetadata::from_media_item(&item);
        let back = metadata.to_media_item();

        assert_eq!(back.media_id, "song");
        assert_eq!(back.metadata.title.as_deref(), Some("Song"));
        assert_eq!(back.metadata.artwork_uri.as_deref(), Some("http://host/cover.jpg"));
        assert_eq!(back.duration_ms(), Some(180_000));
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(LegacyState::from_code(3).unwrap(), LegacyState::Playing);
        assert_eq!(LegacyState::Playing.code(), 3);
        assert!(LegacyState::from_code(42).is_err());
        assert_eq!(LegacyState::from_name("paused").unwrap(), LegacyState::Paused);
        assert!(LegacyState::from_name("Paused").is_err());
    }

    #[test]
    fn test_playback_state_accepts_codes_and_names() {
        let by_code: LegacyPlaybackState =
            serde_json::from_str(r#"{"state": 3, "position_ms": 1200}"#).unwrap();
        assert_eq!(by_code.state, LegacyState::Playing);
        assert_eq!(by_code.position_ms, 1_200);
        assert_eq!(by_code.speed, 1.0);

        let by_name: LegacyPlaybackState =
            serde_json::from_str(r#"{"state": "skipping_to_next"}"#).unwrap();
        assert_eq!(by_name.state, LegacyState::SkippingToNext);

        assert!(serde_json::from_str::<LegacyPlaybackState>(r#"{"state": 42}"#).is_err());
        assert!(serde_json::from_str::<LegacyPlaybackState>(r#"{"state": "spinning"}"#).is_err());

        let json = serde_json::to_value(&by_name).unwrap();
        assert_eq!(json["state"], 10);
    }

    #[test]
    fn test_apply_keeps_shared_parts() {
        let queue = LegacyQueue::new(vec![LegacyQueueItem {
            queue_id: 1,
            description: LegacyDescription::default(),
        }]);
        let info = LegacyPlayerInfo {
            queue: Some(queue.clone()),
            ..LegacyPlayerInfo::default()
        };

        let next = info.apply(LegacyChange::RepeatMode(repeat::ALL));
        assert_eq!(next.repeat_mode, repeat::ALL);
        assert!(next.queue.as_ref().unwrap().ptr_eq(&queue));
    }
}
