//! Legacy session support: the flat model and its conversion to playlists.

pub mod adapter;
pub mod convert;
pub mod model;

pub use adapter::{to_legacy, to_timeline};
pub use convert::{TimelineConverter, to_snapshot};
pub use model::{
    LegacyChange, LegacyDescription, LegacyMetadata, LegacyPlaybackInfo, LegacyPlaybackState,
    LegacyPlayerInfo, LegacyQueue, LegacyQueueItem, LegacyState, MetadataValue,
    UNKNOWN_QUEUE_ID,
};
