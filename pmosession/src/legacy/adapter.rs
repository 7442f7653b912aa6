//! Conversion between the legacy flat model and the indexed playlist.

use tracing::trace;

use crate::legacy::model::{
    LegacyDescription, LegacyMetadata, LegacyQueue, LegacyQueueItem, UNKNOWN_QUEUE_ID,
};
use crate::model::MediaItem;
use crate::snapshot::Playlist;

/// Builds the playlist and current index from the legacy triple.
///
/// * active id found in the queue: that entry is current. When metadata is
///   present it replaces the entry's description, keeping the entry's id.
/// * active id unknown but metadata present: the metadata becomes a
///   synthetic item appended after the queue, and is current.
/// * queue present, id unknown, no metadata: index 0.
/// * nothing at all: empty playlist, no index.
pub fn to_timeline(
    metadata: Option<&LegacyMetadata>,
    queue: Option<&LegacyQueue>,
    active_id: i64,
) -> (Playlist, Option<usize>) {
    let metadata = metadata.filter(|m| m.describes_playable_item());

    let Some(queue) = queue else {
        return match metadata {
            Some(metadata) => (Playlist::new(vec![metadata.to_media_item()]), Some(0)),
            None => (Playlist::empty(), None),
        };
    };

    let mut items: Vec<MediaItem> = queue
        .items()
        .iter()
        .map(|entry| entry.description.to_media_item())
        .collect();

    match (queue.index_of(active_id), metadata) {
        (Some(index), Some(metadata)) => {
            let mut current = metadata.to_media_item();
            current.media_id = items[index].media_id.clone();
            if current.uri.is_none() {
                current.uri = items[index].uri.clone();
            }
            items[index] = current;
            (Playlist::new(items), Some(index))
        }
        (Some(index), None) => (Playlist::new(items), Some(index)),
        (None, Some(metadata)) => {
            let index = items.len();
            trace!(
                active_id = active_id,
                queue_len = index,
                "active queue id not found, appending item from metadata"
            );
            items.push(metadata.to_media_item());
            (Playlist::new(items), Some(index))
        }
        (None, None) if items.is_empty() => (Playlist::empty(), None),
        (None, None) => (Playlist::new(items), Some(0)),
    }
}

/// Inverse of [`to_timeline`]: queue ids are the playlist indices.
pub fn to_legacy(
    playlist: &Playlist,
    current_index: Option<usize>,
) -> (Option<LegacyMetadata>, LegacyQueue, i64) {
    let queue = LegacyQueue::new(
        playlist
            .items()
            .iter()
            .enumerate()
            .map(|(index, item)| LegacyQueueItem {
                queue_id: index as i64,
                description: LegacyDescription::from_media_item(item),
            })
            .collect(),
    );

    match current_index.and_then(|i| playlist.get(i).map(|item| (i, item))) {
        Some((index, item)) => (
            Some(LegacyMetadata::from_media_item(item)),
            queue,
            index as i64,
        ),
        None => (None, queue, UNKNOWN_QUEUE_ID),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::model::{MetadataValue, keys};

    fn queue(ids: &[&str]) -> LegacyQueue {
        LegacyQueue::new(
            ids.iter()
                .enumerate()
                .map(|(i, id)| LegacyQueueItem {
                    queue_id: 100 + i as i64,
                    description: LegacyDescription {
                        media_id: Some(id.to_string()),
                        title: Some(format!("Title {}", id)),
                        ..LegacyDescription::default()
                    },
                })
                .collect(),
        )
    }

    fn metadata(id: &str) -> LegacyMetadata {
        LegacyMetadata::new([
            (keys::MEDIA_ID, MetadataValue::from(id)),
            (keys::TITLE, MetadataValue::from("Now playing")),
            (keys::DURATION, MetadataValue::from(240_000)),
        ])
    }

    #[test]
    fn test_active_id_selects_index() {
        let q = queue(&["a", "b", "c"]);
        let (playlist, index) = to_timeline(None, Some(&q), 101);
        assert_eq!(playlist.len(), 3);
        assert_eq!(index, Some(1));
        assert_eq!(playlist.get(1).unwrap().media_id, "b");
    }

    #[test]
    fn test_current_entry_takes_metadata_keeps_queue_id() {
        let q = queue(&["a", "b", "c"]);
        let m = metadata("other");
        let (playlist, index) = to_timeline(Some(&m), Some(&q), 102);

        assert_eq!(index, Some(2));
        let current = playlist.get(2).unwrap();
        assert_eq!(current.media_id, "c");
        assert_eq!(current.metadata.title.as_deref(), Some("Now playing"));
        assert_eq!(current.duration_ms(), Some(240_000));
    }

    #[test]
    fn test_stale_id_appends_synthetic_item() {
        let q = queue(&["a", "b"]);
        let m = metadata("x");
        let (playlist, index) = to_timeline(Some(&m), Some(&q), 999);

        assert_eq!(playlist.len(), 3);
        assert_eq!(index, Some(2));
        assert_eq!(playlist.get(2).unwrap().media_id, "x");
    }

    #[test]
    fn test_empty_queue_with_metadata_gives_single_item() {
        let q = queue(&[]);
        let m = metadata("x");
        let (playlist, index) = to_timeline(Some(&m), Some(&q), UNKNOWN_QUEUE_ID);

        assert_eq!(playlist.len(), 1);
        assert_eq!(index, Some(0));
    }

    #[test]
    fn test_queue_absent() {
        let m = metadata("x");
        let (playlist, index) = to_timeline(Some(&m), None, UNKNOWN_QUEUE_ID);
        assert_eq!(playlist.len(), 1);
        assert_eq!(index, Some(0));

        let (playlist, index) = to_timeline(None, None, UNKNOWN_QUEUE_ID);
        assert!(playlist.is_empty());
        assert_eq!(index, None);
    }

    #[test]
    fn test_unresolved_without_metadata_falls_back_to_first() {
        let q = queue(&["a", "b"]);
        let (playlist, index) = to_timeline(None, Some(&q), 999);
        assert_eq!(playlist.len(), 2);
        assert_eq!(index, Some(0));
    }

    #[test]
    fn test_unchanged_inputs_give_equal_output() {
        let q = queue(&["a", "b", "c"]);
        let m = metadata("b");
        let first = to_timeline(Some(&m), Some(&q), 101);
        let second = to_timeline(Some(&m), Some(&q), 101);
        assert_eq!(first, second);
    }

    #[test]
    fn test_legacy_roundtrip() {
        let q = queue(&["a", "b", "c"]);
        let m = metadata("b");
        let (playlist, index) = to_timeline(Some(&m), Some(&q), 101);

        let (meta_back, queue_back, active_back) = to_legacy(&playlist, index);
        let (again, index_again) = to_timeline(meta_back.as_ref(), Some(&queue_back), active_back);

        assert_eq!(index_again, index);
        let ids: Vec<_> = again.items().iter().map(|i| i.media_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(again.get(1), playlist.get(1));
        assert_eq!(
            again.get(0).unwrap().metadata.title,
            playlist.get(0).unwrap().metadata.title
        );
    }

    #[test]
    fn test_to_legacy_without_current() {
        let (metadata, queue, active) = to_legacy(&Playlist::empty(), None);
        assert!(metadata.is_none());
        assert!(queue.is_empty());
        assert_eq!(active, UNKNOWN_QUEUE_ID);
    }
}
