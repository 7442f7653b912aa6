// examples/replay_demo.rs
//
// Rejoue une session distante scriptée et affiche les SessionEvent émis :
//   - une session "legacy" (métadonnées + file d'attente + id actif)
//   - une session "modern" (snapshots indexés)
//   - des commandes masquées avant confirmation par l'autorité
//
// Build et run (depuis la racine du crate pmosession) :
//   cargo run --example replay_demo
//   cargo run --example replay_demo -- /chemin/vers/config   # config.yaml alternatif

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use pmosession::legacy::{
    LegacyChange, LegacyDescription, LegacyPlaybackState, LegacyQueue, LegacyQueueItem,
    LegacyState,
};
use pmosession::{
    AuthorityUpdate, CapabilitySet, Command, CommandReply, ExclusionFlags, MediaItem,
    PlaybackPhase, PlaybackSnapshot, Playlist, RemoteSession, SessionConfig, SessionController,
    SessionEvent, SessionResult, SystemClock, encode_update,
};

/// Remote qui accepte tout sans rien confirmer.
struct Loopback(&'static str);

impl RemoteSession for Loopback {
    fn dispatch(&self, seq: u64, command: &Command, reply: CommandReply) {
        println!("[{}] -> remote #{seq}: {}", self.0, command.name());
        reply.resolve(SessionResult::success());
    }
}

fn drain(label: &str, events: &Receiver<SessionEvent>) {
    for event in events.try_iter() {
        match &event {
            SessionEvent::MediaItemTransition {
                old_index,
                new_index,
                reason,
                ..
            } => println!("[{label}] {} {old_index:?} -> {new_index:?} ({reason:?})", event.name()),
            SessionEvent::PositionDiscontinuity { reason, .. } => {
                println!("[{label}] {} ({reason:?})", event.name())
            }
            SessionEvent::Events(batch) => println!("[{label}] {} x{}", event.name(), batch.fields.len()),
            _ => println!("[{label}] {}", event.name()),
        }
    }
}

fn queue(ids: &[&str]) -> LegacyQueue {
    LegacyQueue::new(
        ids.iter()
            .enumerate()
            .map(|(i, id)| LegacyQueueItem {
                queue_id: 100 + i as i64,
                description: LegacyDescription {
                    media_id: Some(id.to_string()),
                    title: Some(format!("Track {}", i + 1)),
                    ..LegacyDescription::default()
                },
            })
            .collect(),
    )
}

fn main() -> anyhow::Result<()> {
    let config_dir = env::args().nth(1).unwrap_or_default();
    let config = SessionConfig::load(&config_dir)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .try_init();
    let settings = config.settings()?;
    let pause = Duration::from_millis(settings.legacy_aggregation_window_ms + 100);

    // 1. Session legacy : les changements partiels sont agrégés puis fusionnés
    let (legacy, authority) = SessionController::spawn(
        settings.clone(),
        Arc::new(SystemClock::new()),
        Box::new(Loopback("legacy")),
    )?;
    let events = legacy.subscribe();

    authority.push(AuthorityUpdate::Legacy {
        changes: vec![
            LegacyChange::Queue(Some(queue(&["intro", "theme", "finale"]))),
            LegacyChange::PlaybackState(LegacyPlaybackState {
                state: LegacyState::Playing,
                active_queue_item_id: 100,
                ..LegacyPlaybackState::default()
            }),
        ],
    })?;
    authority.push_json(r#"{"format": "legacy", "changes": [{"kind": "repeat_mode", "value": 2}]}"#)?;
    thread::sleep(pause);
    drain("legacy", &events);

    // L'autorité passe à l'item 102 sans commande locale (état 3 = playing)
    authority.push_json(
        r#"{"format": "legacy", "changes": [
            {"kind": "playback_state", "value": {"state": 3, "active_queue_item_id": 102}}
        ]}"#,
    )?;
    thread::sleep(pause);
    drain("legacy", &events);
    legacy.join();

    // 2. Session modern : commandes masquées, puis confirmation
    let (modern, authority) = SessionController::spawn(
        settings,
        Arc::new(SystemClock::new()),
        Box::new(Loopback("modern")),
    )?;
    let events = modern.subscribe();
    let items: Vec<MediaItem> = ["a", "b", "c", "d", "e"].into_iter().map(MediaItem::new).collect();

    let first = AuthorityUpdate::Modern {
        snapshot: PlaybackSnapshot {
            playlist: Playlist::new(items.clone()),
            current_index: Some(4),
            phase: PlaybackPhase::Ready,
            capabilities: CapabilitySet::all(),
            ..PlaybackSnapshot::default()
        },
        exclusions: ExclusionFlags::NONE,
    };
    println!("[modern] <- {}", encode_update(&first)?);
    authority.push(first)?;

    let result = modern.issue(Command::RemoveMediaItems { from: 1, to: 3 }).wait();
    println!("[modern] remove -> {:?}", result.code);
    if let Some(snapshot) = modern.snapshot() {
        println!(
            "[modern] masked: {} items, current {:?}",
            snapshot.playlist.len(),
            snapshot.current_item().map(|item| item.media_id.as_str())
        );
    }
    drain("modern", &events);

    let mut remaining = items;
    remaining.drain(1..3);
    authority.push(AuthorityUpdate::Modern {
        snapshot: PlaybackSnapshot {
            playlist: Playlist::new(remaining),
            current_index: Some(2),
            phase: PlaybackPhase::Ready,
            capabilities: CapabilitySet::all(),
            sequence: 1,
            ..PlaybackSnapshot::default()
        },
        exclusions: ExclusionFlags::NONE,
    })?;
    let _ = modern.snapshot();
    drain("modern", &events);

    authority.disconnected();
    thread::sleep(Duration::from_millis(50));
    drain("modern", &events);
    modern.join();

    Ok(())
}
