//! # pmosession
//!
//! Controller-side reconciliation of a remote playback session.
//!
//! The crate keeps a local snapshot of the remote player consistent with
//! the authority (a legacy flat session or a modern indexed one), applies
//! user commands optimistically before they are confirmed, extrapolates
//! the playback position between updates, and reports every change as
//! ordered [`SessionEvent`]s.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmosession::{
//!     Command, CommandReply, RemoteSession, SessionController, SessionResult, SessionSettings,
//!     SystemClock,
//! };
//!
//! struct Loopback;
//!
//! impl RemoteSession for Loopback {
//!     fn dispatch(&self, _seq: u64, _command: &Command, reply: CommandReply) {
//!         reply.resolve(SessionResult::success());
//!     }
//! }
//!
//! let (controller, authority) = SessionController::spawn(
//!     SessionSettings::default(),
//!     Arc::new(SystemClock::new()),
//!     Box::new(Loopback),
//! )?;
//! let events = controller.subscribe();
//! authority.push_json(r#"{"format": "legacy", "changes": [{"kind": "repeat_mode", "value": 2}]}"#)?;
//! let _ = controller.issue(Command::SetShuffle { enabled: true });
//! # drop(events);
//! # Ok::<(), pmosession::SessionError>(())
//! ```

pub mod capabilities;
pub mod clock;
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod legacy;
pub mod masking;
pub mod merge;
pub mod model;
pub mod position;
pub mod snapshot;
pub mod wire;

pub use capabilities::{
    AvailableActions, Capability, CapabilitySet, LegacyActions, VolumeControlMode, translate,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SessionConfig, SessionSettings};
pub use controller::{
    AuthorityHandle, CommandFuture, CommandReply, RemoteSession, ResultCode, SessionController,
    SessionCore, SessionResult,
};
pub use errors::SessionError;
pub use events::{
    DiscontinuityReason, EventBatch, MediaItemTransitionReason, PositionInfo, SessionEvent,
    SessionEventBus, SessionListener, TimelineChangeReason, TransitionHint,
};
pub use masking::{Command, IssueOutcome, MaskEffect, MaskedCommand, MaskingLayer, PendingCommands};
pub use merge::{
    ChangeSet, ChangedField, MergeOutcome, SnapshotLifecycle, StateMergeEngine, infer_transition,
    merge,
};
pub use model::{
    DeviceInfo, MediaItem, MediaMetadata, PlaybackPhase, PlaybackType, PlayerError, RepeatMode,
    TrackGroup, TrackKind, Tracks,
};
pub use snapshot::{ExclusionFlags, PlaybackSnapshot, Playlist, PositionState};
pub use wire::{AuthorityUpdate, decode_update, encode_update};
