//! Controller: owns the visible snapshot and serializes every mutation.
//!
//! [`SessionCore`] is the single-threaded state machine: it masks commands,
//! merges authority pushes, aggregates legacy changes and emits events.
//! [`SessionController::spawn`] runs a core on its own thread and marshals
//! calls from any thread through a crossbeam channel, so commands and merges
//! are applied in one total order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::capabilities::{AvailableActions, CapabilitySet, VolumeControlMode, translate};
use crate::clock::Clock;
use crate::config::SessionSettings;
use crate::errors::SessionError;
use crate::events::{
    SessionEvent, SessionEventBus, SessionListener, TransitionHint, build_events,
    dispatch_events,
};
use crate::legacy::{LegacyChange, LegacyPlayerInfo, TimelineConverter, to_snapshot};
use crate::masking::{Command, IssueOutcome, MaskingLayer};
use crate::merge::{SnapshotLifecycle, StateMergeEngine, diff, infer_transition};
use crate::snapshot::{ExclusionFlags, PlaybackSnapshot};
use crate::wire::{AuthorityUpdate, decode_update};

/// Outcome category of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    /// Not sent: no effect on the current state, or session released.
    InfoSkipped,
    /// Rejected locally, the capability is absent.
    CommandNotAvailable,
    Disconnected,
    BadValue,
    NotSupported,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub code: ResultCode,
}

impl SessionResult {
    pub fn new(code: ResultCode) -> Self {
        SessionResult { code }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success)
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

/// Completion side of a dispatched command, handed to the transport.
#[derive(Debug)]
pub struct CommandReply {
    tx: Sender<SessionResult>,
}

impl CommandReply {
    pub fn resolve(self, result: SessionResult) {
        // The caller may have dropped its future.
        let _ = self.tx.send(result);
    }
}

/// Pending result of an issued command.
#[derive(Debug)]
pub struct CommandFuture {
    rx: Receiver<SessionResult>,
}

impl CommandFuture {
    pub fn pair() -> (CommandFuture, CommandReply) {
        let (tx, rx) = bounded(1);
        (CommandFuture { rx }, CommandReply { tx })
    }

    pub fn resolved(code: ResultCode) -> CommandFuture {
        let (future, reply) = Self::pair();
        reply.resolve(SessionResult::new(code));
        future
    }

    /// Blocks until the result is known. A reply dropped without an answer
    /// counts as skipped.
    pub fn wait(self) -> SessionResult {
        self.rx
            .recv()
            .unwrap_or(SessionResult::new(ResultCode::InfoSkipped))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<SessionResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(SessionResult::new(ResultCode::InfoSkipped)),
        }
    }

    pub fn try_result(&self) -> Option<SessionResult> {
        self.rx.try_recv().ok()
    }
}

/// Transport towards the remote session authority.
pub trait RemoteSession: Send {
    /// Sends `command`. The result is reported through `reply`, from any
    /// thread; confirmations arrive as authority pushes carrying `seq`.
    fn dispatch(&self, seq: u64, command: &Command, reply: CommandReply);

    fn release(&self) {}
}

struct LegacyAggregation {
    info: LegacyPlayerInfo,
    converter: TimelineConverter,
    last_change_ms: Option<u64>,
}

/// Single-threaded session state.
pub struct SessionCore {
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    remote: Box<dyn RemoteSession>,
    engine: StateMergeEngine,
    masking: MaskingLayer,
    authoritative: PlaybackSnapshot,
    exclusions: ExclusionFlags,
    visible: PlaybackSnapshot,
    legacy: LegacyAggregation,
    listeners: Vec<Box<dyn SessionListener>>,
    bus: SessionEventBus,
}

impl SessionCore {
    pub fn new(
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
        remote: Box<dyn RemoteSession>,
    ) -> Self {
        let initial = PlaybackSnapshot {
            seek_back_increment_ms: settings.seek_back_increment_ms,
            seek_forward_increment_ms: settings.seek_forward_increment_ms,
            max_seek_to_previous_position_ms: settings.max_seek_to_previous_position_ms,
            ..PlaybackSnapshot::default()
        };
        SessionCore {
            settings,
            clock,
            remote,
            engine: StateMergeEngine::new(),
            masking: MaskingLayer::new(),
            authoritative: initial.clone(),
            exclusions: ExclusionFlags::NONE,
            visible: initial,
            legacy: LegacyAggregation {
                info: LegacyPlayerInfo::default(),
                converter: TimelineConverter::new(),
                last_change_ms: None,
            },
            listeners: Vec::new(),
            bus: SessionEventBus::new(),
        }
    }

    pub fn with_bus(mut self, bus: SessionEventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn add_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Snapshot visible to readers: authoritative state plus masking.
    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.visible
    }

    pub fn authoritative(&self) -> &PlaybackSnapshot {
        &self.authoritative
    }

    pub fn exclusions(&self) -> ExclusionFlags {
        self.exclusions
    }

    pub fn lifecycle(&self) -> SnapshotLifecycle {
        self.engine.lifecycle()
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_released()
    }

    pub fn pending_commands(&self) -> usize {
        self.masking.pending().len()
    }

    pub fn issue(&mut self, command: Command) -> CommandFuture {
        let (future, reply) = CommandFuture::pair();
        self.issue_with_reply(command, reply);
        future
    }

    pub fn issue_with_reply(&mut self, command: Command, reply: CommandReply) {
        if self.is_released() {
            reply.resolve(SessionResult::new(ResultCode::InfoSkipped));
            return;
        }

        let now = self.clock.now_ms();
        match self.masking.issue(command, &self.visible, now) {
            IssueOutcome::Masked {
                command,
                snapshot,
                hint,
            } => {
                let old = std::mem::replace(&mut self.visible, snapshot);
                self.publish(&old, hint, now);
                debug!(seq = command.seq, command = command.command.name(), "dispatching command");
                self.remote.dispatch(command.seq, &command.command, reply);
            }
            IssueOutcome::Rejected => {
                reply.resolve(SessionResult::new(ResultCode::CommandNotAvailable));
            }
            IssueOutcome::Ignored | IssueOutcome::Skipped => {
                reply.resolve(SessionResult::new(ResultCode::InfoSkipped));
            }
        }
    }

    pub fn apply_update(&mut self, update: AuthorityUpdate) {
        match update {
            AuthorityUpdate::Modern {
                snapshot,
                exclusions,
            } => self.on_modern_update(snapshot, exclusions),
            AuthorityUpdate::Legacy { changes } => {
                for change in changes {
                    self.on_legacy_change(change);
                }
            }
        }
    }

    /// Merges a snapshot pushed by a modern authority.
    pub fn on_modern_update(&mut self, snapshot: PlaybackSnapshot, exclusions: ExclusionFlags) {
        if self.is_released() {
            return;
        }
        let capabilities = translate(
            &AvailableActions::Explicit(snapshot.capabilities),
            VolumeControlMode::Fixed,
            true,
        );
        self.merge_authoritative(snapshot, exclusions, capabilities);
    }

    /// Records a legacy change; it is merged once the aggregation window
    /// elapses without further changes.
    pub fn on_legacy_change(&mut self, change: LegacyChange) {
        if self.is_released() {
            return;
        }
        trace!(change = ?change, "legacy change received");
        self.legacy.info = self.legacy.info.apply(change);
        self.legacy.last_change_ms = Some(self.clock.now_ms());
    }

    /// Clock time at which pending legacy changes are due, if any.
    pub fn legacy_flush_deadline(&self) -> Option<u64> {
        self.legacy
            .last_change_ms
            .map(|at| at.saturating_add(self.settings.legacy_aggregation_window_ms))
    }

    /// Flushes legacy changes whose window has elapsed.
    pub fn poll(&mut self) {
        if let Some(deadline) = self.legacy_flush_deadline() {
            if self.clock.now_ms() >= deadline {
                self.flush_legacy();
            }
        }
    }

    /// Merges the accumulated legacy state now.
    pub fn flush_legacy(&mut self) {
        if self.legacy.last_change_ms.take().is_none() || self.is_released() {
            return;
        }
        let now = self.clock.now_ms();
        let (mut snapshot, exclusions) = to_snapshot(
            &self.legacy.info,
            &mut self.legacy.converter,
            &self.authoritative,
            now,
        );
        // Legacy sessions carry no sequence numbers: the update supersedes
        // every command sent so far.
        snapshot.sequence = self.masking.last_issued_sequence();
        let capabilities = snapshot.capabilities;
        self.merge_authoritative(snapshot, exclusions, capabilities);
    }

    fn merge_authoritative(
        &mut self,
        snapshot: PlaybackSnapshot,
        exclusions: ExclusionFlags,
        capabilities: CapabilitySet,
    ) {
        let now = self.clock.now_ms();
        let outcome = self.engine.merge(
            &self.authoritative,
            &self.exclusions,
            &snapshot,
            &exclusions,
            &capabilities,
        );
        self.authoritative = outcome.snapshot;
        self.exclusions = outcome.exclusions;

        let masked = self.masking.reconcile(&self.authoritative);
        let hint = infer_transition(
            &self.visible,
            &masked,
            now,
            self.settings.position_diff_tolerance_ms,
        );
        let old = std::mem::replace(&mut self.visible, masked);
        self.publish(&old, hint, now);
    }

    fn publish(&mut self, old: &PlaybackSnapshot, hint: TransitionHint, now: u64) {
        let changes = diff(old, &self.visible);
        let events = build_events(old, &self.visible, &changes, &hint, now);
        if events.is_empty() {
            return;
        }
        debug!(count = events.len(), "publishing session events");
        self.emit(&events);
    }

    fn emit(&mut self, events: &[SessionEvent]) {
        dispatch_events(&mut self.listeners, events);
        for event in events {
            self.bus.broadcast(event.clone());
        }
    }

    /// The authority went away: notify and release.
    pub fn disconnect(&mut self) {
        if self.is_released() {
            return;
        }
        warn!("remote session disconnected");
        self.emit(&[SessionEvent::Disconnected]);
        self.release();
    }

    /// Releases the session. In-flight commands are dropped; later calls
    /// are no-ops.
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }
        self.engine.release();
        self.masking.release();
        self.legacy.last_change_ms = None;
        self.remote.release();
    }
}

enum Message {
    Command(Command, CommandReply),
    Update(AuthorityUpdate),
    AddListener(Box<dyn SessionListener>),
    Snapshot(Sender<PlaybackSnapshot>),
    Disconnected,
    Release,
}

struct SessionWorker {
    core: SessionCore,
    clock: Arc<dyn Clock>,
    rx: Receiver<Message>,
}

impl SessionWorker {
    fn next_message(&mut self) -> Option<Message> {
        loop {
            let Some(deadline) = self.core.legacy_flush_deadline() else {
                return self.rx.recv().ok();
            };
            let now = self.clock.now_ms();
            if now >= deadline {
                self.core.flush_legacy();
                continue;
            }
            match self.rx.recv_timeout(Duration::from_millis(deadline - now)) {
                Ok(message) => return Some(message),
                Err(RecvTimeoutError::Timeout) => self.core.flush_legacy(),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn run(mut self) {
        while let Some(message) = self.next_message() {
            match message {
                Message::Command(command, reply) => self.core.issue_with_reply(command, reply),
                Message::Update(update) => self.core.apply_update(update),
                Message::AddListener(listener) => self.core.add_listener(listener),
                Message::Snapshot(tx) => {
                    let _ = tx.send(self.core.snapshot().clone());
                }
                Message::Disconnected => self.core.disconnect(),
                Message::Release => self.core.release(),
            }
            if self.core.is_released() {
                break;
            }
        }
        debug!("session worker exiting");
    }
}

/// Handle to a session running on its own thread.
pub struct SessionController {
    tx: Sender<Message>,
    bus: SessionEventBus,
    handle: Option<JoinHandle<()>>,
}

/// Entry point for authority pushes, cloneable across transport threads.
#[derive(Clone)]
pub struct AuthorityHandle {
    tx: Sender<Message>,
}

impl SessionController {
    pub fn spawn(
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
        remote: Box<dyn RemoteSession>,
    ) -> Result<(SessionController, AuthorityHandle), SessionError> {
        let bus = SessionEventBus::new();
        let core = SessionCore::new(settings, clock.clone(), remote).with_bus(bus.clone());
        let (tx, rx) = unbounded::<Message>();
        let worker = SessionWorker { core, clock, rx };

        let handle = thread::Builder::new()
            .name("pmosession".into())
            .spawn(move || worker.run())
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        Ok((
            SessionController {
                tx: tx.clone(),
                bus,
                handle: Some(handle),
            },
            AuthorityHandle { tx },
        ))
    }

    /// Issues a command. Once the session is released the future resolves
    /// to [`ResultCode::InfoSkipped`].
    pub fn issue(&self, command: Command) -> CommandFuture {
        let (future, reply) = CommandFuture::pair();
        if let Err(err) = self.tx.send(Message::Command(command, reply)) {
            if let Message::Command(_, reply) = err.into_inner() {
                reply.resolve(SessionResult::new(ResultCode::InfoSkipped));
            }
        }
        future
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn add_listener(&self, listener: Box<dyn SessionListener>) -> Result<(), SessionError> {
        self.tx
            .send(Message::AddListener(listener))
            .map_err(|_| SessionError::channel_closed("listener"))
    }

    /// Visible snapshot once every earlier message has been handled;
    /// `None` after release.
    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        let (tx, rx) = bounded(1);
        self.tx.send(Message::Snapshot(tx)).ok()?;
        rx.recv().ok()
    }

    pub fn release(&self) {
        let _ = self.tx.send(Message::Release);
    }

    /// Releases the session and waits for its thread to finish.
    pub fn join(mut self) {
        self.release();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("session worker panicked");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Release);
    }
}

impl AuthorityHandle {
    pub fn push(&self, update: AuthorityUpdate) -> Result<(), SessionError> {
        self.tx
            .send(Message::Update(update))
            .map_err(|_| SessionError::channel_closed("authority update"))
    }

    /// Decodes a wire document and pushes it.
    pub fn push_json(&self, json: &str) -> Result<(), SessionError> {
        self.push(decode_update(json)?)
    }

    pub fn disconnected(&self) {
        let _ = self.tx.send(Message::Disconnected);
    }
}
