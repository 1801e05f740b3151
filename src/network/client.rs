use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::common::commands::EngineCommand;
use crate::common::events::{EngineEvent, SyncStatus};
use crate::common::types::{Collection, Message, MessageReaction, Reaction, Row, SYSTEM_USER};
use crate::store::{Participant, RoomStore};

use super::backend::{Backend, BackendError, FeedMessage, FeedStatus};
use super::session::{FeedSession, RetryPolicy, SessionPhase};

const CHANNEL_CAPACITY: usize = 256;
const DEMO_NOTICE: &str = "Backend credentials are not configured, so this room runs in \
    local-only demo mode. Messages stay on this device and disappear when the window closes.";

/// Identity and tuning for one open room.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub room_id: String,
    pub user_id: String,
    pub is_host: bool,
    pub host_name: Option<String>,
    pub retry: RetryPolicy,
}

/// Lifecycle of one optimistic write, keyed by its client-generated id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// Applied locally, insert in flight.
    Pending,
    /// Insert acknowledged; the feed echo will clear the entry.
    Confirmed,
    /// Insert rejected and the local copy removed. A feed echo arriving
    /// anyway means the ack was lost, not the write; re-apply it then.
    RolledBack,
}

/// Deferred work reporting back into the reactor loop.
#[derive(Debug)]
enum Pulse {
    RetryTimer {
        generation: u64,
    },
    WriteOutcome {
        collection: Collection,
        id: String,
        result: Result<(), BackendError>,
    },
}

/// Realtime sync engine for one room. Owns the room store and a single
/// `tokio::select!` loop over UI commands, feed messages and deferred
/// pulses; everything else only talks to it through channels.
pub struct SyncClient {
    options: EngineOptions,
    backend: Option<Arc<dyn Backend>>,
    event_tx: mpsc::Sender<EngineEvent>,
    command_rx: mpsc::Receiver<EngineCommand>,
    feed_tx: mpsc::Sender<FeedMessage>,
    feed_rx: mpsc::Receiver<FeedMessage>,
    pulse_tx: mpsc::Sender<Pulse>,
    pulse_rx: mpsc::Receiver<Pulse>,
    store: RoomStore,
    session: FeedSession,
    /// Optimistic writes awaiting their ack or feed echo, keyed by row id.
    pending: HashMap<String, WriteState>,
}

impl SyncClient {
    pub fn new(
        options: EngineOptions,
        backend: Option<Arc<dyn Backend>>,
        event_tx: mpsc::Sender<EngineEvent>,
        command_rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        let (feed_tx, feed_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (pulse_tx, pulse_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            options,
            backend,
            event_tx,
            command_rx,
            feed_tx,
            feed_rx,
            pulse_tx,
            pulse_rx,
            store: RoomStore::new(),
            session: FeedSession::new(),
            pending: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        log::info!("Sync engine started for room `{}`", self.options.room_id);
        self.start_session().await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        // UI dropped its sender; the room is being closed.
                        None => break,
                    }
                }
                Some(message) = self.feed_rx.recv() => {
                    self.handle_feed_message(message).await;
                }
                Some(pulse) = self.pulse_rx.recv() => {
                    self.handle_pulse(pulse).await;
                }
            }
        }

        self.session.abort_tasks();
        log::info!("Sync engine stopped for room `{}`", self.options.room_id);
    }

    /// Start a fresh session: new generation (stale timers and feed tasks
    /// become inert), retry counters reset, snapshot, resubscribe.
    async fn start_session(&mut self) {
        if self.backend.is_none() {
            self.seed_demo_room().await;
            return;
        }
        self.session.begin_round();
        self.session.attempt = 0;
        self.session.recovering = false;
        self.emit_status(SyncStatus::Connecting).await;
        self.load_snapshot().await;
        self.subscribe_all();
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SendMessage { text } => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return;
                }
                let timestamp = now_timestamp();
                let mentions = resolve_mentions(&text, &self.store.participants());
                let message = Message {
                    id: new_row_id(&timestamp),
                    room_id: self.options.room_id.clone(),
                    user_id: self.options.user_id.clone(),
                    text,
                    timestamp,
                    is_host: self.options.is_host,
                    host_name: if self.options.is_host {
                        self.options.host_name.clone()
                    } else {
                        None
                    },
                    mentions,
                };
                self.submit(Row::Message(message)).await;
            }
            EngineCommand::AddReaction { kind } => {
                let timestamp = now_timestamp();
                let reaction = Reaction {
                    id: new_row_id(&timestamp),
                    room_id: self.options.room_id.clone(),
                    kind,
                    timestamp,
                };
                self.submit(Row::Reaction(reaction)).await;
            }
            EngineCommand::AddMessageReaction { message_id, kind } => {
                let timestamp = now_timestamp();
                let reaction = MessageReaction {
                    id: new_row_id(&timestamp),
                    room_id: self.options.room_id.clone(),
                    message_id,
                    user_id: self.options.user_id.clone(),
                    kind,
                    timestamp,
                };
                self.submit(Row::MessageReaction(reaction)).await;
            }
            EngineCommand::Resync => {
                if self.backend.is_none() {
                    log::debug!("Resync requested in demo mode; nothing to do");
                    return;
                }
                log::info!("Resyncing room `{}`", self.options.room_id);
                self.start_session().await;
            }
        }
    }

    /// Optimistic write: apply locally, notify the UI, then submit in the
    /// background. The outcome comes back as a `Pulse::WriteOutcome`.
    async fn submit(&mut self, row: Row) {
        let collection = row.collection();
        let id = row.id().to_string();
        if !self.store.append(row.clone()) {
            log::warn!("Dropping write with duplicate id {id}");
            return;
        }
        self.emit_row(row.clone()).await;

        let Some(backend) = self.backend.clone() else {
            // Demo mode: the local apply is all there is.
            return;
        };
        self.pending.insert(id.clone(), WriteState::Pending);
        let pulse_tx = self.pulse_tx.clone();
        tokio::spawn(async move {
            let result = backend.insert_row(collection, row).await;
            let _ = pulse_tx
                .send(Pulse::WriteOutcome {
                    collection,
                    id,
                    result,
                })
                .await;
        });
    }

    async fn handle_feed_message(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Status {
                collection,
                generation,
                status,
            } => {
                if !self.session.is_current(generation) {
                    log::debug!("Dropping stale feed status from generation {generation}");
                    return;
                }
                match status {
                    FeedStatus::Subscribing => {
                        log::debug!("Subscribing to {} feed", collection.table());
                    }
                    FeedStatus::Live => self.handle_feed_live(collection).await,
                    FeedStatus::Error | FeedStatus::TimedOut | FeedStatus::Closed => {
                        self.handle_feed_failure(collection, status).await;
                    }
                }
            }
            FeedMessage::Insert {
                generation, row, ..
            } => {
                if !self.session.is_current(generation) {
                    return;
                }
                self.apply_feed_row(row).await;
            }
        }
    }

    async fn handle_feed_live(&mut self, collection: Collection) {
        log::info!("{} feed live", collection.table());
        if !self.session.mark_live(collection) {
            return;
        }
        self.session.phase = SessionPhase::Live;
        self.session.attempt = 0;
        self.emit_status(SyncStatus::Live).await;
        if self.session.recovering {
            self.session.recovering = false;
            // Rows inserted while the feed was down never reach us as
            // events; pull a fresh snapshot to close the gap.
            self.load_snapshot().await;
        }
    }

    /// One collection failing kills the whole round: the three feeds are
    /// one logical session, so they are torn down and retried as a unit.
    async fn handle_feed_failure(&mut self, collection: Collection, status: FeedStatus) {
        if self.session.phase == SessionPhase::GivenUp {
            return;
        }
        log::warn!("{} feed failed: {status:?}", collection.table());
        let was_live = self.session.phase == SessionPhase::Live;
        self.session.begin_round();
        if was_live {
            self.session.recovering = true;
        }
        self.session.attempt += 1;
        let attempt = self.session.attempt;

        if attempt >= self.options.retry.max_attempts {
            self.session.phase = SessionPhase::GivenUp;
            log::error!(
                "Giving up on the change feed after {attempt} attempts; \
                 serving last known state until resync"
            );
            self.emit_status(SyncStatus::Degraded).await;
            return;
        }

        self.session.phase = SessionPhase::Backoff;
        let delay = self.options.retry.delay(attempt);
        log::warn!(
            "Retrying feed session in {}ms (attempt {attempt})",
            delay.as_millis()
        );
        self.emit_status(SyncStatus::Retrying {
            attempt,
            delay_ms: delay.as_millis() as u64,
        })
        .await;

        let generation = self.session.generation();
        let pulse_tx = self.pulse_tx.clone();
        self.session.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = pulse_tx.send(Pulse::RetryTimer { generation }).await;
        }));
    }

    async fn handle_pulse(&mut self, pulse: Pulse) {
        match pulse {
            Pulse::RetryTimer { generation } => {
                if !self.session.is_current(generation) {
                    log::debug!("Dropping stale retry timer from generation {generation}");
                    return;
                }
                if self.session.phase != SessionPhase::Backoff {
                    return;
                }
                self.session.phase = SessionPhase::Subscribing;
                self.emit_status(SyncStatus::Connecting).await;
                self.subscribe_all();
            }
            Pulse::WriteOutcome {
                collection,
                id,
                result,
            } => self.handle_write_outcome(collection, id, result).await,
        }
    }

    async fn handle_write_outcome(
        &mut self,
        collection: Collection,
        id: String,
        result: Result<(), BackendError>,
    ) {
        let Some(state) = self.pending.get(&id).copied() else {
            // Echo already reconciled it.
            log::debug!("Outcome for unknown write {id}");
            return;
        };
        match result {
            Ok(()) => {
                if state == WriteState::Pending {
                    self.pending.insert(id, WriteState::Confirmed);
                }
            }
            Err(err) => {
                log::error!("Error inserting into {}: {err}", collection.table());
                if state == WriteState::Pending {
                    self.pending.insert(id.clone(), WriteState::RolledBack);
                    if self.store.remove(collection, &id).is_some() {
                        self.emit(EngineEvent::WriteRejected { collection, id })
                            .await;
                    }
                }
            }
        }
    }

    /// Merge one feed insert. The feed delivers at-least-once and in
    /// arrival order, so this treats the stream as a set keyed by id.
    async fn apply_feed_row(&mut self, row: Row) {
        let id = row.id().to_string();
        if let Some(state) = self.pending.remove(&id) {
            match state {
                // Echo of our own optimistic write: already in the store.
                WriteState::Pending | WriteState::Confirmed => return,
                // The ack was lost and the row rolled back locally, yet it
                // exists remotely. Fall through and re-apply as remote.
                WriteState::RolledBack => {}
            }
        }
        if self.store.append(row.clone()) {
            self.emit_row(row).await;
        }
    }

    /// Fetch all three collections concurrently and install each result
    /// independently: one failed fetch leaves that collection untouched.
    async fn load_snapshot(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let room_id = self.options.room_id.clone();
        let (messages, reactions, message_reactions) = tokio::join!(
            backend.fetch_rows(Collection::Messages, &room_id),
            backend.fetch_rows(Collection::Reactions, &room_id),
            backend.fetch_rows(Collection::MessageReactions, &room_id),
        );
        self.install_snapshot(Collection::Messages, messages);
        self.install_snapshot(Collection::Reactions, reactions);
        self.install_snapshot(Collection::MessageReactions, message_reactions);
        self.emit_snapshot().await;
    }

    fn install_snapshot(&mut self, collection: Collection, result: Result<Vec<Row>, BackendError>) {
        match result {
            Ok(rows) => {
                log::info!("Fetched {} {}", rows.len(), collection.table());
                self.store.replace_all(collection, rows);
            }
            Err(err) => {
                log::error!("Error fetching {}: {err}", collection.table());
            }
        }
    }

    /// No backend configured: one synthetic system message, no network.
    async fn seed_demo_room(&mut self) {
        log::warn!("Running in DEMO mode - backend not configured");
        let message = Message {
            id: "system-info".to_string(),
            room_id: self.options.room_id.clone(),
            user_id: SYSTEM_USER.to_string(),
            text: DEMO_NOTICE.to_string(),
            timestamp: now_timestamp(),
            is_host: false,
            host_name: None,
            mentions: Vec::new(),
        };
        self.store
            .replace_all(Collection::Messages, vec![Row::Message(message)]);
        self.emit_snapshot().await;
        self.emit_status(SyncStatus::LocalOnly).await;
    }

    fn subscribe_all(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let generation = self.session.generation();
        for collection in Collection::ALL {
            let task = backend.subscribe(
                collection,
                &self.options.room_id,
                generation,
                self.feed_tx.clone(),
            );
            self.session.track(task);
        }
    }

    async fn emit_snapshot(&self) {
        self.emit(EngineEvent::SnapshotLoaded {
            messages: self.store.messages().to_vec(),
            reactions: self.store.reactions().to_vec(),
            message_reactions: self.store.message_reactions().to_vec(),
        })
        .await;
    }

    async fn emit_row(&self, row: Row) {
        let event = match row {
            Row::Message(message) => EngineEvent::MessageReceived(message),
            Row::Reaction(reaction) => EngineEvent::ReactionReceived(reaction),
            Row::MessageReaction(reaction) => EngineEvent::MessageReactionReceived(reaction),
        };
        self.emit(event).await;
    }

    async fn emit_status(&self, status: SyncStatus) {
        self.emit(EngineEvent::SyncStatusChanged(status)).await;
    }

    async fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).await.is_err() {
            log::warn!("Failed to notify UI: event channel closed");
        }
    }
}

/// Resolve `@name` tokens against the display names known from message
/// history. Matched names become participant ids, unmatched tokens stay
/// plain text, repeats collapse to one entry.
fn resolve_mentions(text: &str, participants: &[Participant]) -> Vec<String> {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    let pattern = MENTION.get_or_init(|| Regex::new(r"@([^\s@]+)").expect("mention pattern"));

    let mut ids = Vec::new();
    for capture in pattern.captures_iter(text) {
        let name = &capture[1];
        let Some(participant) = participants.iter().find(|p| p.display == name) else {
            continue;
        };
        if !ids.contains(&participant.id) {
            ids.push(participant.id.clone());
        }
    }
    ids
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Client-generated row id: timestamp plus random suffix, so the
/// optimistic copy and the feed echo are recognizably the same entity.
fn new_row_id(timestamp: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{timestamp}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FeedMode {
        /// Subscriptions report `Live` immediately, then stay open.
        Live,
        /// Subscriptions fail immediately.
        Fail,
    }

    struct FakeBackend {
        feed_mode: FeedMode,
        fail_fetch: Vec<Collection>,
        seed: Vec<Row>,
        fail_inserts: bool,
        inserts: Mutex<Vec<Row>>,
        feeds: Mutex<HashMap<Collection, (u64, mpsc::Sender<FeedMessage>)>>,
    }

    impl FakeBackend {
        fn new(feed_mode: FeedMode) -> Self {
            Self {
                feed_mode,
                fail_fetch: Vec::new(),
                seed: Vec::new(),
                fail_inserts: false,
                inserts: Mutex::new(Vec::new()),
                feeds: Mutex::new(HashMap::new()),
            }
        }

        /// Feed sender captured at subscribe time, for injecting rows.
        async fn feed_handle(&self, collection: Collection) -> (u64, mpsc::Sender<FeedMessage>) {
            for _ in 0..200 {
                if let Some(handle) = self.feeds.lock().unwrap().get(&collection) {
                    return handle.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no subscription was opened for {collection:?}");
        }
    }

    #[async_trait::async_trait]
    impl Backend for FakeBackend {
        async fn fetch_rows(
            &self,
            collection: Collection,
            _room_id: &str,
        ) -> Result<Vec<Row>, BackendError> {
            if self.fail_fetch.contains(&collection) {
                return Err(BackendError::Rejected {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(self
                .seed
                .iter()
                .filter(|row| row.collection() == collection)
                .cloned()
                .collect())
        }

        async fn insert_row(&self, _collection: Collection, row: Row) -> Result<(), BackendError> {
            if self.fail_inserts {
                return Err(BackendError::Rejected {
                    status: 403,
                    body: "row-level security".to_string(),
                });
            }
            self.inserts.lock().unwrap().push(row);
            Ok(())
        }

        fn subscribe(
            &self,
            collection: Collection,
            _room_id: &str,
            generation: u64,
            feed_tx: mpsc::Sender<FeedMessage>,
        ) -> tokio::task::JoinHandle<()> {
            self.feeds
                .lock()
                .unwrap()
                .insert(collection, (generation, feed_tx.clone()));
            let mode = self.feed_mode;
            tokio::spawn(async move {
                match mode {
                    FeedMode::Live => {
                        let _ = feed_tx
                            .send(FeedMessage::Status {
                                collection,
                                generation,
                                status: FeedStatus::Live,
                            })
                            .await;
                        std::future::pending::<()>().await;
                    }
                    FeedMode::Fail => {
                        let _ = feed_tx
                            .send(FeedMessage::Status {
                                collection,
                                generation,
                                status: FeedStatus::Error,
                            })
                            .await;
                    }
                }
            })
        }
    }

    fn options() -> EngineOptions {
        EngineOptions {
            room_id: "demo".to_string(),
            user_id: "anon#TEST01".to_string(),
            is_host: false,
            host_name: None,
            retry: RetryPolicy::default(),
        }
    }

    fn spawn_engine(
        options: EngineOptions,
        backend: Option<Arc<dyn Backend>>,
    ) -> (mpsc::Sender<EngineCommand>, mpsc::Receiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(100);
        tokio::spawn(SyncClient::new(options, backend, event_tx, command_rx).run());
        (command_tx, event_rx)
    }

    async fn next_event(event_rx: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .expect("timed out waiting for engine event")
            .expect("engine closed the event channel")
    }

    async fn wait_for_status(
        event_rx: &mut mpsc::Receiver<EngineEvent>,
        wanted: SyncStatus,
    ) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(event_rx).await;
            let done = matches!(&event, EngineEvent::SyncStatusChanged(status) if *status == wanted);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn seed_message(id: &str, user_id: &str, text: &str) -> Row {
        Row::Message(Message {
            id: id.to_string(),
            room_id: "demo".to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            is_host: false,
            host_name: None,
            mentions: Vec::new(),
        })
    }

    #[test]
    fn mentions_resolve_known_display_names_only() {
        let participants = vec![
            Participant {
                id: "u1".to_string(),
                display: "Alice".to_string(),
                is_host: false,
            },
            Participant {
                id: "u2".to_string(),
                display: "Bob".to_string(),
                is_host: false,
            },
        ];
        let mentions = resolve_mentions("hi @Alice and @Carol", &participants);
        assert_eq!(mentions, vec!["u1".to_string()]);
    }

    #[test]
    fn repeated_mentions_collapse() {
        let participants = vec![Participant {
            id: "u1".to_string(),
            display: "Alice".to_string(),
            is_host: false,
        }];
        let mentions = resolve_mentions("@Alice @Alice hello", &participants);
        assert_eq!(mentions, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn demo_mode_keeps_writes_local() {
        let (command_tx, mut event_rx) = spawn_engine(options(), None);

        let EngineEvent::SnapshotLoaded { messages, .. } = next_event(&mut event_rx).await else {
            panic!("expected demo snapshot first");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].user_id, SYSTEM_USER);

        let EngineEvent::SyncStatusChanged(status) = next_event(&mut event_rx).await else {
            panic!("expected status event");
        };
        assert_eq!(status, SyncStatus::LocalOnly);

        command_tx
            .send(EngineCommand::SendMessage {
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        let EngineEvent::MessageReceived(message) = next_event(&mut event_rx).await else {
            panic!("expected the optimistic message");
        };
        assert_eq!(message.text, "hello");
        assert_eq!(message.user_id, "anon#TEST01");

        // Exactly one event: no confirmation, no rejection, no echo.
        let quiet = tokio::time::timeout(Duration::from_millis(100), event_rx.recv()).await;
        assert!(quiet.is_err(), "demo mode must stay silent after the echo");
    }

    #[tokio::test]
    async fn snapshot_failure_is_isolated_per_collection() {
        let mut backend = FakeBackend::new(FeedMode::Live);
        backend.seed = vec![seed_message("m1", "anon#AAAA", "hello")];
        backend.fail_fetch = vec![Collection::Reactions];
        let backend = Arc::new(backend);

        let (_command_tx, mut event_rx) =
            spawn_engine(options(), Some(backend.clone() as Arc<dyn Backend>));

        let seen = wait_for_status(&mut event_rx, SyncStatus::Live).await;
        let snapshot = seen
            .iter()
            .find_map(|event| match event {
                EngineEvent::SnapshotLoaded {
                    messages,
                    reactions,
                    message_reactions,
                } => Some((messages.len(), reactions.len(), message_reactions.len())),
                _ => None,
            })
            .expect("snapshot event missing");
        assert_eq!(snapshot, (1, 0, 0));
    }

    #[tokio::test]
    async fn rejected_write_rolls_back() {
        let mut backend = FakeBackend::new(FeedMode::Live);
        backend.fail_inserts = true;
        let backend = Arc::new(backend);

        let (command_tx, mut event_rx) =
            spawn_engine(options(), Some(backend.clone() as Arc<dyn Backend>));
        wait_for_status(&mut event_rx, SyncStatus::Live).await;

        command_tx
            .send(EngineCommand::SendMessage {
                text: "will be rejected".to_string(),
            })
            .await
            .unwrap();

        let EngineEvent::MessageReceived(message) = next_event(&mut event_rx).await else {
            panic!("expected the optimistic message first");
        };
        let EngineEvent::WriteRejected { collection, id } = next_event(&mut event_rx).await else {
            panic!("expected the rollback");
        };
        assert_eq!(collection, Collection::Messages);
        assert_eq!(id, message.id);
    }

    #[tokio::test]
    async fn feed_echo_of_own_write_is_absorbed() {
        let backend = Arc::new(FakeBackend::new(FeedMode::Live));

        let (command_tx, mut event_rx) =
            spawn_engine(options(), Some(backend.clone() as Arc<dyn Backend>));
        wait_for_status(&mut event_rx, SyncStatus::Live).await;

        command_tx
            .send(EngineCommand::SendMessage {
                text: "mine".to_string(),
            })
            .await
            .unwrap();
        let EngineEvent::MessageReceived(own) = next_event(&mut event_rx).await else {
            panic!("expected the optimistic message");
        };

        // The write reaches the backend in the background.
        for _ in 0..200 {
            if !backend.inserts.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(backend.inserts.lock().unwrap().len(), 1);

        // Replay the echo, then a genuinely remote row.
        let (generation, feed_tx) = backend.feed_handle(Collection::Messages).await;
        feed_tx
            .send(FeedMessage::Insert {
                collection: Collection::Messages,
                generation,
                row: Row::Message(own.clone()),
            })
            .await
            .unwrap();
        feed_tx
            .send(FeedMessage::Insert {
                collection: Collection::Messages,
                generation,
                row: seed_message("remote-1", "anon#BBBB", "theirs"),
            })
            .await
            .unwrap();

        let EngineEvent::MessageReceived(next) = next_event(&mut event_rx).await else {
            panic!("expected the remote message");
        };
        assert_eq!(next.id, "remote-1", "own echo must not surface twice");
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_ceiling() {
        let backend = Arc::new(FakeBackend::new(FeedMode::Fail));
        let mut options = options();
        options.retry = RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts: 3,
        };

        let (_command_tx, mut event_rx) =
            spawn_engine(options, Some(backend.clone() as Arc<dyn Backend>));

        let seen = wait_for_status(&mut event_rx, SyncStatus::Degraded).await;
        let retries = seen
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    EngineEvent::SyncStatusChanged(SyncStatus::Retrying { .. })
                )
            })
            .count();
        assert_eq!(retries, 2, "two backoff rounds before the third failure");
    }

    #[tokio::test]
    async fn resync_restarts_the_session() {
        let backend = Arc::new(FakeBackend::new(FeedMode::Live));

        let (command_tx, mut event_rx) =
            spawn_engine(options(), Some(backend.clone() as Arc<dyn Backend>));
        wait_for_status(&mut event_rx, SyncStatus::Live).await;
        let (first_generation, _) = backend.feed_handle(Collection::Messages).await;

        command_tx.send(EngineCommand::Resync).await.unwrap();
        wait_for_status(&mut event_rx, SyncStatus::Live).await;

        let (second_generation, _) = backend.feed_handle(Collection::Messages).await;
        assert!(
            second_generation > first_generation,
            "resync must invalidate the previous generation"
        );
    }
}
