//! LobbySyncClient - keeps one lobby view in sync
//!
//! A thin handle in front of a background sync loop. The loop owns the
//! [`LobbySession`] and is the only writer of lobby state. It selects over:
//!
//! - snapshots from the push supervisor
//! - the polling fallback (only while the push channel is not live, never
//!   more than one fetch in flight)
//! - the one-second countdown tick
//! - the grace timer before navigating away from a cancelled lobby
//! - commands from the handle
//!
//! Push channel, poll timer and countdown are released together, exactly
//! once, when a terminal snapshot arrives or the handle tears down.

use crate::api::{HttpLobbyApi, LobbyApi};
use crate::config::{LobbyConfig, MIN_INTERVAL};
use crate::connection::{Backoff, ConnectionState, ConnectionStateMachine};
use crate::countdown::{SharedClock, SystemClock};
use crate::error::{LobbyError, Result};
use crate::gateway::{ActionGateway, check_start};
use crate::qr::{QrImage, QrOptions, share_qr};
use crate::session::{Effect, LobbySession, LobbyView};
use crate::sink::{ChannelSink, EffectSink, LobbyEvent, Navigator};
use crate::transport::{PushCommand, PushTransport, WebSocketTransport, push_supervisor};
use crate::types::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// External collaborators of a lobby session
#[derive(Clone)]
pub struct LobbyCollaborators {
    pub api: Arc<dyn LobbyApi>,
    pub transport: Arc<dyn PushTransport>,
    pub effects: Arc<dyn EffectSink>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: SharedClock,
}

impl LobbyCollaborators {
    /// HTTP API, WebSocket push channel, system clock and the given sinks.
    pub fn http(
        config: &LobbyConfig,
        effects: Arc<dyn EffectSink>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Ok(Self {
            api: Arc::new(HttpLobbyApi::new(config)?),
            transport: Arc::new(WebSocketTransport::new(config)),
            effects,
            navigator,
            clock: Arc::new(SystemClock),
        })
    }
}

enum Command {
    Apply(LobbySnapshot),
    Reconnect,
    Teardown(Option<oneshot::Sender<()>>),
}

/// Handle to one synchronized lobby view
pub struct LobbySyncClient {
    config: LobbyConfig,
    join_code: String,
    viewer: Viewer,
    api: Arc<dyn LobbyApi>,
    clock: SharedClock,
    gateway: ActionGateway,
    view_rx: watch::Receiver<LobbyView>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    leaving: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl LobbySyncClient {
    /// Connect over HTTP + WebSocket and deliver effects on an event channel.
    pub fn connect(
        config: LobbyConfig,
        join_code: impl Into<String>,
        viewer: Viewer,
        initial: Option<LobbySnapshot>,
    ) -> Result<(Self, mpsc::Receiver<LobbyEvent>)> {
        let (sink, events) = ChannelSink::new(config.event_channel_capacity);
        let sink = Arc::new(sink);
        let collaborators = LobbyCollaborators::http(&config, sink.clone(), sink)?;
        let client = Self::start(config, join_code, viewer, collaborators, initial);
        Ok((client, events))
    }

    /// Start syncing a lobby.
    ///
    /// Spawns exactly one push channel, one poll timer and one countdown.
    /// An `initial` snapshot from the hosting page is applied right away;
    /// without one the current snapshot is fetched first.
    pub fn start(
        config: LobbyConfig,
        join_code: impl Into<String>,
        viewer: Viewer,
        collaborators: LobbyCollaborators,
        initial: Option<LobbySnapshot>,
    ) -> Self {
        let join_code = join_code.into();
        let LobbyCollaborators {
            api,
            transport,
            effects,
            navigator,
            clock,
        } = collaborators;

        let session = LobbySession::new(viewer.clone(), config.countdown_seconds);
        let (view_tx, view_rx) =
            watch::channel(session.view(clock.now_ms(), ConnectionState::Connecting));
        let leaving = Arc::new(AtomicBool::new(false));
        let gateway = ActionGateway::new(
            api.clone(),
            join_code.clone(),
            &viewer,
            config.countdown_seconds,
            clock.clone(),
            view_rx.clone(),
            leaving.clone(),
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = watch::channel(ConnectionState::Connecting);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (push_cmd_tx, push_cmd_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let machine = ConnectionStateMachine::new(Backoff::new(
            config.reconnect_min,
            config.reconnect_max,
        ));
        let push_task = tokio::spawn(push_supervisor(
            transport,
            join_code.clone(),
            machine,
            conn_tx,
            push_tx,
            push_cmd_rx,
        ));

        info!("Lobby sync started for {} as {}", join_code, viewer.user_id);

        let sync = SyncLoop {
            config: config.clone(),
            join_code: join_code.clone(),
            session,
            api: api.clone(),
            effects,
            navigator,
            clock: clock.clone(),
            leaving: leaving.clone(),
            view_tx,
            connection: ConnectionState::Connecting,
            resources: Resources {
                push_task: Some(push_task),
                push_cmd: Some(push_cmd_tx),
                poll_task: None,
                poll_tx,
                timers_running: true,
                torn_down: false,
            },
            pending_nav: None,
            navigated: false,
        };
        let task = tokio::spawn(sync.run(initial, cmd_rx, conn_rx, push_rx, poll_rx));

        Self {
            config,
            join_code,
            viewer,
            api,
            clock,
            gateway,
            view_rx,
            cmd_tx,
            leaving,
            task: Some(task),
        }
    }

    pub fn join_code(&self) -> &str {
        &self.join_code
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Latest published view
    pub fn view(&self) -> LobbyView {
        self.view_rx.borrow().clone()
    }

    /// Watch the view for changes
    pub fn subscribe(&self) -> watch::Receiver<LobbyView> {
        self.view_rx.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.view_rx.borrow().connection
    }

    /// Seconds left, recomputed from `created_at` now rather than at the last tick
    pub fn remaining_seconds(&self) -> u64 {
        let view = self.view_rx.borrow();
        match &view.snapshot {
            Some(s) => crate::countdown::remaining(
                s.challenge.created_at_ms(),
                self.clock.now_ms(),
                self.config.countdown_seconds,
            ),
            None => self.config.countdown_seconds,
        }
    }

    /// Participants to render; hides the viewer while their leave is pending.
    pub fn visible_participants(&self) -> Vec<Participant> {
        self.view_rx
            .borrow()
            .visible_participants(self.leaving.load(Ordering::Acquire))
    }

    pub fn is_full(&self) -> bool {
        self.view_rx.borrow().is_full(self.config.max_participants)
    }

    /// Whether the viewer may start right now
    pub fn can_start(&self) -> bool {
        let view = self.view_rx.borrow();
        !self.leaving.load(Ordering::Acquire)
            && !view.is_ended()
            && check_start(
                view.snapshot.as_ref(),
                &self.viewer.user_id,
                self.clock.now_ms(),
                self.config.countdown_seconds,
            )
            .is_ok()
    }

    /// Whether actions are currently accepted
    pub fn actions_enabled(&self) -> bool {
        !self.leaving.load(Ordering::Acquire) && !self.view_rx.borrow().is_ended()
    }

    // =========================================================================
    // Actions
    // =========================================================================

    pub async fn ready(&self) -> Result<()> {
        self.gateway.ready().await
    }

    pub async fn start_challenge(&self) -> Result<()> {
        self.gateway.start().await
    }

    pub async fn leave(&self) -> Result<LeaveResponse> {
        self.gateway.leave().await
    }

    pub async fn kick(&self, participant_id: &str) -> Result<()> {
        self.gateway.kick(participant_id).await
    }

    pub async fn update_settings(&self, settings: &ChallengeSettings) -> Result<()> {
        self.gateway.update_settings(settings).await
    }

    // =========================================================================
    // Sync control
    // =========================================================================

    /// Feed a snapshot obtained elsewhere; applied exactly like a pushed one.
    pub fn apply(&self, snapshot: LobbySnapshot) -> Result<()> {
        self.cmd_tx
            .send(Command::Apply(snapshot))
            .map_err(|_| LobbyError::SessionEnded)
    }

    /// Close the push channel and open a fresh one.
    pub fn reconnect(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Reconnect)
            .map_err(|_| LobbyError::SessionEnded)
    }

    /// Release push channel, poll timer and countdown. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Teardown(Some(done_tx))).is_ok() {
            let _ = done_rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Sync loop ended with join error: {}", e);
            }
        }
    }

    // =========================================================================
    // Sharing
    // =========================================================================

    pub fn share_url(&self) -> String {
        join_url(self.config.share_base_url.as_deref(), &self.join_code)
    }

    /// QR code for the join URL, from the provider or rendered locally.
    pub async fn share_qr(&self, options: Option<QrOptions>) -> Result<QrImage> {
        share_qr(
            self.api.as_ref(),
            &self.join_code,
            &self.share_url(),
            &options.unwrap_or_default(),
        )
        .await
    }
}

impl std::fmt::Debug for LobbySyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbySyncClient")
            .field("join_code", &self.join_code)
            .field("viewer", &self.viewer)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for LobbySyncClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Teardown(None));
    }
}

// =========================================================================
// Sync loop
// =========================================================================

struct Resources {
    push_task: Option<JoinHandle<()>>,
    push_cmd: Option<mpsc::UnboundedSender<PushCommand>>,
    poll_task: Option<JoinHandle<()>>,
    poll_tx: mpsc::UnboundedSender<Result<LobbySnapshot>>,
    timers_running: bool,
    torn_down: bool,
}

impl Resources {
    /// Returns false if already torn down.
    fn release(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.timers_running = false;
        // Dropping the command sender lets the supervisor close the channel itself
        self.push_cmd = None;
        self.push_task = None;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        true
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        if let Some(task) = self.push_task.take() {
            task.abort();
        }
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

struct SyncLoop {
    config: LobbyConfig,
    join_code: String,
    session: LobbySession,
    api: Arc<dyn LobbyApi>,
    effects: Arc<dyn EffectSink>,
    navigator: Arc<dyn Navigator>,
    clock: SharedClock,
    leaving: Arc<AtomicBool>,
    view_tx: watch::Sender<LobbyView>,
    connection: ConnectionState,
    resources: Resources,
    pending_nav: Option<(Instant, NavigationTarget)>,
    navigated: bool,
}

impl SyncLoop {
    async fn run(
        mut self,
        initial: Option<LobbySnapshot>,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut conn_rx: watch::Receiver<ConnectionState>,
        mut push_rx: mpsc::UnboundedReceiver<LobbySnapshot>,
        mut poll_rx: mpsc::UnboundedReceiver<Result<LobbySnapshot>>,
    ) {
        let poll_every = self.config.poll_interval.max(MIN_INTERVAL);
        let mut poll_ticker = tokio::time::interval_at(Instant::now() + poll_every, poll_every);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut countdown_ticker =
            tokio::time::interval(self.config.tick_interval.max(MIN_INTERVAL));
        countdown_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        match initial {
            Some(snapshot) => self.apply(snapshot),
            None => self.spawn_fetch(),
        }

        let mut conn_open = true;
        let mut teardown_ack: Option<oneshot::Sender<()>> = None;

        while !self.navigated {
            let active = !self.resources.torn_down;
            let nav_deadline = self
                .pending_nav
                .as_ref()
                .map(|(deadline, _)| *deadline)
                .unwrap_or_else(Instant::now);

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Apply(snapshot)) => self.apply(snapshot),
                    Some(Command::Reconnect) => {
                        if let Some(push_cmd) = &self.resources.push_cmd {
                            let _ = push_cmd.send(PushCommand::Reconnect);
                        }
                    }
                    Some(Command::Teardown(ack)) => {
                        teardown_ack = ack;
                        break;
                    }
                    None => break,
                },

                Some(snapshot) = push_rx.recv(), if active => {
                    debug!("Pushed snapshot for {}", self.join_code);
                    self.apply(snapshot);
                }

                changed = conn_rx.changed(), if active && conn_open => match changed {
                    Ok(()) => {
                        let state = *conn_rx.borrow_and_update();
                        self.on_connection(state);
                    }
                    Err(_) => conn_open = false,
                },

                Some(result) = poll_rx.recv(), if active => {
                    self.resources.poll_task = None;
                    self.on_fetch(result);
                }

                _ = poll_ticker.tick(), if active && self.resources.timers_running => {
                    let live = conn_rx.borrow().is_live();
                    self.poll_tick(live);
                }

                _ = countdown_ticker.tick(), if active && self.resources.timers_running => {
                    let effects = self.session.tick(self.clock.now_ms());
                    self.run_effects(effects);
                    self.publish_view();
                }

                _ = tokio::time::sleep_until(nav_deadline), if self.pending_nav.is_some() => {
                    if let Some((_, target)) = self.pending_nav.take() {
                        self.navigate(target);
                    }
                }
            }
        }

        // Teardown by the handle cancels a navigation that has not happened yet
        self.pending_nav = None;
        self.teardown();
        self.publish_view();
        if let Some(ack) = teardown_ack {
            let _ = ack.send(());
        }
        debug!("Sync loop for {} exited", self.join_code);
    }

    fn apply(&mut self, snapshot: LobbySnapshot) {
        let leaving = self.leaving.load(Ordering::Acquire);
        let effects = self.session.apply(snapshot, leaving);
        self.run_effects(effects);
        self.publish_view();
    }

    fn on_fetch(&mut self, result: Result<LobbySnapshot>) {
        match result {
            Ok(snapshot) => self.apply(snapshot),
            Err(LobbyError::ChallengeNotFound) => {
                info!("Challenge {} no longer exists", self.join_code);
                let effects = self.session.vanish(self.leaving.load(Ordering::Acquire));
                self.run_effects(effects);
                self.publish_view();
            }
            Err(e) => warn!("Snapshot fetch for {} failed: {}", self.join_code, e),
        }
    }

    fn on_connection(&mut self, state: ConnectionState) {
        if state == self.connection {
            return;
        }
        debug!("Push channel for {}: {:?}", self.join_code, state);
        self.connection = state;
        self.effects.lobby_event(LobbyEvent::Connection(state));
        self.publish_view();
    }

    /// Polling fallback: skipped while the push channel is live, after a
    /// terminal transition, or while the previous fetch is still running.
    fn poll_tick(&mut self, live: bool) {
        if live || self.session.is_terminal() || self.resources.poll_task.is_some() {
            return;
        }
        debug!("Polling snapshot for {}", self.join_code);
        self.spawn_fetch();
    }

    fn spawn_fetch(&mut self) {
        let api = self.api.clone();
        let join_code = self.join_code.clone();
        let tx = self.resources.poll_tx.clone();
        self.resources.poll_task = Some(tokio::spawn(async move {
            let result = api.fetch_snapshot(&join_code).await;
            let _ = tx.send(result);
        }));
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Joined(list) => {
                    for p in list {
                        self.effects.lobby_event(LobbyEvent::PlayerJoined(p));
                    }
                }
                Effect::Removed(list) => {
                    for p in list {
                        self.effects.lobby_event(LobbyEvent::PlayerLeft(p));
                    }
                }
                Effect::Sound(sound) => self.effects.play_sound(sound),
                Effect::AllReady => self.effects.lobby_event(LobbyEvent::AllReady),
                Effect::SettingsChanged(settings) => {
                    self.effects.lobby_event(LobbyEvent::SettingsChanged(settings))
                }
                Effect::CountdownTick(remaining) => {
                    self.effects.lobby_event(LobbyEvent::CountdownTick(remaining))
                }
                Effect::Notice(notice) => self.effects.notify(notice),
                Effect::Terminal(reason) => {
                    self.teardown();
                    self.effects.lobby_event(LobbyEvent::Ended(reason));
                }
                Effect::Navigate {
                    target,
                    after_grace,
                } => {
                    if after_grace {
                        self.pending_nav = Some((Instant::now() + self.config.cancel_grace, target));
                    } else {
                        self.navigate(target);
                    }
                }
            }
        }
    }

    fn navigate(&mut self, target: NavigationTarget) {
        if self.navigated {
            return;
        }
        info!("Leaving lobby {} for {:?}", self.join_code, target);
        self.navigated = true;
        self.navigator.navigate(target);
    }

    fn teardown(&mut self) {
        if self.resources.release() {
            info!("Lobby sync for {} torn down", self.join_code);
        }
    }

    fn publish_view(&self) {
        let mut view = self.session.view(self.clock.now_ms(), self.connection);
        if self.resources.torn_down {
            view.closed = true;
            if !view.is_terminal() {
                view.connection = ConnectionState::Disconnected;
            }
        }
        self.view_tx.send_replace(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use crate::countdown::manual::ManualClock;
    use crate::sink::recording::RecordingSink;
    use crate::transport::mock::{FrameSender, MockTransport};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    fn p(user: &str, status: ParticipantStatus) -> Participant {
        Participant {
            id: format!("p-{user}"),
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            avatar_ref: None,
            status,
        }
    }

    fn snap(status: ChallengeStatus, participants: Vec<Participant>) -> LobbySnapshot {
        LobbySnapshot {
            challenge: Challenge {
                id: "ch-1".to_string(),
                join_code: "QUIZ42".to_string(),
                status,
                host_id: "host".to_string(),
                created_at: chrono::Utc.timestamp_millis_opt(T0).unwrap(),
                settings: ChallengeSettings::default(),
            },
            participants,
        }
    }

    fn lobby() -> LobbySnapshot {
        snap(
            ChallengeStatus::Lobby,
            vec![
                p("host", ParticipantStatus::Ready),
                p("guest", ParticipantStatus::Joined),
            ],
        )
    }

    fn frame(snapshot: &LobbySnapshot) -> String {
        let message = PushMessage::LobbyUpdate {
            challenge: snapshot.challenge.clone(),
            participants: snapshot.participants.clone(),
        };
        serde_json::to_string(&message).unwrap()
    }

    struct Harness {
        client: LobbySyncClient,
        api: Arc<MockApi>,
        transport: Arc<MockTransport>,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn navigations(&self) -> usize {
            self.sink.count(|e| matches!(e, LobbyEvent::Navigate(_)))
        }

        fn notices(&self, notice: Notice) -> usize {
            self.sink.count(|e| *e == LobbyEvent::Notice(notice.clone()))
        }
    }

    fn config() -> LobbyConfig {
        LobbyConfig::new("http://quiz.test/api")
            .share_base_url("https://quiz.test")
            .poll_interval(Duration::from_secs(5))
            .cancel_grace(Duration::from_secs(2))
            .reconnect_backoff(Duration::from_millis(100), Duration::from_secs(1))
    }

    fn start(
        user: &str,
        api: MockApi,
        transport: MockTransport,
        initial: Option<LobbySnapshot>,
    ) -> Harness {
        let api = Arc::new(api);
        let transport = Arc::new(transport);
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(T0 + 10_000));
        let collaborators = LobbyCollaborators {
            api: api.clone(),
            transport: transport.clone(),
            effects: sink.clone(),
            navigator: sink.clone(),
            clock: clock.clone(),
        };
        let client = LobbySyncClient::start(config(), "QUIZ42", Viewer::new(user), collaborators, initial);
        Harness {
            client,
            api,
            transport,
            sink,
            clock,
        }
    }

    /// Transport with one open channel; keep the sender alive to keep it open.
    fn live_transport() -> (MockTransport, FrameSender, Arc<AtomicBool>) {
        let transport = MockTransport::default();
        let (tx, closed) = transport.push_channel();
        (transport, tx, closed)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polling_while_push_is_live() {
        let (transport, tx, _closed) = live_transport();
        let h = start("guest", MockApi::with_snapshot(lobby()), transport, Some(lobby()));

        tx.send(frame(&lobby())).unwrap();
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.api.fetch_count(), 0);
        assert!(
            h.sink
                .count(|e| *e == LobbyEvent::Connection(ConnectionState::Connected))
                >= 1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_push_is_down() {
        let h = start(
            "guest",
            MockApi::with_snapshot(lobby()),
            MockTransport::default(),
            None,
        );

        settle().await;
        assert_eq!(h.api.fetch_count(), 1);
        assert!(h.client.view().snapshot.is_some());
        assert!(!h.client.connection_state().is_live());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.api.fetch_count() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_join_plays_sound() {
        let h = start(
            "host",
            MockApi::with_snapshot(lobby()),
            MockTransport::default(),
            None,
        );
        settle().await;

        let mut next = lobby();
        next.participants.push(p("carol", ParticipantStatus::Joined));
        h.api.set_snapshot(next);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(
            h.sink.count(|e| *e == LobbyEvent::Sound(Sound::PlayerJoined)),
            1
        );
        assert_eq!(h.client.view().participants().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_notifies_and_navigates_once() {
        let (transport, tx, closed) = live_transport();
        let h = start("guest", MockApi::with_snapshot(lobby()), transport, Some(lobby()));
        tx.send(frame(&lobby())).unwrap();
        settle().await;

        let cancelled = snap(ChallengeStatus::Cancelled, vec![]);
        tx.send(frame(&cancelled)).unwrap();
        tx.send(frame(&cancelled)).unwrap();
        settle().await;

        assert!(h.client.view().is_terminal());
        assert!(h.client.view().participants().is_empty());
        assert_eq!(h.notices(Notice::LobbyCancelled), 1);
        assert_eq!(h.navigations(), 0);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!h.client.actions_enabled());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            h.sink
                .count(|e| *e == LobbyEvent::Navigate(NavigationTarget::Lobbies)),
            1
        );
        assert_eq!(
            h.sink.count(|e| matches!(e, LobbyEvent::Ended(TerminalReason::Cancelled))),
            1
        );
        assert!(h.client.apply(lobby()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_challenge_is_a_cancellation() {
        let api = MockApi::with_snapshot(lobby());
        let h = start("guest", api, MockTransport::default(), None);
        settle().await;

        *h.api.fallback.lock().unwrap() = None;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(h.client.view().is_terminal());
        assert_eq!(h.notices(Notice::LobbyCancelled), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.navigations(), 1);
        assert_eq!(h.notices(Notice::LobbyCancelled), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_navigates_to_game_immediately() {
        let (transport, tx, _closed) = live_transport();
        let h = start("guest", MockApi::default(), transport, Some(lobby()));

        let active = snap(ChallengeStatus::Active, lobby().participants);
        tx.send(frame(&active)).unwrap();
        settle().await;

        assert_eq!(h.sink.count(|e| *e == LobbyEvent::Sound(Sound::Start)), 1);
        assert_eq!(
            h.sink.count(|e| *e
                == LobbyEvent::Navigate(NavigationTarget::Game {
                    challenge_id: "ch-1".to_string(),
                    join_code: "QUIZ42".to_string(),
                })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_reported_once() {
        let h = start("guest", MockApi::default(), MockTransport::default(), Some(lobby()));
        settle().await;

        let without_guest = snap(
            ChallengeStatus::Lobby,
            vec![p("host", ParticipantStatus::Ready)],
        );
        h.client.apply(without_guest.clone()).unwrap();
        h.client.apply(without_guest).unwrap();
        settle().await;

        assert_eq!(h.notices(Notice::Removed), 1);
        assert_eq!(h.navigations(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.navigations(), 1);
        assert_eq!(h.notices(Notice::Removed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_leave_waits_for_cancelled_snapshot() {
        let api = MockApi::default();
        *api.leave_response.lock().unwrap() = Some(LeaveResponse { cancelled: true });
        let h = start("host", api, MockTransport::default(), Some(lobby()));
        settle().await;

        let response = h.client.leave().await.unwrap();
        assert!(response.cancelled);
        settle().await;
        assert!(!h.client.view().is_terminal());
        assert_eq!(h.navigations(), 0);
        assert!(
            h.client
                .visible_participants()
                .iter()
                .all(|p| p.user_id != "host")
        );
        assert!(!h.client.actions_enabled());

        h.client
            .apply(snap(ChallengeStatus::Cancelled, vec![]))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.navigations(), 1);
        assert_eq!(h.notices(Notice::LobbyCancelled), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_leave_navigates_without_removal_notice() {
        let h = start("guest", MockApi::default(), MockTransport::default(), Some(lobby()));
        settle().await;

        h.client.leave().await.unwrap();
        h.client
            .apply(snap(
                ChallengeStatus::Lobby,
                vec![p("host", ParticipantStatus::Ready)],
            ))
            .unwrap();
        settle().await;

        assert_eq!(h.navigations(), 1);
        assert_eq!(h.notices(Notice::Removed), 0);
        assert_eq!(h.api.calls(), vec!["leave QUIZ42".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent_and_cancels_navigation() {
        let (transport, tx, closed) = live_transport();
        let mut h = start("guest", MockApi::default(), transport, Some(lobby()));
        tx.send(frame(&lobby())).unwrap();
        settle().await;

        h.client
            .apply(snap(ChallengeStatus::Cancelled, vec![]))
            .unwrap();
        settle().await;
        h.client.teardown().await;
        h.client.teardown().await;
        settle().await;

        assert!(closed.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.navigations(), 0);
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_rejects_further_actions() {
        let mut h = start("host", MockApi::default(), MockTransport::default(), Some(lobby()));
        settle().await;
        assert!(h.client.actions_enabled());

        h.client.teardown().await;

        assert!(h.client.view().closed);
        assert!(!h.client.view().is_terminal());
        assert!(!h.client.actions_enabled());
        assert!(!h.client.can_start());
        assert!(matches!(h.client.ready().await, Err(LobbyError::SessionEnded)));
        assert!(matches!(h.client.leave().await, Err(LobbyError::SessionEnded)));
        assert!(matches!(
            h.client.update_settings(&ChallengeSettings::default()).await,
            Err(LobbyError::SessionEnded)
        ));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_polling() {
        let mut h = start(
            "guest",
            MockApi::with_snapshot(lobby()),
            MockTransport::default(),
            Some(lobby()),
        );
        h.client.teardown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.api.fetch_count(), 0);
        assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_elapsed_enables_start() {
        let lonely = snap(
            ChallengeStatus::Lobby,
            vec![
                p("host", ParticipantStatus::Joined),
                p("guest", ParticipantStatus::Joined),
            ],
        );
        let h = start("host", MockApi::default(), MockTransport::default(), Some(lonely));
        settle().await;
        assert!(!h.client.can_start());
        assert_eq!(h.client.remaining_seconds(), 290);

        h.clock.set(T0 + 301_000);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(h.client.remaining_seconds(), 0);
        assert_eq!(h.client.view().remaining_secs, 0);
        assert!(h.sink.count(|e| *e == LobbyEvent::CountdownTick(0)) >= 1);
        assert_eq!(h.sink.count(|e| matches!(e, LobbyEvent::Notice(_))), 0);
        assert!(h.client.can_start());
        h.client.start_challenge().await.unwrap();
        assert_eq!(h.api.calls(), vec!["start QUIZ42".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_opens_new_channel() {
        let transport = MockTransport::default();
        let (first, first_closed) = transport.push_channel();
        let (second, _) = transport.push_channel();
        let h = start("guest", MockApi::default(), transport, Some(lobby()));
        first.send(frame(&lobby())).unwrap();
        settle().await;

        h.client.reconnect().unwrap();
        settle().await;
        second.send(frame(&lobby())).unwrap();
        settle().await;

        assert!(first_closed.load(Ordering::SeqCst));
        assert_eq!(h.transport.open_count(), 2);
        assert!(h.client.connection_state().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_url_and_local_qr_fallback() {
        let h = start("guest", MockApi::default(), MockTransport::default(), Some(lobby()));
        assert_eq!(h.client.share_url(), "https://quiz.test/challenges/join/QUIZ42");

        let image = h.client.share_qr(None).await.unwrap();
        assert!(matches!(image, QrImage::Local(ref url) if url.starts_with("data:image/svg+xml;base64,")));

        *h.api.qr.lock().unwrap() = Some("https://cdn/qr.png".to_string());
        let image = h.client.share_qr(None).await.unwrap();
        assert_eq!(image, QrImage::Remote("https://cdn/qr.png".to_string()));
    }
}
