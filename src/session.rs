//! Lobby session state machine
//!
//! `Uninitialized -> Syncing -> Terminal(reason)`
//!
//! [`LobbySession::apply`] consumes one full snapshot and returns the side
//! effects it implies. It never performs them; the sync loop in
//! [`crate::client`] does. Once a terminal transition is committed every
//! further snapshot is ignored, which is what keeps navigation and
//! notifications one-shot no matter how many deliveries follow.

use crate::connection::ConnectionState;
use crate::countdown;
use crate::reconciler::ParticipantReconciler;
use crate::types::*;
use tracing::{debug, info};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Syncing,
    Terminal(TerminalReason),
}

/// Side effects produced by applying a snapshot or a countdown tick
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Joined(Vec<Participant>),
    Removed(Vec<Participant>),
    Sound(Sound),
    AllReady,
    SettingsChanged(ChallengeSettings),
    CountdownTick(u64),
    Notice(Notice),
    /// Release push channel, poll timer and countdown. Emitted once.
    Terminal(TerminalReason),
    Navigate {
        target: NavigationTarget,
        after_grace: bool,
    },
}

/// Read model published to the presentation layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbyView {
    pub user_id: String,
    pub snapshot: Option<LobbySnapshot>,
    pub phase: SessionPhase,
    pub remaining_secs: u64,
    pub connection: ConnectionState,
    /// Sync resources were released; no further actions are accepted.
    pub closed: bool,
}

impl LobbyView {
    pub fn is_host(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.challenge.is_host(&self.user_id))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, SessionPhase::Terminal(_))
    }

    /// Terminal, or torn down while still in the lobby
    pub fn is_ended(&self) -> bool {
        self.closed || self.is_terminal()
    }

    pub fn participants(&self) -> &[Participant] {
        self.snapshot
            .as_ref()
            .map(|s| s.participants.as_slice())
            .unwrap_or(&[])
    }

    /// Participants to render. The viewer is hidden while their leave is in flight.
    pub fn visible_participants(&self, leaving: bool) -> Vec<Participant> {
        self.participants()
            .iter()
            .filter(|p| !(leaving && p.user_id == self.user_id))
            .cloned()
            .collect()
    }

    pub fn is_full(&self, max_participants: usize) -> bool {
        self.participants().len() >= max_participants
    }

    pub fn all_ready(&self) -> bool {
        self.snapshot.as_ref().is_some_and(LobbySnapshot::all_ready)
    }
}

/// Explicit lobby state machine for one viewer and one join code
#[derive(Debug, Clone)]
pub struct LobbySession {
    viewer: Viewer,
    countdown_seconds: u64,
    reconciler: ParticipantReconciler,
    snapshot: Option<LobbySnapshot>,
    phase: SessionPhase,
    all_ready: bool,
}

impl LobbySession {
    pub fn new(viewer: Viewer, countdown_seconds: u64) -> Self {
        let reconciler = ParticipantReconciler::new(viewer.user_id.clone());
        Self {
            viewer,
            countdown_seconds,
            reconciler,
            snapshot: None,
            phase: SessionPhase::Uninitialized,
            all_ready: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, SessionPhase::Terminal(_))
    }

    pub fn snapshot(&self) -> Option<&LobbySnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.challenge.is_host(&self.viewer.user_id))
    }

    pub fn remaining_at(&self, now_ms: i64) -> u64 {
        match &self.snapshot {
            Some(s) => countdown::remaining(s.challenge.created_at_ms(), now_ms, self.countdown_seconds),
            None => self.countdown_seconds,
        }
    }

    pub fn view(&self, now_ms: i64, connection: ConnectionState) -> LobbyView {
        LobbyView {
            user_id: self.viewer.user_id.clone(),
            snapshot: self.snapshot.clone(),
            phase: self.phase,
            remaining_secs: self.remaining_at(now_ms),
            connection,
            closed: self.is_terminal(),
        }
    }

    /// Apply one full snapshot from any delivery path.
    ///
    /// `leaving` is true while the viewer's own leave request is in flight or
    /// has succeeded; their disappearance is then not reported as a removal.
    pub fn apply(&mut self, snapshot: LobbySnapshot, leaving: bool) -> Vec<Effect> {
        if self.is_terminal() {
            debug!("Ignoring snapshot after terminal transition");
            return Vec::new();
        }

        let snapshot = snapshot.normalized();
        let first = self.snapshot.is_none();
        let is_host = snapshot.challenge.is_host(&self.viewer.user_id);
        let previous: &[Participant] = self
            .snapshot
            .as_ref()
            .map(|s| s.participants.as_slice())
            .unwrap_or(&[]);

        let rec = self
            .reconciler
            .reconcile(previous, &snapshot.participants, is_host);

        let mut effects = Vec::new();
        if !rec.joined.is_empty() && !first {
            effects.push(Effect::Sound(Sound::PlayerJoined));
            effects.push(Effect::Joined(rec.joined));
        }
        if !rec.removed.is_empty() {
            effects.push(Effect::Removed(rec.removed));
        }

        match snapshot.challenge.status {
            ChallengeStatus::Cancelled => {
                self.snapshot = Some(snapshot);
                self.commit(TerminalReason::Cancelled, &mut effects);
                if !is_host && !leaving {
                    effects.push(Effect::Notice(Notice::LobbyCancelled));
                }
                effects.push(Effect::Navigate {
                    target: NavigationTarget::Lobbies,
                    after_grace: true,
                });
            }
            ChallengeStatus::Active => {
                let target = NavigationTarget::Game {
                    challenge_id: snapshot.challenge.id.clone(),
                    join_code: snapshot.challenge.join_code.clone(),
                };
                self.snapshot = Some(snapshot);
                self.commit(TerminalReason::Started, &mut effects);
                effects.push(Effect::Sound(Sound::Start));
                effects.push(Effect::Navigate {
                    target,
                    after_grace: false,
                });
            }
            ChallengeStatus::Lobby if rec.self_removed => {
                self.snapshot = Some(snapshot);
                if leaving {
                    self.commit(TerminalReason::Left, &mut effects);
                    effects.push(Effect::Navigate {
                        target: NavigationTarget::Lobbies,
                        after_grace: false,
                    });
                } else {
                    self.commit(TerminalReason::Removed, &mut effects);
                    effects.push(Effect::Notice(Notice::Removed));
                    effects.push(Effect::Navigate {
                        target: NavigationTarget::Lobbies,
                        after_grace: true,
                    });
                }
            }
            ChallengeStatus::Lobby => {
                self.merge_lobby(snapshot, &mut effects);
                self.phase = SessionPhase::Syncing;
            }
        }

        effects
    }

    /// The challenge no longer exists (404). Treated as a cancellation.
    pub fn vanish(&mut self, leaving: bool) -> Vec<Effect> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut effects = Vec::new();
        let is_host = self.is_host();
        if let Some(s) = self.snapshot.as_mut() {
            s.challenge.status = ChallengeStatus::Cancelled;
            if !s.participants.is_empty() {
                effects.push(Effect::Removed(std::mem::take(&mut s.participants)));
            }
        }
        self.commit(TerminalReason::Cancelled, &mut effects);
        if !is_host && !leaving {
            effects.push(Effect::Notice(Notice::LobbyCancelled));
        }
        effects.push(Effect::Navigate {
            target: NavigationTarget::Lobbies,
            after_grace: true,
        });
        effects
    }

    /// Recompute the countdown from `created_at`. Only updates the displayed value.
    pub fn tick(&mut self, now_ms: i64) -> Vec<Effect> {
        if self.phase != SessionPhase::Syncing {
            return Vec::new();
        }
        vec![Effect::CountdownTick(self.remaining_at(now_ms))]
    }

    fn merge_lobby(&mut self, next: LobbySnapshot, effects: &mut Vec<Effect>) {
        match self.snapshot.as_mut() {
            Some(current) => {
                if current.challenge.settings != next.challenge.settings {
                    current.challenge.settings = next.challenge.settings.clone();
                    effects.push(Effect::SettingsChanged(next.challenge.settings.clone()));
                }
                if current.challenge.created_at != next.challenge.created_at {
                    debug!("Countdown origin moved to {}", next.challenge.created_at);
                    current.challenge.created_at = next.challenge.created_at;
                }
                current.challenge.status = next.challenge.status;
                if current.challenge.host_id != next.challenge.host_id {
                    current.challenge.host_id = next.challenge.host_id;
                }
                current.participants = next.participants;
            }
            None => self.snapshot = Some(next),
        }

        let all_ready = self.snapshot.as_ref().is_some_and(LobbySnapshot::all_ready);
        if all_ready && !self.all_ready {
            effects.push(Effect::Sound(Sound::AllReady));
            effects.push(Effect::AllReady);
        }
        self.all_ready = all_ready;
    }

    fn commit(&mut self, reason: TerminalReason, effects: &mut Vec<Effect>) {
        info!("Lobby session ended: {:?}", reason);
        self.phase = SessionPhase::Terminal(reason);
        effects.push(Effect::Terminal(reason));
    }
}
