//! Type definitions for quiz-lobby

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum participants in one lobby (one host plus seven guests)
pub const MAX_PARTICIPANTS: usize = 8;

/// Challenge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    Lobby,
    Active,
    Cancelled,
}

/// Participant status. Monotonic within one join: `Joined` -> `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    #[default]
    Joined,
    Ready,
}

/// Quiz settings, editable by the host while the challenge is in the lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub question_count: u32,
    /// Seconds allowed per question
    pub time_limit: u32,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            category: None,
            difficulty: None,
            question_count: 10,
            time_limit: 30,
        }
    }
}

impl ChallengeSettings {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = Some(difficulty.into());
        self
    }

    pub fn question_count(mut self, n: u32) -> Self {
        self.question_count = n;
        self
    }

    pub fn time_limit(mut self, secs: u32) -> Self {
        self.time_limit = secs;
        self
    }
}

/// A challenge as seen at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub join_code: String,
    pub status: ChallengeStatus,
    pub host_id: String,
    /// Single source of truth for the lobby countdown
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: ChallengeSettings,
}

impl Challenge {
    pub fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }
}

/// A participant record. `id` is stable per join, `user_id` per person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub status: ParticipantStatus,
}

impl Participant {
    pub fn is_ready(&self) -> bool {
        self.status == ParticipantStatus::Ready
    }
}

/// Full lobby state. Every snapshot replaces local state; they are never diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub challenge: Challenge,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl LobbySnapshot {
    /// Collapse duplicate `user_id`s, keeping the first record for each user.
    pub fn normalized(mut self) -> Self {
        let mut seen = HashSet::new();
        self.participants.retain(|p| seen.insert(p.user_id.clone()));
        self
    }

    /// True when the lobby has participants and every one of them is ready.
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(Participant::is_ready)
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn ready_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_ready()).count()
    }
}

// Wire message types

/// Frames delivered by the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    LobbyUpdate {
        challenge: Challenge,
        #[serde(default)]
        participants: Vec<Participant>,
    },
    Ping,
}

impl PushMessage {
    pub fn into_snapshot(self) -> Option<LobbySnapshot> {
        match self {
            PushMessage::LobbyUpdate {
                challenge,
                participants,
            } => Some(LobbySnapshot {
                challenge,
                participants,
            }),
            PushMessage::Ping => None,
        }
    }
}

/// Response body of `POST /challenges/{code}/leave`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveResponse {
    #[serde(default)]
    pub cancelled: bool,
}

/// Opaque image reference returned by the QR collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    #[serde(alias = "qrCode", alias = "url")]
    pub image: String,
}

// Side-effect vocabulary

/// Identity of the local user, supplied by the hosting page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
}

impl Viewer {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Where to send the viewer when the lobby view is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    /// The challenge started; go play it
    Game {
        challenge_id: String,
        join_code: String,
    },
    /// Back to the challenge list
    Lobbies,
}

/// Sound effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    PlayerJoined,
    AllReady,
    Start,
}

/// User-facing notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The host cancelled the lobby
    LobbyCancelled,
    /// Someone else removed the viewer from the lobby
    Removed,
}

/// Why a session reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Started,
    Cancelled,
    Removed,
    Left,
}

/// Build a shareable join URL for a lobby
pub fn join_url(base_url: Option<&str>, join_code: &str) -> String {
    match base_url {
        Some(base) => format!("{}/challenges/join/{join_code}", base.trim_end_matches('/')),
        None => format!("/challenges/join/{join_code}"),
    }
}

/// Current wall-clock time in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
