//! Action gateway: ready, start, leave, kick and settings
//!
//! Actions never touch local lobby state. Whatever they achieve shows up in
//! the next snapshot. Preconditions are checked against the freshest view
//! right before the request goes out.

use crate::api::LobbyApi;
use crate::countdown::{self, SharedClock};
use crate::error::{LobbyError, Result};
use crate::session::LobbyView;
use crate::types::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Check whether `user_id` may start the challenge right now.
///
/// Allowed only for the host, only in the lobby, and only when everyone is
/// ready or the lobby countdown has run out.
pub fn check_start(
    snapshot: Option<&LobbySnapshot>,
    user_id: &str,
    now_ms: i64,
    countdown_seconds: u64,
) -> Result<()> {
    let snapshot =
        snapshot.ok_or_else(|| LobbyError::StartNotPermitted("lobby not loaded yet".to_string()))?;
    if !snapshot.challenge.is_host(user_id) {
        return Err(LobbyError::NotAuthorized("Only the host can start".to_string()));
    }
    if snapshot.challenge.status != ChallengeStatus::Lobby {
        return Err(LobbyError::SessionEnded);
    }
    let remaining = countdown::remaining(
        snapshot.challenge.created_at_ms(),
        now_ms,
        countdown_seconds,
    );
    if snapshot.all_ready() || remaining == 0 {
        Ok(())
    } else {
        Err(LobbyError::StartNotPermitted(format!(
            "{}/{} ready, {}s left",
            snapshot.ready_count(),
            snapshot.participants.len(),
            remaining
        )))
    }
}

/// Wraps the mutating challenge operations for one viewer and one lobby
pub struct ActionGateway {
    api: Arc<dyn LobbyApi>,
    join_code: String,
    user_id: String,
    countdown_seconds: u64,
    clock: SharedClock,
    view: watch::Receiver<LobbyView>,
    leaving: Arc<AtomicBool>,
}

impl ActionGateway {
    pub fn new(
        api: Arc<dyn LobbyApi>,
        join_code: impl Into<String>,
        viewer: &Viewer,
        countdown_seconds: u64,
        clock: SharedClock,
        view: watch::Receiver<LobbyView>,
        leaving: Arc<AtomicBool>,
    ) -> Self {
        Self {
            api,
            join_code: join_code.into(),
            user_id: viewer.user_id.clone(),
            countdown_seconds,
            clock,
            view,
            leaving,
        }
    }

    /// True once a leave request was sent and has not failed
    pub fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::Acquire)
    }

    /// Mark the viewer ready. Idempotent on the server.
    pub async fn ready(&self) -> Result<()> {
        self.ensure_open()?;
        let result = self.api.ready(&self.join_code).await;
        self.finish("ready", result)
    }

    /// Start the challenge (host only).
    pub async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        {
            let view = self.view.borrow();
            check_start(
                view.snapshot.as_ref(),
                &self.user_id,
                self.clock.now_ms(),
                self.countdown_seconds,
            )?;
        }
        let result = self.api.start(&self.join_code).await;
        self.finish("start", result)
    }

    /// Leave the lobby. For the host this cancels the challenge on the server,
    /// but the local session still waits for the cancelled snapshot.
    pub async fn leave(&self) -> Result<LeaveResponse> {
        self.ensure_not_ended()?;
        if self.leaving.swap(true, Ordering::AcqRel) {
            return Err(LobbyError::ActionInFlight);
        }

        match self.api.leave(&self.join_code).await {
            Ok(response) => {
                info!(
                    "Left lobby {} (cancelled: {})",
                    self.join_code, response.cancelled
                );
                Ok(response)
            }
            Err(e) => {
                self.leaving.store(false, Ordering::Release);
                self.finish("leave", Err(e))
            }
        }
    }

    /// Remove a participant (host only). Removing an absent participant is a no-op.
    pub async fn kick(&self, participant_id: &str) -> Result<()> {
        self.ensure_open()?;
        {
            let view = self.view.borrow();
            self.ensure_host(&view)?;
            let own = view
                .snapshot
                .as_ref()
                .and_then(|s| s.participant(participant_id))
                .is_some_and(|p| p.user_id == self.user_id);
            if own {
                return Err(LobbyError::NotAuthorized(
                    "Host cannot kick themselves; leave instead".to_string(),
                ));
            }
        }
        let result = self.api.kick(&self.join_code, participant_id).await;
        self.finish("kick", result)
    }

    /// Replace the quiz settings (host only, lobby only).
    pub async fn update_settings(&self, settings: &ChallengeSettings) -> Result<()> {
        self.ensure_open()?;
        {
            let view = self.view.borrow();
            self.ensure_host(&view)?;
        }
        let result = self.api.update_settings(&self.join_code, settings).await;
        self.finish("update_settings", result)
    }

    fn ensure_not_ended(&self) -> Result<()> {
        if self.view.borrow().is_ended() {
            return Err(LobbyError::SessionEnded);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.ensure_not_ended()?;
        if self.is_leaving() {
            return Err(LobbyError::ActionInFlight);
        }
        Ok(())
    }

    fn ensure_host(&self, view: &LobbyView) -> Result<()> {
        if view.is_host() {
            Ok(())
        } else {
            Err(LobbyError::NotAuthorized("Host only".to_string()))
        }
    }

    /// A failure that lost the race against a terminal snapshot reports the
    /// session end instead of the request error.
    fn finish<T>(&self, action: &str, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => {
                debug!("{} accepted for {}", action, self.join_code);
                Ok(v)
            }
            Err(e) if self.view.borrow().is_ended() => {
                debug!("{} failed after session ended: {}", action, e);
                Err(LobbyError::SessionEnded)
            }
            Err(e) => {
                warn!("{} failed for {}: {}", action, self.join_code, e);
                Err(e)
            }
        }
    }
}
