//! Side-effect sinks injected by the hosting page

use crate::connection::ConnectionState;
use crate::types::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lobby events delivered to the application
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// Participant joined the lobby
    PlayerJoined(Participant),
    /// Participant left or was removed
    PlayerLeft(Participant),
    /// Every participant is ready
    AllReady,
    /// Host changed the quiz settings
    SettingsChanged(ChallengeSettings),
    /// Seconds left in the lobby
    CountdownTick(u64),
    /// Push channel state changed
    Connection(ConnectionState),
    /// Sound effect requested
    Sound(Sound),
    /// User-facing notification
    Notice(Notice),
    /// Leave the lobby view
    Navigate(NavigationTarget),
    /// Session reached a terminal state; all channels are released
    Ended(TerminalReason),
}

/// Sound, notification and status sink
pub trait EffectSink: Send + Sync {
    fn play_sound(&self, sound: Sound);

    fn notify(&self, notice: Notice);

    /// Presentation updates (joins, ticks, connection status). Ignored by default.
    fn lobby_event(&self, event: LobbyEvent) {
        let _ = event;
    }
}

/// Page navigation sink
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: NavigationTarget);
}

/// Sink forwarding everything into a bounded event channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<LobbyEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LobbyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn send(&self, event: LobbyEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                if matches!(event, LobbyEvent::Navigate(_) | LobbyEvent::Ended(_)) {
                    // Must not be dropped: wait for room in the background.
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(event).await;
                    });
                } else {
                    warn!("Event channel full, dropping {:?}", event);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event channel closed, receiver dropped");
            }
        }
    }
}

impl EffectSink for ChannelSink {
    fn play_sound(&self, sound: Sound) {
        self.send(LobbyEvent::Sound(sound));
    }

    fn notify(&self, notice: Notice) {
        self.send(LobbyEvent::Notice(notice));
    }

    fn lobby_event(&self, event: LobbyEvent) {
        self.send(event);
    }
}

impl Navigator for ChannelSink {
    fn navigate(&self, target: NavigationTarget) {
        self.send(LobbyEvent::Navigate(target));
    }
}
