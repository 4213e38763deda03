//! # quiz-lobby
//!
//! Client-side synchronization for multiplayer quiz lobbies.
//!
//! ## Features
//!
//! - **Snapshot Sync**: Full lobby snapshots over a push channel, with a
//!   polling fallback while the channel is down
//! - **Participant Reconciliation**: Joins, removals and self-removal detection
//! - **Countdown**: Lobby timer derived from the challenge's creation time
//! - **Actions**: Ready, start, leave, kick and settings with local guards
//! - **QR Code**: Shareable join links with a local QR fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use quiz_lobby::{LobbyConfig, LobbyEvent, LobbySyncClient, Viewer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LobbyConfig::new("https://quiz.example.com/api")
//!         .share_base_url("https://quiz.example.com");
//!
//!     let (lobby, mut events) =
//!         LobbySyncClient::connect(config, "QUIZ42", Viewer::new("user-1"), None)?;
//!     println!("Share this URL: {}", lobby.share_url());
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             LobbyEvent::PlayerJoined(p) => println!("{} joined", p.display_name),
//!             LobbyEvent::AllReady => lobby.start_challenge().await?,
//!             LobbyEvent::Navigate(target) => {
//!                 println!("Leaving lobby: {:?}", target);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod countdown;
pub mod error;
pub mod gateway;
pub mod qr;
pub mod reconciler;
pub mod session;
pub mod sink;
pub mod transport;
pub mod types;


pub use api::{HttpLobbyApi, LobbyApi};
pub use client::{LobbyCollaborators, LobbySyncClient};
pub use config::LobbyConfig;
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use countdown::{Clock, CountdownClock, SystemClock};
pub use error::{LobbyError, Result};
pub use gateway::ActionGateway;
pub use qr::{QrImage, QrOptions, generate_qr_data_url, generate_qr_svg};
pub use reconciler::{ParticipantReconciler, Reconciliation};
pub use session::{LobbySession, LobbyView, SessionPhase};
pub use sink::{ChannelSink, EffectSink, LobbyEvent, Navigator};
pub use transport::{PushChannel, PushTransport, WebSocketTransport};
pub use types::*;
