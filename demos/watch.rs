//! Watch a quiz lobby from the terminal
//!
//! ```text
//! cargo run --example watch -- http://localhost:3000/api QUIZ42 user-1
//! ```
//!
//! Commands: `r` ready, `s` start, `l` leave, `k <participant-id>` kick,
//! `n <count>` question count, `c` reconnect, `q` quit.

use quiz_lobby::{LobbyConfig, LobbyEvent, LobbySyncClient, Viewer};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quiz_lobby=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let api_base = args
        .next()
        .unwrap_or_else(|| "http://localhost:3000/api".to_string());
    let join_code = args.next().ok_or("usage: watch <api-base> <join-code> <user-id>")?;
    let user_id = args.next().unwrap_or_else(|| "demo-user".to_string());

    let config = LobbyConfig::new(&api_base).share_base_url(api_base.trim_end_matches("/api"));
    let (mut lobby, mut events) =
        LobbySyncClient::connect(config, join_code, Viewer::new(user_id), None)?;
    println!("Join link: {}", lobby.share_url());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LobbyEvent::CountdownTick(secs)) => {
                    if secs % 30 == 0 {
                        println!("{}s left", secs);
                    }
                }
                Some(LobbyEvent::Navigate(target)) => {
                    println!("Navigate: {:?}", target);
                    break;
                }
                Some(event) => println!("{:?}", event),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut parts = line.split_whitespace();
                let result = match (parts.next(), parts.next()) {
                    (Some("r"), _) => lobby.ready().await,
                    (Some("s"), _) => lobby.start_challenge().await,
                    (Some("l"), _) => lobby.leave().await.map(|r| {
                        println!("Left (cancelled: {})", r.cancelled);
                    }),
                    (Some("k"), Some(id)) => lobby.kick(id).await,
                    (Some("n"), Some(n)) => match n.parse::<u32>() {
                        Ok(n) => {
                            let settings = lobby
                                .view()
                                .snapshot
                                .map(|s| s.challenge.settings)
                                .unwrap_or_default()
                                .question_count(n);
                            lobby.update_settings(&settings).await
                        }
                        Err(_) => {
                            println!("not a number: {}", n);
                            Ok(())
                        }
                    },
                    (Some("c"), _) => lobby.reconnect(),
                    (Some("q"), _) => break,
                    _ => {
                        let view = lobby.view();
                        for p in view.participants() {
                            println!("  {} {} ({:?})", p.id, p.display_name, p.status);
                        }
                        println!(
                            "{}s left, connection {:?}, can start: {}",
                            lobby.remaining_seconds(),
                            lobby.connection_state(),
                            lobby.can_start()
                        );
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    println!("error: {}", e);
                }
            }
        }
    }

    lobby.teardown().await;
    Ok(())
}
