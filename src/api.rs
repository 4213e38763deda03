//! Challenge API client
//!
//! Request/response collaborator behind the action gateway and the polling
//! fallback. Every call is a single request; nothing here retries.

use crate::config::LobbyConfig;
use crate::error::{LobbyError, Result};
use crate::types::*;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Operations the lobby needs from the challenge service
#[async_trait]
pub trait LobbyApi: Send + Sync {
    /// `GET /challenges/{code}`
    async fn fetch_snapshot(&self, join_code: &str) -> Result<LobbySnapshot>;

    /// `POST /challenges/{code}/ready`
    async fn ready(&self, join_code: &str) -> Result<()>;

    /// `POST /challenges/{code}/start`
    async fn start(&self, join_code: &str) -> Result<()>;

    /// `POST /challenges/{code}/leave`
    async fn leave(&self, join_code: &str) -> Result<LeaveResponse>;

    /// `DELETE /challenges/{code}/participants/{id}`
    async fn kick(&self, join_code: &str, participant_id: &str) -> Result<()>;

    /// `PATCH /challenges/{code}/settings`
    async fn update_settings(&self, join_code: &str, settings: &ChallengeSettings) -> Result<()>;

    /// `GET /challenges/{code}/qr-code`, returning an opaque image reference
    async fn qr_code(&self, join_code: &str) -> Result<String>;
}

/// Build `{base}/challenges/{code}{suffix}`
pub fn challenge_url(base_url: &str, join_code: &str, suffix: &str) -> Result<String> {
    if join_code.is_empty() || !join_code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(LobbyError::InvalidUrl(format!("bad join code: {join_code:?}")));
    }
    Ok(format!(
        "{}/challenges/{join_code}{suffix}",
        base_url.trim_end_matches('/')
    ))
}

/// reqwest-backed [`LobbyApi`]
#[derive(Debug, Clone)]
pub struct HttpLobbyApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLobbyApi {
    pub fn new(config: &LobbyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(config.api_base_url.clone(), client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, join_code: &str, suffix: &str) -> Result<String> {
        challenge_url(&self.base_url, join_code, suffix)
    }

    async fn post(&self, join_code: &str, suffix: &str) -> Result<reqwest::Response> {
        let url = self.url(join_code, suffix)?;
        debug!("POST {}", url);
        let response = self.client.post(&url).send().await?;
        check_status(response).await
    }
}

/// Map non-success responses onto [`LobbyError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> LobbyError {
    match status {
        StatusCode::NOT_FOUND => LobbyError::ChallengeNotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LobbyError::NotAuthorized(message),
        _ => LobbyError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Leave responses may have an empty body.
fn parse_leave(body: &str) -> Result<LeaveResponse> {
    if body.trim().is_empty() {
        return Ok(LeaveResponse::default());
    }
    Ok(serde_json::from_str(body)?)
}

/// The QR collaborator answers with JSON `{ "image": .. }` or a bare reference.
fn parse_qr(body: &str) -> String {
    match serde_json::from_str::<QrCodeResponse>(body) {
        Ok(parsed) => parsed.image,
        Err(_) => body.trim().trim_matches('"').to_string(),
    }
}

#[async_trait]
impl LobbyApi for HttpLobbyApi {
    async fn fetch_snapshot(&self, join_code: &str) -> Result<LobbySnapshot> {
        let url = self.url(join_code, "")?;
        debug!("GET {}", url);
        let response = check_status(self.client.get(&url).send().await?).await?;
        Ok(response.json::<LobbySnapshot>().await?)
    }

    async fn ready(&self, join_code: &str) -> Result<()> {
        self.post(join_code, "/ready").await?;
        Ok(())
    }

    async fn start(&self, join_code: &str) -> Result<()> {
        self.post(join_code, "/start").await?;
        Ok(())
    }

    async fn leave(&self, join_code: &str) -> Result<LeaveResponse> {
        let response = self.post(join_code, "/leave").await?;
        parse_leave(&response.text().await?)
    }

    async fn kick(&self, join_code: &str, participant_id: &str) -> Result<()> {
        let url = self.url(join_code, &format!("/participants/{participant_id}"))?;
        debug!("DELETE {}", url);
        let response = self.client.delete(&url).send().await?;
        match check_status(response).await {
            Ok(_) => Ok(()),
            // Kicking someone who already left is a no-op
            Err(LobbyError::ChallengeNotFound) => {
                debug!("Participant {} already gone", participant_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update_settings(&self, join_code: &str, settings: &ChallengeSettings) -> Result<()> {
        let url = self.url(join_code, "/settings")?;
        debug!("PATCH {}", url);
        let response = self.client.patch(&url).json(settings).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn qr_code(&self, join_code: &str) -> Result<String> {
        let url = self.url(join_code, "/qr-code")?;
        let response = check_status(self.client.get(&url).send().await?).await?;
        Ok(parse_qr(&response.text().await?))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_url() {
        assert_eq!(
            challenge_url("http://localhost:3000/api/", "QUIZ42", "/ready").unwrap(),
            "http://localhost:3000/api/challenges/QUIZ42/ready"
        );
        assert_eq!(
            challenge_url("http://x", "abc-1", "").unwrap(),
            "http://x/challenges/abc-1"
        );
    }

    #[test]
    fn test_challenge_url_rejects_bad_codes() {
        assert!(challenge_url("http://x", "", "").is_err());
        assert!(challenge_url("http://x", "../admin", "").is_err());
        assert!(challenge_url("http://x", "a b", "").is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            LobbyError::ChallengeNotFound
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "host only".into()),
            LobbyError::NotAuthorized(m) if m == "host only"
        ));
        let err = status_error(StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(err.is_retriable());
        let err = status_error(StatusCode::CONFLICT, "already started".into());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_parse_leave() {
        assert_eq!(parse_leave("").unwrap(), LeaveResponse { cancelled: false });
        assert_eq!(parse_leave(r#"{"cancelled":true}"#).unwrap(), LeaveResponse { cancelled: true });
        assert_eq!(parse_leave(r#"{"ok":true}"#).unwrap(), LeaveResponse { cancelled: false });
        assert!(parse_leave("not json").is_err());
    }

    #[test]
    fn test_parse_qr() {
        assert_eq!(parse_qr(r#"{"image":"data:image/png;base64,AAA"}"#), "data:image/png;base64,AAA");
        assert_eq!(parse_qr(r#"{"qrCode":"https://cdn/x.png"}"#), "https://cdn/x.png");
        assert_eq!(parse_qr("https://cdn/y.png\n"), "https://cdn/y.png");
    }
}
