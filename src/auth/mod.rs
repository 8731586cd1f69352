//! Credential provider. Exchanges an account name and secret for an access
//! token against a Yggdrasil-style authentication server, and announces
//! online-mode joins to the session server.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("authentication request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rejected by the server ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("account has no game profile")]
    NoProfile,
    #[error("unreadable authentication response: {0}")]
    Json(#[from] serde_json::Error),
}

/// A signed-in session. Obtained once at startup and only read afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub client_token: String,
    pub profile_id: String,
    pub profile_name: String,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        client_token: impl Into<String>,
        profile_id: impl Into<String>,
        profile_name: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            client_token: client_token.into(),
            profile_id: profile_id.into(),
            profile_name: profile_name.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("client_token", &self.client_token)
            .field("profile_id", &self.profile_id)
            .field("profile_name", &self.profile_name)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateResponse {
    access_token: String,
    client_token: String,
    selected_profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: Option<String>,
    error_message: Option<String>,
}

fn rejection(status: u16, text: &str) -> CredentialError {
    let message = serde_json::from_str::<ErrorResponse>(text)
        .ok()
        .and_then(|e| e.error_message.or(e.error))
        .unwrap_or_else(|| text.chars().take(200).collect());
    CredentialError::Rejected { status, message }
}

fn parse_response(status: u16, text: &str) -> Result<Credential, CredentialError> {
    if !(200..300).contains(&status) {
        return Err(rejection(status, text));
    }

    let response: AuthenticateResponse = serde_json::from_str(text)?;
    let profile = response
        .selected_profile
        .ok_or(CredentialError::NoProfile)?;
    Ok(Credential {
        access_token: response.access_token,
        client_token: response.client_token,
        profile_id: profile.id,
        profile_name: profile.name,
    })
}

/// POST `<base_url>/authenticate` and return the session credential.
pub async fn authenticate(
    base_url: &str,
    account: &str,
    secret: &str,
) -> Result<Credential, CredentialError> {
    let client = reqwest::Client::builder().timeout(TIMEOUT).build()?;
    let url = format!("{}/authenticate", base_url.trim_end_matches('/'));
    let client_token = uuid::Uuid::new_v4().simple().to_string();

    let response = client
        .post(&url)
        .json(&json!({
            "agent": { "name": "Minecraft", "version": 1 },
            "username": account,
            "password": secret,
            "clientToken": client_token,
            "requestUser": true,
        }))
        .send()
        .await?;

    let status = response.status().as_u16();
    let text = response.text().await?;
    parse_response(status, &text)
}

/// POST `<session_url>/session/minecraft/join` so the game server can verify
/// that `credential` is about to join it. `server_hash` identifies the server's
/// key exchange.
pub async fn join_server(
    session_url: &str,
    credential: &Credential,
    server_hash: &str,
) -> Result<(), CredentialError> {
    let client = reqwest::Client::builder().timeout(TIMEOUT).build()?;
    let url = format!("{}/session/minecraft/join", session_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&json!({
            "accessToken": credential.access_token,
            "selectedProfile": credential.profile_id,
            "serverId": server_hash,
        }))
        .send()
        .await?;

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(());
    }
    let text = response.text().await?;
    Err(rejection(status, &text))
}
