use crate::types::{SpratError, SpratResult, TransferTicket};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Source of bearer tickets for a run
pub trait Authenticator {
    fn token(&self) -> SpratResult<TransferTicket>;
}

/// A ticket obtained elsewhere
pub struct StaticToken(pub TransferTicket);

impl Authenticator for StaticToken {
    fn token(&self) -> SpratResult<TransferTicket> {
        Ok(self.0.clone())
    }
}

/// OAuth2 resource-owner password grant
pub struct PasswordGrant {
    pub token_url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl Authenticator for PasswordGrant {
    fn token(&self) -> SpratResult<TransferTicket> {
        log::info!("Requesting access token (password grant) for {}", self.username);
        request_token(
            &self.token_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("grant_type", "password"),
            ],
        )
    }
}

/// OAuth2 client-credentials grant
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Authenticator for ClientCredentials {
    fn token(&self) -> SpratResult<TransferTicket> {
        log::info!("Requesting access token (client credentials) for {}", self.client_id);
        request_token(
            &self.token_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ],
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn request_token(token_url: &str, form: &[(&str, &str)]) -> SpratResult<TransferTicket> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| SpratError::Auth(format!("failed to create HTTP client: {}", e)))?;

    let response = client
        .post(token_url)
        .form(form)
        .send()
        .map_err(|e| SpratError::Auth(format!("token request failed: {}", e)))?;

    let status = response.status();
    let body = response
        .text()
        .map_err(|e| SpratError::Auth(format!("failed to read token response: {}", e)))?;
    if !status.is_success() {
        return Err(SpratError::Auth(format!("HTTP {} from token endpoint: {}", status.as_u16(), body)));
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| SpratError::Auth(format!("malformed token response: {}", e)))?;

    Ok(TransferTicket {
        access_token: parsed.access_token,
        token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
        expires_at: parsed.expires_in.and_then(expiry_from_now),
    })
}

/// `None` when `expires_in` does not fit a timestamp; the ticket is then treated as open-ended
fn expiry_from_now(seconds: i64) -> Option<DateTime<Utc>> {
    let expiry = ChronoDuration::try_seconds(seconds).and_then(|d| Utc::now().checked_add_signed(d));
    if expiry.is_none() {
        log::warn!("Ignoring out-of-range token lifetime of {} s", seconds);
    }
    expiry
}
