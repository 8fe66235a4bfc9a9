//! A valid Google session (access token) for the mirrored account.
//!
//! Sessions live under `<base>/session/<account>.toml` and are refreshed in
//! place when they expire. Obtaining the first session is done outside
//! calmirror.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use google_calendar::{AccessToken, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_config::Credentials;

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

pub struct Session {
    path: PathBuf,
    data: SessionData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl From<&AccessToken> for SessionData {
    fn from(tokens: &AccessToken) -> Self {
        SessionData::from_tokens(
            tokens.access_token.clone(),
            tokens.refresh_token.clone(),
            tokens.expires_in,
        )
    }
}

impl SessionData {
    pub fn from_tokens(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        SessionData {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }
}

impl Session {
    pub fn path_for_account(base_dir: &Path, account: &str) -> PathBuf {
        let slug = account.replace(['/', '\\', ':'], "_");
        base_dir.join("session").join(format!("{slug}.toml"))
    }

    pub fn new(base_dir: &Path, account: &str, data: SessionData) -> Self {
        Session {
            path: Self::path_for_account(base_dir, account),
            data,
        }
    }

    /// Load a session and refresh it if expired.
    pub async fn load_valid(base_dir: &Path, account: &str, credentials: &Credentials) -> Result<Self> {
        let mut session = Self::load(base_dir, account)?;

        if session.is_expired() {
            debug!(account, "Google session expired, refreshing");
            session.refresh(credentials).await?;
        }

        Ok(session)
    }

    pub fn load(base_dir: &Path, account: &str) -> Result<Self> {
        let path = Self::path_for_account(base_dir, account);

        if !path.exists() {
            anyhow::bail!("Google OAuth session for {} not found at {}", account, path.display());
        }

        let contents = std::fs::read_to_string(&path).with_context(|| {
            format!("Failed to read Google OAuth session from {}", path.display())
        })?;

        let data: SessionData = toml::from_str(&contents).with_context(|| {
            format!("Failed to parse Google OAuth session from {}", path.display())
        })?;

        Ok(Session { path, data })
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(&self.data).context("Failed to serialize session")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session to {}", self.path.display()))?;

        // Owner-only, the file holds OAuth tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to set permissions on {}", self.path.display()))?;
        }

        Ok(())
    }

    pub fn client(&self, credentials: &Credentials) -> Client {
        Client::new(
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            String::new(),
            self.data.access_token.clone(),
            self.data.refresh_token.clone(),
        )
    }

    fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.data.expires_at
    }

    async fn refresh(&mut self, credentials: &Credentials) -> Result<()> {
        let mut tokens = self
            .client(credentials)
            .refresh_access_token()
            .await
            .context("Failed to refresh token")?;

        // Google typically doesn't return a new refresh_token on refresh
        if tokens.refresh_token.is_empty() {
            tokens.refresh_token = self.data.refresh_token.clone();
        }

        self.data = (&tokens).into();
        self.save()
    }
}
