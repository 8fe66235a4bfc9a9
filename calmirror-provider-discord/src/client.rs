//! `SchedulingService` over the Discord REST API.

use std::time::Duration;

use async_trait::async_trait;
use calmirror_core::config::SchedulingConfig;
use calmirror_core::{EntityDraft, ScheduledEntity, SchedulingService, SyncError, SyncResult};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::wire::{DiscordScheduledEvent, ScheduledEventRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DiscordScheduling {
    http: Client,
    api_base: String,
    guild_id: String,
    token: String,
    self_id: String,
}

#[derive(Deserialize)]
struct CurrentUser {
    id: String,
}

impl DiscordScheduling {
    /// Build the client and learn the bot's own user id.
    pub async fn connect(config: &SchedulingConfig) -> SyncResult<Self> {
        let mut client = Self::with_identity(config, String::new())?;

        let url = format!("{}/users/@me", client.api_base);
        let me: CurrentUser = client.send(client.http.get(&url)).await?;
        info!(bot_id = %me.id, guild_id = %client.guild_id, "Connected to Discord");

        client.self_id = me.id;
        Ok(client)
    }

    /// Build the client for an already known bot identity. No network access.
    pub fn with_identity(config: &SchedulingConfig, self_id: String) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config(format!("Could not build HTTP client: {e}")))?;

        Ok(DiscordScheduling {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            guild_id: config.guild_id.clone(),
            token: config.bot_token.clone(),
            self_id,
        })
    }

    fn events_url(&self) -> String {
        format!("{}/guilds/{}/scheduled-events", self.api_base, self.guild_id)
    }

    fn event_url(&self, entity_id: &str) -> String {
        format!("{}/{}", self.events_url(), entity_id)
    }

    async fn dispatch(&self, builder: RequestBuilder) -> SyncResult<Response> {
        let response = builder
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_for(response).await)
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> SyncResult<T> {
        let response = self.dispatch(builder).await?;
        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::Serialization(format!("Failed to parse Discord response: {e}")))
    }
}

#[async_trait]
impl SchedulingService for DiscordScheduling {
    async fn create_entity(&self, draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
        debug!(name = %draft.name, "Discord POST scheduled event");
        let builder = self
            .http
            .post(self.events_url())
            .json(&ScheduledEventRequest::from(draft));
        let event: DiscordScheduledEvent = self.send(builder).await?;
        Ok(event.into())
    }

    async fn update_entity(&self, entity_id: &str, draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
        debug!(entity_id, "Discord PATCH scheduled event");
        let builder = self
            .http
            .patch(self.event_url(entity_id))
            .json(&ScheduledEventRequest::from(draft));
        let event: DiscordScheduledEvent = self.send(builder).await?;
        Ok(event.into())
    }

    async fn delete_entity(&self, entity_id: &str) -> SyncResult<()> {
        debug!(entity_id, "Discord DELETE scheduled event");
        self.dispatch(self.http.delete(self.event_url(entity_id)))
            .await?;
        Ok(())
    }

    async fn lookup_entity(&self, entity_id: &str) -> SyncResult<Option<ScheduledEntity>> {
        let result: SyncResult<DiscordScheduledEvent> =
            self.send(self.http.get(self.event_url(entity_id))).await;

        match result {
            Ok(event) if event.is_finished() => Ok(None),
            Ok(event) => Ok(Some(event.into())),
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_decode() {
        SyncError::Serialization(e.to_string())
    } else {
        SyncError::Transient(format!("Discord request failed: {e}"))
    }
}

async fn error_for(response: Response) -> SyncError {
    let status = response.status();

    // Seconds, possibly fractional
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64);

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());

    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(?retry_after, "Discord rate limited the request");
            SyncError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Config(format!("Discord rejected the bot token ({status}): {body}"))
        }
        s if s.is_server_error() => SyncError::Transient(format!("Discord {status}: {body}")),
        _ => SyncError::Provider(format!("Discord {status}: {body}")),
    }
}
