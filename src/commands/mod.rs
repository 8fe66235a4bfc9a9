pub mod init;
pub mod reconcile;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use calmirror_core::{
    Collaborators, JsonFileStorage, RetryPolicy, SchedulingService, SyncConfig, SyncContext,
};
use calmirror_provider_discord::DiscordScheduling;
use calmirror_provider_google::GoogleCalendar;

/// Log in to both services and build a context with the stored mappings loaded.
pub async fn connect(config: &SyncConfig) -> Result<Arc<SyncContext>> {
    let retry = RetryPolicy::from(&config.retry);

    let remote = GoogleCalendar::new(&config.google.calendar_id, &config.google.account)
        .context("Could not set up the Google Calendar client")?;

    let scheduling = retry
        .run("discord login", || DiscordScheduling::connect(&config.discord))
        .await
        .context("Could not log in to Discord")?;
    info!(self_id = scheduling.self_id(), guild_id = %config.discord.guild_id, "Logged in to Discord");

    let storage = JsonFileStorage::new(config.storage.mapping_path());

    let ctx = SyncContext::from_config(
        config,
        Collaborators {
            remote: Arc::new(remote),
            scheduling: Arc::new(scheduling),
            storage: Arc::new(storage),
        },
    );
    ctx.restore_mappings().await;

    Ok(Arc::new(ctx))
}
