use std::time::SystemTime;

use anyhow::Result;
use owo_colors::OwoColorize;

use calmirror_core::{JsonFileStorage, MappingStorage, MappingStore, SyncConfig};

/// Show what the mapping file holds, without contacting either service.
pub async fn run(config: &SyncConfig) -> Result<()> {
    let storage = JsonFileStorage::new(config.storage.mapping_path());
    println!("{} {}", "Calendar:".bold(), config.google.calendar_id);
    println!("{} {}", "Guild:".bold(), config.discord.guild_id);
    println!("{} {}", "Mappings:".bold(), storage.path().display());

    let snapshot = match storage.load().await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            println!("   {}", "Nothing mirrored yet".dimmed());
            return Ok(());
        }
        Err(e) => {
            println!("   {}", e.to_string().red());
            return Ok(());
        }
    };

    if let Some(age) = last_saved(&storage) {
        println!("   saved {} ago", humantime::format_duration(age));
    }

    let store = MappingStore::restore(snapshot);
    let counts = store.counts();
    println!("   {} mirrored events", counts.remote_to_local.green());
    for (remote_id, local_id) in store.pairs() {
        println!("   {} {} {}", remote_id.dimmed(), "<->".dimmed(), local_id);
    }
    Ok(())
}

fn last_saved(storage: &JsonFileStorage) -> Option<std::time::Duration> {
    let modified = std::fs::metadata(storage.path()).ok()?.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    Some(std::time::Duration::from_secs(age.as_secs()))
}
