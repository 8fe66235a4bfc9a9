//! Discord guild scheduled events side of calmirror.
//!
//! Talks to the REST API only. Gateway notifications reach the engine
//! through the daemon's HTTP surface.

mod client;
mod wire;

pub use client::DiscordScheduling;
pub use wire::{DiscordScheduledEvent, EntityMetadata};
