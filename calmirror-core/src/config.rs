//! Configuration for the mirror.
//!
//! Loaded from `~/.config/calmirror/config.toml` with `CALMIRROR_` environment
//! overrides on top (`CALMIRROR_DISCORD__BOT_TOKEN=...`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

use crate::error::{SyncError, SyncResult};

static DEFAULT_MAPPING_FILE: &str = "~/.local/share/calmirror/mappings.json";
const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";
const MAX_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub google: RemoteCalendarConfig,
    pub discord: SchedulingConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Which remote calendar to mirror and whose session to use.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCalendarConfig {
    pub calendar_id: String,
    pub account: String,
}

/// Which guild to mirror into and the bot credentials to do it with.
#[derive(Clone, Deserialize)]
pub struct SchedulingConfig {
    pub guild_id: String,
    pub bot_token: String,
    #[serde(default = "default_discord_api")]
    pub api_base: String,
}

impl std::fmt::Debug for SchedulingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingConfig")
            .field("guild_id", &self.guild_id)
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

fn default_discord_api() -> String {
    DEFAULT_DISCORD_API.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Time between reconciliation passes
    #[serde(default = "default_interval", deserialize_with = "duration")]
    pub interval: Duration,
    /// How long a completed write keeps suppressing its own echo
    #[serde(default = "default_guard_ttl", deserialize_with = "duration")]
    pub guard_ttl: Duration,
    /// Size of the rolling window fetched from the remote calendar
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval: default_interval(),
            guard_ttl: default_guard_ttl(),
            window_days: default_window_days(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_guard_ttl() -> Duration {
    Duration::from_secs(5)
}

fn default_window_days() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueuesConfig {
    #[serde(default = "QueueConfig::remote_default")]
    pub remote: QueueConfig,
    #[serde(default = "QueueConfig::scheduling_default")]
    pub scheduling: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        QueuesConfig {
            remote: QueueConfig::remote_default(),
            scheduling: QueueConfig::scheduling_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    #[serde(deserialize_with = "duration")]
    pub window: Duration,
    #[serde(default, deserialize_with = "optional_duration")]
    pub tick: Option<Duration>,
}

impl QueueConfig {
    /// 100 operations per 100 seconds
    pub fn remote_default() -> Self {
        QueueConfig {
            capacity: 100,
            window: Duration::from_secs(100),
            tick: None,
        }
    }

    /// 50 operations per second
    pub fn scheduling_default() -> Self {
        QueueConfig {
            capacity: 50,
            window: Duration::from_secs(1),
            tick: None,
        }
    }

    /// Tick never exceeds the window.
    pub fn tick_interval(&self) -> Duration {
        self.tick
            .unwrap_or(MAX_TICK)
            .min(self.window)
            .max(Duration::from_millis(1))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", deserialize_with = "duration")]
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            mapping_file: default_mapping_file(),
        }
    }
}

fn default_mapping_file() -> PathBuf {
    PathBuf::from(DEFAULT_MAPPING_FILE)
}

impl StorageConfig {
    /// Mapping file path with `~` expanded.
    pub fn mapping_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.mapping_file.to_string_lossy()).into_owned();
        PathBuf::from(full_path_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4097))
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl SyncConfig {
    pub fn config_path() -> SyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Could not determine config directory".into()))?
            .join("calmirror");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from `path` (or the default location) plus environment overrides,
    /// then validate.
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let config = Self::load_unchecked(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same layering as `load` without validation, for commands that only
    /// read local state.
    pub fn load_unchecked(path: Option<&Path>) -> SyncResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("CALMIRROR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Parse a TOML document without touching the filesystem or environment.
    pub fn from_toml(content: &str) -> SyncResult<Self> {
        let config: SyncConfig =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot start with.
    pub fn validate(&self) -> SyncResult<()> {
        let required = [
            ("google.calendar_id", &self.google.calendar_id),
            ("google.account", &self.google.account),
            ("discord.guild_id", &self.discord.guild_id),
            ("discord.bot_token", &self.discord.bot_token),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("'{key}' must be set")));
            }
        }

        for (key, queue) in [
            ("queues.remote", &self.queues.remote),
            ("queues.scheduling", &self.queues.scheduling),
        ] {
            if queue.capacity == 0 || queue.window.is_zero() {
                return Err(SyncError::Config(format!(
                    "'{key}' needs a non-zero capacity and window"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "'retry.max_attempts' must be at least 1".into(),
            ));
        }

        if self.sync.interval.is_zero() || self.sync.window_days <= 0 {
            return Err(SyncError::Config(
                "'sync.interval' and 'sync.window_days' must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Create a config file with the required keys and all defaults commented out.
    pub fn create_default_config(path: &Path) -> SyncResult<()> {
        let contents = format!(
            "\
# calmirror configuration

[google]
calendar_id = \"\"
account = \"\"

[discord]
guild_id = \"\"
bot_token = \"\"

# [sync]
# interval = \"5m\"
# guard_ttl = \"5s\"
# window_days = 30

# [queues.remote]
# capacity = 100
# window = \"100s\"

# [queues.scheduling]
# capacity = 50
# window = \"1s\"

# [retry]
# max_attempts = 3
# base_delay = \"1s\"

# [storage]
# mapping_file = \"{}\"

# [server]
# bind = \"127.0.0.1:4097\"
",
            DEFAULT_MAPPING_FILE
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| SyncError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[google]
calendar_id = "team@group.calendar.google.com"
account = "bot@example.com"

[discord]
guild_id = "123456789"
bot_token = "secret"
"#;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.sync.interval, Duration::from_secs(300));
        assert_eq!(config.sync.window_days, 30);
        assert_eq!(config.queues.scheduling.capacity, 50);
        assert_eq!(config.queues.scheduling.window, Duration::from_secs(1));
        assert_eq!(config.queues.remote.capacity, 100);
        assert_eq!(config.queues.remote.window, Duration::from_secs(100));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.discord.api_base, DEFAULT_DISCORD_API);
        assert_eq!(config.server.bind.port(), 4097);
    }

    #[test]
    fn test_humantime_durations() {
        let content = format!(
            "{MINIMAL}\n[sync]\ninterval = \"90s\"\n\n[queues.scheduling]\ncapacity = 5\nwindow = \"250ms\"\n"
        );
        let config = SyncConfig::from_toml(&content).unwrap();

        assert_eq!(config.sync.interval, Duration::from_secs(90));
        assert_eq!(config.queues.scheduling.window, Duration::from_millis(250));
        assert_eq!(
            config.queues.scheduling.tick_interval(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_tick_never_exceeds_window() {
        let queue = QueueConfig {
            capacity: 1,
            window: Duration::from_millis(20),
            tick: Some(Duration::from_secs(1)),
        };
        assert_eq!(queue.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_missing_credentials_fail_fast() {
        let content = MINIMAL.replace("bot_token = \"secret\"", "bot_token = \"\"");
        let err = SyncConfig::from_toml(&content).unwrap_err();

        assert!(matches!(err, SyncError::Config(ref m) if m.contains("discord.bot_token")));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let content = format!("{MINIMAL}\n[queues.remote]\ncapacity = 0\nwindow = \"1s\"\n");
        assert!(SyncConfig::from_toml(&content).is_err());
    }

    #[test]
    fn test_default_config_template_needs_filling_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calmirror").join("config.toml");

        SyncConfig::create_default_config(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        let err = SyncConfig::from_toml(&content).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let content = MINIMAL.replace("bot_token = \"secret\"", "bot_token = \"\"");
        std::fs::write(&path, content).unwrap();

        // Only this test touches CALMIRROR_ variables
        unsafe { std::env::set_var("CALMIRROR_DISCORD__BOT_TOKEN", "from-env") };
        let result = SyncConfig::load(Some(&path));
        unsafe { std::env::remove_var("CALMIRROR_DISCORD__BOT_TOKEN") };

        assert_eq!(result.unwrap().discord.bot_token, "from-env");
    }

    #[test]
    fn test_unchecked_load_accepts_half_filled_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL.replace("account = \"bot@example.com\"", "account = \"\"")).unwrap();

        assert!(SyncConfig::load(Some(&path)).is_err());
        let config = SyncConfig::load_unchecked(Some(&path)).unwrap();
        assert_eq!(config.google.account, "");
        assert_eq!(config.storage.mapping_file, PathBuf::from(DEFAULT_MAPPING_FILE));
    }

    #[test]
    fn test_bot_token_is_redacted_in_debug() {
        let config = SyncConfig::from_toml(MINIMAL).unwrap();
        assert!(!format!("{:?}", config.discord).contains("secret"));
    }
}
