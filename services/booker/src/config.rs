//! Bot configuration.
//!
//! Configuration is read once at startup from a TOML file (`BOOKER_CONFIG`,
//! default `booker.toml`) and frozen behind an `Arc`. A handful of
//! environment variables override file values so secrets can stay out of the
//! file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default config file path when `BOOKER_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "booker.toml";

/// Complete bot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub booking: BookingConfig,
    pub commands: CommandsConfig,
    pub discord: DiscordConfig,
    pub log_server: Option<LogServerConfig>,
    pub store: StoreConfig,
    pub database: Option<DatabaseConfig>,
    pub api: Option<ApiConfig>,
    pub updater: Option<UpdaterConfig>,

    /// Which pool implementation owns the servers.
    pub pool: PoolKind,

    /// One-liners appended to credential DMs.
    pub tips: Vec<String>,

    /// Static server list (used when `pool = "static"`).
    pub servers: Vec<ServerConfig>,

    /// Timeout for a single game query.
    #[serde(with = "booker_durations::serde")]
    pub query_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            booking: BookingConfig::default(),
            commands: CommandsConfig::default(),
            discord: DiscordConfig::default(),
            log_server: None,
            store: StoreConfig::default(),
            database: None,
            api: None,
            updater: None,
            pool: PoolKind::Static,
            tips: Vec::new(),
            servers: Vec::new(),
            query_timeout: Duration::from_secs(3),
        }
    }
}

/// Reservation policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    /// Initial reservation length.
    #[serde(with = "booker_durations::serde")]
    pub duration: Duration,

    /// Delta applied by `extend`.
    #[serde(with = "booker_durations::serde")]
    pub extend_duration: Duration,

    /// How close to the deadline the booker gets a DM warning.
    #[serde(with = "booker_durations::serde")]
    pub warning_duration: Duration,

    /// Maximum number of extensions per booking; zero means unlimited.
    pub max_extensions: u32,

    /// Idle minutes below `min_players` before an automatic return.
    pub max_idle_minutes: u32,

    /// Minutes before the idle return at which the booker is warned.
    pub idle_warning_minutes: u32,

    pub min_players: u32,

    /// Consecutive query failures before admins are notified.
    pub error_threshold: u32,

    /// In-game kick reason on stop.
    pub kick_message: String,

    /// Server keywords that indicate an external lobby is using the server.
    pub lobby_markers: Vec<String>,

    /// Preferred tick rate for selection.
    pub tick_rate_target: f64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(3 * 3600),
            extend_duration: Duration::from_secs(3600),
            warning_duration: Duration::from_secs(10 * 60),
            max_extensions: 0,
            max_idle_minutes: 30,
            idle_warning_minutes: 5,
            min_players: 6,
            error_threshold: 5,
            kick_message: "Server is being returned, thanks for playing!".to_string(),
            lobby_markers: vec!["tf2center".to_string(), "tf2pickup".to_string()],
            tick_rate_target: 66.666_666,
        }
    }
}

/// Command surface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prefix for chat commands (empty by default).
    pub prefix: String,

    /// Prefix for in-game commands.
    pub game_prefix: String,

    /// Cooldown between `!report` uses by the same player.
    #[serde(with = "booker_durations::serde")]
    pub report_duration: Duration,

    /// Permission bits required for admin commands.
    pub admin_permissions: i64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            game_prefix: "!".to_string(),
            report_duration: Duration::from_secs(5 * 60),
            // ADMINISTRATOR
            admin_permissions: 0x8,
        }
    }
}

/// Chat front-end routing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Channel for broadcasts (auto-returns, lobby warnings).
    pub default_channel: String,

    /// Channels commands are accepted in; empty accepts every channel.
    pub acceptable_channels: Vec<String>,

    /// Users that receive admin notifications.
    pub notification_users: Vec<String>,

    pub demos_url: String,

    pub help_text: Option<String>,
}

/// UDP endpoint for game-server log lines.
#[derive(Debug, Clone, Deserialize)]
pub struct LogServerConfig {
    pub log_address: String,
    pub log_port: u16,
}

/// Key-value store for reservation state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory://` or a Postgres URL.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

/// Historical booking database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// HTTP booking API used by the API-backed pool.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub tag: String,

    /// Attempts per API call; 1 disables retries.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_retry_attempts() -> u32 {
    1
}

/// Release source for `update <tag>`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterConfig {
    /// `owner/name` of the release repository.
    pub repository: String,
    pub asset_name: String,

    #[serde(default = "default_release_api")]
    pub api_url: String,
}

fn default_release_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    #[default]
    Static,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Local,
    Ssh,
    Mock,
}

/// One statically configured server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub session_name: String,
    pub address: String,
    pub stv_address: String,
    pub driver: DriverKind,

    /// Directory the scripts run in.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Where the game writes recordings, relative to `working_dir`.
    #[serde(default = "default_demos_dir")]
    pub demos_dir: String,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

fn default_demos_dir() -> String {
    "tf".to_string()
}

/// Shell commands the shell driver runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub setup: String,
    pub start: String,
    pub stop: String,
    pub upload: String,

    #[serde(with = "booker_durations::serde")]
    pub timeout: Duration,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            setup: "./setup.sh".to_string(),
            start: "./start.sh".to_string(),
            stop: "./stop.sh".to_string(),
            upload: "./upload.sh".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Remote-shell target.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Config {
    /// Load configuration from the file named by `BOOKER_CONFIG`, then apply
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("BOOKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(Path::new(&path))?;

        if let Ok(level) = std::env::var("BOOKER_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(url) = std::env::var("BOOKER_STORE_URL") {
            config.store.url = url;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            match config.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    config.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Parse config text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.booking.duration.is_zero() {
            bail!("booking.duration must be greater than zero");
        }

        if self.booking.extend_duration.is_zero() {
            bail!("booking.extend_duration must be greater than zero");
        }

        if self.booking.max_idle_minutes == 0 {
            bail!("booking.max_idle_minutes must be greater than zero");
        }

        if self.booking.idle_warning_minutes >= self.booking.max_idle_minutes {
            bail!("booking.idle_warning_minutes must be less than booking.max_idle_minutes");
        }

        match self.pool {
            PoolKind::Static => {
                if self.servers.is_empty() {
                    bail!("static pool requires at least one [[servers]] entry");
                }
            }
            PoolKind::Api => {
                if self.api.is_none() {
                    bail!("api pool requires an [api] section");
                }
            }
        }

        let mut sessions = HashSet::new();
        for server in &self.servers {
            if !sessions.insert(server.session_name.to_lowercase()) {
                bail!("duplicate session_name '{}'", server.session_name);
            }
            if server.driver == DriverKind::Ssh && server.ssh.is_none() {
                bail!("server '{}' uses the ssh driver but has no [servers.ssh] section", server.name);
            }
            if server.driver == DriverKind::Local && server.working_dir.is_none() {
                bail!("server '{}' uses the local driver but has no working_dir", server.name);
            }
        }

        Ok(())
    }

    /// Help text for the `help` command.
    pub fn help_text(&self) -> String {
        if let Some(text) = &self.discord.help_text {
            return text.clone();
        }

        let p = &self.commands.prefix;
        format!(
            "**Commands**\n\
             `{p}book` reserve a server\n\
             `{p}unbook` return your server\n\
             `{p}extend` extend your booking by {}\n\
             `{p}send password` resend your server details\n\
             `{p}demos` where to find recordings\n\
             `{p}version` show the running version",
            booker_durations::render(self.booking.extend_duration)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
log_level = "debug"
tips = ["Use !timeleft to see how long you have left"]

[booking]
duration = "2h"
extend_duration = "30m"
max_idle_minutes = 20
lobby_markers = ["tf2center"]

[discord]
default_channel = "100"
notification_users = ["200"]

[store]
url = "memory://"

[[servers]]
name = "Server 1"
session_name = "tf2-1"
address = "10.0.0.1:27015"
stv_address = "10.0.0.1:27020"
driver = "local"
working_dir = "/srv/tf2-1"

[[servers]]
name = "Server 2"
session_name = "tf2-2"
address = "10.0.0.2:27015"
stv_address = "10.0.0.2:27020"
driver = "ssh"

[servers.ssh]
host = "10.0.0.2"
user = "tf2"
key_file = "/etc/booker/id_ed25519"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.booking.duration, Duration::from_secs(7200));
        assert_eq!(config.booking.extend_duration, Duration::from_secs(1800));
        assert_eq!(config.booking.warning_duration, Duration::from_secs(600));
        assert_eq!(config.booking.max_idle_minutes, 20);
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[1].driver, DriverKind::Ssh);
        assert_eq!(config.servers[1].ssh.as_ref().unwrap().port, 22);
        assert_eq!(config.servers[0].demos_dir, "tf");
        assert!(config.store.is_memory());
        assert_eq!(config.commands.game_prefix, "!");
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::parse(include_str!("../booker.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_server.as_ref().map(|l| l.log_port), Some(27500));
        assert_eq!(config.query_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.booking.duration, Duration::from_secs(3 * 3600));
        assert_eq!(config.booking.min_players, 6);
        assert_eq!(config.commands.admin_permissions, 8);
        assert_eq!(config.pool, PoolKind::Static);
    }

    #[test]
    fn test_validate_rejects_empty_static_pool() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ssh_without_target() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.servers[1].ssh = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_idle_limit() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.booking.max_idle_minutes = 0;
        config.booking.idle_warning_minutes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_idle_minutes"));
    }

    #[test]
    fn test_validate_rejects_idle_warning_past_limit() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.booking.idle_warning_minutes = config.booking.max_idle_minutes;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_warning_minutes"));
    }

    #[test]
    fn test_validate_rejects_duplicate_sessions() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.servers[1].session_name = "TF2-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.servers[0].session_name, "tf2-1");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/booker.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
