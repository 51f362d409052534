use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Connection details for one Lavalink node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub ssl: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Sesiones de audio
    pub default_volume: u8,
    #[serde(with = "humantime_serde_secs")]
    pub idle_timeout: Duration,
    pub control_history_depth: u8,
    pub max_queue_size: usize,

    // Favoritos
    pub max_favourites: usize,
    pub data_dir: PathBuf,

    // Nodos de audio
    pub lavalink_nodes: Vec<NodeConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let password = env_or("LAVALINK_PASSWORD", "youshallnotpass");
        let ssl: bool = env_or("LAVALINK_SSL", "false")
            .parse()
            .context("LAVALINK_SSL must be true or false")?;

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            default_volume: env_or("DEFAULT_VOLUME", "100").parse()?,
            idle_timeout: humantime::parse_duration(&env_or("IDLE_TIMEOUT", "300s"))
                .context("IDLE_TIMEOUT must look like `300s` or `5m`")?,
            control_history_depth: env_or("CONTROL_HISTORY_DEPTH", "5").parse()?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", "1000").parse()?,

            max_favourites: env_or("MAX_FAVOURITES", "10").parse()?,
            data_dir: env_or("DATA_DIR", "./data").into(),

            lavalink_nodes: parse_nodes(&env_or("LAVALINK_NODES", "MAIN=localhost:2333"), &password, ssl)?,
        };

        std::fs::create_dir_all(&config.data_dir)?;
        config.validate()?;

        Ok(config)
    }

    /// Sanity checks on values that would otherwise fail much later.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 1 and 100, got: {}", self.default_volume);
        }

        if self.idle_timeout.is_zero() {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        if self.control_history_depth == 0 || self.control_history_depth > 100 {
            anyhow::bail!(
                "Control history depth must be between 1 and 100, got: {}",
                self.control_history_depth
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_favourites == 0 {
            anyhow::bail!("Max favourites must be greater than 0");
        }

        if self.lavalink_nodes.is_empty() {
            anyhow::bail!("At least one Lavalink node must be configured");
        }

        Ok(())
    }

    /// Configuration summary for logging, without secrets.
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .lavalink_nodes
            .iter()
            .map(|n| format!("{}@{}:{}", n.id, n.host, n.port))
            .collect();

        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Sessions: {}% vol, {} idle timeout, history depth {}, {} queue\n  \
            Favourites: {} per user in {}\n  \
            Nodes: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            humantime::format_duration(self.idle_timeout),
            self.control_history_depth,
            self.max_queue_size,
            self.max_favourites,
            self.data_dir.display(),
            nodes.join(", ")
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 100,
            idle_timeout: Duration::from_secs(300),
            control_history_depth: 5,
            max_queue_size: 1000,

            max_favourites: 10,
            data_dir: "./data".into(),

            lavalink_nodes: vec![NodeConfig {
                id: "MAIN".to_string(),
                host: "localhost".to_string(),
                port: 2333,
                password: "youshallnotpass".to_string(),
                ssl: false,
            }],
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val,
        _ => default.to_string(),
    }
}

/// Parses `ID=host:port` entries separated by commas.
fn parse_nodes(raw: &str, password: &str, ssl: bool) -> Result<Vec<NodeConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, address) = entry
                .split_once('=')
                .with_context(|| format!("node `{}` must look like ID=host:port", entry))?;
            let (host, port) = address
                .rsplit_once(':')
                .with_context(|| format!("node `{}` is missing a port", entry))?;
            Ok(NodeConfig {
                id: id.trim().to_string(),
                host: host.trim().to_string(),
                port: port.trim().parse().with_context(|| format!("bad port in `{}`", entry))?,
                password: password.to_string(),
                ssl,
            })
        })
        .collect()
}

mod humantime_serde_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
