use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use locshare_relay::RelaySettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocshareConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Per-client fan-out buffer; a client further behind than this loses the oldest events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_validate_coordinates")]
    pub validate_coordinates: bool,
}

fn default_event_capacity() -> usize {
    256
}

fn default_validate_coordinates() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            validate_coordinates: default_validate_coordinates(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".locshare")
}

impl LocshareConfig {
    /// Load from `custom_path`, or `~/.locshare/config.toml` when absent.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    /// `PORT` and `LOCSHARE_BIND` from the environment win over the file.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let mut config = match custom_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    debug!("No config at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `locshare init` first.",
                path.display()
            )
        })?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT value '{}'", port),
            }
        }
        if let Some(bind) = lookup("LOCSHARE_BIND") {
            self.server.bind = bind.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay.event_capacity == 0 {
            bail!("relay.event_capacity must be greater than 0");
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn relay_settings(&self) -> Result<RelaySettings> {
        Ok(RelaySettings {
            bind: self.bind_addr()?,
            event_capacity: self.relay.event_capacity,
            validate_coordinates: self.relay.validate_coordinates,
        })
    }
}
