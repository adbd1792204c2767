//! Gateway configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `CALLGATE__`-prefixed environment variables
//! (`CALLGATE__SESSION__SESSION_TIMEOUT_SECS=30`). Command-line overrides are
//! applied by the binary on top of the loaded value.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{GatewayError, Result};
use crate::logging::parse_log_level;
use crate::pacer::PacerConfig;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CALLGATE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub session: SessionConfig,
    pub media: MediaConfig,
    pub callback: CallbackConfig,
    pub metadata: MetadataConfig,
    pub webrtc: WebRtcConfig,
    pub server: ServerConfig,
    pub logging: LogConfig,
}

/// Session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reaper deadline measured from session creation
    pub session_timeout_secs: u64,
    /// Upper bound on ICE candidate gathering
    pub gather_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 45,
            gather_timeout_secs: 10,
        }
    }
}

/// Recorded audio playback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub file: String,
    pub tick_interval_ms: u64,
    pub sample_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            file: "output.ogg".to_string(),
            tick_interval_ms: 20,
            sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Static values stamped into every event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub object: String,
    pub messaging_product: String,
    pub business_account_id: String,
    pub display_phone_number: String,
    pub phone_number_id: String,
    pub contact_name: String,
    pub contact_wa_id: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            object: "random_business_account".to_string(),
            messaging_product: "random".to_string(),
            business_account_id: "00000000000000".to_string(),
            display_phone_number: "919999999999".to_string(),
            phone_number_id: "00000000000000".to_string(),
            contact_name: "Gupshup Load".to_string(),
            contact_wa_id: "00000000000000".to_string(),
        }
    }
}

/// WebRTC engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN/TURN URLs; empty means host candidates only
    pub ice_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// One JSON object per line instead of compact text
    pub json: bool,
    /// Name stamped on the startup line
    pub service: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            service: "callgate".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.session_timeout_secs == 0 {
            return Err(GatewayError::config("session.session_timeout_secs must be positive"));
        }
        if self.session.gather_timeout_secs == 0 {
            return Err(GatewayError::config("session.gather_timeout_secs must be positive"));
        }
        if self.media.tick_interval_ms == 0 {
            return Err(GatewayError::config("media.tick_interval_ms must be positive"));
        }
        if self.media.sample_rate == 0 {
            return Err(GatewayError::config("media.sample_rate must be positive"));
        }
        if self.callback.timeout_secs == 0 {
            return Err(GatewayError::config("callback.timeout_secs must be positive"));
        }
        if self.media.file.trim().is_empty() {
            return Err(GatewayError::config("media.file must not be empty"));
        }
        parse_log_level(&self.logging.level)?;
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session.session_timeout_secs)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.session.gather_timeout_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback.timeout_secs)
    }

    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig {
            tick_interval: Duration::from_millis(self.media.tick_interval_ms),
            sample_rate: self.media.sample_rate,
            media_name: self.media.file.clone(),
        }
    }

    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}
