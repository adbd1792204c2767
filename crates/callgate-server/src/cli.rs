//! Command-line arguments

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use callgate_core::GatewayConfig;

/// Transport engine backing each call
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Real peer connections through the `webrtc` crate
    Webrtc,
    /// In-process transport that connects immediately; for dry runs
    Loopback,
}

#[derive(Debug, Parser)]
#[command(name = "callgate", version, about = "WebRTC call-signaling gateway")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CALLGATE_PORT")]
    pub port: Option<u16>,

    /// TOML configuration file
    #[arg(long, env = "CALLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ogg/Opus recording streamed to connected calls
    #[arg(long)]
    pub media_file: Option<String>,

    #[arg(long, value_enum, default_value_t = TransportKind::Webrtc)]
    pub transport: TransportKind,

    /// trace, debug, info, warn or error
    #[arg(long, env = "CALLGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(file) = &self.media_file {
            config.media.file = file.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}
