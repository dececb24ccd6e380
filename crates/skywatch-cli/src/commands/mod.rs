pub mod config;
pub mod watch;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use skywatch_core::config::parse_duration;
use skywatch_core::{Filter, SessionSettings, SkywatchConfig};

/// Session options shared by `watch` and `config show`.
///
/// Flags override values read from `--config`.
#[derive(Args, Debug, Default)]
pub struct SessionArgs {
    /// Path to a skywatch.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Registry WebSocket URL
    #[arg(long)]
    pub url: Option<String>,
    /// Initial filter: All, RegisteredOnly or UnregisteredOnly
    #[arg(short, long)]
    pub filter: Option<String>,
    /// Heartbeat interval, e.g. "5s" or "500ms"
    #[arg(long)]
    pub heartbeat: Option<String>,
    /// Lost connections tolerated before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl SessionArgs {
    pub fn resolve(&self) -> anyhow::Result<SessionSettings> {
        let mut settings = match &self.config {
            Some(path) => SkywatchConfig::from_file(path)?.settings()?,
            None => SessionSettings::default(),
        };

        if let Some(url) = &self.url {
            settings.url = url.clone();
        }
        if let Some(filter) = &self.filter {
            settings.filter = filter.parse::<Filter>()?;
        }
        if let Some(heartbeat) = &self.heartbeat {
            settings.heartbeat_interval = parse_duration(heartbeat)
                .with_context(|| format!("invalid heartbeat interval: {heartbeat:?}"))?;
        }
        if let Some(max) = self.max_attempts {
            settings.reconnect.max_attempts = max;
        }

        settings.validate()?;
        Ok(settings)
    }
}
