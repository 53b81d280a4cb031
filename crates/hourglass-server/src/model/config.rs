//! Configuration management for the hourglass server
//!
//! Loads `conf/application.yml` (or the file named on the command line),
//! overlays `HOURGLASS__*` environment variables and command line overrides,
//! and hands typed sections to the engine and the logging setup.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use hourglass_engine::{CooldownConfig, StaticPermissions};
use tracing::warn;
use uuid::Uuid;

use crate::startup::LoggingConfig;

const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
const DEFAULT_PRUNE_INTERVAL_SECONDS: u64 = 60;

/// Command line arguments for the server
#[derive(Clone, Debug, Parser)]
#[command(name = "hourglass", about = "Cooldown gate with an admin console")]
pub struct Cli {
    /// Application configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,
    /// Cooldown data file, overrides `cooldown.data-file`
    #[arg(long = "data-file", env = "HOURGLASS_DATA_FILE")]
    pub data_file: Option<PathBuf>,
    /// Overrides `cooldown.persistent-cooldowns`
    #[arg(long = "persistent")]
    pub persistent: Option<bool>,
}

/// Application configuration loaded from the config file and environment
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
    args: Cli,
}

impl Configuration {
    /// Build from the process arguments
    pub fn new() -> anyhow::Result<Self> {
        Self::from_args(Cli::parse())
    }

    pub fn from_args(args: Cli) -> anyhow::Result<Self> {
        let config = build_config(&args)?;
        Ok(Self { config, args })
    }

    /// Re-read every source with the original command line
    pub fn reload(&self) -> anyhow::Result<Self> {
        Self::from_args(self.args.clone())
    }

    pub fn config_file(&self) -> &PathBuf {
        &self.args.config_file
    }

    // ========================================================================
    // Cooldown Configuration
    // ========================================================================

    /// The `cooldown` section; a missing section yields the defaults
    pub fn cooldown_config(&self) -> anyhow::Result<CooldownConfig> {
        match self.config.get::<CooldownConfig>("cooldown") {
            Ok(cooldown) => Ok(cooldown),
            Err(ConfigError::NotFound(_)) => Ok(CooldownConfig::default()),
            Err(e) => Err(e).context("invalid cooldown section"),
        }
    }

    pub fn prune_interval_seconds(&self) -> u64 {
        self.config
            .get_int("hourglass.prune-interval-seconds")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_PRUNE_INTERVAL_SECONDS)
    }

    /// Static permission grants from the `permissions` section.
    ///
    /// Entries whose key is not a UUID are skipped.
    pub fn permissions(&self) -> StaticPermissions {
        let permissions = StaticPermissions::new();
        let grants = self
            .config
            .get::<HashMap<String, Vec<String>>>("permissions")
            .unwrap_or_default();

        for (actor, nodes) in grants {
            match Uuid::parse_str(actor.trim()) {
                Ok(id) => {
                    for node in nodes {
                        permissions.grant(id, node.to_lowercase());
                    }
                }
                Err(_) => warn!("Skipping permissions for invalid actor id: {}", actor),
            }
        }
        permissions
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    /// Logging settings; without a `logging` section the `HOURGLASS_LOG_*` variables apply
    pub fn logging_config(&self) -> LoggingConfig {
        if self.config.get_table("logging").is_err() {
            return LoggingConfig::from_env();
        }
        LoggingConfig::from_config(
            self.config.get_string("logging.dir").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(false),
            &self
                .config
                .get_string("logging.level")
                .unwrap_or("info".to_string()),
            &self
                .config
                .get_string("logging.rotation")
                .unwrap_or("daily".to_string()),
        )
    }
}

fn build_config(args: &Cli) -> anyhow::Result<Config> {
    let mut builder = Config::builder()
        .add_source(File::from(args.config_file.clone()).required(false))
        .add_source(
            Environment::with_prefix("HOURGLASS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    if let Some(data_file) = &args.data_file {
        builder = builder
            .set_override("cooldown.data-file", data_file.to_string_lossy().to_string())
            .context("failed to set data file override")?;
    }
    if let Some(persistent) = args.persistent {
        builder = builder
            .set_override("cooldown.persistent-cooldowns", persistent)
            .context("failed to set persistence override")?;
    }

    builder.build().with_context(|| {
        format!(
            "failed to build configuration, check {}",
            args.config_file.display()
        )
    })
}
