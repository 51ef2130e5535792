// Setup settings
//
// Layered: built-in defaults -> optional `dbserver-setup.toml` -> DBSERVER_SETUP_* environment.
// CLI flags are applied on top by the caller.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::path_resolver;

pub const SETTINGS_FILE_NAME: &str = "dbserver-setup.toml";
pub const ENV_PREFIX: &str = "DBSERVER_SETUP";

#[derive(Debug, Clone, Deserialize)]
pub struct SetupSettings {
    /// Root directory holding one subdirectory per sample schema.
    pub samples_root: PathBuf,
    /// Connection string for the local server instance (never logged unmasked).
    #[serde(default)]
    pub connection_string: Option<String>,
    /// WHATWG encoding label used to decode sample scripts.
    pub script_encoding: String,
    pub connect_timeout_secs: u64,
    pub connect_retries: u32,
    /// Path of the package catalog manifest (JSON).
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    pub log_level: String,
}

impl SetupSettings {
    /// Load settings from `config_file` (or `./dbserver-setup.toml` when `None`) and the environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let samples_root = path_resolver::default_samples_root();
        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME));

        let builder = config::Config::builder()
            .set_default("samples_root", samples_root.to_string_lossy().to_string())?
            .set_default("script_encoding", "utf-8")?
            .set_default("connect_timeout_secs", 20)?
            .set_default("connect_retries", 3)?
            .set_default("log_level", "debug")?
            .add_source(config::File::from(file.clone()).required(config_file.is_some()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings: SetupSettings = builder
            .build()
            .with_context(|| format!("Failed to read settings (file={:?})", file))?
            .try_deserialize()
            .with_context(|| "Failed to parse settings")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if encoding_rs::Encoding::for_label(self.script_encoding.trim().as_bytes()).is_none() {
            anyhow::bail!("Unknown script encoding '{}'", self.script_encoding);
        }
        if self.connect_retries == 0 {
            anyhow::bail!("connect_retries must be at least 1");
        }
        Ok(())
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level
            .trim()
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Debug)
    }

    pub fn encoding(&self) -> &'static encoding_rs::Encoding {
        encoding_rs::Encoding::for_label(self.script_encoding.trim().as_bytes())
            .unwrap_or(encoding_rs::UTF_8)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}
