//! Configuration management for infragraph
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (infragraph.toml)
//! - Environment variables (INFRAGRAPH__*)
//!
//! ## Example config file (infragraph.toml):
//! ```toml
//! [output]
//! out_dir = "./compiled"
//! max_concurrent_writes = 4
//! format = "yaml"
//!
//! [expansion]
//! app_name = "my-app"
//!
//! [logging]
//! filter = "infragraph=info"
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::graph::DocumentFormat;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how artifacts are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Writer pool size; 0 means one per available core
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,

    /// Format for rendered construct documents
    #[serde(default)]
    pub format: DocumentFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Application name handed to edge behaviours when an edge carries no data
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("compiled")
}

fn default_max_concurrent_writes() -> usize {
    crate::output::DEFAULT_WRITE_LIMIT
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            max_concurrent_writes: default_max_concurrent_writes(),
            format: DocumentFormat::default(),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file (required) over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        for location in ["infragraph.toml", ".infragraph.toml", "config/infragraph.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "infragraph", "infragraph") {
            let xdg_config = dirs.config_dir().join("infragraph.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INFRAGRAPH__OUTPUT__OUT_DIR=...
        builder = builder.add_source(
            Environment::with_prefix("INFRAGRAPH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Save configuration as pretty TOML
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Output directory, relative paths resolved against the working directory
    pub fn out_dir(&self) -> PathBuf {
        if self.output.out_dir.is_absolute() {
            self.output.out_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.output.out_dir)
        }
    }

    pub fn write_limit(&self) -> usize {
        match self.output.max_concurrent_writes {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}
