//! Configuration management for vicictl.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. Command-line arguments

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vici::SessionOptions;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session options handed to the client
    #[serde(default)]
    pub session: SessionOptions,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, figment::Error> {
        Self::figment(config_file).extract()
    }

    fn figment(config_file: Option<&PathBuf>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else {
            let default_paths = [
                PathBuf::from("/etc/vicictl/config.toml"),
                dirs::config_dir()
                    .unwrap_or_default()
                    .join("vicictl/config.toml"),
            ];

            for path in &default_paths {
                if path.exists() {
                    figment = figment.merge(Toml::file(path));
                    break;
                }
            }
        }

        // VICICTL_LOG_LEVEL, VICICTL_SESSION__EVENT_BUFFER, ...
        figment.merge(Env::prefixed("VICICTL_").split("__"))
    }

    /// Override socket path from CLI
    pub fn with_socket(mut self, socket: Option<PathBuf>) -> Self {
        self.session = self.session.with_socket(socket);
        self
    }

    /// Override log level from CLI
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self
    }
}
