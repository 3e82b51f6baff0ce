//! Configuration loader implementation
//!
//! This module loads `SniffConfig` from its layered sources.

use std::path::Path;
use log::debug;
use config::{Config, Environment, File, FileFormat};

use crate::common::{SniffError, Result};
use super::{defaults, SniffConfig};

impl SniffConfig {
    /// Load configuration
    ///
    /// Sources are layered with the following priority:
    /// 1. Default values (lowest priority)
    /// 2. JSON configuration file, when `path` is given
    /// 3. Environment variables prefixed with `PROTOCOL_SNIFFER_`
    ///
    /// Command line overrides are applied by the caller on top of the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Layer 1: Default values (handled by serde's default attribute)
        // Layer 2: Configuration file
        if let Some(path) = path {
            if !path.exists() {
                return Err(SniffError::Config(format!(
                    "Configuration file not found: {}", path.display()
                )));
            }
            let name = path.to_string_lossy();
            builder = builder.add_source(File::new(&name, FileFormat::Json).required(true));
        }

        // Layer 3: Environment variables with prefix
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("listen"),
        );

        let config: SniffConfig = builder.build()?.try_deserialize()?;
        if let Some(path) = path {
            debug!("Configuration loaded from {}", path.display());
        }

        Ok(config)
    }
}
