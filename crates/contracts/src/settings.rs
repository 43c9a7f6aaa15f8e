//! Settings - Config Loader output
//!
//! Everything a client needs that can live in a configuration file.

use serde::{Deserialize, Serialize};

use crate::EngineConfig;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Client settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Source write key, sent as the basic-auth user
    #[serde(default)]
    pub write_key: String,

    /// Engine tunables
    pub engine: EngineConfig,
}

impl Settings {
    pub fn new(write_key: impl Into<String>, engine: EngineConfig) -> Self {
        Self {
            version: ConfigVersion::V1,
            write_key: write_key.into(),
            engine,
        }
    }
}
