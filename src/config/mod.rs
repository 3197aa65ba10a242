// ABOUTME: Configuration types and parsing for fleetsh.yml.
// ABOUTME: Lists the credentialed targets the client registry is built from.

use crate::error::{Error, Result};
use crate::ssh::Credentials;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "fleetsh.yml";
pub const CONFIG_FILENAME_ALT: &str = "fleetsh.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: Vec<Credentials>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Find and load the configuration file in `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .ok_or_else(|| Error::ConfigNotFound(dir.to_path_buf()))
            .and_then(|path| Self::load(&path))
    }
}
