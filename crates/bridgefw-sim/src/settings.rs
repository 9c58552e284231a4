use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bridgefw_core::FirmwareConfig;

use crate::Script;

pub const ENV_CONFIG: &str = "BRIDGEFW_CONFIG";
pub const ENV_SCRIPT: &str = "BRIDGEFW_SCRIPT";
pub const ENV_PASSES: &str = "BRIDGEFW_PASSES";

const DEFAULT_PASSES: u64 = 16;

/// Runner settings, taken from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimSettings {
    /// JSON [`FirmwareConfig`]; defaults apply when unset.
    pub config: Option<PathBuf>,
    /// JSON [`Script`]; the built-in demo runs when unset.
    pub script: Option<PathBuf>,
    pub passes: Option<u64>,
}

impl SimSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let passes = match lookup(ENV_PASSES) {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("{ENV_PASSES}={raw:?} is not a pass count"))?,
            ),
            None => None,
        };
        Ok(Self {
            config: lookup(ENV_CONFIG).map(PathBuf::from),
            script: lookup(ENV_SCRIPT).map(PathBuf::from),
            passes,
        })
    }

    pub fn passes(&self) -> u64 {
        self.passes.unwrap_or(DEFAULT_PASSES)
    }

    pub fn load_config(&self) -> Result<FirmwareConfig> {
        let config = match &self.config {
            Some(path) => parse_config(&read(path)?)
                .with_context(|| format!("invalid config {}", path.display()))?,
            None => FirmwareConfig::default(),
        };
        Ok(config)
    }

    pub fn load_script(&self) -> Result<Script> {
        match &self.script {
            Some(path) => parse_script(&read(path)?)
                .with_context(|| format!("invalid script {}", path.display())),
            None => Ok(Script::demo()),
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn parse_config(json: &str) -> Result<FirmwareConfig> {
    let config: FirmwareConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_script(json: &str) -> Result<Script> {
    Ok(serde_json::from_str(json)?)
}
