use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::{AttributionError, Result};

fn default_integration_steps() -> usize {
    20
}

fn default_tau() -> f32 {
    0.4
}

/// Settings for collecting attributions and building the dependency tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributionConfig {
    /// Number of points in the `[0, 1]` head-weight sweep.
    #[serde(default = "default_integration_steps")]
    pub integration_steps: usize,
    /// Relative threshold for candidate edges in every layer but the last.
    #[serde(default = "default_tau")]
    pub tau: f32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            integration_steps: default_integration_steps(),
            tau: default_tau(),
        }
    }
}

impl AttributionConfig {
    /// Loads a TOML or JSON file, chosen by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: AttributionConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(AttributionError::Config(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.integration_steps == 0 {
            return Err(AttributionError::Config(
                "integration_steps must be greater than zero".into(),
            ));
        }
        if !self.tau.is_finite() || self.tau < 0.0 {
            return Err(AttributionError::Config(format!(
                "tau must be a non-negative finite number, got {}",
                self.tau
            )));
        }
        Ok(())
    }
}
