// src/config.rs

use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

/// Engine configuration, loaded from a TOML file. Every field has a
/// production default so a missing file or key never blocks a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rates: Rates,
}

/// Rate constants used by the rule chain.
#[derive(Debug, Clone, Deserialize)]
pub struct Rates {
    /// Overhead & Profit fraction applied to the estimate's RCV total.
    #[serde(default = "default_op_percent")]
    pub op_percent: f64,
    /// Labor rate in dollars per hour for roof-access calculations.
    #[serde(default = "default_hourly_rate")]
    pub hourly_rate: f64,
    /// Minutes of handling per shingle bundle on a single-story building.
    #[serde(default = "default_minutes_single_story")]
    pub minutes_per_bundle_single_story: f64,
    /// Minutes of handling per bundle when carrying above one story.
    #[serde(default = "default_minutes_multi_story")]
    pub minutes_per_bundle_multi_story: f64,
}

fn default_op_percent() -> f64 {
    0.20
}

fn default_hourly_rate() -> f64 {
    75.0
}

fn default_minutes_single_story() -> f64 {
    2.75
}

fn default_minutes_multi_story() -> f64 {
    3.13
}

impl Default for Rates {
    fn default() -> Self {
        Rates {
            op_percent: default_op_percent(),
            hourly_rate: default_hourly_rate(),
            minutes_per_bundle_single_story: default_minutes_single_story(),
            minutes_per_bundle_multi_story: default_minutes_multi_story(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                info!(path = %path.as_ref().display(), reason = %e, "using default engine config");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_keys_missing() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.rates.op_percent, 0.20);
        assert_eq!(config.rates.hourly_rate, 75.0);
        assert_eq!(config.rates.minutes_per_bundle_single_story, 2.75);
        assert_eq!(config.rates.minutes_per_bundle_multi_story, 3.13);
    }

    #[test]
    fn partial_override_keeps_remaining_defaults() {
        let config: EngineConfig = toml::from_str("[rates]\nhourly_rate = 92.5\n").unwrap();
        assert_eq!(config.rates.hourly_rate, 92.5);
        assert_eq!(config.rates.op_percent, 0.20);
    }
}
