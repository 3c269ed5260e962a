//! Options file: grid and noise options as one RON document.
//!
//! ```ron
//! (
//!     grid: (Complexity: 128, Strength: 20.0, DeviceType: gpu),
//!     noise: (Octaves: 6),
//! )
//! ```
//!
//! Absent keys keep their defaults.

use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{GridOptions, NoiseOptions};

/// Configuration loading and saving failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("can't serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("option {key}: `{value}` is not {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Everything the simulator reads from an options file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub grid: GridOptions,
    pub noise: NoiseOptions,
}

impl SimConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = ron::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::new())?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_ron()?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Octaves are clamped later rather than rejected
        if self.grid.complexity < GridOptions::MIN_COMPLEXITY {
            return Err(ConfigError::InvalidValue {
                key: "Complexity".to_string(),
                value: self.grid.complexity.to_string(),
                expected: "an integer >= 2",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DeviceType;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg = SimConfig::parse(
            "// grid only\n(grid: (Complexity: 64, Smooth: true), noise: (Scale: 0.1))",
        )
        .unwrap();
        assert_eq!(cfg.grid.complexity, 64);
        assert!(cfg.grid.smooth);
        assert_eq!(cfg.grid.strength, GridOptions::default().strength);
        assert_eq!(cfg.noise.scale, 0.1);
        assert_eq!(cfg.noise.octaves, 8);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(SimConfig::parse("()").unwrap(), SimConfig::default());
    }

    #[test]
    fn test_device_type_keyword() {
        let cfg = SimConfig::parse("(grid: (DeviceType: accelerator))").unwrap();
        assert_eq!(cfg.grid.device_type, DeviceType::Accelerator);
        assert!(SimConfig::parse("(grid: (DeviceType: fpga))").is_err());
    }

    #[test]
    fn test_malformed_value() {
        let err = SimConfig::parse("(grid: (Smooth: maybe))").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(SimConfig::parse("(grid: (Strength: \"tall\"))").is_err());
    }

    #[test]
    fn test_rejects_tiny_grid() {
        let err = SimConfig::parse("(grid: (Complexity: 1))").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_written_document_parses_back() {
        let mut cfg = SimConfig::default();
        cfg.grid.choppy_waves = false;
        cfg.noise.seed = 9;
        let text = cfg.to_ron().unwrap();
        assert!(text.contains("ChoppyWaves: false"));
        assert_eq!(SimConfig::parse(&text).unwrap(), cfg);
    }
}
