//! Pipeline configuration
//!
//! Loaded from a YAML file or built from defaults; every
//! deployment-tunable knob lives here (retry ceiling, conflict
//! threshold, generic-name list, review policy, edit bound).

use crate::diff::ReviewPolicy;
use crate::resolve::GenericNames;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("max_extraction_attempts must be at least 1")]
    InvalidAttempts,
    #[error("conflict_threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f64),
    #[error("max_edit_attempts must be at least 1")]
    InvalidEditAttempts,
}

fn default_model() -> String {
    "default".to_string()
}

fn default_extractor_command() -> Vec<String> {
    vec![
        "llm-orc".to_string(),
        "invoke".to_string(),
        "narrative-extraction".to_string(),
    ]
}

/// Per-deployment pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model identifier passed to the extraction backend
    pub model: String,
    /// Command line for the subprocess extraction client
    pub extractor_command: Vec<String>,
    /// Extraction retry ceiling (minimum 1; 2 gives one recovery retry)
    pub max_extraction_attempts: u32,
    /// Fuzzy score at or above which an unmatched candidate conflicts
    pub conflict_threshold: f64,
    /// Placeholder names eligible for promotion
    pub generic_names: Vec<String>,
    /// Force human review even for trivial diffs
    pub mandatory_review: bool,
    /// Edit-and-revalidate loop bound
    pub max_edit_attempts: u32,
    /// Editor override; falls back to $VISUAL, $EDITOR, then vi
    pub editor: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            extractor_command: default_extractor_command(),
            max_extraction_attempts: 2,
            conflict_threshold: 0.82,
            generic_names: GenericNames::default_names(),
            mandatory_review: false,
            max_edit_attempts: 5,
            editor: None,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&body)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_extraction_attempts < 1 {
            return Err(ConfigError::InvalidAttempts);
        }
        if !(0.0..=1.0).contains(&self.conflict_threshold) {
            return Err(ConfigError::InvalidThreshold(self.conflict_threshold));
        }
        if self.max_edit_attempts < 1 {
            return Err(ConfigError::InvalidEditAttempts);
        }
        Ok(())
    }

    pub fn review_policy(&self) -> ReviewPolicy {
        ReviewPolicy {
            mandatory_review: self.mandatory_review,
        }
    }

    pub fn generic_names(&self) -> GenericNames {
        GenericNames::new(self.generic_names.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_extraction_attempts, 2);
        assert!(config.generic_names.contains(&"she".to_string()));
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabula.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "model: gemma3:1b\nconflict_threshold: 0.9").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.model, "gemma3:1b");
        assert_eq!(config.conflict_threshold, 0.9);
        assert_eq!(config.max_edit_attempts, 5);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = PipelineConfig {
            max_extraction_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAttempts)));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = PipelineConfig {
            conflict_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold(t)) if t == 1.5
        ));
    }
}
