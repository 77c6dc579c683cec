//! Miner configuration (`miners.json`).
//!
//! The file carries an array of named miner profiles; each profile selects
//! an overwrite policy, a validation mode, the sequence domains to mine,
//! and the generator and matcher setups.

use serde::Deserialize;

use crate::errors::SetupError;
use crate::sys::setup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    None,
    All,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Basic,
    Extended,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    #[serde(rename = "type")]
    pub matcher_type: String,
    #[serde(default = "default_true")]
    pub backoff: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub version: u32,
    #[serde(default = "default_length")]
    pub length: usize,
    #[serde(default = "default_max_constant")]
    pub max_constant: i64,
    #[serde(default = "default_max_index")]
    pub max_index: i64,
    #[serde(default = "default_true")]
    pub loops: bool,
    #[serde(default = "default_true")]
    pub calls: bool,
    #[serde(default)]
    pub indirect_access: bool,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default)]
    pub program_template: Option<String>,
    #[serde(default)]
    pub batch_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerProfile {
    pub name: String,
    #[serde(default = "default_overwrite")]
    pub overwrite: OverwriteMode,
    #[serde(default = "default_validation")]
    pub validation: ValidationMode,
    #[serde(default = "default_domains")]
    pub domains: String,
    #[serde(default = "default_true")]
    pub backoff: bool,
    pub generators: Vec<GeneratorConfig>,
    pub matchers: Vec<MatcherConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinersConfig {
    pub miners: Vec<MinerProfile>,
}

fn default_true() -> bool {
    true
}

fn default_length() -> usize {
    30
}

fn default_max_constant() -> i64 {
    4
}

fn default_max_index() -> i64 {
    4
}

fn default_mutation_rate() -> f64 {
    0.3
}

fn default_overwrite() -> OverwriteMode {
    OverwriteMode::Auto
}

fn default_validation() -> ValidationMode {
    ValidationMode::Extended
}

fn default_domains() -> String {
    "A".to_string()
}

/// Built-in configuration used when no `miners.json` exists.
pub const DEFAULT_CONFIG: &str = r#"{
  "miners": [
    {
      "name": "default",
      "overwrite": "auto",
      "validation": "extended",
      "domains": "A",
      "backoff": true,
      "generators": [
        { "version": 1, "length": 30, "loops": true, "calls": true }
      ],
      "matchers": [
        { "type": "direct", "backoff": true },
        { "type": "linear1", "backoff": true },
        { "type": "linear2", "backoff": true },
        { "type": "delta", "backoff": true },
        { "type": "polynomial", "backoff": true }
      ]
    }
  ]
}"#;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn parse(content: &str) -> Result<MinersConfig, SetupError> {
        let config: MinersConfig = serde_json::from_str(content)
            .map_err(|e| SetupError::InvalidConfig(format!("miners.json: {}", e)))?;
        if config.miners.is_empty() {
            return Err(SetupError::InvalidConfig("no miner profiles".to_string()));
        }
        for profile in &config.miners {
            for generator in &profile.generators {
                match generator.version {
                    1..=4 | 6..=8 => {}
                    v => {
                        return Err(SetupError::InvalidConfig(format!(
                            "unsupported generator version {}",
                            v
                        )))
                    }
                }
            }
        }
        Ok(config)
    }

    /// Load the configuration and select a profile by name or index; an
    /// empty selector picks the first profile.
    pub fn load(profile: &str) -> Result<MinerProfile, SetupError> {
        let path = setup::config_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_CONFIG.to_string(),
            Err(e) => return Err(e.into()),
        };
        let config = Self::parse(&content)?;
        Self::select(&config, profile)
    }

    pub fn select(config: &MinersConfig, profile: &str) -> Result<MinerProfile, SetupError> {
        if profile.is_empty() {
            return Ok(config.miners[0].clone());
        }
        if let Ok(index) = profile.parse::<usize>() {
            return config
                .miners
                .get(index % config.miners.len())
                .cloned()
                .ok_or_else(|| SetupError::InvalidConfig(format!("no profile {}", profile)));
        }
        config
            .miners
            .iter()
            .find(|m| m.name == profile)
            .cloned()
            .ok_or_else(|| SetupError::InvalidConfig(format!("unknown profile '{}'", profile)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = ConfigLoader::parse(DEFAULT_CONFIG).expect("parses");
        assert_eq!(config.miners.len(), 1);
        let profile = ConfigLoader::select(&config, "").expect("selects");
        assert_eq!(profile.name, "default");
        assert_eq!(profile.overwrite, OverwriteMode::Auto);
        assert_eq!(profile.validation, ValidationMode::Extended);
        assert_eq!(profile.matchers.len(), 5);
    }

    #[test]
    fn rejects_unknown_generator_version() {
        let bad = r#"{"miners":[{"name":"x","generators":[{"version":5}],"matchers":[]}]}"#;
        assert!(ConfigLoader::parse(bad).is_err());
    }

    #[test]
    fn selects_by_name_and_index() {
        let two = r#"{"miners":[
            {"name":"a","generators":[],"matchers":[]},
            {"name":"b","generators":[],"matchers":[]}]}"#;
        let config = ConfigLoader::parse(two).expect("parses");
        assert_eq!(ConfigLoader::select(&config, "b").expect("selects").name, "b");
        assert_eq!(ConfigLoader::select(&config, "1").expect("selects").name, "b");
        assert_eq!(ConfigLoader::select(&config, "3").expect("selects").name, "b");
        assert!(ConfigLoader::select(&config, "zzz").is_err());
    }
}
