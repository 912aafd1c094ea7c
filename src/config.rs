//! Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `SKIRMISH_`-prefixed environment variables (`__` separates
//! nested keys, e.g. `SKIRMISH_COMBAT__FLEE_DC=14`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::combat::ruleset::{Ruleset, DEFAULT_FLEE_DC};

/// Combat tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatSettings {
    /// DC of the Dexterity check made to flee
    pub flee_dc: i32,
    /// Sessions idle this long are timed out
    pub idle_timeout_secs: u64,
    /// How often the idle sweep runs
    pub sweep_interval_secs: u64,
    /// Fixed RNG seed for reproducible fights
    pub seed: Option<u64>,
    /// Round cap for automated encounters
    pub max_rounds: u32,
}

impl Default for CombatSettings {
    fn default() -> Self {
        Self {
            flee_dc: DEFAULT_FLEE_DC,
            idle_timeout_secs: 900,
            sweep_interval_secs: 60,
            seed: None,
            max_rounds: 50,
        }
    }
}

/// Catalog overrides; the embedded catalogs are used when unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub effects: Option<PathBuf>,
    pub abilities: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub combat: CombatSettings,
    pub catalog: CatalogSettings,
}

impl Config {
    /// Load defaults, the given file if any, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment
            .merge(Env::prefixed("SKIRMISH_").split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Parse from a TOML string over the defaults, ignoring the environment
    pub fn from_toml(toml: &str) -> Result<Self, Box<figment::Error>> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(Box::new)
    }

    /// Build the ruleset these settings describe
    pub fn ruleset(&self) -> Result<Ruleset, crate::combat::ruleset::CatalogError> {
        let rules = Ruleset::load(self.catalog.effects.as_deref(), self.catalog.abilities.as_deref())?;
        Ok(rules.with_flee_dc(self.combat.flee_dc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.combat.flee_dc, 12);
        assert_eq!(config.combat.idle_timeout_secs, 900);
        assert_eq!(config.combat.max_rounds, 50);
        assert!(config.combat.seed.is_none());
        assert!(config.catalog.effects.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml("[combat]\nflee_dc = 15\nseed = 42\n").unwrap();
        assert_eq!(config.combat.flee_dc, 15);
        assert_eq!(config.combat.seed, Some(42));
        assert_eq!(config.combat.sweep_interval_secs, 60);
    }

    #[test]
    fn test_bad_value_is_an_error() {
        assert!(Config::from_toml("[combat]\nflee_dc = \"hard\"\n").is_err());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[combat]\nmax_rounds = 10\nidle_timeout_secs = 30").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.combat.max_rounds, 10);
        assert_eq!(config.combat.idle_timeout_secs, 30);

        let rules = config.ruleset().unwrap();
        assert_eq!(rules.flee_dc, 12);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
