//! Rules bundle: effect and ability catalogs plus table rules
//!
//! The built-in catalogs are compiled into the binary from `catalog/`;
//! configuration can point at replacement files.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use figment::providers::{Format, Toml};
use figment::Figment;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::abilities::{AbilityCatalog, AbilityConfig};
use super::effects::{EffectCatalog, StatusEffectDefinition};

const BUILTIN_EFFECTS: &str = include_str!("../../catalog/effects.toml");
const BUILTIN_ABILITIES: &str = include_str!("../../catalog/abilities.toml");

/// DC of the dexterity check to flee when not configured
pub const DEFAULT_FLEE_DC: i32 = 12;

static CATALOG_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());

/// Catalog loading and validation errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog id '{0}': must be lowercase letters, digits and underscores")]
    InvalidId(String),

    #[error("duplicate {kind} '{id}'")]
    Duplicate { kind: &'static str, id: String },

    #[error("invalid {kind} '{id}': {reason}")]
    InvalidDefinition {
        kind: &'static str,
        id: String,
        reason: String,
    },

    #[error("ability '{ability}' references unknown effect '{effect}'")]
    UnknownEffectReference { ability: String, effect: String },

    #[error("too many {kind} definitions ({count})")]
    TooLarge { kind: &'static str, count: usize },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] Box<figment::Error>),
}

/// Validate a catalog id (`^[a-z][a-z0-9_]*$`)
pub fn validate_catalog_id(id: &str) -> Result<(), CatalogError> {
    if CATALOG_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(CatalogError::InvalidId(id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct EffectFile {
    #[serde(default)]
    effects: Vec<StatusEffectDefinition>,
}

#[derive(Debug, Deserialize)]
struct AbilityFile {
    #[serde(default)]
    abilities: Vec<AbilityConfig>,
}

fn parse_toml<T: serde::de::DeserializeOwned>(source: &str) -> Result<T, CatalogError> {
    Figment::from(Toml::string(source))
        .extract()
        .map_err(|e| CatalogError::Parse(Box::new(e)))
}

fn read_file(path: &Path) -> Result<String, CatalogError> {
    std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Everything the resolver consults besides the session itself
#[derive(Debug, Clone)]
pub struct Ruleset {
    pub effects: EffectCatalog,
    pub abilities: AbilityCatalog,
    /// DC of the dexterity check to flee
    pub flee_dc: i32,
}

impl Ruleset {
    pub fn new(effects: EffectCatalog, abilities: AbilityCatalog) -> Self {
        Self {
            effects,
            abilities,
            flee_dc: DEFAULT_FLEE_DC,
        }
    }

    /// Set the flee DC
    pub fn with_flee_dc(mut self, dc: i32) -> Self {
        self.flee_dc = dc;
        self
    }

    /// Parse catalogs from TOML documents
    pub fn from_toml(effects: &str, abilities: &str) -> Result<Self, CatalogError> {
        let effect_file: EffectFile = parse_toml(effects)?;
        let effects = EffectCatalog::new(effect_file.effects)?;
        let ability_file: AbilityFile = parse_toml(abilities)?;
        let abilities = AbilityCatalog::new(ability_file.abilities, &effects)?;
        Ok(Self::new(effects, abilities))
    }

    /// The catalogs shipped with the crate
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml(BUILTIN_EFFECTS, BUILTIN_ABILITIES)
    }

    /// Load catalogs from files, falling back to the built-in ones
    pub fn load(effects: Option<&Path>, abilities: Option<&Path>) -> Result<Self, CatalogError> {
        let effects_src = match effects {
            Some(path) => read_file(path)?,
            None => BUILTIN_EFFECTS.to_string(),
        };
        let abilities_src = match abilities {
            Some(path) => read_file(path)?,
            None => BUILTIN_ABILITIES.to_string(),
        };

        let ruleset = Self::from_toml(&effects_src, &abilities_src)?;
        info!(
            effects = ruleset.effects.len(),
            abilities = ruleset.abilities.len(),
            "loaded catalogs"
        );
        Ok(ruleset)
    }
}
