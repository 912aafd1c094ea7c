//! Status effect definitions
//!
//! Definitions are read-only configuration. They are validated once when
//! the catalog is built; after that every effect is addressed by an
//! [`EffectId`] handed out by the catalog.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::combat::damage::DamageType;
use crate::combat::dice::{parse_dice, MAX_DICE};
use crate::combat::participant::Ability;
use crate::combat::ruleset::{validate_catalog_id, CatalogError};

/// Id of the marker effect carried while concentrating
pub const CONCENTRATING: &str = "concentrating";

/// Largest stack cap a definition may declare
pub const MAX_STACKS: u32 = 20;

/// Index of a definition in an [`EffectCatalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(u16);

impl EffectId {
    /// Position in the catalog
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Broad grouping of effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    Buff,
    Debuff,
    Control,
    DamageOverTime,
    HealingOverTime,
    Marker,
}

/// Which kind of d20 roll a modifier applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollKind {
    /// Attacks made by the affected participant
    Attack,
    /// Saving throws made by the affected participant
    Save,
    /// Ability/skill checks made by the affected participant
    Check,
    /// Attacks made by others against the affected participant
    AttackAgainst,
}

/// A roll modifier contributed by an effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollModifier {
    pub roll: RollKind,
    /// Restrict to saves/checks of one ability
    #[serde(default)]
    pub ability: Option<Ability>,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
    /// Flat bonus (negative for a penalty), multiplied by stacks
    #[serde(default)]
    pub bonus: i32,
    #[serde(default)]
    pub auto_fail: bool,
    /// Hits become critical hits
    #[serde(default)]
    pub auto_critical: bool,
}

impl RollModifier {
    /// Whether this modifier affects the given roll
    pub fn applies_to(&self, kind: RollKind, ability: Option<Ability>) -> bool {
        self.roll == kind && (self.ability.is_none() || self.ability == ability)
    }
}

/// Damage or healing dealt at the start of each turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodicKind {
    Damage,
    Healing,
}

/// Periodic payload of an effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicEffect {
    pub kind: PeriodicKind,
    /// Dice notation rolled once per stack
    pub dice: String,
    #[serde(default)]
    pub damage_type: Option<DamageType>,
}

/// What an effect stops its bearer from doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrictions {
    pub prevents_action: bool,
    pub prevents_movement: bool,
    pub prevents_speech: bool,
    pub prevents_reactions: bool,
}

impl Restrictions {
    /// Any restriction at all
    pub fn any(&self) -> bool {
        self.prevents_action || self.prevents_movement || self.prevents_speech || self.prevents_reactions
    }
}

/// Static definition of a status effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffectDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: EffectCategory,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default = "default_max_stacks")]
    pub max_stacks: u32,
    #[serde(default)]
    pub periodic: Option<PeriodicEffect>,
    #[serde(default)]
    pub modifiers: Vec<RollModifier>,
    #[serde(default)]
    pub restrictions: Restrictions,
    /// Damage types halved while active
    #[serde(default)]
    pub resistances: Vec<DamageType>,
    /// Damage types ignored while active
    #[serde(default)]
    pub immunities: Vec<DamageType>,
    /// Damage types doubled while active
    #[serde(default)]
    pub vulnerabilities: Vec<DamageType>,
    /// A save must be made at the start of each of the bearer's turns
    #[serde(default)]
    pub save_each_turn: bool,
    /// The bearer may save at the end of each round to shake it off
    #[serde(default)]
    pub save_ends: bool,
    /// Ability used for those saves unless the instance overrides it
    #[serde(default)]
    pub save_ability: Option<Ability>,
    /// Flat armor class change per stack
    #[serde(default)]
    pub armor_class_bonus: i32,
}

fn default_max_stacks() -> u32 {
    1
}

impl StatusEffectDefinition {
    /// Minimal definition, mostly for tests and programmatic catalogs
    pub fn new(id: &str, name: &str, category: EffectCategory) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category,
            stackable: false,
            max_stacks: 1,
            periodic: None,
            modifiers: Vec::new(),
            restrictions: Restrictions::default(),
            resistances: Vec::new(),
            immunities: Vec::new(),
            vulnerabilities: Vec::new(),
            save_each_turn: false,
            save_ends: false,
            save_ability: None,
            armor_class_bonus: 0,
        }
    }

    /// Effective stack cap
    pub fn stack_cap(&self) -> u32 {
        if self.stackable {
            self.max_stacks.max(1)
        } else {
            1
        }
    }

    fn validate(&self) -> Result<(), CatalogError> {
        validate_catalog_id(&self.id)?;
        let invalid = |reason: String| CatalogError::InvalidDefinition {
            kind: "effect",
            id: self.id.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.max_stacks == 0 {
            return Err(invalid("max_stacks must be at least 1".to_string()));
        }
        if self.max_stacks > MAX_STACKS {
            return Err(invalid(format!("max_stacks must be at most {}", MAX_STACKS)));
        }
        if !self.stackable && self.max_stacks > 1 {
            return Err(invalid("max_stacks > 1 requires stackable = true".to_string()));
        }
        if let Some(periodic) = &self.periodic {
            let base = parse_dice(&periodic.dice).map_err(|e| invalid(e.to_string()))?;
            if base.count * self.stack_cap() > MAX_DICE {
                return Err(invalid(format!(
                    "{} at {} stacks rolls more than {} dice",
                    periodic.dice,
                    self.stack_cap(),
                    MAX_DICE
                )));
            }
        }
        Ok(())
    }
}

/// Validated registry of status effect definitions
#[derive(Debug, Clone, Default)]
pub struct EffectCatalog {
    definitions: Vec<StatusEffectDefinition>,
    index: HashMap<String, EffectId>,
}

impl EffectCatalog {
    /// Build a catalog, rejecting invalid or duplicate definitions
    pub fn new(definitions: Vec<StatusEffectDefinition>) -> Result<Self, CatalogError> {
        if definitions.len() > u16::MAX as usize {
            return Err(CatalogError::TooLarge {
                kind: "effect",
                count: definitions.len(),
            });
        }

        let mut index = HashMap::with_capacity(definitions.len());
        for (i, def) in definitions.iter().enumerate() {
            def.validate()?;
            if index.insert(def.id.clone(), EffectId(i as u16)).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "effect",
                    id: def.id.clone(),
                });
            }
        }

        Ok(Self { definitions, index })
    }

    /// Look up an effect id by name
    pub fn lookup(&self, id: &str) -> Option<EffectId> {
        self.index.get(id).copied()
    }

    /// Get a definition
    pub fn get(&self, id: EffectId) -> Option<&StatusEffectDefinition> {
        self.definitions.get(id.index())
    }

    /// Display name of an effect, falling back to a placeholder
    pub fn name_of(&self, id: EffectId) -> String {
        self.get(id)
            .map(|def| def.name.clone())
            .unwrap_or_else(|| format!("effect#{}", id.index()))
    }

    /// Catalog id of an effect
    pub fn key_of(&self, id: EffectId) -> Option<&str> {
        self.get(id).map(|def| def.id.as_str())
    }

    /// The concentration marker, if the catalog defines one
    pub fn concentration(&self) -> Option<EffectId> {
        self.lookup(CONCENTRATING)
    }

    /// Iterate over all definitions with their ids
    pub fn iter(&self) -> impl Iterator<Item = (EffectId, &StatusEffectDefinition)> {
        self.definitions
            .iter()
            .enumerate()
            .map(|(i, def)| (EffectId(i as u16), def))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
