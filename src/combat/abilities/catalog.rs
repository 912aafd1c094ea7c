//! Class ability definitions
//!
//! Rows are written against effect ids by name (`AbilityConfig`) and
//! resolved against an [`EffectCatalog`] when the catalog is built.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::combat::damage::DamageType;
use crate::combat::dice::parse_dice;
use crate::combat::effects::{EffectCatalog, EffectId, CONCENTRATING};
use crate::combat::participant::{Ability, CombatFlags};
use crate::combat::ruleset::{validate_catalog_id, CatalogError};

/// When spent uses come back. Only tracked here; restoring uses is the
/// surrounding application's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recharge {
    #[default]
    Never,
    Combat,
    ShortRest,
    LongRest,
}

/// Resource pool cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCost {
    pub pool: String,
    pub amount: i32,
}

/// Resolution strategy of an ability, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    bound(deserialize = "E: Deserialize<'de>")
)]
pub enum AbilityKind<E = EffectId> {
    /// Roll dice and restore hit points
    Healing {
        dice: String,
        #[serde(default)]
        add_modifier: bool,
    },
    /// Apply a beneficial effect to the target or self
    Buff {
        effect: E,
        #[serde(default = "default_buff_duration")]
        duration: u32,
        #[serde(default)]
        concentration: bool,
        #[serde(default)]
        stacks: Option<u32>,
    },
    /// Roll damage against a target, optionally with a save for half
    Damage {
        dice: String,
        damage_type: DamageType,
        #[serde(default)]
        save: Option<Ability>,
        #[serde(default)]
        add_modifier: bool,
    },
    /// Target saves or suffers an effect
    Control {
        effect: E,
        save: Ability,
        #[serde(default = "default_control_duration")]
        duration: u32,
    },
    /// Protect self: an effect, temporary hit points, defending
    Defensive {
        #[serde(default)]
        effect: Option<E>,
        #[serde(default = "default_control_duration")]
        duration: u32,
        #[serde(default)]
        temp_hp: Option<String>,
        #[serde(default)]
        defend: bool,
    },
    /// Grant round flags for the actor's attacks
    Offensive {
        #[serde(default)]
        flags: CombatFlags,
    },
    /// Cleanse effects or restore a resource pool
    Utility {
        #[serde(default)]
        cleanse: Vec<E>,
        #[serde(default)]
        restore: Option<ResourceCost>,
    },
    /// Narrative only
    Generic,
}

fn default_buff_duration() -> u32 {
    10
}

fn default_control_duration() -> u32 {
    1
}

/// Discriminant of [`AbilityKind`], for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityType {
    Healing,
    Buff,
    Damage,
    Control,
    Defensive,
    Offensive,
    Utility,
    Generic,
}

impl std::fmt::Display for AbilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbilityType::Healing => "healing",
            AbilityType::Buff => "buff",
            AbilityType::Damage => "damage",
            AbilityType::Control => "control",
            AbilityType::Defensive => "defensive",
            AbilityType::Offensive => "offensive",
            AbilityType::Utility => "utility",
            AbilityType::Generic => "generic",
        };
        write!(f, "{}", s)
    }
}

impl<E> AbilityKind<E> {
    pub fn ability_type(&self) -> AbilityType {
        match self {
            AbilityKind::Healing { .. } => AbilityType::Healing,
            AbilityKind::Buff { .. } => AbilityType::Buff,
            AbilityKind::Damage { .. } => AbilityType::Damage,
            AbilityKind::Control { .. } => AbilityType::Control,
            AbilityKind::Defensive { .. } => AbilityType::Defensive,
            AbilityKind::Offensive { .. } => AbilityType::Offensive,
            AbilityKind::Utility { .. } => AbilityType::Utility,
            AbilityKind::Generic => AbilityType::Generic,
        }
    }

    /// Needs another participant to resolve
    pub fn requires_target(&self) -> bool {
        matches!(self, AbilityKind::Damage { .. } | AbilityKind::Control { .. })
    }

    /// Casting it makes the caster concentrate
    pub fn requires_concentration(&self) -> bool {
        matches!(self, AbilityKind::Buff { concentration: true, .. })
    }
}

/// A class ability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "E: Deserialize<'de>"))]
pub struct AbilityDefinition<E = EffectId> {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub class_id: String,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    pub kind: AbilityKind<E>,
    /// Uses per recharge; `None` is unlimited
    #[serde(default)]
    pub uses: Option<u32>,
    #[serde(default)]
    pub recharge: Recharge,
    #[serde(default)]
    pub cost: Option<ResourceCost>,
    /// Ability whose modifier feeds DCs and rolls
    #[serde(default = "default_key_ability")]
    pub key_ability: Ability,
    /// Always on; never consumes uses
    #[serde(default)]
    pub passive: bool,
    /// Requires speech to cast
    #[serde(default)]
    pub spell: bool,
}

/// An ability row as written in configuration
pub type AbilityConfig = AbilityDefinition<String>;

fn default_min_level() -> u32 {
    1
}

fn default_key_ability() -> Ability {
    Ability::Strength
}

impl<E> AbilityDefinition<E> {
    pub fn ability_type(&self) -> AbilityType {
        self.kind.ability_type()
    }
}

impl AbilityConfig {
    /// Validate the row and resolve its effect references
    pub fn resolve(self, effects: &EffectCatalog) -> Result<AbilityDefinition, CatalogError> {
        validate_catalog_id(&self.id)?;
        validate_catalog_id(&self.class_id)?;

        let invalid = |reason: String| CatalogError::InvalidDefinition {
            kind: "ability",
            id: self.id.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.min_level == 0 {
            return Err(invalid("min_level must be at least 1".to_string()));
        }
        if self.uses == Some(0) {
            return Err(invalid("uses must be at least 1 when limited".to_string()));
        }
        if let Some(cost) = &self.cost {
            if cost.amount <= 0 {
                return Err(invalid("cost must be positive".to_string()));
            }
        }

        let lookup = |effect: &str| {
            effects
                .lookup(effect)
                .ok_or_else(|| CatalogError::UnknownEffectReference {
                    ability: self.id.clone(),
                    effect: effect.to_string(),
                })
        };
        let dice = |notation: &str| parse_dice(notation).map(|_| ()).map_err(|e| invalid(e.to_string()));

        let kind = match &self.kind {
            AbilityKind::Healing { dice: notation, add_modifier } => {
                dice(notation)?;
                AbilityKind::Healing {
                    dice: notation.clone(),
                    add_modifier: *add_modifier,
                }
            }
            AbilityKind::Buff {
                effect,
                duration,
                concentration,
                stacks,
            } => {
                if *concentration {
                    lookup(CONCENTRATING)?;
                }
                AbilityKind::Buff {
                    effect: lookup(effect)?,
                    duration: *duration,
                    concentration: *concentration,
                    stacks: *stacks,
                }
            }
            AbilityKind::Damage {
                dice: notation,
                damage_type,
                save,
                add_modifier,
            } => {
                dice(notation)?;
                AbilityKind::Damage {
                    dice: notation.clone(),
                    damage_type: *damage_type,
                    save: *save,
                    add_modifier: *add_modifier,
                }
            }
            AbilityKind::Control { effect, save, duration } => AbilityKind::Control {
                effect: lookup(effect)?,
                save: *save,
                duration: *duration,
            },
            AbilityKind::Defensive {
                effect,
                duration,
                temp_hp,
                defend,
            } => {
                if let Some(notation) = temp_hp {
                    dice(notation)?;
                }
                AbilityKind::Defensive {
                    effect: effect.as_deref().map(|e| lookup(e)).transpose()?,
                    duration: *duration,
                    temp_hp: temp_hp.clone(),
                    defend: *defend,
                }
            }
            AbilityKind::Offensive { flags } => {
                if let Some(notation) = &flags.bonus_damage {
                    dice(notation)?;
                }
                AbilityKind::Offensive { flags: flags.clone() }
            }
            AbilityKind::Utility { cleanse, restore } => AbilityKind::Utility {
                cleanse: cleanse.iter().map(|e| lookup(e)).collect::<Result<_, _>>()?,
                restore: restore.clone(),
            },
            AbilityKind::Generic => AbilityKind::Generic,
        };

        Ok(AbilityDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            class_id: self.class_id,
            min_level: self.min_level,
            kind,
            uses: self.uses,
            recharge: self.recharge,
            cost: self.cost,
            key_ability: self.key_ability,
            passive: self.passive,
            spell: self.spell,
        })
    }
}

/// Validated registry of class abilities, keyed by (class, ability id)
#[derive(Debug, Clone, Default)]
pub struct AbilityCatalog {
    definitions: Vec<AbilityDefinition>,
    index: HashMap<(String, String), usize>,
}

impl AbilityCatalog {
    /// Resolve and validate configuration rows
    pub fn new(rows: Vec<AbilityConfig>, effects: &EffectCatalog) -> Result<Self, CatalogError> {
        let mut definitions = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());

        for row in rows {
            let def = row.resolve(effects)?;
            let key = (def.class_id.clone(), def.id.clone());
            if index.insert(key, definitions.len()).is_some() {
                return Err(CatalogError::Duplicate {
                    kind: "ability",
                    id: format!("{}/{}", def.class_id, def.id),
                });
            }
            definitions.push(def);
        }

        Ok(Self { definitions, index })
    }

    /// Find an ability for a class
    pub fn lookup(&self, class_id: &str, ability_id: &str) -> Option<&AbilityDefinition> {
        self.index
            .get(&(class_id.to_string(), ability_id.to_string()))
            .and_then(|&i| self.definitions.get(i))
    }

    /// All abilities of a class, in catalog order
    pub fn for_class<'a>(&'a self, class_id: &'a str) -> impl Iterator<Item = &'a AbilityDefinition> + 'a {
        self.definitions.iter().filter(move |d| d.class_id == class_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AbilityDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
