//! Damage types and modifiers
//!
//! A hit is filtered through the target's innate [`DamageProfile`] and the
//! damage tags granted by its effects. Immunity zeroes the damage,
//! resistance halves it once (rounded down), vulnerability then doubles it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Types of damage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    /// Untyped weapon damage
    Physical,
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Psychic,
    Force,
    Thunder,
}

impl DamageType {
    /// Every damage type
    pub fn all() -> &'static [DamageType] {
        &[
            DamageType::Physical,
            DamageType::Slashing,
            DamageType::Piercing,
            DamageType::Bludgeoning,
            DamageType::Fire,
            DamageType::Cold,
            DamageType::Lightning,
            DamageType::Acid,
            DamageType::Poison,
            DamageType::Necrotic,
            DamageType::Radiant,
            DamageType::Psychic,
            DamageType::Force,
            DamageType::Thunder,
        ]
    }
}

impl std::fmt::Display for DamageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DamageType::Physical => "physical",
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Psychic => "psychic",
            DamageType::Force => "force",
            DamageType::Thunder => "thunder",
        };
        write!(f, "{}", s)
    }
}

/// How a participant takes one damage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageModifier {
    Immune,
    Resistant,
    Normal,
    Vulnerable,
}

impl DamageModifier {
    /// Scale an amount of damage
    pub fn apply(&self, damage: i32) -> i32 {
        match self {
            DamageModifier::Immune => 0,
            DamageModifier::Resistant => damage.div_euclid(2),
            DamageModifier::Normal => damage,
            DamageModifier::Vulnerable => damage.saturating_mul(2),
        }
    }
}

/// Result of filtering damage through resistances and immunities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageResult {
    pub damage_type: DamageType,
    /// Damage before modifiers
    pub raw_damage: i32,
    /// Damage after modifiers
    pub final_damage: i32,
    pub immune: bool,
    pub resisted: bool,
    pub vulnerable: bool,
}

impl DamageResult {
    /// Combine the modifiers that matched a damage type.
    ///
    /// Immunity wins outright. Any number of resistances halve once,
    /// then any vulnerability doubles.
    pub fn compute(
        raw_damage: i32,
        damage_type: DamageType,
        immune: bool,
        resisted: bool,
        vulnerable: bool,
    ) -> Self {
        let raw_damage = raw_damage.max(0);
        let final_damage = if immune {
            DamageModifier::Immune.apply(raw_damage)
        } else {
            let mut damage = raw_damage;
            if resisted {
                damage = DamageModifier::Resistant.apply(damage);
            }
            if vulnerable {
                damage = DamageModifier::Vulnerable.apply(damage);
            }
            damage
        };

        Self {
            damage_type,
            raw_damage,
            final_damage,
            immune,
            resisted: resisted && !immune,
            vulnerable: vulnerable && !immune,
        }
    }
}

/// Innate immunities, resistances and vulnerabilities of a participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DamageProfile {
    modifiers: HashMap<DamageType, DamageModifier>,
}

impl DamageProfile {
    /// Takes every type normally
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the modifier for a type; `Normal` clears it
    pub fn set(&mut self, dtype: DamageType, modifier: DamageModifier) {
        if modifier == DamageModifier::Normal {
            self.modifiers.remove(&dtype);
        } else {
            self.modifiers.insert(dtype, modifier);
        }
    }

    pub fn get(&self, dtype: DamageType) -> DamageModifier {
        self.modifiers
            .get(&dtype)
            .copied()
            .unwrap_or(DamageModifier::Normal)
    }
}
