//! Combatants
//!
//! A participant is either a player character or a creature. Everything the
//! resolver needs to know about a combatant lives here; the surrounding
//! application builds participants from its own character/monster records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::damage::{DamageProfile, DamageType};
use super::effects::StatusEffectInstance;

/// Stable identifier of a participant within a session
pub type ParticipantId = String;

/// Which side of the fight a participant is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Players,
    Monsters,
}

impl Side {
    /// The other side
    pub fn opponent(self) -> Side {
        match self {
            Side::Players => Side::Monsters,
            Side::Monsters => Side::Players,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Players => write!(f, "players"),
            Side::Monsters => write!(f, "monsters"),
        }
    }
}

/// The six ability scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    #[serde(alias = "str")]
    Strength,
    #[serde(alias = "dex")]
    Dexterity,
    #[serde(alias = "con")]
    Constitution,
    #[serde(alias = "int")]
    Intelligence,
    #[serde(alias = "wis")]
    Wisdom,
    #[serde(alias = "cha")]
    Charisma,
}

impl std::fmt::Display for Ability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        };
        write!(f, "{}", s)
    }
}

/// Raw ability scores (10 = average)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl AbilityScores {
    /// Get a raw score
    pub fn score(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    /// Set a raw score
    pub fn set(&mut self, ability: Ability, score: i32) {
        match ability {
            Ability::Strength => self.strength = score,
            Ability::Dexterity => self.dexterity = score,
            Ability::Constitution => self.constitution = score,
            Ability::Intelligence => self.intelligence = score,
            Ability::Wisdom => self.wisdom = score,
            Ability::Charisma => self.charisma = score,
        }
    }

    /// Derived modifier, floor((score - 10) / 2)
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.score(ability) - 10).div_euclid(2)
    }
}

/// Current, maximum and temporary hit points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub max: i32,
    #[serde(default)]
    pub temp: i32,
}

impl HitPoints {
    /// Full health
    pub fn new(max: i32) -> Self {
        Self {
            current: max,
            max,
            temp: 0,
        }
    }

    /// Apply incoming damage, temporary hit points first.
    /// Returns (absorbed by temp hp, lost from current hp).
    pub fn take_damage(&mut self, amount: i32) -> (i32, i32) {
        let amount = amount.max(0);
        let absorbed = amount.min(self.temp);
        self.temp -= absorbed;
        let lost = amount - absorbed;
        self.current -= lost;
        (absorbed, lost)
    }

    /// Lose hit points directly, bypassing temporary hit points
    pub fn lose(&mut self, amount: i32) -> i32 {
        let amount = amount.max(0);
        self.current -= amount;
        amount
    }

    /// Heal (cannot exceed max)
    pub fn heal(&mut self, amount: i32) -> i32 {
        let actual = amount.max(0).min((self.max - self.current).max(0));
        self.current += actual;
        actual
    }

    /// Grant temporary hit points; they don't stack, the larger pool wins
    pub fn grant_temp(&mut self, amount: i32) -> i32 {
        self.temp = self.temp.max(amount.max(0));
        self.temp
    }

    /// At or below zero
    pub fn is_down(&self) -> bool {
        self.current <= 0
    }
}

/// Basic weapon attack used by the `attack` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackProfile {
    /// Bonus added to the d20 attack roll
    pub bonus: i32,
    /// Damage dice notation
    pub damage: String,
    /// Damage type dealt
    pub damage_type: DamageType,
}

impl Default for AttackProfile {
    fn default() -> Self {
        Self {
            bonus: 0,
            damage: "1d4".to_string(),
            damage_type: DamageType::Bludgeoning,
        }
    }
}

/// Loot carried by a creature, handed to the session when it falls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootDrop {
    pub item_id: Option<String>,
    pub quantity: u32,
    pub gold: u32,
    pub experience: u32,
}

/// Transient modifiers granted by an ability for the bearer's next turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatFlags {
    /// Attacks this round roll with advantage
    pub advantage_on_attacks: bool,
    /// Flat bonus to attack rolls this round
    pub attack_bonus: i32,
    /// Extra damage dice added to hits this round
    pub bonus_damage: Option<String>,
}

impl CombatFlags {
    /// No flags set
    pub fn is_empty(&self) -> bool {
        *self == CombatFlags::default()
    }

    /// Merge another bundle into this one
    pub fn merge(&mut self, other: &CombatFlags) {
        self.advantage_on_attacks |= other.advantage_on_attacks;
        self.attack_bonus += other.attack_bonus;
        if other.bonus_damage.is_some() {
            self.bonus_damage = other.bonus_damage.clone();
        }
    }
}

/// A combatant in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub side: Side,
    pub hp: HitPoints,
    pub armor_class: i32,
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default = "default_level")]
    pub level: u32,
    /// Player class or creature role; abilities are looked up by it
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub save_proficiencies: Vec<Ability>,
    /// Initiative score for this combat
    #[serde(default)]
    pub initiative: i32,
    /// Flat bonus added to initiative rolls
    #[serde(default)]
    pub initiative_bonus: i32,
    #[serde(default)]
    pub attack: AttackProfile,
    #[serde(default)]
    pub damage_profile: DamageProfile,
    /// Status effect ids this participant cannot receive
    #[serde(default)]
    pub condition_immunities: Vec<String>,
    #[serde(default)]
    pub effects: Vec<StatusEffectInstance>,
    #[serde(default)]
    pub is_defending: bool,
    #[serde(default)]
    pub has_acted: bool,
    #[serde(default)]
    pub fled: bool,
    /// Granted by an ability, spent by the end of the bearer's next turn
    #[serde(default)]
    pub round_flags: CombatFlags,
    /// Remaining uses per ability id; absent means unused
    #[serde(default)]
    pub ability_uses: HashMap<String, u32>,
    /// Named resource pools (ki, rage, spell points...)
    #[serde(default)]
    pub resources: HashMap<String, i32>,
    #[serde(default)]
    pub loot: Vec<LootDrop>,
}

fn default_level() -> u32 {
    1
}

impl Participant {
    /// Create a participant at full health with average scores
    pub fn new(id: &str, name: &str, side: Side, max_hp: i32, armor_class: i32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            side,
            hp: HitPoints::new(max_hp),
            armor_class,
            abilities: AbilityScores::default(),
            level: 1,
            class_id: None,
            save_proficiencies: Vec::new(),
            initiative: 0,
            initiative_bonus: 0,
            attack: AttackProfile::default(),
            damage_profile: DamageProfile::new(),
            condition_immunities: Vec::new(),
            effects: Vec::new(),
            is_defending: false,
            has_acted: false,
            fled: false,
            round_flags: CombatFlags::default(),
            ability_uses: HashMap::new(),
            resources: HashMap::new(),
            loot: Vec::new(),
        }
    }

    /// A player-side participant
    pub fn player(id: &str, name: &str, max_hp: i32, armor_class: i32) -> Self {
        Self::new(id, name, Side::Players, max_hp, armor_class)
    }

    /// A creature-side participant
    pub fn creature(id: &str, name: &str, max_hp: i32, armor_class: i32) -> Self {
        Self::new(id, name, Side::Monsters, max_hp, armor_class)
    }

    /// Set class and level
    pub fn with_class(mut self, class_id: &str, level: u32) -> Self {
        self.class_id = Some(class_id.to_string());
        self.level = level.max(1);
        self
    }

    /// Set the basic attack
    pub fn with_attack(mut self, bonus: i32, damage: &str, damage_type: DamageType) -> Self {
        self.attack = AttackProfile {
            bonus,
            damage: damage.to_string(),
            damage_type,
        };
        self
    }

    /// Set one ability score
    pub fn with_score(mut self, ability: Ability, score: i32) -> Self {
        self.abilities.set(ability, score);
        self
    }

    /// Set the initiative score
    pub fn with_initiative(mut self, initiative: i32) -> Self {
        self.initiative = initiative;
        self
    }

    /// Add a saving throw proficiency
    pub fn with_save_proficiency(mut self, ability: Ability) -> Self {
        if !self.save_proficiencies.contains(&ability) {
            self.save_proficiencies.push(ability);
        }
        self
    }

    /// Set a resource pool
    pub fn with_resource(mut self, pool: &str, amount: i32) -> Self {
        self.resources.insert(pool.to_string(), amount);
        self
    }

    /// Make immune to a status effect id
    pub fn with_condition_immunity(mut self, effect_id: &str) -> Self {
        self.condition_immunities.push(effect_id.to_string());
        self
    }

    /// Add carried loot
    pub fn with_loot(mut self, drop: LootDrop) -> Self {
        self.loot.push(drop);
        self
    }

    /// Hit points above zero
    pub fn is_alive(&self) -> bool {
        !self.hp.is_down()
    }

    /// Alive and still in the fight
    pub fn is_standing(&self) -> bool {
        self.is_alive() && !self.fled
    }

    /// Ability modifier
    pub fn modifier(&self, ability: Ability) -> i32 {
        self.abilities.modifier(ability)
    }

    /// Proficiency bonus by level: +2 at 1-4, +3 at 5-8, ...
    pub fn proficiency_bonus(&self) -> i32 {
        2 + (self.level.max(1) as i32 - 1) / 4
    }

    /// Saving throw bonus before status effects
    pub fn save_bonus(&self, ability: Ability) -> i32 {
        let proficiency = if self.save_proficiencies.contains(&ability) {
            self.proficiency_bonus()
        } else {
            0
        };
        self.modifier(ability) + proficiency
    }

    /// Remaining uses of an ability given its configured limit.
    /// `None` means unlimited.
    pub fn remaining_uses(&self, ability_id: &str, limit: Option<u32>) -> Option<u32> {
        limit.map(|max| self.ability_uses.get(ability_id).copied().unwrap_or(max))
    }

    /// Current amount in a resource pool
    pub fn resource(&self, pool: &str) -> i32 {
        self.resources.get(pool).copied().unwrap_or(0)
    }

    /// Whether the participant is immune to an effect id
    pub fn is_immune_to(&self, effect_id: &str) -> bool {
        self.condition_immunities.iter().any(|id| id == effect_id)
    }
}
