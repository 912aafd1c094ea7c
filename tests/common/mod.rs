//! Common test utilities - rosters and rulesets for end-to-end combat tests

#![allow(dead_code)]

use skirmish::combat::damage::DamageType;
use skirmish::combat::{CombatSession, Participant, Ruleset, ZoneContext};

/// The built-in catalogs
pub fn rules() -> Ruleset {
    Ruleset::builtin().expect("built-in catalogs load")
}

/// A level 3 fighter
pub fn fighter(id: &str, initiative: i32) -> Participant {
    Participant::player(id, "Ayla", 30, 16)
        .with_class("fighter", 3)
        .with_attack(5, "1d8+3", DamageType::Slashing)
        .with_initiative(initiative)
}

/// A level 5 monk with WIS 16 (save DC 14) and two ki
pub fn monk(id: &str, initiative: i32) -> Participant {
    Participant::player(id, "Sen", 33, 15)
        .with_class("monk", 5)
        .with_score(skirmish::combat::Ability::Wisdom, 16)
        .with_resource("ki", 2)
        .with_attack(5, "1d6+3", DamageType::Bludgeoning)
        .with_initiative(initiative)
}

/// A plain goblin
pub fn goblin(id: &str, initiative: i32) -> Participant {
    Participant::creature(id, "Goblin", 7, 13)
        .with_attack(4, "1d6+2", DamageType::Slashing)
        .with_initiative(initiative)
}

/// Open a session using preset initiative scores
pub fn session(participants: Vec<Participant>) -> CombatSession {
    CombatSession::new(participants, ZoneContext::new("test_arena", "Test Arena")).expect("valid roster")
}
