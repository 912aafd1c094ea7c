//! Automated encounters
//!
//! A scenario file describes a zone and a roster. [`run_encounter`] rolls
//! initiative and lets every participant act on [`choose_auto_action`]
//! until the fight ends or the round cap is hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use figment::providers::{Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::combat::action::{choose_auto_action, Action, ActionOutcome, ActionResult};
use crate::combat::damage::{DamageModifier, DamageType};
use crate::combat::dice::{parse_dice, DiceError, DiceSource};
use crate::combat::participant::{Ability, AbilityScores, AttackProfile, LootDrop, Participant, Side};
use crate::combat::ruleset::Ruleset;
use crate::combat::state::{start_combat, CombatError, CombatSession, CombatStatus, ZoneContext};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("combatant '{id}': {source}")]
    Attack {
        id: String,
        #[source]
        source: DiceError,
    },

    #[error(transparent)]
    Combat(#[from] CombatError),
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantConfig {
    pub id: String,
    pub name: String,
    pub side: Side,
    pub hp: i32,
    pub armor_class: i32,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub scores: AbilityScores,
    #[serde(default)]
    pub attack: AttackProfile,
    #[serde(default)]
    pub initiative_bonus: i32,
    #[serde(default)]
    pub saves: Vec<Ability>,
    #[serde(default)]
    pub resources: HashMap<String, i32>,
    #[serde(default)]
    pub resistances: Vec<DamageType>,
    #[serde(default)]
    pub immunities: Vec<DamageType>,
    #[serde(default)]
    pub vulnerabilities: Vec<DamageType>,
    #[serde(default)]
    pub condition_immunities: Vec<String>,
    #[serde(default)]
    pub loot: Vec<LootDrop>,
}

fn default_level() -> u32 {
    1
}

impl CombatantConfig {
    pub fn to_participant(&self) -> Participant {
        let mut p = Participant::new(&self.id, &self.name, self.side, self.hp, self.armor_class);
        p.level = self.level.max(1);
        p.class_id = self.class.clone();
        p.abilities = self.scores;
        p.attack = self.attack.clone();
        p.initiative_bonus = self.initiative_bonus;
        p.save_proficiencies = self.saves.clone();
        p.resources = self.resources.clone();
        p.condition_immunities = self.condition_immunities.clone();
        p.loot = self.loot.clone();

        let profile = [
            (&self.resistances, DamageModifier::Resistant),
            (&self.immunities, DamageModifier::Immune),
            (&self.vulnerabilities, DamageModifier::Vulnerable),
        ];
        for (types, modifier) in profile {
            for dtype in types {
                p.damage_profile.set(*dtype, modifier);
            }
        }
        p
    }
}

/// A zone and the combatants who meet there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub zone: ZoneContext,
    #[serde(default)]
    pub combatants: Vec<CombatantConfig>,
}

impl Scenario {
    pub fn from_toml(source: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = Figment::from(Toml::string(source)).extract().map_err(Box::new)?;
        for c in &scenario.combatants {
            parse_dice(&c.attack.damage).map_err(|source| ScenarioError::Attack {
                id: c.id.clone(),
                source,
            })?;
        }
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.combatants.iter().map(CombatantConfig::to_participant).collect()
    }
}

/// How an automated encounter went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterReport {
    pub status: CombatStatus,
    /// Rounds started, including the last one
    pub rounds: u32,
    pub outcomes: Vec<ActionOutcome>,
    pub session: CombatSession,
}

/// Fight a scenario out with every participant on autopilot.
///
/// A fight still going after `max_rounds` ends as a timeout.
pub fn run_encounter(
    scenario: &Scenario,
    rules: &Ruleset,
    dice: &mut dyn DiceSource,
    max_rounds: u32,
) -> Result<EncounterReport, ScenarioError> {
    let mut session = start_combat(scenario.participants(), scenario.zone.clone(), dice)?;
    let mut outcomes = Vec::new();

    while !session.status.is_terminal() {
        if session.round > max_rounds {
            info!(session = %session.id, max_rounds, "round cap reached");
            session.timeout(Utc::now());
            break;
        }

        session.begin_turn(rules, dice)?;
        // The actor may have fallen to start-of-turn effects
        if session.status.is_terminal() || !session.turn_started {
            continue;
        }
        let Some(actor_id) = session.current_actor().map(|p| p.id.clone()) else {
            break;
        };

        let action = choose_auto_action(&session, rules, &actor_id);
        let outcome = match session.resolve_action(rules, dice, &actor_id, action) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(actor = %actor_id, error = %e, "auto action failed, passing");
                session.resolve_action(rules, dice, &actor_id, Action::Pass)?
            }
        };
        outcomes.push(outcome);
    }

    Ok(EncounterReport {
        status: session.status,
        rounds: session.round,
        outcomes,
        session,
    })
}

/// Human-readable lines for one resolved action
pub fn describe_outcome(session: &CombatSession, outcome: &ActionOutcome) -> Vec<String> {
    let name = |id: &str| {
        session
            .participant(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    };
    let actor = name(&outcome.actor);
    let target = outcome.target.as_deref().map(name).unwrap_or_default();
    let mut lines = Vec::new();

    if let Some(start) = &outcome.turn_start {
        for tick in &start.ticks {
            let change = if tick.hp_change < 0 {
                format!("loses {} hp", -tick.hp_change)
            } else {
                format!("regains {} hp", tick.hp_change)
            };
            lines.push(format!("{} {} from {}", actor, change, tick.name));
        }
        for save in &start.saves {
            let verdict = if save.ended { "shakes off" } else { "remains" };
            lines.push(format!("{} {} {}", actor, verdict, save.name));
        }
    }

    let line = match &outcome.result {
        ActionResult::Attack(attack) if attack.hit => {
            let damage = attack.damage.as_ref().map_or(0, |d| d.final_damage);
            let damage_type = attack.damage.as_ref().map(|d| d.damage_type.to_string()).unwrap_or_default();
            format!(
                "{} {}hits {} ({} vs AC {}) for {} {} damage",
                actor,
                if attack.critical { "critically " } else { "" },
                target,
                attack.attack.total(),
                attack.attack.target,
                damage,
                damage_type
            )
        }
        ActionResult::Attack(attack) => format!(
            "{} misses {} ({} vs AC {})",
            actor,
            target,
            attack.attack.total(),
            attack.attack.target
        ),
        ActionResult::Defend => format!("{} takes a defensive stance", actor),
        ActionResult::Ability(result) => format!("{}: {}", actor, result.summary),
        ActionResult::Flee(flee) if flee.escaped => format!("{} escapes", actor),
        ActionResult::Flee(_) => format!("{} tries to flee but is cut off", actor),
        ActionResult::Pass => format!("{} passes", actor),
        ActionResult::Skipped { reason } => reason.clone(),
    };
    lines.push(line);

    for id in &outcome.defeated {
        lines.push(format!("{} falls", name(id)));
    }
    lines
}
