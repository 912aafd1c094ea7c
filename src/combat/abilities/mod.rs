//! Ability execution framework
//!
//! Maps a class ability id to one of the resolution strategies in
//! [`strategies`], checks level, uses and resource costs, and consumes
//! them once the ability resolves. A rejected ability leaves both
//! participants untouched.

pub mod catalog;
pub mod strategies;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::combat::damage::DamageResult;
use crate::combat::dice::{CheckResult, DiceError, DiceSource};
use crate::combat::effects::{
    apply_status_effect, can_participant_act, check_concentration, remove_status_effect, ApplyOutcome,
    ConcentrationCheck, EffectError, RemoveOptions, StatusEffectInstance,
};
use crate::combat::participant::{CombatFlags, Participant, ParticipantId};
use crate::combat::ruleset::Ruleset;

pub use catalog::{
    AbilityCatalog, AbilityConfig, AbilityDefinition, AbilityKind, AbilityType, Recharge, ResourceCost,
};
pub use strategies::ability_save_dc;

use strategies::{Change, Recipient};

/// Ability errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbilityError {
    #[error("unknown ability '{ability}' for class '{class}'")]
    UnknownAbility { class: String, ability: String },

    #[error("{ability} requires level {required} (currently {actual})")]
    LevelTooLow {
        ability: String,
        required: u32,
        actual: u32,
    },

    #[error("no uses of {0} remaining")]
    NoUsesRemaining(String),

    #[error("not enough {pool}: need {needed}, have {available}")]
    InsufficientResource {
        pool: String,
        needed: i32,
        available: i32,
    },

    #[error("cannot cast {ability} while {reason}")]
    CannotSpeak { ability: String, reason: String },

    #[error(transparent)]
    Dice(#[from] DiceError),

    #[error(transparent)]
    Effect(#[from] EffectError),
}

/// Outcome of a resolved ability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityResult {
    pub ability_id: String,
    pub name: String,
    pub ability_type: AbilityType,
    pub actor: ParticipantId,
    pub target: Option<ParticipantId>,
    /// The ability resolved and its cost was paid
    pub success: bool,
    pub summary: String,
    #[serde(default)]
    pub healing: Option<i32>,
    #[serde(default)]
    pub damage: Option<DamageResult>,
    /// Catalog id of the effect that took hold
    #[serde(default)]
    pub effect_applied: Option<String>,
    #[serde(default)]
    pub effect_duration: Option<u32>,
    #[serde(default)]
    pub effects_removed: Vec<String>,
    /// The target made its save
    #[serde(default)]
    pub resisted: bool,
    #[serde(default)]
    pub save: Option<CheckResult>,
    #[serde(default)]
    pub flags: Option<CombatFlags>,
    #[serde(default)]
    pub temp_hp: Option<i32>,
    /// The actor dropped an earlier concentration ability
    #[serde(default)]
    pub concentration_replaced: bool,
    /// Concentration save forced on the target by damage
    #[serde(default)]
    pub concentration: Option<ConcentrationCheck>,
    /// Participants whose concentration broke; effects they sustain on
    /// anyone other than actor and target still need removing
    #[serde(default)]
    pub broken_concentration: Vec<ParticipantId>,
    /// Uses left after this one, for limited abilities
    #[serde(default)]
    pub uses_remaining: Option<u32>,
}

impl AbilityResult {
    pub(crate) fn new(def: &AbilityDefinition, actor: &Participant, target: Option<&Participant>) -> Self {
        Self {
            ability_id: def.id.clone(),
            name: def.name.clone(),
            ability_type: def.ability_type(),
            actor: actor.id.clone(),
            target: target.map(|t| t.id.clone()),
            success: true,
            summary: String::new(),
            healing: None,
            damage: None,
            effect_applied: None,
            effect_duration: None,
            effects_removed: Vec::new(),
            resisted: false,
            save: None,
            flags: None,
            temp_hp: None,
            concentration_replaced: false,
            concentration: None,
            broken_concentration: Vec::new(),
            uses_remaining: None,
        }
    }
}

/// Check that a participant may use an ability right now.
///
/// Covers lookup by class, minimum level, remaining uses, resource cost
/// and, for spells, the ability to speak.
pub fn validate_ability<'a>(
    rules: &'a Ruleset,
    actor: &Participant,
    ability_id: &str,
) -> Result<&'a AbilityDefinition, AbilityError> {
    let class = actor.class_id.as_deref().unwrap_or("none");
    let def = rules
        .abilities
        .lookup(class, ability_id)
        .ok_or_else(|| AbilityError::UnknownAbility {
            class: class.to_string(),
            ability: ability_id.to_string(),
        })?;

    if actor.level < def.min_level {
        return Err(AbilityError::LevelTooLow {
            ability: def.name.clone(),
            required: def.min_level,
            actual: actor.level,
        });
    }

    if !def.passive && actor.remaining_uses(&def.id, def.uses) == Some(0) {
        return Err(AbilityError::NoUsesRemaining(def.name.clone()));
    }

    if let Some(cost) = &def.cost {
        let available = actor.resource(&cost.pool);
        if available < cost.amount {
            return Err(AbilityError::InsufficientResource {
                pool: cost.pool.clone(),
                needed: cost.amount,
                available,
            });
        }
    }

    if def.spell {
        let capability = can_participant_act(actor, &rules.effects);
        if !capability.can_speak {
            return Err(AbilityError::CannotSpeak {
                ability: def.name.clone(),
                reason: capability.reason.unwrap_or_else(|| "silenced".to_string()).to_lowercase(),
            });
        }
    }

    Ok(def)
}

/// Use a class ability.
///
/// `target` is the other participant, if any; abilities that act on
/// "the target or self" fall back to the actor when it is `None`.
pub fn use_ability(
    rules: &Ruleset,
    dice: &mut dyn DiceSource,
    actor: &mut Participant,
    ability_id: &str,
    mut target: Option<&mut Participant>,
) -> Result<AbilityResult, AbilityError> {
    let def = match validate_ability(rules, actor, ability_id) {
        Ok(def) => def,
        Err(e) => {
            warn!(actor = %actor.id, ability = ability_id, error = %e, "ability rejected");
            return Err(e);
        }
    };

    let plan = strategies::plan(rules, dice, def, actor, target.as_deref())?;
    let mut result = plan.result;
    if !result.success {
        debug!(actor = %actor.id, ability = %def.id, summary = %result.summary, "ability had no effect");
        return Ok(result);
    }

    if result.concentration_replaced {
        drop_concentration(rules, actor, target.as_deref_mut());
    }

    for change in plan.changes {
        apply_change(rules, dice, change, actor, target.as_deref_mut(), &mut result)?;
    }

    if !def.passive {
        if let Some(remaining) = actor.remaining_uses(&def.id, def.uses) {
            let left = remaining.saturating_sub(1);
            actor.ability_uses.insert(def.id.clone(), left);
            result.uses_remaining = Some(left);
        }
    }
    if let Some(cost) = &def.cost {
        *actor.resources.entry(cost.pool.clone()).or_insert(0) -= cost.amount;
    }

    debug!(
        actor = %actor.id,
        ability = %def.id,
        kind = %def.ability_type(),
        summary = %result.summary,
        "ability resolved"
    );
    Ok(result)
}

/// Remove the actor's concentration marker and whatever it sustains on
/// the two participants at hand
fn drop_concentration(rules: &Ruleset, actor: &mut Participant, target: Option<&mut Participant>) {
    let concentrator = actor.id.clone();
    let marker = rules.effects.concentration();
    actor
        .effects
        .retain(|e| !sustained_by(e, &concentrator) && Some(e.effect) != marker);
    if let Some(target) = target {
        target.effects.retain(|e| !sustained_by(e, &concentrator));
    }
}

fn sustained_by(instance: &StatusEffectInstance, concentrator: &str) -> bool {
    instance.concentration_source.as_deref() == Some(concentrator)
}

fn recipient<'a>(
    to: Recipient,
    actor: &'a mut Participant,
    target: Option<&'a mut Participant>,
) -> &'a mut Participant {
    match (to, target) {
        (Recipient::Target, Some(target)) => target,
        _ => actor,
    }
}

fn apply_change(
    rules: &Ruleset,
    dice: &mut dyn DiceSource,
    change: Change,
    actor: &mut Participant,
    target: Option<&mut Participant>,
    result: &mut AbilityResult,
) -> Result<(), AbilityError> {
    match change {
        Change::Heal { to, amount } => {
            let healed = recipient(to, actor, target).hp.heal(amount);
            result.healing = Some(healed);
        }
        Change::Damage { amount } => {
            let Some(target) = target else {
                return Ok(());
            };
            target.hp.take_damage(amount);
            if let Some(check) = check_concentration(target, &rules.effects, dice, amount) {
                if !check.maintained {
                    let concentrator = target.id.clone();
                    target.effects.retain(|e| !sustained_by(e, &concentrator));
                    actor.effects.retain(|e| !sustained_by(e, &concentrator));
                    result.broken_concentration.push(concentrator);
                }
                result.concentration = Some(check);
            }
        }
        Change::ApplyEffect { to, effect, options } => {
            let outcome = apply_status_effect(recipient(to, actor, target), &rules.effects, effect, options)?;
            if outcome == ApplyOutcome::Immune && result.effect_applied.as_deref() == rules.effects.key_of(effect) {
                result.effect_applied = None;
                result.effect_duration = None;
                result.summary = format!("{} (immune)", result.summary);
            }
        }
        Change::RemoveEffects { from, effects } => {
            let bearer = recipient(from, actor, target);
            for effect in effects {
                remove_status_effect(bearer, effect, RemoveOptions::default());
            }
        }
        Change::TempHp { amount } => {
            actor.hp.grant_temp(amount);
        }
        Change::Defend => {
            actor.is_defending = true;
        }
        Change::Flags(flags) => {
            actor.round_flags.merge(&flags);
        }
        Change::Restore(cost) => {
            *actor.resources.entry(cost.pool).or_insert(0) += cost.amount;
        }
    }
    Ok(())
}
