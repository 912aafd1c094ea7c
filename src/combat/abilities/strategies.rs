//! Per-type resolution strategies
//!
//! Each strategy looks at the actor, the target and the definition and
//! produces an [`AbilityResult`] together with the [`Change`]s needed to
//! realize it. Nothing is mutated while planning.

use crate::combat::dice::{roll, roll_damage, DiceSource, RollMode};
use crate::combat::effects::{
    apply_damage_resistances, has_effect, saving_throw, ApplyOptions, EffectId,
};
use crate::combat::participant::{CombatFlags, Participant};
use crate::combat::ruleset::Ruleset;

use super::catalog::{AbilityDefinition, AbilityKind, ResourceCost};
use super::{AbilityError, AbilityResult};

/// Who a change lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recipient {
    Actor,
    /// The target if one was given, otherwise the actor
    Target,
}

/// A pending mutation produced by planning
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Change {
    Heal { to: Recipient, amount: i32 },
    /// Damage already filtered through the target's resistances
    Damage { amount: i32 },
    ApplyEffect {
        to: Recipient,
        effect: EffectId,
        options: ApplyOptions,
    },
    RemoveEffects { from: Recipient, effects: Vec<EffectId> },
    TempHp { amount: i32 },
    Defend,
    Flags(CombatFlags),
    Restore(ResourceCost),
}

/// Planned outcome of an ability
#[derive(Debug)]
pub(crate) struct Plan {
    pub result: AbilityResult,
    pub changes: Vec<Change>,
}

impl Plan {
    fn new(result: AbilityResult) -> Self {
        Self {
            result,
            changes: Vec::new(),
        }
    }
}

/// Save DC for abilities the actor forces on others
pub fn ability_save_dc(actor: &Participant, def: &AbilityDefinition) -> i32 {
    8 + actor.proficiency_bonus() + actor.modifier(def.key_ability)
}

pub(crate) fn plan(
    rules: &Ruleset,
    dice: &mut dyn DiceSource,
    def: &AbilityDefinition,
    actor: &Participant,
    target: Option<&Participant>,
) -> Result<Plan, AbilityError> {
    let mut plan = Plan::new(AbilityResult::new(def, actor, target));

    if def.kind.requires_target() && target.is_none() {
        plan.result.success = false;
        plan.result.summary = format!("{} needs a target", def.name);
        return Ok(plan);
    }

    match &def.kind {
        AbilityKind::Healing { dice: notation, add_modifier } => {
            let rolled = roll(dice, notation, RollMode::Normal)?;
            let bonus = if *add_modifier {
                actor.modifier(def.key_ability)
            } else {
                0
            };
            let amount = (rolled.total + bonus).max(0);
            let recipient = target.unwrap_or(actor);
            plan.result.healing = Some(amount);
            plan.result.summary = format!("{} restores {} hit points to {}", def.name, amount, recipient.name);
            plan.changes.push(Change::Heal {
                to: Recipient::Target,
                amount,
            });
        }

        AbilityKind::Buff {
            effect,
            duration,
            concentration,
            stacks,
        } => {
            let recipient = target.unwrap_or(actor);
            let mut options = ApplyOptions::new(*duration)
                .with_source(&actor.id)
                .with_stacks(stacks.unwrap_or(1));
            if *concentration {
                if let Some(marker) = rules.effects.concentration() {
                    // Casting a new concentration ability ends the old one
                    if has_effect(actor, marker) {
                        plan.result.concentration_replaced = true;
                    }
                    plan.changes.push(Change::ApplyEffect {
                        to: Recipient::Actor,
                        effect: marker,
                        options: ApplyOptions::new(*duration).with_source(&actor.id),
                    });
                }
                options = options.linked_to(&actor.id);
            }
            plan.result.effect_applied = rules.effects.key_of(*effect).map(str::to_string);
            plan.result.effect_duration = Some(*duration);
            plan.result.summary = format!(
                "{} grants {} to {}",
                def.name,
                rules.effects.name_of(*effect),
                recipient.name
            );
            plan.changes.push(Change::ApplyEffect {
                to: Recipient::Target,
                effect: *effect,
                options,
            });
        }

        AbilityKind::Damage {
            dice: notation,
            damage_type,
            save,
            add_modifier,
        } => {
            let Some(target) = target else {
                return Ok(plan);
            };
            let rolled = roll_damage(dice, notation, false)?;
            let bonus = if *add_modifier {
                actor.modifier(def.key_ability)
            } else {
                0
            };
            let mut raw = (rolled.total + bonus).max(0);

            if let Some(ability) = save {
                let dc = ability_save_dc(actor, def);
                let check = saving_throw(target, &rules.effects, dice, *ability, dc);
                if check.success {
                    raw /= 2;
                    plan.result.resisted = true;
                }
                plan.result.save = Some(check);
            }

            let damage = apply_damage_resistances(target, &rules.effects, *damage_type, raw);
            plan.result.summary = format!(
                "{} deals {} {} damage to {}",
                def.name, damage.final_damage, damage_type, target.name
            );
            plan.changes.push(Change::Damage {
                amount: damage.final_damage,
            });
            plan.result.damage = Some(damage);
        }

        AbilityKind::Control {
            effect,
            save,
            duration,
        } => {
            let Some(target) = target else {
                return Ok(plan);
            };
            let dc = ability_save_dc(actor, def);
            let check = saving_throw(target, &rules.effects, dice, *save, dc);
            let effect_name = rules.effects.name_of(*effect);

            if check.success {
                plan.result.resisted = true;
                plan.result.summary = format!("{} resists {} ({} save)", target.name, def.name, save);
            } else {
                plan.result.effect_applied = rules.effects.key_of(*effect).map(str::to_string);
                plan.result.effect_duration = Some(*duration);
                plan.result.summary = format!("{} is {} by {}", target.name, effect_name.to_lowercase(), def.name);
                plan.changes.push(Change::ApplyEffect {
                    to: Recipient::Target,
                    effect: *effect,
                    options: ApplyOptions::new(*duration)
                        .with_source(&actor.id)
                        .with_save(dc, *save),
                });
            }
            plan.result.save = Some(check);
        }

        AbilityKind::Defensive {
            effect,
            duration,
            temp_hp,
            defend,
        } => {
            let mut parts = Vec::new();
            if let Some(effect) = effect {
                plan.result.effect_applied = rules.effects.key_of(*effect).map(str::to_string);
                plan.result.effect_duration = Some(*duration);
                parts.push(rules.effects.name_of(*effect));
                plan.changes.push(Change::ApplyEffect {
                    to: Recipient::Actor,
                    effect: *effect,
                    options: ApplyOptions::new(*duration).with_source(&actor.id),
                });
            }
            if let Some(notation) = temp_hp {
                let amount = roll(dice, notation, RollMode::Normal)?.total.max(0);
                plan.result.temp_hp = Some(amount);
                parts.push(format!("{} temporary hit points", amount));
                plan.changes.push(Change::TempHp { amount });
            }
            if *defend {
                parts.push("a defensive stance".to_string());
                plan.changes.push(Change::Defend);
            }
            plan.result.summary = if parts.is_empty() {
                format!("{} uses {}", actor.name, def.name)
            } else {
                format!("{} gains {}", actor.name, parts.join(" and "))
            };
        }

        AbilityKind::Offensive { flags } => {
            plan.result.flags = Some(flags.clone());
            plan.result.summary = format!("{} readies {}", actor.name, def.name);
            plan.changes.push(Change::Flags(flags.clone()));
        }

        AbilityKind::Utility { cleanse, restore } => {
            let recipient = target.unwrap_or(actor);
            let present: Vec<EffectId> = cleanse
                .iter()
                .copied()
                .filter(|effect| has_effect(recipient, *effect))
                .collect();
            plan.result.effects_removed = present
                .iter()
                .filter_map(|effect| rules.effects.key_of(*effect).map(str::to_string))
                .collect();

            let mut parts = Vec::new();
            if !present.is_empty() {
                let names: Vec<String> = present.iter().map(|e| rules.effects.name_of(*e)).collect();
                parts.push(format!("removes {} from {}", names.join(", "), recipient.name));
                plan.changes.push(Change::RemoveEffects {
                    from: Recipient::Target,
                    effects: present,
                });
            }
            if let Some(cost) = restore {
                parts.push(format!("restores {} {}", cost.amount, cost.pool));
                plan.changes.push(Change::Restore(cost.clone()));
            }
            plan.result.summary = if parts.is_empty() {
                format!("{} has no effect", def.name)
            } else {
                format!("{} {}", def.name, parts.join(" and "))
            };
        }

        AbilityKind::Generic => {
            plan.result.summary = format!("{} uses {}", actor.name, def.name);
        }
    }

    Ok(plan)
}
