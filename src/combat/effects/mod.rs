//! Status effect engine
//!
//! Effects live on a participant as an ordered list of
//! [`StatusEffectInstance`]s. This module applies, stacks, ticks and
//! expires them; [`modifiers`] answers queries about what the active
//! effects do to rolls, actions and incoming damage.

pub mod catalog;
pub mod modifiers;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::combat::damage::DamageResult;
use crate::combat::dice::{
    parse_dice, CheckResult, DiceError, DiceRoll, DiceSource, RollMode, RollResult, MAX_DICE,
};
use crate::combat::participant::{Ability, Participant, ParticipantId};

pub use catalog::{
    EffectCatalog, EffectCategory, EffectId, PeriodicEffect, PeriodicKind, Restrictions, RollKind,
    RollModifier, StatusEffectDefinition, CONCENTRATING, MAX_STACKS,
};
pub use modifiers::{
    apply_damage_resistances, can_participant_act, check_concentration, effective_armor_class,
    get_effect_modifiers, saving_throw, ActionCapability, ConcentrationCheck, EffectModifiers,
};

/// DC used when a save obligation carries no DC of its own
pub const DEFAULT_SAVE_DC: i32 = 10;

/// Status effect errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("unknown status effect '{0}'")]
    UnknownEffect(String),

    #[error(transparent)]
    Dice(#[from] DiceError),

    #[error("periodic dice '{notation}' at {stacks} stacks exceed the dice limit")]
    PeriodicTooLarge { notation: String, stacks: u32 },
}

/// An active effect on a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffectInstance {
    pub effect: EffectId,
    /// Rounds remaining; zero expires at the next decay pass
    pub duration: u32,
    pub stacks: u32,
    /// Who applied it
    #[serde(default)]
    pub source: Option<ParticipantId>,
    /// Overrides the definition's periodic dice
    #[serde(default)]
    pub periodic: Option<String>,
    #[serde(default)]
    pub save_dc: Option<i32>,
    #[serde(default)]
    pub save_ability: Option<Ability>,
    /// Participant whose concentration sustains this effect
    #[serde(default)]
    pub concentration_source: Option<ParticipantId>,
}

/// Parameters for [`apply_status_effect`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    pub duration: u32,
    pub source: Option<ParticipantId>,
    pub stacks: u32,
    pub save_dc: Option<i32>,
    pub save_ability: Option<Ability>,
    pub periodic: Option<String>,
    pub concentration_source: Option<ParticipantId>,
}

impl ApplyOptions {
    pub fn new(duration: u32) -> Self {
        Self {
            duration,
            stacks: 1,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_stacks(mut self, stacks: u32) -> Self {
        self.stacks = stacks;
        self
    }

    /// Save the bearer may make against the effect
    pub fn with_save(mut self, dc: i32, ability: Ability) -> Self {
        self.save_dc = Some(dc);
        self.save_ability = Some(ability);
        self
    }

    /// Override the periodic dice
    pub fn with_periodic(mut self, notation: &str) -> Self {
        self.periodic = Some(notation.to_string());
        self
    }

    /// Link the effect to a concentrating participant
    pub fn linked_to(mut self, concentrator: &str) -> Self {
        self.concentration_source = Some(concentrator.to_string());
        self
    }
}

/// What [`apply_status_effect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// New instance added
    Applied { stacks: u32, duration: u32 },
    /// Stacks added to an existing instance
    Stacked { stacks: u32, duration: u32 },
    /// Existing non-stackable instance refreshed
    Refreshed { duration: u32 },
    /// Participant is immune; nothing changed
    Immune,
}

impl ApplyOutcome {
    /// The effect is present afterwards
    pub fn took_hold(&self) -> bool {
        !matches!(self, ApplyOutcome::Immune)
    }
}

/// Parameters for [`remove_status_effect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub remove_all_stacks: bool,
    pub stacks_to_remove: u32,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            remove_all_stacks: true,
            stacks_to_remove: 1,
        }
    }
}

impl RemoveOptions {
    /// Remove only some stacks
    pub fn stacks(count: u32) -> Self {
        Self {
            remove_all_stacks: false,
            stacks_to_remove: count,
        }
    }
}

/// What [`remove_status_effect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoveOutcome {
    Removed,
    Reduced { remaining: u32 },
    NotFound,
}

/// One periodic tick at the start of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectTick {
    pub effect: EffectId,
    pub name: String,
    pub kind: PeriodicKind,
    pub roll: RollResult,
    /// Damage after resistances, for damaging ticks
    pub damage: Option<DamageResult>,
    /// Hit point change actually applied (negative for damage)
    pub hp_change: i32,
}

/// A saving throw the bearer of an effect is entitled or required to make
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveObligation {
    pub effect: EffectId,
    pub name: String,
    pub dc: i32,
    pub ability: Ability,
}

/// Result of [`process_start_of_turn_effects`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStartReport {
    pub ticks: Vec<EffectTick>,
    /// Save-each-turn effects; resolving them is up to the caller
    pub saves_required: Vec<SaveObligation>,
}

impl TurnStartReport {
    /// Net hit point change from all ticks
    pub fn net_hp_change(&self) -> i32 {
        self.ticks.iter().map(|t| t.hp_change).sum()
    }
}

/// An effect that ran out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredEffect {
    pub effect: EffectId,
    pub name: String,
}

/// Result of [`process_end_of_turn_effects`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEndReport {
    pub expired: Vec<ExpiredEffect>,
    /// Save-to-end effects still active after decay
    pub save_notices: Vec<SaveObligation>,
}

/// Outcome of [`attempt_save`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAttempt {
    pub effect: EffectId,
    pub name: String,
    pub ability: Ability,
    pub check: CheckResult,
    /// The effect was removed
    pub ended: bool,
}

/// Find an active instance
pub fn find_effect(participant: &Participant, effect: EffectId) -> Option<&StatusEffectInstance> {
    participant.effects.iter().find(|e| e.effect == effect)
}

/// Whether an effect is active
pub fn has_effect(participant: &Participant, effect: EffectId) -> bool {
    find_effect(participant, effect).is_some()
}

/// Apply a status effect, stacking or refreshing an existing instance
pub fn apply_status_effect(
    participant: &mut Participant,
    catalog: &EffectCatalog,
    effect: EffectId,
    options: ApplyOptions,
) -> Result<ApplyOutcome, EffectError> {
    let def = catalog
        .get(effect)
        .ok_or_else(|| EffectError::UnknownEffect(format!("#{}", effect.index())))?;

    if participant.is_immune_to(&def.id) {
        debug!(participant = %participant.id, effect = %def.id, "immune to effect");
        return Ok(ApplyOutcome::Immune);
    }

    let cap = def.stack_cap();
    if let Some(periodic) = &options.periodic {
        scaled_periodic(periodic, cap)?;
    }

    if let Some(existing) = participant.effects.iter_mut().find(|e| e.effect == effect) {
        // The latest application owns the instance
        existing.duration = existing.duration.max(options.duration);
        existing.source = options.source;
        existing.periodic = options.periodic;
        existing.save_dc = options.save_dc;
        existing.save_ability = options.save_ability;
        existing.concentration_source = options.concentration_source;
        if def.stackable {
            existing.stacks = existing.stacks.saturating_add(options.stacks.max(1)).min(cap);
            debug!(
                participant = %participant.id,
                effect = %def.id,
                stacks = existing.stacks,
                duration = existing.duration,
                "effect stacked"
            );
            return Ok(ApplyOutcome::Stacked {
                stacks: existing.stacks,
                duration: existing.duration,
            });
        }

        debug!(participant = %participant.id, effect = %def.id, duration = existing.duration, "effect refreshed");
        return Ok(ApplyOutcome::Refreshed {
            duration: existing.duration,
        });
    }

    let stacks = options.stacks.max(1).min(cap);
    participant.effects.push(StatusEffectInstance {
        effect,
        duration: options.duration,
        stacks,
        source: options.source,
        periodic: options.periodic,
        save_dc: options.save_dc,
        save_ability: options.save_ability,
        concentration_source: options.concentration_source,
    });
    debug!(
        participant = %participant.id,
        effect = %def.id,
        stacks,
        duration = options.duration,
        "effect applied"
    );

    Ok(ApplyOutcome::Applied {
        stacks,
        duration: options.duration,
    })
}

/// Remove an effect or some of its stacks
pub fn remove_status_effect(
    participant: &mut Participant,
    effect: EffectId,
    options: RemoveOptions,
) -> RemoveOutcome {
    let Some(pos) = participant.effects.iter().position(|e| e.effect == effect) else {
        return RemoveOutcome::NotFound;
    };

    let instance = &mut participant.effects[pos];
    if !options.remove_all_stacks && options.stacks_to_remove < instance.stacks {
        instance.stacks -= options.stacks_to_remove;
        return RemoveOutcome::Reduced {
            remaining: instance.stacks,
        };
    }

    participant.effects.remove(pos);
    RemoveOutcome::Removed
}

/// Periodic dice for a number of stacks: counts and modifier scale together
fn scaled_periodic(notation: &str, stacks: u32) -> Result<DiceRoll, EffectError> {
    let base = parse_dice(notation)?;
    let stacks = stacks.max(1);
    let too_large = || EffectError::PeriodicTooLarge {
        notation: notation.to_string(),
        stacks,
    };

    let count = base.count.checked_mul(stacks).filter(|&n| n <= MAX_DICE).ok_or_else(too_large)?;
    let modifier = i32::try_from(stacks)
        .ok()
        .and_then(|s| base.modifier.checked_mul(s))
        .ok_or_else(too_large)?;
    Ok(DiceRoll::new(count, base.sides, modifier))
}

fn save_obligation(
    catalog: &EffectCatalog,
    instance: &StatusEffectInstance,
    def: &StatusEffectDefinition,
) -> SaveObligation {
    SaveObligation {
        effect: instance.effect,
        name: catalog.name_of(instance.effect),
        dc: instance.save_dc.unwrap_or(DEFAULT_SAVE_DC),
        ability: instance
            .save_ability
            .or(def.save_ability)
            .unwrap_or(Ability::Constitution),
    }
}

/// Roll periodic damage and healing for the start of a participant's turn.
///
/// Ticks roll once per stack and change current hit points directly;
/// temporary hit points are not consulted. Save-each-turn effects are
/// reported, not resolved.
pub fn process_start_of_turn_effects(
    participant: &mut Participant,
    catalog: &EffectCatalog,
    dice: &mut dyn DiceSource,
) -> Result<TurnStartReport, EffectError> {
    let mut report = TurnStartReport::default();
    if !participant.is_alive() {
        return Ok(report);
    }

    // Snapshot first: resistance lookups need the whole list while hp changes
    let instances = participant.effects.clone();
    for instance in &instances {
        let Some(def) = catalog.get(instance.effect) else {
            continue;
        };

        if def.save_each_turn {
            report.saves_required.push(save_obligation(catalog, instance, def));
        }

        let Some(periodic) = &def.periodic else {
            continue;
        };
        let notation = instance.periodic.as_deref().unwrap_or(&periodic.dice);
        let roll = scaled_periodic(notation, instance.stacks)?.roll(dice, RollMode::Normal);

        let (damage, hp_change) = match periodic.kind {
            PeriodicKind::Damage => match periodic.damage_type {
                Some(dtype) => {
                    let result = apply_damage_resistances(participant, catalog, dtype, roll.total);
                    let lost = participant.hp.lose(result.final_damage);
                    (Some(result), -lost)
                }
                // Untyped damage ignores resistances
                None => (None, -participant.hp.lose(roll.total)),
            },
            PeriodicKind::Healing => (None, participant.hp.heal(roll.total)),
        };

        debug!(
            participant = %participant.id,
            effect = %def.id,
            roll = roll.total,
            hp_change,
            "periodic effect tick"
        );
        report.ticks.push(EffectTick {
            effect: instance.effect,
            name: def.name.clone(),
            kind: periodic.kind,
            roll,
            damage,
            hp_change,
        });
    }

    Ok(report)
}

/// Decay every effect by one round and drop those that run out
pub fn process_end_of_turn_effects(participant: &mut Participant, catalog: &EffectCatalog) -> TurnEndReport {
    let mut report = TurnEndReport::default();

    participant.effects.retain_mut(|instance| {
        instance.duration = instance.duration.saturating_sub(1);
        if instance.duration == 0 {
            report.expired.push(ExpiredEffect {
                effect: instance.effect,
                name: catalog.name_of(instance.effect),
            });
            false
        } else {
            true
        }
    });

    for instance in &participant.effects {
        if let Some(def) = catalog.get(instance.effect) {
            if def.save_ends {
                report.save_notices.push(save_obligation(catalog, instance, def));
            }
        }
    }

    if !report.expired.is_empty() {
        debug!(participant = %participant.id, expired = report.expired.len(), "effects expired");
    }
    report
}

/// Roll a save against an active effect; success removes it.
///
/// Returns `None` when the effect is not active.
pub fn attempt_save(
    participant: &mut Participant,
    catalog: &EffectCatalog,
    dice: &mut dyn DiceSource,
    effect: EffectId,
) -> Option<SaveAttempt> {
    let instance = find_effect(participant, effect)?;
    let def = catalog.get(effect)?;
    let obligation = save_obligation(catalog, instance, def);

    let check = saving_throw(participant, catalog, dice, obligation.ability, obligation.dc);
    let ended = check.success;
    if ended {
        remove_status_effect(participant, effect, RemoveOptions::default());
    }
    debug!(
        participant = %participant.id,
        effect = %def.id,
        total = check.total(),
        dc = obligation.dc,
        ended,
        "save against effect"
    );

    Some(SaveAttempt {
        effect,
        name: obligation.name,
        ability: obligation.ability,
        check,
        ended,
    })
}

/// Remove everything sustained by a participant's concentration, along
/// with that participant's concentration marker.
///
/// Returns `(bearer, effect)` for each removed instance.
pub fn break_concentration(
    participants: &mut [Participant],
    catalog: &EffectCatalog,
    concentrator: &str,
) -> Vec<(ParticipantId, EffectId)> {
    let marker = catalog.concentration();
    let mut removed = Vec::new();

    for participant in participants.iter_mut() {
        let is_concentrator = participant.id == concentrator;
        let bearer = participant.id.clone();
        participant.effects.retain(|instance| {
            let linked = instance.concentration_source.as_deref() == Some(concentrator);
            let own_marker = is_concentrator && Some(instance.effect) == marker;
            if linked || own_marker {
                removed.push((bearer.clone(), instance.effect));
                false
            } else {
                true
            }
        });
    }

    if !removed.is_empty() {
        debug!(concentrator, removed = removed.len(), "concentration broken");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::damage::DamageType;
    use crate::combat::dice::ScriptedDice;

    fn catalog() -> EffectCatalog {
        let mut poisoned = StatusEffectDefinition::new("poisoned", "Poisoned", EffectCategory::DamageOverTime);
        poisoned.periodic = Some(PeriodicEffect {
            kind: PeriodicKind::Damage,
            dice: "1d4".to_string(),
            damage_type: Some(DamageType::Poison),
        });

        let mut bleeding = StatusEffectDefinition::new("bleeding", "Bleeding", EffectCategory::DamageOverTime);
        bleeding.stackable = true;
        bleeding.max_stacks = 3;
        bleeding.periodic = Some(PeriodicEffect {
            kind: PeriodicKind::Damage,
            dice: "1d4".to_string(),
            damage_type: Some(DamageType::Slashing),
        });

        let mut regenerating = StatusEffectDefinition::new("regenerating", "Regenerating", EffectCategory::HealingOverTime);
        regenerating.periodic = Some(PeriodicEffect {
            kind: PeriodicKind::Healing,
            dice: "1d6".to_string(),
            damage_type: None,
        });

        let mut frightened = StatusEffectDefinition::new("frightened", "Frightened", EffectCategory::Control);
        frightened.save_ends = true;
        frightened.save_ability = Some(Ability::Wisdom);

        let mut held = StatusEffectDefinition::new("held", "Held", EffectCategory::Control);
        held.save_each_turn = true;

        let blessed = StatusEffectDefinition::new("blessed", "Blessed", EffectCategory::Buff);
        let concentrating = StatusEffectDefinition::new(CONCENTRATING, "Concentrating", EffectCategory::Marker);

        EffectCatalog::new(vec![
            poisoned,
            bleeding,
            regenerating,
            frightened,
            held,
            blessed,
            concentrating,
        ])
        .unwrap()
    }

    fn id(catalog: &EffectCatalog, name: &str) -> EffectId {
        catalog.lookup(name).unwrap()
    }

    #[test]
    fn test_non_stackable_refreshes_to_longer_duration() {
        let catalog = catalog();
        let poisoned = id(&catalog, "poisoned");
        let mut p = Participant::player("p1", "Ayla", 20, 14);

        let first = apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(3)).unwrap();
        assert_eq!(first, ApplyOutcome::Applied { stacks: 1, duration: 3 });

        let second = apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(2)).unwrap();
        assert_eq!(second, ApplyOutcome::Refreshed { duration: 3 });

        apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(5)).unwrap();
        assert_eq!(p.effects.len(), 1);
        assert_eq!(p.effects[0].duration, 5);
        assert_eq!(p.effects[0].stacks, 1);
    }

    #[test]
    fn test_stacks_capped() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);

        for _ in 0..5 {
            apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(2)).unwrap();
        }
        assert_eq!(p.effects.len(), 1);
        assert_eq!(p.effects[0].stacks, 3);

        let big = apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(1).with_stacks(10)).unwrap();
        assert_eq!(big, ApplyOutcome::Stacked { stacks: 3, duration: 2 });
    }

    #[test]
    fn test_immune_participant_unchanged() {
        let catalog = catalog();
        let poisoned = id(&catalog, "poisoned");
        let mut p = Participant::creature("z1", "Zombie", 22, 8).with_condition_immunity("poisoned");

        let outcome = apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(3)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Immune);
        assert!(!outcome.took_hold());
        assert!(p.effects.is_empty());
    }

    #[test]
    fn test_bad_periodic_override_rejected() {
        let catalog = catalog();
        let poisoned = id(&catalog, "poisoned");
        let mut p = Participant::player("p1", "Ayla", 20, 14);

        let err = apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(3).with_periodic("d"));
        assert!(matches!(err, Err(EffectError::Dice(_))));
        assert!(p.effects.is_empty());
    }

    #[test]
    fn test_remove_stacks() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_stacks(3)).unwrap();

        assert_eq!(
            remove_status_effect(&mut p, bleeding, RemoveOptions::stacks(1)),
            RemoveOutcome::Reduced { remaining: 2 }
        );
        assert_eq!(
            remove_status_effect(&mut p, bleeding, RemoveOptions::stacks(5)),
            RemoveOutcome::Removed
        );
        assert_eq!(
            remove_status_effect(&mut p, bleeding, RemoveOptions::default()),
            RemoveOutcome::NotFound
        );
    }

    #[test]
    fn test_dot_two_turns() {
        let catalog = catalog();
        let poisoned = id(&catalog, "poisoned");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        let mut dice = ScriptedDice::new([3, 4]);
        apply_status_effect(&mut p, &catalog, poisoned, ApplyOptions::new(2)).unwrap();

        let first = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(first.net_hp_change(), -3);
        assert!(process_end_of_turn_effects(&mut p, &catalog).expired.is_empty());

        let second = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(second.net_hp_change(), -4);
        let end = process_end_of_turn_effects(&mut p, &catalog);
        assert_eq!(end.expired.len(), 1);
        assert_eq!(end.expired[0].name, "Poisoned");

        assert!(p.effects.is_empty());
        assert_eq!(p.hp.current, 13);
    }

    #[test]
    fn test_periodic_rolls_per_stack_and_ignores_temp_hp() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        p.hp.grant_temp(10);
        apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_stacks(2)).unwrap();

        let mut dice = ScriptedDice::new([2, 3]);
        let report = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(report.ticks[0].roll.rolls, vec![2, 3]);
        assert_eq!(p.hp.current, 15);
        assert_eq!(p.hp.temp, 10);
    }

    #[test]
    fn test_healing_over_time_capped() {
        let catalog = catalog();
        let regen = id(&catalog, "regenerating");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        p.hp.lose(2);
        apply_status_effect(&mut p, &catalog, regen, ApplyOptions::new(3)).unwrap();

        let mut dice = ScriptedDice::new([6]);
        let report = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(report.net_hp_change(), 2);
        assert_eq!(p.hp.current, 20);
    }

    #[test]
    fn test_save_each_turn_surfaced_not_resolved() {
        let catalog = catalog();
        let held = id(&catalog, "held");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        apply_status_effect(&mut p, &catalog, held, ApplyOptions::new(3).with_save(14, Ability::Wisdom)).unwrap();

        let mut dice = ScriptedDice::default();
        let report = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(report.saves_required.len(), 1);
        assert_eq!(report.saves_required[0].dc, 14);
        assert_eq!(report.saves_required[0].ability, Ability::Wisdom);
        assert!(has_effect(&p, held));
    }

    #[test]
    fn test_save_ends_notice_and_attempt() {
        let catalog = catalog();
        let frightened = id(&catalog, "frightened");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        apply_status_effect(&mut p, &catalog, frightened, ApplyOptions::new(5)).unwrap();

        let end = process_end_of_turn_effects(&mut p, &catalog);
        assert_eq!(end.save_notices.len(), 1);
        assert_eq!(end.save_notices[0].dc, DEFAULT_SAVE_DC);
        assert_eq!(end.save_notices[0].ability, Ability::Wisdom);

        let mut dice = ScriptedDice::new([4]);
        let failed = attempt_save(&mut p, &catalog, &mut dice, frightened).unwrap();
        assert!(!failed.ended);
        assert!(has_effect(&p, frightened));

        let mut dice = ScriptedDice::new([15]);
        let saved = attempt_save(&mut p, &catalog, &mut dice, frightened).unwrap();
        assert!(saved.ended);
        assert!(!has_effect(&p, frightened));
        assert!(attempt_save(&mut p, &catalog, &mut dice, frightened).is_none());
    }

    #[test]
    fn test_zero_duration_expires_at_next_decay() {
        let catalog = catalog();
        let blessed = id(&catalog, "blessed");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        apply_status_effect(&mut p, &catalog, blessed, ApplyOptions::new(0)).unwrap();
        assert!(has_effect(&p, blessed));

        let end = process_end_of_turn_effects(&mut p, &catalog);
        assert_eq!(end.expired.len(), 1);
        assert!(p.effects.is_empty());
    }

    #[test]
    fn test_break_concentration_removes_linked_effects() {
        let catalog = catalog();
        let blessed = id(&catalog, "blessed");
        let marker = catalog.concentration().unwrap();

        let mut party = vec![
            Participant::player("cleric", "Brother Tam", 18, 16),
            Participant::player("fighter", "Ayla", 24, 17),
        ];
        apply_status_effect(&mut party[0], &catalog, marker, ApplyOptions::new(10)).unwrap();
        apply_status_effect(&mut party[0], &catalog, blessed, ApplyOptions::new(10).linked_to("cleric")).unwrap();
        apply_status_effect(&mut party[1], &catalog, blessed, ApplyOptions::new(10).linked_to("cleric")).unwrap();

        let removed = break_concentration(&mut party, &catalog, "cleric");
        assert_eq!(removed.len(), 3);
        assert!(party.iter().all(|p| p.effects.is_empty()));
    }

    #[test]
    fn test_reapply_takes_over_instance() {
        let catalog = catalog();
        let blessed = id(&catalog, "blessed");

        let mut party = vec![
            Participant::player("cleric", "Brother Tam", 18, 16),
            Participant::player("fighter", "Ayla", 24, 17),
        ];
        let first = ApplyOptions::new(10).with_source("cleric").linked_to("cleric");
        apply_status_effect(&mut party[1], &catalog, blessed, first).unwrap();
        let second = ApplyOptions::new(3).with_source("paladin").with_save(15, Ability::Wisdom);
        apply_status_effect(&mut party[1], &catalog, blessed, second).unwrap();

        let instance = find_effect(&party[1], blessed).unwrap();
        assert_eq!(instance.duration, 10);
        assert_eq!(instance.source.as_deref(), Some("paladin"));
        assert_eq!(instance.save_dc, Some(15));
        assert_eq!(instance.concentration_source, None);

        // The cleric no longer sustains it
        assert!(break_concentration(&mut party, &catalog, "cleric").is_empty());
        assert!(has_effect(&party[1], blessed));
    }

    #[test]
    fn test_stack_count_saturates() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);

        apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_stacks(u32::MAX)).unwrap();
        let outcome = apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_stacks(u32::MAX)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Stacked { stacks: 3, duration: 3 });
    }

    #[test]
    fn test_stacked_periodic_scales_dice_and_modifier() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);
        let options = ApplyOptions::new(3).with_stacks(3).with_periodic("1d4+1");
        apply_status_effect(&mut p, &catalog, bleeding, options).unwrap();

        let mut dice = ScriptedDice::new([1, 2, 3]);
        let report = process_start_of_turn_effects(&mut p, &catalog, &mut dice).unwrap();
        assert_eq!(report.ticks[0].roll.notation, "3d4+3");
        assert_eq!(report.ticks[0].roll.total, 9);
        assert_eq!(p.hp.current, 11);
    }

    #[test]
    fn test_periodic_override_bounded_by_stack_cap() {
        let catalog = catalog();
        let bleeding = id(&catalog, "bleeding");
        let mut p = Participant::player("p1", "Ayla", 20, 14);

        // 3 stacks of 34d6 would roll 102 dice
        let err = apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_periodic("34d6"));
        assert!(matches!(err, Err(EffectError::PeriodicTooLarge { stacks: 3, .. })));
        assert!(p.effects.is_empty());

        apply_status_effect(&mut p, &catalog, bleeding, ApplyOptions::new(3).with_periodic("33d6")).unwrap();
        assert!(has_effect(&p, bleeding));
    }
}
