//! Queries over a participant's active effects

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::catalog::{EffectCatalog, RollKind};
use super::{remove_status_effect, RemoveOptions};
use crate::combat::damage::{DamageModifier, DamageResult, DamageType};
use crate::combat::dice::{roll_saving_throw, CheckResult, DiceSource, RollMode};
use crate::combat::participant::{Ability, Participant};

/// Aggregated roll modifiers from all active effects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectModifiers {
    pub advantage: bool,
    pub disadvantage: bool,
    pub bonus: i32,
    pub auto_fail: bool,
    pub auto_critical: bool,
    /// Names of the effects that contributed
    pub sources: Vec<String>,
}

impl EffectModifiers {
    /// Roll mode; advantage and disadvantage cancel
    pub fn mode(&self) -> RollMode {
        RollMode::from_flags(self.advantage, self.disadvantage)
    }
}

/// Collect the modifiers active effects apply to one kind of roll
pub fn get_effect_modifiers(
    participant: &Participant,
    catalog: &EffectCatalog,
    kind: RollKind,
    ability: Option<Ability>,
) -> EffectModifiers {
    let mut mods = EffectModifiers::default();

    for instance in &participant.effects {
        let Some(def) = catalog.get(instance.effect) else {
            continue;
        };
        let mut contributed = false;
        for modifier in def.modifiers.iter().filter(|m| m.applies_to(kind, ability)) {
            mods.advantage |= modifier.advantage;
            mods.disadvantage |= modifier.disadvantage;
            mods.bonus += modifier.bonus * instance.stacks.max(1) as i32;
            mods.auto_fail |= modifier.auto_fail;
            mods.auto_critical |= modifier.auto_critical;
            contributed = true;
        }
        if contributed {
            mods.sources.push(def.name.clone());
        }
    }

    mods
}

/// What a participant may currently do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCapability {
    pub can_act: bool,
    pub can_move: bool,
    pub can_speak: bool,
    pub can_react: bool,
    /// Name of the first effect preventing an action
    pub reason: Option<String>,
}

impl Default for ActionCapability {
    fn default() -> Self {
        Self {
            can_act: true,
            can_move: true,
            can_speak: true,
            can_react: true,
            reason: None,
        }
    }
}

/// Check restrictions from active effects
pub fn can_participant_act(participant: &Participant, catalog: &EffectCatalog) -> ActionCapability {
    let mut capability = ActionCapability::default();

    for instance in &participant.effects {
        let Some(def) = catalog.get(instance.effect) else {
            continue;
        };
        let r = &def.restrictions;
        if !r.any() {
            continue;
        }
        if r.prevents_action && capability.can_act {
            capability.can_act = false;
            capability.reason = Some(def.name.clone());
        }
        capability.can_move &= !r.prevents_movement;
        capability.can_speak &= !r.prevents_speech;
        capability.can_react &= !r.prevents_reactions;
        if capability.reason.is_none() {
            capability.reason = Some(def.name.clone());
        }
    }

    capability
}

/// Armor class including effect bonuses
pub fn effective_armor_class(participant: &Participant, catalog: &EffectCatalog) -> i32 {
    let bonus: i32 = participant
        .effects
        .iter()
        .filter_map(|instance| {
            catalog
                .get(instance.effect)
                .map(|def| def.armor_class_bonus * instance.stacks.max(1) as i32)
        })
        .sum();
    participant.armor_class + bonus
}

/// Filter damage through the innate profile and effect-granted tags.
///
/// Immunity zeroes the damage. Resistance halves once however many
/// sources grant it; vulnerability then doubles.
pub fn apply_damage_resistances(
    participant: &Participant,
    catalog: &EffectCatalog,
    damage_type: DamageType,
    raw: i32,
) -> DamageResult {
    let innate = participant.damage_profile.get(damage_type);
    let mut immune = innate == DamageModifier::Immune;
    let mut resisted = innate == DamageModifier::Resistant;
    let mut vulnerable = innate == DamageModifier::Vulnerable;

    for instance in &participant.effects {
        if let Some(def) = catalog.get(instance.effect) {
            immune |= def.immunities.contains(&damage_type);
            resisted |= def.resistances.contains(&damage_type);
            vulnerable |= def.vulnerabilities.contains(&damage_type);
        }
    }

    DamageResult::compute(raw, damage_type, immune, resisted, vulnerable)
}

/// Saving throw including effect modifiers.
///
/// An auto-fail modifier fails the save whatever the dice say.
pub fn saving_throw(
    participant: &Participant,
    catalog: &EffectCatalog,
    dice: &mut dyn DiceSource,
    ability: Ability,
    dc: i32,
) -> CheckResult {
    let mods = get_effect_modifiers(participant, catalog, RollKind::Save, Some(ability));
    let bonus = participant.save_bonus(ability) + mods.bonus;
    let mut check = roll_saving_throw(dice, bonus, dc, mods.mode());
    if mods.auto_fail {
        check.success = false;
    }
    check
}

/// Concentration save made after taking damage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationCheck {
    pub dc: i32,
    pub save: CheckResult,
    pub maintained: bool,
}

/// Concentration DC for a given amount of damage
pub fn concentration_dc(damage: i32) -> i32 {
    (damage / 2).max(10)
}

/// Roll a concentration save if the participant is concentrating.
///
/// Failure removes the marker; removing the effects it sustained is left
/// to [`super::break_concentration`], which needs every participant.
pub fn check_concentration(
    participant: &mut Participant,
    catalog: &EffectCatalog,
    dice: &mut dyn DiceSource,
    damage: i32,
) -> Option<ConcentrationCheck> {
    let marker = catalog.concentration()?;
    if damage <= 0 || !super::has_effect(participant, marker) {
        return None;
    }

    let dc = concentration_dc(damage);
    let save = saving_throw(participant, catalog, dice, Ability::Constitution, dc);
    let maintained = save.success;
    if !maintained {
        remove_status_effect(participant, marker, RemoveOptions::default());
    }
    debug!(participant = %participant.id, dc, total = save.total(), maintained, "concentration check");

    Some(ConcentrationCheck { dc, save, maintained })
}
