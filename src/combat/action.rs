//! Turn actions
//!
//! [`CombatSession::resolve_action`] validates an action against the
//! current turn before touching anything, then runs start-of-turn
//! effects, resolves the action, logs it, checks for the end of the
//! fight and hands the turn on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::abilities::{use_ability, validate_ability, AbilityKind, AbilityResult, AbilityType};
use super::damage::DamageResult;
use super::dice::{parse_dice, roll_attack, roll_damage, roll_skill_check, CheckResult, DiceSource, RollMode, RollResult};
use super::effects::{
    apply_damage_resistances, attempt_save, break_concentration, can_participant_act, check_concentration,
    effective_armor_class, get_effect_modifiers, has_effect, process_start_of_turn_effects, ConcentrationCheck,
    EffectId, EffectTick, RollKind, SaveAttempt,
};
use super::participant::{Ability, CombatFlags, LootDrop, Participant, ParticipantId, Side};
use super::ruleset::Ruleset;
use super::state::{CombatError, CombatSession, CombatStatus, RoundSummary};

/// What a participant does on their turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Attack {
        target: ParticipantId,
    },
    Defend,
    Cast {
        ability: String,
        #[serde(default)]
        target: Option<ParticipantId>,
    },
    UseAbility {
        ability: String,
        #[serde(default)]
        target: Option<ParticipantId>,
    },
    Flee,
    Pass,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Attack { .. } => ActionKind::Attack,
            Action::Defend => ActionKind::Defend,
            Action::Cast { .. } => ActionKind::Cast,
            Action::UseAbility { .. } => ActionKind::UseAbility,
            Action::Flee => ActionKind::Flee,
            Action::Pass => ActionKind::Pass,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Action::Attack { target } => Some(target),
            Action::Cast { target, .. } | Action::UseAbility { target, .. } => target.as_deref(),
            _ => None,
        }
    }
}

/// Discriminant of [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attack,
    Defend,
    Cast,
    UseAbility,
    Flee,
    Pass,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Attack => "attack",
            ActionKind::Defend => "defend",
            ActionKind::Cast => "cast",
            ActionKind::UseAbility => "use_ability",
            ActionKind::Flee => "flee",
            ActionKind::Pass => "pass",
        };
        write!(f, "{}", s)
    }
}

/// Result of a weapon attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    /// The attack roll against armor class
    pub attack: CheckResult,
    pub hit: bool,
    pub critical: bool,
    #[serde(default)]
    pub damage_roll: Option<RollResult>,
    /// Extra dice from round flags
    #[serde(default)]
    pub bonus_roll: Option<RollResult>,
    #[serde(default)]
    pub damage: Option<DamageResult>,
    /// Damage soaked by temporary hit points
    #[serde(default)]
    pub absorbed: i32,
    /// Target hit points afterwards
    pub target_hp: i32,
    #[serde(default)]
    pub concentration: Option<ConcentrationCheck>,
}

/// Result of an escape attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleeOutcome {
    pub check: CheckResult,
    pub escaped: bool,
}

/// Structured result of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionResult {
    Attack(AttackOutcome),
    Defend,
    Ability(AbilityResult),
    Flee(FleeOutcome),
    Pass,
    /// The actor fell to start-of-turn effects before acting
    Skipped { reason: String },
}

/// Something recorded in the action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    Action { kind: ActionKind, result: ActionResult },
    EffectTick(EffectTick),
    SavingThrow(SaveAttempt),
    EffectExpired { effect: String },
    Defeated,
}

/// One entry of the append-only action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub round: u32,
    pub actor: ParticipantId,
    #[serde(default)]
    pub target: Option<ParticipantId>,
    pub event: LogEvent,
    pub at: DateTime<Utc>,
}

/// Start-of-turn processing for one actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStart {
    pub actor: ParticipantId,
    pub ticks: Vec<EffectTick>,
    pub saves: Vec<SaveAttempt>,
    /// The actor dropped before acting
    pub actor_down: bool,
}

/// An effect gained or lost during an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectChange {
    pub participant: ParticipantId,
    pub effect: String,
}

/// Everything the caller needs to render a resolved action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub session_id: Uuid,
    pub round: u32,
    pub actor: ParticipantId,
    pub action: ActionKind,
    pub target: Option<ParticipantId>,
    pub turn_start: Option<TurnStart>,
    pub result: ActionResult,
    pub effects_applied: Vec<EffectChange>,
    pub effects_removed: Vec<EffectChange>,
    /// Participants who dropped to 0 hit points
    pub defeated: Vec<ParticipantId>,
    /// Loot dropped as a result
    pub loot: Vec<LootDrop>,
    pub status: CombatStatus,
    pub next_actor: Option<ParticipantId>,
    pub round_end: Option<RoundSummary>,
}

type EffectSnapshot = Vec<(ParticipantId, Vec<EffectId>)>;

fn effect_snapshot(participants: &[Participant]) -> EffectSnapshot {
    participants
        .iter()
        .map(|p| (p.id.clone(), p.effects.iter().map(|e| e.effect).collect()))
        .collect()
}

/// Effects present in `after` but not `before`
fn effect_diff(rules: &Ruleset, before: &EffectSnapshot, after: &EffectSnapshot) -> Vec<EffectChange> {
    let mut changes = Vec::new();
    for (id, effects) in after {
        let previous = before.iter().find(|(b, _)| b == id).map(|(_, e)| e.as_slice()).unwrap_or(&[]);
        for effect in effects.iter().filter(|e| !previous.contains(e)) {
            changes.push(EffectChange {
                participant: id.clone(),
                effect: rules.effects.key_of(*effect).unwrap_or("unknown").to_string(),
            });
        }
    }
    changes
}

/// Split two distinct participants out of the list
fn pair_mut(participants: &mut [Participant], a: usize, b: usize) -> (&mut Participant, &mut Participant) {
    if a < b {
        let (left, right) = participants.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = participants.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl CombatSession {
    /// Process the current actor's start-of-turn effects.
    ///
    /// Does nothing if they were already processed this turn. If the
    /// effects drop the actor, the turn passes on immediately.
    pub fn begin_turn(&mut self, rules: &Ruleset, dice: &mut dyn DiceSource) -> Result<Option<TurnStart>, CombatError> {
        if self.status.is_terminal() {
            return Err(CombatError::NotActive(self.status));
        }
        if self.turn_started {
            return Ok(None);
        }
        let idx = self.current_index().ok_or(CombatError::NotActive(self.status))?;

        let alive_before: Vec<bool> = self.participants.iter().map(|p| p.is_alive()).collect();
        let start = self.start_of_turn(idx, rules, dice)?;
        if start.actor_down {
            self.settle(rules, &alive_before);
            self.finish_turn(rules, dice);
        }
        Ok(Some(start))
    }

    fn start_of_turn(
        &mut self,
        idx: usize,
        rules: &Ruleset,
        dice: &mut dyn DiceSource,
    ) -> Result<TurnStart, CombatError> {
        self.turn_started = true;
        let actor = &mut self.participants[idx];
        let report = process_start_of_turn_effects(actor, &rules.effects, dice)?;

        let mut saves = Vec::new();
        for obligation in &report.saves_required {
            if !actor.is_alive() {
                break;
            }
            if let Some(attempt) = attempt_save(actor, &rules.effects, dice, obligation.effect) {
                saves.push(attempt);
            }
        }

        let start = TurnStart {
            actor: actor.id.clone(),
            ticks: report.ticks,
            saves,
            actor_down: !actor.is_alive(),
        };
        for tick in &start.ticks {
            self.record(&start.actor, None, LogEvent::EffectTick(tick.clone()));
        }
        for save in &start.saves {
            self.record(&start.actor, None, LogEvent::SavingThrow(save.clone()));
        }
        Ok(start)
    }

    /// Hand out loot and drop concentration for anyone who fell
    fn settle(&mut self, rules: &Ruleset, alive_before: &[bool]) -> (Vec<ParticipantId>, Vec<LootDrop>) {
        let mut defeated = Vec::new();
        let mut loot = Vec::new();

        for (i, was_alive) in alive_before.iter().enumerate() {
            let Some(p) = self.participants.get_mut(i) else {
                continue;
            };
            if !*was_alive || p.is_alive() {
                continue;
            }
            defeated.push(p.id.clone());
            if p.side == Side::Monsters {
                loot.append(&mut p.loot);
            }
        }

        for id in &defeated {
            break_concentration(&mut self.participants, &rules.effects, id);
            self.record(id, None, LogEvent::Defeated);
            info!(session = %self.id, participant = %id, "participant defeated");
        }
        self.loot.extend(loot.iter().cloned());
        (defeated, loot)
    }

    /// End check, then advance if the fight goes on
    fn finish_turn(&mut self, rules: &Ruleset, dice: &mut dyn DiceSource) -> Option<RoundSummary> {
        if self.check_combat_end().is_some() {
            return None;
        }
        self.advance_turn(rules, dice)
    }

    fn validate_action(&self, rules: &Ruleset, actor_id: &str, action: &Action) -> Result<usize, CombatError> {
        if self.status.is_terminal() {
            return Err(CombatError::NotActive(self.status));
        }
        let idx = self
            .index_of(actor_id)
            .ok_or_else(|| CombatError::UnknownParticipant(actor_id.to_string()))?;
        let current = self.current_actor().ok_or(CombatError::NotActive(self.status))?;
        if current.id != actor_id {
            return Err(CombatError::NotYourTurn {
                actor: actor_id.to_string(),
                current: current.id.clone(),
            });
        }
        let actor = &self.participants[idx];

        if *action == Action::Pass {
            return Ok(idx);
        }

        let capability = can_participant_act(actor, &rules.effects);
        if !capability.can_act {
            return Err(CombatError::CannotAct {
                actor: actor.name.clone(),
                reason: capability.reason.unwrap_or_default().to_lowercase(),
            });
        }

        let standing_target = |target: &str| -> Result<&Participant, CombatError> {
            let t = self
                .participant(target)
                .ok_or_else(|| CombatError::UnknownParticipant(target.to_string()))?;
            if !t.is_standing() {
                return Err(CombatError::InvalidTarget {
                    target: target.to_string(),
                    reason: "no longer in the fight".to_string(),
                });
            }
            Ok(t)
        };

        match action {
            Action::Attack { target } => {
                let t = standing_target(target)?;
                if t.side == actor.side {
                    return Err(CombatError::InvalidTarget {
                        target: target.clone(),
                        reason: "cannot attack an ally".to_string(),
                    });
                }
                parse_dice(&actor.attack.damage)?;
                if let Some(extra) = &actor.round_flags.bonus_damage {
                    parse_dice(extra)?;
                }
            }
            Action::Cast { ability, target } | Action::UseAbility { ability, target } => {
                let def = validate_ability(rules, actor, ability)?;
                if matches!(action, Action::Cast { .. }) && !def.spell {
                    return Err(CombatError::NotASpell(def.name.clone()));
                }
                if let Some(target) = target {
                    standing_target(target)?;
                }
            }
            Action::Flee => {
                if actor.side != Side::Players {
                    return Err(CombatError::CannotFlee(actor.name.clone()));
                }
            }
            Action::Defend | Action::Pass => {}
        }

        Ok(idx)
    }

    /// Resolve the current actor's action and move the fight on.
    ///
    /// Start-of-turn effects are processed first if
    /// [`CombatSession::begin_turn`] has not run. Errors are returned before
    /// anything in the session changes, except that an actor who cannot
    /// act still gets that pass, since a save made there may free them.
    pub fn resolve_action(
        &mut self,
        rules: &Ruleset,
        dice: &mut dyn DiceSource,
        actor_id: &str,
        action: Action,
    ) -> Result<ActionOutcome, CombatError> {
        let round = self.round;
        let alive_before: Vec<bool> = self.participants.iter().map(|p| p.is_alive()).collect();

        let mut turn_start = None;
        let idx = match self.validate_action(rules, actor_id, &action) {
            Ok(idx) => idx,
            Err(CombatError::CannotAct { .. }) if !self.turn_started => {
                let idx = self.current_index().ok_or(CombatError::NotActive(self.status))?;
                let start = self.start_of_turn(idx, rules, dice)?;
                let actor_down = start.actor_down;
                turn_start = Some(start);
                if !actor_down {
                    if let Err(e) = self.validate_action(rules, actor_id, &action) {
                        warn!(session = %self.id, actor = actor_id, error = %e, "action rejected");
                        return Err(e);
                    }
                }
                idx
            }
            Err(e) => {
                warn!(session = %self.id, actor = actor_id, error = %e, "action rejected");
                return Err(e);
            }
        };

        if !self.turn_started {
            turn_start = Some(self.start_of_turn(idx, rules, dice)?);
        }

        let before = effect_snapshot(&self.participants);
        let using_ability = matches!(action, Action::Cast { .. } | Action::UseAbility { .. });
        if using_ability {
            self.participants[idx].round_flags = CombatFlags::default();
        }
        let result = if self.participants[idx].is_alive() {
            let result = self.perform(rules, dice, idx, &action)?;
            if !using_ability {
                self.participants[idx].round_flags = CombatFlags::default();
            }
            result
        } else {
            ActionResult::Skipped {
                reason: format!("{} fell before acting", self.participants[idx].name),
            }
        };
        let after = effect_snapshot(&self.participants);

        self.record(
            actor_id,
            action.target(),
            LogEvent::Action {
                kind: action.kind(),
                result: result.clone(),
            },
        );
        let (defeated, loot) = self.settle(rules, &alive_before);
        self.last_action_at = Utc::now();
        let round_end = self.finish_turn(rules, dice);

        Ok(ActionOutcome {
            session_id: self.id,
            round,
            actor: actor_id.to_string(),
            action: action.kind(),
            target: action.target().map(str::to_string),
            turn_start,
            result,
            effects_applied: effect_diff(rules, &before, &after),
            effects_removed: effect_diff(rules, &after, &before),
            defeated,
            loot,
            status: self.status,
            next_actor: self.current_actor().map(|p| p.id.clone()),
            round_end,
        })
    }

    fn perform(
        &mut self,
        rules: &Ruleset,
        dice: &mut dyn DiceSource,
        idx: usize,
        action: &Action,
    ) -> Result<ActionResult, CombatError> {
        match action {
            Action::Attack { target } => {
                let target_idx = self
                    .index_of(target)
                    .ok_or_else(|| CombatError::UnknownParticipant(target.clone()))?;
                Ok(ActionResult::Attack(self.attack(rules, dice, idx, target_idx)?))
            }
            Action::Defend => {
                let actor = &mut self.participants[idx];
                actor.is_defending = true;
                debug!(actor = %actor.id, "defending");
                Ok(ActionResult::Defend)
            }
            Action::Cast { ability, target } | Action::UseAbility { ability, target } => {
                Ok(ActionResult::Ability(self.ability(rules, dice, idx, ability, target.as_deref())?))
            }
            Action::Flee => Ok(ActionResult::Flee(self.flee(rules, dice, idx))),
            Action::Pass => Ok(ActionResult::Pass),
        }
    }

    fn attack(
        &mut self,
        rules: &Ruleset,
        dice: &mut dyn DiceSource,
        idx: usize,
        target_idx: usize,
    ) -> Result<AttackOutcome, CombatError> {
        let effects = &rules.effects;
        let actor = &self.participants[idx];
        let target = &self.participants[target_idx];

        let own = get_effect_modifiers(actor, effects, RollKind::Attack, None);
        let against = get_effect_modifiers(target, effects, RollKind::AttackAgainst, None);
        let advantage = own.advantage || against.advantage || actor.round_flags.advantage_on_attacks;
        let disadvantage = own.disadvantage || against.disadvantage || target.is_defending;
        let mode = RollMode::from_flags(advantage, disadvantage);

        let bonus = actor.attack.bonus + own.bonus + actor.round_flags.attack_bonus;
        let armor_class = effective_armor_class(target, effects);
        let notation = actor.attack.damage.clone();
        let damage_type = actor.attack.damage_type;
        let extra = actor.round_flags.bonus_damage.clone();

        let mut attack = roll_attack(dice, bonus, armor_class, mode);
        if own.auto_fail {
            attack.success = false;
        }
        let hit = attack.success;
        let critical = hit && (attack.critical || against.auto_critical);

        let mut outcome = AttackOutcome {
            attack,
            hit,
            critical,
            damage_roll: None,
            bonus_roll: None,
            damage: None,
            absorbed: 0,
            target_hp: target.hp.current,
            concentration: None,
        };

        if hit {
            let damage_roll = roll_damage(dice, &notation, critical)?;
            let bonus_roll = extra.map(|n| roll_damage(dice, &n, critical)).transpose()?;
            let raw = damage_roll.total + bonus_roll.as_ref().map_or(0, |r| r.total);

            let target = &mut self.participants[target_idx];
            let damage = apply_damage_resistances(target, effects, damage_type, raw);
            let (absorbed, _) = target.hp.take_damage(damage.final_damage);
            let concentration = check_concentration(target, effects, dice, damage.final_damage);
            outcome.target_hp = target.hp.current;

            if concentration.as_ref().is_some_and(|c| !c.maintained) {
                let concentrator = target.id.clone();
                break_concentration(&mut self.participants, effects, &concentrator);
            }

            outcome.damage_roll = Some(damage_roll);
            outcome.bonus_roll = bonus_roll;
            outcome.damage = Some(damage);
            outcome.absorbed = absorbed;
            outcome.concentration = concentration;
        }

        debug!(
            session = %self.id,
            attacker = %self.participants[idx].id,
            target = %self.participants[target_idx].id,
            total = outcome.attack.total(),
            armor_class,
            %mode,
            hit,
            critical,
            "attack resolved"
        );
        Ok(outcome)
    }

    fn ability(
        &mut self,
        rules: &Ruleset,
        dice: &mut dyn DiceSource,
        idx: usize,
        ability_id: &str,
        target: Option<&str>,
    ) -> Result<AbilityResult, CombatError> {
        let def = validate_ability(rules, &self.participants[idx], ability_id)?;

        // Drop an earlier concentration ability everywhere, not just on
        // the actor and target
        if def.kind.requires_concentration() {
            let concentrating = rules
                .effects
                .concentration()
                .is_some_and(|marker| has_effect(&self.participants[idx], marker));
            if concentrating {
                let concentrator = self.participants[idx].id.clone();
                break_concentration(&mut self.participants, &rules.effects, &concentrator);
            }
        }

        let target_idx = target.and_then(|t| self.index_of(t)).filter(|&t| t != idx);
        let result = match target_idx {
            Some(t) => {
                let (actor, target) = pair_mut(&mut self.participants, idx, t);
                use_ability(rules, dice, actor, ability_id, Some(target))?
            }
            None => use_ability(rules, dice, &mut self.participants[idx], ability_id, None)?,
        };

        for concentrator in &result.broken_concentration {
            break_concentration(&mut self.participants, &rules.effects, concentrator);
        }
        Ok(result)
    }

    fn flee(&mut self, rules: &Ruleset, dice: &mut dyn DiceSource, idx: usize) -> FleeOutcome {
        let actor = &mut self.participants[idx];
        let mods = get_effect_modifiers(actor, &rules.effects, RollKind::Check, Some(Ability::Dexterity));
        let bonus = actor.modifier(Ability::Dexterity) + mods.bonus;
        let mut check = roll_skill_check(dice, bonus, rules.flee_dc, mods.mode());
        if mods.auto_fail {
            check.success = false;
        }

        let escaped = check.success;
        if escaped {
            actor.fled = true;
            let id = actor.id.clone();
            break_concentration(&mut self.participants, &rules.effects, &id);
        }
        info!(session = %self.id, actor = %self.participants[idx].id, escaped, "flee attempt");
        FleeOutcome { check, escaped }
    }
}

/// Pick an action for a computer-controlled participant.
///
/// Heals when badly hurt, then tries a control or damage ability on the
/// weakest opponent, and otherwise attacks it. Passes when unable to act.
pub fn choose_auto_action(session: &CombatSession, rules: &Ruleset, actor_id: &str) -> Action {
    let Some(actor) = session.participant(actor_id) else {
        return Action::Pass;
    };
    if !can_participant_act(actor, &rules.effects).can_act {
        return Action::Pass;
    }

    let usable: Vec<_> = actor
        .class_id
        .as_deref()
        .map(|class| {
            rules
                .abilities
                .for_class(class)
                .filter(|def| validate_ability(rules, actor, &def.id).is_ok())
                .collect()
        })
        .unwrap_or_default();
    let action_for = |id: &str, spell: bool, target: Option<ParticipantId>| {
        if spell {
            Action::Cast {
                ability: id.to_string(),
                target,
            }
        } else {
            Action::UseAbility {
                ability: id.to_string(),
                target,
            }
        }
    };

    if actor.hp.current * 2 < actor.hp.max {
        if let Some(def) = usable.iter().find(|d| d.ability_type() == AbilityType::Healing) {
            return action_for(&def.id, def.spell, None);
        }
    }

    let Some(target) = session
        .participants
        .iter()
        .filter(|p| p.side != actor.side && p.is_standing())
        .min_by_key(|p| p.hp.current)
    else {
        return Action::Pass;
    };

    for def in &usable {
        let worthwhile = match &def.kind {
            AbilityKind::Control { effect, .. } => !has_effect(target, *effect) && !target.is_immune_to(
                rules.effects.key_of(*effect).unwrap_or_default(),
            ),
            AbilityKind::Damage { .. } => true,
            _ => false,
        };
        if worthwhile {
            return action_for(&def.id, def.spell, Some(target.id.clone()));
        }
    }

    Action::Attack {
        target: target.id.clone(),
    }
}
