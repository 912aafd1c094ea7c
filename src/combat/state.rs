//! Combat session state
//!
//! Tracks a single fight:
//! - Participants and initiative order
//! - Round and turn progression
//! - Victory, defeat, escape and idle timeout
//!
//! Action resolution lives in `action.rs`.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::abilities::AbilityError;
use super::action::{ActionLogEntry, LogEvent};
use super::dice::{roll_initiative, DiceError, DiceSource};
use super::effects::{attempt_save, break_concentration, process_end_of_turn_effects, EffectError, SaveAttempt};
use super::participant::{Ability, LootDrop, Participant, ParticipantId, Side};
use super::ruleset::Ruleset;

/// Lifecycle of a combat session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatStatus {
    #[default]
    Active,
    /// Every monster is down
    Victory,
    /// Every player is down
    Defeat,
    /// No player is left standing and at least one escaped
    Fled,
    /// Abandoned past the idle threshold
    Timeout,
}

impl CombatStatus {
    /// Whether the session is over
    pub fn is_terminal(&self) -> bool {
        *self != CombatStatus::Active
    }
}

impl std::fmt::Display for CombatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CombatStatus::Active => "active",
            CombatStatus::Victory => "victory",
            CombatStatus::Defeat => "defeat",
            CombatStatus::Fled => "fled",
            CombatStatus::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Where the fight takes place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneContext {
    pub zone_id: String,
    pub name: String,
    pub danger_level: u32,
}

impl ZoneContext {
    pub fn new(zone_id: &str, name: &str) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            danger_level: 0,
        }
    }

    pub fn with_danger_level(mut self, level: u32) -> Self {
        self.danger_level = level;
        self
    }
}

/// One slot in the initiative order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub participant_id: ParticipantId,
    pub side: Side,
    pub initiative_score: i32,
}

/// Combat errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("no combatants left standing on the {0} side")]
    EmptySide(Side),

    #[error("duplicate participant id '{0}'")]
    DuplicateParticipant(String),

    #[error("combat session {0} not found")]
    UnknownSession(Uuid),

    #[error("combat is over ({0})")]
    NotActive(CombatStatus),

    #[error("unknown participant '{0}'")]
    UnknownParticipant(String),

    #[error("it is {current}'s turn, not {actor}'s")]
    NotYourTurn { actor: String, current: String },

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("{actor} cannot act: {reason}")]
    CannotAct { actor: String, reason: String },

    #[error("{0} cannot flee")]
    CannotFlee(String),

    #[error("{0} is not a spell")]
    NotASpell(String),

    #[error(transparent)]
    Ability(#[from] AbilityError),

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error(transparent)]
    Dice(#[from] DiceError),
}

/// What happened when a round wrapped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// The round that just ended
    pub completed_round: u32,
    /// (bearer, effect name) for each effect that ran out
    pub expired: Vec<(ParticipantId, String)>,
    /// Save-to-end attempts made at the end of the round
    pub saves: Vec<(ParticipantId, SaveAttempt)>,
}

/// A single fight between players and creatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatSession {
    pub id: Uuid,
    pub status: CombatStatus,
    #[serde(default)]
    pub zone: ZoneContext,
    pub participants: Vec<Participant>,
    /// Sorted by initiative, highest first
    pub initiative_order: Vec<InitiativeEntry>,
    /// Starts at 1
    pub round: u32,
    pub current_turn_index: usize,
    #[serde(default)]
    pub action_log: Vec<ActionLogEntry>,
    /// Loot dropped by fallen creatures
    #[serde(default)]
    pub loot: Vec<LootDrop>,
    pub started_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Start-of-turn effects already processed for the current actor
    #[serde(default)]
    pub turn_started: bool,
}

/// Roll initiative for everyone and open a session
pub fn start_combat(
    mut participants: Vec<Participant>,
    zone: ZoneContext,
    dice: &mut dyn DiceSource,
) -> Result<CombatSession, CombatError> {
    for p in participants.iter_mut() {
        let roll = roll_initiative(dice, p.modifier(Ability::Dexterity), p.initiative_bonus);
        p.initiative = roll.total;
        debug!(participant = %p.id, initiative = p.initiative, "rolled initiative");
    }
    CombatSession::new(participants, zone)
}

impl CombatSession {
    /// Open a session using the participants' preset initiative scores
    pub fn new(participants: Vec<Participant>, zone: ZoneContext) -> Result<Self, CombatError> {
        let mut seen = HashSet::new();
        for p in &participants {
            if !seen.insert(p.id.as_str()) {
                return Err(CombatError::DuplicateParticipant(p.id.clone()));
            }
        }
        for side in [Side::Players, Side::Monsters] {
            if !participants.iter().any(|p| p.side == side && p.is_standing()) {
                return Err(CombatError::EmptySide(side));
            }
        }

        let mut initiative_order: Vec<InitiativeEntry> = participants
            .iter()
            .map(|p| InitiativeEntry {
                participant_id: p.id.clone(),
                side: p.side,
                initiative_score: p.initiative,
            })
            .collect();
        // Stable: ties keep insertion order
        initiative_order.sort_by(|a, b| b.initiative_score.cmp(&a.initiative_score));

        let now = Utc::now();
        let mut session = Self {
            id: Uuid::new_v4(),
            status: CombatStatus::Active,
            zone,
            participants,
            initiative_order,
            round: 1,
            current_turn_index: 0,
            action_log: Vec::new(),
            loot: Vec::new(),
            started_at: now,
            last_action_at: now,
            ended_at: None,
            turn_started: false,
        };
        if let Some(first) = (0..session.initiative_order.len()).find(|&i| session.slot_is_standing(i)) {
            session.current_turn_index = first;
        }

        info!(
            session = %session.id,
            participants = session.participants.len(),
            zone = %session.zone.zone_id,
            "combat started"
        );
        Ok(session)
    }

    /// Find a participant
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Find a participant mutably
    pub fn participant_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == id)
    }

    /// Participants on one side
    pub fn side(&self, side: Side) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.side == side)
    }

    fn slot_is_standing(&self, slot: usize) -> bool {
        self.initiative_order
            .get(slot)
            .and_then(|entry| self.participant(&entry.participant_id))
            .is_some_and(|p| p.is_standing())
    }

    pub(crate) fn current_index(&self) -> Option<usize> {
        let entry = self.initiative_order.get(self.current_turn_index)?;
        self.index_of(&entry.participant_id)
    }

    /// Whose turn it is, while the session is active
    pub fn current_actor(&self) -> Option<&Participant> {
        if self.status.is_terminal() {
            return None;
        }
        self.current_index().map(|i| &self.participants[i])
    }

    /// Move to the next standing participant, wrapping into a new round
    /// when the order runs out. Visits each slot at most once.
    pub fn advance_turn(&mut self, rules: &Ruleset, dice: &mut dyn DiceSource) -> Option<RoundSummary> {
        if self.status.is_terminal() || self.initiative_order.is_empty() {
            return None;
        }

        if let Some(i) = self.current_index() {
            self.participants[i].has_acted = true;
        }
        self.turn_started = false;

        let slots = self.initiative_order.len();
        let mut summary = None;
        for _ in 0..slots {
            self.current_turn_index += 1;
            if self.current_turn_index >= slots {
                self.current_turn_index = 0;
                summary = Some(self.end_round(rules, dice));
            }
            if self.slot_is_standing(self.current_turn_index) {
                break;
            }
        }

        if let Some(actor) = self.current_actor() {
            debug!(session = %self.id, round = self.round, actor = %actor.id, "turn advanced");
        }
        summary
    }

    /// Wrap into the next round: reset per-round state and decay effects
    fn end_round(&mut self, rules: &Ruleset, dice: &mut dyn DiceSource) -> RoundSummary {
        let mut summary = RoundSummary {
            completed_round: self.round,
            ..Default::default()
        };
        self.round += 1;

        let marker = rules.effects.concentration();
        let mut lapsed = Vec::new();
        let mut events = Vec::new();

        for p in self.participants.iter_mut() {
            p.has_acted = false;
            p.is_defending = false;
            if !p.is_alive() {
                continue;
            }

            let report = process_end_of_turn_effects(p, &rules.effects);
            for expired in report.expired {
                if Some(expired.effect) == marker {
                    lapsed.push(p.id.clone());
                }
                events.push((p.id.clone(), LogEvent::EffectExpired {
                    effect: expired.name.clone(),
                }));
                summary.expired.push((p.id.clone(), expired.name));
            }
            for notice in report.save_notices {
                if let Some(attempt) = attempt_save(p, &rules.effects, dice, notice.effect) {
                    events.push((p.id.clone(), LogEvent::SavingThrow(attempt.clone())));
                    summary.saves.push((p.id.clone(), attempt));
                }
            }
        }

        // Concentration that ran out takes its linked effects with it
        for id in lapsed {
            break_concentration(&mut self.participants, &rules.effects, &id);
        }
        for (actor, event) in events {
            self.record(&actor, None, event);
        }

        debug!(session = %self.id, round = self.round, "round started");
        summary
    }

    /// Decide whether the fight is over. Victory is checked first.
    pub fn check_combat_end(&mut self) -> Option<CombatStatus> {
        if self.status.is_terminal() {
            return Some(self.status);
        }

        let monsters_standing = self.side(Side::Monsters).any(|p| p.is_standing());
        let players_standing = self.side(Side::Players).any(|p| p.is_standing());
        let status = if !monsters_standing {
            CombatStatus::Victory
        } else if !players_standing {
            if self.side(Side::Players).any(|p| p.fled) {
                CombatStatus::Fled
            } else {
                CombatStatus::Defeat
            }
        } else {
            return None;
        };

        self.finish(status, Utc::now());
        Some(status)
    }

    fn finish(&mut self, status: CombatStatus, at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(at);
        info!(session = %self.id, %status, rounds = self.round, "combat ended");
    }

    /// End an active session as timed out
    pub fn timeout(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.finish(CombatStatus::Timeout, now);
        }
    }

    /// Time since the last action
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_action_at
    }

    pub(crate) fn record(&mut self, actor: &str, target: Option<&str>, event: LogEvent) {
        self.action_log.push(ActionLogEntry {
            round: self.round,
            actor: actor.to_string(),
            target: target.map(str::to_string),
            event,
            at: Utc::now(),
        });
    }
}

/// Time out every active session idle for at least `max_idle`.
///
/// Returns the ids of the sessions that timed out.
pub fn sweep_idle_sessions<'a>(
    sessions: impl IntoIterator<Item = &'a mut CombatSession>,
    now: DateTime<Utc>,
    max_idle: Duration,
) -> Vec<Uuid> {
    let mut timed_out = Vec::new();
    for session in sessions {
        if session.status == CombatStatus::Active && session.idle_for(now) >= max_idle {
            session.timeout(now);
            timed_out.push(session.id);
        }
    }
    timed_out
}
