//! Combat system module
//!
//! Turn-based d20 combat:
//! - Dice rolling (e.g., "2d6+3") with advantage and disadvantage
//! - Damage types with immunity, resistance and vulnerability
//! - Status effects that stack, tick, decay and modify rolls
//! - Class abilities resolved through typed strategies
//! - Sessions with initiative, rounds and an action log

pub mod abilities;
pub mod action;
pub mod damage;
pub mod dice;
pub mod effects;
pub mod manager;
pub mod participant;
pub mod ruleset;
pub mod state;

pub use abilities::{use_ability, AbilityError, AbilityResult};
pub use action::{choose_auto_action, Action, ActionOutcome, ActionResult};
pub use damage::{DamageModifier, DamageProfile, DamageResult, DamageType};
pub use dice::{parse_dice, roll, DiceError, DiceRoll, DiceSource, RollMode, RollResult, ScriptedDice};
pub use effects::{apply_status_effect, remove_status_effect, EffectCatalog, EffectError, EffectId};
pub use manager::{spawn_idle_sweeper, CombatManager};
pub use participant::{Ability, Participant, ParticipantId, Side};
pub use ruleset::{CatalogError, Ruleset};
pub use state::{start_combat, CombatError, CombatSession, CombatStatus, ZoneContext};
