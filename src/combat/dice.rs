//! Dice rolling system
//!
//! Parses and rolls dice notation like "2d6+3", "1d20", "4d6-2".
//! Every roll draws from an explicit [`DiceSource`] so combat can be
//! replayed from a seed or a fixed script of die faces.

use std::collections::VecDeque;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Largest die count accepted in a notation
pub const MAX_DICE: u32 = 100;

/// Largest die size accepted in a notation
pub const MAX_SIDES: u32 = 1000;

/// Largest flat modifier, either sign, accepted in a notation
pub const MAX_MODIFIER: i32 = 1000;

/// Dice parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("malformed dice notation '{notation}': {reason}")]
    MalformedNotation { notation: String, reason: String },
}

impl DiceError {
    fn malformed(notation: &str, reason: impl Into<String>) -> Self {
        DiceError::MalformedNotation {
            notation: notation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Source of individual die faces.
///
/// Any [`rand::Rng`] is a source, so production code passes a seeded or
/// OS-seeded `StdRng` and tests can pass [`ScriptedDice`].
pub trait DiceSource {
    /// Roll one die with `sides` faces, returning a value in `1..=sides`
    fn roll_die(&mut self, sides: u32) -> u32;
}

impl<R: Rng + ?Sized> DiceSource for R {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.random_range(1..=sides)
    }
}

/// Replays a fixed sequence of die faces.
///
/// Faces are clamped to the die being rolled. Once the script runs out
/// every die lands on its middle face.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
}

impl ScriptedDice {
    /// Create a script from die faces in roll order
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
        }
    }

    /// Queue another face
    pub fn push(&mut self, face: u32) {
        self.faces.push_back(face);
    }

    /// Faces not yet consumed
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }
}

impl DiceSource for ScriptedDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        match self.faces.pop_front() {
            Some(face) => face.clamp(1, sides),
            None => sides.div_ceil(2),
        }
    }
}

/// Advantage state for d20 rolls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl RollMode {
    /// Build a mode from independent advantage/disadvantage flags.
    /// Both present cancel out.
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Self {
        match (advantage, disadvantage) {
            (true, false) => RollMode::Advantage,
            (false, true) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        }
    }

    /// Combine two modes (advantage + disadvantage = normal)
    pub fn combine(self, other: RollMode) -> RollMode {
        match (self, other) {
            (RollMode::Normal, x) | (x, RollMode::Normal) => x,
            (RollMode::Advantage, RollMode::Advantage) => RollMode::Advantage,
            (RollMode::Disadvantage, RollMode::Disadvantage) => RollMode::Disadvantage,
            _ => RollMode::Normal,
        }
    }
}

impl std::fmt::Display for RollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RollMode::Normal => "normal",
            RollMode::Advantage => "advantage",
            RollMode::Disadvantage => "disadvantage",
        };
        write!(f, "{}", s)
    }
}

/// A parsed dice roll specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    /// Create a new dice roll
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// A single d20 plus a flat bonus
    pub fn d20(modifier: i32) -> Self {
        Self::new(1, 20, modifier)
    }

    /// Whether this is exactly one twenty-sided die
    pub fn is_single_d20(&self) -> bool {
        self.count == 1 && self.sides == 20
    }

    /// Same notation with twice the dice (critical damage)
    pub fn doubled(&self) -> Self {
        Self::new(self.count.saturating_mul(2), self.sides, self.modifier)
    }

    /// Roll the dice. `mode` only matters for a single d20.
    pub fn roll(&self, dice: &mut dyn DiceSource, mode: RollMode) -> RollResult {
        let notation = self.to_string();

        if self.is_single_d20() && mode != RollMode::Normal {
            let first = dice.roll_die(20);
            let second = dice.roll_die(20);
            let kept = match mode {
                RollMode::Advantage => first.max(second),
                _ => first.min(second),
            };
            trace!(%notation, first, second, kept, %mode, "rolled d20 pair");
            return RollResult::new(notation, vec![first, second], vec![kept], self, mode);
        }

        let rolls: Vec<u32> = (0..self.count).map(|_| dice.roll_die(self.sides)).collect();
        trace!(%notation, ?rolls, "rolled dice");
        RollResult::new(notation, rolls.clone(), rolls, self, RollMode::Normal)
    }

    /// Get the minimum possible result
    pub fn min(&self) -> i32 {
        saturating_total(self.count as u64, self.modifier)
    }

    /// Get the maximum possible result
    pub fn max(&self) -> i32 {
        saturating_total(self.count as u64 * self.sides as u64, self.modifier)
    }

    /// Get the expected average (rounded down)
    pub fn average(&self) -> i32 {
        let avg_per_die = (1.0 + self.sides as f64) / 2.0;
        (self.count as f64 * avg_per_die + self.modifier as f64) as i32
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl std::fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Outcome of a single roll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    /// Notation that was rolled
    pub notation: String,
    /// Every die that hit the table
    pub rolls: Vec<u32>,
    /// Dice that count toward the total
    pub kept: Vec<u32>,
    /// Flat modifier
    pub modifier: i32,
    /// Kept dice plus modifier
    pub total: i32,
    /// Advantage state the roll was made with
    pub mode: RollMode,
    /// Natural 20 on a single d20
    pub is_critical: bool,
    /// Natural 1 on a single d20
    pub is_fumble: bool,
}

impl RollResult {
    fn new(
        notation: String,
        rolls: Vec<u32>,
        kept: Vec<u32>,
        parsed: &DiceRoll,
        mode: RollMode,
    ) -> Self {
        let sum: u64 = kept.iter().map(|&face| face as u64).sum();
        let natural = if parsed.is_single_d20() {
            kept.first().copied()
        } else {
            None
        };

        Self {
            notation,
            rolls,
            kept,
            modifier: parsed.modifier,
            total: saturating_total(sum, parsed.modifier),
            mode,
            is_critical: natural.is_some_and(is_critical),
            is_fumble: natural.is_some_and(is_fumble),
        }
    }

    /// The kept die face of a single d20 roll
    pub fn natural(&self) -> Option<u32> {
        match self.kept.as_slice() {
            [face] => Some(*face),
            _ => None,
        }
    }
}

fn saturating_total(dice: u64, modifier: i32) -> i32 {
    let total = (dice.min(i32::MAX as u64) as i64) + modifier as i64;
    total.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Unsigned decimal; `str::parse` alone would also take a leading '+'
fn parse_digits<T: FromStr>(text: &str) -> Option<T> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let normalized: String = notation
        .split_whitespace()
        .collect::<String>()
        .to_lowercase();

    // Find the 'd' separator
    let d_pos = normalized
        .find('d')
        .ok_or_else(|| DiceError::malformed(notation, "missing 'd'"))?;

    // Parse count (before 'd')
    let count_str = &normalized[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1 // "d6" means "1d6"
    } else {
        parse_digits(count_str)
            .ok_or_else(|| DiceError::malformed(notation, format!("invalid dice count '{}'", count_str)))?
    };

    if count == 0 || count > MAX_DICE {
        return Err(DiceError::malformed(
            notation,
            format!("dice count must be 1-{}", MAX_DICE),
        ));
    }

    // Parse sides and modifier (after 'd')
    let rest = &normalized[d_pos + 1..];

    let (sides_str, modifier) = if let Some(plus_pos) = rest.find('+') {
        let mod_str = &rest[plus_pos + 1..];
        let modifier: i32 = parse_digits(mod_str)
            .ok_or_else(|| DiceError::malformed(notation, format!("invalid modifier '{}'", mod_str)))?;
        (&rest[..plus_pos], modifier)
    } else if let Some(minus_pos) = rest.rfind('-').filter(|&pos| pos > 0) {
        let mod_str = &rest[minus_pos + 1..];
        let magnitude: i32 = parse_digits(mod_str)
            .ok_or_else(|| DiceError::malformed(notation, format!("invalid modifier '-{}'", mod_str)))?;
        (&rest[..minus_pos], -magnitude)
    } else {
        (rest, 0)
    };

    if modifier.abs() > MAX_MODIFIER {
        return Err(DiceError::malformed(
            notation,
            format!("modifier must be within ±{}", MAX_MODIFIER),
        ));
    }

    let sides: u32 = parse_digits(sides_str)
        .ok_or_else(|| DiceError::malformed(notation, format!("invalid die sides '{}'", sides_str)))?;

    if sides == 0 || sides > MAX_SIDES {
        return Err(DiceError::malformed(
            notation,
            format!("die sides must be 1-{}", MAX_SIDES),
        ));
    }

    Ok(DiceRoll::new(count, sides, modifier))
}

/// Roll a notation string
pub fn roll(
    dice: &mut dyn DiceSource,
    notation: &str,
    mode: RollMode,
) -> Result<RollResult, DiceError> {
    Ok(parse_dice(notation)?.roll(dice, mode))
}

/// Roll damage; a critical hit doubles the dice but not the modifier
pub fn roll_damage(
    dice: &mut dyn DiceSource,
    notation: &str,
    is_critical: bool,
) -> Result<RollResult, DiceError> {
    let parsed = parse_dice(notation)?;
    let parsed = if is_critical { parsed.doubled() } else { parsed };
    Ok(parsed.roll(dice, RollMode::Normal))
}

/// A d20 roll compared against a target number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// The underlying d20 roll
    pub roll: RollResult,
    /// Armor class or DC that was rolled against
    pub target: i32,
    /// Whether the check succeeded
    pub success: bool,
    /// Natural 20
    pub critical: bool,
    /// Natural 1
    pub fumble: bool,
}

impl CheckResult {
    fn resolve(roll: RollResult, target: i32) -> Self {
        let critical = roll.is_critical;
        let fumble = roll.is_fumble;
        // Critical always succeeds, fumble always fails
        let success = critical || (!fumble && roll.total >= target);

        Self {
            roll,
            target,
            success,
            critical,
            fumble,
        }
    }

    /// Total of the roll including bonus
    pub fn total(&self) -> i32 {
        self.roll.total
    }
}

fn roll_d20_against(dice: &mut dyn DiceSource, bonus: i32, target: i32, mode: RollMode) -> CheckResult {
    CheckResult::resolve(DiceRoll::d20(bonus).roll(dice, mode), target)
}

/// Roll to hit against an armor class
pub fn roll_attack(dice: &mut dyn DiceSource, bonus: i32, target_ac: i32, mode: RollMode) -> CheckResult {
    roll_d20_against(dice, bonus, target_ac, mode)
}

/// Roll a saving throw against a DC
pub fn roll_saving_throw(dice: &mut dyn DiceSource, bonus: i32, dc: i32, mode: RollMode) -> CheckResult {
    roll_d20_against(dice, bonus, dc, mode)
}

/// Roll a skill/ability check against a DC
pub fn roll_skill_check(dice: &mut dyn DiceSource, bonus: i32, dc: i32, mode: RollMode) -> CheckResult {
    roll_d20_against(dice, bonus, dc, mode)
}

/// Roll initiative: d20 + dexterity modifier + bonus
pub fn roll_initiative(dice: &mut dyn DiceSource, dex_modifier: i32, bonus: i32) -> RollResult {
    DiceRoll::d20(dex_modifier + bonus).roll(dice, RollMode::Normal)
}

/// Check if a d20 roll is a natural 20 (critical hit)
pub fn is_critical(roll: u32) -> bool {
    roll == 20
}

/// Check if a d20 roll is a natural 1 (critical fail)
pub fn is_fumble(roll: u32) -> bool {
    roll == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_basic() {
        let roll = parse_dice("2d6").unwrap();
        assert_eq!(roll.count, 2);
        assert_eq!(roll.sides, 6);
        assert_eq!(roll.modifier, 0);
    }

    #[test]
    fn test_parse_with_plus() {
        let roll = parse_dice("1d20+5").unwrap();
        assert_eq!(roll, DiceRoll::new(1, 20, 5));
    }

    #[test]
    fn test_parse_with_minus() {
        let roll = parse_dice("3d8-2").unwrap();
        assert_eq!(roll, DiceRoll::new(3, 8, -2));
    }

    #[test]
    fn test_parse_implicit_one() {
        let roll = parse_dice("d6").unwrap();
        assert_eq!(roll.count, 1);
        assert_eq!(roll.sides, 6);
    }

    #[test]
    fn test_parse_whitespace_and_case() {
        assert_eq!(parse_dice("  2D10 + 3 ").unwrap(), DiceRoll::new(2, 10, 3));
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "abc", "2d", "d", "0d6", "2d0", "2d6+", "1d20-", "-1d6", "2d6+1+1", "101d6", "1d1001"] {
            let err = parse_dice(bad).unwrap_err();
            assert!(
                matches!(err, DiceError::MalformedNotation { .. }),
                "{} should be malformed",
                bad
            );
        }
    }

    #[test]
    fn test_parse_rejects_explicit_signs() {
        for bad in ["+2d6", "2d6++3", "2d6+-3", "2d6--3", "2d+6", "1d20-+2"] {
            assert!(parse_dice(bad).is_err(), "{} should be rejected", bad);
        }
        assert_eq!(parse_dice("2d6-3").unwrap(), DiceRoll::new(2, 6, -3));
    }

    #[test]
    fn test_modifier_bounds() {
        assert_eq!(parse_dice("1d20+1000").unwrap().modifier, MAX_MODIFIER);
        assert_eq!(parse_dice("1d20-1000").unwrap().modifier, -MAX_MODIFIER);
        for bad in ["1d20+1001", "1d20-1001", "1d20+2147483647", "1d20-2147483648"] {
            assert!(parse_dice(bad).is_err(), "{} should be rejected", bad);
        }

        let result = roll(&mut ScriptedDice::new([20]), "1d20+1000", RollMode::Normal).unwrap();
        assert_eq!(result.total, 1020);
    }

    #[test]
    fn test_oversized_roll_saturates() {
        let huge = DiceRoll::new(1, 20, i32::MAX);
        assert_eq!(huge.max(), i32::MAX);
        assert_eq!(huge.roll(&mut ScriptedDice::new([20]), RollMode::Normal).total, i32::MAX);
        assert_eq!(DiceRoll::new(u32::MAX, 1000, 0).max(), i32::MAX);
        assert_eq!(DiceRoll::new(u32::MAX, 6, 0).doubled().count, u32::MAX);
    }

    #[test]
    fn test_min_max_average() {
        let roll = DiceRoll::new(2, 6, 3);
        assert_eq!(roll.min(), 5);
        assert_eq!(roll.max(), 15);
        assert_eq!(roll.average(), 10);
    }

    #[test]
    fn test_display() {
        assert_eq!(DiceRoll::new(2, 6, 0).to_string(), "2d6");
        assert_eq!(DiceRoll::new(1, 20, 5).to_string(), "1d20+5");
        assert_eq!(DiceRoll::new(3, 8, -2).to_string(), "3d8-2");
    }

    #[test]
    fn test_roll_bounds_seeded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let result = roll(&mut rng, "2d6+1", RollMode::Normal).unwrap();
            assert!((3..=13).contains(&result.total), "{} out of range", result.total);
            assert_eq!(result.rolls.len(), 2);
        }
    }

    #[test]
    fn test_advantage_keeps_higher() {
        let mut dice = ScriptedDice::new([4, 17]);
        let result = roll(&mut dice, "1d20+2", RollMode::Advantage).unwrap();
        assert_eq!(result.rolls, vec![4, 17]);
        assert_eq!(result.kept, vec![17]);
        assert_eq!(result.total, 19);
        assert_eq!(result.mode, RollMode::Advantage);
    }

    #[test]
    fn test_disadvantage_keeps_lower() {
        let mut dice = ScriptedDice::new([20, 3]);
        let result = roll(&mut dice, "1d20", RollMode::Disadvantage).unwrap();
        assert_eq!(result.kept, vec![3]);
        assert!(!result.is_critical);
    }

    #[test]
    fn test_mode_ignored_for_other_dice() {
        let mut dice = ScriptedDice::new([2, 5]);
        let result = roll(&mut dice, "2d6", RollMode::Advantage).unwrap();
        assert_eq!(result.mode, RollMode::Normal);
        assert_eq!(result.total, 7);

        let mut dice = ScriptedDice::new([20]);
        let result = roll(&mut dice, "1d20", RollMode::Normal).unwrap();
        assert!(result.is_critical);
        assert_eq!(dice.remaining(), 0);
    }

    #[test]
    fn test_critical_only_on_single_d20() {
        let mut dice = ScriptedDice::new([20, 20]);
        let result = roll(&mut dice, "2d20", RollMode::Normal).unwrap();
        assert!(!result.is_critical);
        assert_eq!(result.natural(), None);
    }

    #[test]
    fn test_critical_damage_doubles_dice_not_modifier() {
        let mut dice = ScriptedDice::new([3, 4, 5, 6]);
        let result = roll_damage(&mut dice, "2d6+3", true).unwrap();
        assert_eq!(result.rolls.len(), 4);
        assert_eq!(result.modifier, 3);
        assert_eq!(result.total, 3 + 4 + 5 + 6 + 3);
        assert_eq!(result.notation, "4d6+3");
    }

    #[test]
    fn test_attack_critical_and_fumble_bypass_ac() {
        let mut dice = ScriptedDice::new([20, 1, 15, 10]);

        let crit = roll_attack(&mut dice, -5, 30, RollMode::Normal);
        assert!(crit.success && crit.critical);

        let fumble = roll_attack(&mut dice, 50, 5, RollMode::Normal);
        assert!(!fumble.success && fumble.fumble);

        let hit = roll_attack(&mut dice, 5, 18, RollMode::Normal);
        assert!(hit.success); // 15 + 5 = 20 >= 18

        let miss = roll_attack(&mut dice, 3, 18, RollMode::Normal);
        assert!(!miss.success); // 10 + 3 = 13 < 18
    }

    #[test]
    fn test_save_meets_dc() {
        let mut dice = ScriptedDice::new([12]);
        let save = roll_saving_throw(&mut dice, 1, 13, RollMode::Normal);
        assert!(save.success);
        assert_eq!(save.total(), 13);

        let mut dice = ScriptedDice::new([11]);
        let check = roll_skill_check(&mut dice, 1, 13, RollMode::Normal);
        assert!(!check.success);
    }

    #[test]
    fn test_initiative() {
        let mut dice = ScriptedDice::new([9]);
        let init = roll_initiative(&mut dice, 3, 2);
        assert_eq!(init.total, 14);
    }

    #[test]
    fn test_roll_mode_combine() {
        assert_eq!(RollMode::Normal.combine(RollMode::Advantage), RollMode::Advantage);
        assert_eq!(RollMode::Advantage.combine(RollMode::Disadvantage), RollMode::Normal);
        assert_eq!(RollMode::Disadvantage.combine(RollMode::Disadvantage), RollMode::Disadvantage);
        assert_eq!(RollMode::from_flags(true, true), RollMode::Normal);
    }

    #[test]
    fn test_scripted_dice_clamps_and_falls_back() {
        let mut dice = ScriptedDice::new([9]);
        assert_eq!(dice.roll_die(6), 6);
        assert_eq!(dice.roll_die(20), 10);
        assert_eq!(dice.roll_die(4), 2);
    }

    #[test]
    fn test_critical_fumble() {
        assert!(is_critical(20));
        assert!(!is_critical(19));
        assert!(is_fumble(1));
        assert!(!is_fumble(2));
    }
}
