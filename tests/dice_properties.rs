//! Property-based tests for dice, damage and effect stacking
//!
//! Tests invariants:
//! - Totals stay within [N+K, N*M+K]
//! - Advantage never rolls below disadvantage on the same draws
//! - Critical damage doubles the dice, not the modifier
//! - Immunity always zeroes damage
//! - Stacks never exceed the cap; refreshes keep the longer duration

mod common;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use skirmish::combat::damage::{DamageModifier, DamageType};
use skirmish::combat::dice::{parse_dice, roll, roll_damage, RollMode, ScriptedDice};
use skirmish::combat::effects::{apply_damage_resistances, apply_status_effect, find_effect, ApplyOptions};
use skirmish::combat::Participant;

fn arb_damage_type() -> impl Strategy<Value = DamageType> {
    prop::sample::select(DamageType::all().to_vec())
}

fn notation(count: u32, sides: u32, modifier: i32) -> String {
    match modifier {
        0 => format!("{}d{}", count, sides),
        m if m > 0 => format!("{}d{}+{}", count, sides, m),
        m => format!("{}d{}{}", count, sides, m),
    }
}

proptest! {
    #[test]
    fn prop_total_within_bounds(
        count in 1u32..=20,
        sides in 1u32..=100,
        modifier in -20i32..=20,
        seed in any::<u64>(),
    ) {
        let text = notation(count, sides, modifier);
        let parsed = parse_dice(&text).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let result = roll(&mut rng, &text, RollMode::Normal).unwrap();

        prop_assert!(result.total >= parsed.min());
        prop_assert!(result.total <= parsed.max());
        prop_assert_eq!(result.rolls.len(), count as usize);
        prop_assert_eq!(parsed.min(), count as i32 + modifier);
        prop_assert_eq!(parsed.max(), (count * sides) as i32 + modifier);
    }

    #[test]
    fn prop_advantage_at_least_disadvantage(a in 1u32..=20, b in 1u32..=20, bonus in -5i32..=10) {
        let text = notation(1, 20, bonus);
        let high = roll(&mut ScriptedDice::new([a, b]), &text, RollMode::Advantage).unwrap();
        let low = roll(&mut ScriptedDice::new([a, b]), &text, RollMode::Disadvantage).unwrap();

        prop_assert!(high.total >= low.total);
        prop_assert_eq!(high.kept, vec![a.max(b)]);
        prop_assert_eq!(low.kept, vec![a.min(b)]);
        prop_assert_eq!(high.is_critical, a.max(b) == 20);
        prop_assert_eq!(low.is_fumble, a.min(b) == 1);
    }

    #[test]
    fn prop_critical_doubles_dice_only(count in 1u32..=10, sides in 2u32..=12, modifier in 0i32..=10) {
        let text = notation(count, sides, modifier);
        let normal = roll_damage(&mut ScriptedDice::default(), &text, false).unwrap();
        let critical = roll_damage(&mut ScriptedDice::default(), &text, true).unwrap();

        prop_assert_eq!(critical.rolls.len(), 2 * normal.rolls.len());
        prop_assert_eq!(critical.modifier, normal.modifier);
        prop_assert_eq!(critical.total - modifier, 2 * (normal.total - modifier));
    }

    #[test]
    fn prop_immunity_zeroes_damage(raw in 0i32..=1000, dtype in arb_damage_type(), resisted in any::<bool>()) {
        let rules = common::rules();
        let mut target = Participant::creature("imp", "Imp", 30, 13);
        target.damage_profile.set(dtype, DamageModifier::Immune);
        if resisted {
            // Effect tags never outweigh an innate immunity
            let stoneskin = rules.effects.lookup("stoneskin").unwrap();
            apply_status_effect(&mut target, &rules.effects, stoneskin, ApplyOptions::new(3)).unwrap();
        }
        let result = apply_damage_resistances(&target, &rules.effects, dtype, raw);

        prop_assert!(result.immune);
        prop_assert_eq!(result.final_damage, 0);
    }

    #[test]
    fn prop_stacks_never_exceed_cap(applications in 1usize..=10, duration in 1u32..=5) {
        let rules = common::rules();
        let burning = rules.effects.lookup("burning").unwrap();
        let cap = rules.effects.get(burning).unwrap().stack_cap();
        let mut target = Participant::creature("troll", "Troll", 80, 15);

        for _ in 0..applications {
            apply_status_effect(&mut target, &rules.effects, burning, ApplyOptions::new(duration)).unwrap();
        }

        let instance = find_effect(&target, burning).unwrap();
        prop_assert_eq!(target.effects.len(), 1);
        prop_assert_eq!(instance.stacks, (applications as u32).min(cap));
    }

    #[test]
    fn prop_refresh_keeps_longer_duration(first in 1u32..=10, second in 1u32..=10) {
        let rules = common::rules();
        let blessed = rules.effects.lookup("blessed").unwrap();
        let mut target = Participant::player("ayla", "Ayla", 20, 15);

        apply_status_effect(&mut target, &rules.effects, blessed, ApplyOptions::new(first)).unwrap();
        apply_status_effect(&mut target, &rules.effects, blessed, ApplyOptions::new(second)).unwrap();

        prop_assert_eq!(target.effects.len(), 1);
        prop_assert_eq!(find_effect(&target, blessed).unwrap().duration, first.max(second));
    }
}
