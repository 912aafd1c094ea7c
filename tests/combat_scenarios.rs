//! End-to-end combat flows through the public session API

mod common;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use skirmish::combat::action::LogEvent;
use skirmish::combat::effects::{apply_status_effect, has_effect, ApplyOptions};
use skirmish::combat::{Action, ActionResult, CombatError, CombatStatus, ScriptedDice};
use skirmish::{Config, Engine};

#[test]
fn test_victory_ends_the_fight() {
    let rules = common::rules();
    let mut session = common::session(vec![
        common::fighter("ayla", 10),
        common::goblin("goblin_1", 8),
        common::goblin("goblin_2", 5),
    ]);
    for id in ["goblin_1", "goblin_2"] {
        session.participant_mut(id).unwrap().hp.current = 0;
    }

    assert_eq!(session.check_combat_end(), Some(CombatStatus::Victory));
    assert!(session.ended_at.is_some());
    assert!(session.current_actor().is_none());

    let mut dice = ScriptedDice::default();
    let err = session
        .resolve_action(&rules, &mut dice, "ayla", Action::Pass)
        .unwrap_err();
    assert_eq!(err, CombatError::NotActive(CombatStatus::Victory));
}

#[test]
fn test_defeat_when_no_player_stands() {
    let rules = common::rules();
    let mut session = common::session(vec![common::goblin("goblin", 12), common::fighter("ayla", 3)]);
    session.participant_mut("ayla").unwrap().hp.current = 1;

    // 15 + 4 hits AC 16, 6 + 2 damage
    let mut dice = ScriptedDice::new([15, 6]);
    let outcome = session
        .resolve_action(&rules, &mut dice, "goblin", Action::Attack { target: "ayla".to_string() })
        .unwrap();

    assert_eq!(outcome.defeated, vec!["ayla".to_string()]);
    assert_eq!(outcome.status, CombatStatus::Defeat);
    assert!(outcome.loot.is_empty());
}

#[test]
fn test_fallen_participants_never_get_a_turn() {
    let rules = common::rules();
    let mut session = common::session(vec![
        common::fighter("ayla", 15),
        common::monk("sen", 12),
        common::goblin("goblin", 10),
    ]);
    session.participant_mut("sen").unwrap().hp.current = 0;
    let mut dice = ScriptedDice::default();

    let mut seen = Vec::new();
    for _ in 0..6 {
        let actor = session.current_actor().unwrap().id.clone();
        seen.push(actor.clone());
        session.resolve_action(&rules, &mut dice, &actor, Action::Pass).unwrap();
    }

    assert_eq!(seen, vec!["ayla", "goblin", "ayla", "goblin", "ayla", "goblin"]);
    assert_eq!(session.round, 4);
}

#[test]
fn test_poison_runs_its_course() {
    let rules = common::rules();
    let mut session = common::session(vec![common::fighter("ayla", 10), common::goblin("goblin", 5)]);
    let poisoned = rules.effects.lookup("poisoned").unwrap();
    apply_status_effect(
        session.participant_mut("ayla").unwrap(),
        &rules.effects,
        poisoned,
        ApplyOptions::new(2),
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..2 {
        session.resolve_action(&rules, &mut rng, "ayla", Action::Pass).unwrap();
        session.resolve_action(&rules, &mut rng, "goblin", Action::Pass).unwrap();
    }

    let ayla = session.participant("ayla").unwrap();
    assert!(!has_effect(ayla, poisoned));
    let lost = ayla.hp.max - ayla.hp.current;
    assert!((2..=8).contains(&lost), "lost {}", lost);

    let ticks = session
        .action_log
        .iter()
        .filter(|e| matches!(e.event, LogEvent::EffectTick(_)))
        .count();
    assert_eq!(ticks, 2);
    assert!(session
        .action_log
        .iter()
        .any(|e| e.event == LogEvent::EffectExpired { effect: "Poisoned".to_string() }));
}

#[test]
fn test_stunning_strike_resisted() {
    let rules = common::rules();
    let mut session = common::session(vec![common::monk("sen", 10), common::goblin("goblin", 5)]);

    // Goblin rolls exactly the DC
    let mut dice = ScriptedDice::new([14]);
    let outcome = session
        .resolve_action(
            &rules,
            &mut dice,
            "sen",
            Action::UseAbility {
                ability: "stunning_strike".to_string(),
                target: Some("goblin".to_string()),
            },
        )
        .unwrap();

    let ActionResult::Ability(result) = &outcome.result else {
        panic!("expected an ability result");
    };
    assert!(result.resisted);
    assert_eq!(result.save.as_ref().map(|s| s.target), Some(14));
    assert!(outcome.effects_applied.is_empty());
    assert!(session.participant("goblin").unwrap().effects.is_empty());
    assert_eq!(session.participant("sen").unwrap().resource("ki"), 1);
}

#[test]
fn test_stunning_strike_lands_for_one_round() {
    let rules = common::rules();
    let mut session = common::session(vec![common::monk("sen", 10), common::goblin("goblin", 5)]);
    let stunned = rules.effects.lookup("stunned").unwrap();

    let mut dice = ScriptedDice::new([13]);
    let outcome = session
        .resolve_action(
            &rules,
            &mut dice,
            "sen",
            Action::UseAbility {
                ability: "stunning_strike".to_string(),
                target: Some("goblin".to_string()),
            },
        )
        .unwrap();
    assert_eq!(outcome.effects_applied.len(), 1);
    assert_eq!(outcome.effects_applied[0].effect, "stunned");

    let goblin = session.participant("goblin").unwrap();
    assert_eq!(goblin.effects[0].duration, 1);
    assert!(has_effect(goblin, stunned));

    let err = session
        .resolve_action(&rules, &mut dice, "goblin", Action::Attack { target: "sen".to_string() })
        .unwrap_err();
    assert!(matches!(err, CombatError::CannotAct { .. }));

    let outcome = session.resolve_action(&rules, &mut dice, "goblin", Action::Pass).unwrap();
    let round_end = outcome.round_end.unwrap();
    assert_eq!(round_end.expired, vec![("goblin".to_string(), "Stunned".to_string())]);
    assert!(session.participant("goblin").unwrap().effects.is_empty());
}

#[test]
fn test_immunity_zeroes_damage() {
    let rules = common::rules();
    let wizard = skirmish::combat::Participant::player("vex", "Vex", 18, 12)
        .with_class("wizard", 1)
        .with_initiative(10);
    let mut salamander = common::goblin("salamander", 5);
    salamander.name = "Salamander".to_string();
    salamander
        .damage_profile
        .set(skirmish::combat::DamageType::Fire, skirmish::combat::DamageModifier::Immune);
    let mut session = common::session(vec![wizard, salamander]);

    let mut dice = ScriptedDice::new([10]);
    let outcome = session
        .resolve_action(
            &rules,
            &mut dice,
            "vex",
            Action::Cast {
                ability: "fire_bolt".to_string(),
                target: Some("salamander".to_string()),
            },
        )
        .unwrap();

    let ActionResult::Ability(result) = &outcome.result else {
        panic!("expected an ability result");
    };
    let damage = result.damage.as_ref().unwrap();
    assert!(damage.immune);
    assert_eq!(damage.raw_damage, 10);
    assert_eq!(damage.final_damage, 0);
    assert_eq!(session.participant("salamander").unwrap().hp.current, 7);
}

#[test]
fn test_session_survives_serialization() {
    let rules = common::rules();
    let mut session = common::session(vec![common::fighter("ayla", 10), common::goblin("goblin", 5)]);
    let mut dice = ScriptedDice::new([3]);
    session
        .resolve_action(&rules, &mut dice, "ayla", Action::Attack { target: "goblin".to_string() })
        .unwrap();

    let json = serde_json::to_string(&session).unwrap();
    let restored: skirmish::combat::CombatSession = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, session);
    assert_eq!(restored.current_actor().unwrap().id, "goblin");
}

#[tokio::test]
async fn test_engine_lifecycle() {
    let engine = Arc::new(Engine::new(Config::default()).unwrap());
    let id = engine
        .manager()
        .insert(common::session(vec![common::fighter("ayla", 10), common::goblin("goblin", 5)]))
        .await;

    let outcome = engine
        .manager()
        .resolve_action(id, "ayla", Action::Defend)
        .await
        .unwrap();
    assert_eq!(outcome.next_actor.as_deref(), Some("goblin"));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };
    engine.shutdown();
    runner.await.unwrap().unwrap();
}
