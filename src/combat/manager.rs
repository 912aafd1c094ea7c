//! Session registry
//!
//! Holds live combat sessions for the surrounding service. Each session
//! sits behind its own async mutex so one action resolves at a time per
//! fight, while separate fights proceed independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{watch, Mutex as SessionLock, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::action::{Action, ActionOutcome, TurnStart};
use super::participant::Participant;
use super::ruleset::Ruleset;
use super::state::{self, sweep_idle_sessions, CombatError, CombatSession, ZoneContext};
use crate::config::CombatSettings;

/// A session shared between the registry and in-flight calls
pub type SharedSession = Arc<SessionLock<CombatSession>>;

/// Registry of active combat sessions
pub struct CombatManager {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    rules: Arc<Ruleset>,
    rng: Mutex<StdRng>,
    idle_timeout: chrono::Duration,
}

/// Configured idle timeout; anything beyond chrono's range never expires
fn idle_timeout(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl CombatManager {
    /// Create a manager; a configured seed makes every roll reproducible
    pub fn new(rules: Arc<Ruleset>, settings: &CombatSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            sessions: RwLock::new(HashMap::new()),
            rules,
            rng: Mutex::new(rng),
            idle_timeout: idle_timeout(settings.idle_timeout_secs),
        }
    }

    /// Create a shared instance
    pub fn shared(rules: Arc<Ruleset>, settings: &CombatSettings) -> Arc<Self> {
        Arc::new(Self::new(rules, settings))
    }

    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// Roll initiative and register a new session
    pub async fn start_combat(&self, participants: Vec<Participant>, zone: ZoneContext) -> Result<Uuid, CombatError> {
        let session = {
            let mut rng = self.rng.lock();
            state::start_combat(participants, zone, &mut *rng)?
        };
        Ok(self.insert(session).await)
    }

    /// Register an existing session
    pub async fn insert(&self, session: CombatSession) -> Uuid {
        let id = session.id;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(SessionLock::new(session)));
        id
    }

    /// Handle to a live session
    pub async fn session(&self, id: Uuid) -> Result<SharedSession, CombatError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CombatError::UnknownSession(id))
    }

    /// Snapshot of a session
    pub async fn get(&self, id: Uuid) -> Option<CombatSession> {
        let session = self.session(id).await.ok()?;
        let snapshot = session.lock().await.clone();
        Some(snapshot)
    }

    /// Run start-of-turn effects for the current actor
    pub async fn begin_turn(&self, id: Uuid) -> Result<Option<TurnStart>, CombatError> {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        let mut rng = self.rng.lock();
        session.begin_turn(&self.rules, &mut *rng)
    }

    /// Resolve an action in a session
    pub async fn resolve_action(
        &self,
        id: Uuid,
        actor_id: &str,
        action: Action,
    ) -> Result<ActionOutcome, CombatError> {
        let session = self.session(id).await?;
        let mut session = session.lock().await;
        let mut rng = self.rng.lock();
        session.resolve_action(&self.rules, &mut *rng, actor_id, action)
    }

    /// Drop a session from the registry, returning its final state
    pub async fn remove(&self, id: Uuid) -> Option<CombatSession> {
        let session = self.sessions.write().await.remove(&id)?;
        let last = session.lock().await.clone();
        debug!(session = %id, status = %last.status, "combat session removed");
        Some(last)
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Time out sessions idle past the configured limit
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let sessions: Vec<SharedSession> = self.sessions.read().await.values().cloned().collect();
        let mut guards = Vec::with_capacity(sessions.len());
        for session in sessions {
            guards.push(session.lock_owned().await);
        }

        let timed_out = sweep_idle_sessions(guards.iter_mut().map(|g| &mut **g), now, self.idle_timeout);
        for id in &timed_out {
            info!(session = %id, "combat session timed out");
        }
        timed_out
    }
}

/// Run the idle sweep every `every` until shutdown is signalled
pub fn spawn_idle_sweeper(
    manager: Arc<CombatManager>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    manager.sweep_idle(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("idle sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::state::CombatStatus;

    fn settings(idle_timeout_secs: u64) -> CombatSettings {
        CombatSettings {
            seed: Some(7),
            idle_timeout_secs,
            ..Default::default()
        }
    }

    fn manager(idle_timeout_secs: u64) -> Arc<CombatManager> {
        let rules = Arc::new(Ruleset::builtin().unwrap());
        CombatManager::shared(rules, &settings(idle_timeout_secs))
    }

    fn duel() -> CombatSession {
        let participants = vec![
            Participant::player("ayla", "Ayla", 24, 16).with_initiative(10),
            Participant::creature("goblin", "Goblin", 7, 13).with_initiative(5),
        ];
        CombatSession::new(participants, ZoneContext::default()).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_through_manager() {
        let manager = manager(900);
        let id = manager.insert(duel()).await;
        assert_eq!(manager.len().await, 1);

        let outcome = manager.resolve_action(id, "ayla", Action::Pass).await.unwrap();
        assert_eq!(outcome.session_id, id);
        assert_eq!(outcome.next_actor.as_deref(), Some("goblin"));

        let snapshot = manager.get(id).await.unwrap();
        assert_eq!(snapshot.action_log.len(), 1);

        let removed = manager.remove(id).await.unwrap();
        assert_eq!(removed.id, id);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = manager(900);
        let id = Uuid::new_v4();
        let err = manager.resolve_action(id, "ayla", Action::Pass).await.unwrap_err();
        assert_eq!(err, CombatError::UnknownSession(id));
        assert!(manager.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_start_combat_rolls_initiative() {
        let manager = manager(900);
        let participants = vec![
            Participant::player("ayla", "Ayla", 24, 16),
            Participant::creature("goblin", "Goblin", 7, 13),
        ];
        let id = manager.start_combat(participants, ZoneContext::default()).await.unwrap();
        let session = manager.get(id).await.unwrap();
        assert_eq!(session.initiative_order.len(), 2);
        assert!(session
            .participants
            .iter()
            .all(|p| (1..=20).contains(&p.initiative)));
    }

    #[tokio::test]
    async fn test_sweep_idle() {
        let manager = manager(900);
        let idle = manager.insert(duel()).await;

        assert!(manager.sweep_idle(Utc::now()).await.is_empty());

        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(manager.sweep_idle(later).await, vec![idle]);
        assert_eq!(manager.get(idle).await.unwrap().status, CombatStatus::Timeout);

        let err = manager.resolve_action(idle, "ayla", Action::Pass).await.unwrap_err();
        assert_eq!(err, CombatError::NotActive(CombatStatus::Timeout));
    }

    #[tokio::test]
    async fn test_huge_idle_timeout_never_expires() {
        assert_eq!(idle_timeout(900), chrono::Duration::seconds(900));
        assert_eq!(idle_timeout(u64::MAX), chrono::Duration::MAX);

        let manager = manager(u64::MAX);
        manager.insert(duel()).await;
        let much_later = Utc::now() + chrono::Duration::days(365 * 100);
        assert!(manager.sweep_idle(much_later).await.is_empty());
    }

    #[tokio::test]
    async fn test_idle_sweeper_task() {
        let manager = manager(0);
        let id = manager.insert(duel()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_idle_sweeper(manager.clone(), Duration::from_millis(10), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(manager.get(id).await.unwrap().status, CombatStatus::Timeout);
    }
}
