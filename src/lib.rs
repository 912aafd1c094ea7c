//! skirmish - turn-based d20 combat resolver
//!
//! Embeddable combat engine for game services: initiative, rounds, dice,
//! status effects and class abilities, with a session registry for hosts
//! that run many fights at once.

pub mod combat;
pub mod config;
pub mod scenario;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use combat::{spawn_idle_sweeper, CombatManager, Ruleset};
pub use config::Config;

/// A configured combat engine
pub struct Engine {
    config: Config,
    manager: Arc<CombatManager>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    /// Load catalogs and create the session registry
    pub fn new(config: Config) -> Result<Self> {
        let rules = config.ruleset().context("failed to load combat catalogs")?;
        let manager = CombatManager::shared(Arc::new(rules), &config.combat);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            manager,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the session registry
    pub fn manager(&self) -> Arc<CombatManager> {
        self.manager.clone()
    }

    pub fn rules(&self) -> &Ruleset {
        self.manager.rules()
    }

    /// Run background maintenance until shutdown
    pub async fn run(&self) -> Result<()> {
        let every = Duration::from_secs(self.config.combat.sweep_interval_secs.max(1));
        let sweeper = spawn_idle_sweeper(self.manager.clone(), every, self.shutdown_rx.clone());
        info!(interval_secs = every.as_secs(), "idle sweeper running");

        sweeper.await.context("idle sweeper panicked")?;
        info!("skirmish shutdown complete");
        Ok(())
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
