//! Periodic and signal triggered background work.

use std::{sync::Arc, time::Duration};

use tokio::time::{self, MissedTickBehavior};

use crate::daemon::irrdserver::IrrdServer;

//------------ Scheduler -----------------------------------------------------

/// Runs journal expiry and reloads the configuration on SIGHUP.
///
/// Importers run their own loops and are not driven from here.
pub struct Scheduler {
    irrd: Arc<IrrdServer>,
    expiry_interval: Duration,
}

impl Scheduler {
    pub fn build(irrd: Arc<IrrdServer>) -> Self {
        let expiry_interval = irrd.config.journal_expiry_interval();
        Scheduler { irrd, expiry_interval }
    }

    /// Runs until the process ends.
    pub async fn run(self) {
        tokio::select! {
            _ = self.expire_journals() => {}
            _ = self.reload_on_hangup() => {}
        }
    }

    async fn expire_journals(&self) {
        let mut interval = time::interval(self.expiry_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            debug!("Expiring old journal entries");
            self.irrd.expire_journals().await;
        }
    }

    #[cfg(unix)]
    async fn reload_on_hangup(&self) {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("Cannot listen for SIGHUP, configuration reload by signal disabled: {e}");
                return std::future::pending().await;
            }
        };
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading configuration");
            if let Err(e) = self.irrd.reload_config() {
                error!("Could not reload configuration: {e}");
            }
        }
    }

    #[cfg(not(unix))]
    async fn reload_on_hangup(&self) {
        std::future::pending().await
    }
}
