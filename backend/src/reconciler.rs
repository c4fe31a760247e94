use std::{sync::Arc, time::Duration};

use newsroom_shared::{
    datastore::Datastore,
    publication::{reconcile_scheduled, ReconcileOutcome},
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::config::ReconcilerConfig;

/// Owned handle of the scheduled-publication loop.
///
/// Dropping the handle stops the loop after the current pass; `shutdown`
/// also waits for it.
pub struct ReconcilerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            tracing::error!("publication reconciler task ended abnormally: {err}");
        }
    }
}

/// Runs one pass immediately, then one per `config.interval`. Passes never
/// overlap: ticks that fall due while a pass is running are skipped.
pub fn spawn_publication_reconciler(
    datastore: Arc<dyn Datastore>,
    config: ReconcilerConfig,
) -> ReconcilerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        tracing::info!(
            "publication reconciler started: path={} interval={}s",
            config.articles_path,
            config.interval.as_secs()
        );
        let mut ticker = interval(config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                },
                _ = ticker.tick() => {
                    run_once(datastore.as_ref(), &config.articles_path).await;
                },
            }
        }
        tracing::info!("publication reconciler stopped");
    });

    ReconcilerHandle {
        shutdown_tx,
        task,
    }
}

/// One reconciliation pass. Failures are logged and left for the next tick.
pub async fn run_once(datastore: &dyn Datastore, articles_path: &str) -> Option<ReconcileOutcome> {
    match reconcile_scheduled(datastore, articles_path, chrono::Utc::now()).await {
        Ok(outcome) => {
            if outcome.published > 0 {
                tracing::info!(
                    "published {} scheduled articles ({} scheduled scanned)",
                    outcome.published,
                    outcome.scanned
                );
            } else {
                tracing::debug!("no scheduled articles due ({} scanned)", outcome.scanned);
            }
            Some(outcome)
        },
        Err(err) => {
            tracing::error!("scheduled publication pass failed: {err}");
            None
        },
    }
}
