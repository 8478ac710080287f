//! Periodic driver for the dispatcher
//!
//! Every tick the worker applies due quota resets and then runs one dispatch
//! cycle. Storage errors back off and retry; invariant violations stop the
//! loop. Progress is published on a broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use super::dispatcher::{CycleReport, Dispatcher};
use crate::error::Result;
use crate::models::ProjectId;
use crate::quota::QuotaLedger;

/// Poll loop timing
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(30),
        }
    }
}

/// Events emitted by the worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Stranded `uploading` rows were returned to the retry loop at startup
    Recovered { count: usize },

    /// Daily quota windows rolled over
    QuotaReset {
        projects: Vec<ProjectId>,
        at: DateTime<Utc>,
    },

    CycleCompleted(CycleReport),

    /// A cycle aborted; the loop backs off and tries again
    CycleFailed { error: String },

    Stopped,
}

/// Runs dispatch cycles until stopped
pub struct Worker {
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<QuotaLedger>,
    config: WorkerConfig,
    event_sender: broadcast::Sender<WorkerEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<QuotaLedger>,
        config: WorkerConfig,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dispatcher,
            ledger,
            config,
            event_sender,
            shutdown_tx,
        }
    }

    /// Subscribe to worker events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_sender.subscribe()
    }

    /// Ask the loop to exit after the current cycle
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// One tick: resets first, then a dispatch cycle
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let reset = self.ledger.reset_due(now)?;
        if !reset.is_empty() {
            let _ = self.event_sender.send(WorkerEvent::QuotaReset {
                projects: reset,
                at: now,
            });
        }

        let report = self.dispatcher.run_cycle(now).await?;
        let _ = self
            .event_sender
            .send(WorkerEvent::CycleCompleted(report.clone()));
        Ok(report)
    }

    /// Run until [`Worker::stop`] is called or an invariant violation occurs
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();

        let recovered = self.dispatcher.recover_interrupted(Utc::now())?;
        if recovered > 0 {
            let _ = self
                .event_sender
                .send(WorkerEvent::Recovered { count: recovered });
        }

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Upload worker started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.tick(Utc::now()).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Invariant violated, stopping worker");
                    let _ = self.event_sender.send(WorkerEvent::CycleFailed {
                        error: e.to_string(),
                    });
                    let _ = self.event_sender.send(WorkerEvent::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        backoff_secs = self.config.error_backoff.as_secs(),
                        "Dispatch cycle aborted, backing off"
                    );
                    let _ = self.event_sender.send(WorkerEvent::CycleFailed {
                        error: e.to_string(),
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Upload worker stopped");
        let _ = self.event_sender.send(WorkerEvent::Stopped);
        Ok(())
    }
}
