use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::{TriggerSource, parse_user_id};
use crate::pipeline::DigestOrchestrator;

/// Drains a [`TriggerSource`] strictly one trigger at a time.
pub struct TriggerLoop<S> {
    source: S,
    orchestrator: Arc<DigestOrchestrator>,
}

impl<S: TriggerSource> TriggerLoop<S> {
    pub fn new(source: S, orchestrator: Arc<DigestOrchestrator>) -> Self {
        Self {
            source,
            orchestrator,
        }
    }

    /// Runs until the source is exhausted, `shutdown` resolves while waiting
    /// for the next trigger, or any step fails.
    ///
    /// Returns the number of triggers fully processed.
    ///
    /// # Errors
    /// The first broker, payload, store or cache error ends the loop and is
    /// returned to the caller.
    pub async fn run<F>(mut self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut processed: u64 = 0;

        info!(
            strategy = self.orchestrator.strategy_name(),
            limit = self.orchestrator.limit(),
            "trigger loop started"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(processed, "shutdown requested, leaving trigger loop");
                    return Ok(processed);
                }
                next = self.source.next_trigger() => next,
            };

            let Some(payload) = next.context("failed to receive trigger")? else {
                info!(processed, "trigger source exhausted");
                return Ok(processed);
            };
            debug!(payload = %payload, "trigger received");

            let user_id = parse_user_id(&payload).inspect_err(|err| {
                error!(error = %err, "malformed trigger payload");
            })?;

            if let Err(err) = self.orchestrator.compose(user_id).await {
                error!(user_id, error = ?err, "digest composition failed");
                return Err(err);
            }
            processed += 1;
        }
    }
}
