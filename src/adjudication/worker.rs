//! Background adjudication worker
//!
//! Drains the justification queue: claims a job with an atomic conditional
//! update, runs the committee, reconciles, and gates the calibration-progress
//! increment. `done` and `failed` are terminal; retry policy, if any, lives
//! in the external scheduler.

use crate::adjudication::{Adjudicator, Committee};
use crate::config::AdjudicationConfig;
use crate::error::Result;
use crate::services::ChatProvider;
use crate::storage::Store;
use crate::types::{JustificationId, JustificationState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Queue worker for justification adjudication
pub struct AdjudicationWorker {
    store: Arc<dyn Store>,
    committee: Committee,
    adjudicator: Adjudicator,
}

impl AdjudicationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ChatProvider>,
        config: AdjudicationConfig,
    ) -> Self {
        Self {
            store,
            committee: Committee::new(provider, config.committee_size),
            adjudicator: Adjudicator::new(config),
        }
    }

    /// Claim and process the oldest queued justification
    ///
    /// Returns the processed id, or `None` when the queue is empty or another
    /// worker won the claim. Processing failures terminate the job as
    /// `failed` with a recorded reason; they are not errors of the worker
    /// itself.
    pub async fn process_next(&self) -> Result<Option<JustificationId>> {
        let Some(id) = self.store.next_queued_justification().await? else {
            return Ok(None);
        };

        // Atomic claim: at most one concurrent worker proceeds past here
        // for a given queue entry.
        if !self.store.claim_justification(id).await? {
            debug!("Lost claim race for justification {}", id);
            return Ok(None);
        }

        match self.process_claimed(id).await {
            Ok(()) => {
                self.store
                    .set_justification_state(id, JustificationState::Done)
                    .await?;
                info!("Adjudication done for justification {}", id);
            }
            Err(e) => {
                // Ratings already inserted stay valid; only the job fails.
                warn!("Adjudication failed for justification {}: {}", id, e);
                self.store
                    .set_justification_state(
                        id,
                        JustificationState::Failed {
                            reason: e.to_string(),
                        },
                    )
                    .await?;
            }
        }

        Ok(Some(id))
    }

    /// Run every queued justification to a terminal state
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    async fn process_claimed(&self, id: JustificationId) -> Result<()> {
        let justification = self.store.get_justification(id).await?;

        let ratings = self.committee.rate(&justification).await?;
        for rating in &ratings {
            self.store.insert_rating(rating).await?;
        }

        // Reconciliation enforces the rating quorum; a short committee
        // fails the job here while its partial ratings stay on record.
        let adjudication = self.adjudicator.reconcile(&ratings)?;
        self.store.insert_adjudication(&adjudication).await?;

        if adjudication.passed_gate {
            self.store
                .add_calibration_progress(
                    justification.user,
                    self.adjudicator.progress_increment(),
                )
                .await?;
            debug!(
                "Calibration progress incremented for user {} (agreement {:.2}, jqs {:.2})",
                justification.user, adjudication.agreement_score, adjudication.jqs
            );
        } else {
            info!(
                "Justification {} flagged for review (agreement {:.2}, jqs {:.2})",
                id, adjudication.agreement_score, adjudication.jqs
            );
        }

        Ok(())
    }
}
