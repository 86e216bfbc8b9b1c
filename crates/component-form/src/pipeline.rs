//! Turns step batches into backend writes for one review.
//!
//! Saves of a pipeline are serialized: a save waits for the one in flight to
//! finish or fail, in arrival order. Local state only moves forward once the
//! backend acknowledged a write, so a failed save can be replayed as is.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use form_spec::{Answer, AnswerCollector, BlockId, CollectError, RejectedAnswer, StepBatch};

use crate::backend::{AnswerBatch, BackendError, FormBackend, NewReview};
use crate::config::{IntegrityError, RuntimeConfig};
use crate::session::{SessionStore, ensure_session};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("review is already finalized")]
    Finalized,
}

/// Who the review is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTarget {
    pub form_id: String,
    pub product_id: u32,
    pub button_id: Option<u32>,
}

/// What one save sent and what came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub review_id: Uuid,
    pub step_index: usize,
    pub upserted: usize,
    pub retracted: Vec<BlockId>,
    pub rejected: Vec<RejectedAnswer>,
}

/// Result of [`SubmissionPipeline::continue_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Saved; the collector moved on to this step.
    Advanced(SaveReceipt, usize),
    /// The last step was saved and the review finalized.
    Finalized(SaveReceipt),
}

#[derive(Debug, Default)]
struct PipelineState {
    review_id: Option<Uuid>,
    /// Answers the backend holds, per block.
    acknowledged: BTreeMap<BlockId, Vec<Answer>>,
    saved_steps: BTreeSet<usize>,
    finalized: bool,
}

pub struct SubmissionPipeline {
    backend: Arc<dyn FormBackend>,
    session: Arc<dyn SessionStore>,
    target: ReviewTarget,
    state: Mutex<PipelineState>,
}

impl SubmissionPipeline {
    pub fn new(
        backend: Arc<dyn FormBackend>,
        session: Arc<dyn SessionStore>,
        target: ReviewTarget,
    ) -> Self {
        Self {
            backend,
            session,
            target,
            state: Mutex::new(PipelineState::default()),
        }
    }

    pub async fn review_id(&self) -> Option<Uuid> {
        self.state.lock().await.review_id
    }

    pub async fn is_step_saved(&self, step_index: usize) -> bool {
        self.state.lock().await.saved_steps.contains(&step_index)
    }

    pub async fn is_finalized(&self) -> bool {
        self.state.lock().await.finalized
    }

    /// Persists a step, creating the review on the first save.
    pub async fn save_step(&self, batch: &StepBatch) -> Result<SaveReceipt, PipelineError> {
        let mut state = self.state.lock().await;
        self.save_locked(&mut state, batch).await
    }

    /// Saves the last step, finalizes the review and forgets the session.
    pub async fn finalize(&self, batch: &StepBatch) -> Result<SaveReceipt, PipelineError> {
        let mut state = self.state.lock().await;
        let receipt = self.save_locked(&mut state, batch).await?;
        self.backend.finalize_review(receipt.review_id).await?;
        state.finalized = true;
        self.session.clear().await;
        tracing::info!(review = %receipt.review_id, "submission finalized");
        Ok(receipt)
    }

    /// Validates the collector's current step, saves it and moves on, or
    /// finalizes when it is the last visible step.
    ///
    /// The collector stays borrowed until the backend answers. Callers that
    /// render the next step while the save is in flight take a
    /// `form_batch`, advance the collector and await `save_step` on their
    /// own.
    pub async fn continue_step(
        &self,
        collector: &mut AnswerCollector,
    ) -> Result<StepOutcome, PipelineError> {
        let step_index = collector.current_step();
        let validation = collector.validate_step(step_index);
        if !validation.valid {
            return Err(CollectError::StepIncomplete {
                step: step_index,
                missing: validation.missing_required,
            }
            .into());
        }

        let batch = collector.form_batch(step_index);
        if collector.is_last_step() {
            let receipt = self.finalize(&batch).await?;
            collector.mark_submitted(step_index);
            return Ok(StepOutcome::Finalized(receipt));
        }

        let receipt = self.save_step(&batch).await?;
        collector.mark_submitted(step_index);
        let next = collector.advance()?.unwrap_or(step_index);
        Ok(StepOutcome::Advanced(receipt, next))
    }

    async fn save_locked(
        &self,
        state: &mut PipelineState,
        batch: &StepBatch,
    ) -> Result<SaveReceipt, PipelineError> {
        if state.finalized {
            return Err(PipelineError::Finalized);
        }

        let review_id = match state.review_id {
            Some(id) => id,
            None => {
                let session_id = ensure_session(self.session.as_ref()).await;
                let id = self
                    .backend
                    .create_review(NewReview {
                        form_id: self.target.form_id.clone(),
                        product_id: self.target.product_id,
                        button_id: self.target.button_id,
                        session_id,
                        config_version: batch.config_version,
                    })
                    .await?;
                state.review_id = Some(id);
                id
            }
        };

        let mut by_block: BTreeMap<BlockId, Vec<Answer>> = BTreeMap::new();
        for answer in &batch.answers {
            by_block
                .entry(answer.block_id)
                .or_default()
                .push(answer.clone());
        }
        let changed: BTreeMap<BlockId, Vec<Answer>> = by_block
            .into_iter()
            .filter(|(block, answers)| state.acknowledged.get(block) != Some(answers))
            .collect();
        let retracted: Vec<BlockId> = batch
            .cleared_blocks
            .iter()
            .copied()
            .filter(|block| state.acknowledged.contains_key(block))
            .collect();

        let upload = AnswerBatch {
            answers: changed.values().flatten().cloned().collect(),
            retracted: retracted.clone(),
        };
        let upserted = upload.answers.len();
        let rejected = if upload.is_empty() {
            Vec::new()
        } else {
            self.backend.upsert_answers(review_id, upload).await?.rejected
        };

        for (block, mut answers) in changed {
            answers.retain(|answer| !rejected.iter().any(|r| &r.answer == answer));
            if answers.is_empty() {
                state.acknowledged.remove(&block);
            } else {
                state.acknowledged.insert(block, answers);
            }
        }
        for block in &retracted {
            state.acknowledged.remove(block);
        }
        state.saved_steps.insert(batch.step_index);
        tracing::debug!(
            review = %review_id,
            step = batch.step_index,
            upserted,
            retracted = retracted.len(),
            "step saved"
        );

        Ok(SaveReceipt {
            review_id,
            step_index: batch.step_index,
            upserted,
            retracted,
            rejected,
        })
    }
}

/// Loads a form and resolves it with its active configuration.
pub async fn open_form(
    backend: &dyn FormBackend,
    form_id: &str,
    runtime: &RuntimeConfig,
) -> Result<AnswerCollector, PipelineError> {
    let record = backend.get_form(form_id).await?;
    let form = runtime.resolve(record.template, Arc::new(record.config))?;
    Ok(AnswerCollector::new(form))
}
