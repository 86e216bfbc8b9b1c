//! Persistence seams of the submission pipeline and the builder.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use form_spec::{
    Answer, BlockId, ConfigOverlay, FormConfig, FormTemplate, HistoryError, RejectedAnswer,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("form '{0}' not found")]
    FormNotFound(String),
    #[error("review {0} not found")]
    ReviewNotFound(Uuid),
    #[error("review {0} is already finalized")]
    ReviewFinalized(Uuid),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether replaying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// A form with the configuration respondents currently get.
#[derive(Debug, Clone)]
pub struct FormRecord {
    pub form_id: String,
    pub template: Arc<FormTemplate>,
    pub config: FormConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub form_id: String,
    pub product_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<u32>,
    pub session_id: String,
    pub config_version: u32,
}

/// Answers to write and blocks whose stored answers must go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerBatch {
    pub answers: Vec<Answer>,
    pub retracted: Vec<BlockId>,
}

impl AnswerBatch {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty() && self.retracted.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Answers held by the review after the write.
    pub stored: usize,
    /// Stored answers removed by the write.
    pub retracted: usize,
    /// Answers the backend refused under the review's configuration.
    pub rejected: Vec<RejectedAnswer>,
}

#[async_trait]
pub trait FormBackend: Send + Sync {
    async fn get_form(&self, form_id: &str) -> Result<FormRecord, BackendError>;

    async fn create_review(&self, review: NewReview) -> Result<Uuid, BackendError>;

    /// Idempotent per (review, block).
    async fn upsert_answers(
        &self,
        review_id: Uuid,
        batch: AnswerBatch,
    ) -> Result<UpsertOutcome, BackendError>;

    async fn finalize_review(&self, review_id: Uuid) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ConfigBackend: Send + Sync {
    async fn save_config_draft(
        &self,
        form_id: &str,
        overlay: ConfigOverlay,
    ) -> Result<(), BackendError>;

    /// Returns the new version number.
    async fn publish_config(&self, form_id: &str) -> Result<u32, BackendError>;

    async fn config_version(&self, form_id: &str, version: u32)
    -> Result<FormConfig, BackendError>;
}
