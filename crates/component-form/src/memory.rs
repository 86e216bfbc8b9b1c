use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use form_spec::{
    ConfigHistory, ConfigOverlay, FormConfig, FormTemplate, ParentLink, ResolvedForm, Review,
    ReviewStatus, validate_answers,
};

use crate::backend::{
    AnswerBatch, BackendError, ConfigBackend, FormBackend, FormRecord, NewReview, UpsertOutcome,
};

#[derive(Debug, Clone)]
struct StoredForm {
    template: Arc<FormTemplate>,
    history: ConfigHistory,
}

/// Process-local backend holding forms, configuration histories and reviews.
///
/// Every write re-validates the merged answers of a review against the
/// configuration version the review was opened under.
pub struct InMemoryBackend {
    forms: RwLock<HashMap<String, StoredForm>>,
    reviews: RwLock<HashMap<Uuid, Review>>,
    linkage: Arc<dyn ParentLink>,
}

impl InMemoryBackend {
    pub fn new(linkage: Arc<dyn ParentLink>) -> Self {
        Self {
            forms: RwLock::new(HashMap::new()),
            reviews: RwLock::new(HashMap::new()),
            linkage,
        }
    }

    pub async fn insert_form(&self, form_id: impl Into<String>, template: FormTemplate) {
        self.insert_form_with_history(form_id, template, ConfigHistory::default())
            .await;
    }

    pub async fn insert_form_with_history(
        &self,
        form_id: impl Into<String>,
        template: FormTemplate,
        history: ConfigHistory,
    ) {
        self.forms.write().await.insert(
            form_id.into(),
            StoredForm {
                template: Arc::new(template),
                history,
            },
        );
    }

    pub async fn review(&self, review_id: Uuid) -> Option<Review> {
        self.reviews.read().await.get(&review_id).cloned()
    }

    pub async fn history(&self, form_id: &str) -> Option<ConfigHistory> {
        self.forms
            .read()
            .await
            .get(form_id)
            .map(|form| form.history.clone())
    }
}

#[async_trait]
impl FormBackend for InMemoryBackend {
    async fn get_form(&self, form_id: &str) -> Result<FormRecord, BackendError> {
        let forms = self.forms.read().await;
        let form = forms
            .get(form_id)
            .ok_or_else(|| BackendError::FormNotFound(form_id.to_string()))?;
        Ok(FormRecord {
            form_id: form_id.to_string(),
            template: Arc::clone(&form.template),
            config: form.history.active(),
        })
    }

    async fn create_review(&self, review: NewReview) -> Result<Uuid, BackendError> {
        if !self.forms.read().await.contains_key(&review.form_id) {
            return Err(BackendError::FormNotFound(review.form_id));
        }
        let id = Uuid::new_v4();
        tracing::info!(
            review = %id,
            form = %review.form_id,
            product = review.product_id,
            config_version = review.config_version,
            "review created"
        );
        self.reviews.write().await.insert(
            id,
            Review {
                id,
                form_id: review.form_id,
                product_id: review.product_id,
                button_id: review.button_id,
                session_id: review.session_id,
                config_version: review.config_version,
                answers: Vec::new(),
                status: ReviewStatus::InProgress,
                created_at: Utc::now(),
                finalized_at: None,
            },
        );
        Ok(id)
    }

    async fn upsert_answers(
        &self,
        review_id: Uuid,
        batch: AnswerBatch,
    ) -> Result<UpsertOutcome, BackendError> {
        let forms = self.forms.read().await;
        let mut reviews = self.reviews.write().await;
        let review = reviews
            .get_mut(&review_id)
            .ok_or(BackendError::ReviewNotFound(review_id))?;
        if review.is_finalized() {
            return Err(BackendError::ReviewFinalized(review_id));
        }
        let stored_form = forms
            .get(&review.form_id)
            .ok_or_else(|| BackendError::FormNotFound(review.form_id.clone()))?;
        let config = stored_form.history.version(review.config_version)?;
        let form = ResolvedForm::new(
            Arc::clone(&stored_form.template),
            Arc::new(config),
            self.linkage.as_ref(),
        );

        let supplied: BTreeSet<_> = batch.answers.iter().map(|answer| answer.block_id).collect();
        let withdrawn: BTreeSet<_> = batch
            .retracted
            .iter()
            .copied()
            .filter(|block| !supplied.contains(block))
            .collect();
        let retracted = review
            .answers
            .iter()
            .filter(|answer| withdrawn.contains(&answer.block_id))
            .count();
        review.answers.retain(|answer| {
            !supplied.contains(&answer.block_id) && !withdrawn.contains(&answer.block_id)
        });

        let mut merged = std::mem::take(&mut review.answers);
        merged.extend(batch.answers);
        let check = validate_answers(&form, &merged);
        for rejected in &check.rejected {
            tracing::warn!(
                review = %review_id,
                block = %rejected.answer.block_id,
                code = %rejected.code,
                "dropping answer the form configuration does not accept"
            );
        }
        review.answers = check.accepted;

        Ok(UpsertOutcome {
            stored: review.answers.len(),
            retracted,
            rejected: check.rejected,
        })
    }

    async fn finalize_review(&self, review_id: Uuid) -> Result<(), BackendError> {
        let mut reviews = self.reviews.write().await;
        let review = reviews
            .get_mut(&review_id)
            .ok_or(BackendError::ReviewNotFound(review_id))?;
        if !review.is_finalized() {
            review.status = ReviewStatus::Finalized;
            review.finalized_at = Some(Utc::now());
            tracing::info!(review = %review_id, "review finalized");
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigBackend for InMemoryBackend {
    async fn save_config_draft(
        &self,
        form_id: &str,
        overlay: ConfigOverlay,
    ) -> Result<(), BackendError> {
        let mut forms = self.forms.write().await;
        let form = forms
            .get_mut(form_id)
            .ok_or_else(|| BackendError::FormNotFound(form_id.to_string()))?;
        form.history.save_draft(overlay, Utc::now());
        Ok(())
    }

    async fn publish_config(&self, form_id: &str) -> Result<u32, BackendError> {
        let mut forms = self.forms.write().await;
        let form = forms
            .get_mut(form_id)
            .ok_or_else(|| BackendError::FormNotFound(form_id.to_string()))?;
        Ok(form.history.publish(Utc::now())?)
    }

    async fn config_version(
        &self,
        form_id: &str,
        version: u32,
    ) -> Result<FormConfig, BackendError> {
        let forms = self.forms.read().await;
        let form = forms
            .get(form_id)
            .ok_or_else(|| BackendError::FormNotFound(form_id.to_string()))?;
        Ok(form.history.version(version)?)
    }
}
