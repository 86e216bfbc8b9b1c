use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answers::{Answer, RejectedAnswer};
use crate::history::{ConfigHistory, HistoryError};
use crate::linkage::ParentLink;
use crate::spec::template::FormTemplate;
use crate::validate::validate_answers;
use crate::visibility::ResolvedForm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    InProgress,
    Finalized,
}

/// One respondent's submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub form_id: String,
    pub product_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<u32>,
    pub session_id: String,
    /// Configuration version the respondent saw.
    pub config_version: u32,
    #[serde(default)]
    pub answers: Vec<Answer>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn is_finalized(&self) -> bool {
        self.status == ReviewStatus::Finalized
    }
}

/// An answer read back with the labels the respondent saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretedAnswer {
    pub field_code: String,
    pub block_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInterpretation {
    pub config_version: u32,
    pub answers: Vec<InterpretedAnswer>,
    pub rejected: Vec<RejectedAnswer>,
}

/// Reads a review against the configuration version it was collected under,
/// never the latest one.
pub fn interpret_review(
    review: &Review,
    template: Arc<FormTemplate>,
    history: &ConfigHistory,
    linkage: &dyn ParentLink,
) -> Result<ReviewInterpretation, HistoryError> {
    let config = history.version(review.config_version)?;
    let form = ResolvedForm::new(template, Arc::new(config), linkage);
    let check = validate_answers(&form, &review.answers);

    let answers = check
        .accepted
        .iter()
        .map(|answer| InterpretedAnswer {
            field_code: answer.field_code.clone(),
            block_label: form
                .visibility()
                .effective_label(answer.block_id)
                .unwrap_or_default()
                .to_string(),
            option_label: answer
                .answer_item_id
                .and_then(|option| form.template().option(option))
                .map(|(_, option)| option.label.clone()),
            answer_text: answer.answer_text.clone(),
        })
        .collect();

    Ok(ReviewInterpretation {
        config_version: review.config_version,
        answers,
        rejected: check.rejected,
    })
}
