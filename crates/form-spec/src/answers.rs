use serde::{Deserialize, Serialize};

use crate::spec::template::{BlockId, OptionId};

/// One recorded response to a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub block_id: BlockId,
    pub field_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_item_id: Option<OptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
}

/// A chosen option, with companion text for "other" options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceItem {
    pub option: OptionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_text: Option<String>,
}

impl ChoiceItem {
    pub fn new(option: OptionId) -> Self {
        Self {
            option,
            other_text: None,
        }
    }
}

/// In-progress value held for a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selection {
    Single(ChoiceItem),
    Multiple(Vec<ChoiceItem>),
    Text(String),
}

impl Selection {
    pub fn options(&self) -> Vec<OptionId> {
        match self {
            Selection::Single(item) => vec![item.option],
            Selection::Multiple(items) => items.iter().map(|item| item.option).collect(),
            Selection::Text(_) => Vec::new(),
        }
    }

    pub fn contains(&self, option: OptionId) -> bool {
        match self {
            Selection::Single(item) => item.option == option,
            Selection::Multiple(items) => items.iter().any(|item| item.option == option),
            Selection::Text(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Single(_) => false,
            Selection::Multiple(items) => items.is_empty(),
            Selection::Text(text) => text.trim().is_empty(),
        }
    }

    /// Expands the selection into the answers persisted for the block.
    pub fn to_answers(&self, block_id: BlockId, field_code: &str) -> Vec<Answer> {
        let choice = |item: &ChoiceItem| Answer {
            block_id,
            field_code: field_code.to_string(),
            answer_item_id: Some(item.option),
            answer_text: item.other_text.clone(),
        };
        match self {
            Selection::Single(item) => vec![choice(item)],
            Selection::Multiple(items) => items.iter().map(choice).collect(),
            Selection::Text(text) if text.trim().is_empty() => Vec::new(),
            Selection::Text(text) => vec![Answer {
                block_id,
                field_code: field_code.to_string(),
                answer_item_id: None,
                answer_text: Some(text.clone()),
            }],
        }
    }
}

/// Progress of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Unanswered,
    PartiallyAnswered,
    Valid,
    Submitted,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Unanswered => "unanswered",
            StepState::PartiallyAnswered => "partially_answered",
            StepState::Valid => "valid",
            StepState::Submitted => "submitted",
        }
    }

    pub fn allows_continue(&self) -> bool {
        matches!(self, StepState::Valid | StepState::Submitted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
    /// Field codes of required reachable blocks without an answer.
    #[serde(default)]
    pub missing_required: Vec<String>,
}

/// An answer the persistence layer refused to store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedAnswer {
    pub answer: Answer,
    pub code: String,
}

/// Split of a batch of answers into storable and rejected ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCheck {
    pub accepted: Vec<Answer>,
    pub rejected: Vec<RejectedAnswer>,
}
