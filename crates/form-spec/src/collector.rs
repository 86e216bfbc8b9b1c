//! Per-respondent answer accumulation and step navigation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::answers::{Answer, ChoiceItem, Selection, StepState, ValidationResult};
use crate::spec::template::{AnswerShape, Block, BlockId, OptionId};
use crate::validate::{is_answerable, live_reachable, validate_answers, validate_step};
use crate::visibility::ResolvedForm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
    #[error("block {0} does not exist")]
    UnknownBlock(BlockId),
    #[error("option {option} does not belong to block {block}")]
    UnknownOption { block: BlockId, option: OptionId },
    #[error("block {0} does not accept answers")]
    NotAnswerable(BlockId),
    #[error("block {0} is hidden")]
    BlockHidden(BlockId),
    #[error("block {0} is not reachable")]
    BlockUnreachable(BlockId),
    #[error("option {0} is hidden")]
    OptionHidden(OptionId),
    #[error("option {0} does not take free text")]
    NotOtherOption(OptionId),
    #[error("option {0} is not selected")]
    OptionNotSelected(OptionId),
    #[error("block {block} expects {expected}")]
    WrongInput {
        block: BlockId,
        expected: &'static str,
    },
    #[error("step {0} does not exist")]
    StepOutOfRange(usize),
    #[error("step {0} is hidden")]
    StepHidden(usize),
    #[error("step {step} is missing required answers: {}", .missing.join(", "))]
    StepIncomplete { step: usize, missing: Vec<String> },
}

/// Owned snapshot of what must be persisted after a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepBatch {
    pub step_index: usize,
    pub config_version: u32,
    pub answers: Vec<Answer>,
    /// Every block of the form currently holding no answer.
    pub cleared_blocks: Vec<BlockId>,
}

/// Accumulates one respondent's answers across the steps of a form.
#[derive(Debug, Clone)]
pub struct AnswerCollector {
    form: ResolvedForm,
    selections: BTreeMap<BlockId, Selection>,
    submitted: BTreeSet<usize>,
    current_step: usize,
}

impl AnswerCollector {
    pub fn new(form: ResolvedForm) -> Self {
        let current_step = form.visible_steps().first().copied().unwrap_or(0);
        Self {
            form,
            selections: BTreeMap::new(),
            submitted: BTreeSet::new(),
            current_step,
        }
    }

    /// Rebuilds a collector from persisted answers, dropping any the form
    /// no longer accepts.
    pub fn from_answers(form: ResolvedForm, answers: &[Answer]) -> Self {
        let check = validate_answers(&form, answers);
        for rejected in &check.rejected {
            tracing::debug!(
                block = %rejected.answer.block_id,
                code = %rejected.code,
                "answer dropped while restoring collector"
            );
        }
        let mut collector = Self::new(form);
        for answer in check.accepted {
            let Some(block) = collector.form.template().block(answer.block_id) else {
                continue;
            };
            let shape = block.kind.answer_shape();
            let item = answer.answer_item_id.map(|option| ChoiceItem {
                option,
                other_text: answer.answer_text.clone(),
            });
            match (shape, item) {
                (AnswerShape::Single, Some(item)) => {
                    collector
                        .selections
                        .insert(answer.block_id, Selection::Single(item));
                }
                (AnswerShape::Multiple, Some(item)) => {
                    let entry = collector
                        .selections
                        .entry(answer.block_id)
                        .or_insert_with(|| Selection::Multiple(Vec::new()));
                    if let Selection::Multiple(items) = entry {
                        items.push(item);
                    }
                }
                (AnswerShape::Text, None) => {
                    collector.selections.insert(
                        answer.block_id,
                        Selection::Text(answer.answer_text.unwrap_or_default()),
                    );
                }
                _ => {}
            }
        }
        collector
    }

    pub fn form(&self) -> &ResolvedForm {
        &self.form
    }

    pub fn selections(&self) -> &BTreeMap<BlockId, Selection> {
        &self.selections
    }

    pub fn selection(&self, block: BlockId) -> Option<&Selection> {
        self.selections.get(&block)
    }

    pub fn selected_options(&self, block: BlockId) -> Vec<OptionId> {
        self.selections
            .get(&block)
            .map(Selection::options)
            .unwrap_or_default()
    }

    pub fn is_selected(&self, option: OptionId) -> bool {
        self.selections
            .values()
            .any(|selection| selection.contains(option))
    }

    /// Reachable under the overlay and revealed by the current selections.
    pub fn is_live_reachable(&self, block: BlockId) -> bool {
        live_reachable(&self.form, block, &|option| self.is_selected(option))
    }

    /// Selects an option. Single-choice blocks replace their value; checkbox
    /// blocks apply the exclusive-option rules.
    pub fn select(&mut self, block_id: BlockId, option_id: OptionId) -> Result<(), CollectError> {
        let block = self.answerable_block(block_id)?;
        let option = block.option(option_id).ok_or(CollectError::UnknownOption {
            block: block_id,
            option: option_id,
        })?;
        if !self.form.visibility().is_option_visible(option_id) {
            return Err(CollectError::OptionHidden(option_id));
        }

        let next = match block.kind.answer_shape() {
            AnswerShape::Single => Selection::Single(ChoiceItem::new(option_id)),
            AnswerShape::Multiple => {
                let mut items = match self.selections.get(&block_id) {
                    Some(Selection::Multiple(items)) => items.clone(),
                    _ => Vec::new(),
                };
                if option.is_isolated {
                    items = vec![ChoiceItem::new(option_id)];
                } else {
                    items.retain(|item| {
                        block
                            .option(item.option)
                            .is_some_and(|sibling| !sibling.is_isolated)
                    });
                    if !items.iter().any(|item| item.option == option_id) {
                        items.push(ChoiceItem::new(option_id));
                    }
                }
                Selection::Multiple(items)
            }
            AnswerShape::Text => {
                return Err(CollectError::WrongInput {
                    block: block_id,
                    expected: "text",
                });
            }
            AnswerShape::None => return Err(CollectError::NotAnswerable(block_id)),
        };

        self.store(block_id, Some(next));
        Ok(())
    }

    /// Removes an option from the selection of a block.
    pub fn deselect(
        &mut self,
        block_id: BlockId,
        option_id: OptionId,
    ) -> Result<(), CollectError> {
        self.known_block(block_id)?;
        let next = match self.selections.get(&block_id) {
            Some(Selection::Single(item)) if item.option == option_id => None,
            Some(Selection::Multiple(items)) if items.iter().any(|i| i.option == option_id) => {
                let remaining: Vec<_> = items
                    .iter()
                    .filter(|item| item.option != option_id)
                    .cloned()
                    .collect();
                (!remaining.is_empty()).then_some(Selection::Multiple(remaining))
            }
            _ => return Err(CollectError::OptionNotSelected(option_id)),
        };
        self.store(block_id, next);
        Ok(())
    }

    /// Sets the free text of a text block. Blank text clears the answer.
    pub fn set_text(&mut self, block_id: BlockId, text: &str) -> Result<(), CollectError> {
        let block = self.answerable_block(block_id)?;
        if block.kind.answer_shape() != AnswerShape::Text {
            return Err(CollectError::WrongInput {
                block: block_id,
                expected: "an option",
            });
        }
        let next = (!text.trim().is_empty()).then(|| Selection::Text(text.to_string()));
        self.store(block_id, next);
        Ok(())
    }

    /// Attaches companion text to a selected "other" option.
    pub fn set_other_text(
        &mut self,
        block_id: BlockId,
        option_id: OptionId,
        text: &str,
    ) -> Result<(), CollectError> {
        let block = self.answerable_block(block_id)?;
        let option = block.option(option_id).ok_or(CollectError::UnknownOption {
            block: block_id,
            option: option_id,
        })?;
        if !option.is_other {
            return Err(CollectError::NotOtherOption(option_id));
        }
        let value = (!text.trim().is_empty()).then(|| text.to_string());
        let mut selection = self
            .selections
            .get(&block_id)
            .cloned()
            .ok_or(CollectError::OptionNotSelected(option_id))?;
        let item = match &mut selection {
            Selection::Single(item) if item.option == option_id => Some(item),
            Selection::Multiple(items) => items.iter_mut().find(|item| item.option == option_id),
            _ => None,
        }
        .ok_or(CollectError::OptionNotSelected(option_id))?;
        item.other_text = value;
        self.store(block_id, Some(selection));
        Ok(())
    }

    pub fn clear(&mut self, block_id: BlockId) -> Result<(), CollectError> {
        self.known_block(block_id)?;
        self.store(block_id, None);
        Ok(())
    }

    pub fn validate_step(&self, step_index: usize) -> ValidationResult {
        validate_step(&self.form, &self.selections, step_index)
    }

    pub fn step_state(&self, step_index: usize) -> StepState {
        let validation = self.validate_step(step_index);
        if validation.valid && self.submitted.contains(&step_index) {
            return StepState::Submitted;
        }
        if validation.valid {
            return StepState::Valid;
        }
        let answered = self
            .step_blocks(step_index)
            .iter()
            .any(|block| self.selections.contains_key(block));
        if answered {
            StepState::PartiallyAnswered
        } else {
            StepState::Unanswered
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn can_continue(&self) -> bool {
        self.step_state(self.current_step).allows_continue()
    }

    /// Moves to the next visible step once the current one is valid. Returns
    /// `None` on the last step.
    pub fn advance(&mut self) -> Result<Option<usize>, CollectError> {
        let validation = self.validate_step(self.current_step);
        if !validation.valid {
            let mut missing = validation.missing_required;
            missing.extend(
                validation
                    .errors
                    .into_iter()
                    .filter_map(|error| error.field_code),
            );
            return Err(CollectError::StepIncomplete {
                step: self.current_step,
                missing,
            });
        }
        let next = self
            .form
            .visible_steps()
            .into_iter()
            .find(|index| *index > self.current_step);
        if let Some(index) = next {
            self.current_step = index;
        }
        Ok(next)
    }

    /// Moves to the previous visible step, keeping every answer.
    pub fn back(&mut self) -> Option<usize> {
        let previous = self
            .form
            .visible_steps()
            .into_iter()
            .rev()
            .find(|index| *index < self.current_step)?;
        self.current_step = previous;
        Some(previous)
    }

    /// Jumps to a step, refusing to skip over an invalid one.
    pub fn go_to(&mut self, step_index: usize) -> Result<(), CollectError> {
        let step = self
            .form
            .template()
            .step(step_index)
            .ok_or(CollectError::StepOutOfRange(step_index))?;
        if !self.form.visibility().is_step_visible(step.id) {
            return Err(CollectError::StepHidden(step_index));
        }
        for index in self.form.visible_steps() {
            if index >= step_index {
                break;
            }
            let validation = self.validate_step(index);
            if !validation.valid {
                return Err(CollectError::StepIncomplete {
                    step: index,
                    missing: validation.missing_required,
                });
            }
        }
        self.current_step = step_index;
        Ok(())
    }

    pub fn is_last_step(&self) -> bool {
        self.form
            .visible_steps()
            .last()
            .is_none_or(|last| *last <= self.current_step)
    }

    /// Live answers of the whole form in template order.
    pub fn answers(&self) -> Vec<Answer> {
        self.form
            .template()
            .blocks()
            .flat_map(|(_, block)| self.block_answers(block))
            .collect()
    }

    pub fn step_answers(&self, step_index: usize) -> Vec<Answer> {
        self.form
            .template()
            .step(step_index)
            .map(|step| {
                step.blocks
                    .iter()
                    .flat_map(|block| self.block_answers(block))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn step_batch(&self, step_index: usize) -> StepBatch {
        let cleared_blocks = self
            .form
            .template()
            .blocks()
            .map(|(_, block)| block)
            .filter(|block| !block.kind.is_content() && self.block_answers(block).is_empty())
            .map(|block| block.id)
            .collect();
        StepBatch {
            step_index,
            config_version: self.form.config_version(),
            answers: self.step_answers(step_index),
            cleared_blocks,
        }
    }

    /// A step batch carrying every live answer of the form, so edits made on
    /// earlier steps travel with the save of the current one.
    pub fn form_batch(&self, step_index: usize) -> StepBatch {
        StepBatch {
            answers: self.answers(),
            ..self.step_batch(step_index)
        }
    }

    /// Records that the persistence layer acknowledged a step.
    pub fn mark_submitted(&mut self, step_index: usize) {
        self.submitted.insert(step_index);
    }

    /// Answered and total answerable blocks among live reachable ones.
    pub fn progress(&self) -> (usize, usize) {
        let mut answered = 0;
        let mut total = 0;
        for (index, block) in self.form.template().blocks() {
            let step_visible = self
                .form
                .template()
                .step(index)
                .is_some_and(|step| self.form.visibility().is_step_visible(step.id));
            if !step_visible
                || !is_answerable(&self.form, block)
                || !self.is_live_reachable(block.id)
            {
                continue;
            }
            total += 1;
            if !self.block_answers(block).is_empty() {
                answered += 1;
            }
        }
        (answered, total)
    }

    fn block_answers(&self, block: &Block) -> Vec<Answer> {
        if !self.is_live_reachable(block.id) {
            return Vec::new();
        }
        self.selections
            .get(&block.id)
            .map(|selection| selection.to_answers(block.id, &block.field_code()))
            .unwrap_or_default()
    }

    fn step_blocks(&self, step_index: usize) -> Vec<BlockId> {
        self.form
            .template()
            .step(step_index)
            .map(|step| step.blocks.iter().map(|block| block.id).collect())
            .unwrap_or_default()
    }

    fn known_block(&self, block_id: BlockId) -> Result<&Block, CollectError> {
        self.form
            .template()
            .block(block_id)
            .ok_or(CollectError::UnknownBlock(block_id))
    }

    fn answerable_block(&self, block_id: BlockId) -> Result<&Block, CollectError> {
        let block = self.known_block(block_id)?;
        if block.kind.is_content() {
            return Err(CollectError::NotAnswerable(block_id));
        }
        let visibility = self.form.visibility();
        if !visibility.is_block_visible(block_id) {
            return Err(CollectError::BlockHidden(block_id));
        }
        if !self.is_live_reachable(block_id) {
            return Err(CollectError::BlockUnreachable(block_id));
        }
        Ok(block)
    }

    fn store(&mut self, block_id: BlockId, selection: Option<Selection>) {
        match selection {
            Some(selection) => {
                self.selections.insert(block_id, selection);
            }
            None => {
                self.selections.remove(&block_id);
            }
        }
        self.demote(block_id);
        self.prune();
    }

    /// Discards answers of blocks that are no longer revealed, repeating
    /// until grandchildren are settled.
    fn prune(&mut self) {
        loop {
            let stale: Vec<BlockId> = self
                .selections
                .keys()
                .copied()
                .filter(|block| !self.is_live_reachable(*block))
                .collect();
            if stale.is_empty() {
                break;
            }
            for block in stale {
                tracing::debug!(block = %block, "discarding answer of unreachable block");
                self.selections.remove(&block);
                self.demote(block);
            }
        }
    }

    fn demote(&mut self, block_id: BlockId) {
        if let Some(index) = self.form.template().step_index_of(block_id) {
            self.submitted.remove(&index);
        }
    }
}
