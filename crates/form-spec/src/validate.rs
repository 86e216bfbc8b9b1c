use std::collections::{BTreeMap, BTreeSet};

use crate::answers::{
    Answer, AnswerCheck, RejectedAnswer, Selection, ValidationError, ValidationResult,
};
use crate::spec::template::{AnswerShape, Block, BlockId, OptionId};
use crate::visibility::ResolvedForm;

/// Reachable under the overlay and, for conditional blocks, revealed by a
/// currently selected parent option.
pub fn live_reachable(
    form: &ResolvedForm,
    block: BlockId,
    selected: &dyn Fn(OptionId) -> bool,
) -> bool {
    let visibility = form.visibility();
    if !visibility.is_block_reachable(block) {
        return false;
    }
    match visibility.parent_option(block) {
        None => true,
        Some(option) => {
            selected(option)
                && form
                    .template()
                    .option(option)
                    .is_some_and(|(owner, _)| live_reachable(form, owner.id, selected))
        }
    }
}

/// A block a respondent can actually answer: an input kind with at least one
/// visible option when it is choice based.
pub fn is_answerable(form: &ResolvedForm, block: &Block) -> bool {
    match block.kind.answer_shape() {
        AnswerShape::None => false,
        AnswerShape::Text => true,
        AnswerShape::Single | AnswerShape::Multiple => block
            .options
            .iter()
            .any(|option| form.visibility().is_option_visible(option.id)),
    }
}

/// Checks the selections held for one step against the required gate.
pub fn validate_step(
    form: &ResolvedForm,
    selections: &BTreeMap<BlockId, Selection>,
    step_index: usize,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    let Some(step) = form.template().step(step_index) else {
        return ValidationResult {
            valid: false,
            errors: vec![ValidationError {
                block_id: None,
                field_code: None,
                message: format!("step {} does not exist", step_index),
                code: Some("unknown_step".into()),
            }],
            missing_required,
        };
    };
    if !form.visibility().is_step_visible(step.id) {
        return ValidationResult {
            valid: true,
            errors,
            missing_required,
        };
    }

    let selected = |option: OptionId| {
        selections
            .values()
            .any(|selection| selection.contains(option))
    };

    for block in &step.blocks {
        if block.kind.is_content() || !live_reachable(form, block.id, &selected) {
            continue;
        }
        match selections.get(&block.id).filter(|value| !value.is_empty()) {
            None => {
                if block.is_required && is_answerable(form, block) {
                    missing_required.push(block.field_code());
                }
            }
            Some(selection) => {
                if let Some(error) = check_selection(form, block, selection) {
                    errors.push(error);
                }
            }
        }
    }

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty(),
        errors,
        missing_required,
    }
}

fn check_selection(
    form: &ResolvedForm,
    block: &Block,
    selection: &Selection,
) -> Option<ValidationError> {
    let shape_matches = matches!(
        (block.kind.answer_shape(), selection),
        (AnswerShape::Single, Selection::Single(_))
            | (AnswerShape::Multiple, Selection::Multiple(_))
            | (AnswerShape::Text, Selection::Text(_))
    );
    if !shape_matches {
        return Some(block_error(block, "type mismatch", "type_mismatch"));
    }

    for option in selection.options() {
        match block.option(option) {
            None => return Some(block_error(block, "unknown option", "unknown_option")),
            Some(_) if !form.visibility().is_option_visible(option) => {
                return Some(block_error(block, "option is hidden", "option_hidden"));
            }
            Some(_) => {}
        }
    }

    if let Selection::Multiple(items) = selection
        && items.len() > 1
        && items.iter().any(|item| {
            block
                .option(item.option)
                .is_some_and(|option| option.is_isolated)
        })
    {
        return Some(block_error(
            block,
            "exclusive option selected with others",
            "isolated_conflict",
        ));
    }

    None
}

fn block_error(block: &Block, message: &str, code: &str) -> ValidationError {
    ValidationError {
        block_id: Some(block.id),
        field_code: Some(block.field_code()),
        message: message.into(),
        code: Some(code.into()),
    }
}

/// Filters a set of persisted answers down to the ones consistent with the
/// resolved form. Answers for blocks whose revealing option is not among the
/// accepted answers are rejected as unreachable, transitively.
pub fn validate_answers(form: &ResolvedForm, answers: &[Answer]) -> AnswerCheck {
    let mut rejected = Vec::new();
    let mut candidates: Vec<Answer> = Vec::new();
    let mut seen_single = BTreeSet::new();

    for answer in answers {
        match structural_issue(form, answer) {
            Some(code) => rejected.push(RejectedAnswer {
                answer: answer.clone(),
                code: code.into(),
            }),
            None => {
                let shape = form
                    .template()
                    .block(answer.block_id)
                    .map(|block| block.kind.answer_shape());
                if matches!(shape, Some(AnswerShape::Single | AnswerShape::Text))
                    && !seen_single.insert(answer.block_id)
                {
                    rejected.push(RejectedAnswer {
                        answer: answer.clone(),
                        code: "duplicate_answer".into(),
                    });
                } else {
                    candidates.push(answer.clone());
                }
            }
        }
    }

    let mut isolated_blocks = BTreeSet::new();
    for answer in &candidates {
        if is_isolated_answer(form, answer) {
            isolated_blocks.insert(answer.block_id);
        }
    }
    let (kept, conflicting): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|answer| {
        !isolated_blocks.contains(&answer.block_id) || is_isolated_answer(form, answer)
    });
    rejected.extend(conflicting.into_iter().map(|answer| RejectedAnswer {
        answer,
        code: "isolated_conflict".into(),
    }));

    let mut accepted = kept;
    loop {
        let selected: BTreeSet<OptionId> = accepted
            .iter()
            .filter_map(|answer| answer.answer_item_id)
            .collect();
        let is_selected = |option: OptionId| selected.contains(&option);
        let (reachable, unreachable): (Vec<_>, Vec<_>) = accepted
            .into_iter()
            .partition(|answer| live_reachable(form, answer.block_id, &is_selected));
        accepted = reachable;
        if unreachable.is_empty() {
            break;
        }
        rejected.extend(unreachable.into_iter().map(|answer| RejectedAnswer {
            answer,
            code: "unreachable".into(),
        }));
    }

    AnswerCheck { accepted, rejected }
}

fn is_isolated_answer(form: &ResolvedForm, answer: &Answer) -> bool {
    answer
        .answer_item_id
        .and_then(|option| form.template().option(option))
        .is_some_and(|(_, option)| option.is_isolated)
}

fn structural_issue(form: &ResolvedForm, answer: &Answer) -> Option<&'static str> {
    let Some(block) = form.template().block(answer.block_id) else {
        return Some("unknown_block");
    };
    if block.field_code() != answer.field_code {
        return Some("field_code_mismatch");
    }
    let visibility = form.visibility();
    if !visibility.is_block_visible(block.id) {
        return Some("block_hidden");
    }
    if !visibility.is_block_reachable(block.id) {
        return Some("unreachable");
    }
    match (block.kind.answer_shape(), answer.answer_item_id) {
        (AnswerShape::None, _) => Some("not_answerable"),
        (AnswerShape::Text, Some(_)) => Some("type_mismatch"),
        (AnswerShape::Text, None) => answer
            .answer_text
            .as_deref()
            .is_none_or(|text| text.trim().is_empty())
            .then_some("missing_value"),
        (AnswerShape::Single | AnswerShape::Multiple, None) => Some("type_mismatch"),
        (AnswerShape::Single | AnswerShape::Multiple, Some(option)) => match block.option(option)
        {
            None => Some("unknown_option"),
            Some(_) if !visibility.is_option_visible(option) => Some("option_hidden"),
            Some(_) => None,
        },
    }
}
