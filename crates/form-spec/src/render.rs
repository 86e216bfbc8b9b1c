use serde::Serialize;
use serde_json::{Value, json};

use crate::answers::{Selection, StepState};
use crate::collector::AnswerCollector;
use crate::content::{LabelContext, LabelRenderer};
use crate::spec::template::{Block, BlockId, BlockType, OptionId};
use crate::validate::is_answerable;
use crate::visibility::ResolvedForm;

/// Status labels returned by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    /// The step still needs input.
    NeedInput,
    /// The step can be left.
    Ready,
    /// Every visible step is valid.
    Complete,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::NeedInput => "need_input",
            RenderStatus::Ready => "ready",
            RenderStatus::Complete => "complete",
        }
    }
}

/// Respondents only see what they can answer; the builder sees everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Respondent,
    Builder,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderProgress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOption {
    pub id: OptionId,
    pub label: String,
    pub value: String,
    pub visible: bool,
    pub selected: bool,
    pub is_isolated: bool,
    pub is_other: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderBlock {
    pub id: BlockId,
    pub field_code: String,
    #[serde(rename = "type")]
    pub kind: BlockType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub required: bool,
    pub visible: bool,
    pub reachable: bool,
    pub parent_hidden: bool,
    pub label_overridden: bool,
    pub options: Vec<RenderOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderStep {
    pub index: usize,
    pub position: usize,
    pub total: usize,
    pub title: String,
    pub visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StepState>,
}

/// Collected payload shared by the text and JSON renderers.
#[derive(Debug, Clone, Serialize)]
pub struct RenderPayload {
    pub form_title: String,
    pub template_slug: String,
    pub config_version: u32,
    pub mode: RenderMode,
    pub status: RenderStatus,
    pub step: RenderStep,
    pub progress: RenderProgress,
    pub can_continue: bool,
    pub missing_required: Vec<String>,
    pub blocks: Vec<RenderBlock>,
}

/// Builds the respondent view of a step from the collector state.
pub fn build_render_payload(
    collector: &AnswerCollector,
    step_index: usize,
    ctx: &LabelContext,
) -> Option<RenderPayload> {
    let form = collector.form();
    let step = form.template().step(step_index)?;
    let renderer = LabelRenderer::new();

    let blocks = step
        .blocks
        .iter()
        .filter(|block| collector.is_live_reachable(block.id))
        .map(|block| {
            let mut rendered = render_block(form, block, &renderer, ctx, |option| {
                collector.is_selected(option)
            });
            rendered.options.retain(|option| option.visible);
            rendered.selection = collector.selection(block.id).cloned();
            rendered
        })
        .collect();

    let validation = collector.validate_step(step_index);
    let state = collector.step_state(step_index);
    let all_valid = form
        .visible_steps()
        .into_iter()
        .all(|index| collector.step_state(index).allows_continue());
    let status = if all_valid {
        RenderStatus::Complete
    } else if state.allows_continue() {
        RenderStatus::Ready
    } else {
        RenderStatus::NeedInput
    };
    let (answered, total) = collector.progress();

    Some(RenderPayload {
        form_title: form.template().title.clone(),
        template_slug: form.template().slug.clone(),
        config_version: form.config_version(),
        mode: RenderMode::Respondent,
        status,
        step: render_step(form, step_index, Some(state)),
        progress: RenderProgress { answered, total },
        can_continue: state.allows_continue(),
        missing_required: validation.missing_required,
        blocks,
    })
}

/// Builds the admin view of a step: hidden elements are kept and flagged.
pub fn build_builder_payload(
    form: &ResolvedForm,
    step_index: usize,
    ctx: &LabelContext,
) -> Option<RenderPayload> {
    let step = form.template().step(step_index)?;
    let renderer = LabelRenderer::new();
    let blocks: Vec<RenderBlock> = step
        .blocks
        .iter()
        .map(|block| render_block(form, block, &renderer, ctx, |_| false))
        .collect();
    let total = form
        .template()
        .blocks()
        .filter(|(_, block)| {
            form.visibility().is_block_reachable(block.id) && is_answerable(form, block)
        })
        .count();

    Some(RenderPayload {
        form_title: form.template().title.clone(),
        template_slug: form.template().slug.clone(),
        config_version: form.config_version(),
        mode: RenderMode::Builder,
        status: RenderStatus::Ready,
        step: render_step(form, step_index, None),
        progress: RenderProgress { answered: 0, total },
        can_continue: true,
        missing_required: Vec::new(),
        blocks,
    })
}

fn render_step(form: &ResolvedForm, step_index: usize, state: Option<StepState>) -> RenderStep {
    let visible_steps = form.visible_steps();
    let step = &form.template().steps[step_index];
    RenderStep {
        index: step_index,
        position: visible_steps
            .iter()
            .position(|index| *index == step_index)
            .map(|position| position + 1)
            .unwrap_or(0),
        total: visible_steps.len(),
        title: step.title.clone(),
        visible: form.visibility().is_step_visible(step.id),
        state,
    }
}

fn render_block(
    form: &ResolvedForm,
    block: &Block,
    renderer: &LabelRenderer,
    ctx: &LabelContext,
    selected: impl Fn(OptionId) -> bool,
) -> RenderBlock {
    let visibility = form.visibility();
    let resolved = visibility.block(block.id);
    let label = resolved
        .map(|entry| entry.effective_label.as_str())
        .unwrap_or(block.own_label());
    let hint = match block.kind {
        BlockType::Paragraph => None,
        _ => block
            .content
            .as_deref()
            .map(|content| renderer.render(content, ctx)),
    };

    RenderBlock {
        id: block.id,
        field_code: block.field_code(),
        kind: block.kind,
        label: renderer.render(label, ctx),
        hint,
        required: block.is_required,
        visible: resolved.is_some_and(|entry| entry.visible),
        reachable: resolved.is_some_and(|entry| entry.reachable),
        parent_hidden: resolved.is_some_and(|entry| entry.parent_hidden),
        label_overridden: resolved.is_some_and(|entry| entry.label_overridden),
        options: block
            .options
            .iter()
            .map(|option| RenderOption {
                id: option.id,
                label: option.label.clone(),
                value: option.value.clone(),
                visible: visibility.is_option_visible(option.id),
                selected: selected(option.id),
                is_isolated: option.is_isolated,
                is_other: option.is_other,
                hint: option.hint.clone(),
            })
            .collect(),
        selection: None,
        up_label: block.up_label.clone(),
        down_label: block.down_label.clone(),
    }
}

/// Render the payload as a structured JSON value.
pub fn render_json_ui(payload: &RenderPayload) -> Value {
    json!({
        "form_title": payload.form_title,
        "template_slug": payload.template_slug,
        "config_version": payload.config_version,
        "mode": payload.mode,
        "status": payload.status.as_str(),
        "step": payload.step,
        "progress": {
            "answered": payload.progress.answered,
            "total": payload.progress.total,
        },
        "can_continue": payload.can_continue,
        "missing_required": payload.missing_required,
        "blocks": payload.blocks,
    })
}

/// Render the payload as human-friendly text.
pub fn render_text(payload: &RenderPayload) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Form: {} ({}, config v{})",
        payload.form_title, payload.template_slug, payload.config_version
    ));
    let hidden = if payload.step.visible { "" } else { " [hidden]" };
    lines.push(format!(
        "Step {}/{}: {}{}",
        payload.step.position, payload.step.total, payload.step.title, hidden
    ));
    if payload.mode == RenderMode::Respondent {
        lines.push(format!(
            "Status: {} ({}/{})",
            payload.status.as_str(),
            payload.progress.answered,
            payload.progress.total
        ));
    }

    for block in &payload.blocks {
        lines.push(block_line(block, payload.mode));
        if let Some(hint) = &block.hint {
            lines.push(format!("    {}", hint));
        }
        if let (Some(down), Some(up)) = (&block.down_label, &block.up_label) {
            lines.push(format!("    1 = {}, {} = {}", down, block.options.len(), up));
        }
        for option in &block.options {
            let marker = if option.selected { "[x]" } else { "[ ]" };
            let mut entry = format!("    {} {} ({})", marker, option.label, option.id);
            if option.is_isolated {
                entry.push_str(" [exclusive]");
            }
            if option.is_other {
                entry.push_str(" [free text]");
            }
            if !option.visible {
                entry.push_str(" [hidden]");
            }
            lines.push(entry);
        }
        if let Some(Selection::Text(text)) = &block.selection {
            lines.push(format!("    = {}", text));
        }
    }

    if !payload.missing_required.is_empty() {
        lines.push(format!(
            "Missing required answers: {}",
            payload.missing_required.join(", ")
        ));
    }

    lines.join("\n")
}

fn block_line(block: &RenderBlock, mode: RenderMode) -> String {
    let mut entry = match block.kind {
        BlockType::Divider => " ----".to_string(),
        BlockType::Paragraph
        | BlockType::Heading1
        | BlockType::Heading2
        | BlockType::Heading3 => format!(" {}", block.label),
        _ => format!(" - {} ({}) {}", block.field_code, block.kind.as_str(), block.label),
    };
    if block.required {
        entry.push_str(" [required]");
    }
    if mode == RenderMode::Builder {
        if !block.visible {
            entry.push_str(" [hidden]");
        }
        if block.parent_hidden {
            entry.push_str(" [parent option hidden]");
        }
        if block.label_overridden {
            entry.push_str(" [relabeled]");
        }
    }
    entry
}
