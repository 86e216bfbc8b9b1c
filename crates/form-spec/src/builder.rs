//! Configuration authoring on top of an immutable template.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::content::{LabelContext, LabelRenderer, normalize_html};
use crate::linkage::ParentLink;
use crate::spec::config::{
    ConfigDisplay, ConfigLabel, ConfigOverlay, DisplayKind, FormConfig, LabelKind,
};
use crate::spec::template::{BlockId, BlockType, FormTemplate, OptionId, StepId};
use crate::visibility::ResolvedForm;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("step {0} is not part of the template")]
    UnknownStep(StepId),
    #[error("block {0} is not part of the template")]
    UnknownBlock(BlockId),
    #[error("option {0} is not part of the template")]
    UnknownOption(OptionId),
}

/// Working copy of a form's overlay, compared against the published one.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    template: Arc<FormTemplate>,
    base: ConfigOverlay,
    working: ConfigOverlay,
}

impl ConfigBuilder {
    pub fn new(template: Arc<FormTemplate>, published: Option<&FormConfig>) -> Self {
        let base = published
            .map(|config| config.overlay.clone())
            .unwrap_or_default();
        Self {
            template,
            working: base.clone(),
            base,
        }
    }

    /// Resumes editing from a saved draft.
    pub fn with_draft(mut self, draft: ConfigOverlay) -> Self {
        self.working = draft;
        self
    }

    pub fn overlay(&self) -> &ConfigOverlay {
        &self.working
    }

    pub fn template(&self) -> &FormTemplate {
        &self.template
    }

    pub fn set_step_hidden(&mut self, id: StepId, hidden: bool) -> Result<(), BuilderError> {
        if self.template.step_by_id(id).is_none() {
            return Err(BuilderError::UnknownStep(id));
        }
        self.set_display(DisplayKind::Step, id.0, hidden);
        Ok(())
    }

    pub fn set_block_hidden(&mut self, id: BlockId, hidden: bool) -> Result<(), BuilderError> {
        if self.template.block(id).is_none() {
            return Err(BuilderError::UnknownBlock(id));
        }
        self.set_display(DisplayKind::Block, id.0, hidden);
        Ok(())
    }

    pub fn set_option_hidden(&mut self, id: OptionId, hidden: bool) -> Result<(), BuilderError> {
        if self.template.option(id).is_none() {
            return Err(BuilderError::UnknownOption(id));
        }
        self.set_display(DisplayKind::BlockOption, id.0, hidden);
        Ok(())
    }

    /// Flips a block's visibility and returns whether it is now hidden.
    pub fn toggle_block(&mut self, id: BlockId) -> Result<bool, BuilderError> {
        let hidden = !self.working.is_block_hidden(id);
        self.set_block_hidden(id, hidden)?;
        Ok(hidden)
    }

    pub fn toggle_option(&mut self, id: OptionId) -> Result<bool, BuilderError> {
        let hidden = !self.working.is_option_hidden(id);
        self.set_option_hidden(id, hidden)?;
        Ok(hidden)
    }

    pub fn toggle_step(&mut self, id: StepId) -> Result<bool, BuilderError> {
        let hidden = !self.working.is_step_hidden(id);
        self.set_step_hidden(id, hidden)?;
        Ok(hidden)
    }

    /// Writes or replaces the label override of a block.
    pub fn set_label(&mut self, id: BlockId, label: impl Into<String>) -> Result<(), BuilderError> {
        if self.template.block(id).is_none() {
            return Err(BuilderError::UnknownBlock(id));
        }
        self.working
            .labels
            .retain(|entry| !(entry.kind == LabelKind::Block && entry.parent_id == id.0));
        self.working.labels.push(ConfigLabel {
            parent_id: id.0,
            kind: LabelKind::Block,
            label: label.into(),
        });
        Ok(())
    }

    pub fn clear_label(&mut self, id: BlockId) -> Result<(), BuilderError> {
        if self.template.block(id).is_none() {
            return Err(BuilderError::UnknownBlock(id));
        }
        self.working
            .labels
            .retain(|entry| !(entry.kind == LabelKind::Block && entry.parent_id == id.0));
        Ok(())
    }

    /// Whether the working overlay differs from the published one, ignoring
    /// entry order.
    pub fn has_changed(&self) -> bool {
        self.working.normalized() != self.base.normalized()
    }

    /// Steps carrying a customization: a hidden option, or a paragraph whose
    /// override differs from the template text once rendered.
    pub fn modified_steps(&self, ctx: &LabelContext) -> Vec<StepId> {
        let renderer = LabelRenderer::new();
        self.template
            .steps
            .iter()
            .filter(|step| {
                let hides_option = step.blocks.iter().any(|block| {
                    block
                        .options
                        .iter()
                        .any(|option| self.working.is_option_hidden(option.id))
                });
                let relabels_paragraph = step.blocks.iter().any(|block| {
                    let (BlockType::Paragraph, Some(content)) = (block.kind, &block.content) else {
                        return false;
                    };
                    self.working.block_label(block.id).is_some_and(|label| {
                        normalize_html(label)
                            != normalize_html(&renderer.render(content, ctx))
                    })
                });
                hides_option || relabels_paragraph
            })
            .map(|step| step.id)
            .collect()
    }

    /// Resolves the working overlay without publishing it.
    pub fn preview(&self, linkage: &dyn ParentLink, now: DateTime<Utc>) -> ResolvedForm {
        ResolvedForm::new(
            Arc::clone(&self.template),
            Arc::new(FormConfig::draft(self.working.clone(), now)),
            linkage,
        )
    }

    /// Adopts a freshly published overlay as the comparison base.
    pub fn mark_published(&mut self) {
        self.base = self.working.clone();
    }

    pub fn into_overlay(self) -> ConfigOverlay {
        self.working
    }

    fn set_display(&mut self, kind: DisplayKind, parent_id: u32, hidden: bool) {
        self.working
            .displays
            .retain(|entry| !(entry.kind == kind && entry.parent_id == parent_id));
        if hidden {
            self.working.displays.push(ConfigDisplay {
                parent_id,
                kind,
                hidden: true,
            });
        }
    }
}
