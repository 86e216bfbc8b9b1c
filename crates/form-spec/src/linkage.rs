//! Strategies that attach a conditional block to the option revealing it.
//!
//! Templates can name the parent explicitly through `parent_option_id`. The
//! root satisfaction template predates that field: its follow-up radio blocks
//! are tied to the checkbox at the top of their step by comparing labels.

use serde::{Deserialize, Serialize};

use crate::spec::template::{BlockType, FormTemplate, OptionId, Step};

/// Finds the option a block depends on, if any.
pub trait ParentLink: Send + Sync {
    fn parent_option(
        &self,
        template: &FormTemplate,
        step: &Step,
        block_index: usize,
    ) -> Option<OptionId>;

    fn name(&self) -> &'static str;
}

/// Uses the `parent_option_id` carried by the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitLink;

impl ParentLink for ExplicitLink {
    fn parent_option(
        &self,
        _template: &FormTemplate,
        step: &Step,
        block_index: usize,
    ) -> Option<OptionId> {
        step.blocks.get(block_index)?.parent_option_id
    }

    fn name(&self) -> &'static str {
        "explicit"
    }
}

/// Matches radio blocks against the options of the checkbox at
/// `source_block_index` in the same step.
///
/// The second word of the child label must appear in the option label
/// ("Par téléphone" matches "Par téléphone avec l'administration"). A child
/// with a one-word label matches the first option.
#[derive(Debug, Clone, Copy)]
pub struct LabelLink {
    pub source_block_index: usize,
}

impl Default for LabelLink {
    fn default() -> Self {
        Self {
            source_block_index: 0,
        }
    }
}

impl ParentLink for LabelLink {
    fn parent_option(
        &self,
        _template: &FormTemplate,
        step: &Step,
        block_index: usize,
    ) -> Option<OptionId> {
        if block_index <= self.source_block_index {
            return None;
        }
        let source = step.blocks.get(self.source_block_index)?;
        let block = step.blocks.get(block_index)?;
        if source.kind != BlockType::Checkbox || block.kind != BlockType::Radio {
            return None;
        }

        let key = block.label.split_whitespace().nth(1);
        let parent = source
            .options
            .iter()
            .find(|option| key.is_none_or(|key| option.label.contains(key)))
            .map(|option| option.id);
        if parent.is_none() {
            tracing::debug!(
                block = %block.id,
                label = %block.label,
                "no source option matches conditional block label"
            );
        }
        parent
    }

    fn name(&self) -> &'static str {
        "label"
    }
}

/// Explicit references first; label matching only for the templates listed
/// in `label_slugs`.
#[derive(Debug, Clone)]
pub struct AutoLink {
    pub label: LabelLink,
    pub label_slugs: Vec<String>,
}

impl Default for AutoLink {
    fn default() -> Self {
        Self {
            label: LabelLink::default(),
            label_slugs: vec!["root".into()],
        }
    }
}

impl ParentLink for AutoLink {
    fn parent_option(
        &self,
        template: &FormTemplate,
        step: &Step,
        block_index: usize,
    ) -> Option<OptionId> {
        ExplicitLink
            .parent_option(template, step, block_index)
            .or_else(|| {
                if self.label_slugs.iter().any(|slug| slug == &template.slug) {
                    self.label.parent_option(template, step, block_index)
                } else {
                    None
                }
            })
    }

    fn name(&self) -> &'static str {
        "auto"
    }
}

/// Serialized selector for the linkage strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageMode {
    Explicit,
    Label,
    #[default]
    Auto,
}

impl LinkageMode {
    pub fn build(self, source_block_index: usize, label_slugs: &[String]) -> Box<dyn ParentLink> {
        let label = LabelLink { source_block_index };
        match self {
            LinkageMode::Explicit => Box::new(ExplicitLink),
            LinkageMode::Label => Box::new(label),
            LinkageMode::Auto => Box::new(AutoLink {
                label,
                label_slugs: label_slugs.to_vec(),
            }),
        }
    }
}
