use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::spec::template::{BlockId, OptionId, StepId};

/// Kind of template element a display override targets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum DisplayKind {
    #[serde(rename = "step")]
    Step,
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "blockOption")]
    BlockOption,
}

impl DisplayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayKind::Step => "step",
            DisplayKind::Block => "block",
            DisplayKind::BlockOption => "blockOption",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum LabelKind {
    #[serde(rename = "block")]
    Block,
}

/// Hides (or explicitly shows) a step, block or option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigDisplay {
    pub parent_id: u32,
    pub kind: DisplayKind,
    pub hidden: bool,
}

/// Replaces the rendered label of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigLabel {
    pub parent_id: u32,
    pub kind: LabelKind,
    pub label: String,
}

/// Display and label overrides layered on a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigOverlay {
    #[serde(default)]
    pub displays: Vec<ConfigDisplay>,
    #[serde(default)]
    pub labels: Vec<ConfigLabel>,
}

impl ConfigOverlay {
    pub fn is_hidden(&self, kind: DisplayKind, parent_id: u32) -> bool {
        self.displays
            .iter()
            .any(|display| display.kind == kind && display.parent_id == parent_id && display.hidden)
    }

    pub fn is_step_hidden(&self, id: StepId) -> bool {
        self.is_hidden(DisplayKind::Step, id.0)
    }

    pub fn is_block_hidden(&self, id: BlockId) -> bool {
        self.is_hidden(DisplayKind::Block, id.0)
    }

    pub fn is_option_hidden(&self, id: OptionId) -> bool {
        self.is_hidden(DisplayKind::BlockOption, id.0)
    }

    /// Label override for a block. Blank overrides are ignored.
    pub fn block_label(&self, id: BlockId) -> Option<&str> {
        self.labels
            .iter()
            .rev()
            .find(|label| label.kind == LabelKind::Block && label.parent_id == id.0)
            .map(|label| label.label.as_str())
            .filter(|label| !label.trim().is_empty())
    }

    /// Order-insensitive copy used to compare overlays.
    pub fn normalized(&self) -> ConfigOverlay {
        let mut displays = self.displays.clone();
        displays.sort_by_key(|display| (display.kind, display.parent_id));
        let mut labels = self.labels.clone();
        labels.sort_by_key(|label| (label.kind, label.parent_id));
        ConfigOverlay { displays, labels }
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty() && self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    Draft,
    Published,
}

/// Versioned overlay snapshot. Version 0 is the unconfigured form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormConfig {
    #[serde(default)]
    pub version: u32,
    pub status: ConfigStatus,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub overlay: ConfigOverlay,
}

impl FormConfig {
    /// Configuration of a form nobody customized yet.
    pub fn unconfigured() -> Self {
        Self {
            version: 0,
            status: ConfigStatus::Published,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            overlay: ConfigOverlay::default(),
        }
    }

    pub fn draft(overlay: ConfigOverlay, created_at: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            status: ConfigStatus::Draft,
            created_at,
            overlay,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == ConfigStatus::Published
    }
}
