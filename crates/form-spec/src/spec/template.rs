use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a template step.
    StepId
);
numeric_id!(
    /// Identifier of a template block.
    BlockId
);
numeric_id!(
    /// Identifier of a block option.
    OptionId
);

/// Closed set of block kinds a template can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Paragraph,
    #[serde(rename = "heading_1")]
    Heading1,
    #[serde(rename = "heading_2")]
    Heading2,
    #[serde(rename = "heading_3")]
    Heading3,
    Divider,
    SmileyInput,
    MarkInput,
    Radio,
    Checkbox,
    InputText,
    InputTextArea,
}

/// How many answers a block kind produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    /// Content only, never answered.
    None,
    /// Zero or one selected option.
    Single,
    /// Any number of selected options.
    Multiple,
    /// Zero or one free text.
    Text,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::Heading1 => "heading_1",
            BlockType::Heading2 => "heading_2",
            BlockType::Heading3 => "heading_3",
            BlockType::Divider => "divider",
            BlockType::SmileyInput => "smiley_input",
            BlockType::MarkInput => "mark_input",
            BlockType::Radio => "radio",
            BlockType::Checkbox => "checkbox",
            BlockType::InputText => "input_text",
            BlockType::InputTextArea => "input_text_area",
        }
    }

    pub fn answer_shape(&self) -> AnswerShape {
        match self {
            BlockType::Paragraph
            | BlockType::Heading1
            | BlockType::Heading2
            | BlockType::Heading3
            | BlockType::Divider => AnswerShape::None,
            BlockType::SmileyInput | BlockType::MarkInput | BlockType::Radio => AnswerShape::Single,
            BlockType::Checkbox => AnswerShape::Multiple,
            BlockType::InputText | BlockType::InputTextArea => AnswerShape::Text,
        }
    }

    /// Content blocks are rendered but never collect answers.
    pub fn is_content(&self) -> bool {
        matches!(self.answer_shape(), AnswerShape::None)
    }
}

/// A selectable choice inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BlockOption {
    pub id: OptionId,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub position: u32,
    #[serde(default, alias = "isOther")]
    pub is_other: bool,
    #[serde(default, alias = "isIsolated")]
    pub is_isolated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// One question or content unit within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", alias = "type_bloc")]
    pub kind: BlockType,
    #[serde(default)]
    pub position: u32,
    #[serde(default, alias = "isRequired")]
    pub is_required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<BlockOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    /// Option whose selection reveals this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_option_id: Option<OptionId>,
    #[serde(default, alias = "upLabel", skip_serializing_if = "Option::is_none")]
    pub up_label: Option<String>,
    #[serde(default, alias = "downLabel", skip_serializing_if = "Option::is_none")]
    pub down_label: Option<String>,
}

impl Block {
    /// Key answers to this block are reported under.
    pub fn field_code(&self) -> String {
        self.field_code
            .clone()
            .unwrap_or_else(|| format!("block_{}", self.id))
    }

    /// Label shown when no override applies. Paragraphs display their content.
    pub fn own_label(&self) -> &str {
        match (self.kind, self.content.as_deref()) {
            (BlockType::Paragraph, Some(content)) if !content.trim().is_empty() => content,
            _ => &self.label,
        }
    }

    pub fn option(&self, id: OptionId) -> Option<&BlockOption> {
        self.options.iter().find(|option| option.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub id: StepId,
    pub title: String,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Immutable question structure shared by every form using it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormTemplate {
    pub id: u32,
    pub title: String,
    pub slug: String,
    pub steps: Vec<Step>,
}

impl FormTemplate {
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn step_by_id(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Every block in template order, paired with the index of its step.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.steps
            .iter()
            .enumerate()
            .flat_map(|(index, step)| step.blocks.iter().map(move |block| (index, block)))
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks()
            .map(|(_, block)| block)
            .find(|block| block.id == id)
    }

    pub fn step_index_of(&self, id: BlockId) -> Option<usize> {
        self.blocks()
            .find(|(_, block)| block.id == id)
            .map(|(index, _)| index)
    }

    /// Finds an option and the block that owns it.
    pub fn option(&self, id: OptionId) -> Option<(&Block, &BlockOption)> {
        self.blocks().find_map(|(_, block)| {
            block
                .options
                .iter()
                .find(|option| option.id == id)
                .map(|option| (block, option))
        })
    }

    pub fn block_by_field_code(&self, field_code: &str) -> Option<&Block> {
        self.blocks()
            .map(|(_, block)| block)
            .find(|block| block.field_code() == field_code)
    }
}
