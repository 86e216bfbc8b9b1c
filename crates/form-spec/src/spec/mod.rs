pub mod config;
pub mod template;

pub use config::{
    ConfigDisplay, ConfigLabel, ConfigOverlay, ConfigStatus, DisplayKind, FormConfig, LabelKind,
};
pub use template::{
    AnswerShape, Block, BlockId, BlockOption, BlockType, FormTemplate, OptionId, Step, StepId,
};
