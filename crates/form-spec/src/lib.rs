#![allow(missing_docs)]

pub mod answers;
pub mod builder;
pub mod collector;
pub mod content;
pub mod history;
pub mod linkage;
pub mod render;
pub mod review;
pub mod spec;
pub mod validate;
pub mod visibility;

pub use answers::{
    Answer, AnswerCheck, ChoiceItem, RejectedAnswer, Selection, StepState, ValidationError,
    ValidationResult,
};
pub use builder::{BuilderError, ConfigBuilder};
pub use collector::{AnswerCollector, CollectError, StepBatch};
pub use content::{LabelContext, LabelRenderer, normalize_html};
pub use history::{ConfigHistory, HistoryError};
pub use linkage::{AutoLink, ExplicitLink, LabelLink, LinkageMode, ParentLink};
pub use render::{
    RenderBlock, RenderMode, RenderOption, RenderPayload, RenderProgress, RenderStatus,
    RenderStep, build_builder_payload, build_render_payload, render_json_ui, render_text,
};
pub use review::{InterpretedAnswer, Review, ReviewInterpretation, ReviewStatus, interpret_review};
pub use spec::{
    AnswerShape, Block, BlockId, BlockOption, BlockType, ConfigDisplay, ConfigLabel,
    ConfigOverlay, ConfigStatus, DisplayKind, FormConfig, FormTemplate, LabelKind, OptionId, Step,
    StepId,
};
pub use validate::{is_answerable, live_reachable, validate_answers, validate_step};
pub use visibility::{
    IntegrityIssue, ResolvedForm, VisibilityMap, resolve_config, resolve_visibility,
};

/// JSON schema of the template document.
pub fn template_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(FormTemplate)).unwrap_or_default()
}

/// JSON schema of a versioned configuration.
pub fn config_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(FormConfig)).unwrap_or_default()
}
