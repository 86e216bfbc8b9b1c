pub mod backend;
pub mod config;
pub mod memory;
pub mod pipeline;
pub mod routing;
pub mod session;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use form_spec::{
    Answer, AnswerCollector, FormConfig, FormTemplate, RenderPayload, ResolvedForm,
    build_builder_payload, build_render_payload, render_json_ui as spec_render_json_ui,
    render_text as spec_render_text,
};

pub use backend::{
    AnswerBatch, BackendError, ConfigBackend, FormBackend, FormRecord, NewReview, UpsertOutcome,
};
pub use config::{IntegrityError, RuntimeConfig};
pub use memory::InMemoryBackend;
pub use pipeline::{
    PipelineError, ReviewTarget, SaveReceipt, StepOutcome, SubmissionPipeline, open_form,
};
pub use routing::{format_step_query, parse_step_query};
pub use session::{MemorySession, SessionStore, ensure_session};

const DEFAULT_TEMPLATE: &str = include_str!("../../form-spec/tests/fixtures/root_form.json");

#[derive(Debug, Error)]
enum ComponentError {
    #[error("failed to parse config/{0}")]
    ConfigParse(#[source] serde_json::Error),
    #[error("form '{0}' is not available")]
    FormUnavailable(String),
    #[error("json encode error: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("step {0} does not exist")]
    StepOutOfRange(usize),
}

/// Component configuration: the template, the configuration version to apply
/// and the runtime knobs, each optional.
#[derive(Debug, Deserialize, Serialize, Default)]
struct ComponentConfig {
    #[serde(default)]
    template_json: Option<String>,
    #[serde(default)]
    form_config_json: Option<String>,
    #[serde(default)]
    runtime: RuntimeConfig,
}

/// Per-call rendering context.
#[derive(Debug, Deserialize, Default)]
struct RenderContext {
    #[serde(default)]
    step: Option<usize>,
    #[serde(default)]
    builder: bool,
    #[serde(default)]
    product_title: Option<String>,
}

struct LoadedForm {
    form: ResolvedForm,
    runtime: RuntimeConfig,
}

fn load_component_config(config_json: &str) -> Result<ComponentConfig, ComponentError> {
    if config_json.trim().is_empty() {
        return Ok(ComponentConfig::default());
    }
    serde_json::from_str(config_json).map_err(ComponentError::ConfigParse)
}

fn load_template(config: &ComponentConfig) -> Result<FormTemplate, ComponentError> {
    let template_json = config.template_json.as_deref().unwrap_or(DEFAULT_TEMPLATE);
    serde_json::from_str(template_json).map_err(ComponentError::ConfigParse)
}

fn ensure_form(form_id: &str, config_json: &str) -> Result<LoadedForm, ComponentError> {
    let config = load_component_config(config_json)?;
    let template = load_template(&config)?;
    if template.slug != form_id {
        return Err(ComponentError::FormUnavailable(form_id.to_string()));
    }
    let form_config = match config.form_config_json.as_deref() {
        Some(raw) => serde_json::from_str(raw).map_err(ComponentError::ConfigParse)?,
        None => FormConfig::unconfigured(),
    };
    let form = config
        .runtime
        .resolve(Arc::new(template), Arc::new(form_config))?;
    Ok(LoadedForm {
        form,
        runtime: config.runtime,
    })
}

fn parse_answers(answers_json: &str) -> Result<Vec<Answer>, ComponentError> {
    if answers_json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(answers_json).map_err(ComponentError::ConfigParse)
}

fn parse_context(ctx_json: &str) -> RenderContext {
    serde_json::from_str(ctx_json).unwrap_or_default()
}

fn respond(result: Result<Value, ComponentError>) -> String {
    match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|error| {
            json!({"error": format!("json encode: {}", error)}).to_string()
        }),
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

fn respond_string(result: Result<String, ComponentError>) -> String {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }).to_string(),
    }
}

/// The template a form is built on.
pub fn describe(form_id: &str, config_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|loaded| {
        serde_json::to_value(loaded.form.template()).map_err(ComponentError::JsonEncode)
    }))
}

/// The visibility map of the form under its configuration, with the
/// integrity report.
pub fn resolve(form_id: &str, config_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|loaded| {
        let visibility =
            serde_json::to_value(loaded.form.visibility()).map_err(ComponentError::JsonEncode)?;
        Ok(json!({
            "config_version": loaded.form.config_version(),
            "visible_steps": loaded.form.visible_steps(),
            "visibility": visibility,
        }))
    }))
}

fn render_payload(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> Result<RenderPayload, ComponentError> {
    let loaded = ensure_form(form_id, config_json)?;
    let ctx = parse_context(ctx_json);
    let mut labels = loaded.runtime.label_context();
    if ctx.product_title.is_some() {
        labels.product_title = ctx.product_title.clone();
    }

    if ctx.builder {
        let step = ctx.step.unwrap_or(0);
        return build_builder_payload(&loaded.form, step, &labels)
            .ok_or(ComponentError::StepOutOfRange(step));
    }

    let answers = parse_answers(answers_json)?;
    let collector = AnswerCollector::from_answers(loaded.form, &answers);
    let step = ctx.step.unwrap_or_else(|| first_open_step(&collector));
    build_render_payload(&collector, step, &labels).ok_or(ComponentError::StepOutOfRange(step))
}

/// First visible step that cannot be left yet, or the last visible one.
fn first_open_step(collector: &AnswerCollector) -> usize {
    let steps = collector.form().visible_steps();
    steps
        .iter()
        .copied()
        .find(|index| !collector.step_state(*index).allows_continue())
        .or_else(|| steps.last().copied())
        .unwrap_or(0)
}

pub fn render_text(form_id: &str, config_json: &str, ctx_json: &str, answers_json: &str) -> String {
    respond_string(
        render_payload(form_id, config_json, ctx_json, answers_json)
            .map(|payload| spec_render_text(&payload)),
    )
}

pub fn render_json_ui(
    form_id: &str,
    config_json: &str,
    ctx_json: &str,
    answers_json: &str,
) -> String {
    respond(
        render_payload(form_id, config_json, ctx_json, answers_json)
            .map(|payload| spec_render_json_ui(&payload)),
    )
}

/// Splits persisted answers into the ones the configuration accepts and the
/// rejected ones.
pub fn validate_answers(form_id: &str, config_json: &str, answers_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|loaded| {
        let answers = parse_answers(answers_json)?;
        let check = form_spec::validate_answers(&loaded.form, &answers);
        serde_json::to_value(check).map_err(ComponentError::JsonEncode)
    }))
}

/// Per-step state and overall progress for a set of answers.
pub fn step_status(form_id: &str, config_json: &str, answers_json: &str) -> String {
    respond(ensure_form(form_id, config_json).and_then(|loaded| {
        let answers = parse_answers(answers_json)?;
        let collector = AnswerCollector::from_answers(loaded.form, &answers);
        let form = collector.form();
        let steps: Vec<Value> = form
            .template()
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let visible = form.visibility().is_step_visible(step.id);
                let validation = collector.validate_step(index);
                json!({
                    "index": index,
                    "title": step.title,
                    "visible": visible,
                    "state": collector.step_state(index).as_str(),
                    "missing_required": validation.missing_required,
                })
            })
            .collect();
        let complete = form
            .visible_steps()
            .into_iter()
            .all(|index| collector.step_state(index).allows_continue());
        let (answered, total) = collector.progress();
        Ok(json!({
            "status": if complete { "complete" } else { "need_input" },
            "next_step": first_open_step(&collector),
            "steps": steps,
            "progress": {
                "answered": answered,
                "total": total,
            },
        }))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(u32, &str, u32)]) -> String {
        let answers: Vec<Value> = pairs
            .iter()
            .map(|(block, code, option)| {
                json!({ "block_id": block, "field_code": code, "answer_item_id": option })
            })
            .collect();
        Value::Array(answers).to_string()
    }

    #[test]
    fn describe_returns_template_json() {
        let payload = describe("root", "");
        let template: Value = serde_json::from_str(&payload).expect("valid json");
        assert_eq!(template["slug"], "root");
        assert_eq!(template["steps"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn unknown_form_reports_an_error() {
        let payload = describe("other", "");
        let parsed: Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(parsed["error"], "form 'other' is not available");
    }

    #[test]
    fn resolve_applies_the_configuration() {
        let form_config = json!({
            "version": 2,
            "status": "published",
            "created_at": "2024-06-01T09:00:00Z",
            "displays": [{ "parent_id": 30, "kind": "step", "hidden": true }],
            "labels": []
        });
        let config = json!({ "form_config_json": form_config.to_string() });
        let parsed: Value = serde_json::from_str(&resolve("root", &config.to_string())).unwrap();
        assert_eq!(parsed["config_version"], 2);
        assert_eq!(parsed["visible_steps"], json!([0, 1]));
    }

    #[test]
    fn strict_runtime_refuses_dangling_configuration() {
        let form_config = json!({
            "version": 2,
            "status": "published",
            "created_at": "2024-06-01T09:00:00Z",
            "displays": [{ "parent_id": 4242, "kind": "block", "hidden": true }]
        });
        let config = json!({
            "form_config_json": form_config.to_string(),
            "runtime": { "strict_integrity": true }
        });
        let parsed: Value = serde_json::from_str(&resolve("root", &config.to_string())).unwrap();
        assert!(
            parsed["error"]
                .as_str()
                .is_some_and(|error| error.contains("missing template element"))
        );
    }

    #[test]
    fn validate_answers_splits_accepted_and_rejected() {
        let payload = answers(&[
            (200, "contact_channels", 2002),
            (203, "contact_reached_phone", 2031),
        ]);
        let parsed: Value =
            serde_json::from_str(&validate_answers("root", "", &payload)).expect("json");
        assert_eq!(parsed["accepted"].as_array().map(Vec::len), Some(1));
        assert_eq!(parsed["rejected"][0]["code"], "unreachable");
    }

    #[test]
    fn step_status_reports_progress() {
        let payload = answers(&[(101, "satisfaction", 1003), (102, "difficulties", 1011)]);
        let parsed: Value =
            serde_json::from_str(&step_status("root", "", &payload)).expect("json");
        assert_eq!(parsed["status"], "need_input");
        assert_eq!(parsed["next_step"], 1);
        assert_eq!(parsed["steps"][0]["state"], "valid");
        assert_eq!(parsed["steps"][1]["missing_required"][0], "contact_channels");
        assert_eq!(parsed["progress"]["answered"], 2);
    }

    #[test]
    fn render_text_uses_the_product_title() {
        let ctx = json!({ "step": 0, "product_title": "Démarche test" });
        let text = render_text("root", "", &ctx.to_string(), "[]");
        assert!(text.contains("Démarche test"));
        assert!(text.contains("Step 1/3: Satisfaction"));
    }

    #[test]
    fn render_json_ui_builder_mode_keeps_hidden_options() {
        let form_config = json!({
            "version": 1,
            "status": "published",
            "created_at": "2024-03-01T09:00:00Z",
            "displays": [{ "parent_id": 2003, "kind": "blockOption", "hidden": true }]
        });
        let config = json!({ "form_config_json": form_config.to_string() });
        let ctx = json!({ "step": 1, "builder": true });
        let parsed: Value =
            serde_json::from_str(&render_json_ui("root", &config.to_string(), &ctx.to_string(), ""))
                .expect("json");
        assert_eq!(parsed["mode"], "builder");
        assert_eq!(parsed["blocks"][0]["options"].as_array().map(Vec::len), Some(5));
        assert_eq!(parsed["blocks"][0]["options"][2]["visible"], false);
    }

    #[test]
    fn render_out_of_range_step_is_an_error() {
        let ctx = json!({ "step": 12 });
        let parsed: Value =
            serde_json::from_str(&render_json_ui("root", "", &ctx.to_string(), "[]")).unwrap();
        assert_eq!(parsed["error"], "step 12 does not exist");
    }
}
