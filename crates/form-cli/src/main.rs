mod wizard;

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use component_form::{
    InMemoryBackend, MemorySession, PipelineError, ReviewTarget, RuntimeConfig, StepOutcome,
    SubmissionPipeline, open_form, render_json_ui, render_text,
};
use form_spec::{
    Answer, AnswerCollector, AnswerShape, CollectError, ConfigBuilder, ConfigHistory,
    ConfigStatus, FormConfig, FormTemplate, LabelContext, RenderBlock, Selection,
    build_render_payload, config_schema, template_schema, validate_answers,
};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use wizard::{ChoiceInput, Verbosity, WizardPresenter, parse_choice};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const LOG_ENV: &str = "JDMA_FORM_LOG";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "JDMA form template and configuration CLI",
    long_about = "Inspects, renders and validates form templates under versioned configurations, and fills forms in a text shell"
)]
struct Cli {
    /// JSON file with runtime settings (linkage strategy, product title, integrity policy).
    #[arg(long, value_name = "FILE", global = true)]
    runtime_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SchemaKind {
    Template,
    Config,
}

#[derive(Subcommand)]
enum Command {
    /// Print the JSON schema of templates or configurations.
    Schema {
        #[arg(long, value_enum, default_value_t = SchemaKind::Template)]
        kind: SchemaKind,
    },
    /// Show steps, blocks, conditional links and integrity issues.
    Inspect {
        /// Path to the template JSON.
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        /// Optional configuration JSON layered on the template.
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
    },
    /// Render one step for a respondent or for the form builder.
    Render {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
        /// JSON array of recorded answers.
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// Zero-based step index; defaults to the first step still needing input.
        #[arg(long)]
        step: Option<usize>,
        /// Builder view: keep hidden elements and flag them.
        #[arg(long)]
        builder: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Check recorded answers against a template and configuration.
    Validate {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
    },
    /// Compare a draft configuration with the published one.
    Diff {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        /// Published configuration; the unconfigured form when omitted.
        #[arg(long, value_name = "CONFIG")]
        published: Option<PathBuf>,
        /// Draft configuration JSON.
        #[arg(long, value_name = "CONFIG")]
        draft: PathBuf,
    },
    /// Fill a form in the terminal and record a review.
    Fill {
        #[arg(long, value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(long, value_name = "CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        product_id: u32,
        /// Write the recorded answers to this file.
        #[arg(long, value_name = "FILE")]
        answers_out: Option<PathBuf>,
        /// Show status, progress and save receipts.
        #[arg(long, alias = "debug")]
        verbose: bool,
        /// Also print the recorded answers as JSON.
        #[arg(long)]
        answers_json: bool,
    },
}

fn main() -> CliResult<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = load_runtime(cli.runtime_config.as_deref())?;
    match cli.command {
        Command::Schema { kind } => run_schema(kind),
        Command::Inspect { template, config } => run_inspect(&runtime, template, config),
        Command::Render {
            template,
            config,
            answers,
            step,
            builder,
            format,
        } => run_render(&runtime, template, config, answers, step, builder, format),
        Command::Validate {
            template,
            config,
            answers,
        } => run_validate(&runtime, template, config, answers),
        Command::Diff {
            template,
            published,
            draft,
        } => run_diff(&runtime, template, published, draft),
        Command::Fill {
            template,
            config,
            product_id,
            answers_out,
            verbose,
            answers_json,
        } => {
            let tokio_runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            tokio_runtime.block_on(run_fill(
                &runtime,
                template,
                config,
                product_id,
                answers_out,
                WizardPresenter::new(Verbosity::from_verbose(verbose), answers_json),
            ))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_runtime(path: Option<&Path>) -> CliResult<RuntimeConfig> {
    match path {
        Some(path) => Ok(RuntimeConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn read_template(path: &Path) -> CliResult<FormTemplate> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn read_config(path: Option<&Path>) -> CliResult<FormConfig> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(FormConfig::unconfigured()),
    }
}

fn read_answers(path: Option<&Path>) -> CliResult<Vec<Answer>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(Vec::new()),
    }
}

fn run_schema(kind: SchemaKind) -> CliResult<()> {
    let schema = match kind {
        SchemaKind::Template => template_schema(),
        SchemaKind::Config => config_schema(),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn run_inspect(
    runtime: &RuntimeConfig,
    template_path: PathBuf,
    config_path: Option<PathBuf>,
) -> CliResult<()> {
    let template = read_template(&template_path)?;
    let config = read_config(config_path.as_deref())?;
    let linkage = runtime.parent_link();
    let form = form_spec::ResolvedForm::new(Arc::new(template), Arc::new(config), linkage.as_ref());
    let visibility = form.visibility();

    println!(
        "Template: {} ({}), configuration v{}, linkage {}",
        form.template().title,
        form.template().slug,
        form.config_version(),
        linkage.name()
    );
    for (index, step) in form.template().steps.iter().enumerate() {
        let hidden = if visibility.is_step_visible(step.id) {
            ""
        } else {
            " [hidden]"
        };
        println!("Step {} ({}): {}{}", index, step.id, step.title, hidden);
        for block in &step.blocks {
            let mut line = format!(
                "  {} {} ({})",
                block.id,
                block.field_code(),
                block.kind.as_str()
            );
            if let Some(option) = visibility.parent_option(block.id) {
                line.push_str(&format!(" <- option {}", option));
            }
            if !visibility.is_block_visible(block.id) {
                line.push_str(" [hidden]");
            } else if !visibility.is_block_reachable(block.id) {
                line.push_str(" [unreachable]");
            }
            println!("{}", line);
            for option in &block.options {
                if !visibility.is_option_visible(option.id) {
                    println!("    option {} {} [hidden]", option.id, option.label);
                }
            }
        }
    }

    let issues = visibility.integrity_issues();
    if issues.is_empty() {
        println!("Integrity: ok");
    } else {
        println!("Integrity issues:");
        for issue in issues {
            println!("  {}", serde_json::to_string(issue)?);
        }
    }
    Ok(())
}

/// Builds the component configuration the JSON facade expects.
fn component_config(
    runtime: &RuntimeConfig,
    template_path: &Path,
    config_path: Option<&Path>,
) -> CliResult<String> {
    let mut config = json!({
        "template_json": fs::read_to_string(template_path)?,
        "runtime": serde_json::to_value(runtime)?,
    });
    if let Some(path) = config_path {
        config["form_config_json"] = Value::String(fs::read_to_string(path)?);
    }
    Ok(config.to_string())
}

fn parse_component_result(response: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(response)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(error.to_string().into());
    }
    Ok(value)
}

fn run_render(
    runtime: &RuntimeConfig,
    template_path: PathBuf,
    config_path: Option<PathBuf>,
    answers_path: Option<PathBuf>,
    step: Option<usize>,
    builder: bool,
    format: OutputFormat,
) -> CliResult<()> {
    let template = read_template(&template_path)?;
    let config_json = component_config(runtime, &template_path, config_path.as_deref())?;
    let answers = read_answers(answers_path.as_deref())?;
    let answers_json = serde_json::to_string(&answers)?;
    let ctx = json!({ "step": step, "builder": builder }).to_string();

    match format {
        OutputFormat::Json => {
            let ui = parse_component_result(&render_json_ui(
                &template.slug,
                &config_json,
                &ctx,
                &answers_json,
            ))?;
            println!("{}", serde_json::to_string_pretty(&ui)?);
        }
        OutputFormat::Text => {
            let text = render_text(&template.slug, &config_json, &ctx, &answers_json);
            if text.starts_with("{\"error\"") {
                parse_component_result(&text)?;
            }
            println!("{}", text);
        }
    }
    Ok(())
}

fn run_validate(
    runtime: &RuntimeConfig,
    template_path: PathBuf,
    config_path: Option<PathBuf>,
    answers_path: PathBuf,
) -> CliResult<()> {
    let template = read_template(&template_path)?;
    let config = read_config(config_path.as_deref())?;
    let answers = read_answers(Some(&answers_path))?;
    let form = runtime.resolve(Arc::new(template), Arc::new(config))?;

    let check = validate_answers(&form, &answers);
    let valid = check.rejected.is_empty();
    println!(
        "Validation result: {}",
        if valid { "valid" } else { "invalid" }
    );
    println!("Accepted answers: {}", check.accepted.len());
    if !check.rejected.is_empty() {
        println!("Rejected answers:");
        for rejected in &check.rejected {
            println!(
                "  {} (block {}) - {}",
                rejected.answer.field_code, rejected.answer.block_id, rejected.code
            );
        }
    }

    if valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn run_diff(
    runtime: &RuntimeConfig,
    template_path: PathBuf,
    published_path: Option<PathBuf>,
    draft_path: PathBuf,
) -> CliResult<()> {
    let template = Arc::new(read_template(&template_path)?);
    let published = published_path
        .as_deref()
        .map(|path| read_config(Some(path)))
        .transpose()?;
    let draft = read_config(Some(&draft_path))?;

    let builder = ConfigBuilder::new(Arc::clone(&template), published.as_ref()).with_draft(draft.overlay);
    let ctx = runtime.label_context();
    println!(
        "Changed: {}",
        if builder.has_changed() { "yes" } else { "no" }
    );
    let modified = builder.modified_steps(&ctx);
    if modified.is_empty() {
        println!("Modified steps: none");
    } else {
        let titles: Vec<String> = modified
            .iter()
            .filter_map(|id| template.step_by_id(*id))
            .map(|step| format!("{} ({})", step.title, step.id))
            .collect();
        println!("Modified steps: {}", titles.join(", "));
    }
    Ok(())
}

async fn run_fill(
    runtime: &RuntimeConfig,
    template_path: PathBuf,
    config_path: Option<PathBuf>,
    product_id: u32,
    answers_out: Option<PathBuf>,
    mut presenter: WizardPresenter,
) -> CliResult<()> {
    let template = read_template(&template_path)?;
    let form_id = template.slug.clone();
    let history = match config_path.as_deref() {
        Some(path) => published_history(read_config(Some(path))?),
        None => ConfigHistory::default(),
    };

    let backend = Arc::new(InMemoryBackend::new(runtime.parent_link()));
    backend
        .insert_form_with_history(form_id.clone(), template, history)
        .await;
    let pipeline = SubmissionPipeline::new(
        backend.clone(),
        Arc::new(MemorySession::new()),
        ReviewTarget {
            form_id: form_id.clone(),
            product_id,
            button_id: None,
        },
    );
    let mut collector = open_form(backend.as_ref(), &form_id, runtime).await?;
    let labels = runtime.label_context();
    tracing::info!(
        form = %form_id,
        config_version = collector.form().config_version(),
        "filling form"
    );

    loop {
        fill_step(&mut collector, &labels, &mut presenter)?;
        match pipeline.continue_step(&mut collector).await {
            Ok(StepOutcome::Advanced(receipt, _)) => {
                presenter.show_saved(
                    receipt.step_index + 1,
                    receipt.upserted,
                    receipt.retracted.len(),
                );
            }
            Ok(StepOutcome::Finalized(receipt)) => {
                let answers = backend
                    .review(receipt.review_id)
                    .await
                    .map(|review| review.answers)
                    .unwrap_or_default();
                presenter.show_completion(&answers);
                if let Some(path) = &answers_out {
                    fs::write(path, serde_json::to_string_pretty(&answers)?)?;
                }
                return Ok(());
            }
            Err(PipelineError::Collect(CollectError::StepIncomplete { step, missing })) => {
                tracing::debug!(step, missing = missing.len(), "step held by required answers");
                presenter.show_missing(&missing);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// History holding a configuration file as the live published version.
/// Version 0 stands for the unconfigured form, so an unnumbered file becomes
/// version 1.
fn published_history(mut config: FormConfig) -> ConfigHistory {
    if config.version == 0 {
        config.version = 1;
    }
    config.status = ConfigStatus::Published;
    ConfigHistory {
        published: vec![config],
        draft: None,
    }
}

/// Prompts every block of the current step, including blocks revealed by
/// the answers given along the way.
fn fill_step(
    collector: &mut AnswerCollector,
    labels: &LabelContext,
    presenter: &mut WizardPresenter,
) -> CliResult<()> {
    let step_index = collector.current_step();
    let mut asked = BTreeSet::new();
    let mut step_shown = false;
    loop {
        let payload = build_render_payload(collector, step_index, labels)
            .ok_or_else(|| format!("step {} does not exist", step_index))?;
        if !step_shown {
            presenter.show_header(&payload);
            presenter.show_step(&payload);
            step_shown = true;
        }
        let Some(block) = payload
            .blocks
            .iter()
            .find(|block| !asked.contains(&block.id))
        else {
            return Ok(());
        };
        asked.insert(block.id);
        presenter.show_block(block);
        if !block.kind.is_content() {
            prompt_block(collector, block, presenter)?;
        }
    }
}

fn prompt_block(
    collector: &mut AnswerCollector,
    block: &RenderBlock,
    presenter: &WizardPresenter,
) -> CliResult<()> {
    let shape = block.kind.answer_shape();
    loop {
        let result = match shape {
            AnswerShape::Text => {
                let current = match collector.selection(block.id) {
                    Some(Selection::Text(text)) => Some(text.clone()),
                    _ => None,
                };
                let line = prompt_line("Answer", current.as_deref())?;
                collector.set_text(block.id, &line).map_err(|err| err.to_string())
            }
            AnswerShape::Single | AnswerShape::Multiple => {
                let multiple = shape == AnswerShape::Multiple;
                let prompt = if multiple {
                    "Options (comma separated)"
                } else {
                    "Option"
                };
                let line = prompt_line(prompt, None)?;
                parse_choice(&line, block.options.len(), multiple)
                    .and_then(|input| apply_choice(collector, block, input))
            }
            AnswerShape::None => Ok(()),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(message) => presenter.show_input_error(&message),
        }
    }
}

fn apply_choice(
    collector: &mut AnswerCollector,
    block: &RenderBlock,
    input: ChoiceInput,
) -> Result<(), String> {
    let ChoiceInput::Positions(positions) = input else {
        return Ok(());
    };
    collector.clear(block.id).map_err(|err| err.to_string())?;
    for position in positions {
        let option = &block.options[position - 1];
        collector
            .select(block.id, option.id)
            .map_err(|err| err.to_string())?;
        if option.is_other {
            let text = prompt_line("Précisez", None).map_err(|err| err.to_string())?;
            collector
                .set_other_text(block.id, option.id, &text)
                .map_err(|err| err.to_string())?;
        }
    }
    Ok(())
}

fn prompt_line(prompt: &str, default: Option<&str>) -> CliResult<String> {
    if let Some(default_value) = default {
        print!("{} [{}]: ", prompt, default_value);
    } else {
        print!("{}: ", prompt);
    }
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Err("input closed before the form was completed".into());
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(default.unwrap_or_default().to_string())
    } else {
        Ok(trimmed.to_string())
    }
}
