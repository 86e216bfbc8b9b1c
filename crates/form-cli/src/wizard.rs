use form_spec::{Answer, BlockType, RenderBlock, RenderPayload, RenderStatus, normalize_html};

/// Controls which bits of state the wizard prints.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum Verbosity {
    /// Clean output: prompts only.
    Clean,
    /// Verbose output: status, progress, save receipts.
    Verbose,
}

impl Verbosity {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Clean
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, Verbosity::Verbose)
    }
}

/// Prints steps and block prompts while a respondent fills a form.
pub struct WizardPresenter {
    verbosity: Verbosity,
    header_printed: bool,
    show_answers_json: bool,
}

impl WizardPresenter {
    pub fn new(verbosity: Verbosity, show_answers_json: bool) -> Self {
        Self {
            verbosity,
            header_printed: false,
            show_answers_json,
        }
    }

    pub fn show_header(&mut self, payload: &RenderPayload) {
        if self.header_printed {
            return;
        }
        println!("Form: {}", payload.form_title);
        if self.verbosity.is_verbose() {
            println!("Configuration version: {}", payload.config_version);
        }
        self.header_printed = true;
    }

    pub fn show_step(&self, payload: &RenderPayload) {
        println!(
            "Step {}/{}: {}",
            payload.step.position, payload.step.total, payload.step.title
        );
        if self.verbosity.is_verbose() {
            println!(
                "Status: {} ({}/{})",
                payload.status.as_str(),
                payload.progress.answered,
                payload.progress.total
            );
        } else if payload.status == RenderStatus::NeedInput && answerable_count(payload) == 0 {
            println!("No answerable blocks on this step; check the configuration.");
        }
    }

    /// Prints a content block or the question part of an input block.
    pub fn show_block(&self, block: &RenderBlock) {
        match block.kind {
            BlockType::Divider => println!("----"),
            BlockType::Heading1 | BlockType::Heading2 | BlockType::Heading3 => {
                println!("## {}", normalize_html(&block.label));
            }
            BlockType::Paragraph => println!("{}", normalize_html(&block.label)),
            _ => {
                let mut line = normalize_html(&block.label);
                if block.required {
                    line.push_str(" *");
                }
                println!("{}", line);
                if let Some(hint) = &block.hint {
                    println!("{}", normalize_html(hint));
                }
                if let (Some(down), Some(up)) = (&block.down_label, &block.up_label) {
                    println!("(1 = {}, {} = {})", down, block.options.len(), up);
                }
                for (index, option) in block.options.iter().enumerate() {
                    let marker = if option.selected { "x" } else { " " };
                    println!("  [{}] {}. {}", marker, index + 1, option.label);
                }
            }
        }
    }

    pub fn show_input_error(&self, message: &str) {
        eprintln!("Invalid answer: {}", message);
    }

    pub fn show_missing(&self, missing: &[String]) {
        println!("Missing required answers: {}", missing.join(", "));
    }

    pub fn show_saved(&self, step_position: usize, upserted: usize, retracted: usize) {
        if self.verbosity.is_verbose() {
            println!(
                "Saved step {} ({} answer(s) written, {} retracted)",
                step_position, upserted, retracted
            );
        }
    }

    pub fn show_completion(&self, answers: &[Answer]) {
        println!("Done ✅ ({} answer(s) recorded)", answers.len());
        if self.show_answers_json {
            match serde_json::to_string_pretty(answers) {
                Ok(pretty) => println!("{}", pretty),
                Err(err) => eprintln!("Failed to serialize answers to JSON: {}", err),
            }
        }
    }
}

fn answerable_count(payload: &RenderPayload) -> usize {
    payload
        .blocks
        .iter()
        .filter(|block| !block.kind.is_content())
        .count()
}

/// What the respondent typed for a choice block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceInput {
    /// Keep the current selection.
    Keep,
    /// 1-based option positions.
    Positions(Vec<usize>),
}

/// Parses `2` or `1, 3` against a block offering `option_count` options.
pub fn parse_choice(raw: &str, option_count: usize, multiple: bool) -> Result<ChoiceInput, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ChoiceInput::Keep);
    }
    let mut positions = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let position: usize = part
            .parse()
            .map_err(|_| format!("'{}' is not an option number", part))?;
        if position == 0 || position > option_count {
            return Err(format!(
                "option {} is out of range (1-{})",
                position, option_count
            ));
        }
        if !positions.contains(&position) {
            positions.push(position);
        }
    }
    if !multiple && positions.len() > 1 {
        return Err("only one option can be chosen".into());
    }
    Ok(ChoiceInput::Positions(positions))
}
