use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use form_engine::{EngineConfig, FileStore, FormEngine, NavOutcome, SubmitOutcome};
use form_spec::render::value_to_display;
use form_spec::{FieldSpec, FieldType, FormSpec, RenderPayload, ScreenStatus, ValueMap};
use serde_json::{Number, Value};
use thiserror::Error;
use tracing::debug;

use crate::{CliResult, RenderMode, print_payload, seed_answers};

/// How much engine state the wizard echoes besides the prompts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verbosity {
    Quiet,
    Detailed,
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        if verbose { Self::Detailed } else { Self::Quiet }
    }
}

pub struct WizardOptions {
    pub draft_dir: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub answers_json: bool,
    pub format: RenderMode,
}

/// Drives one engine instance from stdin until the form is submitted.
pub async fn run(
    spec: FormSpec,
    initial: Option<ValueMap>,
    options: WizardOptions,
) -> CliResult<()> {
    // drafts are written as soon as the wizard settles
    let mut config = EngineConfig {
        persist_debounce_ms: 0,
        ..EngineConfig::default()
    };
    let mut builder = FormEngine::builder(spec);
    if let Some(dir) = &options.draft_dir {
        config.restore_on_mount = true;
        builder = builder.storage(FileStore::new(dir));
    }
    let mut engine = builder.config(config).build()?;
    if let Some(answers) = &initial {
        seed_answers(&mut engine, answers);
    }

    let mut console = Console::new(options.verbosity, options.answers_json);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut queue = engine.current_fields();

    loop {
        engine.settle().await;
        let payload = engine.render();
        console.screen(&payload);
        if options.format != RenderMode::Text {
            print_payload(&payload, options.format)?;
        }

        for name in &queue {
            ask(&mut engine, name, &console, &mut input)?;
        }
        engine.settle().await;

        let last = engine.current_page() >= engine.total_pages();
        if last {
            match engine.submit().await? {
                SubmitOutcome::Submitted => {
                    console.finished(engine.values());
                    return Ok(());
                }
                SubmitOutcome::Blocked { fields } => {
                    console.blocked(&engine, &fields);
                    queue = fields;
                }
                SubmitOutcome::AlreadySubmitting | SubmitOutcome::Closed => {
                    return Err("form closed before it was submitted".into());
                }
            }
            continue;
        }

        queue = match engine.next_page() {
            NavOutcome::Blocked { fields } => {
                console.blocked(&engine, &fields);
                fields
            }
            NavOutcome::Moved { from, to } => {
                debug!(?from, ?to, "wizard moved on");
                engine.current_fields()
            }
            NavOutcome::Unchanged => engine.current_fields(),
        };
    }
}

/// Prompts for one field until it holds a value without errors.
fn ask(
    engine: &mut FormEngine,
    name: &str,
    console: &Console,
    input: &mut impl BufRead,
) -> CliResult<()> {
    let Some(field) = engine.spec().field(name).cloned() else {
        return Ok(());
    };
    loop {
        console.prompt(&field, engine.get(name));
        let raw = read_answer(input)?;
        if raw.eq_ignore_ascii_case("exit") {
            return Err("wizard aborted by user".into());
        }

        // blank keeps the current value
        let parsed = match (raw.is_empty(), engine.get(name).is_some()) {
            (true, true) => None,
            (true, false) if !field.required => return Ok(()),
            (true, false) => Some(Err(AnswerError::Missing)),
            (false, _) => Some(parse_answer(&field, &raw)),
        };
        match parsed {
            Some(Ok(value)) => {
                engine.set_value(name, value);
            }
            Some(Err(err)) => {
                console.rejected(&err);
                continue;
            }
            None => {}
        }

        engine.blur(name);
        let errors = engine.meta(name).errors;
        if errors.is_empty() {
            return Ok(());
        }
        console.field_errors(&field, &errors);
    }
}

fn read_answer(input: &mut impl BufRead) -> CliResult<String> {
    print!("> ");
    io::stdout().flush()?;
    let mut buffer = String::new();
    match input.read_line(&mut buffer)? {
        0 => Err("input ended before the form was complete".into()),
        _ => Ok(buffer.trim().to_owned()),
    }
}

/// Why a typed answer could not be turned into a field value.
#[derive(Debug, Error)]
enum AnswerError {
    #[error("This field requires an answer.")]
    Missing,
    #[error("Please enter yes or no.")]
    NotBoolean,
    #[error("Please enter a whole number.")]
    NotInteger,
    #[error("Please enter a finite number.")]
    NotNumber,
    #[error("Choose one of: {}.", .allowed.join(", "))]
    UnknownChoice { allowed: Vec<String> },
}

impl AnswerError {
    /// Input shape shown in detailed mode.
    fn expected(&self) -> Option<&'static str> {
        match self {
            AnswerError::Missing => None,
            AnswerError::NotBoolean => Some("y/n, yes/no, true/false or 1/0"),
            AnswerError::NotInteger => Some("an i64 such as 42"),
            AnswerError::NotNumber => Some("a finite decimal such as 72.5"),
            AnswerError::UnknownChoice { .. } => Some("a choice value or its label"),
        }
    }
}

fn parse_answer(field: &FieldSpec, raw: &str) -> Result<Value, AnswerError> {
    match field.kind {
        FieldType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" | "t" | "1" => Ok(Value::Bool(true)),
            "n" | "no" | "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(AnswerError::NotBoolean),
        },
        FieldType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| AnswerError::NotInteger),
        FieldType::Number | FieldType::Slider => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(AnswerError::NotNumber),
        FieldType::Select | FieldType::Radio => parse_choice(field, raw),
        _ => Ok(Value::String(raw.to_owned())),
    }
}

/// Accepts a choice value or its label, case-insensitively.
fn parse_choice(field: &FieldSpec, raw: &str) -> Result<Value, AnswerError> {
    let choices = field.choices.as_deref().unwrap_or_default();
    let matched = choices.iter().find(|choice| {
        value_to_display(&choice.value).eq_ignore_ascii_case(raw)
            || choice.label().eq_ignore_ascii_case(raw)
    });
    match matched {
        Some(choice) => Ok(choice.value.clone()),
        None => Err(AnswerError::UnknownChoice {
            allowed: choice_values(field),
        }),
    }
}

fn choice_values(field: &FieldSpec) -> Vec<String> {
    field
        .choices
        .iter()
        .flatten()
        .map(|choice| value_to_display(&choice.value))
        .collect()
}

fn input_hint(field: &FieldSpec) -> Option<String> {
    let hint = match field.kind {
        FieldType::Boolean => "y/n".to_owned(),
        FieldType::Integer => "whole number".to_owned(),
        FieldType::Number | FieldType::Slider => "number".to_owned(),
        FieldType::Date => "YYYY-MM-DD".to_owned(),
        FieldType::Select | FieldType::Radio => {
            let values = choice_values(field);
            if values.is_empty() {
                return None;
            }
            values.join("/")
        }
        _ => return None,
    };
    Some(hint)
}

/// Terminal output of the wizard. Prompts and results go to stdout, problems to stderr.
struct Console {
    verbosity: Verbosity,
    answers_json: bool,
    greeted: bool,
}

impl Console {
    fn new(verbosity: Verbosity, answers_json: bool) -> Self {
        Self {
            verbosity,
            answers_json,
            greeted: false,
        }
    }

    fn detailed(&self) -> bool {
        self.verbosity == Verbosity::Detailed
    }

    /// Title once, then the position line for every screen.
    fn screen(&mut self, payload: &RenderPayload) {
        if !self.greeted {
            self.greeted = true;
            println!("Form: {}", payload.form_title);
            if let Some(help) = payload.help.as_deref().filter(|_| self.detailed()) {
                println!("{help}");
            }
        }
        match &payload.active_tab {
            Some(tab) => println!("Tab {}/{}: {}", payload.page, payload.total_pages, tab),
            None => println!("Page {}/{}", payload.page, payload.total_pages),
        }
        if self.detailed() {
            println!(
                "[{}] {} of {} visible fields filled",
                payload.status.label(),
                payload.progress.filled,
                payload.progress.visible
            );
            let names: Vec<&str> = payload.fields.iter().map(|f| f.name.as_str()).collect();
            println!("Fields here: {}", names.join(", "));
        } else if payload.fields.is_empty() && payload.status == ScreenStatus::Editing {
            println!("Nothing to answer on this page.");
        }
    }

    fn prompt(&self, field: &FieldSpec, current: Option<&Value>) {
        let mut line = field.label.clone();
        if field.required {
            line.push_str(" *");
        }
        if let Some(hint) = input_hint(field) {
            line.push_str(&format!(" ({hint})"));
        }
        if let Some(current) = current.filter(|value| !value.is_null()) {
            line.push_str(&format!(" [{}]", value_to_display(current)));
        }
        println!("{line}");
        if let Some(description) = &field.description {
            println!("  {description}");
        }
    }

    fn rejected(&self, err: &AnswerError) {
        eprintln!("Invalid answer: {err}");
        if let Some(expected) = err.expected().filter(|_| self.detailed()) {
            eprintln!("  expected {expected}");
        }
    }

    fn field_errors(&self, field: &FieldSpec, errors: &[String]) {
        for error in errors {
            eprintln!("{}: {}", field.label, error);
        }
    }

    fn blocked(&self, engine: &FormEngine, fields: &[String]) {
        eprintln!("Please fix the following before continuing:");
        for name in fields {
            for error in engine.meta(name).errors {
                eprintln!("  {name} - {error}");
            }
        }
    }

    fn finished(&self, values: &ValueMap) {
        println!("Done ✅");
        match values.to_cbor() {
            Ok(bytes) => println!("Answers (CBOR hex): {}", to_hex(&bytes)),
            Err(err) => eprintln!("could not encode answers as CBOR: {err}"),
        }
        if self.answers_json {
            match values.to_json_pretty() {
                Ok(pretty) => println!("{pretty}"),
                Err(err) => eprintln!("could not encode answers as JSON: {err}"),
            }
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        out.push_str(&format!("{byte:02x}"));
        out
    })
}
