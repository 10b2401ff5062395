mod wizard;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use form_engine::{FormEngine, NavOutcome};
use form_spec::{
    FormSpec, RenderPayload, ValidationResult, ValueMap, render_card, render_json_ui, render_text,
    validate,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use wizard::{Verbosity, WizardOptions};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Schema-driven form helper",
    long_about = "Validates answers, previews pages and fills forms interactively"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum RenderMode {
    Text,
    Card,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Fill a form page by page in a text shell.
    Wizard {
        /// Path to the FormSpec JSON describing the form.
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        /// Optional JSON file containing initial answers.
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// Directory for drafts; an unfinished run resumes where it stopped.
        #[arg(long, value_name = "DIR")]
        draft_dir: Option<PathBuf>,
        /// Show verbose output (status, visible fields, parse expectations).
        #[arg(long, alias = "debug")]
        verbose: bool,
        /// Also emit answer JSON after completion.
        #[arg(long)]
        answers_json: bool,
        /// Render output mode for each page.
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Render one page of a form, optionally pre-filled with answers.
    Render {
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        #[arg(long, value_name = "ANSWERS")]
        answers: Option<PathBuf>,
        /// 1-based position among the visible pages (or tabs).
        #[arg(long)]
        page: Option<usize>,
        #[arg(long, value_enum, default_value_t = RenderMode::Text)]
        format: RenderMode,
    },
    /// Validate answers against a FormSpec in one pass.
    Validate {
        /// Path to the FormSpec JSON.
        #[arg(long, value_name = "SPEC")]
        spec: PathBuf,
        /// Path to the answers JSON file.
        #[arg(long, value_name = "ANSWERS")]
        answers: PathBuf,
    },
    /// Print the JSON schema of the FormSpec format.
    Schema,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> CliResult<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Wizard {
            spec,
            answers,
            draft_dir,
            verbose,
            answers_json,
            format,
        } => {
            let spec = load_spec(&spec)?;
            let initial = answers.as_deref().map(load_answers).transpose()?;
            let options = WizardOptions {
                draft_dir,
                verbosity: Verbosity::from(verbose),
                answers_json,
                format,
            };
            wizard::run(spec, initial, options).await
        }
        Command::Render {
            spec,
            answers,
            page,
            format,
        } => run_render(&spec, answers.as_deref(), page, format),
        Command::Validate { spec, answers } => run_validate(&spec, &answers),
        Command::Schema => run_schema(),
    }
}

/// Logs go to stderr; `CALC_FORMS_LOG` takes `EnvFilter` directives.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CALC_FORMS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_spec(path: &Path) -> CliResult<FormSpec> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read spec {}: {}", path.display(), err))?;
    let spec: FormSpec = serde_json::from_str(&raw)?;
    spec.check()?;
    Ok(spec)
}

fn load_answers(path: &Path) -> CliResult<ValueMap> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read answers {}: {}", path.display(), err))?;
    let value: Value = serde_json::from_str(&raw)?;
    if !value.is_object() {
        return Err("answers must be a JSON object".into());
    }
    Ok(ValueMap::from_json(value))
}

/// Applies answers in one batch and marks them touched so their errors render.
pub(crate) fn seed_answers(engine: &mut FormEngine, answers: &ValueMap) {
    let entries: Vec<(String, Value)> = answers
        .as_object()
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
    engine.set_values(entries);
    for name in &names {
        engine.mark_touched(name);
    }
}

pub(crate) fn print_payload(payload: &RenderPayload, mode: RenderMode) -> CliResult<()> {
    match mode {
        RenderMode::Text => println!("{}", render_text(payload)),
        RenderMode::Card => println!(
            "{}",
            serde_json::to_string_pretty(&render_card(payload))?
        ),
        RenderMode::Json => println!(
            "{}",
            serde_json::to_string_pretty(&render_json_ui(payload))?
        ),
    }
    Ok(())
}

fn run_render(
    spec_path: &Path,
    answers_path: Option<&Path>,
    page: Option<usize>,
    format: RenderMode,
) -> CliResult<()> {
    let spec = load_spec(spec_path)?;
    let mut engine = FormEngine::new(spec)?;
    if let Some(path) = answers_path {
        seed_answers(&mut engine, &load_answers(path)?);
    }
    if let Some(page) = page {
        match engine.jump_to_page(page) {
            NavOutcome::Blocked { fields } => {
                eprintln!(
                    "Cannot open page {}: fix {} first.",
                    page,
                    fields.join(", ")
                );
            }
            NavOutcome::Unchanged if page != engine.current_page() => {
                return Err(format!(
                    "page {} is not visible (form has {} visible pages)",
                    page,
                    engine.total_pages()
                )
                .into());
            }
            _ => {}
        }
    }
    print_payload(&engine.render(), format)
}

fn run_validate(spec_path: &Path, answers_path: &Path) -> CliResult<()> {
    let spec = load_spec(spec_path)?;
    let answers = load_answers(answers_path)?;

    let result = validate(&spec, &answers);
    println!(
        "Validation result: {}",
        if result.valid { "valid" } else { "invalid" }
    );
    describe_validation(&result);

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(result: &ValidationResult) {
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            let location = error
                .field
                .as_deref()
                .or(error.path.as_deref())
                .unwrap_or("<form>");
            println!("  {} - {}", location, error.message);
        }
    }
    if !result.missing_required.is_empty() {
        println!(
            "Missing required answers: {}",
            result.missing_required.join(", ")
        );
    }
    if !result.unknown_fields.is_empty() {
        println!(
            "Unknown answer fields: {}",
            result.unknown_fields.join(", ")
        );
    }
}

fn run_schema() -> CliResult<()> {
    let schema = schemars::schema_for!(FormSpec);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
