//! Scholar CLI - Command-line interface for Scholar Flux
//!
//! Commands:
//! - train: Fit both pipelines and persist their artifacts
//! - predict / what-if: Score and persona for JSON student records
//! - upload: Append a CSV of new students and retrain the score model
//! - importance, clusters, warnings, students, student, timeline, report,
//!   fairness: Read-only queries
//! - interventions: Record or list interventions
//! - doctor: Diagnose data files, artifacts and configuration

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use scholar_flux::adapters::{JsonRecordAdapter, RecordAdapter};
use scholar_flux::table::Table;
use scholar_flux::{
    Engine, EngineConfig, NewIntervention, RawStudentRecord, ScholarError, PRODUCER_NAME,
    SCHOLAR_VERSION,
};

/// Scholar - score prediction and persona clustering for student outcomes
#[derive(Parser)]
#[command(name = "scholar")]
#[command(version = SCHOLAR_VERSION)]
#[command(about = "Predict student scores and personas from tabular data", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration; artifacts go to <dir>/models)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug-level logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only errors on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit both pipelines from the data files and persist the artifacts
    Train,

    /// Predict score and persona for a JSON object or array of objects
    Predict {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Compare a record with a modified copy
    WhatIf {
        /// JSON file with "original" and "changes" objects (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,
    },

    /// Append a CSV of new students and retrain the score model
    Upload {
        /// CSV file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Largest model coefficients
    Importance,

    /// Persona counts, mean scores and recommendations
    Clusters {
        #[arg(long)]
        class: Option<String>,
    },

    /// Students with an at-risk persona
    Warnings {
        #[arg(long)]
        class: Option<String>,
    },

    /// Overview of every student
    Students {
        #[arg(long)]
        class: Option<String>,
    },

    /// Full record of one student
    Student { index: usize },

    /// Synthetic progress timeline of one student
    Timeline { index: usize },

    /// Cohort summary report
    Report {
        #[arg(long)]
        class: Option<String>,
    },

    /// Disparate impact audit by gender and family income
    Fairness {
        #[arg(long)]
        class: Option<String>,
    },

    /// Record or list interventions
    Interventions {
        #[command(subcommand)]
        action: InterventionAction,
    },

    /// Diagnose data files, artifacts and configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum InterventionAction {
    /// Record an intervention
    Add {
        #[arg(long)]
        student: usize,
        #[arg(long)]
        strategy: String,
        #[arg(long)]
        outcome: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// List interventions, optionally for one student
    List {
        #[arg(long)]
        student: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(Verbosity::from_flags(cli.verbose, cli.quiet));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr. `SCHOLAR_LOG` wins over `RUST_LOG`, which wins over
/// the verbosity flags.
fn init_tracing(verbosity: Verbosity) {
    let filter = std::env::var("SCHOLAR_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| {
            let level = verbosity.default_level();
            let directive = if verbosity == Verbosity::Verbose {
                format!("{level},scholar_flux=debug")
            } else {
                level.to_string()
            };
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
        });

    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(verbosity == Verbosity::Verbose);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer.without_time().compact())
        .init();
}

fn run(cli: Cli) -> Result<(), ScholarCliError> {
    let config = load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Train => {
            let engine = Engine::open(config, true)?;
            print_json(&engine.health()?)
        }
        Commands::Predict { input } => cmd_predict(config, &input),
        Commands::WhatIf { input } => cmd_what_if(config, &input),
        Commands::Upload { input } => {
            let csv = read_input(&input)?;
            let engine = Engine::open(config, false)?;
            print_json(&engine.upload_csv(&csv)?)
        }
        Commands::Importance => print_json(&Engine::open(config, false)?.importance()?),
        Commands::Clusters { class } => {
            print_json(&Engine::open(config, false)?.cluster_summary(class.as_deref())?)
        }
        Commands::Warnings { class } => {
            print_json(&Engine::open(config, false)?.at_risk(class.as_deref())?)
        }
        Commands::Students { class } => {
            print_json(&Engine::open(config, false)?.students(class.as_deref())?)
        }
        Commands::Student { index } => print_json(&Engine::open(config, false)?.student(index)?),
        Commands::Timeline { index } => print_json(&Engine::open(config, false)?.timeline(index)?),
        Commands::Report { class } => {
            print_json(&Engine::open(config, false)?.summary_report(class.as_deref())?)
        }
        Commands::Fairness { class } => {
            print_json(&Engine::open(config, false)?.fairness(class.as_deref())?)
        }
        Commands::Interventions { action } => cmd_interventions(config, action),
        Commands::Doctor { json } => cmd_doctor(&config, json),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<&Path>) -> Result<EngineConfig, ScholarCliError> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    Ok(match data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

fn cmd_predict(config: EngineConfig, input: &Path) -> Result<(), ScholarCliError> {
    let text = read_input(input)?;
    let records = JsonRecordAdapter.parse(&text)?;
    if records.is_empty() {
        return Err(ScholarCliError::NoRecords);
    }
    let engine = Engine::open(config, false)?;
    let predictions = records
        .iter()
        .map(|r| engine.predict(r))
        .collect::<Result<Vec<_>, _>>()?;

    if predictions.len() == 1 {
        print_json(&predictions[0])
    } else {
        print_json(&predictions)
    }
}

fn cmd_what_if(config: EngineConfig, input: &Path) -> Result<(), ScholarCliError> {
    let value: serde_json::Value = serde_json::from_str(&read_input(input)?)?;
    let original = record_field(&value, "original")?;
    let changes = record_field(&value, "changes")?;

    let engine = Engine::open(config, false)?;
    print_json(&engine.what_if(&original, &changes)?)
}

fn record_field(value: &serde_json::Value, key: &str) -> Result<RawStudentRecord, ScholarCliError> {
    let field = value
        .get(key)
        .ok_or_else(|| ScholarCliError::MissingField(key.to_string()))?;
    Ok(JsonRecordAdapter::from_value(field)?)
}

fn cmd_interventions(config: EngineConfig, action: InterventionAction) -> Result<(), ScholarCliError> {
    let engine = Engine::open(config, false)?;
    match action {
        InterventionAction::Add {
            student,
            strategy,
            outcome,
            note,
        } => print_json(&engine.record_intervention(NewIntervention {
            student_index: student,
            strategy,
            outcome,
            note,
        })?),
        InterventionAction::List { student: Some(index) } => {
            print_json(&engine.interventions_for(index)?)
        }
        InterventionAction::List { student: None } => print_json(&engine.interventions()?),
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

fn check_table(name: &str, path: &Path, required: bool) -> DoctorCheck {
    match Table::read_csv(path) {
        Ok(table) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{} ({} rows, {} columns)",
                path.display(),
                table.len(),
                table.columns().len()
            ),
        },
        Err(ScholarError::DataNotFound(_)) => DoctorCheck {
            name: name.to_string(),
            status: if required {
                CheckStatus::Error
            } else {
                CheckStatus::Warning
            },
            message: format!("{} does not exist", path.display()),
        },
        Err(e) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot read {}: {e}", path.display()),
        },
    }
}

fn check_artifact(name: &str, path: &Path) -> DoctorCheck {
    let (status, message) = if !path.exists() {
        (
            CheckStatus::Warning,
            format!("{} not yet written (run 'scholar train')", path.display()),
        )
    } else {
        match fs::read_to_string(path)
            .map_err(ScholarError::from)
            .and_then(|json| {
                serde_json::from_str::<serde_json::Value>(&json).map_err(ScholarError::from)
            })
        {
            Ok(value) => (
                CheckStatus::Ok,
                format!(
                    "{} (format version {}, run {})",
                    path.display(),
                    value.get("format_version").and_then(|v| v.as_u64()).unwrap_or(0),
                    value.get("run_id").and_then(|v| v.as_str()).unwrap_or("unknown")
                ),
            ),
            Err(e) => (CheckStatus::Error, format!("Invalid artifact {}: {e}", path.display())),
        }
    };
    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

fn cmd_doctor(config: &EngineConfig, json: bool) -> Result<(), ScholarCliError> {
    let mut checks = vec![
        check_table("training_table", &config.training_path(), true),
        check_table("reference_table", &config.reference_path(), true),
        check_table("clustering_table", &config.clustering_path(), true),
        check_table("raw_table", &config.raw_path(), false),
        check_artifact("score_artifact", &config.score_artifact_path()),
        check_artifact("persona_artifact", &config.persona_artifact_path()),
    ];

    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (pass --input <file>)".to_string()
        } else {
            "stdin is a pipe (--input - ready)".to_string()
        },
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SCHOLAR_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scholar Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(ScholarCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<String, ScholarCliError> {
    if path.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(ScholarCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ScholarCliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// Error types

#[derive(Debug)]
enum ScholarCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Scholar(ScholarError),
    MissingField(String),
    NoRecords,
    NoInput,
    DoctorFailed,
}

impl From<io::Error> for ScholarCliError {
    fn from(e: io::Error) -> Self {
        ScholarCliError::Io(e)
    }
}

impl From<serde_json::Error> for ScholarCliError {
    fn from(e: serde_json::Error) -> Self {
        ScholarCliError::Json(e)
    }
}

impl From<ScholarError> for ScholarCliError {
    fn from(e: ScholarError) -> Self {
        ScholarCliError::Scholar(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            message,
            hint: hint.map(str::to_string),
        }
    }
}

impl From<ScholarCliError> for CliError {
    fn from(e: ScholarCliError) -> Self {
        match e {
            ScholarCliError::Io(e) => {
                CliError::new("IO_ERROR", e.to_string(), Some("Check file paths and permissions"))
            }
            ScholarCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), Some("Check JSON syntax")),
            ScholarCliError::Scholar(e) => {
                let (code, hint) = match &e {
                    ScholarError::DataNotFound(_) => {
                        ("DATA_NOT_FOUND", Some("Check --data-dir or the [data] section of the config"))
                    }
                    ScholarError::SchemaMismatch(_) => {
                        ("SCHEMA_MISMATCH", Some("Retrain with 'scholar train' after changing the tables"))
                    }
                    ScholarError::NotInitialized(_) => ("NOT_INITIALIZED", Some("Run 'scholar train'")),
                    ScholarError::UnmappedCluster(_) => ("UNMAPPED_CLUSTER", Some("Run 'scholar train'")),
                    ScholarError::StudentNotFound(_) => {
                        ("STUDENT_NOT_FOUND", Some("List valid indices with 'scholar students'"))
                    }
                    ScholarError::Poisoned(_) => ("INTERNAL_ERROR", None),
                    ScholarError::UpstreamUnavailable(_) => ("UPSTREAM_UNAVAILABLE", None),
                    ScholarError::InvalidUpload(_) => {
                        ("INVALID_UPLOAD", Some("Uploads need a header row and an Exam_Score column"))
                    }
                    ScholarError::Model(_) => ("MODEL_ERROR", Some("Check the training table for degenerate columns")),
                    ScholarError::Config(_) => ("CONFIG_ERROR", Some("Check the TOML configuration file")),
                    ScholarError::Csv(_) => ("CSV_ERROR", Some("Check CSV syntax and header row")),
                    ScholarError::Json(_) => ("JSON_ERROR", Some("Check JSON syntax")),
                    ScholarError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
                };
                CliError::new(code, e.to_string(), hint)
            }
            ScholarCliError::MissingField(key) => CliError::new(
                "MISSING_FIELD",
                format!("Input is missing the '{key}' object"),
                Some("what-if input looks like {\"original\": {...}, \"changes\": {...}}"),
            ),
            ScholarCliError::NoRecords => CliError::new(
                "NO_RECORDS",
                "No student records found in input".to_string(),
                Some("Ensure input is a JSON object or a non-empty array"),
            ),
            ScholarCliError::NoInput => CliError::new(
                "NO_INPUT",
                "stdin is a terminal and no input file was given".to_string(),
                Some("Pass --input <file> or pipe JSON into the command"),
            ),
            ScholarCliError::DoctorFailed => CliError::new(
                "DOCTOR_FAILED",
                "One or more checks failed".to_string(),
                Some("Review the errors above"),
            ),
        }
    }
}
