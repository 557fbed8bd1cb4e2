//! CLI command definitions for nipoppy.
//!
//! Each subcommand loads the dataset's global config and drives one
//! workflow of the library.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::catalog::{resolve_pipeline_version, StatusCatalog};
use crate::manifest::ManifestGenerator;
use crate::pipeline::{GlobalConfig, WorkflowRunner};
use crate::status::{StatusOptions, StatusOutcome, StatusReport, StatusTracker};

/// Status tracking and workflow orchestration for neuroimaging datasets.
#[derive(Parser)]
#[command(name = "nipoppy")]
#[command(about = "Track participant sessions through the neuroimaging pipeline")]
#[command(version)]
#[command(
    long_about = "nipoppy keeps a dataset's status file in step with its participant manifest.\n\nExample usage:\n  nipoppy status --global-config global_config.json --regenerate"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Update the status file from the manifest.
    ///
    /// Without flags, rows for new manifest entries are appended to the
    /// existing status file and existing rows are kept as they are.
    Status(StatusArgs),

    /// Generate the manifest from the clinical report.
    Manifest(ManifestArgs),

    /// List participants of a session that are ready for a pipeline.
    #[command(name = "new-participants")]
    NewParticipants(NewParticipantsArgs),

    /// Run the workflows listed in the global config.
    Run(RunArgs),
}

/// Arguments for `nipoppy status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Path to the dataset's global config file.
    #[arg(long, env = "NIPOPPY_GLOBAL_CONFIG")]
    pub global_config: PathBuf,

    /// Regenerate the status file from the files in the dataset (can be slow).
    #[arg(long)]
    pub regenerate: bool,

    /// Ignore any existing status file.
    #[arg(long)]
    pub empty: bool,
}

/// Arguments for `nipoppy manifest`.
#[derive(Parser, Debug)]
pub struct ManifestArgs {
    /// Path to the dataset's global config file.
    #[arg(long, env = "NIPOPPY_GLOBAL_CONFIG")]
    pub global_config: PathBuf,

    /// Clinical report to read instead of `tabular/redcap_report.csv`.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Arguments for `nipoppy new-participants`.
#[derive(Parser, Debug)]
pub struct NewParticipantsArgs {
    /// Path to the dataset's global config file.
    #[arg(long, env = "NIPOPPY_GLOBAL_CONFIG")]
    pub global_config: PathBuf,

    /// Session to query, with or without the `ses-` prefix.
    #[arg(long)]
    pub session_id: String,

    /// Name of the processing pipeline.
    #[arg(long)]
    pub pipeline: String,

    /// Pipeline version; defaults to `PROC_PIPELINES.<pipeline>.VERSION`.
    #[arg(long)]
    pub version: Option<String>,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `nipoppy run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the dataset's global config file.
    #[arg(long, env = "NIPOPPY_GLOBAL_CONFIG")]
    pub global_config: PathBuf,
}

/// JSON output of `nipoppy new-participants --json`.
#[derive(Debug, Serialize)]
pub struct NewParticipantsOutput {
    pub session: String,
    pub pipeline: String,
    pub version: String,
    pub participants: Vec<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli())
}

/// Run the CLI with the parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Status(args) => run_status_command(args),
        Commands::Manifest(args) => run_manifest_command(args),
        Commands::NewParticipants(args) => run_new_participants_command(args),
        Commands::Run(args) => run_workflows_command(args),
    }
}

fn load_config(path: &Path) -> anyhow::Result<GlobalConfig> {
    let config = GlobalConfig::load(path)
        .with_context(|| format!("Failed to load global config {}", path.display()))?;
    info!(
        config = %path.display(),
        dataset = %config.dataset_root.display(),
        "Loaded global config"
    );
    Ok(config)
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    status_command(args, &mut std::io::stdout().lock())
}

fn status_command(args: StatusArgs, out: &mut impl Write) -> anyhow::Result<()> {
    let config = load_config(&args.global_config)?;
    let tracker = StatusTracker::new(config);
    let report = tracker.run(StatusOptions {
        regenerate: args.regenerate,
        empty: args.empty,
    })?;

    // warnings were already logged by the run
    write_status_summary(out, &report, tracker.publisher().target())
        .context("Failed to write status summary")?;
    Ok(())
}

fn write_status_summary(
    out: &mut impl Write,
    report: &StatusReport,
    target: &Path,
) -> std::io::Result<()> {
    match &report.outcome {
        StatusOutcome::Unchanged => {
            writeln!(out, "No change to status file {}", target.display())?;
        }
        StatusOutcome::Published { backup } => {
            writeln!(out, "✓ Status file updated ({})", report.mode)?;
            writeln!(out, "  Path:   {}", target.display())?;
            writeln!(out, "  Backup: {}", backup.display())?;
        }
    }
    writeln!(out, "  Rows:   {}", report.table.len())?;
    if !report.diff.added.is_empty() {
        writeln!(out, "  Added:  {}", report.diff.added.len())?;
    }
    if !report.warnings.is_empty() {
        writeln!(out, "  Warnings: {}", report.warnings.len())?;
    }
    Ok(())
}

fn run_manifest_command(args: ManifestArgs) -> anyhow::Result<()> {
    let config = load_config(&args.global_config)?;
    let report_path = args
        .report
        .unwrap_or_else(|| config.layout().clinical_report);

    let generator = ManifestGenerator::new(config);
    let rows = generator.run(&report_path)?;

    let imaging = rows.iter().filter(|r| r.has_imaging()).count();
    println!("✓ Manifest generated");
    println!("  Path:    {}", generator.manifest_path().display());
    println!("  Rows:    {}", rows.len());
    println!("  Imaging: {}", imaging);
    Ok(())
}

fn run_new_participants_command(args: NewParticipantsArgs) -> anyhow::Result<()> {
    let config = load_config(&args.global_config)?;
    let version = resolve_pipeline_version(&config, &args.pipeline, args.version.as_deref())?;

    let catalog = StatusCatalog::open(&config)?;
    let participants = catalog.new_participants(&args.session_id, &args.pipeline, &version)?;

    if args.json {
        let output = NewParticipantsOutput {
            session: args.session_id,
            pipeline: args.pipeline,
            version,
            participants,
        };
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        for participant in &participants {
            println!("{}", participant);
        }
    }
    Ok(())
}

fn run_workflows_command(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(&args.global_config)?;
    if config.workflows.is_empty() {
        anyhow::bail!(
            "No workflows listed under WORKFLOWS in {}",
            args.global_config.display()
        );
    }

    let executions = WorkflowRunner::new(config).run_all()?;
    println!("=== nipoppy run ===");
    for execution in &executions {
        println!(
            "  {:<20} {:<10} {:.1}s",
            execution.workflow,
            execution.status,
            execution.duration.as_secs_f64()
        );
    }
    Ok(())
}
