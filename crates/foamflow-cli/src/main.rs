//! foamflow - requirement-to-simulation case pipeline CLI
//!
//! ## Commands
//!
//! - `run`: plan, generate, execute and repair a case from a requirement
//! - `inspect`: print the verified summary of a finished case
//! - `rules`: print the dependency rule table and failure signatures

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn, Level};

use foamflow_core::{
    init_tracing, read_summary, CaseReport, CaseSpan, CustomMesh, DependencyRuleTable,
    LoopController, MeshFormat, PipelineConfig, SignatureTable, UserRequirement,
};
use foamflow_knowledge::MemoryKnowledgeStore;
use foamflow_llm::HttpCompletionBackend;

/// Exit code for a case that ended `failed_exhausted` or `failed_fatal`.
const EXIT_CASE_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "foamflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and repair solver cases from a plain-language requirement", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one case from requirement to a terminal state
    Run(RunArgs),

    /// Print the verified summary of a case directory
    Inspect {
        /// Case directory (the one holding `.foamflow/`)
        case_dir: PathBuf,
    },

    /// Print the dependency rule table and failure signature table
    Rules,
}

#[derive(Args)]
#[command(group(ArgGroup::new("input").required(true).args(["requirement", "requirement_file"])))]
struct RunArgs {
    /// Requirement text
    #[arg(short, long)]
    requirement: Option<String>,

    /// File holding the requirement text
    #[arg(long)]
    requirement_file: Option<PathBuf>,

    /// Directory the case directory is created in
    #[arg(short, long)]
    output: PathBuf,

    /// User-supplied mesh file (or polyMesh directory)
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// Mesh format: msh, stl, obj or foam (inferred from the path when omitted)
    #[arg(long, requires = "mesh")]
    mesh_format: Option<String>,

    /// Execution budget; overrides the config file and environment
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Pipeline config file (TOML)
    #[arg(long, env = "FOAMFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of knowledge index snapshots (`<index>.json`)
    #[arg(long, env = "FOAMFLOW_KNOWLEDGE_DIR")]
    knowledge: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let succeeded = match cli.command {
        Commands::Run(args) => cmd_run(args, cli.json).await?,
        Commands::Inspect { case_dir } => cmd_inspect(&case_dir, cli.json)?,
        Commands::Rules => {
            cmd_rules(cli.json)?;
            true
        }
    };

    if !succeeded {
        std::process::exit(EXIT_CASE_FAILED);
    }
    Ok(())
}

async fn cmd_run(args: RunArgs, json: bool) -> Result<bool> {
    let requirement = load_requirement(&args)?;
    let config = load_config(args.config.as_deref(), args.max_iterations)?;

    let knowledge = MemoryKnowledgeStore::from_snapshot_dir(&args.knowledge).with_context(|| {
        format!("Failed to load knowledge snapshots from {:?}", args.knowledge)
    })?;
    if knowledge.is_empty() {
        bail!("No knowledge index snapshots found in {:?}", args.knowledge);
    }
    let backend =
        HttpCompletionBackend::from_env().context("Failed to configure completion backend")?;

    let controller = LoopController::new(config, Arc::new(knowledge), Arc::new(backend))?;
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling case");
            cancel_tx.send(true).ok();
        }
    });

    let report = controller
        .run(&requirement, &args.output, cancel_rx)
        .await
        .context("Case run aborted")?;
    info!(status = %report.terminal_status, "case finished");

    emit(&report, json, render_report)?;
    Ok(report.succeeded())
}

fn cmd_inspect(case_dir: &Path, json: bool) -> Result<bool> {
    let case_name = case_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let _span = CaseSpan::enter(&case_name);
    let report = read_summary(case_dir)
        .with_context(|| format!("Failed to read case summary in {:?}", case_dir))?;
    emit(&report, json, render_report)?;
    Ok(true)
}

#[derive(Serialize)]
struct RuleTables {
    dependency_rules: DependencyRuleTable,
    signatures: SignatureTable,
}

fn cmd_rules(json: bool) -> Result<()> {
    let tables = RuleTables {
        dependency_rules: DependencyRuleTable::standard(),
        signatures: SignatureTable::standard(),
    };
    emit(&tables, json, render_rules)
}

fn emit<T: Serialize>(value: &T, json: bool, render: fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", render(value));
    }
    Ok(())
}

fn load_requirement(args: &RunArgs) -> Result<UserRequirement> {
    let text = match (&args.requirement, &args.requirement_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read requirement file {:?}", path))?,
        (None, None) => bail!("Either --requirement or --requirement-file is required"),
    };
    let mut requirement = UserRequirement::new(text)?;
    if let Some(mesh) = &args.mesh {
        let format = mesh_format(mesh, args.mesh_format.as_deref())?;
        requirement = requirement.with_custom_mesh(CustomMesh::new(mesh, format));
    }
    Ok(requirement)
}

/// Explicit format wins; otherwise directories are polyMesh and files go by extension.
fn mesh_format(path: &Path, explicit: Option<&str>) -> Result<MeshFormat> {
    if let Some(raw) = explicit {
        return Ok(raw.parse::<MeshFormat>()?);
    }
    if path.is_dir() {
        return Ok(MeshFormat::Foam);
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("Cannot infer mesh format of {:?}; pass --mesh-format", path))?;
    Ok(extension.parse::<MeshFormat>()?)
}

/// Defaults, then the config file, then environment overrides, then flags.
fn load_config(path: Option<&Path>, max_iterations: Option<u32>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => PipelineConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(max) = max_iterations {
        config = config.with_max_iterations(max);
        config.validate()?;
    }
    Ok(config)
}

fn render_report(report: &CaseReport) -> String {
    let mut out = String::new();
    let name = if report.case_name.is_empty() {
        "-"
    } else {
        &report.case_name
    };
    let _ = writeln!(out, "case:        {name}");
    if let Some(dir) = &report.case_dir {
        let _ = writeln!(out, "directory:   {}", dir.display());
    }
    if let Some(solver) = &report.solver_id {
        let _ = writeln!(out, "solver:      {solver}");
    }
    let _ = writeln!(out, "status:      {}", report.terminal_status);
    let _ = writeln!(
        out,
        "iterations:  {}/{}",
        report.iteration_count, report.max_iterations
    );
    if let Some(reason) = &report.fatal_reason {
        let _ = writeln!(out, "reason:      {reason}");
    }

    if !report.executions.is_empty() {
        let _ = writeln!(out, "\nexecutions:");
        for e in &report.executions {
            let _ = writeln!(
                out,
                "  #{:<3} {:<28} {:>8} ms  {} file(s) written",
                e.iteration,
                format!("{:?}", e.exit_status),
                e.duration_ms,
                e.artifacts_touched.len()
            );
        }
    }
    if !report.diagnoses.is_empty() {
        let _ = writeln!(out, "\ndiagnoses:");
        for d in &report.diagnoses {
            let implicated: Vec<&str> =
                d.implicated_artifact_ids.iter().map(|a| a.as_str()).collect();
            let _ = writeln!(
                out,
                "  #{:<3} {:<22} {:?}  {}",
                d.iteration,
                d.error_category.as_str(),
                d.confidence,
                implicated.join(", ")
            );
        }
    }
    if !report.artifacts.is_empty() {
        let _ = writeln!(out, "\nartifacts:");
        for a in &report.artifacts {
            let _ = writeln!(out, "  {:<40} v{}", a.id.as_str(), a.version);
        }
    }
    out
}

fn render_rules(tables: &RuleTables) -> String {
    let mut out = String::new();
    let deps = &tables.dependency_rules;
    let _ = writeln!(out, "dependency rules {}:", deps.version);
    for rule in &deps.rules {
        let requires: Vec<&str> = rule.requires.iter().map(|r| r.as_str()).collect();
        let _ = writeln!(
            out,
            "  {:<22} <- {}  ({})",
            rule.dependent.as_str(),
            requires.join(", "),
            rule.rationale
        );
    }
    let sigs = &tables.signatures;
    let _ = writeln!(out, "\nfailure signatures {}:", sigs.version);
    for rule in &sigs.rules {
        let implicates: Vec<&str> = rule.implicates.iter().map(|r| r.as_str()).collect();
        let _ = writeln!(
            out,
            "  {:<22} {:<22} {}",
            rule.name,
            rule.category.as_str(),
            implicates.join(", ")
        );
    }
    out
}
