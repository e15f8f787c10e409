//! CLI command definitions for eval-forge.
//!
//! `run` evaluates an agent against a suite, `validate` checks a suite
//! definition, and `tool` exposes the sandbox-scoped tools to external agents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::aggregate::{aggregate_suite, aggregate_task, SuiteResult};
use crate::artifacts::{new_run_id, ArtifactWriter, RunSummary};
use crate::runner::config::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_TURNS, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
    DEFAULT_TRIALS_PER_TASK,
};
use crate::runner::{split_command, ProcessAgentRunner, RunConfig, TaskRunner, TrialOrchestrator};
use crate::suite::load_suite;
use crate::tools::SandboxTools;

/// Default suite selector.
const DEFAULT_SUITE: &str = "coding";

/// Default directory holding `<suite>.yaml` files.
const DEFAULT_SUITES_DIR: &str = "./suites";

/// Default output directory for run artifacts.
const DEFAULT_OUTPUT_DIR: &str = "./results";

/// Default baseline copied into every sandbox.
const DEFAULT_BASELINE_DIR: &str = "./app";

/// Evaluation harness for autonomous coding agents.
#[derive(Parser)]
#[command(name = "eval-forge")]
#[command(about = "Run repeated, isolated trials of a coding agent and grade the results")]
#[command(version)]
#[command(
    long_about = "eval-forge runs every task of a suite several times against fresh copies of a baseline app, grades each trial, and reports pass rates.\n\nExample usage:\n  eval-forge run --suite coding --trials 3 --agent-cmd 'python -m agent'"
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
    /// Run an evaluation suite.
    ///
    /// Exits with 0 only when every trial of every task passed.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Load a suite and report its tasks, failing on invalid definitions.
    Validate(ValidateArgs),

    /// Sandbox-scoped tools for agents (exec, read, write).
    Tool(ToolArgs),
}

/// Arguments for `run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite id (resolved in --suites-dir) or path to a suite YAML file.
    #[arg(short, long, default_value = DEFAULT_SUITE, env = "EVAL_SUITE")]
    pub suite: String,

    /// Directory containing suite definitions.
    #[arg(long, default_value = DEFAULT_SUITES_DIR, env = "EVAL_SUITES_DIR")]
    pub suites_dir: PathBuf,

    /// Trials per task.
    #[arg(short = 'n', long, default_value_t = DEFAULT_TRIALS_PER_TASK, env = "EVAL_TRIALS")]
    pub trials: usize,

    /// Output directory for artifacts.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR, env = "EVAL_OUTPUT")]
    pub output: PathBuf,

    /// Maximum agent turns per trial.
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS, env = "EVAL_MAX_TURNS")]
    pub max_turns: u32,

    /// Model identifier passed to the agent.
    #[arg(short, long, default_value = DEFAULT_MODEL, env = "EVAL_MODEL")]
    pub model: String,

    /// Agent timeout per trial, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "EVAL_TIMEOUT")]
    pub timeout: f64,

    /// Trials of one task allowed to run at once.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "EVAL_CONCURRENCY")]
    pub concurrency: usize,

    /// Baseline directory copied into every sandbox.
    #[arg(long, default_value = DEFAULT_BASELINE_DIR, env = "EVAL_BASELINE")]
    pub baseline: PathBuf,

    /// Agent command line. The agent receives its request as JSON on stdin.
    #[arg(long, env = "EVAL_AGENT_CMD")]
    pub agent_cmd: String,

    /// Test command run in the sandbox after the agent.
    #[arg(long, default_value = "poetry run pytest -v", env = "EVAL_TEST_CMD")]
    pub test_cmd: String,

    /// Dependency install command run in each fresh sandbox; empty to skip.
    #[arg(long, default_value = "poetry install --no-interaction", env = "EVAL_INSTALL_CMD")]
    pub install_cmd: String,

    /// Print the run summary as JSON instead of progress lines.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    /// Builds the run configuration. This is the only place defaults enter.
    pub fn to_config(&self) -> anyhow::Result<RunConfig> {
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            anyhow::bail!("--timeout must be a positive number of seconds");
        }
        let timeout = Duration::try_from_secs_f64(self.timeout)
            .map_err(|e| anyhow::anyhow!("--timeout {} is out of range: {}", self.timeout, e))?;
        let test_command = split_command(&self.test_cmd);
        if test_command.is_empty() {
            anyhow::bail!("--test-cmd must not be empty");
        }

        Ok(RunConfig::new(&self.baseline)
            .with_model(&self.model)
            .with_max_turns(self.max_turns)
            .with_timeout(timeout)
            .with_trials(self.trials)
            .with_concurrency(self.concurrency)
            .with_install_command(split_command(&self.install_cmd))
            .with_test_command(test_command))
    }
}

/// Arguments for `validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Suite id (resolved in --suites-dir) or path to a suite YAML file.
    #[arg(short, long, default_value = DEFAULT_SUITE)]
    pub suite: String,

    /// Directory containing suite definitions.
    #[arg(long, default_value = DEFAULT_SUITES_DIR, env = "EVAL_SUITES_DIR")]
    pub suites_dir: PathBuf,
}

/// Arguments for `tool`.
#[derive(Parser, Debug)]
pub struct ToolArgs {
    /// Sandbox root. Required; the harness exports it to its agent as
    /// EVAL_SANDBOX_ROOT.
    #[arg(long, env = "EVAL_SANDBOX_ROOT")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: ToolCommand,
}

/// Tool operations.
#[derive(clap::Subcommand, Debug)]
pub enum ToolCommand {
    /// Run a shell command.
    Exec {
        /// Command line, run through `sh -c`.
        cmd: String,
        /// Working directory relative to the root.
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Print a file.
    Read {
        /// Path relative to the root.
        path: String,
    },
    /// Write a file, creating parent directories.
    Write {
        /// Path relative to the root.
        path: String,
        /// File contents; read from stdin when omitted.
        #[arg(long)]
        contents: Option<String>,
    },
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => run_eval_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Tool(args) => run_tool_command(args).await,
    }
}

async fn run_eval_command(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = args.to_config()?;
    let suite = load_suite(&args.suite, &args.suites_dir)?;

    if !config.baseline_dir.is_dir() {
        warn!(
            "Baseline {} does not exist; every trial will fail",
            config.baseline_dir.display()
        );
    }

    let agent = ProcessAgentRunner::from_argv(&split_command(&args.agent_cmd))
        .context("--agent-cmd must not be empty")?;
    let baseline = config.baseline_dir.clone();
    let orchestrator = TrialOrchestrator::new(config, Arc::new(agent));
    let runner = TaskRunner::new(Arc::new(orchestrator));

    let writer = ArtifactWriter::create(&args.output, new_run_id())
        .await
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    if !args.json {
        println!("Suite: {} ({} tasks)", suite.id, suite.tasks.len());
        println!("Trials per task: {}", args.trials);
        println!("Output: {}", writer.run_dir().display());
        println!();
    }

    let mut task_results = Vec::with_capacity(suite.tasks.len());
    for task in &suite.tasks {
        if !args.json {
            println!("Running task: {} ({})", task.id, task.name);
        }

        let trials = runner.run_task(task, &baseline).await;
        for trial in &trials {
            if let Err(e) = writer.write_trial(trial).await {
                warn!(task_id = %task.id, trial = trial.trial_index, "Failed to write artifacts: {}", e);
            }
        }

        let result = aggregate_task(&task.id, trials);
        if !args.json {
            println!(
                "  {:.0}% passed, mean turns={:.1}, mean latency={:.1}s",
                result.pass_rate * 100.0,
                result.mean_turns,
                result.mean_latency_sec
            );
        }
        task_results.push(result);
    }

    let suite_result = aggregate_suite(&suite.id, task_results);
    let summary_path = writer
        .write_summary(&suite_result)
        .await
        .context("Failed to write summary")?;

    info!(
        suite_id = %suite_result.suite_id,
        overall_pass_rate = suite_result.overall_pass_rate,
        "Run complete"
    );

    if args.json {
        let summary = RunSummary::new(writer.run_id(), &suite_result);
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_footer(&suite_result, &summary_path);
    }

    Ok(ExitCode::from(exit_status(&suite_result)))
}

fn print_footer(suite: &SuiteResult, summary_path: &Path) {
    println!();
    println!(
        "Overall pass rate: {:.1}% ({}/{})",
        suite.overall_pass_rate * 100.0,
        suite.total_passed(),
        suite.total_trials()
    );
    println!("Summary: {}", summary_path.display());
}

/// 0 iff the overall pass rate is 100%.
fn exit_status(suite: &SuiteResult) -> u8 {
    if suite.all_passed() {
        0
    } else {
        1
    }
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let suite = load_suite(&args.suite, &args.suites_dir)?;

    println!("Suite: {} ({} tasks)", suite.id, suite.tasks.len());
    for task in &suite.tasks {
        let graders: Vec<&str> = task.graders.iter().map(|g| g.as_str()).collect();
        let graders = if graders.is_empty() {
            "(none; passes vacuously)".to_string()
        } else {
            graders.join(", ")
        };
        println!("  {} ({}): {}", task.id, task.name, graders);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_tool_command(args: ToolArgs) -> anyhow::Result<ExitCode> {
    let tools = SandboxTools::new(&args.root)
        .with_context(|| format!("Invalid sandbox root {}", args.root.display()))?;

    let output = match args.command {
        ToolCommand::Exec { cmd, cwd } => tools.run_command(&cmd, cwd.as_deref()).await?,
        ToolCommand::Read { path } => tools.read_file(&path).await?,
        ToolCommand::Write { path, contents } => {
            let contents = match contents {
                Some(contents) => contents,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };
            tools.write_file(&path, &contents).await?
        }
    };

    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(ExitCode::SUCCESS)
}
