#![allow(missing_docs)]

//! Cordon CLI — a thin producer over the engine library.
//!
//! Subcommands build structured invocations and feed them to the kernel;
//! nothing here touches a child process directly. Denial and validation
//! messages name the rule, the tool id, and the offending flag or
//! positional; environment values are never echoed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use cordon::config::{load_authority, runtime_paths, RuntimePaths};
use cordon::kernel::audit::AuditLogger;
use cordon::kernel::builder;
use cordon::kernel::enforcer::Enforcer;
use cordon::kernel::executor::{ExecConfig, Executor};
use cordon::kernel::learning::LearningStore;
use cordon::kernel::plan::{parse_plan, validate_plan, StepResult};
use cordon::kernel::schema::SchemaStore;
use cordon::types::{ParsedArgs, ParsedFlag};

#[derive(Parser, Debug)]
#[command(
    name = "cordon",
    version,
    about = "Deterministic, capability-gated command execution with no shell in the path"
)]
struct Cli {
    /// Project root; defaults to the current directory.
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List activated tool schemas.
    Schemas,
    /// Validate a plan document without executing anything (dry run).
    Check {
        /// Path to the plan JSON document.
        plan: PathBuf,
    },
    /// Build, gate, and execute one tool invocation.
    ///
    /// Arguments follow a fixed convention: `--name=value` attaches a
    /// value, bare `--name` is a toggle, and everything after `--` is
    /// positional.
    Run {
        /// Tool id of an activated schema.
        tool_id: String,
        /// Flag and positional arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Child timeout in milliseconds; 0 disables.
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
        /// KEY=VALUE pairs forming the child's entire environment.
        #[arg(long = "env")]
        env: Vec<String>,
    },
    /// Show execution-outcome statistics, best tools first.
    Learned {
        /// Maximum entries to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = match &cli.project_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let paths = runtime_paths(&root)?;

    // Execution gets durable JSON logs; inspection stays console-only.
    let _logging_guard = match &cli.command {
        CliCommand::Run { .. } => Some(cordon::logging::init_execution(&paths.logs_dir)?),
        _ => {
            cordon::logging::init_cli();
            None
        }
    };

    let mut store = SchemaStore::new();
    let loaded = store.load_dir(&paths.schemas_dir)?;
    info!(count = loaded, dir = %paths.schemas_dir.display(), "schema pack loaded");

    match cli.command {
        CliCommand::Schemas => cmd_schemas(&store),
        CliCommand::Check { plan } => cmd_check(&paths, &store, &plan),
        CliCommand::Run {
            tool_id,
            args,
            timeout_ms,
            env,
        } => cmd_run(&paths, &store, &tool_id, &args, timeout_ms, &env).await,
        CliCommand::Learned { top } => cmd_learned(&paths, top),
    }
}

fn cmd_schemas(store: &SchemaStore) -> Result<()> {
    if store.count() == 0 {
        println!("no activated schemas");
        return Ok(());
    }
    for id in store.ids() {
        let schema = store.get(id).expect("listed id is stored");
        println!(
            "{id}  v{}  {:?}  {}",
            schema.version, schema.risk, schema.binary
        );
    }
    Ok(())
}

fn cmd_check(paths: &RuntimePaths, store: &SchemaStore, plan_path: &Path) -> Result<()> {
    let raw = std::fs::read(plan_path)
        .with_context(|| format!("cannot read plan {}", plan_path.display()))?;
    let plan = parse_plan(&raw)?;

    let enforcer = build_enforcer(paths)?;
    let validation = validate_plan(&plan, store, &enforcer);

    if validation.empty {
        println!("plan '{}' is empty", validation.plan_id);
        return Ok(());
    }

    for step in &validation.step_results {
        match &step.result {
            StepResult::Valid => println!("step {}: {} ok", step.index, step.tool_id),
            StepResult::UnknownTool => {
                println!("step {}: {} unknown tool", step.index, step.tool_id);
            }
            StepResult::SchemaInvalid { failures } => {
                println!(
                    "step {}: {} schema validation failed",
                    step.index, step.tool_id
                );
                for failure in failures {
                    println!("  {:?}: {}", failure.kind, failure.context);
                }
            }
            StepResult::AuthorityDenied { reason } => {
                println!("step {}: {} denied ({reason})", step.index, step.tool_id);
            }
        }
    }

    if !validation.all_valid {
        bail!(
            "plan '{}': {} of {} step(s) failed",
            validation.plan_id,
            validation.failed_count,
            validation.step_results.len()
        );
    }
    println!("plan '{}' ok", validation.plan_id);
    Ok(())
}

async fn cmd_run(
    paths: &RuntimePaths,
    store: &SchemaStore,
    tool_id: &str,
    raw_args: &[String],
    timeout_ms: u64,
    env: &[String],
) -> Result<()> {
    let Some(schema) = store.get(tool_id) else {
        bail!("no activated schema for tool '{tool_id}'");
    };

    let parsed = parse_cli_args(raw_args)?;
    let env_delta = parse_env_pairs(env)?;
    let cwd = std::env::current_dir().context("cannot determine current directory")?;

    std::fs::create_dir_all(&paths.cordon_dir)?;
    let audit = Arc::new(AuditLogger::new(&paths.audit_log)?);
    let token = load_authority(paths)?;
    let enforcer = Arc::new(Enforcer::new(Some(token), Arc::clone(&audit)));

    let command = match builder::build(schema, &parsed, &cwd, env_delta) {
        Ok(command) => command,
        Err(builder::BuildError::SchemaValidationFailed { tool_id, failures }) => {
            enforcer.report_validation_denial(&tool_id, &schema.binary);
            for failure in &failures {
                eprintln!("{:?}: {}", failure.kind, failure.context);
            }
            bail!(
                "'{tool_id}' ({}): schema validation failed with {} failure(s)",
                schema.binary,
                failures.len()
            );
        }
        Err(e) => return Err(e.into()),
    };

    let executor = Executor::new(enforcer, audit);

    let started = std::time::Instant::now();
    let result = executor
        .execute(&command, &ExecConfig { timeout_ms })
        .await;

    // Outcomes are observed regardless of how the child ended; errors
    // upstream of spawn record nothing.
    match &result {
        Ok(exec) => {
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let mut learning = LearningStore::load(&paths.learning_json)?;
            let error = (exec.exit_code != 0).then(|| format!("exit {}", exec.exit_code));
            learning.record(
                tool_id,
                exec.exit_code == 0 && !exec.timed_out,
                duration_ms,
                error.as_deref(),
            );
            learning.save(&paths.learning_json)?;
        }
        Err(e) => eprintln!("execution failed: {e}"),
    }

    let exec = result?;
    if exec.timed_out {
        eprintln!("'{tool_id}' timed out after {timeout_ms} ms");
    }
    std::process::exit(exec.exit_code);
}

fn cmd_learned(paths: &RuntimePaths, top: usize) -> Result<()> {
    let learning = LearningStore::load(&paths.learning_json)?;
    if learning.count() == 0 {
        println!("no recorded outcomes");
        return Ok(());
    }
    for (tool_id, rate) in learning.ranked(top) {
        let stats = learning.get(&tool_id).expect("ranked id is recorded");
        println!(
            "{tool_id}  success {:.0}%  runs {}  avg {} ms",
            rate * 100.0,
            stats.invocations,
            stats.avg_duration_ms
        );
    }
    Ok(())
}

fn build_enforcer(paths: &RuntimePaths) -> Result<Enforcer> {
    std::fs::create_dir_all(&paths.cordon_dir)?;
    let audit = Arc::new(AuditLogger::new(&paths.audit_log)?);
    let token = load_authority(paths)?;
    Ok(Enforcer::new(Some(token), audit))
}

/// Producer-side argv convention: `--name=value`, bare `--name`, and a
/// literal `--` before positionals. The builder re-emits everything in
/// canonical long form, so this convention never reaches the child.
fn parse_cli_args(raw: &[String]) -> Result<ParsedArgs> {
    let mut parsed = ParsedArgs::default();
    let mut positionals_only = false;

    for token in raw {
        if positionals_only {
            parsed.positionals.push(token.clone());
            continue;
        }
        if token == "--" {
            positionals_only = true;
            continue;
        }
        if let Some(flag) = token.strip_prefix("--") {
            let (name, value) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_owned())),
                None => (flag, None),
            };
            if name.is_empty() {
                bail!("malformed flag '{token}'");
            }
            parsed.flags.push(ParsedFlag {
                name: name.to_owned(),
                value,
            });
        } else {
            parsed.positionals.push(token.clone());
        }
    }
    Ok(parsed)
}

/// Decode repeated `--env KEY=VALUE` pairs.
fn parse_env_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => bail!("malformed env pair '{pair}'; expected KEY=VALUE"),
        })
        .collect()
}
