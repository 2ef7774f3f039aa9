//! AN-017: CLI subcommands (init, validate, graph, plan, apply, destroy, status, schema).

use crate::core::executor::{self, ApplyConfig};
use crate::core::graph::DependencyGraph;
use crate::core::{parser, planner, scheduler, state, types};
use crate::provider;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Project file and state directory, shared by commands that touch state.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Path to andamio.yaml
    #[arg(short, long, default_value = "andamio.yaml")]
    pub file: PathBuf,

    /// State directory
    #[arg(long, env = "ANDAMIO_STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new andamio project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate andamio.yaml and check the graph for cycles
    Validate {
        /// Path to andamio.yaml
        #[arg(short, long, default_value = "andamio.yaml")]
        file: PathBuf,
    },

    /// Show the dependency order
    Graph {
        /// Path to andamio.yaml
        #[arg(short, long, default_value = "andamio.yaml")]
        file: PathBuf,

        /// Emit Graphviz DOT instead of a list
        #[arg(long)]
        dot: bool,
    },

    /// Show execution plan (diff declared graph vs state lock)
    Plan {
        #[command(flatten)]
        project: ProjectArgs,

        /// Plan a teardown instead
        #[arg(long)]
        destroy: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Provision every node in dependency order
    Apply {
        #[command(flatten)]
        project: ProjectArgs,

        /// Show the plan without provisioning
        #[arg(long)]
        dry_run: bool,

        /// Maximum provisioning calls in flight (overrides policy.max_concurrency)
        #[arg(long)]
        parallel: Option<usize>,

        /// Print the apply result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tear down every recorded node, dependents first
    Destroy {
        #[command(flatten)]
        project: ProjectArgs,

        /// Print the destroy result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, env = "ANDAMIO_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Show a single project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Print the JSON Schema of andamio.yaml
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command. `Completions` is handled by the binary, which owns
/// the top-level clap command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file, dot } => cmd_graph(&file, dot),
        Commands::Plan {
            project,
            destroy,
            json,
        } => cmd_plan(&project.file, &project.state_dir, destroy, json),
        Commands::Apply {
            project,
            dry_run,
            parallel,
            json,
        } => cmd_apply(&project.file, &project.state_dir, dry_run, parallel, json),
        Commands::Destroy { project, json } => cmd_destroy(&project.file, &project.state_dir, json),
        Commands::Status { state_dir, project } => cmd_status(&state_dir, project.as_deref()),
        Commands::Schema => {
            println!("{}", schema_json()?);
            Ok(())
        }
        Commands::Completions { .. } => bail!("completions are generated by the andamio binary"),
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: my-infrastructure
description: "Managed by andamio"

params: {}

tags: {}

provider:
  type: simulate

stacks:
  base:
    resources:
      vpc:
        kind: network
        config:
          max_azs: 2

policy:
  max_concurrency: 1
  tripwire: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("andamio.yaml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("cannot create state dir {}", state_dir.display()))?;
    std::fs::write(&config_path, INIT_TEMPLATE)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    println!("Initialized andamio project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse, validate and build the graph, reporting every validation error.
fn load(file: &Path) -> Result<(types::AndamioConfig, DependencyGraph)> {
    let config = parser::parse_config_file(file).map_err(anyhow::Error::msg)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        bail!("{} validation error(s)", errors.len());
    }
    let graph = parser::graph_from_config(&config).map_err(anyhow::Error::msg)?;
    Ok((config, graph))
}

fn cmd_validate(file: &Path) -> Result<()> {
    let (config, graph) = load(file)?;
    println!(
        "OK: {} ({} stacks, {} nodes)",
        config.name,
        config.stacks.len(),
        graph.len()
    );
    Ok(())
}

fn cmd_graph(file: &Path, dot: bool) -> Result<()> {
    let (config, graph) = load(file)?;
    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }
    println!("{}: {} nodes", config.name, graph.len());
    for (position, idx) in graph.topological_order().into_iter().enumerate() {
        let node = graph.node(idx);
        println!("  {:>3}. {} [{}]", position + 1, node.qualified_id(), node.kind);
        let deps: Vec<String> = graph
            .dependencies(idx)
            .iter()
            .map(|&d| graph.node(d).qualified_id())
            .collect();
        if !deps.is_empty() {
            println!("       after: {}", deps.join(", "));
        }
    }
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path, destroy: bool, json: bool) -> Result<()> {
    let (config, graph) = load(file)?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = if destroy {
        planner::plan_destroy(&graph, &config.name, lock.as_ref())
    } else {
        planner::plan(&graph, &config.name, lock.as_ref())
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

/// Display a plan to stdout, grouped by stack.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} nodes)", plan.name, plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    dry_run: bool,
    parallel: Option<usize>,
    json: bool,
) -> Result<()> {
    let (config, mut graph) = load(file)?;
    let lock = state::load_lock(state_dir, &config.name)?;

    if dry_run {
        let plan = planner::plan(&graph, &config.name, lock.as_ref());
        print_plan(&plan);
        println!("Dry run: no changes applied.");
        return Ok(());
    }

    if let Some(lock) = &lock {
        let restored = state::restore(&mut graph, lock);
        if !restored.is_empty() {
            info!(count = restored.len(), "restored converged nodes from state lock");
        }
    }

    let provisioner = provider::from_config(&config.provider);
    let cfg = ApplyConfig {
        project: &config.name,
        state_dir: Some(state_dir),
        tripwire: config.policy.tripwire,
    };
    let concurrency = parallel.unwrap_or(config.policy.max_concurrency).max(1);
    let result = if concurrency > 1 {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("cannot start async runtime")?;
        runtime.block_on(async {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing in-flight calls");
                    on_interrupt.cancel();
                }
            });
            scheduler::apply_concurrent(&mut graph, provisioner, concurrency, cancel, &cfg).await
        })
    } else {
        executor::apply(&mut graph, provisioner.as_ref(), &cfg)
    };

    if config.policy.lock_file {
        let updated = state::capture(&graph, lock.as_ref(), &result);
        state::save_lock(state_dir, &updated)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_apply(&result);
    }

    if result.cancelled {
        bail!("apply cancelled; {} node(s) pending", result.pending.len());
    }
    if let Some(failure) = result.failure() {
        bail!(
            "{} failed: {} ({} node(s) pending)",
            failure.node,
            failure.error,
            result.pending.len()
        );
    }
    Ok(())
}

fn print_apply(result: &types::ApplyResult) {
    for node in result.resolved.iter().filter(|r| !r.cached) {
        let duration = node
            .duration_seconds
            .map(|d| format!(" ({:.2}s)", d))
            .unwrap_or_default();
        println!("  + {} [{}]{}", node.node, node.kind, duration);
    }
    for failure in &result.failures {
        println!("  ! {}: {}", failure.node, failure.error);
    }
    for pending in &result.pending {
        println!("  ? {} (not started)", pending);
    }
    for (stack, values) in &result.exports {
        for (name, value) in values {
            println!("  {}.{} = {}", stack, name, types::json_value_to_string(value));
        }
    }
    println!();
    println!(
        "Apply {}: {} provisioned, {} unchanged, {} failed ({:.1}s)",
        if result.is_success() { "complete" } else { "incomplete" },
        result.provisioned,
        result.unchanged,
        result.failures.len(),
        result.total_seconds
    );
}

fn cmd_destroy(file: &Path, state_dir: &Path, json: bool) -> Result<()> {
    let (config, mut graph) = load(file)?;
    let Some(mut lock) = state::load_lock(state_dir, &config.name)? else {
        println!("No state found for {}. Nothing to destroy.", config.name);
        return Ok(());
    };
    let restored = state::restore_for_destroy(&mut graph, &lock);
    info!(count = restored, "loaded recorded outputs for teardown");

    let provisioner = provider::from_config(&config.provider);
    let cfg = ApplyConfig {
        project: &config.name,
        state_dir: Some(state_dir),
        tripwire: config.policy.tripwire,
    };
    let result = executor::destroy(&mut graph, provisioner.as_ref(), &cfg);

    if config.policy.lock_file {
        state::forget(&mut lock, &result);
        state::save_lock(state_dir, &lock)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for node in &result.destroyed {
            let note = if node.absent { " (already absent)" } else { "" };
            println!("  - {}{}", node.node, note);
        }
        println!();
        println!(
            "Destroy: {} removed ({:.1}s)",
            result.destroyed.len(),
            result.total_seconds
        );
    }

    if let Some(failure) = &result.failure {
        bail!(
            "{} failed to destroy: {} ({} node(s) remaining)",
            failure.node,
            failure.error,
            result.pending.len()
        );
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, project_filter: Option<&str>) -> Result<()> {
    if !state_dir.exists() {
        println!("No state found. Run `andamio apply` first.");
        return Ok(());
    }
    let entries = std::fs::read_dir(state_dir)
        .with_context(|| format!("cannot read state dir {}", state_dir.display()))?;

    let mut found = false;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if project_filter.is_some_and(|filter| filter != name) {
            continue;
        }
        if !entry.path().is_dir() {
            continue;
        }

        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            println!("Project: {}", lock.project);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            println!("  Nodes: {}", lock.nodes.len());

            for (id, entry) in &lock.nodes {
                let duration = entry
                    .duration_seconds
                    .map(|d| format!(" ({:.2}s)", d))
                    .unwrap_or_default();
                println!("    {}: {} [{}]{}", id, entry.status, entry.kind, duration);
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `andamio apply` first.");
    }
    Ok(())
}

fn schema_json() -> Result<String> {
    let schema = schemars::schema_for!(types::AndamioConfig);
    Ok(serde_json::to_string_pretty(&schema)?)
}
