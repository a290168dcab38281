//! FlowPilot CLI Entry Point
//!
//! Developer tool for running plan files against the built-in actions and
//! inspecting persisted workflow state.
//!
//! # Usage
//!
//! ```bash
//! # Execute a plan
//! flowpilot plan.yaml
//!
//! # Dry run (record the plan as suggested, invoke nothing)
//! flowpilot plan.yaml --dry-run
//!
//! # Seed the workflow context
//! flowpilot plan.yaml --context customer=acme --context limit=10
//!
//! # Inspect stored workflows
//! flowpilot --list
//! flowpilot --status 01927c4e-...
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::{Map, Value};

use flowpilot::action::{register_builtin, ActionRegistry};
use flowpilot::audit::AuditLog;
use flowpilot::config::Settings;
use flowpilot::events::{install_default_cascades, EventBus};
use flowpilot::execution::{new_workflow_id, WorkflowEngine, WorkflowResponse};
use flowpilot::state::StateStore;
use flowpilot::workflow::{load_plan, Plan, StepState, WorkflowState, WorkflowStatus};
use flowpilot::{APP_NAME, VERSION};

/// Number of workflows shown by `--list`.
const LIST_LIMIT: usize = 20;

/// What the invocation should do.
#[derive(Debug, PartialEq)]
enum Command {
    Run(String),
    Status(String),
    List,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Option<Command>,
    dry_run: bool,
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    workflow_id: Option<String>,
    context: Map<String, Value>,
    no_audit: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            dry_run: false,
            data_dir: None,
            config_path: None,
            workflow_id: None,
            context: Map::new(),
            no_audit: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Autonomous Workflow Orchestration Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowpilot [OPTIONS] <PLAN_FILE>");
    println!("       flowpilot [OPTIONS] --status <WORKFLOW_ID>");
    println!("       flowpilot [OPTIONS] --list");
    println!();
    println!("Arguments:");
    println!("  <PLAN_FILE>           Path to a JSON or YAML plan");
    println!();
    println!("Options:");
    println!("  --dry-run             Record the plan as suggested without executing it");
    println!("  --context KEY=VALUE   Add a context value (JSON or plain text, repeatable)");
    println!("  --workflow-id ID      Use a fixed workflow id instead of a generated one");
    println!("  --data-dir PATH       Directory for state and audit files");
    println!("  --config PATH         YAML settings file");
    println!("  --no-audit            Disable the audit trail");
    println!("  --status ID           Show the stored state of a workflow");
    println!("  --list                List recent workflows");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
    println!();
    println!("Examples:");
    println!("  flowpilot plan.yaml");
    println!("  flowpilot plan.yaml --dry-run");
    println!("  flowpilot plan.yaml --context report_name=weekly.pdf --data-dir /tmp/fp");
}

/// Parses `KEY=VALUE`; the value is read as JSON when possible.
fn parse_context_pair(pair: &str) -> Result<(String, Value), String> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| format!("Invalid context entry (expected KEY=VALUE): {}", pair))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Empty context key in: {}", pair));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn set_command(config: &mut Config, command: Command) -> Result<(), String> {
    if let Some(existing) = &config.command {
        return Err(format!(
            "Conflicting commands: {:?} and {:?}",
            existing, command
        ));
    }
    config.command = Some(command);
    Ok(())
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    let value_of = |i: usize, flag: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("{} requires an argument", flag))
    };

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--no-audit" => {
                config.no_audit = true;
            }
            "--list" => {
                set_command(&mut config, Command::List)?;
            }
            "--status" => {
                i += 1;
                set_command(&mut config, Command::Status(value_of(i, "--status")?))?;
            }
            "--context" => {
                i += 1;
                let (key, value) = parse_context_pair(&value_of(i, "--context")?)?;
                config.context.insert(key, value);
            }
            "--workflow-id" => {
                i += 1;
                config.workflow_id = Some(value_of(i, "--workflow-id")?);
            }
            "--data-dir" => {
                i += 1;
                config.data_dir = Some(PathBuf::from(value_of(i, "--data-dir")?));
            }
            "--config" => {
                i += 1;
                config.config_path = Some(PathBuf::from(value_of(i, "--config")?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                set_command(&mut config, Command::Run(arg.clone()))?;
            }
        }
        i += 1;
    }

    if config.command.is_none() {
        return Err("No plan file given".to_string());
    }

    Ok(config)
}

fn print_step_lines(state_of: impl Fn(&str) -> Option<StepState>, plan: &Plan, errors: &Map<String, Value>) {
    for step in &plan.steps {
        let label = format!("{} ({})", step.step_id, step.action);
        match state_of(&step.step_id) {
            Some(StepState::Succeeded) => println!("  {} {}", "✓".green(), label),
            Some(StepState::Failed) => {
                let reason = errors
                    .get(&step.step_id)
                    .and_then(Value::as_str)
                    .unwrap_or("failed");
                println!("  {} {}: {}", "✗".red(), label, reason);
            }
            Some(StepState::Skipped) => println!("  {} {} skipped", "-".yellow(), label),
            Some(StepState::Running) => println!("  {} {} running", "…".cyan(), label),
            Some(StepState::Pending) | None => println!("  {} {}", "·".dimmed(), label),
        }
    }
}

fn print_state(state: &WorkflowState) {
    println!("Workflow {}", state.workflow_id.bold());
    println!("  Status:  {}", state.status);
    println!("  Summary: {}", state.plan.summary);
    println!("  Created: {}", state.created_at.to_rfc3339());
    if let Some(done) = state.completed_at {
        println!("  Done:    {}", done.to_rfc3339());
    }
    if let Some(error) = &state.error {
        println!("  Error:   {}", error.red());
    }
    println!();

    let errors: Map<String, Value> = state
        .step_results
        .iter()
        .filter_map(|(id, r)| r.error.clone().map(|e| (id.clone(), Value::String(e))))
        .collect();
    print_step_lines(|id| state.step_state(id), &state.plan, &errors);
}

fn print_response(response: &WorkflowResponse, plan: &Plan) {
    println!();
    match response {
        WorkflowResponse::Success { workflow_id, data } => {
            let status = data.workflow_status.to_string();
            let status = match data.workflow_status {
                WorkflowStatus::Completed => status.green(),
                WorkflowStatus::Partial => status.yellow(),
                _ => status.cyan(),
            };
            println!(
                "Workflow {} {} in {} ms",
                workflow_id.bold(),
                status,
                data.duration_ms
            );

            let errors: Map<String, Value> = data
                .results
                .iter()
                .filter_map(|(id, r)| r.error.clone().map(|e| (id.clone(), Value::String(e))))
                .collect();
            print_step_lines(|id| data.step_states.get(id).copied(), plan, &errors);
        }
        WorkflowResponse::Error { workflow_id, error } => {
            println!("Workflow {} {}", workflow_id.bold(), "failed".red());
            println!("  {}", error);
        }
    }
    println!();
}

/// Async part of the entry point: wires the engine and dispatches the command.
async fn run_async(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load(config.config_path.as_deref())?;
    if let Some(dir) = config.data_dir {
        settings.data_dir = dir;
    }
    if config.no_audit {
        settings.audit_enabled = false;
    }
    info!("Data directory: {}", settings.data_dir.display());

    let store = Arc::new(StateStore::open(&settings).await?);

    let result: Result<(), Box<dyn std::error::Error>> = match config.command {
        Some(Command::Status(workflow_id)) => match store.get_workflow_state(&workflow_id).await? {
            Some(state) => {
                print_state(&state);
                Ok(())
            }
            None => Err(format!("No stored workflow with id '{}'", workflow_id).into()),
        },
        Some(Command::List) => {
            let workflows = store.list_workflows(LIST_LIMIT, None);
            if workflows.is_empty() {
                println!("No stored workflows");
            }
            for state in workflows {
                println!(
                    "{}  {:<10} {}",
                    state.workflow_id,
                    state.status.to_string(),
                    state.plan.summary
                );
            }
            Ok(())
        }
        Some(Command::Run(plan_path)) => {
            run_plan(
                &settings,
                Arc::clone(&store),
                &plan_path,
                config.dry_run,
                config.workflow_id,
                config.context,
            )
            .await
        }
        None => Err("No command given".into()),
    };

    store.close().await?;
    result
}

async fn run_plan(
    settings: &Settings,
    store: Arc<StateStore>,
    plan_path: &str,
    dry_run: bool,
    workflow_id: Option<String>,
    context: Map<String, Value>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading plan: {}", plan_path);
    let plan = load_plan(plan_path).map_err(|e| {
        error!("Failed to load plan: {}", e);
        format!("Could not load plan from '{}': {}", plan_path, e)
    })?;
    info!(
        "Plan loaded: {} steps, {} distinct actions",
        plan.len(),
        plan.actions().len()
    );

    let mut registry = ActionRegistry::with_blocking_workers(settings.blocking_workers);
    register_builtin(&mut registry);
    for action in plan.actions() {
        if !registry.contains(&action) {
            warn!("Action '{}' is not available in this runner", action);
        }
    }
    let registry = Arc::new(registry);

    store.start_sweeper(settings.sweep_interval());

    let bus = Arc::new(EventBus::new(settings.max_event_history));
    install_default_cascades(&bus, Arc::clone(&store), Arc::clone(&registry));

    let engine = WorkflowEngine::new(registry, store, Arc::clone(&bus))
        .with_audit(AuditLog::from_settings(settings))
        .with_workflow_ttl(settings.workflow_ttl_secs);

    let workflow_id = workflow_id.unwrap_or_else(new_workflow_id);
    let response = if dry_run {
        info!("Mode: DRY RUN (actions will not be invoked)");
        engine.suggest(plan.clone(), &workflow_id, context).await?
    } else {
        engine.execute(plan.clone(), &workflow_id, context).await?
    };
    bus.wait_idle().await;

    print_response(&response, &plan);

    match response {
        WorkflowResponse::Success { .. } => Ok(()),
        WorkflowResponse::Error { error, .. } => Err(error.into()),
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(config))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
