//! Terrascope CLI entrypoint.
//!
//! This is the main entrypoint for the terrascope command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use terrascope::cli::{Cli, Commands, LockCommands, OutputFormat, OutputFormatter};
use terrascope::config::{
    Scope, Settings, SettingsParser, SettingsValidator, ValidationResult, find_settings_file, git_toplevel,
};
use terrascope::coordinator::Coordinator;
use terrascope::error::{ConfigError, Result, TerrascopeError};
use terrascope::lock::{LockToken, build_lock};
use terrascope::state::{LocalStateSlot, build_remote_store, build_sync};
use terrascope::tool::{TerraformRunner, ToolCommand};
use terrascope::workspace::Workspace;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    let (result, scope) = runtime.block_on(run(&cli, &formatter));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let output = formatter.format_error(&e, scope.as_ref());
            if formatter.format() == OutputFormat::Json {
                let _ = emit(&formatter, &output);
            } else {
                eprint!("{output}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout stays
/// usable for state documents and JSON output.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything an operation needs, resolved once at startup.
struct Context {
    /// Canonical path of the rendered configuration.
    config: PathBuf,
    /// Repository top level.
    top_level: PathBuf,
    /// Scope derived from the configuration path or given explicitly.
    scope: Scope,
    /// Effective settings.
    settings: Settings,
    /// Tool runner, checked before any tool command.
    runner: Arc<TerraformRunner>,
    /// Coordinator wired with the configured lock and state strategies.
    coordinator: Coordinator,
}

/// Main async entry point. Returns the scope alongside the result so the
/// error report can name it.
async fn run(cli: &Cli, formatter: &OutputFormatter) -> (Result<()>, Option<Scope>) {
    if let Commands::CheckSettings { warnings } = &cli.command {
        return (cmd_check_settings(cli, *warnings, formatter), None);
    }

    let ctx = match Context::resolve(cli).await {
        Ok(ctx) => ctx,
        Err(e) => return (Err(e), None),
    };

    let result = dispatch(cli, &ctx, formatter).await;
    (result, Some(ctx.scope))
}

async fn dispatch(cli: &Cli, ctx: &Context, formatter: &OutputFormatter) -> Result<()> {
    match &cli.command {
        Commands::Plan { .. } => cmd_tool(ctx, ToolCommand::Plan, formatter).await,
        Commands::Graph { .. } => cmd_tool(ctx, ToolCommand::Graph, formatter).await,
        Commands::Validate { .. } => cmd_tool(ctx, ToolCommand::Validate, formatter).await,
        Commands::Apply { .. } => cmd_tool(ctx, ToolCommand::Apply, formatter).await,
        Commands::Destroy { yes, .. } => {
            if !yes && !confirm(&format!("This will destroy every resource in {}.", ctx.scope), "destroy")? {
                eprintln!("Destroy cancelled.");
                return Ok(());
            }
            cmd_tool(ctx, ToolCommand::Destroy, formatter).await
        }
        Commands::Import { address, id, .. } => {
            let command = ToolCommand::Import {
                address: address.clone(),
                id: id.clone(),
            };
            cmd_tool(ctx, command, formatter).await
        }
        Commands::ShowState { .. } => cmd_show_state(ctx, formatter).await,
        Commands::UseRemoteState { .. } => {
            let report = ctx.coordinator.use_remote_state(&ctx.scope).await?;
            emit(formatter, &formatter.format_report(&report))
        }
        Commands::UseLocalState { .. } => {
            let report = ctx.coordinator.use_local_state(&ctx.scope).await?;
            emit(formatter, &formatter.format_report(&report))
        }
        Commands::Lock { command } => cmd_lock(ctx, command, formatter).await,
        Commands::CheckSettings { .. } => Err(TerrascopeError::internal("check-settings has no scope")),
    }
}

impl Context {
    async fn resolve(cli: &Cli) -> Result<Self> {
        let config = cli
            .command
            .config()
            .ok_or_else(|| TerrascopeError::internal("command has no configuration file"))?;
        let config = std::fs::canonicalize(config).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TerrascopeError::Config(ConfigError::FileNotFound { path: config.clone() })
            } else {
                e.into()
            }
        })?;

        let settings = load_settings(cli, config.parent().unwrap_or_else(|| Path::new(".")))?;

        let top_level = match git_toplevel(&config) {
            Ok(top) => std::fs::canonicalize(&top).unwrap_or(top),
            Err(e) if cli.operator.scope.is_some() => {
                debug!("No repository for {} ({e}); using the current directory", config.display());
                std::env::current_dir()?
            }
            Err(e) => return Err(e.into()),
        };

        let scope = match &cli.operator.scope {
            Some(raw) => Scope::new(raw)?,
            None => Scope::for_path(&config, &top_level)?,
        };
        info!("Scope: {scope}");

        let state_dir = match &cli.operator.state_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        let lock = build_lock(&settings.lock, &top_level).await?;
        let store = build_remote_store(&settings.state, &top_level).await?;
        let sync = build_sync(&settings.state, store.as_ref(), &state_dir);
        debug!(
            "Lock: {}, state: {}",
            lock.kind(),
            if sync.is_remote() { "remote" } else { "local" }
        );

        let runner = Arc::new(TerraformRunner::new(settings.tool.binary.clone()));
        let coordinator = Coordinator::new(lock, sync, Arc::clone(&runner) as _, LocalStateSlot::in_dir(&state_dir))
            .with_store(store)
            .with_force(cli.operator.force)
            .with_targets(cli.operator.target.clone())
            .with_tool_lock_timeout(cli.operator.lock_timeout.map(Duration::from_secs));

        Ok(Self {
            config,
            top_level,
            scope,
            settings,
            runner,
            coordinator,
        })
    }
}

/// Loads, overrides and validates the settings.
fn load_settings(cli: &Cli, start_dir: &Path) -> Result<Settings> {
    let (settings, _) = load_and_validate(cli, start_dir)?;
    Ok(settings)
}

fn load_and_validate(cli: &Cli, start_dir: &Path) -> Result<(Settings, ValidationResult)> {
    let settings_file = cli.settings.clone().or_else(|| find_settings_file(start_dir));

    let parser = SettingsParser::new().with_base_path(
        settings_file
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or(start_dir),
    );
    parser.load_dotenv()?;

    let mut settings = parser.load_with_env(settings_file.as_deref())?;
    settings.apply_operator_options(&cli.operator.to_options());

    let result = SettingsValidator::new().validate(&settings)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((settings, result))
}

/// Check the settings file.
fn cmd_check_settings(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let (settings, result) = load_and_validate(cli, &cwd)?;

    emit(formatter, &formatter.format_validation(&result, show_warnings))?;

    if formatter.format() == OutputFormat::Text {
        eprintln!("\nSettings summary:");
        eprintln!("  Lock backend: {:?}", settings.lock.backend);
        eprintln!("  Lock timeout: {}s", settings.lock.timeout_secs);
        eprintln!("  State backend: {:?}", settings.state.backend);
        eprintln!("  Remote state: {}", if settings.state.remote_enabled() { "on" } else { "off" });
        eprintln!("  Tool: {}", settings.tool.binary);
    }

    Ok(())
}

/// Run one tool command in a fresh working directory.
async fn cmd_tool(ctx: &Context, command: ToolCommand, formatter: &OutputFormatter) -> Result<()> {
    ctx.runner.check_installed()?;
    if let Some(required) = &ctx.settings.tool.required_version {
        ctx.runner.check_version(required).await?;
    }

    let workspace = Workspace::prepare(
        &ctx.top_level,
        &ctx.config,
        &ctx.settings.tool,
        ctx.settings.workspace.keep,
    )?;
    debug!("Running {command} against {}", workspace.config_file().display());

    let report = ctx.coordinator.run(&ctx.scope, command, workspace.path()).await?;
    emit(formatter, &formatter.format_report(&report))
}

/// Print the authoritative state document.
async fn cmd_show_state(ctx: &Context, formatter: &OutputFormatter) -> Result<()> {
    let view = ctx.coordinator.show_state(&ctx.scope).await?;

    if formatter.format() == OutputFormat::Json {
        return emit(formatter, &formatter.format_state_view(&ctx.scope, &view));
    }

    eprint!("{}", formatter.format_state_view(&ctx.scope, &view));
    if let Some(document) = &view.document {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(document.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

/// Inspect or clear the scope lock.
async fn cmd_lock(ctx: &Context, command: &LockCommands, formatter: &OutputFormatter) -> Result<()> {
    match command {
        LockCommands::Status { .. } => {
            let record = ctx.coordinator.lock_status(&ctx.scope).await?;
            emit(formatter, &formatter.format_lock_status(&ctx.scope, record.as_ref()))
        }
        LockCommands::Clear { yes, .. } => {
            let Some(record) = ctx.coordinator.lock_status(&ctx.scope).await? else {
                return emit(formatter, &formatter.format_lock_status(&ctx.scope, None));
            };

            if !yes {
                eprint!("{}", formatter.format_lock_status(&ctx.scope, Some(&record)));
                if !confirm("Clearing a live lock lets a second run start against this scope.", "clear")? {
                    eprintln!("Clear cancelled.");
                    return Ok(());
                }
            }

            ctx.coordinator.clear_lock(&ctx.scope).await?;
            info!("Cleared lock for {} held by {}", ctx.scope, record.holder);
            emit(formatter, &formatter.format_lock_status(&ctx.scope, None))
        }
        LockCommands::Release { token, .. } => {
            ctx.coordinator
                .release_lock(&ctx.scope, &LockToken::from_string(token.clone()))
                .await?;
            let record = ctx.coordinator.lock_status(&ctx.scope).await?;
            emit(formatter, &formatter.format_lock_status(&ctx.scope, record.as_ref()))
        }
    }
}

/// Asks the operator to type `word` to continue.
fn confirm(warning: &str, word: &str) -> Result<bool> {
    eprintln!("{warning}");
    eprint!("Type '{word}' to confirm: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim() == word)
}

/// Writes command output: JSON to stdout, text to stderr.
fn emit(formatter: &OutputFormatter, output: &str) -> Result<()> {
    if formatter.format() == OutputFormat::Json {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{output}")?;
        stdout.flush()?;
    } else {
        eprint!("{output}");
    }
    Ok(())
}
