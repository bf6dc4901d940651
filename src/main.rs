//! Clusterform CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clusterform::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use clusterform::config::{ConfigParser, ConfigValidator, StackConfig, find_config_file};
use clusterform::engine::{AbortSignal, StackRunner};
use clusterform::error::{ClusterformError, ConfigError, Result};
use clusterform::provider::{HttpProvider, ResourceProvider, SimulatedProvider};
use clusterform::state::{STATE_DIR, StateStore, open_store};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan { env, simulate } => cmd_plan(config_path, env, simulate, &formatter).await,
        Commands::Apply {
            env,
            yes,
            simulate,
            parallelism,
        } => cmd_apply(config_path, env, yes, simulate, parallelism, &formatter).await,
        Commands::Outputs { env } => cmd_outputs(config_path, env, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new clusterform stack in: {}", path.display());

    let config_path = path.join("clusterform.yaml");
    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let files: [(&str, &str); 4] = [
        ("clusterform.yaml", include_str!("../templates/clusterform.yaml")),
        (".env.example", include_str!("../templates/.env.example")),
        ("elb-policy.json", include_str!("../templates/elb-policy.json")),
        ("aws-elb-crd.yaml", include_str!("../templates/aws-elb-crd.yaml")),
    ];
    for (name, content) in files {
        let target = path.join(name);
        std::fs::write(&target, content)?;
        eprintln!("Created: {}", target.display());
    }

    let gitignore_path = path.join(".gitignore");
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", state_entry.as_str()]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# clusterform")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set CLUSTERFORM_PROVIDER_TOKEN");
    eprintln!("  2. Edit clusterform.yaml with your environments and resources");
    eprintln!("  3. Run 'clusterform validate' to check the stack");
    eprintln!("  4. Run 'clusterform plan --simulate' to see the resource order");
    eprintln!("  5. Run 'clusterform apply' to provision every environment");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);

    emit(formatter, &formatter.format_validation(&config, &result, show_warnings));

    if result.is_valid() {
        Ok(())
    } else {
        Err(ConfigError::validation(
            format!("{} validation error(s)", result.error_count()),
            "stack",
        )
        .into())
    }
}

/// Show the plan of every environment.
async fn cmd_plan(
    config_path: Option<&Path>,
    env: Option<String>,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let provider = create_provider(&config, simulate)?;

    let planned = StackRunner::new(config, base_dir, provider)
        .only_environment(env)
        .prepare()
        .await?;

    emit(formatter, &formatter.format_plans(&planned));
    Ok(())
}

/// Apply the stack.
async fn cmd_apply(
    config_path: Option<&Path>,
    env: Option<String>,
    auto_approve: bool,
    simulate: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let provider = create_provider(&config, simulate)?;
    let abort = AbortSignal::new();

    let mut runner = StackRunner::new(config.clone(), &base_dir, provider)
        .only_environment(env)
        .with_abort_signal(abort.clone());
    if let Some(parallelism) = parallelism {
        runner = runner.with_max_parallel(parallelism.max(1));
    }
    if simulate {
        warn!("Simulated run: no state will be recorded");
    } else {
        runner = runner.with_store(open_store(&config.state, &base_dir).await?);
    }

    let planned = runner.prepare().await?;
    if !formatter.is_json() {
        emit(formatter, &formatter.format_plans(&planned));
    }

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ")? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight resources");
            abort.trigger();
        }
    });

    let report = runner.apply(planned).await?;
    emit(formatter, &formatter.format_run(&report));
    report.ensure_success()
}

/// Show recorded exports.
async fn cmd_outputs(
    config_path: Option<&Path>,
    env: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = open_store(&config.state, &base_dir).await?;

    let mut states = Vec::new();
    for environment in selected_environments(&config, env)? {
        match store.load(&environment).await? {
            Some(state) => states.push(state),
            None => debug!("No state recorded for {environment}"),
        }
    }

    emit(formatter, &formatter.format_outputs(&states));
    Ok(())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let store = open_store(&config.state, &base_dir).await?;

    match command {
        StateCommands::Show { env } => {
            for environment in selected_environments(&config, env)? {
                let lock = store.get_lock_info(&environment).await?;
                match store.load(&environment).await? {
                    Some(state) => emit(formatter, &formatter.format_state(&state, lock.as_ref())),
                    None => eprintln!("No state found for {environment}."),
                }
            }
        }
        StateCommands::Unlock {
            env,
            lock_id,
            force,
        } => unlock(store.as_ref(), &env, lock_id, force).await?,
    }

    Ok(())
}

async fn unlock(
    store: &dyn StateStore,
    environment: &str,
    lock_id: Option<String>,
    force: bool,
) -> Result<()> {
    let Some(current) = store.get_lock_info(environment).await? else {
        eprintln!("{environment} is not locked.");
        return Ok(());
    };

    let id = if force {
        current.lock_id.clone()
    } else if let Some(id) = lock_id {
        id
    } else {
        eprintln!(
            "{environment} is locked by {} ({}). Provide --lock-id or use --force.",
            current.holder, current.lock_id
        );
        return Ok(());
    };

    store.release_lock(environment, &id).await?;
    if store.get_lock_info(environment).await?.is_some() {
        eprintln!("Lock ID does not match; {environment} is still locked.");
    } else {
        eprintln!("{environment} unlocked.");
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads `.env`, the stack file and its environment overrides.
///
/// Returns the configuration and the directory of the stack file.
fn load_config(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |p| Ok(p.to_path_buf()))?;
    debug!("Loading stack from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;
    Ok((config, base_dir))
}

/// Environments named by `--env`, or all of them.
fn selected_environments(config: &StackConfig, env: Option<String>) -> Result<Vec<String>> {
    match env {
        Some(env) if config.has_environment(&env) => Ok(vec![env]),
        Some(env) => Err(ConfigError::validation(
            format!("Unknown environment '{env}'"),
            "environments",
        )
        .into()),
        None => Ok(config.environments.clone()),
    }
}

/// Creates the provider for a run.
fn create_provider(config: &StackConfig, simulate: bool) -> Result<Arc<dyn ResourceProvider>> {
    if simulate {
        return Ok(Arc::new(SimulatedProvider::new()));
    }

    let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
        ConfigError::validation(
            "Provider endpoint not configured (use --simulate for a dry run)",
            "provider.endpoint",
        )
    })?;
    let token = ConfigParser::provider_token()?;

    let provider = HttpProvider::with_timeout(endpoint, &token, config.provider.timeout_secs)
        .map_err(ClusterformError::from)?
        .with_retries(
            config.provider.max_retries,
            Duration::from_millis(config.provider.retry_delay_ms),
        );
    Ok(Arc::new(provider))
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Writes command output: JSON to stdout, text to stderr.
fn emit(formatter: &OutputFormatter, output: &str) {
    if formatter.is_json() {
        println!("{output}");
    } else {
        eprintln!("{output}");
    }
}
