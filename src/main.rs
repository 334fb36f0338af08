use anyhow::{Context, Result};
use assessctl::api::auth::Credentials;
use assessctl::api::client::{AssessmentClient, RemoteClient};
use assessctl::api::http::format_api_error;
use assessctl::assessment::reconciler::{Plan, Reconciler, ResourceInstance};
use assessctl::assessment::verify::verify_destroyed;
use assessctl::config::{load_desired, Config};
use assessctl::context::CallContext;
use assessctl::state::{verify_state_destroyed, StateFile};
use assessctl::{Error, VERSION};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Reconcile Audit Manager assessments with their configuration
#[derive(Parser, Debug)]
#[command(name = "assessctl", version = VERSION, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Control-plane endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Region used for the endpoint and locators
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Account used for locators
    #[arg(long, global = true)]
    account_id: Option<String>,

    /// Tracked state file
    #[arg(long, global = true, default_value_os_t = StateFile::default_path())]
    state: PathBuf,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what apply would change
    Plan {
        name: String,
        /// Desired configuration (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Create, update or replace an assessment to match its configuration
    Apply {
        name: String,
        #[arg(short, long)]
        file: PathBuf,
        /// Do not wait for a new assessment to become visible
        #[arg(long)]
        no_wait: bool,
    },
    /// Refresh every tracked assessment from the control plane
    Refresh,
    /// Print tracked state
    Show { name: Option<String> },
    /// Adopt an existing assessment
    Import { name: String, id: String },
    /// Delete one tracked assessment, or all of them
    Destroy { name: Option<String> },
    /// Check that no tracked assessment still exists remotely
    VerifyDestroyed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("assessctl {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("assessctl").join("assessctl.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".assessctl").join("assessctl.log");
    }
    PathBuf::from("assessctl.log")
}

/// Render a library error for the terminal
fn describe(error: &Error) -> String {
    match error {
        Error::Transport { operation, id, source } => {
            format!("{} {}: {}", operation, id, format_api_error(source))
        }
        other => other.to_string(),
    }
}

async fn connect(args: &Args, config: &Config) -> Result<Arc<dyn RemoteClient>> {
    let endpoint = config.effective_endpoint(args.endpoint.as_deref())?;

    let credentials = match Config::static_token() {
        Some(token) => Credentials::from_static(&token),
        None => Credentials::from_adc()
            .await
            .map_err(|e| anyhow::anyhow!(format_api_error(&e)))
            .context("No credentials found; set ASSESSCTL_TOKEN or configure Application Default Credentials")?,
    };

    tracing::info!("Using endpoint: {}", endpoint);
    let client = AssessmentClient::new(endpoint, credentials)?;
    Ok(Arc::new(client))
}

/// Command context: cancelled by Ctrl-C and bounded by the configured timeout
fn command_context(config: &Config) -> CallContext {
    let (ctx, handle) = CallContext::cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight requests");
            handle.cancel();
        }
    });
    ctx.with_timeout(config.request_timeout())
}

fn describe_plan(address: &str, plan: &Plan) -> String {
    let join = |changes: &[assessctl::assessment::drift::Attribute]| {
        changes
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match plan {
        Plan::NoOp => format!("{address}: no changes"),
        Plan::Create => format!("{address}: will be created"),
        Plan::Update(changes) => format!("{address}: will be updated in place ({})", join(changes)),
        Plan::Replace(changes) => format!("{address}: must be replaced ({})", join(changes)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let config = Config::load();
    let mut state = StateFile::load(&args.state)?;

    match run(&args, &config, &mut state).await {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<Error>() {
            Some(e) => {
                tracing::error!("{}", e);
                anyhow::bail!(describe(e))
            }
            None => Err(err),
        },
    }
}

async fn run(args: &Args, config: &Config, state: &mut StateFile) -> Result<()> {
    if let Command::Show { name } = &args.command {
        let output = match name {
            Some(name) => {
                let address = ResourceInstance::address_for(name);
                let instance = state
                    .get(&address)
                    .with_context(|| format!("{address} is not tracked"))?;
                serde_json::to_string_pretty(instance)?
            }
            None => serde_json::to_string_pretty(&state.resources)?,
        };
        println!("{output}");
        return Ok(());
    }

    let client = connect(args, config).await?;
    let scheme = config.locator_scheme(args.region.as_deref(), args.account_id.as_deref());
    let reconciler = Reconciler::new(Arc::clone(&client), scheme);
    let ctx = command_context(config);

    match &args.command {
        Command::Show { .. } => {}

        Command::Plan { name, file } => {
            let desired = load_desired(file)?;
            let mut instance = state.instance(&ResourceInstance::address_for(name));
            let plan = reconciler.plan(&ctx, &mut instance, &desired).await?;
            println!("{}", describe_plan(&instance.address, &plan));
            // A refresh may have discovered an out-of-band deletion
            state.put(instance);
            state.save(&args.state)?;
        }

        Command::Apply {
            name,
            file,
            no_wait,
        } => {
            let desired = load_desired(file)?;
            let mut instance = state.instance(&ResourceInstance::address_for(name));
            let result = reconciler.apply(&ctx, &mut instance, &desired).await;
            state.put(instance.clone());
            state.save(&args.state)?;
            let plan = result?;

            if matches!(plan, Plan::Create | Plan::Replace(_)) && !no_wait {
                let confirmed = reconciler
                    .confirm(&ctx, &mut instance, &config.backoff())
                    .await;
                state.put(instance.clone());
                state.save(&args.state)?;
                confirmed?;
            }
            println!("{}", describe_plan(&instance.address, &plan));
        }

        Command::Refresh => {
            let mut instances: Vec<ResourceInstance> = state
                .resources
                .values()
                .filter(|i| i.is_assessment())
                .cloned()
                .collect();

            let results = join_all(
                instances
                    .iter_mut()
                    .map(|instance| reconciler.read(&ctx, instance)),
            )
            .await;

            let mut failures = 0;
            for (instance, result) in instances.into_iter().zip(results) {
                match result {
                    Ok(Some(_)) => println!("{}: present", instance.address),
                    Ok(None) => println!("{}: gone, removed from state", instance.address),
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", instance.address, describe(&e));
                    }
                }
                state.put(instance);
            }
            state.save(&args.state)?;

            if failures > 0 {
                anyhow::bail!("{failures} assessment(s) could not be refreshed");
            }
        }

        Command::Import { name, id } => {
            let address = ResourceInstance::address_for(name);
            if state.get(&address).is_some() {
                anyhow::bail!("{address} is already tracked");
            }
            let instance = reconciler.import(&ctx, &address, id).await?;
            println!(
                "{}: imported {}",
                address,
                instance.locator.as_deref().unwrap_or(id)
            );
            state.put(instance);
            state.save(&args.state)?;
        }

        Command::Destroy { name } => {
            let addresses: Vec<String> = match name {
                Some(name) => vec![ResourceInstance::address_for(name)],
                None => state
                    .resources
                    .values()
                    .filter(|i| i.is_assessment())
                    .map(|i| i.address.clone())
                    .collect(),
            };

            let mut deleted = Vec::new();
            for address in addresses {
                let mut instance = state.instance(&address);
                let id = instance.id.clone();
                let result = reconciler.delete(&ctx, &mut instance).await;
                state.put(instance);
                state.save(&args.state)?;
                result?;
                if let Some(id) = id {
                    println!("{address}: destroyed");
                    state.record_destroyed(id.clone());
                    state.save(&args.state)?;
                    deleted.push(id);
                }
            }

            verify_destroyed(client.as_ref(), &ctx, &deleted).await?;
        }

        Command::VerifyDestroyed => {
            verify_state_destroyed(client.as_ref(), &ctx, state).await?;
            println!("No tracked assessment exists remotely");
        }
    }

    Ok(())
}
