//! ferroctl CLI entrypoint.
//!
//! This is the main entrypoint for the ferroctl command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use ferroctl::api::{
    ApiClient, OperationStatus, ResourceApi, ResourceClient, ResourceKind,
};
use ferroctl::build::{BuildClient, BuildParams};
use ferroctl::cli::{Cli, Commands, OutputFormatter, WaitArgs};
use ferroctl::config::{load_dotenv, BatchParser, Settings};
use ferroctl::error::{FerroError, Result};
use ferroctl::reconciler::Reconciler;
use ferroctl::wait::{OperationWaiter, TerminalStates, WaitConfig};
use ferroctl::watch::TopologyTracker;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
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

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    load_dotenv(Path::new("."))?;
    let settings = Settings::from_env(cli.api_url.as_deref(), cli.token.as_deref())?;
    let api = ApiClient::new(&settings)?;

    match cli.command {
        Commands::Apply { filename } => cmd_apply(&api, &filename, false, &formatter).await,
        Commands::Remove { filename } => cmd_apply(&api, &filename, true, &formatter).await,
        Commands::Get { kind, name } => cmd_get(&api, &kind, name.as_deref(), &formatter).await,
        Commands::Delete {
            kind,
            name,
            filename,
            ignore_not_found,
        } => cmd_delete(&api, &kind, name, filename, ignore_not_found, &formatter).await,
        Commands::Scale {
            name,
            replicas,
            wait,
        } => cmd_scale(&api, &name, replicas, wait).await,
        Commands::Wait { kind, name, wait } => cmd_wait(&api, &kind, &name, wait).await,
        Commands::WatchEnclaves { groups } => cmd_watch_enclaves(&api, groups, &formatter).await,
        Commands::Build {
            model_name,
            model_version,
            image_tag,
            push,
            retries,
            poll_interval,
        } => {
            cmd_build(
                &api,
                BuildParams {
                    model_name,
                    model_version,
                    image_tag,
                    push_to_registry: push,
                },
                retries,
                poll_interval,
                &formatter,
            )
            .await
        }
    }
}

/// Apply or remove a declarative batch.
async fn cmd_apply(
    api: &ApiClient,
    filename: &PathBuf,
    is_removal: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let batch = BatchParser::new().load_file(filename)?;
    info!(
        "{} {} resources from {}",
        if is_removal { "Removing" } else { "Applying" },
        batch.len(),
        filename.display()
    );

    let reconciler = Reconciler::from_api(api);
    let result = reconciler.apply(&batch, is_removal).await;

    eprintln!("{}", formatter.format_apply(&result));

    if result.is_success() {
        Ok(())
    } else {
        Err(FerroError::internal(format!(
            "{} of {} resources failed",
            result.errors.len(),
            batch.len()
        )))
    }
}

/// Get one resource or list a collection.
async fn cmd_get(
    api: &ApiClient,
    kind: &str,
    name: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let kind: ResourceKind = kind.parse().map_err(FerroError::Config)?;
    let client = ResourceClient::new(api.clone(), kind);

    if let Some(name) = name {
        let document = client.get(name).await?;
        eprintln!("{}", formatter.format_resource(&document));
    } else {
        let documents = client.get_all(None).await?;
        eprintln!("{}", formatter.format_resources(kind, &documents));
    }

    Ok(())
}

/// Delete a resource by name or by file.
async fn cmd_delete(
    api: &ApiClient,
    kind: &str,
    name: Option<String>,
    filename: Option<PathBuf>,
    ignore_not_found: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let kind: ResourceKind = kind.parse().map_err(FerroError::Config)?;

    let name = match (name, &filename) {
        (Some(name), _) => name,
        (None, Some(path)) => {
            let change = BatchParser::new().load_one(path)?;
            if change.kind() != kind {
                return Err(FerroError::internal(format!(
                    "{} expected, but {} declared in {}",
                    kind,
                    change.kind(),
                    path.display()
                )));
            }
            change.name().to_string()
        }
        (None, None) => {
            return Err(FerroError::internal(
                "Provide a resource name or a file with --filename",
            ));
        }
    };

    let client = ResourceClient::new(api.clone(), kind);
    match client.delete(&name).await {
        Ok(message) => eprintln!("{message}"),
        Err(e) if e.is_not_found() && ignore_not_found => {
            eprintln!("{kind} {name} was not found. Ignore");
        }
        Err(e) => return Err(e),
    }

    let _ = formatter;
    Ok(())
}

/// Scale a deployment, optionally waiting for it to settle.
async fn cmd_scale(api: &ApiClient, name: &str, replicas: u32, wait: WaitArgs) -> Result<()> {
    let client = ResourceClient::new(api.clone(), ResourceKind::ModelDeployment);
    let message = client.scale(name, replicas).await?;
    eprintln!("{message}");

    wait_for_resource(api, ResourceKind::ModelDeployment, name, wait).await
}

/// Wait for a resource to reach its terminal state.
async fn cmd_wait(api: &ApiClient, kind: &str, name: &str, wait: WaitArgs) -> Result<()> {
    let kind: ResourceKind = kind.parse().map_err(FerroError::Config)?;
    wait_for_resource(api, kind, name, wait).await
}

/// Shared wait logic for mutating commands.
async fn wait_for_resource(
    api: &ApiClient,
    kind: ResourceKind,
    name: &str,
    wait: WaitArgs,
) -> Result<()> {
    if wait.no_wait {
        return Ok(());
    }

    // Which states are terminal depends on the collection.
    let terminal = match kind {
        ResourceKind::ModelRoute => TerminalStates::route_readiness(),
        ResourceKind::ModelTraining | ResourceKind::ModelPackaging => TerminalStates::job(),
        _ => TerminalStates::operation(),
    };

    let config = WaitConfig::new(
        Duration::from_secs(wait.timeout),
        Duration::from_secs(wait.poll_interval),
    );

    let client = ResourceClient::new(api.clone(), kind);
    let target = name.to_string();

    let waiter = OperationWaiter::new(terminal, config);
    waiter
        .wait_with_progress(
            name,
            || {
                let client = client.clone();
                let target = target.clone();
                async move {
                    let document = client.get(&target).await?;
                    Ok(OperationStatus::from_document(&document))
                }
            },
            |status| {
                let line = status.message.as_deref().unwrap_or(&status.raw_state);
                eprintln!("Current state is {}. Sleeping... {line}", status.state);
            },
        )
        .await?;

    eprintln!("{kind} {name} is ready");
    Ok(())
}

/// Stream enclave topology events until interrupted.
async fn cmd_watch_enclaves(
    api: &ApiClient,
    groups: Vec<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let tracker = TopologyTracker::new(api.clone());
    let filter = if groups.is_empty() { None } else { Some(groups) };

    let mut watch = tracker.watch_groups(filter);
    while let Some(event) = watch.next().await {
        eprintln!("{}", formatter.format_enclave_event(&event));
    }

    info!("Topology watch ended");
    Ok(())
}

/// Request a build and report its outcome.
async fn cmd_build(
    api: &ApiClient,
    params: BuildParams,
    retries: u32,
    poll_interval: u64,
    formatter: &OutputFormatter,
) -> Result<()> {
    let client = BuildClient::new(api.clone())
        .with_retries(retries)
        .with_poll_interval(Duration::from_secs(poll_interval));

    let result = client.request_build(params).await?;
    eprintln!("{}", formatter.format_build(&result));

    Ok(())
}
