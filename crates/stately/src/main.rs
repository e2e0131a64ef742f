use clap::{Parser, Subcommand};
use stately_core::{render, to_yaml, DesiredStateParameters};
use stately_reconciler::{
    ApiClient, ReconcileOutcome, Reconciler, ReconcilerConfig, StatefulSetStore, TracingObserver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stately", about = "Stately database StatefulSet reconciler")]
struct Cli {
    /// API server URL
    #[arg(
        long,
        env = "STATELY_API_URL",
        default_value = "http://127.0.0.1:6443",
        global = true
    )]
    api_url: String,
    /// Bearer token for the API server
    #[arg(long, env = "STATELY_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    /// Deadline for one reconcile cycle, in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the StatefulSet described by a parameter file into its desired state
    Reconcile {
        /// YAML or JSON parameter file
        #[arg(long)]
        params: PathBuf,
        /// Keep reconciling at this interval until interrupted
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Print the StatefulSet a parameter file produces, without contacting the API server
    Render {
        /// YAML or JSON parameter file
        #[arg(long)]
        params: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match &cli.command {
        Commands::Reconcile {
            params,
            interval_secs,
        } => run_reconcile(&cli, params, *interval_secs).await,
        Commands::Render { params } => {
            println!("{}", render_file(params)?);
            Ok(())
        }
    }
}

/// Defaults and synthesis for a parameter file, as the YAML that would be created
fn render_file(path: &Path) -> miette::Result<String> {
    let params = DesiredStateParameters::from_file(path)?;
    let mut statefulset = render(&params)?;
    ReconcilerConfig::default()
        .patch_engine()
        .annotator()
        .set_last_applied(&mut statefulset)?;
    Ok(to_yaml(&statefulset)?)
}

fn build_store(cli: &Cli) -> miette::Result<Arc<dyn StatefulSetStore>> {
    let mut builder =
        ApiClient::builder(cli.api_url.as_str()).timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(token) = &cli.token {
        builder = builder.token(token.as_str());
    }
    Ok(Arc::new(builder.build()?))
}

/// One reconcile cycle bounded by `deadline`
async fn reconcile_once(
    reconciler: &Reconciler,
    params: &DesiredStateParameters,
    deadline: Duration,
) -> miette::Result<ReconcileOutcome> {
    let outcome = tokio::time::timeout(deadline, reconciler.reconcile(params))
        .await
        .map_err(|_| miette::miette!("Reconcile did not finish within {:?}", deadline))??;
    Ok(outcome)
}

fn describe(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Created => "created",
        ReconcileOutcome::Updated { .. } => "updated",
        ReconcileOutcome::Unchanged => "unchanged",
    }
}

async fn run_reconcile(
    cli: &Cli,
    params_path: &Path,
    interval_secs: Option<u64>,
) -> miette::Result<()> {
    let params = DesiredStateParameters::from_file(params_path)?;
    let store = build_store(cli)?;
    let reconciler = Arc::new(Reconciler::with_config(
        store,
        Arc::new(TracingObserver),
        ReconcilerConfig::default(),
    ));
    let deadline = Duration::from_secs(cli.timeout_secs);

    info!(
        statefulset = params.name(),
        namespace = %params.namespace,
        api_url = %cli.api_url,
        "Starting stately reconciler"
    );

    let Some(interval_secs) = interval_secs else {
        let outcome = tokio::select! {
            result = reconcile_once(&reconciler, &params, deadline) => result?,
            _ = tokio::signal::ctrl_c() => {
                return Err(miette::miette!("Interrupted before the reconcile finished"));
            }
        };
        info!(outcome = describe(&outcome), "Reconcile complete");
        return Ok(());
    };

    let token = CancellationToken::new();
    let loop_token = token.clone();
    let interval = Duration::from_secs(interval_secs);
    let handle = tokio::spawn(async move {
        loop {
            match reconcile_once(&reconciler, &params, deadline).await {
                Ok(outcome) => info!(outcome = describe(&outcome), "Reconcile cycle complete"),
                Err(e) => error!("Reconcile cycle failed: {:?}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = loop_token.cancelled() => {
                    info!("Reconcile loop shutting down");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // An in-flight cycle gets one deadline to finish
    let _ = tokio::time::timeout(deadline, handle).await;

    info!("Shutdown complete");

    Ok(())
}
