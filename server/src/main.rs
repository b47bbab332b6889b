mod config;

use analytics::AnalyticsModule;
use auction::openrtb::BidRequest;
use auction::registry::BuildError;
use auction::{AuctionDispatcher, AuctionError, BidderRegistry, BuilderTable, EntryPoint};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "prebid";

#[derive(Parser)]
#[command(name = "prebid-server", about = "Header bidding auction server")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "prebid-server.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Load and validate the config file, then exit
    ValidateConfig,
    /// Run one auction and print the bid response as JSON
    Auction {
        /// OpenRTB bid request file, `-` for stdin
        #[arg(long, short)]
        request: PathBuf,

        #[arg(long, value_enum, default_value_t = EntryPointArg::Auction)]
        entry_point: EntryPointArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EntryPointArg {
    Auction,
    Amp,
    Video,
}

impl From<EntryPointArg> for EntryPoint {
    fn from(arg: EntryPointArg) -> Self {
        match arg {
            EntryPointArg::Auction => EntryPoint::Auction,
            EntryPointArg::Amp => EntryPoint::Amp,
            EntryPointArg::Video => EntryPoint::Video,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse bid request: {0}")]
    ParseRequest(#[source] serde_json::Error),
    #[error("could not serialize bid response: {0}")]
    WriteResponse(#[source] serde_json::Error),
    #[error("could not build bidders: {0}")]
    Registry(#[from] BuildError),
    #[error(transparent)]
    Auction(#[from] AuctionError),
    #[error("could not start analytics: {0}")]
    Analytics(#[from] analytics::ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("interrupted")]
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());

    if let Some(metrics) = &config.common.metrics {
        if let Err(e) = init_metrics(metrics) {
            tracing::error!(error = %e, "Metrics disabled");
        }
    }

    let result = match cli.command {
        CliCommand::ValidateConfig => {
            tracing::info!(
                bidders = config.auction.bidders.len(),
                analytics = config.analytics.as_ref().is_some_and(|a| a.enabled),
                "Config is valid"
            );
            Ok(())
        }
        CliCommand::Auction {
            request,
            entry_point,
        } => tokio::runtime::Runtime::new()
            .map_err(CliError::from)
            .and_then(|runtime| runtime.block_on(run_auction(config, &request, entry_point.into()))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "prebid-server failed");
            ExitCode::FAILURE
        }
    }
}

/// Installs the tracing subscriber, plus sentry when a DSN is configured.
fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.map_or("info", |c| c.level.as_str())))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let guard = config.and_then(|c| c.sentry_dsn.as_deref()).map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(auction::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(analytics::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run_auction(config: Config, path: &Path, entry_point: EntryPoint) -> Result<(), CliError> {
    let request = read_request(path)?;
    let request_id = request.id.clone();

    let registry = BidderRegistry::from_config(&config.auction.bidders, &BuilderTable::with_builtin())?;
    let mut dispatcher = AuctionDispatcher::new(Arc::new(registry), config.auction)?;

    let analytics = match config.analytics.filter(|a| a.enabled) {
        Some(analytics) => Some(AnalyticsModule::start(&analytics, reqwest::Client::new())?),
        None => None,
    };
    if let Some(module) = &analytics {
        dispatcher = dispatcher.with_analytics(module.sink());
    }

    let outcome = tokio::select! {
        result = dispatcher.hold_auction(request, entry_point) => result.map_err(CliError::from),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(request_id = %request_id, "Interrupted, abandoning auction");
            Err(CliError::Interrupted)
        }
    };

    // Flush analytics whether or not the auction completed
    if let Some(module) = analytics {
        if let Err(e) = module.shutdown().await {
            tracing::error!(error = %e, "Failed to flush analytics");
        }
    }

    let result = outcome?;
    tracing::info!(
        request_id = %request_id,
        status = result.status.as_str(),
        bids = result.bids.len(),
        errors = result.errors.len(),
        "Auction complete"
    );

    let response = result.into_bid_response(request_id);
    let json = serde_json::to_string_pretty(&response).map_err(CliError::WriteResponse)?;
    println!("{json}");
    Ok(())
}

fn read_request(path: &Path) -> Result<BidRequest, CliError> {
    let bytes = if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        std::fs::read(path)?
    };
    BidRequest::from_bytes(&bytes).map_err(CliError::ParseRequest)
}
