use std::process::ExitCode;
use std::sync::Arc;

use chatters_ledger::db::prelude::*;
use chatters_ledger::runner::RunContext;
use chatters_ledger::runner::scheduler::Scheduler;
use chatters_ledger::util::chatters::{FetchErr, TmiClient};
use chatters_ledger::util::config::{self, ConfigErr, Settings};
use chatters_ledger::util::telemetry::Telemetry;
use clap::Parser;
use thiserror::Error;

/// Failures that abort the whole run before any channel is attempted.
#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Config(#[from] ConfigErr),

    #[error("invalid redis url: {0}")]
    Cache(#[from] CacheErr),

    #[error("http client setup failed: {0}")]
    Http(#[from] FetchErr),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();

    let telemetry = match Telemetry::init(&settings.log_filter, settings.otel_endpoint.as_deref())
    {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("unable to initialize telemetry: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(&settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    };

    telemetry.shutdown();
    code
}

async fn run(settings: &Settings) -> Result<bool> {
    settings.validate()?;
    let channels = config::load_channels(&settings.config)?;

    let ctx = RunContext {
        source: Arc::new(TmiClient::new(&settings.chatters_host)?),
        cache: Arc::new(RedisPool::new(&settings.redis_url)?),
        connector: Arc::new(PgConnector {
            init_schema: settings.init_schema,
            ..PgConnector::default()
        }),
        interval_minutes: settings.interval_minutes,
    };

    let report = Scheduler::new(ctx).run_once(channels).await;
    report.log_diagnostics();

    Ok(report.is_success())
}
