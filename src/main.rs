use anyhow::Result;
use popimpact::{
    config::Config,
    fetch::HttpTransport,
    pipeline::{self, PipelineError, RunSummary},
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) run ──────────────────────────────────────────────────────
    match run().await {
        Ok(summary) => {
            if !summary.failed.is_empty() {
                warn!(failed = ?summary.failed, "finished with unavailable series");
            }
            info!("done");
            ExitCode::SUCCESS
        }
        Err(e) if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::NoData)) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<RunSummary> {
    // optional config path as the only argument
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    info!(
        series = config.fred.series.len(),
        census = config.census.enabled,
        out = %config.output.table.display(),
        "configured"
    );

    let transport = HttpTransport::new(config.retry.policy().timeout)?;
    pipeline::run(&config, &transport).await
}
