use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft_runner::{config::RunnerConfig, error::RunnerError, runner};
use weft_workflow::RunStatus;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(Some(status)) if status != RunStatus::Success => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!("{report}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> weft_core::Result<Option<RunStatus>, RunnerError> {
    // Load configuration from environment
    let config = RunnerConfig::from_env().map_err(|e| RunnerError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let store = runner::open_store(&config).await?;
    let state = runner::execute(&config, store).await?;
    Ok(state.map(|state| state.status))
}
