// topic-tap entry point.
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tap::cli::Args;
use tap::config::TapConfig;
use tap::{lifecycle, observability, output, stop};
use tap_cloud::{AwsMessagingClient, MessagingClient};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse first: a missing topic prints usage and exits before any service call.
    let args = Args::parse();
    let mut config = TapConfig::from_env_or_yaml()?;
    args.apply(&mut config).context("invalid configuration")?;

    if let Some(handle) = observability::init_observability("topic-tap", config.metrics_bind)?
        && let Some(addr) = config.metrics_bind
    {
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(handle, addr).await {
                tracing::warn!(error = %err, "metrics server exited");
            }
        });
    }

    let client: Arc<dyn MessagingClient> =
        Arc::new(AwsMessagingClient::connect(&config.region).await);
    tracing::info!(region = %config.region, topic = %args.topic, "starting tap");

    let (stop_handle, stop_signal) = stop::channel();
    stop::spawn_interrupt_listener(stop_handle.clone());
    stop::spawn_operator_listener(stop_handle);

    let (tx, rx) = mpsc::channel(output::OUTPUT_BUFFER);
    let writer = tokio::spawn(output::write_lines(rx, tokio::io::stdout()));

    let outcome = lifecycle::run(client, &config, args.topic, stop_signal, tx).await;
    match writer.await {
        Ok(Err(err)) => tracing::warn!(error = %err, "writing output failed"),
        Err(err) => tracing::warn!(error = %err, "output writer failed"),
        Ok(Ok(_)) => {}
    }
    let report = outcome.into_result()?;
    tracing::info!(
        state = %report.reached,
        released = report.teardown.released.len(),
        already_gone = report.teardown.already_gone.len(),
        failed = report.teardown.failed.len(),
        "tap stopped"
    );
    Ok(())
}
