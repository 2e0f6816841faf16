//! Logging and metrics for the tap.
//!
//! Tracing goes to stderr through an `EnvFilter` (default `info`, `RUST_LOG`
//! overrides) so stdout stays reserved for drained payloads. A Prometheus
//! recorder is installed only when a metrics bind address is configured; the
//! drain and teardown counters are no-ops otherwise.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
#[cfg(test)]
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(test)]
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize tracing and, when `metrics_bind` is set, the metrics recorder.
///
/// Returns the Prometheus handle for [`serve_metrics`] when metrics are on.
pub fn init_observability(
    service_name: &str,
    metrics_bind: Option<SocketAddr>,
) -> anyhow::Result<Option<PrometheusHandle>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    init_subscriber(tracing_subscriber::registry().with(filter).with(fmt_layer));
    tracing::debug!(service = service_name, "tracing initialized");

    match metrics_bind {
        Some(_) => Ok(Some(install_metrics_recorder()?)),
        None => Ok(None),
    }
}

/// Serve `/metrics` and `/live` until the listener fails.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/live", axum::routing::get(|| async { "ok" }))
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    #[cfg(test)]
    {
        // The global recorder can only be installed once per test binary.
        if let Some(handle) = METRICS_HANDLE.get() {
            return Ok(handle.clone());
        }
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = METRICS_HANDLE.set(handle.clone());
        Ok(handle)
    }
    #[cfg(not(test))]
    {
        Ok(PrometheusBuilder::new().install_recorder()?)
    }
}

fn init_subscriber<S>(subscriber: S)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    #[cfg(test)]
    {
        let _ = subscriber.try_init();
    }
    #[cfg(not(test))]
    {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn metrics_disabled_without_bind() -> anyhow::Result<()> {
        assert!(init_observability("tap-test", None)?.is_none());
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn metrics_endpoint_reports_counters() -> anyhow::Result<()> {
        let bind: SocketAddr = "127.0.0.1:0".parse()?;
        let handle = init_observability("tap-test", Some(bind))?.expect("handle");
        metrics::counter!("tap_messages_emitted_total").increment(3);

        let listener = tokio::net::TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, metrics_router(handle).into_make_service())
                .await
                .ok();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await?
            .text()
            .await?;
        assert!(body.contains("tap_messages_emitted_total"));

        let live = reqwest::get(format!("http://{addr}/live")).await?;
        assert_eq!(live.status(), 200);
        assert_eq!(live.text().await?, "ok");
        Ok(())
    }
}
