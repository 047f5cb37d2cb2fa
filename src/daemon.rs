//! The exporter daemon: reader, publishers and exposition server wired together.

use std::net::SocketAddr;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ws90_metrics::prometheus::{MetricsServer, ServerConfig};
use ws90_metrics::{Broadcaster, PrometheusPublisher, Registry};
use ws90_types::{WS90_FIELDS, WS90_MODEL_INFO};

use crate::config::ExporterConfig;
use crate::source::{ReadingFilter, RtlReader};

/// A fully wired exporter, ready to run.
///
/// Building binds the metrics port, so address conflicts surface before the
/// decoder is started.
#[derive(Debug)]
pub struct Daemon {
    registry: Arc<Registry>,
    server: MetricsServer,
    reader: RtlReader,
    remote: Option<RemoteWorker>,
}

#[derive(Debug)]
struct RemoteWorker {
    task: JoinHandle<()>,
    flush_timeout: Duration,
}

impl Daemon {
    /// Register metrics, subscribe publishers and bind the server.
    pub async fn build(config: &ExporterConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let mut broadcaster = Broadcaster::new();

        let prometheus = PrometheusPublisher::new(
            &registry,
            WS90_FIELDS,
            WS90_MODEL_INFO,
            config.clear_interval,
        )
        .context("failed to register metrics")?;
        broadcaster.subscribe(Arc::new(prometheus));

        let remote = match &config.vm_url {
            Some(url) => Some(subscribe_remote(&mut broadcaster, url, config.vm_timeout)?),
            None => None,
        };

        if config.clear_interval.is_zero() {
            info!("Metric expiry disabled");
        } else {
            info!(
                "Clearing metrics of devices silent for {}s",
                config.clear_interval.as_secs()
            );
        }
        debug!(subscribers = ?broadcaster.subscriber_names(), "Publishers ready");

        let server_config = ServerConfig::builder()
            .listen_addr(config.listen_addr)
            .build();
        let server = MetricsServer::bind(&server_config, Arc::clone(&registry))
            .await
            .context("failed to start metrics server")?;

        let filter = ReadingFilter::new(config.model.clone(), config.devices.clone());
        let reader = RtlReader::new(config.command.clone(), filter, Arc::new(broadcaster));

        Ok(Self {
            registry,
            server,
            reader,
            remote,
        })
    }

    /// The registry served on the metrics endpoint.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Address the metrics server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    /// Serve metrics and run the decoder until it exits.
    ///
    /// Returns the decoder's exit status. Reader failures (spawn errors, pipe
    /// errors) are returned as errors.
    pub async fn run(self) -> Result<ExitStatus> {
        let server = self.server.spawn();
        let reader = self.reader.spawn();

        let outcome = reader.wait().await;
        server.abort();

        // The reader owned the last publisher handle, so the remote worker
        // drains its queue and stops.
        if let Some(remote) = self.remote {
            if tokio::time::timeout(remote.flush_timeout, remote.task)
                .await
                .is_err()
            {
                warn!("Gave up flushing VictoriaMetrics imports");
            }
        }

        outcome.context("rtl_433 reader failed")
    }
}

#[cfg(feature = "victoriametrics")]
fn subscribe_remote(
    broadcaster: &mut Broadcaster,
    url: &str,
    timeout: Duration,
) -> Result<RemoteWorker> {
    use ws90_adapters::victoriametrics::VictoriaMetricsPublisher;

    let (publisher, task) = VictoriaMetricsPublisher::builder()
        .base_url(url)
        .timeout(timeout)
        .fields(WS90_FIELDS)
        .model_info(WS90_MODEL_INFO)
        .spawn()
        .context("failed to set up VictoriaMetrics publisher")?;
    broadcaster.subscribe(Arc::new(publisher));
    info!(url, "Publishing to VictoriaMetrics");

    Ok(RemoteWorker {
        task,
        flush_timeout: timeout,
    })
}

#[cfg(not(feature = "victoriametrics"))]
fn subscribe_remote(
    _broadcaster: &mut Broadcaster,
    url: &str,
    _timeout: Duration,
) -> Result<RemoteWorker> {
    anyhow::bail!(
        "VictoriaMetrics URL {} configured, but this build has no victoriametrics support",
        url
    )
}
