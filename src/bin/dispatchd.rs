//! # dispatchd
//!
//! Daemon entry point: wires the Postgres stores, external clients, and
//! the three dispatch loops together, runs them until interrupted, and
//! shuts each loop down with a bounded timeout.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use transient_dispatch::clients::{
    AdapterRegistry, FacilityHttpClient, RelayClient, RelayClientConfig, ReportClient,
    ReportClientConfig,
};
use transient_dispatch::config::DispatchConfig;
use transient_dispatch::dispatch::{Heartbeat, ReconciliationLoop, RetrievalLoop, SubmissionLoop};
use transient_dispatch::logging::init_structured_logging;
use transient_dispatch::notify::BroadcastNotifier;
use transient_dispatch::retry::RetryPolicy;
use transient_dispatch::store::{PgFacilityStore, PgSubmissionStore};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = DispatchConfig::from_env().context("loading configuration")?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    let submission_store = Arc::new(PgSubmissionStore::new(pool.clone()));
    let facility_store = Arc::new(PgFacilityStore::new(pool));

    let report_client = ReportClient::new(ReportClientConfig {
        base_url: config.report_base_url.clone(),
        api_key: config.report_api_key.clone(),
        bot_id: None,
        bot_name: None,
        source_group_id: None,
        timeout: config.report_timeout,
        retry: RetryPolicy::from_config(&config),
    })
    .context("building report client")?;
    let relay_client = RelayClient::new(RelayClientConfig {
        base_url: config.relay_base_url.clone(),
        timeout: config.relay_timeout,
    })
    .context("building relay client")?;
    let facility_http =
        FacilityHttpClient::new(config.facility_timeout).context("building facility client")?;

    let registry = Arc::new(AdapterRegistry::with_defaults().await);
    let notifier = Arc::new(BroadcastNotifier::default());

    let submission = Arc::new(SubmissionLoop::new(
        submission_store.clone(),
        report_client.clone(),
        relay_client,
        notifier.clone(),
        config.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationLoop::new(
        submission_store,
        report_client,
        notifier.clone(),
        config.clone(),
    ));
    let retrieval = Arc::new(RetrievalLoop::new(
        facility_store,
        facility_http,
        registry,
        notifier,
        config.clone(),
    ));
    let heartbeat = Arc::new(Heartbeat::new(config.heartbeat_interval));

    info!("Starting dispatch engine");
    let submission_handle = tokio::spawn({
        let submission = submission.clone();
        async move {
            if let Err(e) = submission.run().await {
                error!(error = %e, "Submission loop exited with error");
            }
        }
    });
    let reconciliation_handle = tokio::spawn({
        let reconciliation = reconciliation.clone();
        async move {
            if let Err(e) = reconciliation.run().await {
                error!(error = %e, "Reconciliation loop exited with error");
            }
        }
    });
    let retrieval_handle = tokio::spawn({
        let retrieval = retrieval.clone();
        async move {
            if let Err(e) = retrieval.run().await {
                error!(error = %e, "Retrieval loop exited with error");
            }
        }
    });
    let heartbeat_handle = tokio::spawn({
        let heartbeat = heartbeat.clone();
        async move { heartbeat.run().await }
    });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received; stopping loops");

    submission.stop(SHUTDOWN_TIMEOUT).await;
    reconciliation.stop(SHUTDOWN_TIMEOUT).await;
    retrieval.stop(SHUTDOWN_TIMEOUT).await;
    heartbeat.stop(Duration::from_secs(2)).await;

    for handle in [
        submission_handle,
        reconciliation_handle,
        retrieval_handle,
        heartbeat_handle,
    ] {
        let _ = handle.await;
    }

    info!("Dispatch engine stopped");
    Ok(())
}
