use std::{sync::Arc, time::Instant};

use provisioner::{
    api,
    cluster::KubeCluster,
    config::Config,
    connector::{ClusterNodeConnector, NodeConnector},
    flight::FlightTracker,
    reconcile::Reconciler,
    record_store::{HttpRecordStore, RecordStore},
    scheduler::Scheduler,
    AppState,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provisioner=debug,tower_http=info,kube=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        namespace = %config.layout.namespace,
        prefix = %config.layout.prefix,
        record_store = %config.record_store_url,
        "provisioner starting"
    );

    // Fatal without cluster credentials.
    let cluster = Arc::new(KubeCluster::connect(&config.layout.namespace).await?);
    let mode = cluster.mode();

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let store: Arc<dyn RecordStore> = Arc::new(HttpRecordStore::new(
        http.clone(),
        &config.record_store_url,
        &config.record_store_secret,
    ));
    let connector: Arc<dyn NodeConnector> = Arc::new(ClusterNodeConnector::new(
        Arc::clone(&cluster),
        http,
        config.node_api_password.clone(),
        config.layout.prefix.clone(),
        config.endpoints.clone(),
        mode,
    ));
    let reconciler = Arc::new(Reconciler::new(
        cluster,
        Arc::clone(&store),
        connector,
        config.layout.clone(),
        config.funding.clone(),
    ));

    let flights = FlightTracker::new(config.max_in_flight);
    let scheduler = Scheduler::new(reconciler, store, flights.clone(), config.poll_interval);

    let state = Arc::new(AppState {
        flights,
        started_at: Instant::now(),
    });
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.admin_port);
    info!("admin API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        res = scheduler.run() => res?,
        res = axum::serve(listener, app) => res?,
    }
    Ok(())
}
