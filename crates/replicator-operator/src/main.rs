use futures::StreamExt;
use kube::Client;
use replicator_operator::replicator_controller as rc;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("replicator-operator starting up");

    let client = Client::try_default().await?;
    let watch_namespace = std::env::var("WATCH_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty());
    let resync = std::env::var("RESYNC_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(rc::DEFAULT_RESYNC);

    let ctx = Arc::new(rc::Ctx {
        client: client.clone(),
        resync,
        backoff: Arc::new(rc::Backoff::default()),
    });
    let controller = rc::controller(client, watch_namespace.as_deref())
        .run(rc::reconcile, rc::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "replicator reconcile error");
            }
        });

    tokio::select! {
        _ = controller => {},
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }
    Ok(())
}
