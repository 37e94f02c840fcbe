use dnsinit::{
    config::{ControllerConfig, Credentials},
    dns::AzureDns,
    RouteInitializer,
};
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kubeconfig first, in-cluster service account otherwise
    let client = Client::try_default().await?;
    let config = ControllerConfig::load(client.clone()).await?;
    let credentials = Credentials::load(client.clone(), &config.azure).await?;
    let dns = AzureDns::new(credentials, config.azure, config.dns)?;
    let initializer = RouteInitializer::new(client.clone(), dns);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    info!("Starting route initializer");
    dnsinit::run(client, initializer, shutdown).await?;
    info!("Route initializer stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    // local development needs ctrl_c, kubernetes sends SIGTERM
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => warn!("Intercepted ctrl_c signal"),
        _ = terminate => warn!("Intercepted SIGTERM"),
    }
    shutdown.cancel();
}
