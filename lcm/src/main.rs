use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use lcm::{cluster::own_service_ip, router, Config, Context, FIELD_MANAGER};
use lcm_client::{gcp::Credentials, GoogleClient, KubeClient};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level).context("invalid LOG_LEVEL")?;
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("a rustls crypto provider was already installed");
    }

    let kube = Arc::new(KubeClient::new(kube::Client::try_default().await?, FIELD_MANAGER));
    let credentials = Credentials::from_optional_keyfile(config.cloud_keyfile.as_deref())
        .context("loading cloud credentials")?;
    let cloud = Arc::new(GoogleClient::try_default(credentials)?);

    let service_ip = own_service_ip(kube.as_ref(), config.service_namespace(), &config.service_name)
        .await
        .context("resolving own service address")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        %addr,
        metadata_type = %config.metadata_type,
        project_id = %config.project_id,
        resolver = ?config.ksa_resolver,
        %service_ip,
        "starting lcm"
    );
    let ctx = Arc::new(Context::new(config, kube, cloud, &service_ip));
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
