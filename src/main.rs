use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vpnmux::config::Config;
use vpnmux::db::Storage;
use vpnmux::runtime::{ContainerRuntime, docker::DockerCli};
use vpnmux::system::{CommandRunner, SystemRunner};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.database_url,
        vpn_image = %cfg.vpn_image,
        subnet = %cfg.subnet_cidr,
        lan = %cfg.lan_interface,
        wan = %cfg.wan_interface,
        openvpn_dir = %cfg.openvpn_dir.display(),
        loglevel = %cfg.loglevel
    );

    let storage = Storage::connect(&cfg.database_url).await?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(cfg.command_timeout()));
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(runner.clone()));

    let reconciler = vpnmux::Reconciler::new(storage, runner, runtime, &cfg);
    let handle = match vpnmux::service::spawn(reconciler).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "startup reconciliation failed");
            return Err(e.into());
        }
    };

    let state = vpnmux::router::VpnmuxState::new(handle.clone());
    let app = vpnmux::router::vpnmux_router(state);

    let addr = format!("0.0.0.0:{}", cfg.listen_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.stop();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
