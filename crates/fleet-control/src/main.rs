use std::sync::Arc;

use anyhow::Context;
use fleet_control::command_runner::ProcessRunner;
use fleet_control::config::FleetConfig;
use fleet_control::routes;
use fleet_control::state::AppState;
use fleet_control::supervisor::Supervisor;

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
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
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = FleetConfig::load()?;
    let runner = Arc::new(ProcessRunner::new(cfg.kill_grace));
    let supervisor = Supervisor::new(&cfg, runner);
    supervisor.init_dirs().await.with_context(|| {
        format!(
            "create state dirs ({}, {})",
            cfg.pid_dir.display(),
            cfg.log_dir.display()
        )
    })?;

    if supervisor.registry().is_empty() {
        tracing::warn!("no services registered");
    }
    for svc in supervisor.registry().iter() {
        tracing::info!(service = %svc.name, port = svc.port, kind = svc.kind.as_str(), "registered");
    }

    let app = routes::router(AppState { supervisor });
    let addr = cfg.bind;
    tracing::info!(%addr, scripts = %cfg.scripts_dir.display(), "fleet-control HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
