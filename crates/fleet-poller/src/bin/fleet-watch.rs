use std::time::Duration;

use fleet_poller::{AdaptivePoller, HttpStatusSource, PollerConfig, PollerSnapshot};

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn summarize(snap: &PollerSnapshot) -> Option<String> {
    let status = snap.last_good.as_ref()?;
    let up: Vec<&str> = status
        .services
        .iter()
        .filter(|s| s.running)
        .map(|s| s.name.as_str())
        .collect();
    Some(format!(
        "{}/{} running [{}]",
        status.running,
        status.total,
        up.join(", ")
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url = std::env::var("FLEET_SUPERVISOR_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:3001".to_string());
    let cfg = PollerConfig {
        base_interval: Duration::from_millis(
            env_u64("FLEET_POLL_INTERVAL_MS")
                .map(|v| v.clamp(250, 10 * 60 * 1000))
                .unwrap_or(5000),
        ),
        ..Default::default()
    };

    let source = HttpStatusSource::new(&base_url, Duration::from_secs(10))?;
    let mut poller = AdaptivePoller::new(source, cfg);
    let mut rx = poller.subscribe();
    poller.activate();
    tracing::info!(%base_url, interval_ms = cfg.base_interval.as_millis() as u64, "watching fleet");

    let mut last_summary: Option<String> = None;
    let mut last_phase = poller.snapshot().phase;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                if snap.phase != last_phase {
                    tracing::info!(phase = ?snap.phase, errors = snap.consecutive_errors, "poller phase");
                    last_phase = snap.phase;
                }
                let summary = summarize(&snap);
                if summary.is_some() && summary != last_summary {
                    tracing::info!(
                        fleet = summary.as_deref().unwrap_or_default(),
                        polls = snap.stats.total_polls,
                        failures = snap.stats.failures,
                        "fleet status"
                    );
                    last_summary = summary;
                }
            }
        }
    }

    poller.deactivate();
    let stats = poller.snapshot().stats;
    tracing::info!(
        polls = stats.total_polls,
        successes = stats.successes,
        failures = stats.failures,
        "stopped"
    );
    Ok(())
}
