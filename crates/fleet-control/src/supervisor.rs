use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use fleet_types::{
    ActionResponse, LogsResponse, NO_LOGS_PLACEHOLDER, ServiceDescriptor, ServiceStatus,
    StatusResponse,
};
use futures_util::future::join_all;

use crate::{
    command_runner::{CommandOutcome, CommandRunner, CommandSpec},
    config::FleetConfig,
    error::SupervisorError,
    port_probe::{PortProber, TcpProber},
    registry::Registry,
    store::{LogStore, PidStore},
};

#[derive(Debug, Clone)]
struct Scripts {
    start_all: PathBuf,
    stop_all: PathBuf,
    start_service: PathBuf,
    stop_service: PathBuf,
    kill_port: PathBuf,
}

/// Control plane for the fleet. Cheap to clone; holds no locks between operations.
#[derive(Clone)]
pub struct Supervisor {
    registry: Registry,
    runner: Arc<dyn CommandRunner>,
    prober: Arc<dyn PortProber>,
    pids: PidStore,
    logs: LogStore,
    scripts: Scripts,
    probe_host: String,
    probe_timeout: Duration,
    command_timeout: Duration,
    fleet_command_timeout: Duration,
}

/// A start script reports the launched PID with a `PID=<digits>` line; the last one wins.
pub fn parse_reported_pid(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("PID="))
        .map(str::trim)
        .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        .last()
        .map(str::to_string)
}

/// Resolve a relative path against the supervisor's working directory.
fn anchored(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Supervisor {
    pub fn new(cfg: &FleetConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let services = cfg
            .services
            .iter()
            .cloned()
            .map(|mut svc| {
                svc.working_directory = svc.working_directory.as_deref().map(anchored);
                svc
            })
            .collect();
        let script = |name: &str| anchored(&cfg.script_path(name));

        Self {
            registry: Registry::new(services),
            runner,
            prober: Arc::new(TcpProber),
            pids: PidStore::new(anchored(&cfg.pid_dir)),
            logs: LogStore::new(anchored(&cfg.log_dir), cfg.max_log_bytes),
            scripts: Scripts {
                start_all: script(&cfg.scripts.start_all),
                stop_all: script(&cfg.scripts.stop_all),
                start_service: script(&cfg.scripts.start_service),
                stop_service: script(&cfg.scripts.stop_service),
                kill_port: script(&cfg.scripts.kill_port),
            },
            probe_host: cfg.probe_host.clone(),
            probe_timeout: cfg.probe_timeout,
            command_timeout: cfg.command_timeout,
            fleet_command_timeout: cfg.fleet_command_timeout,
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Create the PID and log directories if absent.
    pub async fn init_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.pids.dir()).await?;
        tokio::fs::create_dir_all(self.logs.dir()).await?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pids(&self) -> &PidStore {
        &self.pids
    }

    fn with_store_env(&self, spec: CommandSpec) -> CommandSpec {
        spec.with_env("FLEET_PID_DIR", self.pids.dir().display().to_string())
            .with_env("FLEET_LOG_DIR", self.logs.dir().display().to_string())
    }

    fn service_spec(&self, script: &Path, svc: &ServiceDescriptor) -> CommandSpec {
        let mut spec = self
            .with_store_env(CommandSpec::script(script, std::slice::from_ref(&svc.name)))
            .with_env("FLEET_SERVICE_NAME", svc.name.clone())
            .with_env("FLEET_SERVICE_PORT", svc.port.to_string());
        if let Some(dir) = &svc.working_directory {
            spec = spec.with_env("FLEET_SERVICE_DIR", dir.display().to_string());
            spec.cwd = Some(dir.clone());
        }
        spec
    }

    /// Fleet-wide scripts get the registry as `FLEET_SERVICES`: one `name<TAB>port<TAB>dir`
    /// line per service, `dir` empty when the service has none.
    fn fleet_spec(&self, script: &Path) -> CommandSpec {
        let services = self
            .registry
            .iter()
            .map(|svc| {
                let dir = svc
                    .working_directory
                    .as_deref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default();
                format!("{}\t{}\t{dir}", svc.name, svc.port)
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.with_store_env(CommandSpec::script(script, &[]))
            .with_env("FLEET_SERVICES", services)
    }

    fn lookup(&self, name: &str) -> Result<&ServiceDescriptor, SupervisorError> {
        self.registry
            .get(name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub async fn start_all(&self) -> ActionResponse {
        tracing::info!("starting all services");
        let spec = self.fleet_spec(&self.scripts.start_all);
        let outcome = self.runner.run(spec, self.fleet_command_timeout).await;
        respond(
            outcome,
            "All services started successfully",
            "Failed to start all services",
        )
    }

    pub async fn stop_all(&self) -> ActionResponse {
        tracing::info!("stopping all services");
        let spec = self.fleet_spec(&self.scripts.stop_all);
        let outcome = self.runner.run(spec, self.fleet_command_timeout).await;
        respond(
            outcome,
            "All services stopped successfully",
            "Failed to stop all services",
        )
    }

    pub async fn start_one(&self, name: &str) -> Result<ActionResponse, SupervisorError> {
        let svc = self.lookup(name)?;
        tracing::info!(service = name, port = svc.port, "starting service");

        let spec = self.service_spec(&self.scripts.start_service, svc);
        let outcome = self.runner.run(spec, self.command_timeout).await;

        if outcome.success
            && let Some(pid) = parse_reported_pid(&outcome.stdout)
        {
            if let Err(err) = self.pids.write_pid(name, &pid).await {
                tracing::error!(service = name, %err, "failed to record pid");
                return Ok(ActionResponse::failed(
                    format!("Service {name} started but its PID could not be recorded: {err}"),
                    non_empty(outcome.combined_output()),
                ));
            }
            tracing::info!(service = name, pid = %pid, "recorded pid");
        }

        Ok(respond(
            outcome,
            &format!("Service {name} started successfully"),
            &format!("Failed to start service {name}"),
        ))
    }

    pub async fn stop_one(&self, name: &str) -> Result<ActionResponse, SupervisorError> {
        let svc = self.lookup(name)?;
        tracing::info!(service = name, port = svc.port, "stopping service");

        let spec = self.service_spec(&self.scripts.stop_service, svc);
        let outcome = self.runner.run(spec, self.command_timeout).await;
        Ok(respond(
            outcome,
            &format!("Service {name} stopped successfully"),
            &format!("Failed to stop service {name}"),
        ))
    }

    /// Port 0 is rejected; freeing an already-free port is up to the script and not an error.
    pub async fn kill_port(&self, port: u16) -> Result<ActionResponse, SupervisorError> {
        if port == 0 {
            return Err(SupervisorError::InvalidPort("0".to_string()));
        }
        tracing::info!(port, "freeing port");

        let spec = self.with_store_env(CommandSpec::script(
            &self.scripts.kill_port,
            &[port.to_string()],
        ));
        let outcome = self.runner.run(spec, self.command_timeout).await;
        Ok(respond(
            outcome,
            &format!("Port {port} freed successfully"),
            &format!("Failed to free port {port}"),
        ))
    }

    pub async fn get_logs(
        &self,
        name: &str,
        max_lines: Option<usize>,
    ) -> Result<LogsResponse, SupervisorError> {
        self.lookup(name)?;
        match self.logs.read_log(name, max_lines).await {
            Ok(Some(logs)) => Ok(LogsResponse { logs }),
            Ok(None) => Ok(LogsResponse {
                logs: NO_LOGS_PLACEHOLDER.to_string(),
            }),
            Err(source) => Err(SupervisorError::LogRead {
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn service_status(&self, svc: &ServiceDescriptor) -> ServiceStatus {
        let (running, pid) = tokio::join!(
            self.prober.probe(&self.probe_host, svc.port, self.probe_timeout),
            self.pids.read_pid(&svc.name),
        );
        ServiceStatus {
            name: svc.name.clone(),
            port: svc.port,
            kind: svc.kind,
            running,
            pid,
            last_checked: Utc::now(),
        }
    }

    /// One entry per registered service, in registry order. Probes run concurrently.
    pub async fn get_status(&self) -> StatusResponse {
        let services = join_all(self.registry.iter().map(|svc| self.service_status(svc))).await;
        StatusResponse::from_services(services, Utc::now())
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn respond(outcome: CommandOutcome, ok: &str, failed: &str) -> ActionResponse {
    let output = non_empty(outcome.combined_output());
    if outcome.success {
        return ActionResponse::ok(ok, output);
    }

    let message = if outcome.timed_out {
        format!("{failed} (timed out)")
    } else if let Some(code) = outcome.exit_code {
        format!("{failed} (exit code {code})")
    } else {
        failed.to_string()
    };
    tracing::warn!(%message, "control action failed");
    ActionResponse::failed(message, output)
}
