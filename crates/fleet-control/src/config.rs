use std::{
    collections::HashSet,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use fleet_types::{ServiceDescriptor, ServiceKind};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "fleet.toml";
const DEFAULT_BIND: &str = "127.0.0.1:3001";
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_FLEET_COMMAND_TIMEOUT_MS: u64 = 180_000;
const DEFAULT_KILL_GRACE_MS: u64 = 2000;
const DEFAULT_MAX_LOG_BYTES: u64 = 1024 * 1024; // 1 MiB

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptNames {
    pub start_all: String,
    pub stop_all: String,
    pub start_service: String,
    pub stop_service: String,
    pub kill_port: String,
}

impl Default for ScriptNames {
    fn default() -> Self {
        Self {
            start_all: "start-all".to_string(),
            stop_all: "stop-all".to_string(),
            start_service: "start-service".to_string(),
            stop_service: "stop-service".to_string(),
            kill_port: "kill-port".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawService {
    name: String,
    #[serde(default)]
    port: u16,
    #[serde(default = "default_kind")]
    kind: ServiceKind,
    #[serde(default)]
    dir: Option<PathBuf>,
}

fn default_kind() -> ServiceKind {
    ServiceKind::Backend
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    bind: Option<String>,
    probe_host: Option<String>,
    probe_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    fleet_command_timeout_ms: Option<u64>,
    kill_grace_ms: Option<u64>,
    max_log_bytes: Option<u64>,
    scripts_dir: Option<PathBuf>,
    pid_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    scripts: ScriptNames,
    services: Vec<RawService>,
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub bind: SocketAddr,
    pub probe_host: String,
    pub probe_timeout: Duration,
    pub command_timeout: Duration,
    pub fleet_command_timeout: Duration,
    pub kill_grace: Duration,
    pub max_log_bytes: u64,
    pub scripts_dir: PathBuf,
    pub pid_dir: PathBuf,
    pub log_dir: PathBuf,
    pub scripts: ScriptNames,
    pub services: Vec<ServiceDescriptor>,
}

impl FleetConfig {
    /// Load `$FLEET_CONFIG` (or `fleet.toml`), then apply `FLEET_*` env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = env_path("FLEET_CONFIG");
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let raw = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read config {}", path.display()))?;
            parse_raw(&text).with_context(|| format!("parse config {}", path.display()))?
        } else if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        } else {
            tracing::info!(path = %path.display(), "no config file, using built-in registry");
            RawConfig::default()
        };

        let mut cfg = Self::from_raw(raw)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Self::from_raw(parse_raw(text)?)
    }

    fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
        let bind = raw.bind.as_deref().unwrap_or(DEFAULT_BIND);
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address: {bind}"))?;

        let services = if raw.services.is_empty() {
            default_services()
        } else {
            raw.services
                .into_iter()
                .map(|s| ServiceDescriptor {
                    name: s.name.trim().to_string(),
                    port: s.port,
                    kind: s.kind,
                    working_directory: s.dir,
                })
                .collect()
        };
        validate_services(&services)?;

        Ok(Self {
            bind,
            probe_host: raw.probe_host.unwrap_or_else(|| "localhost".to_string()),
            probe_timeout: Duration::from_millis(clamp_probe_timeout(
                raw.probe_timeout_ms.unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
            )),
            command_timeout: Duration::from_millis(clamp_command_timeout(
                raw.command_timeout_ms.unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
            )),
            fleet_command_timeout: Duration::from_millis(clamp_command_timeout(
                raw.fleet_command_timeout_ms
                    .unwrap_or(DEFAULT_FLEET_COMMAND_TIMEOUT_MS),
            )),
            kill_grace: Duration::from_millis(
                raw.kill_grace_ms
                    .unwrap_or(DEFAULT_KILL_GRACE_MS)
                    .clamp(100, 60_000),
            ),
            max_log_bytes: raw
                .max_log_bytes
                .unwrap_or(DEFAULT_MAX_LOG_BYTES)
                .clamp(4 * 1024, 64 * 1024 * 1024),
            scripts_dir: raw.scripts_dir.unwrap_or_else(|| PathBuf::from("scripts")),
            pid_dir: raw.pid_dir.unwrap_or_else(|| PathBuf::from("pids")),
            log_dir: raw.log_dir.unwrap_or_else(|| PathBuf::from("logs")),
            scripts: raw.scripts,
            services,
        })
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(bind) = std::env::var("FLEET_BIND") {
            self.bind = bind
                .trim()
                .parse()
                .with_context(|| format!("invalid FLEET_BIND: {bind}"))?;
        }
        if let Some(ms) = env_u64("FLEET_PROBE_TIMEOUT_MS") {
            self.probe_timeout = Duration::from_millis(clamp_probe_timeout(ms));
        }
        if let Some(ms) = env_u64("FLEET_COMMAND_TIMEOUT_MS") {
            self.command_timeout = Duration::from_millis(clamp_command_timeout(ms));
        }
        if let Some(p) = env_path("FLEET_SCRIPTS_DIR") {
            self.scripts_dir = p;
        }
        if let Some(p) = env_path("FLEET_PID_DIR") {
            self.pid_dir = p;
        }
        if let Some(p) = env_path("FLEET_LOG_DIR") {
            self.log_dir = p;
        }
        Ok(())
    }

    /// Resolve a script base name to the platform's script file.
    pub fn script_path(&self, base: &str) -> PathBuf {
        script_file(&self.scripts_dir, base)
    }
}

#[cfg(unix)]
fn script_file(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{base}.sh"))
}

#[cfg(not(unix))]
fn script_file(dir: &Path, base: &str) -> PathBuf {
    let cmd = dir.join(format!("{base}.cmd"));
    if cmd.exists() {
        return cmd;
    }
    dir.join(format!("{base}.bat"))
}

fn parse_raw(text: &str) -> anyhow::Result<RawConfig> {
    Ok(toml::from_str(text)?)
}

fn clamp_probe_timeout(ms: u64) -> u64 {
    ms.clamp(100, 10_000)
}

fn clamp_command_timeout(ms: u64) -> u64 {
    ms.clamp(1000, 30 * 60 * 1000)
}

fn default_services() -> Vec<ServiceDescriptor> {
    let backend = |name: &str, port: u16| ServiceDescriptor {
        name: name.to_string(),
        port,
        kind: ServiceKind::Backend,
        working_directory: None,
    };
    vec![
        backend("clients", 8081),
        backend("products", 8082),
        backend("orders", 8083),
        backend("deliveries", 8084),
        ServiceDescriptor {
            name: "frontend".to_string(),
            port: 5173,
            kind: ServiceKind::Frontend,
            working_directory: Some(PathBuf::from("frontend")),
        },
    ]
}

fn valid_service_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_services(services: &[ServiceDescriptor]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for s in services {
        if !valid_service_name(&s.name) {
            anyhow::bail!("invalid service name: {:?}", s.name);
        }
        if !seen.insert(s.name.as_str()) {
            anyhow::bail!("duplicate service name: {}", s.name);
        }
    }
    Ok(())
}
