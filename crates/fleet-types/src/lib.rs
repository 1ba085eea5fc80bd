use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Text returned by the logs endpoint when a service has not written anything yet.
pub const NO_LOGS_PLACEHOLDER: &str = "No logs available yet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Backend,
    Frontend,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Backend => "backend",
            ServiceKind::Frontend => "frontend",
        }
    }
}

/// Static description of one managed service.
///
/// `port == 0` means the service has no network-reachable liveness signal.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub port: u16,
    pub kind: ServiceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

/// Point-in-time view of a service, recomputed on every status query.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub port: u16,
    pub kind: ServiceKind,
    pub running: bool,
    pub pid: Option<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusResponse {
    pub services: Vec<ServiceStatus>,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub running: usize,
}

impl StatusResponse {
    pub fn from_services(services: Vec<ServiceStatus>, timestamp: DateTime<Utc>) -> Self {
        let total = services.len();
        let running = services.iter().filter(|s| s.running).count();
        Self {
            services,
            timestamp,
            total,
            running,
        }
    }

    /// Opaque marker handed back on the next poll (`?since=`).
    pub fn update_token(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>, output: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output,
        }
    }

    pub fn failed(message: impl Into<String>, output: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogsResponse {
    pub logs: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_counts_running_entries() {
        let now = Utc::now();
        let mk = |name: &str, running: bool| ServiceStatus {
            name: name.to_string(),
            port: 9000,
            kind: ServiceKind::Backend,
            running,
            pid: None,
            last_checked: now,
        };
        let resp = StatusResponse::from_services(vec![mk("a", true), mk("b", false)], now);
        assert_eq!(resp.total, 2);
        assert_eq!(resp.running, 1);
    }

    #[test]
    fn status_uses_camel_case_wire_names() {
        let now = Utc::now();
        let status = ServiceStatus {
            name: "frontend".to_string(),
            port: 5173,
            kind: ServiceKind::Frontend,
            running: false,
            pid: Some("42".to_string()),
            last_checked: now,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["kind"], "frontend");
        assert_eq!(v["pid"], "42");
        assert!(v.get("lastChecked").is_some());
    }

    #[test]
    fn action_response_omits_missing_output() {
        let v = serde_json::to_value(ActionResponse::ok("done", None)).unwrap();
        assert_eq!(v["success"], true);
        assert!(v.get("output").is_none());
    }
}
