use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use fleet_control::{
    command_runner::{CommandOutcome, CommandRunner, CommandSpec, ProcessRunner},
    config::FleetConfig,
    routes,
    state::AppState,
    supervisor::Supervisor,
};
use fleet_types::{ActionResponse, LogsResponse, NO_LOGS_PLACEHOLDER, StatusResponse};

struct CannedRunner {
    stdout: String,
    calls: Mutex<Vec<CommandSpec>>,
}

impl CannedRunner {
    fn new(stdout: &str) -> Arc<Self> {
        Arc::new(Self {
            stdout: stdout.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CommandRunner for CannedRunner {
    async fn run(&self, spec: CommandSpec, _timeout: Duration) -> CommandOutcome {
        self.calls.lock().unwrap().push(spec);
        CommandOutcome {
            success: true,
            exit_code: Some(0),
            stdout: self.stdout.clone(),
            ..Default::default()
        }
    }
}

fn scratch_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fleet-http-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn free_port() -> u16 {
    let l = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    l.local_addr().unwrap().port()
}

async fn config(root: &std::path::Path) -> FleetConfig {
    let (a, b) = (free_port().await, free_port().await);
    let text = format!(
        r#"
probe_timeout_ms = 300
scripts_dir = "{root}/scripts"
pid_dir = "{root}/pids"
log_dir = "{root}/logs"

[[services]]
name = "A"
port = {a}

[[services]]
name = "B"
port = {b}
"#,
        root = root.display()
    );
    FleetConfig::from_toml(&text).unwrap()
}

async fn serve(supervisor: Supervisor) -> String {
    supervisor.init_dirs().await.unwrap();
    let app = routes::router(AppState { supervisor });
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn status_start_and_logs_round_trip() {
    let root = scratch_root();
    let cfg = config(&root).await;
    let runner = CannedRunner::new("PID=4321\n");
    let base = serve(Supervisor::new(&cfg, runner.clone())).await;
    let http = reqwest::Client::new();

    let status: StatusResponse = http
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.running, 0);
    assert!(status.services.iter().all(|s| !s.running));

    let resp = http.post(format!("{base}/start/B")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: ActionResponse = resp.json().await.unwrap();
    assert!(body.success);

    let status: StatusResponse = http
        .get(format!("{base}/status?since=abc"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let b = status.services.iter().find(|s| s.name == "B").unwrap();
    assert_eq!(b.pid.as_deref(), Some("4321"));
    assert!(!b.running);

    let logs: LogsResponse = http
        .get(format!("{base}/logs/A"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs.logs, NO_LOGS_PLACEHOLDER);

    std::fs::write(root.join("logs").join("A.log"), "l1\nl2\nl3\n").unwrap();
    let logs: LogsResponse = http
        .get(format!("{base}/logs/A?lines=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs.logs, "l3\n");
}

#[tokio::test]
async fn validation_errors_never_reach_the_runner() {
    let root = scratch_root();
    let cfg = config(&root).await;
    let runner = CannedRunner::new("");
    let base = serve(Supervisor::new(&cfg, runner.clone())).await;
    let http = reqwest::Client::new();

    for path in ["/start/nope", "/stop/nope"] {
        let resp = http.post(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
        let body: ActionResponse = resp.json().await.unwrap();
        assert!(!body.success);
        assert!(body.message.contains("nope"));
    }

    let resp = http.get(format!("{base}/logs/nope")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    for port in ["0", "abc", "70000"] {
        let resp = http
            .post(format!("{base}/kill-port/{port}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{port}");
    }

    assert!(runner.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn freeing_an_idle_port_succeeds() {
    let root = scratch_root();
    let cfg = config(&root).await;
    let runner = CannedRunner::new("nothing listening on 9001\n");
    let base = serve(Supervisor::new(&cfg, runner.clone())).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/kill-port/9001"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: ActionResponse = resp.json().await.unwrap();
    assert!(body.success);
    assert_eq!(body.output.as_deref(), Some("nothing listening on 9001"));

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args.last().map(String::as_str), Some("9001"));
}

#[cfg(unix)]
#[tokio::test]
async fn real_scripts_drive_start_and_failures() {
    let root = scratch_root();
    let cfg = config(&root).await;
    let scripts = root.join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(
        scripts.join("start-service.sh"),
        "echo \"starting $1 on $FLEET_SERVICE_PORT\"\necho PID=$$\n",
    )
    .unwrap();
    std::fs::write(scripts.join("stop-all.sh"), "echo cannot stop >&2\nexit 2\n").unwrap();

    let base = serve(Supervisor::new(&cfg, Arc::new(ProcessRunner::default()))).await;
    let http = reqwest::Client::new();

    let resp = http.post(format!("{base}/start/A")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: ActionResponse = resp.json().await.unwrap();
    assert!(body.success);
    assert!(body.output.unwrap().starts_with("starting A on "));
    let pid = std::fs::read_to_string(root.join("pids").join("A.pid")).unwrap();
    assert!(pid.trim().parse::<u32>().is_ok());

    let resp = http.post(format!("{base}/stop-all")).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: ActionResponse = resp.json().await.unwrap();
    assert!(!body.success);
    assert!(body.message.contains("exit code 2"));
    assert_eq!(body.output.as_deref(), Some("cannot stop"));

    // No script on disk: the shell reports it and the supervisor keeps serving.
    let resp = http.post(format!("{base}/start-all")).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let resp = http.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[cfg(unix)]
#[tokio::test]
async fn shipped_start_all_follows_the_registry() {
    let root = scratch_root();
    let scripts = root.join("scripts");
    let web = root.join("web");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::create_dir_all(&web).unwrap();
    let shipped = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../scripts/start-all.sh");
    std::fs::copy(shipped, scripts.join("start-all.sh")).unwrap();
    std::fs::write(
        scripts.join("start-service.sh"),
        "echo \"$1 $FLEET_SERVICE_PORT $(pwd)\"\necho PID=$$\n",
    )
    .unwrap();

    let text = format!(
        r#"
scripts_dir = "{root}/scripts"
pid_dir = "{root}/pids"
log_dir = "{root}/logs"

[[services]]
name = "api"
port = 9301

[[services]]
name = "web"
port = 9302
kind = "frontend"
dir = "{web}"
"#,
        root = root.display(),
        web = web.display()
    );
    let cfg = FleetConfig::from_toml(&text).unwrap();
    let base = serve(Supervisor::new(&cfg, Arc::new(ProcessRunner::default()))).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/start-all"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: ActionResponse = resp.json().await.unwrap();
    assert!(body.success, "{}", body.message);
    let output = body.output.unwrap();
    assert!(output.contains("api 9301 "), "{output}");
    assert!(output.contains(&format!("web 9302 {}", web.display())), "{output}");

    for name in ["api", "web"] {
        let pid = std::fs::read_to_string(root.join("pids").join(format!("{name}.pid"))).unwrap();
        assert!(pid.trim().parse::<u32>().is_ok());
    }
}
