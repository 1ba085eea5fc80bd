use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Run a script file through the platform shell, from the supervisor's working directory.
    pub fn script(path: &Path, args: &[String]) -> Self {
        #[cfg(unix)]
        let (program, mut full_args) = (PathBuf::from("sh"), vec![path.display().to_string()]);
        #[cfg(not(unix))]
        let (program, mut full_args) = (
            PathBuf::from("cmd"),
            vec!["/C".to_string(), path.display().to_string()],
        );
        full_args.extend(args.iter().cloned());

        Self {
            program,
            args: full_args,
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: diagnostic.into(),
            ..Default::default()
        }
    }

    /// stdout followed by stderr, skipping empty streams.
    pub fn combined_output(&self) -> String {
        let out = self.stdout.trim_end();
        let err = self.stderr.trim_end();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => String::new(),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

/// Seam between the supervisor and whatever actually launches processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Never errors: spawn failures, nonzero exits and timeouts all come back as outcomes.
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> CommandOutcome;
}

/// Runs external programs in their own process group.
///
/// On timeout the group gets SIGTERM, then SIGKILL once `kill_grace` has elapsed.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

type Capture = Arc<Mutex<Vec<u8>>>;

fn spawn_capture<R>(reader: Option<R>) -> (JoinHandle<()>, Capture)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf: Capture = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    let handle = tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut out = sink.lock().unwrap_or_else(|e| e.into_inner());
                    let room = MAX_CAPTURE_BYTES.saturating_sub(out.len());
                    out.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    });
    (handle, buf)
}

// Background children started by a script may inherit the pipes and keep them
// open long after the script exits, so draining is bounded.
async fn drain(handle: JoinHandle<()>, buf: Capture) -> String {
    let abort = handle.abort_handle();
    if tokio::time::timeout(DRAIN_WINDOW, handle).await.is_err() {
        abort.abort();
    }
    let bytes = buf.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pgid as i32), signal);
    }
}

impl ProcessRunner {
    async fn terminate(&self, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                signal_group(pid, libc::SIGTERM);
                if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                    return;
                }
                signal_group(pid, libc::SIGKILL);
            }
        }

        let _ = child.start_kill();
        let _ = tokio::time::timeout(self.kill_grace, child.wait()).await;
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> CommandOutcome {
        let command = spec.display();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(command = %command, %err, "failed to spawn command");
                return CommandOutcome::failed(format!("failed to spawn `{command}`: {err}"));
            }
        };

        let (out_task, out_buf) = spawn_capture(child.stdout.take());
        let (err_task, err_buf) = spawn_capture(child.stderr.take());

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(err)) => {
                tracing::warn!(command = %command, %err, "failed to wait for command");
                (None, false)
            }
            Err(_) => {
                tracing::warn!(
                    command = %command,
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out, terminating"
                );
                self.terminate(&mut child).await;
                (None, true)
            }
        };

        let stdout = drain(out_task, out_buf).await;
        let mut stderr = drain(err_task, err_buf).await;

        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "[fleet-control] command timed out after {} ms and was terminated",
                timeout.as_millis()
            ));
        }

        let exit_code = status.and_then(|s| s.code());
        let success = status.is_some_and(|s| s.success());
        tracing::debug!(command = %command, success, ?exit_code, timed_out, "command finished");

        CommandOutcome {
            success,
            exit_code,
            timed_out,
            stdout,
            stderr,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn captures_both_streams_and_success() {
        let out = ProcessRunner::default()
            .run(sh("echo hello; echo oops >&2"), Duration::from_secs(10))
            .await;
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.combined_output(), "hello\noops");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome() {
        let out = ProcessRunner::default()
            .run(sh("echo failing; exit 3"), Duration::from_secs(10))
            .await;
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.timed_out);
        assert_eq!(out.stdout, "failing\n");
    }

    #[tokio::test]
    async fn runaway_command_is_terminated() {
        let started = std::time::Instant::now();
        let out = ProcessRunner::new(Duration::from_millis(500))
            .run(sh("sleep 30"), Duration::from_millis(200))
            .await;
        assert!(!out.success);
        assert!(out.timed_out);
        assert!(out.stderr.contains("timed out after 200 ms"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_failure() {
        let spec = CommandSpec {
            program: PathBuf::from("/nonexistent/fleet-test-binary"),
            ..Default::default()
        };
        let out = ProcessRunner::default().run(spec, Duration::from_secs(1)).await;
        assert!(!out.success);
        assert!(
            out.stderr
                .starts_with("failed to spawn `/nonexistent/fleet-test-binary`"),
            "{}",
            out.stderr
        );
    }

    #[tokio::test]
    async fn passes_env_and_args() {
        let spec = sh("echo \"$FLEET_SERVICE_NAME $0\"").with_env("FLEET_SERVICE_NAME", "orders");
        let out = ProcessRunner::default().run(spec, Duration::from_secs(10)).await;
        assert!(out.success);
        assert_eq!(out.stdout, "orders sh\n");
    }

    #[test]
    fn script_spec_runs_through_sh() {
        let spec = CommandSpec::script(Path::new("/opt/fleet/start-service.sh"), &["api".to_string()]);
        assert_eq!(spec.program, PathBuf::from("sh"));
        assert_eq!(spec.args, ["/opt/fleet/start-service.sh", "api"]);
        assert_eq!(spec.cwd, None);
    }
}
