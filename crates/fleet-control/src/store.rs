use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// `<dir>/<name>.pid`, one PID token per file.
#[derive(Debug, Clone)]
pub struct PidStore {
    dir: PathBuf,
}

impl PidStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pid"))
    }

    /// Overwrite-or-create, synced to disk before returning.
    pub async fn write_pid(&self, name: &str, pid: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(name);
        let tmp = self.dir.join(format!(".{name}.pid.tmp"));

        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(pid.trim().as_bytes()).await?;
        f.write_all(b"\n").await?;
        f.sync_all().await?;
        drop(f);

        tokio::fs::rename(&tmp, &path).await
    }

    /// Missing, empty and unreadable files all read as unknown.
    pub async fn read_pid(&self, name: &str) -> Option<String> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => text
                .split_whitespace()
                .next()
                .map(|t| t.to_string()),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "failed to read pid file");
                None
            }
        }
    }
}

/// `<dir>/<name>.log`, written by the services themselves.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.log"))
    }

    /// `Ok(None)` when the file does not exist yet; any other I/O failure is an error.
    ///
    /// Files larger than `max_bytes` are read from the tail, dropping the partial first line.
    /// `max_lines` keeps only the last N lines.
    pub async fn read_log(
        &self,
        name: &str,
        max_lines: Option<usize>,
    ) -> std::io::Result<Option<String>> {
        let path = self.path_for(name);
        let mut f = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let size = f.metadata().await?.len();
        let start = size.saturating_sub(self.max_bytes);
        if start > 0 {
            f.seek(SeekFrom::Start(start)).await?;
        }

        let mut buf = Vec::with_capacity((size - start) as usize);
        // The file may still be growing; never read past the cap.
        read_capped(&mut f, self.max_bytes, &mut buf).await?;

        // Best-effort UTF-8.
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        if start > 0
            && let Some(nl) = text.find('\n')
        {
            text.drain(..=nl);
        }

        if let Some(max_lines) = max_lines {
            text = tail_lines(&text, max_lines);
        }
        Ok(Some(text))
    }
}

async fn read_capped<R>(reader: R, limit: u64, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    reader.take(limit).read_to_end(buf).await
}

fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);
    let mut out = lines[skip..].join("\n");
    if !out.is_empty() && text.ends_with('\n') {
        out.push('\n');
    }
    out
}
