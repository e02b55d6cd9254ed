use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{CmakexError, Result};

/// Which pipe a captured chunk came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of output, tagged with its source and the time it arrived relative to
/// process start (spec 4.B, "Capture helper").
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub source: StreamSource,
    pub text: String,
    pub elapsed: Duration,
}

/// Owns the append-only message queue a running child's two drainer tasks write
/// into. A single `std::sync::Mutex` serializes the two writers; lock hold time is
/// one `Vec::push`, so it never blocks on I/O (spec 5, "non-blocking spin mutex").
#[derive(Debug)]
pub struct OutputCapture {
    start: Instant,
    echo: bool,
    chunks: Mutex<Vec<CapturedChunk>>,
}

impl OutputCapture {
    /// `echo` additionally writes each chunk to the host's own stdout/stderr as it
    /// arrives, for interactive runs.
    pub fn new(echo: bool) -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            echo,
            chunks: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, source: StreamSource, text: String) {
        let elapsed = self.start.elapsed();
        if self.echo {
            match source {
                StreamSource::Stdout => println!("{text}"),
                StreamSource::Stderr => eprintln!("{text}"),
            }
        }
        self.chunks
            .lock()
            .expect("capture mutex poisoned")
            .push(CapturedChunk {
                source,
                text,
                elapsed,
            });
    }

    /// Every chunk collected so far, in append order. Across streams, order reflects
    /// arrival time, not necessarily source-interleaving fairness.
    pub fn chunks(&self) -> Vec<CapturedChunk> {
        self.chunks.lock().expect("capture mutex poisoned").clone()
    }

    /// Concatenation of every stdout chunk, newline-joined.
    pub fn stdout_text(&self) -> String {
        self.joined(StreamSource::Stdout)
    }

    /// Concatenation of every stderr chunk, newline-joined.
    pub fn stderr_text(&self) -> String {
        self.joined(StreamSource::Stderr)
    }

    fn joined(&self, source: StreamSource) -> String {
        self.chunks()
            .into_iter()
            .filter(|c| c.source == source)
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs `program args...` in `cwd`, streaming stdout/stderr line-by-line into
/// `capture` via two concurrent drainer tasks, and returns the exit status.
///
/// A launch failure (the executable could not be spawned at all) is a
/// [`CmakexError::LaunchFailed`]; a non-zero exit is returned verbatim for the
/// caller to interpret (spec 4.B, "Failure semantics").
pub async fn exec(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    capture: &Arc<OutputCapture>,
) -> Result<ExitStatus> {
    debug!("running {} {:?} (cwd={:?})", program.display(), args, cwd);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .map_err(|source| CmakexError::LaunchFailed {
            program: program.display().to_string(),
            source,
        })?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_capture = Arc::clone(capture);
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            stdout_capture.push(StreamSource::Stdout, line);
        }
    });

    let stderr_capture = Arc::clone(capture);
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            stderr_capture.push(StreamSource::Stderr, line);
        }
    });

    let status = child
        .wait()
        .await
        .map_err(|source| CmakexError::LaunchFailed {
            program: program.display().to_string(),
            source,
        })?;

    let _ = tokio::join!(stdout_task, stderr_task);

    Ok(status)
}
