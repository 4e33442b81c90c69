use std::{
    collections::VecDeque,
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::debug;

const LINE_CHANNEL_CAPACITY: usize = 1024;
const RECENT_LINE_LIMIT: usize = 200;
const SPAWN_RETRIES: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(50);
// ETXTBSY: the executable is still open for writing somewhere.
const TEXT_FILE_BUSY: i32 = 26;

#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("{program} not found")]
    NotFound { program: String },
    #[error("failed to run {program}: {message}")]
    Io { program: String, message: String },
    #[error("{}", format_exit_message(program, *status, stdout, stderr))]
    Exit {
        program: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug, Default, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct ToolLine {
    pub stream: &'static str,
    pub line: String,
}

/// One external program invocation. Every call site goes through `run` or
/// `run_streaming` so a non-zero exit always surfaces as `ToolFailure::Exit`.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn describe(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn program_label(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn spawn_failure(&self, err: io::Error) -> ToolFailure {
        if err.kind() == io::ErrorKind::NotFound {
            ToolFailure::NotFound {
                program: self.program.display().to_string(),
            }
        } else {
            ToolFailure::Io {
                program: self.program_label(),
                message: err.to_string(),
            }
        }
    }

    fn spawn_should_retry(err: &io::Error, attempt: u32) -> bool {
        cfg!(unix) && attempt < SPAWN_RETRIES && err.raw_os_error() == Some(TEXT_FILE_BUSY)
    }

    async fn output(&self) -> io::Result<std::process::Output> {
        let mut attempt = 0;
        loop {
            match self.command().output().await {
                Err(err) if Self::spawn_should_retry(&err, attempt) => {
                    attempt += 1;
                    tokio::time::sleep(SPAWN_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }

    async fn spawn(&self) -> io::Result<tokio::process::Child> {
        let mut attempt = 0;
        loop {
            match self.command().spawn() {
                Err(err) if Self::spawn_should_retry(&err, attempt) => {
                    attempt += 1;
                    tokio::time::sleep(SPAWN_RETRY_DELAY).await;
                }
                result => return result,
            }
        }
    }

    /// Runs to completion and captures both streams.
    pub async fn run(&self) -> Result<ToolOutput, ToolFailure> {
        debug!("running {}", self.describe());
        let output = self
            .output()
            .await
            .map_err(|err| self.spawn_failure(err))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            Err(ToolFailure::Exit {
                program: self.program_label(),
                status: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
    }

    /// Runs to completion, handing each output line to `on_line` as it arrives.
    /// Only the most recent lines of each stream are kept for the result.
    pub async fn run_streaming<F>(&self, mut on_line: F) -> Result<ToolOutput, ToolFailure>
    where
        F: FnMut(&ToolLine),
    {
        debug!("running {}", self.describe());
        let mut child = self
            .spawn()
            .await
            .map_err(|err| self.spawn_failure(err))?;

        let (line_tx, mut line_rx) = mpsc::channel::<ToolLine>(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, "stdout", line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, "stderr", line_tx.clone()));
        }
        drop(line_tx);

        let mut recent_stdout = VecDeque::with_capacity(RECENT_LINE_LIMIT);
        let mut recent_stderr = VecDeque::with_capacity(RECENT_LINE_LIMIT);
        let mut status: Option<io::Result<std::process::ExitStatus>> = None;
        let mut lines_open = true;

        while lines_open || status.is_none() {
            tokio::select! {
                line = line_rx.recv(), if lines_open => {
                    match line {
                        Some(line) => {
                            on_line(&line);
                            let recent = if line.stream == "stderr" {
                                &mut recent_stderr
                            } else {
                                &mut recent_stdout
                            };
                            append_recent(recent, line.line);
                        }
                        None => lines_open = false,
                    }
                }
                result = child.wait(), if status.is_none() => {
                    status = Some(result);
                }
            }
        }

        let stdout = collect_recent(&recent_stdout);
        let stderr = collect_recent(&recent_stderr);
        let status = match status {
            Some(Ok(status)) => status,
            Some(Err(err)) => {
                return Err(ToolFailure::Io {
                    program: self.program_label(),
                    message: err.to_string(),
                })
            }
            None => {
                return Err(ToolFailure::Io {
                    program: self.program_label(),
                    message: "process did not return status".into(),
                })
            }
        };

        if status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            Err(ToolFailure::Exit {
                program: self.program_label(),
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
    }
}

async fn read_lines<R>(reader: R, stream: &'static str, tx: mpsc::Sender<ToolLine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(ToolLine { stream, line }).await.is_err() {
            break;
        }
    }
}

fn append_recent(recent: &mut VecDeque<String>, line: String) {
    if recent.len() >= RECENT_LINE_LIMIT {
        recent.pop_front();
    }
    recent.push_back(line);
}

fn collect_recent(recent: &VecDeque<String>) -> String {
    let mut combined = String::new();
    for line in recent {
        combined.push_str(line);
        combined.push('\n');
    }
    combined
}

pub fn format_tool_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

fn format_exit_message(program: &str, status: i32, stdout: &str, stderr: &str) -> String {
    let detail = format_tool_output(stdout, stderr);
    if detail.trim().is_empty() {
        format!("{program} exited with status {status}")
    } else {
        format!("{program} exited with status {status}: {}", detail.trim())
    }
}
