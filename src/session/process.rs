//! Child process session
//!
//! A [`Session`] owns one running instance of the executable under test and
//! its three standard streams. The child is spawned with `kill_on_drop`, so
//! dropping a session on any path (including a panicking assertion) reaps it.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use crate::common::config::{Config, ProtocolConfig, Timeouts};
use crate::common::paths::resolve;
use crate::common::{Error, Result};

use super::codec;
use super::types::{CaptureEnd, Command, Response, SessionState, Transcript};

/// Everything needed to launch a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub protocol: ProtocolConfig,
}

impl SessionOptions {
    /// Options for `executable` with default timeouts and protocol
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            timeouts: Timeouts::default(),
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.session.executable.clone(),
            args: config.session.args.clone(),
            working_dir: config.session.working_dir.clone(),
            timeouts: config.timeouts,
            protocol: config.protocol.clone(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }
}

/// One running instance of the child process
pub struct Session {
    child: Child,
    pid: Option<u32>,
    executable: PathBuf,
    working_dir: PathBuf,
    /// `None` once stdin has been closed
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
    /// Bytes read from stdout that belong to a capture still in progress
    pending: Vec<u8>,
    stdout_closed: bool,
    stderr: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    banner: Response,
    /// Text printed between the banner line and the first prompt
    startup_output: String,
    /// Set once output can no longer be matched to the command that caused it
    desync: Option<String>,
    state: SessionState,
    exit_status: Option<ExitStatus>,
    timeouts: Timeouts,
    protocol: ProtocolConfig,
}

impl Session {
    /// Spawn the child and wait for its readiness handshake
    ///
    /// The session is ready once the startup banner line and the first
    /// prompt have been read. Both reads share the readiness timeout.
    pub async fn start(options: SessionOptions) -> Result<Self> {
        let working_dir = match &options.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        // Bare names are left for PATH lookup; anything with a directory
        // component is relative to the child's working directory.
        let executable = if options.executable.components().count() > 1 {
            resolve(&working_dir, &options.executable)
        } else {
            options.executable.clone()
        };

        tracing::debug!(
            executable = %executable.display(),
            working_dir = %working_dir.display(),
            args = ?options.args,
            "Spawning child"
        );

        let mut child = TokioCommand::new(&executable)
            .args(&options.args)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn {
                path: executable.clone(),
                source: e,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe(&executable, "stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| missing_pipe(&executable, "stdout"))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| missing_pipe(&executable, "stderr"))?;

        let stderr = Arc::new(Mutex::new(String::new()));
        let stderr_task = tokio::spawn(collect_stderr(stderr_pipe, Arc::clone(&stderr)));

        let mut session = Self {
            child,
            pid,
            executable,
            working_dir,
            stdin: Some(BufWriter::new(stdin)),
            stdout: BufReader::new(stdout),
            pending: Vec::new(),
            stdout_closed: false,
            stderr,
            stderr_task: Some(stderr_task),
            banner: Response::new(String::new(), CaptureEnd::LineEnd),
            startup_output: String::new(),
            desync: None,
            state: SessionState::Running,
            exit_status: None,
            timeouts: options.timeouts,
            protocol: options.protocol,
        };

        session.handshake().await?;
        tracing::debug!(pid = ?session.pid, "Child ready");
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<()> {
        let readiness_ms = self.timeouts.readiness_ms;
        let deadline = Instant::now() + self.timeouts.readiness();

        let read = codec::read_line(&mut self.stdout, &mut self.pending);
        let banner = match timeout_at(deadline, read).await {
            Ok(result) => result?,
            Err(_) => {
                self.kill_and_reap().await;
                return Err(Error::ReadinessTimeout(readiness_ms));
            }
        };

        if banner.reached_eof() {
            self.stdout_closed = true;
            self.kill_and_reap().await;
            return Err(Error::ExitedDuringStartup {
                stderr: self.finish_stderr().await,
            });
        }
        tracing::trace!(banner = banner.text(), "Read banner");
        self.banner = banner;

        let prompt = self.protocol.prompt.clone();
        let read = codec::read_until_delimiter(&mut self.stdout, prompt.as_bytes(), &mut self.pending);
        let before_prompt = match timeout_at(deadline, read).await {
            Ok(result) => result?,
            Err(_) => {
                // The banner alone signals readiness; later exchanges fail
                tracing::warn!(readiness_ms, "No prompt after the banner");
                self.startup_output = String::from_utf8_lossy(&self.pending).into_owned();
                self.desync = Some(format!("no prompt within {readiness_ms} ms of the banner"));
                return Ok(());
            }
        };

        if !before_prompt.text().is_empty() {
            tracing::debug!(output = before_prompt.text(), "Extra startup output before prompt");
        }
        self.startup_output = before_prompt.text().to_string();
        if before_prompt.reached_eof() {
            // Banner printed but no prompt: still a valid session whose
            // remaining output is `before_prompt`.
            self.stdout_closed = true;
            self.pending = before_prompt.into_text().into_bytes();
        }

        Ok(())
    }

    /// The startup banner: the first response of every session
    pub fn banner(&self) -> &Response {
        &self.banner
    }

    /// Output between the banner line and the first prompt; empty for a
    /// well-behaved child
    pub fn startup_output(&self) -> &str {
        &self.startup_output
    }

    /// Why the session stopped attributing output to commands, if it has
    pub fn out_of_sync(&self) -> Option<&str> {
        self.desync.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// Everything the child has written to stderr so far
    pub fn stderr_output(&self) -> String {
        self.stderr
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Send one command line to the child
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.poll_exit()?;
        if self.state != SessionState::Running {
            return Err(Error::SessionTerminated("send a command"));
        }
        self.ensure_in_sync()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or(Error::SessionTerminated("send a command"))?;

        tracing::debug!(command = command.as_str(), "Sending");

        let write = codec::write_command(stdin, command, &self.protocol.line_terminator);
        match timeout(self.timeouts.response(), write).await {
            Ok(result) => result,
            Err(_) => Err(self.response_timeout("write")),
        }
    }

    /// Bounded capture: read up to the next prompt or end-of-stream
    ///
    /// Never waits for the child to exit, so it may be used any number of
    /// times within a session.
    pub async fn capture(&mut self) -> Result<Response> {
        self.ensure_in_sync()?;
        self.ensure_readable()?;
        let prompt = self.protocol.prompt.clone();
        let read = codec::read_until_delimiter(&mut self.stdout, prompt.as_bytes(), &mut self.pending);
        let response = match timeout(self.timeouts.response(), read).await {
            Ok(result) => result?,
            Err(_) => return Err(self.response_timeout("read")),
        };
        self.note_response(&response);
        Ok(response)
    }

    /// Bounded capture of exactly one line
    pub async fn capture_line(&mut self) -> Result<Response> {
        self.ensure_in_sync()?;
        self.ensure_readable()?;
        let read = codec::read_line(&mut self.stdout, &mut self.pending);
        let response = match timeout(self.timeouts.response(), read).await {
            Ok(result) => result?,
            Err(_) => return Err(self.response_timeout("read")),
        };
        self.note_response(&response);
        Ok(response)
    }

    /// Send a command and capture its response
    pub async fn exchange(&mut self, command: &Command) -> Result<Response> {
        self.send(command).await?;
        self.capture().await
    }

    /// Wait for the child to exit on its own
    pub async fn wait_exit(&mut self, limit: Duration) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        match timeout(limit, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.mark_terminated(status);
                Ok(status)
            }
            Err(_) => Err(Error::ExitTimeout(limit.as_millis() as u64)),
        }
    }

    /// Best-effort shutdown: close stdin, ask politely, then kill
    ///
    /// Calling this on a terminated session is a no-op that returns the
    /// recorded exit status.
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        let status = match self.exit_status {
            Some(status) => status,
            None => self.stop_child().await?,
        };
        self.finish_stderr().await;
        Ok(status)
    }

    async fn stop_child(&mut self) -> Result<ExitStatus> {
        self.stdin = None;
        let grace = self.timeouts.exit() / 2;
        if let Ok(status) = self.wait_exit(grace).await {
            return Ok(status);
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            tracing::debug!(pid, "Child ignored closed stdin, sending SIGTERM");
            // SAFETY: pid belongs to our own unreaped child
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(status) = self.wait_exit(grace).await {
                return Ok(status);
            }
        }

        tracing::warn!(pid = ?self.pid, "Killing unresponsive child");
        self.child.start_kill()?;
        let status = self.child.wait().await?;
        self.mark_terminated(status);
        Ok(status)
    }

    /// Drain-to-exit capture: read stdout until it closes and the child exits
    ///
    /// Consumes the session, so it can only ever be the last capture.
    pub async fn drain(mut self) -> Result<Transcript> {
        self.stdin = None;
        let exit_ms = self.timeouts.exit_ms;

        let drained = timeout(self.timeouts.exit(), async {
            let response = codec::read_to_end(&mut self.stdout, &mut self.pending).await?;
            let status = self.child.wait().await?;
            Ok::<_, Error>((response, status))
        })
        .await;

        let (response, status) = match drained {
            Ok(result) => result?,
            Err(_) => {
                self.kill_and_reap().await;
                return Err(Error::ExitTimeout(exit_ms));
            }
        };
        self.mark_terminated(status);

        Ok(Transcript {
            stdout: response.into_text(),
            stderr: self.finish_stderr().await,
            status,
        })
    }

    /// Take output read by a capture that timed out before its delimiter
    pub fn take_partial_output(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Record a timed-out exchange; output that arrives later would otherwise
    /// be taken as the answer to the next command
    fn response_timeout(&mut self, operation: &str) -> Error {
        let ms = self.timeouts.response_ms;
        self.desync = Some(format!("{operation} timed out after {ms} ms"));
        Error::ResponseTimeout(ms)
    }

    fn ensure_in_sync(&self) -> Result<()> {
        match &self.desync {
            Some(reason) => Err(Error::OutOfSync(reason.clone())),
            None => Ok(()),
        }
    }

    fn ensure_readable(&self) -> Result<()> {
        if self.stdout_closed && self.pending.is_empty() {
            return Err(Error::SessionTerminated("capture output"));
        }
        Ok(())
    }

    fn note_response(&mut self, response: &Response) {
        if response.reached_eof() {
            self.stdout_closed = true;
        }
        tracing::trace!(text = response.text(), end = ?response.end(), "Captured");
    }

    fn poll_exit(&mut self) -> Result<()> {
        if self.exit_status.is_none() {
            if let Some(status) = self.child.try_wait()? {
                self.mark_terminated(status);
            }
        }
        Ok(())
    }

    fn mark_terminated(&mut self, status: ExitStatus) {
        if self.state != SessionState::Terminated {
            tracing::debug!(pid = ?self.pid, ?status, "Child terminated");
        }
        self.stdin = None;
        self.exit_status = Some(status);
        self.state = SessionState::Terminated;
    }

    async fn kill_and_reap(&mut self) {
        let _ = self.child.start_kill();
        if let Ok(status) = self.child.wait().await {
            self.mark_terminated(status);
        }
    }

    /// Wait briefly for the stderr collector to see end-of-stream
    async fn finish_stderr(&mut self) -> String {
        if let Some(task) = self.stderr_task.take() {
            let _ = timeout(Duration::from_millis(self.timeouts.response_ms), task).await;
        }
        self.stderr_output()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("executable", &self.executable)
            .field("state", &self.state)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

fn missing_pipe(executable: &Path, stream: &str) -> Error {
    Error::Spawn {
        path: executable.to_path_buf(),
        source: std::io::Error::other(format!("child {stream} was not piped")),
    }
}

/// Most recent stderr bytes kept per session
const STDERR_LIMIT: usize = 64 * 1024;

/// Drop the oldest text so at most `limit` bytes remain
fn keep_tail(buf: &mut String, limit: usize) {
    if buf.len() <= limit {
        return;
    }
    let mut cut = buf.len() - limit;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

async fn collect_stderr(pipe: ChildStderr, sink: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                tracing::trace!(stderr = %text.trim_end(), "Child stderr");
                if let Ok(mut buf) = sink.lock() {
                    buf.push_str(&text);
                    keep_tail(&mut buf, STDERR_LIMIT);
                }
            }
        }
    }
}
