//! Supervision of long-running encoder subprocesses.
//!
//! An [`EncoderProcess`] is an opaque handle exposing three things: an input
//! sink ([`EncoderProcess::feed`]), an exit signal ([`EncoderProcess::on_exit`])
//! and a forced stop ([`EncoderProcess::stop`]). Live sessions feed it over
//! stdin; VOD jobs point it at a file and only wait for the exit. The
//! supervision logic is the same for both.
//!
//! Each process gets a small set of tasks:
//!
//! - a supervisor that owns the [`Child`], waits for it to exit and handles
//!   stop requests (SIGTERM, then SIGKILL after the grace period)
//! - a stdin pump draining the [`FeedQueue`] into the child's stdin
//! - one line logger each for stdout and stderr

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cf_core::config::{BackpressurePolicy, LiveConfig};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::program_name;
use crate::feed::FeedQueue;

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the output loggers to hit EOF after the child exits.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A fully resolved encoder command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    program: PathBuf,
    args: Vec<String>,
    stdin: bool,
}

impl EncoderCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: false,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Read media from a stdin pipe fed through [`EncoderProcess::feed`].
    pub fn stdin_pipe(&mut self) -> &mut Self {
        self.stdin = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn uses_stdin(&self) -> bool {
        self.stdin
    }

    /// Program plus arguments, for logging.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Tunables for one supervised process.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Byte budget of the stdin queue.
    pub feed_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub feed_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on [`EncoderProcess::stop`].
    pub stop_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_live(&LiveConfig::default())
    }
}

impl SupervisorOptions {
    pub fn from_live(live: &LiveConfig) -> Self {
        Self {
            feed_capacity: live.feed_buffer_bytes,
            backpressure: live.backpressure,
            feed_timeout: Duration::from_millis(live.feed_timeout_ms),
            stop_grace: Duration::from_secs(live.stop_grace_secs),
        }
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one.
    pub signal: Option<i32>,
    /// Whether the exit followed a [`EncoderProcess::stop`] request.
    pub stopped: bool,
}

impl EncoderExit {
    fn from_status(status: std::process::ExitStatus, stopped: bool) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            stopped,
        }
    }

    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}")?,
            (None, Some(sig)) => write!(f, "signal {sig}")?,
            (None, None) => write!(f, "unknown status")?,
        }
        if self.stopped {
            write!(f, " (stopped)")?;
        }
        Ok(())
    }
}

/// Handle to a supervised encoder subprocess.
///
/// Dropping the handle requests a stop, so an encoder never outlives the
/// session or job that owns it.
#[derive(Debug)]
pub struct EncoderProcess {
    label: String,
    pid: Option<u32>,
    argv: Vec<String>,
    input: Option<Arc<FeedQueue>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    exit_rx: watch::Receiver<Option<EncoderExit>>,
    stop: CancellationToken,
    /// SIGTERM to SIGKILL window, read by the supervisor when the stop lands.
    stop_grace: Arc<Mutex<Duration>>,
}

impl EncoderProcess {
    /// Spawn and start supervising `command`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`cf_core::Error::Encoder`] if the process cannot be spawned
    /// (missing executable, permission denied).
    pub fn spawn(
        label: impl Into<String>,
        command: &EncoderCommand,
        options: &SupervisorOptions,
    ) -> cf_core::Result<Self> {
        let label = label.into();
        let argv = command.argv();

        let mut cmd = Command::new(command.program());
        cmd.args(command.get_args())
            .stdin(if command.uses_stdin() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            cf_core::Error::encoder(
                label.clone(),
                format!("failed to spawn {}: {e}", program_name(command.program())),
            )
        })?;
        let pid = child.id();

        tracing::info!(encoder = %label, pid = ?pid, argv = ?argv, "Encoder started");

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let mut loggers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            loggers.push(spawn_line_logger(label.clone(), "stdout", stdout, None));
        }
        if let Some(stderr) = child.stderr.take() {
            loggers.push(spawn_line_logger(
                label.clone(),
                "stderr",
                stderr,
                Some(stderr_tail.clone()),
            ));
        }

        let (input, pump) = match child.stdin.take() {
            Some(stdin) => {
                let queue = Arc::new(FeedQueue::new(
                    label.clone(),
                    options.feed_capacity,
                    options.backpressure,
                    options.feed_timeout,
                ));
                let pump = tokio::spawn(pump_stdin(label.clone(), stdin, queue.clone()));
                (Some(queue), Some(pump))
            }
            None => (None, None),
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let stop_grace = Arc::new(Mutex::new(options.stop_grace));

        tokio::spawn(supervise(Supervised {
            label: label.clone(),
            child,
            pid,
            input: input.clone(),
            pump,
            loggers,
            stop: stop.clone(),
            grace: stop_grace.clone(),
            exit_tx,
        }));

        Ok(Self {
            label,
            pid,
            argv,
            input,
            stderr_tail,
            exit_rx,
            stop,
            stop_grace,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Forward one chunk to the encoder's stdin, in call order.
    ///
    /// Returns the number of older queued bytes evicted under the
    /// drop-oldest policy.
    ///
    /// # Errors
    ///
    /// - [`cf_core::Error::Encoder`] if the process has no stdin pipe, has
    ///   exited, or its input was closed.
    /// - [`cf_core::Error::Backpressure`] if the encoder stopped draining.
    pub async fn feed(&self, chunk: Bytes) -> cf_core::Result<usize> {
        let Some(queue) = &self.input else {
            return Err(cf_core::Error::encoder(
                self.label.clone(),
                "encoder was started without a stdin pipe",
            ));
        };
        queue.push(chunk).await
    }

    /// Close the input after the queued bytes have been written, letting the
    /// encoder see EOF and finish on its own.
    pub fn close_input(&self) {
        if let Some(queue) = &self.input {
            queue.close();
        }
    }

    /// Ask the supervisor to stop the process without waiting for it.
    ///
    /// Pending input is discarded, stdin is closed, SIGTERM is sent, and
    /// SIGKILL follows if the process outlives the grace period.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Like [`request_stop`](Self::request_stop), but with `grace` between
    /// SIGTERM and SIGKILL instead of the configured period. Has no effect
    /// on the grace period once a stop is already under way.
    pub fn request_stop_within(&self, grace: Duration) {
        if !self.stop.is_cancelled() {
            *self.stop_grace.lock() = grace;
        }
        self.stop.cancel();
    }

    /// Stop the process and wait for it to be reaped.
    pub async fn stop(&self) -> EncoderExit {
        self.request_stop();
        self.on_exit().await
    }

    /// Wait for the process to exit, by itself or after a stop request.
    pub async fn on_exit(&self) -> EncoderExit {
        let mut rx = self.exit_rx.clone();
        if let Ok(exit) = rx.wait_for(Option::is_some).await {
            if let Some(exit) = *exit {
                return exit;
            }
        }
        // The supervisor only drops the sender after publishing.
        (*self.exit_rx.borrow()).unwrap_or(UNKNOWN_EXIT)
    }

    /// The exit status if the process has already ended.
    pub fn try_exit(&self) -> Option<EncoderExit> {
        *self.exit_rx.borrow()
    }

    /// Total input bytes evicted under the drop-oldest policy.
    pub fn dropped_input_bytes(&self) -> u64 {
        self.input.as_ref().map_or(0, |queue| queue.dropped_bytes())
    }

    /// The last lines the encoder wrote to stderr.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

const UNKNOWN_EXIT: EncoderExit = EncoderExit {
    code: None,
    signal: None,
    stopped: false,
};

struct Supervised {
    label: String,
    child: Child,
    pid: Option<u32>,
    input: Option<Arc<FeedQueue>>,
    pump: Option<JoinHandle<()>>,
    loggers: Vec<JoinHandle<()>>,
    stop: CancellationToken,
    grace: Arc<Mutex<Duration>>,
    exit_tx: watch::Sender<Option<EncoderExit>>,
}

async fn supervise(mut s: Supervised) {
    let (status, stopped) = tokio::select! {
        status = s.child.wait() => (status, false),
        _ = s.stop.cancelled() => {
            if let Some(queue) = &s.input {
                let discarded = queue.close_and_clear();
                if discarded > 0 {
                    tracing::debug!(encoder = %s.label, discarded, "Discarded queued input on stop");
                }
            }

            if !request_terminate(s.pid) {
                let _ = s.child.start_kill();
            }

            let grace = *s.grace.lock();
            let status = match tokio::time::timeout(grace, s.child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(
                        encoder = %s.label,
                        pid = ?s.pid,
                        "Encoder ignored SIGTERM for {grace:?}; killing"
                    );
                    let _ = s.child.start_kill();
                    s.child.wait().await
                }
            };
            (status, true)
        }
    };

    // Feeders must fail fast from here on.
    if let Some(queue) = &s.input {
        queue.close_and_clear();
    }
    if let Some(pump) = s.pump.take() {
        pump.abort();
    }
    for logger in s.loggers.drain(..) {
        let _ = tokio::time::timeout(LOG_DRAIN_TIMEOUT, logger).await;
    }

    let exit = match status {
        Ok(status) => EncoderExit::from_status(status, stopped),
        Err(e) => {
            tracing::error!(encoder = %s.label, "Failed to wait for encoder: {e}");
            EncoderExit {
                stopped,
                ..UNKNOWN_EXIT
            }
        }
    };

    if exit.success() || exit.stopped {
        tracing::info!(encoder = %s.label, pid = ?s.pid, "Encoder exited: {exit}");
    } else {
        tracing::warn!(encoder = %s.label, pid = ?s.pid, "Encoder failed: {exit}");
    }

    s.exit_tx.send_replace(Some(exit));
}

/// Send SIGTERM so the encoder can finalize its playlist.
#[cfg(unix)]
fn request_terminate(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn request_terminate(_pid: Option<u32>) -> bool {
    false
}

async fn pump_stdin(label: String, mut stdin: ChildStdin, queue: Arc<FeedQueue>) {
    let mut written: u64 = 0;
    while let Some(chunk) = queue.pop().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            tracing::warn!(encoder = %label, written, "Encoder stdin write failed: {e}");
            queue.close_and_clear();
            return;
        }
        written += chunk.len() as u64;
    }
    if let Err(e) = stdin.flush().await {
        tracing::debug!(encoder = %label, "Encoder stdin flush failed: {e}");
    }
    tracing::debug!(encoder = %label, written, "Encoder stdin closed");
}

fn spawn_line_logger<R>(
    label: String,
    stream: &'static str,
    reader: R,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // ffmpeg is not guaranteed to emit valid UTF-8.
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!(encoder = %label, stream, "{line}");
                    if let Some(tail) = &tail {
                        let mut tail = tail.lock();
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!(encoder = %label, stream, "Encoder output read failed: {e}");
                    break;
                }
            }
        }
    })
}
