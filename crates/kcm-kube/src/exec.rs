//! Subprocess execution
//!
//! Every external tool kcm drives (kubectl, terraform, helm, minikube) goes
//! through an [`Executor`]. The process implementation streams output into
//! the log while collecting it, and stops the child when the run is
//! cancelled.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};

/// How long a signalled child gets to exit before it is killed
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// A single command-line argument
#[derive(Clone, PartialEq, Eq)]
enum Arg {
    Plain(String),
    /// Never rendered in logs or error messages
    Secret(String),
}

impl Arg {
    fn value(&self) -> &str {
        match self {
            Arg::Plain(v) | Arg::Secret(v) => v,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Plain(v) => f.debug_tuple("Plain").field(v).finish(),
            Arg::Secret(_) => f.write_str("Secret(***)"),
        }
    }
}

/// Command to run with its arguments, environment and input
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<Arg>,
    stdin: Option<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            env: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Plain(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| Arg::Plain(a.into())));
        self
    }

    /// Argument masked as `***` wherever the command is displayed
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Secret(arg.into()));
        self
    }

    /// Bytes piped to the child's standard input
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Raw argument values, secrets included
    pub fn arg_values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(Arg::value)
    }

    pub fn stdin_content(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn working_dir(&self) -> Option<&std::path::Path> {
        self.current_dir.as_deref()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|s| format!("<{} bytes>", s.len())))
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            match arg {
                Arg::Secret(_) => f.write_str(" ***")?,
                Arg::Plain(v) if v.is_empty() => f.write_str(" ''")?,
                Arg::Plain(v) if v.contains(char::is_whitespace) => write!(f, " '{}'", v)?,
                Arg::Plain(v) => write!(f, " {}", v)?,
            }
        }
        Ok(())
    }
}

/// Signal sent to an in-flight child when the run is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelSignal {
    #[default]
    Interrupt,
    Terminate,
    Kill,
}

/// Cancellation handle threaded through every cluster operation
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
    signal: CancelSignal,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            signal: CancelSignal::default(),
        }
    }

    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn signal(&self) -> CancelSignal {
        self.signal
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `Cancelled` once the token fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(KubeError::Cancelled);
        }
        Ok(())
    }
}

/// Runs external commands
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command, logging its output at info level
    ///
    /// Returns stdout only, so callers can parse it. Both streams are
    /// logged. A non-zero exit is [`KubeError::CommandFailed`], whose output
    /// holds stdout and stderr interleaved as they arrived.
    async fn run(&self, cmd: &Command, ctx: &ExecContext) -> Result<String>;

    /// Same as [`Executor::run`] with output logged at debug level
    async fn run_silent(&self, cmd: &Command, ctx: &ExecContext) -> Result<String>;
}

/// Executor backed by real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn execute(&self, cmd: &Command, ctx: &ExecContext, verbose: bool) -> Result<String> {
        ctx.check()?;
        if verbose {
            tracing::info!(command = %cmd, "running");
        } else {
            tracing::debug!(command = %cmd, "running");
        }

        let mut command = tokio::process::Command::new(&cmd.program);
        command
            .args(cmd.arg_values())
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| KubeError::Spawn {
            command: cmd.to_string(),
            source,
        })?;

        if let (Some(input), Some(mut stdin)) = (cmd.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "failed to write child stdin");
                }
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, Stream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut stdout = String::new();
        let mut combined = String::new();
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some((stream, line)) => {
                        if verbose {
                            tracing::info!(program = %cmd.program, ?stream, "{}", line);
                        } else {
                            tracing::debug!(program = %cmd.program, ?stream, "{}", line);
                        }
                        if stream == Stream::Stdout {
                            stdout.push_str(&line);
                            stdout.push('\n');
                        }
                        combined.push_str(&line);
                        combined.push('\n');
                    }
                    None => break,
                },
                _ = ctx.token.cancelled() => {
                    stop_child(&mut child, ctx.signal).await;
                    return Err(KubeError::Cancelled);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.token.cancelled() => {
                stop_child(&mut child, ctx.signal).await;
                return Err(KubeError::Cancelled);
            }
        };

        if !status.success() {
            return Err(KubeError::CommandFailed {
                command: cmd.to_string(),
                code: status.code(),
                output: combined,
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, cmd: &Command, ctx: &ExecContext) -> Result<String> {
        self.execute(cmd, ctx, true).await
    }

    async fn run_silent(&self, cmd: &Command, ctx: &ExecContext) -> Result<String> {
        self.execute(cmd, ctx, false).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Send each line of `reader` to `tx`, decoding invalid UTF-8 lossily
fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(mut bytes)) => {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    let line = String::from_utf8_lossy(&bytes).into_owned();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(?stream, error = %e, "failed to read child output");
                    break;
                }
            }
        }
    });
}

async fn stop_child(child: &mut tokio::process::Child, signal: CancelSignal) {
    tracing::warn!(?signal, "cancelling running command");
    send_signal(child, signal);
    if tokio::time::timeout(CANCEL_GRACE, child.wait()).await.is_err() {
        tracing::warn!("command ignored the cancel signal, killing it");
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
fn send_signal(child: &mut tokio::process::Child, signal: CancelSignal) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let signal = match signal {
        CancelSignal::Interrupt => Signal::SIGINT,
        CancelSignal::Terminate => Signal::SIGTERM,
        CancelSignal::Kill => Signal::SIGKILL,
    };
    match child.id() {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
                tracing::debug!(error = %e, "failed to signal child");
            }
        }
        None => tracing::debug!("child already exited"),
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut tokio::process::Child, _signal: CancelSignal) {
    let _ = child.start_kill();
}
