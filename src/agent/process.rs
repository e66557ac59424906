//! Child process plumbing for subprocess agents.
//!
//! An [`AgentProcess`] owns the child, a writer thread feeding its stdin, and a reader thread
//! that forwards stdout line by line. Neither pipe is ever waited on without a deadline. The child is started in its own process group so that teardown also reaches
//! whatever the agent spawned itself.

use std::{
    io::{self, BufRead, BufReader, Write},
    process::{Child, ChildStdin, Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, trace, warn};

use super::subprocess::SubprocessSpec;

/// Outcome of [`AgentProcess::read_line_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// A full line, without its line terminator
    Line(String),
    /// The deadline passed first
    Timeout,
    /// stdout was closed
    Disconnected,
    /// Bytes that are not UTF-8
    Invalid(String),
}

/// Outcome of [`AgentProcess::write_line_until`].
#[derive(Debug)]
pub enum WriteResult {
    /// The line reached the pipe
    Written,
    /// The agent did not drain its stdin before the deadline
    Timeout,
    /// stdin is closed
    Failed(io::Error),
}

/// A running agent program.
///
/// Dropping it terminates the whole process group.
#[derive(Debug)]
pub struct AgentProcess {
    name: String,
    child: Child,
    stdin: Option<Sender<String>>,
    written: Receiver<io::Result<()>>,
    lines: Receiver<io::Result<String>>,
    termination_grace: Duration,
    terminated: bool,
}

impl AgentProcess {
    /// Spawns `spec` with piped stdin/stdout. stderr is inherited when `allow_stderr` is set,
    /// discarded otherwise.
    pub fn launch(
        name: &str,
        spec: &SubprocessSpec,
        allow_stderr: bool,
        termination_grace: Duration,
    ) -> anyhow::Result<AgentProcess> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if allow_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("command '{}' could not be started", spec.program))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("child process has no stdin/stdout pipe");
        };

        let (tx, lines) = mpsc::channel();
        let reader = BufReader::new(stdout);
        let spawned = thread::Builder::new()
            .name(format!("{name}-stdout"))
            .spawn(move || {
                for line in reader.lines() {
                    let stop = line.is_err();
                    if tx.send(line).is_err() || stop {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("could not start stdout reader thread");
        }

        let (to_stdin, outgoing) = mpsc::channel::<String>();
        let (ack, written) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("{name}-stdin"))
            .spawn(move || write_lines(stdin, outgoing, ack));
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("could not start stdin writer thread");
        }

        debug!(agent = name, pid = child.id(), "agent process started");
        Ok(AgentProcess {
            name: name.to_string(),
            child,
            stdin: Some(to_stdin),
            written,
            lines,
            termination_grace,
            terminated: false,
        })
    }

    /// OS process id
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Sends `line` followed by a newline, waiting up to `deadline` for it to be flushed.
    ///
    /// After a timeout the line may still be partially written: the process must not be used
    /// for another exchange.
    pub fn write_line_until(&mut self, line: String, deadline: Instant) -> WriteResult {
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed");
        let Some(stdin) = &self.stdin else {
            return WriteResult::Failed(closed());
        };
        trace!("{} < {line}", self.name);
        if stdin.send(line).is_err() {
            return WriteResult::Failed(closed());
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.written.recv_timeout(remaining) {
            Ok(Ok(())) => WriteResult::Written,
            Ok(Err(e)) => WriteResult::Failed(e),
            Err(RecvTimeoutError::Timeout) => WriteResult::Timeout,
            Err(RecvTimeoutError::Disconnected) => WriteResult::Failed(closed()),
        }
    }

    /// Waits for the next stdout line, up to `deadline`.
    pub fn read_line_until(&mut self, deadline: Instant) -> ReadResult {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.lines.recv_timeout(remaining) {
            Ok(Ok(line)) => {
                trace!("{} > {line}", self.name);
                ReadResult::Line(line)
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                ReadResult::Invalid(e.to_string())
            }
            Ok(Err(e)) => {
                debug!("{}: stdout read error: {e}", self.name);
                ReadResult::Disconnected
            }
            Err(RecvTimeoutError::Timeout) => ReadResult::Timeout,
            Err(RecvTimeoutError::Disconnected) => ReadResult::Disconnected,
        }
    }

    /// Stops the agent: closes stdin, asks the process group to exit, and forcibly kills it
    /// once the grace period is over. Idempotent, never panics.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        drop(self.stdin.take());

        self.signal_group(Signal::Terminate);
        let exited = self.wait_for_exit(self.termination_grace);
        if !exited {
            warn!(
                "{} (pid {}) did not exit within {:?}, killing it",
                self.name,
                self.child.id(),
                self.termination_grace
            );
        }
        // once the leader is reaped, its pid stays reserved while the group has members: this
        // only reaches descendants still alive, and fails with ESRCH when there are none
        self.signal_group(Signal::Kill);
        if !exited {
            let _ = self.child.kill();
        }
        match self.child.wait() {
            Ok(status) => debug!("{} exited: {status}", self.name),
            Err(e) => warn!("{}: could not reap process: {e}", self.name),
        }
    }

    fn wait_for_exit(&mut self, max_duration: Duration) -> bool {
        let deadline = Instant::now() + max_duration;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(_) => return false,
            }
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10).min(max_duration / 10));
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: Signal) {
        let sig = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // the child is its own group leader; ESRCH only means the group is already gone
        unsafe {
            libc::killpg(self.child.id() as libc::pid_t, sig);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, signal: Signal) {
        // no process groups: only the direct child is reached
        if let Signal::Kill = signal {
            let _ = self.child.kill();
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Body of the stdin writer thread: one acknowledgement per line, stops at the first error.
///
/// Ends when the sender is dropped, which closes the child's stdin.
fn write_lines(mut stdin: ChildStdin, outgoing: Receiver<String>, ack: Sender<io::Result<()>>) {
    for line in outgoing {
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush());
        let stop = written.is_err();
        if ack.send(written).is_err() || stop {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}
