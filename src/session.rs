//! A child process attached to a pseudo-terminal.
//!
//! [`Session`] owns the PTY master, the child handle, and the output stream
//! read from the master. It is the single abstraction underneath both spawn
//! strategies: a plain target command, or the same target wrapped in an
//! external instrumentation supervisor (see [`crate::supervisor`]).

use crate::error::{Error, Result};
use crate::expect::{OutputHandler, OutputStream, Pattern};
use crate::supervisor::SupervisorConfig;
use log::debug;
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Options controlling how a [`Session`] is spawned.
pub struct SpawnOptions {
    /// Whether the terminal echoes input back into the output stream.
    ///
    /// Off by default so expectations only ever see what the program
    /// printed, never the lines the harness sent.
    pub echo: bool,
    pub rows: u16,
    pub cols: u16,
    /// Wrap the target command in an external instrumentation supervisor.
    pub supervisor: Option<SupervisorConfig>,
    /// Sink for everything the child writes. Defaults to stdout passthrough.
    pub output_handler: Option<OutputHandler>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions {
            echo: false,
            rows: 24,
            cols: 80,
            supervisor: None,
            output_handler: None,
        }
    }
}

/// Manages a program running inside a PTY.
///
/// A session is either *alive* (process running, no exit status yet) or
/// *terminated* (exit status recorded). The liveness flag is only
/// trustworthy right after [`Session::is_alive`] or [`Session::wait`], since
/// the process runs concurrently with the harness.
pub struct Session {
    // Held for the lifetime of the session; dropping the master tears down
    // the terminal under the child.
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: OutputStream,
    supervised: bool,
    exit_status: Option<ExitStatus>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("supervised", &self.supervised)
            .field("exit_status", &self.exit_status)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn a program in a fresh PTY with default options.
    pub fn spawn<S: AsRef<str>>(command: &str, args: &[S]) -> Result<Self> {
        Self::spawn_with(command, args, SpawnOptions::default())
    }

    /// Spawn with a custom output sink instead of stdout passthrough.
    pub fn spawn_with_handler<S, F>(command: &str, args: &[S], handler: F) -> Result<Self>
    where
        S: AsRef<str>,
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        Self::spawn_with(
            command,
            args,
            SpawnOptions {
                output_handler: Some(Arc::new(handler)),
                ..SpawnOptions::default()
            },
        )
    }

    /// Spawn the target wrapped in the instrumentation supervisor.
    ///
    /// The session's process identity is the supervisor's, not the
    /// target's: liveness and exit status observed through this session are
    /// the supervisor's, and the supervisor only exits once the target has
    /// exited and been analyzed. [`Session::close`] on a supervised session
    /// additionally asserts the supervisor exited with status 0.
    pub fn spawn_supervised<S: AsRef<str>>(
        command: &str,
        args: &[S],
        config: &SupervisorConfig,
    ) -> Result<Self> {
        Self::spawn_with(
            command,
            args,
            SpawnOptions {
                supervisor: Some(config.clone()),
                ..SpawnOptions::default()
            },
        )
    }

    /// Spawn with full control over the options.
    pub fn spawn_with<S: AsRef<str>>(
        command: &str,
        args: &[S],
        options: SpawnOptions,
    ) -> Result<Self> {
        let (program, argv) = match &options.supervisor {
            Some(config) => config.command_line(command, args),
            None => (
                command.to_string(),
                args.iter().map(|a| a.as_ref().to_string()).collect(),
            ),
        };

        let spawn_err = |cause: anyhow::Error| Error::Spawn {
            command: program.clone(),
            cause,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(spawn_err)?;

        // Configure echo before the first write so nothing the harness
        // sends can leak into the output stream.
        set_echo(pair.master.as_ref(), options.echo)?;

        debug!("spawning `{program}` with args {argv:?}");
        let mut cmd = CommandBuilder::new(&program);
        for arg in &argv {
            cmd.arg(arg);
        }

        let child = pair.slave.spawn_command(cmd).map_err(spawn_err)?;
        // Release our copy of the slave so the master reader reaches EOF
        // once the child exits.
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(spawn_err)?;
        let reader = pair.master.try_clone_reader().map_err(spawn_err)?;

        let handler = options.output_handler.unwrap_or_else(stdout_handler);
        let output = OutputStream::start(reader, handler);

        Ok(Session {
            master: pair.master,
            child,
            writer,
            output,
            supervised: options.supervisor.is_some(),
            exit_status: None,
            closed: false,
        })
    }

    /// Write `line` plus a line terminator to the program's stdin.
    ///
    /// Flushes before returning, so the line is visible to the child before
    /// the next expectation starts reading.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("send: {line}");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write raw bytes to the program's stdin.
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Block until `pattern` appears in the program's output, the stream
    /// closes ([`Error::Eof`]), or `timeout` elapses ([`Error::Timeout`]).
    /// Returns the matched text; output up to and including the match is
    /// consumed.
    pub async fn expect(
        &mut self,
        pattern: impl Into<Pattern>,
        timeout: Duration,
    ) -> Result<String> {
        self.output.expect(&pattern.into(), timeout).await
    }

    /// Forward any output the child has already produced without blocking.
    pub fn drain_output(&mut self) {
        self.output.drain_pending();
    }

    /// Non-blocking liveness probe. Records the exit status once the
    /// process is observed dead, but never blocks waiting for it.
    pub fn is_alive(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Block until the process exits and return its status. Idempotent
    /// after the first successful call.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = &self.exit_status {
            return Ok(status.clone());
        }
        let status = self.child.wait()?;
        self.exit_status = Some(status.clone());
        Ok(status)
    }

    /// Exit status recorded so far, if the process has been observed dead.
    pub fn exit_status(&self) -> Option<&ExitStatus> {
        self.exit_status.as_ref()
    }

    /// Close the session, terminating the process if needed.
    ///
    /// Without `force`, closing a live process fails with
    /// [`Error::StillAlive`]; with `force` the process is sent a
    /// termination signal and reaped. For supervised sessions a non-zero
    /// exit status becomes [`Error::SupervisorVerdict`]. Closing an already
    /// closed session is a no-op and leaves the recorded status untouched.
    pub fn close(&mut self, force: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.drain_output();

        if self.is_alive() {
            if !force {
                return Err(Error::StillAlive);
            }
            debug!("terminating child pid {:?}", self.child.process_id());
            let _ = self.child.kill();
        }

        let status = self.wait()?;
        self.closed = true;
        debug!("child exited with {status:?}");

        if self.supervised && !status.success() {
            return Err(Error::SupervisorVerdict {
                status: status.exit_code(),
            });
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn stdout_handler() -> OutputHandler {
    Arc::new(|data: &[u8]| {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
    })
}

#[cfg(unix)]
fn set_echo(master: &dyn MasterPty, enable: bool) -> Result<()> {
    use nix::sys::termios::{self, LocalFlags, SetArg};
    use std::os::fd::BorrowedFd;

    let Some(raw) = master.as_raw_fd() else {
        return Ok(());
    };
    // The master keeps the fd open for as long as this borrow lives.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) };

    let mut attrs = termios::tcgetattr(fd).map_err(std::io::Error::from)?;
    attrs.local_flags.set(LocalFlags::ECHO, enable);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs).map_err(std::io::Error::from)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_echo(_master: &dyn MasterPty, _enable: bool) -> Result<()> {
    Ok(())
}
