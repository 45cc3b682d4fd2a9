//! Scripted command driver: the send-line/expect-prompt loop a scenario is
//! written against.

use crate::error::{Error, Result};
use crate::expect::Pattern;
use crate::session::Session;
use log::debug;
use std::time::Duration;
use tokio::time::sleep;

/// Default per-expectation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bounds for the post-quit death poll: 30 probes, 300 ms apart.
pub const DEFAULT_DEATH_POLLS: u32 = 30;
pub const DEFAULT_DEATH_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Drives a scripted conversation with an interactive program.
///
/// Every [`Driver::exec_command`] step sends one line, waits for the
/// program's prompt (optionally preceded by an intermediate expectation),
/// and asserts the program survived the command. Steps are strictly
/// sequential; there is never more than one outstanding expectation.
pub struct Driver {
    session: Session,
    prompt: Pattern,
    timeout: Duration,
}

impl Driver {
    /// Attach to a freshly spawned session and wait for its first prompt.
    pub async fn attach(session: Session, prompt: impl Into<Pattern>) -> Result<Self> {
        Self::attach_with_timeout(session, prompt, DEFAULT_TIMEOUT).await
    }

    /// Attach with a custom per-expectation deadline.
    pub async fn attach_with_timeout(
        session: Session,
        prompt: impl Into<Pattern>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut driver = Driver {
            session,
            prompt: prompt.into(),
            timeout,
        };
        driver
            .session
            .expect(driver.prompt.clone(), driver.timeout)
            .await?;
        Ok(driver)
    }

    /// Send `line`, optionally wait for `expect_output` in the response,
    /// then wait for the prompt and assert the program is still alive.
    ///
    /// The intermediate expectation and the prompt are two sequential
    /// expects, so the fragment is required to appear strictly before the
    /// prompt in the output stream. Any failure is wrapped in
    /// [`Error::Step`] naming `line`.
    pub async fn exec_command(&mut self, line: &str, expect_output: Option<&str>) -> Result<()> {
        self.run_step(line, expect_output)
            .await
            .map_err(|e| e.in_step(line))
    }

    async fn run_step(&mut self, line: &str, expect_output: Option<&str>) -> Result<()> {
        self.session.write_line(line)?;

        if let Some(fragment) = expect_output {
            self.session.expect(fragment, self.timeout).await?;
        }
        self.session
            .expect(self.prompt.clone(), self.timeout)
            .await?;

        // The core regression guarantee: no scripted command may crash the
        // program under test.
        if !self.session.is_alive() {
            return Err(Error::UnexpectedDeath);
        }
        Ok(())
    }

    /// Fire-and-forget write with no expectation. Used for commands that
    /// terminate the session, where waiting for a prompt would hang.
    pub fn sendline(&mut self, line: &str) -> Result<()> {
        self.session
            .write_line(line)
            .map_err(|e| e.in_step(line))
    }

    /// Poll liveness on the default bounds until the process is gone.
    pub async fn wait_for_death(&mut self) -> Result<()> {
        self.wait_for_death_with(DEFAULT_DEATH_POLLS, DEFAULT_DEATH_POLL_INTERVAL)
            .await
    }

    /// Poll liveness up to `polls` times, `interval` apart, to tolerate
    /// graceful-shutdown latency. The process still being alive after the
    /// last probe is [`Error::Hang`].
    pub async fn wait_for_death_with(&mut self, polls: u32, interval: Duration) -> Result<()> {
        for probe in 0..polls {
            self.session.drain_output();
            if !self.session.is_alive() {
                debug!("process gone after {probe} polls");
                return Ok(());
            }
            sleep(interval).await;
        }

        if self.session.is_alive() {
            Err(Error::Hang { polls, interval })
        } else {
            Ok(())
        }
    }

    /// Whether the program under test is still running.
    pub fn is_alive(&mut self) -> bool {
        self.session.is_alive()
    }

    /// Close the underlying session. See [`Session::close`].
    pub fn close(&mut self, force: bool) -> Result<()> {
        self.session.close(force)
    }

    /// Access the underlying session.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Give up the driver and keep the session.
    pub fn into_session(self) -> Session {
        self.session
    }
}
