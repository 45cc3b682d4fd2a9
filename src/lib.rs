//! # Drivetty
//!
//! A PTY test harness for driving interactive terminal programs.
//!
//! Drivetty spawns a command-line program attached to a pseudo-terminal and
//! operates it the way a human would: send a line, wait for specific output,
//! wait for the prompt, repeat. Every step carries a deadline, and every
//! step asserts the program survived it, which makes it a compact engine for
//! regression-testing interactive CLIs. A second spawn mode wraps the same
//! program inside an external memory-instrumentation supervisor (valgrind)
//! and turns the supervisor's exit status into the test verdict at teardown.
//!
//! ## Quick start
//!
//! ```no_run
//! use drivetty::{Driver, Session};
//!
//! #[tokio::main]
//! async fn main() -> drivetty::Result<()> {
//!     let session = Session::spawn("./build/cli", &[] as &[&str])?;
//!     let mut cli = Driver::attach(session, "> ").await?;
//!
//!     cli.exec_command("show services", None).await?;
//!     cli.exec_command("show contain", Some("argument invalid")).await?;
//!     cli.exec_command("interface 5", Some("Set interface 5")).await?;
//!     cli.exec_command("end", None).await?;
//!
//!     cli.sendline("quit")?;
//!     cli.wait_for_death().await?;
//!     cli.close(true)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supervised runs
//!
//! [`Session::spawn_supervised`] runs the target under valgrind with a full
//! leak check, fd tracking, and `--error-exitcode=1`. The session's process
//! is then the supervisor's, and [`Session::close`] fails with
//! [`Error::SupervisorVerdict`] when the supervisor exits non-zero, so a
//! leak fails the test even when every expectation matched:
//!
//! ```no_run
//! use drivetty::{Driver, Session, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> drivetty::Result<()> {
//!     let config = SupervisorConfig::valgrind("cli.supp", "valgrind.log");
//!     let session = Session::spawn_supervised("./build/cli", &[] as &[&str], &config)?;
//!     let mut cli = Driver::attach(session, "> ").await?;
//!
//!     cli.exec_command("jobs", None).await?;
//!     cli.sendline("quit")?;
//!     cli.wait_for_death().await?;
//!     cli.close(true)?; // asserts the supervisor exited 0
//!     Ok(())
//! }
//! ```
//!
//! ## Patterns
//!
//! Expectations match either a literal substring (the common case, built
//! from any `&str`) or a regular expression via [`Pattern::regex`]. A
//! matched expectation consumes the output stream through the end of the
//! match, so sequential expectations always walk forward and an
//! intermediate-output check is guaranteed to match before the prompt that
//! follows it.
//!
//! ## Echo
//!
//! The PTY is spawned with echo disabled, so the output stream contains
//! only what the program printed and expectations can use literal fragments
//! without accounting for mirrored input. Set [`SpawnOptions::echo`] to opt
//! back into terminal echo.

pub mod driver;
pub mod error;
pub mod expect;
pub mod session;
pub mod supervisor;

pub use driver::Driver;
pub use error::{Error, Result};
pub use expect::{OutputHandler, Pattern};
pub use session::{Session, SpawnOptions};
pub use supervisor::SupervisorConfig;
