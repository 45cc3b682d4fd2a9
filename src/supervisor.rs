//! Wrapping a target command in an external memory/resource instrumentation
//! supervisor (valgrind by default).
//!
//! The supervisor process becomes the session's child; it only exits after
//! the target has exited and been analyzed, and its exit status is the
//! verdict: 0 for a clean run, the configured error exit code otherwise.

use std::path::PathBuf;

/// Describes how a target command is wrapped by the instrumentation tool.
///
/// The expected terminal exit status is fixed at success: a supervised
/// session's close treats anything else as a hard failure.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Supervisor executable. Defaults to `valgrind`.
    pub program: PathBuf,
    /// Suppressions file filtering known-benign findings out of the verdict.
    pub suppressions: PathBuf,
    /// Where the supervisor writes its report, keeping the PTY stream clean
    /// for the expectation engine.
    pub log_file: PathBuf,
}

impl SupervisorConfig {
    /// Standard valgrind invocation: full leak check, all leak kinds both
    /// shown and counted as errors, file-descriptor tracking, and errors
    /// turned into exit code 1.
    pub fn valgrind(suppressions: impl Into<PathBuf>, log_file: impl Into<PathBuf>) -> Self {
        SupervisorConfig {
            program: PathBuf::from("valgrind"),
            suppressions: suppressions.into(),
            log_file: log_file.into(),
        }
    }

    /// Substitute the supervisor executable, keeping the flag set.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Full command line: supervisor program plus its argv, with the target
    /// command and its arguments appended last.
    pub(crate) fn command_line<S: AsRef<str>>(
        &self,
        target: &str,
        target_args: &[S],
    ) -> (String, Vec<String>) {
        let mut argv = vec![
            "--vgdb=no".to_string(),
            "--gen-suppressions=all".to_string(),
            "--error-exitcode=1".to_string(),
            "--leak-check=full".to_string(),
            "--show-leak-kinds=all".to_string(),
            "--errors-for-leak-kinds=all".to_string(),
            "--track-fds=yes".to_string(),
            "-v".to_string(),
            format!("--log-file={}", self.log_file.display()),
            format!("--suppressions={}", self.suppressions.display()),
        ];
        argv.push(target.to_string());
        argv.extend(target_args.iter().map(|a| a.as_ref().to_string()));

        (self.program.display().to_string(), argv)
    }
}
