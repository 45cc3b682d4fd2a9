use anyhow::{Context, Result};
use clap::Parser;
use drivetty::{Driver, Session, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "drivetty",
    about = "Drive an interactive terminal program through a scripted session",
    version
)]
struct Args {
    /// Path to the scenario file: one command per line, `cmd => fragment`
    /// to also require an intermediate response, `!cmd` for a
    /// fire-and-forget send followed by a bounded death poll
    #[arg(short, long)]
    script: String,

    /// Command to run in the PTY
    #[arg(short, long)]
    command: String,

    /// Prompt marker the program prints when ready for input
    #[arg(short, long, default_value = "> ")]
    prompt: String,

    /// Per-expectation timeout in seconds
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Run the command under the valgrind supervisor and require a clean
    /// verdict at teardown
    #[arg(long)]
    supervised: bool,

    /// Suppressions file passed to the supervisor
    #[arg(long, default_value = "drivetty.supp")]
    suppressions: PathBuf,

    /// Log file the supervisor writes its report to
    #[arg(long, default_value = "drivetty.log")]
    log_file: PathBuf,

    /// Arguments to pass to the command
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read scenario file: {}", args.script))?;

    let session = if args.supervised {
        let config = SupervisorConfig::valgrind(&args.suppressions, &args.log_file);
        Session::spawn_supervised(&args.command, &args.args, &config)
    } else {
        Session::spawn(&args.command, &args.args)
    }
    .context("Failed to spawn target")?;

    let timeout = Duration::from_secs_f64(args.timeout);
    let mut driver = Driver::attach_with_timeout(session, args.prompt.as_str(), timeout)
        .await
        .context("Target never printed its prompt")?;

    for raw in script.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(cmd) = line.strip_prefix('!') {
            driver.sendline(cmd.trim())?;
            driver.wait_for_death().await?;
        } else if let Some((cmd, expected)) = line.split_once("=>") {
            driver.exec_command(cmd.trim(), Some(expected.trim())).await?;
        } else {
            driver.exec_command(line, None).await?;
        }
    }

    driver.close(true).context("Teardown failed")?;
    Ok(())
}
