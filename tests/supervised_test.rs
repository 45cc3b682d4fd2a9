//! Supervised-run tests using stub supervisors in place of valgrind, so the
//! verdict plumbing is exercised without requiring the real tool on the
//! test machine. The stubs accept (and ignore) the injected instrumentation
//! flags, then run the trailing target command.

#![cfg(unix)]

use drivetty::{Driver, Error, Session, SpawnOptions, SupervisorConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Skips leading `-` flags, then execs the target: a supervisor that always
// reports a clean run through the target's own exit status.
const CLEAN_SUPERVISOR: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
    case "$1" in
        -*) shift ;;
        *) break ;;
    esac
done
exec "$@"
"#;

// Runs the target, then exits 1 regardless: a supervisor that detected a
// defect after the target finished.
const TAINTED_SUPERVISOR: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
    case "$1" in
        -*) shift ;;
        *) break ;;
    esac
done
"$@"
exit 1
"#;

const MOCK_CLI: &str = r#"
printf '> '
while IFS= read -r line; do
    case "$line" in
        quit) exit 0 ;;
        'show contain') echo 'argument invalid' ;;
    esac
    printf '> '
done
"#;

fn write_stub(name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = std::env::temp_dir().join(format!("drivetty-{name}-{}", std::process::id()));
    fs::write(&path, body).expect("write stub supervisor");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn stub_config(name: &str, body: &str) -> SupervisorConfig {
    let tmp = std::env::temp_dir();
    SupervisorConfig::valgrind(
        tmp.join(format!("drivetty-{name}.supp")),
        tmp.join(format!("drivetty-{name}.log")),
    )
    .with_program(write_stub(name, body))
}

fn spawn_supervised_quiet(command: &str, args: &[&str], config: &SupervisorConfig) -> Session {
    Session::spawn_with(
        command,
        args,
        SpawnOptions {
            supervisor: Some(config.clone()),
            output_handler: Some(Arc::new(|_| {})),
            ..SpawnOptions::default()
        },
    )
    .expect("spawn supervised session")
}

#[tokio::test]
async fn test_supervised_scenario_with_clean_verdict() {
    let config = stub_config("clean", CLEAN_SUPERVISOR);
    let session = spawn_supervised_quiet("sh", &["-c", MOCK_CLI], &config);
    let mut cli = Driver::attach(session, "> ").await.unwrap();

    cli.exec_command("show services", None).await.unwrap();
    cli.exec_command("show contain", Some("argument invalid"))
        .await
        .unwrap();

    cli.sendline("quit").unwrap();
    cli.wait_for_death_with(30, Duration::from_millis(50))
        .await
        .unwrap();

    // Clean run: the supervisor's exit status is 0 and close succeeds.
    cli.close(true).unwrap();
    let _ = fs::remove_file(&config.program);
}

#[tokio::test]
async fn test_supervised_verdict_failure_surfaces_at_close() {
    let config = stub_config("tainted", TAINTED_SUPERVISOR);
    let mut session = spawn_supervised_quiet("true", &[], &config);

    // Let the supervisor finish analyzing on its own so the recorded status
    // is its verdict, not a termination signal.
    for _ in 0..100 {
        if !session.is_alive() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!session.is_alive());

    // The scripted part of the run was fine; only the supervisor's verdict
    // is bad, and it must fail the close.
    let err = session.close(true).unwrap_err();
    match err {
        Error::SupervisorVerdict { status } => assert_eq!(status, 1),
        other => panic!("expected supervisor verdict, got {other}"),
    }

    // The verdict is raised once; a repeated close stays a no-op.
    session.close(true).unwrap();
    let _ = fs::remove_file(&config.program);
}

#[tokio::test]
async fn test_forced_close_kills_live_supervisor() {
    let config = stub_config("live", CLEAN_SUPERVISOR);
    let mut session = spawn_supervised_quiet("cat", &[], &config);

    assert!(session.is_alive());
    // Forced teardown: the supervisor is killed, and because the session is
    // supervised the non-success status becomes a verdict error.
    let err = session.close(true).unwrap_err();
    assert!(matches!(err, Error::SupervisorVerdict { .. }), "got {err}");
    let _ = fs::remove_file(&config.program);
}
