//! Signal tests: a run interrupted mid-iteration releases its lock and exits
//! with the signal's conventional code.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use ralph::exit_codes;
use ralph::io::lock::read_lock_owner;
use ralph::test_support::TestWorkspace;

/// Start a one-iteration ralph run whose fake agent runs `body`.
fn spawn_run(workspace: &TestWorkspace, body: &str) -> Child {
    let bin = workspace.root().join("bin");
    fs::create_dir_all(&bin).expect("create bin");
    let script = bin.join("opencode");
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&script).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).expect("chmod");

    let mut entries = vec![bin];
    if let Some(existing) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    Command::new(env!("CARGO_BIN_EXE_ralph"))
        .arg("--root")
        .arg(workspace.root())
        .args(["--max-iterations", "1"])
        .env("PATH", std::env::join_paths(entries).expect("join PATH"))
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ralph")
}

fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}

fn interrupt_mid_iteration(signal: Signal) -> Option<i32> {
    let workspace = TestWorkspace::new();
    let mut child = spawn_run(&workspace, "touch agent-started\nexec sleep 5");

    wait_for(&workspace.root().join("agent-started"));
    assert_eq!(
        read_lock_owner(&workspace.paths.lock_path).expect("lock owner"),
        child.id()
    );

    let pid = i32::try_from(child.id()).expect("pid fits i32");
    kill(Pid::from_raw(pid), signal).expect("send signal");
    let status = child.wait().expect("wait ralph");

    assert!(
        !workspace.paths.lock_path.exists(),
        "lock left behind after {signal:?}"
    );
    status.code()
}

#[test]
fn sigterm_releases_lock_and_exits_143() {
    let code = interrupt_mid_iteration(Signal::SIGTERM);
    assert_eq!(code, Some(exit_codes::TERMINATED));
}

#[test]
fn sigint_releases_lock_and_exits_130() {
    let code = interrupt_mid_iteration(Signal::SIGINT);
    assert_eq!(code, Some(exit_codes::INTERRUPTED));
}

#[test]
fn signal_during_completing_iteration_keeps_signal_exit_code() {
    let workspace = TestWorkspace::new();
    // The agent signals ralph and then reports completion, so the normal
    // shutdown path races the listener.
    let mut child = spawn_run(
        &workspace,
        "kill -TERM $PPID\nsleep 0.1\necho '<ralph_status>COMPLETE</ralph_status>'",
    );

    let status = child.wait().expect("wait ralph");

    assert_eq!(status.code(), Some(exit_codes::TERMINATED));
    assert!(!workspace.paths.lock_path.exists());
}
