//! Integration tests for the terraform invocation path
//!
//! A shell script stands in for terraform and logs the argv it receives, one
//! argument per line, so we can prove:
//! 1. Addresses reach the program verbatim, with no shell in between
//! 2. A non-zero exit stops the batch and is reported with its code
//! 3. Children spawned with die_with_parent() die with their parent thread

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command as Process, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use tfmigrate::command::Command;
use tfmigrate::engine::Engine;
use tfmigrate::executor::{ExecutionError, Executor, TerraformExecutor};
use tfmigrate::migration::MigrationDefinition;
use tfmigrate::process_guard::CommandDeathPact;
use tfmigrate::registry::Registry;
use tfmigrate::state::StateStore;
use tfmigrate::MigrateError;

// Writing an executable while another test forks can make exec fail with
// ETXTBSY; run the script-based tests one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

/// Write a fake terraform that logs its argv to `<dir>/argv.log` and exits 3
/// when any argument contains "fail".
fn fake_terraform(dir: &Path) -> (PathBuf, PathBuf) {
    let log = dir.join("argv.log");
    let script = dir.join("terraform");
    fs::write(
        &script,
        format!(
            concat!(
                "#!/bin/sh\n",
                "for arg in \"$@\"; do printf '%s\\n' \"$arg\" >> '{log}'; done\n",
                "printf -- '--\\n' >> '{log}'\n",
                "case \"$*\" in *fail*) exit 3;; esac\n",
                "exit 0\n",
            ),
            log = log.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

fn logged_invocations(log: &Path) -> Vec<Vec<String>> {
    let text = fs::read_to_string(log).unwrap_or_default();
    text.split_terminator("--\n")
        .map(|chunk| chunk.lines().map(str::to_string).collect())
        .collect()
}

#[test]
fn test_addresses_reach_terraform_verbatim() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_terraform(dir.path());
    let canary = dir.path().join("pwned");

    let hostile_from = format!("aws_s3_bucket.b[\"a b\"]; touch {}", canary.display());
    let hostile_id = format!("$(touch {})", canary.display());

    let mut exec = TerraformExecutor::new(&script);
    exec.execute(&Command::move_resource("", hostile_from.as_str(), "module.s3.aws_s3_bucket.b"))
        .unwrap();
    exec.execute(&Command::import("", "aws_s3_bucket.c", hostile_id.as_str()))
        .unwrap();

    assert_eq!(
        logged_invocations(&log),
        [
            vec![
                "state".to_string(),
                "mv".to_string(),
                hostile_from,
                "module.s3.aws_s3_bucket.b".to_string(),
            ],
            vec!["import".to_string(), "aws_s3_bucket.c".to_string(), hostile_id],
        ]
    );
    assert!(!canary.exists(), "arguments must never be interpreted by a shell");
}

#[test]
fn test_working_dir_becomes_chdir_flag() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_terraform(dir.path());

    let mut exec = TerraformExecutor::new(&script).with_working_dir("infra/prod");
    exec.execute(&Command::remove("", "aws_iam_user.old")).unwrap();

    assert_eq!(
        logged_invocations(&log),
        [vec!["-chdir=infra/prod", "state", "rm", "aws_iam_user.old"]]
    );
}

#[test]
fn test_non_zero_exit_stops_batch() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_terraform(dir.path());

    let mut registry = Registry::new();
    registry
        .register(1, || {
            MigrationDefinition::new(1, "ok", "").up(Command::remove("", "null_resource.one"))
        })
        .unwrap();
    registry
        .register(2, || {
            MigrationDefinition::new(2, "broken", "")
                .up(Command::remove("", "null_resource.fail"))
                .up(Command::remove("", "null_resource.never"))
        })
        .unwrap();

    let store = StateStore::new(dir.path().join("state.json"));
    let mut engine = Engine::new(&registry, store.clone(), TerraformExecutor::new(&script));
    let err = engine.up(None, |_| {}).unwrap_err();

    let MigrateError::StepFailed { version, command, source, .. } = &err else {
        panic!("expected StepFailed, got {err:?}");
    };
    assert_eq!((*version, *command), (2, 1));
    assert!(matches!(
        **source,
        MigrateError::Execution(ExecutionError::Failed { code: Some(3), .. })
    ));

    assert_eq!(store.load().unwrap().versions(), [1]);
    let ran = logged_invocations(&log);
    assert_eq!(ran.len(), 2);
    assert!(ran.iter().all(|argv| argv.last().map(String::as_str) != Some("null_resource.never")));
}

/// Alive means: exists and is not a zombie
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => false,
    }
}

/// PR_SET_PDEATHSIG fires when the spawning thread exits, which lets us
/// test the pact without killing the test process.
#[cfg(target_os = "linux")]
#[test]
fn test_child_dies_with_spawning_thread() {
    let (tx, rx) = std::sync::mpsc::channel();
    let spawner = thread::spawn(move || {
        let child = Process::new("sleep")
            .arg("1000")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .die_with_parent()
            .spawn()
            .expect("sleep should spawn");
        tx.send(child).unwrap();
    });
    spawner.join().unwrap();
    let mut child = rx.recv().unwrap();
    let pid = child.id();

    let deadline = Instant::now() + Duration::from_secs(5);
    while is_process_alive(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    let died = !is_process_alive(pid);
    if !died {
        let _ = child.kill();
    }
    let _ = child.wait();
    assert!(died, "child {} outlived the thread that spawned it", pid);
}
