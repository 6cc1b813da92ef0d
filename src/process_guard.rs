//! Lifecycle management for the terraform child process.
//!
//! A state command must not keep running once tfmigrate is gone: the
//! tracking file would never learn whether it succeeded.
//!
//! - Every spawned child is tracked in a global registry
//! - SIGINT, SIGTERM and SIGHUP terminate tracked children (SIGTERM, then
//!   SIGKILL after a grace period) before the tool exits with 128+signal
//! - On Linux the child also gets SIGTERM if the parent dies outright

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static RUNNING: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Terraform children that have been spawned and not yet reaped
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: BTreeSet<u32>,
    /// Set once shutdown starts; a second signal must not restart it
    stopping: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by the executor and the signal thread
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        Arc::clone(RUNNING.get_or_init(Default::default))
    }

    pub fn register(&mut self, pid: u32) {
        if self.pids.insert(pid) {
            debug!("Tracking terraform PID {}", pid);
        }
    }

    pub fn unregister(&mut self, pid: u32) {
        if self.pids.remove(&pid) {
            debug!("PID {} reaped", pid);
        }
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Stop every tracked child: SIGTERM, up to `grace_period` to exit,
    /// then SIGKILL for stragglers. Returns how many had to be killed.
    pub fn terminate_all(&mut self, grace_period: Duration) -> usize {
        if std::mem::replace(&mut self.stopping, true) {
            debug!("Shutdown already in progress");
            return 0;
        }
        let mut remaining: Vec<u32> = std::mem::take(&mut self.pids).into_iter().collect();
        if remaining.is_empty() {
            return 0;
        }

        info!("Stopping {} terraform process(es)", remaining.len());
        for pid in &remaining {
            if let Err(e) = send_signal(*pid, Signal::SIGTERM) {
                warn!("SIGTERM to PID {} failed: {}", pid, e);
            }
        }

        let deadline = Instant::now() + grace_period;
        loop {
            remaining.retain(|&pid| is_process_alive(pid));
            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for pid in &remaining {
            warn!("PID {} ignored SIGTERM, sending SIGKILL", pid);
            let _ = send_signal(*pid, Signal::SIGKILL);
        }
        remaining.len()
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Alive means: exists and is not a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state letter
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
        {
            return !matches!(state, "Z" | "X");
        }
    }

    true
}

/// Spawn a thread that waits for SIGINT, SIGTERM or SIGHUP, stops any
/// running terraform child and exits with `128 + signal`.
///
/// Call once, early in `main`.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signal-guard".into())
        .spawn(move || {
            let Some(sig) = signals.forever().next() else {
                return;
            };
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "signal",
            };
            warn!(
                "Received {} while migrating; check both states before re-running",
                name
            );

            let registry = ChildRegistry::global();
            let killed = match registry.lock() {
                Ok(mut guard) => guard.terminate_all(Duration::from_secs(5)),
                Err(poisoned) => poisoned.into_inner().terminate_all(Duration::from_secs(5)),
            };
            if killed > 0 {
                warn!("{} terraform process(es) had to be killed", killed);
            }

            std::process::exit(128 + sig);
        })?;

    Ok(())
}

/// Extension trait tying a child's lifetime to the parent
pub trait CommandDeathPact {
    /// Ask the kernel to SIGTERM the child when the parent dies (Linux only;
    /// a no-op elsewhere). The child stays in the foreground process group
    /// so terminal input and Ctrl+C still reach it.
    fn die_with_parent(&mut self) -> &mut Self;
}

impl CommandDeathPact for std::process::Command {
    #[cfg(target_os = "linux")]
    fn die_with_parent(&mut self) -> &mut Self {
        use nix::libc;
        use std::os::unix::process::CommandExt;

        // SAFETY: prctl is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }

    #[cfg(not(target_os = "linux"))]
    fn die_with_parent(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        // Unregistering unknown PIDs is harmless
        registry.unregister(9999);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        let mut child = Command::new("sleep")
            .arg("30")
            .die_with_parent()
            .spawn()
            .expect("sleep should spawn");
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        // sleep exits on SIGTERM, nothing needs SIGKILL
        assert_eq!(registry.terminate_all(Duration::from_secs(2)), 0);

        // Reap so the zombie disappears
        let status = child.wait().expect("wait should succeed");
        assert!(!status.success());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_is_idempotent() {
        let mut registry = ChildRegistry::default();
        assert_eq!(registry.terminate_all(Duration::from_millis(10)), 0);
        registry.register(4242);
        // Shutdown already started: nothing is signalled again
        assert_eq!(registry.terminate_all(Duration::from_millis(10)), 0);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // PID near the max is almost certainly unused
        assert!(!is_process_alive(4_194_000));
    }
}
