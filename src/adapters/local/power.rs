//! Sleep inhibition through the platform's own helper tools.

use crate::ports::power::PowerInhibitor;
use std::collections::HashMap;
use std::error::Error;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Holds an inhibitor helper process alive for as long as the block is held.
///
/// Linux uses `systemd-inhibit`, macOS `caffeinate`. Other platforms report an
/// error on acquire, which callers only log.
#[derive(Debug, Default)]
pub struct SystemInhibitor {
    blockers: Mutex<HashMap<u32, Child>>,
    next_id: AtomicU32,
}

impl SystemInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn helper() -> Option<Command> {
        if cfg!(target_os = "linux") {
            let mut cmd = Command::new("systemd-inhibit");
            cmd.args([
                "--what=idle:sleep",
                "--who=stemq",
                "--why=Separating stems",
                "--mode=block",
                "cat",
            ]);
            Some(cmd)
        } else if cfg!(target_os = "macos") {
            let mut cmd = Command::new("caffeinate");
            cmd.arg("-i");
            Some(cmd)
        } else {
            None
        }
    }
}

impl PowerInhibitor for SystemInhibitor {
    fn acquire(&self) -> Result<u32, Box<dyn Error + Send + Sync>> {
        let mut cmd = Self::helper().ok_or("power-save blocking is not supported here")?;
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        // The helper exits immediately when it cannot take the lock.
        if let Some(status) = child.try_wait()? {
            return Err(format!("inhibitor helper exited early: {status}").into());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.blockers
            .lock()
            .map_err(|_| "inhibitor registry poisoned")?
            .insert(id, child);
        Ok(id)
    }

    fn release(&self, id: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut child = self
            .blockers
            .lock()
            .map_err(|_| "inhibitor registry poisoned")?
            .remove(&id)
            .ok_or_else(|| format!("unknown power-save blocker {id}"))?;
        // Closing stdin ends the wrapped `cat`; the kill covers `caffeinate`.
        drop(child.stdin.take());
        child.kill()?;
        child.wait()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_unknown_id_fails() {
        let inhibitor = SystemInhibitor::new();
        assert!(inhibitor.release(42).is_err());
    }
}
