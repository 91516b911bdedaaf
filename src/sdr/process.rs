use std::io;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStdout, Command};

/// A child process adopted as an asynchronous byte stream: the RTL
/// producer (`rtl_fm`, `rtl_sdr`, `rtl_power`) or the WAV encoder sink.
#[derive(Debug)]
pub struct SdrProcess {
    name: String,
    child: Child,
}

impl SdrProcess {
    /// Spawn with stdout piped so the output can be consumed or wired
    /// into a downstream process.
    pub fn spawn(program: &str, args: &[String]) -> io::Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        log::info!("spawned {} (pid {:?})", program, child.id());
        Ok(SdrProcess {
            name: program.to_string(),
            child,
        })
    }

    /// Spawn with stdin fed from a pipe handed over by an upstream
    /// process and stdout discarded (the sink writes to a file itself).
    pub fn spawn_sink(program: &str, args: &[String], stdin: Stdio) -> io::Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        log::info!("spawned sink {} (pid {:?})", program, child.id());
        Ok(SdrProcess {
            name: program.to_string(),
            child,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking liveness probe. `Ok(Some(_))` means the child exited.
    pub fn try_wait(&mut self) -> io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }

    /// Await a natural exit (used for sink flush, with an outer timeout).
    pub async fn wait(&mut self) -> io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and await the exit so
    /// the USB device is fully released before the caller proceeds.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::debug!("SIGTERM {} failed: {}", self.name, e);
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                log::debug!("{} exited: {:?}", self.name, status?);
                Ok(())
            }
            Err(_) => {
                log::warn!("{} ignored SIGTERM for {:?}, killing", self.name, grace);
                self.child.start_kill()?;
                self.child.wait().await?;
                Ok(())
            }
        }
    }

    /// Synchronous best-effort kill for drop paths where awaiting the
    /// exit is not possible.
    pub fn kill_now(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            log::debug!("kill {} failed: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_stops_a_cooperative_child() {
        let mut proc = SdrProcess::spawn("sleep", &["30".to_string()]).unwrap();
        proc.terminate(Duration::from_secs(3)).await.unwrap();
        assert!(proc.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() {
        let mut proc = SdrProcess::spawn_sink(
            "sh",
            &["-c".to_string(), "trap '' TERM; sleep 30".to_string()],
            Stdio::null(),
        )
        .unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;
        proc.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(proc.try_wait().unwrap().is_some());
    }
}
