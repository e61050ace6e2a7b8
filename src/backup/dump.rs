//! Database dumps using `mysqldump`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use derive_more::{Display, Error};

use super::interrupt::Interrupt;
use crate::config::DatabaseTarget;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Display, Error)]
/// Errors on dumping a database.
pub enum DumpError {
    /// The dump utility can't be found or executed.
    #[display("{command} is not available: {reason}. Please ensure it is installed and in your PATH.")]
    ToolUnavailable { command: String, reason: String },
    /// The raw dump can't be written.
    #[display("Permission denied: Cannot write to {}. Check your file permissions.", _0.display())]
    PermissionDenied(#[error(ignore)] PathBuf),
    /// Unexpected I/O error around the dump process.
    #[display("Unexpected error during backup process: {_0}")]
    Io(io::Error),
    /// The dump utility failed.
    #[display("{status}: {stderr}")]
    Execution { status: ExitStatus, stderr: String },
    /// The dump utility didn't finish in time and was killed.
    #[display("Dump did not finish within {_0:?} and was killed")]
    TimedOut(#[error(ignore)] Duration),
    /// The run was interrupted while dumping.
    #[display("Dump was interrupted and killed")]
    Interrupted,
}

/// The located dump utility.
#[derive(Debug, Clone)]
pub struct DumpTool {
    program: PathBuf,
    timeout: Duration,
    interrupt: Interrupt,
}

/// How waiting for the dump process ended.
enum Wait {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
}

impl DumpTool {
    /// Locates `command` in the `PATH` and checks that it runs.
    ///
    /// Dumps taking longer than `timeout` are killed.
    pub fn locate(command: &str, timeout: Duration) -> Result<Self, DumpError> {
        let unavailable = |reason: String| DumpError::ToolUnavailable {
            command: command.to_string(),
            reason,
        };

        let program = which::which(command).map_err(|e| unavailable(e.to_string()))?;
        log::trace!(target: "backup::dump", "Found {command} at {}", program.display());

        let output = Command::new(&program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(unavailable(format!("`--version` exited with {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or_default().trim();
        log::info!(target: "backup::dump", "{command} available: {version}");

        Ok(Self {
            program,
            timeout,
            interrupt: Interrupt::new(),
        })
    }

    /// Kills running dumps once `interrupt` is triggered.
    pub fn interruptible(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Dumps the database `target` into the file `dest`.
    ///
    /// Without `dest` the dump is discarded. On failure a partially written
    /// `dest` is removed.
    pub fn dump(&self, target: &DatabaseTarget, dest: Option<&Path>) -> Result<(), DumpError> {
        log::info!(target: "backup::dump", "Starting backup for database '{}'...", target.name);

        let stdout = match dest {
            Some(dest) => {
                log::debug!(target: "backup::dump", "Save database dump at: {}", dest.display());
                let file = File::create(dest).map_err(|e| match e.kind() {
                    io::ErrorKind::PermissionDenied => DumpError::PermissionDenied(dest.to_path_buf()),
                    _ => DumpError::Io(e),
                })?;
                Stdio::from(file)
            }
            None => {
                log::trace!(target: "backup::dump", "Discarding output of the dump on dry-run");
                Stdio::null()
            }
        };

        let res = self.run(target, stdout);
        if res.is_err() {
            if let Some(dest) = dest {
                if let Err(e) = fs::remove_file(dest) {
                    log::warn!(target: "backup::dump", "Removing partial dump {} failed: {e}", dest.display());
                }
            }
        }

        res
    }

    fn run(&self, target: &DatabaseTarget, stdout: Stdio) -> Result<(), DumpError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-h")
            .arg(&target.host)
            .arg("-P")
            .arg(target.port.to_string())
            .arg("-u")
            .arg(&target.user)
            .arg(format!("--password={}", target.password))
            .arg(&target.name)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped());

        // own process group: Ctrl-C in the terminal only reaches us and a
        // kill takes down everything the dump spawned
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        log::trace!(
            target: "backup::dump",
            "Running: {} -h {} -P {} -u {} --password=*** {}",
            self.program.display(),
            target.host,
            target.port,
            target.user,
            target.name,
        );
        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DumpError::ToolUnavailable {
                command: self.program.display().to_string(),
                reason: e.to_string(),
            },
            _ => DumpError::Io(e),
        })?;

        // drain stderr concurrently, a full pipe would block the dump
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let outcome = wait(&mut child, self.timeout, &self.interrupt).map_err(DumpError::Io)?;
        let stderr = stderr_reader.join().unwrap_or_default();

        match outcome {
            Wait::Exited(status) if status.success() => {
                if !stderr.trim().is_empty() {
                    log::warn!(target: "backup::dump", "{}", stderr.trim_end());
                }
                log::info!(target: "backup::dump", "Finished dump of database '{}'", target.name);
                Ok(())
            }
            Wait::Exited(status) => Err(DumpError::Execution {
                status,
                stderr: stderr.trim().to_string(),
            }),
            Wait::TimedOut => Err(DumpError::TimedOut(self.timeout)),
            Wait::Interrupted => Err(DumpError::Interrupted),
        }
    }
}

/// Waits for `child` to exit.
///
/// The process group of `child` is killed once `timeout` elapsed or
/// `interrupt` is triggered.
fn wait(child: &mut Child, timeout: Duration, interrupt: &Interrupt) -> io::Result<Wait> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Wait::Exited(status));
        }

        let now = Instant::now();
        let outcome = if interrupt.is_triggered() {
            log::warn!(target: "backup::dump", "Killing dump process {} on interrupt", child.id());
            Wait::Interrupted
        } else if now >= deadline {
            log::warn!(target: "backup::dump", "Killing dump process {} after {timeout:?}", child.id());
            Wait::TimedOut
        } else {
            thread::sleep(POLL_INTERVAL.min(deadline - now));
            continue;
        };

        kill_group(child)?;
        child.wait()?;
        return Ok(outcome);
    }
}

/// Kills `child` along with every process it started in its group.
#[cfg(unix)]
fn kill_group(child: &mut Child) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return child.kill();
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // group is gone already
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> io::Result<()> {
    match child.kill() {
        // exited in the meantime
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        res => res,
    }
}
