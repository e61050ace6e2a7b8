//! Stopping a backup run on SIGINT or SIGTERM.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::runtime::Builder;

/// Exit code after a second signal, as shells report a SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// Shared request to stop a running backup.
///
/// A running dump polls the request, kills its process group and removes its
/// partial raw dump. The [Runner](super::Runner) then aborts instead of
/// starting the next database.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Triggers on the first SIGINT or SIGTERM.
    ///
    /// A second signal exits the process right away. The handlers are
    /// installed once this returns.
    pub fn listen(&self) -> io::Result<()> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let mut signals = {
            let _guard = runtime.enter();
            Signals::new()?
        };

        let interrupt = self.clone();
        thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let name = signals.recv().await;
                    log::warn!(target: "backup::interrupt", "Received {name}, stopping the backup run");
                    interrupt.trigger();

                    let name = signals.recv().await;
                    log::error!(target: "backup::interrupt", "Received {name} again, exiting immediately");
                    std::process::exit(FORCED_EXIT_CODE);
                })
            })?;

        Ok(())
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!(target: "backup::interrupt", "Listening for Ctrl-C failed: {e}");
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn trigger_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let observer = interrupt.clone();
        assert!(!observer.is_triggered());

        interrupt.trigger();
        assert!(observer.is_triggered());
    }

    #[cfg(unix)]
    #[test]
    fn sigterm_triggers() {
        use nix::sys::signal::{raise, Signal};

        let interrupt = Interrupt::new();
        interrupt.listen().unwrap();
        raise(Signal::SIGTERM).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !interrupt.is_triggered() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(interrupt.is_triggered());
    }
}
