use anyhow::Result;
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use signal_hook::SigId;

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidUsage = 2,
    NotFound = 3,
    Interrupted = 130, // 128 + SIGINT (2)
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn exit(self) -> ! {
        process::exit(self.code())
    }
}

/// Keeps SIGINT/SIGTERM from killing the process while an ingestion pass holds the lock.
///
/// The first signal only sets a flag; a second one falls back to the default action so a
/// stuck process can still be stopped. Whatever a killed pass left behind is picked up as an
/// orphaned snapshot next time.
pub struct InterruptGuard {
    received: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl InterruptGuard {
    pub fn install() -> Result<Self> {
        let received = Arc::new(AtomicBool::new(false));
        let mut ids = Vec::with_capacity(4);
        for signal in [SIGINT, SIGTERM] {
            // Order matters: the conditional default sees the flag before it is set.
            ids.push(flag::register_conditional_default(
                signal,
                Arc::clone(&received),
            )?);
            ids.push(flag::register(signal, Arc::clone(&received))?);
        }
        Ok(Self { received, ids })
    }

    pub fn interrupted(&self) -> bool {
        self.received.load(Ordering::Relaxed)
    }

    /// Exit with [`ExitCode::Interrupted`] if a signal arrived while the guard was held.
    pub fn exit_if_interrupted(&self) {
        if self.interrupted() {
            ExitCode::Interrupted.exit();
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// True when writing failed because the reader went away (`| head`).
pub fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::InvalidUsage.code(), 2);
        assert_eq!(ExitCode::NotFound.code(), 3);
        assert_eq!(ExitCode::Interrupted.code(), 130);
    }

    #[test]
    fn test_broken_pipe_detection() {
        let err = anyhow::Error::new(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .context("writing output");
        assert!(is_broken_pipe(&err));
        assert!(!is_broken_pipe(&anyhow::anyhow!("other")));
    }

    #[test]
    fn test_guard_installs_and_releases() {
        let guard = InterruptGuard::install().unwrap();
        assert!(!guard.interrupted());
        drop(guard);
    }
}
