//! Interrupt-safe execution of work that writes into a result directory.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cbp_types::{CbpResult, RunError};
use tracing::{error, warn};

pub type SignalFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces a fresh interrupt listener for each scope.
pub type SignalSource = Arc<dyn Fn() -> SignalFuture + Send + Sync>;

/// Ctrl-C listener. If the handler cannot be installed the listener never fires.
pub fn ctrl_c_source() -> SignalSource {
    Arc::new(|| -> SignalFuture {
        Box::pin(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for interrupts: {}", e);
                std::future::pending::<()>().await;
            }
        })
    })
}

/// A listener that never fires.
pub fn no_signal_source() -> SignalSource {
    Arc::new(|| -> SignalFuture { Box::pin(std::future::pending::<()>()) })
}

/// Races a body against an interrupt and cleans up `result_dir` if the body
/// does not finish successfully.
pub struct InterruptScope {
    result_dir: PathBuf,
    signal: SignalFuture,
}

impl InterruptScope {
    pub fn new(result_dir: impl Into<PathBuf>, signal: SignalFuture) -> Self {
        Self {
            result_dir: result_dir.into(),
            signal,
        }
    }

    pub async fn run<T, F>(self, body: F) -> CbpResult<T>
    where
        F: Future<Output = CbpResult<T>>,
    {
        let Self { result_dir, signal } = self;

        // The body future is dropped when select! returns, which kills any
        // child process it still owns. Cleanup must not await: callers race
        // the same signal.
        let outcome = tokio::select! {
            biased;
            _ = signal => None,
            result = body => Some(result),
        };

        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => {
                remove_result_dir(&result_dir);
                Err(e)
            }
            None => {
                remove_result_dir(&result_dir);
                Err(RunError::Interrupted { result_dir }.into())
            }
        }
    }
}

/// Remove a partially written result directory. Aborted tasks may still be
/// creating files for a short while, so removal is retried.
fn remove_result_dir(dir: &Path) {
    for attempt in 0..3 {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => warn!("Failed to remove {} (attempt {}): {}", dir.display(), attempt + 1, e),
        }
        if !dir.exists() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    error!("Could not remove incomplete results in {}", dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_types::{internal_error, CbpError};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_success_keeps_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("run");
        std::fs::create_dir(&dir).unwrap();

        let scope = InterruptScope::new(&dir, no_signal_source()());
        let value = scope.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_failure_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("run");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("partial.json"), "{}").unwrap();

        let scope = InterruptScope::new(&dir, no_signal_source()());
        let err = scope
            .run(async { Err::<(), _>(internal_error!("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, CbpError::Internal(_)));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_interrupt_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("run");
        std::fs::create_dir(&dir).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let signal: SignalFuture = Box::pin(async move {
            let _ = rx.await;
        });

        let body_dir = dir.clone();
        let body = async move {
            std::fs::write(body_dir.join("t1.json"), "{}")?;
            std::future::pending::<()>().await;
            Ok::<(), CbpError>(())
        };

        let scope = InterruptScope::new(&dir, signal);
        let handle = tokio::spawn(scope.run(body));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_interrupt());
        assert!(!dir.exists());
    }
}
