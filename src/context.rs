//! Call context
//!
//! Deadline and cancellation carried into every remote call. A cancelled or
//! expired context abandons the in-flight request and reports
//! [`Error::Cancelled`]; a context that is already cancelled never issues the
//! request at all.

use crate::api::client::ClientError;
use crate::error::{Error, Operation, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal for a chain of remote calls
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Handle used to cancel every [`CallContext`] derived from it
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CallContext {
    /// Context without deadline or cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// Context paired with a handle that cancels it
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// Derive a context that additionally expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(match self.deadline {
                Some(existing) if existing < deadline => existing,
                _ => deadline,
            }),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let cancelled = self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);
        let expired = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        cancelled || expired
    }

    /// Run one remote call under this context, attributing failures to
    /// `operation` on `id`
    pub async fn run<T, F>(&self, operation: Operation, id: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ClientError>>,
    {
        if self.is_cancelled() {
            return Err(cancelled(operation, id));
        }

        tokio::select! {
            biased;
            _ = self.done() => Err(cancelled(operation, id)),
            result = call => result.map_err(|e| Error::from_client(operation, id, e)),
        }
    }

    /// Sleep for `delay` unless the context ends first
    pub async fn sleep(&self, operation: Operation, id: &str, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.done() => Err(cancelled(operation, id)),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or past its deadline
    async fn done(&self) {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let cancelled = async {
            let Some(mut rx) = self.cancel.clone() else {
                return std::future::pending::<()>().await;
            };
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Sender dropped without cancelling
                    return std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = deadline => {},
            _ = cancelled => {},
        }
    }
}

fn cancelled(operation: Operation, id: &str) -> Error {
    tracing::debug!("{} {} cancelled", operation, id);
    Error::Cancelled {
        operation,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_context_runs_call() {
        let ctx = CallContext::background();
        let value = ctx
            .run(Operation::Read, "id-1", async { Ok::<_, ClientError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_never_polls_call() {
        let (ctx, handle) = CallContext::cancellable();
        handle.cancel();

        let polled = std::sync::atomic::AtomicBool::new(false);
        let err = ctx
            .run(Operation::Read, "id-1", async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, ClientError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_abandons_slow_call() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(20));
        let err = ctx
            .run(Operation::Update, "id-2", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ClientError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Cancelled {
                operation: Operation::Update,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_sleep() {
        let (ctx, handle) = CallContext::cancellable();
        let sleeper = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.sleep(Operation::Read, "id-3", Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let result = sleeper.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_with_timeout_keeps_earlier_deadline() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let short = CallContext::background().with_timeout(Duration::from_millis(5));
            let derived = short.with_timeout(Duration::from_secs(60));
            assert_eq!(derived.deadline, short.deadline);
        });
    }
}
