//! View lifetimes. Every loop and fetch a view starts is tied to its
//! [`ViewScope`]; after teardown, loops stop at their next suspension point
//! and results that resolve late are discarded instead of applied.

use campaign_core::{ConsoleError, ConsoleResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ViewScope {
    name: &'static str,
    token: CancellationToken,
}

impl ViewScope {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: CancellationToken::new(),
        }
    }

    /// A scope that ends together with `self` but can also be torn down on
    /// its own.
    pub fn child(&self, name: &'static str) -> Self {
        Self {
            name,
            token: self.token.child_token(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Drive `fut` to completion and hand back its output only if the scope
    /// is still alive. In-flight work is never aborted, just ignored.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let output = fut.await;
        if self.is_alive() {
            Some(output)
        } else {
            debug!(scope = self.name, "Discarding result resolved after teardown");
            None
        }
    }

    /// Like [`run`](Self::run) for fallible actions: a result that resolves
    /// after teardown becomes [`ConsoleError::Detached`].
    pub async fn attach<T, F>(&self, action: &str, fut: F) -> ConsoleResult<T>
    where
        F: Future<Output = ConsoleResult<T>>,
    {
        self.run(fut)
            .await
            .unwrap_or_else(|| Err(ConsoleError::Detached(action.to_string())))
    }

    /// Sleep for `duration`. Returns `false` if the scope ended first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub fn teardown(&self) {
        if self.is_alive() {
            debug!(scope = self.name, "View scope torn down");
            self.token.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_discards_after_teardown() {
        let scope = ViewScope::new("test");
        let inner = scope.clone();
        let handle = tokio::spawn(async move {
            inner
                .run(async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    42
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        scope.teardown();
        assert_eq!(handle.await.ok().flatten(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_teardown() {
        let scope = ViewScope::new("test");
        let child = scope.child("loop");
        let handle = tokio::spawn(async move { child.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        scope.teardown();
        assert_eq!(handle.await.ok(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_reports_detached_after_teardown() {
        let scope = ViewScope::new("test");
        let inner = scope.clone();
        let handle = tokio::spawn(async move {
            inner
                .attach("delete", async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(7)
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        scope.teardown();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ConsoleError::Detached(action)) if action == "delete"));
    }

    #[tokio::test]
    async fn test_run_keeps_result_while_alive() {
        let scope = ViewScope::new("test");
        assert_eq!(scope.run(async { "ok" }).await, Some("ok"));
    }
}
