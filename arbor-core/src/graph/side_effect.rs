//! Side Effects
//!
//! A side effect is a keyed, long-lived task declared during render. The body
//! is held as a pending future until the render pass commits, then spawned.
//! Declaring the same key again on later passes keeps the running task; not
//! declaring it tears the task down.
//!
//! # Failure
//!
//! A body that returns `Err` or panics is reported to the runtime scope, which
//! ends the driver loop. Cancellation is not a failure and is never reported.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::graph::scope::RuntimeScope;
use crate::interceptor::{SideEffectFuture, WorkflowSession};

pub(crate) struct SideEffectNode {
    key: String,
    pending: Option<SideEffectFuture>,
    task: Option<JoinHandle<()>>,
}

impl SideEffectNode {
    pub(crate) fn new(key: impl Into<String>, body: SideEffectFuture) -> Self {
        Self {
            key: key.into(),
            pending: Some(body),
            task: None,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Spawn the body if it has not been started yet.
    pub(crate) fn start(&mut self, scope: &RuntimeScope, session: &WorkflowSession) -> Result<()> {
        let Some(body) = self.pending.take() else {
            return Ok(());
        };

        let key = self.key.clone();
        let reporter = scope.clone();
        trace!(session = %session, key = %key, "starting side effect");

        let task = scope.spawn(async move {
            match AssertUnwindSafe(body).catch_unwind().await {
                Ok(Ok(())) => trace!(key = %key, "side effect finished"),
                Ok(Err(source)) => {
                    error!(key = %key, error = %source, "side effect failed");
                    reporter.report_failure(Error::SideEffect {
                        key,
                        source: Box::new(source),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(key = %key, panic = %message, "side effect panicked");
                    reporter.report_failure(Error::SideEffectPanicked { key, message });
                }
            }
        })?;
        self.task = Some(task);
        Ok(())
    }

    /// Abort the task. Calling this more than once has no further effect.
    pub(crate) fn cancel(&mut self) {
        self.pending = None;
        if let Some(task) = self.task.take() {
            trace!(key = %self.key, "cancelling side effect");
            task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_started(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for SideEffectNode {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::WorkflowIdentity;
    use crate::runtime::RuntimeConfig;
    use std::time::Duration;

    fn session() -> WorkflowSession {
        WorkflowSession::new(WorkflowIdentity::of::<()>(), "", 0, None, RuntimeConfig::default())
    }

    #[tokio::test]
    async fn failing_body_is_reported_with_its_key() {
        let scope = RuntimeScope::default();
        let mut failures = scope.take_failures().unwrap();
        let mut effect = SideEffectNode::new(
            "poll",
            Box::pin(async { Err::<(), _>(Error::msg("timeout")) }),
        );

        effect.start(&scope, &session()).unwrap();

        match failures.recv().await.unwrap() {
            Error::SideEffect { key, source } => {
                assert_eq!(key, "poll");
                assert_eq!(source.to_string(), "timeout");
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[tokio::test]
    async fn panicking_body_is_reported() {
        let scope = RuntimeScope::default();
        let mut failures = scope.take_failures().unwrap();
        let mut effect = SideEffectNode::new("boom", Box::pin(async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        }));

        effect.start(&scope, &session()).unwrap();

        let failure = failures.recv().await.unwrap();
        assert!(matches!(
            failure,
            Error::SideEffectPanicked { ref key, ref message }
                if key == "boom" && message == "kaboom"
        ));
    }

    #[tokio::test]
    async fn cancelled_body_never_reports() {
        let scope = RuntimeScope::default();
        let mut failures = scope.take_failures().unwrap();
        let mut effect = SideEffectNode::new(
            "slow",
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err::<(), _>(Error::msg("too late"))
            }),
        );

        effect.start(&scope, &session()).unwrap();
        assert!(effect.is_started());
        effect.cancel();
        effect.cancel();
        assert!(!effect.is_started());

        drop(effect);
        drop(scope);
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_is_a_no_op_once_running() {
        let scope = RuntimeScope::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut effect = SideEffectNode::new(
            "once",
            Box::pin(async move {
                let _ = tx.send(());
                Ok(())
            }),
        );

        effect.start(&scope, &session()).unwrap();
        effect.start(&scope, &session()).unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
