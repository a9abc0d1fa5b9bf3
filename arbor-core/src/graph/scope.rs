//! Runtime Scope
//!
//! State shared by every node of one runtime: the session id counter, the
//! interceptor chain, the configuration, the task handle side effects are
//! spawned on, and the channel side-effect failures are reported through.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::identity::SessionIdCounter;
use crate::interceptor::InterceptorChain;
use crate::runtime::RuntimeConfig;

struct ScopeInner {
    ids: SessionIdCounter,
    interceptors: InterceptorChain,
    config: RuntimeConfig,
    handle: Option<Handle>,
    failures_tx: mpsc::UnboundedSender<Error>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
}

/// Handle to the shared state of one runtime. Cheap to clone.
#[derive(Clone)]
pub struct RuntimeScope {
    inner: Arc<ScopeInner>,
}

impl Default for RuntimeScope {
    fn default() -> Self {
        Self::new(
            SessionIdCounter::new(),
            InterceptorChain::default(),
            RuntimeConfig::default(),
        )
    }
}

impl RuntimeScope {
    pub fn new(
        ids: SessionIdCounter,
        interceptors: InterceptorChain,
        config: RuntimeConfig,
    ) -> Self {
        Self::build(ids, interceptors, config, None)
    }

    /// Scope whose side effects are spawned on `handle` instead of the
    /// runtime current at render time.
    pub fn with_handle(
        ids: SessionIdCounter,
        interceptors: InterceptorChain,
        config: RuntimeConfig,
        handle: Handle,
    ) -> Self {
        Self::build(ids, interceptors, config, Some(handle))
    }

    fn build(
        ids: SessionIdCounter,
        interceptors: InterceptorChain,
        config: RuntimeConfig,
        handle: Option<Handle>,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ScopeInner {
                ids,
                interceptors,
                config,
                handle,
                failures_tx,
                failures_rx: Mutex::new(Some(failures_rx)),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.inner.interceptors
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.inner.ids.next_id()
    }

    /// Take the receiving end of the failure channel. Only the first caller
    /// gets it.
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<Error>> {
        self.inner.failures_rx.lock().take()
    }

    pub(crate) fn report_failure(&self, error: Error) {
        // Nobody listening means nobody owns the runtime any more.
        let _ = self.inner.failures_tx.send(error);
    }

    pub(crate) fn spawn<F>(&self, task: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = match &self.inner.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| Error::NoRuntime {
                operation: "run_side_effect",
            })?,
        };
        Ok(handle.spawn(task))
    }
}

impl std::fmt::Debug for RuntimeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeScope")
            .field("config", &self.inner.config)
            .field("interceptors", &self.inner.interceptors)
            .finish()
    }
}
