//! Driver Loop
//!
//! [`RuntimeBuilder::start`] performs the first render synchronously, so the
//! initial rendering is available as soon as it returns, then spawns the loop
//! on the tokio runtime. Each iteration waits on three sources at once:
//!
//! 1. side-effect failures, which end the loop with that error;
//! 2. new props from the host, which trigger a render;
//! 3. the next applied action anywhere in the tree.
//!
//! After an action is applied the loop optionally batches further actions
//! (see [`RenderMode`] and [`RuntimeConfig::conflate_stale_renderings`]),
//! renders, publishes the rendering and a snapshot, and finally hands any
//! output to the host callback. Renderings are published before output so a
//! host reacting to output already sees the post-action rendering.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::poll_fn;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::action::ActionApplied;
use crate::error::{Error, Result};
use crate::graph::{RuntimeScope, WorkflowNode};
use crate::identity::SessionIdCounter;
use crate::interceptor::{InterceptorChain, WorkflowInterceptor};
use crate::runtime::{RenderMode, RuntimeConfig};
use crate::snapshot::TreeSnapshot;
use crate::workflow::Workflow;

/// A rendering and the snapshot taken right after it.
#[derive(Debug, Clone)]
pub struct RenderingAndSnapshot<R> {
    pub rendering: R,
    pub snapshot: TreeSnapshot,
}

/// Configures and starts a [`WorkflowRuntime`].
pub struct RuntimeBuilder<W: Workflow> {
    workflow: W,
    props: watch::Receiver<W::Props>,
    snapshot: Option<TreeSnapshot>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
    config: RuntimeConfig,
    ids: SessionIdCounter,
    handle: Option<Handle>,
}

impl<W> RuntimeBuilder<W>
where
    W: Workflow,
    W::Rendering: Sync,
{
    pub fn new(workflow: W, props: watch::Receiver<W::Props>) -> Self {
        Self {
            workflow,
            props,
            snapshot: None,
            interceptors: Vec::new(),
            config: RuntimeConfig::default(),
            ids: SessionIdCounter::new(),
            handle: None,
        }
    }

    /// Restore the tree from a snapshot taken by an earlier runtime.
    pub fn with_snapshot(mut self, snapshot: TreeSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Append an interceptor. The first one added is the outermost.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn WorkflowInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_interceptors(mut self, interceptors: Vec<Arc<dyn WorkflowInterceptor>>) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Allocate session ids from `ids` instead of a fresh counter.
    pub fn with_session_ids(mut self, ids: SessionIdCounter) -> Self {
        self.ids = ids;
        self
    }

    /// Spawn the loop and side effects on `handle` instead of the current
    /// runtime.
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Render the root once and spawn the driver loop. `on_output` is awaited
    /// for every output the root emits; an error from it ends the loop.
    pub fn start<F, Fut>(self, on_output: F) -> Result<WorkflowRuntime<W>>
    where
        F: FnMut(W::Output) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| Error::NoRuntime {
                operation: "start",
            })?,
        };
        let config = self.config;
        let scope = RuntimeScope::with_handle(
            self.ids,
            InterceptorChain::new(self.interceptors),
            config,
            handle.clone(),
        );
        let failures = scope.take_failures().ok_or(Error::AlreadyCompleted {
            what: "runtime failure channel",
        })?;

        let mut props = self.props;
        let initial_props = props.borrow_and_update().clone();
        let mut root =
            WorkflowNode::new(self.workflow, initial_props.clone(), self.snapshot, scope)?;
        let rendering = root.render(initial_props.clone())?;
        let snapshot = root.snapshot()?;
        let (renderings_tx, renderings) = watch::channel(RenderingAndSnapshot {
            rendering,
            snapshot,
        });

        info!(session = %root.session(), ?config, "workflow runtime started");
        let driver = Driver {
            root,
            props,
            current_props: initial_props,
            failures,
            renderings: renderings_tx,
            config,
            on_output,
        };
        let task = handle.spawn(driver.run());
        Ok(WorkflowRuntime { renderings, task })
    }

    /// Start without listening to output.
    pub fn start_ignoring_output(self) -> Result<WorkflowRuntime<W>> {
        self.start(|_| std::future::ready(Ok(())))
    }
}

/// Start `workflow` on the current tokio runtime.
pub fn render_workflow_in<W, F, Fut>(
    workflow: W,
    props: watch::Receiver<W::Props>,
    snapshot: Option<TreeSnapshot>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
    config: RuntimeConfig,
    on_output: F,
) -> Result<WorkflowRuntime<W>>
where
    W: Workflow,
    W::Rendering: Sync,
    F: FnMut(W::Output) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut builder = RuntimeBuilder::new(workflow, props)
        .with_interceptors(interceptors)
        .with_config(config);
    if let Some(snapshot) = snapshot {
        builder = builder.with_snapshot(snapshot);
    }
    builder.start(on_output)
}

/// A running root workflow.
///
/// The handle owns the loop: dropping it cancels the loop and tears the tree
/// down, exactly like [`cancel`](WorkflowRuntime::cancel).
pub struct WorkflowRuntime<W: Workflow> {
    renderings: watch::Receiver<RenderingAndSnapshot<W::Rendering>>,
    task: JoinHandle<Result<()>>,
}

impl<W: Workflow> WorkflowRuntime<W> {
    /// A receiver that observes every published rendering.
    pub fn renderings(&self) -> watch::Receiver<RenderingAndSnapshot<W::Rendering>> {
        self.renderings.clone()
    }

    /// The most recently published rendering.
    pub fn current(&self) -> watch::Ref<'_, RenderingAndSnapshot<W::Rendering>> {
        self.renderings.borrow()
    }

    /// Stop the loop. The tree is torn down as the task is dropped.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end. Cancellation counts as a clean exit.
    pub async fn join(mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }
}

impl<W: Workflow> Drop for WorkflowRuntime<W> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum LoopEvent<O> {
    Failed(Error),
    PropsChanged,
    PropsClosed,
    Applied(ActionApplied<O>),
}

struct Driver<W: Workflow, F> {
    root: WorkflowNode<W>,
    props: watch::Receiver<W::Props>,
    current_props: W::Props,
    failures: mpsc::UnboundedReceiver<Error>,
    renderings: watch::Sender<RenderingAndSnapshot<W::Rendering>>,
    config: RuntimeConfig,
    on_output: F,
}

impl<W, F, Fut> Driver<W, F>
where
    W: Workflow,
    W::Rendering: Sync,
    F: FnMut(W::Output) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        if let Err(err) = &result {
            error!(session = %self.root.session(), error = %err, "workflow runtime stopped");
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let mut props_open = true;
        loop {
            let event = tokio::select! {
                biased;

                Some(failure) = self.failures.recv() => LoopEvent::Failed(failure),
                changed = self.props.changed(), if props_open => match changed {
                    Ok(()) => LoopEvent::PropsChanged,
                    Err(_) => LoopEvent::PropsClosed,
                },
                applied = poll_fn(|cx| self.root.poll_next_action(cx)) => {
                    LoopEvent::Applied(applied)
                }
            };

            let mut applied = match event {
                LoopEvent::Failed(failure) => return Err(failure),
                LoopEvent::PropsClosed => {
                    debug!("props channel closed, keeping last props");
                    props_open = false;
                    continue;
                }
                LoopEvent::PropsChanged => {
                    self.current_props = self.props.borrow_and_update().clone();
                    ActionApplied {
                        output: None,
                        state_changed: true,
                    }
                }
                LoopEvent::Applied(applied) => applied,
            };

            self.batch(&mut applied).await;

            if applied.state_changed || !self.config.render_only_when_state_changes {
                self.render_and_publish()?;
            }
            if let Some(output) = applied.output {
                (self.on_output)(output).await?;
            }
        }
    }

    /// Fold further ready actions into `applied` until one produces output.
    async fn batch(&mut self, applied: &mut ActionApplied<W::Output>) {
        if let RenderMode::FrameTimeout { frame } = self.config.mode {
            let deadline = Instant::now() + frame;
            while applied.output.is_none() {
                let root = &mut self.root;
                let next = poll_fn(|cx| root.poll_next_action(cx));
                match tokio::time::timeout_at(deadline, next).await {
                    Ok(next) => merge(applied, next),
                    Err(_) => break,
                }
            }
        }

        if self.config.conflate_stale_renderings {
            while applied.output.is_none() {
                match self.root.try_next_action() {
                    Some(next) => merge(applied, next),
                    None => break,
                }
            }
        }
    }

    fn render_and_publish(&mut self) -> Result<()> {
        let rendering = self.root.render(self.current_props.clone())?;
        let snapshot = self.root.snapshot()?;
        self.renderings.send_replace(RenderingAndSnapshot {
            rendering,
            snapshot,
        });
        Ok(())
    }
}

fn merge<O>(applied: &mut ActionApplied<O>, next: ActionApplied<O>) {
    applied.state_changed |= next.state_changed;
    applied.output = next.output;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EventHandler, RenderContext};
    use crate::snapshot::Snapshot;

    struct Toggle;

    impl Workflow for Toggle {
        type Props = ();
        type State = bool;
        type Output = ();
        type Rendering = (bool, EventHandler<()>);

        fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<bool> {
            Ok(false)
        }

        fn render(
            &self,
            ctx: &mut RenderContext<'_, Self>,
            _: &(),
            on: &bool,
        ) -> Result<(bool, EventHandler<()>)> {
            let flip = ctx.event_handler("flip", |updater, ()| {
                let on = *updater.state();
                updater.set_state(!on);
            })?;
            Ok((*on, flip))
        }
    }

    #[test]
    fn starting_outside_a_runtime_fails() {
        let (_tx, props) = watch::channel(());
        let err = RuntimeBuilder::new(Toggle, props).start_ignoring_output().err().unwrap();
        assert!(matches!(err, Error::NoRuntime { operation: "start" }));
    }

    #[tokio::test]
    async fn closed_props_channel_keeps_the_loop_running() {
        let (props_tx, props) = watch::channel(());
        let runtime = render_workflow_in(
            Toggle,
            props,
            None,
            Vec::new(),
            RuntimeConfig::default(),
            |_| std::future::ready(Ok(())),
        )
        .unwrap();
        drop(props_tx);

        let flip = runtime.current().rendering.1.clone();
        flip.call(()).unwrap();

        runtime.renderings().wait_for(|r| r.rendering.0).await.unwrap();
        assert!(!runtime.is_finished());
        runtime.cancel();
        runtime.join().await.unwrap();
    }

    #[tokio::test]
    async fn session_ids_come_from_the_supplied_counter() {
        let (_tx, props) = watch::channel(());
        let ids = SessionIdCounter::starting_at(100);
        let runtime = RuntimeBuilder::new(Toggle, props)
            .with_session_ids(ids.clone())
            .start_ignoring_output()
            .unwrap();

        assert_eq!(ids.next_id(), 101);
        runtime.cancel();
    }
}
