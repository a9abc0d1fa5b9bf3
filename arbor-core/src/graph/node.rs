//! Workflow Node
//!
//! A [`WorkflowNode`] is one running instance of a workflow: its current
//! props and state, its children, its side effects, and the queue of actions
//! sent to it. Nodes form a tree that mirrors the most recent render pass.
//!
//! # Render Pass
//!
//! 1. If the props differ from the last ones seen, `on_props_changed` runs.
//! 2. A fresh [`RenderContext`] is built and the workflow renders through it.
//! 3. The context is frozen, whether the render succeeded or not.
//! 4. Children and side effects not requested by this pass are torn down.
//! 5. Newly declared side effects are started.
//!
//! A pass that fails is rolled back instead of committed: every child and
//! side effect the node had before the pass stays alive.
//!
//! # Event Delivery
//!
//! [`WorkflowNode::poll_next_action`] waits on the whole subtree at once.
//! Children are polled before the node's own queue, in render order, so when
//! several sources are ready at the same time the first-rendered child wins
//! and the node's own actions come last. Output from a child is turned into
//! an action on this node by the child's handler and applied immediately.

use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::action::{Action, ActionApplied};
use crate::context::{ActionSink, FreezeFlag, RenderContext};
use crate::error::{Error, Result};
use crate::graph::active_staging::ActiveStagingList;
use crate::graph::scope::RuntimeScope;
use crate::graph::side_effect::SideEffectNode;
use crate::graph::subtree::SubtreeManager;
use crate::interceptor::{
    downcast_box, downcast_mut, downcast_ref, BoxedValue, InterceptorChain, WorkflowSession,
};
use crate::snapshot::{Snapshot, TreeSnapshot};
use crate::workflow::Workflow;

/// A running workflow instance and its subtree.
pub struct WorkflowNode<W: Workflow> {
    session: Arc<WorkflowSession>,
    workflow: W,
    props: W::Props,
    state: W::State,
    subtree: SubtreeManager<W>,
    side_effects: ActiveStagingList<SideEffectNode>,
    sender: mpsc::UnboundedSender<Action<W>>,
    receiver: mpsc::UnboundedReceiver<Action<W>>,
    /// Freeze flag of the most recent render context.
    last_frozen: Option<FreezeFlag>,
    scope: RuntimeScope,
    cancelled: bool,
}

impl<W: Workflow> WorkflowNode<W> {
    /// Create a root node, restoring the whole tree from `snapshot` if given.
    pub fn new(
        workflow: W,
        props: W::Props,
        snapshot: Option<TreeSnapshot>,
        scope: RuntimeScope,
    ) -> Result<Self> {
        Self::create(workflow, props, snapshot, "", None, scope)
    }

    pub(crate) fn create(
        workflow: W,
        props: W::Props,
        snapshot: Option<TreeSnapshot>,
        render_key: &str,
        parent: Option<Arc<WorkflowSession>>,
        scope: RuntimeScope,
    ) -> Result<Self> {
        let session = Arc::new(WorkflowSession::new(
            workflow.identity(),
            render_key,
            scope.next_session_id(),
            parent,
            *scope.config(),
        ));
        scope.interceptors().session_started(&session);

        let (own_snapshot, child_snapshots) =
            snapshot.map(TreeSnapshot::into_parts).unwrap_or_default();
        let state = initial_state(
            &workflow,
            &props,
            own_snapshot.as_ref(),
            scope.interceptors(),
            &session,
        )?;
        debug!(session = %session, restored = own_snapshot.is_some(), "session started");

        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            subtree: SubtreeManager::new(child_snapshots, Arc::clone(&session), scope.clone()),
            session,
            workflow,
            props,
            state,
            side_effects: ActiveStagingList::new(),
            sender,
            receiver,
            last_frozen: None,
            scope,
            cancelled: false,
        })
    }

    pub fn session(&self) -> &Arc<WorkflowSession> {
        &self.session
    }

    /// Props seen by the most recent render pass.
    pub fn props(&self) -> &W::Props {
        &self.props
    }

    pub fn state(&self) -> &W::State {
        &self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Replace the workflow definition used by future calls.
    pub(crate) fn update_workflow(&mut self, workflow: W) {
        self.workflow = workflow;
    }

    /// Run one render pass with `props`.
    pub fn render(&mut self, props: W::Props) -> Result<W::Rendering> {
        if self.cancelled {
            return Err(Error::SessionCancelled {
                session: self.session.to_string(),
            });
        }
        if self.last_frozen.as_ref().is_some_and(|flag| !flag.is_frozen()) {
            return Err(Error::RenderReentered {
                session: self.session.to_string(),
            });
        }

        if props != self.props {
            props_changed(
                &self.workflow,
                &self.props,
                &props,
                &mut self.state,
                self.scope.interceptors(),
                &self.session,
            )?;
            self.props = props;
        }

        let frozen = FreezeFlag::default();
        self.last_frozen = Some(frozen.clone());
        let sink = ActionSink::new(
            self.sender.clone(),
            frozen,
            self.scope.interceptors().clone(),
            Arc::clone(&self.session),
        );
        let mut ctx = RenderContext::new(&mut self.subtree, &mut self.side_effects, sink);
        let rendering = render(
            &self.workflow,
            &mut ctx,
            &self.props,
            &self.state,
            self.scope.interceptors(),
            &self.session,
        );
        ctx.freeze();
        let rendering = match rendering {
            Ok(rendering) => rendering,
            Err(err) => {
                self.subtree.rollback();
                self.side_effects.rollback();
                return Err(err);
            }
        };

        self.subtree.commit();
        self.side_effects.commit(|mut effect| effect.cancel());
        for effect in self.side_effects.active_mut() {
            effect.start(&self.scope, &self.session)?;
        }
        trace!(session = %self.session, "rendered");
        Ok(rendering)
    }

    /// Snapshot this node and every snapshottable descendant.
    pub fn snapshot(&self) -> Result<TreeSnapshot> {
        let children = self.subtree.snapshot()?;
        let own = snapshot_state(
            &self.workflow,
            &self.state,
            self.scope.interceptors(),
            &self.session,
        )?;
        Ok(TreeSnapshot::new(own, children))
    }

    /// Apply `action` to this node's state.
    pub fn apply_action(&mut self, action: Action<W>) -> ActionApplied<W::Output> {
        trace!(session = %self.session, action = action.name(), "applying action");
        action.apply(&self.props, &mut self.state)
    }

    /// Wait for the next action anywhere in this subtree and apply it.
    pub fn poll_next_action(&mut self, cx: &mut Context<'_>) -> Poll<ActionApplied<W::Output>> {
        if self.cancelled {
            return Poll::Pending;
        }

        if let Poll::Ready(from_child) = self.subtree.poll_next_action(cx) {
            let applied = match from_child.output {
                Some(action) => {
                    let mut applied = self.apply_action(action);
                    applied.state_changed |= from_child.state_changed;
                    applied
                }
                None => ActionApplied {
                    output: None,
                    state_changed: from_child.state_changed,
                },
            };
            return Poll::Ready(applied);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(action)) => Poll::Ready(self.apply_action(action)),
            // The node holds a sender, so the queue only closes on cancel.
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    pub async fn next_action(&mut self) -> ActionApplied<W::Output> {
        futures_util::future::poll_fn(|cx| self.poll_next_action(cx)).await
    }

    /// Apply one action that is already waiting, without blocking.
    pub fn try_next_action(&mut self) -> Option<ActionApplied<W::Output>> {
        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        match self.poll_next_action(&mut cx) {
            Poll::Ready(applied) => Some(applied),
            Poll::Pending => None,
        }
    }

    /// Tear down this node and its whole subtree. Idempotent.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.subtree.cancel();
        for effect in self.side_effects.iter_all_mut() {
            effect.cancel();
        }
        self.receiver.close();
        debug!(session = %self.session, "session cancelled");
    }

    #[cfg(test)]
    pub(crate) fn child_ids(&self) -> Vec<crate::identity::WorkflowNodeId> {
        self.subtree.child_ids()
    }
}

impl<W: Workflow> Drop for WorkflowNode<W> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<W: Workflow> std::fmt::Debug for WorkflowNode<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowNode")
            .field("session", &self.session.to_string())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

fn initial_state<W: Workflow>(
    workflow: &W,
    props: &W::Props,
    snapshot: Option<&Snapshot>,
    interceptors: &InterceptorChain,
    session: &WorkflowSession,
) -> Result<W::State> {
    if interceptors.is_empty() {
        return workflow.initial_state(props, snapshot);
    }
    let mut proceed = |props: &dyn Any, snapshot: Option<&Snapshot>| -> Result<BoxedValue> {
        let props = downcast_ref::<W::Props>(props, "on_initial_state")?;
        Ok(Box::new(workflow.initial_state(props, snapshot)?))
    };
    downcast_box(
        interceptors.initial_state(0, props, snapshot, &mut proceed, session)?,
        "on_initial_state",
    )
}

fn props_changed<W: Workflow>(
    workflow: &W,
    old_props: &W::Props,
    new_props: &W::Props,
    state: &mut W::State,
    interceptors: &InterceptorChain,
    session: &WorkflowSession,
) -> Result<()> {
    if interceptors.is_empty() {
        return workflow.on_props_changed(old_props, new_props, state);
    }
    let mut proceed = |old: &dyn Any, new: &dyn Any, state: &mut dyn Any| -> Result<()> {
        workflow.on_props_changed(
            downcast_ref::<W::Props>(old, "on_props_changed")?,
            downcast_ref::<W::Props>(new, "on_props_changed")?,
            downcast_mut::<W::State>(state, "on_props_changed")?,
        )
    };
    interceptors.props_changed(0, old_props, new_props, state, &mut proceed, session)
}

fn render<W: Workflow>(
    workflow: &W,
    ctx: &mut RenderContext<'_, W>,
    props: &W::Props,
    state: &W::State,
    interceptors: &InterceptorChain,
    session: &WorkflowSession,
) -> Result<W::Rendering> {
    if interceptors.is_empty() {
        return workflow.render(ctx, props, state);
    }
    let mut proceed = |props: &dyn Any, state: &dyn Any| -> Result<BoxedValue> {
        let props = downcast_ref::<W::Props>(props, "on_render")?;
        let state = downcast_ref::<W::State>(state, "on_render")?;
        Ok(Box::new(workflow.render(&mut *ctx, props, state)?))
    };
    downcast_box(
        interceptors.render(0, props, state, &mut proceed, session)?,
        "on_render",
    )
}

fn snapshot_state<W: Workflow>(
    workflow: &W,
    state: &W::State,
    interceptors: &InterceptorChain,
    session: &WorkflowSession,
) -> Result<Option<Snapshot>> {
    if interceptors.is_empty() {
        return workflow.snapshot_state(state);
    }
    let mut proceed = |state: &dyn Any| -> Result<Option<Snapshot>> {
        workflow.snapshot_state(downcast_ref::<W::State>(state, "on_snapshot_state")?)
    };
    interceptors.snapshot_state(0, state, &mut proceed, session)
}
