//! Subtree Coordinator
//!
//! Owns the children of one node. Each render pass re-requests the children
//! it wants through [`SubtreeManager::render_child`]; children are matched by
//! node id (workflow identity plus render key) against the previous pass, so
//! a child rendered again keeps its state and a child no longer rendered is
//! torn down when the pass commits.
//!
//! Children of every workflow type live in one list behind the [`ChildNode`]
//! trait. Output from a child is mapped into an action of the parent by the
//! handler supplied on the most recent render.

use std::any::Any;
use std::sync::Arc;
use std::task::{Context, Poll};

use indexmap::IndexMap;
use tracing::debug;

use crate::action::{Action, ActionApplied};
use crate::error::{Error, Result};
use crate::graph::active_staging::ActiveStagingList;
use crate::graph::node::WorkflowNode;
use crate::graph::scope::RuntimeScope;
use crate::identity::WorkflowNodeId;
use crate::interceptor::{OutputHandler, WorkflowSession};
use crate::snapshot::{SnapshotKey, TreeSnapshot};
use crate::workflow::Workflow;

/// A child node as seen by a parent of type `P`.
pub(crate) trait ChildNode<P: Workflow>: Send {
    fn id(&self) -> &WorkflowNodeId;

    /// Poll the child's subtree for one applied action. Child output comes
    /// back already mapped into a parent action.
    fn poll_next_action(&mut self, cx: &mut Context<'_>) -> Poll<ActionApplied<Action<P>>>;

    fn snapshot(&self) -> Result<TreeSnapshot>;

    fn cancel(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct WorkflowChildNode<C: Workflow, P: Workflow> {
    id: WorkflowNodeId,
    node: WorkflowNode<C>,
    handler: OutputHandler<C, P>,
}

impl<C: Workflow, P: Workflow> ChildNode<P> for WorkflowChildNode<C, P> {
    fn id(&self) -> &WorkflowNodeId {
        &self.id
    }

    fn poll_next_action(&mut self, cx: &mut Context<'_>) -> Poll<ActionApplied<Action<P>>> {
        let handler = &self.handler;
        self.node
            .poll_next_action(cx)
            .map(|applied| applied.map_output(|output| handler(output)))
    }

    fn snapshot(&self) -> Result<TreeSnapshot> {
        self.node.snapshot()
    }

    fn cancel(&mut self) {
        self.node.cancel();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) struct SubtreeManager<P: Workflow> {
    children: ActiveStagingList<Box<dyn ChildNode<P>>>,
    /// Child snapshots waiting for their slot to be rendered. Dropped after
    /// the first commit.
    snapshot_cache: Option<IndexMap<SnapshotKey, TreeSnapshot>>,
    session: Arc<WorkflowSession>,
    scope: RuntimeScope,
}

impl<P: Workflow> SubtreeManager<P> {
    pub(crate) fn new(
        child_snapshots: Vec<(SnapshotKey, TreeSnapshot)>,
        session: Arc<WorkflowSession>,
        scope: RuntimeScope,
    ) -> Self {
        let snapshot_cache =
            (!child_snapshots.is_empty()).then(|| child_snapshots.into_iter().collect());
        Self {
            children: ActiveStagingList::new(),
            snapshot_cache,
            session,
            scope,
        }
    }

    /// Render `child` into the slot named by its identity and `key`, creating
    /// the child node if the previous pass had no such slot.
    pub(crate) fn render_child<C: Workflow>(
        &mut self,
        child: C,
        props: C::Props,
        key: &str,
        handler: OutputHandler<C, P>,
    ) -> Result<C::Rendering> {
        let id = WorkflowNodeId::new(child.identity(), key);
        if self.children.staging().iter().any(|staged| staged.id() == &id) {
            return Err(Error::DuplicateChildKey { id: id.to_string() });
        }

        let mut incoming = Some((child, handler));
        let cache = &mut self.snapshot_cache;
        let (session, scope) = (&self.session, &self.scope);
        let slot = self.children.try_retain_or_create(
            |existing| existing.id() == &id,
            || -> Result<Box<dyn ChildNode<P>>> {
                let (child, handler) = incoming
                    .take()
                    .ok_or(Error::AlreadyCompleted { what: "child workflow" })?;
                let snapshot = cache.as_mut().and_then(|cache| {
                    SnapshotKey::for_node(&id).and_then(|slot| cache.shift_remove(&slot))
                });
                debug!(
                    parent = %session,
                    child = %id,
                    restored = snapshot.is_some(),
                    "creating child"
                );
                let node = WorkflowNode::create(
                    child,
                    props.clone(),
                    snapshot,
                    id.key(),
                    Some(Arc::clone(session)),
                    scope.clone(),
                )?;
                Ok(Box::new(WorkflowChildNode {
                    id: id.clone(),
                    node,
                    handler,
                }))
            },
        )?;

        let child = slot
            .as_any_mut()
            .downcast_mut::<WorkflowChildNode<C, P>>()
            .ok_or_else(|| Error::IdentityMismatch { id: id.to_string() })?;
        if let Some((workflow, handler)) = incoming {
            child.handler = handler;
            child.node.update_workflow(workflow);
        }
        child.node.render(props)
    }

    /// Poll children in render order; the first one with an applied action
    /// wins.
    pub(crate) fn poll_next_action(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<ActionApplied<Action<P>>> {
        for child in self.children.active_mut() {
            if let Poll::Ready(applied) = child.poll_next_action(cx) {
                return Poll::Ready(applied);
            }
        }
        Poll::Pending
    }

    /// Snapshots of every snapshottable child, in render order.
    pub(crate) fn snapshot(&self) -> Result<Vec<(SnapshotKey, TreeSnapshot)>> {
        self.children
            .active()
            .iter()
            .filter_map(|child| {
                SnapshotKey::for_node(child.id())
                    .map(|slot| child.snapshot().map(|tree| (slot, tree)))
            })
            .collect()
    }

    /// Tear down every child the last pass did not render.
    pub(crate) fn commit(&mut self) {
        let session = &self.session;
        self.children.commit(|mut child| {
            debug!(parent = %session, child = %child.id(), "tearing down child");
            child.cancel();
        });
        self.snapshot_cache = None;
    }

    /// Undo a pass that failed before committing. Every child stays alive and
    /// the snapshot cache is kept for the next attempt.
    pub(crate) fn rollback(&mut self) {
        self.children.rollback();
    }

    pub(crate) fn cancel(&mut self) {
        for child in self.children.iter_all_mut() {
            child.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn child_ids(&self) -> Vec<WorkflowNodeId> {
        self.children.active().iter().map(|child| child.id().clone()).collect()
    }
}
