//! The workflow SPI.
//!
//! A [`Workflow`] is a pure description: how to build initial state, how to
//! react to new props, how to render, and how to snapshot. Running instances
//! are [`WorkflowNode`](crate::graph::WorkflowNode)s owned by the runtime.

use crate::context::RenderContext;
use crate::error::Result;
use crate::identity::WorkflowIdentity;
use crate::snapshot::Snapshot;

/// Definition of a stateful node in the workflow tree.
///
/// # Example
///
/// ```rust,ignore
/// struct Counter;
///
/// impl Workflow for Counter {
///     type Props = ();
///     type State = u32;
///     type Output = ();
///     type Rendering = String;
///
///     fn initial_state(&self, _: &(), snapshot: Option<&Snapshot>) -> Result<u32> {
///         snapshot.map(Snapshot::decode).transpose().map(Option::unwrap_or_default)
///     }
///
///     fn render(&self, ctx: &mut RenderContext<'_, Self>, _: &(), count: &u32) -> Result<String> {
///         let _increment = ctx.event_handler("increment", |updater, ()| {
///             *updater.state_mut() += 1;
///         })?;
///         Ok(format!("count: {count}"))
///     }
///
///     fn snapshot_state(&self, count: &u32) -> Result<Option<Snapshot>> {
///         Snapshot::encode(count).map(Some)
///     }
/// }
/// ```
pub trait Workflow: Send + Sized + 'static {
    /// Input supplied by the parent (or the host, for the root).
    type Props: Clone + PartialEq + Send + Sync + 'static;

    /// Private state, opaque to the runtime.
    type State: Send + 'static;

    /// Value emitted to the parent when an action produces output.
    type Output: Send + 'static;

    /// Value produced by a render pass.
    type Rendering: Send + 'static;

    /// Identity used to match this workflow against the previous render pass.
    fn identity(&self) -> WorkflowIdentity {
        WorkflowIdentity::of::<Self>()
    }

    /// Build the state for a new node, restoring from `snapshot` when given.
    fn initial_state(&self, props: &Self::Props, snapshot: Option<&Snapshot>)
        -> Result<Self::State>;

    /// Called before a render pass whose props differ from the last ones seen.
    fn on_props_changed(
        &self,
        _old_props: &Self::Props,
        _new_props: &Self::Props,
        _state: &mut Self::State,
    ) -> Result<()> {
        Ok(())
    }

    /// Compute the rendering. Must not mutate anything outside `ctx`.
    fn render(
        &self,
        ctx: &mut RenderContext<'_, Self>,
        props: &Self::Props,
        state: &Self::State,
    ) -> Result<Self::Rendering>;

    /// Serialize the state, or `None` if it should not be persisted.
    fn snapshot_state(&self, _state: &Self::State) -> Result<Option<Snapshot>> {
        Ok(None)
    }
}
