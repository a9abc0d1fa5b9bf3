//! Interceptors
//!
//! A [`WorkflowInterceptor`] observes (and may alter) every lifecycle call the
//! runtime makes on a workflow, plus every call a workflow makes on its render
//! context. Each hook receives a `proceed` continuation with the same shape as
//! the intercepted call; an interceptor may call it once, skip it, call it
//! again, call it with different arguments, or post-process its result.
//!
//! # Composition
//!
//! Interceptors are applied left to right. Interceptor 0 is the outermost
//! wrapper: it is entered first and returns last. The `proceed` handed to
//! interceptor *i* enters interceptor *i + 1*; the last one reaches the real
//! workflow. An empty chain is skipped entirely by the node, so workflows pay
//! nothing for the mechanism when no interceptor is installed.
//!
//! Because one interceptor serves workflows of every type, props, state,
//! renderings, actions and child workflows cross the hooks as [`Any`] values.
//! Handing the continuation a value of a different type than the workflow
//! expects fails with [`Error::InterceptorTypeMismatch`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::action::Action;
use crate::error::{Error, Result};
use crate::identity::{WorkflowIdentity, WorkflowNodeId};
use crate::runtime::RuntimeConfig;
use crate::snapshot::Snapshot;
use crate::workflow::Workflow;

/// Type-erased state or rendering passed through interceptor hooks.
pub type BoxedValue = Box<dyn Any + Send>;

/// Body of a side effect.
pub type SideEffectFuture = BoxFuture<'static, Result<()>>;

/// Maps output of child `C` into an action of parent `P`. This is the
/// concrete type behind the `handler` of [`WorkflowInterceptor::on_render_child`].
pub type OutputHandler<C, P> = Box<dyn Fn(<C as Workflow>::Output) -> Action<P> + Send>;

pub type InitialStateProceed<'a> =
    dyn FnMut(&dyn Any, Option<&Snapshot>) -> Result<BoxedValue> + 'a;
pub type PropsChangedProceed<'a> = dyn FnMut(&dyn Any, &dyn Any, &mut dyn Any) -> Result<()> + 'a;
pub type RenderProceed<'a> = dyn FnMut(&dyn Any, &dyn Any) -> Result<BoxedValue> + 'a;
pub type SnapshotStateProceed<'a> = dyn FnMut(&dyn Any) -> Result<Option<Snapshot>> + 'a;
pub type ActionSentProceed<'a> = dyn FnMut(BoxedValue) -> Result<()> + 'a;
pub type SideEffectProceed<'a> = dyn FnMut(&str, SideEffectFuture) -> Result<()> + 'a;
pub type RenderChildProceed<'a> =
    dyn FnMut(BoxedValue, &dyn Any, &str, BoxedValue) -> Result<BoxedValue> + 'a;

/// Everything an interceptor knows about a running node.
#[derive(Debug)]
pub struct WorkflowSession {
    identity: WorkflowIdentity,
    render_key: String,
    session_id: u64,
    parent: Option<Arc<WorkflowSession>>,
    config: RuntimeConfig,
}

impl WorkflowSession {
    pub(crate) fn new(
        identity: WorkflowIdentity,
        render_key: impl Into<String>,
        session_id: u64,
        parent: Option<Arc<WorkflowSession>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            identity,
            render_key: render_key.into(),
            session_id,
            parent,
            config,
        }
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    pub fn render_key(&self) -> &str {
        &self.render_key
    }

    /// Runtime-unique id, assigned once when the node is created.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Session of the parent node; `None` for the root.
    pub fn parent(&self) -> Option<&Arc<WorkflowSession>> {
        self.parent.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn node_id(&self) -> WorkflowNodeId {
        WorkflowNodeId::new(self.identity, self.render_key.clone())
    }
}

impl fmt::Display for WorkflowSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node_id(), self.session_id)
    }
}

/// Cross-cutting hooks around workflow lifecycle and render-context calls.
///
/// Every method has a pass-through default, so implementors only override
/// what they care about.
#[allow(unused_variables)]
pub trait WorkflowInterceptor: Send + Sync {
    /// A node was created. Called before its initial state is computed.
    fn on_session_started(&self, session: &WorkflowSession) {}

    fn on_initial_state(
        &self,
        props: &dyn Any,
        snapshot: Option<&Snapshot>,
        proceed: &mut InitialStateProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        proceed(props, snapshot)
    }

    fn on_props_changed(
        &self,
        old_props: &dyn Any,
        new_props: &dyn Any,
        state: &mut dyn Any,
        proceed: &mut PropsChangedProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        proceed(old_props, new_props, state)
    }

    fn on_render(
        &self,
        props: &dyn Any,
        state: &dyn Any,
        proceed: &mut RenderProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        proceed(props, state)
    }

    fn on_snapshot_state(
        &self,
        state: &dyn Any,
        proceed: &mut SnapshotStateProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<Option<Snapshot>> {
        proceed(state)
    }

    /// An action is being sent to the node's queue. `action` holds the
    /// node's `Action<W>` and `name` is its name as sent. Every call to
    /// `proceed` enqueues the action it is handed; not calling it drops the
    /// send.
    fn on_action_sent(
        &self,
        name: &str,
        action: BoxedValue,
        proceed: &mut ActionSentProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        proceed(action)
    }

    /// A side effect is being declared. The body may be wrapped before it is
    /// handed on.
    fn on_side_effect_running(
        &self,
        key: &str,
        effect: SideEffectFuture,
        proceed: &mut SideEffectProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        proceed(key, effect)
    }

    /// A child is being rendered into slot `child`. `workflow` holds the
    /// child workflow and `handler` its [`OutputHandler`]; `proceed` takes
    /// them back together with the props and the render key.
    fn on_render_child(
        &self,
        child: &WorkflowNodeId,
        workflow: BoxedValue,
        props: &dyn Any,
        handler: BoxedValue,
        proceed: &mut RenderChildProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        proceed(workflow, props, child.key(), handler)
    }
}

/// Ordered list of interceptors, composed once per runtime.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn WorkflowInterceptor>]>,
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn WorkflowInterceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub(crate) fn session_started(&self, session: &WorkflowSession) {
        for interceptor in self.interceptors.iter() {
            interceptor.on_session_started(session);
        }
    }

    pub(crate) fn initial_state(
        &self,
        index: usize,
        props: &dyn Any,
        snapshot: Option<&Snapshot>,
        proceed: &mut InitialStateProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        match self.interceptors.get(index) {
            None => proceed(props, snapshot),
            Some(interceptor) => interceptor.on_initial_state(
                props,
                snapshot,
                &mut |props: &dyn Any, snapshot: Option<&Snapshot>| {
                    self.initial_state(index + 1, props, snapshot, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    pub(crate) fn props_changed(
        &self,
        index: usize,
        old_props: &dyn Any,
        new_props: &dyn Any,
        state: &mut dyn Any,
        proceed: &mut PropsChangedProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        match self.interceptors.get(index) {
            None => proceed(old_props, new_props, state),
            Some(interceptor) => interceptor.on_props_changed(
                old_props,
                new_props,
                state,
                &mut |old: &dyn Any, new: &dyn Any, state: &mut dyn Any| {
                    self.props_changed(index + 1, old, new, state, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    pub(crate) fn render(
        &self,
        index: usize,
        props: &dyn Any,
        state: &dyn Any,
        proceed: &mut RenderProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        match self.interceptors.get(index) {
            None => proceed(props, state),
            Some(interceptor) => interceptor.on_render(
                props,
                state,
                &mut |props: &dyn Any, state: &dyn Any| {
                    self.render(index + 1, props, state, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    pub(crate) fn snapshot_state(
        &self,
        index: usize,
        state: &dyn Any,
        proceed: &mut SnapshotStateProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<Option<Snapshot>> {
        match self.interceptors.get(index) {
            None => proceed(state),
            Some(interceptor) => interceptor.on_snapshot_state(
                state,
                &mut |state: &dyn Any| {
                    self.snapshot_state(index + 1, state, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    pub(crate) fn action_sent(
        &self,
        index: usize,
        name: &str,
        action: BoxedValue,
        proceed: &mut ActionSentProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        match self.interceptors.get(index) {
            None => proceed(action),
            Some(interceptor) => interceptor.on_action_sent(
                name,
                action,
                &mut |action: BoxedValue| {
                    self.action_sent(index + 1, name, action, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    pub(crate) fn side_effect_running(
        &self,
        index: usize,
        key: &str,
        effect: SideEffectFuture,
        proceed: &mut SideEffectProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<()> {
        match self.interceptors.get(index) {
            None => proceed(key, effect),
            Some(interceptor) => interceptor.on_side_effect_running(
                key,
                effect,
                &mut |key: &str, effect: SideEffectFuture| {
                    self.side_effect_running(index + 1, key, effect, &mut *proceed, session)
                },
                session,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn render_child(
        &self,
        index: usize,
        child: &WorkflowNodeId,
        workflow: BoxedValue,
        props: &dyn Any,
        handler: BoxedValue,
        proceed: &mut RenderChildProceed<'_>,
        session: &WorkflowSession,
    ) -> Result<BoxedValue> {
        match self.interceptors.get(index) {
            None => proceed(workflow, props, child.key(), handler),
            Some(interceptor) => interceptor.on_render_child(
                child,
                workflow,
                props,
                handler,
                &mut |workflow: BoxedValue, props: &dyn Any, key: &str, handler: BoxedValue| {
                    let slot = WorkflowNodeId::new(*child.identity(), key);
                    self.render_child(
                        index + 1,
                        &slot,
                        workflow,
                        props,
                        handler,
                        &mut *proceed,
                        session,
                    )
                },
                session,
            ),
        }
    }
}

pub(crate) fn downcast_ref<'a, T: 'static>(
    value: &'a dyn Any,
    hook: &'static str,
) -> Result<&'a T> {
    value
        .downcast_ref::<T>()
        .ok_or(Error::InterceptorTypeMismatch {
            hook,
            expected: std::any::type_name::<T>(),
        })
}

pub(crate) fn downcast_mut<'a, T: 'static>(
    value: &'a mut dyn Any,
    hook: &'static str,
) -> Result<&'a mut T> {
    value
        .downcast_mut::<T>()
        .ok_or(Error::InterceptorTypeMismatch {
            hook,
            expected: std::any::type_name::<T>(),
        })
}

pub(crate) fn downcast_box<T: 'static>(value: BoxedValue, hook: &'static str) -> Result<T> {
    value
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| Error::InterceptorTypeMismatch {
            hook,
            expected: std::any::type_name::<T>(),
        })
}
