//! Render Context
//!
//! The capability object handed to [`Workflow::render`]. Everything a render
//! pass does besides computing its rendering goes through here: rendering
//! children, declaring side effects, and handing out sinks and event handlers
//! that send actions back to the node later.
//!
//! # Freezing
//!
//! A context belongs to exactly one render pass and is frozen when that pass
//! returns. The capability calls on the context are only legal before the
//! freeze and fail with [`Error::ContextFrozen`] afterwards. Sinks and event
//! handlers work the other way around: sending through them is only legal
//! after the freeze, and a send from inside the render pass fails with
//! [`Error::SendDuringRender`]. Render passes therefore never transition state.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::action::{Action, Updater};
use crate::error::{Error, Result};
use crate::graph::{ActiveStagingList, SideEffectNode, SubtreeManager};
use crate::identity::WorkflowNodeId;
use crate::interceptor::{
    downcast_box, downcast_ref, BoxedValue, InterceptorChain, OutputHandler, SideEffectFuture,
    WorkflowSession,
};
use crate::workflow::Workflow;

/// Shared "render pass is over" flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct FreezeFlag(Arc<AtomicBool>);

impl FreezeFlag {
    pub(crate) fn freeze(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Capabilities available to a workflow while it renders.
pub struct RenderContext<'a, W: Workflow> {
    subtree: &'a mut SubtreeManager<W>,
    side_effects: &'a mut ActiveStagingList<SideEffectNode>,
    sink: ActionSink<W>,
}

impl<'a, W: Workflow> RenderContext<'a, W> {
    pub(crate) fn new(
        subtree: &'a mut SubtreeManager<W>,
        side_effects: &'a mut ActiveStagingList<SideEffectNode>,
        sink: ActionSink<W>,
    ) -> Self {
        Self {
            subtree,
            side_effects,
            sink,
        }
    }

    /// Session of the node being rendered.
    pub fn session(&self) -> &WorkflowSession {
        &self.sink.session
    }

    pub fn is_frozen(&self) -> bool {
        self.sink.frozen.is_frozen()
    }

    pub(crate) fn freeze(&self) {
        self.sink.frozen.freeze();
    }

    fn ensure_unfrozen(&self, operation: &'static str) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::ContextFrozen { operation });
        }
        Ok(())
    }

    /// A sink for sending actions to this node once the render pass is over.
    pub fn action_sink(&self) -> Result<ActionSink<W>> {
        self.ensure_unfrozen("action_sink")?;
        Ok(self.sink.clone())
    }

    /// A handler that turns each event into an action named `name` running
    /// `update`.
    pub fn event_handler<E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        update: F,
    ) -> Result<EventHandler<E>>
    where
        E: Send + 'static,
        F: Fn(&mut Updater<'_, W>, E) + Send + Sync + 'static,
    {
        self.ensure_unfrozen("event_handler")?;
        let sink = self.sink.clone();
        let name = name.into();
        let update = Arc::new(update);
        Ok(EventHandler::new(name.clone(), move |event: E| {
            let update = Arc::clone(&update);
            sink.send(Action::new(name.clone(), move |updater| (*update)(updater, event)))
        }))
    }

    /// Render `child` in the slot named by its identity and `key`. Output
    /// from the child is turned into an action on this node by `handler`.
    pub fn render_child<C, H>(
        &mut self,
        child: C,
        props: C::Props,
        key: &str,
        handler: H,
    ) -> Result<C::Rendering>
    where
        C: Workflow,
        H: Fn(C::Output) -> Action<W> + Send + 'static,
    {
        self.ensure_unfrozen("render_child")?;
        let handler: OutputHandler<C, W> = Box::new(handler);
        let interceptors = &self.sink.interceptors;
        if interceptors.is_empty() {
            return self.subtree.render_child(child, props, key, handler);
        }

        let id = WorkflowNodeId::new(child.identity(), key);
        let subtree = &mut *self.subtree;
        let mut proceed = |workflow: BoxedValue,
                           props: &dyn Any,
                           key: &str,
                           handler: BoxedValue|
         -> Result<BoxedValue> {
            let workflow = downcast_box::<C>(workflow, "on_render_child")?;
            let props = downcast_ref::<C::Props>(props, "on_render_child")?.clone();
            let handler = downcast_box::<OutputHandler<C, W>>(handler, "on_render_child")?;
            Ok(Box::new(subtree.render_child(workflow, props, key, handler)?))
        };
        let rendering = interceptors.render_child(
            0,
            &id,
            Box::new(child),
            &props,
            Box::new(handler),
            &mut proceed,
            &self.sink.session,
        )?;
        downcast_box(rendering, "on_render_child")
    }

    /// Declare a side effect. A key declared on consecutive passes keeps its
    /// running task and the new `effect` is dropped unpolled.
    pub fn run_side_effect<F>(&mut self, key: &str, effect: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_unfrozen("run_side_effect")?;
        let effect: SideEffectFuture = Box::pin(effect);
        let interceptors = &self.sink.interceptors;
        let side_effects = &mut *self.side_effects;
        if interceptors.is_empty() {
            return declare_side_effect(side_effects, key, effect);
        }

        let mut proceed = |key: &str, effect: SideEffectFuture| -> Result<()> {
            declare_side_effect(side_effects, key, effect)
        };
        interceptors.side_effect_running(0, key, effect, &mut proceed, &self.sink.session)
    }

    /// Run `stream` as a side effect, sending one action per item.
    pub fn run_stream<S, F>(&mut self, key: &str, stream: S, to_action: F) -> Result<()>
    where
        S: Stream + Send + 'static,
        S::Item: Send + 'static,
        F: Fn(S::Item) -> Action<W> + Send + 'static,
    {
        self.ensure_unfrozen("run_stream")?;
        let sink = self.sink.clone();
        self.run_side_effect(key, async move {
            futures_util::pin_mut!(stream);
            while let Some(item) = stream.next().await {
                sink.send(to_action(item))?;
            }
            Ok(())
        })
    }
}

fn declare_side_effect(
    side_effects: &mut ActiveStagingList<SideEffectNode>,
    key: &str,
    effect: SideEffectFuture,
) -> Result<()> {
    if side_effects.staging().iter().any(|staged| staged.key() == key) {
        return Err(Error::DuplicateSideEffectKey {
            key: key.to_string(),
        });
    }
    side_effects.retain_or_create(
        |existing| existing.key() == key,
        || SideEffectNode::new(key, effect),
    );
    Ok(())
}

/// Sends actions to one node. Cheap to clone and usable from any thread.
pub struct ActionSink<W: Workflow> {
    sender: mpsc::UnboundedSender<Action<W>>,
    frozen: FreezeFlag,
    interceptors: InterceptorChain,
    session: Arc<WorkflowSession>,
}

impl<W: Workflow> ActionSink<W> {
    pub(crate) fn new(
        sender: mpsc::UnboundedSender<Action<W>>,
        frozen: FreezeFlag,
        interceptors: InterceptorChain,
        session: Arc<WorkflowSession>,
    ) -> Self {
        Self {
            sender,
            frozen,
            interceptors,
            session,
        }
    }

    /// Enqueue `action` on the node. Actions sent to a node that has been
    /// torn down are dropped.
    pub fn send(&self, action: Action<W>) -> Result<()> {
        if !self.frozen.is_frozen() {
            return Err(Error::SendDuringRender {
                action: action.name().to_string(),
            });
        }
        if self.interceptors.is_empty() {
            self.enqueue(action);
            return Ok(());
        }

        let name = action.name().to_string();
        let mut proceed = |action: BoxedValue| -> Result<()> {
            self.enqueue(downcast_box::<Action<W>>(action, "on_action_sent")?);
            Ok(())
        };
        self.interceptors
            .action_sent(0, &name, Box::new(action), &mut proceed, &self.session)
    }

    fn enqueue(&self, action: Action<W>) {
        if let Err(mpsc::error::SendError(action)) = self.sender.send(action) {
            debug!(
                session = %self.session,
                action = action.name(),
                "dropping action for torn down session"
            );
        }
    }
}

impl<W: Workflow> Clone for ActionSink<W> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            frozen: self.frozen.clone(),
            interceptors: self.interceptors.clone(),
            session: Arc::clone(&self.session),
        }
    }
}

impl<W: Workflow> fmt::Debug for ActionSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSink")
            .field("session", &self.session.to_string())
            .field("frozen", &self.frozen.is_frozen())
            .finish()
    }
}

/// Callback handed out in renderings. Each call sends one action.
pub struct EventHandler<E> {
    name: Cow<'static, str>,
    send: Arc<dyn Fn(E) -> Result<()> + Send + Sync>,
}

impl<E> EventHandler<E> {
    fn new<F>(name: Cow<'static, str>, send: F) -> Self
    where
        F: Fn(E) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name,
            send: Arc::new(send),
        }
    }

    pub fn call(&self, event: E) -> Result<()> {
        (self.send)(event)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<E> Clone for EventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            send: Arc::clone(&self.send),
        }
    }
}

impl<E> fmt::Debug for EventHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RuntimeScope, WorkflowNode};
    use crate::snapshot::Snapshot;

    fn node<W: Workflow>(workflow: W, props: W::Props) -> WorkflowNode<W> {
        WorkflowNode::new(workflow, props, None, RuntimeScope::default()).unwrap()
    }

    struct SendsWhileRendering;

    impl Workflow for SendsWhileRendering {
        type Props = ();
        type State = ();
        type Output = ();
        type Rendering = ();

        fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<()> {
            Ok(())
        }

        fn render(&self, ctx: &mut RenderContext<'_, Self>, _: &(), _: &()) -> Result<()> {
            ctx.action_sink()?.send(Action::new("too early", |_| {}))
        }
    }

    #[test]
    fn sending_during_render_is_rejected() {
        let err = node(SendsWhileRendering, ()).render(()).unwrap_err();
        assert!(matches!(err, Error::SendDuringRender { ref action } if action == "too early"));
    }

    struct UsesFrozenContext;

    impl Workflow for UsesFrozenContext {
        type Props = ();
        type State = ();
        type Output = ();
        type Rendering = Vec<String>;

        fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<()> {
            Ok(())
        }

        fn render(&self, ctx: &mut RenderContext<'_, Self>, _: &(), _: &()) -> Result<Vec<String>> {
            ctx.freeze();
            let failures = vec![
                ctx.action_sink().map(|_| ()),
                ctx.event_handler("noop", |_, ()| {}).map(|_| ()),
                ctx.run_side_effect("effect", async { Ok(()) }),
                ctx.render_child(SendsWhileRendering, (), "child", |()| Action::noop())
                    .map(|_| ()),
            ];
            Ok(failures
                .into_iter()
                .filter_map(|result| match result {
                    Err(Error::ContextFrozen { operation }) => Some(operation.to_string()),
                    _ => None,
                })
                .collect())
        }
    }

    #[test]
    fn capabilities_fail_once_frozen() {
        let rendering = node(UsesFrozenContext, ()).render(()).unwrap();
        assert_eq!(
            rendering,
            vec!["action_sink", "event_handler", "run_side_effect", "render_child"]
        );
    }

    struct DuplicateEffects;

    impl Workflow for DuplicateEffects {
        type Props = ();
        type State = ();
        type Output = ();
        type Rendering = ();

        fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<()> {
            Ok(())
        }

        fn render(&self, ctx: &mut RenderContext<'_, Self>, _: &(), _: &()) -> Result<()> {
            ctx.run_side_effect("same", async { Ok(()) })?;
            ctx.run_side_effect("same", async { Ok(()) })
        }
    }

    #[test]
    fn duplicate_side_effect_key_names_the_key() {
        let err = node(DuplicateEffects, ()).render(()).unwrap_err();
        assert!(matches!(err, Error::DuplicateSideEffectKey { .. }));
        assert!(err.to_string().contains("\"same\""));
    }

    struct Notify(mpsc::UnboundedSender<&'static str>);

    impl Drop for Notify {
        fn drop(&mut self) {
            let _ = self.0.send("stopped");
        }
    }

    /// Runs a worker side effect while its props are `true`.
    struct Worker {
        events: mpsc::UnboundedSender<&'static str>,
    }

    impl Workflow for Worker {
        type Props = bool;
        type State = ();
        type Output = ();
        type Rendering = ();

        fn initial_state(&self, _: &bool, _: Option<&Snapshot>) -> Result<()> {
            Ok(())
        }

        fn render(&self, ctx: &mut RenderContext<'_, Self>, running: &bool, _: &()) -> Result<()> {
            if *running {
                let events = self.events.clone();
                ctx.run_side_effect("worker", async move {
                    let _notify = Notify(events.clone());
                    let _ = events.send("started");
                    std::future::pending::<()>().await;
                    Ok(())
                })?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn side_effect_survives_rerender_and_stops_when_dropped() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut worker = node(Worker { events }, true);

        worker.render(true).unwrap();
        assert_eq!(rx.recv().await, Some("started"));

        worker.render(true).unwrap();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        worker.render(false).unwrap();
        assert_eq!(rx.recv().await, Some("stopped"));
    }

    #[tokio::test]
    async fn cancelling_the_node_stops_its_side_effects() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut worker = node(Worker { events }, true);

        worker.render(true).unwrap();
        assert_eq!(rx.recv().await, Some("started"));

        drop(worker);
        assert_eq!(rx.recv().await, Some("stopped"));
    }

    struct Numbers;

    impl Workflow for Numbers {
        type Props = ();
        type State = Vec<i32>;
        type Output = ();
        type Rendering = ();

        fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<Vec<i32>> {
            Ok(Vec::new())
        }

        fn render(&self, ctx: &mut RenderContext<'_, Self>, _: &(), _: &Vec<i32>) -> Result<()> {
            ctx.run_stream("numbers", futures_util::stream::iter(vec![1, 2, 3]), |n| {
                Action::new("number", move |updater: &mut Updater<'_, Numbers>| updater.state_mut().push(n))
            })
        }
    }

    #[tokio::test]
    async fn stream_items_arrive_as_actions_in_order() {
        let mut numbers = node(Numbers, ());
        numbers.render(()).unwrap();

        for _ in 0..3 {
            assert!(numbers.next_action().await.state_changed);
        }
        assert_eq!(numbers.state(), &vec![1, 2, 3]);
    }

    #[test]
    fn event_handlers_are_cloneable_and_named() {
        struct Clicks;

        impl Workflow for Clicks {
            type Props = ();
            type State = u32;
            type Output = ();
            type Rendering = EventHandler<()>;

            fn initial_state(&self, _: &(), _: Option<&Snapshot>) -> Result<u32> {
                Ok(0)
            }

            fn render(
                &self,
                ctx: &mut RenderContext<'_, Self>,
                _: &(),
                _: &u32,
            ) -> Result<EventHandler<()>> {
                ctx.event_handler("click", |updater, ()| *updater.state_mut() += 1)
            }
        }

        let mut clicks = node(Clicks, ());
        let handler = clicks.render(()).unwrap();
        let copy = handler.clone();

        handler.call(()).unwrap();
        copy.call(()).unwrap();
        while clicks.try_next_action().is_some() {}

        assert_eq!(handler.name(), "click");
        assert_eq!(*clicks.state(), 2);
    }
}
