//! Actions
//!
//! An [`Action`] describes one atomic transition of a node: given the node's
//! current props and state, update the state and optionally emit an output to
//! the parent. Applying an action is synchronous and cannot fail.

use std::borrow::Cow;
use std::fmt;

use crate::workflow::Workflow;

type ApplyFn<W> = Box<dyn FnOnce(&mut Updater<'_, W>) + Send>;

/// A state transition for workflow `W`.
pub struct Action<W: Workflow> {
    name: Cow<'static, str>,
    apply: ApplyFn<W>,
}

impl<W: Workflow> Action<W> {
    /// Create an action. The name shows up in logs and interceptor hooks.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: FnOnce(&mut Updater<'_, W>) + Send + 'static,
    {
        Self {
            name: name.into(),
            apply: Box::new(apply),
        }
    }

    /// Action that only emits `output`.
    pub fn emit(name: impl Into<Cow<'static, str>>, output: W::Output) -> Self {
        Self::new(name, move |updater| updater.set_output(output))
    }

    /// Action that does nothing.
    pub fn noop() -> Self {
        Self::new("noop", |_| {})
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply this action to `state`.
    pub fn apply(self, props: &W::Props, state: &mut W::State) -> ActionApplied<W::Output> {
        let mut updater = Updater {
            props,
            state,
            output: None,
            state_changed: false,
        };
        (self.apply)(&mut updater);
        ActionApplied {
            output: updater.output,
            state_changed: updater.state_changed,
        }
    }
}

impl<W: Workflow> fmt::Debug for Action<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

/// View of a node handed to an action while it is applied.
pub struct Updater<'a, W: Workflow> {
    props: &'a W::Props,
    state: &'a mut W::State,
    output: Option<W::Output>,
    state_changed: bool,
}

impl<'a, W: Workflow> Updater<'a, W> {
    pub fn props(&self) -> &W::Props {
        self.props
    }

    pub fn state(&self) -> &W::State {
        &*self.state
    }

    /// Mutable access to the state. Marks the state as changed.
    pub fn state_mut(&mut self) -> &mut W::State {
        self.state_changed = true;
        &mut *self.state
    }

    /// Replace the state. Marks the state as changed.
    pub fn set_state(&mut self, state: W::State) {
        self.state_changed = true;
        *self.state = state;
    }

    /// Emit `output` to the parent once the action has been applied.
    pub fn set_output(&mut self, output: W::Output) {
        self.output = Some(output);
    }
}

/// Result of applying an action somewhere in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionApplied<O> {
    /// Output that escaped the node the action was applied to.
    pub output: Option<O>,
    /// Whether any state along the cascade was touched.
    pub state_changed: bool,
}

impl<O> ActionApplied<O> {
    /// No output, no state change.
    pub fn unchanged() -> Self {
        Self {
            output: None,
            state_changed: false,
        }
    }

    pub fn map_output<T>(self, f: impl FnOnce(O) -> T) -> ActionApplied<T> {
        ActionApplied {
            output: self.output.map(f),
            state_changed: self.state_changed,
        }
    }
}
