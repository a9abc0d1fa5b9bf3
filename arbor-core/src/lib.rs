//! Arbor Core
//!
//! This crate provides the runtime for Arbor workflow trees. It implements:
//!
//! - Stateful workflows that render a value from props and state
//! - Keyed reconciliation of children and side effects across render passes
//! - Actions as the only way state changes, delivered one at a time
//! - Interceptors around every lifecycle call
//! - Tree snapshots for persisting and restoring the whole tree
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `workflow`: the [`Workflow`] trait implemented by user code
//! - `context`: the capabilities a workflow may use while rendering
//! - `action`: state transitions and their results
//! - `graph`: the live tree of nodes and the reconciler behind it
//! - `interceptor`: cross-cutting hooks around workflow calls
//! - `snapshot`: serialized state of single workflows and whole trees
//! - `runtime`: the driver loop hosting a root workflow
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{RuntimeBuilder, Workflow};
//! use tokio::sync::watch;
//!
//! let (props_tx, props_rx) = watch::channel("world".to_string());
//! let runtime = RuntimeBuilder::new(Greeter, props_rx).start(|greeting| async move {
//!     println!("{greeting}");
//!     Ok(())
//! })?;
//!
//! // The first rendering is available immediately
//! println!("{}", runtime.current().rendering.text);
//!
//! // New props trigger a new render pass
//! props_tx.send("arbor".to_string())?;
//! ```

pub mod action;
pub mod context;
pub mod error;
pub mod graph;
pub mod identity;
pub mod interceptor;
pub mod runtime;
pub mod snapshot;
pub mod workflow;

pub use action::{Action, ActionApplied, Updater};
pub use context::{ActionSink, EventHandler, RenderContext};
pub use error::{BoxError, Error, Result};
pub use graph::{RuntimeScope, WorkflowNode};
pub use identity::{SessionIdCounter, WorkflowIdentity, WorkflowNodeId};
pub use interceptor::{InterceptorChain, WorkflowInterceptor, WorkflowSession};
pub use runtime::{
    render_workflow_in, RenderMode, RenderingAndSnapshot, RuntimeBuilder, RuntimeConfig,
    WorkflowRuntime,
};
pub use snapshot::{Snapshot, SnapshotKey, TreeSnapshot};
pub use workflow::Workflow;
