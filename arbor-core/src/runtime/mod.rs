//! Runtime
//!
//! The driver loop that hosts a root workflow: it renders, waits for the next
//! event anywhere in the tree, applies it, renders again, and publishes each
//! rendering together with a snapshot of the tree.

mod config;
mod driver;

pub use config::{RenderMode, RuntimeConfig};
pub use driver::{render_workflow_in, RenderingAndSnapshot, RuntimeBuilder, WorkflowRuntime};
