//! Workflow Tree
//!
//! This module implements the live tree of running workflows.
//!
//! # Overview
//!
//! Every node owns its children and its side effects. The tree is rebuilt
//! incrementally on each render pass:
//!
//! - Children and side effects are matched against the previous pass by key
//! - Matches keep their state or their running task
//! - Anything the pass did not request is torn down when the pass commits
//!
//! Matching is done by [`ActiveStagingList`], a two-list reconciler shared by
//! children and side effects. State shared by every node of one runtime lives
//! in [`RuntimeScope`].

mod active_staging;
mod node;
mod scope;
mod side_effect;
mod subtree;

pub use active_staging::ActiveStagingList;
pub use node::WorkflowNode;
pub use scope::RuntimeScope;

pub(crate) use side_effect::SideEffectNode;
pub(crate) use subtree::SubtreeManager;
