//! Workflow identities and session ids.
//!
//! A [`WorkflowIdentity`] names a workflow *definition*. A [`WorkflowNodeId`]
//! pairs that identity with a render key, which is what distinguishes sibling
//! children of the same type under one parent. Two children occupy the same
//! slot iff their node ids are equal.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Type identity of a workflow definition.
///
/// Identities compare by [`TypeId`]. The type name doubles as the persisted
/// form of the identity; an identity created with
/// [`WorkflowIdentity::unsnapshottable`] has no persisted form, and any subtree
/// rooted at it is left out of tree snapshots.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowIdentity {
    type_id: TypeId,
    name: &'static str,
    snapshottable: bool,
}

impl WorkflowIdentity {
    /// Identity of the workflow type `W`.
    pub fn of<W: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<W>(),
            name: std::any::type_name::<W>(),
            snapshottable: true,
        }
    }

    /// Identity of `W` that cannot be written into a persisted snapshot.
    pub fn unsnapshottable<W: 'static>() -> Self {
        Self {
            snapshottable: false,
            ..Self::of::<W>()
        }
    }

    /// Human-readable type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this identity survives serialization.
    pub fn is_snapshottable(&self) -> bool {
        self.snapshottable
    }
}

impl PartialEq for WorkflowIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for WorkflowIdentity {}

impl std::hash::Hash for WorkflowIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identity plus render key: the slot a child occupies under its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowNodeId {
    identity: WorkflowIdentity,
    key: String,
}

impl WorkflowNodeId {
    pub fn new(identity: WorkflowIdentity, key: impl Into<String>) -> Self {
        Self {
            identity,
            key: key.into(),
        }
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for WorkflowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{}({:?})", self.identity, self.key)
        }
    }
}

/// Allocates runtime-unique session ids.
///
/// The counter is shared by every node in one runtime and handed down
/// explicitly at construction, so independent runtimes never collide and
/// tests can start from a known value.
#[derive(Debug, Clone, Default)]
pub struct SessionIdCounter(Arc<AtomicU64>);

impl SessionIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose first allocated id is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self(Arc::new(AtomicU64::new(first)))
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Left;
    struct Right;

    #[test]
    fn identities_compare_by_type() {
        assert_eq!(WorkflowIdentity::of::<Left>(), WorkflowIdentity::of::<Left>());
        assert_ne!(WorkflowIdentity::of::<Left>(), WorkflowIdentity::of::<Right>());
        assert_eq!(
            WorkflowIdentity::of::<Left>(),
            WorkflowIdentity::unsnapshottable::<Left>()
        );
    }

    #[test]
    fn node_ids_include_key() {
        let a = WorkflowNodeId::new(WorkflowIdentity::of::<Left>(), "a");
        let b = WorkflowNodeId::new(WorkflowIdentity::of::<Left>(), "b");
        assert_ne!(a, b);
        assert_eq!(a, WorkflowNodeId::new(WorkflowIdentity::of::<Left>(), "a"));
        assert!(a.to_string().ends_with("Left(\"a\")"));
    }

    #[test]
    fn counters_are_independent() {
        let first = SessionIdCounter::starting_at(10);
        let second = SessionIdCounter::new();

        assert_eq!(first.next_id(), 10);
        assert_eq!(first.next_id(), 11);
        assert_eq!(second.next_id(), 0);

        let shared = first.clone();
        assert_eq!(shared.next_id(), 12);
    }
}
