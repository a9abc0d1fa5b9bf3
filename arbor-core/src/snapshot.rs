//! Snapshots
//!
//! A [`Snapshot`] is the serialized state of a single workflow. It may be
//! built eagerly from bytes or lazily from a closure; lazy snapshots only run
//! their closure the first time the bytes are actually needed, so structural
//! snapshots that are taken after every render and then discarded cost next to
//! nothing.
//!
//! A [`TreeSnapshot`] aggregates a node's own snapshot with the snapshots of
//! its children, each child tagged with the [`SnapshotKey`] of the slot it was
//! rendered in. On restore the keys are used to hand every child snapshot to
//! whichever child is rendered into the same slot.
//!
//! # Persisted Format
//!
//! [`TreeSnapshot::to_bytes`] writes MessagePack via `rmp-serde`. Every node is
//! a pair of optional state bytes and an ordered list of `(slot, subtree)`
//! entries.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::WorkflowNodeId;

type Thunk = Box<dyn FnOnce() -> Vec<u8> + Send>;

struct SnapshotInner {
    bytes: OnceLock<Vec<u8>>,
    thunk: Mutex<Option<Thunk>>,
}

/// Serialized state of one workflow.
///
/// Cloning is cheap: clones share the same (possibly not yet computed) bytes.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// Snapshot holding the given bytes.
    pub fn of_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes.into());
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: cell,
                thunk: Mutex::new(None),
            }),
        }
    }

    /// Snapshot holding UTF-8 text.
    pub fn of_str(text: &str) -> Self {
        Self::of_bytes(text.as_bytes().to_vec())
    }

    /// Snapshot whose bytes are produced on first access.
    pub fn lazy<F>(produce: F) -> Self
    where
        F: FnOnce() -> Vec<u8> + Send + 'static,
    {
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: OnceLock::new(),
                thunk: Mutex::new(Some(Box::new(produce))),
            }),
        }
    }

    /// Encode a value as MessagePack.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::of_bytes(rmp_serde::to_vec(value)?))
    }

    /// Decode MessagePack bytes written by [`Snapshot::encode`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(rmp_serde::from_slice(self.bytes())?)
    }

    /// The serialized bytes, forcing a lazy snapshot.
    pub fn bytes(&self) -> &[u8] {
        self.inner.bytes.get_or_init(|| {
            self.inner
                .thunk
                .lock()
                .take()
                .map(|produce| produce())
                .unwrap_or_default()
        })
    }

    /// Bytes interpreted as UTF-8, if valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.bytes()).ok()
    }

    /// Whether the bytes have been computed yet.
    pub fn is_materialized(&self) -> bool {
        self.inner.bytes.get().is_some()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.bytes.get() {
            Some(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
            None => f.write_str("Snapshot(lazy)"),
        }
    }
}

/// Persisted name of a child slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    identity: String,
    key: String,
}

impl SnapshotKey {
    pub fn new(identity: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            key: key.into(),
        }
    }

    /// Key for a rendered child, or `None` if its identity cannot be persisted.
    pub fn for_node(id: &WorkflowNodeId) -> Option<Self> {
        id.identity()
            .is_snapshottable()
            .then(|| Self::new(id.identity().name(), id.key()))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Snapshot of a node and, recursively, all of its snapshottable children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeSnapshot {
    workflow_snapshot: Option<Snapshot>,
    children: Vec<(SnapshotKey, TreeSnapshot)>,
}

impl TreeSnapshot {
    pub fn new(
        workflow_snapshot: Option<Snapshot>,
        children: Vec<(SnapshotKey, TreeSnapshot)>,
    ) -> Self {
        Self {
            workflow_snapshot,
            children,
        }
    }

    /// This node's own state snapshot.
    pub fn workflow_snapshot(&self) -> Option<&Snapshot> {
        self.workflow_snapshot.as_ref()
    }

    /// Child snapshots in render order.
    pub fn children(&self) -> &[(SnapshotKey, TreeSnapshot)] {
        &self.children
    }

    /// Snapshot of the child rendered in the given slot, if any.
    pub fn child(&self, key: &SnapshotKey) -> Option<&TreeSnapshot> {
        self.children
            .iter()
            .find_map(|(slot, tree)| (slot == key).then_some(tree))
    }

    pub fn is_empty(&self) -> bool {
        self.workflow_snapshot.is_none() && self.children.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Option<Snapshot>, Vec<(SnapshotKey, TreeSnapshot)>) {
        (self.workflow_snapshot, self.children)
    }

    /// Serialize the whole tree, forcing every lazy snapshot in it.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(&PersistedTree::from(self))?)
    }

    /// Parse bytes written by [`TreeSnapshot::to_bytes`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let persisted: PersistedTree = rmp_serde::from_slice(bytes)?;
        Ok(persisted.into())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedTree {
    state: Option<Vec<u8>>,
    children: Vec<(SnapshotKey, PersistedTree)>,
}

impl From<&TreeSnapshot> for PersistedTree {
    fn from(tree: &TreeSnapshot) -> Self {
        Self {
            state: tree.workflow_snapshot.as_ref().map(|s| s.bytes().to_vec()),
            children: tree
                .children
                .iter()
                .map(|(key, child)| (key.clone(), PersistedTree::from(child)))
                .collect(),
        }
    }
}

impl From<PersistedTree> for TreeSnapshot {
    fn from(tree: PersistedTree) -> Self {
        Self {
            workflow_snapshot: tree.state.map(Snapshot::of_bytes),
            children: tree
                .children
                .into_iter()
                .map(|(key, child)| (key, child.into()))
                .collect(),
        }
    }
}
