//! Active/Staging Reconciler
//!
//! Keeps a keyed collection in sync across render passes. `active` holds what
//! the previous pass committed; `staging` accumulates what the current pass
//! requests. Items requested again are moved from `active` to `staging`;
//! anything still in `active` at commit time was not requested and is handed
//! to the caller for teardown.
//!
//! Lookups are linear scans with a match predicate. Sibling counts are small,
//! and a scan keeps insertion order stable, which the rest of the runtime
//! relies on for render order and for event tie-breaks.

use smallvec::SmallVec;

type Items<T> = SmallVec<[T; 4]>;

/// Two-list reconciler over items matched by predicate.
#[derive(Debug)]
pub struct ActiveStagingList<T> {
    active: Items<T>,
    staging: Items<T>,
}

impl<T> Default for ActiveStagingList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ActiveStagingList<T> {
    pub fn new() -> Self {
        Self {
            active: SmallVec::new(),
            staging: SmallVec::new(),
        }
    }

    /// Move the first active item matching `predicate` into staging, or
    /// stage a new one built by `create`. Returns the staged item.
    pub fn retain_or_create<P, C>(&mut self, predicate: P, create: C) -> &mut T
    where
        P: FnMut(&T) -> bool,
        C: FnOnce() -> T,
    {
        let item = match self.active.iter().position(predicate) {
            Some(index) => self.active.remove(index),
            None => create(),
        };
        self.stage(item)
    }

    /// Like [`retain_or_create`](Self::retain_or_create) with a fallible
    /// constructor. On error nothing is staged.
    pub fn try_retain_or_create<P, C, E>(&mut self, predicate: P, create: C) -> Result<&mut T, E>
    where
        P: FnMut(&T) -> bool,
        C: FnOnce() -> Result<T, E>,
    {
        let item = match self.active.iter().position(predicate) {
            Some(index) => self.active.remove(index),
            None => create()?,
        };
        Ok(self.stage(item))
    }

    fn stage(&mut self, item: T) -> &mut T {
        let index = self.staging.len();
        self.staging.push(item);
        &mut self.staging[index]
    }

    /// Hand every item that was not re-requested to `on_dropped`, then make
    /// staging the new active list.
    pub fn commit<F>(&mut self, mut on_dropped: F)
    where
        F: FnMut(T),
    {
        for item in self.active.drain(..) {
            on_dropped(item);
        }
        std::mem::swap(&mut self.active, &mut self.staging);
    }

    /// Abandon an unfinished pass. Staged items go back to active in the
    /// order they were requested, ahead of the items the pass never reached.
    /// Nothing is dropped.
    pub fn rollback(&mut self) {
        self.staging.extend(self.active.drain(..));
        std::mem::swap(&mut self.active, &mut self.staging);
    }

    pub fn active(&self) -> &[T] {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut [T] {
        &mut self.active
    }

    pub fn staging(&self) -> &[T] {
        &self.staging
    }

    /// Every item in either list, active first.
    pub fn iter_all_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.active.iter_mut().chain(self.staging.iter_mut())
    }
}
