//! Opaque handle/index tables for entities published to outside callers
//! (Breakpoint, Watchpoint, Thread, Module), per design notes §9: external
//! users must not be able to extend the lifetime of these entities past the
//! Target's. `rd` hands callers `Rc`/`Weak` directly (see
//! `thread_group.rs`'s `ThreadGroupSharedWeakPtr`); this core replaces that
//! with newtype ids plus a slab the Target owns exclusively.

use std::collections::HashMap;
use std::fmt;

macro_rules! define_handle {
    ($name:ident) => {
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
        pub struct $name(pub(crate) u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_handle!(BreakpointId);
define_handle!(WatchpointId);
define_handle!(ThreadId);
define_handle!(ModuleId);
define_handle!(BreakpointSiteId);
define_handle!(StopHookId);

/// Reserved bit distinguishing internal breakpoint ids from user ones,
/// per §4.7 "Breakpoint listing is split into user and internal lists;
/// internal breakpoint IDs are distinguishable by a reserved bit."
const INTERNAL_BIT: u64 = 1 << 63;

impl BreakpointId {
    pub fn is_internal(self) -> bool {
        self.0 & INTERNAL_BIT != 0
    }
}

/// Slab-style table: monotonic ids, never reused, so a stale handle held
/// by a caller after removal reliably misses rather than aliasing a new
/// entity.
pub struct HandleTable<Id, T> {
    next: u64,
    internal: bool,
    entries: HashMap<u64, T>,
    make_id: fn(u64) -> Id,
}

impl<Id: Copy + Eq + std::hash::Hash, T> HandleTable<Id, T> {
    pub fn new(make_id: fn(u64) -> Id) -> Self {
        HandleTable {
            next: 1,
            internal: false,
            entries: HashMap::new(),
            make_id,
        }
    }

    pub fn new_internal(make_id: fn(u64) -> Id) -> Self {
        HandleTable {
            next: INTERNAL_BIT | 1,
            internal: true,
            entries: HashMap::new(),
            make_id,
        }
    }

    pub fn insert(&mut self, value: T) -> Id
    where
        Id: IdRepr,
    {
        let raw = self.next;
        self.next += 1;
        debug_assert_eq!(self.internal, raw & INTERNAL_BIT != 0);
        let id = (self.make_id)(raw);
        self.entries.insert(raw, value);
        id
    }

    pub fn get(&self, id: Id) -> Option<&T>
    where
        Id: IdRepr,
    {
        self.entries.get(&id.repr())
    }

    pub fn get_mut(&mut self, id: Id) -> Option<&mut T>
    where
        Id: IdRepr,
    {
        self.entries.get_mut(&id.repr())
    }

    pub fn remove(&mut self, id: Id) -> Option<T>
    where
        Id: IdRepr,
    {
        self.entries.remove(&id.repr())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &T)>
    where
        Id: IdRepr,
    {
        let make_id = self.make_id;
        self.entries.iter().map(move |(raw, v)| (make_id(*raw), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)>
    where
        Id: IdRepr,
    {
        let make_id = self.make_id;
        self.entries.iter_mut().map(move |(raw, v)| (make_id(*raw), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lets `HandleTable` round-trip a newtype id to/from its raw `u64`
/// without every newtype needing bespoke accessors written by hand.
pub trait IdRepr {
    fn repr(&self) -> u64;
}

macro_rules! impl_id_repr {
    ($name:ident) => {
        impl IdRepr for $name {
            fn repr(&self) -> u64 {
                self.0
            }
        }
    };
}

impl_id_repr!(BreakpointId);
impl_id_repr!(WatchpointId);
impl_id_repr!(ThreadId);
impl_id_repr!(ModuleId);
impl_id_repr!(BreakpointSiteId);
impl_id_repr!(StopHookId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut t: HandleTable<ThreadId, &'static str> = HandleTable::new(ThreadId);
        let a = t.insert("a");
        t.remove(a);
        let b = t.insert("b");
        assert_ne!(a, b);
        assert!(t.get(a).is_none());
        assert_eq!(t.get(b), Some(&"b"));
    }

    #[test]
    fn internal_breakpoint_ids_carry_reserved_bit() {
        let mut t: HandleTable<BreakpointId, ()> = HandleTable::new_internal(BreakpointId);
        let id = t.insert(());
        assert!(id.is_internal());
        let mut u: HandleTable<BreakpointId, ()> = HandleTable::new(BreakpointId);
        let id2 = u.insert(());
        assert!(!id2.is_internal());
    }
}
