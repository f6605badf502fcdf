//! The gating cache (component G): binds one event table to one or more
//! gate trees, installing and maintaining [`GateState`] on every descendant
//! gate, per spec.md §4.6.

use crate::event_table::EventTable;
use crate::gate::Gate;
use crate::observer::TreeObserver;
use crate::state::GateState;
use crate::tree::GateTree;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

struct GatingCacheInner {
    source: Rc<dyn EventTable>,
    trees: Vec<GateTree>,
}

impl fmt::Debug for GatingCacheInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatingCacheInner")
            .field("num_trees", &self.trees.len())
            .finish()
    }
}

fn attach_recursive(gate: &Gate, source: &Rc<dyn EventTable>) {
    if let Err(err) = GateState::attach(gate, source.clone()) {
        tracing::warn!(error = %err, gate = ?gate.id(), "gating cache: failed to allocate state");
    }
    for child in gate.children() {
        attach_recursive(&child, source);
    }
}

impl TreeObserver for GatingCacheInner {
    fn tree_appended(&mut self, root: &Gate) {
        let needs_fresh = match root.cache_state() {
            Some(cs) => !Rc::ptr_eq(&self.source, &cs.source()),
            None => true,
        };
        if needs_fresh {
            attach_recursive(root, &self.source);
        } else if let Some(cs) = root.cache_state() {
            cs.invalidate(true);
        }
    }

    fn tree_removed(&mut self, _root: &Gate) {}
    fn trees_cleared(&mut self) {}
    fn metadata_changed(&mut self) {}
}

/// Manages [`GateState`] across one or more [`GateTree`]s sharing the same
/// [`EventTable`]. Construction walks every descendant gate and installs a
/// freshly built state; after that, the cache keeps state current purely by
/// listening for tree and gate mutations — it does not poll.
#[derive(Clone)]
pub struct GatingCache(Rc<RefCell<GatingCacheInner>>);

impl fmt::Debug for GatingCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.borrow().fmt(f)
    }
}

impl GatingCache {
    pub fn new(source: Rc<dyn EventTable>, trees: Vec<GateTree>) -> Self {
        let cache = GatingCache(Rc::new(RefCell::new(GatingCacheInner {
            source: source.clone(),
            trees: trees.clone(),
        })));
        for tree in &trees {
            tree.set_observer(Some(cache.0.clone() as Rc<RefCell<dyn TreeObserver>>));
            for root in tree.roots() {
                attach_recursive(&root, &source);
            }
        }
        cache
    }

    pub fn source(&self) -> Rc<dyn EventTable> {
        self.0.borrow().source.clone()
    }

    pub fn trees(&self) -> Vec<GateTree> {
        self.0.borrow().trees.clone()
    }
}
