//! The gate tree container (component D): an ordered forest of root gates
//! plus file-level metadata, generalized from the teacher's id-keyed
//! `GateHierarchy` side-table to an ownership-based forest per spec.md §3.4.

use crate::error::{GateError, Result};
use crate::gate::Gate;
use crate::ids::{GateId, TransformId};
use crate::observer::TreeObserver;
use crate::transform::Transform;
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug)]
struct GateTreeInner {
    roots: Vec<Gate>,
    display_name: Option<String>,
    description: Option<String>,
    notes: Option<String>,
    source_file_name: Option<String>,
    referenced_event_file_name: Option<String>,
    creator_software_name: Option<String>,
    /// Held weakly: a cache observing this tree typically also owns the
    /// tree itself, so a strong back-reference here would form a cycle.
    /// Callers keep the observer alive; the tree only upgrades to notify.
    observer: Option<Weak<RefCell<dyn TreeObserver>>>,
}

/// A shared handle to a forest of gates plus its file-level metadata.
#[derive(Clone, Debug)]
pub struct GateTree(Rc<RefCell<GateTreeInner>>);

impl Serialize for GateTree {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let inner = self.0.borrow();
        let mut s = serializer.serialize_struct("GateTree", 7)?;
        s.serialize_field("roots", &inner.roots)?;
        s.serialize_field("display_name", &inner.display_name)?;
        s.serialize_field("description", &inner.description)?;
        s.serialize_field("notes", &inner.notes)?;
        s.serialize_field("source_file_name", &inner.source_file_name)?;
        s.serialize_field(
            "referenced_event_file_name",
            &inner.referenced_event_file_name,
        )?;
        s.serialize_field("creator_software_name", &inner.creator_software_name)?;
        s.end()
    }
}

impl Default for GateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GateTree {
    pub fn new() -> Self {
        GateTree(Rc::new(RefCell::new(GateTreeInner {
            roots: Vec::new(),
            display_name: None,
            description: None,
            notes: None,
            source_file_name: None,
            referenced_event_file_name: None,
            creator_software_name: None,
            observer: None,
        })))
    }

    pub fn set_observer(&self, observer: Option<Rc<RefCell<dyn TreeObserver>>>) {
        self.0.borrow_mut().observer = observer.map(|o| Rc::downgrade(&o));
    }

    fn notify(&self, f: impl FnOnce(&mut dyn TreeObserver)) {
        let observer = self.0.borrow().observer.clone();
        if let Some(observer) = observer.and_then(|o| o.upgrade()) {
            f(&mut *observer.borrow_mut());
        }
    }

    pub fn append_tree(&self, root: Gate) -> Result<()> {
        if root.is_attached() {
            return Err(GateError::invalid_argument(
                "cannot append an already-attached gate as a tree root",
            ));
        }
        root.set_attached(true);
        self.0.borrow_mut().roots.push(root.clone());
        tracing::trace!(gate = ?root.id(), "gate tree: root appended");
        self.notify(|o| o.tree_appended(&root));
        Ok(())
    }

    pub fn clear_trees(&self) {
        let roots = std::mem::take(&mut self.0.borrow_mut().roots);
        for r in &roots {
            r.set_attached(false);
        }
        tracing::trace!(num_roots = roots.len(), "gate tree: trees cleared");
        self.notify(|o| o.trees_cleared());
    }

    pub fn remove_tree(&self, root: &Gate) -> Result<()> {
        let pos = {
            let inner = self.0.borrow();
            inner.roots.iter().position(|r| r == root)
        };
        let Some(pos) = pos else {
            return Err(GateError::invalid_argument(
                "gate is not a root of this tree",
            ));
        };
        self.remove_tree_at_index(pos)
    }

    /// As [`Self::remove_tree`], addressing the root by its position in
    /// [`Self::roots`] rather than by identity.
    pub fn remove_tree_at(&self, index: usize) -> Result<()> {
        if index >= self.0.borrow().roots.len() {
            return Err(GateError::out_of_range(index, self.0.borrow().roots.len()));
        }
        self.remove_tree_at_index(index)
    }

    fn remove_tree_at_index(&self, index: usize) -> Result<()> {
        let root = self.0.borrow_mut().roots.remove(index);
        root.set_attached(false);
        tracing::trace!(gate = ?root.id(), "gate tree: root removed");
        self.notify(|o| o.tree_removed(&root));
        Ok(())
    }

    pub fn get_tree(&self, index: usize) -> Result<Gate> {
        let inner = self.0.borrow();
        inner
            .roots
            .get(index)
            .cloned()
            .ok_or_else(|| GateError::out_of_range(index, inner.roots.len()))
    }

    pub fn num_trees(&self) -> usize {
        self.0.borrow().roots.len()
    }

    pub fn roots(&self) -> Vec<Gate> {
        self.0.borrow().roots.clone()
    }

    /// Every reachable gate, parents before children (invariant 7).
    pub fn find_descendent_gates(&self) -> Vec<Gate> {
        let mut out = Vec::new();
        for root in self.0.borrow().roots.iter() {
            walk(root, &mut out);
        }
        out
    }

    /// As [`Self::find_descendent_gates`], but each entry also carries the
    /// flat-list index of its parent (a root's parent index equals its own
    /// index) — invariant 8.
    pub fn find_descendent_gates_with_parent_indexes(&self) -> Vec<(Gate, usize)> {
        let mut out = Vec::new();
        for root in self.0.borrow().roots.iter() {
            let root_index = out.len();
            walk_with_parent(root, root_index, &mut out);
        }
        out
    }

    pub fn find_gate_by_id(&self, id: GateId) -> Option<Gate> {
        self.find_descendent_gates().into_iter().find(|g| g.id() == id)
    }

    pub fn find_transform_by_id(&self, id: TransformId) -> Option<Rc<Transform>> {
        for gate in self.find_descendent_gates() {
            for i in 0..gate.num_dimensions() {
                if let Ok(Some(t)) = gate.dimension_transform(i) {
                    if t.id() == id {
                        return Some(t);
                    }
                }
            }
            for p in gate.additional_params() {
                if let Some(t) = p.transform {
                    if t.id() == id {
                        return Some(t);
                    }
                }
            }
        }
        None
    }

    pub fn find_parent_gate(&self, child: &Gate) -> Option<Gate> {
        for gate in self.find_descendent_gates() {
            if gate.children().iter().any(|c| c == child) {
                return Some(gate);
            }
        }
        None
    }

    pub fn find_num_descendent_gates(&self) -> usize {
        self.find_descendent_gates().len()
    }

    pub fn find_num_descendent_transforms(&self) -> usize {
        let mut ids = std::collections::HashSet::new();
        for gate in self.find_descendent_gates() {
            for i in 0..gate.num_dimensions() {
                if let Ok(Some(t)) = gate.dimension_transform(i) {
                    ids.insert(t.id());
                }
            }
            for p in gate.additional_params() {
                if let Some(t) = p.transform {
                    ids.insert(t.id());
                }
            }
        }
        ids.len()
    }

    /// Clears fields that may carry patient-identifying text on the
    /// container and on every descendent gate.
    pub fn deidentify(&self) {
        {
            let mut inner = self.0.borrow_mut();
            inner.notes = None;
            inner.referenced_event_file_name = None;
        }
        for gate in self.find_descendent_gates() {
            gate.clear_notes();
        }
        self.notify(|o| o.metadata_changed());
    }

    pub fn display_name(&self) -> Option<String> {
        self.0.borrow().display_name.clone()
    }
    pub fn description(&self) -> Option<String> {
        self.0.borrow().description.clone()
    }
    pub fn notes(&self) -> Option<String> {
        self.0.borrow().notes.clone()
    }
    pub fn source_file_name(&self) -> Option<String> {
        self.0.borrow().source_file_name.clone()
    }
    pub fn referenced_event_file_name(&self) -> Option<String> {
        self.0.borrow().referenced_event_file_name.clone()
    }
    pub fn creator_software_name(&self) -> Option<String> {
        self.0.borrow().creator_software_name.clone()
    }

    pub fn set_display_name(&self, value: impl Into<String>) {
        self.0.borrow_mut().display_name = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
    pub fn set_description(&self, value: impl Into<String>) {
        self.0.borrow_mut().description = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
    pub fn set_notes(&self, value: impl Into<String>) {
        self.0.borrow_mut().notes = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
    pub fn set_source_file_name(&self, value: impl Into<String>) {
        self.0.borrow_mut().source_file_name = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
    pub fn set_referenced_event_file_name(&self, value: impl Into<String>) {
        self.0.borrow_mut().referenced_event_file_name = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
    pub fn set_creator_software_name(&self, value: impl Into<String>) {
        self.0.borrow_mut().creator_software_name = Some(value.into());
        self.notify(|o| o.metadata_changed());
    }
}

fn walk(gate: &Gate, out: &mut Vec<Gate>) {
    out.push(gate.clone());
    for child in gate.children() {
        walk(&child, out);
    }
}

fn walk_with_parent(gate: &Gate, parent_index: usize, out: &mut Vec<(Gate, usize)>) {
    let my_index = out.len();
    out.push((gate.clone(), parent_index));
    for child in gate.children() {
        walk_with_parent(&child, my_index, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Dimension;

    fn rect(name: &str) -> Gate {
        let g = Gate::rectangle(vec![Dimension::new("P0", None)], vec![(0.0, 1.0)]).unwrap();
        g.set_name(name);
        g
    }

    #[test]
    fn descendent_gates_are_parents_before_children() {
        let tree = GateTree::new();
        let root = rect("root");
        let child = rect("child");
        let grandchild = rect("grandchild");
        child.append_child(grandchild).unwrap();
        root.append_child(child).unwrap();
        tree.append_tree(root).unwrap();

        let names: Vec<_> = tree
            .find_descendent_gates()
            .iter()
            .map(|g| g.name().unwrap())
            .collect();
        assert_eq!(names, vec!["root", "child", "grandchild"]);
    }

    #[test]
    fn parent_indexes_form_a_valid_forest() {
        let tree = GateTree::new();
        let root = rect("root");
        let child = rect("child");
        root.append_child(child).unwrap();
        tree.append_tree(root).unwrap();

        let entries = tree.find_descendent_gates_with_parent_indexes();
        assert_eq!(entries[0].1, 0); // root's parent index equals itself
        assert_eq!(entries[1].1, 0); // child's parent is index 0
    }

    #[test]
    fn append_tree_rejects_already_attached_root() {
        let tree = GateTree::new();
        let root = rect("root");
        tree.append_tree(root.clone()).unwrap();
        let tree2 = GateTree::new();
        assert!(tree2.append_tree(root).is_err());
    }

    #[test]
    fn remove_tree_by_root_and_by_index_agree() {
        let tree = GateTree::new();
        let first = rect("first");
        let second = rect("second");
        tree.append_tree(first.clone()).unwrap();
        tree.append_tree(second.clone()).unwrap();

        tree.remove_tree(&first).unwrap();
        assert_eq!(tree.num_trees(), 1);
        assert!(!first.is_attached());
        assert_eq!(tree.get_tree(0).unwrap(), second);

        assert!(tree.remove_tree_at(5).is_err());
        tree.remove_tree_at(0).unwrap();
        assert_eq!(tree.num_trees(), 0);
        assert!(!second.is_attached());
    }

    // S5
    #[test]
    fn deidentify_clears_patient_identifying_fields_only() {
        let tree = GateTree::new();
        tree.set_referenced_event_file_name("patient42.fcs");
        tree.set_notes("HIV+");
        tree.set_display_name("kept");

        let root = rect("root");
        root.set_notes("positive");
        tree.append_tree(root.clone()).unwrap();

        tree.deidentify();

        assert_eq!(tree.referenced_event_file_name(), None);
        assert_eq!(tree.notes(), None);
        assert_eq!(tree.display_name(), Some("kept".to_string()));
        assert_eq!(root.notes(), None);
        assert_eq!(root.name(), Some("root".to_string()));
    }
}
