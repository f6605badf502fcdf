//! S4: the observer chain on a two-level tree, from per-gate callbacks
//! through a gating cache binding both gates to a shared event table.

use flow_gates::cache::GatingCache;
use flow_gates::event_table::EventTable;
use flow_gates::gate::{Dimension, Gate};
use flow_gates::observer::GateObserver;
use flow_gates::transform::Transform;
use flow_gates::tree::GateTree;
use flow_gates::GateError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Default)]
struct FixedEventTable {
    names: Vec<String>,
    columns: Vec<Vec<f32>>,
    index: HashMap<String, usize>,
}

impl FixedEventTable {
    fn new(columns: &[(&str, Vec<f32>)]) -> Self {
        let mut t = FixedEventTable::default();
        for (name, values) in columns {
            t.index.insert((*name).to_string(), t.names.len());
            t.names.push((*name).to_string());
            t.columns.push(values.clone());
        }
        t
    }
}

impl EventTable for FixedEventTable {
    fn num_events(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }
    fn num_parameters(&self) -> u32 {
        self.names.len() as u32
    }
    fn is_parameter(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }
    fn parameter_index(&self, name: &str) -> Result<u32, GateError> {
        self.index
            .get(name)
            .map(|&i| i as u32)
            .ok_or_else(|| GateError::invalid_argument(format!("unknown parameter '{name}'")))
    }
    fn parameter_name(&self, i: u32) -> &str {
        &self.names[i as usize]
    }
    fn is_floats_not_doubles(&self) -> bool {
        true
    }
    fn parameter_values_f32(&self, i: u32) -> &[f32] {
        &self.columns[i as usize]
    }
    fn parameter_values_f64(&self, _i: u32) -> &[f64] {
        &[]
    }
    fn parameter_long_name(&self, i: u32) -> &str {
        &self.names[i as usize]
    }
    fn parameter_min(&self, _i: u32) -> f64 {
        0.0
    }
    fn parameter_max(&self, _i: u32) -> f64 {
        100.0
    }
    fn parameter_data_min(&self, _i: u32) -> f64 {
        0.0
    }
    fn parameter_data_max(&self, _i: u32) -> f64 {
        100.0
    }
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<String>,
}

impl GateObserver for Recorder {
    fn set_dimension_parameter_transform(
        &mut self,
        _gate: &Gate,
        index: usize,
        _transform: Option<&Transform>,
    ) {
        self.calls
            .push(format!("set_dimension_parameter_transform({index})"));
    }
}

fn table() -> Rc<dyn EventTable> {
    Rc::new(FixedEventTable::new(&[
        ("FSC-A", vec![1.0, 2.0, 3.0, 4.0]),
        ("SSC-A", vec![10.0, 20.0, 30.0, 40.0]),
    ]))
}

#[test]
fn root_transform_change_is_isolated_to_roots_own_observer() {
    let root = Gate::rectangle(vec![Dimension::new("FSC-A", None)], vec![(0.0, 10.0)]).unwrap();
    let child = Gate::rectangle(vec![Dimension::new("SSC-A", None)], vec![(0.0, 50.0)]).unwrap();
    root.append_child(child.clone()).unwrap();

    let root_observer = Rc::new(RefCell::new(Recorder::default()));
    let child_observer = Rc::new(RefCell::new(Recorder::default()));
    root.set_observer(Some(root_observer.clone()));
    child.set_observer(Some(child_observer.clone()));

    let new_transform = Rc::new(Transform::log(4.0, 1.0).unwrap());
    root.set_dimension_parameter_transform(0, Some(new_transform))
        .unwrap();

    assert_eq!(
        root_observer.borrow().calls,
        vec!["set_dimension_parameter_transform(0)"]
    );
    assert!(child_observer.borrow().calls.is_empty());
}

#[test]
fn cache_keeps_child_state_current_as_root_transform_changes() {
    let root = Gate::rectangle(vec![Dimension::new("FSC-A", None)], vec![(0.0, 10.0)]).unwrap();
    let child = Gate::rectangle(vec![Dimension::new("SSC-A", None)], vec![(0.0, 50.0)]).unwrap();
    root.append_child(child.clone()).unwrap();

    let tree = GateTree::new();
    tree.append_tree(root.clone()).unwrap();

    let cache = GatingCache::new(table(), vec![tree]);
    let root_state = root.cache_state().expect("cache attaches state to the root");
    let child_state = child
        .cache_state()
        .expect("cache attaches state to the child");

    root_state.record_result(vec![1, 0, 1, 0]);
    child_state.record_result(vec![0, 1, 0, 1]);
    assert!(root_state.applied());
    assert!(child_state.applied());

    let new_transform = Rc::new(Transform::log(4.0, 1.0).unwrap());
    root.set_dimension_parameter_transform(0, Some(new_transform))
        .unwrap();

    // Root's own column was rescanned and invalidated; the cache's
    // observer-driven cascade resets the child's applied flag too.
    assert!(!root_state.applied());
    assert!(!child_state.applied());

    let _ = cache.source();
}

// S5
#[test]
fn deidentify_clears_patient_identifying_fields_only() {
    let tree = GateTree::new();
    tree.set_referenced_event_file_name("patient42.fcs");
    tree.set_notes("HIV+");

    let root = Gate::rectangle(vec![Dimension::new("FSC-A", None)], vec![(0.0, 10.0)]).unwrap();
    root.set_notes("positive");
    tree.append_tree(root.clone()).unwrap();

    tree.deidentify();

    assert_eq!(tree.referenced_event_file_name(), None);
    assert_eq!(tree.notes(), None);
    assert_eq!(root.notes(), None);
}

// S6
#[test]
fn reparenting_an_attached_child_is_rejected() {
    let a = Gate::rectangle(vec![Dimension::new("FSC-A", None)], vec![(0.0, 10.0)]).unwrap();
    let b = Gate::rectangle(vec![Dimension::new("SSC-A", None)], vec![(0.0, 10.0)]).unwrap();
    let c = Gate::rectangle(vec![Dimension::new("CD3", None)], vec![(0.0, 10.0)]).unwrap();

    a.append_child(c.clone()).unwrap();
    let err = b.append_child(c.clone()).unwrap_err();

    assert!(matches!(err, GateError::InvalidArgument { .. }));
    assert_eq!(a.num_children(), 1);
    assert_eq!(b.num_children(), 0);
}
