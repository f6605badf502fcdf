//! Gate state (component F): a per-gate cache of transformed event columns
//! and the inclusion mask produced by evaluating a gate, per spec.md §3.5.
//!
//! A [`GateState`] holds a weak, non-owning [`crate::gate::GateWeak`] back
//! into the gate it describes — the gate owns its state, not the reverse, so
//! there is no reference cycle (§9's "model the back-reference as a
//! weak/non-owning handle"). It also implements [`GateObserver`] so the
//! [`crate::cache::GatingCache`] that built it keeps it current as the gate
//! mutates, following the callback-semantics table in spec.md §4.5.

use crate::error::Result;
use crate::event_table::EventTable;
use crate::gate::{Gate, GateWeak, GatingMethod};
use crate::observer::GateObserver;
use crate::transform::Transform;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Per-dimension event columns, in whichever width the source event table
/// stores natively (spec.md §3.5's "floats or doubles, matching the source").
#[derive(Clone)]
pub enum ColumnSet {
    F32(Vec<Vec<f32>>),
    F64(Vec<Vec<f64>>),
}

impl fmt::Debug for ColumnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSet::F32(c) => write!(f, "ColumnSet::F32({} columns)", c.len()),
            ColumnSet::F64(c) => write!(f, "ColumnSet::F64({} columns)", c.len()),
        }
    }
}

impl ColumnSet {
    pub fn len(&self) -> usize {
        match self {
            ColumnSet::F32(c) => c.len(),
            ColumnSet::F64(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn min_max_f32(c: &[f32]) -> (f64, f64) {
    (
        c.iter().copied().fold(f32::INFINITY, f32::min) as f64,
        c.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64,
    )
}

fn min_max_f64(c: &[f64]) -> (f64, f64) {
    (
        c.iter().copied().fold(f64::INFINITY, f64::min),
        c.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    )
}

struct GateStateInner {
    gate: GateWeak,
    source: Rc<dyn EventTable>,
    columns: ColumnSet,
    column_names: Vec<String>,
    source_indices: Vec<u32>,
    transforms: Vec<Option<Rc<Transform>>>,
    /// Number of leading columns that come from the gate's dimensions
    /// (I-STATE-1: dimensions first, additional-clustering params after).
    /// This count never changes after construction.
    num_dimension_columns: usize,
    column_min: Vec<f64>,
    column_max: Vec<f64>,
    column_data_min: Vec<f64>,
    column_data_max: Vec<f64>,
    inclusion: Vec<u8>,
    applied: bool,
}

impl fmt::Debug for GateStateInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateStateInner")
            .field("column_names", &self.column_names)
            .field("applied", &self.applied)
            .field("num_events", &self.inclusion.len())
            .finish()
    }
}

impl GateStateInner {
    fn remove_column(&mut self, index: usize) {
        self.column_names.remove(index);
        self.source_indices.remove(index);
        self.transforms.remove(index);
        self.column_min.remove(index);
        self.column_max.remove(index);
        self.column_data_min.remove(index);
        self.column_data_max.remove(index);
        match &mut self.columns {
            ColumnSet::F32(cols) => {
                cols.remove(index);
            }
            ColumnSet::F64(cols) => {
                cols.remove(index);
            }
        }
    }

    fn push_column(&mut self, name: String, source_index: u32, transform: Option<Rc<Transform>>) {
        self.column_names.push(name);
        self.source_indices.push(source_index);
        self.transforms.push(transform);
        self.column_min.push(0.0);
        self.column_max.push(0.0);
        self.column_data_min.push(0.0);
        self.column_data_max.push(0.0);
        match &mut self.columns {
            ColumnSet::F32(cols) => cols.push(Vec::new()),
            ColumnSet::F64(cols) => cols.push(Vec::new()),
        }
    }

    /// Re-copies raw values for `index` from the source and re-applies its
    /// transform, without touching `applied`/`inclusion` — callers drive
    /// invalidation themselves (spec.md §4.5's `reset` primitive).
    fn reset_one(&mut self, index: usize) {
        let source = self.source.clone();
        let source_idx = self.source_indices[index];
        match &mut self.columns {
            ColumnSet::F32(cols) => cols[index] = source.parameter_values_f32(source_idx).to_vec(),
            ColumnSet::F64(cols) => cols[index] = source.parameter_values_f64(source_idx).to_vec(),
        }
        self.column_min[index] = source.parameter_min(source_idx);
        self.column_max[index] = source.parameter_max(source_idx);
        self.transform_column(index);
    }

    fn reset(&mut self, index: Option<usize>, recurse: bool) {
        match index {
            Some(i) => self.reset_one(i),
            None => {
                for i in 0..self.column_names.len() {
                    self.reset_one(i);
                }
            }
        }
        self.invalidate(recurse);
    }

    /// Applies `transforms[index]` to the column in place, then recomputes
    /// that column's min/max (scalar transform of the raw bounds) and
    /// data-min/data-max (rescanned, since not every transform is
    /// monotonic) per spec.md §4.5's `transform` primitive.
    fn transform_column(&mut self, index: usize) {
        let transform = self.transforms[index].clone();
        if let Some(t) = &transform {
            match &mut self.columns {
                ColumnSet::F32(cols) => t.apply_bulk_f32(&mut cols[index]),
                ColumnSet::F64(cols) => t.apply_bulk_f64(&mut cols[index]),
            }
            self.column_min[index] = t.apply(self.column_min[index]);
            self.column_max[index] = t.apply(self.column_max[index]);
        }
        let (data_min, data_max) = match &self.columns {
            ColumnSet::F32(cols) => min_max_f32(&cols[index]),
            ColumnSet::F64(cols) => min_max_f64(&cols[index]),
        };
        self.column_data_min[index] = data_min;
        self.column_data_max[index] = data_max;
    }

    fn transform(&mut self, index: usize) {
        self.transform_column(index);
        self.invalidate(false);
    }

    /// Resets `applied` to `false` and the inclusion mask to all-included
    /// (invariant 9), recursing into every child's cache state when asked.
    fn invalidate(&mut self, recurse: bool) {
        if !self.applied {
            return;
        }
        self.applied = false;
        self.inclusion.iter_mut().for_each(|b| *b = 1);
        if recurse {
            if let Some(gate) = self.gate.upgrade() {
                for child in gate.children() {
                    if let Some(cs) = child.cache_state() {
                        cs.invalidate(true);
                    }
                }
            }
        }
    }

    fn recurse_unless_event_value(&self, gate: &Gate) -> bool {
        self.applied && gate.gating_method() != GatingMethod::EventValue
    }
}

impl GateObserver for GateStateInner {
    fn append_additional_clustering_param(&mut self, gate: &Gate, name: &str, _t: Option<&Transform>) {
        let Ok(source_idx) = self.source.parameter_index(name) else {
            tracing::warn!(parameter = name, "gate state: unknown additional clustering parameter, not caching it");
            return;
        };
        let was_applied = self.recurse_unless_event_value(gate);
        let transform = gate
            .additional_params()
            .into_iter()
            .find(|p| p.parameter_name == name)
            .and_then(|p| p.transform);
        self.push_column(name.to_string(), source_idx, transform);
        let index = self.column_names.len() - 1;
        self.reset_one(index);
        self.invalidate(was_applied);
    }

    fn clear_additional_clustering_params(&mut self, gate: &Gate) {
        let was_applied = self.recurse_unless_event_value(gate);
        while self.column_names.len() > self.num_dimension_columns {
            self.remove_column(self.column_names.len() - 1);
        }
        self.invalidate(was_applied);
    }

    fn remove_additional_clustering_param(&mut self, gate: &Gate, name: &str) {
        let Some(index) = self
            .column_names
            .iter()
            .skip(self.num_dimension_columns)
            .position(|n| n == name)
            .map(|i| i + self.num_dimension_columns)
        else {
            return;
        };
        let was_applied = self.recurse_unless_event_value(gate);
        self.remove_column(index);
        self.invalidate(was_applied);
    }

    fn set_additional_clustering_param_transform(
        &mut self,
        gate: &Gate,
        name: &str,
        _t: Option<&Transform>,
    ) {
        let Some(index) = self
            .column_names
            .iter()
            .skip(self.num_dimension_columns)
            .position(|n| n == name)
            .map(|i| i + self.num_dimension_columns)
        else {
            return;
        };
        let was_applied = self.recurse_unless_event_value(gate);
        let transform = gate
            .additional_params()
            .into_iter()
            .find(|p| p.parameter_name == name)
            .and_then(|p| p.transform);
        self.transforms[index] = transform;
        self.reset_one(index);
        self.invalidate(was_applied);
    }

    fn set_dimension_parameter_name(&mut self, _gate: &Gate, index: usize, name: &str) {
        if index >= self.num_dimension_columns {
            return;
        }
        let Ok(source_idx) = self.source.parameter_index(name) else {
            tracing::warn!(parameter = name, "gate state: unknown dimension parameter, not caching it");
            return;
        };
        let was_applied = self.applied;
        self.column_names[index] = name.to_string();
        self.source_indices[index] = source_idx;
        self.reset_one(index);
        self.invalidate(was_applied);
    }

    fn set_dimension_parameter_transform(
        &mut self,
        gate: &Gate,
        index: usize,
        _transform: Option<&Transform>,
    ) {
        if index >= self.num_dimension_columns {
            return;
        }
        let was_applied = self.applied;
        self.transforms[index] = gate.dimension_transform(index).ok().flatten();
        self.reset_one(index);
        self.invalidate(was_applied);
    }

    fn set_gating_method(&mut self, _gate: &Gate, _method: &GatingMethod) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn set_rectangle_min_max(&mut self, _gate: &Gate, _index: usize, _min: f64, _max: f64) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn append_polygon_vertex(&mut self, _gate: &Gate, _index: usize, _x: f64, _y: f64) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn set_polygon_vertex(&mut self, _gate: &Gate, _index: usize, _x: f64, _y: f64) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn remove_polygon_vertex(&mut self, _gate: &Gate, _index: usize) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn clear_polygon_vertices(&mut self, _gate: &Gate) {
        if self.applied {
            self.invalidate(true);
        }
    }

    fn append_child(&mut self, _gate: &Gate, child: &Gate) {
        let needs_fresh = match child.cache_state() {
            Some(cs) => !Rc::ptr_eq(&self.source, &cs.source()),
            None => true,
        };
        if needs_fresh {
            if let Err(err) = GateState::attach(child, self.source.clone()) {
                tracing::warn!(error = %err, "gate state: failed to allocate state for appended child");
            }
        } else {
            self.invalidate(true);
        }
    }
}

/// A shared handle to one gate's cached, transformed event columns and
/// inclusion mask. Construct only through [`GateState::attach`] — building
/// one by hand would skip installing it as the gate's observer.
#[derive(Clone)]
pub struct GateState(Rc<RefCell<GateStateInner>>);

impl fmt::Debug for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.borrow().fmt(f)
    }
}

impl GateState {
    /// Builds state for `gate` against `source` and installs it as both the
    /// gate's cache state and its observer (spec.md §4.5's "Construction").
    ///
    /// Collects the union of dimension and additional-clustering parameter
    /// names (dimensions first, per I-STATE-1), validates each against
    /// `source`, allocates one column per parameter, copies values, and
    /// applies each parameter's transform.
    pub fn attach(gate: &Gate, source: Rc<dyn EventTable>) -> Result<GateState> {
        let num_dimension_columns = gate.num_dimensions();
        let mut names = Vec::with_capacity(num_dimension_columns);
        let mut source_indices = Vec::with_capacity(num_dimension_columns);
        let mut transforms = Vec::with_capacity(num_dimension_columns);
        for i in 0..num_dimension_columns {
            let name = gate.dimension_parameter_name(i)?;
            let source_idx = source.parameter_index(&name)?;
            let transform = gate.dimension_transform(i)?;
            names.push(name);
            source_indices.push(source_idx);
            transforms.push(transform);
        }
        for p in gate.additional_params() {
            let source_idx = source.parameter_index(&p.parameter_name)?;
            names.push(p.parameter_name);
            source_indices.push(source_idx);
            transforms.push(p.transform);
        }

        let num_events = source.num_events();
        let num_columns = names.len();
        let columns = if source.is_floats_not_doubles() {
            ColumnSet::F32(vec![Vec::new(); num_columns])
        } else {
            ColumnSet::F64(vec![Vec::new(); num_columns])
        };

        let inner = GateStateInner {
            gate: gate.downgrade(),
            source,
            columns,
            column_names: names,
            source_indices,
            transforms,
            num_dimension_columns,
            column_min: vec![0.0; num_columns],
            column_max: vec![0.0; num_columns],
            column_data_min: vec![0.0; num_columns],
            column_data_max: vec![0.0; num_columns],
            inclusion: vec![1u8; num_events],
            applied: false,
        };

        let state = GateState(Rc::new(RefCell::new(inner)));
        {
            let mut inner = state.0.borrow_mut();
            let count = inner.column_names.len();
            for i in 0..count {
                inner.reset_one(i);
            }
        }
        gate.set_cache_state(Some(state.clone()));
        gate.set_observer(Some(state.0.clone() as Rc<RefCell<dyn GateObserver>>));
        Ok(state)
    }

    pub fn source(&self) -> Rc<dyn EventTable> {
        self.0.borrow().source.clone()
    }

    pub fn gate(&self) -> Option<Gate> {
        self.0.borrow().gate.upgrade()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.0.borrow().column_names.clone()
    }

    pub fn columns(&self) -> ColumnSet {
        self.0.borrow().columns.clone()
    }

    pub fn column_min(&self, index: usize) -> f64 {
        self.0.borrow().column_min[index]
    }

    pub fn column_max(&self, index: usize) -> f64 {
        self.0.borrow().column_max[index]
    }

    pub fn column_data_min(&self, index: usize) -> f64 {
        self.0.borrow().column_data_min[index]
    }

    pub fn column_data_max(&self, index: usize) -> f64 {
        self.0.borrow().column_data_max[index]
    }

    pub fn num_events(&self) -> usize {
        self.0.borrow().inclusion.len()
    }

    pub fn inclusion(&self) -> Vec<u8> {
        self.0.borrow().inclusion.clone()
    }

    pub fn applied(&self) -> bool {
        self.0.borrow().applied
    }

    /// Records the gating engine's result for this gate (out of scope here —
    /// see spec.md §1's "gating algorithms themselves" Non-goal). Exercises
    /// invariant 9 and the cascading-invalidation behavior in tests.
    pub fn record_result(&self, inclusion: Vec<u8>) {
        let mut inner = self.0.borrow_mut();
        assert_eq!(inclusion.len(), inner.inclusion.len());
        inner.inclusion = inclusion;
        inner.applied = true;
    }

    pub fn invalidate(&self, recurse: bool) {
        self.0.borrow_mut().invalidate(recurse);
    }

    pub fn reset(&self, index: Option<usize>, recurse: bool) {
        self.0.borrow_mut().reset(index, recurse);
    }

    pub fn transform(&self, index: usize) {
        self.0.borrow_mut().transform(index);
    }
}
