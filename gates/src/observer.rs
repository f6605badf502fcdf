//! The observer protocol (component E): the open extension point through
//! which gates and gate trees announce their own mutations.
//!
//! Every method defaults to a no-op so a state object overrides only the
//! handful it cares about. Calls happen synchronously, after the mutating
//! operation has already updated its target, and must never fail —
//! implementations swallow their own errors (§4.4, §5 "Ordering").

use crate::gate::{Gate, GatingMethod};
use crate::transform::Transform;
use std::fmt::Debug;

/// Notified of every mutation on the gate it is attached to.
pub trait GateObserver: Debug {
    fn append_child(&mut self, _gate: &Gate, _child: &Gate) {}
    fn clear_children(&mut self, _gate: &Gate) {}
    fn remove_child(&mut self, _gate: &Gate, _child: &Gate) {}
    fn set_child_negate(&mut self, _gate: &Gate, _index: usize, _negate: bool) {}

    fn append_additional_clustering_param(
        &mut self,
        _gate: &Gate,
        _name: &str,
        _transform: Option<&Transform>,
    ) {
    }
    fn clear_additional_clustering_params(&mut self, _gate: &Gate) {}
    fn remove_additional_clustering_param(&mut self, _gate: &Gate, _name: &str) {}
    fn set_additional_clustering_param_transform(
        &mut self,
        _gate: &Gate,
        _name: &str,
        _transform: Option<&Transform>,
    ) {
    }

    fn set_dimension_parameter_name(&mut self, _gate: &Gate, _index: usize, _name: &str) {}
    fn set_dimension_parameter_transform(
        &mut self,
        _gate: &Gate,
        _index: usize,
        _transform: Option<&Transform>,
    ) {
    }

    fn set_gating_method(&mut self, _gate: &Gate, _method: &GatingMethod) {}
    fn set_name(&mut self, _gate: &Gate, _name: &str) {}
    fn set_description(&mut self, _gate: &Gate, _description: &str) {}
    fn set_notes(&mut self, _gate: &Gate, _notes: &str) {}
    fn set_original_id(&mut self, _gate: &Gate, _original_id: &str) {}
    fn set_report_priority(&mut self, _gate: &Gate, _priority: u32) {}

    fn set_rectangle_min_max(&mut self, _gate: &Gate, _index: usize, _min: f64, _max: f64) {}
    fn set_ellipsoid_center(&mut self, _gate: &Gate, _center: &[f64]) {}
    fn set_ellipsoid_covariance(&mut self, _gate: &Gate, _covariance: &[f64]) {}
    fn set_ellipsoid_distance_squared(&mut self, _gate: &Gate, _distance_squared: f64) {}
    fn append_polygon_vertex(&mut self, _gate: &Gate, _index: usize, _x: f64, _y: f64) {}
    fn set_polygon_vertex(&mut self, _gate: &Gate, _index: usize, _x: f64, _y: f64) {}
    fn remove_polygon_vertex(&mut self, _gate: &Gate, _index: usize) {}
    fn clear_polygon_vertices(&mut self, _gate: &Gate) {}
}

/// Notified of mutations on the tree container itself (root add/remove,
/// metadata edits) — the container-level analog of [`GateObserver`].
pub trait TreeObserver: Debug {
    fn tree_appended(&mut self, _root: &Gate) {}
    fn tree_removed(&mut self, _root: &Gate) {}
    fn trees_cleared(&mut self) {}
    fn metadata_changed(&mut self) {}
}
