//! The gate family (component C): a closed set of gate shapes organized into
//! parent/child trees, generalized from the teacher's fixed 2D
//! `GateGeometry` enum to the N-dimensional model in spec.md §3.3/§4.2.
//!
//! A [`Gate`] is `Rc<RefCell<GateInner>>` — shared, singly-owned-per-thread
//! mutability, matching §5's explicit "no mutex" resource model. Every
//! mutator borrows the inner cell, applies the change, then invokes the
//! attached observer (if any) before returning, guarded in debug builds
//! against re-entrant mutation of the same gate from inside its own callback.

use crate::error::{GateError, Result};
use crate::ids::{GateId, next_gate_id};
use crate::observer::GateObserver;
use crate::state::GateState;
use crate::transform::Transform;
use serde::{Serialize, Serializer};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// A gate's shape tag, mirroring spec.md §3.3's `kind` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateShapeKind {
    Rectangle,
    Polygon,
    Ellipsoid,
    Quadrant,
    Boolean,
    Custom,
}

/// A single gate axis: the parameter it reads and the transform (if any)
/// applied to raw values on that axis before gating.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub parameter_name: String,
    pub transform: Option<Rc<Transform>>,
}

impl Dimension {
    pub fn new(parameter_name: impl Into<String>, transform: Option<Rc<Transform>>) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            transform,
        }
    }
}

/// A parameter consumed by the clustering algorithm but not part of the
/// gate's geometric shape.
#[derive(Debug, Clone, Serialize)]
pub struct AdditionalClusteringParam {
    pub parameter_name: String,
    pub transform: Option<Rc<Transform>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatingMethod {
    EventValue,
    DafiClusterCentroid,
    Custom(String),
}

impl Default for GatingMethod {
    fn default() -> Self {
        GatingMethod::EventValue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BooleanOp {
    And,
    Or,
    Not,
}

/// One divider of a quadrant gate: a strictly-increasing list of division
/// values along the parameter named by the dimension at the same index.
#[derive(Debug, Clone, Serialize)]
pub struct Divider {
    pub id: String,
    pub values: Vec<f64>,
}

/// A named quadrant: for each divider it cares about, the representative
/// value selecting which slab of that divider the quadrant occupies.
#[derive(Debug, Clone, Serialize)]
pub struct QuadrantDef {
    pub id: String,
    pub positions: Vec<(String, f64)>,
}

/// Kind-specific shape data (spec.md §4.2). Quadrant exposes only a read API
/// plus construction-time setters; see DESIGN.md's Open-Question decision.
#[derive(Debug, Clone, Serialize)]
pub enum GateShape {
    Rectangle { bounds: Vec<(f64, f64)> },
    Polygon { vertices: Vec<(f64, f64)> },
    Ellipsoid {
        center: Vec<f64>,
        covariance: Vec<f64>,
        distance_squared: f64,
    },
    Quadrant {
        dividers: Vec<Divider>,
        quadrants: Vec<QuadrantDef>,
    },
    Boolean { op: BooleanOp, negate: Vec<bool> },
    Custom(String),
}

impl GateShape {
    fn kind(&self) -> GateShapeKind {
        match self {
            GateShape::Rectangle { .. } => GateShapeKind::Rectangle,
            GateShape::Polygon { .. } => GateShapeKind::Polygon,
            GateShape::Ellipsoid { .. } => GateShapeKind::Ellipsoid,
            GateShape::Quadrant { .. } => GateShapeKind::Quadrant,
            GateShape::Boolean { .. } => GateShapeKind::Boolean,
            GateShape::Custom(_) => GateShapeKind::Custom,
        }
    }
}

pub struct GateInner {
    id: GateId,
    original_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    notes: Option<String>,
    report_priority: u32,
    gating_method: GatingMethod,
    dimensions: Vec<Dimension>,
    additional_params: Vec<AdditionalClusteringParam>,
    children: Vec<Gate>,
    attached: bool,
    shape: GateShape,
    observer: Option<Rc<RefCell<dyn GateObserver>>>,
    /// The gating cache's per-gate state, if this gate is managed by one.
    /// Kept separate from `observer` so [`GateState`] recursion (walking a
    /// gate's children to invalidate their cached results) never needs to
    /// downcast a `dyn GateObserver` back to a concrete type.
    cache_state: Option<GateState>,
    in_callback: Cell<bool>,
}

impl fmt::Debug for GateInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape.kind())
            .field("num_dimensions", &self.dimensions.len())
            .field("num_children", &self.children.len())
            .field("attached", &self.attached)
            .finish()
    }
}

/// A shared, mutable gate node. Cloning a `Gate` clones the handle (shared
/// ownership of the same node); use [`Gate::deep_clone`] to copy structure.
#[derive(Clone)]
pub struct Gate(Rc<RefCell<GateInner>>);

/// A non-owning handle to a [`Gate`], held by [`GateState`] so the cache's
/// per-gate state never keeps its gate alive.
#[derive(Clone)]
pub struct GateWeak(Weak<RefCell<GateInner>>);

impl fmt::Debug for GateWeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GateWeak({})", if self.0.strong_count() > 0 { "live" } else { "dead" })
    }
}

impl GateWeak {
    pub fn upgrade(&self) -> Option<Gate> {
        self.0.upgrade().map(Gate)
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.borrow().fmt(f)
    }
}

impl PartialEq for Gate {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Gate {}

impl Serialize for Gate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let inner = self.0.borrow();
        let mut s = serializer.serialize_struct("Gate", 10)?;
        s.serialize_field("id", &inner.id)?;
        s.serialize_field("original_id", &inner.original_id)?;
        s.serialize_field("name", &inner.name)?;
        s.serialize_field("description", &inner.description)?;
        s.serialize_field("notes", &inner.notes)?;
        s.serialize_field("report_priority", &inner.report_priority)?;
        s.serialize_field("gating_method", &inner.gating_method)?;
        s.serialize_field("dimensions", &inner.dimensions)?;
        s.serialize_field("additional_params", &inner.additional_params)?;
        s.serialize_field("shape", &inner.shape)?;
        s.serialize_field("children", &inner.children)?;
        s.end()
    }
}

fn ensure_distinct_parameter_names(
    dimensions: &[Dimension],
    additional: &[AdditionalClusteringParam],
    candidate: &str,
    skip_dimension_index: Option<usize>,
) -> Result<()> {
    let conflict = dimensions
        .iter()
        .enumerate()
        .any(|(i, d)| Some(i) != skip_dimension_index && d.parameter_name == candidate)
        || additional.iter().any(|p| p.parameter_name == candidate);
    if conflict {
        return Err(GateError::invalid_argument(format!(
            "parameter name '{candidate}' is already used by this gate"
        )));
    }
    Ok(())
}

impl Gate {
    fn from_inner(inner: GateInner) -> Self {
        Gate(Rc::new(RefCell::new(inner)))
    }

    fn base_inner(shape: GateShape, dimensions: Vec<Dimension>) -> GateInner {
        GateInner {
            id: next_gate_id(),
            original_id: None,
            name: None,
            description: None,
            notes: None,
            report_priority: 1,
            gating_method: GatingMethod::default(),
            dimensions,
            additional_params: Vec::new(),
            children: Vec::new(),
            attached: false,
            shape,
            observer: None,
            cache_state: None,
            in_callback: Cell::new(false),
        }
    }

    pub fn downgrade(&self) -> GateWeak {
        GateWeak(Rc::downgrade(&self.0))
    }

    /// Rectangle gate: one `(min, max)` bound per dimension (`dims.len() >= 1`).
    /// Out-of-order bounds are swapped rather than rejected.
    pub fn rectangle(dimensions: Vec<Dimension>, bounds: Vec<(f64, f64)>) -> Result<Self> {
        if dimensions.is_empty() || dimensions.len() != bounds.len() {
            return Err(GateError::invalid_argument(
                "Rectangle requires >= 1 dimension with matching bounds",
            ));
        }
        let bounds = bounds
            .into_iter()
            .map(|(min, max)| if min <= max { (min, max) } else { (max, min) })
            .collect();
        Ok(Self::from_inner(Self::base_inner(
            GateShape::Rectangle { bounds },
            dimensions,
        )))
    }

    /// Polygon gate: exactly 2 dimensions, vertex list implicitly closed.
    pub fn polygon(dimensions: [Dimension; 2], vertices: Vec<(f64, f64)>) -> Result<Self> {
        Ok(Self::from_inner(Self::base_inner(
            GateShape::Polygon { vertices },
            dimensions.into(),
        )))
    }

    /// Ellipsoid gate: `N >= 2` dimensions, row-major `N*N` covariance.
    pub fn ellipsoid(
        dimensions: Vec<Dimension>,
        center: Vec<f64>,
        covariance: Vec<f64>,
        distance_squared: f64,
    ) -> Result<Self> {
        let n = dimensions.len();
        if n < 2 {
            return Err(GateError::invalid_argument(
                "Ellipsoid requires >= 2 dimensions",
            ));
        }
        if center.len() != n {
            return Err(GateError::invalid_argument(
                "Ellipsoid center length must equal the dimension count",
            ));
        }
        if covariance.len() != n * n {
            return Err(GateError::invalid_argument(
                "Ellipsoid covariance must be N*N (row-major)",
            ));
        }
        if !(distance_squared > 0.0) {
            return Err(GateError::invalid_argument(
                "Ellipsoid distance_squared must be > 0",
            ));
        }
        Ok(Self::from_inner(Self::base_inner(
            GateShape::Ellipsoid {
                center,
                covariance,
                distance_squared,
            },
            dimensions,
        )))
    }

    /// Quadrant gate: one dimension per divider (`>= 1`). Dividers and
    /// quadrants are fixed at construction; see the crate's Open-Question
    /// decision on the (deferred) write API.
    pub fn quadrant(
        dimensions: Vec<Dimension>,
        dividers: Vec<Divider>,
        quadrants: Vec<QuadrantDef>,
    ) -> Result<Self> {
        if dimensions.is_empty() || dimensions.len() != dividers.len() {
            return Err(GateError::invalid_argument(
                "Quadrant requires >= 1 dimension with one divider each",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for d in &dividers {
            if !seen.insert(d.id.as_str()) {
                return Err(GateError::invalid_argument(format!(
                    "duplicate divider id '{}'",
                    d.id
                )));
            }
            if !d.values.windows(2).all(|w| w[0] < w[1]) {
                return Err(GateError::invalid_argument(format!(
                    "divider '{}' values must be strictly increasing",
                    d.id
                )));
            }
        }
        Ok(Self::from_inner(Self::base_inner(
            GateShape::Quadrant { dividers, quadrants },
            dimensions,
        )))
    }

    /// Boolean gate: zero dimensions, no additional clustering parameters.
    pub fn boolean(op: BooleanOp) -> Self {
        Self::from_inner(Self::base_inner(
            GateShape::Boolean {
                op,
                negate: Vec::new(),
            },
            Vec::new(),
        ))
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::from_inner(Self::base_inner(GateShape::Custom(name.into()), Vec::new()))
    }

    // --- accessors ---

    pub fn id(&self) -> GateId {
        self.0.borrow().id
    }

    pub fn shape_kind(&self) -> GateShapeKind {
        self.0.borrow().shape.kind()
    }

    pub fn num_dimensions(&self) -> usize {
        self.0.borrow().dimensions.len()
    }

    pub fn name(&self) -> Option<String> {
        self.0.borrow().name.clone()
    }

    pub fn description(&self) -> Option<String> {
        self.0.borrow().description.clone()
    }

    pub fn notes(&self) -> Option<String> {
        self.0.borrow().notes.clone()
    }

    pub fn original_id(&self) -> Option<String> {
        self.0.borrow().original_id.clone()
    }

    pub fn report_priority(&self) -> u32 {
        self.0.borrow().report_priority
    }

    pub fn gating_method(&self) -> GatingMethod {
        self.0.borrow().gating_method.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.0.borrow().attached
    }

    /// Used by [`crate::tree::GateTree`] to mark a gate attached/detached as
    /// a tree root, mirroring what `append_child`/`remove_child` do for it
    /// as a child.
    pub fn set_attached(&self, attached: bool) {
        self.0.borrow_mut().attached = attached;
    }

    pub fn dimension_parameter_name(&self, i: usize) -> Result<String> {
        let inner = self.0.borrow();
        inner
            .dimensions
            .get(i)
            .map(|d| d.parameter_name.clone())
            .ok_or_else(|| GateError::out_of_range(i, inner.dimensions.len()))
    }

    pub fn dimension_transform(&self, i: usize) -> Result<Option<Rc<Transform>>> {
        let inner = self.0.borrow();
        inner
            .dimensions
            .get(i)
            .map(|d| d.transform.clone())
            .ok_or_else(|| GateError::out_of_range(i, inner.dimensions.len()))
    }

    pub fn additional_params(&self) -> Vec<AdditionalClusteringParam> {
        self.0.borrow().additional_params.clone()
    }

    pub fn children(&self) -> Vec<Gate> {
        self.0.borrow().children.clone()
    }

    pub fn num_children(&self) -> usize {
        self.0.borrow().children.len()
    }

    /// The per-child `negate` flag on a Boolean gate's child at `index`.
    pub fn child_negate(&self, index: usize) -> Result<bool> {
        match &self.0.borrow().shape {
            GateShape::Boolean { negate, .. } => negate
                .get(index)
                .copied()
                .ok_or_else(|| GateError::out_of_range(index, negate.len())),
            _ => Err(GateError::invalid_argument(
                "child_negate is only defined for Boolean gates",
            )),
        }
    }

    /// Sets whether a Boolean gate's child at `index` is negated before
    /// combination, per §4.2.
    pub fn set_child_negate(&self, index: usize, value: bool) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Boolean { negate, .. } => {
                    let len = negate.len();
                    let slot = negate
                        .get_mut(index)
                        .ok_or_else(|| GateError::out_of_range(index, len))?;
                    *slot = value;
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_child_negate is only valid for Boolean gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.set_child_negate(g, index, value));
        Ok(())
    }

    pub fn observer(&self) -> Option<Rc<RefCell<dyn GateObserver>>> {
        self.0.borrow().observer.clone()
    }

    pub fn set_observer(&self, observer: Option<Rc<RefCell<dyn GateObserver>>>) {
        self.0.borrow_mut().observer = observer;
    }

    /// The gating cache's state for this gate, if any. See
    /// [`crate::cache::GatingCache`] and [`GateState`].
    pub fn cache_state(&self) -> Option<GateState> {
        self.0.borrow().cache_state.clone()
    }

    pub fn set_cache_state(&self, state: Option<GateState>) {
        self.0.borrow_mut().cache_state = state;
    }

    pub fn dim_min(&self, i: usize) -> Result<f64> {
        let inner = self.0.borrow();
        match &inner.shape {
            GateShape::Rectangle { bounds } => bounds
                .get(i)
                .map(|(min, _)| *min)
                .ok_or_else(|| GateError::out_of_range(i, bounds.len())),
            _ => Err(GateError::invalid_argument(
                "dim_min is only defined for Rectangle gates",
            )),
        }
    }

    pub fn dim_max(&self, i: usize) -> Result<f64> {
        let inner = self.0.borrow();
        match &inner.shape {
            GateShape::Rectangle { bounds } => bounds
                .get(i)
                .map(|(_, max)| *max)
                .ok_or_else(|| GateError::out_of_range(i, bounds.len())),
            _ => Err(GateError::invalid_argument(
                "dim_max is only defined for Rectangle gates",
            )),
        }
    }

    pub fn polygon_vertices(&self) -> Result<Vec<(f64, f64)>> {
        match &self.0.borrow().shape {
            GateShape::Polygon { vertices } => Ok(vertices.clone()),
            _ => Err(GateError::invalid_argument(
                "polygon_vertices is only defined for Polygon gates",
            )),
        }
    }

    pub fn polygon_bounding_box(&self) -> Result<((f64, f64), (f64, f64))> {
        match &self.0.borrow().shape {
            GateShape::Polygon { vertices } if !vertices.is_empty() => {
                let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
                let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
                for &(x, y) in vertices {
                    x_min = x_min.min(x);
                    x_max = x_max.max(x);
                    y_min = y_min.min(y);
                    y_max = y_max.max(y);
                }
                Ok(((x_min, y_min), (x_max, y_max)))
            }
            GateShape::Polygon { .. } => Err(GateError::invalid_argument(
                "polygon has no vertices to bound",
            )),
            _ => Err(GateError::invalid_argument(
                "polygon_bounding_box is only defined for Polygon gates",
            )),
        }
    }

    pub fn ellipsoid_center(&self) -> Result<Vec<f64>> {
        match &self.0.borrow().shape {
            GateShape::Ellipsoid { center, .. } => Ok(center.clone()),
            _ => Err(GateError::invalid_argument(
                "ellipsoid_center is only defined for Ellipsoid gates",
            )),
        }
    }

    pub fn ellipsoid_covariance(&self) -> Result<Vec<f64>> {
        match &self.0.borrow().shape {
            GateShape::Ellipsoid { covariance, .. } => Ok(covariance.clone()),
            _ => Err(GateError::invalid_argument(
                "ellipsoid_covariance is only defined for Ellipsoid gates",
            )),
        }
    }

    pub fn ellipsoid_distance_squared(&self) -> Result<f64> {
        match &self.0.borrow().shape {
            GateShape::Ellipsoid {
                distance_squared, ..
            } => Ok(*distance_squared),
            _ => Err(GateError::invalid_argument(
                "ellipsoid_distance_squared is only defined for Ellipsoid gates",
            )),
        }
    }

    pub fn dividers(&self) -> Result<Vec<Divider>> {
        match &self.0.borrow().shape {
            GateShape::Quadrant { dividers, .. } => Ok(dividers.clone()),
            _ => Err(GateError::invalid_argument(
                "dividers is only defined for Quadrant gates",
            )),
        }
    }

    pub fn quadrants(&self) -> Result<Vec<QuadrantDef>> {
        match &self.0.borrow().shape {
            GateShape::Quadrant { quadrants, .. } => Ok(quadrants.clone()),
            _ => Err(GateError::invalid_argument(
                "quadrants is only defined for Quadrant gates",
            )),
        }
    }

    // --- mutation: notify helper ---

    fn notify(&self, f: impl FnOnce(&mut dyn GateObserver, &Gate)) {
        let observer = self.0.borrow().observer.clone();
        let Some(observer) = observer else { return };
        let already = self.0.borrow().in_callback.replace(true);
        debug_assert!(!already, "observer callback re-entered its own gate's mutator");
        f(&mut *observer.borrow_mut(), self);
        self.0.borrow().in_callback.set(already);
    }

    // --- metadata mutators ---

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.0.borrow_mut().name = Some(name.clone());
        self.notify(|o, g| o.set_name(g, &name));
    }

    pub fn set_description(&self, description: impl Into<String>) {
        let description = description.into();
        self.0.borrow_mut().description = Some(description.clone());
        self.notify(|o, g| o.set_description(g, &description));
    }

    pub fn set_notes(&self, notes: impl Into<String>) {
        let notes = notes.into();
        self.0.borrow_mut().notes = Some(notes.clone());
        self.notify(|o, g| o.set_notes(g, &notes));
    }

    pub fn clear_notes(&self) {
        self.0.borrow_mut().notes = None;
    }

    pub fn clear_original_id(&self) {
        self.0.borrow_mut().original_id = None;
    }

    pub fn set_original_id(&self, original_id: impl Into<String>) {
        let original_id = original_id.into();
        self.0.borrow_mut().original_id = Some(original_id.clone());
        self.notify(|o, g| o.set_original_id(g, &original_id));
    }

    pub fn set_report_priority(&self, priority: u32) {
        self.0.borrow_mut().report_priority = priority;
        self.notify(|o, g| o.set_report_priority(g, priority));
    }

    pub fn set_gating_method(&self, method: GatingMethod) {
        self.0.borrow_mut().gating_method = method.clone();
        self.notify(|o, g| o.set_gating_method(g, &method));
    }

    // --- dimension mutators ---

    pub fn set_dimension_parameter_name(&self, index: usize, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        {
            let inner = self.0.borrow();
            if index >= inner.dimensions.len() {
                return Err(GateError::out_of_range(index, inner.dimensions.len()));
            }
            ensure_distinct_parameter_names(
                &inner.dimensions,
                &inner.additional_params,
                &name,
                Some(index),
            )?;
        }
        self.0.borrow_mut().dimensions[index].parameter_name = name.clone();
        self.notify(|o, g| o.set_dimension_parameter_name(g, index, &name));
        Ok(())
    }

    pub fn set_dimension_parameter_transform(
        &self,
        index: usize,
        transform: Option<Rc<Transform>>,
    ) -> Result<()> {
        {
            let inner = self.0.borrow();
            if index >= inner.dimensions.len() {
                return Err(GateError::out_of_range(index, inner.dimensions.len()));
            }
        }
        self.0.borrow_mut().dimensions[index].transform = transform.clone();
        self.notify(|o, g| o.set_dimension_parameter_transform(g, index, transform.as_deref()));
        Ok(())
    }

    // --- additional clustering parameters ---

    pub fn append_additional_clustering_param(
        &self,
        name: impl Into<String>,
        transform: Option<Rc<Transform>>,
    ) -> Result<()> {
        let name = name.into();
        {
            let inner = self.0.borrow();
            if matches!(inner.shape, GateShape::Boolean { .. }) {
                return Err(GateError::unsupported_feature(
                    "Boolean gates do not support additional clustering parameters",
                ));
            }
            ensure_distinct_parameter_names(
                &inner.dimensions,
                &inner.additional_params,
                &name,
                None,
            )?;
        }
        self.0.borrow_mut().additional_params.push(AdditionalClusteringParam {
            parameter_name: name.clone(),
            transform: transform.clone(),
        });
        self.notify(|o, g| o.append_additional_clustering_param(g, &name, transform.as_deref()));
        Ok(())
    }

    pub fn clear_additional_clustering_params(&self) {
        self.0.borrow_mut().additional_params.clear();
        self.notify(|o, g| o.clear_additional_clustering_params(g));
    }

    pub fn remove_additional_clustering_param(&self, name: &str) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            let before = inner.additional_params.len();
            inner.additional_params.retain(|p| p.parameter_name != name);
            if inner.additional_params.len() == before {
                return Err(GateError::invalid_argument(format!(
                    "no additional clustering parameter named '{name}'"
                )));
            }
        }
        self.notify(|o, g| o.remove_additional_clustering_param(g, name));
        Ok(())
    }

    pub fn set_additional_clustering_param_transform(
        &self,
        name: &str,
        transform: Option<Rc<Transform>>,
    ) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            let Some(p) = inner
                .additional_params
                .iter_mut()
                .find(|p| p.parameter_name == name)
            else {
                return Err(GateError::invalid_argument(format!(
                    "no additional clustering parameter named '{name}'"
                )));
            };
            p.transform = transform.clone();
        }
        self.notify(|o, g| o.set_additional_clustering_param_transform(g, name, transform.as_deref()));
        Ok(())
    }

    // --- children ---

    fn is_ancestor_of(&self, other: &Gate) -> bool {
        self.0
            .borrow()
            .children
            .iter()
            .any(|c| c == other || c.is_ancestor_of(other))
    }

    pub fn append_child(&self, child: Gate) -> Result<()> {
        if child.is_attached() {
            return Err(GateError::invalid_argument(
                "cannot append an already-attached gate as a child",
            ));
        }
        if &child == self || child.is_ancestor_of(self) {
            return Err(GateError::invalid_argument(
                "a gate cannot be appended as its own ancestor",
            ));
        }
        if let GateShape::Boolean {
            op: BooleanOp::Not,
            negate,
        } = &self.0.borrow().shape
        {
            if !negate.is_empty() {
                return Err(GateError::invalid_argument(
                    "a Not gate accepts at most 1 child",
                ));
            }
        }
        child.0.borrow_mut().attached = true;
        if let GateShape::Boolean { negate, .. } = &mut self.0.borrow_mut().shape {
            negate.push(false);
        }
        self.0.borrow_mut().children.push(child.clone());
        tracing::trace!(parent = ?self.id(), child = ?child.id(), "gate: child appended");
        self.notify(|o, g| o.append_child(g, &child));
        Ok(())
    }

    pub fn clear_children(&self) {
        let children = std::mem::take(&mut self.0.borrow_mut().children);
        for c in &children {
            c.0.borrow_mut().attached = false;
        }
        if let GateShape::Boolean { negate, .. } = &mut self.0.borrow_mut().shape {
            negate.clear();
        }
        tracing::trace!(gate = ?self.id(), num_children = children.len(), "gate: children cleared");
        self.notify(|o, g| o.clear_children(g));
    }

    pub fn remove_child(&self, child: &Gate) -> Result<()> {
        let pos = {
            let inner = self.0.borrow();
            inner.children.iter().position(|c| c == child)
        };
        let Some(pos) = pos else {
            return Err(GateError::invalid_argument(
                "gate is not a child of this gate",
            ));
        };
        {
            let mut inner = self.0.borrow_mut();
            inner.children.remove(pos);
            if let GateShape::Boolean { negate, .. } = &mut inner.shape {
                if pos < negate.len() {
                    negate.remove(pos);
                }
            }
        }
        child.0.borrow_mut().attached = false;
        tracing::trace!(parent = ?self.id(), child = ?child.id(), "gate: child removed");
        self.notify(|o, g| o.remove_child(g, child));
        Ok(())
    }

    // --- rectangle mutators ---

    pub fn set_rectangle_min_max(&self, index: usize, min: f64, max: f64) -> Result<()> {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        {
            let mut inner = self.0.borrow_mut();
            let len = match &inner.shape {
                GateShape::Rectangle { bounds } => bounds.len(),
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_rectangle_min_max is only valid for Rectangle gates",
                    ));
                }
            };
            if index >= len {
                return Err(GateError::out_of_range(index, len));
            }
            if let GateShape::Rectangle { bounds } = &mut inner.shape {
                bounds[index] = (min, max);
            }
        }
        self.notify(|o, g| o.set_rectangle_min_max(g, index, min, max));
        Ok(())
    }

    // --- ellipsoid mutators ---

    pub fn set_ellipsoid_center(&self, center: Vec<f64>) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Ellipsoid { center: c, .. } => {
                    if center.len() != c.len() {
                        return Err(GateError::invalid_argument(format!(
                            "Ellipsoid center length must equal the dimension count ({})",
                            c.len()
                        )));
                    }
                    *c = center.clone();
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_ellipsoid_center is only valid for Ellipsoid gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.set_ellipsoid_center(g, &center));
        Ok(())
    }

    pub fn set_ellipsoid_covariance(&self, covariance: Vec<f64>) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Ellipsoid {
                    center,
                    covariance: cov,
                    ..
                } => {
                    let n = center.len();
                    if covariance.len() != n * n {
                        return Err(GateError::invalid_argument(format!(
                            "Ellipsoid covariance must be N*N (N={n})"
                        )));
                    }
                    *cov = covariance.clone();
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_ellipsoid_covariance is only valid for Ellipsoid gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.set_ellipsoid_covariance(g, &covariance));
        Ok(())
    }

    pub fn set_ellipsoid_distance_squared(&self, distance_squared: f64) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Ellipsoid {
                    distance_squared: d,
                    ..
                } => {
                    if !(distance_squared > 0.0) {
                        return Err(GateError::invalid_argument(
                            "Ellipsoid distance_squared must be > 0",
                        ));
                    }
                    *d = distance_squared;
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_ellipsoid_distance_squared is only valid for Ellipsoid gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.set_ellipsoid_distance_squared(g, distance_squared));
        Ok(())
    }

    // --- polygon mutators ---

    pub fn append_polygon_vertex(&self, x: f64, y: f64) -> Result<usize> {
        let index = {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Polygon { vertices } => {
                    vertices.push((x, y));
                    vertices.len() - 1
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "append_polygon_vertex is only valid for Polygon gates",
                    ));
                }
            }
        };
        self.notify(|o, g| o.append_polygon_vertex(g, index, x, y));
        Ok(index)
    }

    pub fn set_polygon_vertex(&self, index: usize, x: f64, y: f64) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Polygon { vertices } => {
                    if index >= vertices.len() {
                        return Err(GateError::out_of_range(index, vertices.len()));
                    }
                    vertices[index] = (x, y);
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "set_polygon_vertex is only valid for Polygon gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.set_polygon_vertex(g, index, x, y));
        Ok(())
    }

    pub fn remove_polygon_vertex(&self, index: usize) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Polygon { vertices } => {
                    if index >= vertices.len() {
                        return Err(GateError::out_of_range(index, vertices.len()));
                    }
                    vertices.remove(index);
                }
                _ => {
                    return Err(GateError::invalid_argument(
                        "remove_polygon_vertex is only valid for Polygon gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.remove_polygon_vertex(g, index));
        Ok(())
    }

    pub fn clear_polygon_vertices(&self) -> Result<()> {
        {
            let mut inner = self.0.borrow_mut();
            match &mut inner.shape {
                GateShape::Polygon { vertices } => vertices.clear(),
                _ => {
                    return Err(GateError::invalid_argument(
                        "clear_polygon_vertices is only valid for Polygon gates",
                    ));
                }
            }
        }
        self.notify(|o, g| o.clear_polygon_vertices(g));
        Ok(())
    }

    /// Deep-copies shape, metadata and children, assigning fresh ids to the
    /// clone and every descendant. The clone starts unattached with no
    /// observer, matching spec.md §8's "equal except for ids" contract.
    pub fn deep_clone(&self) -> Gate {
        let inner = self.0.borrow();
        let cloned_children: Vec<Gate> = inner.children.iter().map(Gate::deep_clone).collect();
        let clone = Gate::from_inner(GateInner {
            id: next_gate_id(),
            original_id: inner.original_id.clone(),
            name: inner.name.clone(),
            description: inner.description.clone(),
            notes: inner.notes.clone(),
            report_priority: inner.report_priority,
            gating_method: inner.gating_method.clone(),
            dimensions: inner.dimensions.clone(),
            additional_params: inner.additional_params.clone(),
            children: Vec::new(),
            attached: false,
            shape: inner.shape.clone(),
            observer: None,
            cache_state: None,
            in_callback: Cell::new(false),
        });
        for child in cloned_children {
            // Children were deep-cloned unattached; append_child's cycle
            // check is trivially satisfied for a fresh subtree.
            clone.append_child(child).expect("fresh clone cannot cycle");
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl GateObserver for Recorder {
        fn set_rectangle_min_max(&mut self, _gate: &Gate, index: usize, min: f64, max: f64) {
            self.events
                .push(format!("rectangle_min_max_changed({index}, {min}, {max})"));
        }
        fn append_child(&mut self, _gate: &Gate, _child: &Gate) {
            self.events.push("append_child".into());
        }
        fn remove_child(&mut self, _gate: &Gate, _child: &Gate) {
            self.events.push("remove_child".into());
        }
        fn set_dimension_parameter_transform(
            &mut self,
            _gate: &Gate,
            index: usize,
            _transform: Option<&Transform>,
        ) {
            self.events
                .push(format!("set_dimension_parameter_transform({index})"));
        }
    }

    fn rect(dims: usize) -> Gate {
        let dimensions = (0..dims)
            .map(|i| Dimension::new(format!("P{i}"), None))
            .collect();
        let bounds = (0..dims).map(|_| (0.0, 1.0)).collect();
        Gate::rectangle(dimensions, bounds).unwrap()
    }

    // invariant 6
    #[test]
    fn rectangle_min_max_fires_exactly_one_callback() {
        let g = rect(2);
        let observer = Rc::new(StdRefCell::new(Recorder::default()));
        g.set_observer(Some(observer.clone()));

        g.set_rectangle_min_max(0, 0.1, 0.9).unwrap();

        assert_eq!(g.dim_min(0).unwrap(), 0.1);
        assert_eq!(g.dim_max(0).unwrap(), 0.9);
        assert_eq!(
            observer.borrow().events,
            vec!["rectangle_min_max_changed(0, 0.1, 0.9)"]
        );
    }

    #[test]
    fn rectangle_swaps_out_of_order_bounds() {
        let g = Gate::rectangle(vec![Dimension::new("P0", None)], vec![(5.0, 1.0)]).unwrap();
        assert_eq!(g.dim_min(0).unwrap(), 1.0);
        assert_eq!(g.dim_max(0).unwrap(), 5.0);
    }

    #[test]
    fn linear_boundary_zero_a() {
        let g = Gate::rectangle(vec![Dimension::new("P0", None)], vec![(0.0, 10.0)]).unwrap();
        assert_eq!(g.dim_min(0).unwrap(), 0.0);
        assert_eq!(g.dim_max(0).unwrap(), 10.0);
    }

    // invariant 10
    #[test]
    fn dimension_and_additional_parameter_names_must_be_distinct() {
        let g = rect(2);
        assert!(g.append_additional_clustering_param("P0", None).is_err());
        assert!(g.append_additional_clustering_param("P2", None).is_ok());
        assert!(g.append_additional_clustering_param("P2", None).is_err());
    }

    #[test]
    fn boolean_gates_reject_additional_clustering_params() {
        let g = Gate::boolean(BooleanOp::Or);
        assert!(g.append_additional_clustering_param("P0", None).is_err());
    }

    // round-trip: append then remove returns to original structure
    #[test]
    fn append_then_remove_child_restores_structure() {
        let parent = rect(1);
        let child = rect(1);
        parent.append_child(child.clone()).unwrap();
        assert_eq!(parent.num_children(), 1);
        assert!(child.is_attached());

        parent.remove_child(&child).unwrap();
        assert_eq!(parent.num_children(), 0);
        assert!(!child.is_attached());
    }

    // S6
    #[test]
    fn reparenting_an_attached_child_is_rejected() {
        let a = rect(1);
        let b = rect(1);
        let c = rect(1);
        a.append_child(c.clone()).unwrap();

        let err = b.append_child(c.clone()).unwrap_err();
        assert!(matches!(err, GateError::InvalidArgument { .. }));
        assert_eq!(a.num_children(), 1);
        assert_eq!(b.num_children(), 0);
    }

    #[test]
    fn cannot_append_an_ancestor_as_a_child() {
        let a = rect(1);
        let b = rect(1);
        a.append_child(b.clone()).unwrap();
        assert!(b.append_child(a.clone()).is_err());
    }

    // §4.2: a Not gate accepts at most 1 child.
    #[test]
    fn not_gate_rejects_a_second_child() {
        let not_gate = Gate::boolean(BooleanOp::Not);
        not_gate.append_child(rect(1)).unwrap();
        let err = not_gate.append_child(rect(1)).unwrap_err();
        assert!(matches!(err, GateError::InvalidArgument { .. }));
        assert_eq!(not_gate.num_children(), 1);
    }

    #[test]
    fn or_gate_accepts_more_than_one_child() {
        let or_gate = Gate::boolean(BooleanOp::Or);
        or_gate.append_child(rect(1)).unwrap();
        or_gate.append_child(rect(1)).unwrap();
        assert_eq!(or_gate.num_children(), 2);
    }

    #[test]
    fn child_negate_is_settable_and_readable() {
        let g = Gate::boolean(BooleanOp::And);
        let child = rect(1);
        g.append_child(child).unwrap();
        assert!(!g.child_negate(0).unwrap());

        g.set_child_negate(0, true).unwrap();
        assert!(g.child_negate(0).unwrap());

        assert!(g.set_child_negate(1, true).is_err());
        assert!(rect(1).set_child_negate(0, true).is_err());
    }

    #[test]
    fn deep_clone_is_structurally_equal_but_has_new_ids() {
        let parent = rect(1);
        let child = rect(1);
        parent.append_child(child).unwrap();
        parent.set_name("root");

        let clone = parent.deep_clone();
        assert_ne!(clone.id(), parent.id());
        assert_eq!(clone.name(), parent.name());
        assert_eq!(clone.num_children(), parent.num_children());
        assert_ne!(clone.children()[0].id(), parent.children()[0].id());
        assert!(!clone.is_attached());
    }

    #[test]
    fn polygon_vertex_operations_round_trip() {
        let g = Gate::polygon(
            [Dimension::new("FSC-A", None), Dimension::new("SSC-A", None)],
            vec![],
        )
        .unwrap();
        g.append_polygon_vertex(0.0, 0.0).unwrap();
        g.append_polygon_vertex(1.0, 0.0).unwrap();
        g.append_polygon_vertex(1.0, 1.0).unwrap();
        assert_eq!(g.polygon_vertices().unwrap().len(), 3);

        g.set_polygon_vertex(1, 2.0, 0.0).unwrap();
        assert_eq!(g.polygon_vertices().unwrap()[1], (2.0, 0.0));

        g.remove_polygon_vertex(0).unwrap();
        assert_eq!(g.polygon_vertices().unwrap().len(), 2);

        g.clear_polygon_vertices().unwrap();
        assert!(g.polygon_vertices().unwrap().is_empty());
    }

    #[test]
    fn quadrant_rejects_non_increasing_divider_values() {
        let dims = vec![Dimension::new("FSC-A", None)];
        let dividers = vec![Divider {
            id: "d0".into(),
            values: vec![0.5, 0.2],
        }];
        assert!(Gate::quadrant(dims, dividers, vec![]).is_err());
    }

    #[test]
    fn ellipsoid_validates_shapes() {
        let dims = vec![Dimension::new("A", None), Dimension::new("B", None)];
        assert!(Gate::ellipsoid(dims.clone(), vec![0.0, 0.0], vec![1.0, 0.0, 0.0, 1.0], 1.0).is_ok());
        assert!(Gate::ellipsoid(dims, vec![0.0], vec![1.0, 0.0, 0.0, 1.0], 1.0).is_err());
    }

    #[test]
    fn ellipsoid_setters_validate_and_round_trip() {
        let dims = vec![Dimension::new("A", None), Dimension::new("B", None)];
        let g = Gate::ellipsoid(dims, vec![0.0, 0.0], vec![1.0, 0.0, 0.0, 1.0], 1.0).unwrap();

        g.set_ellipsoid_center(vec![1.0, 2.0]).unwrap();
        assert_eq!(g.ellipsoid_center().unwrap(), vec![1.0, 2.0]);
        assert!(g.set_ellipsoid_center(vec![1.0]).is_err());

        g.set_ellipsoid_covariance(vec![2.0, 0.0, 0.0, 2.0]).unwrap();
        assert_eq!(g.ellipsoid_covariance().unwrap(), vec![2.0, 0.0, 0.0, 2.0]);
        assert!(g.set_ellipsoid_covariance(vec![1.0, 0.0]).is_err());

        g.set_ellipsoid_distance_squared(4.0).unwrap();
        assert_eq!(g.ellipsoid_distance_squared().unwrap(), 4.0);
        assert!(g.set_ellipsoid_distance_squared(0.0).is_err());
        assert!(g.set_ellipsoid_distance_squared(-1.0).is_err());

        assert!(rect(1).ellipsoid_center().is_err());
    }
}
