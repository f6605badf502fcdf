//! # flow-gates
//!
//! A library for modeling gating descriptions in flow cytometry data: gates,
//! transforms, gate trees, and the per-gate state that caches gate evaluation
//! results against an event table.
//!
//! ## Overview
//!
//! Flow cytometry gating describes regions of interest in multi-dimensional
//! data space. This library provides:
//!
//! - **Transforms**: scale transforms (Linear, Log, InverseHyperbolicSine,
//!   Logicle, Hyperlog, Custom) applied to raw event values before gating.
//! - **Gates**: a closed family of gate shapes (Rectangle, Polygon, Ellipsoid,
//!   Quadrant, Boolean, Custom) organized into parent/child trees.
//! - **Gate state**: a per-gate cache of transformed event columns and the
//!   inclusion mask produced by evaluating a gate against an event table.
//! - **Observers**: an open extension point notified of every gate/tree
//!   mutation, used by the gating cache to keep derived state current.
//!
//! This library does not evaluate point-in-gate containment, read FCS files,
//! render plots, or parse GatingML — those are external collaborators.
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_gates::transform::Transform;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transform = Transform::logicle_default();
//! let scaled = transform.apply(1000.0);
//! assert!((0.0..=1.0).contains(&scaled));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Gates and gate trees
//!
//! A [`gate::Gate`] is a shared, mutable node (`Rc<RefCell<_>>`) describing one
//! region of interest and its children. A [`tree::GateTree`] owns a forest of
//! root gates plus file-level metadata.
//!
//! ### Gate state and the gating cache
//!
//! A [`state::GateState`] binds one gate to an [`event_table::EventTable`],
//! caching the gate's per-dimension transformed columns and inclusion mask. A
//! [`cache::GatingCache`] manages this binding across an entire tree, keeping
//! cached state invalidated as the tree mutates.
//!
//! ## Error Handling
//!
//! The library uses [`GateError`] for all error conditions. Most operations
//! return [`Result<T, GateError>`](GateResult).

pub mod cache;
pub mod error;
pub mod event_table;
pub mod gate;
pub mod ids;
pub mod observer;
pub mod state;
pub mod transform;
pub mod tree;
pub mod tsv;

/// Error types for gate/transform/tree operations.
pub use error::{GateError, Result as GateResult};

/// Process-wide gate/transform identifiers.
pub use ids::{GateId, TransformId, next_gate_id, next_transform_id};

/// The scale transform family.
pub use transform::{Transform, TransformKind};

/// The gate family and gate-tree container.
pub use gate::{Gate, GateShape};
pub use tree::GateTree;

/// The observer protocol.
pub use observer::{GateObserver, TreeObserver};

/// Per-gate cached state and the tree-wide gating cache.
pub use cache::GatingCache;
pub use state::{ColumnSet, GateState};

/// The event-table collaborator interface.
pub use event_table::EventTable;

/// The legacy TSV gate file loader.
pub use tsv::{FileLog, FileLogEntry, LogCategory};
