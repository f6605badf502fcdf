//! Process-wide identifier service (component A).
//!
//! `GateId` and `TransformId` are assigned by a monotonic counter per type,
//! unique within the process for its run. They are never reused; wrap-around
//! is accepted but undocumented. The counters are atomic so the library
//! remains safe to use from multiple threads even though gates/transforms
//! themselves are not (see the crate-level docs).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_GATE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_TRANSFORM_ID: AtomicU32 = AtomicU32::new(1);

/// Unique identifier for a gate, assigned by [`next_gate_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateId(pub u32);

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transform, assigned by [`next_transform_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformId(pub u32);

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocate the next process-wide unique gate id.
pub fn next_gate_id() -> GateId {
    GateId(NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Allocate the next process-wide unique transform id.
pub fn next_transform_id() -> TransformId {
    TransformId(NEXT_TRANSFORM_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_ids_are_monotonic_and_unique() {
        let a = next_gate_id();
        let b = next_gate_id();
        let c = next_gate_id();
        assert!(a.0 < b.0);
        assert!(b.0 < c.0);
    }

    #[test]
    fn gate_and_transform_counters_are_independent() {
        let g = next_gate_id();
        let t = next_transform_id();
        // Both advance independently; no ordering relationship is guaranteed
        // or required, only that each counter is internally monotonic.
        let g2 = next_gate_id();
        let t2 = next_transform_id();
        assert!(g2.0 > g.0);
        assert!(t2.0 > t.0);
    }
}
