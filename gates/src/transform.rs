//! The transform family (component B): a closed set of scale transforms that
//! precondition raw event values before a gate classifies them.
//!
//! Every transform is an immutable, cheaply-clonable value. Parameters are
//! validated once at construction (`InvalidArgument` on failure); thereafter
//! a transform can only be replaced, never mutated in place.

use crate::error::{GateError, Result};
use crate::ids::{TransformId, next_transform_id};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const TAYLOR_LENGTH: usize = 16;

/// Below this element count, the scalar loop beats rayon's dispatch overhead.
/// Matches the threshold philosophy used for `flow-fcs`'s datatype conversions.
const PARALLEL_THRESHOLD: usize = 4096;

/// A named, described, immutable scale transform.
#[derive(Debug, Clone, Serialize)]
pub struct Transform {
    pub id: TransformId,
    pub original_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(flatten)]
    kind: TransformKind,
}

/// The closed family of transform kinds, with kind-specific parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum TransformKind {
    Linear {
        t: f64,
        a: f64,
    },
    Log {
        t: f64,
        m: f64,
    },
    InverseHyperbolicSine {
        t: f64,
        m: f64,
        a: f64,
    },
    Logicle {
        t: f64,
        m: f64,
        w: f64,
        a: f64,
        #[serde(skip)]
        ctx: LogicleContext,
    },
    /// See the "Hyperlog" doc below: implemented as a symmetric (`d == b`)
    /// member of the same biexponential family as Logicle rather than a
    /// stub, per the REDESIGN FLAGS decision recorded in DESIGN.md.
    Hyperlog {
        t: f64,
        m: f64,
        w: f64,
        a: f64,
        #[serde(skip)]
        ctx: LogicleContext,
    },
    Custom {
        name: String,
    },
}

/// Precomputed state for the Logicle (and symmetric Hyperlog) biexponential
/// root solve: everything in spec.md §4.1's "At construction, derive: ..."
/// list, plus the 16-term Taylor series used near `x1`.
#[derive(Debug, Clone, Default)]
pub struct LogicleContext {
    pub w: f64,
    pub x0: f64,
    pub x1: f64,
    pub x2: f64,
    pub b: f64,
    pub d: f64,
    pub a: f64,
    pub c: f64,
    pub f: f64,
    pub x_taylor: f64,
    pub taylor: [f64; TAYLOR_LENGTH],
}

impl LogicleContext {
    /// `force_symmetric` skips the `d` root solve and sets `d = b` directly —
    /// used both for Logicle's documented `W == 0` edge case and for Hyperlog
    /// (see the type's doc comment).
    fn build(t: f64, m: f64, w_param: f64, a_param: f64, force_symmetric: bool) -> Result<Self> {
        if !(t > 0.0) {
            return Err(GateError::invalid_argument("T must be > 0"));
        }
        if !(m > 0.0) {
            return Err(GateError::invalid_argument("M must be > 0"));
        }
        if !(0.0..=m / 2.0).contains(&w_param) {
            return Err(GateError::invalid_argument("W must satisfy 0 <= W <= M/2"));
        }
        if !(-w_param..=m - 2.0 * w_param).contains(&a_param) {
            return Err(GateError::invalid_argument(
                "A must satisfy -W <= A <= M - 2W",
            ));
        }

        let w = w_param / (m + a_param);
        let x2 = a_param / (m + a_param);
        let x1 = x2 * w;
        let x0 = 2.0 * x1;
        let b = (m + a_param) * std::f64::consts::LN_10;
        let d = if force_symmetric || w == 0.0 {
            b
        } else {
            solve_d(b, w)?
        };

        let c_a = (x0 * (b + d)).exp();
        let mf_a = (b * x1).exp() - c_a / (d * x1).exp();
        let a = t / (b.exp() - mf_a - c_a / d.exp());
        let c = c_a * a;
        let f = -mf_a * a;
        let x_taylor = x1 + w / 4.0;

        let mut taylor = [0.0_f64; TAYLOR_LENGTH];
        let mut pos_coef = a * (b * x1).exp();
        let mut neg_coef = -c * (-d * x1).exp();
        for (i, slot) in taylor.iter_mut().enumerate() {
            pos_coef *= b / (i as f64 + 1.0);
            neg_coef *= -d / (i as f64 + 1.0);
            *slot = pos_coef + neg_coef;
        }
        taylor[1] = 0.0;

        Ok(Self {
            w,
            x0,
            x1,
            x2,
            b,
            d,
            a,
            c,
            f,
            x_taylor,
            taylor,
        })
    }

    fn series_biexponential(&self, scale: f64) -> f64 {
        let x = scale - self.x1;
        let mut sum = self.taylor[TAYLOR_LENGTH - 1] * x;
        for coef in self.taylor[..TAYLOR_LENGTH - 1].iter().rev() {
            sum = (sum + coef) * x;
        }
        sum
    }

    /// Solve `a*e^(b*y) - c*e^(-d*y) - f = value` for `y` (Halley's method,
    /// cubic convergence; see spec.md §4.1 "Evaluation for a given value").
    fn scale(&self, value: f64) -> f64 {
        if value == 0.0 {
            return self.x1;
        }

        let negative = value < 0.0;
        let value = if negative { -value } else { value };

        let mut x = if value < self.f {
            self.x1 + value / self.taylor[0]
        } else {
            (value / self.a).ln() / self.b
        };

        let tolerance = if x > 1.0 {
            3.0 * x * f64::EPSILON
        } else {
            3.0 * f64::EPSILON
        };

        for _ in 0..10 {
            let ae2bx = self.a * (self.b * x).exp();
            let ce2mdx = self.c / (self.d * x).exp();
            let y = if x < self.x_taylor {
                self.series_biexponential(x) - value
            } else {
                (ae2bx + self.f) - (ce2mdx + value)
            };
            let abe2bx = self.b * ae2bx;
            let cde2mdx = self.d * ce2mdx;
            let dy = abe2bx + cde2mdx;
            let ddy = self.b * abe2bx - self.d * cde2mdx;

            let delta = y / (dy * (1.0 - y * ddy / (2.0 * dy * dy)));
            x -= delta;

            if delta.abs() < tolerance {
                return if negative { 2.0 * self.x1 - x } else { x };
            }
        }
        // 10 iterations is the contract in spec.md; if we haven't converged
        // return the best estimate rather than erroring a hot numeric path.
        if negative { 2.0 * self.x1 - x } else { x }
    }
}

/// Combined Newton/bisection root finder ("rtsafe") for `d` on `(0, b]`,
/// solving `2*ln(d) - 2*ln(b) + w*(d + b) == 0` (spec.md §4.1 "Root solver").
fn solve_d(b: f64, w: f64) -> Result<f64> {
    if w == 0.0 {
        return Ok(b);
    }

    let tolerance = 2.0 * b * f64::EPSILON;
    let mut d_lo = 0.0_f64;
    let mut d_hi = b;
    let mut d = (d_lo + d_hi) / 2.0;
    let mut last_delta = d_hi - d_lo;

    let f_b = -2.0 * b.ln() + w * b;
    let mut f = 2.0 * d.ln() + w * d + f_b;
    let mut last_f = f64::NAN;

    for _ in 0..20 {
        let df = 2.0 / d + w;
        let delta;

        if ((d - d_hi) * df - f) * ((d - d_lo) * df - f) > 0.0
            || (1.9 * f).abs() > (last_delta * df).abs()
        {
            delta = (d_hi - d_lo) / 2.0;
            let new_d = d_lo + delta;
            if new_d == d_lo {
                return Ok(new_d);
            }
            d = new_d;
        } else {
            delta = f / df;
            let prev = d;
            d -= delta;
            if d == prev {
                return Ok(d);
            }
        }

        if delta.abs() < tolerance {
            return Ok(d);
        }
        last_delta = delta;

        f = 2.0 * d.ln() + w * d + f_b;
        if f == 0.0 || f == last_f {
            return Ok(d);
        }
        last_f = f;

        if f < 0.0 {
            d_lo = d;
        } else {
            d_hi = d;
        }
    }

    Err(GateError::invalid_argument(
        "logicle root solver for d failed to converge",
    ))
}

impl Transform {
    fn new(kind: TransformKind) -> Self {
        Self {
            id: next_transform_id(),
            original_id: None,
            name: None,
            description: None,
            kind,
        }
    }

    pub fn id(&self) -> TransformId {
        self.id
    }

    pub fn kind(&self) -> &TransformKind {
        &self.kind
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_original_id(mut self, original_id: impl Into<String>) -> Self {
        self.original_id = Some(original_id.into());
        self
    }

    /// `y = (x + A) / (T + A)`. Preconditions: `T > 0`, `0 <= A <= T`.
    pub fn linear(t: f64, a: f64) -> Result<Self> {
        if !(t > 0.0) {
            return Err(GateError::invalid_argument("Linear: T must be > 0"));
        }
        if !(0.0..=t).contains(&a) {
            return Err(GateError::invalid_argument(
                "Linear: A must satisfy 0 <= A <= T",
            ));
        }
        Ok(Self::new(TransformKind::Linear { t, a }))
    }

    /// `y = log10(x/T)/M + 1`. Preconditions: `T > 0`, `M > 0`.
    pub fn log(t: f64, m: f64) -> Result<Self> {
        if !(t > 0.0) {
            return Err(GateError::invalid_argument("Log: T must be > 0"));
        }
        if !(m > 0.0) {
            return Err(GateError::invalid_argument("Log: M must be > 0"));
        }
        Ok(Self::new(TransformKind::Log { t, m }))
    }

    /// `y = (asinh(x*sinh(M*ln10)/T) + A*ln10) / ((M+A)*ln10)`.
    /// Preconditions: `T > 0`, `M > 0`, `0 <= A <= M`.
    pub fn inverse_hyperbolic_sine(t: f64, m: f64, a: f64) -> Result<Self> {
        if !(t > 0.0) {
            return Err(GateError::invalid_argument(
                "InverseHyperbolicSine: T must be > 0",
            ));
        }
        if !(m > 0.0) {
            return Err(GateError::invalid_argument(
                "InverseHyperbolicSine: M must be > 0",
            ));
        }
        if !(0.0..=m).contains(&a) {
            return Err(GateError::invalid_argument(
                "InverseHyperbolicSine: A must satisfy 0 <= A <= M",
            ));
        }
        Ok(Self::new(TransformKind::InverseHyperbolicSine { t, m, a }))
    }

    /// Parks-Roederer-Moore biexponential transform. Defaults match
    /// `logicle_default`: T=262144, A=0, M=4.5, W=0.5.
    pub fn logicle(t: f64, m: f64, w: f64, a: f64) -> Result<Self> {
        let ctx = LogicleContext::build(t, m, w, a, false)?;
        Ok(Self::new(TransformKind::Logicle { t, m, w, a, ctx }))
    }

    pub fn logicle_default() -> Self {
        Self::logicle(262144.0, 4.5, 0.5, 0.0).expect("default logicle parameters are valid")
    }

    /// Hyperlog: same parameter contract as Logicle, but with the second
    /// exponential rate forced equal to the first (`d == b`), making it a
    /// symmetric member of the biexponential family that needs no `d` root
    /// solve. See the type's doc comment and DESIGN.md for the rationale.
    pub fn hyperlog(t: f64, m: f64, w: f64, a: f64) -> Result<Self> {
        let ctx = LogicleContext::build(t, m, w, a, true)?;
        Ok(Self::new(TransformKind::Hyperlog { t, m, w, a, ctx }))
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(TransformKind::Custom { name: name.into() })
    }

    /// Map a single raw value to its transformed value.
    pub fn apply(&self, x: f64) -> f64 {
        match &self.kind {
            TransformKind::Linear { t, a } => (x + a) / (t + a),
            TransformKind::Log { t, m } => (x / t).log10() / m + 1.0,
            TransformKind::InverseHyperbolicSine { t, m, a } => {
                let ln10 = std::f64::consts::LN_10;
                ((x * (m * ln10).sinh() / t).asinh() + a * ln10) / ((m + a) * ln10)
            }
            TransformKind::Logicle { ctx, .. } => ctx.scale(x),
            TransformKind::Hyperlog { ctx, .. } => ctx.scale(x),
            TransformKind::Custom { .. } => x,
        }
    }

    /// Bulk-transform an `f64` slice in place. Parallel and branch-free for
    /// Linear/Log (closed-form overrides); falls back to a pointwise scalar
    /// loop, parallelized above [`PARALLEL_THRESHOLD`], for the rest.
    pub fn apply_bulk_f64(&self, xs: &mut [f64]) {
        match &self.kind {
            TransformKind::Linear { t, a } => {
                let inv_span = 1.0 / (t + a);
                let a = *a;
                run_bulk(xs, |x| (x + a) * inv_span);
            }
            TransformKind::Log { t, m } => {
                let inv_m = 1.0 / m;
                let t = *t;
                run_bulk(xs, |x| (x / t).log10() * inv_m + 1.0);
            }
            _ => run_bulk(xs, |x| self.apply(x)),
        }
    }

    /// Bulk-transform an `f32` slice in place (event tables may store either
    /// `f32` or `f64` columns per spec.md §3.5).
    pub fn apply_bulk_f32(&self, xs: &mut [f32]) {
        match &self.kind {
            TransformKind::Linear { t, a } => {
                let inv_span = (1.0 / (t + a)) as f32;
                let a = *a as f32;
                run_bulk(xs, |x| (x + a) * inv_span);
            }
            TransformKind::Log { t, m } => {
                let inv_m = (1.0 / m) as f32;
                let t = *t as f32;
                run_bulk(xs, |x| (x / t).log10() * inv_m + 1.0);
            }
            _ => run_bulk(xs, |x| self.apply(x as f64) as f32),
        }
    }
}

fn run_bulk<T: Copy + Send>(xs: &mut [T], f: impl Fn(T) -> T + Sync) {
    if xs.len() >= PARALLEL_THRESHOLD {
        xs.par_iter_mut().for_each(|x| *x = f(*x));
    } else {
        xs.iter_mut().for_each(|x| *x = f(*x));
    }
}

// --- Deserialize: the LogicleContext cache is never trusted from the wire;
// it is always recomputed from (t, m, w, a) through the validating
// constructors, per DESIGN.md's note on this module. ---

#[derive(Deserialize)]
#[serde(tag = "kind")]
enum TransformKindWire {
    Linear {
        t: f64,
        a: f64,
    },
    Log {
        t: f64,
        m: f64,
    },
    InverseHyperbolicSine {
        t: f64,
        m: f64,
        a: f64,
    },
    Logicle {
        t: f64,
        m: f64,
        w: f64,
        a: f64,
    },
    Hyperlog {
        t: f64,
        m: f64,
        w: f64,
        a: f64,
    },
    Custom {
        name: String,
    },
}

#[derive(Deserialize)]
struct TransformWire {
    id: TransformId,
    original_id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(flatten)]
    kind: TransformKindWire,
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = TransformWire::deserialize(deserializer)?;
        let kind = match wire.kind {
            TransformKindWire::Linear { t, a } => TransformKind::Linear { t, a },
            TransformKindWire::Log { t, m } => TransformKind::Log { t, m },
            TransformKindWire::InverseHyperbolicSine { t, m, a } => {
                TransformKind::InverseHyperbolicSine { t, m, a }
            }
            TransformKindWire::Logicle { t, m, w, a } => {
                let ctx = LogicleContext::build(t, m, w, a, false)
                    .map_err(serde::de::Error::custom)?;
                TransformKind::Logicle { t, m, w, a, ctx }
            }
            TransformKindWire::Hyperlog { t, m, w, a } => {
                let ctx =
                    LogicleContext::build(t, m, w, a, true).map_err(serde::de::Error::custom)?;
                TransformKind::Hyperlog { t, m, w, a, ctx }
            }
            TransformKindWire::Custom { name } => TransformKind::Custom { name },
        };
        Ok(Transform {
            id: wire.id,
            original_id: wire.original_id,
            name: wire.name,
            description: wire.description,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- §8 invariant 1: Linear maps [-A, T] into [0, 1] ---
    #[test]
    fn linear_maps_domain_into_unit_interval() {
        let l = Transform::linear(100.0, 20.0).unwrap();
        for i in 0..=20 {
            let x = -20.0 + i as f64 * 6.0;
            let y = l.apply(x);
            assert!((0.0..=1.0).contains(&y), "x={x} y={y}");
        }
    }

    // --- boundary: A == 0 && T > 0 ---
    #[test]
    fn linear_boundary_a_zero() {
        let l = Transform::linear(100.0, 0.0).unwrap();
        assert!((l.apply(0.0) - 0.0).abs() < 1e-12);
        assert!((l.apply(100.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn linear_rejects_bad_parameters() {
        assert!(Transform::linear(0.0, 0.0).is_err());
        assert!(Transform::linear(100.0, -1.0).is_err());
        assert!(Transform::linear(100.0, 200.0).is_err());
    }

    // --- §8 invariant 2: Log(T) == 1 exactly ---
    #[test]
    fn log_at_t_is_one() {
        let l = Transform::log(1000.0, 4.0).unwrap();
        assert_eq!(l.apply(1000.0), 1.0);
    }

    #[test]
    fn log_rejects_bad_parameters() {
        assert!(Transform::log(-1.0, 1.0).is_err());
        assert!(Transform::log(1.0, 0.0).is_err());
    }

    #[test]
    fn inverse_hyperbolic_sine_rejects_bad_parameters() {
        assert!(Transform::inverse_hyperbolic_sine(0.0, 1.0, 0.0).is_err());
        assert!(Transform::inverse_hyperbolic_sine(1.0, 0.0, 0.0).is_err());
        assert!(Transform::inverse_hyperbolic_sine(1.0, 1.0, 2.0).is_err());
    }

    // --- §8 S3: Logicle defaults ---
    #[test]
    fn logicle_default_at_zero_is_x1() {
        let l = Transform::logicle_default();
        // With A=0, x2 = 0, so x1 = 0 exactly.
        assert_eq!(l.apply(0.0), 0.0);
    }

    #[test]
    fn logicle_default_at_t_is_near_one() {
        let l = Transform::logicle_default();
        let y = l.apply(262144.0);
        assert!((y - 1.0).abs() < 1e-6, "y={y}");
    }

    // --- §8 invariant 3: reflection symmetry ---
    #[test]
    fn logicle_reflection_symmetry() {
        let l = Transform::logicle_default();
        let x1 = l.apply(0.0);
        for v in [1.0, 10.0, 1000.0, 50000.0] {
            let pos = l.apply(v);
            let neg = l.apply(-v);
            assert!(
                (neg - (2.0 * x1 - pos)).abs() < 1e-6,
                "v={v} pos={pos} neg={neg}"
            );
        }
    }

    #[test]
    fn logicle_rejects_bad_parameters() {
        assert!(Transform::logicle(-1.0, 4.5, 0.5, 0.0).is_err());
        assert!(Transform::logicle(262144.0, 4.5, 3.0, 0.0).is_err());
        assert!(Transform::logicle(262144.0, 4.5, 0.5, -10.0).is_err());
    }

    // --- §8 invariant 4: root solver correctness ---
    #[test]
    fn root_solver_satisfies_equation() {
        for (b, w) in [(5.0, 0.1), (10.0, 0.5), (2.0, 1.0), (20.0, 0.01)] {
            let d = solve_d(b, w).unwrap();
            let residual = 2.0 * (d.ln() - b.ln()) + w * (d + b);
            let k = 10.0;
            assert!(
                residual.abs() < 2.0 * b * f64::EPSILON * k,
                "b={b} w={w} d={d} residual={residual}"
            );
        }
    }

    // --- boundary: W == 0 => d == b, no iteration needed ---
    #[test]
    fn root_solver_w_zero_returns_b_directly() {
        assert_eq!(solve_d(7.5, 0.0).unwrap(), 7.5);
    }

    // --- §8 invariant 5: bulk apply agrees with scalar apply ---
    #[test]
    fn bulk_apply_matches_scalar_for_every_kind() {
        let transforms = vec![
            Transform::linear(100.0, 10.0).unwrap(),
            Transform::log(1000.0, 4.0).unwrap(),
            Transform::inverse_hyperbolic_sine(1000.0, 4.0, 0.0).unwrap(),
            Transform::logicle_default(),
            Transform::hyperlog(262144.0, 4.5, 0.5, 0.0).unwrap(),
        ];
        let inputs: Vec<f64> = (1..200).map(|i| i as f64 * 37.0 - 2000.0).collect();

        for t in &transforms {
            let mut bulk = inputs.clone();
            t.apply_bulk_f64(&mut bulk);
            for (x, y) in inputs.iter().zip(bulk.iter()) {
                let scalar = t.apply(*x);
                assert!(
                    (scalar - y).abs() < 1e-9 || (scalar.is_nan() && y.is_nan()),
                    "mismatch at x={x}: scalar={scalar} bulk={y}"
                );
            }
        }
    }

    #[test]
    fn bulk_apply_f32_matches_scalar_within_f32_epsilon() {
        let t = Transform::linear(100.0, 10.0).unwrap();
        let inputs: Vec<f32> = (0..50).map(|i| i as f32 * 2.0 - 20.0).collect();
        let mut bulk = inputs.clone();
        t.apply_bulk_f32(&mut bulk);
        for (x, y) in inputs.iter().zip(bulk.iter()) {
            let scalar = t.apply(*x as f64) as f32;
            assert!((scalar - y).abs() < 1e-5);
        }
    }

    #[test]
    fn bulk_apply_runs_parallel_path_too() {
        let t = Transform::logicle_default();
        let inputs: Vec<f64> = (0..(PARALLEL_THRESHOLD + 10))
            .map(|i| i as f64 - 5000.0)
            .collect();
        let mut bulk = inputs.clone();
        t.apply_bulk_f64(&mut bulk);
        for (x, y) in inputs.iter().zip(bulk.iter()) {
            assert!((t.apply(*x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn hyperlog_is_symmetric_and_converges() {
        let h = Transform::hyperlog(262144.0, 4.5, 0.5, 0.0).unwrap();
        let y_pos = h.apply(1000.0);
        let y_neg = h.apply(-1000.0);
        let x1 = h.apply(0.0);
        assert!((y_neg - (2.0 * x1 - y_pos)).abs() < 1e-6);
    }

    #[test]
    fn round_trip_serde_recomputes_logicle_context() {
        let l = Transform::logicle_default().with_name("default");
        let json = serde_json::to_string(&l).unwrap();
        let back: Transform = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name.as_deref(), Some("default"));
        assert!((back.apply(1000.0) - l.apply(1000.0)).abs() < 1e-9);
    }
}
