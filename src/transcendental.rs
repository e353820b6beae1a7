//! Symbolic expansion of transcendental ALU ops.
//!
//! Backends without native `exp2`/`log2`/`sin` get the operation rewritten
//! into a range-reduction plus polynomial-kernel subgraph over the ops
//! every backend has. Half precision is computed through f32 and cast
//! back. The kernels are the classic Cody–Waite constructions: exponent
//! splitting for exp2, mantissa/exponent decomposition with an atanh
//! series for log2, and three-part pi reduction for sin.

use crate::ir::dtypes::{self, DType, ScalarKind};
use crate::ir::ops::{Arg, BinaryOp, Opcode, UnaryOp};
use crate::ir::{UOp, UOpGraph};
use crate::pattern::{Bindings, Pat, PatternMatcher, RewriteFn};

/// Dtypes the expansions support.
pub const SUPPORTED_DTYPES: [DType; 3] = [dtypes::F16, dtypes::F32, dtypes::F64];

/// Horner evaluation of `coeffs[0]*x^(n-1) + ... + coeffs[n-1]`.
fn poly(g: &mut UOpGraph, x: UOp, coeffs: &[f64]) -> UOp {
    let dt = g.dtype(x).expect("poly on dtype-less node");
    let mut acc = g.cfloat(dt, coeffs[0]);
    for &c in &coeffs[1..] {
        let t = g.mul(acc, x);
        let k = g.cfloat(dt, c);
        acc = g.add(t, k);
    }
    acc
}

/// Nearest-integer rounding, returned as the int node (for parity and
/// exponent math) plus the float rendering.
fn rint(g: &mut UOpGraph, d: UOp, int_dt: DType) -> (UOp, UOp) {
    let dt = g.dtype(d).expect("rint on dtype-less node");
    let zero = g.cfloat(dt, 0.0);
    let neg_half = g.cfloat(dt, -0.5);
    let half = g.cfloat(dt, 0.5);
    let is_neg = g.lt(d, zero);
    let bias = g.where_(is_neg, neg_half, half);
    let shifted = g.add(d, bias);
    let qi = g.cast(shifted, int_dt);
    let qf = g.cast(qi, dt);
    (qi, qf)
}

/// `2^q` for an integer `q`, built by placing `q + bias` into the
/// exponent field.
fn pow2i(g: &mut UOpGraph, q: UOp, dt: DType) -> UOp {
    let (int_dt, bias, mant) = match dt.scalar() {
        ScalarKind::F64 => (dtypes::I64, 1023i64, 52i64),
        _ => (dtypes::I32, 127, 23),
    };
    let b = g.cint(int_dt, bias);
    let e = g.add(q, b);
    let sh = g.cint(int_dt, mant);
    let bits = g.alu2(BinaryOp::Shl, e, sh);
    g.bitcast(bits, dt)
}

/// The biased exponent and the mantissa scaled into `[1, 2)`.
fn frexp(g: &mut UOpGraph, d: UOp, dt: DType) -> (UOp, UOp) {
    let (int_dt, ebits, mant, bias, one_bits) = match dt.scalar() {
        ScalarKind::F64 => (
            dtypes::I64,
            0x7ffi64,
            52i64,
            1023i64,
            0x3ff0_0000_0000_0000i64,
        ),
        _ => (dtypes::I32, 0xff, 23, 127, 0x3f80_0000),
    };
    let bits = g.bitcast(d, int_dt);
    let sh = g.cint(int_dt, mant);
    let shifted = g.alu2(BinaryOp::Shr, bits, sh);
    let emask = g.cint(int_dt, ebits);
    let raw_e = g.band(shifted, emask);
    let b = g.cint(int_dt, bias);
    let e = g.sub(raw_e, b);
    let mmask = g.cint(int_dt, (1i64 << mant) - 1);
    let frac = g.band(bits, mmask);
    let ob = g.cint(int_dt, one_bits);
    let mbits = g.bor(frac, ob);
    let m = g.bitcast(mbits, dt);
    (e, m)
}

// Kernel polynomial coefficients, highest order first.

const EXP2_COEFFS_F64: [f64; 11] = [
    0.4434359082926529454e-9,
    0.7073164598085707425e-8,
    0.1017819260921760451e-6,
    0.1321543872511327615e-5,
    0.1525273353517584730e-4,
    0.1540353045101147808e-3,
    0.1333355814670499073e-2,
    0.9618129107597600536e-2,
    0.5550410866482046596e-1,
    0.2402265069591012214,
    0.6931471805599452862,
];

const EXP2_COEFFS_F32: [f64; 6] = [
    0.1535920892e-3,
    0.1339262701e-2,
    0.9618384764e-2,
    0.5550347269e-1,
    0.2402264476,
    0.6931471825,
];

// atanh-series coefficients for log2: log2(m) = 2/ln2 * (x + x^3/3 + ...)
// with x = (m-1)/(m+1), regrouped as x * (c_n*x2^n + ... + c_0).
const LOG2_COEFFS_F64: [f64; 7] = [
    0.2211941750456081490,
    0.2200768693152277689,
    0.2623708057488514656,
    0.3205977477944495502,
    0.4121985945485324709,
    0.5770780162997058982,
    2.885390081777926774,
];

const LOG2_COEFFS_F32: [f64; 4] = [
    0.4374550283,
    0.5764790177,
    0.9618012905120,
    2.885390043258667,
];

const SIN_COEFFS_F64: [f64; 8] = [
    7.81006471148964566800994e-16,
    -6.43845806721266618916703e-13,
    1.58946757356079087651480e-10,
    -2.50521083763502045810755e-08,
    2.75573192239198747630416e-06,
    -0.000198412698412696162806809,
    0.00833333333333332974823815,
    -0.166666666666666657414808,
];

const SIN_COEFFS_F32: [f64; 4] = [
    2.6083159809786593541503e-06,
    -0.0001981069071916863322258,
    0.00833307858556509017944336,
    -0.166666597127914428710938,
];

// Three-part pi splitting for argument reduction.
const PI_PARTS_F64: [f64; 3] = [
    3.1415926218032836914,
    3.1786509424591713469e-08,
    1.2246467864107188502e-16,
];
const PI_PARTS_F32: [f64; 3] = [3.140625, 0.0009670257568359375, 6.2771141529083251953e-07];

fn exp2_kernel(g: &mut UOpGraph, d: UOp) -> UOp {
    let dt = g.dtype(d).expect("transcendental on dtype-less node");
    let f64p = dt.scalar() == ScalarKind::F64;
    let int_dt = if f64p { dtypes::I64 } else { dtypes::I32 };
    let (qi, qf) = rint(g, d, int_dt);
    let s = g.sub(d, qf);

    let coeffs: &[f64] = if f64p { &EXP2_COEFFS_F64 } else { &EXP2_COEFFS_F32 };
    let u = poly(g, s, coeffs);
    let u = g.mul(u, s);
    let one = g.cfloat(dt, 1.0);
    let u = g.add(u, one);

    // Scale by 2^q in two halves so the exponent field never overflows.
    let two = g.cint(int_dt, 2);
    let q_hi = g.idiv(qi, two);
    let q_lo = g.sub(qi, q_hi);
    let m_hi = pow2i(g, q_hi, dt);
    let m_lo = pow2i(g, q_lo, dt);
    let u = g.mul(u, m_hi);
    let u = g.mul(u, m_lo);

    // Saturate the extremes.
    let (upper, lower) = if f64p { (1024.0, -2000.0) } else { (128.0, -150.0) };
    let up = g.cfloat(dt, upper);
    let lo = g.cfloat(dt, lower);
    let inf = g.cfloat(dt, f64::INFINITY);
    let zero = g.cfloat(dt, 0.0);
    let too_big = g.ge(d, up);
    let u = g.where_(too_big, inf, u);
    let too_small = g.lt(d, lo);
    let u = g.where_(too_small, zero, u);
    // NaN stays NaN.
    let nan = g.cfloat(dt, f64::NAN);
    let is_nan = g.ne(d, d);
    g.where_(is_nan, nan, u)
}

fn log2_kernel(g: &mut UOpGraph, d: UOp) -> UOp {
    let dt = g.dtype(d).expect("transcendental on dtype-less node");
    let f64p = dt.scalar() == ScalarKind::F64;
    let (e, m) = frexp(g, d, dt);
    let ef = g.cast(e, dt);

    // x = (m-1)/(m+1), log2(m) = x*(c + c'*x2 + ...).
    let one = g.cfloat(dt, 1.0);
    let num = g.sub(m, one);
    let den = g.add(m, one);
    let x = g.fdiv(num, den);
    let x2 = g.mul(x, x);
    let coeffs: &[f64] = if f64p { &LOG2_COEFFS_F64 } else { &LOG2_COEFFS_F32 };
    let t = poly(g, x2, coeffs);
    let t = g.mul(x, t);
    let r = g.add(ef, t);

    // Domain edges: log2(0) = -inf, log2(x<0) = NaN, log2(inf) = inf.
    let zero = g.cfloat(dt, 0.0);
    let ninf = g.cfloat(dt, f64::NEG_INFINITY);
    let inf = g.cfloat(dt, f64::INFINITY);
    let nan = g.cfloat(dt, f64::NAN);
    let is_zero = g.eq(d, zero);
    let r = g.where_(is_zero, ninf, r);
    let is_neg = g.lt(d, zero);
    let r = g.where_(is_neg, nan, r);
    let is_inf = g.eq(d, inf);
    let r = g.where_(is_inf, inf, r);
    let is_nan = g.ne(d, d);
    g.where_(is_nan, nan, r)
}

fn sin_kernel(g: &mut UOpGraph, d: UOp) -> UOp {
    let dt = g.dtype(d).expect("transcendental on dtype-less node");
    let f64p = dt.scalar() == ScalarKind::F64;
    let int_dt = if f64p { dtypes::I64 } else { dtypes::I32 };

    let inv_pi = g.cfloat(dt, core::f64::consts::FRAC_1_PI);
    let scaled = g.mul(d, inv_pi);
    let (qi, qf) = rint(g, scaled, int_dt);

    // r = d - q*PI_A - q*PI_B - q*PI_C, peeled so the products round off
    // one part at a time.
    let parts: &[f64] = if f64p { &PI_PARTS_F64 } else { &PI_PARTS_F32 };
    let mut r = d;
    for &p in parts {
        let pk = g.cfloat(dt, p);
        let t = g.mul(qf, pk);
        r = g.sub(r, t);
    }

    let r2 = g.mul(r, r);
    let coeffs: &[f64] = if f64p { &SIN_COEFFS_F64 } else { &SIN_COEFFS_F32 };
    let t = poly(g, r2, coeffs);
    let t = g.mul(t, r2);
    let t = g.mul(t, r);
    let s = g.add(r, t);

    // sin(d) = (-1)^q * sin(r).
    let one = g.cint(int_dt, 1);
    let parity = g.band(qi, one);
    let odd = g.eq(parity, one);
    let ns = g.neg(s);
    let s = g.where_(odd, ns, s);

    // Non-finite input renders NaN.
    let nan = g.cfloat(dt, f64::NAN);
    let abs = {
        let neg_d = g.neg(d);
        g.max_(d, neg_d)
    };
    let inf = g.cfloat(dt, f64::INFINITY);
    let is_inf = g.eq(abs, inf);
    let s = g.where_(is_inf, nan, s);
    let is_nan = g.ne(d, d);
    g.where_(is_nan, nan, s)
}

fn through_f32(
    g: &mut UOpGraph,
    d: UOp,
    kernel: fn(&mut UOpGraph, UOp) -> UOp,
) -> UOp {
    if g.dtype(d) == Some(dtypes::F16) {
        let wide = g.cast(d, dtypes::F32);
        let r = kernel(g, wide);
        g.cast(r, dtypes::F16)
    } else {
        kernel(g, d)
    }
}

fn xexp2(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    Some(through_f32(g, b.node("d"), exp2_kernel))
}

fn xlog2(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    Some(through_f32(g, b.node("d"), log2_kernel))
}

fn xsin(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    Some(through_f32(g, b.node("d"), sin_kernel))
}

/// Build the expansion rules for every transcendental op *not* in
/// `native_ops`.
pub fn transcendental_folding(native_ops: &[UnaryOp]) -> PatternMatcher {
    let table: [(UnaryOp, RewriteFn); 3] = [
        (UnaryOp::Exp2, xexp2),
        (UnaryOp::Log2, xlog2),
        (UnaryOp::Sin, xsin),
    ];
    let mut rules = Vec::new();
    for (op, action) in table {
        if !native_ops.contains(&op) {
            rules.push((
                Pat::op(Opcode::Alu)
                    .arg(Arg::Unary(op))
                    .dtype_in(&SUPPORTED_DTYPES)
                    .seq([Pat::var("d")]),
                action,
            ));
        }
    }
    PatternMatcher::new(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::graph_rewrite;

    #[test]
    fn expands_only_missing_ops() {
        let pm = transcendental_folding(&[UnaryOp::Exp2]);
        assert_eq!(pm.len(), 2);
        let pm = transcendental_folding(&[]);
        assert_eq!(pm.len(), 3);
        let pm = transcendental_folding(&[UnaryOp::Exp2, UnaryOp::Log2, UnaryOp::Sin]);
        assert!(pm.is_empty());
    }

    #[test]
    fn sin_expansion_removes_the_op() {
        let mut g = UOpGraph::new();
        let d = g.define_var("d", dtypes::F32, 0, 0);
        let s = g.alu1(UnaryOp::Sin, d);
        let pm = transcendental_folding(&[]);
        let out = graph_rewrite(&mut g, s, &pm);
        for n in g.reachable(out) {
            assert_ne!(g.arg(n), &Arg::Unary(UnaryOp::Sin));
        }
        assert_eq!(g.dtype(out), Some(dtypes::F32));
    }

    #[test]
    fn half_goes_through_f32() {
        let mut g = UOpGraph::new();
        let d = g.define_var("d", dtypes::F16, 0, 0);
        let s = g.alu1(UnaryOp::Exp2, d);
        let pm = transcendental_folding(&[]);
        let out = graph_rewrite(&mut g, s, &pm);
        assert_eq!(g.dtype(out), Some(dtypes::F16));
        assert_eq!(g.op(out), Opcode::Cast);
    }

    #[test]
    fn ints_are_left_alone() {
        let mut g = UOpGraph::new();
        let d = g.define_var("d", dtypes::I32, 0, 10);
        let s = g.alu1(UnaryOp::Sqrt, d);
        let pm = transcendental_folding(&[]);
        assert_eq!(graph_rewrite(&mut g, s, &pm), s);
    }
}
