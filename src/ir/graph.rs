//! The micro-op graph: node storage, hash-consing, and derived analyses.
//!
//! Nodes are immutable once created and live in a [`PrimaryMap`] keyed by
//! the [`UOp`] entity reference. Construction goes through
//! [`UOpGraph::intern`], which dedups structurally equal nodes through a
//! table that stores only node ids and hashes/compares through the node
//! store, so identity equality of `UOp`s is semantic equality.
//!
//! The conservative value interval of every node is computed at intern time
//! (children are always interned first) and never changes.

use core::fmt::Write as _;
use std::hash::{Hash, Hasher};

use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use hashbrown::hash_table::HashTable;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::fx::FxHashSet;
use crate::ir::dtypes::{self, DType, ScalarKind};
use crate::ir::immediates::ConstValue;
use crate::ir::ops::{Arg, BinaryOp, Opcode, TernaryOp, UnaryOp};

/// An opaque reference to a micro-op node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UOp(u32);
entity_impl!(UOp, "u");

/// The operand list of a node. Most ops have at most four sources.
pub type SrcList = SmallVec<[UOp; 4]>;

/// The stored fields of one node: the structural identity quadruple.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UOpData {
    /// Opcode.
    pub op: Opcode,
    /// Result type; `None` for pure side effects (stores, barriers, sinks).
    pub dtype: Option<DType>,
    /// Ordered children.
    pub src: SrcList,
    /// Opcode-specific payload.
    pub arg: Arg,
}

/// Closed integer interval `[min, max]`; the extremes of `i64` stand in
/// for unbounded ends.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    /// The interval that constrains nothing.
    pub const UNBOUNDED: ValueRange = ValueRange {
        min: i64::MIN,
        max: i64::MAX,
    };

    /// A single-point interval.
    pub fn exact(v: i64) -> ValueRange {
        ValueRange { min: v, max: v }
    }

    /// Is this a single point?
    pub fn is_exact(self) -> bool {
        self.min == self.max
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        ValueRange::UNBOUNDED
    }
}

fn clamp128(v: i128) -> i64 {
    if v > i64::MAX as i128 {
        i64::MAX
    } else if v < i64::MIN as i128 {
        i64::MIN
    } else {
        v as i64
    }
}

fn sat_add(a: i64, b: i64) -> i64 {
    clamp128(a as i128 + b as i128)
}

/// Greatest common divisor of absolute values; `gcd(0, x) == |x|`.
pub(crate) fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a as i64
}

fn node_hash(op: Opcode, dtype: &Option<DType>, src: &[UOp], arg: &Arg) -> u64 {
    let mut h = FxHasher::default();
    op.hash(&mut h);
    dtype.hash(&mut h);
    src.hash(&mut h);
    arg.hash(&mut h);
    h.finish()
}

/// A per-compilation micro-op graph.
///
/// Graphs must not be shared across threads while nodes are being created;
/// each kernel compilation owns its own graph.
pub struct UOpGraph {
    nodes: PrimaryMap<UOp, UOpData>,
    /// Intern table: ids only, hashed/compared through `nodes`.
    table: HashTable<UOp>,
    ranges: SecondaryMap<UOp, ValueRange>,
    /// Accumulator numbering for reduce lowering; reset per full rewrite.
    pub(crate) acc_counter: u32,
}

impl UOpGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            table: HashTable::with_capacity(64),
            ranges: SecondaryMap::new(),
            acc_counter: 0,
        }
    }

    /// Number of distinct nodes ever created.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The canonical node for `(op, dtype, src, arg)`. Re-interning an
    /// existing quadruple returns the identical `UOp`.
    pub fn intern(&mut self, op: Opcode, dtype: Option<DType>, src: &[UOp], arg: Arg) -> UOp {
        let hash = node_hash(op, &dtype, src, &arg);
        let nodes = &self.nodes;
        if let Some(&found) = self.table.find(hash, |&id| {
            let d = &nodes[id];
            d.op == op && d.dtype == dtype && d.src[..] == *src && d.arg == arg
        }) {
            return found;
        }
        let id = self.nodes.push(UOpData {
            op,
            dtype,
            src: SrcList::from_slice(src),
            arg,
        });
        let range = self.compute_range(id);
        self.ranges[id] = range;
        let nodes = &self.nodes;
        self.table.insert_unique(hash, id, |&i| {
            let d = &nodes[i];
            node_hash(d.op, &d.dtype, &d.src, &d.arg)
        });
        id
    }

    /// The stored fields of `u`.
    pub fn data(&self, u: UOp) -> &UOpData {
        &self.nodes[u]
    }

    /// Opcode of `u`.
    pub fn op(&self, u: UOp) -> Opcode {
        self.nodes[u].op
    }

    /// Result type of `u`.
    pub fn dtype(&self, u: UOp) -> Option<DType> {
        self.nodes[u].dtype
    }

    /// Children of `u`.
    pub fn src(&self, u: UOp) -> &[UOp] {
        &self.nodes[u].src
    }

    /// Children of `u`, cloned out of the store so the graph can be
    /// mutated while iterating.
    pub fn src_vec(&self, u: UOp) -> SrcList {
        self.nodes[u].src.clone()
    }

    /// Payload of `u`.
    pub fn arg(&self, u: UOp) -> &Arg {
        &self.nodes[u].arg
    }

    /// The constant payload if `u` is a scalar `Const`.
    pub fn const_value(&self, u: UOp) -> Option<ConstValue> {
        if self.op(u) == Opcode::Const {
            self.arg(u).as_const()
        } else {
            None
        }
    }

    /// The conservative value interval of `u`.
    pub fn value_range(&self, u: UOp) -> ValueRange {
        self.ranges[u]
    }

    /// Lower interval bound.
    pub fn vmin(&self, u: UOp) -> i64 {
        self.ranges[u].min
    }

    /// Upper interval bound.
    pub fn vmax(&self, u: UOp) -> i64 {
        self.ranges[u].max
    }

    /// One-line rendering for diagnostics.
    pub fn describe(&self, u: UOp) -> String {
        let d = &self.nodes[u];
        let mut s = String::new();
        let _ = write!(s, "{} = {:?}", u, d.op);
        if let Some(dt) = d.dtype {
            let _ = write!(s, ".{}", dt);
        }
        let _ = write!(s, " {:?} ", d.arg);
        let _ = write!(s, "{:?}", &d.src[..]);
        s
    }

    // --- interval analysis ------------------------------------------------

    fn compute_range(&self, u: UOp) -> ValueRange {
        let d = &self.nodes[u];
        // Only scalar integer-ish values carry useful intervals.
        match d.dtype {
            Some(DType::Scalar(k)) if k.is_int() || k == ScalarKind::Bool => {}
            _ => return ValueRange::UNBOUNDED,
        }
        match d.op {
            Opcode::Const => match d.arg.as_const() {
                Some(ConstValue::Int(v)) => ValueRange::exact(v),
                Some(ConstValue::UInt(v)) if v <= i64::MAX as u64 => ValueRange::exact(v as i64),
                Some(ConstValue::Bool(b)) => ValueRange::exact(b as i64),
                _ => ValueRange::UNBOUNDED,
            },
            Opcode::DefineVar => match &d.arg {
                Arg::Var { min, max, .. } => ValueRange {
                    min: *min,
                    max: *max,
                },
                _ => ValueRange::UNBOUNDED,
            },
            Opcode::Range => {
                let lo = self.ranges[d.src[0]];
                let hi = self.ranges[d.src[1]];
                ValueRange {
                    min: lo.min,
                    max: if hi.max == i64::MAX {
                        i64::MAX
                    } else {
                        hi.max - 1
                    },
                }
            }
            Opcode::Alu => self.alu_range(d),
            _ => ValueRange::UNBOUNDED,
        }
    }

    fn alu_range(&self, d: &UOpData) -> ValueRange {
        let r = |i: usize| self.ranges[d.src[i]];
        match &d.arg {
            Arg::Unary(UnaryOp::Neg) => {
                let a = r(0);
                ValueRange {
                    min: clamp128(-(a.max as i128)),
                    max: clamp128(-(a.min as i128)),
                }
            }
            Arg::Binary(op) => {
                let (a, b) = (r(0), r(1));
                match op {
                    BinaryOp::Add => ValueRange {
                        min: sat_add(a.min, b.min),
                        max: sat_add(a.max, b.max),
                    },
                    BinaryOp::Mul => {
                        let products = [
                            a.min as i128 * b.min as i128,
                            a.min as i128 * b.max as i128,
                            a.max as i128 * b.min as i128,
                            a.max as i128 * b.max as i128,
                        ];
                        // An unbounded endpoint poisons the products.
                        if a == ValueRange::UNBOUNDED
                            || b == ValueRange::UNBOUNDED
                            || a.min == i64::MIN
                            || a.max == i64::MAX
                            || b.min == i64::MIN
                            || b.max == i64::MAX
                        {
                            ValueRange::UNBOUNDED
                        } else {
                            ValueRange {
                                min: clamp128(*products.iter().min().unwrap()),
                                max: clamp128(*products.iter().max().unwrap()),
                            }
                        }
                    }
                    BinaryOp::Mod => match self.const_value(d.src[1]) {
                        Some(c) if c.as_i64() > 0 => {
                            let c = c.as_i64();
                            if a.min >= 0 {
                                ValueRange {
                                    min: 0,
                                    max: a.max.min(c - 1),
                                }
                            } else {
                                ValueRange {
                                    min: -(c - 1),
                                    max: c - 1,
                                }
                            }
                        }
                        _ => ValueRange::UNBOUNDED,
                    },
                    BinaryOp::Idiv => match self.const_value(d.src[1]) {
                        Some(c) if c.as_i64() > 0 => {
                            let c = c.as_i64();
                            let div = |v: i64| {
                                if v == i64::MIN || v == i64::MAX {
                                    v
                                } else {
                                    v / c
                                }
                            };
                            ValueRange {
                                min: div(a.min),
                                max: div(a.max),
                            }
                        }
                        _ => ValueRange::UNBOUNDED,
                    },
                    BinaryOp::Max => ValueRange {
                        min: a.min.max(b.min),
                        max: a.max.max(b.max),
                    },
                    BinaryOp::CmpLt => {
                        // Decidable comparisons pin to a constant.
                        if a.max < b.min {
                            ValueRange::exact(1)
                        } else if a.min >= b.max && b.max != i64::MIN {
                            ValueRange::exact(0)
                        } else {
                            ValueRange { min: 0, max: 1 }
                        }
                    }
                    BinaryOp::CmpNe => {
                        if a.max < b.min || b.max < a.min {
                            ValueRange::exact(1)
                        } else if a.is_exact() && b.is_exact() && a.min == b.min {
                            ValueRange::exact(0)
                        } else {
                            ValueRange { min: 0, max: 1 }
                        }
                    }
                    BinaryOp::And | BinaryOp::Or => {
                        if d.dtype == Some(dtypes::BOOL) {
                            ValueRange { min: 0, max: 1 }
                        } else {
                            ValueRange::UNBOUNDED
                        }
                    }
                    _ => ValueRange::UNBOUNDED,
                }
            }
            Arg::Ternary(TernaryOp::Where) => {
                let (b, c) = (r(1), r(2));
                ValueRange {
                    min: b.min.min(c.min),
                    max: b.max.max(c.max),
                }
            }
            _ => ValueRange::UNBOUNDED,
        }
    }

    // --- divisibility -----------------------------------------------------

    /// The largest integer known to divide `u`; the value itself for
    /// constants, 1 when unknown.
    pub fn const_factor(&self, u: UOp) -> i64 {
        let d = &self.nodes[u];
        match (d.op, &d.arg) {
            (Opcode::Const, Arg::Const(cv)) => cv.as_i64(),
            (Opcode::Alu, Arg::Binary(BinaryOp::Add)) => {
                gcd(self.const_factor(d.src[0]), self.const_factor(d.src[1]))
            }
            (Opcode::Alu, Arg::Binary(BinaryOp::Mul)) => {
                if let Some(c) = self.const_value(d.src[0]) {
                    c.as_i64()
                } else if let Some(c) = self.const_value(d.src[1]) {
                    c.as_i64()
                } else {
                    1
                }
            }
            _ => 1,
        }
    }

    /// The quotient `u / v` when `u` is known divisible by `v`.
    pub fn divides(&mut self, u: UOp, v: i64) -> Option<UOp> {
        if v == 1 {
            return Some(u);
        }
        if v == 0 {
            return None;
        }
        let d = self.nodes[u].clone();
        match (d.op, &d.arg) {
            (Opcode::Const, Arg::Const(cv)) => {
                let c = cv.as_i64();
                if c % v == 0 {
                    Some(self.const_like(u, ConstValue::Int(c / v)))
                } else {
                    None
                }
            }
            (Opcode::Alu, Arg::Binary(BinaryOp::Add)) => {
                let d0 = self.divides(d.src[0], v)?;
                let d1 = self.divides(d.src[1], v)?;
                Some(self.add(d0, d1))
            }
            (Opcode::Alu, Arg::Binary(BinaryOp::Mul)) => {
                if let Some(d0) = self.divides(d.src[0], v) {
                    Some(self.mul(d0, d.src[1]))
                } else if let Some(d1) = self.divides(d.src[1], v) {
                    Some(self.mul(d.src[0], d1))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// The set of nodes reachable from `u` through sources, including `u`.
    pub fn reachable(&self, u: UOp) -> FxHashSet<UOp> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![u];
        while let Some(n) = stack.pop() {
            if seen.insert(n) {
                stack.extend(self.src(n).iter().copied());
            }
        }
        seen
    }

    // --- builders ---------------------------------------------------------

    /// A constant of type `dtype`, normalized to its width.
    pub fn const_val(&mut self, dtype: DType, v: ConstValue) -> UOp {
        let v = v.normalize(dtype);
        self.intern(Opcode::Const, Some(dtype), &[], Arg::Const(v))
    }

    /// An integer constant of type `dtype`.
    pub fn cint(&mut self, dtype: DType, v: i64) -> UOp {
        self.const_val(dtype, ConstValue::Int(v))
    }

    /// A boolean constant.
    pub fn cbool(&mut self, v: bool) -> UOp {
        self.const_val(dtypes::BOOL, ConstValue::Bool(v))
    }

    /// A float constant of type `dtype`.
    pub fn cfloat(&mut self, dtype: DType, v: f64) -> UOp {
        self.const_val(dtype, ConstValue::F64(v.into()))
    }

    /// A vector constant with explicit per-lane values.
    pub fn const_vec(&mut self, dtype: DType, vals: &[ConstValue]) -> UOp {
        let elem = dtype.vec(1);
        let vals: Vec<ConstValue> = vals.iter().map(|v| v.normalize(elem)).collect();
        self.intern(
            Opcode::Const,
            Some(dtype),
            &[],
            Arg::ConstVec(vals.into_boxed_slice()),
        )
    }

    /// A constant with the same dtype as `u`.
    pub fn const_like(&mut self, u: UOp, v: ConstValue) -> UOp {
        let dtype = self.dtype(u).expect("const_like on dtype-less node");
        self.const_val(dtype, v)
    }

    fn alu(&mut self, arg: Arg, dtype: Option<DType>, src: &[UOp]) -> UOp {
        self.intern(Opcode::Alu, dtype, src, arg)
    }

    /// A unary ALU node; result dtype follows the operand.
    pub fn alu1(&mut self, op: UnaryOp, a: UOp) -> UOp {
        let dt = self.dtype(a);
        self.alu(Arg::Unary(op), dt, &[a])
    }

    /// A binary ALU node; comparisons are bool, everything else follows
    /// the second operand.
    pub fn alu2(&mut self, op: BinaryOp, a: UOp, b: UOp) -> UOp {
        let dt = match op {
            BinaryOp::CmpLt | BinaryOp::CmpNe => self
                .dtype(b)
                .map(|d| dtypes::BOOL.vec(d.count()))
                .or(Some(dtypes::BOOL)),
            _ => self.dtype(b).or_else(|| self.dtype(a)),
        };
        self.alu(Arg::Binary(op), dt, &[a, b])
    }

    /// A ternary ALU node; result dtype follows the last operand.
    pub fn alu3(&mut self, op: TernaryOp, a: UOp, b: UOp, c: UOp) -> UOp {
        let dt = self.dtype(c);
        self.alu(Arg::Ternary(op), dt, &[a, b, c])
    }

    pub fn add(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Add, a, b)
    }

    pub fn mul(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Mul, a, b)
    }

    pub fn idiv(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Idiv, a, b)
    }

    pub fn fdiv(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Div, a, b)
    }

    pub fn rem(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Mod, a, b)
    }

    pub fn band(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::And, a, b)
    }

    pub fn bor(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Or, a, b)
    }

    pub fn bxor(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Xor, a, b)
    }

    pub fn max_(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::Max, a, b)
    }

    /// `min(a, b)`, expressed through max.
    pub fn min_(&mut self, a: UOp, b: UOp) -> UOp {
        let na = self.neg(a);
        let nb = self.neg(b);
        let m = self.max_(na, nb);
        self.neg(m)
    }

    pub fn neg(&mut self, a: UOp) -> UOp {
        self.alu1(UnaryOp::Neg, a)
    }

    /// `a - b`, expressed as `a + (-b)`.
    pub fn sub(&mut self, a: UOp, b: UOp) -> UOp {
        let nb = self.neg(b);
        self.add(a, nb)
    }

    pub fn lt(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::CmpLt, a, b)
    }

    pub fn ne(&mut self, a: UOp, b: UOp) -> UOp {
        self.alu2(BinaryOp::CmpNe, a, b)
    }

    /// `a == b` as the negation of `!=`.
    pub fn eq(&mut self, a: UOp, b: UOp) -> UOp {
        let n = self.ne(a, b);
        self.neg(n)
    }

    /// `a >= b` as the negation of `<`.
    pub fn ge(&mut self, a: UOp, b: UOp) -> UOp {
        let n = self.lt(a, b);
        self.neg(n)
    }

    /// `gate ? t : f`.
    pub fn where_(&mut self, gate: UOp, t: UOp, f: UOp) -> UOp {
        self.alu3(TernaryOp::Where, gate, t, f)
    }

    pub fn cast(&mut self, a: UOp, dtype: DType) -> UOp {
        self.intern(Opcode::Cast, Some(dtype), &[a], Arg::None)
    }

    pub fn bitcast(&mut self, a: UOp, dtype: DType) -> UOp {
        self.intern(Opcode::Bitcast, Some(dtype), &[a], Arg::None)
    }

    /// Extract lane `i` of a vector value.
    pub fn gep(&mut self, a: UOp, i: u32) -> UOp {
        let dt = self
            .dtype(a)
            .map(|d| DType::Scalar(d.scalar()))
            .expect("gep on dtype-less node");
        self.intern(Opcode::Gep, Some(dt), &[a], Arg::Lane(i))
    }

    /// Extract a lane permutation, producing a vector of `lanes.len()`.
    pub fn gep_lanes(&mut self, a: UOp, lanes: &[u32]) -> UOp {
        let dt = self
            .dtype(a)
            .map(|d| DType::Scalar(d.scalar()).vec(lanes.len()))
            .expect("gep on dtype-less node");
        self.intern(
            Opcode::Gep,
            Some(dt),
            &[a],
            Arg::Lanes(lanes.to_vec().into_boxed_slice()),
        )
    }

    /// Pack `src` into a vector of type `dtype`.
    pub fn vectorize(&mut self, dtype: DType, src: &[UOp]) -> UOp {
        self.intern(Opcode::Vectorize, Some(dtype), src, Arg::None)
    }

    /// An ungated load of `dtype` from `(buf, index)`.
    pub fn load(&mut self, dtype: DType, buf: UOp, index: UOp) -> UOp {
        self.intern(Opcode::Load, Some(dtype), &[buf, index], Arg::None)
    }

    /// An ungated store of `value` to `(buf, index)`.
    pub fn store(&mut self, buf: UOp, index: UOp, value: UOp) -> UOp {
        self.intern(Opcode::Store, None, &[buf, index, value], Arg::None)
    }

    /// A loop induction variable over `[start, end)`.
    pub fn range(&mut self, dtype: DType, start: UOp, end: UOp, id: u32, reduce: bool) -> UOp {
        self.intern(
            Opcode::Range,
            Some(dtype),
            &[start, end],
            Arg::Range { id, reduce },
        )
    }

    /// A bounded symbolic variable.
    pub fn define_var(&mut self, name: &str, dtype: DType, min: i64, max: i64) -> UOp {
        self.intern(
            Opcode::DefineVar,
            Some(dtype),
            &[],
            Arg::Var {
                name: name.into(),
                min,
                max,
            },
        )
    }

    /// Kernel argument buffer `slot` of pointer type `dtype`.
    pub fn define_global(&mut self, slot: u32, dtype: DType) -> UOp {
        self.intern(Opcode::DefineGlobal, Some(dtype), &[], Arg::Buffer(slot))
    }

    /// The kernel root over `src` side effects.
    pub fn sink(&mut self, src: &[UOp]) -> UOp {
        self.intern(Opcode::Sink, None, src, Arg::None)
    }

    /// The empty node.
    pub fn noop(&mut self) -> UOp {
        self.intern(Opcode::Noop, None, &[], Arg::None)
    }
}

impl Default for UOpGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;

    #[test]
    fn intern_dedups() {
        let mut g = UOpGraph::new();
        let a = g.cint(dtypes::I32, 2);
        let b = g.cint(dtypes::I32, 3);
        let s1 = g.add(a, b);
        let s2 = g.add(a, b);
        assert_eq!(s1, s2);
        let s3 = g.add(b, a);
        assert_ne!(s1, s3, "operand order is part of identity");
        assert_eq!(g.cint(dtypes::I32, 2), a);
    }

    #[test]
    fn const_range_is_exact() {
        let mut g = UOpGraph::new();
        let c = g.cint(dtypes::I32, 7);
        assert_eq!(g.value_range(c), ValueRange::exact(7));
        let f = g.cfloat(dtypes::F32, 1.5);
        assert_eq!(g.value_range(f), ValueRange::UNBOUNDED);
    }

    #[test]
    fn range_intervals_propagate() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 10);
        let r = g.range(dtypes::I32, zero, n, 0, true);
        assert_eq!(g.vmin(r), 0);
        assert_eq!(g.vmax(r), 9);

        let four = g.cint(dtypes::I32, 4);
        let m = g.mul(r, four);
        assert_eq!(g.vmin(m), 0);
        assert_eq!(g.vmax(m), 36);

        let one = g.cint(dtypes::I32, 1);
        let sum = g.add(m, one);
        assert_eq!((g.vmin(sum), g.vmax(sum)), (1, 37));

        let two = g.cint(dtypes::I32, 2);
        let rem = g.rem(sum, two);
        assert_eq!((g.vmin(rem), g.vmax(rem)), (0, 1));

        let q = g.idiv(sum, two);
        assert_eq!((g.vmin(q), g.vmax(q)), (0, 18));
    }

    #[test]
    fn var_bounds() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 2, 5);
        assert_eq!((g.vmin(x), g.vmax(x)), (2, 5));
        let nx = g.neg(x);
        assert_eq!((g.vmin(nx), g.vmax(nx)), (-5, -2));
    }

    #[test]
    fn const_factor_and_divides() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 10);
        let four = g.cint(dtypes::I32, 4);
        let m = g.mul(x, four);
        assert_eq!(g.const_factor(m), 4);

        let six = g.cint(dtypes::I32, 6);
        let m2 = g.mul(x, six);
        let s = g.add(m, m2);
        assert_eq!(g.const_factor(s), 2);

        let q = g.divides(m, 2).unwrap();
        let two = g.cint(dtypes::I32, 2);
        assert_eq!(q, g.mul(x, two));
        assert!(g.divides(x, 2).is_none());
    }

    #[test]
    fn reachability() {
        let mut g = UOpGraph::new();
        let a = g.cint(dtypes::I32, 1);
        let b = g.cint(dtypes::I32, 2);
        let s = g.add(a, b);
        let other = g.cint(dtypes::I32, 3);
        let set = g.reachable(s);
        assert!(set.contains(&s) && set.contains(&a) && set.contains(&b));
        assert!(!set.contains(&other));
    }
}
