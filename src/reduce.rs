//! Reduction lowering and devectorization.
//!
//! After expansion, every `Reduce` becomes an accumulator: a `DefineAcc`
//! seeded with the identity element of the combining operator, updated by
//! an `Assign` inside the loop. Ranges the body never reads don't need a
//! loop at all; for sums they contribute a multiplication by the trip
//! count.
//!
//! The devectorizers then scalarize wide ALUs, loads, stores, constants
//! and accumulators into scalar ops threaded through `Vectorize`/`Gep`,
//! which is the shape the backends consume.

use crate::fx::FxHashMap;
use crate::ir::dtypes::{self, DType};
use crate::ir::immediates::ConstValue;
use crate::ir::ops::{identity_element, Arg, BinaryOp, Opcode};
use crate::ir::{UOp, UOpGraph};
use crate::pattern::{Bindings, Pat, PatternMatcher, RewriteFn};

/// Lower a `Reduce` into `DefineAcc`/`Assign`, scaling by the extent of
/// unread ranges for sums.
fn do_reduce(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let root = b.node("root");
    let src = g.src_vec(root);
    let body = src[0];
    let sparents = g.reachable(body);
    let (parented, unparented): (Vec<UOp>, Vec<UOp>) = src[1..]
        .iter()
        .copied()
        .partition(|r| sparents.contains(r));

    let op = g.arg(root).as_binary()?;
    let mut ret = body;
    if !parented.is_empty() {
        let dt = g.dtype(root)?;
        let ident = identity_element(op, dt.scalar());
        let ident_node = g.const_like(root, ident);
        let mut acc_src = vec![ident_node];
        acc_src.extend_from_slice(&parented);
        let acc_num = g.acc_counter;
        g.acc_counter += 1;
        let acc = g.intern(
            Opcode::DefineAcc,
            Some(dt),
            &acc_src,
            Arg::Acc(Box::new([acc_num])),
        );
        let step = g.alu2(op, acc, ret);
        ret = g.intern(Opcode::Assign, Some(dt), &[acc, step], Arg::None);
    }
    // For MAX the unread ranges just go away.
    if op == BinaryOp::Add {
        for r in unparented {
            let lo = g.src(r)[0];
            let hi = g.src(r)[1];
            let extent = g.sub(hi, lo);
            let dt = g.dtype(ret)?;
            let scaled = g.cast(extent, dt);
            ret = g.mul(ret, scaled);
        }
    }
    Some(ret)
}

/// Split a wide constant into a vectorize of scalar constants.
fn devectorize_const(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let c = b.node("c");
    let dt = g.dtype(c)?;
    if dt.count() == 1 {
        return None;
    }
    let elem = dt.vec(1);
    let lanes: Vec<UOp> = match g.arg(c).clone() {
        Arg::ConstVec(vals) => vals.iter().map(|&v| g.const_val(elem, v)).collect(),
        Arg::Const(v) => (0..dt.count()).map(|_| g.const_val(elem, v)).collect(),
        _ => return None,
    };
    Some(g.vectorize(dt, &lanes))
}

/// Split a load/store with a wide index into per-lane accesses.
fn no_vectorized_load_store(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let ls = b.node("ls");
    let src = g.src_vec(ls);
    let idx = src[1];
    let count = g.dtype(idx)?.count();
    if count == 1 {
        return None;
    }
    let op = g.op(ls);
    let scalar_dt = g.dtype(ls).map(|d| d.vec(1));
    let mut lanes = Vec::with_capacity(count);
    for i in 0..count {
        let mut lane_src = vec![src[0]];
        for &j in &src[1..] {
            lane_src.push(g.gep(j, i as u32));
        }
        lanes.push(g.intern(op, scalar_dt, &lane_src, Arg::None));
    }
    match g.dtype(ls) {
        Some(dt) => Some(g.vectorize(dt, &lanes)),
        None => Some(g.intern(Opcode::Sink, None, &lanes, Arg::None)),
    }
}

/// Split a wide accumulator into per-lane accumulators.
fn no_vectorized_acc(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let acc = b.node("acc");
    let dt = g.dtype(acc)?;
    if dt.count() == 1 {
        return None;
    }
    let src = g.src_vec(acc);
    let base = match g.arg(acc) {
        Arg::Acc(nums) => nums.to_vec(),
        _ => return None,
    };
    let scalar_dt = dt.vec(1);
    let mut lanes = Vec::with_capacity(dt.count());
    for i in 0..dt.count() {
        let mut lane_src = Vec::with_capacity(src.len());
        for (j, &s) in src.iter().enumerate() {
            lane_src.push(if j == 0 { g.gep(s, i as u32) } else { s });
        }
        let mut nums = base.clone();
        nums.push(i as u32);
        lanes.push(g.intern(
            Opcode::DefineAcc,
            Some(scalar_dt),
            &lane_src,
            Arg::Acc(nums.into_boxed_slice()),
        ));
    }
    Some(g.vectorize(dt, &lanes))
}

/// Split a wide ALU/cast/assign into per-lane scalar ops.
fn no_vectorized_alu(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let alu = b.node("alu");
    let dt = g.dtype(alu)?;
    if dt.count() == 1 {
        return None;
    }
    let op = g.op(alu);
    let arg = g.arg(alu).clone();
    let src = g.src_vec(alu);
    let scalar_dt = dt.vec(1);
    let mut lanes = Vec::with_capacity(dt.count());
    for i in 0..dt.count() {
        let lane_src: Vec<UOp> = src.iter().map(|&s| g.gep(s, i as u32)).collect();
        lanes.push(g.intern(op, Some(scalar_dt), &lane_src, arg.clone()));
    }
    Some(g.vectorize(dt, &lanes))
}

/// Strip a store's gate when the surviving `If` in its value tree is
/// exactly that gate.
fn delete_redundant_gates(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let root = b.node("root");
    let src = g.src_vec(root);
    if src.len() == 3 {
        return None;
    }
    let mut memo: FxHashMap<UOp, Option<UOp>> = FxHashMap::default();
    let gate = find_gate(g, root, &mut memo)?;
    if g.src(gate)[0] != src[3] {
        return None;
    }
    let arg = g.arg(root).clone();
    Some(g.intern(Opcode::Store, None, &src[..3], arg))
}

fn find_gate(g: &UOpGraph, x: UOp, memo: &mut FxHashMap<UOp, Option<UOp>>) -> Option<UOp> {
    if let Some(&r) = memo.get(&x) {
        return r;
    }
    let ret = if g.op(x) == Opcode::If {
        Some(x)
    } else {
        g.src(x)
            .iter()
            .find_map(|&s| find_gate(g, s, memo))
    };
    memo.insert(x, ret);
    ret
}

/// A scalar-indexed image load can't use the 2D texel path directly: load
/// the enclosing float4 texel and select the lane with `i % 4`.
fn fix_unfoldable_image_load(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let (load, buf) = (b.node("load"), b.node("buf"));
    let width = match g.dtype(buf)? {
        DType::Image { width, .. } => width as i64,
        _ => return None,
    };
    let idx = g.src(load)[1];
    let idx_dt = g.dtype(idx)?;
    if idx_dt.count() == 2 {
        return None;
    }
    let four = g.cint(idx_dt, 4);
    let id4 = g.rem(idx, four);
    let mut new_src = g.src_vec(load).to_vec();
    let w = g.cint(idx_dt, width);
    let x0 = g.idiv(idx, four);
    let x = g.rem(x0, w);
    let four_w = g.cint(idx_dt, 4 * width);
    let y = g.idiv(idx, four_w);
    new_src[1] = g.vectorize(dtypes::I32.vec(2), &[x, y]);
    if new_src.len() >= 4 {
        let alt = new_src[2];
        let alt_dt = g.dtype(alt)?.vec(4);
        let alts: Vec<UOp> = std::iter::repeat(alt).take(4).collect();
        new_src[2] = g.vectorize(alt_dt, &alts);
    }
    let wide_dt = g.dtype(load)?.vec(4);
    let vec_load = g.intern(Opcode::Load, Some(wide_dt), &new_src, Arg::None);
    let mut ret = g.const_like(load, ConstValue::F64(f64::NAN.into()));
    let lane_dt = g.dtype(load);
    for i in 0..4i64 {
        let k = g.cint(idx_dt, i);
        let miss = g.ne(id4, k);
        let lane = g.intern(Opcode::Gep, lane_dt, &[vec_load], Arg::Lane(i as u32));
        ret = g.where_(miss, ret, lane);
    }
    Some(ret)
}

/// Build the reduction/devectorize rule set.
pub fn reducer() -> PatternMatcher {
    let rules: Vec<(Pat, RewriteFn)> = vec![
        (Pat::op(Opcode::Reduce).named("root"), do_reduce),
        (Pat::op(Opcode::Const).named("c"), devectorize_const),
        (
            Pat::ops(&[Opcode::Load, Opcode::Store]).named("ls"),
            no_vectorized_load_store,
        ),
        (Pat::op(Opcode::DefineAcc).named("acc"), no_vectorized_acc),
        (
            Pat::ops(&[Opcode::Alu, Opcode::Cast, Opcode::Bitcast, Opcode::Assign]).named("alu"),
            no_vectorized_alu,
        ),
        (Pat::op(Opcode::Store).named("root"), delete_redundant_gates),
        (
            Pat::load([Pat::var("buf"), Pat::any()]).any_len().named("load"),
            fix_unfoldable_image_load,
        ),
    ];
    PatternMatcher::new(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ScalarKind;
    use crate::rewrite::graph_rewrite;

    #[test]
    fn reduce_becomes_accumulator() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 8);
        let rng = g.range(dtypes::I32, zero, n, 0, true);
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let ld = g.load(dtypes::F32, buf, rng);
        let red = g.intern(
            Opcode::Reduce,
            Some(dtypes::F32),
            &[ld, rng],
            Arg::Binary(BinaryOp::Add),
        );
        let out = graph_rewrite(&mut g, red, &reducer());
        assert_eq!(g.op(out), Opcode::Assign);
        let acc = g.src(out)[0];
        assert_eq!(g.op(acc), Opcode::DefineAcc);
        // Accumulator starts from the additive identity and owns the range.
        assert_eq!(
            g.const_value(g.src(acc)[0]),
            Some(ConstValue::F32(crate::ir::Ieee32::with_float(0.0)))
        );
        assert_eq!(g.src(acc)[1], rng);
        let step = g.src(out)[1];
        assert_eq!(g.arg(step), &Arg::Binary(BinaryOp::Add));
        assert_eq!(g.src(step)[0], acc);
    }

    #[test]
    fn unread_range_scales_sum() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 5);
        let rng = g.range(dtypes::I32, zero, n, 0, true);
        let x = g.define_var("x", dtypes::F32, 0, 0);
        let red = g.intern(
            Opcode::Reduce,
            Some(dtypes::F32),
            &[x, rng],
            Arg::Binary(BinaryOp::Add),
        );
        let out = graph_rewrite(&mut g, red, &reducer());
        // x summed over an unread range of 5 is x * 5.
        assert_eq!(g.arg(out), &Arg::Binary(BinaryOp::Mul));
        assert_eq!(g.src(out)[0], x);
        assert!(!g.reachable(out).contains(&rng));
    }

    #[test]
    fn max_ignores_unread_range() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 5);
        let rng = g.range(dtypes::I32, zero, n, 0, true);
        let x = g.define_var("x", dtypes::F32, 0, 0);
        let red = g.intern(
            Opcode::Reduce,
            Some(dtypes::F32),
            &[x, rng],
            Arg::Binary(BinaryOp::Max),
        );
        let out = graph_rewrite(&mut g, red, &reducer());
        assert_eq!(out, x);
    }

    #[test]
    fn wide_alu_devectorizes() {
        let mut g = UOpGraph::new();
        let a = g.define_var("a", dtypes::F32, 0, 0);
        let b0 = g.define_var("b", dtypes::F32, 0, 0);
        let va = g.vectorize(dtypes::F32.vec(2), &[a, a]);
        let vb = g.vectorize(dtypes::F32.vec(2), &[b0, b0]);
        let sum = g.add(va, vb);
        let out = graph_rewrite(&mut g, sum, &reducer());
        assert_eq!(g.op(out), Opcode::Vectorize);
        for &lane in g.src(out) {
            assert_eq!(g.op(lane), Opcode::Alu);
            assert_eq!(g.dtype(lane), Some(dtypes::F32));
        }
    }

    #[test]
    fn wide_const_devectorizes() {
        let mut g = UOpGraph::new();
        let c = g.intern(
            Opcode::Const,
            Some(dtypes::F32.vec(4)),
            &[],
            Arg::Const(ConstValue::F32(crate::ir::Ieee32::with_float(2.0))),
        );
        let out = graph_rewrite(&mut g, c, &reducer());
        assert_eq!(g.op(out), Opcode::Vectorize);
        assert_eq!(g.src(out).len(), 4);
        assert!(g
            .src(out)
            .iter()
            .all(|&l| g.const_value(l).is_some()));
    }

    #[test]
    fn redundant_gate_dropped() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.define_var("i", dtypes::I32, 0, 63);
        let gv = g.define_var("gv", dtypes::I32, 0, 1);
        let gate = g.cast(gv, dtypes::BOOL);
        let barrier = g.intern(Opcode::Barrier, None, &[], Arg::None);
        let guard = g.intern(Opcode::If, None, &[gate, barrier], Arg::None);
        let ld = g.intern(
            Opcode::Load,
            Some(dtypes::F32),
            &[buf, idx, guard],
            Arg::None,
        );
        let st = g.intern(Opcode::Store, None, &[buf, idx, ld, gate], Arg::None);
        let out = graph_rewrite(&mut g, st, &reducer());
        assert_eq!(g.src(out).len(), 3, "gate folded into the surviving IF");
    }
}
