//! Axis expansion and contraction, store gating, and vector memory folds.
//!
//! An `Expand` node carries one value per point of a product of named
//! axes. Lowering fuses expands into their consumers: the consumer is
//! rebuilt once over a widened vector covering the combined axis space,
//! sources that already vary per-point are lane-permuted into the combined
//! order, and invariant sources are broadcast. `Contract` selects a
//! sub-product of axes back out as a vector.
//!
//! The float4 folder runs here too when the backend supports wide memory
//! ops: adjacent scalar loads/stores whose indices form an arithmetic
//! progression collapse into one wide access.

use smallvec::SmallVec;

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::dtypes::{self, DType, ScalarKind};
use crate::ir::immediates::ConstValue;
use crate::ir::ops::{Arg, BinaryOp, Opcode};
use crate::ir::{UOp, UOpGraph};
use crate::pattern::{Bindings, Pat, PatternMatcher, RewriteFn};
use crate::settings::flags;

type Axes = Vec<(u32, u32)>;

/// Lane index of one choice of per-axis positions, in row-major order of
/// `args`.
fn expand_arg_to_idx(args: &[(u32, u32)], rpk: &FxHashMap<u32, u32>) -> usize {
    let mut idx = 0usize;
    let mut mul = 1usize;
    for &(axis, m) in args.iter().rev() {
        idx += rpk.get(&axis).copied().unwrap_or(0) as usize * mul;
        mul *= m as usize;
    }
    idx
}

/// Every assignment of positions to the axes of `args`, in row-major
/// order.
fn choices_from_args(args: &[(u32, u32)]) -> Vec<FxHashMap<u32, u32>> {
    let mut out = vec![FxHashMap::default()];
    for &(axis, m) in args {
        let mut next = Vec::with_capacity(out.len() * m as usize);
        for rpk in &out {
            for v in 0..m {
                let mut n = rpk.clone();
                n.insert(axis, v);
                next.push(n);
            }
        }
        out = next;
    }
    out
}

/// For a source expanded over `eargs`, the lane for each point of the
/// combined space `cargs`; `exclude_args` are pinned to position 0.
fn swizzle_args(cargs: &[(u32, u32)], eargs: &[(u32, u32)], exclude_args: &[u32]) -> Vec<usize> {
    choices_from_args(cargs)
        .into_iter()
        .map(|mut rpk| {
            for &x in exclude_args {
                rpk.insert(x, 0);
            }
            expand_arg_to_idx(eargs, &rpk)
        })
        .collect()
}

fn is_identity(lst: &[usize]) -> bool {
    lst.iter().enumerate().all(|(i, &v)| i == v)
}

fn axes_of(g: &UOpGraph, u: UOp) -> Option<Axes> {
    match g.arg(u) {
        Arg::Axes(a) => Some(a.to_vec()),
        _ => None,
    }
}

/// Fuse the expand sources of `root` into one widened node.
fn do_expand(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let root = b.node("root");
    let src = g.src_vec(root);
    let expands: Vec<UOp> = src
        .iter()
        .copied()
        .filter(|&x| g.op(x) == Opcode::Expand)
        .collect();
    if expands.is_empty() {
        return None;
    }
    // The reduce axes of a WMMA stay pinned; every point sees lane 0.
    let exclude_args: Vec<u32> = if g.op(root) == Opcode::Wmma {
        match g.arg(root) {
            Arg::Wmma(spec) => {
                let mut ex: Vec<u32> = spec.reduce_axes.to_vec();
                for operand in spec.upcast_axes.iter() {
                    ex.extend(operand.iter().map(|&(axis, _)| axis));
                }
                ex.sort_unstable();
                ex.dedup();
                ex
            }
            _ => Vec::new(),
        }
    } else {
        Vec::new()
    };
    let mut expand_args: Axes = Vec::new();
    for &e in &expands {
        expand_args.extend(axes_of(g, e)?);
    }
    expand_args.sort_unstable();
    expand_args.dedup();
    expand_args.retain(|&(axis, _)| !exclude_args.contains(&axis));
    let expand_sz: usize = expand_args.iter().map(|&(_, m)| m as usize).product();

    let root_op = g.op(root);
    let mut new_srcs: Vec<UOp> = Vec::with_capacity(src.len());
    for (i, &s) in src.iter().enumerate() {
        if g.op(s) == Opcode::Expand {
            let eargs = axes_of(g, s)?;
            let lst = swizzle_args(&expand_args, &eargs, &exclude_args);
            let inner = g.src(s)[0];
            if is_identity(&lst) {
                new_srcs.push(inner);
            } else {
                let lanes: Vec<u32> = lst.iter().map(|&v| v as u32).collect();
                let dt = g.dtype(inner)?.vec(expand_sz);
                new_srcs.push(g.intern(
                    Opcode::Gep,
                    Some(dt),
                    &[inner],
                    Arg::Lanes(lanes.into_boxed_slice()),
                ));
            }
        } else if (matches!(root_op, Opcode::Load | Opcode::Store) && i == 0)
            || (root_op == Opcode::Reduce && i != 0)
        {
            // Buffers and reduce ranges are not broadcast.
            new_srcs.push(s);
        } else if let Some(dt) = g.dtype(s) {
            if dt.count() > 1 {
                let mut lanes: Vec<UOp> = Vec::with_capacity(dt.count() * expand_sz);
                let per: Vec<UOp> = (0..dt.count()).map(|j| g.gep(s, j as u32)).collect();
                for _ in 0..expand_sz {
                    lanes.extend_from_slice(&per);
                }
                let wide = dt.vec(expand_sz * dt.count());
                new_srcs.push(g.vectorize(wide, &lanes));
            } else {
                let wide = dt.vec(expand_sz);
                let lanes: Vec<UOp> = std::iter::repeat(s).take(expand_sz).collect();
                new_srcs.push(g.vectorize(wide, &lanes));
            }
        } else {
            new_srcs.push(s);
        }
    }

    let mut new_arg = g.arg(root).clone();
    if root_op == Opcode::Gep {
        // The extraction index spreads across the widened lane space.
        let base = match g.arg(root) {
            Arg::Lane(i) => *i as usize,
            _ => return None,
        };
        let inner_count = g.dtype(new_srcs[0]).map(|d| d.count()).unwrap_or(1);
        let step = inner_count / expand_sz;
        let lanes: Vec<u32> = (0..expand_sz)
            .map(|k| (base + k * step) as u32)
            .collect();
        new_arg = Arg::Lanes(lanes.into_boxed_slice());
    }
    let new_dt = g
        .dtype(root)
        .map(|d| d.vec(d.count() * expand_sz));
    let nsrc = g.intern(root_op, new_dt, &new_srcs, new_arg);
    let ex_dt = g.dtype(root);
    Some(g.intern(
        Opcode::Expand,
        ex_dt,
        &[nsrc],
        Arg::Axes(expand_args.into_boxed_slice()),
    ))
}

/// Select the contract axes out of an expand as vector lanes.
fn do_contract(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let con = b.node("con");
    let ex = g.src(con)[0];
    let con_dt = g.dtype(con)?;
    // A contract without an expand repeats the element.
    if g.op(ex) != Opcode::Expand {
        let lanes: Vec<UOp> = std::iter::repeat(ex).take(con_dt.count()).collect();
        return Some(g.vectorize(con_dt, &lanes));
    }
    let con_axes = axes_of(g, con)?;
    let ex_axes = axes_of(g, ex)?;
    debug_assert_eq!(
        con_dt.count(),
        con_axes.iter().map(|&(_, m)| m as usize).product::<usize>(),
        "contract dtype disagrees with its axes"
    );
    let new_ex_args: Axes = ex_axes
        .iter()
        .copied()
        .filter(|a| !con_axes.contains(a))
        .collect();
    let mut idxs: Vec<usize> = Vec::new();
    for rpk in choices_from_args(&new_ex_args) {
        for lrpk in choices_from_args(&con_axes) {
            let mut merged = rpk.clone();
            merged.extend(lrpk.iter().map(|(&k, &v)| (k, v)));
            idxs.push(expand_arg_to_idx(&ex_axes, &merged));
        }
    }
    let inner = g.src(ex)[0];
    let picked = if is_identity(&idxs) {
        inner
    } else {
        let lanes: Vec<u32> = idxs.iter().map(|&v| v as u32).collect();
        g.gep_lanes(inner, &lanes)
    };
    Some(g.intern(
        Opcode::Expand,
        Some(con_dt),
        &[picked],
        Arg::Axes(new_ex_args.into_boxed_slice()),
    ))
}

/// Wrap the barrier'd loads under a gated store in an `If` on the gate, so
/// they don't execute when the gate is false.
fn create_gate(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let root = b.node("root");
    if g.src(root).len() == 3 {
        return None;
    }
    let gate = g.src(root)[3];
    let mut memo: FxHashMap<UOp, UOp> = FxHashMap::default();
    let ret = gate_srcs(g, root, gate, &mut memo);
    if ret == root {
        None
    } else {
        Some(ret)
    }
}

fn gate_srcs(g: &mut UOpGraph, u: UOp, gate: UOp, memo: &mut FxHashMap<UOp, UOp>) -> UOp {
    if let Some(&r) = memo.get(&u) {
        return r;
    }
    let ret = if g.op(u) == Opcode::Barrier {
        u
    } else {
        let src = g.src_vec(u);
        if g.op(u) == Opcode::Load
            && src
                .last()
                .map(|&l| g.op(l) == Opcode::Barrier)
                .unwrap_or(false)
        {
            let barrier = *src.last().expect("checked non-empty");
            let guarded = g.intern(Opcode::If, None, &[gate, barrier], Arg::None);
            let mut new_src = src[..src.len() - 1].to_vec();
            new_src.push(guarded);
            let (dt, arg) = (g.dtype(u), g.arg(u).clone());
            g.intern(Opcode::Load, dt, &new_src, arg)
        } else {
            let new_src: SmallVec<[UOp; 4]> =
                src.iter().map(|&s| gate_srcs(g, s, gate, memo)).collect();
            if new_src == src {
                u
            } else {
                let (op, dt, arg) = (g.op(u), g.dtype(u), g.arg(u).clone());
                g.intern(op, dt, &new_src, arg)
            }
        }
    };
    memo.insert(u, ret);
    ret
}

/// Collapse a vectorize over constants into one constant node.
fn vectorize_const(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let vec = b.node("vec");
    let dt = g.dtype(vec)?;
    let vals: Option<Vec<ConstValue>> = g
        .src_vec(vec)
        .iter()
        .map(|&s| g.const_value(s))
        .collect();
    let vals = vals?;
    if vals.windows(2).all(|w| w[0] == w[1]) {
        Some(g.intern(Opcode::Const, Some(dt), &[], Arg::Const(vals[0])))
    } else {
        Some(g.const_vec(dt, &vals))
    }
}

/// Build the expansion rule set.
pub fn expander() -> PatternMatcher {
    let mut rules: Vec<(Pat, RewriteFn)> = Vec::new();
    rules.push((
        Pat::op(Opcode::Vectorize)
            .each(Pat::op(Opcode::Const))
            .named("vec"),
        vectorize_const,
    ));
    // Gates are created before any expansion widens the store.
    rules.push((Pat::op(Opcode::Store).named("root"), create_gate));
    rules.push((
        Pat::ops(&[
            Opcode::Alu,
            Opcode::Cast,
            Opcode::Bitcast,
            Opcode::Gep,
            Opcode::Wmma,
            Opcode::Load,
            Opcode::Store,
            Opcode::Vectorize,
            Opcode::Reduce,
            Opcode::Expand,
            Opcode::If,
        ])
        .named("root"),
        do_expand,
    ));
    rules.push((Pat::op(Opcode::Contract).named("con"), do_contract));
    // Expands splice straight into the sink.
    rules.push((Pat::op(Opcode::Sink).named("root"), |g, b| {
        let root = b.node("root");
        let src = g.src_vec(root);
        if !src.iter().any(|&x| g.op(x) == Opcode::Expand) {
            return None;
        }
        let mut flat = Vec::new();
        for &x in &src {
            if g.op(x) == Opcode::Expand {
                flat.extend_from_slice(g.src(x));
            } else {
                flat.push(x);
            }
        }
        let arg = g.arg(root).clone();
        Some(g.intern(Opcode::Sink, None, &flat, arg))
    }));
    // Barriers aren't vectorized; one barrier guards every lane.
    rules.push((
        Pat::op(Opcode::Barrier).seq([Pat::op(Opcode::Expand).named("ex")]),
        |g, b| {
            let ex = b.node("ex");
            let inner = g.src_vec(ex);
            let barrier = g.intern(Opcode::Barrier, None, &inner, Arg::None);
            let lanes: Vec<UOp> = std::iter::repeat(barrier).take(inner.len()).collect();
            let axes = g.arg(ex).clone();
            Some(g.intern(Opcode::Expand, None, &lanes, axes))
        },
    ));
    rules.push((
        Pat::op(Opcode::Expand)
            .arg(Arg::axes(&[]))
            .seq([Pat::var("x")]),
        |_g, b| Some(b.node("x")),
    ));
    // Expand of per-lane gep sums refolds into a vector sum.
    let width = if flags().amx { 256u32 } else { 8 };
    let srcs: Vec<Pat> = (0..width)
        .map(|i| Pat::var("x").gep(i).add(Pat::var("y").gep(i)))
        .collect();
    rules.push((
        Pat::op(Opcode::Expand).seq(srcs).named("ex"),
        |g, b| {
            let (ex, x, y) = (b.node("ex"), b.node("x"), b.node("y"));
            let n = g.src(ex).len();
            let sum = g.add(x, y);
            let lanes: Vec<UOp> = (0..n).map(|i| g.gep(sum, i as u32)).collect();
            let (dt, axes) = (g.dtype(ex), g.arg(ex).clone());
            Some(g.intern(Opcode::Expand, dt, &lanes, axes))
        },
    ));
    PatternMatcher::new(rules)
}

// ---- float4/image folding --------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum RootKey {
    /// The index was a bare constant.
    Const,
    /// The non-constant part of the index.
    Node(UOp),
}

type OffsetKey = (Option<UOp>, RootKey);

fn foldable_lengths(buf_dt: DType) -> &'static [usize] {
    match buf_dt {
        DType::Image { .. } => &[4],
        DType::Ptr {
            elem: ScalarKind::F16,
            ..
        } if flags().allow_half8 => &[8, 4, 2],
        _ if flags().amx => &[16, 8, 4, 2],
        _ => &[4, 2],
    }
}

/// Fold arithmetic-progression scalar accesses in `ex`'s sources into
/// wide vector accesses.
fn fold_expanded(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let (ex, buf) = (b.node("ex"), b.node("buf"));
    let buf_dt = g.dtype(buf)?;
    let is_image = matches!(buf_dt, DType::Image { .. });
    if !matches!(
        buf_dt,
        DType::Ptr {
            elem: ScalarKind::F32,
            ..
        } | DType::Ptr {
            elem: ScalarKind::F16,
            ..
        }
    ) && !is_image
    {
        return None;
    }
    let ex_src = g.src_vec(ex);
    let mut new_srcs: Vec<Option<UOp>> = Vec::new();
    for &s in &ex_src {
        if !new_srcs.contains(&Some(s)) {
            new_srcs.push(Some(s));
        }
    }
    let old_new_srcs: Vec<UOp> = new_srcs.iter().map(|s| s.expect("all present")).collect();
    let is_load = g.op(old_new_srcs[0]) == Opcode::Load;

    // Extract the (root index, constant offset) decomposition of every
    // scalar access.
    let mut offsets: FxHashMap<OffsetKey, FxHashMap<i64, usize>> = FxHashMap::default();
    for (i, &s) in old_new_srcs.iter().enumerate() {
        if g.dtype(s).map(|d| d.count() != 1).unwrap_or(false) {
            continue;
        }
        let idx = g.src(s)[1];
        if is_image && g.dtype(idx).map(|d| d.count() == 2).unwrap_or(false) {
            continue;
        }
        let (root, off) = if g.op(idx) == Opcode::Alu
            && g.arg(idx) == &Arg::Binary(BinaryOp::Add)
            && g.op(g.src(idx)[1]) == Opcode::Const
        {
            match g.const_value(g.src(idx)[1]) {
                Some(c) => (RootKey::Node(g.src(idx)[0]), c.as_i64()),
                None => (RootKey::Node(idx), 0),
            }
        } else if let Some(c) = g.const_value(idx) {
            (RootKey::Const, c.as_i64())
        } else {
            (RootKey::Node(idx), 0)
        };
        let gate = if g.src(s).len() >= 4 {
            Some(g.src(s)[3])
        } else {
            None
        };
        let slot = offsets.entry((gate, root)).or_default();
        debug_assert!(!slot.contains_key(&off), "duplicate access at one offset");
        slot.insert(off, i);
    }

    let lengths = foldable_lengths(buf_dt);
    let mut used: FxHashSet<(OffsetKey, i64)> = FxHashSet::default();
    let mut keys: Vec<OffsetKey> = offsets.keys().copied().collect();
    keys.sort_by_key(|k| offsets[k].values().copied().min());
    for key in keys {
        let slot = offsets[&key].clone();
        let mut offs: Vec<i64> = slot.keys().copied().collect();
        offs.sort_unstable();
        for &o in &offs {
            for &fold_length in lengths {
                let fl = fold_length as i64;
                let covered = (0..fl)
                    .all(|i| !used.contains(&(key, o + i)) && slot.contains_key(&(o + i)));
                if !covered {
                    continue;
                }
                let load_1 = old_new_srcs[slot[&o]];
                let mut new_src = g.src_vec(load_1).to_vec();
                if g.divides(new_src[1], fl).is_none() {
                    continue;
                }
                if is_image {
                    // Rewrite to the 2D texel address; the index divides 4.
                    let width = match buf_dt {
                        DType::Image { width, .. } => width as i64,
                        _ => unreachable!(),
                    };
                    let idx = new_src[1];
                    let dt = g.dtype(idx)?;
                    let four = g.cint(dt, 4);
                    let w = g.cint(dt, width);
                    let x0 = g.idiv(idx, four);
                    let x = g.rem(x0, w);
                    let four_w = g.cint(dt, 4 * width);
                    let y = g.idiv(idx, four_w);
                    new_src[1] = g.vectorize(dtypes::I32.vec(2), &[x, y]);
                }
                if !is_load || new_src.len() >= 4 {
                    let vals: Vec<UOp> = (0..fl)
                        .map(|i| g.src(old_new_srcs[slot[&(o + i)]])[2])
                        .collect();
                    let vdt = g.dtype(new_src[2])?.vec(fold_length);
                    new_src[2] = g.vectorize(vdt, &vals);
                }
                if is_load {
                    let wide_dt = g.dtype(load_1)?.vec(fold_length);
                    let wide = g.intern(Opcode::Load, Some(wide_dt), &new_src, Arg::None);
                    let lane_dt = g.dtype(load_1);
                    for i in 0..fl {
                        new_srcs[slot[&(o + i)]] = Some(g.intern(
                            Opcode::Gep,
                            lane_dt,
                            &[wide],
                            Arg::Lane(i as u32),
                        ));
                    }
                } else {
                    for i in 0..fl {
                        new_srcs[slot[&(o + i)]] = if i == 0 {
                            Some(g.intern(Opcode::Store, None, &new_src, Arg::None))
                        } else {
                            None
                        };
                    }
                }
                for i in 0..fl {
                    used.insert((key, o + i));
                }
            }
        }
    }
    if used.is_empty() {
        return None;
    }

    let final_srcs: Vec<UOp> = if is_load && old_new_srcs.len() != ex_src.len() {
        // Expand the dedup'd loads back to the original multiplicity.
        ex_src
            .iter()
            .map(|s| {
                let pos = old_new_srcs
                    .iter()
                    .position(|o| o == s)
                    .expect("source was dedup'd from here");
                new_srcs[pos].expect("loads are never dropped")
            })
            .collect()
    } else {
        new_srcs.into_iter().flatten().collect()
    };
    let (op, dt, arg) = (g.op(ex), g.dtype(ex), g.arg(ex).clone());
    Some(g.intern(op, dt, &final_srcs, arg))
}

/// Group identical-range reduces packed by a vectorize into one vector
/// reduce.
fn vectorize_reduce(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let vec = b.node("vec");
    let src = g.src_vec(vec);
    // Reducing the same thing several times stays shared instead.
    if src.windows(2).all(|w| w[0] == w[1]) {
        return None;
    }
    let first = src[0];
    let sig = (g.src(first)[1..].to_vec(), g.arg(first).clone());
    if !src[1..]
        .iter()
        .all(|&x| g.src(x)[1..] == sig.0[..] && g.arg(x) == &sig.1)
    {
        return None;
    }
    let dt = g.dtype(vec)?;
    if !matches!(dt.scalar(), ScalarKind::F32 | ScalarKind::F16) {
        return None;
    }
    let bodies: Vec<UOp> = src.iter().map(|&x| g.src(x)[0]).collect();
    let packed = g.vectorize(dt, &bodies);
    let mut new_src = vec![packed];
    new_src.extend_from_slice(&sig.0);
    Some(g.intern(Opcode::Reduce, Some(dt), &new_src, sig.1))
}

/// Refold a vectorize of same-op scalar ALUs into one vector ALU.
fn vectorize_alu(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let vec = b.node("vec");
    let src = g.src_vec(vec);
    let first = src[0];
    let arg = g.arg(first).clone();
    if !src[1..].iter().all(|&x| g.arg(x) == &arg) {
        return None;
    }
    let dt = g.dtype(vec)?;
    let nargs = g.src(first).len();
    let mut packed = Vec::with_capacity(nargs);
    for i in 0..nargs {
        let lane_dt = g.dtype(g.src(first)[i])?.vec(dt.count());
        let lanes: Vec<UOp> = src.iter().map(|&x| g.src(x)[i]).collect();
        packed.push(g.vectorize(lane_dt, &lanes));
    }
    let op = g.op(first);
    Some(g.intern(op, Some(dt), &packed, arg))
}

/// Build the float4/image folding rule set (backend-gated).
pub fn float4_folding() -> PatternMatcher {
    let rules: Vec<(Pat, RewriteFn)> = vec![
        (
            Pat::op(Opcode::Expand)
                .each(Pat::load([Pat::var("buf"), Pat::any()]).any_len())
                .named("ex"),
            fold_expanded,
        ),
        (
            Pat::ops(&[Opcode::Barrier, Opcode::Sink])
                .each(Pat::store([Pat::var("buf"), Pat::any(), Pat::any()]).any_len())
                .named("ex"),
            fold_expanded,
        ),
        (
            Pat::op(Opcode::Vectorize)
                .each(Pat::op(Opcode::Reduce))
                .named("vec"),
            vectorize_reduce,
        ),
        (
            Pat::op(Opcode::Vectorize)
                .each(Pat::ops(&[Opcode::Alu, Opcode::Cast, Opcode::Bitcast]))
                .named("vec"),
            vectorize_alu,
        ),
    ];
    PatternMatcher::new(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::graph_rewrite;

    #[test]
    fn swizzle_identity_and_permute() {
        let axes = [(0u32, 2u32), (1, 2)];
        let rpk = choices_from_args(&axes);
        assert_eq!(rpk.len(), 4);
        let lst = swizzle_args(&axes, &axes, &[]);
        assert!(is_identity(&lst));
        // A source expanded only over axis 1 repeats per axis-0 point.
        let lst = swizzle_args(&axes, &[(1, 2)], &[]);
        assert_eq!(lst, vec![0, 1, 0, 1]);
    }

    #[test]
    fn expand_through_alu() {
        let mut g = UOpGraph::new();
        let a = g.cfloat(dtypes::F32, 1.0);
        let b0 = g.cfloat(dtypes::F32, 2.0);
        let pair = g.vectorize(dtypes::F32.vec(2), &[a, b0]);
        let ex = g.intern(
            Opcode::Expand,
            Some(dtypes::F32),
            &[pair],
            Arg::axes(&[(0, 2)]),
        );
        let x = g.define_var("x", dtypes::F32, 0, 0);
        let sum = g.add(x, ex);

        let out = graph_rewrite(&mut g, sum, &expander());
        assert_eq!(g.op(out), Opcode::Expand);
        let widened = g.src(out)[0];
        assert_eq!(g.op(widened), Opcode::Alu);
        assert_eq!(g.dtype(widened), Some(dtypes::F32.vec(2)));
        // The invariant operand was broadcast.
        assert_eq!(g.op(g.src(widened)[0]), Opcode::Vectorize);
    }

    #[test]
    fn contract_selects_axis() {
        let mut g = UOpGraph::new();
        let vals: Vec<UOp> = (0..4).map(|i| g.cfloat(dtypes::F32, i as f64)).collect();
        let quad = g.vectorize(dtypes::F32.vec(4), &vals);
        let ex = g.intern(
            Opcode::Expand,
            Some(dtypes::F32),
            &[quad],
            Arg::axes(&[(0, 2), (1, 2)]),
        );
        let con = g.intern(
            Opcode::Contract,
            Some(dtypes::F32.vec(2)),
            &[ex],
            Arg::axes(&[(1, 2)]),
        );
        let out = graph_rewrite(&mut g, con, &expander());
        // One expand axis survives; the contract axis became vector lanes.
        assert_eq!(g.op(out), Opcode::Expand);
        assert_eq!(axes_of(&g, out).unwrap(), vec![(0, 2)]);
        assert_eq!(g.dtype(out), Some(dtypes::F32.vec(2)));
    }

    #[test]
    fn gate_wraps_barriered_load() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let lbuf = g.intern(
            Opcode::DefineLocal,
            Some(dtypes::local_ptr(ScalarKind::F32)),
            &[],
            Arg::Buffer(0),
        );
        let idx = g.define_var("i", dtypes::I32, 0, 63);
        let gate = g.define_var("gv", dtypes::I32, 0, 1);
        let gate = g.cast(gate, dtypes::BOOL);
        let val = g.cfloat(dtypes::F32, 1.0);
        let inner_store = g.store(lbuf, idx, val);
        let barrier = g.intern(Opcode::Barrier, None, &[inner_store], Arg::None);
        let ld = g.intern(
            Opcode::Load,
            Some(dtypes::F32),
            &[lbuf, idx, barrier],
            Arg::None,
        );
        let st = g.intern(Opcode::Store, None, &[buf, idx, ld, gate], Arg::None);

        let out = graph_rewrite(&mut g, st, &expander());
        let ld_out = g.src(out)[2];
        let last = *g.src(ld_out).last().unwrap();
        assert_eq!(g.op(last), Opcode::If);
        assert_eq!(g.src(last)[0], gate);
        assert_eq!(g.op(g.src(last)[1]), Opcode::Barrier);
    }

    #[test]
    fn float4_store_fold() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let base = g.define_var("k", dtypes::I32, 0, 31);
        let four = g.cint(dtypes::I32, 4);
        let base4 = g.mul(base, four);
        let mut stores = Vec::new();
        for i in 0..4 {
            let off = g.cint(dtypes::I32, i);
            let idx = if i == 0 { base4 } else { g.add(base4, off) };
            let val = g.cfloat(dtypes::F32, i as f64);
            stores.push(g.store(buf, idx, val));
        }
        let sink = g.sink(&stores);
        let out = graph_rewrite(&mut g, sink, &float4_folding());
        assert_eq!(g.src(out).len(), 1, "four stores folded into one");
        let st = g.src(out)[0];
        assert_eq!(g.op(st), Opcode::Store);
        let packed = g.src(st)[2];
        assert_eq!(g.dtype(packed), Some(dtypes::F32.vec(4)));
    }

    #[test]
    fn float4_load_fold_geps() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let base = g.define_var("k", dtypes::I32, 0, 31);
        let four = g.cint(dtypes::I32, 4);
        let base4 = g.mul(base, four);
        let loads: Vec<UOp> = (0..4)
            .map(|i| {
                let idx = if i == 0 {
                    base4
                } else {
                    let off = g.cint(dtypes::I32, i);
                    g.add(base4, off)
                };
                g.load(dtypes::F32, buf, idx)
            })
            .collect();
        let ex = g.intern(
            Opcode::Expand,
            Some(dtypes::F32),
            &[loads[0], loads[1], loads[2], loads[3]],
            Arg::axes(&[(0, 4)]),
        );
        let out = graph_rewrite(&mut g, ex, &float4_folding());
        let srcs = g.src(out);
        assert_eq!(srcs.len(), 4);
        for (i, &s) in srcs.iter().enumerate() {
            assert_eq!(g.op(s), Opcode::Gep);
            assert_eq!(g.arg(s), &Arg::Lane(i as u32));
        }
        let wide = g.src(srcs[0])[0];
        assert_eq!(g.op(wide), Opcode::Load);
        assert_eq!(g.dtype(wide), Some(dtypes::F32.vec(4)));
    }

    #[test]
    fn unaligned_store_does_not_fold() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let base = g.define_var("k", dtypes::I32, 0, 31);
        let three = g.cint(dtypes::I32, 3);
        let base3 = g.mul(base, three);
        let mut stores = Vec::new();
        for i in 0..4 {
            let off = g.cint(dtypes::I32, i);
            let idx = if i == 0 { base3 } else { g.add(base3, off) };
            let val = g.cfloat(dtypes::F32, i as f64);
            stores.push(g.store(buf, idx, val));
        }
        let sink = g.sink(&stores);
        // base*3 does not divide 4 (or 2), so nothing folds.
        let out = graph_rewrite(&mut g, sink, &float4_folding());
        assert_eq!(g.src(out).len(), 4);
        assert!(g.src(out).iter().all(|&s| g.op(s) == Opcode::Store));
    }
}
