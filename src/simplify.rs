//! The algebraic rewrite catalogue.
//!
//! This is symbolic simplification over the micro-op graph: constant
//! folding, identity elimination, interval-based collapses, the mod/div/lt
//! folding engine, closed-form collapses of arange-style reductions, PRNG
//! lowering, and the load/store gating folds. Rules are ordered; the first
//! match wins, and several late rules (move-constant-right) deliberately
//! run after the combining rules they would otherwise fight with.

use log::warn;

use crate::ir::dtypes::{self, DType};
use crate::ir::immediates::{ConstValue, Ieee64};
use crate::ir::ops::{exec_binary, exec_ternary, exec_unary, Arg, BinaryOp, Opcode};
use crate::ir::{graph::gcd, UOp, UOpGraph};
use crate::pattern::{Bindings, Pat, PatternMatcher, RewriteFn};
use crate::settings::flags;

fn rule(p: Pat, f: RewriteFn) -> (Pat, RewriteFn) {
    (p, f)
}

/// Python-style nonnegative remainder for positive modulus.
fn pymod(a: i64, c: i64) -> i64 {
    a.rem_euclid(c)
}

/// Floor division for positive divisor.
fn pydiv(a: i64, c: i64) -> i64 {
    a.div_euclid(c)
}

fn cv_i64(g: &UOpGraph, u: UOp) -> Option<i64> {
    g.const_value(u).map(|v| v.as_i64())
}

/// The summands of a nested `Add` chain, left to right.
fn add_chain(g: &UOpGraph, x: UOp, out: &mut Vec<UOp>) {
    if g.op(x) == Opcode::Alu && g.arg(x) == &Arg::Binary(BinaryOp::Add) {
        let (a, b) = (g.src(x)[0], g.src(x)[1]);
        add_chain(g, a, out);
        add_chain(g, b, out);
    } else {
        out.push(x);
    }
}

fn fold_add(g: &mut UOpGraph, terms: &[UOp]) -> Option<UOp> {
    let mut it = terms.iter().copied();
    let first = it.next()?;
    Some(it.fold(first, |acc, t| g.add(acc, t)))
}

// ---- mod/div/lt folding ----------------------------------------------------

/// Simplify `x % c` for positive constant `c`; `None` means no change.
pub fn mod_folding(g: &mut UOpGraph, x: UOp, c: i64) -> Option<UOp> {
    // Simple cancel case: the quotient is constant over the whole interval.
    let (vmin, vmax) = (g.vmin(x), g.vmax(x));
    if c > 0 && vmin >= 0 && vmax != i64::MAX {
        let quotient = vmin / c;
        if quotient == vmax / c {
            let dt = g.dtype(x)?;
            let q = g.cint(dt, quotient * c);
            return Some(g.sub(x, q));
        }
    }

    let mut terms = Vec::new();
    add_chain(g, x, &mut terms);
    let mut remainder = Vec::with_capacity(terms.len());
    let mut changed = false;
    for u in terms {
        let factor = g.const_factor(u);
        if pymod(factor, c) != factor {
            let q = g.divides(u, factor)?;
            let dt = g.dtype(u)?;
            let m = g.cint(dt, pymod(factor, c));
            remainder.push(g.mul(q, m));
            changed = true;
        } else if g.op(u) == Opcode::Alu && g.arg(u) == &Arg::Binary(BinaryOp::Mod) {
            match cv_i64(g, g.src(u)[1]) {
                Some(inner) if inner > 0 && pymod(inner, c) == 0 => {
                    remainder.push(g.src(u)[0]);
                    changed = true;
                }
                _ => remainder.push(u),
            }
        } else {
            remainder.push(u);
        }
    }
    if !changed {
        return None;
    }
    match fold_add(g, &remainder) {
        Some(sum) => {
            let dt = g.dtype(sum)?;
            let cc = g.cint(dt, c);
            Some(g.rem(sum, cc))
        }
        None => Some(g.const_like(x, ConstValue::Int(0))),
    }
}

/// Simplify `x // c` for positive constant `c`; `None` means no change.
pub fn div_folding(g: &mut UOpGraph, x: UOp, c: i64) -> Option<UOp> {
    // Simple cancel case: the whole interval is inside [0, c).
    if g.vmin(x) >= 0 && g.vmax(x) < c {
        return Some(g.const_like(x, ConstValue::Int(0)));
    }

    let mut terms = Vec::new();
    add_chain(g, x, &mut terms);
    let (mut quotient, mut remainder) = (Vec::new(), Vec::new());
    let mut rem_const = 0i64;
    let mut changed = false;
    let mut gcd_acc = c;
    let mut divisor = 1i64;
    for u in terms {
        if g.op(u) == Opcode::Const {
            // Gather all constants together first.
            let cv = g.arg(u).as_const()?;
            if rem_const != 0 {
                changed = true;
            }
            rem_const += cv.as_i64();
        } else {
            let factor = g.const_factor(u);
            if pymod(factor, c) == 0 {
                if factor != 0 {
                    quotient.push(g.divides(u, c)?);
                }
                changed = true;
            } else {
                // `divisor` is the smallest common divisor of the MUL terms.
                if g.op(u) == Opcode::Alu
                    && g.arg(u) == &Arg::Binary(BinaryOp::Mul)
                    && factor > 1
                    && c % factor == 0
                    && (divisor == 1 || divisor > factor)
                {
                    divisor = factor;
                }
                remainder.push(u);
                gcd_acc = gcd(gcd_acc, factor);
            }
        }
    }

    if pymod(rem_const, c) != rem_const {
        changed = true;
        let dt = g.dtype(x)?;
        quotient.push(g.cint(dt, pydiv(rem_const, c)));
        rem_const = pymod(rem_const, c);
    }
    if rem_const != 0 {
        let dt = g.dtype(x)?;
        let k = g.cint(dt, rem_const);
        remainder.push(k);
    }

    let div = if gcd_acc > 1 { gcd_acc } else { divisor };

    if !changed {
        if 1 < div && div < c {
            let newx = div_folding(g, x, div)?;
            let dt = g.dtype(x)?;
            let k = g.cint(dt, c / div);
            return Some(g.idiv(newx, k));
        }
        return None;
    }
    let rem = fold_add(g, &remainder);
    let quo = fold_add(g, &quotient);
    let fold_rem = |g: &mut UOpGraph, r: UOp| -> Option<UOp> {
        let inner = div_folding(g, r, div)?;
        let dt = g.dtype(x)?;
        let k = g.cint(dt, c / div);
        Some(g.idiv(inner, k))
    };
    match (quo, rem) {
        (None, None) => Some(g.const_like(x, ConstValue::Int(0))),
        (None, Some(r)) => fold_rem(g, r),
        (Some(q), None) => Some(q),
        (Some(q), Some(r)) => {
            let d = fold_rem(g, r)?;
            Some(g.add(d, q))
        }
    }
}

/// Rewrite `x < c` through div folding when it yields a division.
pub fn lt_folding(g: &mut UOpGraph, x: UOp, c: i64) -> Option<UOp> {
    let newx = div_folding(g, x, c)?;
    if g.op(newx) == Opcode::Alu && g.arg(newx) == &Arg::Binary(BinaryOp::Idiv) {
        let (a, b) = (g.src(newx)[0], g.src(newx)[1]);
        Some(g.lt(a, b))
    } else {
        None
    }
}

// ---- threefry --------------------------------------------------------------

/// Lower a `Threefry` ALU into its 2x32 rotate-add network.
fn threefry2x32(g: &mut UOpGraph, x: UOp, seed: UOp) -> UOp {
    // Split x into two u32 halves of the u64 input.
    let mask = g.const_val(dtypes::U64, ConstValue::UInt(0xffff_ffff));
    let lo = g.band(x, mask);
    let x0 = g.cast(lo, dtypes::U32);
    let two32 = g.const_val(dtypes::U64, ConstValue::UInt(1 << 32));
    let hi = g.idiv(x, two32);
    let hi = g.band(hi, mask);
    let x1 = g.cast(hi, dtypes::U32);

    let rotations = [[13u32, 15, 26, 6], [17, 29, 16, 24]];
    let seed = g.cast(seed, dtypes::U32);
    let magic = g.const_val(dtypes::U32, ConstValue::UInt(0x1BD1_1BDA));
    let ks = [
        g.const_val(dtypes::U32, ConstValue::UInt(0)),
        g.bxor(seed, magic),
        seed,
    ];
    let mut xr = [g.add(x0, ks[2]), g.add(x1, ks[0])];
    for i in 0..5usize {
        for &r in &rotations[i % 2] {
            let sum = g.add(xr[0], xr[1]);
            let shl = g.const_val(dtypes::U32, ConstValue::UInt(1u64 << r));
            let shr = g.const_val(dtypes::U32, ConstValue::UInt(1u64 << (32 - r)));
            let rot_hi = g.mul(xr[1], shl);
            let rot_lo = g.idiv(xr[1], shr);
            let rot = g.add(rot_hi, rot_lo);
            xr = [sum, g.bxor(sum, rot)];
        }
        let inc = g.const_val(dtypes::U32, ConstValue::UInt(i as u64 + 1));
        let k0 = g.add(xr[0], ks[i % 3]);
        let k1 = g.add(xr[1], ks[(i + 1) % 3]);
        xr = [k0, g.add(k1, inc)];
    }

    let out_hi = g.cast(xr[1], dtypes::U64);
    let out_hi = g.mul(out_hi, two32);
    let out_lo = g.cast(xr[0], dtypes::U64);
    g.bor(out_hi, out_lo)
}

// ---- reduction collapses ---------------------------------------------------

/// Push a reduce below an expand of lane extractions when the expand axes
/// are disjoint from the reduction.
fn reduce_before_expand(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let (reduce, expand, x) = (b.node("reduce"), b.node("expand"), b.node("x"));
    // If the expand itself is being reduced, it can't be pushed through.
    let mut reduced_axes = Vec::new();
    for &r in &g.src_vec(reduce)[1..] {
        if g.op(r) == Opcode::Expand {
            if let Arg::Axes(axes) = g.arg(r) {
                reduced_axes.extend(axes.iter().copied());
            }
        }
    }
    let expand_axes = match g.arg(expand) {
        Arg::Axes(axes) => axes.clone(),
        _ => return None,
    };
    if expand_axes.iter().any(|a| reduced_axes.contains(a)) {
        return None;
    }
    let reduce_dt = g.dtype(reduce);
    let reduce_arg = g.arg(reduce).clone();
    let mut red_src = vec![x];
    red_src.extend_from_slice(&g.src_vec(reduce)[1..]);
    let red = g.intern(Opcode::Reduce, g.dtype(x), &red_src, reduce_arg);
    let count = g.dtype(x).map(|d| d.count()).unwrap_or(1);
    let lanes: Vec<UOp> = (0..count)
        .map(|i| g.intern(Opcode::Gep, reduce_dt, &[red], Arg::Lane(i as u32)))
        .collect();
    let (ex_op, ex_dt) = (g.op(expand), g.dtype(expand));
    Some(g.intern(ex_op, ex_dt, &lanes, Arg::Axes(expand_axes)))
}

fn loop_collapse(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    if flags().disable_loop_collapse {
        return None;
    }
    let (reduce, rng) = (b.node("reduce"), b.node("rng"));
    if !g.src(reduce).contains(&rng) {
        // Must be the reduce that owns this range.
        return None;
    }
    let (loop_start, loop_end) = (b.node("loop_start"), b.node("loop_end"));
    let (compval, mval, multconst) = (b.node("compval"), b.node("mval"), b.node("multconst"));
    let mval_v = cv_i64(g, mval)?;
    let start_v = cv_i64(g, loop_start);
    if mval_v >= 0 || start_v != Some(0) {
        warn!(
            "not collapsing arange loop: mval {:?} loop_start {:?}",
            mval_v, start_v
        );
        return None;
    }
    let mut idx = b.node("idx");
    if let Some(idx2) = b.get("idx2") {
        idx = g.add(idx, idx2);
    }
    if let Some(idx3) = b.get("idx3") {
        idx = g.add(idx, idx3);
    }
    // comprange = min(loop_end, max((idx - compval - mval) // mval +
    // (loop_end - loop_start), loop_start))
    let t = g.sub(idx, compval);
    let t = g.sub(t, mval);
    let t = g.idiv(t, mval);
    let extent = g.sub(loop_end, loop_start);
    let t = g.add(t, extent);
    let t = g.max_(t, loop_start);
    let comprange = g.min_(loop_end, t);

    let mult_dt = g.dtype(multconst)?;
    let casted = g.cast(comprange, mult_dt);
    let new_body = g.mul(casted, multconst);

    let reduce_arg = g.arg(reduce).clone();
    let reduce_dt = g.dtype(reduce);
    let mut new_src = vec![new_body];
    new_src.extend(g.src_vec(reduce)[1..].iter().copied().filter(|&r| r != rng));
    let mut ret = g.intern(Opcode::Reduce, reduce_dt, &new_src, reduce_arg.clone());
    if let Some(extra) = b.get("extra") {
        let mut extra_src = vec![extra];
        extra_src.extend_from_slice(&g.src_vec(reduce)[1..]);
        let extra_red = g.intern(Opcode::Reduce, reduce_dt, &extra_src, reduce_arg);
        ret = g.add(ret, extra_red);
    }
    Some(ret)
}

fn index_collapse_impl(g: &mut UOpGraph, b: &Bindings, add: UOp, mul: UOp) -> Option<UOp> {
    let (reduce, rng) = (b.node("reduce"), b.node("rng"));
    if !g.src(reduce).contains(&rng) {
        return None;
    }
    let (idx, buf, ld) = (b.node("idx"), b.node("buf"), b.node("ld"));
    let scaled = g.mul(mul, idx);
    let new_index = g.add(add, scaled);
    let alt = g.const_like(ld, ConstValue::Int(0));
    let lo = g.src(rng)[0];
    let hi = g.src(rng)[1];
    let ge = g.ge(idx, lo);
    let lt = g.lt(idx, hi);
    let gate = g.band(ge, lt);
    let (ld_op, ld_dt) = (g.op(ld), g.dtype(ld));
    let new_load = g.intern(ld_op, ld_dt, &[buf, new_index, alt, gate], Arg::None);
    let reduce_arg = g.arg(reduce).clone();
    let reduce_dt = g.dtype(reduce);
    let mut new_src = vec![new_load];
    new_src.extend(g.src_vec(reduce)[1..].iter().copied().filter(|&r| r != rng));
    Some(g.intern(Opcode::Reduce, reduce_dt, &new_src, reduce_arg))
}

fn index_collapse(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let (add, mul) = (b.node("add"), b.node("mul"));
    index_collapse_impl(g, b, add, mul)
}

fn index_collapse_unit(g: &mut UOpGraph, b: &Bindings) -> Option<UOp> {
    let add = g.cint(dtypes::I32, 0);
    let mul = g.cint(dtypes::I32, 1);
    index_collapse_impl(g, b, add, mul)
}

// ---- the catalogue ---------------------------------------------------------

fn vectorize_gep_identity(n: usize, elem: DType) -> (Pat, RewriteFn) {
    let srcs: Vec<Pat> = (0..n)
        .map(|j| Pat::var("x").dtype(elem.vec(n)).gep(j as u32))
        .collect();
    rule(
        Pat::op(Opcode::Vectorize).dtype(elem.vec(n)).seq(srcs),
        |_g, b| Some(b.node("x")),
    )
}

fn wmma_zero_acc(n: usize, zero_first: bool) -> (Pat, RewriteFn) {
    let zeros: Vec<Pat> = (0..n).map(|_| Pat::cint(0)).collect();
    let zvec = Pat::op(Opcode::Vectorize).seq(zeros);
    let srcs = if zero_first {
        vec![zvec, Pat::any(), Pat::var("acc")]
    } else {
        vec![Pat::any(), zvec, Pat::var("acc")]
    };
    rule(Pat::op(Opcode::Wmma).seq(srcs), |_g, b| Some(b.node("acc")))
}

fn reduce_expand_rule(n: usize) -> (Pat, RewriteFn) {
    let geps: Vec<Pat> = (0..n)
        .map(|i| Pat::var("x").gep(i as u32).dtype(dtypes::F32))
        .collect();
    rule(
        Pat::op(Opcode::Reduce)
            .seq([Pat::op(Opcode::Expand).seq(geps).named("expand")])
            .any_len()
            .named("reduce"),
        reduce_before_expand,
    )
}

fn arange_body(with_idx2: bool, with_idx3: bool) -> Pat {
    let rng = Pat::op(Opcode::Range)
        .seq([Pat::var("loop_start"), Pat::var("loop_end")])
        .named("rng");
    let mut idx = Pat::var("idx").add(Pat::cvar("mval").mul(rng));
    if with_idx2 {
        idx = idx.add(Pat::var("idx2"));
    }
    if with_idx3 {
        idx = idx.add(Pat::var("idx3"));
    }
    idx.lt(Pat::cvar("compval"))
        .where_(Pat::cvar("multconst"), Pat::cint(0))
}

fn reduce_add_of(body: Pat) -> Pat {
    Pat::op(Opcode::Reduce)
        .arg(Arg::Binary(BinaryOp::Add))
        .seq([body])
        .any_len()
        .named("reduce")
}

/// Build the main algebraic rule set.
pub fn constant_folder() -> PatternMatcher {
    let amx = flags().amx;
    let mut rules: Vec<(Pat, RewriteFn)> = Vec::new();

    rules.push(rule(
        Pat::op(Opcode::Gep).seq([Pat::op(Opcode::If).named("uif")]),
        |_g, b| Some(b.node("uif")),
    ));
    rules.push(rule(
        Pat::op(Opcode::Barrier).seq([Pat::op(Opcode::Sink).named("sink")]),
        |g, b| {
            let src = g.src_vec(b.node("sink"));
            Some(g.intern(Opcode::Barrier, None, &src, Arg::None))
        },
    ));

    // Bool ADD is OR, MUL is AND; this runs before any other bool rule can
    // misread them.
    rules.push(rule(
        Pat::op(Opcode::Alu)
            .arg(Arg::Binary(BinaryOp::Add))
            .dtype(dtypes::BOOL)
            .named("x"),
        |g, b| {
            let x = b.node("x");
            let src = g.src_vec(x);
            Some(g.intern(Opcode::Alu, g.dtype(x), &src, Arg::Binary(BinaryOp::Or)))
        },
    ));
    rules.push(rule(
        Pat::op(Opcode::Alu)
            .arg(Arg::Binary(BinaryOp::Mul))
            .dtype(dtypes::BOOL)
            .named("x"),
        |g, b| {
            let x = b.node("x");
            let src = g.src_vec(x);
            Some(g.intern(Opcode::Alu, g.dtype(x), &src, Arg::Binary(BinaryOp::And)))
        },
    ));

    // GEP of VECTORIZE selects the packed element(s).
    rules.push(rule(
        Pat::op(Opcode::Gep)
            .seq([Pat::op(Opcode::Vectorize).named("vec")])
            .named("gep"),
        |g, b| {
            let (gep, vec) = (b.node("gep"), b.node("vec"));
            match g.arg(gep).clone() {
                Arg::Lane(i) => Some(g.src(vec)[i as usize]),
                Arg::Lanes(lanes) => {
                    let picked: Vec<UOp> =
                        lanes.iter().map(|&i| g.src(vec)[i as usize]).collect();
                    let dt = g.dtype(gep)?;
                    Some(g.vectorize(dt, &picked))
                }
                _ => None,
            }
        },
    ));
    let mut widths = vec![2usize, 4, 8, 16];
    if amx {
        widths.push(256);
    }
    for &n in &widths {
        rules.push(vectorize_gep_identity(n, dtypes::F32));
    }
    for n in [2usize, 4, 8, 16] {
        rules.push(vectorize_gep_identity(n, dtypes::F16));
    }

    // A tensor core with a zero operand passes the accumulator through.
    for n in [2usize, 4, 8] {
        rules.push(wmma_zero_acc(n, true));
        rules.push(wmma_zero_acc(n, false));
    }
    let mut tc_widths = vec![2usize, 4, 8];
    if amx {
        tc_widths.extend([16, 256]);
    }
    for &n in &tc_widths {
        rules.push(reduce_expand_rule(n));
    }
    rules.push(rule(
        Pat::var("add").add(Pat::op(Opcode::Wmma).named("wmma")),
        |g, b| {
            let (add, wmma) = (b.node("add"), b.node("wmma"));
            let src = g.src_vec(wmma);
            let acc = g.add(src[2], add);
            let arg = g.arg(wmma).clone();
            Some(g.intern(Opcode::Wmma, g.dtype(wmma), &[src[0], src[1], acc], arg))
        },
    ));

    // Threefry lowering.
    rules.push(rule(
        Pat::op(Opcode::Alu)
            .arg(Arg::Binary(BinaryOp::Threefry))
            .dtype(dtypes::U64)
            .seq([Pat::var("x"), Pat::var("seed")]),
        |g, b| Some(threefry2x32(g, b.node("x"), b.node("seed"))),
    ));

    // Arange loop collapse; the wider addend forms first since we don't
    // fold adds.
    rules.push(rule(reduce_add_of(arange_body(true, true)), loop_collapse));
    rules.push(rule(reduce_add_of(arange_body(true, false)), loop_collapse));
    rules.push(rule(reduce_add_of(arange_body(false, false)), loop_collapse));
    rules.push(rule(
        reduce_add_of(arange_body(false, false).add(Pat::var("extra"))),
        loop_collapse,
    ));

    // Indexing with a (possibly scaled) offset.
    let rng_pat = || Pat::op(Opcode::Range).named("rng");
    let scaled_load = || {
        Pat::load([
            Pat::var("buf"),
            Pat::var("add").add(Pat::var("mul").mul(rng_pat())),
        ])
        .named("ld")
    };
    rules.push(rule(
        reduce_add_of(
            Pat::op(Opcode::Cast)
                .seq([Pat::var("idx").ne(rng_pat()).neg()])
                .mul(scaled_load()),
        ),
        index_collapse,
    ));
    rules.push(rule(
        reduce_add_of(
            Pat::op(Opcode::Cast)
                .seq([Pat::var("idx").ne(rng_pat()).neg()])
                .mul(Pat::load([Pat::var("buf"), rng_pat()]).named("ld")),
        ),
        index_collapse_unit,
    ));
    rules.push(rule(
        reduce_add_of(
            Pat::var("idx")
                .ne(rng_pat())
                .neg()
                .where_(scaled_load(), Pat::cint(0)),
        ),
        index_collapse,
    ));

    // Max folding from intervals.
    rules.push(rule(
        Pat::var("x").max_(Pat::var("y")),
        |g, b| {
            let (x, y) = (b.node("x"), b.node("y"));
            if g.vmin(x) >= g.vmax(y) {
                Some(x)
            } else if g.vmax(x) <= g.vmin(y) {
                Some(y)
            } else {
                None
            }
        },
    ));

    // GEP/CAST of constants.
    rules.push(rule(
        Pat::op(Opcode::Gep).seq([Pat::cvar("c")]).named("gep"),
        |g, b| {
            let (gep, c) = (b.node("gep"), b.node("c"));
            let dt = g.dtype(gep)?;
            match (g.arg(gep).clone(), g.arg(c).clone()) {
                (Arg::Lane(i), Arg::ConstVec(vals)) => {
                    Some(g.const_val(dt, vals[i as usize]))
                }
                (Arg::Lanes(lanes), Arg::ConstVec(vals)) => {
                    let picked: Vec<ConstValue> =
                        lanes.iter().map(|&i| vals[i as usize]).collect();
                    Some(g.const_vec(dt, &picked))
                }
                (_, Arg::Const(v)) => Some(g.const_val(dt, v)),
                _ => None,
            }
        },
    ));
    rules.push(rule(
        Pat::op(Opcode::Cast).seq([Pat::cvar("c")]).named("root"),
        |g, b| {
            let v = g.const_value(b.node("c"))?;
            Some(g.const_like(b.node("root"), v))
        },
    ));

    // A conditional with the same result either way is a no-op; constant
    // gates select a branch.
    rules.push(rule(
        Pat::any().where_(Pat::var("val"), Pat::var("val")),
        |_g, b| Some(b.node("val")),
    ));
    rules.push(rule(
        Pat::cvar("gate").where_(Pat::var("c0"), Pat::var("c1")),
        |g, b| {
            let gate = g.const_value(b.node("gate"))?;
            Some(if gate.as_bool() {
                b.node("c0")
            } else {
                b.node("c1")
            })
        },
    ));

    // Full constant folding of ALU trees.
    rules.push(rule(
        Pat::op(Opcode::Alu).named("root").each(Pat::cany()),
        |g, b| {
            let root = b.node("root");
            let dt = g.dtype(root)?;
            let vals: Option<Vec<ConstValue>> =
                g.src_vec(root).iter().map(|&s| g.const_value(s)).collect();
            let vals = vals?;
            let folded = match (g.arg(root), vals.len()) {
                (Arg::Unary(op), 1) => exec_unary(*op, dt, vals[0]),
                (Arg::Binary(op), 2) => exec_binary(*op, dt, vals[0], vals[1]),
                (Arg::Ternary(op), 3) => exec_ternary(*op, dt, vals[0], vals[1], vals[2]),
                _ => None,
            }?;
            Some(g.const_val(dt, folded))
        },
    ));

    // Self folding.
    rules.push(rule(Pat::op(Opcode::Cast).named("root"), |g, b| {
        let root = b.node("root");
        if g.dtype(root) == g.dtype(g.src(root)[0]) {
            Some(g.src(root)[0])
        } else {
            None
        }
    }));
    rules.push(rule(
        Pat::op(Opcode::Reduce).seq([Pat::var("x")]),
        |_g, b| Some(b.node("x")),
    ));
    rules.push(rule(Pat::var("x").add(Pat::cint(0)), |_g, b| {
        Some(b.node("x"))
    }));
    rules.push(rule(Pat::var("x").mul(Pat::cint(1)), |_g, b| {
        Some(b.node("x"))
    }));
    rules.push(rule(Pat::var("x").idiv(Pat::var("x")), |g, b| {
        Some(g.const_like(b.node("x"), ConstValue::Int(1)))
    }));
    rules.push(rule(Pat::var("x").idiv(Pat::cint(1)), |_g, b| {
        Some(b.node("x"))
    }));
    rules.push(rule(Pat::var("x").idiv(Pat::cint(-1)), |g, b| {
        Some(g.neg(b.node("x")))
    }));
    rules.push(rule(Pat::var("x").fdiv(Pat::var("x")), |g, b| {
        Some(g.const_like(b.node("x"), ConstValue::Int(1)))
    }));
    rules.push(rule(
        Pat::var("x").mul(Pat::var("x2")).fdiv(Pat::var("x2")),
        |_g, b| Some(b.node("x")),
    ));
    rules.push(rule(
        Pat::var("x").dtype(dtypes::BOOL).band(Pat::cvar("c")),
        |g, b| {
            let c = g.const_value(b.node("c"))?;
            Some(if c.as_bool() { b.node("x") } else { b.node("c") })
        },
    ));
    rules.push(rule(
        Pat::var("x").dtype(dtypes::BOOL).bor(Pat::cvar("c")),
        |g, b| {
            let c = g.const_value(b.node("c"))?;
            Some(if c.as_bool() { b.node("c") } else { b.node("x") })
        },
    ));

    // Zero folding. A NaN or inf factor must keep rendering as NaN.
    rules.push(rule(Pat::var("x").mul(Pat::cint(0)), |g, b| {
        let x = b.node("x");
        let v = match g.const_value(x) {
            Some(cv) if cv.is_nan_or_inf() => ConstValue::F64(Ieee64::with_float(f64::NAN)),
            _ => ConstValue::Int(0),
        };
        Some(g.const_like(x, v))
    }));

    // Interval collapse: a pinned interval is a constant.
    rules.push(rule(
        Pat::ops(&[Opcode::Alu, Opcode::DefineVar]).named("x"),
        |g, b| {
            let x = b.node("x");
            let r = g.value_range(x);
            if r.is_exact() {
                Some(g.const_like(x, ConstValue::Int(r.min)))
            } else {
                None
            }
        },
    ));

    // Store of what's already there.
    rules.push(rule(
        Pat::store([
            Pat::var("buf"),
            Pat::var("idx"),
            Pat::load([Pat::var("buf"), Pat::var("idx")]),
        ]),
        |g, _b| Some(g.noop()),
    ));

    // Two stage add/mul folding.
    rules.push(rule(
        Pat::var("x").add(Pat::cvar("c1")).add(Pat::cvar("c2")),
        |g, b| {
            let c = g.add(b.node("c1"), b.node("c2"));
            Some(g.add(b.node("x"), c))
        },
    ));
    rules.push(rule(
        Pat::var("x").mul(Pat::cvar("c1")).mul(Pat::cvar("c2")),
        |g, b| {
            let c = g.mul(b.node("c1"), b.node("c2"));
            Some(g.mul(b.node("x"), c))
        },
    ));

    // Inequality canonicalization.
    rules.push(rule(
        Pat::cvar("c0").mul(Pat::var("x")).lt(Pat::cvar("c1")),
        |g, b| {
            let x = b.node("x");
            if !g.dtype(x).map(|d| d.is_int()).unwrap_or(false) {
                return None;
            }
            let c0 = cv_i64(g, b.node("c0"))?;
            let c1 = cv_i64(g, b.node("c1"))?;
            if c0 > 0 && c1 > 0 {
                let dt = g.dtype(x)?;
                let k = g.cint(dt, (c1 + c0 - 1) / c0);
                Some(g.lt(x, k))
            } else {
                None
            }
        },
    ));
    rules.push(rule(
        Pat::cvar("c0").mul(Pat::var("x")).lt(Pat::cvar("c1")),
        |g, b| {
            let x = b.node("x");
            if !g.dtype(x).map(|d| d.is_int()).unwrap_or(false) {
                return None;
            }
            let c0 = cv_i64(g, b.node("c0"))?;
            let c1 = cv_i64(g, b.node("c1"))?;
            if c0 < 0 && c0 != -1 && c1 <= 0 {
                let dt = g.dtype(x)?;
                let nx = g.neg(x);
                let k = g.cint(dt, -pydiv(-c1, -c0));
                Some(g.lt(nx, k))
            } else {
                None
            }
        },
    ));
    rules.push(rule(
        Pat::cvar("c0")
            .mul(Pat::var("x"))
            .add(Pat::var("x2"))
            .lt(Pat::cvar("c1")),
        |g, b| {
            let (x, x2) = (b.node("x"), b.node("x2"));
            let c0 = cv_i64(g, b.node("c0"))?;
            let c1 = cv_i64(g, b.node("c1"))?;
            if c0 != 0 && c1 % c0 == 0 && c0 > g.vmax(x2) && g.vmin(x2) >= 0 {
                let dt = g.dtype(x)?;
                let k = g.cint(dt, c1 / c0);
                Some(g.lt(x, k))
            } else {
                None
            }
        },
    ));
    rules.push(rule(Pat::var("x").lt(Pat::cvar("c")), |g, b| {
        let x = b.node("x");
        let dt = g.dtype(x)?;
        if !dt.is_int() || dt.is_unsigned() {
            return None;
        }
        let c = cv_i64(g, b.node("c"))?;
        if c > 0 {
            lt_folding(g, x, c)
        } else {
            None
        }
    }));

    // Division and modulus folding.
    rules.push(rule(Pat::var("x").idiv(Pat::cvar("c")), |g, b| {
        let x = b.node("x");
        let dt = g.dtype(x)?;
        if dt.is_unsigned() {
            return None;
        }
        let c = cv_i64(g, b.node("c"))?;
        if c > 0 {
            div_folding(g, x, c)
        } else {
            None
        }
    }));
    rules.push(rule(Pat::var("x").rem(Pat::cvar("c")), |g, b| {
        let x = b.node("x");
        let c = cv_i64(g, b.node("c"))?;
        if c > 0 {
            mod_folding(g, x, c)
        } else {
            None
        }
    }));
    rules.push(rule(
        Pat::cvar("c0").mul(Pat::var("x")).rem(Pat::cvar("c1")),
        |g, b| {
            let x = b.node("x");
            let c0 = cv_i64(g, b.node("c0"))?;
            let c1 = cv_i64(g, b.node("c1"))?;
            if c0 != 0 && c1 % c0 == 0 {
                let dt = g.dtype(x)?;
                let k = g.cint(dt, c1 / c0);
                let m = g.rem(x, k);
                let c0n = b.node("c0");
                Some(g.mul(m, c0n))
            } else {
                None
            }
        },
    ));

    // Combine terms.
    rules.push(rule(
        Pat::var("x")
            .rem(Pat::cvar("c"))
            .add(Pat::var("x").idiv(Pat::cvar("c")).mul(Pat::cvar("c"))),
        |_g, b| Some(b.node("x")),
    ));
    rules.push(rule(
        Pat::var("x")
            .mul(Pat::cvar("c0"))
            .add(Pat::var("x").mul(Pat::cvar("c1"))),
        |g, b| {
            let c = g.add(b.node("c0"), b.node("c1"));
            Some(g.mul(b.node("x"), c))
        },
    ));
    rules.push(rule(
        Pat::var("x").add(Pat::var("x").mul(Pat::cvar("c"))),
        |g, b| {
            let c = b.node("c");
            let one = g.const_like(c, ConstValue::Int(1));
            let c1 = g.add(c, one);
            Some(g.mul(b.node("x"), c1))
        },
    ));
    rules.push(rule(Pat::var("x").add(Pat::var("x")), |g, b| {
        let x = b.node("x");
        let two = g.const_like(x, ConstValue::Int(2));
        Some(g.mul(x, two))
    }));
    rules.push(rule(
        Pat::var("x").idiv(Pat::cvar("c0")).idiv(Pat::cvar("c1")),
        |g, b| {
            let c = g.mul(b.node("c0"), b.node("c1"));
            Some(g.idiv(b.node("x"), c))
        },
    ));
    rules.push(rule(
        Pat::var("x").fdiv(Pat::var("x2")).fdiv(Pat::var("x3")),
        |g, b| {
            let d = g.mul(b.node("x2"), b.node("x3"));
            Some(g.fdiv(b.node("x"), d))
        },
    ));
    rules.push(rule(Pat::var("x").add(Pat::var("y")).neg(), |g, b| {
        let nx = g.neg(b.node("x"));
        let ny = g.neg(b.node("y"));
        Some(g.add(nx, ny))
    }));
    rules.push(rule(
        Pat::cvar("c0").add(Pat::var("x")).lt(Pat::cvar("c1")),
        |g, b| {
            let k = g.sub(b.node("c1"), b.node("c0"));
            Some(g.lt(b.node("x"), k))
        },
    ));
    // (x+y)*c -> x*c+y*c, ints only: floats have the inf*0 = nan hazard.
    rules.push(rule(
        Pat::var("x").add(Pat::var("y")).mul(Pat::cvar("c")),
        |g, b| {
            let x = b.node("x");
            if !g.dtype(x).map(|d| d.is_int()).unwrap_or(false) {
                return None;
            }
            let xc = g.mul(x, b.node("c"));
            let yc = g.mul(b.node("y"), b.node("c"));
            Some(g.add(xc, yc))
        },
    ));
    // x != 0 is just the bool reading of x.
    rules.push(rule(Pat::var("x").ne(Pat::cint(0)), |g, b| {
        let x = b.node("x");
        let count = g.dtype(x).map(|d| d.count()).unwrap_or(1);
        Some(g.cast(x, dtypes::BOOL.vec(count)))
    }));
    rules.push(rule(Pat::var("x").band(Pat::var("x")), |_g, b| {
        Some(b.node("x"))
    }));
    rules.push(rule(Pat::var("x").bor(Pat::var("x")), |_g, b| {
        Some(b.node("x"))
    }));

    // Fold a select-else-load store into a gated store.
    rules.push(rule(
        Pat::store([
            Pat::var("buf"),
            Pat::var("idx"),
            Pat::var("gate").where_(
                Pat::var("alt"),
                Pat::load([Pat::var("buf"), Pat::var("idx")]),
            ),
        ]),
        |g, b| {
            let (buf, idx, alt, gate) =
                (b.node("buf"), b.node("idx"), b.node("alt"), b.node("gate"));
            Some(g.intern(Opcode::Store, None, &[buf, idx, alt, gate], Arg::None))
        },
    ));

    // Gated loads and stores with known gates.
    let true_pat = || Pat::cbool(true).dtype(dtypes::BOOL);
    let false_pat = || Pat::cbool(false).dtype(dtypes::BOOL);
    rules.push(rule(
        Pat::load([Pat::var("buf"), Pat::var("idx"), Pat::var("var"), true_pat()]),
        |g, b| {
            let dt = g.dtype(b.node("var"))?;
            Some(g.load(dt, b.node("buf"), b.node("idx")))
        },
    ));
    rules.push(rule(
        Pat::load([
            Pat::var("buf"),
            Pat::var("idx"),
            Pat::var("var"),
            true_pat(),
            Pat::var("barrier"),
        ]),
        |g, b| {
            let dt = g.dtype(b.node("var"))?;
            let (buf, idx, barrier) = (b.node("buf"), b.node("idx"), b.node("barrier"));
            Some(g.intern(Opcode::Load, Some(dt), &[buf, idx, barrier], Arg::None))
        },
    ));
    rules.push(rule(
        Pat::load([Pat::any(), Pat::any(), Pat::var("var"), false_pat()]),
        |_g, b| Some(b.node("var")),
    ));
    rules.push(rule(
        Pat::load([
            Pat::any(),
            Pat::any(),
            Pat::var("var"),
            false_pat(),
            Pat::any(),
        ]),
        |_g, b| Some(b.node("var")),
    ));
    rules.push(rule(
        Pat::store([Pat::var("buf"), Pat::var("idx"), Pat::var("val"), true_pat()]),
        |g, b| Some(g.store(b.node("buf"), b.node("idx"), b.node("val"))),
    ));
    rules.push(rule(
        Pat::store([Pat::any(), Pat::any(), Pat::any(), false_pat()]),
        |g, _b| Some(g.noop()),
    ));

    // Clean the sink: drop NOOPs, splice nested sinks and expands.
    rules.push(rule(Pat::op(Opcode::Sink).named("root"), |g, b| {
        let root = b.node("root");
        let src = g.src_vec(root);
        let kept: Vec<UOp> = src
            .iter()
            .copied()
            .filter(|&x| g.op(x) != Opcode::Noop)
            .collect();
        if kept.len() != src.len() {
            let arg = g.arg(root).clone();
            Some(g.intern(Opcode::Sink, None, &kept, arg))
        } else {
            None
        }
    }));
    rules.push(rule(Pat::op(Opcode::Sink).named("root"), |g, b| {
        let root = b.node("root");
        let src = g.src_vec(root);
        if !src
            .iter()
            .any(|&x| matches!(g.op(x), Opcode::Sink | Opcode::Expand))
        {
            return None;
        }
        let mut flat = Vec::new();
        for &x in &src {
            if matches!(g.op(x), Opcode::Sink | Opcode::Expand) {
                flat.extend_from_slice(g.src(x));
            } else {
                flat.push(x);
            }
        }
        let arg = g.arg(root).clone();
        Some(g.intern(Opcode::Sink, None, &flat, arg))
    }));

    // Move add constants to the right; runs last so the combining rules
    // above see both shapes first.
    rules.push(rule(
        Pat::op(Opcode::Alu)
            .arg(Arg::Binary(BinaryOp::Add))
            .seq([Pat::cvar("c1"), Pat::var("x")]),
        |g, b| {
            let x = b.node("x");
            if g.op(x) == Opcode::Const {
                None
            } else {
                Some(g.add(x, b.node("c1")))
            }
        },
    ));
    rules.push(rule(
        Pat::op(Opcode::Alu)
            .arg(Arg::Binary(BinaryOp::Add))
            .permute([
                Pat::var("x").add(Pat::cvar("c1")),
                Pat::var("y"),
            ]),
        |g, b| {
            let s = g.add(b.node("x"), b.node("y"));
            Some(g.add(s, b.node("c1")))
        },
    ));

    PatternMatcher::new(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;
    use crate::rewrite::graph_rewrite;

    fn folder() -> PatternMatcher {
        constant_folder()
    }

    #[test]
    fn folds_constants() {
        let mut g = UOpGraph::new();
        let a = g.cint(dtypes::I32, 2);
        let b = g.cint(dtypes::I32, 3);
        let s = g.add(a, b);
        let out = graph_rewrite(&mut g, s, &folder());
        assert_eq!(out, g.cint(dtypes::I32, 5));
    }

    #[test]
    fn add_zero_identity() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let zero = g.cint(dtypes::I32, 0);
        let s = g.add(x, zero);
        assert_eq!(graph_rewrite(&mut g, s, &folder()), x);
    }

    #[test]
    fn mul_zero_and_nan() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let zero = g.cint(dtypes::I32, 0);
        let m = g.mul(x, zero);
        assert_eq!(graph_rewrite(&mut g, m, &folder()), zero);

        let inf = g.cfloat(dtypes::F32, f64::INFINITY);
        let fzero = g.cfloat(dtypes::F32, 0.0);
        let m = g.mul(inf, fzero);
        let out = graph_rewrite(&mut g, m, &folder());
        let v = g.const_value(out).unwrap();
        assert!(v.as_f64().is_nan());
    }

    #[test]
    fn bool_add_becomes_or() {
        let mut g = UOpGraph::new();
        let a = g.define_var("a", dtypes::I32, 0, 1);
        let b = g.define_var("b", dtypes::I32, 0, 2);
        let ba = g.cast(a, dtypes::BOOL);
        let bb = g.cast(b, dtypes::BOOL);
        let s = g.alu2(BinaryOp::Add, ba, bb);
        let out = graph_rewrite(&mut g, s, &folder());
        assert_eq!(g.arg(out), &Arg::Binary(BinaryOp::Or));
    }

    #[test]
    fn mod_folding_kills_even_terms() {
        // (4*x + 1) % 2 == 1 for any x in [0, 10].
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 10);
        let four = g.cint(dtypes::I32, 4);
        let one = g.cint(dtypes::I32, 1);
        let two = g.cint(dtypes::I32, 2);
        let t = g.mul(four, x);
        let t = g.add(t, one);
        let m = g.rem(t, two);
        let out = graph_rewrite(&mut g, m, &folder());
        assert_eq!(out, g.cint(dtypes::I32, 1));
    }

    #[test]
    fn mod_cancel_when_quotient_pinned() {
        // x in [4, 5]: x % 8 == x - 0*8 == x; x+8 % 8 == x.
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 4, 5);
        let eight = g.cint(dtypes::I32, 8);
        let t = g.add(x, eight);
        let m = g.rem(t, eight);
        let out = graph_rewrite(&mut g, m, &folder());
        assert_eq!(out, x);
    }

    #[test]
    fn div_folding_splits_terms() {
        // (8*x + 4) // 4 == 2*x + 1 for x >= 0.
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let eight = g.cint(dtypes::I32, 8);
        let four = g.cint(dtypes::I32, 4);
        let t = g.mul(x, eight);
        let t = g.add(t, four);
        let d = g.idiv(t, four);
        let out = graph_rewrite(&mut g, d, &folder());
        let two = g.cint(dtypes::I32, 2);
        let one = g.cint(dtypes::I32, 1);
        let m = g.mul(x, two);
        let expect = g.add(m, one);
        assert_eq!(out, expect);
    }

    #[test]
    fn div_in_range_is_zero() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 3);
        let four = g.cint(dtypes::I32, 4);
        let d = g.idiv(x, four);
        let out = graph_rewrite(&mut g, d, &folder());
        assert_eq!(out, g.cint(dtypes::I32, 0));
    }

    #[test]
    fn lt_scales_down() {
        // 4*x < 16  ->  x < 4.
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let four = g.cint(dtypes::I32, 4);
        let sixteen = g.cint(dtypes::I32, 16);
        let m = g.mul(four, x);
        let c = g.lt(m, sixteen);
        let out = graph_rewrite(&mut g, c, &folder());
        let k = g.cint(dtypes::I32, 4);
        assert_eq!(out, g.lt(x, k));
    }

    #[test]
    fn interval_pins_comparison() {
        // x in [0, 3] means x < 10 is constant true.
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 3);
        let ten = g.cint(dtypes::I32, 10);
        let c = g.lt(x, ten);
        let out = graph_rewrite(&mut g, c, &folder());
        assert_eq!(out, g.cbool(true));
    }

    #[test]
    fn combine_scaled_terms() {
        // x*3 + x*5 -> x*8.
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let three = g.cint(dtypes::I32, 3);
        let five = g.cint(dtypes::I32, 5);
        let a = g.mul(x, three);
        let b = g.mul(x, five);
        let s = g.add(a, b);
        let out = graph_rewrite(&mut g, s, &folder());
        let eight = g.cint(dtypes::I32, 8);
        assert_eq!(out, g.mul(x, eight));
    }

    #[test]
    fn move_const_right() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let three = g.cint(dtypes::I32, 3);
        let s = g.add(three, x);
        let out = graph_rewrite(&mut g, s, &folder());
        assert_eq!(out, g.add(x, three));
    }

    #[test]
    fn gated_store_fold() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(crate::ir::ScalarKind::F32));
        let idx = g.define_var("i", dtypes::I32, 0, 100);
        let val = g.cfloat(dtypes::F32, 1.0);
        let t = g.cbool(true);
        let st = g.intern(Opcode::Store, None, &[buf, idx, val, t], Arg::None);
        let out = graph_rewrite(&mut g, st, &folder());
        assert_eq!(out, g.store(buf, idx, val));

        let f = g.cbool(false);
        let st = g.intern(Opcode::Store, None, &[buf, idx, val, f], Arg::None);
        let out = graph_rewrite(&mut g, st, &folder());
        assert_eq!(g.op(out), Opcode::Noop);
    }

    #[test]
    fn store_of_load_is_noop() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(crate::ir::ScalarKind::F32));
        let idx = g.define_var("i", dtypes::I32, 0, 100);
        let ld = g.load(dtypes::F32, buf, idx);
        let st = g.store(buf, idx, ld);
        let out = graph_rewrite(&mut g, st, &folder());
        assert_eq!(g.op(out), Opcode::Noop);
    }

    #[test]
    fn threefry_lowers_away() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::U64, 0, i64::MAX);
        let seed = g.define_var("s", dtypes::U64, 0, i64::MAX);
        let tf = g.alu2(BinaryOp::Threefry, x, seed);
        let out = graph_rewrite(&mut g, tf, &folder());
        assert_eq!(g.dtype(out), Some(dtypes::U64));
        for n in g.reachable(out) {
            assert_ne!(g.arg(n), &Arg::Binary(BinaryOp::Threefry));
        }
    }

    #[test]
    fn arange_loop_collapse() {
        // REDUCE_ADD over rng of (idx + (-1)*rng < 0 ? 1 : 0) counts
        // iterations with rng <= idx; the loop disappears.
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 10);
        let rng = g.range(dtypes::I32, zero, n, 0, true);
        let idx = g.define_var("idx", dtypes::I32, 0, 9);
        let neg1 = g.cint(dtypes::I32, -1);
        let scaled = g.mul(neg1, rng);
        let body = g.add(idx, scaled);
        let cmp = g.lt(body, zero);
        let one = g.cint(dtypes::I32, 1);
        let sel = g.where_(cmp, one, zero);
        let red = g.intern(
            Opcode::Reduce,
            Some(dtypes::I32),
            &[sel, rng],
            Arg::Binary(BinaryOp::Add),
        );
        let out = graph_rewrite(&mut g, red, &folder());
        let reach = g.reachable(out);
        assert!(
            !reach.contains(&rng),
            "range survived the collapse: {}",
            g.describe(out)
        );
        assert!(reach.iter().all(|&u| g.op(u) != Opcode::Reduce));
    }

    #[test]
    fn rewrite_idempotent_on_folded_graph() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 100);
        let three = g.cint(dtypes::I32, 3);
        let five = g.cint(dtypes::I32, 5);
        let t = g.mul(x, three);
        let t2 = g.mul(x, five);
        let s = g.add(t, t2);
        let once = graph_rewrite(&mut g, s, &folder());
        let twice = graph_rewrite(&mut g, once, &folder());
        assert_eq!(once, twice);
    }
}
