//! Topological scheduling of the rewritten graph into a flat instruction
//! list.
//!
//! The scheduler is a priority heap over ready nodes. Reduction ranges
//! carry a positive priority derived from their id plus a large penalty per
//! independent sibling range, so independent loops are opened late and
//! stay adjacent; everything else gets a negative priority proportional to
//! the loops whose scope it belongs to, pulling loop bodies next to their
//! loops. Accumulators are spliced in just before their first range, and
//! end markers are inserted after the last node of each scope once it
//! drains.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{error, trace};

use crate::fx::{FxHashMap, FxHashSet};
use crate::ir::ops::{Arg, Opcode};
use crate::ir::{UOp, UOpGraph};
use crate::settings::flags;
use crate::verifier::{type_verify, VerifierError};

/// DFS over the sink: children lists, the set of reduction ranges feeding
/// each node, in-degrees, and postorder insertion order.
struct GraphInfo {
    children: FxHashMap<UOp, Vec<UOp>>,
    range_srcs: FxHashMap<UOp, FxHashSet<UOp>>,
    in_degree: FxHashMap<UOp, usize>,
    order: Vec<UOp>,
}

fn collect_graph(g: &UOpGraph, sink: UOp) -> GraphInfo {
    let mut info = GraphInfo {
        children: FxHashMap::default(),
        range_srcs: FxHashMap::default(),
        in_degree: FxHashMap::default(),
        order: Vec::new(),
    };
    collect_node(g, sink, &mut info);
    info
}

fn collect_node(g: &UOpGraph, u: UOp, info: &mut GraphInfo) -> FxHashSet<UOp> {
    if info.children.contains_key(&u) {
        return info.range_srcs[&u].clone();
    }
    info.children.insert(u, Vec::new());
    let mut srcs = FxHashSet::default();
    for &x in g.src(u) {
        srcs.extend(collect_node(g, x, info));
        if g.op(x) == Opcode::Range && matches!(g.arg(x), Arg::Range { reduce: true, .. }) {
            srcs.insert(x);
        }
        info.children.get_mut(&x).expect("child visited").push(u);
    }
    info.range_srcs.insert(u, srcs.clone());
    info.in_degree.insert(u, g.src(u).len());
    info.order.push(u);
    srcs
}

/// Nodes inside the scope opened by `p`: transitive children, not
/// descending past the scope's stop opcode, and never through the sink.
fn scope_members(info: &GraphInfo, p: UOp, stop: Opcode, g: &UOpGraph) -> FxHashSet<UOp> {
    let mut out = FxHashSet::default();
    let mut stack: Vec<UOp> = info.children[&p].clone();
    while let Some(u) = stack.pop() {
        if g.op(u) == Opcode::Sink || !out.insert(u) {
            continue;
        }
        if g.op(u) != stop {
            stack.extend(info.children[&u].iter().copied());
        }
    }
    out
}

fn range_id(g: &UOpGraph, r: UOp) -> (i64, bool) {
    match g.arg(r) {
        Arg::Range { id, reduce } => (*id as i64, *reduce),
        _ => (0, false),
    }
}

/// Scheduling priority of a ready node. Lower pops first.
fn priority(
    g: &UOpGraph,
    u: UOp,
    info: &GraphInfo,
    scope_children: &FxHashMap<UOp, FxHashSet<UOp>>,
    range_phi: &FxHashMap<UOp, Vec<UOp>>,
) -> i64 {
    let mut priority = 0i64;
    if g.op(u) == Opcode::Range {
        let (id, reduce) = range_id(g, u);
        if reduce {
            // Prefer ranges that depend on the fewest independent ranges.
            priority += id;
            let own_phi = &range_phi[&u];
            for p in own_phi {
                let independent = info.range_srcs[p]
                    .iter()
                    .filter(|&&r| {
                        !range_phi
                            .get(&r)
                            .map(|phis| phis.iter().any(|i| own_phi.contains(i)))
                            .unwrap_or(false)
                    })
                    .count();
                priority += 10_000 * independent as i64;
            }
            return priority;
        }
    }
    // Prefer nodes that live inside already-relevant loops.
    for (l, ss) in scope_children {
        if g.op(*l) == Opcode::Range && ss.contains(&u) {
            let (id, reduce) = range_id(g, *l);
            priority -= id + 1 + 1000 * reduce as i64;
        }
    }
    priority
}

/// Schedule the graph under `sink` into a flat list. The sink itself is
/// stripped from the result.
pub fn linearize(g: &mut UOpGraph, sink: UOp, skip_check: bool) -> Result<Vec<UOp>, VerifierError> {
    if g.op(sink) != Opcode::Sink {
        return Err(VerifierError::NotASink(g.op(sink)));
    }
    let info = collect_graph(g, sink);

    // Scope membership drives both the toposort priorities and the end
    // marker insertion.
    let mut scope_children: FxHashMap<UOp, FxHashSet<UOp>> = FxHashMap::default();
    for &p in info.order.iter().rev() {
        if let Some((stop, _)) = g.op(p).scope_end() {
            scope_children.insert(p, scope_members(&info, p, stop, g));
        }
    }
    let mut range_phi: FxHashMap<UOp, Vec<UOp>> = FxHashMap::default();
    for (&r, ss) in &scope_children {
        if g.op(r) == Opcode::Range {
            range_phi.insert(
                r,
                ss.iter()
                    .copied()
                    .filter(|&x| g.op(x) == Opcode::Assign)
                    .collect(),
            );
        }
    }

    let mut in_degree = info.in_degree.clone();
    let mut queue: BinaryHeap<Reverse<(i64, UOp)>> = BinaryHeap::new();
    for &u in &info.order {
        if in_degree[&u] == 0 {
            let p = priority(g, u, &info, &scope_children, &range_phi);
            queue.push(Reverse((p, u)));
        }
    }

    let mut scope_end: FxHashMap<UOp, UOp> = FxHashMap::default();
    let mut scope_end_order: Vec<UOp> = Vec::new();
    let mut uops: Vec<UOp> = Vec::new();
    while let Some(Reverse((p, x))) = queue.pop() {
        trace!("pop {:5} {}", p, g.describe(x));
        if scope_children.contains_key(&x) && !scope_end.contains_key(&x) {
            scope_end.insert(x, x);
            scope_end_order.push(x);
        }
        if g.op(x) == Opcode::DefineAcc {
            // The accumulator is declared just before its first loop.
            let idx = g
                .src(x)
                .iter()
                .filter(|&&l| g.op(l) == Opcode::Range)
                .filter_map(|&l| uops.iter().position(|&v| v == l))
                .min()
                .expect("accumulator ranges are scheduled before it");
            uops.insert(idx, x);
        } else {
            uops.push(x);
        }
        for (&u, ss) in scope_children.iter_mut() {
            if ss.remove(&x) && ss.is_empty() {
                if !scope_end.contains_key(&u) {
                    scope_end_order.push(u);
                }
                scope_end.insert(u, x);
            }
        }
        for &u in &info.children[&x] {
            let d = in_degree.get_mut(&u).expect("child in degree map");
            *d -= 1;
            if *d == 0 {
                let p = priority(g, u, &info, &scope_children, &range_phi);
                queue.push(Reverse((p, u)));
            }
        }
    }

    // Close scopes right after the last node emitted inside each.
    for &u in &scope_end_order {
        let last = scope_end[&u];
        let (_, end_op) = g.op(u).scope_end().expect("scope op");
        let marker = g.intern(end_op, None, &[u], Arg::None);
        let pos = uops
            .iter()
            .position(|&v| v == last)
            .expect("scope-ending node was emitted");
        uops.insert(pos + 1, marker);
    }

    if !skip_check {
        if let Err(e) = check(g, &uops) {
            if !flags().ci {
                for &u in &uops {
                    error!("{}", g.describe(u));
                }
            }
            return Err(e);
        }
    }

    // Strip the sink.
    uops.pop();
    Ok(uops)
}

fn check(g: &UOpGraph, uops: &[UOp]) -> Result<(), VerifierError> {
    for &u in uops {
        if g.op(u).is_high_level() {
            return Err(VerifierError::ResidualOp(g.op(u)));
        }
    }
    type_verify(g, uops)?;
    match uops.last() {
        Some(&last) if g.op(last) == Opcode::Sink => {}
        _ => return Err(VerifierError::MissingSink),
    }
    // Identical stores to a local buffer are allowed; for everything else a
    // repeat means the lowering emitted the same side effect twice.
    let mut seen: Vec<(UOp, UOp, Vec<UOp>)> = Vec::new();
    for &u in uops {
        if g.op(u) != Opcode::Store {
            continue;
        }
        let src = g.src(u);
        if is_local_buf(g, src[0]) {
            continue;
        }
        let key = (src[0], src[1], src[3..].to_vec());
        if seen.contains(&key) {
            return Err(VerifierError::DuplicateStore(g.describe(u)));
        }
        seen.push(key);
    }
    Ok(())
}

/// Lenient local-buffer test: sees through ALU/CAST chains, which can
/// admit false positives but never misses a direct local buffer.
fn is_local_buf(g: &UOpGraph, u: UOp) -> bool {
    g.op(u) == Opcode::DefineLocal
        || (matches!(g.op(u), Opcode::Alu | Opcode::Cast)
            && g.src(u).iter().any(|&x| is_local_buf(g, x)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;
    use crate::ir::ops::BinaryOp;
    use crate::ir::ScalarKind;

    fn ops_of(g: &UOpGraph, uops: &[UOp]) -> Vec<Opcode> {
        uops.iter().map(|&u| g.op(u)).collect()
    }

    #[test]
    fn schedules_sources_first() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.cint(dtypes::I32, 3);
        let val = g.cfloat(dtypes::F32, 1.0);
        let st = g.store(buf, idx, val);
        let sink = g.sink(&[st]);
        let uops = linearize(&mut g, sink, false).unwrap();
        let pos =
            |u: UOp| uops.iter().position(|&v| v == u).expect("node in output");
        assert!(pos(buf) < pos(st) && pos(idx) < pos(st) && pos(val) < pos(st));
        assert!(!uops.iter().any(|&u| g.op(u) == Opcode::Sink));
    }

    #[test]
    fn accumulator_before_range_with_endrange() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 8);
        let rng = g.range(dtypes::I32, zero, n, 0, true);
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let ld = g.load(dtypes::F32, buf, rng);
        let ident = g.cfloat(dtypes::F32, 0.0);
        let acc = g.intern(
            Opcode::DefineAcc,
            Some(dtypes::F32),
            &[ident, rng],
            Arg::Acc(Box::new([0])),
        );
        let step = g.alu2(BinaryOp::Add, acc, ld);
        let assign = g.intern(Opcode::Assign, Some(dtypes::F32), &[acc, step], Arg::None);
        let out_idx = g.cint(dtypes::I32, 0);
        let st = g.store(buf, out_idx, assign);
        let sink = g.sink(&[st]);

        let uops = linearize(&mut g, sink, false).unwrap();
        let pos =
            |u: UOp| uops.iter().position(|&v| v == u).expect("node in output");
        assert!(pos(acc) < pos(rng), "define_acc precedes its range");
        let end = uops
            .iter()
            .position(|&u| g.op(u) == Opcode::EndRange)
            .expect("endrange emitted");
        assert!(pos(assign) < end, "assign is inside the loop scope");
        assert_eq!(g.src(uops[end])[0], rng);
        assert!(pos(st) > end, "store happens after the loop closes");
    }

    #[test]
    fn if_scope_gets_endif() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let lbuf = g.intern(
            Opcode::DefineLocal,
            Some(dtypes::local_ptr(ScalarKind::F32)),
            &[],
            Arg::Buffer(0),
        );
        let idx = g.cint(dtypes::I32, 0);
        let val = g.cfloat(dtypes::F32, 2.0);
        let lstore = g.store(lbuf, idx, val);
        let barrier = g.intern(Opcode::Barrier, None, &[lstore], Arg::None);
        let gv = g.define_var("gv", dtypes::I32, 0, 1);
        let gate = g.cast(gv, dtypes::BOOL);
        let guard = g.intern(Opcode::If, None, &[gate, barrier], Arg::None);
        let ld = g.intern(
            Opcode::Load,
            Some(dtypes::F32),
            &[lbuf, idx, guard],
            Arg::None,
        );
        let st = g.store(buf, idx, ld);
        let sink = g.sink(&[st]);

        let uops = linearize(&mut g, sink, false).unwrap();
        let ops = ops_of(&g, &uops);
        let if_pos = ops.iter().position(|&o| o == Opcode::If).unwrap();
        let endif_pos = ops.iter().position(|&o| o == Opcode::EndIf).unwrap();
        let ld_pos = uops.iter().position(|&u| u == ld).unwrap();
        assert!(if_pos < ld_pos && ld_pos <= endif_pos);
        assert_eq!(g.src(uops[endif_pos])[0], guard);
    }

    #[test]
    fn rejects_residual_high_level_ops() {
        let mut g = UOpGraph::new();
        let x = g.cfloat(dtypes::F32, 1.0);
        let ex = g.intern(
            Opcode::Expand,
            Some(dtypes::F32),
            &[x],
            Arg::axes(&[(0, 2)]),
        );
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.cint(dtypes::I32, 0);
        let st = g.store(buf, idx, ex);
        let sink = g.sink(&[st]);
        match linearize(&mut g, sink, false) {
            Err(VerifierError::ResidualOp(Opcode::Expand)) => {}
            other => panic!("expected residual-op error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_duplicate_global_stores() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.cint(dtypes::I32, 0);
        let v1 = g.cfloat(dtypes::F32, 1.0);
        let v2 = g.cfloat(dtypes::F32, 2.0);
        let s1 = g.store(buf, idx, v1);
        let s2 = g.store(buf, idx, v2);
        let sink = g.sink(&[s1, s2]);
        assert!(matches!(
            linearize(&mut g, sink, false),
            Err(VerifierError::DuplicateStore(_))
        ));
    }

    #[test]
    fn allows_duplicate_local_stores() {
        let mut g = UOpGraph::new();
        let lbuf = g.intern(
            Opcode::DefineLocal,
            Some(dtypes::local_ptr(ScalarKind::F32)),
            &[],
            Arg::Buffer(0),
        );
        let idx = g.cint(dtypes::I32, 0);
        let v1 = g.cfloat(dtypes::F32, 1.0);
        let v2 = g.cfloat(dtypes::F32, 2.0);
        let s1 = g.store(lbuf, idx, v1);
        let s2 = g.store(lbuf, idx, v2);
        let sink = g.sink(&[s1, s2]);
        assert!(linearize(&mut g, sink, false).is_ok());
    }

    #[test]
    fn rejects_non_sink_root() {
        let mut g = UOpGraph::new();
        let x = g.cint(dtypes::I32, 1);
        assert!(matches!(
            linearize(&mut g, x, false),
            Err(VerifierError::NotASink(Opcode::Const))
        ));
    }

    #[test]
    fn every_node_appears_after_its_sources() {
        let mut g = UOpGraph::new();
        let zero = g.cint(dtypes::I32, 0);
        let n = g.cint(dtypes::I32, 4);
        let rng = g.range(dtypes::I32, zero, n, 0, false);
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let ld = g.load(dtypes::F32, buf, rng);
        let two = g.cfloat(dtypes::F32, 2.0);
        let scaled = g.mul(ld, two);
        let st = g.store(buf, rng, scaled);
        let sink = g.sink(&[st]);
        let uops = linearize(&mut g, sink, false).unwrap();
        let pos: FxHashMap<UOp, usize> =
            uops.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        for &u in &uops {
            if matches!(g.op(u), Opcode::EndRange | Opcode::EndIf) {
                continue;
            }
            for &s in g.src(u) {
                assert!(pos[&s] < pos[&u], "{} before {}", g.describe(s), g.describe(u));
            }
        }
    }
}
