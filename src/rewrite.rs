//! Bottom-up fixpoint graph rewriting.
//!
//! Children are rewritten before their parents; when a rule fires, its
//! replacement is itself rewritten before being returned. Results are
//! memoized by node identity (the intern table makes structural equality
//! identity), so shared subgraphs are processed once and a declined node
//! is never revisited.
//!
//! Termination is a property of the rule sets: every rule strictly reduces
//! under a size-plus-normal-form ordering, and rules that could reproduce
//! their own output guard against it.

use crate::fx::FxHashMap;
use crate::ir::{UOp, UOpGraph};
use crate::pattern::PatternMatcher;

/// Rewrite the graph under `root` to a fixpoint of `pm`, returning the
/// replacement root.
pub fn graph_rewrite(g: &mut UOpGraph, root: UOp, pm: &PatternMatcher) -> UOp {
    let mut memo: FxHashMap<UOp, UOp> = FxHashMap::default();
    rewrite_node(g, pm, root, &mut memo)
}

fn rewrite_node(g: &mut UOpGraph, pm: &PatternMatcher, u: UOp, memo: &mut FxHashMap<UOp, UOp>) -> UOp {
    if let Some(&r) = memo.get(&u) {
        return r;
    }
    // Children first. Re-interning with rewritten children either returns
    // `u` itself or the canonical node for the new shape.
    let src = g.src_vec(u);
    let new_src: crate::ir::SrcList = src.iter().map(|&s| rewrite_node(g, pm, s, memo)).collect();
    let node = if new_src == src {
        u
    } else {
        let (op, dtype, arg) = {
            let d = g.data(u);
            (d.op, d.dtype, d.arg.clone())
        };
        g.intern(op, dtype, &new_src, arg)
    };
    let result = match memo.get(&node) {
        Some(&r) => r,
        None => match pm.rewrite(g, node) {
            Some(next) => rewrite_node(g, pm, next, memo),
            None => node,
        },
    };
    memo.insert(u, result);
    memo.insert(node, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;
    use crate::pattern::{Pat, RewriteFn};

    #[test]
    fn rewrites_bottom_up() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 10);
        let zero = g.cint(dtypes::I32, 0);
        let inner = g.add(x, zero);
        let outer = g.add(inner, zero);

        let pm = PatternMatcher::new(vec![(
            Pat::var("x").add(Pat::cint(0)),
            (|_g, b| Some(b.node("x"))) as RewriteFn,
        )]);
        // Both layers of x+0 collapse in one pass.
        assert_eq!(graph_rewrite(&mut g, outer, &pm), x);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let mut g = UOpGraph::new();
        let x = g.define_var("x", dtypes::I32, 0, 10);
        let one = g.cint(dtypes::I32, 1);
        let zero = g.cint(dtypes::I32, 0);
        let t = g.mul(x, one);
        let t = g.add(t, zero);

        let pm = PatternMatcher::new(vec![
            (
                Pat::var("x").add(Pat::cint(0)),
                (|_g, b| Some(b.node("x"))) as RewriteFn,
            ),
            (
                Pat::var("x").mul(Pat::cint(1)),
                (|_g, b| Some(b.node("x"))) as RewriteFn,
            ),
        ]);
        let once = graph_rewrite(&mut g, t, &pm);
        let twice = graph_rewrite(&mut g, once, &pm);
        assert_eq!(once, x);
        assert_eq!(once, twice);
    }
}
