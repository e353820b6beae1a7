//! Property tests for the rewriter's core guarantees: hash-cons
//! uniqueness, rewrite idempotence, and interval soundness of folds.

use proptest::prelude::*;

use loomgen::graph_rewrite;
use loomgen::ir::dtypes;
use loomgen::ir::{UOp, UOpGraph};
use loomgen::simplify::constant_folder;

/// One step of a little expression stack machine: combine the current
/// value with either the variable or a constant.
#[derive(Clone, Debug)]
enum Step {
    AddConst(i8),
    AddVar,
    MulConst(i8),
    ModConst(u8),
    DivConst(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<i8>().prop_map(Step::AddConst),
        Just(Step::AddVar),
        (-4i8..=4).prop_map(Step::MulConst),
        (1u8..=16).prop_map(Step::ModConst),
        (1u8..=16).prop_map(Step::DivConst),
    ]
}

fn build(g: &mut UOpGraph, steps: &[Step]) -> UOp {
    let x = g.define_var("x", dtypes::I32, 0, 100);
    let mut acc = x;
    for s in steps {
        acc = match s {
            Step::AddConst(c) => {
                let k = g.cint(dtypes::I32, *c as i64);
                g.add(acc, k)
            }
            Step::AddVar => g.add(acc, x),
            Step::MulConst(c) => {
                let k = g.cint(dtypes::I32, *c as i64);
                g.mul(acc, k)
            }
            Step::ModConst(c) => {
                let k = g.cint(dtypes::I32, *c as i64);
                g.rem(acc, k)
            }
            Step::DivConst(c) => {
                let k = g.cint(dtypes::I32, *c as i64);
                g.idiv(acc, k)
            }
        };
    }
    acc
}

proptest! {
    #[test]
    fn hash_consing_is_stable(steps in prop::collection::vec(step_strategy(), 0..12)) {
        let mut g = UOpGraph::new();
        let a = build(&mut g, &steps);
        let b = build(&mut g, &steps);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn rewrite_is_idempotent(steps in prop::collection::vec(step_strategy(), 0..10)) {
        let mut g = UOpGraph::new();
        let expr = build(&mut g, &steps);
        let pm = constant_folder();
        let once = graph_rewrite(&mut g, expr, &pm);
        let twice = graph_rewrite(&mut g, once, &pm);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn folded_constants_respect_intervals(steps in prop::collection::vec(step_strategy(), 1..10)) {
        let mut g = UOpGraph::new();
        let expr = build(&mut g, &steps);
        let (vmin, vmax) = (g.vmin(expr), g.vmax(expr));
        let pm = constant_folder();
        let out = graph_rewrite(&mut g, expr, &pm);
        if let Some(v) = g.const_value(out) {
            let v = v.as_i64();
            prop_assert!(vmin <= v && v <= vmax, "folded {} outside [{}, {}]", v, vmin, vmax);
        }
    }
}
