//! The per-kernel compilation driver.
//!
//! Sequences the rewrite passes over a sink and hands the result to the
//! linearizer. The pass order matters: algebraic folding first (so the
//! expander sees canonical shapes), index-width canonicalization, then
//! expansion and reduction lowering with the folder still mixed in, and
//! finally any backend-specific cleanup.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use log::debug;

use crate::expand::{expander, float4_folding};
use crate::ir::dtypes::{self, ScalarKind};
use crate::ir::ops::Opcode;
use crate::ir::{UOp, UOpGraph};
use crate::isa::Backend;
use crate::linearize::linearize;
use crate::pattern::{Pat, PatternMatcher, RewriteFn};
use crate::reduce::reducer;
use crate::rewrite::graph_rewrite;
use crate::settings::flags;
use crate::simplify::constant_folder;
use crate::transcendental::transcendental_folding;
use crate::verifier::VerifierError;

/// Counts linearizations process-wide; only used to aim the
/// `DEBUG_EXPAND` skip at a particular kernel.
static LINEARIZE_CNT: AtomicI64 = AtomicI64::new(0);

fn folder() -> &'static PatternMatcher {
    static FOLDER: OnceLock<PatternMatcher> = OnceLock::new();
    FOLDER.get_or_init(constant_folder)
}

fn expander_rules() -> &'static PatternMatcher {
    static EXPANDER: OnceLock<PatternMatcher> = OnceLock::new();
    EXPANDER.get_or_init(expander)
}

fn reducer_rules() -> &'static PatternMatcher {
    static REDUCER: OnceLock<PatternMatcher> = OnceLock::new();
    REDUCER.get_or_init(reducer)
}

fn float4_rules() -> &'static PatternMatcher {
    static FLOAT4: OnceLock<PatternMatcher> = OnceLock::new();
    FLOAT4.get_or_init(float4_folding)
}

/// Rewrite width-free index arithmetic to i32 before expansion.
fn index_canonicalizer() -> &'static PatternMatcher {
    static CANON: OnceLock<PatternMatcher> = OnceLock::new();
    CANON.get_or_init(|| {
        let rules: Vec<(Pat, RewriteFn)> = vec![(
            Pat::ops(&[
                Opcode::Const,
                Opcode::Alu,
                Opcode::Special,
                Opcode::Range,
                Opcode::Expand,
                Opcode::Vectorize,
            ])
            .named("x"),
            |g, b| {
                let x = b.node("x");
                let dt = g.dtype(x)?;
                if dt.scalar() != ScalarKind::Index {
                    return None;
                }
                let src = g.src_vec(x);
                let (op, arg) = (g.op(x), g.arg(x).clone());
                Some(g.intern(op, Some(dtypes::I32.vec(dt.count())), &src, arg))
            },
        )];
        PatternMatcher::new(rules)
    })
}

/// Run the full mid-end rewrite pipeline over `sink`, returning the
/// rewritten sink.
pub fn full_graph_rewrite(
    g: &mut UOpGraph,
    sink: UOp,
    backend: Option<&dyn Backend>,
) -> Result<UOp, VerifierError> {
    if g.op(sink) != Opcode::Sink {
        return Err(VerifierError::NotASink(g.op(sink)));
    }
    // With no backend (or when forced), every transcendental expands.
    let native = match backend {
        Some(be) if flags().transcendental < 2 => be.native_transcendentals().to_vec(),
        _ => Vec::new(),
    };
    let transcendental = transcendental_folding(&native);
    let folded = PatternMatcher::concat(&[folder(), &transcendental]);

    g.acc_counter = 0;
    let mut sink = graph_rewrite(g, sink, &folded);
    sink = graph_rewrite(g, sink, index_canonicalizer());

    let cnt = LINEARIZE_CNT.fetch_add(1, Ordering::Relaxed) + 1;
    let de = flags().debug_expand;
    if cnt != de && de != -1 {
        let use_float4 = backend.map(|b| b.supports_float4()).unwrap_or(false);
        let expansion = if use_float4 {
            PatternMatcher::concat(&[&folded, expander_rules(), float4_rules()])
        } else {
            PatternMatcher::concat(&[&folded, expander_rules()])
        };
        sink = graph_rewrite(g, sink, &expansion);
        if flags().do_reduce {
            let reduction = PatternMatcher::concat(&[&folded, reducer_rules()]);
            sink = graph_rewrite(g, sink, &reduction);
        }
    } else {
        debug!("skipping expansion for linearization {}", cnt);
    }

    if let Some(be) = backend {
        if let Some(extra) = be.extra_matcher() {
            let pm = PatternMatcher::concat(&[&folded, extra]);
            sink = graph_rewrite(g, sink, &pm);
        }
    }
    Ok(sink)
}

/// Owns the per-kernel graph and drives rewrite plus linearization.
pub struct Context {
    /// The kernel's node store.
    pub graph: UOpGraph,
}

impl Context {
    /// A fresh compilation context.
    pub fn new() -> Self {
        Self {
            graph: UOpGraph::new(),
        }
    }

    /// Rewrite and linearize `sink` for `backend`.
    pub fn compile(
        &mut self,
        sink: UOp,
        backend: Option<&dyn Backend>,
    ) -> Result<Vec<UOp>, VerifierError> {
        let sink = full_graph_rewrite(&mut self.graph, sink, backend)?;
        linearize(&mut self.graph, sink, false)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{Arg, BinaryOp};

    #[test]
    fn index_kind_becomes_i32() {
        let mut g = UOpGraph::new();
        let a = g.cint(dtypes::INDEX, 5);
        let x = g.define_var("x", dtypes::I32, 0, 10);
        let xi = g.cast(x, dtypes::INDEX);
        let s = g.add(xi, a);
        let out = graph_rewrite(&mut g, s, index_canonicalizer());
        assert_eq!(g.dtype(out), Some(dtypes::I32));
        // The cast is left to the folder; the arithmetic is retyped.
        assert_eq!(g.arg(out), &Arg::Binary(BinaryOp::Add));
        assert_eq!(g.dtype(g.src(out)[1]), Some(dtypes::I32));
    }

    #[test]
    fn full_rewrite_requires_a_sink() {
        let mut g = UOpGraph::new();
        let x = g.cint(dtypes::I32, 1);
        assert!(full_graph_rewrite(&mut g, x, None).is_err());
    }
}
