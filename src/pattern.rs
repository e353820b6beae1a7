//! Declarative rewrite templates.
//!
//! A [`Pat`] describes the shape of a subgraph: an opcode set, a dtype set,
//! a payload constraint, a source template, and an optional name that binds
//! the matched node for the rule callback. Patterns are plain data; the
//! rule sets stay auditable as tables of (template, action) pairs.
//!
//! Source templates come in three forms: `Seq` matches positionally,
//! `Permute` matches in any order (used for commutative operators), and
//! `All` requires every source to match one template (used for "a sink of
//! stores"-style rules). Binding the same name twice requires the identical
//! node, which is how `store(buf, i, load(buf, i))` templates enforce that
//! both sides refer to one buffer.

use smallvec::SmallVec;

use crate::fx::FxHashMap;
use crate::ir::dtypes::DType;
use crate::ir::ops::{Arg, BinaryOp, Opcode, TernaryOp, UnaryOp};
use crate::ir::{UOp, UOpGraph};

/// Payload constraint of a pattern.
#[derive(Clone, Debug)]
pub enum ArgPat {
    /// The node payload must equal this exactly.
    Exact(Arg),
    /// The node must be a constant numerically equal to this integer
    /// (across kinds: `0` matches `Int(0)`, `F32(0.0)` and `false`).
    Num(i64),
}

/// Source template of a pattern.
#[derive(Clone, Debug)]
pub enum SrcPat {
    /// Positional match.
    Seq(Vec<Pat>),
    /// Match under some permutation of the templates.
    Permute(Vec<Pat>),
    /// Every source must match this one template.
    All(Box<Pat>),
}

/// A node template.
#[derive(Clone, Debug, Default)]
pub struct Pat {
    ops: Option<SmallVec<[Opcode; 2]>>,
    dtypes: Option<SmallVec<[DType; 4]>>,
    arg: Option<ArgPat>,
    src: Option<SrcPat>,
    name: Option<&'static str>,
    any_len: bool,
}

/// Name captures of a successful match.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    names: SmallVec<[(&'static str, UOp); 4]>,
}

impl Bindings {
    /// Look up a capture.
    pub fn get(&self, name: &str) -> Option<UOp> {
        self.names
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, u)| *u)
    }

    /// Look up a capture the pattern is known to bind.
    pub fn node(&self, name: &str) -> UOp {
        self.get(name).expect("pattern binds name")
    }

    fn bind(&mut self, name: &'static str, u: UOp) -> bool {
        match self.get(name) {
            Some(prev) => prev == u,
            None => {
                self.names.push((name, u));
                true
            }
        }
    }
}

impl Pat {
    /// Match any node of opcode `op`.
    pub fn op(op: Opcode) -> Pat {
        Pat {
            ops: Some(SmallVec::from_slice(&[op])),
            ..Pat::default()
        }
    }

    /// Match any node whose opcode is in `ops`.
    pub fn ops(ops: &[Opcode]) -> Pat {
        Pat {
            ops: Some(SmallVec::from_slice(ops)),
            ..Pat::default()
        }
    }

    /// Match anything, binding it as `name`.
    pub fn var(name: &'static str) -> Pat {
        Pat {
            name: Some(name),
            ..Pat::default()
        }
    }

    /// Match anything without binding.
    pub fn any() -> Pat {
        Pat::default()
    }

    /// Match any constant, binding it as `name`.
    pub fn cvar(name: &'static str) -> Pat {
        Pat::op(Opcode::Const).named(name)
    }

    /// Match any constant without binding.
    pub fn cany() -> Pat {
        Pat::op(Opcode::Const)
    }

    /// Match a constant numerically equal to `v`.
    pub fn cint(v: i64) -> Pat {
        Pat::op(Opcode::Const).arg_num(v)
    }

    /// Match a boolean constant.
    pub fn cbool(v: bool) -> Pat {
        Pat::op(Opcode::Const).arg_num(v as i64)
    }

    /// Bind the matched node as `name`.
    pub fn named(mut self, name: &'static str) -> Pat {
        self.name = Some(name);
        self
    }

    /// Constrain the dtype to exactly `dt`.
    pub fn dtype(mut self, dt: DType) -> Pat {
        self.dtypes = Some(SmallVec::from_slice(&[dt]));
        self
    }

    /// Constrain the dtype to one of `dts`.
    pub fn dtype_in(mut self, dts: &[DType]) -> Pat {
        self.dtypes = Some(SmallVec::from_slice(dts));
        self
    }

    /// Constrain the payload to exactly `arg`.
    pub fn arg(mut self, arg: Arg) -> Pat {
        self.arg = Some(ArgPat::Exact(arg));
        self
    }

    /// Constrain the payload to a constant numerically equal to `v`.
    pub fn arg_num(mut self, v: i64) -> Pat {
        self.arg = Some(ArgPat::Num(v));
        self
    }

    /// Positional source template.
    pub fn seq<I: IntoIterator<Item = Pat>>(mut self, pats: I) -> Pat {
        self.src = Some(SrcPat::Seq(pats.into_iter().collect()));
        self
    }

    /// Order-insensitive source template.
    pub fn permute<I: IntoIterator<Item = Pat>>(mut self, pats: I) -> Pat {
        self.src = Some(SrcPat::Permute(pats.into_iter().collect()));
        self
    }

    /// Every source must match `pat`.
    pub fn each(mut self, pat: Pat) -> Pat {
        self.src = Some(SrcPat::All(Box::new(pat)));
        self
    }

    /// Allow the node to have more sources than the template names.
    pub fn any_len(mut self) -> Pat {
        self.any_len = true;
        self
    }

    // Sugar for ALU shapes, mirroring the graph builder methods.

    fn alu2(op: BinaryOp, a: Pat, b: Pat) -> Pat {
        Pat::op(Opcode::Alu).arg(Arg::Binary(op)).seq([a, b])
    }

    pub fn add(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Add, self, rhs)
    }

    pub fn mul(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Mul, self, rhs)
    }

    pub fn idiv(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Idiv, self, rhs)
    }

    pub fn fdiv(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Div, self, rhs)
    }

    pub fn rem(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Mod, self, rhs)
    }

    pub fn band(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::And, self, rhs)
    }

    pub fn bor(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Or, self, rhs)
    }

    pub fn max_(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::Max, self, rhs)
    }

    pub fn lt(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::CmpLt, self, rhs)
    }

    pub fn ne(self, rhs: Pat) -> Pat {
        Pat::alu2(BinaryOp::CmpNe, self, rhs)
    }

    pub fn neg(self) -> Pat {
        Pat::op(Opcode::Alu).arg(Arg::Unary(UnaryOp::Neg)).seq([self])
    }

    /// `self.where(t, f)`, with self as the gate.
    pub fn where_(self, t: Pat, f: Pat) -> Pat {
        Pat::op(Opcode::Alu)
            .arg(Arg::Ternary(TernaryOp::Where))
            .seq([self, t, f])
    }

    /// Lane extraction with a fixed single-lane index.
    pub fn gep(self, lane: u32) -> Pat {
        Pat::op(Opcode::Gep).arg(Arg::Lane(lane)).seq([self])
    }

    /// A load with the given source templates.
    pub fn load<I: IntoIterator<Item = Pat>>(srcs: I) -> Pat {
        Pat::op(Opcode::Load).seq(srcs)
    }

    /// A store with the given source templates.
    pub fn store<I: IntoIterator<Item = Pat>>(srcs: I) -> Pat {
        Pat::op(Opcode::Store).seq(srcs)
    }

    /// The opcodes this pattern can possibly match, for rule indexing.
    fn root_ops(&self) -> Option<&[Opcode]> {
        self.ops.as_deref()
    }
}

/// Match `pat` against `u`, extending `b` with captures. On failure the
/// bindings may hold partial captures; callers discard them.
pub fn pat_match(g: &UOpGraph, pat: &Pat, u: UOp, b: &mut Bindings) -> bool {
    if let Some(ops) = &pat.ops {
        if !ops.contains(&g.op(u)) {
            return false;
        }
    }
    if let Some(dts) = &pat.dtypes {
        match g.dtype(u) {
            Some(dt) if dts.contains(&dt) => {}
            _ => return false,
        }
    }
    if let Some(ap) = &pat.arg {
        let ok = match ap {
            ArgPat::Exact(a) => g.arg(u) == a,
            ArgPat::Num(v) => matches!(g.arg(u), Arg::Const(cv) if cv.equals_int(*v)),
        };
        if !ok {
            return false;
        }
    }
    if let Some(name) = pat.name {
        if !b.bind(name, u) {
            return false;
        }
    }
    match &pat.src {
        None => true,
        Some(SrcPat::Seq(pats)) => {
            let src = g.src(u);
            let len_ok = if pat.any_len {
                src.len() >= pats.len()
            } else {
                src.len() == pats.len()
            };
            len_ok
                && pats
                    .iter()
                    .zip(src.iter())
                    .all(|(p, &s)| pat_match(g, p, s, b))
        }
        Some(SrcPat::All(p)) => {
            let src = g.src_vec(u);
            !src.is_empty() && src.iter().all(|&s| pat_match(g, p, s, b))
        }
        Some(SrcPat::Permute(pats)) => {
            let src = g.src(u);
            if src.len() != pats.len() {
                return false;
            }
            let mut order: Vec<usize> = (0..pats.len()).collect();
            permute_match(g, pats, src, &mut order, 0, b)
        }
    }
}

fn permute_match(
    g: &UOpGraph,
    pats: &[Pat],
    src: &[UOp],
    order: &mut Vec<usize>,
    depth: usize,
    b: &mut Bindings,
) -> bool {
    if depth == pats.len() {
        let mut trial = b.clone();
        if pats
            .iter()
            .enumerate()
            .all(|(i, p)| pat_match(g, p, src[order[i]], &mut trial))
        {
            *b = trial;
            return true;
        }
        return false;
    }
    for i in depth..order.len() {
        order.swap(depth, i);
        if permute_match(g, pats, src, order, depth + 1, b) {
            return true;
        }
        order.swap(depth, i);
    }
    false
}

/// A rewrite action: build a replacement for the bound nodes, or decline
/// with `None`.
pub type RewriteFn = fn(&mut UOpGraph, &Bindings) -> Option<UOp>;

/// An ordered list of (pattern, action) rules with an opcode index for
/// early rejection. The first rule whose pattern matches and whose action
/// returns a node wins.
pub struct PatternMatcher {
    rules: Vec<(Pat, RewriteFn)>,
    index: FxHashMap<Opcode, Vec<u32>>,
}

impl PatternMatcher {
    /// Build a matcher from an ordered rule list.
    pub fn new(rules: Vec<(Pat, RewriteFn)>) -> Self {
        let mut index: FxHashMap<Opcode, Vec<u32>> = FxHashMap::default();
        for (i, (pat, _)) in rules.iter().enumerate() {
            match pat.root_ops() {
                Some(ops) => {
                    for &op in ops {
                        index.entry(op).or_default().push(i as u32);
                    }
                }
                None => {
                    // No opcode constraint: the rule applies everywhere.
                    for op in ALL_OPCODES {
                        index.entry(op).or_default().push(i as u32);
                    }
                }
            }
        }
        Self { rules, index }
    }

    /// Concatenate matchers, preserving rule order.
    pub fn concat(parts: &[&PatternMatcher]) -> PatternMatcher {
        let mut rules = Vec::new();
        for pm in parts {
            rules.extend(pm.rules.iter().cloned());
        }
        PatternMatcher::new(rules)
    }

    /// Apply the first matching rule to `u`, if any.
    pub fn rewrite(&self, g: &mut UOpGraph, u: UOp) -> Option<UOp> {
        let op = g.op(u);
        let candidates = self.index.get(&op)?;
        for &i in candidates {
            let (pat, action) = &self.rules[i as usize];
            let mut b = Bindings::default();
            if pat_match(g, pat, u, &mut b) {
                if let Some(replacement) = action(g, &b) {
                    return Some(replacement);
                }
            }
        }
        None
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

const ALL_OPCODES: [Opcode; 27] = [
    Opcode::Const,
    Opcode::DefineGlobal,
    Opcode::DefineVar,
    Opcode::DefineAcc,
    Opcode::DefineLocal,
    Opcode::Special,
    Opcode::Range,
    Opcode::Load,
    Opcode::Store,
    Opcode::Alu,
    Opcode::Cast,
    Opcode::Bitcast,
    Opcode::Gep,
    Opcode::Vectorize,
    Opcode::Expand,
    Opcode::Contract,
    Opcode::Reduce,
    Opcode::ReduceAxis,
    Opcode::Wmma,
    Opcode::Assign,
    Opcode::If,
    Opcode::Barrier,
    Opcode::EndRange,
    Opcode::EndIf,
    Opcode::View,
    Opcode::Sink,
    Opcode::Noop,
];
