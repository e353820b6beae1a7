//! Well-formedness checks for linearized micro-op lists.
//!
//! All of these are programmer errors in the upstream lowering or in the
//! rewrite rules, surfaced after linearization rather than at node
//! construction so that the rewriter never has to deal with partially
//! typed graphs.

use core::fmt;

use crate::ir::dtypes::{DType, ScalarKind};
use crate::ir::ops::{Arg, BinaryOp, Opcode, TernaryOp};
use crate::ir::{UOp, UOpGraph};

/// A failed sanity check.
#[derive(Debug)]
pub enum VerifierError {
    /// The rewriter was handed something other than a sink.
    NotASink(Opcode),
    /// A high-level op survived lowering.
    ResidualOp(Opcode),
    /// The linearized list does not end in the sink.
    MissingSink,
    /// Two non-local stores target the same `(buf, index, gate)`.
    DuplicateStore(String),
    /// A node fails its opcode's typing contract.
    Type {
        /// Rendering of the offending node.
        node: String,
        /// What was violated.
        message: String,
    },
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifierError::NotASink(op) => write!(f, "root is {}, not a sink", op),
            VerifierError::ResidualOp(op) => {
                write!(f, "high-level op {} survived lowering", op)
            }
            VerifierError::MissingSink => write!(f, "linearized list does not end in a sink"),
            VerifierError::DuplicateStore(node) => {
                write!(f, "repeated store to the same target: {}", node)
            }
            VerifierError::Type { node, message } => write!(f, "{}: {}", node, message),
        }
    }
}

impl std::error::Error for VerifierError {}

fn type_err(g: &UOpGraph, u: UOp, message: impl Into<String>) -> VerifierError {
    VerifierError::Type {
        node: g.describe(u),
        message: message.into(),
    }
}

fn is_bool(dt: Option<DType>) -> bool {
    dt.map(|d| d.scalar() == ScalarKind::Bool).unwrap_or(false)
}

/// Check the typing contract of every node in `uops`.
pub fn type_verify(g: &UOpGraph, uops: &[UOp]) -> Result<(), VerifierError> {
    for &u in uops {
        let d = g.data(u);
        let src = &d.src;
        match d.op {
            Opcode::Const => {
                match (&d.arg, d.dtype) {
                    (Arg::Const(_), Some(_)) => {}
                    (Arg::ConstVec(vals), Some(dt)) if vals.len() == dt.count() => {}
                    _ => return Err(type_err(g, u, "constant payload/dtype mismatch")),
                }
            }
            Opcode::DefineVar => {
                if !matches!(d.arg, Arg::Var { .. }) || d.dtype.is_none() {
                    return Err(type_err(g, u, "define_var needs bounds and a dtype"));
                }
            }
            Opcode::DefineGlobal | Opcode::DefineLocal => {
                if !d.dtype.map(|dt| dt.is_buffer()).unwrap_or(false) {
                    return Err(type_err(g, u, "buffer definition needs a pointer dtype"));
                }
            }
            Opcode::DefineAcc => {
                let dt = d.dtype.ok_or_else(|| type_err(g, u, "accumulator needs a dtype"))?;
                if src.is_empty() || g.dtype(src[0]) != Some(dt) {
                    return Err(type_err(g, u, "accumulator identity dtype mismatch"));
                }
                if src[1..].iter().any(|&r| g.op(r) != Opcode::Range) {
                    return Err(type_err(g, u, "accumulator sources must be ranges"));
                }
            }
            Opcode::Range => {
                if src.len() != 2 || !matches!(d.arg, Arg::Range { .. }) {
                    return Err(type_err(g, u, "range needs (start, end) and an id"));
                }
                if !d.dtype.map(|dt| dt.is_int()).unwrap_or(false) {
                    return Err(type_err(g, u, "range dtype must be integer"));
                }
            }
            Opcode::Special => {
                if !d.dtype.map(|dt| dt.is_int()).unwrap_or(false) {
                    return Err(type_err(g, u, "special index dtype must be integer"));
                }
            }
            Opcode::Alu => match &d.arg {
                Arg::Unary(_) => {
                    if src.len() != 1 {
                        return Err(type_err(g, u, "unary alu arity"));
                    }
                }
                Arg::Binary(op) => {
                    if src.len() != 2 {
                        return Err(type_err(g, u, "binary alu arity"));
                    }
                    if matches!(op, BinaryOp::CmpLt | BinaryOp::CmpNe) && !is_bool(d.dtype) {
                        return Err(type_err(g, u, "comparison result must be bool"));
                    }
                }
                Arg::Ternary(op) => {
                    if src.len() != 3 {
                        return Err(type_err(g, u, "ternary alu arity"));
                    }
                    if *op == TernaryOp::Where && !is_bool(g.dtype(src[0])) {
                        return Err(type_err(g, u, "where gate must be bool"));
                    }
                }
                _ => return Err(type_err(g, u, "alu needs an operator tag")),
            },
            Opcode::Cast => {
                let dt = d.dtype.ok_or_else(|| type_err(g, u, "cast needs a dtype"))?;
                if src.len() != 1 {
                    return Err(type_err(g, u, "cast arity"));
                }
                // Scalars may broadcast; otherwise lanes must agree.
                match g.dtype(src[0]).map(|s| s.count()) {
                    Some(c) if c == dt.count() || c == 1 => {}
                    _ => return Err(type_err(g, u, "cast must preserve lane count")),
                }
            }
            Opcode::Bitcast => {
                let dt = d.dtype.ok_or_else(|| type_err(g, u, "bitcast needs a dtype"))?;
                if src.len() != 1 || g.dtype(src[0]).map(|s| s.bytes()) != Some(dt.bytes()) {
                    return Err(type_err(g, u, "bitcast must preserve width"));
                }
            }
            Opcode::Load => {
                if d.dtype.is_none() || src.len() < 2 || src.len() > 5 {
                    return Err(type_err(g, u, "load shape"));
                }
                if src.len() == 3 && !matches!(g.op(src[2]), Opcode::Barrier | Opcode::If) {
                    return Err(type_err(g, u, "three-source load takes a barrier"));
                }
                if src.len() >= 4 && !is_bool(g.dtype(src[3])) {
                    return Err(type_err(g, u, "load gate must be bool"));
                }
            }
            Opcode::Store => {
                if d.dtype.is_some() || src.len() < 3 || src.len() > 4 {
                    return Err(type_err(g, u, "store shape"));
                }
                if src.len() == 4 && !is_bool(g.dtype(src[3])) {
                    return Err(type_err(g, u, "store gate must be bool"));
                }
            }
            Opcode::Assign => {
                if src.len() != 2 || d.dtype.is_none() {
                    return Err(type_err(g, u, "assign shape"));
                }
            }
            Opcode::Gep => {
                if src.len() != 1 || d.dtype.is_none() {
                    return Err(type_err(g, u, "gep shape"));
                }
            }
            Opcode::Vectorize => {
                let dt = d.dtype.ok_or_else(|| type_err(g, u, "vectorize needs a dtype"))?;
                if dt.count() != src.len() {
                    return Err(type_err(g, u, "vectorize lane count mismatch"));
                }
            }
            Opcode::Wmma => {
                if src.len() != 3 {
                    return Err(type_err(g, u, "wmma arity"));
                }
            }
            Opcode::If => {
                if src.is_empty() || !is_bool(g.dtype(src[0])) {
                    return Err(type_err(g, u, "if gate must be bool"));
                }
            }
            Opcode::EndRange => {
                if src.len() != 1 || g.op(src[0]) != Opcode::Range {
                    return Err(type_err(g, u, "endrange must close a range"));
                }
            }
            Opcode::EndIf => {
                if src.len() != 1 || g.op(src[0]) != Opcode::If {
                    return Err(type_err(g, u, "endif must close an if"));
                }
            }
            Opcode::Barrier | Opcode::Sink | Opcode::Noop => {
                if d.dtype.is_some() {
                    return Err(type_err(g, u, "side-effect op carries no dtype"));
                }
            }
            Opcode::Expand
            | Opcode::Contract
            | Opcode::Reduce
            | Opcode::ReduceAxis
            | Opcode::View => {
                // Checked separately as residual high-level ops.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;

    #[test]
    fn accepts_simple_program() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.cint(dtypes::I32, 0);
        let val = g.cfloat(dtypes::F32, 1.0);
        let st = g.store(buf, idx, val);
        let sink = g.sink(&[st]);
        assert!(type_verify(&g, &[buf, idx, val, st, sink]).is_ok());
    }

    #[test]
    fn rejects_bad_gate() {
        let mut g = UOpGraph::new();
        let buf = g.define_global(0, dtypes::ptr(ScalarKind::F32));
        let idx = g.cint(dtypes::I32, 0);
        let val = g.cfloat(dtypes::F32, 1.0);
        let gate = g.cint(dtypes::I32, 1);
        let st = g.intern(
            Opcode::Store,
            None,
            &[buf, idx, val, gate],
            Arg::None,
        );
        assert!(type_verify(&g, &[st]).is_err());
    }

    #[test]
    fn rejects_vectorize_mismatch() {
        let mut g = UOpGraph::new();
        let a = g.cfloat(dtypes::F32, 1.0);
        let v = g.intern(
            Opcode::Vectorize,
            Some(dtypes::F32.vec(4)),
            &[a, a],
            Arg::None,
        );
        assert!(type_verify(&g, &[v]).is_err());
    }
}
