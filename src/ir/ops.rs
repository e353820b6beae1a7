//! Opcodes and per-node payloads.
//!
//! The micro-op vocabulary is a closed set: a handful of leaves
//! (constants, buffer/variable/accumulator definitions, loop ranges),
//! memory ops, the ALU, vector lane shuffling, the high-level axis ops
//! (`Expand`/`Contract`/`Reduce`) that lowering removes, and the scope
//! markers the linearizer inserts.

use core::fmt;

use crate::ir::dtypes::{DType, ScalarKind};
use crate::ir::immediates::{ConstValue, Ieee32, Ieee64};

/// A micro-op opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum Opcode {
    /// Scalar (or per-lane) constant; payload in `Arg::Const`/`Arg::ConstVec`.
    Const,
    /// Kernel argument buffer.
    DefineGlobal,
    /// Bounded symbolic integer variable.
    DefineVar,
    /// Reduction accumulator; sources are the identity constant and the
    /// enclosing ranges.
    DefineAcc,
    /// Workgroup-local buffer.
    DefineLocal,
    /// Grid/workgroup index (gidx/lidx).
    Special,
    /// Loop induction variable over `[start, end)`.
    Range,
    /// Memory load: `(buf, index[, alt, gate][, barrier])`.
    Load,
    /// Memory store: `(buf, index, value[, gate])`.
    Store,
    /// Arithmetic/logic; the operator tag lives in `Arg`.
    Alu,
    /// Value conversion.
    Cast,
    /// Bit reinterpretation.
    Bitcast,
    /// Lane extraction from a vector.
    Gep,
    /// Pack scalars into a vector.
    Vectorize,
    /// A value replicated over a product of named axes.
    Expand,
    /// Select a sub-product of expand axes into a vector.
    Contract,
    /// Reduction of a body over `Range` sources.
    Reduce,
    /// Upstream axis-level reduction; must not survive lowering.
    ReduceAxis,
    /// Tensor-core matrix multiply-accumulate.
    Wmma,
    /// Accumulator update step.
    Assign,
    /// Conditional scope guarding side effects.
    If,
    /// Memory barrier.
    Barrier,
    /// Loop end marker.
    EndRange,
    /// Conditional end marker.
    EndIf,
    /// Residual movement-op view; must not survive lowering.
    View,
    /// Kernel root collecting all side effects.
    Sink,
    /// Nothing; stripped from sinks.
    Noop,
}

impl Opcode {
    /// For scope-opening ops: the opcode at which the scope's child
    /// traversal stops, and the end marker the linearizer inserts.
    pub fn scope_end(self) -> Option<(Opcode, Opcode)> {
        match self {
            Opcode::Range => Some((Opcode::Assign, Opcode::EndRange)),
            Opcode::If => Some((Opcode::Store, Opcode::EndIf)),
            _ => None,
        }
    }

    /// High-level ops that lowering must eliminate before linearization.
    pub fn is_high_level(self) -> bool {
        matches!(
            self,
            Opcode::Expand
                | Opcode::Contract
                | Opcode::Reduce
                | Opcode::ReduceAxis
                | Opcode::View
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Unary ALU operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum UnaryOp {
    /// Arithmetic negation; logical not on bools.
    Neg,
    Exp2,
    Log2,
    Sin,
    Sqrt,
}

/// Binary ALU operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum BinaryOp {
    Add,
    Mul,
    /// Float division.
    Div,
    /// Integer division, truncating toward zero.
    Idiv,
    /// Remainder with the dividend's sign.
    Mod,
    Max,
    CmpLt,
    CmpNe,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Counter-mode PRNG mix of `(x, seed)`; lowered before codegen.
    Threefry,
}

/// Ternary ALU operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum TernaryOp {
    /// `gate ? a : b`.
    Where,
    /// `a * b + c`.
    MulAcc,
}

/// The WMMA instruction descriptor: which axes are upcast into the
/// per-thread fragments and which are the reduction axes.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct WmmaSpec {
    /// Target-specific instruction name.
    pub name: Box<str>,
    /// Per-operand upcast axis lists as `(axis, extent)` pairs.
    pub upcast_axes: Box<[Box<[(u32, u32)]>]>,
    /// Axis ids reduced inside the instruction.
    pub reduce_axes: Box<[u32]>,
}

/// Opcode-specific payload of a node.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Arg {
    /// No payload.
    None,
    /// `Const` value.
    Const(ConstValue),
    /// Per-lane values of a vectorized constant.
    ConstVec(Box<[ConstValue]>),
    /// Unary ALU tag.
    Unary(UnaryOp),
    /// Binary ALU tag; also the combining operator of `Reduce`.
    Binary(BinaryOp),
    /// Ternary ALU tag.
    Ternary(TernaryOp),
    /// Single lane index of a `Gep`.
    Lane(u32),
    /// Lane permutation of a `Gep` producing a vector.
    Lanes(Box<[u32]>),
    /// `Range` id and reduce flag.
    Range {
        /// Loop id, also the scheduling priority base.
        id: u32,
        /// True for reduction loops.
        reduce: bool,
    },
    /// `(axis, extent)` descriptors of `Expand`/`Contract`.
    Axes(Box<[(u32, u32)]>),
    /// Accumulator number, extended with a lane id on devectorization.
    Acc(Box<[u32]>),
    /// `DefineVar` name and inclusive bounds.
    Var {
        name: Box<str>,
        min: i64,
        max: i64,
    },
    /// `Special` index name and extent.
    Special { name: Box<str>, size: u32 },
    /// `DefineGlobal`/`DefineLocal` slot number.
    Buffer(u32),
    /// `Wmma` descriptor.
    Wmma(Box<WmmaSpec>),
}

impl Arg {
    /// The constant payload, if this is `Arg::Const`.
    pub fn as_const(&self) -> Option<ConstValue> {
        match self {
            Arg::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// The binary operator tag, if any.
    pub fn as_binary(&self) -> Option<BinaryOp> {
        match self {
            Arg::Binary(op) => Some(*op),
            _ => None,
        }
    }

    /// An `Axes` payload from a slice.
    pub fn axes(axes: &[(u32, u32)]) -> Arg {
        Arg::Axes(axes.to_vec().into_boxed_slice())
    }
}

/// The identity element of a reduction operator on `kind`: the value an
/// accumulator starts from.
pub fn identity_element(op: BinaryOp, kind: ScalarKind) -> ConstValue {
    let raw = match op {
        BinaryOp::Add => ConstValue::Int(0),
        BinaryOp::Mul => ConstValue::Int(1),
        BinaryOp::Max => min_const(kind),
        _ => ConstValue::Int(0),
    };
    raw.normalize(DType::Scalar(kind))
}

/// The smallest representable value of `kind`.
fn min_const(kind: ScalarKind) -> ConstValue {
    match kind {
        ScalarKind::Bool => ConstValue::Bool(false),
        ScalarKind::F16 => ConstValue::F32(Ieee32::with_float(-65504.0)),
        ScalarKind::F32 => ConstValue::F32(Ieee32::with_float(f32::NEG_INFINITY)),
        ScalarKind::F64 => ConstValue::F64(Ieee64::with_float(f64::NEG_INFINITY)),
        _ if kind.is_unsigned() => ConstValue::UInt(0),
        _ => {
            let bits = kind.int_bits().unwrap_or(64);
            ConstValue::Int(if bits == 64 {
                i64::MIN
            } else {
                -(1i64 << (bits - 1))
            })
        }
    }
}

/// Evaluate a unary operator on a constant, honoring `dtype`'s width.
pub fn exec_unary(op: UnaryOp, dtype: DType, a: ConstValue) -> Option<ConstValue> {
    let v = match op {
        UnaryOp::Neg => {
            if dtype.scalar() == ScalarKind::Bool {
                ConstValue::Bool(!a.as_bool())
            } else if dtype.is_float() {
                ConstValue::F64(Ieee64::with_float(-a.as_f64()))
            } else {
                ConstValue::Int(a.as_i64().wrapping_neg())
            }
        }
        UnaryOp::Exp2 => ConstValue::F64(Ieee64::with_float(a.as_f64().exp2())),
        UnaryOp::Log2 => ConstValue::F64(Ieee64::with_float(a.as_f64().log2())),
        UnaryOp::Sin => ConstValue::F64(Ieee64::with_float(a.as_f64().sin())),
        UnaryOp::Sqrt => ConstValue::F64(Ieee64::with_float(a.as_f64().sqrt())),
    };
    Some(v.normalize(dtype))
}

/// Evaluate a binary operator on constants, honoring `dtype`'s width and
/// signedness. Returns `None` where folding must not fire (division by
/// zero, `Threefry`).
pub fn exec_binary(op: BinaryOp, dtype: DType, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    let kind = dtype.scalar();
    let is_float = kind.is_float();
    let v = match op {
        BinaryOp::Add => {
            if is_float {
                ConstValue::F64(Ieee64::with_float(a.as_f64() + b.as_f64()))
            } else if kind == ScalarKind::Bool {
                ConstValue::Bool(a.as_bool() | b.as_bool())
            } else {
                ConstValue::Int(a.as_i64().wrapping_add(b.as_i64()))
            }
        }
        BinaryOp::Mul => {
            if is_float {
                ConstValue::F64(Ieee64::with_float(a.as_f64() * b.as_f64()))
            } else if kind == ScalarKind::Bool {
                ConstValue::Bool(a.as_bool() & b.as_bool())
            } else {
                ConstValue::Int(a.as_i64().wrapping_mul(b.as_i64()))
            }
        }
        BinaryOp::Div => ConstValue::F64(Ieee64::with_float(a.as_f64() / b.as_f64())),
        BinaryOp::Idiv => {
            if kind.is_unsigned() {
                let d = b.as_u64();
                if d == 0 {
                    return None;
                }
                ConstValue::UInt(a.as_u64() / d)
            } else {
                let d = b.as_i64();
                if d == 0 {
                    return None;
                }
                ConstValue::Int(a.as_i64().wrapping_div(d))
            }
        }
        BinaryOp::Mod => {
            if kind.is_unsigned() {
                let d = b.as_u64();
                if d == 0 {
                    return None;
                }
                ConstValue::UInt(a.as_u64() % d)
            } else {
                let d = b.as_i64();
                if d == 0 {
                    return None;
                }
                ConstValue::Int(a.as_i64().wrapping_rem(d))
            }
        }
        BinaryOp::Max => {
            if is_float {
                ConstValue::F64(Ieee64::with_float(a.as_f64().max(b.as_f64())))
            } else if kind.is_unsigned() {
                ConstValue::UInt(a.as_u64().max(b.as_u64()))
            } else {
                ConstValue::Int(a.as_i64().max(b.as_i64()))
            }
        }
        BinaryOp::CmpLt => {
            return Some(ConstValue::Bool(if is_float {
                a.as_f64() < b.as_f64()
            } else if kind.is_unsigned() {
                a.as_u64() < b.as_u64()
            } else {
                a.as_i64() < b.as_i64()
            }));
        }
        BinaryOp::CmpNe => {
            return Some(ConstValue::Bool(if is_float {
                a.as_f64() != b.as_f64()
            } else {
                a.normalize(dtype) != b.normalize(dtype)
            }));
        }
        BinaryOp::And => {
            if kind == ScalarKind::Bool {
                ConstValue::Bool(a.as_bool() & b.as_bool())
            } else {
                ConstValue::UInt(a.as_u64() & b.as_u64())
            }
        }
        BinaryOp::Or => {
            if kind == ScalarKind::Bool {
                ConstValue::Bool(a.as_bool() | b.as_bool())
            } else {
                ConstValue::UInt(a.as_u64() | b.as_u64())
            }
        }
        BinaryOp::Xor => {
            if kind == ScalarKind::Bool {
                ConstValue::Bool(a.as_bool() ^ b.as_bool())
            } else {
                ConstValue::UInt(a.as_u64() ^ b.as_u64())
            }
        }
        BinaryOp::Shl => ConstValue::UInt(a.as_u64().wrapping_shl(b.as_u64() as u32)),
        BinaryOp::Shr => {
            if kind.is_unsigned() {
                ConstValue::UInt(a.as_u64().wrapping_shr(b.as_u64() as u32))
            } else {
                ConstValue::Int(a.as_i64().wrapping_shr(b.as_u64() as u32))
            }
        }
        // Lowered structurally; never folded as a scalar op.
        BinaryOp::Threefry => return None,
    };
    Some(v.normalize(dtype))
}

/// Evaluate a ternary operator on constants.
pub fn exec_ternary(
    op: TernaryOp,
    dtype: DType,
    a: ConstValue,
    b: ConstValue,
    c: ConstValue,
) -> Option<ConstValue> {
    match op {
        TernaryOp::Where => Some(if a.as_bool() { b } else { c }.normalize(dtype)),
        TernaryOp::MulAcc => {
            let prod = exec_binary(BinaryOp::Mul, dtype, a, b)?;
            exec_binary(BinaryOp::Add, dtype, prod, c)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dtypes;

    #[test]
    fn int_overflow_wraps() {
        let r = exec_binary(
            BinaryOp::Add,
            dtypes::I8,
            ConstValue::Int(127),
            ConstValue::Int(1),
        )
        .unwrap();
        assert_eq!(r, ConstValue::Int(-128));
    }

    #[test]
    fn div_truncates_toward_zero() {
        let r = exec_binary(
            BinaryOp::Idiv,
            dtypes::I32,
            ConstValue::Int(-7),
            ConstValue::Int(2),
        )
        .unwrap();
        assert_eq!(r, ConstValue::Int(-3));
        let m = exec_binary(
            BinaryOp::Mod,
            dtypes::I32,
            ConstValue::Int(-7),
            ConstValue::Int(2),
        )
        .unwrap();
        assert_eq!(m, ConstValue::Int(-1));
    }

    #[test]
    fn div_by_zero_does_not_fold() {
        assert!(exec_binary(
            BinaryOp::Idiv,
            dtypes::I32,
            ConstValue::Int(1),
            ConstValue::Int(0)
        )
        .is_none());
    }

    #[test]
    fn bool_neg_is_not() {
        let r = exec_unary(UnaryOp::Neg, dtypes::BOOL, ConstValue::Bool(true)).unwrap();
        assert_eq!(r, ConstValue::Bool(false));
    }

    #[test]
    fn identity_elements() {
        assert_eq!(
            identity_element(BinaryOp::Add, ScalarKind::I32),
            ConstValue::Int(0)
        );
        assert_eq!(
            identity_element(BinaryOp::Mul, ScalarKind::F32),
            ConstValue::F32(crate::ir::immediates::Ieee32::with_float(1.0))
        );
        assert_eq!(
            identity_element(BinaryOp::Max, ScalarKind::I8),
            ConstValue::Int(-128)
        );
        assert_eq!(
            identity_element(BinaryOp::Max, ScalarKind::F32),
            ConstValue::F32(crate::ir::immediates::Ieee32::with_float(f32::NEG_INFINITY))
        );
    }
}
