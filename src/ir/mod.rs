//! Representation of micro-op graphs.

pub mod dtypes;
pub mod graph;
pub mod immediates;
pub mod ops;

pub use crate::ir::dtypes::{DType, ScalarKind};
pub use crate::ir::graph::{SrcList, UOp, UOpData, UOpGraph, ValueRange};
pub use crate::ir::immediates::{ConstValue, Ieee32, Ieee64};
pub use crate::ir::ops::{
    identity_element, Arg, BinaryOp, Opcode, TernaryOp, UnaryOp, WmmaSpec,
};
