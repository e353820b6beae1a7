//! Loomgen tensor kernel mid-end.
//!
//! This crate is the middle of a tensor compiler: it takes the micro-op
//! (UOp) graph an upstream lowerer produces for one kernel, rewrites it to
//! a fixpoint of an algebraic and lowering rule catalogue, and schedules
//! the result into the flat instruction list a code generation backend
//! renders from.
//!
//! The pieces, in dependency order: the hash-consed graph ([`ir`]), the
//! declarative pattern engine ([`pattern`] / [`rewrite`]), the rule sets
//! ([`simplify`], [`transcendental`], [`expand`], [`reduce`]), and the
//! scheduler ([`linearize`]) with its checks ([`verifier`]). A
//! [`Context`] ties them together for one kernel compilation.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(missing_docs, unused_import_braces)]

pub use crate::context::{full_graph_rewrite, Context};
pub use crate::isa::{Backend, NullBackend};
pub use crate::linearize::linearize;
pub use crate::rewrite::graph_rewrite;
pub use crate::verifier::{type_verify, VerifierError};

pub mod expand;
pub mod ir;
pub mod linearize;
pub mod pattern;
pub mod reduce;
pub mod rewrite;
pub mod settings;
pub mod simplify;
pub mod transcendental;
pub mod verifier;

mod context;
mod fx;
mod isa;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
