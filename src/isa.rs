//! Backend capability descriptors.
//!
//! The mid-end is backend-agnostic; the only things it ever asks a target
//! are which transcendentals it can emit directly, whether 4-wide float
//! memory ops exist, and whether it wants an extra rewrite pass of its
//! own (some targets clean up addressing modes this way).

use crate::ir::ops::UnaryOp;
use crate::pattern::PatternMatcher;

/// What a code generation target can do, as consumed by the rewriter.
pub trait Backend {
    /// Whether 4-wide float loads/stores (and the image addressing path)
    /// should be formed.
    fn supports_float4(&self) -> bool {
        false
    }

    /// The unary transcendentals with native instructions. Anything
    /// missing is expanded symbolically.
    fn native_transcendentals(&self) -> &[UnaryOp] {
        &[UnaryOp::Exp2, UnaryOp::Log2, UnaryOp::Sin, UnaryOp::Sqrt]
    }

    /// A backend-specific rewrite set run after reduction lowering.
    fn extra_matcher(&self) -> Option<&PatternMatcher> {
        None
    }
}

/// A plain scalar target: everything native, nothing wide.
#[derive(Default)]
pub struct NullBackend;

impl Backend for NullBackend {}
