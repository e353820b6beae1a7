//! Value types for micro-op nodes.
//!
//! A [`DType`] describes what a node evaluates to: a scalar, a short vector
//! of scalars, a pointer into a buffer, or a 2D image. Types are small
//! `Copy` values so they can live inside hash-consed node keys.

use core::fmt;

/// An element kind: the scalar domain of a value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum ScalarKind {
    /// 1-bit boolean.
    Bool,
    /// Signed integers.
    I8,
    I16,
    I32,
    I64,
    /// Unsigned integers.
    U8,
    U16,
    U32,
    U64,
    /// IEEE half/single/double.
    F16,
    F32,
    F64,
    /// Width-free loop-index arithmetic, canonicalized to `I32` before
    /// expansion.
    Index,
}

impl ScalarKind {
    /// Is this a signed or unsigned integer kind (including `Index`)?
    pub fn is_int(self) -> bool {
        !self.is_float() && self != ScalarKind::Bool
    }

    /// Is this an unsigned integer kind?
    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ScalarKind::U8 | ScalarKind::U16 | ScalarKind::U32 | ScalarKind::U64
        )
    }

    /// Is this a floating point kind?
    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::F16 | ScalarKind::F32 | ScalarKind::F64)
    }

    /// Size of one element in bytes.
    pub fn bytes(self) -> u8 {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 | ScalarKind::F16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 | ScalarKind::Index => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    /// Bit width of an integer kind, `None` otherwise.
    pub fn int_bits(self) -> Option<u32> {
        match self {
            ScalarKind::I8 | ScalarKind::U8 => Some(8),
            ScalarKind::I16 | ScalarKind::U16 => Some(16),
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::Index => Some(32),
            ScalarKind::I64 | ScalarKind::U64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::U8 => "u8",
            ScalarKind::U16 => "u16",
            ScalarKind::U32 => "u32",
            ScalarKind::U64 => "u64",
            ScalarKind::F16 => "f16",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
            ScalarKind::Index => "index",
        };
        f.write_str(s)
    }
}

/// The type of a micro-op value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum DType {
    /// A single scalar.
    Scalar(ScalarKind),
    /// `lanes` scalars packed into one value; `lanes >= 2`.
    Vector {
        /// Element kind.
        elem: ScalarKind,
        /// Lane count.
        lanes: u16,
    },
    /// Pointer to a buffer of `elem`.
    Ptr {
        /// Pointee element kind.
        elem: ScalarKind,
        /// Workgroup-local rather than global memory.
        local: bool,
    },
    /// A 2D image of float4 texels, addressed by `(x, y)` int pairs.
    Image {
        /// Texels per row.
        width: u32,
        /// Number of rows.
        height: u32,
    },
}

impl DType {
    /// The element kind: lane type for vectors, pointee for pointers,
    /// texel component for images.
    pub fn scalar(self) -> ScalarKind {
        match self {
            DType::Scalar(k) => k,
            DType::Vector { elem, .. } => elem,
            DType::Ptr { elem, .. } => elem,
            DType::Image { .. } => ScalarKind::F32,
        }
    }

    /// Lane count; 1 for scalars, pointers and images.
    pub fn count(self) -> usize {
        match self {
            DType::Vector { lanes, .. } => lanes as usize,
            _ => 1,
        }
    }

    /// The same element kind with `n` lanes. `n == 1` gives the scalar.
    pub fn vec(self, n: usize) -> DType {
        let elem = self.scalar();
        if n == 1 {
            DType::Scalar(elem)
        } else {
            DType::Vector {
                elem,
                lanes: n as u16,
            }
        }
    }

    /// Is the element kind an integer?
    pub fn is_int(self) -> bool {
        self.scalar().is_int()
    }

    /// Is the element kind unsigned?
    pub fn is_unsigned(self) -> bool {
        self.scalar().is_unsigned()
    }

    /// Is the element kind floating point?
    pub fn is_float(self) -> bool {
        self.scalar().is_float()
    }

    /// Is this a pointer or image (a buffer reference)?
    pub fn is_buffer(self) -> bool {
        matches!(self, DType::Ptr { .. } | DType::Image { .. })
    }

    /// Total byte size of one value of this type.
    pub fn bytes(self) -> usize {
        self.scalar().bytes() as usize * self.count()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DType::Scalar(k) => write!(f, "{}", k),
            DType::Vector { elem, lanes } => write!(f, "{}x{}", elem, lanes),
            DType::Ptr { elem, local: false } => write!(f, "ptr<{}>", elem),
            DType::Ptr { elem, local: true } => write!(f, "local_ptr<{}>", elem),
            DType::Image { width, height } => write!(f, "image<{}x{}>", width, height),
        }
    }
}

/// Shorthand scalar type constants.
pub const BOOL: DType = DType::Scalar(ScalarKind::Bool);
pub const I8: DType = DType::Scalar(ScalarKind::I8);
pub const I16: DType = DType::Scalar(ScalarKind::I16);
pub const I32: DType = DType::Scalar(ScalarKind::I32);
pub const I64: DType = DType::Scalar(ScalarKind::I64);
pub const U8: DType = DType::Scalar(ScalarKind::U8);
pub const U16: DType = DType::Scalar(ScalarKind::U16);
pub const U32: DType = DType::Scalar(ScalarKind::U32);
pub const U64: DType = DType::Scalar(ScalarKind::U64);
pub const F16: DType = DType::Scalar(ScalarKind::F16);
pub const F32: DType = DType::Scalar(ScalarKind::F32);
pub const F64: DType = DType::Scalar(ScalarKind::F64);
pub const INDEX: DType = DType::Scalar(ScalarKind::Index);

/// Global pointer to `elem`.
pub const fn ptr(elem: ScalarKind) -> DType {
    DType::Ptr { elem, local: false }
}

/// Workgroup-local pointer to `elem`.
pub const fn local_ptr(elem: ScalarKind) -> DType {
    DType::Ptr { elem, local: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_arithmetic() {
        assert_eq!(F32.vec(4).count(), 4);
        assert_eq!(F32.vec(4).scalar(), ScalarKind::F32);
        assert_eq!(F32.vec(4).vec(1), F32);
        assert_eq!(ptr(ScalarKind::F32).count(), 1);
        assert_eq!(I32.bytes(), 4);
        assert_eq!(F16.vec(8).bytes(), 16);
    }

    #[test]
    fn kind_queries() {
        assert!(I32.is_int() && !I32.is_float());
        assert!(INDEX.is_int() && !INDEX.is_unsigned());
        assert!(U64.is_unsigned());
        assert!(!BOOL.is_int() && !BOOL.is_float());
        assert!(DType::Image {
            width: 16,
            height: 4
        }
        .is_buffer());
    }
}
