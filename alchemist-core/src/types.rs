//! The Alloy type lattice.
//!
//! A closed set: fixed-width numerics, bool, and the composite
//! reference types. Composites carry enough metadata (pointee type,
//! signature) for the checker to validate pointer arithmetic and
//! indirect calls statically.

use wasm_encoder::ValType;

/// Signature of a function or function reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSig {
    pub params: Vec<Type>,
    /// `Type::Unit` for functions that return nothing.
    pub result: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    // Primitives
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// No value; the result "type" of functions without a `->` clause.
    Unit,

    // Composite references; all lower to a wasm i32.
    /// Typed memory pointer with element-scaled arithmetic.
    Ptr(Box<Type>),
    /// Length-prefixed string reference.
    Str,
    /// Length-prefixed typed array reference.
    Array(Box<Type>),
    /// Opaque host-object reference.
    Handle,
    /// Indirect-function reference carrying its full signature.
    FnRef(Box<FuncSig>),
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I32 | Type::I64 | Type::U32 | Type::U64)
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, Type::U32 | Type::U64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Unit)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Ptr(_) | Type::Str | Type::Array(_) | Type::Handle | Type::FnRef(_)
        )
    }

    /// Byte width of a value of this type in linear memory.
    pub fn byte_size(&self) -> u32 {
        match self {
            Type::I64 | Type::U64 | Type::F64 => 8,
            Type::Unit => 0,
            // i32/u32/f32/bool and every reference are 4-byte cells.
            _ => 4,
        }
    }

    /// The wasm value type this lowers to, or `None` for `Unit`.
    pub fn val_type(&self) -> Option<ValType> {
        match self {
            Type::I32 | Type::U32 | Type::Bool => Some(ValType::I32),
            Type::I64 | Type::U64 => Some(ValType::I64),
            Type::F32 => Some(ValType::F32),
            Type::F64 => Some(ValType::F64),
            Type::Unit => None,
            Type::Ptr(_) | Type::Str | Type::Array(_) | Type::Handle | Type::FnRef(_) => {
                Some(ValType::I32)
            }
        }
    }

    /// Types that can appear as an element of `ptr<T>` / `array<T>`:
    /// scalars and references, not `unit` and not nested signatures.
    pub fn is_storable(&self) -> bool {
        !self.is_unit()
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::U32 => write!(f, "u32"),
            Type::U64 => write!(f, "u64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Bool => write!(f, "bool"),
            Type::Unit => write!(f, "unit"),
            Type::Ptr(inner) => write!(f, "ptr<{inner}>"),
            Type::Str => write!(f, "str"),
            Type::Array(inner) => write!(f, "array<{inner}>"),
            Type::Handle => write!(f, "handle"),
            Type::FnRef(sig) => {
                write!(f, "fnref(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ")")?;
                if !sig.result.is_unit() {
                    write!(f, " -> {}", sig.result)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_follow_width() {
        assert_eq!(Type::I32.byte_size(), 4);
        assert_eq!(Type::U64.byte_size(), 8);
        assert_eq!(Type::F64.byte_size(), 8);
        assert_eq!(Type::Ptr(Box::new(Type::F64)).byte_size(), 4);
    }

    #[test]
    fn references_lower_to_i32() {
        assert_eq!(Type::Str.val_type(), Some(ValType::I32));
        assert_eq!(Type::Handle.val_type(), Some(ValType::I32));
        assert_eq!(Type::Unit.val_type(), None);
    }

    #[test]
    fn display_renders_composites() {
        let ty = Type::FnRef(Box::new(FuncSig {
            params: vec![Type::I32, Type::U32],
            result: Type::I32,
        }));
        assert_eq!(ty.to_string(), "fnref(i32, u32) -> i32");
        assert_eq!(Type::Array(Box::new(Type::F32)).to_string(), "array<f32>");
    }
}
