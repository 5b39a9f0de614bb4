//! IR type system.

/// Value type of a virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    /// 32-bit signed integer (wrapping arithmetic).
    I32,
    /// 64-bit signed integer (wrapping arithmetic).
    I64,
    /// Target pointer.
    Ptr,
}

impl IrType {
    /// Whether integer arithmetic is defined for this type.
    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::I32 | IrType::I64)
    }
}

impl std::fmt::Display for IrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::Ptr => write!(f, "ptr"),
        }
    }
}
