//! Literal constant values and pure folding operations.
//!
//! [`ConstValue`] is the payload of a resolved lattice entry and of literal
//! operands. Folding methods are total over their inputs and return `None`
//! for anything that cannot be folded soundly (division by zero, a
//! conversion that has no meaning). Integer arithmetic wraps, matching
//! two's-complement machine semantics.

use crate::ir::TypeKind;

/// A literal constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    /// A boolean, the result type of comparisons and the condition of branches.
    Bool(bool),
    /// A 32-bit signed integer.
    I32(i32),
    /// A 64-bit signed integer.
    I64(i64),
}

/// Comparison predicates for [`ConstValue::compare`] and the `Compare` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CmpPred {
    /// Equal.
    #[strum(serialize = "eq")]
    Eq,
    /// Not equal.
    #[strum(serialize = "ne")]
    Ne,
    /// Signed less-than.
    #[strum(serialize = "lt")]
    Lt,
    /// Signed less-or-equal.
    #[strum(serialize = "le")]
    Le,
    /// Signed greater-than.
    #[strum(serialize = "gt")]
    Gt,
    /// Signed greater-or-equal.
    #[strum(serialize = "ge")]
    Ge,
}

impl CmpPred {
    /// Returns the predicate with its operands swapped, so that
    /// `a pred b == b pred.flipped() a`.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinOp {
    /// Wrapping addition.
    #[strum(serialize = "add")]
    Add,
    /// Wrapping subtraction.
    #[strum(serialize = "sub")]
    Sub,
    /// Wrapping multiplication.
    #[strum(serialize = "mul")]
    Mul,
    /// Signed division, folds to `None` on a zero divisor.
    #[strum(serialize = "div")]
    Div,
    /// Signed remainder, folds to `None` on a zero divisor.
    #[strum(serialize = "rem")]
    Rem,
    /// Bitwise and (logical and on booleans).
    #[strum(serialize = "and")]
    And,
    /// Bitwise or (logical or on booleans).
    #[strum(serialize = "or")]
    Or,
    /// Bitwise xor (logical xor on booleans).
    #[strum(serialize = "xor")]
    Xor,
    /// Shift left, folds to `None` when the shift amount exceeds the width.
    #[strum(serialize = "shl")]
    Shl,
    /// Arithmetic shift right, folds to `None` when the shift amount exceeds the width.
    #[strum(serialize = "shr")]
    Shr,
}

impl ConstValue {
    /// Returns the boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload sign-extended to 64 bits, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            Self::Bool(_) => None,
        }
    }

    /// Returns the type of this literal.
    #[must_use]
    pub const fn type_kind(&self) -> TypeKind {
        match self {
            Self::Bool(_) => TypeKind::Bool,
            Self::I32(_) => TypeKind::I32,
            Self::I64(_) => TypeKind::I64,
        }
    }

    /// Folds a binary operator over two literals.
    ///
    /// Mixed 32/64-bit operands promote to 64 bits. Booleans only support the
    /// logical operators. Returns `None` for undefined combinations.
    #[must_use]
    pub fn binary(op: BinOp, lhs: Self, rhs: Self) -> Option<Self> {
        if let (Self::Bool(a), Self::Bool(b)) = (lhs, rhs) {
            return match op {
                BinOp::And => Some(Self::Bool(a & b)),
                BinOp::Or => Some(Self::Bool(a | b)),
                BinOp::Xor => Some(Self::Bool(a ^ b)),
                _ => None,
            };
        }

        let wide = matches!(lhs, Self::I64(_)) || matches!(rhs, Self::I64(_));
        let a = lhs.as_i64()?;
        let b = rhs.as_i64()?;

        let result = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Xor => a ^ b,
            BinOp::Shl | BinOp::Shr => {
                let width: i64 = if wide { 64 } else { 32 };
                if b < 0 || b >= width {
                    return None;
                }
                if matches!(op, BinOp::Shl) {
                    a.wrapping_shl(b as u32)
                } else {
                    a.wrapping_shr(b as u32)
                }
            }
        };

        if wide {
            Some(Self::I64(result))
        } else {
            Some(Self::I32(result as i32))
        }
    }

    /// Folds a comparison over two literals, returning a boolean literal.
    ///
    /// Integers compare signed after promotion to 64 bits. Booleans support
    /// only equality predicates.
    #[must_use]
    pub fn compare(pred: CmpPred, lhs: Self, rhs: Self) -> Option<Self> {
        if let (Self::Bool(a), Self::Bool(b)) = (lhs, rhs) {
            return match pred {
                CmpPred::Eq => Some(Self::Bool(a == b)),
                CmpPred::Ne => Some(Self::Bool(a != b)),
                _ => None,
            };
        }

        let a = lhs.as_i64()?;
        let b = rhs.as_i64()?;
        let result = match pred {
            CmpPred::Eq => a == b,
            CmpPred::Ne => a != b,
            CmpPred::Lt => a < b,
            CmpPred::Le => a <= b,
            CmpPred::Gt => a > b,
            CmpPred::Ge => a >= b,
        };
        Some(Self::Bool(result))
    }

    /// Converts this literal to the given type.
    ///
    /// Integer narrowing truncates; widening sign-extends. Bool/int
    /// conversions follow the usual zero/non-zero convention. Conversions to
    /// `Void` or `Ptr` never fold.
    #[must_use]
    pub fn convert_to(&self, ty: TypeKind) -> Option<Self> {
        match ty {
            TypeKind::Bool => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::I32(v) => Some(Self::Bool(*v != 0)),
                Self::I64(v) => Some(Self::Bool(*v != 0)),
            },
            TypeKind::I32 => match self {
                Self::Bool(b) => Some(Self::I32(i32::from(*b))),
                Self::I32(v) => Some(Self::I32(*v)),
                Self::I64(v) => Some(Self::I32(*v as i32)),
            },
            TypeKind::I64 => match self {
                Self::Bool(b) => Some(Self::I64(i64::from(*b))),
                Self::I32(v) => Some(Self::I64(i64::from(*v))),
                Self::I64(v) => Some(Self::I64(*v)),
            },
            TypeKind::Void | TypeKind::Ptr => None,
        }
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(v) => write!(f, "{v}i32"),
            Self::I64(v) => write!(f, "{v}i64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_promotion() {
        let r = ConstValue::binary(BinOp::Add, ConstValue::I32(1), ConstValue::I64(2));
        assert_eq!(r, Some(ConstValue::I64(3)));
        let r = ConstValue::binary(BinOp::Mul, ConstValue::I32(6), ConstValue::I32(7));
        assert_eq!(r, Some(ConstValue::I32(42)));
    }

    #[test]
    fn test_binary_wrapping() {
        let r = ConstValue::binary(BinOp::Add, ConstValue::I32(i32::MAX), ConstValue::I32(1));
        assert_eq!(r, Some(ConstValue::I32(i32::MIN)));
    }

    #[test]
    fn test_division_by_zero_refuses() {
        assert_eq!(
            ConstValue::binary(BinOp::Div, ConstValue::I32(1), ConstValue::I32(0)),
            None
        );
        assert_eq!(
            ConstValue::binary(BinOp::Rem, ConstValue::I64(1), ConstValue::I64(0)),
            None
        );
    }

    #[test]
    fn test_shift_out_of_range_refuses() {
        assert_eq!(
            ConstValue::binary(BinOp::Shl, ConstValue::I32(1), ConstValue::I32(32)),
            None
        );
        assert_eq!(
            ConstValue::binary(BinOp::Shl, ConstValue::I64(1), ConstValue::I32(40)),
            Some(ConstValue::I64(1 << 40))
        );
    }

    #[test]
    fn test_compare_signed() {
        assert_eq!(
            ConstValue::compare(CmpPred::Lt, ConstValue::I32(-1), ConstValue::I32(0)),
            Some(ConstValue::Bool(true))
        );
        assert_eq!(
            ConstValue::compare(CmpPred::Ge, ConstValue::I64(5), ConstValue::I32(5)),
            Some(ConstValue::Bool(true))
        );
    }

    #[test]
    fn test_flipped_predicate() {
        assert_eq!(CmpPred::Lt.flipped(), CmpPred::Gt);
        assert_eq!(CmpPred::Le.flipped(), CmpPred::Ge);
        assert_eq!(CmpPred::Eq.flipped(), CmpPred::Eq);
    }

    #[test]
    fn test_convert() {
        assert_eq!(
            ConstValue::I64(0x1_0000_0001).convert_to(TypeKind::I32),
            Some(ConstValue::I32(1))
        );
        assert_eq!(
            ConstValue::I32(-1).convert_to(TypeKind::I64),
            Some(ConstValue::I64(-1))
        );
        assert_eq!(
            ConstValue::I32(3).convert_to(TypeKind::Bool),
            Some(ConstValue::Bool(true))
        );
        assert_eq!(ConstValue::I32(3).convert_to(TypeKind::Ptr), None);
    }

    #[test]
    fn test_bool_logic() {
        assert_eq!(
            ConstValue::binary(BinOp::And, ConstValue::Bool(true), ConstValue::Bool(false)),
            Some(ConstValue::Bool(false))
        );
        assert_eq!(
            ConstValue::binary(BinOp::Add, ConstValue::Bool(true), ConstValue::Bool(false)),
            None
        );
    }
}
