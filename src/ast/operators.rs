use serde::{Deserialize, Serialize};

/// Binary operators, loosest to tightest binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Logical `or` (short-circuit, returns the deciding operand)
    Or,
    /// Logical `and` (short-circuit, returns the deciding operand)
    And,
    /// Equal (`==`)
    Eq,
    /// Not equal (`!=`)
    Ne,
    /// Less than (`<`)
    Lt,
    /// Greater than (`>`)
    Gt,
    /// Less than or equal (`<=`)
    Le,
    /// Greater than or equal (`>=`)
    Ge,
    /// Membership (`in`)
    In,
    /// Negated membership (`not in`)
    NotIn,
    /// Type/property test (`is`); right side is a bare test name
    Is,
    /// Negated test (`is not`)
    IsNot,
    /// String concatenation (`~`), coercing both sides
    Concat,
    /// Addition, sequence concatenation, or string concatenation (`+`)
    Add,
    /// Subtraction (`-`)
    Sub,
    /// Multiplication or string repetition (`*`)
    Mul,
    /// True division, always float (`/`)
    Div,
    /// Floor division (`//`)
    FloorDiv,
    /// Integer modulo with Python sign rules (`%`)
    Mod,
    /// Exponentiation (`**`)
    Pow,
}

/// Unary operators. The expansion forms are only legal inside call
/// argument lists, where they splice into the argument pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// No-op `+`
    Plus,
    /// Arithmetic negation `-`
    Neg,
    /// Logical `not`
    Not,
    /// `*seq` positional expansion
    Expand,
    /// `**obj` keyword expansion
    ExpandDict,
}
