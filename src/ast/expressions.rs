use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::Location;
use crate::value::Value;

/// An expression node: something that evaluates to a [`Value`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub location: Location,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(location: Location, kind: ExprKind) -> Self {
        Expr { location, kind }
    }
}

/// Argument list of a call site, before evaluation. `*`/`**` expansions
/// appear as [`UnaryOp::Expand`]/[`UnaryOp::ExpandDict`] nodes among the
/// positionals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallArgs {
    pub positional: Vec<Expr>,
    pub named: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    /// Parsed constant: null, boolean, number, or string
    Literal(Value),

    /// Name lookup in the environment; unknown names evaluate to Null
    Variable(String),

    /// `[a, b, c]` (also produced by parenthesized comma-tuples)
    Array(Vec<Expr>),

    /// `{key: value, …}`; keys are arbitrary expressions stringified at
    /// evaluation
    Dict(Vec<(Expr, Expr)>),

    /// `a:b:c` inside a subscript; only steps of ±1 are supported
    Slice {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },

    /// `base[index]` or sugared `base.field`
    Subscript { base: Box<Expr>, index: Box<Expr> },

    /// Unary prefix operator
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Binary infix operator. For `is`/`is not` the right side is a
    /// `Variable` holding the test name.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `then if condition else otherwise`; a missing `else` yields Null
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },

    /// `object.method(args)`: string/array/object built-in methods, or a
    /// callable member of an object
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: CallArgs,
    },

    /// `callee(args)`
    Call { callee: Box<Expr>, args: CallArgs },

    /// `value | f | g(x)`: each part after the first is applied with the
    /// running result prepended to its positional arguments
    FilterChain(Vec<Expr>),
}
