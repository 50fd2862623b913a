//! # Template Abstract Syntax Tree
//!
//! This module defines the tree a template is compiled into before
//! rendering, organized into focused submodules:
//!
//! - **[tokens]** - Raw template tokens produced by the lexer, with their
//!   whitespace-control markers
//! - **[expressions]** - Expression nodes (literals, access, operators,
//!   calls, filter chains)
//! - **[operators]** - Unary and binary operator kinds
//! - **[statements]** - Rendered statement nodes (text, emission, control
//!   flow, bindings)
//!
//! ## Two node families
//!
//! **Expressions** produce a [`crate::Value`] via
//! `evaluate(&Environment)`. **Statements** write into an output sink via
//! `render(&mut String, &Environment)` and report a [`LoopControl`]
//! signal so `{% break %}`/`{% continue %}` can unwind to the nearest
//! enclosing loop.
//!
//! Every node carries a [`crate::error::Location`] pointing back into the
//! source string, used only for diagnostics.
//!
//! ## Shape example
//!
//! ```text
//! Hello {% for u in users %}{{ u.name }}{% endfor %}
//! ```
//!
//! parses to
//!
//! ```text
//! Sequence
//! ├── Text "Hello "
//! └── For (u in Variable users)
//!     └── EmitExpr (Subscript (Variable u) 'name')
//! ```

pub mod expressions;
pub mod operators;
pub mod statements;
pub mod tokens;

pub use expressions::{CallArgs, Expr, ExprKind};
pub use operators::{BinaryOp, UnaryOp};
pub use statements::{LoopControl, Stmt, StmtKind};
pub use tokens::{SpaceHandling, TemplateToken, TokenKind};
