use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::error::Location;

/// A statement node: something that renders output into a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub location: Location,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(location: Location, kind: StmtKind) -> Self {
        Stmt { location, kind }
    }
}

/// The signal a statement returns from rendering. `Break`/`Continue`
/// unwind to the nearest enclosing loop; the top-level driver treats
/// either as `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopControl {
    Normal,
    Break,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    /// Ordered children rendered in sequence
    Sequence(Vec<Stmt>),

    /// Literal text run (already whitespace-adjusted at parse time)
    Text(String),

    /// `{{ expr }}`
    EmitExpr(Expr),

    /// `{% if %}…{% elif %}…{% else %}…{% endif %}`; the else branch has
    /// no condition
    If {
        cascade: Vec<(Option<Expr>, Stmt)>,
    },

    /// `{% for names in iterable [if cond] [recursive] %}…[{% else %}…]{% endfor %}`
    For {
        var_names: Vec<String>,
        iterable: Expr,
        condition: Option<Expr>,
        body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
        recursive: bool,
    },

    /// Expression-form `{% set a, b = expr %}` or namespaced
    /// `{% set ns.field = expr %}`
    Set {
        ns: Option<String>,
        names: Vec<String>,
        value: Expr,
    },

    /// Block-form `{% set name %}…{% endset %}`: binds the rendered body
    SetBlock { name: String, body: Box<Stmt> },

    /// `{% macro name(params) %}…{% endmacro %}`; params carry optional
    /// default expressions
    MacroDef {
        name: String,
        params: Vec<(String, Option<Expr>)>,
        body: Box<Stmt>,
    },

    /// `{% filter expr %}…{% endfilter %}`: renders the body, then pipes
    /// it through the filter expression
    FilterBlock { filter: Expr, body: Box<Stmt> },

    /// `{% break %}` / `{% continue %}`
    LoopControl(LoopControl),
}
