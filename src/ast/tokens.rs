use crate::ast::Expr;
use crate::error::Location;

/// Whitespace directive attached to one side of a tag.
///
/// `{%- … -%}` sets `Strip` on the corresponding side; a `+` marker (and
/// the default) keeps the adjacent text untouched and leaves the decision
/// to the `trim_blocks`/`lstrip_blocks` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceHandling {
    Keep,
    Strip,
}

/// One raw segment of a template, as produced by the lexer.
///
/// Expression and block-head bodies are already parsed: the lexer hands
/// the characters between the tag delimiters to the expression parser, so
/// a token carries AST fragments rather than source slices.
#[derive(Debug, Clone)]
pub struct TemplateToken {
    pub location: Location,
    pub pre_space: SpaceHandling,
    pub post_space: SpaceHandling,
    pub kind: TokenKind,
}

#[derive(Debug, Clone)]
pub enum TokenKind {
    /// Raw text between tags
    Text(String),

    /// `{{ expr }}`
    Expression(Expr),

    /// `{# … #}` (content discarded, spacing preserved)
    Comment,

    /// `{% if expr %}`
    If(Expr),

    /// `{% elif expr %}`
    Elif(Expr),

    /// `{% else %}`
    Else,

    /// `{% endif %}`
    EndIf,

    /// `{% for a, b in expr if cond recursive %}`
    For {
        var_names: Vec<String>,
        iterable: Expr,
        condition: Option<Expr>,
        recursive: bool,
    },

    /// `{% endfor %}`
    EndFor,

    /// `{% set ns.x = expr %}`, `{% set a, b = expr %}`, or the block
    /// opener `{% set name %}` when `value` is absent
    Set {
        ns: Option<String>,
        names: Vec<String>,
        value: Option<Expr>,
    },

    /// `{% endset %}`
    EndSet,

    /// `{% macro name(params) %}`
    Macro {
        name: String,
        params: Vec<(String, Option<Expr>)>,
    },

    /// `{% endmacro %}`
    EndMacro,

    /// `{% filter expr %}`
    Filter(Expr),

    /// `{% endfilter %}`
    EndFilter,

    /// `{% generation %}` (transparent wrapper, inference-time no-op)
    Generation,

    /// `{% endgeneration %}`
    EndGeneration,

    /// `{% break %}`
    Break,

    /// `{% continue %}`
    Continue,
}

impl TokenKind {
    /// Name used in "Unexpected …"/"Unterminated …" diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Text(_) => "text",
            TokenKind::Expression(_) => "expression",
            TokenKind::Comment => "comment",
            TokenKind::If(_) => "if",
            TokenKind::Elif(_) => "elif",
            TokenKind::Else => "else",
            TokenKind::EndIf => "endif",
            TokenKind::For { .. } => "for",
            TokenKind::EndFor => "endfor",
            TokenKind::Set { .. } => "set",
            TokenKind::EndSet => "endset",
            TokenKind::Macro { .. } => "macro",
            TokenKind::EndMacro => "endmacro",
            TokenKind::Filter(_) => "filter",
            TokenKind::EndFilter => "endfilter",
            TokenKind::Generation => "generation",
            TokenKind::EndGeneration => "endgeneration",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
        }
    }

    /// Whether this token is a block-level tag for the purposes of the
    /// `trim_blocks`/`lstrip_blocks` options (everything except raw text
    /// and `{{ }}` expressions).
    pub fn is_block_tag(&self) -> bool {
        !matches!(self, TokenKind::Text(_) | TokenKind::Expression(_))
    }
}
