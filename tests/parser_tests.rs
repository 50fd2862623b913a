// tests/parser_tests.rs
//
// AST shapes produced by the expression grammar and block assembly, and
// the parse-failure modes with their location-annotated messages.

use serde_json::json;
use tenja::ast::{BinaryOp, ExprKind, StmtKind};
use tenja::{parse, render, ErrorKind, Options, Value};

fn parse_ok(template: &str) -> tenja::Template {
    parse(template, Options::default()).unwrap()
}

fn parse_err(template: &str) -> tenja::Error {
    parse(template, Options::default()).unwrap_err()
}

/// The single expression of a `{{ … }}`-only template.
fn expr_of(template: &str) -> ExprKind {
    let t = parse_ok(template);
    match &t.root().kind {
        StmtKind::EmitExpr(e) => e.kind.clone(),
        other => panic!("expected an expression template, got {:?}", other),
    }
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_addition_binds_looser_than_multiplication() {
    match expr_of("{{ 1 + 2 * 3 }}") {
        ExprKind::Binary { op, right, .. } => {
            assert_eq!(op, BinaryOp::Add);
            assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            ));
        }
        other => panic!("expected binary add at the root, got {:?}", other),
    }
}

#[test]
fn test_comparison_binds_looser_than_arithmetic() {
    match expr_of("{{ 1 + 1 == 2 }}") {
        ExprKind::Binary { op, .. } => assert_eq!(op, BinaryOp::Eq),
        other => panic!("expected comparison at the root, got {:?}", other),
    }
}

#[test]
fn test_filter_pipe_collects_into_a_chain() {
    match expr_of("{{ x | trim | upper }}") {
        ExprKind::FilterChain(parts) => assert_eq!(parts.len(), 3),
        other => panic!("expected a filter chain, got {:?}", other),
    }
}

#[test]
fn test_ternary_shape() {
    assert!(matches!(
        expr_of("{{ a if b else c }}"),
        ExprKind::Ternary {
            otherwise: Some(_),
            ..
        }
    ));
    assert!(matches!(
        expr_of("{{ a if b }}"),
        ExprKind::Ternary {
            otherwise: None,
            ..
        }
    ));
}

#[test]
fn test_tuple_lowers_to_array() {
    assert!(matches!(expr_of("{{ (1, 2) }}"), ExprKind::Array(items) if items.len() == 2));
    // A parenthesized single expression is just the expression.
    assert!(matches!(expr_of("{{ (1) }}"), ExprKind::Literal(_)));
}

#[test]
fn test_dotted_access_is_subscript_sugar() {
    match expr_of("{{ a.b }}") {
        ExprKind::Subscript { index, .. } => {
            assert!(matches!(&index.kind, ExprKind::Literal(Value::Str(s)) if s == "b"));
        }
        other => panic!("expected subscript, got {:?}", other),
    }
}

#[test]
fn test_is_right_side_is_a_bare_name() {
    match expr_of("{{ x is defined }}") {
        ExprKind::Binary { op, right, .. } => {
            assert_eq!(op, BinaryOp::Is);
            assert!(matches!(&right.kind, ExprKind::Variable(n) if n == "defined"));
        }
        other => panic!("expected is-test, got {:?}", other),
    }
}

// ============================================================================
// Block assembly
// ============================================================================

#[test]
fn test_if_cascade_shape() {
    let t = parse_ok("{% if a %}1{% elif b %}2{% else %}3{% endif %}");
    match &t.root().kind {
        StmtKind::If { cascade } => {
            assert_eq!(cascade.len(), 3);
            assert!(cascade[0].0.is_some());
            assert!(cascade[1].0.is_some());
            assert!(cascade[2].0.is_none());
        }
        other => panic!("expected if cascade, got {:?}", other),
    }
}

#[test]
fn test_nested_loops_assemble() {
    let t = parse_ok("{% for a in x %}{% for b in a %}{{ b }}{% endfor %}{% endfor %}");
    match &t.root().kind {
        StmtKind::For { body, .. } => {
            assert!(matches!(body.kind, StmtKind::For { .. }));
        }
        other => panic!("expected nested for, got {:?}", other),
    }
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_parse_error_kinds() {
    let test_cases = vec![
        "{% if %}x{% endif %}",
        "{% include 'x' %}",
        "{% for x [1] %}{% endfor %}",
        "{{ x[1:2:3] }}",
        "{{ 'unterminated }}",
        "{% macro m %}{% endmacro %}",
    ];
    for template in test_cases {
        let err = parse_err(template);
        assert_eq!(err.kind, ErrorKind::Parse, "template: {}", template);
    }
}

#[test]
fn test_unmatched_blocks() {
    let err = parse_err("{% for x in [1] %}x");
    assert_eq!(err.kind, ErrorKind::Parse);
    assert!(err.to_string().contains("unterminated for"), "{}", err);

    let err = parse_err("{% endfor %}");
    assert!(err.to_string().contains("unexpected endfor"), "{}", err);

    let err = parse_err("{% if a %}x");
    assert!(err.to_string().contains("unterminated if"), "{}", err);
}

#[test]
fn test_lex_error_kinds() {
    let test_cases = vec!["{# never closed", "{{ x ", "{% if a ", "{{ a b }}"];
    for template in test_cases {
        let err = parse_err(template);
        assert_eq!(err.kind, ErrorKind::Lex, "template: {}", template);
    }
}

#[test]
fn test_error_snippet_format() {
    let err = parse_err("line one\n{{ bad( }}\nline three");
    let text = err.to_string();
    assert!(text.starts_with("ParseError: "), "{}", text);
    assert!(text.contains("at row 2, column 9:"), "{}", text);
    assert!(
        text.contains("line one\n{{ bad( }}\n        ^\nline three"),
        "{}",
        text
    );
}

#[test]
fn test_error_snippet_at_first_row_has_no_preceding_line() {
    let err = parse_err("{{ bad( }}\nnext");
    let text = err.to_string();
    assert!(text.contains("at row 1, column 9:"), "{}", text);
    assert!(text.contains("{{ bad( }}\n        ^\nnext"), "{}", text);
}

// ============================================================================
// Parse purity
// ============================================================================

#[test]
fn test_parsing_is_pure() {
    let template = "{% for m in messages %}{{ m.role }}: {{ m.content }}\n{% endfor %}";
    let a = parse_ok(template);
    let b = parse_ok(template);
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());

    let context = json!({"messages": [{"role": "user", "content": "hi"}]});
    assert_eq!(
        a.render(Value::from(context.clone())).unwrap(),
        b.render(Value::from(context)).unwrap()
    );
}

#[test]
fn test_render_ignores_top_level_loop_controls() {
    // break/continue outside a loop unwind to the driver and are absorbed.
    assert_eq!(
        render("a{% break %}b", Value::Null, Options::default()).unwrap(),
        "a"
    );
}
