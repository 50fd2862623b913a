// tests/builtin_tests.rs
//
// The global function/filter set and the string/array/object method
// surface.

use serde_json::json;
use tenja::{render, ErrorKind, Options, Value};

fn ok(template: &str, context: serde_json::Value) -> String {
    render(template, Value::from(context), Options::default()).unwrap()
}

fn fail(template: &str, context: serde_json::Value) -> tenja::Error {
    render(template, Value::from(context), Options::default()).unwrap_err()
}

// ============================================================================
// JSON
// ============================================================================

#[test]
fn test_tojson_compact() {
    let test_cases = vec![
        ("{{ v | tojson }}", json!({"v": {"a": 1, "b": [1, 2]}}), r#"{"a": 1, "b": [1, 2]}"#),
        ("{{ v | tojson }}", json!({"v": "text"}), r#""text""#),
        ("{{ v | tojson }}", json!({"v": null}), "null"),
        ("{{ v | tojson }}", json!({"v": true}), "true"),
        ("{{ v | tojson }}", json!({"v": 2.5}), "2.5"),
        ("{{ v | tojson }}", json!({"v": "a\"b\nc"}), r#""a\"b\nc""#),
        ("{{ v | tojson }}", json!({"v": []}), "[]"),
        ("{{ v | tojson }}", json!({"v": {}}), "{}"),
    ];
    for (template, context, expected) in test_cases {
        assert_eq!(ok(template, context), expected);
    }
}

#[test]
fn test_tojson_indented() {
    let out = ok("{{ v | tojson(indent=2) }}", json!({"v": {"a": [1, 2]}}));
    assert_eq!(out, "{\n  \"a\": [\n    1,\n    2\n  ]\n}");
}

#[test]
fn test_items() {
    assert_eq!(
        ok("{% for k, v in items(d) %}{{ k }}={{ v }};{% endfor %}", json!({"d": {"b": 1, "a": 2}})),
        "b=1;a=2;"
    );
    // A JSON object string is parsed first.
    assert_eq!(
        ok("{% for k, v in items('{\"x\": 1}') %}{{ k }}={{ v }}{% endfor %}", json!({})),
        "x=1"
    );
    assert_eq!(ok("{{ items(none) | length }}", json!({})), "0");
}

// ============================================================================
// Sequences
// ============================================================================

#[test]
fn test_sequence_builtins() {
    let test_cases = vec![
        ("{{ xs | first }}", json!({"xs": [7, 8]}), "7"),
        ("{{ xs | last }}", json!({"xs": [7, 8]}), "8"),
        ("{{ 'abc' | first }}", json!({}), "a"),
        ("{{ 'abc' | last }}", json!({}), "c"),
        ("{{ [] | first }}", json!({}), ""),
        ("{{ xs | length }}", json!({"xs": [1, 2, 3]}), "3"),
        ("{{ xs | count }}", json!({"xs": [1, 2, 3]}), "3"),
        ("{{ 'abcd' | length }}", json!({}), "4"),
        ("{{ d | length }}", json!({"d": {"a": 1}}), "1"),
        ("{{ [2, 1, 2, 3] | unique | join(',') }}", json!({}), "2,1,3"),
        ("{{ 'abc' | list | join('-') }}", json!({}), "a-b-c"),
        ("{{ range(3) | join(',') }}", json!({}), "0,1,2"),
        ("{{ range(1, 4) | join(',') }}", json!({}), "1,2,3"),
        ("{{ range(5, 0, -2) | join(',') }}", json!({}), "5,3,1"),
        ("{{ range(end=2) | join(',') }}", json!({}), "0,1"),
    ];
    for (template, context, expected) in test_cases {
        assert_eq!(ok(template, context), expected, "template: {}", template);
    }
}

#[test]
fn test_join() {
    assert_eq!(ok("{{ ['a', 'b'] | join(', ') }}", json!({})), "a, b");
    assert_eq!(ok("{{ [1, 2] | join }}", json!({})), "12");
    assert_eq!(
        ok(
            "{{ users | join(', ', attribute='name') }}",
            json!({"users": [{"name": "Ada"}, {"name": "Ivy"}]})
        ),
        "Ada, Ivy"
    );
}

#[test]
fn test_select_reject() {
    let test_cases = vec![
        ("{{ [0, 1, 2, ''] | select | join(',') }}", "1,2"),
        ("{{ [1, 2, 3, 4] | select('even') | join(',') }}", "2,4"),
        ("{{ [1, 2, 3, 4] | reject('even') | join(',') }}", "1,3"),
        ("{{ [1, 2, 3] | select('equalto', 2) | join(',') }}", "2"),
        ("{{ none | select | length }}", "0"),
    ];
    for (template, expected) in test_cases {
        assert_eq!(ok(template, json!({})), expected, "template: {}", template);
    }
}

#[test]
fn test_selectattr_rejectattr() {
    let ctx = json!({"msgs": [
        {"role": "system", "content": "s"},
        {"role": "user", "content": "u1"},
        {"role": "user", "content": "u2"},
        {"role": "assistant", "tool_calls": [1]},
    ]});
    let test_cases = vec![
        ("{{ msgs | selectattr('role', 'equalto', 'user') | length }}", "2"),
        ("{{ msgs | selectattr('role', '==', 'system') | length }}", "1"),
        ("{{ msgs | selectattr('tool_calls') | length }}", "1"),
        ("{{ msgs | rejectattr('tool_calls') | length }}", "3"),
        ("{{ msgs | selectattr('tool_calls', 'defined') | length }}", "1"),
    ];
    for (template, expected) in test_cases {
        assert_eq!(ok(template, ctx.clone()), expected, "template: {}", template);
    }
}

#[test]
fn test_map() {
    let ctx = json!({"msgs": [{"role": "a"}, {"role": "b"}, {}]});
    assert_eq!(
        ok("{{ msgs | map(attribute='role') | join(',') }}", ctx.clone()),
        "a,b,"
    );
    assert_eq!(
        ok("{{ msgs | map(attribute='role', default='?') | join(',') }}", ctx),
        "a,b,?"
    );
    assert_eq!(
        ok("{{ ['a', 'b'] | map('upper') | join(',') }}", json!({})),
        "A,B"
    );
}

#[test]
fn test_dictsort() {
    assert_eq!(
        ok("{{ d | dictsort }}", json!({"d": {"b": 1, "a": 2}})),
        "[['a', 2], ['b', 1]]"
    );
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_string_filters() {
    let test_cases = vec![
        ("{{ ' Hi ' | trim | upper }}", "HI"),
        ("{{ 'ABC' | lower }}", "abc"),
        ("{{ 'hello world' | capitalize }}", "Hello world"),
        ("{{ 'hELLO wORLD' | title }}", "Hello World"),
        ("{{ none | upper }}", ""),
        ("{{ '<a & b>' | escape }}", "&lt;a &amp; b&gt;"),
        ("{{ '<x>' | e }}", "&lt;x&gt;"),
        ("{{ 42 | string }}", "42"),
        ("{{ true | string }}", "True"),
        ("{{ none | string }}", "None"),
        ("{{ 42 | safe }}", "42"),
        ("{{ '42' | int + 1 }}", "43"),
        ("{{ 2.9 | int }}", "2"),
        ("{{ 'a\nb' | indent(2) }}", "a\n  b"),
        ("{{ 'a\nb' | indent(2, true) }}", "  a\n  b"),
        ("{{ 'a\nb' | indent }}", "a\n    b"),
    ];
    for (template, expected) in test_cases {
        assert_eq!(ok(template, json!({})), expected, "template: {}", template);
    }
}

#[test]
fn test_int_rejects_junk() {
    assert_eq!(fail("{{ 'xyz' | int }}", json!({})).kind, ErrorKind::Value);
}

#[test]
fn test_default() {
    let test_cases = vec![
        ("{{ missing | default('d') }}", "d"),
        ("{{ 0 | default('d') }}", "0"),
        ("{{ 0 | default('d', true) }}", "d"),
        ("{{ '' | default('d', boolean=true) }}", "d"),
        ("{{ 'v' | default('d') }}", "v"),
    ];
    for (template, expected) in test_cases {
        assert_eq!(ok(template, json!({})), expected, "template: {}", template);
    }
}

#[test]
fn test_joiner() {
    let template = "{% set sep = joiner(', ') %}{% for x in [1, 2, 3] %}{{ sep() }}{{ x }}{% endfor %}";
    assert_eq!(ok(template, json!({})), "1, 2, 3");
}

#[test]
fn test_namespace_builtin() {
    assert_eq!(ok("{{ namespace(a=1).a }}", json!({})), "1");
}

#[test]
fn test_equalto() {
    assert_eq!(ok("{{ equalto(1, 1) }}", json!({})), "True");
    assert_eq!(ok("{{ equalto(1, 2) }}", json!({})), "False");
}

#[test]
fn test_raise_exception() {
    let err = fail(
        "{{ raise_exception('roles must alternate') }}",
        json!({}),
    );
    assert_eq!(err.kind, ErrorKind::Value);
    assert!(err.to_string().contains("roles must alternate"));
}

#[test]
fn test_strftime_now() {
    let year = ok("{{ strftime_now('%Y') }}", json!({}));
    assert_eq!(year.len(), 4);
    assert!(year.chars().all(|c| c.is_ascii_digit()));
}

// ============================================================================
// Methods
// ============================================================================

#[test]
fn test_string_methods() {
    let test_cases = vec![
        ("{{ ' hi '.strip() }}", "hi"),
        ("{{ 'xxhixx'.strip('x') }}", "hi"),
        ("{{ ' hi '.lstrip() }}", "hi "),
        ("{{ ' hi '.rstrip() }}", " hi"),
        ("{{ 'a,b,c'.split(',') | join('-') }}", "a-b-c"),
        ("{{ 'a  b\tc'.split() | join('-') }}", "a-b-c"),
        ("{{ 'abc'.startswith('ab') }}", "True"),
        ("{{ 'abc'.endswith('bc') }}", "True"),
        ("{{ 'hello'.capitalize() }}", "Hello"),
        ("{{ 'a b'.title() }}", "A B"),
        ("{{ 'a-b'.replace('-', '+') }}", "a+b"),
        ("{{ ' Hi '.strip().lower() }}", "hi"),
    ];
    for (template, expected) in test_cases {
        assert_eq!(ok(template, json!({})), expected, "template: {}", template);
    }
}

#[test]
fn test_array_methods() {
    assert_eq!(
        ok("{% set a = [1] %}{{ a.append(2) or '' }}{{ a | tojson }}", json!({})),
        "[1, 2]"
    );
    assert_eq!(
        ok("{% set a = [1, 2, 3] %}{{ a.pop() }}{{ a | length }}", json!({})),
        "32"
    );
    assert_eq!(
        ok("{% set a = [1, 2, 3] %}{{ a.pop(0) }}{{ a | tojson }}", json!({})),
        "1[2, 3]"
    );
    assert_eq!(
        ok("{% set a = [1, 3] %}{{ a.insert(1, 2) or '' }}{{ a | tojson }}", json!({})),
        "[1, 2, 3]"
    );
    assert_eq!(
        fail("{% set a = [] %}{{ a.pop() }}", json!({})).kind,
        ErrorKind::Value
    );
}

#[test]
fn test_object_methods() {
    let test_cases = vec![
        ("{% for k, v in d.items() %}{{ k }}{{ v }}{% endfor %}", json!({"d": {"a": 1, "b": 2}}), "a1b2"),
        ("{{ d.get('a') }}", json!({"d": {"a": 1}}), "1"),
        ("{{ d.get('z') }}", json!({"d": {"a": 1}}), ""),
        ("{{ d.get('z', 9) }}", json!({"d": {"a": 1}}), "9"),
        ("{% set d = {'a': 1} %}{{ d.pop('a') }}{{ d | length }}", json!({}), "10"),
        ("{% set d = {'a': 1} %}{{ d.pop('z', 7) }}", json!({}), "7"),
    ];
    for (template, context, expected) in test_cases {
        assert_eq!(ok(template, context), expected, "template: {}", template);
    }
    assert_eq!(
        fail("{% set d = {} %}{{ d.pop('z') }}", json!({})).kind,
        ErrorKind::Value
    );
}

#[test]
fn test_context_shadows_builtins() {
    assert_eq!(ok("{{ upper }}", json!({"upper": "shadow"})), "shadow");
}
