// tests/integration_tests.rs
//
// End-to-end renders shaped like real chat templates, the crate-level
// invariants, and the compiled-template sidecar.

use serde_json::json;
use tenja::{parse, render, Options, Template, Value};

fn ok(template: &str, context: serde_json::Value) -> String {
    render(template, Value::from(context), Options::default()).unwrap()
}

// ============================================================================
// Chat-template scenarios
// ============================================================================

const CHATML: &str = "{% for message in messages %}<|im_start|>{{ message['role'] }}\n{{ message['content'] }}<|im_end|>\n{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant\n{% endif %}";

#[test]
fn test_chatml_conversation() {
    let context = json!({
        "messages": [
            {"role": "system", "content": "Be helpful."},
            {"role": "user", "content": "Hi!"},
        ],
        "add_generation_prompt": true,
    });
    assert_eq!(
        ok(CHATML, context),
        "<|im_start|>system\nBe helpful.<|im_end|>\n<|im_start|>user\nHi!<|im_end|>\n<|im_start|>assistant\n"
    );
}

#[test]
fn test_chatml_without_generation_prompt() {
    let context = json!({
        "messages": [{"role": "user", "content": "Hi!"}],
        "add_generation_prompt": false,
    });
    assert_eq!(
        ok(CHATML, context),
        "<|im_start|>user\nHi!<|im_end|>\n"
    );
}

#[test]
fn test_system_prompt_extraction() {
    let template = "{% if messages[0]['role'] == 'system' %}{{ messages[0]['content'] }}{% else %}default{% endif %}";
    assert_eq!(
        ok(template, json!({"messages": [{"role": "system", "content": "sys"}]})),
        "sys"
    );
    assert_eq!(
        ok(template, json!({"messages": [{"role": "user", "content": "hi"}]})),
        "default"
    );
}

#[test]
fn test_tool_listing_with_tojson() {
    let template = "{% if tools %}Tools:\n{% for tool in tools %}{{ tool | tojson }}\n{% endfor %}{% endif %}";
    let context = json!({
        "tools": [{"name": "search", "parameters": {"type": "object"}}],
    });
    assert_eq!(
        ok(template, context),
        "Tools:\n{\"name\": \"search\", \"parameters\": {\"type\": \"object\"}}\n"
    );
    assert_eq!(ok(template, json!({"tools": null})), "");
}

#[test]
fn test_role_alternation_check() {
    let template = "{% for m in messages %}{% if loop.index0 % 2 == 0 %}{{ m.role == 'user' }}{% endif %}{% endfor %}";
    let context = json!({"messages": [
        {"role": "user"}, {"role": "assistant"}, {"role": "user"},
    ]});
    assert_eq!(ok(template, context), "TrueTrue");
}

#[test]
fn test_macro_driven_tool_rendering() {
    let template = concat!(
        "{% macro describe(tool) %}{{ tool.name }}({{ tool.args | join(', ') }}){% endmacro %}",
        "{% for t in tools %}{{ describe(t) }}{% if not loop.last %}; {% endif %}{% endfor %}"
    );
    let context = json!({"tools": [
        {"name": "search", "args": ["query"]},
        {"name": "fetch", "args": ["url", "timeout"]},
    ]});
    assert_eq!(ok(template, context), "search(query); fetch(url, timeout)");
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn test_render_is_deterministic() {
    let template = "{% for m in messages %}{{ loop.index }}:{{ m.role }} {% endfor %}";
    let context = json!({"messages": [{"role": "a"}, {"role": "b"}]});
    let a = render(template, Value::from(context.clone()), Options::default()).unwrap();
    let b = render(template, Value::from(context), Options::default()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_text_only_template_is_verbatim() {
    let options = Options {
        keep_trailing_newline: true,
        ..Options::default()
    };
    let sources = vec!["plain text\n", "no tags here", "  indented\n\n"];
    for source in sources {
        assert_eq!(
            render(source, Value::Null, options).unwrap(),
            source,
            "source: {:?}",
            source
        );
    }
}

#[test]
fn test_tojson_round_trips() {
    let v = json!({
        "s": "text with \"quotes\" and\nnewlines",
        "n": 42,
        "f": 2.5,
        "b": true,
        "z": null,
        "arr": [1, "two", [3]],
        "obj": {"nested": {"deep": "x"}},
    });
    let out = ok("{{ v | tojson }}", json!({ "v": v.clone() }));
    let back: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(back, v);
}

#[test]
fn test_loop_count_matches_input_length() {
    for n in [0usize, 1, 5, 32] {
        let xs: Vec<u64> = (0..n as u64).collect();
        let out = ok(
            "{% for x in xs %}.{% endfor %}",
            json!({ "xs": xs }),
        );
        assert_eq!(out.len(), n);
    }
}

#[test]
fn test_shared_containers_across_bindings() {
    let template = "{% set a = {'k': []} %}{% set b = a['k'] %}{{ b.append('x') or '' }}{{ a['k'] | length }}";
    assert_eq!(ok(template, json!({})), "1");
}

// ============================================================================
// Compiled-template sidecar
// ============================================================================

#[test]
fn test_sidecar_round_trip() {
    let template = "{% for x in xs if x > 1 %}{{ x }}:{{ loop.index }} {% endfor %}";
    let context = json!({"xs": [1, 2, 3]});

    let parsed = parse(template, Options::default()).unwrap();
    let bytes = parsed.to_bytes().unwrap();
    let reloaded = Template::from_bytes(&bytes).unwrap();

    assert_eq!(
        parsed.render(Value::from(context.clone())).unwrap(),
        reloaded.render(Value::from(context)).unwrap()
    );
}

#[test]
fn test_sidecar_preserves_literals() {
    let template = "{{ 1 }} {{ 2.5 }} {{ 'x' }} {{ true }} {{ none }}|";
    let parsed = parse(template, Options::default()).unwrap();
    let reloaded = Template::from_bytes(&parsed.to_bytes().unwrap()).unwrap();
    assert_eq!(reloaded.render(Value::Null).unwrap(), "1 2.5 x True |");
}

#[test]
fn test_sidecar_rejects_garbage() {
    assert!(Template::from_bytes(b"not json").is_err());
}
