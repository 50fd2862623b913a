//! String forms of [`Value`]: Python-style `str()`/`repr()` used when a
//! template emits a value, and JSON used by the `tojson` builtin.
//!
//! The two families differ in quoting and in how scalars print:
//!
//! - **Display/repr** follows Python: `None`, `True`/`False`, integral
//!   floats keep one decimal (`1.0`), strings prefer single quotes.
//! - **JSON** follows `json.dumps` defaults: `null`, `true`/`false`,
//!   double-quoted strings, `", "`/`": "` separators in compact form and
//!   newline-indented output when an indent width is given.

use crate::error::{type_error, Error};
use crate::value::Value;

/// Python `str()` of a value. Strings are unquoted; containers fall back
/// to their repr, as Python does.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => to_repr(other),
    }
}

/// Python `repr()` of a value.
pub fn to_repr(value: &Value) -> String {
    let mut out = String::new();
    write_repr(&mut out, value);
    out
}

/// JSON text of a value. `indent <= 0` produces the compact form with
/// `json.dumps` default separators; `indent > 0` pretty-prints.
/// Callables cannot be serialized.
pub fn to_json(value: &Value, indent: i64) -> Result<String, Error> {
    let mut out = String::new();
    write_json(&mut out, value, indent, 0)?;
    Ok(out)
}

fn write_repr(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(n) => out.push_str(&format_float(*n)),
        Value::Str(s) => write_quoted_python(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted_python(out, key);
                out.push_str(": ");
                write_repr(out, item);
            }
            out.push('}');
        }
        Value::Callable(c) => {
            out.push_str("<callable ");
            out.push_str(&c.name);
            out.push('>');
        }
    }
}

fn write_json(out: &mut String, value: &Value, indent: i64, level: usize) -> Result<(), Error> {
    let newline_indent = |out: &mut String, level: usize| {
        if indent > 0 {
            out.push('\n');
            out.push_str(&" ".repeat(indent as usize * level));
        }
    };
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(n) => out.push_str(&format_float(*n)),
        Value::Str(s) => write_quoted_json(out, s),
        Value::Array(items) => {
            let items = items.borrow();
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            newline_indent(out, level + 1);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    if indent > 0 {
                        newline_indent(out, level + 1);
                    } else {
                        out.push(' ');
                    }
                }
                write_json(out, item, indent, level + 1)?;
            }
            newline_indent(out, level);
            out.push(']');
        }
        Value::Object(map) => {
            let map = map.borrow();
            if map.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            out.push('{');
            newline_indent(out, level + 1);
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    if indent > 0 {
                        newline_indent(out, level + 1);
                    } else {
                        out.push(' ');
                    }
                }
                write_quoted_json(out, key);
                out.push_str(": ");
                write_json(out, item, indent, level + 1)?;
            }
            newline_indent(out, level);
            out.push('}');
        }
        Value::Callable(c) => {
            return Err(type_error(format!("cannot serialize callable {}", c.name)))
        }
    }
    Ok(())
}

/// Python float text: integral finite values keep one decimal place,
/// everything else uses the shortest round-trip form.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Python repr quoting: single quotes unless the string contains a single
/// quote but no double quote.
fn write_quoted_python(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// JSON string escaping; non-ASCII passes through as UTF-8.
fn write_quoted_json(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
