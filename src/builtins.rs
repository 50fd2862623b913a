//! The fixed set of global functions and filters installed in the root
//! environment, plus the `.method()` surface of strings, arrays, and
//! objects.
//!
//! Everything here follows Jinja2 semantics as Python renders them:
//! filters accept their subject as the first positional argument (which
//! is how the `|` pipe passes it), missing-data helpers (`default`,
//! `get`) do their own null handling, and test names (`select`,
//! `selectattr`, `map`) are resolved through the environment so that
//! macros can shadow them.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::env::Environment;
use crate::error::{arity_error, name_error, type_error, value_error, Error};
use crate::output;
use crate::value::{ArgPack, Value, ValueMap};

/// Build the root bindings. Called once per thread by
/// [`Environment::builtins`].
pub fn bindings() -> ValueMap {
    let mut map = ValueMap::new();
    let mut set = |name: &str, value: Value| {
        map.insert(name.to_string(), value);
    };

    set(
        "raise_exception",
        simple("raise_exception", &["message"], |_env, mut slots| {
            let message = required(slots[0].take(), "message", "raise_exception")?;
            Err(value_error(message.to_str()))
        }),
    );

    set(
        "tojson",
        simple("tojson", &["value", "indent"], |_env, mut slots| {
            let value = required(slots[0].take(), "value", "tojson")?;
            let indent = match slots[1].take() {
                Some(v) => v.to_int()?,
                None => -1,
            };
            Ok(Value::Str(output::to_json(&value, indent)?))
        }),
    );

    set(
        "items",
        simple("items", &["object"], |_env, mut slots| {
            let object = slots[0].take().unwrap_or(Value::Null);
            let pairs = match &object {
                Value::Null => Vec::new(),
                Value::Object(map) => map
                    .borrow()
                    .iter()
                    .map(|(k, v)| Value::array(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
                Value::Str(text) => {
                    let parsed: serde_json::Value = serde_json::from_str(text)
                        .map_err(|e| value_error(format!("items(): invalid JSON: {}", e)))?;
                    match Value::from(parsed) {
                        Value::Object(map) => map
                            .borrow()
                            .iter()
                            .map(|(k, v)| Value::array(vec![Value::Str(k.clone()), v.clone()]))
                            .collect(),
                        other => {
                            return Err(type_error(format!(
                                "items() expects a JSON object, got {}",
                                other.type_name()
                            )))
                        }
                    }
                }
                other => {
                    return Err(type_error(format!(
                        "items() expects an object, got {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::array(pairs))
        }),
    );

    set(
        "first",
        simple("first", &["items"], |_env, mut slots| {
            sequence_edge(required(slots[0].take(), "items", "first")?, true)
        }),
    );
    set(
        "last",
        simple("last", &["items"], |_env, mut slots| {
            sequence_edge(required(slots[0].take(), "items", "last")?, false)
        }),
    );

    let length = simple("length", &["items"], |_env, mut slots| {
        let items = required(slots[0].take(), "items", "length")?;
        match items.len() {
            Some(n) => Ok(Value::Int(n as i64)),
            None => Err(type_error(format!(
                "object of type {} has no length",
                items.type_name()
            ))),
        }
    });
    set("length", length.clone());
    set("count", length);

    set(
        "lower",
        simple("lower", &["text"], |_env, mut slots| {
            text_transform(slots[0].take(), |s| s.to_lowercase())
        }),
    );
    set(
        "upper",
        simple("upper", &["text"], |_env, mut slots| {
            text_transform(slots[0].take(), |s| s.to_uppercase())
        }),
    );
    set(
        "trim",
        simple("trim", &["text"], |_env, mut slots| {
            text_transform(slots[0].take(), |s| s.trim().to_string())
        }),
    );
    set(
        "capitalize",
        simple("capitalize", &["text"], |_env, mut slots| {
            text_transform(slots[0].take(), capitalize)
        }),
    );
    set(
        "title",
        simple("title", &["text"], |_env, mut slots| {
            text_transform(slots[0].take(), title_case)
        }),
    );

    set(
        "default",
        Value::callable(
            "default",
            Rc::new(|_env: &Environment, args: ArgPack| {
                if args.positional.len() < 2 || args.positional.len() > 3 {
                    return Err(arity_error(
                        "default() takes 2 or 3 positional arguments",
                    ));
                }
                let boolean = if args.positional.len() == 3 {
                    args.positional[2].truthy()
                } else {
                    args.get_named("boolean").map(|v| v.truthy()).unwrap_or(false)
                };
                let value = &args.positional[0];
                let fallback = &args.positional[1];
                let keep = if boolean { value.truthy() } else { !value.is_null() };
                Ok(if keep { value.clone() } else { fallback.clone() })
            }),
        ),
    );

    let escape = simple("escape", &["text"], |_env, mut slots| {
        let text = required(slots[0].take(), "text", "escape")?;
        Ok(Value::Str(html_escape(&text.to_str())))
    });
    set("escape", escape.clone());
    set("e", escape);

    set(
        "safe",
        simple("safe", &["value"], |_env, mut slots| {
            let value = required(slots[0].take(), "value", "safe")?;
            Ok(Value::Str(value.to_str()))
        }),
    );

    set(
        "joiner",
        simple("joiner", &["sep"], |_env, mut slots| {
            let sep = match slots[0].take() {
                Some(v) => v.to_str(),
                None => String::new(),
            };
            let first = Rc::new(Cell::new(true));
            Ok(Value::callable(
                "joiner",
                Rc::new(move |_env: &Environment, _args: ArgPack| {
                    if first.get() {
                        first.set(false);
                        Ok(Value::Str(String::new()))
                    } else {
                        Ok(Value::Str(sep.clone()))
                    }
                }),
            ))
        }),
    );

    set(
        "join",
        simple("join", &["items", "d", "attribute"], |_env, mut slots| {
            let items = required(slots[0].take(), "items", "join")?;
            let sep = match slots[1].take() {
                Some(v) => v.to_str(),
                None => String::new(),
            };
            let attribute = slots[2].take().filter(|v| !v.is_null());
            let parts: Vec<String> = items
                .iter_items()?
                .into_iter()
                .map(|item| match &attribute {
                    Some(attr) => item.get_item(attr).unwrap_or(Value::Null).to_str(),
                    None => item.to_str(),
                })
                .collect();
            Ok(Value::Str(parts.join(&sep)))
        }),
    );

    set(
        "namespace",
        Value::callable(
            "namespace",
            Rc::new(|_env: &Environment, args: ArgPack| {
                if !args.positional.is_empty() {
                    return Err(arity_error(
                        "namespace() takes only keyword arguments",
                    ));
                }
                let mut map = ValueMap::new();
                for (key, value) in args.named {
                    map.insert(key, value);
                }
                Ok(Value::object(map))
            }),
        ),
    );

    let equalto = simple("equalto", &["expected", "actual"], |_env, mut slots| {
        let expected = required(slots[0].take(), "expected", "equalto")?;
        let actual = required(slots[1].take(), "actual", "equalto")?;
        Ok(Value::Bool(actual == expected))
    });
    set("equalto", equalto.clone());
    set("==", equalto);

    set(
        "string",
        simple("string", &["value"], |_env, mut slots| {
            let value = required(slots[0].take(), "value", "string")?;
            Ok(Value::Str(value.to_str()))
        }),
    );
    set(
        "int",
        simple("int", &["value"], |_env, mut slots| {
            let value = required(slots[0].take(), "value", "int")?;
            Ok(Value::Int(value.to_int()?))
        }),
    );
    set(
        "list",
        simple("list", &["items"], |_env, mut slots| {
            let items = required(slots[0].take(), "items", "list")?;
            Ok(Value::array(items.iter_items()?))
        }),
    );
    set(
        "unique",
        simple("unique", &["items"], |_env, mut slots| {
            let items = required(slots[0].take(), "items", "unique")?;
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for item in items.iter_items()? {
                if seen.insert(item.hash_key()?) {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        }),
    );

    set("select", select_or_reject("select", true));
    set("reject", select_or_reject("reject", false));
    set("selectattr", select_or_reject_attr("selectattr", true));
    set("rejectattr", select_or_reject_attr("rejectattr", false));

    set(
        "map",
        Value::callable(
            "map",
            Rc::new(|env: &Environment, args: ArgPack| {
                let attribute = args.get_named("attribute");
                if let Some(attr) = attribute.filter(|_| args.positional.len() == 1) {
                    for (key, _) in &args.named {
                        if key != "attribute" && key != "default" {
                            return Err(arity_error(format!(
                                "unknown argument '{}' for map()",
                                key
                            )));
                        }
                    }
                    let default = args.get_named("default").unwrap_or(Value::Null);
                    let mut out = Vec::new();
                    for item in args.positional[0].iter_items()? {
                        let projected = item.get_item(&attr).unwrap_or(Value::Null);
                        out.push(if projected.is_null() {
                            default.clone()
                        } else {
                            projected
                        });
                    }
                    return Ok(Value::array(out));
                }
                if args.named.is_empty() && args.positional.len() >= 2 {
                    let f = resolve_callable(env, &args.positional[1], "filter")?;
                    let extra = args.positional[2..].to_vec();
                    let mut out = Vec::new();
                    for item in args.positional[0].iter_items()? {
                        let mut call_args = vec![item];
                        call_args.extend(extra.iter().cloned());
                        out.push(call_value(&f, env, ArgPack::positional(call_args))?);
                    }
                    return Ok(Value::array(out));
                }
                Err(arity_error("invalid arguments for map()"))
            }),
        ),
    );

    set(
        "indent",
        simple("indent", &["text", "width", "first"], |_env, mut slots| {
            let text = required(slots[0].take(), "text", "indent")?.to_str();
            let width = match slots[1].take() {
                Some(v) => v.to_int()?,
                None => 4,
            };
            let first = slots[2].take().map(|v| v.truthy()).unwrap_or(false);
            Ok(Value::Str(indent_text(&text, width.max(0) as usize, first)))
        }),
    );

    set(
        "dictsort",
        simple("dictsort", &["value"], |_env, mut slots| {
            let value = required(slots[0].take(), "value", "dictsort")?;
            match &value {
                Value::Object(map) => {
                    let mut pairs: Vec<(String, Value)> = map
                        .borrow()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    pairs.sort_by(|a, b| a.0.cmp(&b.0));
                    Ok(Value::array(
                        pairs
                            .into_iter()
                            .map(|(k, v)| Value::array(vec![Value::Str(k), v]))
                            .collect(),
                    ))
                }
                other => Err(type_error(format!(
                    "dictsort expects an object, got {}",
                    other.type_name()
                ))),
            }
        }),
    );

    set(
        "range",
        Value::callable(
            "range",
            Rc::new(|_env: &Environment, args: ArgPack| {
                let mut bounds: [Option<i64>; 3] = [None, None, None];
                match args.positional.len() {
                    0 => {}
                    1 => bounds[1] = Some(args.positional[0].to_int()?),
                    2 | 3 => {
                        for (i, v) in args.positional.iter().enumerate() {
                            bounds[i] = Some(v.to_int()?);
                        }
                    }
                    n => {
                        return Err(arity_error(format!(
                            "range() takes at most 3 positional arguments, got {}",
                            n
                        )))
                    }
                }
                for (key, value) in &args.named {
                    let slot = match key.as_str() {
                        "start" => 0,
                        "end" | "stop" => 1,
                        "step" => 2,
                        other => {
                            return Err(arity_error(format!(
                                "unknown argument '{}' for range()",
                                other
                            )))
                        }
                    };
                    if bounds[slot].is_some() {
                        return Err(arity_error(format!(
                            "duplicate argument '{}' for range()",
                            key
                        )));
                    }
                    bounds[slot] = Some(value.to_int()?);
                }
                let end = bounds[1]
                    .ok_or_else(|| arity_error("range() missing required argument 'end'"))?;
                let start = bounds[0].unwrap_or(0);
                let step = bounds[2].unwrap_or(1);
                if step == 0 {
                    return Err(value_error("range() step cannot be zero"));
                }
                let mut out = Vec::new();
                let mut i = start;
                while (step > 0 && i < end) || (step < 0 && i > end) {
                    out.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::array(out))
            }),
        ),
    );

    set(
        "strftime_now",
        simple("strftime_now", &["format"], |_env, mut slots| {
            let format = required(slots[0].take(), "format", "strftime_now")?.to_str();
            let mut out = String::new();
            write!(out, "{}", chrono::Local::now().format(&format))
                .map_err(|_| value_error(format!("invalid strftime format: {:?}", format)))?;
            Ok(Value::Str(out))
        }),
    );

    map
}

// ---------------------------------------------------------------------------
// Argument binding

/// Map an [`ArgPack`] onto declared parameter slots, by position then by
/// name, rejecting extras and duplicates.
fn bind_args(
    name: &'static str,
    params: &'static [&'static str],
    args: ArgPack,
) -> Result<Vec<Option<Value>>, Error> {
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    if args.positional.len() > params.len() {
        return Err(arity_error(format!(
            "{}() takes at most {} positional arguments, got {}",
            name,
            params.len(),
            args.positional.len()
        )));
    }
    for (i, value) in args.positional.into_iter().enumerate() {
        slots[i] = Some(value);
    }
    for (key, value) in args.named {
        let i = params
            .iter()
            .position(|p| *p == key)
            .ok_or_else(|| arity_error(format!("unknown argument '{}' for {}()", key, name)))?;
        if slots[i].is_some() {
            return Err(arity_error(format!(
                "duplicate argument '{}' for {}()",
                key, name
            )));
        }
        slots[i] = Some(value);
    }
    Ok(slots)
}

fn simple<F>(name: &'static str, params: &'static [&'static str], f: F) -> Value
where
    F: Fn(&Environment, Vec<Option<Value>>) -> Result<Value, Error> + 'static,
{
    Value::callable(
        name,
        Rc::new(move |env: &Environment, args: ArgPack| {
            let slots = bind_args(name, params, args)?;
            f(env, slots)
        }),
    )
}

fn required(slot: Option<Value>, param: &str, fn_name: &str) -> Result<Value, Error> {
    slot.ok_or_else(|| {
        arity_error(format!(
            "{}() missing required argument '{}'",
            fn_name, param
        ))
    })
}

fn call_value(f: &Value, env: &Environment, args: ArgPack) -> Result<Value, Error> {
    match f {
        Value::Callable(c) => c.call(env, args),
        other => Err(type_error(format!("{} is not callable", other.type_name()))),
    }
}

/// Resolve a test/filter argument: either already a callable, or a name
/// looked up in the environment.
fn resolve_callable(env: &Environment, value: &Value, what: &str) -> Result<Value, Error> {
    match value {
        Value::Callable(_) => Ok(value.clone()),
        Value::Str(name) => match env.get(name) {
            Some(f @ Value::Callable(_)) => Ok(f),
            Some(_) => Err(type_error(format!("{} '{}' is not callable", what, name))),
            None => crate::eval::test_callable(name)
                .ok_or_else(|| name_error(format!("unknown {} '{}'", what, name))),
        },
        other => Err(type_error(format!(
            "{} must be a name or callable, got {}",
            what,
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Filter families

fn select_or_reject(name: &'static str, keep: bool) -> Value {
    Value::callable(
        name,
        Rc::new(move |env: &Environment, args: ArgPack| {
            if args.positional.is_empty() {
                return Err(arity_error(format!(
                    "{}() needs a sequence argument",
                    name
                )));
            }
            let items = if args.positional[0].is_null() {
                Vec::new()
            } else {
                args.positional[0].iter_items()?
            };
            let mut out = Vec::new();
            if args.positional.len() == 1 {
                for item in items {
                    if item.truthy() == keep {
                        out.push(item);
                    }
                }
            } else {
                let test = resolve_callable(env, &args.positional[1], "test")?;
                let extra = args.positional[2..].to_vec();
                for item in items {
                    let mut call_args = vec![item.clone()];
                    call_args.extend(extra.iter().cloned());
                    let verdict = call_value(&test, env, ArgPack::positional(call_args))?;
                    if verdict.truthy() == keep {
                        out.push(item);
                    }
                }
            }
            Ok(Value::array(out))
        }),
    )
}

fn select_or_reject_attr(name: &'static str, keep: bool) -> Value {
    Value::callable(
        name,
        Rc::new(move |env: &Environment, args: ArgPack| {
            if args.positional.len() < 2 {
                return Err(arity_error(format!(
                    "{}() needs a sequence and an attribute name",
                    name
                )));
            }
            let items = if args.positional[0].is_null() {
                Vec::new()
            } else {
                args.positional[0].iter_items()?
            };
            let attr = args.positional[1].clone();
            let test = if args.positional.len() >= 3 {
                Some(resolve_callable(env, &args.positional[2], "test")?)
            } else {
                None
            };
            let extra = args.positional.get(3..).unwrap_or(&[]).to_vec();

            let mut out = Vec::new();
            for item in items {
                let attr_value = item.get_item(&attr).unwrap_or(Value::Null);
                let verdict = match &test {
                    Some(test) => {
                        let mut call_args = vec![attr_value];
                        call_args.extend(extra.iter().cloned());
                        let pack = ArgPack {
                            positional: call_args,
                            named: args.named.clone(),
                        };
                        call_value(test, env, pack)?.truthy()
                    }
                    None => attr_value.truthy(),
                };
                if verdict == keep {
                    out.push(item);
                }
            }
            Ok(Value::array(out))
        }),
    )
}

// ---------------------------------------------------------------------------
// Method dispatch

/// `object.method(args)` for the built-in method surface. Unknown
/// methods yield Null, matching the forgiving subscript behavior.
pub fn call_method(
    obj: &Value,
    method: &str,
    args: ArgPack,
    env: &Environment,
) -> Result<Value, Error> {
    match obj {
        Value::Array(items) => match method {
            "append" => {
                expect_args("append", &args, 1, 1)?;
                items.borrow_mut().push(args.positional[0].clone());
                Ok(Value::Null)
            }
            "pop" => {
                expect_args("pop", &args, 0, 1)?;
                let mut items = items.borrow_mut();
                match args.positional.first() {
                    None => items
                        .pop()
                        .ok_or_else(|| value_error("pop from empty list")),
                    Some(index) => {
                        let mut i = index.to_int()?;
                        if i < 0 {
                            i += items.len() as i64;
                        }
                        if i < 0 || i as usize >= items.len() {
                            return Err(value_error("pop index out of range"));
                        }
                        Ok(items.remove(i as usize))
                    }
                }
            }
            "insert" => {
                expect_args("insert", &args, 2, 2)?;
                let index = args.positional[0].to_int()?;
                let mut items = items.borrow_mut();
                if index < 0 || index as usize > items.len() {
                    return Err(value_error("insert index out of range"));
                }
                items.insert(index as usize, args.positional[1].clone());
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        },

        Value::Object(map) => match method {
            "items" => {
                expect_args("items", &args, 0, 0)?;
                Ok(Value::array(
                    map.borrow()
                        .iter()
                        .map(|(k, v)| Value::array(vec![Value::Str(k.clone()), v.clone()]))
                        .collect(),
                ))
            }
            "get" => {
                expect_args("get", &args, 1, 2)?;
                let key = object_key(&args.positional[0])?;
                match map.borrow().get(&key) {
                    Some(v) => Ok(v.clone()),
                    None => Ok(args.positional.get(1).cloned().unwrap_or(Value::Null)),
                }
            }
            "pop" => {
                expect_args("pop", &args, 1, 2)?;
                let key = object_key(&args.positional[0])?;
                match map.borrow_mut().shift_remove(&key) {
                    Some(v) => Ok(v),
                    None => match args.positional.get(1) {
                        Some(default) => Ok(default.clone()),
                        None => Err(value_error(format!("key not found: {:?}", key))),
                    },
                }
            }
            other => {
                // Clone the member out first: the callable may mutate
                // this same object.
                let member = map.borrow().get(other).cloned();
                call_member(member.as_ref(), other, args, env)
            }
        },

        Value::Callable(c) => {
            let member = c.attrs.borrow().get(method).cloned();
            call_member(member.as_ref(), method, args, env)
        }

        Value::Str(s) => string_method(s, method, &args),

        _ => Ok(Value::Null),
    }
}

/// Fall back to calling a callable member of an object; missing members
/// are Null, non-callable members are an error.
fn call_member(
    member: Option<&Value>,
    name: &str,
    args: ArgPack,
    env: &Environment,
) -> Result<Value, Error> {
    match member {
        Some(Value::Callable(c)) => c.call(env, args),
        Some(other) => Err(type_error(format!(
            "'{}' is {}, not callable",
            name,
            other.type_name()
        ))),
        None => Ok(Value::Null),
    }
}

fn string_method(s: &str, method: &str, args: &ArgPack) -> Result<Value, Error> {
    match method {
        "strip" | "lstrip" | "rstrip" => {
            expect_args(method, args, 0, 1)?;
            let chars = args.positional.first().map(|v| v.to_str());
            let (left, right) = match method {
                "strip" => (true, true),
                "lstrip" => (true, false),
                _ => (false, true),
            };
            Ok(Value::Str(strip_chars(s, chars.as_deref(), left, right)))
        }
        "split" => {
            expect_args("split", args, 0, 1)?;
            let parts: Vec<Value> = match args.positional.first() {
                Some(sep) => {
                    let sep = sep.to_str();
                    if sep.is_empty() {
                        return Err(value_error("empty separator"));
                    }
                    s.split(sep.as_str())
                        .map(|p| Value::Str(p.to_string()))
                        .collect()
                }
                None => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::array(parts))
        }
        "startswith" => {
            expect_args("startswith", args, 1, 1)?;
            Ok(Value::Bool(s.starts_with(&args.positional[0].to_str())))
        }
        "endswith" => {
            expect_args("endswith", args, 1, 1)?;
            Ok(Value::Bool(s.ends_with(&args.positional[0].to_str())))
        }
        "capitalize" => {
            expect_args("capitalize", args, 0, 0)?;
            Ok(Value::Str(capitalize(s)))
        }
        "title" => {
            expect_args("title", args, 0, 0)?;
            Ok(Value::Str(title_case(s)))
        }
        "upper" => {
            expect_args("upper", args, 0, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "lower" => {
            expect_args("lower", args, 0, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "replace" => {
            expect_args("replace", args, 2, 2)?;
            let old = args.positional[0].to_str();
            let new = args.positional[1].to_str();
            Ok(Value::Str(s.replace(&old, &new)))
        }
        _ => Ok(Value::Null),
    }
}

fn expect_args(name: &str, args: &ArgPack, min: usize, max: usize) -> Result<(), Error> {
    if args.positional.len() < min || args.positional.len() > max || !args.named.is_empty() {
        return Err(arity_error(format!(
            "{}() takes between {} and {} positional arguments",
            name, min, max
        )));
    }
    Ok(())
}

fn object_key(key: &Value) -> Result<String, Error> {
    if key.is_primitive() {
        Ok(key.to_str())
    } else {
        Err(type_error(format!(
            "object keys are strings, got {}",
            key.type_name()
        )))
    }
}

// ---------------------------------------------------------------------------
// Text helpers

fn sequence_edge(items: Value, front: bool) -> Result<Value, Error> {
    match &items {
        Value::Array(values) => {
            let values = values.borrow();
            let picked = if front { values.first() } else { values.last() };
            Ok(picked.cloned().unwrap_or(Value::Null))
        }
        Value::Str(s) => {
            let c = if front { s.chars().next() } else { s.chars().last() };
            Ok(c.map(|c| Value::Str(c.to_string())).unwrap_or(Value::Null))
        }
        other => Err(type_error(format!(
            "expected a sequence, got {}",
            other.type_name()
        ))),
    }
}

/// Null passes through the text filters untouched.
fn text_transform(slot: Option<Value>, f: impl Fn(&str) -> String) -> Result<Value, Error> {
    match slot {
        None | Some(Value::Null) => Ok(Value::Null),
        Some(v) => Ok(Value::Str(f(&v.to_str()))),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = c.is_whitespace();
    }
    out
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn strip_chars(s: &str, chars: Option<&str>, left: bool, right: bool) -> String {
    let set: Vec<char> = match chars {
        Some(c) if !c.is_empty() => c.chars().collect(),
        _ => " \t\n\r".chars().collect(),
    };
    let matcher = |c: char| set.contains(&c);
    let mut out = s;
    if left {
        out = out.trim_start_matches(matcher);
    }
    if right {
        out = out.trim_end_matches(matcher);
    }
    out.to_string()
}

fn indent_text(text: &str, width: usize, first: bool) -> String {
    let pad = " ".repeat(width);
    let (body, trailing_newline) = match text.strip_suffix('\n') {
        Some(body) => (body, true),
        None => (text, false),
    };
    let mut out = String::new();
    for (i, line) in body.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if i > 0 || first {
            out.push_str(&pad);
        }
        out.push_str(line);
    }
    if trailing_newline {
        out.push('\n');
    }
    out
}
