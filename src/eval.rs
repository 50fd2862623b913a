use std::cell::Cell;
use std::rc::Rc;

use crate::ast::{BinaryOp, CallArgs, Expr, ExprKind, LoopControl, Stmt, StmtKind, UnaryOp};
use crate::builtins;
use crate::env::Environment;
use crate::error::{arity_error, name_error, type_error, value_error, Error};
use crate::value::{ArgPack, Value, ValueMap};

impl Expr {
    /// Evaluate this expression to a [`Value`]. Errors pick up the
    /// nearest node location on the way out.
    pub fn evaluate(&self, env: &Environment) -> Result<Value, Error> {
        self.eval_inner(env)
            .map_err(|e| e.with_location(&self.location))
    }

    fn eval_inner(&self, env: &Environment) -> Result<Value, Error> {
        match &self.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Variable(name) => Ok(env.get(name).unwrap_or(Value::Null)),
            ExprKind::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for e in elements {
                    items.push(e.evaluate(env)?);
                }
                Ok(Value::array(items))
            }
            ExprKind::Dict(entries) => {
                let mut map = ValueMap::new();
                for (key_expr, value_expr) in entries {
                    let key = key_expr.evaluate(env)?;
                    if !key.is_primitive() {
                        return Err(type_error(format!(
                            "unhashable dict key: {}",
                            key.type_name()
                        )));
                    }
                    map.insert(key.to_str(), value_expr.evaluate(env)?);
                }
                Ok(Value::object(map))
            }
            ExprKind::Slice { .. } => {
                Err(type_error("slice is only valid inside a subscript"))
            }
            ExprKind::Subscript { base, index } => eval_subscript(base, index, env),
            ExprKind::Unary { op, operand } => {
                let v = operand.evaluate(env)?;
                match op {
                    UnaryOp::Plus => Ok(v),
                    UnaryOp::Neg => v.neg(),
                    UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                    UnaryOp::Expand | UnaryOp::ExpandDict => Err(type_error(
                        "expansion is only valid in call arguments",
                    )),
                }
            }
            ExprKind::Binary { op, left, right } => eval_binary(*op, left, right, env),
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if condition.evaluate(env)?.truthy() {
                    then.evaluate(env)
                } else {
                    match otherwise {
                        Some(e) => e.evaluate(env),
                        None => Ok(Value::Null),
                    }
                }
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let obj = object.evaluate(env)?;
                if obj.is_null() {
                    return Ok(Value::Null);
                }
                let pack = eval_args(args, env)?;
                builtins::call_method(&obj, method, pack, env)
            }
            ExprKind::Call { callee, args } => {
                let f = eval_callee(callee, env)?;
                let pack = eval_args(args, env)?;
                call_value(&f, env, pack)
            }
            ExprKind::FilterChain(parts) => {
                let mut iter = parts.iter();
                let first = iter.next().ok_or_else(|| type_error("empty filter chain"))?;
                let mut result = first.evaluate(env)?;
                for part in iter {
                    result = apply_filter_part(part, result, env)?;
                }
                Ok(result)
            }
        }
    }
}

/// Resolve the target of a call or filter: an unresolved name here is a
/// hard NameError, unlike plain variable reads.
fn eval_callee(expr: &Expr, env: &Environment) -> Result<Value, Error> {
    match &expr.kind {
        ExprKind::Variable(name) => env.get(name).ok_or_else(|| {
            name_error(format!("'{}' is not defined", name)).with_location(&expr.location)
        }),
        _ => expr.evaluate(env),
    }
}

fn call_value(f: &Value, env: &Environment, args: ArgPack) -> Result<Value, Error> {
    match f {
        Value::Callable(c) => c.call(env, args),
        other => Err(type_error(format!("{} is not callable", other.type_name()))),
    }
}

/// Apply one stage of a filter chain: `value | part`. A call form gets
/// the running value prepended to its positional arguments.
pub fn apply_filter_part(part: &Expr, value: Value, env: &Environment) -> Result<Value, Error> {
    match &part.kind {
        ExprKind::Call { callee, args } => {
            let f = eval_callee(callee, env)?;
            let mut pack = eval_args(args, env)?;
            pack.positional.insert(0, value);
            call_value(&f, env, pack).map_err(|e| e.with_location(&part.location))
        }
        _ => {
            let f = eval_callee(part, env)?;
            call_value(&f, env, ArgPack::positional(vec![value]))
                .map_err(|e| e.with_location(&part.location))
        }
    }
}

/// Evaluate call-site arguments, splicing `*seq` and `**obj` expansions.
pub fn eval_args(args: &CallArgs, env: &Environment) -> Result<ArgPack, Error> {
    let mut pack = ArgPack::default();
    for arg in &args.positional {
        match &arg.kind {
            ExprKind::Unary {
                op: UnaryOp::Expand,
                operand,
            } => match operand.evaluate(env)? {
                Value::Array(items) => pack.positional.extend(items.borrow().iter().cloned()),
                other => {
                    return Err(type_error(format!(
                        "* expansion needs an array, got {}",
                        other.type_name()
                    ))
                    .with_location(&arg.location))
                }
            },
            ExprKind::Unary {
                op: UnaryOp::ExpandDict,
                operand,
            } => match operand.evaluate(env)? {
                Value::Object(map) => pack
                    .named
                    .extend(map.borrow().iter().map(|(k, v)| (k.clone(), v.clone()))),
                other => {
                    return Err(type_error(format!(
                        "** expansion needs an object, got {}",
                        other.type_name()
                    ))
                    .with_location(&arg.location))
                }
            },
            _ => pack.positional.push(arg.evaluate(env)?),
        }
    }
    for (name, expr) in &args.named {
        pack.named.push((name.clone(), expr.evaluate(env)?));
    }
    Ok(pack)
}

fn eval_subscript(base: &Expr, index: &Expr, env: &Environment) -> Result<Value, Error> {
    let target = base.evaluate(env)?;

    if let ExprKind::Slice { start, end, step } = &index.kind {
        return eval_slice(&target, start, end, step, env);
    }

    if target.is_null() {
        if let ExprKind::Variable(name) = &base.kind {
            if !env.contains(name) {
                return Err(name_error(format!("'{}' is not defined", name)));
            }
            return Err(type_error(format!("'{}' is null", name)));
        }
        return Err(type_error("cannot subscript null"));
    }
    let key = index.evaluate(env)?;
    Ok(target.get_item(&key).unwrap_or(Value::Null))
}

fn eval_slice(
    target: &Value,
    start: &Option<Box<Expr>>,
    end: &Option<Box<Expr>>,
    step: &Option<Box<Expr>>,
    env: &Environment,
) -> Result<Value, Error> {
    let step = match step {
        Some(e) => {
            let v = e.evaluate(env)?;
            match v.to_int()? {
                1 => 1,
                -1 => -1,
                other => {
                    return Err(value_error(format!(
                        "slice step must be 1 or -1, got {}",
                        other
                    )))
                }
            }
        }
        None => 1,
    };
    let bound = |e: &Option<Box<Expr>>| -> Result<Option<i64>, Error> {
        match e {
            Some(e) => match e.evaluate(env)? {
                Value::Null => Ok(None),
                v => Ok(Some(v.to_int()?)),
            },
            None => Ok(None),
        }
    };
    let start = bound(start)?;
    let end = bound(end)?;

    match target {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let out: String = slice_indices(start, end, step, chars.len())
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::Str(out))
        }
        Value::Array(items) => {
            let items = items.borrow();
            let out: Vec<Value> = slice_indices(start, end, step, items.len())
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Value::array(out))
        }
        Value::Null => Err(type_error("cannot slice null")),
        other => Err(type_error(format!(
            "slicing is only supported on arrays and strings, got {}",
            other.type_name()
        ))),
    }
}

/// Python slice index sequence: negatives count from the end and
/// out-of-range bounds clamp after normalization.
fn slice_indices(start: Option<i64>, end: Option<i64>, step: i64, len: usize) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        if v < 0 {
            if step < 0 {
                -1
            } else {
                0
            }
        } else if v >= len {
            if step < 0 {
                len - 1
            } else {
                len
            }
        } else {
            v
        }
    };
    let (mut i, stop) = if step > 0 {
        (start.map_or(0, clamp), end.map_or(len, clamp))
    } else {
        (start.map_or(len - 1, clamp), end.map_or(-1, clamp))
    };
    let mut out = Vec::new();
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    out
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    env: &Environment,
) -> Result<Value, Error> {
    use std::cmp::Ordering;

    // Tests never evaluate their right side; and/or must short-circuit.
    match op {
        BinaryOp::Is | BinaryOp::IsNot => {
            let name = match &right.kind {
                ExprKind::Variable(name) => name,
                _ => return Err(type_error("right side of 'is' must be a test name")),
            };
            let value = left.evaluate(env)?;
            let outcome = apply_test(name, &value)?;
            return Ok(Value::Bool(if op == BinaryOp::Is {
                outcome
            } else {
                !outcome
            }));
        }
        BinaryOp::And => {
            let l = left.evaluate(env)?;
            return if l.truthy() { right.evaluate(env) } else { Ok(l) };
        }
        BinaryOp::Or => {
            let l = left.evaluate(env)?;
            return if l.truthy() { Ok(l) } else { right.evaluate(env) };
        }
        _ => {}
    }

    let l = left.evaluate(env)?;
    let r = right.evaluate(env)?;
    match op {
        BinaryOp::Concat => Ok(Value::Str(format!("{}{}", l.to_str(), r.to_str()))),
        BinaryOp::Add => l.add(&r),
        BinaryOp::Sub => l.sub(&r),
        BinaryOp::Mul => l.mul(&r),
        BinaryOp::Div => l.div(&r),
        BinaryOp::FloorDiv => l.floordiv(&r),
        BinaryOp::Mod => l.modulo(&r),
        BinaryOp::Pow => l.pow(&r),
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Lt => Ok(Value::Bool(l.compare(&r)? == Ordering::Less)),
        BinaryOp::Gt => Ok(Value::Bool(l.compare(&r)? == Ordering::Greater)),
        BinaryOp::Le => Ok(Value::Bool(l.compare(&r)? != Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(l.compare(&r)? != Ordering::Less)),
        BinaryOp::In => Ok(Value::Bool(r.contains(&l)?)),
        BinaryOp::NotIn => Ok(Value::Bool(!r.contains(&l)?)),
        BinaryOp::Is | BinaryOp::IsNot | BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

/// Test names `select`/`reject`/`selectattr`/`rejectattr` can resolve
/// when the environment has no callable of that name: the `is`-tests,
/// wrapped as callables.
pub(crate) fn test_callable(name: &str) -> Option<Value> {
    const TESTS: &[&str] = &[
        "none",
        "null",
        "defined",
        "undefined",
        "true",
        "false",
        "boolean",
        "integer",
        "float",
        "number",
        "string",
        "mapping",
        "dict",
        "dictionary",
        "sequence",
        "iterable",
        "even",
        "odd",
    ];
    if !TESTS.contains(&name) {
        return None;
    }
    let name = name.to_string();
    Some(Value::callable(
        name.clone(),
        Rc::new(move |_env: &Environment, args: ArgPack| {
            if args.positional.len() != 1 || !args.named.is_empty() {
                return Err(arity_error(format!("{}() takes exactly one argument", name)));
            }
            Ok(Value::Bool(apply_test(&name, &args.positional[0])?))
        }),
    ))
}

/// The `is <name>` tests.
fn apply_test(name: &str, value: &Value) -> Result<bool, Error> {
    Ok(match name {
        "none" | "null" => value.is_null(),
        "defined" => !value.is_null(),
        "undefined" => value.is_null(),
        "true" => matches!(value, Value::Bool(true)),
        "false" => matches!(value, Value::Bool(false)),
        "boolean" => matches!(value, Value::Bool(_)),
        "integer" => matches!(value, Value::Int(_)),
        "float" => matches!(value, Value::Float(_)),
        "number" => value.is_number(),
        "string" => value.is_string(),
        "mapping" | "dict" | "dictionary" => matches!(value, Value::Object(_)),
        "sequence" => matches!(value, Value::Array(_)),
        "iterable" => value.is_iterable(),
        "even" => match value {
            Value::Int(n) => n % 2 == 0,
            other => {
                return Err(type_error(format!(
                    "'even' expects an integer, got {}",
                    other.type_name()
                )))
            }
        },
        "odd" => match value {
            Value::Int(n) => n % 2 != 0,
            other => {
                return Err(type_error(format!(
                    "'odd' expects an integer, got {}",
                    other.type_name()
                )))
            }
        },
        other => return Err(name_error(format!("unknown test '{}'", other))),
    })
}

// ---------------------------------------------------------------------------
// Statement rendering

impl Stmt {
    /// Render this statement into `out`, reporting the loop-control
    /// signal to the enclosing construct.
    pub fn render(&self, out: &mut String, env: &Environment) -> Result<LoopControl, Error> {
        self.render_inner(out, env)
            .map_err(|e| e.with_location(&self.location))
    }

    /// Convenience: render into a fresh string, ignoring loop signals
    /// (macro bodies, block-set bodies, filter-block bodies).
    pub fn render_to_string(&self, env: &Environment) -> Result<String, Error> {
        let mut out = String::new();
        self.render(&mut out, env)?;
        Ok(out)
    }

    fn render_inner(&self, out: &mut String, env: &Environment) -> Result<LoopControl, Error> {
        match &self.kind {
            StmtKind::Sequence(children) => {
                for child in children {
                    let signal = child.render(out, env)?;
                    if signal != LoopControl::Normal {
                        return Ok(signal);
                    }
                }
                Ok(LoopControl::Normal)
            }
            StmtKind::Text(text) => {
                out.push_str(text);
                Ok(LoopControl::Normal)
            }
            StmtKind::EmitExpr(expr) => {
                let value = expr.evaluate(env)?;
                if !value.is_null() {
                    out.push_str(&value.to_str());
                }
                Ok(LoopControl::Normal)
            }
            StmtKind::If { cascade } => {
                for (condition, body) in cascade {
                    let enter = match condition {
                        Some(c) => c.evaluate(env)?.truthy(),
                        None => true,
                    };
                    if enter {
                        return body.render(out, env);
                    }
                }
                Ok(LoopControl::Normal)
            }
            StmtKind::For {
                var_names,
                iterable,
                condition,
                body,
                else_body,
                recursive,
            } => {
                let items = iterable.evaluate(env)?;
                let spec = Rc::new(LoopSpec {
                    var_names: var_names.clone(),
                    condition: condition.clone(),
                    body: (**body).clone(),
                    else_body: else_body.as_deref().cloned(),
                });
                render_loop(out, env, &spec, items, *recursive)
            }
            StmtKind::Set { ns, names, value } => {
                let v = value.evaluate(env)?;
                match ns {
                    Some(ns) => {
                        let target = env
                            .get(ns)
                            .ok_or_else(|| name_error(format!("'{}' is not defined", ns)))?;
                        match &target {
                            Value::Object(_) => target.set_item(&names[0], v)?,
                            other => {
                                return Err(type_error(format!(
                                    "namespace '{}' is {}, not an object",
                                    ns,
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    None => destructure(names, env, v)?,
                }
                Ok(LoopControl::Normal)
            }
            StmtKind::SetBlock { name, body } => {
                let rendered = body.render_to_string(env)?;
                env.set(name, Value::Str(rendered));
                Ok(LoopControl::Normal)
            }
            StmtKind::MacroDef { name, params, body } => {
                let callable = make_macro(name, params, body, env);
                env.set(name, callable);
                Ok(LoopControl::Normal)
            }
            StmtKind::FilterBlock { filter, body } => {
                let rendered = Value::Str(body.render_to_string(env)?);
                let result = match &filter.kind {
                    ExprKind::FilterChain(parts) => {
                        let mut value = rendered;
                        for part in parts {
                            value = apply_filter_part(part, value, env)?;
                        }
                        value
                    }
                    _ => apply_filter_part(filter, rendered, env)?,
                };
                out.push_str(&result.to_str());
                Ok(LoopControl::Normal)
            }
            StmtKind::LoopControl(control) => Ok(*control),
        }
    }
}

/// Bind an item to the loop targets: one name takes the whole item, a
/// name tuple destructures an array of matching arity.
fn destructure(names: &[String], env: &Environment, value: Value) -> Result<(), Error> {
    if names.len() == 1 {
        env.set(&names[0], value);
        return Ok(());
    }
    match &value {
        Value::Array(items) => {
            let items = items.borrow();
            if items.len() != names.len() {
                return Err(value_error(format!(
                    "cannot unpack {} values into {} names",
                    items.len(),
                    names.len()
                )));
            }
            for (name, item) in names.iter().zip(items.iter()) {
                env.set(name, item.clone());
            }
            Ok(())
        }
        other => Err(value_error(format!(
            "cannot unpack {} into {} names",
            other.type_name(),
            names.len()
        ))),
    }
}

/// Everything a loop needs to re-run itself; shared with the `loop`
/// callable of recursive loops.
struct LoopSpec {
    var_names: Vec<String>,
    condition: Option<Expr>,
    body: Stmt,
    else_body: Option<Stmt>,
}

fn render_loop(
    out: &mut String,
    env: &Environment,
    spec: &Rc<LoopSpec>,
    items: Value,
    recursive: bool,
) -> Result<LoopControl, Error> {
    let raw = if items.is_null() {
        Vec::new()
    } else {
        items.iter_items()?
    };

    // The filter condition sees the loop targets, but in a scratch scope
    // so nothing leaks into the surrounding environment.
    let mut filtered = Vec::with_capacity(raw.len());
    for item in raw {
        if let Some(condition) = &spec.condition {
            let scratch = env.child();
            destructure(&spec.var_names, &scratch, item.clone())?;
            if !condition.evaluate(&scratch)?.truthy() {
                continue;
            }
        }
        filtered.push(item);
    }

    if filtered.is_empty() {
        if let Some(else_body) = &spec.else_body {
            return else_body.render(out, env);
        }
        return Ok(LoopControl::Normal);
    }

    // `loop` is a plain object, or a callable re-entering the loop body
    // when the loop is recursive.
    let loop_val = if recursive {
        let spec = spec.clone();
        Value::callable(
            "loop",
            Rc::new(move |env: &Environment, mut args: ArgPack| {
                if args.positional.len() != 1 || !args.named.is_empty() {
                    return Err(arity_error("loop() expects exactly one iterable argument"));
                }
                let items = args.positional.remove(0);
                let mut buf = String::new();
                render_loop(&mut buf, env, &spec, items, true)?;
                Ok(Value::Str(buf))
            }),
        )
    } else {
        Value::object(ValueMap::new())
    };

    let n = filtered.len();
    let cycle_index = Rc::new(Cell::new(0usize));
    {
        let cycle_index = cycle_index.clone();
        loop_val.set_item(
            "cycle",
            Value::callable(
                "cycle",
                Rc::new(move |_env: &Environment, args: ArgPack| {
                    if args.positional.is_empty() || !args.named.is_empty() {
                        return Err(arity_error(
                            "cycle() expects at least one positional argument",
                        ));
                    }
                    let i = cycle_index.get();
                    cycle_index.set(i + 1);
                    Ok(args.positional[i % args.positional.len()].clone())
                }),
            ),
        )?;
    }
    loop_val.set_item("length", Value::Int(n as i64))?;

    let loop_env = env.child();
    loop_env.set("loop", loop_val.clone());

    for i in 0..n {
        destructure(&spec.var_names, &loop_env, filtered[i].clone())?;
        loop_val.set_item("index", Value::Int(i as i64 + 1))?;
        loop_val.set_item("index0", Value::Int(i as i64))?;
        loop_val.set_item("revindex", Value::Int((n - i) as i64))?;
        loop_val.set_item("revindex0", Value::Int((n - i - 1) as i64))?;
        loop_val.set_item("first", Value::Bool(i == 0))?;
        loop_val.set_item("last", Value::Bool(i == n - 1))?;
        loop_val.set_item(
            "previtem",
            if i > 0 {
                filtered[i - 1].clone()
            } else {
                Value::Null
            },
        )?;
        loop_val.set_item(
            "nextitem",
            if i + 1 < n {
                filtered[i + 1].clone()
            } else {
                Value::Null
            },
        )?;

        match spec.body.render(out, &loop_env)? {
            LoopControl::Break => break,
            LoopControl::Continue | LoopControl::Normal => {}
        }
    }
    Ok(LoopControl::Normal)
}

/// Build the callable registered by `{% macro %}`.
///
/// Calls bind into a fresh child of the *definition-site* environment, so
/// assignments inside the body never leak into the caller, and defaults
/// are evaluated in the definition environment.
fn make_macro(
    name: &str,
    params: &[(String, Option<Expr>)],
    body: &Stmt,
    def_env: &Environment,
) -> Value {
    let macro_name = name.to_string();
    let params: Vec<(String, Option<Expr>)> = params.to_vec();
    let body = Rc::new(body.clone());
    let def_env = def_env.clone();

    Value::callable(
        name,
        Rc::new(move |_caller_env: &Environment, args: ArgPack| {
            let call_env = def_env.child();
            let mut bound = vec![false; params.len()];

            for (i, value) in args.positional.iter().enumerate() {
                if i >= params.len() {
                    return Err(arity_error(format!(
                        "too many positional arguments for macro {}",
                        macro_name
                    )));
                }
                call_env.set(&params[i].0, value.clone());
                bound[i] = true;
            }
            for (key, value) in &args.named {
                let position = params
                    .iter()
                    .position(|(p, _)| p == key)
                    .ok_or_else(|| {
                        arity_error(format!(
                            "unknown parameter '{}' for macro {}",
                            key, macro_name
                        ))
                    })?;
                call_env.set(key, value.clone());
                bound[position] = true;
            }
            for (i, (param, default)) in params.iter().enumerate() {
                if bound[i] {
                    continue;
                }
                let value = match default {
                    Some(expr) => expr.evaluate(&def_env)?,
                    None => Value::Null,
                };
                call_env.set(param, value);
            }

            let mut buf = String::new();
            body.render(&mut buf, &call_env)?;
            Ok(Value::Str(buf))
        }),
    )
}
