use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::env::Environment;
use crate::error::{type_error, value_error, Error};
use crate::output;

/// Insertion-ordered string-keyed map backing `Value::Object`.
pub type ValueMap = IndexMap<String, Value>;

/// Signature of everything callable from a template: builtins, macros,
/// `loop` in recursive loops, `joiner` instances.
pub type CallFn = dyn Fn(&Environment, ArgPack) -> Result<Value, Error>;

/// A dynamically-typed value with Python-like semantics.
///
/// Scalars copy on clone; `Array` and `Object` clone the *handle*, so two
/// bindings to the same container observe each other's mutations:
///
/// ```
/// use tenja::{render, Options, Value};
///
/// let out = render(
///     "{% set a = [] %}{% set b = a %}{{ a.append(1) or '' }}{{ b | length }}",
///     Value::Null,
///     Options::default(),
/// ).unwrap();
/// assert_eq!(out, "1");
/// ```
#[derive(Clone)]
pub enum Value {
    /// Python `None`; renders as the empty string
    Null,

    /// Renders as `True`/`False`
    Bool(bool),

    /// Signed 64-bit integer (kept distinct from floats)
    Int(i64),

    /// IEEE-754 double
    Float(f64),

    /// UTF-8 string; iteration yields one-character strings
    Str(String),

    /// Shared ordered sequence
    Array(Rc<RefCell<Vec<Value>>>),

    /// Shared insertion-ordered mapping
    Object(Rc<RefCell<ValueMap>>),

    /// Native function, macro, or other invocable; compares by identity
    Callable(Callable),
}

/// An invocable value.
///
/// Callables carry an attribute map alongside the function so that a value
/// can be both called and field-accessed. The `loop` binding of a
/// `{% for … recursive %}` loop is the motivating case: `loop.index` reads
/// an attribute while `loop(children)` invokes the function.
#[derive(Clone)]
pub struct Callable {
    pub name: String,
    pub func: Rc<CallFn>,
    pub attrs: Rc<RefCell<ValueMap>>,
}

impl Callable {
    pub fn new(name: impl Into<String>, func: Rc<CallFn>) -> Self {
        Callable {
            name: name.into(),
            func,
            attrs: Rc::new(RefCell::new(ValueMap::new())),
        }
    }

    pub fn call(&self, env: &Environment, args: ArgPack) -> Result<Value, Error> {
        (self.func)(env, args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {}>", self.name)
    }
}

/// Evaluated arguments of a call: positionals in order, then named pairs
/// in caller order. `*seq` splices into `positional`, `**obj` into `named`.
#[derive(Debug, Clone, Default)]
pub struct ArgPack {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

impl ArgPack {
    pub fn positional(values: Vec<Value>) -> Self {
        ArgPack {
            positional: values,
            named: Vec::new(),
        }
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.named.iter().any(|(n, _)| n == name)
    }

    pub fn get_named(&self, name: &str) -> Option<Value> {
        self.named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

/// Hashable identity of a primitive value, used for template-level set
/// membership (`unique`) and dict keys. Follows Python in treating `1`,
/// `1.0` and `True` as the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Null,
    Int(i64),
    FloatBits(u64),
    Str(String),
}

impl Value {
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn object(map: ValueMap) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn callable(name: impl Into<String>, func: Rc<CallFn>) -> Self {
        Value::Callable(Callable::new(name, func))
    }

    /// Human-readable variant name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Callable(_) => "callable",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Array(_) | Value::Object(_))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    /// Python truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Object(o) => !o.borrow().is_empty(),
            Value::Callable(_) => true,
        }
    }

    /// Length of a string (in characters), array, or object.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.borrow().len()),
            Value::Object(o) => Some(o.borrow().len()),
            _ => None,
        }
    }

    /// Coerce to integer (the `int()` builtin and slice indices).
    pub fn to_int(&self) -> Result<i64, Error> {
        match self {
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(n) => Ok(*n),
            Value::Float(n) => Ok(*n as i64),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| value_error(format!("invalid literal for int: {:?}", s))),
            other => Err(type_error(format!(
                "cannot convert {} to integer",
                other.type_name()
            ))),
        }
    }

    pub fn to_float(&self) -> Result<f64, Error> {
        match self {
            Value::Bool(b) => Ok(*b as i64 as f64),
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            other => Err(type_error(format!(
                "cannot convert {} to float",
                other.type_name()
            ))),
        }
    }

    /// Python `str()` form. Unlike template emission, Null becomes `None`
    /// here (this is what `~` concatenation and the `string` builtin see).
    pub fn to_str(&self) -> String {
        output::to_display(self)
    }

    /// Hash key for set membership; fails for containers and callables.
    pub fn hash_key(&self) -> Result<HashKey, Error> {
        match self {
            Value::Null => Ok(HashKey::Null),
            Value::Bool(b) => Ok(HashKey::Int(*b as i64)),
            Value::Int(n) => Ok(HashKey::Int(*n)),
            Value::Float(n) => {
                if n.fract() == 0.0
                    && n.is_finite()
                    && *n >= i64::MIN as f64
                    && *n <= i64::MAX as f64
                {
                    Ok(HashKey::Int(*n as i64))
                } else {
                    Ok(HashKey::FloatBits(n.to_bits()))
                }
            }
            Value::Str(s) => Ok(HashKey::Str(s.clone())),
            other => Err(type_error(format!(
                "unhashable type: {}",
                other.type_name()
            ))),
        }
    }

    /// Forgiving item lookup: missing keys and out-of-range indices yield
    /// `None` rather than an error, which is what subscripts on optional
    /// chat fields rely on.
    pub fn get_item(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Array(items) => {
                let items = items.borrow();
                let idx = normalize_index(key.as_int()?, items.len())?;
                items.get(idx).cloned()
            }
            Value::Object(map) => match key {
                Value::Str(k) => map.borrow().get(k).cloned(),
                _ => None,
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = normalize_index(key.as_int()?, chars.len())?;
                chars.get(idx).map(|c| Value::Str(c.to_string()))
            }
            Value::Callable(c) => match key {
                Value::Str(k) => c.attrs.borrow().get(k).cloned(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Write a key into an object (or callable attribute map).
    pub fn set_item(&self, key: &str, value: Value) -> Result<(), Error> {
        match self {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Callable(c) => {
                c.attrs.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            other => Err(type_error(format!(
                "cannot set field {:?} on {}",
                key,
                other.type_name()
            ))),
        }
    }

    /// Raw integer view without string coercion (used by subscripts).
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// The items produced by `for x in value`: array elements, object
    /// keys, or one-character strings.
    pub fn iter_items(&self) -> Result<Vec<Value>, Error> {
        match self {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::Object(map) => {
                Ok(map.borrow().keys().map(|k| Value::Str(k.clone())).collect())
            }
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => Err(type_error(format!(
                "{} is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Membership test backing `in`. String haystacks require a string
    /// needle, per Python.
    pub fn contains(&self, needle: &Value) -> Result<bool, Error> {
        match self {
            Value::Array(items) => Ok(items.borrow().iter().any(|v| v == needle)),
            Value::Object(map) => match needle {
                Value::Str(k) => Ok(map.borrow().contains_key(k)),
                v if v.is_primitive() => Ok(map.borrow().contains_key(&v.to_str())),
                other => Err(type_error(format!(
                    "object keys are strings, got {}",
                    other.type_name()
                ))),
            },
            Value::Str(haystack) => match needle {
                Value::Str(sub) => Ok(haystack.contains(sub.as_str())),
                other => Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            other => Err(type_error(format!(
                "argument of type {} is not a container",
                other.type_name()
            ))),
        }
    }
}

/// Python index normalization: negatives count from the end; anything
/// still out of range is `None`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let idx = if index < 0 { index + len as i64 } else { index };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

// ---------------------------------------------------------------------------
// Operators

impl Value {
    pub fn add(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Array(a), Value::Array(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                Ok(Value::array(out))
            }
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (a, b) if a.is_number() && b.is_number() => {
                Ok(Value::Float(a.to_float()? + b.to_float()?))
            }
            (a, b) if a.is_string() || b.is_string() => {
                Ok(Value::Str(format!("{}{}", a.to_str(), b.to_str())))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for +: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            (a, b) if a.is_number() && b.is_number() => {
                Ok(Value::Float(a.to_float()? - b.to_float()?))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for -: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                Ok(Value::Str(s.repeat((*n).max(0) as usize)))
            }
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            (a, b) if a.is_number() && b.is_number() => {
                Ok(Value::Float(a.to_float()? * b.to_float()?))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for *: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// True division: always a float.
    pub fn div(&self, rhs: &Value) -> Result<Value, Error> {
        if !self.is_number() || !rhs.is_number() {
            return Err(type_error(format!(
                "unsupported operands for /: {} and {}",
                self.type_name(),
                rhs.type_name()
            )));
        }
        let d = rhs.to_float()?;
        if d == 0.0 {
            return Err(value_error("division by zero"));
        }
        Ok(Value::Float(self.to_float()? / d))
    }

    /// Floor division, Python rounding (toward negative infinity).
    pub fn floordiv(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(value_error("integer division by zero"));
                }
                let q = a / b;
                let floored = if a % b != 0 && (a < &0) != (b < &0) {
                    q - 1
                } else {
                    q
                };
                Ok(Value::Int(floored))
            }
            (a, b) if a.is_number() && b.is_number() => {
                let d = b.to_float()?;
                if d == 0.0 {
                    return Err(value_error("float floor division by zero"));
                }
                Ok(Value::Float((a.to_float()? / d).floor()))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for //: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Python modulo: integer-only, result carries the divisor's sign.
    pub fn modulo(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(value_error("integer modulo by zero"));
                }
                let r = a % b;
                let wrapped = if r != 0 && (r < 0) != (b < &0) { r + b } else { r };
                Ok(Value::Int(wrapped))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for %: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Exponentiation; stays integer for int base and non-negative int
    /// exponent, falling back to float on overflow.
    pub fn pow(&self, rhs: &Value) -> Result<Value, Error> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => {
                match u32::try_from(*b).ok().and_then(|e| a.checked_pow(e)) {
                    Some(n) => Ok(Value::Int(n)),
                    None => Ok(Value::Float((*a as f64).powf(*b as f64))),
                }
            }
            (a, b) if a.is_number() && b.is_number() => {
                Ok(Value::Float(a.to_float()?.powf(b.to_float()?)))
            }
            (a, b) => Err(type_error(format!(
                "unsupported operands for **: {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    pub fn neg(&self) -> Result<Value, Error> {
        match self {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(n) => Ok(Value::Float(-n)),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            other => Err(type_error(format!(
                "bad operand type for unary -: {}",
                other.type_name()
            ))),
        }
    }

    /// Ordering comparison for `<`/`>`/`<=`/`>=`: numbers compare
    /// numerically, strings byte-lexicographically, everything else is an
    /// error.
    pub fn compare(&self, rhs: &Value) -> Result<std::cmp::Ordering, Error> {
        use std::cmp::Ordering;
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.to_float()?, b.to_float()?);
                Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (a, b) => Err(type_error(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
            }
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", output::to_repr(self))
    }
}

// ---------------------------------------------------------------------------
// Conversions at the crate boundary

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl TryFrom<&Value> for serde_json::Value {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self, Error> {
        Ok(match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(serde_json::Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.borrow()
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), serde_json::Value::try_from(v)?)))
                    .collect::<Result<_, Error>>()?,
            ),
            Value::Callable(c) => {
                return Err(type_error(format!("cannot serialize callable {}", c.name)))
            }
        })
    }
}
