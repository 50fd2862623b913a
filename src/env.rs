use std::cell::RefCell;
use std::rc::Rc;

use crate::builtins;
use crate::error::{type_error, Error};
use crate::value::{Value, ValueMap};

/// A lexically-scoped binding frame.
///
/// Environments form a cactus stack: each frame holds its own bindings and
/// an optional parent handle. Lookup walks toward the root; assignment
/// always writes into the frontmost frame. The root frame holds the
/// builtins and is shared, frozen, and rebuilt at most once per thread.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<Frame>,
}

struct Frame {
    bindings: RefCell<ValueMap>,
    parent: Option<Environment>,
}

thread_local! {
    static BUILTINS: Environment = Environment::root(builtins::bindings());
}

impl Environment {
    fn root(bindings: ValueMap) -> Self {
        Environment {
            inner: Rc::new(Frame {
                bindings: RefCell::new(bindings),
                parent: None,
            }),
        }
    }

    /// The shared builtins frame for this thread.
    pub fn builtins() -> Self {
        BUILTINS.with(|env| env.clone())
    }

    /// A fresh child frame of `self`.
    pub fn child(&self) -> Self {
        Environment {
            inner: Rc::new(Frame {
                bindings: RefCell::new(ValueMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// A fresh child of the builtins holding the caller's context.
    /// The context must be an Object or Null (treated as empty).
    pub fn with_context(context: Value) -> Result<Self, Error> {
        let env = Self::builtins().child();
        match context {
            Value::Null => {}
            Value::Object(map) => {
                for (k, v) in map.borrow().iter() {
                    env.set(k, v.clone());
                }
            }
            other => {
                return Err(type_error(format!(
                    "render context must be an object or null, got {}",
                    other.type_name()
                )))
            }
        }
        Ok(env)
    }

    /// Look `name` up, walking parent frames. Absent names are `None`;
    /// the evaluator maps that to Null so `is defined` can observe it.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(v) = env.inner.bindings.borrow().get(name) {
                return Some(v.clone());
            }
            frame = env.inner.parent.as_ref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind `name` in the frontmost frame.
    pub fn set(&self, name: &str, value: Value) {
        self.inner
            .bindings
            .borrow_mut()
            .insert(name.to_string(), value);
    }
}
