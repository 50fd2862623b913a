//! A Jinja2-subset template engine for rendering LLM chat prompts.
//!
//! ```
//! use tenja::{render, Options, Value};
//!
//! let context = Value::object(
//!     [("name".to_string(), Value::from("World"))].into_iter().collect(),
//! );
//! let out = render("Hello, {{ name }}!", context, Options::default()).unwrap();
//! assert_eq!(out, "Hello, World!");
//! ```

pub mod ast;
pub mod builtins;
pub mod compiled;
pub mod env;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod value;

pub use ast::{LoopControl, Stmt};
pub use env::Environment;
pub use error::{Error, ErrorKind, Location};
pub use value::{ArgPack, Value, ValueMap};

/// Parse-time switches mirroring Jinja2's whitespace options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Drop one newline after a block tag's closing `%}`
    pub trim_blocks: bool,
    /// Trim leading whitespace on the line of a block tag
    pub lstrip_blocks: bool,
    /// Retain a single final newline in the output
    pub keep_trailing_newline: bool,
}

/// A parsed template, ready to render against any context.
///
/// The tree is immutable after parsing; each render gets a fresh child
/// environment of the shared builtins.
#[derive(Debug)]
pub struct Template {
    pub(crate) root: Stmt,
}

impl Template {
    /// Render with the given context, which must be an Object (its keys
    /// shadow builtins) or Null.
    pub fn render(&self, context: Value) -> Result<String, Error> {
        let env = Environment::with_context(context)?;
        let mut out = String::new();
        // Loop controls outside any loop are absorbed here.
        self.root.render(&mut out, &env)?;
        Ok(out)
    }

    pub fn root(&self) -> &Stmt {
        &self.root
    }
}

/// Parse a template source.
pub fn parse(source: &str, options: Options) -> Result<Template, Error> {
    Ok(Template {
        root: parser::parse(source, options)?,
    })
}

/// Parse and render in one step.
pub fn render(source: &str, context: Value, options: Options) -> Result<String, Error> {
    parse(source, options)?.render(context)
}
