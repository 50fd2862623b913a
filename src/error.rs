use std::fmt;
use std::rc::Rc;

/// A position inside a template source.
///
/// Nodes keep a shared pointer to the full source so diagnostics can be
/// rendered with their surrounding lines long after parsing finished.
#[derive(Debug, Clone)]
pub struct Location {
    pub source: Rc<String>,
    pub offset: usize,
}

impl Location {
    pub fn new(source: Rc<String>, offset: usize) -> Self {
        Location { source, offset }
    }

    /// 1-based (row, column) of this location.
    pub fn row_col(&self) -> (usize, usize) {
        let upto = &self.source[..self.offset.min(self.source.len())];
        let row = upto.matches('\n').count() + 1;
        let col = match upto.rfind('\n') {
            Some(nl) => self.offset - nl,
            None => self.offset + 1,
        };
        (row, col)
    }
}

/// Classification of everything that can go wrong while parsing or
/// rendering a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unterminated comment/expression/block or an unrecognizable sequence
    Lex,
    /// Grammar mismatch, unmatched block, unknown keyword, bad literal
    Parse,
    /// A name that must resolve (filter, test, namespace target) did not
    Name,
    /// Operator or builtin applied to unsupported value variants
    Type,
    /// Wrong positional count or unknown keyword argument
    Arity,
    /// Division by zero, out-of-range index, destructuring mismatch
    Value,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Lex => "LexError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Value => "ValueError",
        }
    }
}

/// A fatal template error.
///
/// There is no in-template recovery: the first error aborts the current
/// parse or render and propagates to the caller. When a location is
/// attached, `Display` appends a three-line snippet with a caret under the
/// offending column:
///
/// ```text
/// ParseError: expected closing bracket in subscript at row 2, column 12:
/// {% for m in messages %}
/// {{ m['role] }}
///            ^
/// {% endfor %}
/// ```
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, location: Location) -> Self {
        Error {
            kind,
            message: message.into(),
            location: Some(location),
        }
    }

    /// Attach a location if the error does not already carry one.
    pub fn with_location(mut self, location: &Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        let loc = match &self.location {
            Some(loc) => loc,
            None => return Ok(()),
        };
        let (row, col) = loc.row_col();
        writeln!(f, " at row {}, column {}:", row, col)?;
        let lines: Vec<&str> = loc.source.split('\n').collect();
        if row >= 2 {
            if let Some(prev) = lines.get(row - 2) {
                writeln!(f, "{}", prev)?;
            }
        }
        writeln!(f, "{}", lines.get(row - 1).copied().unwrap_or(""))?;
        writeln!(f, "{}^", " ".repeat(col.saturating_sub(1)))?;
        if row < lines.len() {
            writeln!(f, "{}", lines[row])?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Shorthand constructors used throughout the evaluator and builtins.
pub fn type_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Type, message)
}

pub fn value_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Value, message)
}

pub fn name_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Name, message)
}

pub fn arity_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Arity, message)
}
