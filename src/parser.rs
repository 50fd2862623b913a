use std::rc::Rc;

use crate::ast::{
    BinaryOp, CallArgs, Expr, ExprKind, LoopControl, SpaceHandling, Stmt, StmtKind, TemplateToken,
    TokenKind, UnaryOp,
};
use crate::error::{Error, ErrorKind, Location};
use crate::lexer::{Cursor, Lexer};
use crate::value::Value;
use crate::Options;

/// Parse a template source into its statement tree.
///
/// Newlines are normalized (CRLF becomes LF), the lexer produces the
/// token stream, and block assembly nests bodies while applying the
/// whitespace rules selected by `options`.
pub fn parse(source: &str, options: Options) -> Result<Stmt, Error> {
    let shared = Rc::new(source.replace("\r\n", "\n"));
    let tokens = Lexer::new(shared.clone()).tokenize()?;
    Assembler {
        tokens,
        pos: 0,
        options,
        source: shared,
    }
    .assemble()
}

fn parse_error(message: impl Into<String>, location: Location) -> Error {
    Error::at(ErrorKind::Parse, message, location)
}

// ---------------------------------------------------------------------------
// Expression grammar
//
// Loosest to tightest:
//
//   expr    := or [ 'if' or 'else' expr ]
//   or      := and ( 'or' and )*
//   and     := not ( 'and' not )*
//   not     := 'not' not | cmp
//   cmp     := concat ( op rhs )*          op ∈ == != < > <= >= in  not-in
//            | concat 'is' ['not'] ident
//   concat  := addsub ( '~' addsub )*
//   addsub  := muldiv ( ('+'|'-') muldiv )*
//   muldiv  := pow ( ('*'|'/'|'//'|'%') pow | '|' pow )*
//   pow     := unary ( '**' pow )?
//   unary   := ('+'|'-')? expansion
//   expansion := ('*'|'**')? primary
//   primary := atom ( '.' ident (args)? | '[' subscript ']' | args )*

/// Recursive-descent expression parser over a shared [`Cursor`].
///
/// The lexer drives it: every `{{ }}` body and `{% %}` head is handed
/// here, and the parser leaves the cursor just before the closing
/// delimiter.
pub struct ExprParser<'c> {
    cursor: &'c mut Cursor,
}

/// Names that can never be variables (they are operator keywords).
const RESERVED: &[&str] = &["not", "is", "and", "or", "del"];

impl<'c> ExprParser<'c> {
    pub fn new(cursor: &'c mut Cursor) -> Self {
        ExprParser { cursor }
    }

    fn here(&self) -> Location {
        self.cursor.location()
    }

    pub fn parse_expression(&mut self, allow_if: bool) -> Result<Expr, Error> {
        let then = self.parse_or()?;
        if !allow_if || !self.cursor.eat_keyword("if") {
            return Ok(then);
        }
        let location = then.location.clone();
        let condition = self.parse_or()?;
        let otherwise = if self.cursor.eat_keyword("else") {
            Some(Box::new(self.parse_expression(true)?))
        } else {
            None
        };
        Ok(Expr::new(
            location,
            ExprKind::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise,
            },
        ))
    }

    fn parse_or(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_and()?;
        while self.cursor.eat_keyword("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_not()?;
        while self.cursor.eat_keyword("and") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, Error> {
        if self.cursor.eat_keyword("not") {
            let location = self.here();
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                location,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            ));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_concat()?;
        loop {
            if self.cursor.eat_keyword("is") {
                let negated = self.cursor.eat_keyword("not");
                let location = self.here();
                let name = self
                    .cursor
                    .eat_ident()
                    .ok_or_else(|| parse_error("expected test name after 'is'", self.here()))?;
                let op = if negated { BinaryOp::IsNot } else { BinaryOp::Is };
                let right = Expr::new(location, ExprKind::Variable(name));
                return Ok(binary(op, left, right));
            }

            let op = if self.cursor.eat_symbol("==") {
                BinaryOp::Eq
            } else if self.cursor.eat_symbol("!=") {
                BinaryOp::Ne
            } else if self.cursor.eat_symbol("<=") {
                BinaryOp::Le
            } else if self.cursor.eat_symbol(">=") {
                BinaryOp::Ge
            } else if self.cursor.eat_symbol("<") {
                BinaryOp::Lt
            } else if self.cursor.eat_symbol(">") {
                BinaryOp::Gt
            } else if self.cursor.eat_keyword("in") {
                BinaryOp::In
            } else {
                let mark = self.cursor.save();
                if self.cursor.eat_keyword("not") && self.cursor.eat_keyword("in") {
                    BinaryOp::NotIn
                } else {
                    self.cursor.restore(mark);
                    return Ok(left);
                }
            };
            let right = self.parse_concat()?;
            left = binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_addsub()?;
        while self.eat_tilde() {
            let right = self.parse_addsub()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    /// `~` is string concatenation unless it belongs to a closing `~}}`.
    fn eat_tilde(&mut self) -> bool {
        let mark = self.cursor.save();
        self.cursor.skip_whitespace();
        if self.cursor.peek() == Some('~') && self.cursor.peek2() != Some('}') {
            self.cursor.bump();
            true
        } else {
            self.cursor.restore(mark);
            false
        }
    }

    /// `-` is an operator unless it is the strip marker of a closing
    /// `-}}`, `-%}`, or `-#}`.
    fn eat_minus(&mut self) -> bool {
        let mark = self.cursor.save();
        self.cursor.skip_whitespace();
        if self.cursor.peek() == Some('-') {
            self.cursor.bump();
            if self.cursor.starts_with("}}")
                || self.cursor.starts_with("%}")
                || self.cursor.starts_with("#}")
            {
                self.cursor.restore(mark);
                return false;
            }
            return true;
        }
        self.cursor.restore(mark);
        false
    }

    fn parse_addsub(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_muldiv()?;
        loop {
            let op = if self.cursor.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_minus() {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_muldiv()?;
            left = binary(op, left, right);
        }
    }

    fn parse_muldiv(&mut self) -> Result<Expr, Error> {
        let mut left = self.parse_pow()?;
        loop {
            if self.cursor.eat_symbol("//") {
                let right = self.parse_pow()?;
                left = binary(BinaryOp::FloorDiv, left, right);
            } else if self.eat_single('*', '*') {
                let right = self.parse_pow()?;
                left = binary(BinaryOp::Mul, left, right);
            } else if self.eat_single('/', '/') {
                let right = self.parse_pow()?;
                left = binary(BinaryOp::Div, left, right);
            } else if self.eat_single('%', '}') {
                let right = self.parse_pow()?;
                left = binary(BinaryOp::Mod, left, right);
            } else if self.cursor.eat_symbol("|") {
                let right = self.parse_pow()?;
                left = match left.kind {
                    ExprKind::FilterChain(mut parts) => {
                        parts.push(right);
                        Expr::new(left.location, ExprKind::FilterChain(parts))
                    }
                    _ => {
                        let location = left.location.clone();
                        Expr::new(location, ExprKind::FilterChain(vec![left, right]))
                    }
                };
            } else {
                return Ok(left);
            }
        }
    }

    /// Consume `symbol` only when it is not immediately followed by
    /// `excluded` (distinguishing `*` from `**`, `/` from `//`, and `%`
    /// from `%}`).
    fn eat_single(&mut self, symbol: char, excluded: char) -> bool {
        let mark = self.cursor.save();
        self.cursor.skip_whitespace();
        if self.cursor.peek() == Some(symbol) && self.cursor.peek2() != Some(excluded) {
            self.cursor.bump();
            true
        } else {
            self.cursor.restore(mark);
            false
        }
    }

    fn parse_pow(&mut self) -> Result<Expr, Error> {
        let left = self.parse_unary()?;
        if self.cursor.eat_symbol("**") {
            let right = self.parse_pow()?;
            return Ok(binary(BinaryOp::Pow, left, right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        let location = self.here();
        let op = if self.cursor.eat_symbol("+") {
            Some(UnaryOp::Plus)
        } else if self.eat_minus() {
            Some(UnaryOp::Neg)
        } else {
            None
        };
        let operand = self.parse_expansion()?;
        match op {
            Some(op) => Ok(Expr::new(
                location,
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            )),
            None => Ok(operand),
        }
    }

    fn parse_expansion(&mut self) -> Result<Expr, Error> {
        let location = self.here();
        let op = if self.cursor.eat_symbol("**") {
            Some(UnaryOp::ExpandDict)
        } else if self.eat_single('*', '*') {
            Some(UnaryOp::Expand)
        } else {
            None
        };
        let operand = self.parse_primary()?;
        match op {
            Some(op) => Ok(Expr::new(
                location,
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            )),
            None => Ok(operand),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let mut value = self.parse_atom()?;
        loop {
            if self.cursor.eat_symbol("[") {
                let index = self.parse_subscript_or_slice()?;
                if !self.cursor.eat_symbol("]") {
                    return Err(parse_error(
                        "expected closing bracket in subscript",
                        self.here(),
                    ));
                }
                let location = value.location.clone();
                value = Expr::new(
                    location,
                    ExprKind::Subscript {
                        base: Box::new(value),
                        index: Box::new(index),
                    },
                );
            } else if self.cursor.eat_symbol(".") {
                let location = self.here();
                let name = self
                    .cursor
                    .eat_ident()
                    .ok_or_else(|| parse_error("expected identifier after '.'", self.here()))?;
                if self.peek_symbol("(") {
                    let args = self.parse_call_args()?;
                    value = Expr::new(
                        location,
                        ExprKind::MethodCall {
                            object: Box::new(value),
                            method: name,
                            args,
                        },
                    );
                } else {
                    let key = Expr::new(location.clone(), ExprKind::Literal(Value::Str(name)));
                    value = Expr::new(
                        location,
                        ExprKind::Subscript {
                            base: Box::new(value),
                            index: Box::new(key),
                        },
                    );
                }
            } else if self.peek_symbol("(") {
                let location = value.location.clone();
                let args = self.parse_call_args()?;
                value = Expr::new(
                    location,
                    ExprKind::Call {
                        callee: Box::new(value),
                        args,
                    },
                );
            } else {
                return Ok(value);
            }
        }
    }

    fn peek_symbol(&mut self, s: &str) -> bool {
        let mark = self.cursor.save();
        self.cursor.skip_whitespace();
        let found = self.cursor.starts_with(s);
        self.cursor.restore(mark);
        found
    }

    fn parse_subscript_or_slice(&mut self) -> Result<Expr, Error> {
        let location = self.here();
        let start = if self.peek_symbol(":") {
            None
        } else {
            Some(Box::new(self.parse_expression(true)?))
        };
        if !self.cursor.eat_symbol(":") {
            return match start {
                Some(index) => Ok(*index),
                None => Err(parse_error("empty index in subscript", location)),
            };
        }
        let end = if self.peek_symbol(":") || self.peek_symbol("]") {
            None
        } else {
            Some(Box::new(self.parse_expression(true)?))
        };
        let step = if self.cursor.eat_symbol(":") && !self.peek_symbol("]") {
            Some(Box::new(self.parse_expression(true)?))
        } else {
            None
        };
        if let Some(step_expr) = &step {
            if let Some(k) = const_int(step_expr) {
                if k != 1 && k != -1 {
                    return Err(parse_error("slice step must be 1 or -1", location));
                }
            }
        }
        Ok(Expr::new(location, ExprKind::Slice { start, end, step }))
    }

    fn parse_atom(&mut self) -> Result<Expr, Error> {
        self.cursor.skip_whitespace();
        let location = self.here();

        match self.cursor.peek() {
            Some('\'') | Some('"') => {
                let text = self.parse_string_literal()?;
                return Ok(Expr::new(location, ExprKind::Literal(Value::Str(text))));
            }
            Some(c) if c.is_ascii_digit() => {
                let number = self.parse_number()?;
                return Ok(Expr::new(location, ExprKind::Literal(number)));
            }
            Some('(') => {
                self.cursor.bump();
                return self.parse_tuple_or_group(location);
            }
            Some('[') => {
                self.cursor.bump();
                return self.parse_array_literal(location);
            }
            Some('{') => {
                self.cursor.bump();
                return self.parse_dict_literal(location);
            }
            _ => {}
        }

        for word in ["true", "True"] {
            if self.cursor.eat_keyword(word) {
                return Ok(Expr::new(location, ExprKind::Literal(Value::Bool(true))));
            }
        }
        for word in ["false", "False"] {
            if self.cursor.eat_keyword(word) {
                return Ok(Expr::new(location, ExprKind::Literal(Value::Bool(false))));
            }
        }
        for word in ["none", "None", "null"] {
            if self.cursor.eat_keyword(word) {
                return Ok(Expr::new(location, ExprKind::Literal(Value::Null)));
            }
        }

        let mark = self.cursor.save();
        if let Some(name) = self.cursor.eat_ident() {
            if RESERVED.contains(&name.as_str()) {
                self.cursor.restore(mark);
            } else {
                return Ok(Expr::new(location, ExprKind::Variable(name)));
            }
        }

        Err(parse_error("expected value expression", location))
    }

    /// `( expr )` drops the parentheses; `( expr, … )` lowers to an
    /// array literal.
    fn parse_tuple_or_group(&mut self, location: Location) -> Result<Expr, Error> {
        let first = self.parse_expression(true)?;
        if self.cursor.eat_symbol(")") {
            return Ok(first);
        }
        let mut elements = vec![first];
        loop {
            if !self.cursor.eat_symbol(",") {
                return Err(parse_error("expected comma in tuple", self.here()));
            }
            elements.push(self.parse_expression(true)?);
            if self.cursor.eat_symbol(")") {
                return Ok(Expr::new(location, ExprKind::Array(elements)));
            }
        }
    }

    fn parse_array_literal(&mut self, location: Location) -> Result<Expr, Error> {
        let mut elements = Vec::new();
        if self.cursor.eat_symbol("]") {
            return Ok(Expr::new(location, ExprKind::Array(elements)));
        }
        loop {
            elements.push(self.parse_expression(true)?);
            if self.cursor.eat_symbol(",") {
                continue;
            }
            if self.cursor.eat_symbol("]") {
                return Ok(Expr::new(location, ExprKind::Array(elements)));
            }
            return Err(parse_error(
                "expected comma or closing bracket in array",
                self.here(),
            ));
        }
    }

    fn parse_dict_literal(&mut self, location: Location) -> Result<Expr, Error> {
        let mut entries = Vec::new();
        if self.cursor.eat_symbol("}") {
            return Ok(Expr::new(location, ExprKind::Dict(entries)));
        }
        loop {
            let key = self.parse_expression(true)?;
            if !self.cursor.eat_symbol(":") {
                return Err(parse_error(
                    "expected colon between key and value in dictionary",
                    self.here(),
                ));
            }
            let value = self.parse_expression(true)?;
            entries.push((key, value));
            if self.cursor.eat_symbol(",") {
                continue;
            }
            if self.cursor.eat_symbol("}") {
                return Ok(Expr::new(location, ExprKind::Dict(entries)));
            }
            return Err(parse_error(
                "expected comma or closing brace in dictionary",
                self.here(),
            ));
        }
    }

    /// Call-site arguments: `(expr, name=expr, *seq, **obj)`.
    pub fn parse_call_args(&mut self) -> Result<CallArgs, Error> {
        if !self.cursor.eat_symbol("(") {
            return Err(parse_error(
                "expected opening parenthesis in call args",
                self.here(),
            ));
        }
        let mut args = CallArgs::default();
        loop {
            if self.cursor.eat_symbol(")") {
                return Ok(args);
            }
            let expr = self.parse_expression(true)?;
            match &expr.kind {
                ExprKind::Variable(name) if self.cursor.eat_symbol("=") => {
                    let name = name.clone();
                    let value = self.parse_expression(true)?;
                    args.named.push((name, value));
                }
                _ => args.positional.push(expr),
            }
            if self.cursor.eat_symbol(",") {
                continue;
            }
            if self.cursor.eat_symbol(")") {
                return Ok(args);
            }
            return Err(parse_error(
                "expected closing parenthesis in call args",
                self.here(),
            ));
        }
    }

    /// Macro parameter list: `(name, name=default, …)`.
    pub fn parse_parameters(&mut self) -> Result<Vec<(String, Option<Expr>)>, Error> {
        if !self.cursor.eat_symbol("(") {
            return Err(parse_error(
                "expected opening parenthesis in parameter list",
                self.here(),
            ));
        }
        let mut params = Vec::new();
        loop {
            if self.cursor.eat_symbol(")") {
                return Ok(params);
            }
            let name = self
                .cursor
                .eat_ident()
                .ok_or_else(|| parse_error("expected parameter name", self.here()))?;
            let default = if self.cursor.eat_symbol("=") {
                Some(self.parse_expression(true)?)
            } else {
                None
            };
            params.push((name, default));
            if self.cursor.eat_symbol(",") {
                continue;
            }
            if self.cursor.eat_symbol(")") {
                return Ok(params);
            }
            return Err(parse_error(
                "expected closing parenthesis in parameter list",
                self.here(),
            ));
        }
    }

    fn parse_string_literal(&mut self) -> Result<String, Error> {
        let location = self.here();
        let quote = self.cursor.bump().unwrap_or('\'');
        let mut text = String::new();
        loop {
            match self.cursor.bump() {
                None => return Err(parse_error("unterminated string literal", location)),
                Some('\\') => match self.cursor.bump() {
                    None => return Err(parse_error("unterminated string literal", location)),
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some('b') => text.push('\u{8}'),
                    Some('f') => text.push('\u{c}'),
                    Some(c) => text.push(c),
                },
                Some(c) if c == quote => return Ok(text),
                Some(c) => text.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value, Error> {
        let location = self.here();
        let start = self.cursor.save();
        let mut is_float = false;
        while self.cursor.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.cursor.bump();
        }
        if self.cursor.peek() == Some('.') && self.cursor.peek2().is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.cursor.bump();
            while self.cursor.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.cursor.bump();
            }
        }
        if matches!(self.cursor.peek(), Some('e') | Some('E')) {
            let mark = self.cursor.save();
            self.cursor.bump();
            if matches!(self.cursor.peek(), Some('+') | Some('-')) {
                self.cursor.bump();
            }
            if self.cursor.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.cursor.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.cursor.bump();
                }
            } else {
                self.cursor.restore(mark);
            }
        }
        let text = self.cursor.source()[start..self.cursor.save()].to_string();
        if is_float {
            text.parse::<f64>()
                .map(Value::Float)
                .map_err(|_| parse_error(format!("malformed number: {}", text), location))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(Value::Int(n)),
                Err(_) => text
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| parse_error(format!("malformed number: {}", text), location)),
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let location = left.location.clone();
    Expr::new(
        location,
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    )
}

/// Constant integer view of a (possibly sign-wrapped) literal, used to
/// reject unsupported slice steps at parse time.
fn const_int(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::Literal(Value::Int(n)) => Some(*n),
        ExprKind::Unary { op, operand } => match (op, &operand.kind) {
            (UnaryOp::Neg, ExprKind::Literal(Value::Int(n))) => Some(-n),
            (UnaryOp::Plus, ExprKind::Literal(Value::Int(n))) => Some(*n),
            _ => None,
        },
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Block assembly

/// Walks the token stream once, nesting block bodies and adjusting
/// whitespace on the text runs between tags.
struct Assembler {
    tokens: Vec<TemplateToken>,
    pos: usize,
    options: Options,
    source: Rc<String>,
}

impl Assembler {
    fn assemble(mut self) -> Result<Stmt, Error> {
        let children = self.parse_nodes()?;
        if let Some(token) = self.tokens.get(self.pos) {
            return Err(parse_error(
                format!("unexpected {}", token.kind.describe()),
                token.location.clone(),
            ));
        }
        Ok(self.sequence(children))
    }

    fn sequence(&self, mut children: Vec<Stmt>) -> Stmt {
        match children.len() {
            0 => Stmt::new(
                Location::new(self.source.clone(), 0),
                StmtKind::Text(String::new()),
            ),
            1 => children.remove(0),
            _ => {
                let location = children[0].location.clone();
                Stmt::new(location, StmtKind::Sequence(children))
            }
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    /// True when the current token closes an enclosing construct.
    fn at_closer(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Elif(_)
                    | TokenKind::Else
                    | TokenKind::EndIf
                    | TokenKind::EndFor
                    | TokenKind::EndSet
                    | TokenKind::EndMacro
                    | TokenKind::EndFilter
                    | TokenKind::EndGeneration
            )
        )
    }

    fn unterminated(&self, opener: &TemplateToken) -> Error {
        parse_error(
            format!("unterminated {}", opener.kind.describe()),
            opener.location.clone(),
        )
    }

    /// Consume the expected closing token or fail at the opener.
    fn expect_closer(
        &mut self,
        opener: &TemplateToken,
        matches: fn(&TokenKind) -> bool,
    ) -> Result<(), Error> {
        match self.peek_kind() {
            Some(kind) if matches(kind) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unterminated(opener)),
        }
    }

    fn parse_nodes(&mut self) -> Result<Vec<Stmt>, Error> {
        let mut children = Vec::new();
        while self.pos < self.tokens.len() && !self.at_closer() {
            let index = self.pos;
            self.pos += 1;
            let token = self.tokens[index].clone();
            let location = token.location.clone();
            let closer_token = token.clone();
            match token.kind {
                TokenKind::Text(_) => {
                    let text = self.adjusted_text(index);
                    if !text.is_empty() {
                        children.push(Stmt::new(location, StmtKind::Text(text)));
                    }
                }
                TokenKind::Comment => {}
                TokenKind::Expression(expr) => {
                    children.push(Stmt::new(location, StmtKind::EmitExpr(expr)));
                }
                TokenKind::If(condition) => {
                    let mut cascade = Vec::new();
                    let body = self.parse_nodes()?;
                    cascade.push((Some(condition), self.sequence(body)));
                    while let Some(TokenKind::Elif(_)) = self.peek_kind() {
                        let elif = self.tokens[self.pos].clone();
                        self.pos += 1;
                        let condition = match elif.kind {
                            TokenKind::Elif(c) => c,
                            _ => unreachable!(),
                        };
                        let body = self.parse_nodes()?;
                        cascade.push((Some(condition), self.sequence(body)));
                    }
                    if let Some(TokenKind::Else) = self.peek_kind() {
                        self.pos += 1;
                        let body = self.parse_nodes()?;
                        cascade.push((None, self.sequence(body)));
                    }
                    self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndIf))?;
                    children.push(Stmt::new(location, StmtKind::If { cascade }));
                }
                TokenKind::For {
                    var_names,
                    iterable,
                    condition,
                    recursive,
                } => {
                    let body = self.parse_nodes()?;
                    let body = self.sequence(body);
                    let else_body = if let Some(TokenKind::Else) = self.peek_kind() {
                        self.pos += 1;
                        let nodes = self.parse_nodes()?;
                        Some(Box::new(self.sequence(nodes)))
                    } else {
                        None
                    };
                    self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndFor))?;
                    children.push(Stmt::new(
                        location,
                        StmtKind::For {
                            var_names,
                            iterable,
                            condition,
                            body: Box::new(body),
                            else_body,
                            recursive,
                        },
                    ));
                }
                TokenKind::Set { ns, names, value } => match value {
                    Some(value) => {
                        children.push(Stmt::new(location, StmtKind::Set { ns, names, value }));
                    }
                    None => {
                        let body = self.parse_nodes()?;
                        let body = self.sequence(body);
                        self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndSet))?;
                        if ns.is_some() {
                            return Err(parse_error(
                                "namespaced set cannot take a block body",
                                location.clone(),
                            ));
                        }
                        if names.len() != 1 {
                            return Err(parse_error(
                                "block set binds exactly one name",
                                location.clone(),
                            ));
                        }
                        children.push(Stmt::new(
                            location,
                            StmtKind::SetBlock {
                                name: names.into_iter().next().unwrap(),
                                body: Box::new(body),
                            },
                        ));
                    }
                },
                TokenKind::Macro { name, params } => {
                    let body = self.parse_nodes()?;
                    let body = self.sequence(body);
                    self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndMacro))?;
                    children.push(Stmt::new(
                        location,
                        StmtKind::MacroDef {
                            name,
                            params,
                            body: Box::new(body),
                        },
                    ));
                }
                TokenKind::Filter(filter) => {
                    let body = self.parse_nodes()?;
                    let body = self.sequence(body);
                    self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndFilter))?;
                    children.push(Stmt::new(
                        location,
                        StmtKind::FilterBlock {
                            filter,
                            body: Box::new(body),
                        },
                    ));
                }
                TokenKind::Generation => {
                    // Transparent wrapper: the body is spliced in place.
                    let body = self.parse_nodes()?;
                    self.expect_closer(&closer_token, |k| matches!(k, TokenKind::EndGeneration))?;
                    children.extend(body);
                }
                TokenKind::Break => {
                    children.push(Stmt::new(location, StmtKind::LoopControl(LoopControl::Break)));
                }
                TokenKind::Continue => {
                    children.push(Stmt::new(
                        location,
                        StmtKind::LoopControl(LoopControl::Continue),
                    ));
                }
                TokenKind::Elif(_)
                | TokenKind::Else
                | TokenKind::EndIf
                | TokenKind::EndFor
                | TokenKind::EndSet
                | TokenKind::EndMacro
                | TokenKind::EndFilter
                | TokenKind::EndGeneration => unreachable!("closers are handled by at_closer"),
            }
        }
        Ok(children)
    }

    /// Apply the whitespace rules to the text token at `index`, using the
    /// markers and kinds of its neighbors.
    fn adjusted_text(&self, index: usize) -> String {
        let mut text = match &self.tokens[index].kind {
            TokenKind::Text(t) => t.clone(),
            _ => return String::new(),
        };
        let next = self.tokens.get(index + 1);
        let prev = index.checked_sub(1).and_then(|i| self.tokens.get(i));

        // Trailing side, driven by the following tag.
        let strip_trailing = next.is_some_and(|t| t.pre_space == SpaceHandling::Strip);
        if strip_trailing {
            text.truncate(text.trim_end().len());
        } else if self.options.lstrip_blocks && next.is_some_and(|t| t.kind.is_block_tag()) {
            let mut cut = text.len();
            while cut > 0 && matches!(text.as_bytes()[cut - 1], b' ' | b'\t') {
                cut -= 1;
            }
            let at_line_start =
                (cut == 0 && index == 0) || (cut > 0 && text.as_bytes()[cut - 1] == b'\n');
            if at_line_start {
                text.truncate(cut);
            }
        }

        // Leading side, driven by the preceding tag.
        if let Some(prev) = prev {
            if prev.post_space == SpaceHandling::Strip {
                text = text.trim_start().to_string();
            } else if self.options.trim_blocks
                && prev.kind.is_block_tag()
                && text.starts_with('\n')
            {
                text.remove(0);
            }
        }

        // The final text run loses its trailing newline unless asked not to.
        if index + 1 == self.tokens.len() && !self.options.keep_trailing_newline {
            if text.ends_with('\n') {
                text.pop();
                if text.ends_with('\r') {
                    text.pop();
                }
            }
        }
        text
    }
}
