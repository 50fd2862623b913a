use std::rc::Rc;

use crate::ast::{SpaceHandling, TemplateToken, TokenKind};
use crate::error::{Error, ErrorKind, Location};
use crate::parser::ExprParser;

/// Character cursor over a (newline-normalized) template source.
///
/// The cursor is shared between the lexer and the expression parser: when
/// the lexer reaches `{{` or `{%` it hands the cursor to [`ExprParser`],
/// which consumes the tag body and leaves the cursor at the closing
/// delimiter.
pub struct Cursor {
    source: Rc<String>,
    pos: usize,
}

impl Cursor {
    pub fn new(source: Rc<String>) -> Self {
        Cursor { source, pos: 0 }
    }

    pub fn source(&self) -> &Rc<String> {
        &self.source
    }

    pub fn location(&self) -> Location {
        Location::new(self.source.clone(), self.pos)
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    pub fn rest(&self) -> &str {
        &self.source[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Second character of the remaining input.
    pub fn peek2(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn save(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Consume `s` exactly at the current position.
    pub fn eat_str(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    /// Consume `s` after optional whitespace; restores the position when
    /// `s` does not follow.
    pub fn eat_symbol(&mut self, s: &str) -> bool {
        let mark = self.pos;
        self.skip_whitespace();
        if self.eat_str(s) {
            true
        } else {
            self.restore(mark);
            false
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    /// Consume a whole word after optional whitespace (the next character
    /// must not continue the identifier).
    pub fn eat_keyword(&mut self, word: &str) -> bool {
        let mark = self.pos;
        self.skip_whitespace();
        if self.eat_str(word) {
            if self.peek().is_some_and(Self::is_ident_char) {
                self.restore(mark);
                false
            } else {
                true
            }
        } else {
            self.restore(mark);
            false
        }
    }

    /// Consume an identifier (`[A-Za-z_][A-Za-z0-9_]*`) after optional
    /// whitespace.
    pub fn eat_ident(&mut self) -> Option<String> {
        let mark = self.pos;
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => {
                self.restore(mark);
                return None;
            }
        }
        let start = self.pos;
        while self.peek().is_some_and(Self::is_ident_char) {
            self.bump();
        }
        Some(self.source[start..self.pos].to_string())
    }
}

/// Segments a template into [`TemplateToken`]s.
///
/// At each position the lexer tries, in order: a `{# #}` comment, a
/// `{{ }}` expression, a `{% %}` block tag, and finally a raw text run up
/// to the next opener. Tag bodies are parsed immediately, so the produced
/// tokens carry AST fragments.
pub struct Lexer {
    cursor: Cursor,
}

impl Lexer {
    pub fn new(source: Rc<String>) -> Self {
        Lexer {
            cursor: Cursor::new(source),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<TemplateToken>, Error> {
        let mut tokens = Vec::new();
        while !self.cursor.at_end() {
            let location = self.cursor.location();
            if self.cursor.starts_with("{#") {
                tokens.push(self.lex_comment(location)?);
            } else if self.cursor.starts_with("{{") {
                tokens.push(self.lex_expression(location)?);
            } else if self.cursor.starts_with("{%") {
                tokens.push(self.lex_block(location)?);
            } else {
                tokens.push(self.lex_text(location));
            }
        }
        Ok(tokens)
    }

    /// Leading `-` strips adjacent whitespace; `+` is accepted and keeps
    /// the default behavior.
    fn marker(cursor: &mut Cursor) -> SpaceHandling {
        if cursor.eat_str("-") {
            SpaceHandling::Strip
        } else {
            cursor.eat_str("+");
            SpaceHandling::Keep
        }
    }

    fn lex_comment(&mut self, location: Location) -> Result<TemplateToken, Error> {
        self.cursor.eat_str("{#");
        let pre_space = Self::marker(&mut self.cursor);
        let content_start = self.cursor.save();
        let close = match self.cursor.rest().find("#}") {
            Some(offset) => content_start + offset,
            None => {
                return Err(Error::at(ErrorKind::Lex, "unterminated comment", location));
            }
        };
        let mut post_space = SpaceHandling::Keep;
        if close > content_start {
            match self.cursor.source()[..close].as_bytes()[close - 1] {
                b'-' => post_space = SpaceHandling::Strip,
                b'+' => {}
                _ => {}
            }
        }
        self.cursor.restore(close + 2);
        Ok(TemplateToken {
            location,
            pre_space,
            post_space,
            kind: TokenKind::Comment,
        })
    }

    fn lex_expression(&mut self, location: Location) -> Result<TemplateToken, Error> {
        self.cursor.eat_str("{{");
        let pre_space = Self::marker(&mut self.cursor);
        let expr = ExprParser::new(&mut self.cursor).parse_expression(true)?;
        let post_space = self.close_tag("}}", "expression")?;
        Ok(TemplateToken {
            location,
            pre_space,
            post_space,
            kind: TokenKind::Expression(expr),
        })
    }

    fn close_tag(&mut self, delim: &str, what: &str) -> Result<SpaceHandling, Error> {
        self.cursor.skip_whitespace();
        let post_space = Self::marker(&mut self.cursor);
        if !self.cursor.eat_str(delim) {
            return Err(Error::at(
                ErrorKind::Lex,
                format!("expected closing {} tag", what),
                self.cursor.location(),
            ));
        }
        Ok(post_space)
    }

    fn lex_block(&mut self, location: Location) -> Result<TemplateToken, Error> {
        self.cursor.eat_str("{%");
        let pre_space = Self::marker(&mut self.cursor);
        let keyword = match self.cursor.eat_ident() {
            Some(word) => word,
            None => {
                return Err(Error::at(
                    ErrorKind::Parse,
                    "expected block keyword",
                    self.cursor.location(),
                ));
            }
        };

        let kind = match keyword.as_str() {
            "if" => TokenKind::If(ExprParser::new(&mut self.cursor).parse_expression(true)?),
            "elif" => TokenKind::Elif(ExprParser::new(&mut self.cursor).parse_expression(true)?),
            "else" => TokenKind::Else,
            "endif" => TokenKind::EndIf,
            "for" => self.lex_for_head()?,
            "endfor" => TokenKind::EndFor,
            "set" => self.lex_set_head()?,
            "endset" => TokenKind::EndSet,
            "macro" => self.lex_macro_head()?,
            "endmacro" => TokenKind::EndMacro,
            "filter" => {
                TokenKind::Filter(ExprParser::new(&mut self.cursor).parse_expression(true)?)
            }
            "endfilter" => TokenKind::EndFilter,
            "generation" => TokenKind::Generation,
            "endgeneration" => TokenKind::EndGeneration,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            other => {
                return Err(Error::at(
                    ErrorKind::Parse,
                    format!("unknown block keyword: {}", other),
                    location,
                ));
            }
        };

        let post_space = self.close_tag("%}", "block")?;
        Ok(TemplateToken {
            location,
            pre_space,
            post_space,
            kind,
        })
    }

    fn lex_var_names(&mut self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        loop {
            match self.cursor.eat_ident() {
                Some(name) => names.push(name),
                None => {
                    return Err(Error::at(
                        ErrorKind::Parse,
                        "expected variable name",
                        self.cursor.location(),
                    ));
                }
            }
            if !self.cursor.eat_symbol(",") {
                return Ok(names);
            }
        }
    }

    fn lex_for_head(&mut self) -> Result<TokenKind, Error> {
        let var_names = self.lex_var_names()?;
        if !self.cursor.eat_keyword("in") {
            return Err(Error::at(
                ErrorKind::Parse,
                "expected 'in' keyword in for block",
                self.cursor.location(),
            ));
        }
        let iterable = ExprParser::new(&mut self.cursor).parse_expression(false)?;
        let condition = if self.cursor.eat_keyword("if") {
            Some(ExprParser::new(&mut self.cursor).parse_expression(true)?)
        } else {
            None
        };
        let recursive = self.cursor.eat_keyword("recursive");
        Ok(TokenKind::For {
            var_names,
            iterable,
            condition,
            recursive,
        })
    }

    fn lex_set_head(&mut self) -> Result<TokenKind, Error> {
        // Namespaced form first: `set ns.field = value`.
        let mark = self.cursor.save();
        if let Some(ns) = self.cursor.eat_ident() {
            if self.cursor.eat_symbol(".") {
                let field = match self.cursor.eat_ident() {
                    Some(field) => field,
                    None => {
                        return Err(Error::at(
                            ErrorKind::Parse,
                            "expected field name after namespace",
                            self.cursor.location(),
                        ));
                    }
                };
                if !self.cursor.eat_symbol("=") {
                    return Err(Error::at(
                        ErrorKind::Parse,
                        "expected '=' in set block",
                        self.cursor.location(),
                    ));
                }
                let value = ExprParser::new(&mut self.cursor).parse_expression(true)?;
                return Ok(TokenKind::Set {
                    ns: Some(ns),
                    names: vec![field],
                    value: Some(value),
                });
            }
        }
        self.cursor.restore(mark);

        let names = self.lex_var_names()?;
        let value = if self.cursor.eat_symbol("=") {
            Some(ExprParser::new(&mut self.cursor).parse_expression(true)?)
        } else {
            None
        };
        Ok(TokenKind::Set {
            ns: None,
            names,
            value,
        })
    }

    fn lex_macro_head(&mut self) -> Result<TokenKind, Error> {
        let name = match self.cursor.eat_ident() {
            Some(name) => name,
            None => {
                return Err(Error::at(
                    ErrorKind::Parse,
                    "expected macro name",
                    self.cursor.location(),
                ));
            }
        };
        let params = ExprParser::new(&mut self.cursor).parse_parameters()?;
        Ok(TokenKind::Macro { name, params })
    }

    fn lex_text(&mut self, location: Location) -> TemplateToken {
        let rest = self.cursor.rest();
        let end = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| rest.find(open))
            .min()
            .unwrap_or(rest.len());
        let text = rest[..end].to_string();
        self.cursor.restore(self.cursor.save() + end);
        TemplateToken {
            location,
            pre_space: SpaceHandling::Keep,
            post_space: SpaceHandling::Keep,
            kind: TokenKind::Text(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(src: &str) -> Vec<TemplateToken> {
        Lexer::new(Rc::new(src.to_string())).tokenize().unwrap()
    }

    #[test]
    fn test_plain_text_is_one_token() {
        let tokens = tokenize("hello world");
        assert_eq!(tokens.len(), 1);
        assert!(matches!(&tokens[0].kind, TokenKind::Text(t) if t == "hello world"));
    }

    #[test]
    fn test_expression_between_text() {
        let tokens = tokenize("a{{ x }}b");
        assert_eq!(tokens.len(), 3);
        assert!(matches!(&tokens[0].kind, TokenKind::Text(t) if t == "a"));
        assert!(matches!(&tokens[1].kind, TokenKind::Expression(_)));
        assert!(matches!(&tokens[2].kind, TokenKind::Text(t) if t == "b"));
    }

    #[test]
    fn test_strip_markers() {
        let tokens = tokenize("a {{- x -}} b");
        assert_eq!(tokens[1].pre_space, SpaceHandling::Strip);
        assert_eq!(tokens[1].post_space, SpaceHandling::Strip);
    }

    #[test]
    fn test_comment_is_kept_as_token() {
        let tokens = tokenize("a{# note #}b");
        assert_eq!(tokens.len(), 3);
        assert!(matches!(&tokens[1].kind, TokenKind::Comment));
    }

    #[test]
    fn test_unterminated_comment() {
        let err = Lexer::new(Rc::new("x {# nope".to_string()))
            .tokenize()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
    }

    #[test]
    fn test_block_keywords() {
        let tokens = tokenize("{% if x %}{% else %}{% endif %}");
        assert!(matches!(&tokens[0].kind, TokenKind::If(_)));
        assert!(matches!(&tokens[1].kind, TokenKind::Else));
        assert!(matches!(&tokens[2].kind, TokenKind::EndIf));
    }

    #[test]
    fn test_unknown_block_keyword() {
        let err = Lexer::new(Rc::new("{% include 'x' %}".to_string()))
            .tokenize()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.to_string().contains("include"));
    }

    #[test]
    fn test_for_head_with_condition_and_recursive() {
        let tokens = tokenize("{% for a, b in items if a recursive %}{% endfor %}");
        match &tokens[0].kind {
            TokenKind::For {
                var_names,
                condition,
                recursive,
                ..
            } => {
                assert_eq!(var_names, &["a".to_string(), "b".to_string()]);
                assert!(condition.is_some());
                assert!(*recursive);
            }
            other => panic!("expected for token, got {:?}", other.describe()),
        }
    }
}
