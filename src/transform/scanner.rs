//! Scanner and parser for the module dialect the default transformer
//! compiles: property assignments, variable bindings, calls, object and
//! function literals. Enough surface for modules, mocks and setup files.

use crate::error::{Error, Result};
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `target.property = value`, including `module.exports = value`.
    Assign {
        object: Expr,
        property: String,
        value: Expr,
        line: u32,
    },
    VarDecl {
        name: String,
        value: Expr,
        line: u32,
    },
    Return {
        value: Option<Expr>,
        line: u32,
    },
    Expression {
        value: Expr,
        line: u32,
    },
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Assign { line, .. }
            | Stmt::VarDecl { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Expression { line, .. } => *line,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function {
        params: Vec<String>,
        body: Vec<Stmt>,
    },
}

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn scan(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let Some(&c) = self.chars.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                });
                return Ok(tokens);
            };
            let kind = if c.is_ascii_digit() {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c.is_ascii_alphabetic() || c == '_' || c == '$' {
                self.ident()
            } else if "=.;,:(){}[]".contains(c) {
                self.chars.next();
                TokenKind::Punct(c)
            } else {
                return Err(Error::syntax(format!(
                    "unexpected character '{}' on line {}",
                    c, line
                )));
            };
            tokens.push(Token { kind, line });
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.chars.peek() {
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(&c) = self.chars.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.chars.next();
                            }
                        }
                        Some('*') => {
                            self.chars.next();
                            self.chars.next();
                            let mut closed = false;
                            while let Some(c) = self.chars.next() {
                                if c == '\n' {
                                    self.line += 1;
                                } else if c == '*' && self.chars.peek() == Some(&'/') {
                                    self.chars.next();
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Err(Error::syntax(format!(
                                    "unterminated comment starting near line {}",
                                    self.line
                                )));
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| Error::syntax(format!("bad number literal '{}' on line {}", text, self.line)))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind> {
        self.chars.next();
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(TokenKind::Str(text)),
                Some('\\') => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(c) => text.push(c),
                    None => break,
                },
                Some('\n') | None => break,
                Some(c) => text.push(c),
            }
        }
        Err(Error::syntax(format!(
            "unterminated string on line {}",
            self.line
        )))
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        TokenKind::Ident(text)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> TokenKind {
        let token = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if *self.peek() == TokenKind::Punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(Error::syntax(format!(
                "expected '{}' on line {}, found {:?}",
                c,
                self.line(),
                self.peek()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => Err(Error::syntax(format!(
                "expected identifier on line {}, found {:?}",
                self.line(),
                other
            ))),
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        while *self.peek() != TokenKind::Eof {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct('{')?;
        let mut statements = Vec::new();
        while !self.eat_punct('}') {
            if *self.peek() == TokenKind::Eof {
                return Err(Error::syntax("unterminated block"));
            }
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        if let TokenKind::Ident(word) = self.peek().clone() {
            match word.as_str() {
                "var" | "let" | "const" => {
                    self.advance();
                    let name = self.expect_ident()?;
                    self.expect_punct('=')?;
                    let value = self.expression()?;
                    self.eat_punct(';');
                    return Ok(Stmt::VarDecl { name, value, line });
                }
                "return" => {
                    self.advance();
                    let value = if self.eat_punct(';') || *self.peek() == TokenKind::Punct('}') {
                        None
                    } else {
                        let value = self.expression()?;
                        self.eat_punct(';');
                        Some(value)
                    };
                    return Ok(Stmt::Return { value, line });
                }
                _ => {}
            }
        }

        let expr = self.expression()?;
        if self.eat_punct('=') {
            let value = self.expression()?;
            self.eat_punct(';');
            match expr {
                Expr::Member { object, property } => Ok(Stmt::Assign {
                    object: *object,
                    property,
                    value,
                    line,
                }),
                _ => Err(Error::syntax(format!(
                    "invalid assignment target on line {}",
                    line
                ))),
            }
        } else {
            self.eat_punct(';');
            Ok(Stmt::Expression { value: expr, line })
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct('.') {
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if *self.peek() == TokenKind::Punct('(') {
                self.advance();
                let mut args = Vec::new();
                if !self.eat_punct(')') {
                    loop {
                        args.push(self.expression()?);
                        if self.eat_punct(')') {
                            break;
                        }
                        self.expect_punct(',')?;
                    }
                }
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "function" => self.function_literal(),
                _ => Ok(Expr::Ident(word)),
            },
            TokenKind::Punct('{') => {
                let mut entries = Vec::new();
                if !self.eat_punct('}') {
                    loop {
                        let key = match self.advance() {
                            TokenKind::Ident(name) => name,
                            TokenKind::Str(name) => name,
                            other => {
                                return Err(Error::syntax(format!(
                                    "expected property name on line {}, found {:?}",
                                    line, other
                                )))
                            }
                        };
                        self.expect_punct(':')?;
                        entries.push((key, self.expression()?));
                        if self.eat_punct('}') {
                            break;
                        }
                        self.expect_punct(',')?;
                        // Trailing comma.
                        if self.eat_punct('}') {
                            break;
                        }
                    }
                }
                Ok(Expr::Object(entries))
            }
            TokenKind::Punct('[') => {
                let mut items = Vec::new();
                if !self.eat_punct(']') {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_punct(']') {
                            break;
                        }
                        self.expect_punct(',')?;
                        if self.eat_punct(']') {
                            break;
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            TokenKind::Punct('(') => {
                let inner = self.expression()?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            other => Err(Error::syntax(format!(
                "unexpected token {:?} on line {}",
                other, line
            ))),
        }
    }

    fn function_literal(&mut self) -> Result<Expr> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        if !self.eat_punct(')') {
            loop {
                params.push(self.expect_ident()?);
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        let body = self.block()?;
        Ok(Expr::Function { params, body })
    }
}

/// Parse module-dialect source into statements.
pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = Scanner::new(source).scan()?;
    Parser { tokens, pos: 0 }.program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let program = parse("exports.a = 1;\nmodule.exports = { n: 2 };\n").unwrap();
        assert_eq!(program.len(), 2);
        match &program[0] {
            Stmt::Assign {
                object: Expr::Ident(name),
                property,
                ..
            } => {
                assert_eq!(name, "exports");
                assert_eq!(property, "a");
            }
            other => panic!("unexpected statement {:?}", other),
        }
        assert_eq!(program[1].line(), 2);
    }

    #[test]
    fn test_parse_require_call() {
        let program = parse("const b = require('./b');\nexports.seen = b.a;\n").unwrap();
        match &program[0] {
            Stmt::VarDecl { name, value, .. } => {
                assert_eq!(name, "b");
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_literal() {
        let program = parse("exports.k = function() { return 7; };").unwrap();
        match &program[0] {
            Stmt::Assign { value: Expr::Function { body, .. }, .. } => {
                assert!(matches!(body[0], Stmt::Return { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_comments_and_strings() {
        let program = parse(
            "// leading comment\n/* block\n comment */ exports.s = \"a\\nb\";",
        )
        .unwrap();
        assert_eq!(program.len(), 1);
        match &program[0] {
            Stmt::Assign { value: Expr::Str(s), .. } => assert_eq!(s, "a\nb"),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let error = parse("exports.a = 1;\nexports.b = @;").unwrap_err();
        assert!(error.is_syntax());
        assert!(error.message.contains("line 2"));
    }
}
