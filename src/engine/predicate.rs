use std::sync::RwLock;

use async_trait::async_trait;

use super::{SearchEngine, empty_query_slice};
use crate::error::BridgeError;
use crate::registry::ToolMetadata;

/// Structured filtering over tool fields with a small boolean expression
/// language: `MethodIs("GET") && !PathStartsWith("/admin")`.
///
/// Precedence `!` > `&&` > `||`, parentheses for grouping. String
/// comparisons are case-insensitive. Matches are emitted in catalog
/// insertion order; there is no ranking.
pub struct PredicateEngine {
    catalog: RwLock<Vec<ToolMetadata>>,
}

impl PredicateEngine {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Vec::new()),
        }
    }
}

impl Default for PredicateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for PredicateEngine {
    fn name(&self) -> &'static str {
        "predicate"
    }

    async fn index(&self, tools: &[ToolMetadata]) -> Result<(), BridgeError> {
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = tools.to_vec();
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolMetadata>, BridgeError> {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        if query.trim().is_empty() {
            return Ok(empty_query_slice(&catalog));
        }
        let expr = PredicateExpr::parse(query)?;
        Ok(catalog
            .iter()
            .filter(|meta| expr.matches(meta))
            .cloned()
            .collect())
    }
}

/// A parsed predicate expression, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct PredicateExpr {
    root: Expr,
}

impl PredicateExpr {
    pub fn parse(input: &str) -> Result<Self, BridgeError> {
        let tokens = lex(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(BridgeError::InvalidArgument(format!(
                "unexpected trailing input in predicate: {input}"
            )));
        }
        Ok(Self { root })
    }

    pub fn matches(&self, meta: &ToolMetadata) -> bool {
        eval(&self.root, meta)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Call(PredicateFn, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PredicateFn {
    MethodIs,
    PathIs,
    PathStartsWith,
    PathEndsWith,
    PathContains,
    NameIs,
    NameStartsWith,
    NameEndsWith,
    NameContains,
    DescriptionContains,
    HasTag,
}

impl PredicateFn {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "MethodIs" => Self::MethodIs,
            "PathIs" => Self::PathIs,
            "PathStartsWith" => Self::PathStartsWith,
            "PathEndsWith" => Self::PathEndsWith,
            "PathContains" => Self::PathContains,
            "NameIs" => Self::NameIs,
            "NameStartsWith" => Self::NameStartsWith,
            "NameEndsWith" => Self::NameEndsWith,
            "NameContains" => Self::NameContains,
            "DescriptionContains" => Self::DescriptionContains,
            "HasTag" => Self::HasTag,
            _ => return None,
        })
    }
}

fn eval(expr: &Expr, meta: &ToolMetadata) -> bool {
    match expr {
        Expr::Or(a, b) => eval(a, meta) || eval(b, meta),
        Expr::And(a, b) => eval(a, meta) && eval(b, meta),
        Expr::Not(inner) => !eval(inner, meta),
        Expr::Call(func, arg) => {
            let arg = arg.to_lowercase();
            match func {
                PredicateFn::MethodIs => meta.method.to_lowercase() == arg,
                PredicateFn::PathIs => meta.path.to_lowercase() == arg,
                PredicateFn::PathStartsWith => meta.path.to_lowercase().starts_with(&arg),
                PredicateFn::PathEndsWith => meta.path.to_lowercase().ends_with(&arg),
                PredicateFn::PathContains => meta.path.to_lowercase().contains(&arg),
                PredicateFn::NameIs => meta.name.to_lowercase() == arg,
                PredicateFn::NameStartsWith => meta.name.to_lowercase().starts_with(&arg),
                PredicateFn::NameEndsWith => meta.name.to_lowercase().ends_with(&arg),
                PredicateFn::NameContains => meta.name.to_lowercase().contains(&arg),
                PredicateFn::DescriptionContains => {
                    meta.description.to_lowercase().contains(&arg)
                }
                PredicateFn::HasTag => meta.tags.iter().any(|t| t.to_lowercase() == arg),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Ident(String),
    Str(String),
}

fn lex(input: &str) -> Result<Vec<Token>, BridgeError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(BridgeError::InvalidArgument(
                        "expected '&&' in predicate".into(),
                    ));
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(BridgeError::InvalidArgument(
                        "expected '||' in predicate".into(),
                    ));
                }
                tokens.push(Token::Or);
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => value.push(c),
                        None => {
                            return Err(BridgeError::InvalidArgument(
                                "unterminated string literal in predicate".into(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(BridgeError::InvalidArgument(format!(
                    "unexpected character '{other}' in predicate"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, BridgeError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, BridgeError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, BridgeError> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                if self.next() != Some(Token::RParen) {
                    return Err(BridgeError::InvalidArgument(
                        "missing ')' in predicate".into(),
                    ));
                }
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                let func = PredicateFn::from_name(&name).ok_or_else(|| {
                    BridgeError::InvalidArgument(format!("unknown predicate function '{name}'"))
                })?;
                if self.next() != Some(Token::LParen) {
                    return Err(BridgeError::InvalidArgument(format!(
                        "expected '(' after '{name}'"
                    )));
                }
                let arg = match self.next() {
                    Some(Token::Str(s)) => s,
                    _ => {
                        return Err(BridgeError::InvalidArgument(format!(
                            "expected string argument for '{name}'"
                        )));
                    }
                };
                if self.next() != Some(Token::RParen) {
                    return Err(BridgeError::InvalidArgument(format!(
                        "expected ')' after argument of '{name}'"
                    )));
                }
                Ok(Expr::Call(func, arg))
            }
            other => Err(BridgeError::InvalidArgument(format!(
                "unexpected token in predicate: {other:?}"
            ))),
        }
    }
}
