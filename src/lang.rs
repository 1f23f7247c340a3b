//! Mapping language.
//!
//! A mapping string declares one or more links between node columns, how
//! source and target records are correlated, optional filters and the
//! operations the links may perform:
//!
//! ```text
//! MAP films.title TO [archive.name], films.year TO archive.released
//! WHERE SOURCE 'year >= 1990'
//! MATCH BY IDS(films.film_id, archive.film_id) AND COLUMNS(films.code, archive.code)
//! DO INSERT, UPDATE
//! ```
//!
//! Keywords are case-insensitive. Omitting `DO` allows no operations.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// A write a link is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
        }
    }
}

/// `node.column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub node: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(node: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.column)
    }
}

/// One `source TO target` entry of a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub source: ColumnRef,
    pub target: ColumnRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    /// Correlate by key columns.
    Ids,
    /// Correlate by arbitrary columns.
    Columns,
}

/// One equality condition of a match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCondition {
    pub method: MatchMethod,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Parsed form of a mapping string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMapping {
    pub links: Vec<RawLink>,
    pub match_rule: Vec<MatchCondition>,
    pub operations: BTreeSet<Operation>,
    pub source_where: Option<String>,
    pub target_where: Option<String>,
}

/// A malformed mapping string. `position` is a character offset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '.' => tokens.push((start, Token::Dot)),
            ',' => tokens.push((start, Token::Comma)),
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            '[' => tokens.push((start, Token::LBracket)),
            ']' => tokens.push((start, Token::RBracket)),
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| ParseError::new(start, "unterminated string"))?;
                tokens.push((start, Token::Str(chars[i + 1..end].iter().collect())));
                i = end;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let end = chars[i..]
                    .iter()
                    .position(|ch| !(ch.is_alphanumeric() || *ch == '_' || *ch == '-'))
                    .map(|offset| i + offset)
                    .unwrap_or(chars.len());
                tokens.push((start, Token::Ident(chars[i..end].iter().collect())));
                i = end;
                continue;
            }
            other => {
                return Err(ParseError::new(
                    start,
                    format!("unexpected character '{other}'"),
                ))
            }
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or(self.end)
    }

    fn error(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(self.position(), format!("expected {expected}, found {token}")),
            None => ParseError::new(self.position(), format!("expected {expected}, found end of input")),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(&token.to_string()))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error(what)),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error("a quoted string")),
        }
    }

    fn column(&mut self) -> Result<ColumnRef, ParseError> {
        let bracketed = self.eat(&Token::LBracket);
        let node = self.ident("a node name")?;
        self.expect(Token::Dot)?;
        let column = self.ident("a column name")?;
        if bracketed {
            self.expect(Token::RBracket)?;
        }
        Ok(ColumnRef { node, column })
    }

    fn link(&mut self) -> Result<RawLink, ParseError> {
        let source = self.column()?;
        self.keyword("TO")?;
        let target = self.column()?;
        Ok(RawLink { source, target })
    }

    fn method(&mut self) -> Result<MatchCondition, ParseError> {
        let method = if self.eat_keyword("IDS") {
            MatchMethod::Ids
        } else if self.eat_keyword("COLUMNS") {
            MatchMethod::Columns
        } else {
            return Err(self.error("IDS or COLUMNS"));
        };
        self.expect(Token::LParen)?;
        let left = self.column()?;
        self.expect(Token::Comma)?;
        let right = self.column()?;
        self.expect(Token::RParen)?;
        Ok(MatchCondition {
            method,
            left,
            right,
        })
    }

    fn operation(&mut self) -> Result<Operation, ParseError> {
        if self.eat_keyword("INSERT") {
            Ok(Operation::Insert)
        } else if self.eat_keyword("UPDATE") {
            Ok(Operation::Update)
        } else {
            Err(self.error("INSERT or UPDATE"))
        }
    }

    fn mapping(&mut self) -> Result<ParsedMapping, ParseError> {
        self.keyword("MAP")?;
        let mut links = vec![self.link()?];
        while self.eat(&Token::Comma) {
            links.push(self.link()?);
        }

        let mut source_where = None;
        let mut target_where = None;
        while self.at_keyword("WHERE") {
            let start = self.position();
            self.pos += 1;
            let slot = if self.eat_keyword("SOURCE") {
                &mut source_where
            } else if self.eat_keyword("TARGET") {
                &mut target_where
            } else {
                return Err(self.error("SOURCE or TARGET"));
            };
            if slot.is_some() {
                return Err(ParseError::new(start, "duplicate WHERE clause"));
            }
            *slot = Some(self.string()?);
        }

        self.keyword("MATCH")?;
        self.keyword("BY")?;
        let mut match_rule = vec![self.method()?];
        while self.eat_keyword("AND") {
            match_rule.push(self.method()?);
        }

        let mut operations = BTreeSet::new();
        if self.eat_keyword("DO") && !self.eat_keyword("NOTHING") {
            operations.insert(self.operation()?);
            while self.eat(&Token::Comma) {
                operations.insert(self.operation()?);
            }
        }

        if self.peek().is_some() {
            return Err(self.error("end of mapping"));
        }

        Ok(ParsedMapping {
            links,
            match_rule,
            operations,
            source_where,
            target_where,
        })
    }
}

/// Parse a mapping string.
pub fn parse_mapping(input: &str) -> Result<ParsedMapping, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.chars().count(),
    };
    parser.mapping()
}
