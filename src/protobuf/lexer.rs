//! Tokenizer for `.proto` text.

use crate::error::SchemaError;
use crate::types::Format;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Int(u64),
    /// Floating point literal, kept as written.
    Float(String),
    Str(String),
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    /// `//` comment lines directly above this token.
    pub doc: Option<String>,
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, SchemaError> {
    Lexer {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        last_token_line: 0,
        doc: Vec::new(),
        tokens: Vec::new(),
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    last_token_line: usize,
    doc: Vec<String>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn run(mut self) -> Result<Vec<Token>, SchemaError> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                    // A blank line detaches pending comments.
                    if self.peek_blank_line() {
                        self.doc.clear();
                    }
                }
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek(1) == Some('/') => self.line_comment(),
                '/' if self.peek(1) == Some('*') => self.block_comment()?,
                '"' | '\'' => {
                    let s = self.string(c)?;
                    self.push(TokenKind::Str(s));
                }
                c if c.is_ascii_digit() => {
                    let kind = self.number()?;
                    self.push(kind);
                }
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => {
                    let kind = self.number()?;
                    self.push(kind);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let start = self.pos;
                    while self
                        .peek(0)
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        self.pos += 1;
                    }
                    let ident: String = self.chars[start..self.pos].iter().collect();
                    self.push(TokenKind::Ident(ident));
                }
                c => {
                    self.pos += 1;
                    self.push(TokenKind::Symbol(c));
                }
            }
        }
        Ok(self.tokens)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn peek_blank_line(&self) -> bool {
        let mut i = self.pos;
        while let Some(c) = self.chars.get(i) {
            match c {
                '\n' => return true,
                c if c.is_whitespace() => i += 1,
                _ => return false,
            }
        }
        false
    }

    fn push(&mut self, kind: TokenKind) {
        let doc = if self.doc.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.doc).join("\n"))
        };
        self.tokens.push(Token {
            kind,
            line: self.line,
            doc,
        });
        self.last_token_line = self.line;
    }

    fn line_comment(&mut self) {
        let trailing = self.last_token_line == self.line;
        self.pos += 2;
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
        if trailing {
            return;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.strip_prefix(' ').unwrap_or(&text).trim_end().to_string();
        self.doc.push(text);
    }

    fn block_comment(&mut self) -> Result<(), SchemaError> {
        let start_line = self.line;
        self.pos += 2;
        loop {
            match self.peek(0) {
                None => {
                    return Err(SchemaError::parse(
                        Format::Protobuf,
                        format!("line {start_line}"),
                        "unterminated block comment",
                    ))
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, SchemaError> {
        let line = self.line;
        let unterminated =
            || SchemaError::parse(Format::Protobuf, format!("line {line}"), "unterminated string literal");
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self.peek(0).ok_or_else(unterminated)?;
            self.pos += 1;
            match c {
                '\n' => return Err(unterminated()),
                c if c == quote => return Ok(out),
                '\\' => {
                    let escaped = self.peek(0).ok_or_else(unterminated)?;
                    self.pos += 1;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0'..='7' => {
                            let mut value = escaped.to_digit(8).unwrap_or(0);
                            for _ in 0..2 {
                                match self.peek(0).and_then(|d| d.to_digit(8)) {
                                    Some(d) => {
                                        value = value * 8 + d;
                                        self.pos += 1;
                                    }
                                    None => break,
                                }
                            }
                            out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                        }
                        'x' | 'X' => {
                            let mut value = 0;
                            for _ in 0..2 {
                                match self.peek(0).and_then(|d| d.to_digit(16)) {
                                    Some(d) => {
                                        value = value * 16 + d;
                                        self.pos += 1;
                                    }
                                    None => break,
                                }
                            }
                            out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                        }
                        other => out.push(other),
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, SchemaError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == '.' {
                if c == '.' {
                    is_float = true;
                }
                self.pos += 1;
            } else if (c == '+' || c == '-')
                && matches!(self.chars.get(self.pos - 1), Some('e' | 'E'))
                && !self.chars[start..self.pos].starts_with(&['0', 'x'])
            {
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        let invalid = || {
            SchemaError::parse(
                Format::Protobuf,
                format!("line {}", self.line),
                format!("invalid number `{literal}`"),
            )
        };

        let lower = literal.to_ascii_lowercase();
        if let Some(hex) = lower.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16).map(TokenKind::Int).map_err(|_| invalid());
        }
        if is_float || (lower.contains('e') && !lower.starts_with("0x")) {
            return literal
                .parse::<f64>()
                .map(|_| TokenKind::Float(literal.clone()))
                .map_err(|_| invalid());
        }
        if lower.len() > 1 && lower.starts_with('0') {
            return u64::from_str_radix(&lower[1..], 8).map(TokenKind::Int).map_err(|_| invalid());
        }
        lower.parse::<u64>().map(TokenKind::Int).map_err(|_| invalid())
    }
}
