//! Token stream production.
//!
//! Spec §1 names the lexer/tokenizer out of scope, assuming "a token stream
//! with the categories listed in §6" is available to the parser. This module
//! is that plumbing: a small hand-written scanner producing exactly the
//! token categories §4.2's grammar consumes (keywords, identifiers, number
//! and string literals, the operator set, directive markers, and `::`/`&`).
//! It is intentionally minimal and not part of the crate's public surface —
//! swapping it for a different tokenizer should never change observable
//! compiler behavior.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    While,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Wait,
    WaitTillFrameEnd,
    Thread,
    True,
    False,
    Undefined,
}

impl Keyword {
    fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "switch" => Keyword::Switch,
            "case" => Keyword::Case,
            "default" => Keyword::Default,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "return" => Keyword::Return,
            "wait" => Keyword::Wait,
            "waittillframeend" => Keyword::WaitTillFrameEnd,
            "thread" => Keyword::Thread,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "undefined" => Keyword::Undefined,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Identifier(String),
    Int(i64),
    Float(f64),
    String(String),
    // Directives
    HashInclude,
    HashUsingAnimtree,
    // Punctuation / operators
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    ColonColon,
    Comma,
    Dot,
    Amp,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)
    }
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0, line: 1 }
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.pos).unwrap_or(&0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        *self.src.get(self.pos + offset).unwrap_or(&0)
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.bump();
                    self.bump();
                    while !(self.peek() == b'*' && self.peek_at(1) == b'/') && self.peek() != 0 {
                        self.bump();
                    }
                    if self.peek() != 0 {
                        self.bump();
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.bump();
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn read_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_float = false;
        while self.peek().is_ascii_digit() {
            self.bump();
        }
        if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            is_float = true;
            self.bump();
            while self.peek().is_ascii_digit() {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::Int(text.parse().unwrap_or(0))
        }
    }

    fn read_string(&mut self) -> String {
        self.bump(); // opening quote
        let mut out = String::new();
        while self.peek() != b'"' && self.peek() != 0 {
            let c = self.bump();
            if c == b'\\' {
                let esc = self.bump();
                out.push(match esc {
                    b'n' => '\n',
                    b't' => '\t',
                    b'"' => '"',
                    b'\\' => '\\',
                    other => other as char,
                });
            } else {
                out.push(c as char);
            }
        }
        if self.peek() == b'"' {
            self.bump();
        }
        out
    }

    fn read_directive(&mut self) -> TokenKind {
        self.bump(); // '#'
        let name = self.read_ident();
        match name.as_str() {
            "include" => TokenKind::HashInclude,
            "using_animtree" => TokenKind::HashUsingAnimtree,
            other => TokenKind::Identifier(format!("#{other}")),
        }
    }

    /// Scans the full token stream. Production callers drain this once per
    /// file; the parser never re-lexes.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let line = self.line;
            let c = self.peek();
            if c == 0 {
                tokens.push(Token { kind: TokenKind::Eof, line });
                break;
            }
            let kind = if c == b'#' {
                self.read_directive()
            } else if c.is_ascii_digit() {
                self.read_number()
            } else if c == b'"' {
                TokenKind::String(self.read_string())
            } else if c.is_ascii_alphabetic() || c == b'_' {
                let ident = self.read_ident();
                Keyword::from_ident(&ident).map(TokenKind::Keyword).unwrap_or(TokenKind::Identifier(ident))
            } else {
                self.bump();
                match c {
                    b'{' => TokenKind::LBrace,
                    b'}' => TokenKind::RBrace,
                    b'(' => TokenKind::LParen,
                    b')' => TokenKind::RParen,
                    b'[' => TokenKind::LBracket,
                    b']' => TokenKind::RBracket,
                    b';' => TokenKind::Semicolon,
                    b',' => TokenKind::Comma,
                    b'.' => TokenKind::Dot,
                    b'&' => {
                        if self.peek() == b'&' {
                            self.bump();
                            TokenKind::AndAnd
                        } else {
                            TokenKind::Amp
                        }
                    }
                    b'|' => {
                        if self.peek() == b'|' {
                            self.bump();
                            TokenKind::OrOr
                        } else {
                            TokenKind::Identifier("|".to_string())
                        }
                    }
                    b':' => {
                        if self.peek() == b':' {
                            self.bump();
                            TokenKind::ColonColon
                        } else {
                            TokenKind::Colon
                        }
                    }
                    b'+' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::PlusAssign
                        } else {
                            TokenKind::Plus
                        }
                    }
                    b'-' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::MinusAssign
                        } else {
                            TokenKind::Minus
                        }
                    }
                    b'*' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::StarAssign
                        } else {
                            TokenKind::Star
                        }
                    }
                    b'/' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::SlashAssign
                        } else {
                            TokenKind::Slash
                        }
                    }
                    b'%' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::PercentAssign
                        } else {
                            TokenKind::Percent
                        }
                    }
                    b'=' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::Eq
                        } else {
                            TokenKind::Assign
                        }
                    }
                    b'!' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::Ne
                        } else {
                            TokenKind::Not
                        }
                    }
                    b'<' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::Le
                        } else {
                            TokenKind::Lt
                        }
                    }
                    b'>' => {
                        if self.peek() == b'=' {
                            self.bump();
                            TokenKind::Ge
                        } else {
                            TokenKind::Gt
                        }
                    }
                    _ => TokenKind::Identifier((c as char).to_string()),
                }
            };
            tokens.push(Token { kind, line });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_keywords_and_identifiers() {
        let toks = Lexer::new("if (x) { return undefined; }").tokenize();
        assert_eq!(toks[0].kind, TokenKind::Keyword(Keyword::If));
        assert_eq!(toks[1].kind, TokenKind::LParen);
        assert_eq!(toks[2].kind, TokenKind::Identifier("x".into()));
    }

    #[test]
    fn tokenizes_directives_and_qualified_call() {
        let toks = Lexer::new("#include maps\\mp\\gametypes\\_globallogic;\na::b();").tokenize();
        assert_eq!(toks[0].kind, TokenKind::HashInclude);
        let has_coloncolon = toks.iter().any(|t| t.kind == TokenKind::ColonColon);
        assert!(has_coloncolon);
    }

    #[test]
    fn tokenizes_numbers_and_strings() {
        let toks = Lexer::new(r#"0.1 42 "go""#).tokenize();
        assert_eq!(toks[0].kind, TokenKind::Float(0.1));
        assert_eq!(toks[1].kind, TokenKind::Int(42));
        assert_eq!(toks[2].kind, TokenKind::String("go".into()));
    }

    #[test]
    fn tokenizes_logical_and_or() {
        let toks = Lexer::new("a && b || c").tokenize();
        assert_eq!(toks[1].kind, TokenKind::AndAnd);
        assert_eq!(toks[3].kind, TokenKind::OrOr);
    }

    #[test]
    fn line_numbers_advance() {
        let toks = Lexer::new("a;\nb;\nc;").tokenize();
        let lines: Vec<u32> = toks.iter().map(|t| t.line).collect();
        assert_eq!(lines[0], 1);
        assert!(lines.iter().any(|&l| l == 3));
    }
}
