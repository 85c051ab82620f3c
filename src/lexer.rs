//! Lexer module for UTTR - tokenizes source code before parsing
//!
//! This module provides the first phase of the two-phase front end:
//! 1. Lexer: Source code → Token stream
//! 2. Parser: Token stream → AST
//!
//! The lexer is hand-written because two parts of the language need more than
//! a regular grammar: multi-word keywords (`as long as`, `make function`) and
//! the `<`/`>` glyphs, which either delimit a tuple or compare two values
//! depending on the surrounding tokens.

use crate::error::UttrError;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A named unit of source text (a file, `<stdin>`, `<repl>`)
#[derive(PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            text: text.into(),
        })
    }

    /// Get a line of source text (1-based)
    pub fn line(&self, line: usize) -> Option<&str> {
        self.text.lines().nth(line.checked_sub(1)?)
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceFile({})", self.name)
    }
}

/// Position information for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Character offset from the start of the source
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

/// Span of source text, tied to the unit it came from
#[derive(Clone)]
pub struct Span {
    pub file: Rc<SourceFile>,
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(file: Rc<SourceFile>, start: Position, end: Position) -> Self {
        Self { file, start, end }
    }

    /// Span covering `self` through `other`
    pub fn to(&self, other: &Span) -> Span {
        Span {
            file: Rc::clone(&self.file),
            start: self.start,
            end: other.end,
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.file.name
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.file.name == other.file.name && self.start == other.start && self.end == other.end
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file.name, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// A token with its value and position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Put,
    In,
    Keep,
    As,
    Show,
    When,
    Otherwise,
    End,
    Cycle,
    From,
    To,
    Step,
    Each,
    Through,
    AsLongAs,
    RepeatWhile,
    MakeFunction,
    Lambda,
    Give,
    And,
    Or,
    Not,
    True,
    False,
    Cut,
    Skip,
    Attempt,
    Handle,
    Bring,
    Share,
    Check,
    Whether,
    Default,

    // Literals
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Regex(String),

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    EqualEqual,   // ==
    NotEqual,     // !=
    Less,         // <
    LessEqual,    // <=
    Greater,      // >
    GreaterEqual, // >=
    Arrow,        // =>
    At,           // @

    // Punctuation
    TupleOpen,    // < opening a tuple literal
    TupleClose,   // > closing a tuple literal
    LeftParen,    // (
    RightParen,   // )
    LeftBracket,  // [
    RightBracket, // ]
    LeftBrace,    // {
    RightBrace,   // }
    Comma,        // ,
    Colon,        // :

    // Special
    Newline, // newline or ;
    Eof,
}

impl TokenKind {
    /// The keyword spelling of this token, if it is a keyword
    pub fn keyword(&self) -> Option<&'static str> {
        KEYWORDS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(word, _)| *word)
    }

    /// Short name used by token dumps
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Identifier(_) => "IDENTIFIER",
            TokenKind::Integer(_) => "INT",
            TokenKind::Float(_) => "FLOAT",
            TokenKind::String(_) => "STRING",
            TokenKind::Regex(_) => "REGEX",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "MUL",
            TokenKind::Slash => "DIV",
            TokenKind::Percent => "MOD",
            TokenKind::EqualEqual => "EE",
            TokenKind::NotEqual => "NE",
            TokenKind::Less => "LT",
            TokenKind::LessEqual => "LTE",
            TokenKind::Greater => "GT",
            TokenKind::GreaterEqual => "GTE",
            TokenKind::Arrow => "ARROW",
            TokenKind::At => "AT",
            TokenKind::TupleOpen => "LANGLE",
            TokenKind::TupleClose => "RANGLE",
            TokenKind::LeftParen => "LPAREN",
            TokenKind::RightParen => "RPAREN",
            TokenKind::LeftBracket => "LSQUARE",
            TokenKind::RightBracket => "RSQUARE",
            TokenKind::LeftBrace => "LCURLY",
            TokenKind::RightBrace => "RCURLY",
            TokenKind::Comma => "COMMA",
            TokenKind::Colon => "COLON",
            TokenKind::Newline => "NEWLINE",
            TokenKind::Eof => "EOF",
            _ => "KEYWORD",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(word) = self.keyword() {
            return write!(f, "'{}'", word);
        }
        match self {
            TokenKind::Identifier(name) => write!(f, "identifier '{}'", name),
            TokenKind::Integer(n) => write!(f, "integer {}", n),
            TokenKind::Float(n) => write!(f, "float {}", n),
            TokenKind::String(s) => write!(f, "string \"{}\"", s),
            TokenKind::Regex(p) => write!(f, "regex r\"{}\"", p),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::EqualEqual => write!(f, "'=='"),
            TokenKind::NotEqual => write!(f, "'!='"),
            TokenKind::Less => write!(f, "'<'"),
            TokenKind::LessEqual => write!(f, "'<='"),
            TokenKind::Greater => write!(f, "'>'"),
            TokenKind::GreaterEqual => write!(f, "'>='"),
            TokenKind::Arrow => write!(f, "'=>'"),
            TokenKind::At => write!(f, "'@'"),
            TokenKind::TupleOpen => write!(f, "tuple '<'"),
            TokenKind::TupleClose => write!(f, "tuple '>'"),
            TokenKind::LeftParen => write!(f, "'('"),
            TokenKind::RightParen => write!(f, "')'"),
            TokenKind::LeftBracket => write!(f, "'['"),
            TokenKind::RightBracket => write!(f, "']'"),
            TokenKind::LeftBrace => write!(f, "'{{'"),
            TokenKind::RightBrace => write!(f, "'}}'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Eof => write!(f, "end of input"),
            _ => write!(f, "{:?}", self),
        }
    }
}

lazy_static! {
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        m.insert("put", TokenKind::Put);
        m.insert("in", TokenKind::In);
        m.insert("keep", TokenKind::Keep);
        m.insert("as", TokenKind::As);
        m.insert("show", TokenKind::Show);
        m.insert("when", TokenKind::When);
        m.insert("otherwise", TokenKind::Otherwise);
        m.insert("end", TokenKind::End);
        m.insert("cycle", TokenKind::Cycle);
        m.insert("from", TokenKind::From);
        m.insert("to", TokenKind::To);
        m.insert("step", TokenKind::Step);
        m.insert("each", TokenKind::Each);
        m.insert("through", TokenKind::Through);
        m.insert("as long as", TokenKind::AsLongAs);
        m.insert("repeat while", TokenKind::RepeatWhile);
        m.insert("make function", TokenKind::MakeFunction);
        m.insert("lambda", TokenKind::Lambda);
        m.insert("give", TokenKind::Give);
        m.insert("and", TokenKind::And);
        m.insert("or", TokenKind::Or);
        m.insert("not", TokenKind::Not);
        m.insert("true", TokenKind::True);
        m.insert("false", TokenKind::False);
        m.insert("cut", TokenKind::Cut);
        m.insert("skip", TokenKind::Skip);
        m.insert("attempt", TokenKind::Attempt);
        m.insert("handle", TokenKind::Handle);
        m.insert("bring", TokenKind::Bring);
        m.insert("share", TokenKind::Share);
        m.insert("check", TokenKind::Check);
        m.insert("whether", TokenKind::Whether);
        m.insert("default", TokenKind::Default);
        m
    };
}

/// Words that may begin a multi-word keyword
const MULTI_WORD_PREFIXES: &[&str] = &["as", "make", "each", "repeat"];

/// Words that, after `>` and whitespace, mean the `>` closed a tuple
const TUPLE_CONTINUATION_WORDS: &[&str] =
    &["in", "show", "and", "or", "plus", "minus", "times", "over"];

/// Characters that directly follow a closed tuple
const TUPLE_CLOSERS: &[char] = &[',', ';', '\n', '\r', ')', ']', '}', '>'];

/// Characters that, after `> `, still mean the `>` closed a tuple
const TUPLE_CLOSERS_AFTER_SPACE: &[char] = &[':', ',', '>', ';', ')', '\n', '\r'];

/// Check if a word is a reserved keyword
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains_key(word)
}

/// Class of the previously emitted token, as seen by the `<`/`>` rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Previous {
    Start,
    Identifier,
    Number,
    String,
    CloseParen,
    CloseBracket,
    CloseBrace,
    TupleOpen,
    TupleClose,
    Comma,
    BoolLiteral,
    Other,
}

impl Previous {
    fn of(token: Option<&Token>) -> Self {
        match token.map(|t| &t.kind) {
            None => Previous::Start,
            Some(TokenKind::Identifier(_)) => Previous::Identifier,
            Some(TokenKind::Integer(_)) | Some(TokenKind::Float(_)) => Previous::Number,
            Some(TokenKind::String(_)) => Previous::String,
            Some(TokenKind::RightParen) => Previous::CloseParen,
            Some(TokenKind::RightBracket) => Previous::CloseBracket,
            Some(TokenKind::RightBrace) => Previous::CloseBrace,
            Some(TokenKind::TupleOpen) => Previous::TupleOpen,
            Some(TokenKind::TupleClose) => Previous::TupleClose,
            Some(TokenKind::Comma) => Previous::Comma,
            Some(TokenKind::True) | Some(TokenKind::False) => Previous::BoolLiteral,
            Some(_) => Previous::Other,
        }
    }

    /// After these a `<` compares rather than opens a tuple
    fn ends_value_for_less(self) -> bool {
        matches!(
            self,
            Previous::Identifier
                | Previous::Number
                | Previous::CloseParen
                | Previous::CloseBracket
                | Previous::CloseBrace
                | Previous::TupleClose
        )
    }

    /// After these a `>` may close a tuple
    fn may_close_tuple(self) -> bool {
        matches!(
            self,
            Previous::Identifier
                | Previous::Number
                | Previous::String
                | Previous::CloseParen
                | Previous::CloseBracket
                | Previous::TupleClose
                | Previous::Comma
                | Previous::TupleOpen
                | Previous::BoolLiteral
        )
    }
}

/// Lexer that converts source code to tokens
pub struct Lexer {
    file: Rc<SourceFile>,
    chars: Vec<char>,
    position: Position,
    tokens: Vec<Token>,
}

impl Lexer {
    /// Create a new lexer for the given source unit
    pub fn new(file: Rc<SourceFile>) -> Self {
        let chars = file.text.chars().collect();
        Self {
            file,
            chars,
            position: Position {
                offset: 0,
                line: 1,
                column: 1,
            },
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire source, ending with an `Eof` token
    pub fn tokenize(mut self) -> Result<Vec<Token>, UttrError> {
        while let Some(c) = self.current() {
            match c {
                ' ' | '\t' | '\r' => self.advance(),
                '$' => self.skip_comment(),
                ';' | '\n' => self.single(TokenKind::Newline),
                '"' => {
                    let token = self.make_string();
                    self.tokens.push(token);
                }
                '+' => self.single(TokenKind::Plus),
                '-' => self.single(TokenKind::Minus),
                '*' => self.single(TokenKind::Star),
                '/' => self.single(TokenKind::Slash),
                '%' => self.single(TokenKind::Percent),
                '(' => self.single(TokenKind::LeftParen),
                ')' => self.single(TokenKind::RightParen),
                '[' => self.single(TokenKind::LeftBracket),
                ']' => self.single(TokenKind::RightBracket),
                '{' => self.single(TokenKind::LeftBrace),
                '}' => self.single(TokenKind::RightBrace),
                ',' => self.single(TokenKind::Comma),
                ':' => self.single(TokenKind::Colon),
                '@' => self.single(TokenKind::At),
                '!' => {
                    let token = self.make_not_equals()?;
                    self.tokens.push(token);
                }
                '=' => {
                    let token = self.make_equals()?;
                    self.tokens.push(token);
                }
                '<' => {
                    let token = self.make_less_than();
                    self.tokens.push(token);
                }
                '>' => {
                    let token = self.make_greater_than();
                    self.tokens.push(token);
                }
                c if c.is_ascii_digit() => {
                    let token = self.make_number()?;
                    self.tokens.push(token);
                }
                c if is_identifier_start(c) => {
                    let token = self.make_identifier()?;
                    self.tokens.push(token);
                }
                other => {
                    let start = self.position;
                    self.advance();
                    return Err(UttrError::lexical(
                        format!("'{}'", other),
                        self.span_from(start),
                    ));
                }
            }
        }

        let end = self.position;
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(Rc::clone(&self.file), end, end),
        });
        Ok(self.tokens)
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position.offset).copied()
    }

    fn peek(&self, distance: usize) -> Option<char> {
        self.chars.get(self.position.offset + distance).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.position.offset += 1;
            if c == '\n' {
                self.position.line += 1;
                self.position.column = 1;
            } else {
                self.position.column += 1;
            }
        }
    }

    /// Restore a previously saved position (used to rewind keyword lookahead)
    fn rewind(&mut self, saved: Position) {
        self.position = saved;
    }

    fn span_from(&self, start: Position) -> Span {
        Span::new(Rc::clone(&self.file), start, self.position)
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.position;
        self.advance();
        let span = self.span_from(start);
        self.tokens.push(Token { kind, span });
    }

    /// Next word after optional spaces/tabs, without consuming anything
    fn peek_word(&self) -> String {
        let mut idx = self.position.offset;
        while matches!(self.chars.get(idx), Some(' ') | Some('\t')) {
            idx += 1;
        }
        let mut word = String::new();
        while let Some(&c) = self.chars.get(idx) {
            if !is_identifier_char(c) {
                break;
            }
            word.push(c);
            idx += 1;
        }
        word
    }

    fn skip_comment(&mut self) {
        self.advance();

        if self.current() == Some('[') {
            self.advance();
            // Unterminated block comments run to end of input
            while let Some(c) = self.current() {
                if c == ']' && self.peek(1) == Some('$') {
                    self.advance();
                    self.advance();
                    return;
                }
                self.advance();
            }
        } else {
            while let Some(c) = self.current() {
                if c == '\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn make_number(&mut self) -> Result<Token, UttrError> {
        let start = self.position;
        let mut text = String::new();
        let mut dot_count = 0;

        while let Some(c) = self.current() {
            if c == '.' {
                // A second dot ends the literal
                if dot_count == 1 {
                    break;
                }
                dot_count += 1;
            } else if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.advance();
        }

        let span = self.span_from(start);
        let kind = if dot_count == 0 {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Integer(n),
                Err(_) => {
                    return Err(UttrError::lexical(
                        format!("integer literal '{}' is too large", text),
                        span,
                    ))
                }
            }
        } else {
            match text.parse::<f64>() {
                Ok(n) => TokenKind::Float(n),
                Err(_) => {
                    return Err(UttrError::lexical(
                        format!("malformed number '{}'", text),
                        span,
                    ))
                }
            }
        };

        Ok(Token { kind, span })
    }

    fn make_string(&mut self) -> Token {
        let start = self.position;
        let mut value = String::new();
        let mut escaped = false;
        self.advance();

        // An unterminated string runs to end of input
        while let Some(c) = self.current() {
            if escaped {
                value.push(match c {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                break;
            } else {
                value.push(c);
            }
            self.advance();
        }
        self.advance();

        Token {
            kind: TokenKind::String(value),
            span: self.span_from(start),
        }
    }

    /// Read `r"..."` or `r'...'`; the `r` has already been consumed
    fn make_regex(&mut self, start: Position) -> Result<Token, UttrError> {
        let quote = match self.current() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                return Err(UttrError::lexical(
                    "Expected '\"' or \"'\" after 'r'",
                    self.span_from(start),
                ))
            }
        };
        self.advance();

        let mut pattern = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(UttrError::lexical(
                        format!("Expected closing {}", quote),
                        self.span_from(start),
                    ))
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                // An escaped quote stays escaped in the pattern
                Some('\\') if self.peek(1) == Some(quote) => {
                    pattern.push('\\');
                    pattern.push(quote);
                    self.advance();
                    self.advance();
                }
                Some(c) => {
                    pattern.push(c);
                    self.advance();
                }
            }
        }

        Ok(Token {
            kind: TokenKind::Regex(pattern),
            span: self.span_from(start),
        })
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.current() {
            if !is_identifier_char(c) {
                break;
            }
            word.push(c);
            self.advance();
        }
        word
    }

    fn make_identifier(&mut self) -> Result<Token, UttrError> {
        let start = self.position;
        let word = self.read_word();

        if word == "r" && matches!(self.current(), Some('"') | Some('\'')) {
            return self.make_regex(start);
        }

        if MULTI_WORD_PREFIXES.contains(&word.as_str()) {
            if let Some(kind) = self.extend_keyword(&word) {
                return Ok(Token {
                    kind,
                    span: self.span_from(start),
                });
            }
        }

        let kind = match KEYWORDS.get(word.as_str()) {
            Some(kind) => kind.clone(),
            None => TokenKind::Identifier(word),
        };
        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    /// Try to grow `first` into a multi-word keyword by up to two more words.
    ///
    /// On success the lexer is left after the longest matching phrase; on
    /// failure it is rewound to just after `first`.
    fn extend_keyword(&mut self, first: &str) -> Option<TokenKind> {
        let saved = self.position;
        let mut phrase = first.to_string();
        let mut best: Option<(TokenKind, Position)> = None;

        for _ in 0..2 {
            while matches!(self.current(), Some(' ') | Some('\t')) {
                self.advance();
            }
            match self.current() {
                Some(c) if is_identifier_start(c) => {
                    let next = self.read_word();
                    phrase.push(' ');
                    phrase.push_str(&next);
                    if let Some(kind) = KEYWORDS.get(phrase.as_str()) {
                        best = Some((kind.clone(), self.position));
                    }
                }
                _ => break,
            }
        }

        match best {
            Some((kind, end)) => {
                self.rewind(end);
                Some(kind)
            }
            None => {
                self.rewind(saved);
                None
            }
        }
    }

    fn make_not_equals(&mut self) -> Result<Token, UttrError> {
        let start = self.position;
        self.advance();
        if self.current() == Some('=') {
            self.advance();
            return Ok(Token {
                kind: TokenKind::NotEqual,
                span: self.span_from(start),
            });
        }
        Err(UttrError::lexical(
            "Expected '=' after '!'",
            self.span_from(start),
        ))
    }

    fn make_equals(&mut self) -> Result<Token, UttrError> {
        let start = self.position;
        self.advance();
        let kind = match self.current() {
            Some('=') => TokenKind::EqualEqual,
            Some('>') => TokenKind::Arrow,
            _ => {
                return Err(UttrError::lexical(
                    "Expected '=' or '>' after '='",
                    self.span_from(start),
                ))
            }
        };
        self.advance();
        Ok(Token {
            kind,
            span: self.span_from(start),
        })
    }

    fn make_less_than(&mut self) -> Token {
        let start = self.position;
        let previous = Previous::of(self.tokens.last());
        self.advance();

        let kind = if self.current() == Some('=') {
            self.advance();
            TokenKind::LessEqual
        } else {
            let immediate = self.current();
            let significant = self.next_significant();
            classify_less(previous, immediate, significant)
        };

        Token {
            kind,
            span: self.span_from(start),
        }
    }

    fn make_greater_than(&mut self) -> Token {
        let start = self.position;
        let previous = Previous::of(self.tokens.last());
        self.advance();

        let kind = if self.current() == Some('=') {
            self.advance();
            TokenKind::GreaterEqual
        } else {
            let following_word = match self.current() {
                Some(' ') | Some('\t') => Some(self.peek_word()),
                _ => None,
            };
            classify_greater(
                previous,
                self.current(),
                self.peek(1),
                following_word.as_deref(),
            )
        };

        Token {
            kind,
            span: self.span_from(start),
        }
    }

    /// First character at or after the cursor that is not a space or tab
    fn next_significant(&self) -> Option<char> {
        let mut idx = self.position.offset;
        while matches!(self.chars.get(idx), Some(' ') | Some('\t')) {
            idx += 1;
        }
        self.chars.get(idx).copied()
    }
}

/// Decide what a `<` (not followed by `=`) is.
///
/// | immediate | previous token              | next significant char         | result     |
/// |-----------|-----------------------------|-------------------------------|------------|
/// | `>`       | any                         | any                           | tuple open |
/// | other     | ident/number/`)`/`]`/`}`/`>`| any                           | `<`        |
/// | other     | anything else               | digit, letter, `"[{<>-`       | tuple open |
/// | other     | anything else               | anything else / end of input  | `<`        |
fn classify_less(previous: Previous, immediate: Option<char>, significant: Option<char>) -> TokenKind {
    if immediate == Some('>') {
        return TokenKind::TupleOpen;
    }
    if previous.ends_value_for_less() {
        return TokenKind::Less;
    }
    match significant {
        Some(c) if is_identifier_char(c) || "\"[{<>-".contains(c) => TokenKind::TupleOpen,
        _ => TokenKind::Less,
    }
}

/// Decide what a `>` (not followed by `=`) is.
///
/// | previous token                     | next char                  | after whitespace                  | result      |
/// |------------------------------------|----------------------------|-----------------------------------|-------------|
/// | not a value, `,`, `<`, true/false  | any                        |                                   | `>`         |
/// | tuple open                         | any                        |                                   | tuple close |
/// | value/`,`                          | end of input, `,;)]}>` nl  |                                   | tuple close |
/// | value/`,`                          | space/tab                  | end, `:,>;)` nl                   | tuple close |
/// | value/`,`                          | space/tab                  | word in continuation list         | tuple close |
/// | value/`,`                          | space/tab                  | other word, digit, anything else  | `>`         |
/// | value/`,`                          | anything else              |                                   | `>`         |
fn classify_greater(
    previous: Previous,
    next: Option<char>,
    after_space: Option<char>,
    following_word: Option<&str>,
) -> TokenKind {
    if !previous.may_close_tuple() {
        return TokenKind::Greater;
    }
    if previous == Previous::TupleOpen {
        return TokenKind::TupleClose;
    }

    match next {
        None => TokenKind::TupleClose,
        Some(c) if TUPLE_CLOSERS.contains(&c) => TokenKind::TupleClose,
        Some(' ') | Some('\t') => match after_space {
            None => TokenKind::TupleClose,
            Some(c) if TUPLE_CLOSERS_AFTER_SPACE.contains(&c) => TokenKind::TupleClose,
            Some(c) if c.is_alphabetic() => {
                let word = following_word.unwrap_or_default();
                if TUPLE_CONTINUATION_WORDS.contains(&word) {
                    TokenKind::TupleClose
                } else {
                    TokenKind::Greater
                }
            }
            Some(_) => TokenKind::Greater,
        },
        Some(_) => TokenKind::Greater,
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Convenience function to tokenize a source unit
pub fn tokenize(unit_name: &str, source: &str) -> Result<Vec<Token>, UttrError> {
    Lexer::new(SourceFile::new(unit_name, source)).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize("<test>", source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            kinds("put keep show when otherwise end"),
            vec![
                TokenKind::Put,
                TokenKind::Keep,
                TokenKind::Show,
                TokenKind::When,
                TokenKind::Otherwise,
                TokenKind::End,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_multi_word_keywords() {
        assert_eq!(
            kinds("as long as x repeat while make function each"),
            vec![
                TokenKind::AsLongAs,
                TokenKind::Identifier("x".to_string()),
                TokenKind::RepeatWhile,
                TokenKind::MakeFunction,
                TokenKind::Each,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_multi_word_keyword_rewinds() {
        // "as e" is not a keyword phrase, so "as" stands alone
        let tokens = tokenize("<test>", "handle as e:").unwrap();
        assert!(matches!(tokens[1].kind, TokenKind::As));
        assert!(matches!(&tokens[2].kind, TokenKind::Identifier(name) if name == "e"));
        assert_eq!(tokens[2].span.start.column, 11);
        assert!(matches!(tokens[3].kind, TokenKind::Colon));
    }

    #[test]
    fn test_keyword_vs_identifier() {
        assert_eq!(
            kinds("putter inside"),
            vec![
                TokenKind::Identifier("putter".to_string()),
                TokenKind::Identifier("inside".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(
            kinds("42 3.14 7."),
            vec![
                TokenKind::Integer(42),
                TokenKind::Float(3.14),
                TokenKind::Float(7.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_second_dot_ends_number() {
        // The literal stops at the second dot; the dot itself is not a token
        let err = tokenize("<test>", "1.2.3").unwrap_err();
        match err {
            UttrError::Lexical { message, span } => {
                assert_eq!(message, "'.'");
                assert_eq!(span.start.column, 4);
            }
            other => panic!("Expected lexical error, got {:?}", other),
        }
    }

    #[test]
    fn test_tokenize_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\t\"b\\c\q""#),
            vec![
                TokenKind::String("a\n\t\"b\\cq".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string_runs_to_end() {
        assert_eq!(
            kinds("\"abc"),
            vec![TokenKind::String("abc".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_tokenize_regex() {
        assert_eq!(
            kinds(r#"r"\d+" r'a\'b'"#),
            vec![
                TokenKind::Regex("\\d+".to_string()),
                TokenKind::Regex("a\\'b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_regex_is_error() {
        let err = tokenize("<test>", "r\"abc").unwrap_err();
        assert!(matches!(err, UttrError::Lexical { .. }));
    }

    #[test]
    fn test_comments_and_separators() {
        assert_eq!(
            kinds("x $ comment\ny; $[ block\n comment ]$ z"),
            vec![
                TokenKind::Identifier("x".to_string()),
                TokenKind::Newline,
                TokenKind::Identifier("y".to_string()),
                TokenKind::Newline,
                TokenKind::Identifier("z".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment_is_tolerated() {
        assert_eq!(
            kinds("x $[ never closed"),
            vec![TokenKind::Identifier("x".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("+ - * / % == != <= >= => @ : ,"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::EqualEqual,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Arrow,
                TokenKind::At,
                TokenKind::Colon,
                TokenKind::Comma,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_illegal_character() {
        let err = tokenize("<test>", "put 1 in x ?").unwrap_err();
        match err {
            UttrError::Lexical { message, span } => {
                assert_eq!(message, "'?'");
                assert_eq!(span.start.column, 12);
            }
            other => panic!("Expected lexical error, got {:?}", other),
        }
        assert!(tokenize("<test>", "a ! b").is_err());
        assert!(tokenize("<test>", "a = b").is_err());
    }

    #[test]
    fn test_tuple_literal_tokens() {
        assert_eq!(
            kinds("<1,2,3>"),
            vec![
                TokenKind::TupleOpen,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::Comma,
                TokenKind::Integer(3),
                TokenKind::TupleClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_less_than_after_identifier() {
        assert_eq!(
            kinds("x < 3"),
            vec![
                TokenKind::Identifier("x".to_string()),
                TokenKind::Less,
                TokenKind::Integer(3),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_empty_tuple_in_any_context() {
        for source in ["<>", "x <>", "put <> in t", "(1) <>"] {
            let tokens = kinds(source);
            assert!(
                tokens
                    .windows(2)
                    .any(|pair| pair == [TokenKind::TupleOpen, TokenKind::TupleClose]),
                "source: {}",
                source
            );
        }
        assert_eq!(
            kinds("put <> in t"),
            vec![
                TokenKind::Put,
                TokenKind::TupleOpen,
                TokenKind::TupleClose,
                TokenKind::In,
                TokenKind::Identifier("t".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greater_than_disambiguation() {
        assert_eq!(kinds("when x > 5:")[2], TokenKind::Greater);
        assert_eq!(kinds("when x > y:")[2], TokenKind::Greater);
        let tuple = kinds("put <1, 2> in t");
        assert_eq!(tuple[5], TokenKind::TupleClose);
        assert_eq!(tuple[6], TokenKind::In);
        let nested = kinds("<1, <2, 3>>");
        assert_eq!(nested[7], TokenKind::TupleClose);
        assert_eq!(nested[8], TokenKind::TupleClose);
        assert_eq!(kinds("(1 + 2) > 3")[5], TokenKind::Greater);
    }

    #[test]
    fn test_greater_than_before_colon() {
        // Directly followed by `:` it is a comparison; after a space it closes
        assert_eq!(kinds("whether <1, 2>:")[5], TokenKind::Greater);
        assert_eq!(kinds("whether <1, 2> :")[5], TokenKind::TupleClose);
        assert_eq!(kinds("whether <1, 2> :")[6], TokenKind::Colon);
    }

    #[test]
    fn test_position_tracking() {
        let tokens = tokenize("<test>", "put 1 in x\nshow x").unwrap();
        let show = &tokens[5];
        assert!(matches!(show.kind, TokenKind::Show));
        assert_eq!(show.span.start.line, 2);
        assert_eq!(show.span.start.column, 1);
        assert_eq!(show.span.end.column, 5);
    }

    proptest! {
        #[test]
        fn prop_integer_literals_round_trip(n in 0i64..i64::MAX) {
            prop_assert_eq!(kinds(&n.to_string()), vec![TokenKind::Integer(n), TokenKind::Eof]);
        }

        #[test]
        fn prop_empty_tuple_after_any_identifier(name in "[a-z_][a-z0-9_]{0,8}") {
            prop_assume!(!is_keyword(&name) && name != "r");
            let tokens = kinds(&format!("{} <>", name));
            prop_assert_eq!(&tokens[1..], &[TokenKind::TupleOpen, TokenKind::TupleClose, TokenKind::Eof]);
        }
    }
}
