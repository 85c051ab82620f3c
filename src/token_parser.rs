//! Token-based parser for UTTR
//!
//! This module implements a recursive descent parser that consumes
//! tokens from the lexer to build an AST. Statement sequences have no
//! terminator of their own: after a newline the parser speculatively tries
//! another statement and rewinds the cursor when that fails, leaving the
//! enclosing construct to decide whether the next token is acceptable.

use std::rc::Rc;

use crate::ast::{
    BinaryOperator, Body, Branch, Expression, FunctionBody, ImportItem, NumberLiteral, Program,
    UnaryOperator,
};
use crate::error::UttrError;
use crate::lexer::{SourceFile, Span, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;

type ParseResult<T> = Result<T, UttrError>;

/// Deepest expression nesting the parser accepts
pub const MAX_NESTING: usize = 1000;

/// Tokens that may start an atom, as listed in syntax errors
const ATOM_STARTS: &[&str] = &[
    "int",
    "float",
    "string",
    "identifier",
    "'+'",
    "'-'",
    "'('",
    "'['",
    "'<'",
    "'{'",
    "'when'",
    "'cycle'",
    "'as long as'",
    "'repeat while'",
    "'make function'",
    "'lambda'",
    "'attempt'",
    "'check'",
];

/// Parser that consumes tokens to produce an AST
pub struct TokenParser {
    tokens: Vec<Token>,
    position: usize,
    file: Rc<SourceFile>,
    /// Last statement that failed to parse speculatively
    speculative_error: Option<UttrError>,
    /// Current expression nesting
    depth: usize,
}

impl TokenParser {
    /// Create a new parser from a token stream ending in `Eof`
    pub fn new(tokens: Vec<Token>) -> Self {
        let file = tokens
            .last()
            .map(|t| Rc::clone(&t.span.file))
            .unwrap_or_else(|| SourceFile::new("<empty>", ""));
        let mut tokens = tokens;
        if tokens.is_empty() {
            let span = Span::new(Rc::clone(&file), Default::default(), Default::default());
            tokens.push(Token {
                kind: TokenKind::Eof,
                span,
            });
        }
        Self {
            tokens,
            position: 0,
            file,
            speculative_error: None,
            depth: 0,
        }
    }

    /// Parse a complete program
    pub fn parse_program(&mut self) -> ParseResult<Program> {
        let statements = self.parse_statements()?;

        if !self.is_at_end() {
            let fallback = self.error_here(
                format!("Unexpected {}", self.current().kind),
                &["an operator", "newline", "end of input"],
            );
            return Err(self.prefer_speculative(fallback));
        }

        Ok(Program {
            file: Rc::clone(&self.file),
            statements,
        })
    }

    /// Parse a newline-separated statement sequence
    fn parse_statements(&mut self) -> ParseResult<Vec<Expression>> {
        let mut statements = Vec::new();

        self.skip_newlines();
        if self.at_sequence_end() {
            return Ok(statements);
        }

        statements.push(self.parse_statement()?);

        loop {
            if self.skip_newlines() == 0 || self.at_sequence_end() {
                break;
            }

            let saved = self.mark_position();
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => {
                    self.position = saved;
                    self.speculative_error = Some(error);
                    break;
                }
            }
        }

        Ok(statements)
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();

        match self.current().kind {
            TokenKind::Bring => self.parse_import(),
            TokenKind::Share => self.parse_share(),
            TokenKind::Give => {
                self.advance();
                let saved = self.mark_position();
                let value = match self.parse_expression() {
                    Ok(expr) => Some(Box::new(expr)),
                    Err(_) => {
                        self.position = saved;
                        None
                    }
                };
                Ok(Expression::Return {
                    value,
                    span: self.span_from(start),
                })
            }
            TokenKind::Cut => {
                self.advance();
                Ok(Expression::Break {
                    span: self.span_from(start),
                })
            }
            TokenKind::Skip => {
                self.advance();
                Ok(Expression::Continue {
                    span: self.span_from(start),
                })
            }
            _ => self.parse_expression(),
        }
    }

    /// Parse an expression, including the `put`, `keep` and `show` forms
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();

        if self.check(&TokenKind::Put) {
            self.advance();
            let value = self.parse_logic()?;
            self.expect(&TokenKind::In)?;
            let (name, _) = self.expect_identifier()?;
            return Ok(Expression::Assign {
                name,
                value: Box::new(value),
                span: self.span_from(start),
            });
        }

        if self.check(&TokenKind::Keep) {
            self.advance();
            let value = self.parse_logic()?;
            self.expect(&TokenKind::As)?;
            let (name, _) = self.expect_identifier()?;
            return Ok(Expression::ConstAssign {
                name,
                value: Box::new(value),
                span: self.span_from(start),
            });
        }

        if self.check(&TokenKind::Show) {
            let callee_span = self.current().span.clone();
            self.advance();
            let value = self.parse_logic()?;
            return Ok(Expression::Call {
                callee: Box::new(Expression::Variable {
                    name: "show".to_string(),
                    span: callee_span,
                }),
                args: vec![value],
                span: self.span_from(start),
            });
        }

        self.parse_logic()
    }

    /// Parse `not`, `and` and `or`
    fn parse_logic(&mut self) -> ParseResult<Expression> {
        self.nested(Self::parse_logic_operators)
    }

    fn parse_logic_operators(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();

        if self.check(&TokenKind::Not) {
            self.advance();
            let operand = self.parse_logic()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
                span: self.span_from(start),
            });
        }

        let mut left = self.parse_comparison()?;

        loop {
            let op = match self.current().kind {
                TokenKind::And => BinaryOperator::And,
                TokenKind::Or => BinaryOperator::Or,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: self.span_from(start),
            };
        }

        Ok(left)
    }

    /// Parse a single (non-chaining) comparison
    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let left = self.parse_addition()?;

        let op = match self.current().kind {
            TokenKind::EqualEqual => BinaryOperator::Equal,
            TokenKind::NotEqual => BinaryOperator::NotEqual,
            TokenKind::Less => BinaryOperator::Less,
            TokenKind::LessEqual => BinaryOperator::LessEqual,
            TokenKind::Greater => BinaryOperator::Greater,
            TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_addition()?;

        Ok(Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: self.span_from(start),
        })
    }

    /// Parse addition and subtraction
    fn parse_addition(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut left = self.parse_multiplication()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplication()?;
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: self.span_from(start),
            };
        }

        Ok(left)
    }

    /// Parse multiplication, division and modulo
    fn parse_multiplication(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                TokenKind::Percent => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span: self.span_from(start),
            };
        }

        Ok(left)
    }

    /// Parse unary `+` and `-`
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();

        let op = match self.current().kind {
            TokenKind::Plus => UnaryOperator::Plus,
            TokenKind::Minus => UnaryOperator::Negate,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;

        Ok(Expression::UnaryOp {
            op,
            operand: Box::new(operand),
            span: self.span_from(start),
        })
    }

    /// Parse calls `f(a, b)` and indexing `xs @ i`
    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::LeftParen) {
                self.advance();
                let mut args = Vec::new();
                if !self.check(&TokenKind::RightParen) {
                    args.push(self.parse_expression()?);
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        args.push(self.parse_expression()?);
                    }
                }
                self.expect(&TokenKind::RightParen)?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                    span: self.span_from(start),
                };
            } else if self.check(&TokenKind::At) {
                self.advance();
                let index = self.parse_index_operand()?;
                expr = Expression::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                    span: self.span_from(start),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Index operand: an atom, optionally signed (`xs @ -1`)
    fn parse_index_operand(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();

        let op = match self.current().kind {
            TokenKind::Plus => UnaryOperator::Plus,
            TokenKind::Minus => UnaryOperator::Negate,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_index_operand()?;

        Ok(Expression::UnaryOp {
            op,
            operand: Box::new(operand),
            span: self.span_from(start),
        })
    }

    /// Parse primary expressions (atoms and keyword-introduced forms)
    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let span = self.current().span.clone();

        let literal = match &self.current().kind {
            TokenKind::Integer(n) => Some(Expression::Number {
                value: NumberLiteral::Int(*n),
                span,
            }),
            TokenKind::Float(n) => Some(Expression::Number {
                value: NumberLiteral::Float(*n),
                span,
            }),
            TokenKind::True => Some(Expression::Number {
                value: NumberLiteral::Int(1),
                span,
            }),
            TokenKind::False => Some(Expression::Number {
                value: NumberLiteral::Int(0),
                span,
            }),
            TokenKind::String(s) => Some(Expression::String {
                value: s.clone(),
                span,
            }),
            TokenKind::Regex(p) => Some(Expression::Regex {
                pattern: p.clone(),
                span,
            }),
            TokenKind::Identifier(name) => Some(Expression::Variable {
                name: name.clone(),
                span,
            }),
            _ => None,
        };
        if let Some(expr) = literal {
            self.advance();
            return Ok(expr);
        }

        match self.current().kind {
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let elements = self.parse_sequence(&TokenKind::RightBracket)?;
                Ok(Expression::List {
                    elements,
                    span: self.span_from(start),
                })
            }
            TokenKind::TupleOpen => {
                self.advance();
                let elements = self.parse_sequence(&TokenKind::TupleClose)?;
                Ok(Expression::Tuple {
                    elements,
                    span: self.span_from(start),
                })
            }
            TokenKind::LeftBrace => self.parse_dict(),
            TokenKind::When => self.parse_when(),
            TokenKind::Cycle => self.parse_cycle(),
            TokenKind::AsLongAs => {
                self.advance();
                let condition = self.parse_logic()?;
                self.expect(&TokenKind::Colon)?;
                let body = self.parse_body()?;
                Ok(Expression::While {
                    condition: Box::new(condition),
                    body,
                    span: self.span_from(start),
                })
            }
            TokenKind::RepeatWhile => {
                self.advance();
                let condition = self.parse_logic()?;
                self.expect(&TokenKind::Colon)?;
                let body = self.parse_body()?;
                Ok(Expression::DoWhile {
                    condition: Box::new(condition),
                    body,
                    span: self.span_from(start),
                })
            }
            TokenKind::MakeFunction => self.parse_function_def(),
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::Attempt => self.parse_attempt(),
            TokenKind::Check => self.parse_check(),
            _ => Err(self.error_here(
                format!("Expected an expression, found {}", self.current().kind),
                ATOM_STARTS,
            )),
        }
    }

    /// Parse comma-separated elements up to `close` (newlines allowed between them)
    fn parse_sequence(&mut self, close: &TokenKind) -> ParseResult<Vec<Expression>> {
        let mut elements = Vec::new();
        self.skip_newlines();

        if !self.check(close) {
            elements.push(self.parse_expression()?);
            self.skip_newlines();
            while self.check(&TokenKind::Comma) {
                self.advance();
                self.skip_newlines();
                elements.push(self.parse_expression()?);
                self.skip_newlines();
            }
        }

        self.expect(close)?;
        Ok(elements)
    }

    /// Parse a dict literal: `{key: value, ...}`
    fn parse_dict(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::LeftBrace)?;
        self.skip_newlines();

        let mut entries = Vec::new();
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let key = self.parse_logic()?;
                self.expect(&TokenKind::Colon)?;
                self.skip_newlines();
                let value = self.parse_expression()?;
                entries.push((key, value));
                self.skip_newlines();

                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
                self.skip_newlines();
            }
        }

        self.expect(&TokenKind::RightBrace)?;
        Ok(Expression::Dict {
            entries,
            span: self.span_from(start),
        })
    }

    /// Parse a statement sequence following `:` NEWLINE, without its terminator
    fn parse_block(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        let statements = self.parse_statements()?;
        Ok(Expression::Block {
            statements,
            span: self.span_from(start),
        })
    }

    /// Parse the body after `:`, either inline or a block closed by `end`
    fn parse_body(&mut self) -> ParseResult<Body> {
        if self.check(&TokenKind::Newline) {
            self.advance();
            let block = self.parse_block()?;
            self.expect(&TokenKind::End)?;
            Ok(Body {
                expr: Box::new(block),
                block: true,
            })
        } else {
            let statement = self.parse_statement()?;
            Ok(Body {
                expr: Box::new(statement),
                block: false,
            })
        }
    }

    /// Parse one arm of a multi-line chain, where a shared `end` closes the construct
    fn parse_arm(&mut self) -> ParseResult<Body> {
        if self.check(&TokenKind::Newline) {
            self.advance();
            let block = self.parse_block()?;
            self.skip_newlines();
            Ok(Body {
                expr: Box::new(block),
                block: true,
            })
        } else {
            let statement = self.parse_statement()?;
            self.skip_newlines();
            Ok(Body {
                expr: Box::new(statement),
                block: false,
            })
        }
    }

    /// Parse `when c: ... otherwise when c: ... otherwise: ... end`
    fn parse_when(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::When)?;

        let guard = self.parse_logic()?;
        self.expect(&TokenKind::Colon)?;

        let mut branches = Vec::new();
        let mut otherwise = None;

        if self.check(&TokenKind::Newline) {
            // Multi-line chain sharing a single `end`
            branches.push(Branch {
                guard,
                body: self.parse_arm()?,
            });

            while self.check(&TokenKind::Otherwise) {
                self.advance();
                if self.check(&TokenKind::When) {
                    self.advance();
                    let guard = self.parse_logic()?;
                    self.expect(&TokenKind::Colon)?;
                    branches.push(Branch {
                        guard,
                        body: self.parse_arm()?,
                    });
                } else {
                    self.expect(&TokenKind::Colon)?;
                    otherwise = Some(self.parse_arm()?);
                    break;
                }
            }

            self.expect(&TokenKind::End)?;
        } else {
            let statement = self.parse_statement()?;
            branches.push(Branch {
                guard,
                body: Body {
                    expr: Box::new(statement),
                    block: false,
                },
            });

            while self.check(&TokenKind::Otherwise) {
                self.advance();
                if self.check(&TokenKind::When) {
                    self.advance();
                    let guard = self.parse_logic()?;
                    self.expect(&TokenKind::Colon)?;
                    let statement = self.parse_statement()?;
                    branches.push(Branch {
                        guard,
                        body: Body {
                            expr: Box::new(statement),
                            block: false,
                        },
                    });
                } else {
                    self.expect(&TokenKind::Colon)?;
                    let statement = self.parse_statement()?;
                    otherwise = Some(Body {
                        expr: Box::new(statement),
                        block: false,
                    });
                    break;
                }
            }
        }

        Ok(Expression::If {
            branches,
            otherwise,
            span: self.span_from(start),
        })
    }

    /// Parse `cycle n from a to b [step s]: ...` or `cycle each x through xs: ...`
    fn parse_cycle(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Cycle)?;

        if self.check(&TokenKind::Each) {
            self.advance();
            let (variable, _) = self.expect_identifier()?;
            self.expect(&TokenKind::Through)?;
            let iterable = self.parse_logic()?;
            self.expect(&TokenKind::Colon)?;
            let body = self.parse_body()?;
            return Ok(Expression::ForEach {
                variable,
                iterable: Box::new(iterable),
                body,
                span: self.span_from(start),
            });
        }

        let (variable, _) = self.expect_identifier()?;
        self.expect(&TokenKind::From)?;
        let from = self.parse_logic()?;
        self.expect(&TokenKind::To)?;
        let to = self.parse_logic()?;

        let step = if self.check(&TokenKind::Step) {
            self.advance();
            Some(Box::new(self.parse_logic()?))
        } else {
            None
        };

        self.expect(&TokenKind::Colon)?;
        let body = self.parse_body()?;

        Ok(Expression::ForRange {
            variable,
            start: Box::new(from),
            end: Box::new(to),
            step,
            body,
            span: self.span_from(start),
        })
    }

    /// Parse `make function [name](params): ...`
    fn parse_function_def(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::MakeFunction)?;

        let name = if self.check_identifier() {
            Some(self.expect_identifier()?.0)
        } else {
            None
        };

        self.expect(&TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            params.push(self.expect_identifier()?.0);
            while self.check(&TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?.0);
            }
        }
        self.expect(&TokenKind::RightParen)?;
        self.expect(&TokenKind::Colon)?;

        let body = self.parse_body()?;
        let body = Rc::new(FunctionBody {
            auto_return: !body.block,
            expr: *body.expr,
        });

        Ok(Expression::FunctionDef {
            name,
            params,
            body,
            span: self.span_from(start),
        })
    }

    /// Parse `lambda a, b => expr`
    fn parse_lambda(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Lambda)?;

        let mut params = Vec::new();
        if self.check_identifier() {
            params.push(self.expect_identifier()?.0);
            while self.check(&TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?.0);
            }
        }

        self.expect(&TokenKind::Arrow)?;
        let expr = self.parse_expression()?;

        Ok(Expression::Lambda {
            params,
            body: Rc::new(FunctionBody {
                expr,
                auto_return: true,
            }),
            span: self.span_from(start),
        })
    }

    /// Parse `attempt: ... handle [as e]: ...`
    fn parse_attempt(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Attempt)?;
        self.expect(&TokenKind::Colon)?;

        let body = self.parse_body()?;
        self.skip_newlines();
        self.expect(&TokenKind::Handle)?;

        let binding = if self.check(&TokenKind::As) {
            self.advance();
            Some(self.expect_identifier()?.0)
        } else {
            None
        };

        self.expect(&TokenKind::Colon)?;
        let handler = self.parse_body()?;

        Ok(Expression::Attempt {
            body,
            binding,
            handler,
            span: self.span_from(start),
        })
    }

    /// Parse `check v: whether a: ... default: ... end`
    fn parse_check(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Check)?;

        let subject = self.parse_logic()?;
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::Newline)?;
        self.skip_newlines();

        let mut cases = Vec::new();
        while self.check(&TokenKind::Whether) {
            self.advance();
            let guard = self.parse_logic()?;
            self.expect(&TokenKind::Colon)?;
            cases.push(Branch {
                guard,
                body: self.parse_arm()?,
            });
        }

        let default = if self.check(&TokenKind::Default) {
            self.advance();
            self.expect(&TokenKind::Colon)?;
            Some(self.parse_arm()?)
        } else {
            None
        };

        self.skip_newlines();
        if !self.check(&TokenKind::End) {
            let fallback = self.error_here(
                format!("Expected 'whether', 'default' or 'end', found {}", self.current().kind),
                &["'whether'", "'default'", "'end'"],
            );
            return Err(self.prefer_speculative(fallback));
        }
        self.advance();

        Ok(Expression::Switch {
            subject: Box::new(subject),
            cases,
            default,
            span: self.span_from(start),
        })
    }

    /// Parse `bring in m` or `bring a [as b], c from m`
    fn parse_import(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Bring)?;

        if self.check(&TokenKind::In) {
            self.advance();
            let module = self.parse_module_path()?;
            return Ok(Expression::Import {
                module,
                items: None,
                span: self.span_from(start),
            });
        }

        let mut items = vec![self.parse_import_item()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            items.push(self.parse_import_item()?);
        }

        self.expect(&TokenKind::From)?;
        let module = self.parse_module_path()?;

        Ok(Expression::Import {
            module,
            items: Some(items),
            span: self.span_from(start),
        })
    }

    fn parse_import_item(&mut self) -> ParseResult<ImportItem> {
        let start = self.mark_position();
        let (name, _) = self.expect_identifier()?;
        let alias = if self.check(&TokenKind::As) {
            self.advance();
            Some(self.expect_identifier()?.0)
        } else {
            None
        };
        Ok(ImportItem {
            name,
            alias,
            span: self.span_from(start),
        })
    }

    /// Parse a module path: `name` or `dir/name`
    fn parse_module_path(&mut self) -> ParseResult<String> {
        let (mut path, _) = self.expect_identifier()?;
        while self.check(&TokenKind::Slash) {
            self.advance();
            let (segment, _) = self.expect_identifier()?;
            path.push('/');
            path.push_str(&segment);
        }
        Ok(path)
    }

    /// Parse `share a, b`
    fn parse_share(&mut self) -> ParseResult<Expression> {
        let start = self.mark_position();
        self.expect(&TokenKind::Share)?;

        let mut names = vec![self.expect_identifier()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            names.push(self.expect_identifier()?);
        }

        Ok(Expression::Share {
            names,
            span: self.span_from(start),
        })
    }

    // Helper methods

    fn current(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.position += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn check_identifier(&self) -> bool {
        matches!(self.current().kind, TokenKind::Identifier(_))
    }

    /// True at a token that closes a statement sequence
    fn at_sequence_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Otherwise
                | TokenKind::Handle
                | TokenKind::Whether
                | TokenKind::Default
        )
    }

    /// Skip newline tokens, returning how many were consumed
    fn skip_newlines(&mut self) -> usize {
        let mut count = 0;
        while self.check(&TokenKind::Newline) {
            self.advance();
            count += 1;
        }
        count
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            let expected = kind.to_string();
            let fallback = self.error_here(
                format!("Expected {}, found {}", expected, self.current().kind),
                &[expected.as_str()],
            );
            Err(self.prefer_speculative(fallback))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<(String, Span)> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let result = (name.clone(), self.current().span.clone());
            self.advance();
            Ok(result)
        } else {
            Err(self.error_here(
                format!("Expected identifier, found {}", self.current().kind),
                &["identifier"],
            ))
        }
    }

    /// Run a nested parse step, refusing input nested beyond [`MAX_NESTING`]
    fn nested<T>(&mut self, step: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(
                format!("Expression is nested more than {} levels deep", MAX_NESTING),
                &[],
            ));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| step(self));
        self.depth -= 1;
        result
    }

    fn error_here(&self, message: String, expected: &[&str]) -> UttrError {
        UttrError::syntax(
            message,
            expected.iter().map(|e| e.to_string()).collect(),
            self.current().span.clone(),
        )
    }

    /// When a statement starting at the current token got partway through
    /// before failing, its error says more than "unexpected token".
    fn prefer_speculative(&mut self, fallback: UttrError) -> UttrError {
        let here = self.current().span.start.offset;
        match self.speculative_error.take() {
            Some(error) if error.span().start.offset > here => error,
            _ => fallback,
        }
    }

    /// Mark the current position to start tracking a span
    fn mark_position(&self) -> usize {
        self.position
    }

    /// Span from a marked position through the last consumed token
    fn span_from(&self, start_pos: usize) -> Span {
        let start = &self.tokens[start_pos].span;
        if self.position > start_pos {
            start.to(&self.tokens[self.position - 1].span)
        } else {
            start.clone()
        }
    }
}

/// Parse a source unit using the token-based parser
pub fn parse(unit_name: &str, source: &str) -> Result<Program, UttrError> {
    let tokens = crate::lexer::tokenize(unit_name, source)?;
    let mut parser = TokenParser::new(tokens);
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Program {
        let result = parse("<test>", source);
        if let Err(e) = &result {
            println!("Error: {:?}", e);
        }
        assert!(result.is_ok());
        result.unwrap()
    }

    #[test]
    fn test_parse_empty_program() {
        assert!(parse_ok("").statements.is_empty());
        assert!(parse_ok("\n\n$ only a comment\n").statements.is_empty());
    }

    #[test]
    fn test_parse_put_and_show() {
        let program = parse_ok("put 1 + 2 in x\nshow x");
        assert_eq!(program.statements.len(), 2);

        match &program.statements[0] {
            Expression::Assign { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(
                    value.as_ref(),
                    Expression::BinaryOp {
                        op: BinaryOperator::Add,
                        ..
                    }
                ));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }

        match &program.statements[1] {
            Expression::Call { callee, args, .. } => {
                assert!(matches!(callee.as_ref(), Expression::Variable { name, .. } if name == "show"));
                assert_eq!(args.len(), 1);
            }
            other => panic!("Expected show call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keep() {
        let program = parse_ok("keep 3.14 as pi");
        assert!(matches!(
            &program.statements[0],
            Expression::ConstAssign { name, .. } if name == "pi"
        ));
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse_ok("1 + 2 * 3");
        match &program.statements[0] {
            Expression::BinaryOp { op, right, .. } => {
                assert_eq!(*op, BinaryOperator::Add);
                assert!(matches!(
                    right.as_ref(),
                    Expression::BinaryOp {
                        op: BinaryOperator::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("Expected binary op, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_binds_loosest() {
        let program = parse_ok("not a and b");
        match &program.statements[0] {
            Expression::UnaryOp { op, operand, .. } => {
                assert_eq!(*op, UnaryOperator::Not);
                assert!(matches!(
                    operand.as_ref(),
                    Expression::BinaryOp {
                        op: BinaryOperator::And,
                        ..
                    }
                ));
            }
            other => panic!("Expected not, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comparison_does_not_chain() {
        assert!(parse("<test>", "1 < 2 < 3").is_err());
    }

    #[test]
    fn test_parse_true_false_desugar() {
        let program = parse_ok("true\nfalse");
        assert!(matches!(
            program.statements[0],
            Expression::Number {
                value: NumberLiteral::Int(1),
                ..
            }
        ));
        assert!(matches!(
            program.statements[1],
            Expression::Number {
                value: NumberLiteral::Int(0),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_collections() {
        let program = parse_ok("[1, 2, 3]\n<1, 2>\n<>\n{\"a\": 1, \"b\": 2}\n[]");
        assert!(matches!(&program.statements[0], Expression::List { elements, .. } if elements.len() == 3));
        assert!(matches!(&program.statements[1], Expression::Tuple { elements, .. } if elements.len() == 2));
        assert!(matches!(&program.statements[2], Expression::Tuple { elements, .. } if elements.is_empty()));
        assert!(matches!(&program.statements[3], Expression::Dict { entries, .. } if entries.len() == 2));
        assert!(matches!(&program.statements[4], Expression::List { elements, .. } if elements.is_empty()));
    }

    #[test]
    fn test_parse_multiline_list() {
        let program = parse_ok("put [\n  1,\n  2\n] in xs");
        match &program.statements[0] {
            Expression::Assign { value, .. } => {
                assert!(matches!(value.as_ref(), Expression::List { elements, .. } if elements.len() == 2));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_index_and_call_chain() {
        let program = parse_ok("f(1) @ 0 @ -1");
        match &program.statements[0] {
            Expression::Index { target, index, .. } => {
                assert!(matches!(
                    index.as_ref(),
                    Expression::UnaryOp {
                        op: UnaryOperator::Negate,
                        ..
                    }
                ));
                assert!(matches!(target.as_ref(), Expression::Index { .. }));
            }
            other => panic!("Expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_when_block_chain() {
        let source = "when x > 1:\n  show 1\notherwise when x == 1:\n  show 2\notherwise:\n  show 3\nend";
        let program = parse_ok(source);
        match &program.statements[0] {
            Expression::If {
                branches, otherwise, ..
            } => {
                assert_eq!(branches.len(), 2);
                assert!(branches[0].body.block);
                assert!(otherwise.as_ref().is_some_and(|b| b.block));
            }
            other => panic!("Expected when, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_when_single_line() {
        let program = parse_ok("when x: 1 otherwise when y: 2 otherwise: 3");
        match &program.statements[0] {
            Expression::If {
                branches, otherwise, ..
            } => {
                assert_eq!(branches.len(), 2);
                assert!(!branches[0].body.block);
                assert!(otherwise.is_some());
            }
            other => panic!("Expected when, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_cycle_forms() {
        let program = parse_ok(
            "cycle i from 0 to 10 step 2:\n  show i\nend\ncycle each x through xs: show x",
        );
        assert!(matches!(
            &program.statements[0],
            Expression::ForRange { variable, step: Some(_), body, .. } if variable == "i" && body.block
        ));
        assert!(matches!(
            &program.statements[1],
            Expression::ForEach { variable, body, .. } if variable == "x" && !body.block
        ));
    }

    #[test]
    fn test_parse_while_forms() {
        let program = parse_ok("as long as i < 3:\n  put i + 1 in i\nend\nrepeat while i > 0: put i - 1 in i");
        assert!(matches!(&program.statements[0], Expression::While { .. }));
        assert!(matches!(&program.statements[1], Expression::DoWhile { .. }));
    }

    #[test]
    fn test_parse_function_definitions() {
        let program = parse_ok(
            "make function add(a, b): a + b\nmake function greet(name):\n  give \"hi \" + name\nend\nput lambda x => x * 2 in double",
        );

        match &program.statements[0] {
            Expression::FunctionDef {
                name, params, body, ..
            } => {
                assert_eq!(name.as_deref(), Some("add"));
                assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
                assert!(body.auto_return);
            }
            other => panic!("Expected function, got {:?}", other),
        }

        match &program.statements[1] {
            Expression::FunctionDef { body, .. } => assert!(!body.auto_return),
            other => panic!("Expected function, got {:?}", other),
        }

        match &program.statements[2] {
            Expression::Assign { value, .. } => {
                assert!(matches!(value.as_ref(), Expression::Lambda { params, .. } if params.len() == 1));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_anonymous_function() {
        let program = parse_ok("put make function (x): x in identity");
        match &program.statements[0] {
            Expression::Assign { value, .. } => {
                assert!(matches!(value.as_ref(), Expression::FunctionDef { name: None, .. }));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_give_without_value() {
        let program = parse_ok("make function f():\n  give\nend");
        match &program.statements[0] {
            Expression::FunctionDef { body, .. } => match &body.expr {
                Expression::Block { statements, .. } => {
                    assert!(matches!(statements[0], Expression::Return { value: None, .. }));
                }
                other => panic!("Expected block, got {:?}", other),
            },
            other => panic!("Expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_attempt() {
        let program = parse_ok("attempt:\n  show 1 / 0\nend\nhandle as err:\n  show err\nend");
        match &program.statements[0] {
            Expression::Attempt {
                body,
                binding,
                handler,
                ..
            } => {
                assert!(body.block);
                assert_eq!(binding.as_deref(), Some("err"));
                assert!(handler.block);
            }
            other => panic!("Expected attempt, got {:?}", other),
        }

        let program = parse_ok("attempt: 1 / 0 handle: 0");
        assert!(matches!(
            &program.statements[0],
            Expression::Attempt { binding: None, .. }
        ));
    }

    #[test]
    fn test_parse_check() {
        let source = "check x:\n  whether 1:\n    show \"one\"\n  whether 2: show \"two\"\n  default:\n    show \"many\"\nend";
        let program = parse_ok(source);
        match &program.statements[0] {
            Expression::Switch { cases, default, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(cases[0].body.block);
                assert!(!cases[1].body.block);
                assert!(default.is_some());
            }
            other => panic!("Expected check, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_requires_newline() {
        assert!(parse("<test>", "check x: whether 1: 1 end").is_err());
    }

    #[test]
    fn test_parse_import_forms() {
        let program = parse_ok("bring in utils/math\nbring add as plus, sub from math");

        assert!(matches!(
            &program.statements[0],
            Expression::Import { module, items: None, .. } if module == "utils/math"
        ));

        match &program.statements[1] {
            Expression::Import { module, items: Some(items), .. } => {
                assert_eq!(module, "math");
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].name, "add");
                assert_eq!(items[0].alias.as_deref(), Some("plus"));
                assert_eq!(items[1].alias, None);
            }
            other => panic!("Expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_share() {
        let program = parse_ok("share a, b");
        match &program.statements[0] {
            Expression::Share { names, .. } => {
                let names: Vec<&str> = names.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("Expected share, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_end_is_error() {
        let err = parse("<test>", "when x:\n  show x\n").unwrap_err();
        match err {
            UttrError::Syntax { expected, .. } => assert!(expected.contains(&"'end'".to_string())),
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_reports_inner_statement_error() {
        // The failed `put` is reported rather than a generic unexpected token
        let err = parse("<test>", "show 1\nput 2 show").unwrap_err();
        match err {
            UttrError::Syntax { expected, span, .. } => {
                assert_eq!(span.start.line, 2);
                assert!(expected.contains(&"'in'".to_string()));
            }
            other => panic!("Expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse("<test>", "put 1 in").unwrap_err();
        assert_eq!(err.name(), "Invalid Syntax");
        assert_eq!(err.span().start.line, 1);
    }

    #[test]
    fn test_parsed_programs_compare_structurally() {
        assert_eq!(parse_ok("put 1 + 2 in x"), parse_ok("put 1 + 2 in x"));
        assert_ne!(parse_ok("put 1 in x"), parse_ok("put 2 in x"));
    }

    #[test]
    fn test_parse_moderate_nesting() {
        let source = format!("put {}1{} in x", "(".repeat(300), ")".repeat(300));
        let program = parse_ok(&source);
        assert_eq!(program.statements.len(), 1);

        let source = format!("put {}1 in x", "-".repeat(300));
        assert_eq!(parse_ok(&source).statements.len(), 1);
    }

    #[test]
    fn test_parse_rejects_excessive_nesting() {
        let source = format!("put {}1{} in x", "(".repeat(100_000), ")".repeat(100_000));
        let err = parse("<test>", &source).unwrap_err();
        assert_eq!(err.name(), "Invalid Syntax");
        assert!(err.message().contains("nested more than 1000 levels"));

        let source = format!("show {}1", "-".repeat(100_000));
        assert!(parse("<test>", &source).is_err());

        let source = format!("show {}1{}", "[".repeat(50_000), "]".repeat(50_000));
        assert!(parse("<test>", &source).is_err());
    }

    #[test]
    fn test_parse_never_panics_on_garbage() {
        for source in [")", "]]", "put", "when", "cycle i from", "make function (", "{1:", "<1, 2", "@"] {
            assert!(parse("<test>", source).is_err(), "{} should not parse", source);
        }
    }
}
