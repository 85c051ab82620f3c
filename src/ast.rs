//! Abstract Syntax Tree definitions for UTTR
//!
//! Every syntactic form is an [`Expression`]: statements such as `put`,
//! loops and imports all produce a value when evaluated, so there is no
//! separate statement type. Each variant carries the span it was parsed from.

use std::rc::Rc;

use crate::lexer::{SourceFile, Span};

/// A parsed source unit
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub file: Rc<SourceFile>,
    pub statements: Vec<Expression>,
}

/// Numeric literal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Int(i64),
    Float(f64),
}

/// Individual import item with optional alias: `name [as alias]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub name: String,
    pub alias: Option<String>,
    pub span: Span,
}

/// Body of a block construct.
///
/// `block` bodies (`:` NEWLINE ... `end`) evaluate to null; inline bodies
/// evaluate to the value of their single statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub expr: Box<Expression>,
    pub block: bool,
}

/// One guarded arm of `when` or `check`
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub guard: Expression,
    pub body: Body,
}

/// Function body shared between the AST and every function value created from it
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub expr: Expression,
    /// Inline bodies and lambdas return their value without `give`
    pub auto_return: bool,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl std::fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        };
        f.write_str(symbol)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Negate,
    Not,
}

/// Expression (every syntactic form of the language)
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Number literal (also `true`/`false`, which parse to 1/0)
    Number { value: NumberLiteral, span: Span },

    /// String literal
    String { value: String, span: Span },

    /// Regex literal: `r"pattern"`
    Regex { pattern: String, span: Span },

    /// List literal: `[a, b]`
    List { elements: Vec<Expression>, span: Span },

    /// Tuple literal: `<a, b>`
    Tuple { elements: Vec<Expression>, span: Span },

    /// Dict literal: `{k: v}`
    Dict {
        entries: Vec<(Expression, Expression)>,
        span: Span,
    },

    /// Variable reference
    Variable { name: String, span: Span },

    /// `put value in name`
    Assign {
        name: String,
        value: Box<Expression>,
        span: Span,
    },

    /// `keep value as name`
    ConstAssign {
        name: String,
        value: Box<Expression>,
        span: Span,
    },

    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        span: Span,
    },

    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
        span: Span,
    },

    /// `when c: ... otherwise when c: ... otherwise: ... end`
    If {
        branches: Vec<Branch>,
        otherwise: Option<Body>,
        span: Span,
    },

    /// `check v: whether a: ... default: ... end`
    Switch {
        subject: Box<Expression>,
        cases: Vec<Branch>,
        default: Option<Body>,
        span: Span,
    },

    /// `cycle n from a to b [step s]: ...`
    ForRange {
        variable: String,
        start: Box<Expression>,
        end: Box<Expression>,
        step: Option<Box<Expression>>,
        body: Body,
        span: Span,
    },

    /// `cycle each x through xs: ...`
    ForEach {
        variable: String,
        iterable: Box<Expression>,
        body: Body,
        span: Span,
    },

    /// `as long as c: ...`
    While {
        condition: Box<Expression>,
        body: Body,
        span: Span,
    },

    /// `repeat while c: ...`
    DoWhile {
        condition: Box<Expression>,
        body: Body,
        span: Span,
    },

    /// `make function [name](params): ...`
    FunctionDef {
        name: Option<String>,
        params: Vec<String>,
        body: Rc<FunctionBody>,
        span: Span,
    },

    /// `lambda params => expr`
    Lambda {
        params: Vec<String>,
        body: Rc<FunctionBody>,
        span: Span,
    },

    /// Function call
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
        span: Span,
    },

    /// `give [expr]`
    Return {
        value: Option<Box<Expression>>,
        span: Span,
    },

    /// `cut`
    Break { span: Span },

    /// `skip`
    Continue { span: Span },

    /// `target @ index`
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
        span: Span,
    },

    /// `attempt: ... handle [as e]: ...`
    Attempt {
        body: Body,
        binding: Option<String>,
        handler: Body,
        span: Span,
    },

    /// `bring in m` (items = None) or `bring a [as b], ... from m`
    Import {
        module: String,
        items: Option<Vec<ImportItem>>,
        span: Span,
    },

    /// `share a, b`
    Share { names: Vec<(String, Span)>, span: Span },

    /// Statement sequence
    Block {
        statements: Vec<Expression>,
        span: Span,
    },
}

impl Expression {
    /// Get the span of this expression
    pub fn span(&self) -> &Span {
        match self {
            Expression::Number { span, .. }
            | Expression::String { span, .. }
            | Expression::Regex { span, .. }
            | Expression::List { span, .. }
            | Expression::Tuple { span, .. }
            | Expression::Dict { span, .. }
            | Expression::Variable { span, .. }
            | Expression::Assign { span, .. }
            | Expression::ConstAssign { span, .. }
            | Expression::BinaryOp { span, .. }
            | Expression::UnaryOp { span, .. }
            | Expression::If { span, .. }
            | Expression::Switch { span, .. }
            | Expression::ForRange { span, .. }
            | Expression::ForEach { span, .. }
            | Expression::While { span, .. }
            | Expression::DoWhile { span, .. }
            | Expression::FunctionDef { span, .. }
            | Expression::Lambda { span, .. }
            | Expression::Call { span, .. }
            | Expression::Return { span, .. }
            | Expression::Break { span }
            | Expression::Continue { span }
            | Expression::Index { span, .. }
            | Expression::Attempt { span, .. }
            | Expression::Import { span, .. }
            | Expression::Share { span, .. }
            | Expression::Block { span, .. } => span,
        }
    }
}
