//! Error taxonomy and formatting for UTTR
//!
//! Every phase reports failures as a [`UttrError`] that carries the span of
//! the offending source. [`format_error`] turns one into a user-friendly,
//! coloured report with a source excerpt and caret underline.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::lexer::Span;

/// Sub-category of a runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    UndefinedName,
    IllegalOperation,
    TypeMismatch,
    IndexOutOfBounds,
    KeyNotFound,
    ArityMismatch,
    DivisionByZero,
    InvalidPattern,
    Native,
    ModuleFailed,
    RecursionLimit,
    StrayControl,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeErrorKind::UndefinedName => "undefined name",
            RuntimeErrorKind::IllegalOperation => "illegal operation",
            RuntimeErrorKind::TypeMismatch => "type mismatch",
            RuntimeErrorKind::IndexOutOfBounds => "index out of bounds",
            RuntimeErrorKind::KeyNotFound => "key not found",
            RuntimeErrorKind::ArityMismatch => "arity mismatch",
            RuntimeErrorKind::DivisionByZero => "division by zero",
            RuntimeErrorKind::InvalidPattern => "invalid pattern",
            RuntimeErrorKind::Native => "built-in failure",
            RuntimeErrorKind::ModuleFailed => "module failure",
            RuntimeErrorKind::RecursionLimit => "recursion limit",
            RuntimeErrorKind::StrayControl => "stray control flow",
        };
        f.write_str(name)
    }
}

/// Any error produced while lexing, parsing or running a program
#[derive(Debug, Clone, Error)]
pub enum UttrError {
    #[error("Illegal Character: {message}")]
    Lexical { message: String, span: Span },

    #[error("Invalid Syntax: {message}")]
    Syntax {
        message: String,
        expected: Vec<String>,
        span: Span,
    },

    #[error("Runtime Error: {message}")]
    Runtime {
        kind: RuntimeErrorKind,
        message: String,
        span: Span,
    },

    #[error("Module Not Found: Module '{module}' not found")]
    ModuleNotFound {
        module: String,
        searched: Vec<PathBuf>,
        span: Span,
    },

    #[error("Circular Import: Circular import detected involving '{module}'")]
    CircularImport {
        module: String,
        chain: Vec<String>,
        span: Span,
    },
}

impl UttrError {
    pub fn lexical(message: impl Into<String>, span: Span) -> Self {
        UttrError::Lexical {
            message: message.into(),
            span,
        }
    }

    pub fn syntax(message: impl Into<String>, expected: Vec<String>, span: Span) -> Self {
        UttrError::Syntax {
            message: message.into(),
            expected,
            span,
        }
    }

    pub fn runtime(kind: RuntimeErrorKind, message: impl Into<String>, span: Span) -> Self {
        UttrError::Runtime {
            kind,
            message: message.into(),
            span,
        }
    }

    /// Source span the error points at
    pub fn span(&self) -> &Span {
        match self {
            UttrError::Lexical { span, .. }
            | UttrError::Syntax { span, .. }
            | UttrError::Runtime { span, .. }
            | UttrError::ModuleNotFound { span, .. }
            | UttrError::CircularImport { span, .. } => span,
        }
    }

    /// Error category name, as exposed to scripts through `error_type`
    pub fn name(&self) -> &'static str {
        match self {
            UttrError::Lexical { .. } => "Illegal Character",
            UttrError::Syntax { .. } => "Invalid Syntax",
            UttrError::Runtime { .. } => "Runtime Error",
            UttrError::ModuleNotFound { .. } => "Module Not Found",
            UttrError::CircularImport { .. } => "Circular Import",
        }
    }

    /// Error message without the category prefix
    pub fn message(&self) -> String {
        match self {
            UttrError::Lexical { message, .. }
            | UttrError::Syntax { message, .. }
            | UttrError::Runtime { message, .. } => message.clone(),
            UttrError::ModuleNotFound { module, .. } => format!("Module '{}' not found", module),
            UttrError::CircularImport { module, .. } => {
                format!("Circular import detected involving '{}'", module)
            }
        }
    }

    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            UttrError::Runtime { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Format an error with context and helpful information
pub fn format_error(error: &UttrError) -> String {
    let mut output = String::new();
    let span = error.span();
    let line = span.start.line;
    let col = span.start.column;

    // Error header
    output.push_str(&format!(
        "{} {}\n",
        format!("{}:", error.name()).red().bold(),
        error.message()
    ));

    // Location information
    output.push_str(&format!(
        "  {} {}\n",
        "-->".blue().bold(),
        format!("{}:{}:{}", span.unit_name(), line, col).cyan()
    ));

    // Show the problematic line with context
    if let Some(text) = span.file.line(line) {
        output.push_str(&format!("   {}\n", "|".blue()));

        if line > 1 {
            if let Some(previous) = span.file.line(line - 1) {
                output.push_str(&format!(
                    " {} | {}\n",
                    format!("{:3}", line - 1).blue().dimmed(),
                    previous.dimmed()
                ));
            }
        }

        output.push_str(&format!(
            " {} | {}\n",
            format!("{:3}", line).blue().bold(),
            text
        ));

        // Underline up to the end of the span when it stays on this line
        let width = if span.end.line == line && span.end.column > col {
            span.end.column - col
        } else {
            1
        };
        let indicator = format!("{}{}", " ".repeat(col.saturating_sub(1) + 7), "^".repeat(width));
        output.push_str(&format!("   {} {}\n", "|".blue(), indicator.red().bold()));

        if let Some(next) = span.file.line(line + 1) {
            output.push_str(&format!(
                " {} | {}\n",
                format!("{:3}", line + 1).blue().dimmed(),
                next.dimmed()
            ));
        }

        output.push_str(&format!("   {}\n", "|".blue()));
    }

    match error {
        UttrError::Syntax { expected, .. } if !expected.is_empty() => {
            output.push_str(&format!(
                "  {} {}\n",
                "Expected:".green().bold(),
                expected.join(", ")
            ));
        }
        UttrError::ModuleNotFound { searched, .. } => {
            output.push_str(&format!("  {}\n", "Searched:".yellow().bold()));
            for path in searched {
                output.push_str(&format!("    {}\n", path.display()));
            }
        }
        UttrError::CircularImport { chain, .. } => {
            output.push_str(&format!(
                "  {} {}\n",
                "Import chain:".yellow().bold(),
                chain.join(" -> ")
            ));
        }
        UttrError::Runtime { kind, .. } => {
            output.push_str(&get_error_hint(*kind));
        }
        _ => {}
    }

    output
}

/// Get a helpful hint for common runtime errors
fn get_error_hint(kind: RuntimeErrorKind) -> String {
    let hint = match kind {
        RuntimeErrorKind::UndefinedName => "Bind a name with 'put <value> in <name>' before using it",
        RuntimeErrorKind::ArityMismatch => "Check the number of arguments passed to the function",
        RuntimeErrorKind::RecursionLimit => "Check for a recursive function that never reaches its base case",
        RuntimeErrorKind::StrayControl => "'cut' and 'skip' only work inside 'cycle', 'as long as' or 'repeat while'",
        _ => return String::new(),
    };
    format!("  {} {}\n", "Hint:".cyan().bold(), hint)
}
