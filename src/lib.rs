//! UTTR - Understandable Translation Tool for Routines
//!
//! An interpreter for a small scripting language with English-keyword syntax
//! (`put 5 in x`, `cycle i from 0 to 10:`, `make function f(a):`). Source is
//! lexed, parsed into an AST and evaluated by a tree-walking evaluator.

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod module_source;
pub mod stack;
pub mod symbol_table;
pub mod token_parser;
pub mod value;

// CLI-only modules
#[cfg(feature = "cli")]
pub mod repl;

use std::io::Write;
use std::path::PathBuf;

// Re-export commonly used types
pub use error::{format_error, RuntimeErrorKind, UttrError};
pub use evaluator::{Evaluator, OutputBuffer};
pub use lexer::{tokenize, Token, TokenKind};
pub use token_parser::{parse, TokenParser};
pub use value::Value;

/// UTTR version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bound on nested user-function calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Interpreter settings
#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub max_call_depth: usize,
    /// Standard library directory; see [`module_source::default_stdlib_dir`]
    /// for the fallback when unset
    pub stdlib_dir: Option<PathBuf>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stdlib_dir: None,
        }
    }
}

impl InterpreterConfig {
    pub fn stdlib_dir(&self) -> PathBuf {
        self.stdlib_dir
            .clone()
            .unwrap_or_else(module_source::default_stdlib_dir)
    }
}

/// A persistent interpreter session
///
/// Bindings made by one [`Interpreter::run_source`] call stay visible to the
/// next, and imported modules stay cached.
pub struct Interpreter {
    evaluator: Evaluator,
}

impl Interpreter {
    /// Create an interpreter writing to stdout
    pub fn new(config: InterpreterConfig) -> Self {
        Self::with_output(config, Box::new(std::io::stdout()))
    }

    /// Create an interpreter writing `show` output to the given sink
    pub fn with_output(config: InterpreterConfig, output: Box<dyn Write>) -> Self {
        Self {
            evaluator: Evaluator::new(config.max_call_depth, config.stdlib_dir(), output),
        }
    }

    /// Lex, parse and evaluate one source unit.
    ///
    /// Returns the value of the last top-level statement, or of a top-level
    /// `give`.
    pub fn run_source(&mut self, unit_name: &str, source: &str) -> Result<Value, UttrError> {
        let program = parse(unit_name, source)?;
        self.evaluator.run_program(&program)
    }

    /// Global bindings created by programs run so far
    pub fn user_bindings(&self) -> Vec<(String, Value)> {
        self.evaluator.user_bindings()
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}

/// Run a source unit in a fresh interpreter
pub fn run(unit_name: &str, source: &str) -> Result<Value, UttrError> {
    Interpreter::default().run_source(unit_name, source)
}
