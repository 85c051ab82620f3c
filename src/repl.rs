//! REPL (Read-Eval-Print Loop) for UTTR
//!
//! Provides an interactive shell over one persistent [`Interpreter`].

use crate::{format_error, Interpreter, InterpreterConfig};
use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::{history::FileHistory, CompletionType, Config, Editor};
use std::path::PathBuf;
use tracing::debug;

/// Unit name given to REPL input in diagnostics
const REPL_UNIT: &str = "<repl>";

/// Run the interactive REPL
pub fn run_repl(config: InterpreterConfig) -> Result<()> {
    println!("{}", format!("UTTR REPL v{}", crate::VERSION).cyan().bold());
    println!("{}", "Type :help for help, :quit to exit".dimmed());
    println!();

    let editor_config = Config::builder()
        .completion_type(CompletionType::List)
        .auto_add_history(true)
        .build();

    let mut rl: Editor<(), FileHistory> = Editor::with_config(editor_config)?;

    let history_path = get_history_path();
    if let Some(path) = &history_path {
        if rl.load_history(path).is_err() {
            debug!("No history loaded from {}", path.display());
        }
    }

    debug!("REPL session started");
    let mut interpreter = Interpreter::new(config.clone());
    let mut input = PendingInput::default();

    loop {
        let prompt = if input.is_empty() {
            "uttr> ".green().bold().to_string()
        } else {
            "  ... ".yellow().bold().to_string()
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                if input.is_empty() && line.trim_start().starts_with(':') {
                    match line.trim() {
                        ":quit" | ":q" | ":exit" => {
                            println!("{}", "Goodbye!".cyan());
                            break;
                        }
                        ":help" | ":h" => print_help(),
                        ":clear" | ":c" => {
                            interpreter = Interpreter::new(config.clone());
                            debug!("REPL state cleared");
                            println!("{}", "✓ State cleared".green());
                        }
                        ":vars" | ":v" => print_variables(&interpreter),
                        other => {
                            eprintln!("{} {}", "Unknown command:".red(), other);
                            println!("{}", "Type :help for available commands".dimmed());
                        }
                    }
                    continue;
                }

                if let Some(source) = input.push_line(&line) {
                    if !source.trim().is_empty() {
                        evaluate(&mut interpreter, &source);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                input = PendingInput::default();
                println!("{}", "^C".dimmed());
                println!("{}", "Use :quit to exit".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }

    if let Some(path) = history_path {
        if let Err(e) = rl.save_history(&path) {
            debug!("Failed to save history to {}: {}", path.display(), e);
        }
    }

    debug!("REPL session ended");
    Ok(())
}

fn evaluate(interpreter: &mut Interpreter, source: &str) {
    match interpreter.run_source(REPL_UNIT, source) {
        Ok(value) => {
            if !value.is_null() {
                println!("{}", value.repr());
            }
        }
        Err(e) => eprint!("{}", format_error(&e)),
    }
}

/// Input lines collected until they form a complete unit
#[derive(Debug, Default)]
struct PendingInput {
    /// Logical lines accepted so far
    source: String,
    /// Physical lines joined by trailing backslashes
    continued: String,
    /// Blocks opened and not yet closed by `end`
    depth: i32,
}

impl PendingInput {
    fn is_empty(&self) -> bool {
        self.source.is_empty() && self.continued.is_empty()
    }

    /// Add a line; returns the complete source once nothing is left open
    fn push_line(&mut self, line: &str) -> Option<String> {
        let trimmed = line.trim_end();
        if let Some(head) = trimmed.strip_suffix('\\') {
            self.continued.push_str(head);
            self.continued.push(' ');
            return None;
        }

        let logical = std::mem::take(&mut self.continued) + trimmed;
        self.depth += block_delta(&logical);
        self.source.push_str(&logical);
        self.source.push('\n');

        if self.depth > 0 {
            return None;
        }
        self.depth = 0;
        Some(std::mem::take(&mut self.source))
    }
}

/// How a line changes the number of blocks awaiting `end`
fn block_delta(line: &str) -> i32 {
    let line = line.trim().trim_end_matches(';');
    if line == "end" {
        return -1;
    }

    // Arms of an open block share its `end`
    let continues_block = ["otherwise", "whether", "default"]
        .iter()
        .any(|word| line.starts_with(word));
    if line.ends_with(':') && !continues_block {
        1
    } else {
        0
    }
}

/// Get the history file path
fn get_history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".uttr_history"))
}

fn print_help() {
    println!("{}", "UTTR REPL Commands:".cyan().bold());
    println!("  {}  - Show this help message", ":help, :h".green());
    println!("  {}  - Exit the REPL", ":quit, :q, :exit".green());
    println!("  {}  - Start over with a fresh interpreter", ":clear, :c".green());
    println!("  {}  - Show all variables", ":vars, :v".green());
    println!();
    println!("{}", "Features:".cyan().bold());
    println!(
        "  {} - Persistent command history (~/.uttr_history)",
        "Up/Down arrows".dimmed()
    );
    println!(
        "  {} - Multi-line input (end line with \\)",
        "Backslash".dimmed()
    );
    println!(
        "  {} - Lines ending in ':' read until the matching 'end'",
        "Blocks".dimmed()
    );
    println!();
    println!("{}", "Examples:".cyan().bold());
    println!("  {}  - Evaluate an expression", "2 + 2".dimmed());
    println!("  {}  - Define a variable", "put 42 in x".dimmed());
    println!("  {}  - Define a function", "make function double(n): n * 2".dimmed());
    println!("  {}  - Use a function", "double(21)".dimmed());
}

fn print_variables(interpreter: &Interpreter) {
    let bindings = interpreter.user_bindings();
    if bindings.is_empty() {
        println!("{}", "No variables defined".dimmed());
        return;
    }

    println!("{}", "Variables:".cyan().bold());
    for (name, value) in bindings {
        println!("  {} = {}", name.green(), value.repr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_block_delta() {
        assert_eq!(block_delta("when x > 1:"), 1);
        assert_eq!(block_delta("  otherwise:"), 0);
        assert_eq!(block_delta("whether 2:"), 0);
        assert_eq!(block_delta("end"), -1);
        assert_eq!(block_delta("when x: show x"), 0);
        assert_eq!(block_delta("handle as e:"), 1);
    }

    #[test]
    fn test_pending_input_waits_for_end() {
        let mut input = PendingInput::default();
        assert_eq!(input.push_line("make function f(n):"), None);
        assert_eq!(input.push_line("  when n > 0:"), None);
        assert_eq!(input.push_line("    give n"), None);
        assert_eq!(input.push_line("  end"), None);
        assert_eq!(
            input.push_line("end"),
            Some("make function f(n):\n  when n > 0:\n    give n\n  end\nend\n".to_string())
        );
        assert!(input.is_empty());
    }

    #[test]
    fn test_pending_input_joins_backslash_lines() {
        let mut input = PendingInput::default();
        assert_eq!(input.push_line("put 1 + \\"), None);
        assert!(!input.is_empty());
        assert_eq!(input.push_line("2 in x"), Some("put 1 +  2 in x\n".to_string()));
    }
}
