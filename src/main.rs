//! UTTR CLI - run, inspect and explore UTTR programs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uttr::module_source::MODULE_EXTENSION;
use uttr::{format_error, Interpreter, InterpreterConfig, TokenKind, UttrError};

#[derive(Parser)]
#[command(name = "uttr")]
#[command(about = "UTTR - an English-syntax scripting language", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    /// Standard library directory
    #[arg(long, global = true, value_name = "DIR")]
    stdlib: Option<PathBuf>,

    /// Maximum nesting of function calls
    #[arg(long, global = true, value_name = "N", default_value_t = uttr::DEFAULT_MAX_CALL_DEPTH)]
    max_depth: usize,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program
    Run {
        /// Path to the program
        path: PathBuf,
    },

    /// Dump the token stream of a file
    Tokens {
        /// Path to the program
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = TokenFormat::Text)]
        format: TokenFormat,
    },

    /// Parse a file and display its AST
    Parse {
        /// Path to the program
        path: PathBuf,
    },

    /// Start interactive REPL (Read-Eval-Print Loop)
    Repl,
}

#[derive(Clone, Copy, ValueEnum)]
enum TokenFormat {
    Text,
    Json,
}

/// One token of a JSON token dump
#[derive(Serialize)]
struct TokenRecord {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    line: usize,
    column: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    // Change directory if specified
    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir)
            .with_context(|| format!("Failed to change directory to {}", dir.display()))?;
    }

    let config = InterpreterConfig {
        max_call_depth: cli.max_depth,
        stdlib_dir: cli.stdlib.clone(),
    };
    debug!("Standard library directory: {}", config.stdlib_dir().display());

    match cli.command {
        Some(Commands::Run { path }) => {
            let source = read_source(&path)?;
            if path.extension().and_then(|ext| ext.to_str()) != Some(MODULE_EXTENSION) {
                eprintln!(
                    "{} {} does not have the .{} extension",
                    "warning:".yellow().bold(),
                    path.display(),
                    MODULE_EXTENSION
                );
            }

            let mut interpreter = Interpreter::new(config);
            if let Err(e) = interpreter.run_source(&path.display().to_string(), &source) {
                exit_with(&e);
            }
        }

        Some(Commands::Tokens { path, format }) => {
            let source = read_source(&path)?;
            let tokens = match uttr::tokenize(&path.display().to_string(), &source) {
                Ok(tokens) => tokens,
                Err(e) => exit_with(&e),
            };

            match format {
                TokenFormat::Json => {
                    let records: Vec<TokenRecord> = tokens
                        .iter()
                        .map(|token| TokenRecord {
                            kind: token.kind.name(),
                            value: token_value(&token.kind),
                            line: token.span.start.line,
                            column: token.span.start.column,
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                TokenFormat::Text => {
                    for token in &tokens {
                        let location = format!("{}:{}", token.span.start.line, token.span.start.column);
                        match token_value(&token.kind) {
                            Some(value) => println!(
                                "{:>8}  {:<10} {}",
                                location.dimmed(),
                                token.kind.name().cyan(),
                                value
                            ),
                            None => println!("{:>8}  {}", location.dimmed(), token.kind.name().cyan()),
                        }
                    }
                }
            }
        }

        Some(Commands::Parse { path }) => {
            let source = read_source(&path)?;
            match uttr::parse(&path.display().to_string(), &source) {
                Ok(program) => println!("{:#?}", program.statements),
                Err(e) => exit_with(&e),
            }
        }

        Some(Commands::Repl) | None => uttr::repl::run_repl(config)?,
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Literal payload or keyword spelling of a token
fn token_value(kind: &TokenKind) -> Option<String> {
    match kind {
        TokenKind::Identifier(s) | TokenKind::String(s) | TokenKind::Regex(s) => Some(s.clone()),
        TokenKind::Integer(i) => Some(i.to_string()),
        TokenKind::Float(f) => Some(f.to_string()),
        other => other.keyword().map(str::to_string),
    }
}

fn exit_with(error: &UttrError) -> ! {
    eprint!("{}", format_error(error));
    std::process::exit(1);
}
