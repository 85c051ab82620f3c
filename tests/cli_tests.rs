//! Integration tests for the uttr CLI

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Path to the compiled binary
fn binary_path() -> &'static str {
    env!("CARGO_BIN_EXE_uttr")
}

/// Helper to create a test file in a temporary directory
fn create_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let file_path = dir.path().join(name);
    fs::write(&file_path, content).expect("Failed to write temp file");
    file_path
}

fn uttr(args: &[&str], path: &Path) -> Output {
    Command::new(binary_path())
        .arg("--no-color")
        .args(args)
        .arg(path)
        .output()
        .expect("Failed to execute uttr")
}

#[test]
fn test_uttr_run_basic() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "hello.uttr", "put 40 in x\nshow x + 2\nshow \"done\"\n");

    let output = uttr(&["run"], &file);

    assert!(output.status.success(), "uttr run should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "42\ndone\n");
    assert!(output.stderr.is_empty(), "no warnings expected for a .uttr file");
}

#[test]
fn test_uttr_run_runtime_error() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "broken.uttr", "show 1\nshow 1 / 0\nshow 2\n");

    let output = uttr(&["run"], &file);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stdout, "1\n");
    assert!(stderr.contains("Runtime Error: Division by zero"));
    assert!(stderr.contains("broken.uttr:2:6"));
}

#[test]
fn test_uttr_run_syntax_error() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "syntax.uttr", "when 1:\n  show 1\n");

    let output = uttr(&["run"], &file);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid Syntax"));
    assert!(stderr.contains("Expected:"));
}

#[test]
fn test_uttr_run_warns_on_extension() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "script.txt", "show 1\n");

    let output = uttr(&["run"], &file);

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("warning:"));
    assert!(stderr.contains(".uttr"));
}

#[test]
fn test_uttr_run_nonexistent_file() {
    let dir = TempDir::new().unwrap();
    let output = uttr(&["run"], &dir.path().join("missing.uttr"));

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read file"));
}

#[test]
fn test_uttr_run_imports_beside_file() {
    let dir = TempDir::new().unwrap();
    create_file(&dir, "greeting_cli.uttr", "make function greet(n): \"hi \" + n\n");
    let file = create_file(&dir, "main.uttr", "bring greet from greeting_cli\nshow greet(\"there\")\n");

    let output = uttr(&["run"], &file);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi there\n");
}

#[test]
fn test_uttr_run_with_stdlib_flag() {
    let stdlib = TempDir::new().unwrap();
    create_file(&stdlib, "answers_cli.uttr", "put 42 in answer\n");
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "main.uttr", "bring in answers_cli\nshow answer\n");

    let stdlib_dir = stdlib.path().to_string_lossy().to_string();
    let output = uttr(&["--stdlib", stdlib_dir.as_str(), "run"], &file);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");
}

#[test]
fn test_uttr_max_depth_flag() {
    let dir = TempDir::new().unwrap();
    let file = create_file(
        &dir,
        "deep.uttr",
        "make function down(n): when n == 0: 0 otherwise: down(n - 1)\nshow down(50)\n",
    );

    let output = uttr(&["--max-depth", "20", "run"], &file);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Maximum recursion depth exceeded"));
}

#[test]
fn test_uttr_tokens_text() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "tokens.uttr", "put <1, 2> in t\n");

    let output = uttr(&["tokens"], &file);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("LANGLE"));
    assert!(stdout.contains("RANGLE"));
    assert!(stdout.contains("IDENTIFIER"));
    assert!(stdout.contains("EOF"));
}

#[test]
fn test_uttr_tokens_json() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "tokens.uttr", "show x < 3\n");

    let output = uttr(&["tokens", "--format", "json"], &file);

    assert!(output.status.success());
    let tokens: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("token dump should be valid JSON");
    let kinds: Vec<&str> = tokens
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["KEYWORD", "IDENTIFIER", "LT", "INT", "NEWLINE", "EOF"]);
    assert_eq!(tokens[0]["value"], "show");
    assert_eq!(tokens[3]["value"], "3");
}

#[test]
fn test_uttr_parse() {
    let dir = TempDir::new().unwrap();
    let file = create_file(&dir, "parse.uttr", "put 1 + 2 in x\n");

    let output = uttr(&["parse"], &file);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Assign"));
    assert!(stdout.contains("BinaryOp"));
}

#[test]
fn test_uttr_directory_flag() {
    let dir = TempDir::new().unwrap();
    create_file(&dir, "relative.uttr", "show \"from -C\"\n");

    let output = Command::new(binary_path())
        .arg("--no-color")
        .arg("-C")
        .arg(dir.path())
        .args(["run", "relative.uttr"])
        .output()
        .expect("Failed to execute uttr");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "from -C\n");
}
