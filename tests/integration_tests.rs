use pretty_assertions::assert_eq;
use proptest::prelude::*;
use uttr::{Interpreter, InterpreterConfig, OutputBuffer, RuntimeErrorKind, UttrError, Value};

/// Run a program in a fresh interpreter, capturing what it shows
fn run_capture(source: &str) -> (Result<Value, UttrError>, String) {
    let output = OutputBuffer::new();
    let mut interpreter =
        Interpreter::with_output(InterpreterConfig::default(), Box::new(output.clone()));
    let result = interpreter.run_source("<test>", source);
    (result, output.contents())
}

fn output_of(source: &str) -> String {
    let (result, output) = run_capture(source);
    if let Err(e) = result {
        panic!("program failed: {}", e);
    }
    output
}

fn error_of(source: &str) -> UttrError {
    run_capture(source).0.expect_err("program should fail")
}

#[test]
fn test_basics_demo() {
    let output = output_of(include_str!("../demos/basics.uttr"));
    assert_eq!(output, "40\n140.0\nHello, UTTR\nlarge\n");
}

#[test]
fn test_functions_demo() {
    let output = output_of(include_str!("../demos/functions.uttr"));
    assert_eq!(output, "49\n610\n15\n");
}

#[test]
fn test_collections_demo() {
    let output = output_of(include_str!("../demos/collections.uttr"));
    assert_eq!(
        output,
        "[3, 1, 2, 4]\n4\n<1, 2, 3>\n{: 1, 2, 3 :}\n{: 1, 2, 3, 4 :}\nuttr\n[\"name\", \"version\"]\n30\n10\n20\n40\n"
    );
}

#[test]
fn test_errors_demo() {
    let output = output_of(include_str!("../demos/errors.uttr"));
    assert_eq!(output, "5\nDivision by zero\n0\nthree\n");
}

#[test]
fn test_put_and_show() {
    assert_eq!(output_of("put 5 in x; show x;"), "5\n");
}

#[test]
fn test_keep_is_not_protected() {
    let (result, _) = run_capture("keep 5 as x; put 6 in x; x");
    assert_eq!(result.unwrap(), Value::int(6));
}

#[test]
fn test_division_by_zero_is_runtime_error() {
    let err = error_of("show 1 / 0");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::DivisionByZero));
    let err = error_of("show 5.5 % 0");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::DivisionByZero));
}

#[test]
fn test_closure_counter() {
    let source = r#"
make function counter():
    put 0 in n
    make function inc():
        put n + 1 in n
        give n
    end
    give inc
end
put counter() in c
show c()
show c()
put counter() in d
show d()
"#;
    assert_eq!(output_of(source), "1\n2\n1\n");
}

#[test]
fn test_loop_control() {
    let source = "cycle i from 0 to 5:\n  when i == 2: skip\n  when i == 4: cut\n  show i\nend";
    assert_eq!(output_of(source), "0\n1\n3\n");
}

#[test]
fn test_nested_loops_cut_only_inner() {
    let source = r#"
cycle i from 0 to 3:
    cycle j from 0 to 3:
        when j == 1: cut
        show <i, j>
    end
end
"#;
    assert_eq!(output_of(source), "<0, 0>\n<1, 0>\n<2, 0>\n");
}

#[test]
fn test_while_and_do_while() {
    let source = r#"
put 0 in i
as long as i < 3:
    put i + 1 in i
end
show i
repeat while i < 3:
    put i + 10 in i
end
show i
"#;
    assert_eq!(output_of(source), "3\n13\n");
}

#[test]
fn test_list_aliasing() {
    assert_eq!(
        output_of("put [1,2] in a; put a in b; append(b, 3); show a;"),
        "[1, 2, 3]\n"
    );
}

#[test]
fn test_copy_breaks_aliasing() {
    assert_eq!(
        output_of("put [1,2] in a; put copy(a) in b; append(b, 3); show a; show b"),
        "[1, 2]\n[1, 2, 3]\n"
    );
}

#[test]
fn test_list_containing_itself() {
    assert_eq!(
        output_of("put [1] in a\nappend(a, a)\nshow a\nshow a == a\nshow len(a)"),
        "[1, [...]]\n1\n2\n"
    );
}

#[test]
fn test_huge_string_repeat_is_runtime_error() {
    let err = error_of("put \"ab\" * 9223372036854775807 in x");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::IllegalOperation));
}

#[test]
fn test_deeply_nested_expression_is_syntax_error() {
    let source = format!("put {}1{} in x", "(".repeat(100_000), ")".repeat(100_000));
    let err = error_of(&source);
    assert_eq!(err.name(), "Invalid Syntax");

    let source = format!("put {}1{} in x\nshow x", "(".repeat(200), ")".repeat(200));
    assert_eq!(output_of(&source), "1\n");
}

#[test]
fn test_tuple_is_never_modified() {
    let err = error_of("put <1, 2> in a; put a in b; append(b, 3)");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::TypeMismatch));

    let err = error_of("put <1, 2> in a; a + 3");
    assert!(err.message().contains("Tuples are immutable"));

    assert_eq!(
        output_of("put <1, 2> in a; put a * <3> in b; show a; show b"),
        "<1, 2>\n<1, 2, 3>\n"
    );
}

#[test]
fn test_set_add_returns_new_set() {
    assert_eq!(
        output_of("put set_from_list([1, 2]) in a; put a in b; put add(b, 3) in c; show a; show c"),
        "{: 1, 2 :}\n{: 1, 2, 3 :}\n"
    );
}

#[test]
fn test_dict_operations() {
    let source = r#"
put {"a": 1} in d
put d + ["b", 2] in e
show d
show e
show has_key(e, "b")
show remove(e, "a")
show e
"#;
    assert_eq!(output_of(source), "{\"a\": 1}\n{\"a\": 1, \"b\": 2}\n1\n1\n{\"b\": 2}\n");
}

#[test]
fn test_string_builtins() {
    let source = r#"
show join(split("a,b,c", ","), "-")
show upper("abc") + lower("DEF")
show substring("hello world", 6)
show substring("hello", 1, 3)
show replace("aXbXc", "X", "")
show "ab" * 3
show "n=" + 5
"#;
    assert_eq!(output_of(source), "a-b-c\nABCdef\nworld\nel\nabc\nababab\nn=5\n");
}

#[test]
fn test_regex_builtins() {
    let source = r#"
show regex_replace(r"(\w+)@(\w+)", "$2 at $1", "me@home")
show regex_findall(r"\d+", "a1b22c333")
show regex_split(r"\s*,\s*", "a , b,c")
show regex_match(r"\d+", "42abc")
show regex_match(r"\d+", "abc42")
put regex_search(r"b(\d)", "ab7") in found
show found @ "matched_text"
show found @ "start_pos"
"#;
    assert_eq!(
        output_of(source),
        "home at me\n[\"1\", \"22\", \"333\"]\n[\"a\", \"b\", \"c\"]\n<Match: 42>\n<No Match>\nb7\n1\n"
    );
}

#[test]
fn test_regex_literal_with_escaped_quote() {
    let source = r#"show regex_findall(r"\"(\w+)\"", "say \"hi\" and \"yo\"")"#;
    assert_eq!(output_of(source), "[\"hi\", \"yo\"]\n");
    assert_eq!(output_of(r#"show r'it\'s'"#), "r\"it\\'s\"\n");
}

#[test]
fn test_attempt_handle() {
    let source = r#"
attempt:
    show [1, 2] @ 5
end
handle as e:
    show error_type(e)
    show e
end
"#;
    assert_eq!(
        output_of(source),
        "Runtime Error\n<Error: Runtime Error: Index 5 is out of bounds for length 2>\n"
    );
}

#[test]
fn test_check_whether_default() {
    let source = r#"
make function describe(x):
    check x:
        whether 1: give "one"
        whether "two": give "two"
        default: give "many"
    end
end
show describe(1)
show describe("two")
show describe(3)
"#;
    assert_eq!(output_of(source), "one\ntwo\nmany\n");
}

#[test]
fn test_recursion_depth_is_bounded() {
    let source = "make function down(n): when n == 0: 0 otherwise: down(n - 1)\ndown(500)";
    assert_eq!(run_capture(source).0.unwrap(), Value::int(0));

    let err = error_of("make function forever(n): forever(n + 1)\nforever(0)");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::RecursionLimit));
}

#[test]
fn test_runtime_error_position() {
    let err = error_of("put 1 in a\nput a + [1] in b\nshow missing");
    assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::IllegalOperation));
    assert_eq!(err.span().start.line, 2);
    assert_eq!(err.message(), "Illegal operation: number + list");
}

#[test]
fn test_format_error_report() {
    colored::control::set_override(false);
    let err = error_of("put 1 in x\nshow y");
    let report = uttr::format_error(&err);
    assert!(report.contains("Runtime Error: 'y' is not defined"));
    assert!(report.contains("<test>:2:6"));
    assert!(report.contains("  2 | show y"));
}

proptest! {
    #[test]
    fn prop_integer_division_matches_host(a in -10_000i64..10_000, b in -100i64..100) {
        prop_assume!(b != 0);
        let output = output_of(&format!("show {} / {}\nshow {} % {}", a, b, a, b));
        prop_assert_eq!(output, format!("{}\n{}\n", a / b, a % b));
    }

    #[test]
    fn prop_float_division_matches_host(a in -1000i64..1000, b in 1i64..1000) {
        let output = output_of(&format!("show {}.0 / {}", a, b));
        prop_assert_eq!(output, format!("{}\n", uttr::value::Number::Float(a as f64 / b as f64)));
    }
}
