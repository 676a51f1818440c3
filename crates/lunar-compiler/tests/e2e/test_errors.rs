use super::helpers::*;
use lunar_compiler::{CodeGenError, CompileError, LexError};

#[test]
fn e2e_error_unterminated_string() {
    let err = compile_str_err("local x = \"hello");
    assert!(matches!(err, CompileError::Lex(LexError::UnterminatedString { .. })));
    assert!(err.to_string().contains("unfinished string"));
}

#[test]
fn e2e_error_unterminated_long_comment() {
    let err = compile_str_err("--[[ never closed");
    assert_eq!(
        err,
        CompileError::Lex(LexError::UnterminatedLongBracket {
            what: "comment",
            line: 1
        })
    );
}

#[test]
fn e2e_error_break_outside_loop() {
    let err = compile_str_err("break");
    assert_eq!(
        err,
        CompileError::CodeGen(CodeGenError::BreakOutsideLoop { line: 1 })
    );
}

#[test]
fn e2e_error_goto_unsupported() {
    let err = compile_str_err("do\n  goto skip\nend\n::skip::");
    assert_eq!(err.line(), 2);
    assert!(err.to_string().contains("goto is not supported"));
}

#[test]
fn e2e_error_unexpected_symbol() {
    let err = compile_str_err("return )");
    assert!(matches!(err, CompileError::Syntax(_)));
    assert!(err.to_string().contains("unexpected symbol"));
}

#[test]
fn e2e_error_malformed_number() {
    let err = compile_str_err("local x = 1e");
    assert!(err.to_string().contains("malformed number"));
}

#[test]
fn e2e_error_invalid_escape() {
    let err = compile_str_err("local x = \"\\q\"");
    assert!(err.to_string().contains("invalid escape"));
}

#[test]
fn e2e_error_expected_end() {
    let err = compile_str_err("while true do\n  local x = 1\n");
    assert_eq!(err.line(), 3);
    assert!(err
        .to_string()
        .contains("'end' expected (to close 'while' at line 1)"));
}

#[test]
fn e2e_error_assign_to_call() {
    let err = compile_str_err("f() = 1");
    assert!(matches!(err, CompileError::Syntax(_)));
}

#[test]
fn e2e_error_vararg_outside_vararg_function() {
    let err = compile_str_err("function f()\n  return ...\nend");
    assert_eq!(
        err,
        CompileError::CodeGen(CodeGenError::VarargOutsideVararg { line: 2 })
    );
}

#[test]
fn e2e_error_too_many_registers() {
    let names: Vec<String> = (0..260).map(|i| format!("v{i}")).collect();
    let err = compile_str_err(&format!("local {}", names.join(", ")));
    assert!(matches!(
        err,
        CompileError::CodeGen(CodeGenError::TooManyRegisters { .. })
    ));
}

#[test]
fn e2e_error_reports_first_failure_only() {
    let err = compile_str_err("local x = $\nlocal y = @");
    assert_eq!(err.line(), 1);
}
