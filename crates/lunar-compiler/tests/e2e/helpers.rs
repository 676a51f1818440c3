use lunar_compiler::compile;
use lunar_compiler::opcode::{Instruction, OpCode};
use lunar_compiler::proto::{Constant, Prototype};
use lunar_compiler::CompileError;
use std::rc::Rc;

/// Compile a Lua source string into its main prototype.
pub fn compile_str(source: &str) -> Rc<Prototype> {
    compile(source, "test").unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a Lua source string and expect an error.
pub fn compile_str_err(source: &str) -> CompileError {
    match compile(source, "test") {
        Err(e) => e,
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Check if a prototype contains a specific opcode.
pub fn has_opcode(proto: &Prototype, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == Some(op))
}

/// Count occurrences of an opcode in a prototype.
pub fn count_opcode(proto: &Prototype, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == Some(op)).count()
}

/// Find the first instruction with a given opcode.
#[allow(dead_code)]
pub fn find_opcode(proto: &Prototype, op: OpCode) -> Option<Instruction> {
    proto.code.iter().copied().find(|i| i.opcode() == Some(op))
}

/// Opcode sequence of a prototype.
#[allow(dead_code)]
pub fn opcodes(proto: &Prototype) -> Vec<OpCode> {
    proto.code.iter().filter_map(Instruction::opcode).collect()
}

/// Get string constant value by index.
#[allow(dead_code)]
pub fn get_string_constant(proto: &Prototype, idx: usize) -> &str {
    match &proto.constants[idx] {
        Constant::String(s) => s,
        other => panic!("expected string constant, got {other:?}"),
    }
}

/// Get integer constant value by index.
#[allow(dead_code)]
pub fn get_int_constant(proto: &Prototype, idx: usize) -> i64 {
    match &proto.constants[idx] {
        Constant::Integer(i) => *i,
        other => panic!("expected integer constant, got {other:?}"),
    }
}
