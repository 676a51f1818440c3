use super::helpers::*;
use lunar_compiler::opcode::{OpCode, BIT_RK};
use lunar_compiler::proto::Constant;

#[test]
fn e2e_literals() {
    let proto = compile_str("local a, b, c, d, e = nil, true, 1, 2.5, 'x'");
    assert_eq!(
        opcodes(&proto),
        vec![
            OpCode::LoadNil,
            OpCode::LoadBool,
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::Return
        ]
    );
    assert_eq!(
        proto.constants,
        vec![
            Constant::Integer(1),
            Constant::Float(2.5),
            Constant::String("x".into())
        ]
    );
}

#[test]
fn e2e_integer_and_float_constants_distinct() {
    let proto = compile_str("local a, b = 1, 1.0");
    assert_eq!(proto.constants.len(), 2);
}

#[test]
fn e2e_constants_deduplicated() {
    let proto = compile_str("local a, b, c = 'k', 'k', 'k'");
    assert_eq!(proto.constants.len(), 1);
}

#[test]
fn e2e_hex_and_exponent_numbers() {
    let proto = compile_str("local a, b, c = 0xff, 1e2, 0x1p4");
    assert_eq!(
        proto.constants,
        vec![
            Constant::Integer(255),
            Constant::Float(100.0),
            Constant::Float(16.0)
        ]
    );
}

#[test]
fn e2e_arithmetic_uses_rk_constants() {
    let proto = compile_str("local a = 1\nlocal b = a + 2");
    let add = find_opcode(&proto, OpCode::Add).unwrap();
    assert_eq!(add.a(), 1);
    assert_eq!(add.b(), 0);
    assert_eq!(add.c(), BIT_RK | 1);
}

#[test]
fn e2e_all_arithmetic_ops() {
    let src = "local a, b = 1, 2\nlocal r = a + b - a * b / a // b % a ^ b";
    let proto = compile_str(src);
    for op in [
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::IDiv,
        OpCode::Mod,
        OpCode::Pow,
    ] {
        assert!(has_opcode(&proto, op), "missing {op:?}");
    }
}

#[test]
fn e2e_bitwise_ops() {
    let src = "local a, b = 1, 2\nlocal r = a & b | a ~ b << 1 >> 2";
    let proto = compile_str(src);
    for op in [
        OpCode::BAnd,
        OpCode::BOr,
        OpCode::BXor,
        OpCode::Shl,
        OpCode::Shr,
    ] {
        assert!(has_opcode(&proto, op), "missing {op:?}");
    }
}

#[test]
fn e2e_unary_ops() {
    let proto = compile_str("local a = 1\nlocal b, c, d, e = -a, not a, #a, ~a");
    assert!(has_opcode(&proto, OpCode::Unm));
    assert!(has_opcode(&proto, OpCode::Not));
    assert!(has_opcode(&proto, OpCode::Len));
    assert!(has_opcode(&proto, OpCode::BNot));
}

#[test]
fn e2e_comparisons() {
    let src = "local a, b = 1, 2\nlocal r = a == b, a ~= b, a < b, a <= b, a > b, a >= b";
    let proto = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::Eq), 2);
    assert_eq!(count_opcode(&proto, OpCode::Lt), 2);
    assert_eq!(count_opcode(&proto, OpCode::Le), 2);
    assert_eq!(count_opcode(&proto, OpCode::LoadBool), 12);
}

#[test]
fn e2e_not_equal_expects_false() {
    let proto = compile_str("local a, b = 1, 2\nlocal r = a ~= b");
    let eq = find_opcode(&proto, OpCode::Eq).unwrap();
    assert_eq!(eq.a(), 0);
}

#[test]
fn e2e_and_or() {
    let proto = compile_str("local a, b, c\nlocal r = a and b or c");
    assert_eq!(count_opcode(&proto, OpCode::TestSet), 2);
    let testsets: Vec<_> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == Some(OpCode::TestSet))
        .map(|i| i.c())
        .collect();
    assert!(testsets.contains(&0));
    assert!(testsets.contains(&1));
}

#[test]
fn e2e_concat_chain() {
    let proto = compile_str("local a, b, c = 'x', 'y', 'z'\nlocal s = a .. b .. c");
    assert_eq!(count_opcode(&proto, OpCode::Concat), 1);
    let concat = find_opcode(&proto, OpCode::Concat).unwrap();
    assert_eq!(concat.c() - concat.b(), 2);
}

#[test]
fn e2e_parenthesised_concat_not_flattened() {
    let proto = compile_str("local s = ('a' .. 'b') .. 'c'");
    assert_eq!(count_opcode(&proto, OpCode::Concat), 2);
}

#[test]
fn e2e_table_constructor_mixed() {
    let proto = compile_str("local t = {1, 2, 3, x = 1, [10] = 'ten'}");
    let new = find_opcode(&proto, OpCode::NewTable).unwrap();
    assert_eq!((new.b(), new.c()), (3, 2));
    assert_eq!(count_opcode(&proto, OpCode::SetList), 1);
    assert_eq!(count_opcode(&proto, OpCode::SetTable), 2);
}

#[test]
fn e2e_table_constructor_large() {
    let items: Vec<String> = (1..=120).map(|i| i.to_string()).collect();
    let proto = compile_str(&format!("local t = {{{}}}", items.join(", ")));
    assert_eq!(count_opcode(&proto, OpCode::SetList), 3);
}

#[test]
fn e2e_table_vararg_tail() {
    let proto = compile_str("local t = {1, ...}");
    let setlist = find_opcode(&proto, OpCode::SetList).unwrap();
    assert_eq!(setlist.b(), 0);
    let vararg = find_opcode(&proto, OpCode::VarArg).unwrap();
    assert_eq!(vararg.b(), 0);
}

#[test]
fn e2e_index_chain() {
    let proto = compile_str("local t = {}\nlocal v = t.a.b[1]");
    assert_eq!(count_opcode(&proto, OpCode::GetTable), 3);
}

#[test]
fn e2e_global_index_uses_gettabup() {
    let proto = compile_str("local v = string.format");
    assert_eq!(
        opcodes(&proto),
        vec![OpCode::GetTabUp, OpCode::GetTable, OpCode::Return]
    );
}

#[test]
fn e2e_paren_truncates_call() {
    let proto = compile_str("local a, b = (f())");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 2);
    assert!(has_opcode(&proto, OpCode::LoadNil));
}
