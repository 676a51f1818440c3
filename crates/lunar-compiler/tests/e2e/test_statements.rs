use super::helpers::*;
use lunar_compiler::opcode::OpCode;
use lunar_compiler::proto::Constant;

#[test]
fn e2e_local_declaration() {
    let proto = compile_str("local x = 42");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(get_int_constant(&proto, 0), 42);
    assert_eq!(proto.locals[0].name, "x");
}

#[test]
fn e2e_local_nil_default() {
    let proto = compile_str("local x, y, z");
    assert_eq!(opcodes(&proto), vec![OpCode::LoadNil, OpCode::Return]);
    let loadnil = proto.code[0];
    assert_eq!((loadnil.a(), loadnil.b()), (0, 2));
}

#[test]
fn e2e_local_fewer_values() {
    let proto = compile_str("local a, b, c = 1");
    assert_eq!(
        opcodes(&proto),
        vec![OpCode::LoadK, OpCode::LoadNil, OpCode::Return]
    );
    let loadnil = proto.code[1];
    assert_eq!((loadnil.a(), loadnil.b()), (1, 1));
}

#[test]
fn e2e_local_trailing_nil_dropped() {
    let proto = compile_str("local a, b = 1, nil");
    assert!(!proto.constants.contains(&Constant::Nil));
    assert!(has_opcode(&proto, OpCode::LoadNil));
}

#[test]
fn e2e_local_call_fills_names() {
    let proto = compile_str("local a, b, c = f()");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 4);
    assert!(!has_opcode(&proto, OpCode::LoadNil));
}

#[test]
fn e2e_local_call_then_nil_keeps_nil() {
    let proto = compile_str("local a, b = f(), nil");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 2);
    let loadnil = find_opcode(&proto, OpCode::LoadNil).unwrap();
    assert_eq!((loadnil.a(), loadnil.b()), (1, 0));
}

#[test]
fn e2e_assign_call_then_nil_keeps_nil() {
    let proto = compile_str("x, y = f(), nil");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 2);
    assert_eq!(count_opcode(&proto, OpCode::LoadNil), 1);
}

#[test]
fn e2e_local_extra_values_evaluated() {
    let proto = compile_str("local a = 1, f()");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 1);
}

#[test]
fn e2e_global_assign() {
    let proto = compile_str("x = 42");
    assert!(has_opcode(&proto, OpCode::SetTabUp));
    assert_eq!(get_string_constant(&proto, 0), "x");
}

#[test]
fn e2e_global_read() {
    let proto = compile_str("return x");
    assert!(has_opcode(&proto, OpCode::GetTabUp));
}

#[test]
fn e2e_multiple_assignment() {
    let proto = compile_str("local a, b = 1, 2\na, b = b, a");
    assert_eq!(count_opcode(&proto, OpCode::Move), 4);
}

#[test]
fn e2e_table_field_assignment() {
    let proto = compile_str("local t = {}\nt.x = 1\nt[1] = 2");
    assert_eq!(count_opcode(&proto, OpCode::SetTable), 2);
}

#[test]
fn e2e_upvalue_assignment() {
    let proto = compile_str("local x\nlocal function f() x = 1 end");
    assert!(has_opcode(&proto.sub_protos[0], OpCode::SetUpval));
}

#[test]
fn e2e_if_simple() {
    let proto = compile_str("local y\nif y then local x = 1 end");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_if_elseif_else() {
    let src = "local a\nif a then a = 1 elseif a == 2 then a = 3 else a = 4 end";
    let proto = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::Test), 2);
    assert!(has_opcode(&proto, OpCode::Eq));
}

#[test]
fn e2e_while_loop() {
    let proto = compile_str("local i = 0\nwhile i < 10 do i = i + 1 end");
    assert!(has_opcode(&proto, OpCode::Lt));
    let back = proto
        .code
        .iter()
        .filter(|i| i.opcode() == Some(OpCode::Jmp))
        .last()
        .unwrap();
    assert!(back.sbx() < 0);
}

#[test]
fn e2e_repeat_until() {
    let proto = compile_str("local i = 0\nrepeat i = i + 1 until i > 5");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Lt));
}

#[test]
fn e2e_repeat_condition_sees_body_local() {
    let proto = compile_str("repeat local done = true until done");
    let test = find_opcode(&proto, OpCode::Test).unwrap();
    assert_eq!(test.a(), 0);
}

#[test]
fn e2e_numeric_for() {
    let proto = compile_str("local s = 0\nfor i = 1, 10 do s = s + i end");
    assert!(has_opcode(&proto, OpCode::ForPrep));
    assert!(has_opcode(&proto, OpCode::ForLoop));
    let prep = find_opcode(&proto, OpCode::ForPrep).unwrap();
    assert_eq!(prep.a(), 1);
}

#[test]
fn e2e_numeric_for_with_step() {
    let proto = compile_str("for i = 10, 1, -1 do end");
    // No constant folding: the step is negated at run time.
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 3);
    assert!(has_opcode(&proto, OpCode::Unm));
}

#[test]
fn e2e_generic_for() {
    let proto = compile_str("for k, v in pairs(t) do print(k, v) end");
    assert!(has_opcode(&proto, OpCode::TForCall));
    assert!(has_opcode(&proto, OpCode::TForLoop));
    let tforcall = find_opcode(&proto, OpCode::TForCall).unwrap();
    assert_eq!(tforcall.c(), 2);
}

#[test]
fn e2e_break_in_loop() {
    let proto = compile_str("while true do break end");
    assert_eq!(count_opcode(&proto, OpCode::Jmp), 3);
}

#[test]
fn e2e_do_block_scoping() {
    let proto = compile_str("do local x = 1 end\nlocal y = 2");
    // y reuses x's register once the block closes.
    assert_eq!(proto.max_stack_size, 1);
    assert_eq!(proto.locals.len(), 2);
}

#[test]
fn e2e_closure_in_loop_closes_upvalues() {
    let src = "while true do local x = 1 local f = function() return x end end";
    let proto = compile_str(src);
    let jumps: Vec<_> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == Some(OpCode::Jmp))
        .collect();
    assert!(jumps.iter().any(|j| j.a() == 1));
}

#[test]
fn e2e_break_from_do_block_closes_upvalues() {
    let src = "while true do do local x = 1 g = function() return x end break end end";
    let proto = compile_str(src);
    let code = &proto.code;
    let closure = code
        .iter()
        .position(|i| i.opcode() == Some(OpCode::Closure))
        .unwrap();
    let brk = code[closure..]
        .iter()
        .find(|i| i.opcode() == Some(OpCode::Jmp))
        .unwrap();
    assert_eq!(brk.a(), 1);
}

#[test]
fn e2e_label_emits_nothing() {
    let proto = compile_str("::top::");
    assert_eq!(opcodes(&proto), vec![OpCode::Return]);
}

#[test]
fn e2e_return_multiple() {
    let proto = compile_str("return 1, 2, 3");
    let ret = proto.code[3];
    assert_eq!(ret.opcode(), Some(OpCode::Return));
    assert_eq!((ret.a(), ret.b()), (0, 4));
}
