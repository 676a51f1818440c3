use super::helpers::*;
use lunar_compiler::opcode::OpCode;
use lunar_compiler::proto::Constant;

#[test]
fn e2e_program_fibonacci() {
    let src = r#"
local function fib(n)
    if n < 2 then return n end
    return fib(n - 1) + fib(n - 2)
end
print(fib(10))
"#;
    let proto = compile_str(src);
    assert_eq!(
        opcodes(&proto),
        vec![
            OpCode::Closure,
            OpCode::GetTabUp,
            OpCode::Move,
            OpCode::LoadK,
            OpCode::Call,
            OpCode::Call,
            OpCode::Return
        ]
    );
    assert_eq!(proto.locals[0].name, "fib");

    let fib = &proto.sub_protos[0];
    assert_eq!(fib.num_params, 1);
    // The function refers to itself through its own local.
    assert_eq!(fib.upvalues[0].name, "fib");
    assert!(fib.upvalues[0].in_stack);
    assert_eq!(count_opcode(fib, OpCode::Call), 2);
    assert_eq!(count_opcode(fib, OpCode::Sub), 2);
    assert_eq!(count_opcode(fib, OpCode::Add), 1);
    assert!(!has_opcode(fib, OpCode::TailCall));
    assert!(has_opcode(fib, OpCode::Lt));
}

#[test]
fn e2e_program_counter_closure() {
    let src = r#"
local function counter()
    local n = 0
    return function()
        n = n + 1
        return n
    end
end
local c = counter()
"#;
    let proto = compile_str(src);
    let counter = &proto.sub_protos[0];
    assert_eq!(
        opcodes(counter),
        vec![
            OpCode::LoadK,
            OpCode::Closure,
            OpCode::Return,
            OpCode::Return
        ]
    );
    let ret = counter.code[2];
    assert_eq!((ret.a(), ret.b()), (1, 2));

    let inner = &counter.sub_protos[0];
    assert_eq!(inner.upvalues.len(), 1);
    assert_eq!(inner.upvalues[0].name, "n");
    assert!(inner.upvalues[0].in_stack);
    assert_eq!(inner.upvalues[0].index, 0);
    assert_eq!(count_opcode(inner, OpCode::GetUpval), 2);
    assert_eq!(count_opcode(inner, OpCode::SetUpval), 1);
    assert_eq!(proto.count_protos(), 3);
}

#[test]
fn e2e_program_sieve() {
    let src = r#"
local limit = 100
local flags = {}
for i = 2, limit do flags[i] = true end
for i = 2, limit do
    if flags[i] then
        for j = i * i, limit, i do flags[j] = false end
    end
end
local count = 0
for i = 2, limit do
    if flags[i] then count = count + 1 end
end
return count
"#;
    let proto = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::ForPrep), 4);
    assert_eq!(count_opcode(&proto, OpCode::ForLoop), 4);
    assert_eq!(count_opcode(&proto, OpCode::NewTable), 1);
    assert!(proto.constants.contains(&Constant::Integer(100)));

    let names: Vec<&str> = proto.locals.iter().map(|l| l.name.as_str()).collect();
    assert!(names.contains(&"(for index)"));
    assert!(names.contains(&"j"));
    assert_eq!(names.iter().filter(|n| **n == "i").count(), 3);

    // Every loop variable's lifetime is contained in its chunk.
    for local in &proto.locals {
        assert!(local.start_pc <= local.end_pc, "{local:?}");
        assert!(local.end_pc as usize <= proto.code.len());
    }
}

#[test]
fn e2e_program_varargs() {
    let src = r#"
local function sum(...)
    local s = 0
    for _, v in ipairs({...}) do
        s = s + v
    end
    return s, select('#', ...)
end
return sum(1, 2, 3)
"#;
    let proto = compile_str(src);
    let sum = &proto.sub_protos[0];
    assert!(sum.is_vararg);
    assert_eq!(sum.num_params, 0);
    assert_eq!(count_opcode(sum, OpCode::VarArg), 2);
    assert!(has_opcode(sum, OpCode::SetList));
    assert!(has_opcode(sum, OpCode::TForCall));

    let ret = sum
        .code
        .iter()
        .rev()
        .find(|i| i.opcode() == Some(OpCode::Return) && i.b() != 1)
        .unwrap();
    // The trailing select call is open, so the count is left to the VM.
    assert_eq!(ret.b(), 0);

    assert!(has_opcode(&proto, OpCode::TailCall));
}

#[test]
fn e2e_program_object_with_methods() {
    let src = r#"
local Account = {}
Account.__index = Account

function Account.new(balance)
    return setmetatable({ balance = balance }, Account)
end

function Account:deposit(v)
    self.balance = self.balance + v
end

local acc = Account.new(100)
acc:deposit(50)
return acc.balance
"#;
    let proto = compile_str(src);
    assert_eq!(proto.sub_protos.len(), 2);
    assert_eq!(proto.sub_protos[0].num_params, 1);
    assert_eq!(proto.sub_protos[1].num_params, 2);
    assert_eq!(proto.sub_protos[1].locals[0].name, "self");
    assert_eq!(count_opcode(&proto, OpCode::Self_), 1);
    assert!(has_opcode(&proto.sub_protos[1], OpCode::SetTable));
    assert!(has_opcode(&proto.sub_protos[0], OpCode::TailCall));
}

#[test]
fn e2e_program_nested_loops_with_break() {
    let src = r#"
local found
for i = 1, 10 do
    for j = 1, 10 do
        if i * j == 42 then
            found = i
            break
        end
    end
    if found then break end
end
return found
"#;
    let proto = compile_str(src);
    let forloops: Vec<usize> = proto
        .code
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode() == Some(OpCode::ForLoop))
        .map(|(pc, _)| pc)
        .collect();
    assert_eq!(forloops.len(), 2);

    // Every jump lands inside the function.
    for (pc, ins) in proto.code.iter().enumerate() {
        if ins.opcode() == Some(OpCode::Jmp) {
            let target = pc as i64 + 1 + i64::from(ins.sbx());
            assert!((0..proto.code.len() as i64).contains(&target));
        }
    }
}
