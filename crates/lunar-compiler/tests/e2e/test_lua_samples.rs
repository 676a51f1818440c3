use super::helpers::*;
use lunar_compiler::disasm;
use lunar_compiler::opcode::OpCode;
use lunar_compiler::proto::Prototype;
use std::path::PathBuf;

fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/lua_samples")
}

fn load_sample(name: &str) -> String {
    let path = samples_dir().join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

/// Structural checks that hold for any well-formed prototype tree.
fn check_proto(proto: &Prototype) {
    let last = proto.code.last().expect("empty code");
    assert_eq!(last.opcode(), Some(OpCode::Return));

    for (pc, ins) in proto.code.iter().enumerate() {
        let op = ins.opcode().expect("invalid opcode");
        match op {
            OpCode::Jmp | OpCode::ForPrep | OpCode::ForLoop | OpCode::TForLoop => {
                let target = pc as i64 + 1 + i64::from(ins.sbx());
                assert!(
                    (0..proto.code.len() as i64).contains(&target),
                    "{op:?} at {pc} jumps to {target}"
                );
            }
            OpCode::Closure => assert!((ins.bx() as usize) < proto.sub_protos.len()),
            _ => {}
        }
        if op.is_test() {
            let next = proto.code.get(pc + 1).and_then(|i| i.opcode());
            assert_eq!(next, Some(OpCode::Jmp), "test at {pc} not followed by a jump");
        }
    }

    assert!(proto.max_stack_size <= 255);
    for sub in &proto.sub_protos {
        assert!(sub.source.is_none());
        check_proto(sub);
    }
}

#[test]
fn e2e_all_samples_compile() {
    let mut entries: Vec<_> = std::fs::read_dir(samples_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "lua"))
        .collect();
    entries.sort();
    assert!(entries.len() >= 7);

    for path in entries {
        let src = std::fs::read_to_string(&path).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let proto = lunar_compiler::compile(&src, &name)
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(proto.source.as_deref(), Some(name.as_str()));
        assert!(proto.is_vararg);
        assert_eq!(proto.upvalues[0].name, "_ENV");
        check_proto(&proto);
        assert!(disasm::dump(&proto).starts_with("main <"));
    }
}

#[test]
fn e2e_sample_fibonacci() {
    let proto = compile_str(&load_sample("fibonacci.lua"));
    assert_eq!(proto.sub_protos.len(), 2);
    let fib = &proto.sub_protos[0];
    assert_eq!(fib.upvalues[0].name, "fib");
    let fib_iter = &proto.sub_protos[1];
    assert!(has_opcode(fib_iter, OpCode::ForPrep));
}

#[test]
fn e2e_sample_closures() {
    let proto = compile_str(&load_sample("closures.lua"));
    let make_counter = &proto.sub_protos[0];
    let inner = &make_counter.sub_protos[0];
    let names: Vec<&str> = inner.upvalues.iter().map(|u| u.name.as_str()).collect();
    assert!(names.contains(&"count"));
    assert!(names.contains(&"step"));

    // The loop body closure captures `i`, so the loop closes upvalues.
    let adder = &proto.sub_protos[1];
    assert_eq!(adder.upvalues[0].name, "i");
    assert!(proto
        .code
        .iter()
        .any(|i| i.opcode() == Some(OpCode::Jmp) && i.a() > 0));
}

#[test]
fn e2e_sample_tables() {
    let proto = compile_str(&load_sample("tables.lua"));
    assert!(count_opcode(&proto, OpCode::NewTable) >= 3);
    assert!(has_opcode(&proto, OpCode::SetList));
    assert!(has_opcode(&proto, OpCode::TForCall));
    assert!(has_opcode(&proto, OpCode::Concat));
    let len = &proto.sub_protos[0];
    assert_eq!(len.locals[0].name, "self");
    assert_eq!(count_opcode(len, OpCode::Pow), 3);
}

#[test]
fn e2e_sample_control_flow() {
    let proto = compile_str(&load_sample("control_flow.lua"));
    let classify = &proto.sub_protos[0];
    assert_eq!(count_opcode(classify, OpCode::Return), 5);
    assert!(has_opcode(&proto, OpCode::Not));
    assert!(has_opcode(&proto, OpCode::TestSet));
}

#[test]
fn e2e_sample_strings() {
    let proto = compile_str(&load_sample("strings.lua"));
    let strings: Vec<String> = proto
        .constants
        .iter()
        .filter_map(|k| match k {
            lunar_compiler::proto::Constant::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert!(strings.contains(&"tab\there \"quoted\" AB\u{43} \u{263A}".to_string()));
    assert!(strings.contains(&"raw [[nested]] text\nwith ]] inside".to_string()));
    for op in [OpCode::BAnd, OpCode::BNot, OpCode::Shl, OpCode::Shr, OpCode::IDiv, OpCode::Mod] {
        assert!(has_opcode(&proto, op), "missing {op:?}");
    }
}

#[test]
fn e2e_sample_varargs() {
    let proto = compile_str(&load_sample("varargs.lua"));
    for f in &proto.sub_protos {
        assert!(f.is_vararg);
    }
    assert_eq!(proto.sub_protos[2].num_params, 1);
}
