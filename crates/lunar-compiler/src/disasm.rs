/// Prototype disassembler (luac -l style output).
use crate::opcode::{is_constant, Instruction, InstructionFormat, OpArgMode, OpCode, BIT_RK};
use crate::proto::Prototype;
use std::fmt;

/// Disassemble a prototype tree into a human-readable string.
pub fn dump(proto: &Prototype) -> String {
    Dump(proto).to_string()
}

/// `Display` adapter that renders a prototype and its nested functions.
pub struct Dump<'a>(pub &'a Prototype);

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.0.source.as_deref().unwrap_or("?");
        write_proto(f, self.0, source, true)
    }
}

fn write_proto(f: &mut fmt::Formatter<'_>, proto: &Prototype, source: &str, main: bool) -> fmt::Result {
    // Header
    let kind = if main { "main" } else { "function" };
    writeln!(f, "{kind} <{source}> ({} instructions)", proto.code.len())?;
    let vararg = if proto.is_vararg { "+" } else { "" };
    writeln!(
        f,
        "{}{vararg} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
        proto.num_params,
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.locals.len(),
        proto.constants.len(),
        proto.sub_protos.len(),
    )?;

    for (pc, inst) in proto.code.iter().enumerate() {
        write!(f, "\t{}\t[-]\t", pc + 1)?;
        write_instruction(f, pc, *inst, proto)?;
        writeln!(f)?;
    }

    writeln!(f, "constants ({}):", proto.constants.len())?;
    for (i, k) in proto.constants.iter().enumerate() {
        writeln!(f, "\t{}\t{k}", i + 1)?;
    }

    writeln!(f, "locals ({}):", proto.locals.len())?;
    for (i, local) in proto.locals.iter().enumerate() {
        writeln!(
            f,
            "\t{i}\t{}\t{}\t{}",
            local.name,
            local.start_pc + 1,
            local.end_pc + 1
        )?;
    }

    writeln!(f, "upvalues ({}):", proto.upvalues.len())?;
    for (i, up) in proto.upvalues.iter().enumerate() {
        writeln!(f, "\t{i}\t{}\t{}\t{}", up.name, u8::from(up.in_stack), up.index)?;
    }

    for sub in &proto.sub_protos {
        writeln!(f)?;
        write_proto(f, sub, source, false)?;
    }
    Ok(())
}

/// Operand as luac shows it: constants are `-1-k`.
fn operand(value: u32, mode: OpArgMode) -> i64 {
    if mode == OpArgMode::K && is_constant(value) {
        -1 - i64::from(value & !BIT_RK)
    } else {
        i64::from(value)
    }
}

fn write_instruction(f: &mut fmt::Formatter<'_>, pc: usize, inst: Instruction, proto: &Prototype) -> fmt::Result {
    let Some(op) = inst.opcode() else {
        return write!(f, "{inst:?}");
    };
    write!(f, "{:<9}\t", op.name())?;

    let (b_mode, c_mode) = op.arg_modes();
    match op.format() {
        InstructionFormat::IABC => {
            write!(f, "{}", inst.a())?;
            if b_mode != OpArgMode::N {
                write!(f, " {}", operand(inst.b(), b_mode))?;
            }
            if c_mode != OpArgMode::N {
                write!(f, " {}", operand(inst.c(), c_mode))?;
            }
        }
        InstructionFormat::IABx => {
            write!(f, "{}", inst.a())?;
            match b_mode {
                OpArgMode::K => write!(f, " {}", -1 - i64::from(inst.bx()))?,
                OpArgMode::U => write!(f, " {}", inst.bx())?,
                _ => {}
            }
        }
        InstructionFormat::IAsBx => write!(f, "{} {}", inst.a(), inst.sbx())?,
        InstructionFormat::IAx => write!(f, "{}", -1 - i64::from(inst.ax_field()))?,
    }

    let constant = |rk: u32| {
        is_constant(rk)
            .then(|| proto.constants.get((rk & !BIT_RK) as usize))
            .flatten()
    };
    let upvalue = |idx: u32| proto.upvalues.get(idx as usize).map_or("-", |u| u.name.as_str());

    match op {
        OpCode::LoadK => {
            if let Some(k) = proto.constants.get(inst.bx() as usize) {
                write!(f, "\t; {k}")?;
            }
        }
        OpCode::GetUpval | OpCode::SetUpval => write!(f, "\t; {}", upvalue(inst.b()))?,
        OpCode::GetTabUp => {
            write!(f, "\t; {}", upvalue(inst.b()))?;
            if let Some(k) = constant(inst.c()) {
                write!(f, " {k}")?;
            }
        }
        OpCode::SetTabUp => {
            write!(f, "\t; {}", upvalue(inst.a()))?;
            for rk in [inst.b(), inst.c()] {
                if let Some(k) = constant(rk) {
                    write!(f, " {k}")?;
                }
            }
        }
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
            let target = pc as i64 + 2 + i64::from(inst.sbx());
            write!(f, "\t; to {target}")?;
        }
        OpCode::Closure => write!(f, "\t; function [{}]", inst.bx())?,
        _ if b_mode == OpArgMode::K || c_mode == OpArgMode::K => {
            let shown: Vec<String> = [inst.b(), inst.c()]
                .into_iter()
                .filter_map(constant)
                .map(|k| k.to_string())
                .collect();
            if !shown.is_empty() {
                write!(f, "\t; {}", shown.join(" "))?;
            }
        }
        _ => {}
    }
    Ok(())
}
