/// Per-function compilation state: registers, scopes, locals, constants,
/// upvalues and the instruction buffer.
use crate::error::CodeGenError;
use crate::opcode::{Instruction, OpCode, MAX_BX, MAX_C};
use crate::proto::{Constant, LocalVar, Prototype, UpvalDesc};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Register file size. Allocation fails once this many would be in use.
pub const MAX_REGISTERS: u32 = 255;

/// Positional table entries stored per SETLIST.
pub const FIELDS_PER_FLUSH: u32 = 50;

/// Upvalue limit per function.
pub const MAX_UPVALUES: usize = 255;

/// A local variable binding.
#[derive(Clone, Debug)]
struct LocalVarInfo {
    name: String,
    /// Binding this one shadows, as an index into `FunctionInfo::locals`.
    prev: Option<usize>,
    /// Scope depth when declared.
    scope_depth: usize,
    /// Register index.
    slot: u32,
    start_pc: u32,
    end_pc: u32,
    /// Whether a nested closure captured this local as an upvalue.
    captured: bool,
}

/// State of the function currently being compiled.
#[derive(Debug)]
pub struct FunctionInfo {
    /// Every binding ever declared, in declaration order.
    locals: Vec<LocalVarInfo>,
    /// Visible bindings by name.
    local_names: HashMap<String, usize>,
    /// Pending break jumps per open scope; `None` for non-loop scopes.
    /// The current scope depth is the length of this stack.
    breaks: Vec<Option<Vec<usize>>>,
    /// Registers in use.
    used_regs: u32,
    /// High-water mark for register usage.
    max_regs: u32,
    constants: IndexSet<Constant>,
    upvalues: IndexMap<String, UpvalDesc>,
    code: Vec<Instruction>,
    /// Finished nested functions, in CLOSURE index order.
    sub_funcs: Vec<FunctionInfo>,
    num_params: u32,
    is_vararg: bool,
    /// Source line attached to errors.
    pub line: u32,
}

impl FunctionInfo {
    /// A fresh function with its body scope open.
    pub fn new(num_params: u32, is_vararg: bool, line: u32) -> Self {
        FunctionInfo {
            locals: Vec::new(),
            local_names: HashMap::new(),
            breaks: vec![None],
            used_regs: 0,
            max_regs: 0,
            constants: IndexSet::new(),
            upvalues: IndexMap::new(),
            code: Vec::new(),
            sub_funcs: Vec::new(),
            num_params,
            is_vararg,
            line,
        }
    }

    pub fn is_vararg(&self) -> bool {
        self.is_vararg
    }

    pub fn used_regs(&self) -> u32 {
        self.used_regs
    }

    /// Reset the register top after a temporary evaluation.
    pub fn set_used_regs(&mut self, n: u32) {
        self.used_regs = n;
    }

    pub fn max_regs(&self) -> u32 {
        self.max_regs
    }

    /// Index of the next instruction.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn scope_depth(&self) -> usize {
        self.breaks.len()
    }

    // ---- registers ----

    pub fn alloc_reg(&mut self) -> Result<u32, CodeGenError> {
        if self.used_regs + 1 >= MAX_REGISTERS {
            return Err(CodeGenError::TooManyRegisters { line: self.line });
        }
        self.used_regs += 1;
        self.max_regs = self.max_regs.max(self.used_regs);
        Ok(self.used_regs - 1)
    }

    /// Allocate `n` consecutive registers and return the first.
    pub fn alloc_regs(&mut self, n: u32) -> Result<u32, CodeGenError> {
        let first = self.used_regs;
        for _ in 0..n {
            self.alloc_reg()?;
        }
        Ok(first)
    }

    pub fn free_reg(&mut self) -> Result<(), CodeGenError> {
        if self.used_regs == 0 {
            return Err(CodeGenError::RegisterUnderflow { line: self.line });
        }
        self.used_regs -= 1;
        Ok(())
    }

    pub fn free_regs(&mut self, n: u32) -> Result<(), CodeGenError> {
        for _ in 0..n {
            self.free_reg()?;
        }
        Ok(())
    }

    // ---- scopes ----

    pub fn enter_scope(&mut self, breakable: bool) {
        self.breaks.push(breakable.then(Vec::new));
    }

    /// Close the innermost scope: patch its pending breaks to the next
    /// instruction, retire its locals and free their registers.
    pub fn exit_scope(&mut self) -> Result<(), CodeGenError> {
        let a = self.jmp_arg_a();
        let pending = self.breaks.pop().flatten().unwrap_or_default();
        let target = self.pc();
        for pc in pending {
            // keep the lower level recorded when the break was emitted
            let level = lower_close_level(self.code[pc].a(), a);
            self.set_jump_a(pc, level)?;
            self.patch_jump(pc, target)?;
        }

        let depth = self.scope_depth();
        let retiring: Vec<usize> = self
            .local_names
            .values()
            .copied()
            .filter(|&idx| self.locals[idx].scope_depth > depth)
            .collect();
        for idx in retiring {
            self.remove_local(idx)?;
        }
        Ok(())
    }

    fn remove_local(&mut self, idx: usize) -> Result<(), CodeGenError> {
        self.free_reg()?;
        self.locals[idx].end_pc = self.pc() as u32;
        let name = self.locals[idx].name.clone();
        let depth = self.locals[idx].scope_depth;
        match self.locals[idx].prev {
            None => {
                self.local_names.remove(&name);
            }
            Some(prev) if self.locals[prev].scope_depth == depth => {
                self.remove_local(prev)?;
            }
            Some(prev) => {
                self.local_names.insert(name, prev);
            }
        }
        Ok(())
    }

    /// Record a break jump against the innermost loop scope. The jump closes
    /// every local captured so far between the loop and the break.
    pub fn add_break_jump(&mut self, pc: usize) -> Result<(), CodeGenError> {
        let Some(loop_idx) = self.breaks.iter().rposition(Option::is_some) else {
            return Err(CodeGenError::BreakOutsideLoop { line: self.line });
        };
        let level = self.close_level(loop_idx + 1);
        self.set_jump_a(pc, level)?;
        if let Some(pending) = &mut self.breaks[loop_idx] {
            pending.push(pc);
        }
        Ok(())
    }

    fn set_jump_a(&mut self, pc: usize, a: u32) -> Result<(), CodeGenError> {
        let line = self.line;
        self.code[pc]
            .set_a(a)
            .map_err(|source| CodeGenError::OperandOverflow { source, line })
    }

    // ---- locals ----

    /// Bind `name` to the next free register, shadowing any visible binding.
    pub fn add_local(&mut self, name: &str, start_pc: usize) -> Result<u32, CodeGenError> {
        let slot = self.alloc_reg()?;
        let idx = self.locals.len();
        self.locals.push(LocalVarInfo {
            name: name.to_string(),
            prev: self.local_names.get(name).copied(),
            scope_depth: self.scope_depth(),
            slot,
            start_pc: start_pc as u32,
            end_pc: 0,
            captured: false,
        });
        self.local_names.insert(name.to_string(), idx);
        Ok(slot)
    }

    pub fn slot_of_local(&self, name: &str) -> Option<u32> {
        self.local_names.get(name).map(|&idx| self.locals[idx].slot)
    }

    /// Mark a visible local as captured by a nested function.
    pub fn capture_local(&mut self, name: &str) -> Option<u32> {
        let idx = *self.local_names.get(name)?;
        let local = &mut self.locals[idx];
        local.captured = true;
        Some(local.slot)
    }

    /// A-operand for a jump leaving the current scope: one past the lowest
    /// captured register, or 0 when nothing needs closing.
    pub fn jmp_arg_a(&self) -> u32 {
        self.close_level(self.scope_depth())
    }

    /// Like [`Self::jmp_arg_a`], over every visible local declared at scope
    /// depth `from_depth` or deeper.
    fn close_level(&self, from_depth: usize) -> u32 {
        let mut captured = false;
        let mut min_slot = self.max_regs;
        for &idx in self.local_names.values() {
            let mut cursor = Some(idx);
            while let Some(i) = cursor {
                let local = &self.locals[i];
                if local.scope_depth < from_depth {
                    break;
                }
                captured |= local.captured;
                if !local.name.starts_with('(') {
                    min_slot = min_slot.min(local.slot);
                }
                cursor = local.prev;
            }
        }
        if captured {
            min_slot + 1
        } else {
            0
        }
    }

    /// Emit a JMP closing upvalues of the current scope, if any are open.
    pub fn close_open_upvals(&mut self) -> Result<(), CodeGenError> {
        let a = self.jmp_arg_a();
        if a > 0 {
            self.emit_jmp(a, 0)?;
        }
        Ok(())
    }

    // ---- constants and upvalues ----

    pub fn constant_index(&mut self, k: Constant) -> u32 {
        self.constants.insert_full(k).0 as u32
    }

    pub fn upvalue_index(&self, name: &str) -> Option<u32> {
        self.upvalues.get_index_of(name).map(|i| i as u32)
    }

    pub fn add_upvalue(&mut self, name: &str, in_stack: bool, index: u32) -> Result<u32, CodeGenError> {
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err(CodeGenError::TooManyUpvalues { line: self.line });
        }
        let desc = UpvalDesc {
            name: name.to_string(),
            in_stack,
            index,
        };
        Ok(self.upvalues.insert_full(name.to_string(), desc).0 as u32)
    }

    pub fn add_sub_func(&mut self, child: FunctionInfo) -> u32 {
        self.sub_funcs.push(child);
        (self.sub_funcs.len() - 1) as u32
    }

    // ---- emission ----

    fn overflow(&self, source: crate::error::EncodeError) -> CodeGenError {
        CodeGenError::OperandOverflow {
            source,
            line: self.line,
        }
    }

    fn push(&mut self, inst: Result<Instruction, crate::error::EncodeError>) -> Result<usize, CodeGenError> {
        let inst = inst.map_err(|source| self.overflow(source))?;
        self.code.push(inst);
        Ok(self.code.len() - 1)
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> Result<usize, CodeGenError> {
        self.push(Instruction::abc(op, a, b, c))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u32, bx: u32) -> Result<usize, CodeGenError> {
        self.push(Instruction::abx(op, a, bx))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> Result<usize, CodeGenError> {
        self.push(Instruction::asbx(op, a, sbx))
    }

    pub fn emit_ax(&mut self, op: OpCode, ax: u32) -> Result<usize, CodeGenError> {
        self.push(Instruction::ax(op, ax))
    }

    pub fn emit_move(&mut self, a: u32, b: u32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::Move, a, b, 0)
    }

    /// LOADNIL over `n` registers starting at `a`.
    pub fn emit_load_nil(&mut self, a: u32, n: u32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::LoadNil, a, n.saturating_sub(1), 0)
    }

    pub fn emit_load_bool(&mut self, a: u32, b: u32, c: u32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::LoadBool, a, b, c)
    }

    /// LOADK, or LOADKX + EXTRAARG when the index does not fit Bx.
    pub fn emit_load_k(&mut self, a: u32, k: Constant) -> Result<usize, CodeGenError> {
        let idx = self.constant_index(k);
        if idx <= MAX_BX {
            self.emit_abx(OpCode::LoadK, a, idx)
        } else {
            let pc = self.emit_abx(OpCode::LoadKX, a, 0)?;
            self.emit_ax(OpCode::ExtraArg, idx)?;
            Ok(pc)
        }
    }

    pub fn emit_jmp(&mut self, a: u32, sbx: i32) -> Result<usize, CodeGenError> {
        self.emit_asbx(OpCode::Jmp, a, sbx)
    }

    /// CALL with `n_args` / `n_results` of -1 meaning "up to top".
    pub fn emit_call(&mut self, a: u32, n_args: i32, n_results: i32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::Call, a, (n_args + 1) as u32, (n_results + 1) as u32)
    }

    pub fn emit_tail_call(&mut self, a: u32, n_args: i32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::TailCall, a, (n_args + 1) as u32, 0)
    }

    /// RETURN with `n` of -1 meaning "up to top".
    pub fn emit_return(&mut self, a: u32, n: i32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::Return, a, (n + 1) as u32, 0)
    }

    pub fn emit_vararg(&mut self, a: u32, n: i32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::VarArg, a, (n + 1) as u32, 0)
    }

    pub fn emit_new_table(&mut self, a: u32, n_array: u32, n_hash: u32) -> Result<usize, CodeGenError> {
        self.emit_abc(OpCode::NewTable, a, int2fb(n_array), int2fb(n_hash))
    }

    /// SETLIST, spilling the batch number into EXTRAARG when it exceeds C.
    pub fn emit_set_list(&mut self, a: u32, n: u32, batch: u32) -> Result<usize, CodeGenError> {
        if batch <= MAX_C {
            self.emit_abc(OpCode::SetList, a, n, batch)
        } else {
            let pc = self.emit_abc(OpCode::SetList, a, n, 0)?;
            self.emit_ax(OpCode::ExtraArg, batch)?;
            Ok(pc)
        }
    }

    /// Point the jump at `pc` to `target`.
    pub fn patch_jump(&mut self, pc: usize, target: usize) -> Result<(), CodeGenError> {
        let sbx = offset(pc, target);
        let line = self.line;
        self.code[pc]
            .set_sbx(sbx)
            .map_err(|source| CodeGenError::OperandOverflow { source, line })
    }

    /// Point the jump at `pc` to the next instruction.
    pub fn patch_to_here(&mut self, pc: usize) -> Result<(), CodeGenError> {
        self.patch_jump(pc, self.pc())
    }

    // ---- finalization ----

    /// Freeze into a prototype. Children are built with a back-reference
    /// to the returned node.
    pub fn into_proto(self, parent: Weak<Prototype>, source: Option<String>) -> Rc<Prototype> {
        let FunctionInfo {
            locals,
            max_regs,
            constants,
            upvalues,
            code,
            sub_funcs,
            num_params,
            is_vararg,
            ..
        } = self;

        let proto = Rc::new_cyclic(|me: &Weak<Prototype>| Prototype {
            source,
            num_params,
            is_vararg,
            max_stack_size: max_regs,
            constants: constants.into_iter().collect(),
            locals: locals
                .into_iter()
                .map(|l| LocalVar {
                    name: l.name,
                    start_pc: l.start_pc,
                    end_pc: l.end_pc,
                })
                .collect(),
            upvalues: upvalues.into_values().collect(),
            code,
            sub_protos: sub_funcs
                .into_iter()
                .map(|f| f.into_proto(me.clone(), None))
                .collect(),
            parent,
        });
        debug!(
            instructions = proto.code.len(),
            constants = proto.constants.len(),
            upvalues = proto.upvalues.len(),
            functions = proto.sub_protos.len(),
            "finished prototype"
        );
        proto
    }
}

/// Combine two JMP close levels; 0 means nothing to close.
fn lower_close_level(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, level) | (level, 0) => level,
        (x, y) => x.min(y),
    }
}

/// sBx for a jump at `pc` landing on `target`.
pub fn offset(pc: usize, target: usize) -> i32 {
    target as i32 - (pc as i32 + 1)
}

/// Encode an integer as a "floating point byte" (`eeeeexxx`): values below
/// 8 are stored as is, others as `(1xxx) * 2^(eeeee - 1)`, rounded up.
pub fn int2fb(mut x: u32) -> u32 {
    if x < 8 {
        return x;
    }
    let mut e = 0;
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Inverse of [`int2fb`].
pub fn fb2int(x: u32) -> u32 {
    if x < 8 {
        x
    } else {
        ((x & 7) + 8) << ((x >> 3) - 1)
    }
}
