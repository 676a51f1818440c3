//! Code generator: lowers a parsed block into a tree of function prototypes.
//!
//! Expressions are compiled into a caller-chosen target register `a` with a
//! requested result count `n`, where `-1` means "all results up to the
//! stack top". Temporaries are allocated above the current register top and
//! released by resetting the top once the value has been consumed.

mod func_info;

pub use func_info::{fb2int, int2fb, FunctionInfo, FIELDS_PER_FLUSH, MAX_REGISTERS, MAX_UPVALUES};

use crate::ast::{BinOp, Block, Exp, FuncCall, FuncDef, Stat, StatKind, TableConstructor, UnOp};
use crate::error::CodeGenError;
use crate::opcode::{rk_constant, OpCode, MAX_INDEX_RK};
use crate::proto::{Constant, Prototype};
use func_info::offset;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Name of the environment upvalue every chunk closes over.
const ENV: &str = "_ENV";

/// Compile a parsed chunk.
///
/// The chunk becomes a vararg main function whose upvalue 0 is `_ENV`,
/// bound to a register of an implicit entry function that is never emitted.
pub fn compile(block: &Block, chunk_name: &str) -> Result<Rc<Prototype>, CodeGenError> {
    let mut entry = FunctionInfo::new(0, false, 0);
    entry.add_local(ENV, 0)?;

    let mut gen = CodeGenerator {
        fi: FunctionInfo::new(0, true, 0),
        enclosing: vec![entry],
    };
    gen.resolve_upvalue(ENV)?;
    gen.gen_block(block)?;
    gen.fi.exit_scope()?;
    gen.fi.emit_return(0, 0)?;

    let proto = gen.fi.into_proto(Weak::new(), Some(chunk_name.to_string()));
    debug!(chunk = chunk_name, protos = proto.count_protos(), "chunk compiled");
    Ok(proto)
}

/// How a name resolves in the current function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Var {
    Local(u32),
    Upval(u32),
    Global,
}

/// Where an operand lives.
#[derive(Clone, Copy, Debug)]
enum Operand {
    Reg(u32),
    Upval(u32),
}

/// A resolved assignment target.
#[derive(Clone, Copy, Debug)]
enum Target {
    Local(u32),
    Upval(u32),
    Table { table: u32, key: u32 },
    EnvTable { env: u32, key: u32 },
    EnvUpval { env: u32, key: u32 },
}

struct CodeGenerator {
    /// Function being compiled.
    fi: FunctionInfo,
    /// Enclosing functions, innermost last.
    enclosing: Vec<FunctionInfo>,
}

/// Look `name` up as an upvalue of `fi`, capturing it from the enclosing
/// chain on first use.
fn find_upvalue(
    fi: &mut FunctionInfo,
    ancestors: &mut [FunctionInfo],
    name: &str,
) -> Result<Option<u32>, CodeGenError> {
    if let Some(idx) = fi.upvalue_index(name) {
        return Ok(Some(idx));
    }
    let Some((parent, rest)) = ancestors.split_last_mut() else {
        return Ok(None);
    };
    if let Some(slot) = parent.capture_local(name) {
        return fi.add_upvalue(name, true, slot).map(Some);
    }
    match find_upvalue(parent, rest, name)? {
        Some(idx) => fi.add_upvalue(name, false, idx).map(Some),
        None => Ok(None),
    }
}

/// Drop written trailing `nil`s, which the nil padding reproduces. Stops at
/// a nil that follows a call or `...`, since dropping it would let that
/// expression expand into the nil's slot.
fn trim_trailing_nils<'a, 'b>(mut exps: &'a [&'b Exp]) -> &'a [&'b Exp] {
    while let Some((last, rest)) = exps.split_last() {
        let after_multi = rest.last().is_some_and(|e| e.is_multi());
        if !matches!(last, Exp::Nil) || after_multi {
            break;
        }
        exps = rest;
    }
    exps
}

fn literal_constant(exp: &Exp) -> Option<Constant> {
    match exp {
        Exp::Nil => Some(Constant::Nil),
        Exp::Bool(b) => Some(Constant::Boolean(*b)),
        Exp::Integer(i) => Some(Constant::Integer(*i)),
        Exp::Float(f) => Some(Constant::Float(*f)),
        Exp::String(s) => Some(Constant::String(s.clone())),
        _ => None,
    }
}

fn concat_operands<'e>(exp: &'e Exp, out: &mut Vec<&'e Exp>) {
    match exp {
        Exp::Binop {
            op: BinOp::Concat,
            lhs,
            rhs,
        } => {
            concat_operands(lhs, out);
            concat_operands(rhs, out);
        }
        other => out.push(other),
    }
}

impl CodeGenerator {
    // ---- name resolution ----

    fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u32>, CodeGenError> {
        find_upvalue(&mut self.fi, &mut self.enclosing, name)
    }

    fn resolve(&mut self, name: &str) -> Result<Var, CodeGenError> {
        if let Some(slot) = self.fi.slot_of_local(name) {
            return Ok(Var::Local(slot));
        }
        Ok(match self.resolve_upvalue(name)? {
            Some(idx) => Var::Upval(idx),
            None => Var::Global,
        })
    }

    /// The environment table of the current function.
    fn resolve_env(&mut self) -> Result<Operand, CodeGenError> {
        Ok(match self.resolve(ENV)? {
            Var::Local(slot) => Operand::Reg(slot),
            Var::Upval(idx) => Operand::Upval(idx),
            // The entry function always binds _ENV.
            Var::Global => Operand::Upval(0),
        })
    }

    /// RK operand holding a global's name: a constant when it fits, a
    /// freshly loaded register otherwise.
    fn name_key(&mut self, name: &str) -> Result<u32, CodeGenError> {
        let idx = self.fi.constant_index(Constant::String(name.to_string()));
        if idx <= MAX_INDEX_RK {
            return Ok(rk_constant(idx));
        }
        let r = self.fi.alloc_reg()?;
        self.fi.emit_load_k(r, Constant::String(name.to_string()))?;
        Ok(r)
    }

    // ---- operands ----

    /// Register holding the value of `exp`. Locals are used in place.
    fn exp_to_reg(&mut self, exp: &Exp) -> Result<u32, CodeGenError> {
        if let Exp::Name(name) = exp {
            if let Some(slot) = self.fi.slot_of_local(name) {
                return Ok(slot);
            }
        }
        let r = self.fi.alloc_reg()?;
        self.gen_exp(exp, r, 1)?;
        Ok(r)
    }

    /// RK operand for `exp`: a constant index for literals that fit,
    /// otherwise a register.
    fn exp_to_rk(&mut self, exp: &Exp) -> Result<u32, CodeGenError> {
        match self.constant_rk(exp) {
            Some(rk) => Ok(rk),
            None => self.exp_to_reg(exp),
        }
    }

    fn constant_rk(&mut self, exp: &Exp) -> Option<u32> {
        let idx = self.fi.constant_index(literal_constant(exp)?);
        (idx <= MAX_INDEX_RK).then(|| rk_constant(idx))
    }

    /// Register or upvalue operand for the table side of an index.
    fn exp_to_table(&mut self, exp: &Exp) -> Result<Operand, CodeGenError> {
        if let Exp::Name(name) = exp {
            match self.resolve(name)? {
                Var::Local(slot) => return Ok(Operand::Reg(slot)),
                Var::Upval(idx) => return Ok(Operand::Upval(idx)),
                Var::Global => {}
            }
        }
        let r = self.fi.alloc_reg()?;
        self.gen_exp(exp, r, 1)?;
        Ok(Operand::Reg(r))
    }

    /// Evaluate `exps` into consecutive fresh registers, adjusted to exactly
    /// `want` values. A trailing call or `...` fills the missing values;
    /// otherwise they are padded with nil.
    fn load_values(&mut self, exps: &[&Exp], want: usize) -> Result<(), CodeGenError> {
        let count = exps.len();
        let mut filled = false;
        for (i, exp) in exps.iter().enumerate() {
            let a = self.fi.alloc_reg()?;
            if i + 1 == count && exp.is_multi() {
                if count > want {
                    self.gen_exp(exp, a, 0)?;
                } else {
                    let n = want - count + 1;
                    self.gen_exp(exp, a, n as i32)?;
                    self.fi.alloc_regs(n as u32 - 1)?;
                    filled = true;
                }
            } else {
                self.gen_exp(exp, a, 1)?;
            }
        }
        if !filled && want > count {
            let n = (want - count) as u32;
            let a = self.fi.alloc_regs(n)?;
            self.fi.emit_load_nil(a, n)?;
        }
        Ok(())
    }

    // ---- statements ----

    fn gen_block(&mut self, block: &Block) -> Result<(), CodeGenError> {
        for stat in &block.stats {
            self.gen_stat(stat)?;
        }
        Ok(())
    }

    fn gen_scoped_block(&mut self, block: &Block) -> Result<(), CodeGenError> {
        self.fi.enter_scope(false);
        self.gen_block(block)?;
        self.fi.close_open_upvals()?;
        self.fi.exit_scope()
    }

    fn gen_stat(&mut self, stat: &Stat) -> Result<(), CodeGenError> {
        self.fi.line = stat.line;
        match &stat.kind {
            StatKind::Empty | StatKind::Label(_) => Ok(()),
            StatKind::Goto(_) => Err(CodeGenError::Unsupported {
                what: "goto",
                line: stat.line,
            }),
            StatKind::Break => {
                let pc = self.fi.emit_jmp(0, 0)?;
                self.fi.add_break_jump(pc)
            }
            StatKind::Do(body) => self.gen_scoped_block(body),
            StatKind::While { cond, body } => self.gen_while(cond, body),
            StatKind::Repeat { body, cond } => self.gen_repeat(body, cond),
            StatKind::If { conds, blocks } => self.gen_if(conds, blocks),
            StatKind::NumericFor {
                var,
                init,
                limit,
                step,
                body,
            } => self.gen_numeric_for(var, init, limit, step.as_ref(), body),
            StatKind::GenericFor { names, exps, body } => self.gen_generic_for(names, exps, body),
            StatKind::LocalDecl { names, exps } => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                let exps: Vec<&Exp> = exps.iter().collect();
                self.gen_local_assign(&names, &exps)
            }
            StatKind::LocalFunction { name, func } => {
                let start = self.fi.pc() + 1;
                let r = self.fi.add_local(name, start)?;
                self.gen_func_def(func, r)
            }
            StatKind::Assign { targets, values } => self.gen_assign(targets, values),
            StatKind::Call(call) => {
                let r = self.fi.alloc_reg()?;
                self.gen_call(call, r, 0)?;
                self.fi.free_reg()
            }
            StatKind::Return(exps) => self.gen_return(exps),
        }
    }

    /// Evaluate a condition into a register and emit `TEST r 0; JMP`.
    /// Returns the jump taken when the condition is false.
    fn gen_cond_jump(&mut self, cond: &Exp) -> Result<usize, CodeGenError> {
        let top = self.fi.used_regs();
        let a = self.exp_to_reg(cond)?;
        self.fi.set_used_regs(top);
        self.fi.emit_abc(OpCode::Test, a, 0, 0)?;
        self.fi.emit_jmp(0, 0)
    }

    fn gen_while(&mut self, cond: &Exp, body: &Block) -> Result<(), CodeGenError> {
        let start = self.fi.pc();
        let exit = self.gen_cond_jump(cond)?;

        self.fi.enter_scope(true);
        self.gen_block(body)?;
        self.fi.close_open_upvals()?;
        let back = self.fi.pc();
        self.fi.emit_jmp(0, offset(back, start))?;
        self.fi.exit_scope()?;

        self.fi.patch_to_here(exit)
    }

    fn gen_repeat(&mut self, body: &Block, cond: &Exp) -> Result<(), CodeGenError> {
        self.fi.enter_scope(true);
        let start = self.fi.pc();
        self.gen_block(body)?;

        // The condition sees the body's locals.
        let top = self.fi.used_regs();
        let a = self.exp_to_reg(cond)?;
        self.fi.set_used_regs(top);
        self.fi.emit_abc(OpCode::Test, a, 0, 0)?;
        let close = self.fi.jmp_arg_a();
        let back = self.fi.pc();
        self.fi.emit_jmp(close, offset(back, start))?;
        self.fi.close_open_upvals()?;

        self.fi.exit_scope()
    }

    fn gen_if(&mut self, conds: &[Exp], blocks: &[Block]) -> Result<(), CodeGenError> {
        let arms = conds.len();
        let mut to_end = Vec::with_capacity(arms);
        let mut to_next: Option<usize> = None;

        for (i, (cond, block)) in conds.iter().zip(blocks).enumerate() {
            if let Some(pc) = to_next.take() {
                self.fi.patch_to_here(pc)?;
            }
            let skip = match cond {
                Exp::Bool(true) => None,
                _ => Some(self.gen_cond_jump(cond)?),
            };

            self.gen_scoped_block(block)?;

            if i + 1 < arms {
                to_end.push(self.fi.emit_jmp(0, 0)?);
                to_next = skip;
            } else if let Some(pc) = skip {
                to_end.push(pc);
            }
        }

        for pc in to_end {
            self.fi.patch_to_here(pc)?;
        }
        Ok(())
    }

    fn gen_numeric_for(
        &mut self,
        var: &str,
        init: &Exp,
        limit: &Exp,
        step: Option<&Exp>,
        body: &Block,
    ) -> Result<(), CodeGenError> {
        let one = Exp::Integer(1);
        let step = step.unwrap_or(&one);

        self.fi.enter_scope(true);
        self.gen_local_assign(
            &["(for index)", "(for limit)", "(for step)"],
            &[init, limit, step],
        )?;
        let start = self.fi.pc() + 1;
        self.fi.add_local(var, start)?;

        let a = self.fi.used_regs() - 4;
        let prep = self.fi.emit_asbx(OpCode::ForPrep, a, 0)?;
        self.gen_block(body)?;
        self.fi.close_open_upvals()?;
        let lp = self.fi.emit_asbx(OpCode::ForLoop, a, 0)?;

        self.fi.patch_jump(prep, lp)?;
        self.fi.patch_jump(lp, prep + 1)?;
        self.fi.exit_scope()
    }

    fn gen_generic_for(&mut self, names: &[String], exps: &[Exp], body: &Block) -> Result<(), CodeGenError> {
        self.fi.enter_scope(true);
        let exps: Vec<&Exp> = exps.iter().collect();
        self.gen_local_assign(&["(for generator)", "(for state)", "(for control)"], &exps)?;
        let start = self.fi.pc() + 1;
        for name in names {
            self.fi.add_local(name, start)?;
        }
        let base = self.fi.used_regs() - 3 - names.len() as u32;

        let to_call = self.fi.emit_jmp(0, 0)?;
        self.gen_block(body)?;
        self.fi.close_open_upvals()?;
        self.fi.patch_to_here(to_call)?;

        self.fi.emit_abc(OpCode::TForCall, base, 0, names.len() as u32)?;
        let lp = self.fi.emit_asbx(OpCode::TForLoop, base + 2, 0)?;
        self.fi.patch_jump(lp, to_call + 1)?;
        self.fi.exit_scope()
    }

    fn gen_local_assign(&mut self, names: &[&str], exps: &[&Exp]) -> Result<(), CodeGenError> {
        let exps = trim_trailing_nils(exps);
        let top = self.fi.used_regs();
        self.load_values(exps, names.len())?;
        self.fi.set_used_regs(top);

        let start = self.fi.pc();
        for name in names {
            self.fi.add_local(name, start)?;
        }
        Ok(())
    }

    fn gen_assign(&mut self, targets: &[Exp], values: &[Exp]) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let target = match target {
                Exp::Index { obj, key } => {
                    let table = self.fi.alloc_reg()?;
                    self.gen_exp(obj, table, 1)?;
                    let key = match self.constant_rk(key) {
                        Some(rk) => rk,
                        None => {
                            let r = self.fi.alloc_reg()?;
                            self.gen_exp(key, r, 1)?;
                            r
                        }
                    };
                    Target::Table { table, key }
                }
                Exp::Name(name) => match self.resolve(name)? {
                    Var::Local(slot) => Target::Local(slot),
                    Var::Upval(idx) => Target::Upval(idx),
                    Var::Global => {
                        let key = self.name_key(name)?;
                        match self.resolve_env()? {
                            Operand::Reg(env) => Target::EnvTable { env, key },
                            Operand::Upval(env) => Target::EnvUpval { env, key },
                        }
                    }
                },
                _ => {
                    return Err(CodeGenError::Unsupported {
                        what: "assignment to a non-variable",
                        line: self.fi.line,
                    })
                }
            };
            resolved.push(target);
        }

        let first = self.fi.used_regs();
        let values: Vec<&Exp> = values.iter().collect();
        self.load_values(trim_trailing_nils(&values), resolved.len())?;

        for (i, target) in resolved.into_iter().enumerate() {
            let v = first + i as u32;
            match target {
                Target::Local(a) => self.fi.emit_move(a, v)?,
                Target::Upval(b) => self.fi.emit_abc(OpCode::SetUpval, v, b, 0)?,
                Target::Table { table, key } => self.fi.emit_abc(OpCode::SetTable, table, key, v)?,
                Target::EnvTable { env, key } => self.fi.emit_abc(OpCode::SetTable, env, key, v)?,
                Target::EnvUpval { env, key } => self.fi.emit_abc(OpCode::SetTabUp, env, key, v)?,
            };
        }

        self.fi.set_used_regs(top);
        Ok(())
    }

    fn gen_return(&mut self, exps: &[Exp]) -> Result<(), CodeGenError> {
        if exps.is_empty() {
            self.fi.emit_return(0, 0)?;
            return Ok(());
        }

        if let [single] = exps {
            if let Exp::Name(name) = single {
                if let Some(r) = self.fi.slot_of_local(name) {
                    self.fi.emit_return(r, 1)?;
                    return Ok(());
                }
            }
            if let Exp::Call(call) = single {
                let r = self.fi.alloc_reg()?;
                let n_args = self.prep_call(call, r)?;
                self.fi.emit_tail_call(r, n_args)?;
                self.fi.free_reg()?;
                self.fi.emit_return(r, -1)?;
                return Ok(());
            }
        }

        let count = exps.len();
        let multi = exps[count - 1].is_multi();
        for (i, exp) in exps.iter().enumerate() {
            let r = self.fi.alloc_reg()?;
            let n = if i + 1 == count && multi { -1 } else { 1 };
            self.gen_exp(exp, r, n)?;
        }
        self.fi.free_regs(count as u32)?;

        let a = self.fi.used_regs();
        self.fi.emit_return(a, if multi { -1 } else { count as i32 })?;
        Ok(())
    }

    // ---- expressions ----

    fn gen_exp(&mut self, exp: &Exp, a: u32, n: i32) -> Result<(), CodeGenError> {
        match exp {
            Exp::Nil => {
                self.fi.emit_load_nil(a, n.max(1) as u32)?;
            }
            Exp::Bool(b) => {
                self.fi.emit_load_bool(a, u32::from(*b), 0)?;
            }
            Exp::Integer(i) => {
                self.fi.emit_load_k(a, Constant::Integer(*i))?;
            }
            Exp::Float(f) => {
                self.fi.emit_load_k(a, Constant::Float(*f))?;
            }
            Exp::String(s) => {
                self.fi.emit_load_k(a, Constant::String(s.clone()))?;
            }
            Exp::Vararg => {
                if !self.fi.is_vararg() {
                    return Err(CodeGenError::VarargOutsideVararg { line: self.fi.line });
                }
                self.fi.emit_vararg(a, n)?;
            }
            Exp::Name(name) => self.gen_name(name, a)?,
            Exp::Index { obj, key } => self.gen_index(obj, key, a)?,
            Exp::Call(call) => self.gen_call(call, a, n)?,
            Exp::Function(def) => self.gen_func_def(def, a)?,
            Exp::Table(table) => self.gen_table(table, a)?,
            Exp::Paren(inner) => self.gen_exp(inner, a, 1)?,
            Exp::Unop { op, exp } => self.gen_unop(*op, exp, a)?,
            Exp::Binop { op, lhs, rhs } => match op {
                BinOp::And | BinOp::Or => self.gen_logical(*op, lhs, rhs, a)?,
                BinOp::Concat => self.gen_concat(exp, a)?,
                op if op.is_comparison() => self.gen_comparison(*op, lhs, rhs, a)?,
                op => self.gen_arith(*op, lhs, rhs, a)?,
            },
        }
        Ok(())
    }

    fn gen_name(&mut self, name: &str, a: u32) -> Result<(), CodeGenError> {
        match self.resolve(name)? {
            Var::Local(r) => {
                self.fi.emit_move(a, r)?;
            }
            Var::Upval(idx) => {
                self.fi.emit_abc(OpCode::GetUpval, a, idx, 0)?;
            }
            Var::Global => {
                let top = self.fi.used_regs();
                let key = self.name_key(name)?;
                match self.resolve_env()? {
                    Operand::Upval(env) => self.fi.emit_abc(OpCode::GetTabUp, a, env, key)?,
                    Operand::Reg(env) => self.fi.emit_abc(OpCode::GetTable, a, env, key)?,
                };
                self.fi.set_used_regs(top);
            }
        }
        Ok(())
    }

    fn gen_index(&mut self, obj: &Exp, key: &Exp, a: u32) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();
        let table = self.exp_to_table(obj)?;
        let key = self.exp_to_rk(key)?;
        self.fi.set_used_regs(top);
        match table {
            Operand::Upval(t) => self.fi.emit_abc(OpCode::GetTabUp, a, t, key)?,
            Operand::Reg(t) => self.fi.emit_abc(OpCode::GetTable, a, t, key)?,
        };
        Ok(())
    }

    fn gen_call(&mut self, call: &FuncCall, a: u32, n: i32) -> Result<(), CodeGenError> {
        let n_args = self.prep_call(call, a)?;
        self.fi.emit_call(a, n_args, n)?;
        Ok(())
    }

    /// Load the callee and arguments starting at `a`. Returns the argument
    /// count, or -1 when the last argument is open-ended.
    fn prep_call(&mut self, call: &FuncCall, a: u32) -> Result<i32, CodeGenError> {
        let (args, is_method): (&[Exp], bool) = match (call.method, call.callee.as_ref()) {
            (true, Exp::Index { obj, key }) => {
                self.gen_exp(obj, a, 1)?;
                self.fi.alloc_reg()?;
                let top = self.fi.used_regs();
                let method = self.exp_to_rk(key)?;
                self.fi.set_used_regs(top);
                self.fi.emit_abc(OpCode::Self_, a, a, method)?;
                // args[0] is the receiver, already in place.
                (call.args.get(1..).unwrap_or_default(), true)
            }
            (_, callee) => {
                self.gen_exp(callee, a, 1)?;
                (&call.args, false)
            }
        };

        let count = args.len();
        let mut open = false;
        for (i, arg) in args.iter().enumerate() {
            let r = self.fi.alloc_reg()?;
            if i + 1 == count && arg.is_multi() {
                open = true;
                self.gen_exp(arg, r, -1)?;
            } else {
                self.gen_exp(arg, r, 1)?;
            }
        }
        self.fi.free_regs(count as u32)?;

        let mut n_args = count as i32;
        if is_method {
            self.fi.free_reg()?;
            n_args += 1;
        }
        Ok(if open { -1 } else { n_args })
    }

    fn gen_func_def(&mut self, def: &FuncDef, a: u32) -> Result<(), CodeGenError> {
        let line = self.fi.line;
        trace!(line, params = def.params.len(), "compiling function");

        let child = FunctionInfo::new(def.params.len() as u32, def.is_vararg, line);
        let parent = std::mem::replace(&mut self.fi, child);
        self.enclosing.push(parent);

        for param in &def.params {
            self.fi.add_local(param, 0)?;
        }
        self.gen_block(&def.body)?;
        self.fi.exit_scope()?;
        self.fi.emit_return(0, 0)?;

        let Some(parent) = self.enclosing.pop() else {
            return Err(CodeGenError::FunctionStackUnderflow { line });
        };
        let child = std::mem::replace(&mut self.fi, parent);
        let bx = self.fi.add_sub_func(child);
        self.fi.emit_abx(OpCode::Closure, a, bx)?;
        Ok(())
    }

    fn gen_table(&mut self, table: &TableConstructor, a: u32) -> Result<(), CodeGenError> {
        let count = table.values.len();
        let n_array = table.keys.iter().filter(|k| k.is_none()).count() as u32;
        let open_tail = matches!(table.keys.last(), Some(None))
            && table.values.last().is_some_and(Exp::is_multi);

        self.fi.emit_new_table(a, n_array, count as u32 - n_array)?;

        let mut array_idx = 0;
        for (i, (key, value)) in table.keys.iter().zip(&table.values).enumerate() {
            match key {
                None => {
                    array_idx += 1;
                    let r = self.fi.alloc_reg()?;
                    let last_open = open_tail && i + 1 == count;
                    self.gen_exp(value, r, if last_open { -1 } else { 1 })?;

                    if array_idx % FIELDS_PER_FLUSH == 0 || array_idx == n_array {
                        let pending = match array_idx % FIELDS_PER_FLUSH {
                            0 => FIELDS_PER_FLUSH,
                            n => n,
                        };
                        self.fi.free_regs(pending)?;
                        let batch = (array_idx - 1) / FIELDS_PER_FLUSH + 1;
                        let b = if last_open { 0 } else { pending };
                        self.fi.emit_set_list(a, b, batch)?;
                    }
                }
                Some(key) => {
                    let top = self.fi.used_regs();
                    let b = self.exp_to_rk(key)?;
                    let c = self.exp_to_rk(value)?;
                    self.fi.set_used_regs(top);
                    self.fi.emit_abc(OpCode::SetTable, a, b, c)?;
                }
            }
        }
        Ok(())
    }

    fn gen_unop(&mut self, op: UnOp, exp: &Exp, a: u32) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();
        let b = self.exp_to_reg(exp)?;
        self.fi.set_used_regs(top);
        let opcode = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::BNot => OpCode::BNot,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        self.fi.emit_abc(opcode, a, b, 0)?;
        Ok(())
    }

    /// `a .. b .. c` is one CONCAT over consecutive registers.
    fn gen_concat(&mut self, exp: &Exp, a: u32) -> Result<(), CodeGenError> {
        let mut operands = Vec::new();
        concat_operands(exp, &mut operands);

        let first = self.fi.used_regs();
        for operand in &operands {
            let r = self.fi.alloc_reg()?;
            self.gen_exp(operand, r, 1)?;
        }
        let last = first + operands.len() as u32 - 1;
        self.fi.free_regs(operands.len() as u32)?;
        self.fi.emit_abc(OpCode::Concat, a, first, last)?;
        Ok(())
    }

    /// Short-circuit `and`/`or` via TESTSET.
    fn gen_logical(&mut self, op: BinOp, lhs: &Exp, rhs: &Exp, a: u32) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();
        let b = self.exp_to_reg(lhs)?;
        self.fi.set_used_regs(top);
        let c = u32::from(op == BinOp::Or);
        self.fi.emit_abc(OpCode::TestSet, a, b, c)?;
        let done = self.fi.emit_jmp(0, 0)?;

        let b = self.exp_to_reg(rhs)?;
        self.fi.set_used_regs(top);
        self.fi.emit_move(a, b)?;
        self.fi.patch_to_here(done)
    }

    /// Comparisons materialise a boolean: `CMP 1 b c; JMP +1;
    /// LOADBOOL a 0 1; LOADBOOL a 1 0`.
    fn gen_comparison(&mut self, op: BinOp, lhs: &Exp, rhs: &Exp, a: u32) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();
        let b = self.exp_to_rk(lhs)?;
        let c = self.exp_to_rk(rhs)?;
        self.fi.set_used_regs(top);

        let (opcode, expect, x, y) = match op {
            BinOp::Eq => (OpCode::Eq, 1, b, c),
            BinOp::NotEq => (OpCode::Eq, 0, b, c),
            BinOp::Lt => (OpCode::Lt, 1, b, c),
            BinOp::Gt => (OpCode::Lt, 1, c, b),
            BinOp::LtEq => (OpCode::Le, 1, b, c),
            _ => (OpCode::Le, 1, c, b),
        };
        self.fi.emit_abc(opcode, expect, x, y)?;
        self.fi.emit_jmp(0, 1)?;
        self.fi.emit_load_bool(a, 0, 1)?;
        self.fi.emit_load_bool(a, 1, 0)?;
        Ok(())
    }

    fn gen_arith(&mut self, op: BinOp, lhs: &Exp, rhs: &Exp, a: u32) -> Result<(), CodeGenError> {
        let top = self.fi.used_regs();
        let b = self.exp_to_rk(lhs)?;
        let c = self.exp_to_rk(rhs)?;
        self.fi.set_used_regs(top);

        let opcode = match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::IDiv => OpCode::IDiv,
            BinOp::Mod => OpCode::Mod,
            BinOp::Pow => OpCode::Pow,
            BinOp::Shl => OpCode::Shl,
            BinOp::Shr => OpCode::Shr,
            BinOp::BAnd => OpCode::BAnd,
            BinOp::BOr => OpCode::BOr,
            _ => OpCode::BXor,
        };
        self.fi.emit_abc(opcode, a, b, c)?;
        Ok(())
    }
}
