/// Lua 5.3 opcodes and instruction encoding.
///
/// Instruction format (32 bits):
/// - Bits 0-5: OpCode (6 bits)
/// - Bits 6-13: A (8 bits)
/// - For iABC format:
///   - Bits 14-22: C (9 bits)
///   - Bits 23-31: B (9 bits)
/// - For iABx: Bx = bits 14-31 (unsigned 18 bits)
/// - For iAsBx: sBx = Bx - MAX_SBX (signed interpretation)
/// - For iAx: Ax = bits 6-31 (26 bits, unsigned)
///
/// B and C operands of RK mode refer to a constant when bit 8 is set.
use crate::error::EncodeError;
use std::fmt;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C; // 26

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MIN_SBX: i32 = -MAX_SBX;
pub const MAX_AX: u32 = mask(SIZE_AX); // 67108863

/// Bit marking an RK operand as a constant index.
pub const BIT_RK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index that fits an RK operand.
pub const MAX_INDEX_RK: u32 = BIT_RK - 1;

/// Encode constant index `k` as an RK operand.
pub const fn rk_constant(k: u32) -> u32 {
    k | BIT_RK
}

pub const fn is_constant(rk: u32) -> bool {
    rk & BIT_RK != 0
}

/// All 47 Lua 5.3 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKX,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    Self_,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

const ALL_OPCODES: [OpCode; OpCode::COUNT] = {
    use OpCode::*;
    [
        Move, LoadK, LoadKX, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp, SetUpval,
        SetTable, NewTable, Self_, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr, BXor, Shl, Shr,
        Unm, BNot, Not, Len, Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return,
        ForLoop, ForPrep, TForCall, TForLoop, SetList, Closure, VarArg, ExtraArg,
    ]
};

/// How an instruction uses its B or C field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpArgMode {
    /// Unused.
    N,
    /// Used as a plain number.
    U,
    /// Register or jump offset.
    R,
    /// Constant or register (RK).
    K,
}

impl OpCode {
    /// Number of opcodes.
    pub const COUNT: usize = 47;

    pub fn from_u8(val: u8) -> Option<OpCode> {
        ALL_OPCODES.get(usize::from(val)).copied()
    }

    pub fn format(&self) -> InstructionFormat {
        use InstructionFormat::*;
        use OpCode::*;
        match self {
            LoadK | LoadKX | Closure => IABx,
            Jmp | ForLoop | ForPrep | TForLoop => IAsBx,
            ExtraArg => IAx,
            _ => IABC,
        }
    }

    /// Modes of the B and C operands.
    pub fn arg_modes(&self) -> (OpArgMode, OpArgMode) {
        use OpArgMode::*;
        use OpCode::*;
        match self {
            Move => (R, N),
            LoadK => (K, N),
            LoadKX => (N, N),
            LoadBool => (U, U),
            LoadNil => (U, N),
            GetUpval => (U, N),
            GetTabUp => (U, K),
            GetTable => (R, K),
            SetTabUp | SetTable => (K, K),
            SetUpval => (U, N),
            NewTable => (U, U),
            Self_ => (R, K),
            Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr => (K, K),
            Unm | BNot | Not | Len => (R, N),
            Concat => (R, R),
            Jmp => (R, N),
            Eq | Lt | Le => (K, K),
            Test => (N, U),
            TestSet => (R, U),
            Call | TailCall | Return => (U, U),
            ForLoop | ForPrep | TForLoop => (R, N),
            TForCall => (N, U),
            SetList => (U, U),
            Closure => (U, N),
            VarArg => (U, N),
            ExtraArg => (U, U),
        }
    }

    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKX => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// Returns true if this opcode is a test (conditional skip).
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }
}

/// Instruction format types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

fn check(op: OpCode, field: &'static str, value: i64, min: i64, max: i64) -> Result<(), EncodeError> {
    if value < min || value > max {
        return Err(EncodeError {
            op: op.name(),
            field,
            value,
        });
    }
    Ok(())
}

/// A 32-bit Lua 5.3 bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    /// Create an iABC instruction.
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Result<Self, EncodeError> {
        check(op, "A", a.into(), 0, MAX_A.into())?;
        check(op, "B", b.into(), 0, MAX_B.into())?;
        check(op, "C", c.into(), 0, MAX_C.into())?;
        Ok(Instruction(
            (op as u32) << POS_OP | a << POS_A | b << POS_B | c << POS_C,
        ))
    }

    /// Create an iABx instruction.
    pub fn abx(op: OpCode, a: u32, bx: u32) -> Result<Self, EncodeError> {
        check(op, "A", a.into(), 0, MAX_A.into())?;
        check(op, "Bx", bx.into(), 0, MAX_BX.into())?;
        Ok(Instruction((op as u32) << POS_OP | a << POS_A | bx << POS_BX))
    }

    /// Create an iAsBx instruction; sBx is stored biased by `MAX_SBX`.
    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Result<Self, EncodeError> {
        check(op, "sBx", sbx.into(), MIN_SBX.into(), MAX_SBX.into())?;
        Self::abx(op, a, (sbx + MAX_SBX) as u32)
    }

    /// Create an iAx instruction.
    pub fn ax(op: OpCode, ax: u32) -> Result<Self, EncodeError> {
        check(op, "Ax", ax.into(), 0, MAX_AX.into())?;
        Ok(Instruction((op as u32) << POS_OP | ax << POS_AX))
    }

    // ---- Decoders ----

    /// The opcode, or `None` for a word outside the instruction set.
    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(((self.0 >> POS_OP) & mask(SIZE_OP)) as u8)
    }

    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - MAX_SBX
    }

    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_AX) & mask(SIZE_AX)
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_a(&mut self, a: u32) -> Result<(), EncodeError> {
        if let Some(op) = self.opcode() {
            check(op, "A", a.into(), 0, MAX_A.into())?;
        }
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | (a << POS_A);
        Ok(())
    }

    pub fn set_sbx(&mut self, sbx: i32) -> Result<(), EncodeError> {
        if let Some(op) = self.opcode() {
            check(op, "sBx", sbx.into(), MIN_SBX.into(), MAX_SBX.into())?;
        }
        let bx = sbx.wrapping_add(MAX_SBX) as u32 & mask(SIZE_BX);
        self.0 = (self.0 & !(mask(SIZE_BX) << POS_BX)) | (bx << POS_BX);
        Ok(())
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<invalid {:#010x}>", self.0);
        };
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => write!(f, " A={} B={} C={}", self.a(), self.b(), self.c()),
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a(), self.bx()),
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a(), self.sbx()),
            InstructionFormat::IAx => write!(f, " Ax={}", self.ax_field()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
