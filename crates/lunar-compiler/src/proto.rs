/// Function prototype: the compiled form of one function body.
use crate::opcode::Instruction;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// A constant value in the constant pool.
///
/// Floats compare by bit pattern so that the pool can deduplicate them
/// (`0.0` and `-0.0` stay distinct, a NaN equals itself).
#[derive(Clone, Debug)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => b.hash(state),
            Constant::Integer(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => f.write_str("nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(i) => write!(f, "{i}"),
            Constant::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Constant::Float(x) => write!(f, "{x}"),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    pub name: String,
    /// True if the upvalue is a register of the enclosing function,
    /// false if it is one of the enclosing function's upvalues.
    pub in_stack: bool,
    /// Register index if `in_stack`, upvalue index in the parent otherwise.
    pub index: u32,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    pub name: String,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype. Immutable once built.
#[derive(Debug)]
pub struct Prototype {
    /// Chunk name; set on the main prototype only.
    pub source: Option<String>,
    /// Number of fixed parameters.
    pub num_params: u32,
    pub is_vararg: bool,
    /// Registers the function needs.
    pub max_stack_size: u32,
    pub constants: Vec<Constant>,
    pub locals: Vec<LocalVar>,
    pub upvalues: Vec<UpvalDesc>,
    pub code: Vec<Instruction>,
    pub sub_protos: Vec<Rc<Prototype>>,
    /// Enclosing prototype. Informational only; dangling for the main chunk.
    pub parent: Weak<Prototype>,
}

impl Prototype {
    /// The enclosing prototype, if it is still alive.
    pub fn parent(&self) -> Option<Rc<Prototype>> {
        self.parent.upgrade()
    }

    /// Total number of prototypes in this tree, including `self`.
    pub fn count_protos(&self) -> usize {
        1 + self.sub_protos.iter().map(|p| p.count_protos()).sum::<usize>()
    }
}
