//! Abstract syntax tree.
//!
//! Every node owns its children; nothing is shared between parents.

use crate::token::TokenKind;

/// An ordered statement sequence. Only the last statement may be a return.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub stats: Vec<Stat>,
}

/// A statement and the line it starts on.
#[derive(Clone, Debug, PartialEq)]
pub struct Stat {
    pub kind: StatKind,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatKind {
    /// `;`
    Empty,
    Break,
    /// `::name::`
    Label(String),
    Goto(String),
    Do(Block),
    While {
        cond: Exp,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Exp,
    },
    /// `if`/`elseif` guards paired with their bodies. An `else` body is
    /// paired with `Exp::Bool(true)`.
    If {
        conds: Vec<Exp>,
        blocks: Vec<Block>,
    },
    NumericFor {
        var: String,
        init: Exp,
        limit: Exp,
        step: Option<Exp>,
        body: Block,
    },
    GenericFor {
        names: Vec<String>,
        exps: Vec<Exp>,
        body: Block,
    },
    LocalDecl {
        names: Vec<String>,
        exps: Vec<Exp>,
    },
    /// `local function name` sees its own name inside the body.
    LocalFunction {
        name: String,
        func: FuncDef,
    },
    Assign {
        targets: Vec<Exp>,
        values: Vec<Exp>,
    },
    Call(FuncCall),
    Return(Vec<Exp>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Exp {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Vararg,
    Name(String),
    Index {
        obj: Box<Exp>,
        key: Box<Exp>,
    },
    Call(FuncCall),
    Function(FuncDef),
    Table(TableConstructor),
    /// Parenthesised expression; truncates multiple results to one.
    Paren(Box<Exp>),
    Unop {
        op: UnOp,
        exp: Box<Exp>,
    },
    Binop {
        op: BinOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
}

impl Exp {
    /// Function calls and `...` can produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Exp::Call(_) | Exp::Vararg)
    }

    /// Valid assignment targets.
    pub fn is_var(&self) -> bool {
        matches!(self, Exp::Name(_) | Exp::Index { .. })
    }

    pub fn index(obj: Exp, key: Exp) -> Exp {
        Exp::Index {
            obj: Box::new(obj),
            key: Box::new(key),
        }
    }

    pub fn binop(op: BinOp, lhs: Exp, rhs: Exp) -> Exp {
        Exp::Binop {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unop(op: UnOp, exp: Exp) -> Exp {
        Exp::Unop {
            op,
            exp: Box::new(exp),
        }
    }
}

/// A call. For `obj:m(args)` the callee is `obj["m"]`, `obj` is prepended
/// to `args` and `method` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncCall {
    pub callee: Box<Exp>,
    pub args: Vec<Exp>,
    pub method: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FuncDef {
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
}

/// Parallel key and value lists. A `None` key is a positional entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableConstructor {
    pub keys: Vec<Option<Exp>>,
    pub values: Vec<Exp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BNot,
    Not,
    Len,
}

/// Binding power of every unary operator.
pub const UNARY_PRIORITY: u8 = 12;

impl BinOp {
    pub fn from_token(kind: TokenKind) -> Option<BinOp> {
        let op = match kind {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::FloorDiv => BinOp::IDiv,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::Caret => BinOp::Pow,
            TokenKind::DotDot => BinOp::Concat,
            TokenKind::ShiftLeft => BinOp::Shl,
            TokenKind::ShiftRight => BinOp::Shr,
            TokenKind::Ampersand => BinOp::BAnd,
            TokenKind::Pipe => BinOp::BOr,
            TokenKind::Tilde => BinOp::BXor,
            TokenKind::Equal => BinOp::Eq,
            TokenKind::NotEqual => BinOp::NotEq,
            TokenKind::Less => BinOp::Lt,
            TokenKind::LessEq => BinOp::LtEq,
            TokenKind::Greater => BinOp::Gt,
            TokenKind::GreaterEq => BinOp::GtEq,
            TokenKind::And => BinOp::And,
            TokenKind::Or => BinOp::Or,
            _ => return None,
        };
        Some(op)
    }

    /// (left, right) binding powers. An operator is consumed only while its
    /// left power is strictly greater than the current limit, so a right
    /// power equal to the left one associates left and a smaller one
    /// (`..`, `^`) associates right.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq | BinOp::NotEq | BinOp::Eq => (3, 3),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::BAnd => (6, 6),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8),
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
            BinOp::Pow => (14, 13),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq
        )
    }
}

impl UnOp {
    pub fn from_token(kind: TokenKind) -> Option<UnOp> {
        match kind {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Tilde => Some(UnOp::BNot),
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Hash => Some(UnOp::Len),
            _ => None,
        }
    }
}
