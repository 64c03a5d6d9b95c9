//! Surface syntax of the marks language.

use crate::source::ByteRange;
use crate::types::{Value, ValueType};

pub mod lexer;
mod parser;

pub use parser::{parse_expression, parse_file, ParseError};

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Function(Function),
    Global(Global),
    Import(Import),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FunctionKind {
    Mark,
    Shader,
    /// A helper that is only ever inlined into callers.
    Function,
}

/// A reference to a value type by name, resolved during compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub range: ByteRange,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub range: ByteRange,
    pub name: String,
    pub r#type: TypeName,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub range: ByteRange,
    pub kind: FunctionKind,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeName>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn is_renderable(&self) -> bool {
        matches!(self.kind, FunctionKind::Mark | FunctionKind::Shader)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub range: ByteRange,
    pub name: String,
    pub r#type: TypeName,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub range: ByteRange,
    pub module: String,
    /// The imported names, or `None` to import everything.
    pub names: Option<Vec<(ByteRange, String)>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Pos => "+",
            UnOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ByteRange, Value, ValueType),
    Name(ByteRange, String),
    Field(ByteRange, Box<Expr>, String),
    /// Call with positional and keyword arguments.
    Call(ByteRange, String, Vec<Expr>, Vec<(String, Expr)>),
    UnOp(ByteRange, UnOp, Box<Expr>),
    BinOp(ByteRange, Box<Expr>, BinOp, Box<Expr>),
}

impl Expr {
    pub fn range(&self) -> ByteRange {
        match self {
            Expr::Literal(range, ..)
            | Expr::Name(range, _)
            | Expr::Field(range, ..)
            | Expr::Call(range, ..)
            | Expr::UnOp(range, ..)
            | Expr::BinOp(range, ..) => *range,
        }
    }
}

/// The attributes of one emitted vertex, in source order.
pub type Vertex = Vec<(ByteRange, String, Expr)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Let(ByteRange, String, Option<TypeName>, Option<Expr>),
    Assign(ByteRange, String, Expr),
    Return(ByteRange, Expr),
    Discard(ByteRange),
    Emit(ByteRange, Vec<Vertex>),
    For {
        range: ByteRange,
        var: String,
        start: i64,
        end: i64,
        body: Box<Stmt>,
    },
    /// An `if` with any number of `else if` branches.
    If {
        range: ByteRange,
        branches: Vec<(Expr, Stmt)>,
        otherwise: Option<Box<Stmt>>,
    },
    Block(ByteRange, Vec<Stmt>),
}

impl Stmt {
    pub fn range(&self) -> ByteRange {
        match self {
            Stmt::Expr(expr) => expr.range(),
            Stmt::Let(range, ..)
            | Stmt::Assign(range, ..)
            | Stmt::Return(range, _)
            | Stmt::Discard(range)
            | Stmt::Emit(range, _)
            | Stmt::For { range, .. }
            | Stmt::If { range, .. }
            | Stmt::Block(range, _) => *range,
        }
    }
}
