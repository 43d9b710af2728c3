//! Typed intermediate representation.
//!
//! The checked, desugared form the code generator consumes. Every
//! expression carries exactly one resolved type and its source span;
//! name resolution has already happened, so variables are local/global
//! indices and calls are split into direct, builtin, and indirect
//! forms.

use crate::ast::{BinOp, UnOp};
use crate::builtins::BuiltinKind;
use crate::span::Span;
use crate::types::{FuncSig, Type};

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    /// Indirect-call table: indices into `functions`, in first-reference
    /// order. All entries share `table_sig`.
    pub table: Vec<usize>,
    pub table_sig: Option<FuncSig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
    pub init: Const,
}

/// Constant initializer value for a global.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub exported: bool,
    pub params: Vec<Type>,
    pub result: Type,
    /// Declared locals, indexed after the params.
    pub locals: Vec<Type>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    ConstI32(i32),
    ConstI64(i64),
    ConstF32(f32),
    ConstF64(f64),
    /// String literal; becomes a pointer to a length-prefixed data
    /// segment during code generation.
    Str(String),
    LocalGet(u32),
    GlobalGet(u32),
    /// Operand types are identical, except pointer arithmetic where
    /// the left side is a pointer and the right an integer offset.
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Explicit numeric conversion; source is `operand.ty`, target is
    /// this expression's own type.
    Cast { operand: Box<Expr> },
    CallDirect {
        func: usize,
        args: Vec<Expr>,
    },
    CallBuiltin {
        builtin: BuiltinKind,
        args: Vec<Expr>,
    },
    CallIndirect {
        callee: Box<Expr>,
        sig: FuncSig,
        args: Vec<Expr>,
    },
    /// A function reference: the value is a slot in the module table.
    FuncRefSlot(u32),
    /// Element load through `ptr<T>` or `array<T>`; `length_prefixed`
    /// shifts the base past the u32 length word.
    Load {
        base: Box<Expr>,
        index: Box<Expr>,
        elem: Type,
        length_prefixed: bool,
    },
    /// `len(array<T>)`: reads the length prefix.
    ArrayLen(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    LocalSet { index: u32, value: Expr },
    GlobalSet { index: u32, value: Expr },
    Store {
        base: Expr,
        index: Expr,
        value: Expr,
        elem: Type,
        length_prefixed: bool,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    Return(Option<Expr>),
    Break,
    Continue,
    /// Evaluate for effect; a non-unit result is dropped.
    Expr(Expr),
}
