//! Assembler intermediate representation.
//!
//! The source models statements and expressions via open-ended
//! `NamedTuple` subclassing with runtime `isinstance` dispatch. Per the
//! design note against that pattern, both are modeled here as exhaustive
//! Rust enums: unknown variants are a compile error, not a runtime
//! surprise.

use crate::register::Register;

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+x` — identity.
    Plus,
    /// `-x` — negation.
    Minus,
    /// `sizeof(name)` — size, in cells, of a data type or the total
    /// encoded size of an operation's mnemonic.
    SizeOf,
    /// `alignof(name)` — alignment, in cells, of a data type.
    AlignOf,
}

/// A binary operator. `/` is always floor (integer) division; `<<`/`>>`
/// are logical shifts of the (non-negative) magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// A compile-time expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A bare numeric literal.
    Numeric(i128),
    /// A character literal's codepoint.
    Character(i128),
    /// A reference to a label or constant, resolved during assembly.
    ConstantRef(String),
    /// A unary operator applied to an operand.
    Unary(UnaryOp, Box<Expression>),
    /// A binary operator applied to two operands.
    Binary(Box<Expression>, BinaryOp, Box<Expression>),
}

/// One instruction argument: either an explicit register reference or an
/// expression to resolve at assembly time.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A register named directly in source (`A`, `sp`, ...).
    Register(Register),
    /// An expression, resolved against the constant table.
    Expr(Expression),
}

/// One parsed source line.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `name:` — records the current byte offset under `name`.
    Label(String),
    /// `name = expr` — records an unresolved constant expression.
    ConstantDefinition {
        /// The constant's name.
        name: String,
        /// Its defining expression.
        value: Expression,
    },
    /// `db`/`da`/`dw` EXPR [, EXPR]* — emits literal data.
    Data {
        /// Registry key of the element type (`'b'`, `'a'`, or `'w'`).
        datatype: char,
        /// The values to emit, in order.
        values: Vec<Expression>,
    },
    /// `mnemonic arg [, arg]*` — an instruction.
    Instruction {
        /// The instruction's mnemonic, as written in source.
        mnemonic: String,
        /// Its arguments, in declaration order.
        args: Vec<Argument>,
    },
}
