//! The two-pass assembler.
//!
//! Grounded on `original_source/evil/assembler.py`'s `asm_compile`, but
//! restructured into the explicit layout/emit passes the distilled
//! design calls for (the source resolves labels with a single forward
//! patch list; this crate resolves every constant, including forward
//! label references, through one recursive, memoizing expression
//! resolver shared by both `db`/`da`/`dw` data and instruction operands).

use std::collections::{HashMap, HashSet};

use crate::ast::{Argument, BinaryOp, Expression, Statement, UnaryOp};
use crate::endian::Endianness;
use crate::error::AssembleError;
use crate::isa::{self, OpInfo};
use crate::memory::Memory;
use crate::parser;
use crate::register::Register;
use crate::types::TypeRegistry;

#[derive(Debug, Clone)]
enum Constant {
    /// A label's byte offset, already known after pass 1.
    Offset(usize),
    /// A `name = expr` definition, resolved lazily on first reference.
    Unresolved { expr: Expression, line: usize },
    /// Cached result of resolving an `Unresolved` entry.
    Resolved(i128),
}

/// Parses every non-blank line of `source`, in order.
fn parse_program(source: &str) -> Result<Vec<(Statement, usize)>, AssembleError> {
    let mut statements = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(statement) = parser::parse_statement(line, line_no)? {
            statements.push((statement, line_no));
        }
    }
    Ok(statements)
}

fn define(constants: &mut HashMap<String, Constant>, name: &str, value: Constant, line: usize) -> Result<(), AssembleError> {
    if constants.contains_key(name) {
        return Err(AssembleError::DuplicateSymbol {
            line,
            name: name.to_string(),
        });
    }
    constants.insert(name.to_string(), value);
    Ok(())
}

fn instruction_size(types: &TypeRegistry, mnemonic: &str, line: usize) -> Result<(usize, &'static OpInfo), AssembleError> {
    let op = isa::by_mnemonic(mnemonic).ok_or_else(|| AssembleError::Syntax {
        line,
        message: format!("invalid opcode: {mnemonic}"),
    })?;
    let size = op.size_bytes(types).ok_or_else(|| AssembleError::Syntax {
        line,
        message: format!("operation {mnemonic} declares an unknown argument type"),
    })?;
    Ok((size, op))
}

/// Pass 1: computes every label's byte offset and records (but does not
/// resolve) every named constant's defining expression.
fn layout(statements: &[(Statement, usize)], types: &TypeRegistry) -> Result<HashMap<String, Constant>, AssembleError> {
    let mut constants = HashMap::new();
    let mut offset = 0usize;

    for (statement, line) in statements {
        match statement {
            Statement::Label(name) => {
                define(&mut constants, name, Constant::Offset(offset), *line)?;
            }
            Statement::ConstantDefinition { name, value } => {
                define(
                    &mut constants,
                    name,
                    Constant::Unresolved {
                        expr: value.clone(),
                        line: *line,
                    },
                    *line,
                )?;
            }
            Statement::Data { datatype, values } => {
                let elem_size = types
                    .get(*datatype)
                    .ok_or_else(|| AssembleError::Syntax {
                        line: *line,
                        message: format!("unknown data type: {datatype}"),
                    })?
                    .size_bytes;
                offset += elem_size * values.len();
            }
            Statement::Instruction { mnemonic, .. } => {
                let (size, _) = instruction_size(types, mnemonic, *line)?;
                offset += size;
            }
        }
    }

    Ok(constants)
}

/// Resolves a single named constant, memoizing the result and detecting
/// cycles through `visiting`.
fn resolve_name(
    name: &str,
    constants: &mut HashMap<String, Constant>,
    types: &TypeRegistry,
    visiting: &mut HashSet<String>,
    line: usize,
) -> Result<i128, AssembleError> {
    match constants.get(name) {
        None => Err(AssembleError::UndefinedSymbol {
            line,
            name: name.to_string(),
        }),
        Some(Constant::Offset(offset)) => Ok(*offset as i128),
        Some(Constant::Resolved(value)) => Ok(*value),
        Some(Constant::Unresolved { .. }) => {
            if !visiting.insert(name.to_string()) {
                return Err(AssembleError::CircularConstant {
                    line,
                    name: name.to_string(),
                });
            }
            let (expr, def_line) = match constants.get(name).unwrap() {
                Constant::Unresolved { expr, line } => (expr.clone(), *line),
                _ => unreachable!(),
            };
            let value = resolve_expr(&expr, constants, types, visiting, def_line)?;
            visiting.remove(name);
            constants.insert(name.to_string(), Constant::Resolved(value));
            Ok(value)
        }
    }
}

/// `sizeof(id)`/`alignof(id)` resolve against either a data type name or
/// an operation mnemonic, in that order, mirroring how `Packer.calcsize`
/// and the operation table share the same type-character namespace.
fn size_query(op: UnaryOp, name: &str, types: &TypeRegistry, line: usize) -> Result<i128, AssembleError> {
    if name.chars().count() == 1 {
        if let Some(datatype) = types.get(name.chars().next().unwrap()) {
            return Ok(match op {
                UnaryOp::SizeOf => datatype.size_bytes as i128,
                UnaryOp::AlignOf => datatype.alignment as i128,
                _ => unreachable!(),
            });
        }
    }
    if let UnaryOp::SizeOf = op {
        if let Some(info) = isa::by_mnemonic(name) {
            if let Some(size) = info.size_bytes(types) {
                return Ok(size as i128);
            }
        }
    }
    Err(AssembleError::Syntax {
        line,
        message: format!("{name} is not a known data type or operation"),
    })
}

fn resolve_expr(
    expr: &Expression,
    constants: &mut HashMap<String, Constant>,
    types: &TypeRegistry,
    visiting: &mut HashSet<String>,
    line: usize,
) -> Result<i128, AssembleError> {
    match expr {
        Expression::Numeric(value) => Ok(*value),
        Expression::Character(value) => Ok(*value),
        Expression::ConstantRef(name) => resolve_name(name, constants, types, visiting, line),
        Expression::Unary(op @ (UnaryOp::SizeOf | UnaryOp::AlignOf), inner) => {
            let name = match inner.as_ref() {
                Expression::ConstantRef(name) => name.clone(),
                _ => {
                    return Err(AssembleError::Syntax {
                        line,
                        message: "sizeof/alignof expects a bare name".to_string(),
                    })
                }
            };
            size_query(*op, &name, types, line)
        }
        Expression::Unary(UnaryOp::Plus, inner) => resolve_expr(inner, constants, types, visiting, line),
        Expression::Unary(UnaryOp::Minus, inner) => {
            resolve_expr(inner, constants, types, visiting, line)?
                .checked_neg()
                .ok_or_else(|| AssembleError::Syntax {
                    line,
                    message: "negation overflowed".to_string(),
                })
        }
        Expression::Binary(lhs, op, rhs) => {
            let lhs = resolve_expr(lhs, constants, types, visiting, line)?;
            let rhs = resolve_expr(rhs, constants, types, visiting, line)?;
            binary_eval(*op, lhs, rhs, line)
        }
    }
}

fn binary_eval(op: BinaryOp, lhs: i128, rhs: i128, line: usize) -> Result<i128, AssembleError> {
    let overflow = || AssembleError::Syntax {
        line,
        message: "arithmetic overflowed while resolving a constant expression".to_string(),
    };
    match op {
        BinaryOp::Add => lhs.checked_add(rhs).ok_or_else(overflow),
        BinaryOp::Sub => lhs.checked_sub(rhs).ok_or_else(overflow),
        BinaryOp::Mul => lhs.checked_mul(rhs).ok_or_else(overflow),
        BinaryOp::Div => {
            if rhs == 0 {
                Err(AssembleError::Syntax {
                    line,
                    message: "division by zero".to_string(),
                })
            } else {
                // Floor division (round toward negative infinity), not Rust's
                // truncating `/` or `div_euclid`'s non-negative-remainder
                // convention: `7 / -2` must be `-4`, not `-3`.
                lhs.checked_div(rhs)
                    .and_then(|quotient| {
                        let remainder = lhs % rhs;
                        if remainder != 0 && (remainder < 0) != (rhs < 0) {
                            quotient.checked_sub(1)
                        } else {
                            Some(quotient)
                        }
                    })
                    .ok_or_else(overflow)
            }
        }
        BinaryOp::Shl => {
            let shift = u32::try_from(rhs).map_err(|_| overflow())?;
            lhs.unsigned_abs()
                .checked_shl(shift)
                .and_then(|v| i128::try_from(v).ok())
                .ok_or_else(overflow)
        }
        BinaryOp::Shr => {
            let shift = u32::try_from(rhs).map_err(|_| overflow())?;
            let magnitude = lhs.unsigned_abs();
            Ok(magnitude.checked_shr(shift).unwrap_or(0) as i128)
        }
    }
}

fn emit_expr(
    memory: &mut Memory,
    datatype: crate::types::DataType,
    expr: &Expression,
    endianness: Endianness,
    constants: &mut HashMap<String, Constant>,
    types: &TypeRegistry,
    line: usize,
    relative_to: Option<i128>,
) -> Result<(), AssembleError> {
    let mut visiting = HashSet::new();
    let mut value = resolve_expr(expr, constants, types, &mut visiting, line)?;
    if let Some(ip_after) = relative_to {
        value -= ip_after;
    }
    memory
        .append_typed(datatype, value, endianness)
        .map_err(|fault| AssembleError::Encoding {
            line,
            source: match fault {
                crate::error::Fault::Encoding(e) => e,
                other => unreachable!("unexpected fault during emission: {other}"),
            },
        })
}

/// Assembles `source` into a byte-packed program image.
///
/// `types` must already be finalized (see [`TypeRegistry::new`]); the
/// same registry must be used to build the CPU's memories so operand
/// widths agree between assembly and execution.
pub fn assemble(source: &str, types: &TypeRegistry) -> Result<Memory, AssembleError> {
    let statements = parse_program(source)?;
    let mut constants = layout(&statements, types)?;
    let mut memory = Memory::extendable(types.char_bit());

    for (statement, line) in &statements {
        match statement {
            Statement::Label(_) | Statement::ConstantDefinition { .. } => {}
            Statement::Data { datatype, values } => {
                let dt = types.get(*datatype).ok_or_else(|| AssembleError::Syntax {
                    line: *line,
                    message: format!("unknown data type: {datatype}"),
                })?;
                for value in values {
                    emit_expr(&mut memory, dt, value, Endianness::Big, &mut constants, types, *line, None)?;
                }
            }
            Statement::Instruction { mnemonic, args } => {
                let (size, op) = instruction_size(types, mnemonic, *line)?;
                let op_address = memory.len();
                memory
                    .append_typed(types.get('r').unwrap(), op.opcode as i128, Endianness::Little)
                    .map_err(|_| AssembleError::Syntax {
                        line: *line,
                        message: "internal: opcode emission failed".to_string(),
                    })?;
                let curr_ip = op_address + size;
                let arg_types: Vec<char> = op.arg_def.chars().collect();
                if args.len() != arg_types.len() {
                    return Err(AssembleError::Syntax {
                        line: *line,
                        message: format!("{mnemonic} expects {} argument(s), got {}", arg_types.len(), args.len()),
                    });
                }
                for (arg, type_char) in args.iter().zip(arg_types.iter()) {
                    let dt = types.get(*type_char).ok_or_else(|| AssembleError::Syntax {
                        line: *line,
                        message: format!("unknown argument type: {type_char}"),
                    })?;
                    match arg {
                        Argument::Register(reg) => {
                            emit_expr(
                                &mut memory,
                                dt,
                                &Expression::Numeric(register_ordinal(*reg)),
                                op.args_endianness(),
                                &mut constants,
                                types,
                                *line,
                                None,
                            )?;
                        }
                        Argument::Expr(expr) => {
                            let relative_to = if *type_char == 'a' && mnemonic.ends_with(".rel") {
                                Some(curr_ip as i128)
                            } else {
                                None
                            };
                            emit_expr(&mut memory, dt, expr, op.args_endianness(), &mut constants, types, *line, relative_to)?;
                        }
                    }
                }
            }
        }
    }

    Ok(memory)
}

fn register_ordinal(reg: Register) -> i128 {
    reg.ordinal() as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> TypeRegistry {
        TypeRegistry::new(2, 2, 2, 2, 8)
    }

    #[test]
    fn assembles_halt_to_single_opcode_byte() {
        let memory = assemble("halt", &types()).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get(0).unwrap(), isa::by_mnemonic("halt").unwrap().opcode as u64);
    }

    #[test]
    fn forward_label_reference_resolves() {
        let source = "jmp target\ntarget:\nhalt";
        let memory = assemble(source, &types()).unwrap();
        // jmp (1 byte opcode + 2 byte addr) then halt at offset 3.
        assert_eq!(memory.len(), 1 + 2 + 1);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let source = "foo:\nfoo:\nhalt";
        let err = assemble(source, &types()).unwrap_err();
        assert!(matches!(err, AssembleError::DuplicateSymbol { .. }));
    }

    #[test]
    fn circular_constant_is_rejected() {
        let source = "A = B\nB = A\nhalt";
        let err = assemble(source, &types()).unwrap_err();
        assert!(matches!(err, AssembleError::CircularConstant { .. }));
    }

    #[test]
    fn undefined_symbol_is_rejected() {
        let source = "jmp nowhere";
        let err = assemble(source, &types()).unwrap_err();
        assert!(matches!(err, AssembleError::UndefinedSymbol { .. }));
    }

    #[test]
    fn db_directive_emits_bytes() {
        let memory = assemble(r#"db "Hi""#, &types()).unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.get(0).unwrap(), 'H' as u64);
        assert_eq!(memory.get(1).unwrap(), 'i' as u64);
    }

    #[test]
    fn constant_definition_is_usable_before_and_after_declaration() {
        let source = "movw.i2r A, VALUE\nVALUE = 2 + 3\nhalt";
        let memory = assemble(source, &types()).unwrap();
        assert!(memory.len() > 0);
    }

    #[test]
    fn division_floors_toward_negative_infinity_with_a_negative_divisor() {
        // 7 / -2 floors to -4, not Rust's truncating -3.
        let source = "DIVISOR = -2\ndb 7 / DIVISOR";
        let memory = assemble(source, &types()).unwrap();
        assert_eq!(memory.len(), 1);
        // sign-magnitude, char_bit = 8: magnitude 4 with the sign bit set.
        assert_eq!(memory.get(0).unwrap(), 0b1000_0100);
    }
}
