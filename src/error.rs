//! Crate-wide error types.
//!
//! Following the split the teacher draws between a caller-facing abort error
//! and an in-loop recoverable fault: [`AssembleError`] always aborts the
//! assembler; [`Fault`] is caught per-instruction inside [`crate::cpu::Cpu::execute`]
//! and merely logged.

use thiserror::Error;

/// Errors that can terminate assembly of a source program.
///
/// Every variant carries the offending source line number, per the
/// propagation policy: assembly aborts with the offending line preserved
/// in the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// Tokenizer or parser could not make sense of a line.
    #[error("syntax error on line {line}: {message}")]
    Syntax {
        /// 1-indexed source line.
        line: usize,
        /// Human-readable description of what failed to parse.
        message: String,
    },
    /// A label or constant name was defined more than once.
    #[error("line {line}: duplicate symbol: {name}")]
    DuplicateSymbol {
        /// 1-indexed source line of the second definition.
        line: usize,
        /// The redefined name.
        name: String,
    },
    /// A label or constant was referenced but never defined.
    #[error("line {line}: undefined symbol: {name}")]
    UndefinedSymbol {
        /// 1-indexed source line of the reference.
        line: usize,
        /// The unresolved name.
        name: String,
    },
    /// A constant's definition depends on itself, directly or transitively.
    #[error("line {line}: circular constant definition: {name}")]
    CircularConstant {
        /// 1-indexed source line of the definition that closed the cycle.
        line: usize,
        /// The name at which the cycle was detected.
        name: String,
    },
    /// An expression could not be encoded into the configured cell width.
    #[error("line {line}: {source}")]
    Encoding {
        /// 1-indexed source line.
        line: usize,
        /// The underlying encoding failure.
        #[source]
        source: EncodingError,
    },
}

/// Raised by [`crate::token::tokenize`] when a character matches none of the
/// tokenizer's recognized classes (quote, punctuation, identifier,
/// whitespace), mirroring `original_source/evil/utils.py`'s `tokenize`
/// raising `ValueError` on the same condition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeError {
    /// A character outside every recognized token class.
    #[error("unrecognized character: {0:?}")]
    UnrecognizedCharacter(char),
}

/// Errors raised by the endianness codec in [`crate::endian`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodingError {
    /// PDP endianness was requested on an odd number of bytes.
    #[error("PDP endianness requires an even byte count, got {num_bytes}")]
    OddPdpLength {
        /// The odd byte count that was rejected.
        num_bytes: usize,
    },
    /// The magnitude of the value does not fit in the requested width.
    #[error("value {value} does not fit in {num_bytes} byte(s) of {char_bit} bits")]
    ValueTooLarge {
        /// The value that was rejected.
        value: i128,
        /// The requested byte count.
        num_bytes: usize,
        /// The configured bits-per-byte.
        char_bit: u32,
    },
    /// A decoded cell held a value exceeding `2^char_bit - 1`.
    #[error("cell value {value} exceeds the limit imposed by char_bit = {char_bit}")]
    CellOutOfRange {
        /// The offending cell value.
        value: u64,
        /// The configured bits-per-byte.
        char_bit: u32,
    },
    /// Decoding overflowed the interpreter's wide integer type.
    #[error("decoded magnitude overflows the interpreter's 128-bit integer")]
    Overflow,
}

/// Faults raised while accessing a [`crate::memory::Memory`].
///
/// Caught per-instruction inside the CPU loop, logged, and tolerated: no
/// fault is recoverable by the guest program.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFault {
    /// The address was outside the memory's bounds.
    #[error("invalid memory access at address {address:#x} (len = {len})")]
    OutOfRange {
        /// The address that was accessed.
        address: usize,
        /// The length of the memory region.
        len: usize,
    },
    /// The address was not aligned to the accessed type's alignment, under
    /// a [`crate::memory::AccessPolicy::StrictlyAligned`] memory.
    #[error("address {address:#x} is not {alignment}-byte aligned")]
    Unaligned {
        /// The address that was accessed.
        address: usize,
        /// The required alignment.
        alignment: usize,
    },
    /// A raw `set` was given a value outside `[0, 2^char_bit)`.
    #[error("cell value {value} does not fit in {char_bit} bits")]
    CellValueOutOfRange {
        /// The rejected value.
        value: u64,
        /// The configured bits-per-byte.
        char_bit: u32,
    },
}

/// Faults raised by the [`crate::gpu::Gpu`] sink.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GpuFault {
    /// `put` was called with a codepoint outside the Unicode range.
    #[error("invalid character value: {0}")]
    InvalidCharacter(i128),
    /// `seek` was called with a position outside the grid.
    #[error("({x}, {y}) is not a valid position for a {width}x{height} screen")]
    InvalidSeek {
        /// Requested x.
        x: i128,
        /// Requested y.
        y: i128,
        /// Grid width.
        width: usize,
        /// Grid height.
        height: usize,
    },
}

/// Faults tolerated by the CPU's fetch-decode-execute loop.
///
/// Every variant here is caught inside [`crate::cpu::Cpu::execute`], logged
/// with [`tracing::error!`], and execution resumes at the already-advanced
/// instruction pointer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A memory access fault (out of range or unaligned).
    #[error(transparent)]
    Memory(#[from] MemoryFault),
    /// The byte at the instruction pointer did not name a known opcode.
    #[error("invalid opcode: {opcode} ({opcode:#x}) at address {address:#x}")]
    InvalidOpcode {
        /// The unrecognized opcode byte.
        opcode: u64,
        /// The address it was read from.
        address: usize,
    },
    /// Operand decoding failed (PDP parity, cell overflow, magnitude).
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// An arithmetic operation overflowed the interpreter's wide integer.
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    /// The GPU rejected a `put`/`seek` argument.
    #[error(transparent)]
    Gpu(#[from] GpuFault),
}
