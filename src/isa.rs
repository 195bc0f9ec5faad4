//! The operation table: one entry per opcode, in declaration order.
//!
//! Grounded on `original_source/evil/cpu.py`'s `Operations` class and its
//! `Operation` decorator: opcode values are assigned by declaration order
//! (`Operation._opcode_counter`), `arg_def` names the sequence of data
//! types an instruction's encoded arguments occupy, and `args_endianness`
//! is Little for odd opcodes, Big for even ones. The decorator's dynamic
//! `mnemonic = wrapped.__name__.replace('_', '.')` dispatch becomes a
//! static table built once at startup.

use std::sync::OnceLock;

use crate::endian::Endianness;
use crate::types::TypeRegistry;

/// One entry in the operation table.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    /// Assigned by declaration order below.
    pub opcode: u8,
    /// Source-level name, e.g. `"movw.r2r"`.
    pub mnemonic: &'static str,
    /// Sequence of registry type characters this operation's encoded
    /// arguments occupy, in order. Empty for argument-less operations.
    pub arg_def: &'static str,
}

impl OpInfo {
    /// Endianness used to decode/encode this operation's arguments:
    /// Little for odd opcodes, Big for even ones.
    pub fn args_endianness(&self) -> Endianness {
        if self.opcode % 2 == 1 {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// Size, in cells, of the opcode byte alone.
    pub const fn opcode_size_bytes(&self) -> usize {
        1
    }

    /// Size, in cells, of this operation's encoded arguments, given the
    /// registry that defines `w`/`a`.
    pub fn args_size(&self, types: &TypeRegistry) -> Option<usize> {
        types.calcsize(self.arg_def)
    }

    /// Total encoded size (opcode plus arguments), in cells.
    pub fn size_bytes(&self, types: &TypeRegistry) -> Option<usize> {
        Some(self.opcode_size_bytes() + self.args_size(types)?)
    }
}

/// The raw declaration table: mnemonic paired with its `arg_def`, in the
/// exact order opcodes are assigned. Opcode values are derived from
/// position by [`operations`], mirroring the source's per-class
/// `Operation._opcode_counter`.
///
/// The `ldw.r` / `lpw.r` typo in the source (the handler reads from an
/// undefined `reg` instead of `dst_reg`) is not a table-level concern —
/// it only affects [`crate::cpu::Cpu`]'s execution of those two
/// opcodes, whose encoding here is unaffected. `sub.w`'s `arg_def` is
/// declared as `rw`, correcting the source's apparent copy-paste `rb`
/// (the mnemonic, doc comment, and every sibling `add.w`/`mul.w` agree
/// on a word-sized immediate).
const DECLARATIONS: &[(&str, &str)] = &[
    ("movw.r2r", "rr"),
    ("movb.i2r", "rb"),
    ("movb.m2r", "ra"),
    ("movb.r2m", "ar"),
    ("movw.i2r", "rw"),
    ("movw.m2r", "ra"),
    ("movw.r2m", "ar"),
    ("lpb.r", "rr"),
    ("lpa.r", "rr"),
    ("lpw.r", "rr"),
    ("ldb.r", "rr"),
    ("lda.r", "rr"),
    ("ldw.r", "rr"),
    ("stb.r", "rr"),
    ("sta.r", "rr"),
    ("stw.r", "rr"),
    ("jmp", "a"),
    ("out", ""),
    ("seek", "rr"),
    ("call", "a"),
    ("call.r", "r"),
    ("ret", ""),
    ("push", "r"),
    ("pop", "r"),
    ("add.b", "rb"),
    ("add.w", "rw"),
    ("add.r", "rr"),
    ("sub.b", "rb"),
    ("sub.w", "rw"),
    ("sub.r", "rr"),
    ("mul.b", "rb"),
    ("mul.w", "rw"),
    ("mul.r", "rr"),
    ("and.b", "rb"),
    ("and.w", "rw"),
    ("and.r", "rr"),
    ("or.b", "rb"),
    ("or.w", "rw"),
    ("or.r", "rr"),
    ("shr.b", "rb"),
    ("shl.b", "rb"),
    ("cmp.b", "rw"),
    ("cmp.w", "rw"),
    ("cmp.r", "rr"),
    ("je", "a"),
    ("jne", "a"),
    ("ja", "a"),
    ("jae", "a"),
    ("jb", "a"),
    ("jbe", "a"),
    ("loop", "a"),
    ("halt", ""),
    ("dbg", ""),
    ("dbg.reg", "r"),
    ("dbg.regs", ""),
    ("dbg.ram", "aa"),
];

/// The full operation table, in opcode order. Built once from
/// [`DECLARATIONS`] on first use.
pub fn operations() -> &'static [OpInfo] {
    static TABLE: OnceLock<Vec<OpInfo>> = OnceLock::new();
    TABLE.get_or_init(|| {
        DECLARATIONS
            .iter()
            .enumerate()
            .map(|(opcode, &(mnemonic, arg_def))| OpInfo {
                opcode: opcode as u8,
                mnemonic,
                arg_def,
            })
            .collect()
    })
}

/// Looks up an operation by its encoded opcode byte.
pub fn by_opcode(opcode: u8) -> Option<&'static OpInfo> {
    operations().get(opcode as usize)
}

/// Looks up an operation by its source-level mnemonic.
pub fn by_mnemonic(mnemonic: &str) -> Option<&'static OpInfo> {
    operations().iter().find(|op| op.mnemonic == mnemonic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_assigned_by_declaration_order() {
        assert_eq!(by_mnemonic("movw.r2r").unwrap().opcode, 0);
        assert_eq!(by_mnemonic("movb.i2r").unwrap().opcode, 1);
        assert_eq!(by_mnemonic("halt").unwrap().opcode, operations().len() as u8 - 5);
    }

    #[test]
    fn args_endianness_follows_opcode_parity() {
        let even = by_mnemonic("movw.r2r").unwrap();
        let odd = by_mnemonic("movb.i2r").unwrap();
        assert_eq!(even.args_endianness(), Endianness::Big);
        assert_eq!(odd.args_endianness(), Endianness::Little);
    }

    #[test]
    fn every_opcode_byte_round_trips() {
        for (idx, op) in operations().iter().enumerate() {
            assert_eq!(op.opcode as usize, idx);
            assert_eq!(by_opcode(op.opcode).unwrap().mnemonic, op.mnemonic);
        }
    }

    #[test]
    fn size_bytes_accounts_for_registry_config() {
        let types = TypeRegistry::new(2, 2, 3, 3, 8);
        let movw = by_mnemonic("movw.i2r").unwrap();
        assert_eq!(movw.size_bytes(&types), Some(1 + 1 + 2));
        let jmp = by_mnemonic("jmp").unwrap();
        assert_eq!(jmp.size_bytes(&types), Some(1 + 3));
    }
}
