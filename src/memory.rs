//! The byte-packed memory abstraction.
//!
//! A [`Memory`] is a linear array of cells, each holding a value in
//! `[0, 2^char_bit)`, combined with an [`AccessPolicy`]. The source models
//! `Memory` / `StrictlyAlignedMemory` / `ExtendableMemory` as a class
//! hierarchy; per the design note against open-ended subclass dispatch,
//! this crate models the policy as a sum type matched exhaustively on
//! every typed access instead.

use crate::endian::{self, Endianness};
use crate::error::{Fault, MemoryFault};
use crate::types::DataType;

/// How a [`Memory`] behaves on out-of-range or unaligned access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Fixed length; out-of-range access faults, no alignment check.
    Plain,
    /// Like `Plain`, but typed access additionally requires the address to
    /// be a multiple of the accessed type's alignment.
    StrictlyAligned,
    /// Writes beyond the current length zero-pad to fit; reads never grow
    /// the backing storage. Used only while assembling.
    Extendable,
}

/// A linear sequence of `char_bit`-wide cells.
#[derive(Debug, Clone)]
pub struct Memory {
    char_bit: u32,
    cells: Vec<u64>,
    policy: AccessPolicy,
}

impl Memory {
    /// Builds a zero-filled memory of `size` cells.
    pub fn zeroed(char_bit: u32, size: usize, policy: AccessPolicy) -> Self {
        Self {
            char_bit,
            cells: vec![0; size],
            policy,
        }
    }

    /// Builds a memory from existing cell contents. Every cell must already
    /// be within `[0, 2^char_bit)`.
    pub fn from_cells(char_bit: u32, cells: Vec<u64>, policy: AccessPolicy) -> Self {
        debug_assert!(cells.iter().all(|&c| c < 1u64.checked_shl(char_bit).unwrap_or(0) || char_bit >= 64));
        Self {
            char_bit,
            cells,
            policy,
        }
    }

    /// An empty, growable memory, used by the assembler's emission pass.
    pub fn extendable(char_bit: u32) -> Self {
        Self {
            char_bit,
            cells: Vec::new(),
            policy: AccessPolicy::Extendable,
        }
    }

    /// The configured bits-per-byte.
    pub fn char_bit(&self) -> u32 {
        self.char_bit
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if this memory has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Returns a read-only view of the raw cells.
    pub fn cells(&self) -> &[u64] {
        &self.cells
    }

    /// Reads a single raw cell.
    pub fn get(&self, addr: usize) -> Result<u64, MemoryFault> {
        self.cells.get(addr).copied().ok_or(MemoryFault::OutOfRange {
            address: addr,
            len: self.cells.len(),
        })
    }

    /// Writes a single raw cell. Under `Extendable`, grows to fit first.
    ///
    /// Requires `0 <= value < 2^char_bit`, per the cell-value validation
    /// invariant; the codec already guarantees this for `set_typed`, but a
    /// raw `set` has no such guarantee from its caller.
    pub fn set(&mut self, addr: usize, value: u64) -> Result<(), MemoryFault> {
        let bound = 1u64.checked_shl(self.char_bit).unwrap_or(0);
        if bound != 0 && value >= bound {
            return Err(MemoryFault::CellValueOutOfRange {
                value,
                char_bit: self.char_bit,
            });
        }
        if matches!(self.policy, AccessPolicy::Extendable) {
            self.resize_if_required(addr + 1);
        }
        let cell = self.cells.get_mut(addr).ok_or(MemoryFault::OutOfRange {
            address: addr,
            len: self.cells.len(),
        })?;
        *cell = value;
        Ok(())
    }

    fn resize_if_required(&mut self, desired_len: usize) {
        if self.cells.len() < desired_len {
            self.cells.resize(desired_len, 0);
        }
    }

    fn check_bounds(&self, addr: usize, size_bytes: usize) -> Result<(), MemoryFault> {
        if addr + size_bytes > self.cells.len() {
            return Err(MemoryFault::OutOfRange {
                address: addr,
                len: self.cells.len(),
            });
        }
        Ok(())
    }

    fn check_alignment(&self, addr: usize, datatype: DataType) -> Result<(), MemoryFault> {
        if matches!(self.policy, AccessPolicy::StrictlyAligned) && addr % datatype.alignment != 0 {
            return Err(MemoryFault::Unaligned {
                address: addr,
                alignment: datatype.alignment,
            });
        }
        Ok(())
    }

    /// Decodes a single typed value starting at `addr`.
    pub fn get_typed(&self, datatype: DataType, addr: usize, endianness: Endianness) -> Result<i128, Fault> {
        self.check_alignment(addr, datatype)?;
        self.check_bounds(addr, datatype.size_bytes)?;
        let slice = &self.cells[addr..addr + datatype.size_bytes];
        Ok(endian::decode(endianness, slice, self.char_bit)?)
    }

    /// Encodes a single typed value at `addr`, growing an `Extendable`
    /// memory first if necessary.
    pub fn set_typed(&mut self, datatype: DataType, addr: usize, value: i128, endianness: Endianness) -> Result<(), Fault> {
        self.check_alignment(addr, datatype)?;
        if matches!(self.policy, AccessPolicy::Extendable) {
            self.resize_if_required(addr + datatype.size_bytes);
        }
        self.check_bounds(addr, datatype.size_bytes)?;
        let encoded = endian::encode(endianness, value, self.char_bit, datatype.size_bytes)?;
        self.cells[addr..addr + datatype.size_bytes].copy_from_slice(&encoded);
        Ok(())
    }

    /// Decodes consecutive typed values, one per character of `fmt`,
    /// starting at `addr`.
    pub fn get_multi(&self, fmt: &[DataType], addr: usize, endianness: Endianness) -> Result<Vec<i128>, Fault> {
        let mut offset = addr;
        let mut out = Vec::with_capacity(fmt.len());
        for datatype in fmt {
            out.push(self.get_typed(*datatype, offset, endianness)?);
            offset += datatype.size_bytes;
        }
        Ok(out)
    }

    /// Appends a typed value to the end of an `Extendable` memory.
    pub fn append_typed(&mut self, datatype: DataType, value: i128, endianness: Endianness) -> Result<(), Fault> {
        let addr = self.cells.len();
        self.set_typed(datatype, addr, value, endianness)
    }

    /// Renders the memory contents as a hexdump-like diagnostic string,
    /// grouping cells in `alignment`-sized words.
    pub fn dump(&self, alignment: usize) -> String {
        let alignment = alignment.max(1);
        let digit_width = format!("{:x}", (1u128 << self.char_bit) - 1).len();
        let mut out = String::new();
        for (line_idx, line) in self.cells.chunks(alignment * 8).enumerate() {
            out.push_str(&format!("{:08x}  ", line_idx * alignment * 8));
            for word in line.chunks(alignment) {
                for cell in word {
                    out.push_str(&format!("{cell:0width$x} ", width = digit_width));
                }
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg_type() -> DataType {
        DataType {
            name: 'w',
            size_bytes: 2,
            alignment: 2,
        }
    }

    #[test]
    fn plain_out_of_range_faults() {
        let memory = Memory::zeroed(8, 4, AccessPolicy::Plain);
        assert_eq!(
            memory.get(4),
            Err(MemoryFault::OutOfRange { address: 4, len: 4 })
        );
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut memory = Memory::zeroed(8, 4, AccessPolicy::Plain);
        memory.set(1, 200).unwrap();
        assert_eq!(memory.get(1).unwrap(), 200);
    }

    #[test]
    fn set_rejects_value_outside_char_bit_range() {
        let mut memory = Memory::zeroed(8, 4, AccessPolicy::Plain);
        assert_eq!(
            memory.set(1, 256),
            Err(MemoryFault::CellValueOutOfRange {
                value: 256,
                char_bit: 8
            })
        );
    }

    #[test]
    fn strictly_aligned_rejects_misaligned_typed_access() {
        let memory = Memory::zeroed(8, 8, AccessPolicy::StrictlyAligned);
        let err = memory.get_typed(reg_type(), 1, Endianness::Big).unwrap_err();
        assert_eq!(
            err,
            Fault::Memory(MemoryFault::Unaligned {
                address: 1,
                alignment: 2
            })
        );
    }

    #[test]
    fn strictly_aligned_accepts_aligned_typed_access() {
        let mut memory = Memory::zeroed(8, 8, AccessPolicy::StrictlyAligned);
        memory.set_typed(reg_type(), 2, 300, Endianness::Big).unwrap();
        assert_eq!(memory.get_typed(reg_type(), 2, Endianness::Big).unwrap(), 300);
    }

    #[test]
    fn extendable_grows_on_write_never_on_read() {
        let mut memory = Memory::extendable(8);
        memory.append_typed(reg_type(), 42, Endianness::Big).unwrap();
        assert_eq!(memory.len(), 2);
        assert!(memory.get(10).is_err());
    }
}
