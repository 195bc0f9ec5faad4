//! The data-type registry.
//!
//! Replaces the source's mutable module-global `DataType._TYPES` with an
//! explicit, immutable context object (per the design note on mutable
//! module-global state): a [`TypeRegistry`] is built once from a
//! [`crate::config::VmConfig`] and threaded by reference through the
//! assembler and the CPU. `b` and `r` are always size 1, alignment 1; `a`
//! and `w` are configuration-driven.

use std::collections::HashMap;

/// A named memory cell layout: how many cells it occupies, and what
/// alignment it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType {
    /// Single-character registry key (`b`, `r`, `a`, `w`, ...).
    pub name: char,
    /// Number of memory cells occupied.
    pub size_bytes: usize,
    /// Required alignment, in cells. May exceed `size_bytes`.
    pub alignment: usize,
}

/// The process-wide, read-only mapping from type character to [`DataType`].
///
/// Must be finalized before the first `assemble` or `execute` call, per
/// the concurrency model: it is read-only for the remainder of the
/// process.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<char, DataType>,
    char_bit: u32,
}

impl TypeRegistry {
    /// Builds the registry with the four built-in types. `b` and `r` are
    /// fixed at size 1, alignment 1; `word_size`/`word_alignment` and
    /// `addr_size`/`addr_alignment` configure `w` and `a` respectively.
    /// `char_bit` is the number of bits held by a single memory cell,
    /// shared by every [`crate::memory::Memory`] built alongside this
    /// registry.
    pub fn new(word_size: usize, word_alignment: usize, addr_size: usize, addr_alignment: usize, char_bit: u32) -> Self {
        let mut types = HashMap::new();
        types.insert(
            'b',
            DataType {
                name: 'b',
                size_bytes: 1,
                alignment: 1,
            },
        );
        types.insert(
            'r',
            DataType {
                name: 'r',
                size_bytes: 1,
                alignment: 1,
            },
        );
        types.insert(
            'a',
            DataType {
                name: 'a',
                size_bytes: addr_size,
                alignment: addr_alignment,
            },
        );
        types.insert(
            'w',
            DataType {
                name: 'w',
                size_bytes: word_size,
                alignment: word_alignment,
            },
        );
        Self { types, char_bit }
    }

    /// The number of bits held by a single memory cell.
    pub fn char_bit(&self) -> u32 {
        self.char_bit
    }

    /// Looks up a single type by its registry character.
    pub fn get(&self, name: char) -> Option<DataType> {
        self.types.get(&name).copied()
    }

    /// Sums the size, in cells, occupied by a sequence of type characters
    /// (an `arg_def` or data-directive format string).
    pub fn calcsize(&self, fmt: &str) -> Option<usize> {
        fmt.chars().map(|c| self.get(c).map(|t| t.size_bytes)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_and_register_are_fixed() {
        let registry = TypeRegistry::new(7, 7, 5, 5, 9);
        assert_eq!(registry.get('b').unwrap().size_bytes, 1);
        assert_eq!(registry.get('r').unwrap().alignment, 1);
    }

    #[test]
    fn word_and_addr_are_configurable() {
        let registry = TypeRegistry::new(4, 8, 3, 6, 9);
        let w = registry.get('w').unwrap();
        assert_eq!(w.size_bytes, 4);
        assert_eq!(w.alignment, 8);
        let a = registry.get('a').unwrap();
        assert_eq!(a.size_bytes, 3);
        assert_eq!(a.alignment, 6);
    }

    #[test]
    fn calcsize_sums_format_string() {
        let registry = TypeRegistry::new(7, 7, 5, 5, 9);
        assert_eq!(registry.calcsize("rr"), Some(2));
        assert_eq!(registry.calcsize("ra"), Some(6));
        assert_eq!(registry.calcsize("x"), None);
    }
}
