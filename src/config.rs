//! Startup configuration.
//!
//! Grounded on `original_source/evil/__main__.py`'s argument parser: every
//! field here corresponds to one CLI flag (see [`crate::cli`]), collected
//! into a single struct so the data-type registry and the three memory
//! spaces can be built from one source of truth instead of scattered
//! globals.

/// Which of the three memory spaces a `-m name=source` flag aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBlock {
    /// The assembled program image.
    Program,
    /// Data RAM.
    Ram,
    /// The call (return-address) stack.
    Stack,
}

impl MemoryBlock {
    /// Parses one of the three legal block names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "program" => Some(Self::Program),
            "ram" => Some(Self::Ram),
            "stack" => Some(Self::Stack),
            _ => None,
        }
    }
}

/// One `dst=src` memory aliasing request, e.g. `ram=program`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMapping {
    /// The block that will be replaced with a shared copy of `src`.
    pub dst: MemoryBlock,
    /// The block `dst` is aliased to.
    pub src: MemoryBlock,
}

/// All startup configuration needed to assemble and run a program.
///
/// Defaults mirror the source's argument parser exactly (`ram_size = 8`
/// words, `stack_size = 8` addresses, `char_bit = 9`, `word_size = 7`,
/// `addr_size = 5`), not the standalone `vm.py` revision's differing
/// defaults.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Program memory size in bytes; `None` means "exactly the assembled
    /// bytecode length".
    pub program_size: Option<usize>,
    /// RAM size, in machine words.
    pub ram_size_words: usize,
    /// Return-address stack size, in address units.
    pub stack_size_addrs: usize,
    /// Requested memory-block aliases, applied after sizing.
    pub map_memory: Vec<MemoryMapping>,
    /// Bits per byte.
    pub char_bit: u32,
    /// Size, in bytes, of the `w` data type.
    pub word_size: usize,
    /// Alignment, in bytes, of the `w` data type.
    pub word_alignment: usize,
    /// Size, in bytes, of the `a` data type.
    pub addr_size: usize,
    /// Alignment, in bytes, of the `a` data type.
    pub addr_alignment: usize,
    /// Instruction-count budget; `None` means unbounded.
    pub halt_after_instructions: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            program_size: None,
            ram_size_words: 8,
            stack_size_addrs: 8,
            map_memory: Vec::new(),
            char_bit: 9,
            word_size: 7,
            word_alignment: 7,
            addr_size: 5,
            addr_alignment: 5,
            halt_after_instructions: None,
        }
    }
}

impl VmConfig {
    /// Builds the [`crate::types::TypeRegistry`] implied by this
    /// configuration.
    pub fn type_registry(&self) -> crate::types::TypeRegistry {
        crate::types::TypeRegistry::new(self.word_size, self.word_alignment, self.addr_size, self.addr_alignment, self.char_bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cli_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.ram_size_words, 8);
        assert_eq!(config.stack_size_addrs, 8);
        assert_eq!(config.char_bit, 9);
        assert_eq!(config.word_size, 7);
        assert_eq!(config.addr_size, 5);
    }

    #[test]
    fn memory_block_parses_known_names_only() {
        assert_eq!(MemoryBlock::parse("ram"), Some(MemoryBlock::Ram));
        assert_eq!(MemoryBlock::parse("bogus"), None);
    }
}
