//! Thin CLI wrapper: reads a source file, assembles it, and runs it.
//!
//! Grounded on `original_source/evil/__main__.py`'s `argparse` setup; the
//! flag table matches it 1:1, using `clap`'s derive API in place of
//! `argparse`. Raw-mode terminal input, the rendered GPU surface, and file
//! I/O beyond "read the path the user gave us" are out of scope per the
//! specification — this binary only wires the library's `assemble` and
//! `Cpu::execute` together around those collaborators' interfaces.

use std::fs;
use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use evil_vm::{
    assembler, AccessPolicy, Cpu, Gpu, MemoryBlock, MemoryMapping, Memory, Outcome, VmConfig,
};

/// Assembler and bytecode interpreter for the Evil VM synthetic ISA.
#[derive(Debug, Parser)]
#[command(name = "evilvm", about = "Assemble and run an Evil VM program")]
struct Cli {
    /// Path to the assembly source file.
    source: std::path::PathBuf,

    /// Program memory size, in bytes. Defaults to the exact assembled length.
    #[arg(short = 'p', long = "program-size")]
    program_size: Option<usize>,

    /// RAM size, in machine words.
    #[arg(short = 'r', long = "ram-size", default_value_t = 8)]
    ram_size: usize,

    /// Return-address stack size, in address units.
    #[arg(short = 's', long = "stack-size", default_value_t = 8)]
    stack_size: usize,

    /// Memory-block aliases, e.g. `ram=program`. May be given more than once.
    #[arg(short = 'm', long = "map-memory", value_parser = parse_mapping)]
    map_memory: Vec<MemoryMapping>,

    /// Bits per memory cell.
    #[arg(short = 'b', long = "char-bit", default_value_t = 9)]
    char_bit: u32,

    /// Size, in bytes, of the `w` data type.
    #[arg(short = 'w', long = "word-size", default_value_t = 7)]
    word_size: usize,

    /// Alignment, in bytes, of the `w` data type. Defaults to `word-size`.
    #[arg(short = 'W', long = "word-alignment")]
    word_alignment: Option<usize>,

    /// Size, in bytes, of the `a` data type.
    #[arg(short = 'a', long = "addr-size", default_value_t = 5)]
    addr_size: usize,

    /// Alignment, in bytes, of the `a` data type. Defaults to `addr-size`.
    #[arg(short = 'A', long = "addr-alignment")]
    addr_alignment: Option<usize>,

    /// Stop after this many instructions even if the program hasn't halted.
    #[arg(short = 'H', long = "halt-after-instructions")]
    halt_after_instructions: Option<u64>,
}

fn parse_mapping(raw: &str) -> Result<MemoryMapping, String> {
    let (dst, src) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected dst=src, got '{raw}'"))?;
    let dst = MemoryBlock::parse(dst).ok_or_else(|| format!("unknown memory block: {dst}"))?;
    let src = MemoryBlock::parse(src).ok_or_else(|| format!("unknown memory block: {src}"))?;
    Ok(MemoryMapping { dst, src })
}

impl Cli {
    fn into_config(self) -> VmConfig {
        let word_alignment = self.word_alignment.unwrap_or(self.word_size);
        let addr_alignment = self.addr_alignment.unwrap_or(self.addr_size);
        VmConfig {
            program_size: self.program_size,
            ram_size_words: self.ram_size,
            stack_size_addrs: self.stack_size,
            map_memory: self.map_memory,
            char_bit: self.char_bit,
            word_size: self.word_size,
            word_alignment,
            addr_size: self.addr_size,
            addr_alignment,
            halt_after_instructions: self.halt_after_instructions,
        }
    }
}

/// Resolves the `-m` aliasing requests by cloning the already-sized source
/// block's cells into the destination, matching the source's shared-buffer
/// intent closely enough for the scalar, non-concurrent memories this crate
/// uses (a true aliased backing store would need interior mutability shared
/// across three independently-typed `Memory` values, which the concurrency
/// model in the specification rules out).
fn apply_mappings(
    program: &mut Memory,
    ram: &mut Memory,
    stack: &mut Memory,
    mappings: &[MemoryMapping],
) {
    for mapping in mappings {
        let src = block(program, ram, stack, mapping.src).clone();
        *block(program, ram, stack, mapping.dst) = src;
    }
}

fn block<'a>(program: &'a mut Memory, ram: &'a mut Memory, stack: &'a mut Memory, which: MemoryBlock) -> &'a mut Memory {
    match which {
        MemoryBlock::Program => program,
        MemoryBlock::Ram => ram,
        MemoryBlock::Stack => stack,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("LOGLEVEL").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let source_path = cli.source.clone();
    let config = cli.into_config();

    let source = match fs::read_to_string(&source_path) {
        Ok(source) => source,
        Err(err) => {
            tracing::error!("failed to read {}: {err}", source_path.display());
            return ExitCode::FAILURE;
        }
    };

    let types = config.type_registry();

    let mut program = match assembler::assemble(&source, &types) {
        Ok(program) => program,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("assembly listing:\n{}", program.dump(types.get('a').map(|t| t.alignment).unwrap_or(1)));
    }

    let program_size = config.program_size.map(|n| n.max(program.len())).unwrap_or(program.len());
    let mut sized = Memory::zeroed(types.char_bit(), program_size, AccessPolicy::Plain);
    for (addr, cell) in program.cells().iter().enumerate() {
        sized.set(addr, *cell).expect("sized memory is at least as large as the assembled image");
    }
    program = sized;

    let ram_bytes = config.ram_size_words * types.get('w').expect("w is always registered").size_bytes;
    let stack_bytes = config.stack_size_addrs * types.get('a').expect("a is always registered").size_bytes;

    let mut ram = Memory::zeroed(types.char_bit(), ram_bytes, AccessPolicy::StrictlyAligned);
    let mut stack = Memory::zeroed(types.char_bit(), stack_bytes, AccessPolicy::StrictlyAligned);

    apply_mappings(&mut program, &mut ram, &mut stack, &config.map_memory);

    let gpu = Gpu::new(evil_vm::gpu::DEFAULT_WIDTH, evil_vm::gpu::DEFAULT_HEIGHT, io::stdout());
    let mut cpu = Cpu::new(&types, program, ram, stack, gpu);

    match cpu.execute(config.halt_after_instructions) {
        Outcome::Halted => ExitCode::SUCCESS,
        Outcome::BudgetExhausted => {
            tracing::info!("instruction budget exhausted before halt");
            ExitCode::SUCCESS
        }
    }
}
