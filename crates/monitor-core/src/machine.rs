//! Read-only view of guest state consumed by the evaluator.

use crate::EvalError;

/// Native machine word of the guest.
pub type Word = u32;

/// Byte width of a [`Word`] memory access.
pub const WORD_BYTES: usize = 4;

/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 32;

/// Guest physical address where RAM starts.
pub const GUEST_MEMORY_BASE: Word = 0x8000_0000;

/// Default guest RAM size (128 MiB).
pub const DEFAULT_GUEST_MEMORY_BYTES: usize = 0x0800_0000;

/// ABI names of the general-purpose registers, indexed by register number.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Query capabilities the evaluator needs from the emulator.
///
/// All methods are pure reads. The evaluator calls [`Self::read_memory`]
/// only after [`Self::in_range`] accepted the same address and width.
pub trait MachineView {
    /// Looks up a register by name (without the `$` sigil).
    fn read_register(&self, name: &str) -> Option<Word>;

    /// Reads `width` bytes at `address` as a little-endian word.
    fn read_memory(&self, address: Word, width: usize) -> Word;

    /// Returns `true` when `[address, address + width)` is readable.
    fn in_range(&self, address: Word, width: usize) -> bool;
}

/// Resolves a register name to its index.
///
/// Accepts ABI names, `xN` numeric names, `0`/`zero` for the hard-wired zero
/// register and `fp` as an alias of `s0`.
#[must_use]
pub fn register_index(name: &str) -> Option<usize> {
    match name {
        "0" | "$0" | "zero" => return Some(0),
        "fp" => return Some(8),
        _ => {}
    }
    if let Some(index) = REGISTER_NAMES.iter().position(|candidate| *candidate == name) {
        return Some(index);
    }
    name.strip_prefix('x')
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|index| *index < REGISTER_COUNT)
}

/// Reference guest: register file, program counter and a flat RAM window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestMachine {
    gpr: [Word; REGISTER_COUNT],
    pc: Word,
    base: Word,
    memory: Box<[u8]>,
}

impl Default for GuestMachine {
    fn default() -> Self {
        Self::new(DEFAULT_GUEST_MEMORY_BYTES)
    }
}

impl GuestMachine {
    /// Creates a zeroed machine with `memory_bytes` of RAM at
    /// [`GUEST_MEMORY_BASE`].
    #[must_use]
    pub fn new(memory_bytes: usize) -> Self {
        Self::with_base(GUEST_MEMORY_BASE, memory_bytes)
    }

    /// Creates a zeroed machine with RAM mapped at `base`.
    #[must_use]
    pub fn with_base(base: Word, memory_bytes: usize) -> Self {
        Self {
            gpr: [0; REGISTER_COUNT],
            pc: base,
            base,
            memory: vec![0; memory_bytes].into_boxed_slice(),
        }
    }

    /// First guest address of RAM.
    #[must_use]
    pub const fn memory_base(&self) -> Word {
        self.base
    }

    /// RAM size in bytes.
    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Reads a general-purpose register by index.
    #[must_use]
    pub fn gpr(&self, index: usize) -> Option<Word> {
        self.gpr.get(index).copied()
    }

    /// Writes a general-purpose register. Writes to register 0 are ignored.
    pub fn set_gpr(&mut self, index: usize, value: Word) {
        if index == 0 {
            return;
        }
        if let Some(slot) = self.gpr.get_mut(index) {
            *slot = value;
        }
    }

    /// Writes a register by name.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::UnknownRegister`] when `name` is neither `pc`
    /// nor a general-purpose register name.
    pub fn set_register(&mut self, name: &str, value: Word) -> Result<(), EvalError> {
        if name == "pc" {
            self.pc = value;
            return Ok(());
        }
        let index = register_index(name).ok_or_else(|| EvalError::UnknownRegister {
            name: name.to_owned(),
        })?;
        self.set_gpr(index, value);
        Ok(())
    }

    /// Reads the program counter.
    #[must_use]
    pub const fn pc(&self) -> Word {
        self.pc
    }

    /// Writes the program counter.
    pub const fn set_pc(&mut self, value: Word) {
        self.pc = value;
    }

    /// Stores `width` bytes of `value` little-endian at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::AddressOutOfRange`] when the access leaves RAM.
    pub fn store(&mut self, address: Word, width: usize, value: Word) -> Result<(), EvalError> {
        let bytes = value.to_le_bytes();
        self.load_bytes(address, &bytes[..width.min(WORD_BYTES)])
    }

    /// Copies `bytes` into RAM starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::AddressOutOfRange`] when the copy leaves RAM.
    pub fn load_bytes(&mut self, address: Word, bytes: &[u8]) -> Result<(), EvalError> {
        let offset = self
            .offset(address, bytes.len())
            .ok_or(EvalError::AddressOutOfRange { address })?;
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn offset(&self, address: Word, width: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = offset.checked_add(width)?;
        (end <= self.memory.len()).then_some(offset)
    }
}

impl MachineView for GuestMachine {
    fn read_register(&self, name: &str) -> Option<Word> {
        if name == "pc" {
            return Some(self.pc);
        }
        register_index(name).and_then(|index| self.gpr(index))
    }

    fn read_memory(&self, address: Word, width: usize) -> Word {
        let width = width.min(WORD_BYTES);
        self.offset(address, width).map_or(0, |offset| {
            self.memory[offset..offset + width]
                .iter()
                .rev()
                .fold(0, |acc, byte| (acc << 8) | Word::from(*byte))
        })
    }

    fn in_range(&self, address: Word, width: usize) -> bool {
        self.offset(address, width).is_some()
    }
}
