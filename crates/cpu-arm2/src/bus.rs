//! Memory bus trait for the ARM2.
//!
//! The ARM2 has a 32-bit data bus with byte, halfword, and word access.
//! Every access can fault: the address may fall outside any mapped segment,
//! the segment may deny the access kind, or a word/halfword access may be
//! misaligned. Faults are reported to the CPU as values, not panics, so the
//! machine layer can turn them into runtime errors with full context.

use std::fmt;

/// The kind of memory access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Data read.
    Read,
    /// Data write.
    Write,
    /// Instruction fetch.
    Execute,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// A failed memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFault {
    /// The address is outside every mapped segment.
    Unmapped { addr: u32, kind: AccessKind },
    /// Word or halfword access at a non-natural boundary.
    Unaligned { addr: u32, size: u8 },
    /// The segment exists but denies this access kind.
    Permission { addr: u32, kind: AccessKind },
}

impl MemFault {
    /// The faulting address.
    #[must_use]
    pub fn addr(&self) -> u32 {
        match self {
            Self::Unmapped { addr, .. }
            | Self::Unaligned { addr, .. }
            | Self::Permission { addr, .. } => *addr,
        }
    }
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmapped { addr, kind } => {
                write!(f, "{kind} of unmapped address {addr:#010X}")
            }
            Self::Unaligned { addr, size } => {
                write!(f, "unaligned {size}-byte access at {addr:#010X}")
            }
            Self::Permission { addr, kind } => {
                write!(f, "{kind} denied at {addr:#010X}")
            }
        }
    }
}

impl std::error::Error for MemFault {}

/// Bus trait for ARM2-family CPUs.
///
/// Word and halfword accesses must be naturally aligned; implementations
/// return `MemFault::Unaligned` otherwise. Byte accesses are always
/// alignment-legal. `fetch` is a word read that additionally requires
/// execute permission.
pub trait Bus {
    /// Read a byte.
    fn read_byte(&mut self, addr: u32) -> Result<u8, MemFault>;

    /// Read a halfword (must be 2-byte aligned).
    fn read_half(&mut self, addr: u32) -> Result<u16, MemFault>;

    /// Read a word (must be 4-byte aligned).
    fn read_word(&mut self, addr: u32) -> Result<u32, MemFault>;

    /// Write a byte.
    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), MemFault>;

    /// Write a halfword (must be 2-byte aligned).
    fn write_half(&mut self, addr: u32, value: u16) -> Result<(), MemFault>;

    /// Write a word (must be 4-byte aligned).
    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemFault>;

    /// Fetch an instruction word. Requires execute permission.
    ///
    /// The default implementation reads like `read_word`; buses that track
    /// permissions override this to enforce execute rights.
    fn fetch(&mut self, addr: u32) -> Result<u32, MemFault> {
        self.read_word(addr)
    }
}

/// A flat 64 KiB RAM bus with no permission checks, for CPU tests.
///
/// Addresses wrap within the buffer. Alignment is still enforced so tests
/// exercise the same fault paths as the real machine memory.
pub struct FlatBus {
    pub mem: Vec<u8>,
}

impl FlatBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mem: vec![0; 0x1_0000],
        }
    }

    /// Copy `data` into the bus at `addr`.
    pub fn load(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize % self.mem.len();
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    /// Copy little-endian words into the bus at `addr`.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            self.load(addr + 4 * i as u32, &w.to_le_bytes());
        }
    }

    fn index(&self, addr: u32) -> usize {
        addr as usize % self.mem.len()
    }
}

impl Default for FlatBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatBus {
    fn read_byte(&mut self, addr: u32) -> Result<u8, MemFault> {
        Ok(self.mem[self.index(addr)])
    }

    fn read_half(&mut self, addr: u32) -> Result<u16, MemFault> {
        if addr % 2 != 0 {
            return Err(MemFault::Unaligned { addr, size: 2 });
        }
        let i = self.index(addr);
        Ok(u16::from_le_bytes([self.mem[i], self.mem[i + 1]]))
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, MemFault> {
        if addr % 4 != 0 {
            return Err(MemFault::Unaligned { addr, size: 4 });
        }
        let i = self.index(addr);
        Ok(u32::from_le_bytes([
            self.mem[i],
            self.mem[i + 1],
            self.mem[i + 2],
            self.mem[i + 3],
        ]))
    }

    fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), MemFault> {
        let i = self.index(addr);
        self.mem[i] = value;
        Ok(())
    }

    fn write_half(&mut self, addr: u32, value: u16) -> Result<(), MemFault> {
        if addr % 2 != 0 {
            return Err(MemFault::Unaligned { addr, size: 2 });
        }
        let i = self.index(addr);
        self.mem[i..i + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_word(&mut self, addr: u32, value: u32) -> Result<(), MemFault> {
        if addr % 4 != 0 {
            return Err(MemFault::Unaligned { addr, size: 4 });
        }
        let i = self.index(addr);
        self.mem[i..i + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
