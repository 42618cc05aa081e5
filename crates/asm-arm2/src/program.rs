//! Assembled program image.
//!
//! A program is a set of byte chunks at absolute addresses (text, data,
//! literal pools), the resolved symbol table, and a source map for
//! debuggers and diagnostics.

use crate::symbols::SymbolTable;

/// A contiguous run of assembled bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub address: u32,
    pub bytes: Vec<u8>,
}

impl Chunk {
    /// One past the last address.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.address + self.bytes.len() as u32
    }
}

/// One source map record.
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    pub address: u32,
    /// Bytes this entry covers.
    pub size: u32,
    pub file: String,
    pub line: u32,
    /// The source line text.
    pub text: String,
    /// True for instructions, false for data directives and pools.
    pub is_instruction: bool,
}

/// Address-ordered map from program addresses to source lines.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    pub fn push(&mut self, entry: SourceMapEntry) {
        self.entries.push(entry);
    }

    /// Sort by address; call once after assembly.
    pub fn finish(&mut self) {
        self.entries.sort_by_key(|e| e.address);
    }

    /// The entry covering `addr`, if any.
    #[must_use]
    pub fn lookup(&self, addr: u32) -> Option<&SourceMapEntry> {
        let idx = self.entries.partition_point(|e| e.address <= addr);
        let entry = self.entries[..idx].last()?;
        if addr < entry.address + entry.size.max(1) {
            Some(entry)
        } else {
            None
        }
    }

    /// True if `addr` holds an instruction (vs data or pool bytes).
    #[must_use]
    pub fn is_instruction(&self, addr: u32) -> bool {
        self.lookup(addr).is_some_and(|e| e.is_instruction)
    }

    /// All entries in address order.
    #[must_use]
    pub fn entries(&self) -> &[SourceMapEntry] {
        &self.entries
    }

    /// Attach source line text looked up by `(file, line)`.
    #[must_use]
    pub fn with_text(mut self, lines: &std::collections::HashMap<(String, u32), String>) -> Self {
        for entry in &mut self.entries {
            if entry.text.is_empty() {
                if let Some(text) = lines.get(&(entry.file.clone(), entry.line)) {
                    entry.text = text.trim().to_string();
                }
            }
        }
        self
    }
}

/// A fully assembled program.
#[derive(Debug, Clone)]
pub struct Program {
    /// First address of the program (default text base or first `.org`).
    pub origin: u32,
    /// Initial PC: `_start`, `main`, or the origin.
    pub entry_point: u32,
    /// Byte chunks in ascending address order.
    pub chunks: Vec<Chunk>,
    pub symbols: SymbolTable,
    pub source_map: SourceMap,
}

impl Program {
    /// Total assembled bytes across all chunks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.chunks.iter().map(|c| c.bytes.len()).sum()
    }

    /// Read a little-endian word from the image, if assembled.
    #[must_use]
    pub fn word_at(&self, addr: u32) -> Option<u32> {
        for chunk in &self.chunks {
            if addr >= chunk.address && addr + 4 <= chunk.end() {
                let i = (addr - chunk.address) as usize;
                return Some(u32::from_le_bytes([
                    chunk.bytes[i],
                    chunk.bytes[i + 1],
                    chunk.bytes[i + 2],
                    chunk.bytes[i + 3],
                ]));
            }
        }
        None
    }
}
