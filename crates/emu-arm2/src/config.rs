//! Emulator configuration.
//!
//! An optional TOML file adjusts the memory layout and preprocessor
//! defines. Everything has defaults; a missing file is not an error.

use crate::memory::{
    Memory, Perms, Segment, CODE_SIZE, CODE_START, DATA_SIZE, DATA_START, STACK_SIZE, STACK_TOP,
};
use serde::Deserialize;
use std::path::Path;

/// File the CLI looks for next to the current directory.
pub const CONFIG_FILE: &str = "emu-arm2.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmuConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Names pre-defined for `.ifdef`.
    #[serde(default)]
    pub defines: Vec<String>,
}

/// Memory layout overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_code_start")]
    pub code_start: u32,
    #[serde(default = "default_code_size")]
    pub code_size: u32,
    #[serde(default = "default_data_start")]
    pub data_start: u32,
    #[serde(default = "default_data_size")]
    pub data_size: u32,
    #[serde(default = "default_stack_top")]
    pub stack_top: u32,
    #[serde(default = "default_stack_size")]
    pub stack_size: u32,
}

fn default_code_start() -> u32 {
    CODE_START
}
fn default_code_size() -> u32 {
    CODE_SIZE
}
fn default_data_start() -> u32 {
    DATA_START
}
fn default_data_size() -> u32 {
    DATA_SIZE
}
fn default_stack_top() -> u32 {
    STACK_TOP
}
fn default_stack_size() -> u32 {
    STACK_SIZE
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            code_start: CODE_START,
            code_size: CODE_SIZE,
            data_start: DATA_START,
            data_size: DATA_SIZE,
            stack_top: STACK_TOP,
            stack_size: STACK_SIZE,
        }
    }
}

impl EmuConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {e}", path.display()))
    }

    /// Load `emu-arm2.toml` from the working directory if present.
    #[must_use]
    pub fn discover() -> Self {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            match Self::from_file(path) {
                Ok(config) => return config,
                Err(e) => eprintln!("warning: {e}"),
            }
        }
        Self::default()
    }

    /// Build the configured memory layout.
    #[must_use]
    pub fn build_memory(&self) -> Memory {
        let m = &self.memory;
        Memory::with_segments(vec![
            Segment::new("code", m.code_start, m.code_size, Perms::rx()),
            Segment::new("data", m.data_start, m.data_size, Perms::rw()),
            Segment::new(
                "stack",
                m.stack_top - m.stack_size,
                m.stack_size,
                Perms::rw(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_constants() {
        let config = EmuConfig::default();
        let memory = config.build_memory();
        let names: Vec<&str> = memory.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["code", "data", "stack"]);
    }

    #[test]
    fn parses_overrides() {
        let config: EmuConfig = toml::from_str(
            "defines = [\"DEBUG\"]\n\n[memory]\ncode_start = 0x4000\ncode_size = 0x8000\n",
        )
        .expect("parses");
        assert_eq!(config.memory.code_start, 0x4000);
        assert_eq!(config.memory.data_start, DATA_START);
        assert_eq!(config.defines, vec!["DEBUG"]);
    }
}
