//! Execution coverage against the source map.

use asm_arm2::Program;
use serde::Serialize;
use std::collections::HashSet;

/// Addresses executed at least once.
#[derive(Debug, Default)]
pub struct Coverage {
    executed: HashSet<u32>,
}

/// Per-line coverage record for reports.
#[derive(Debug, Serialize)]
pub struct LineCoverage {
    pub file: String,
    pub line: u32,
    pub address: u32,
    pub text: String,
    pub executed: bool,
}

impl Coverage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.executed.clear();
    }

    pub fn record(&mut self, pc: u32) {
        self.executed.insert(pc);
    }

    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }

    /// Line records for every instruction in the program.
    #[must_use]
    pub fn lines(&self, program: &Program) -> Vec<LineCoverage> {
        program
            .source_map
            .entries()
            .iter()
            .filter(|e| e.is_instruction)
            .map(|e| LineCoverage {
                file: e.file.clone(),
                line: e.line,
                address: e.address,
                text: e.text.clone(),
                executed: self.executed.contains(&e.address),
            })
            .collect()
    }

    /// Render the report as text or JSON.
    #[must_use]
    pub fn report(&self, program: &Program, json: bool) -> String {
        let lines = self.lines(program);
        let executed = lines.iter().filter(|l| l.executed).count();
        if json {
            let value = serde_json::json!({
                "instructions": lines.len(),
                "executed": executed,
                "percent": if lines.is_empty() {
                    100.0
                } else {
                    100.0 * executed as f64 / lines.len() as f64
                },
                "lines": lines,
            });
            serde_json::to_string_pretty(&value).unwrap_or_default()
        } else {
            let mut out = format!(
                "coverage: {executed}/{} instructions ({:.1}%)\n",
                lines.len(),
                if lines.is_empty() {
                    100.0
                } else {
                    100.0 * executed as f64 / lines.len() as f64
                }
            );
            for l in &lines {
                let mark = if l.executed { ' ' } else { '!' };
                out.push_str(&format!(
                    "{mark} {:08X}  {}:{:<5} {}\n",
                    l.address, l.file, l.line, l.text
                ));
            }
            out
        }
    }
}
