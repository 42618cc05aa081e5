//! Performance counters: instruction mix, cycles, memory traffic.

use crate::machine::MachineStep;
use crate::memory::Access;
use cpu_arm2::{decode, AccessKind, Instruction};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Counter snapshot, serializable for the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub instructions: u64,
    pub cycles: u64,
    pub memory_reads: u64,
    pub memory_writes: u64,
    pub swi_calls: u64,
    pub elapsed_ms: u64,
    /// Executed counts keyed by base mnemonic.
    pub by_mnemonic: Vec<(String, u64)>,
}

/// Live counters updated per step.
#[derive(Debug)]
pub struct Stats {
    instructions: u64,
    cycles: u64,
    memory_reads: u64,
    memory_writes: u64,
    swi_calls: u64,
    by_mnemonic: HashMap<&'static str, u64>,
    started: Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instructions: 0,
            cycles: 0,
            memory_reads: 0,
            memory_writes: 0,
            swi_calls: 0,
            by_mnemonic: HashMap::new(),
            started: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn record(&mut self, step: &MachineStep, accesses: &[Access]) {
        self.instructions += 1;
        self.cycles += u64::from(step.cycles);
        for a in accesses {
            match a.kind {
                AccessKind::Read => self.memory_reads += 1,
                AccessKind::Write => self.memory_writes += 1,
                AccessKind::Execute => {}
            }
        }
        let name = mnemonic_of(step.word);
        if name == "SWI" {
            self.swi_calls += 1;
        }
        *self.by_mnemonic.entry(name).or_insert(0) += 1;
    }

    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Snapshot for reporting, mnemonics sorted by descending count.
    #[must_use]
    pub fn report(&self) -> StatsReport {
        let mut by_mnemonic: Vec<(String, u64)> = self
            .by_mnemonic
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect();
        by_mnemonic.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        StatsReport {
            instructions: self.instructions,
            cycles: self.cycles,
            memory_reads: self.memory_reads,
            memory_writes: self.memory_writes,
            swi_calls: self.swi_calls,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            by_mnemonic,
        }
    }
}

impl StatsReport {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("metric,value\n");
        out.push_str(&format!("instructions,{}\n", self.instructions));
        out.push_str(&format!("cycles,{}\n", self.cycles));
        out.push_str(&format!("memory_reads,{}\n", self.memory_reads));
        out.push_str(&format!("memory_writes,{}\n", self.memory_writes));
        out.push_str(&format!("swi_calls,{}\n", self.swi_calls));
        out.push_str(&format!("elapsed_ms,{}\n", self.elapsed_ms));
        for (name, count) in &self.by_mnemonic {
            out.push_str(&format!("mnemonic.{name},{count}\n"));
        }
        out
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        let mut rows = String::new();
        for (name, count) in &self.by_mnemonic {
            rows.push_str(&format!("<tr><td>{name}</td><td>{count}</td></tr>\n"));
        }
        format!(
            "<!DOCTYPE html>\n<html><head><title>Execution statistics</title></head><body>\n\
             <h1>Execution statistics</h1>\n\
             <p>{} instructions, {} cycles, {} ms</p>\n\
             <p>{} memory reads, {} memory writes, {} SWI calls</p>\n\
             <table border=\"1\"><tr><th>Mnemonic</th><th>Count</th></tr>\n{rows}</table>\n\
             </body></html>\n",
            self.instructions,
            self.cycles,
            self.elapsed_ms,
            self.memory_reads,
            self.memory_writes,
            self.swi_calls,
        )
    }
}

/// Base mnemonic of an instruction word, for the instruction-mix table.
#[must_use]
pub fn mnemonic_of(word: u32) -> &'static str {
    match decode(word).op {
        Instruction::DataProcessing { op, .. } => op.mnemonic(),
        Instruction::Multiply {
            accumulate: false, ..
        } => "MUL",
        Instruction::Multiply {
            accumulate: true, ..
        } => "MLA",
        Instruction::MultiplyLong {
            signed, accumulate, ..
        } => match (signed, accumulate) {
            (false, false) => "UMULL",
            (false, true) => "UMLAL",
            (true, false) => "SMULL",
            (true, true) => "SMLAL",
        },
        Instruction::SingleTransfer { load, byte, .. } => match (load, byte) {
            (true, false) => "LDR",
            (true, true) => "LDRB",
            (false, false) => "STR",
            (false, true) => "STRB",
        },
        Instruction::HalfTransfer {
            load, signed, half, ..
        } => match (load, signed, half) {
            (true, false, _) => "LDRH",
            (true, true, false) => "LDRSB",
            (true, true, true) => "LDRSH",
            (false, _, _) => "STRH",
        },
        Instruction::BlockTransfer { load, .. } => {
            if load {
                "LDM"
            } else {
                "STM"
            }
        }
        Instruction::Branch { link, .. } => {
            if link {
                "BL"
            } else {
                "B"
            }
        }
        Instruction::BranchExchange { .. } => "BX",
        Instruction::Mrs { .. } => "MRS",
        Instruction::Msr { .. } => "MSR",
        Instruction::Swi { .. } => "SWI",
        Instruction::Coprocessor { .. } | Instruction::Undefined { .. } => "???",
    }
}
