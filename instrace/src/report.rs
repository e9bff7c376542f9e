//! The report written at the end of a trace.
//!
//! Field names and nesting are kept compatible with existing trace consumers:
//! register maps are keyed by register index and every address is a plain
//! JSON integer.

use serde_derive::{Deserialize, Serialize};
use serde_json::{from_reader, from_str, to_string, to_string_pretty, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use crate::edge::{EdgeStore, EdgeType};
use crate::error::{Result, TraceError};
use crate::instruction::{InstructionRecord, InstructionStore};
use crate::range::{MemoryRange, ValueRange};
use crate::register::Register;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterValue {
    pub name: Register,
    pub value: u64,
}

/// Register values keyed by `Register::index`. Registers that were never
/// observed are absent.
pub type Registers = BTreeMap<usize, RegisterValue>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryEntry {
    pub last_address: u64,
    pub min_address: u64,
    pub max_address: u64,
    pub last_value: u64,
    pub min_value: u64,
    pub max_value: u64,
    /// Access size in bytes.
    #[serde(default)]
    pub size: u32,
}

impl MemoryEntry {
    fn from_range(mem: &MemoryRange) -> Option<Self> {
        let size = mem.size()?;
        Some(Self {
            last_address: mem.last_addr.address,
            min_address: mem.min_addr.address,
            max_address: mem.max_addr.address,
            last_value: mem.last_value.value,
            min_value: mem.min_value.value,
            max_value: mem.max_value.value,
            size,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InstructionEntry {
    pub address: u64,
    pub mnemonic: String,
    pub registers_min: Registers,
    pub registers_max: Registers,
    pub registers_last: Registers,
    pub last_successor: u64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryEntry>,
}

impl InstructionEntry {
    fn from_record(address: u64, record: &InstructionRecord) -> Result<Self> {
        if record.disassembly.is_empty() {
            return Err(TraceError::EmptyDisassembly { address });
        }
        Ok(Self {
            address,
            mnemonic: record.disassembly.clone(),
            registers_min: registers(&record.registers, ValueRange::min),
            registers_max: registers(&record.registers, ValueRange::max),
            registers_last: registers(&record.registers, ValueRange::last),
            last_successor: record.last_successor,
            count: record.count,
            memory: MemoryEntry::from_range(&record.memory),
        })
    }
}

fn registers(ranges: &[ValueRange], select: fn(&ValueRange) -> Option<u64>) -> Registers {
    Register::ALL
        .iter()
        .zip(ranges)
        .filter_map(|(reg, range)| {
            select(range).map(|value| {
                (
                    reg.index(),
                    RegisterValue {
                        name: *reg,
                        value,
                    },
                )
            })
        })
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEntry {
    pub from: u64,
    pub to: u64,
    pub count: u64,
    pub edge_type: EdgeType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub image_base: u64,
    pub first_address: u64,
    pub last_address: u64,
    pub instructions: Vec<InstructionEntry>,
    pub edges: Vec<EdgeEntry>,
}

impl Report {
    /// Snapshot of the stores, in ascending address and edge key order.
    pub fn build(
        image_base: u64,
        first_address: u64,
        last_address: u64,
        instructions: &InstructionStore,
        edges: &EdgeStore,
    ) -> Result<Self> {
        let instructions = instructions
            .iter()
            .map(|(address, record)| InstructionEntry::from_record(*address, record))
            .collect::<Result<Vec<_>>>()?;
        let edges = edges
            .iter()
            .map(|(&(from, to), edge)| EdgeEntry {
                from,
                to,
                count: edge.count,
                edge_type: edge.edge_type,
            })
            .collect();
        Ok(Self {
            image_base,
            first_address,
            last_address,
            instructions,
            edges,
        })
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        if pretty {
            Ok(to_string_pretty(self)?)
        } else {
            Ok(to_string(self)?)
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(from_reader(reader)?)
    }

    pub fn instruction(&self, address: u64) -> Option<&InstructionEntry> {
        self.instructions
            .binary_search_by_key(&address, |i| i.address)
            .ok()
            .map(|i| &self.instructions[i])
    }

    pub fn edge(&self, from: u64, to: u64) -> Option<&EdgeEntry> {
        self.edges
            .binary_search_by_key(&(from, to), |e| (e.from, e.to))
            .ok()
            .map(|i| &self.edges[i])
    }

    /// Sanity checks over a finished report. Each finding is a human readable
    /// description; an empty list means the report is consistent.
    pub fn check_integrity(&self) -> Vec<String> {
        let mut findings = Vec::new();
        let addresses: BTreeSet<u64> = self.instructions.iter().map(|i| i.address).collect();

        if self.instructions.is_empty() {
            findings.push("report contains no instructions".to_string());
        } else {
            if !addresses.contains(&self.first_address) {
                findings.push(format!(
                    "first address 0x{:x} was never executed",
                    self.first_address
                ));
            }
            if !addresses.contains(&self.last_address) {
                findings.push(format!(
                    "last address 0x{:x} was never executed",
                    self.last_address
                ));
            }
        }

        for ins in &self.instructions {
            if ins.mnemonic.is_empty() {
                findings.push(format!("instruction 0x{:x} has an empty mnemonic", ins.address));
            }
            if ins.count == 0 {
                findings.push(format!("instruction 0x{:x} was never counted", ins.address));
            }
            for (index, min) in &ins.registers_min {
                let max = ins.registers_max.get(index);
                let last = ins.registers_last.get(index);
                match (max, last) {
                    (Some(max), Some(last)) => {
                        if !(min.value <= last.value && last.value <= max.value) {
                            findings.push(format!(
                                "register {} at 0x{:x} violates min <= last <= max ({} / {} / {})",
                                min.name, ins.address, min.value, last.value, max.value
                            ));
                        }
                    }
                    _ => findings.push(format!(
                        "register {} at 0x{:x} is missing its max or last value",
                        min.name, ins.address
                    )),
                }
            }
            if let Some(mem) = &ins.memory {
                if mem.min_address > mem.max_address || mem.min_value > mem.max_value {
                    findings.push(format!(
                        "memory aggregate at 0x{:x} has min above max",
                        ins.address
                    ));
                }
            }
        }

        let mut outgoing: BTreeMap<u64, u64> = BTreeMap::new();
        for edge in &self.edges {
            for end in [edge.from, edge.to] {
                if !addresses.contains(&end) {
                    findings.push(format!(
                        "edge 0x{:x} -> 0x{:x} references unknown instruction 0x{:x}",
                        edge.from, edge.to, end
                    ));
                }
            }
            *outgoing.entry(edge.from).or_insert(0) += edge.count;
        }
        for (from, total) in outgoing {
            if let Some(ins) = self.instruction(from) {
                if total > ins.count {
                    findings.push(format!(
                        "edges leave 0x{:x} {} times but it executed {} times",
                        from, total, ins.count
                    ));
                }
            }
        }

        findings
    }
}

/// Re-indents any JSON document with its object keys sorted.
pub fn pretty_print(text: &str) -> Result<String> {
    let value: Value = from_str(text)?;
    Ok(to_string_pretty(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_memory_is_omitted() {
        let entry = InstructionEntry {
            address: 1,
            mnemonic: "nop".to_string(),
            registers_min: Registers::new(),
            registers_max: Registers::new(),
            registers_last: Registers::new(),
            last_successor: 0,
            count: 1,
            memory: None,
        };
        let json = to_string(&entry).unwrap();
        assert!(!json.contains("memory"));
    }

    #[test]
    fn register_keys_are_indices() {
        let mut regs = Registers::new();
        regs.insert(
            Register::Eflags.index(),
            RegisterValue {
                name: Register::Eflags,
                value: 0x246,
            },
        );
        let json = to_string(&regs).unwrap();
        assert_eq!(json, r#"{"22":{"name":"eflags","value":582}}"#);
    }

    #[test]
    fn pretty_print_sorts_keys() {
        let out = pretty_print(r#"{"b":1,"a":2}"#).unwrap();
        assert!(out.find("\"a\"").unwrap() < out.find("\"b\"").unwrap());
    }
}
