use log::warn;
use std::collections::BTreeMap;

use crate::error::{Result, TraceError};
use crate::range::{MemoryAccess, MemoryRange, ValueRange};
use crate::register::{Register, RegisterContext, RegisterSet, NUM_REGS};

/// Everything observed for one static instruction address.
#[derive(Debug, Clone)]
pub struct InstructionRecord {
    pub count: u64,
    pub disassembly: String,
    pub registers: [ValueRange; NUM_REGS],
    pub memory: MemoryRange,
    /// Most recent instruction seen to execute right after this one, 0 if none.
    pub last_successor: u64,
}

impl InstructionRecord {
    pub fn new(disassembly: &str) -> Self {
        Self {
            count: 0,
            disassembly: disassembly.to_string(),
            registers: [ValueRange::new(); NUM_REGS],
            memory: MemoryRange::new(),
            last_successor: 0,
        }
    }

    pub fn register(&self, reg: Register) -> &ValueRange {
        &self.registers[reg.index()]
    }
}

/// Instruction records keyed and ordered by address.
#[derive(Debug, Default)]
pub struct InstructionStore {
    records: BTreeMap<u64, InstructionRecord>,
}

impl InstructionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record for `address` on first sight. The disassembly of an
    /// existing record is never replaced.
    pub fn ensure(&mut self, address: u64, disassembly: &str) -> &mut InstructionRecord {
        let record = self
            .records
            .entry(address)
            .or_insert_with(|| InstructionRecord::new(disassembly));
        if record.disassembly != disassembly {
            warn!(
                "Disassembly mismatch at 0x{:x}: recorded {:?}, got {:?}",
                address, record.disassembly, disassembly
            );
        }
        record
    }

    pub fn record_visit(&mut self, address: u64) {
        if let Some(record) = self.records.get_mut(&address) {
            record.count += 1;
        }
    }

    pub fn record_registers(
        &mut self,
        address: u64,
        touched: RegisterSet,
        ctx: &dyn RegisterContext,
    ) {
        if let Some(record) = self.records.get_mut(&address) {
            for reg in touched.iter() {
                record.registers[reg.index()].observe(ctx.read(reg));
            }
        }
    }

    /// Folds a memory write into the record at `address`. Returns `Ok(false)`
    /// when there is no record to attach it to.
    pub fn record_memory(&mut self, address: u64, access: MemoryAccess) -> Result<bool> {
        let record = match self.records.get_mut(&address) {
            Some(record) => record,
            None => return Ok(false),
        };
        if let Some(size) = record.memory.size() {
            if size != access.size {
                return Err(TraceError::MemorySizeMismatch {
                    address,
                    recorded: size,
                    observed: access.size,
                });
            }
        }
        record.memory.observe(access);
        Ok(true)
    }

    pub fn link_successor(&mut self, address: u64, successor: u64) {
        if let Some(record) = self.records.get_mut(&address) {
            record.last_successor = successor;
        }
    }

    pub fn get(&self, address: u64) -> Option<&InstructionRecord> {
        self.records.get(&address)
    }

    pub fn contains(&self, address: u64) -> bool {
        self.records.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &InstructionRecord)> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterSnapshot;

    #[test]
    fn ensure_keeps_first_disassembly() {
        let mut store = InstructionStore::new();
        store.ensure(0x10, "nop");
        store.ensure(0x10, "int3");
        assert_eq!(store.get(0x10).unwrap().disassembly, "nop");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn untouched_registers_stay_absent() {
        let mut store = InstructionStore::new();
        store.ensure(0x10, "mov rax, 1");
        let ctx = RegisterSnapshot::default().with(Register::Rax, 1);
        let touched: RegisterSet = [Register::Rax].into_iter().collect();
        store.record_registers(0x10, touched, &ctx);

        let record = store.get(0x10).unwrap();
        assert_eq!(record.register(Register::Rax).last(), Some(1));
        assert!(!record.register(Register::Rbx).is_present());
    }

    #[test]
    fn memory_without_record_is_dropped() {
        let mut store = InstructionStore::new();
        let kept = store
            .record_memory(0x10, MemoryAccess::new(0x1000, 8, 1))
            .unwrap();
        assert!(!kept);
        assert!(store.is_empty());
    }
}
