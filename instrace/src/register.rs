use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as DisplayResult};

pub const NUM_REGS: usize = 23;

/// Registers whose values are tracked per instruction: the 16 general purpose
/// registers, the 6 segment registers and the flags register.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    SegCs,
    SegSs,
    SegDs,
    SegEs,
    SegFs,
    SegGs,
    Eflags,
}

impl Register {
    pub const ALL: [Register; NUM_REGS] = [
        Register::Rax,
        Register::Rbx,
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::Rbp,
        Register::Rsp,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
        Register::SegCs,
        Register::SegSs,
        Register::SegDs,
        Register::SegEs,
        Register::SegFs,
        Register::SegGs,
        Register::Eflags,
    ];

    /// Slot of this register in per-instruction arrays and in the report.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Register> {
        Register::ALL.get(index).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rbx => "rbx",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
            Register::Rbp => "rbp",
            Register::Rsp => "rsp",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
            Register::SegCs => "seg_cs",
            Register::SegSs => "seg_ss",
            Register::SegDs => "seg_ds",
            Register::SegEs => "seg_es",
            Register::SegFs => "seg_fs",
            Register::SegGs => "seg_gs",
            Register::Eflags => "eflags",
        }
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut Formatter) -> DisplayResult {
        f.write_str(self.name())
    }
}

/// Fixed-size set of registers, stored as a bitmask so that building and
/// passing it around never allocates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "Vec<Register>", into = "Vec<Register>")]
pub struct RegisterSet(u32);

impl RegisterSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, reg: Register) {
        self.0 |= 1 << reg.index();
    }

    pub fn contains(&self, reg: Register) -> bool {
        self.0 & (1 << reg.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Register> + '_ {
        Register::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl FromIterator<Register> for RegisterSet {
    fn from_iter<I: IntoIterator<Item = Register>>(iter: I) -> Self {
        let mut set = RegisterSet::empty();
        for reg in iter {
            set.insert(reg);
        }
        set
    }
}

impl From<Vec<Register>> for RegisterSet {
    fn from(regs: Vec<Register>) -> Self {
        regs.into_iter().collect()
    }
}

impl From<RegisterSet> for Vec<Register> {
    fn from(set: RegisterSet) -> Self {
        set.iter().collect()
    }
}

/// Read-only view of the register file at the point an instruction executes.
pub trait RegisterContext {
    fn read(&self, reg: Register) -> u64;
}

/// Register values captured by value, indexed by `Register::index`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSnapshot(pub [u64; NUM_REGS]);

impl RegisterSnapshot {
    pub fn with(mut self, reg: Register, value: u64) -> Self {
        self.0[reg.index()] = value;
        self
    }
}

impl RegisterContext for RegisterSnapshot {
    fn read(&self, reg: Register) -> u64 {
        self.0[reg.index()]
    }
}

/// Shadow copy of the tracked registers, shared by every thread of the traced
/// process. Starts zeroed.
#[derive(Debug, Clone, Default)]
pub struct RegisterState {
    values: [u64; NUM_REGS],
}

impl RegisterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `ctx` against the shadow copy and returns every register that
    /// changed or is in `written`. The shadow copy is updated for each of them.
    pub fn diff_and_update(
        &mut self,
        ctx: &dyn RegisterContext,
        written: RegisterSet,
    ) -> RegisterSet {
        let mut touched = RegisterSet::empty();
        for reg in Register::ALL {
            let value = ctx.read(reg);
            if value != self.values[reg.index()] || written.contains(reg) {
                self.values[reg.index()] = value;
                touched.insert(reg);
            }
        }
        touched
    }

    pub fn get(&self, reg: Register) -> u64 {
        self.values[reg.index()]
    }
}
