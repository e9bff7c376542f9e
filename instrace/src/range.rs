/// Minimum, maximum and most recent value observed for a scalar.
///
/// The minimum is seeded with `u64::MAX` and the maximum with zero, so the
/// first observation always sets both. Until something is observed the range
/// is absent and `get` returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    present: bool,
    min: u64,
    max: u64,
    last: u64,
}

impl ValueRange {
    pub const fn new() -> Self {
        Self {
            present: false,
            min: u64::MAX,
            max: 0,
            last: 0,
        }
    }

    pub fn observe(&mut self, value: u64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.last = value;
        self.present = true;
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn min(&self) -> Option<u64> {
        self.present.then_some(self.min)
    }

    pub fn max(&self) -> Option<u64> {
        self.present.then_some(self.max)
    }

    pub fn last(&self) -> Option<u64> {
        self.present.then_some(self.last)
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::new()
    }
}

/// A single write to memory made by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryAccess {
    pub address: u64,
    pub size: u32,
    pub value: u64,
}

impl MemoryAccess {
    pub fn new(address: u64, size: u32, value: u64) -> Self {
        Self {
            address,
            size,
            value,
        }
    }
}

/// Memory writes of one instruction, aggregated by address and by value.
///
/// Each slot keeps the whole access that won its comparison. Ties go to the
/// newer access. A zero `size` on `last_addr` means nothing was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub last_addr: MemoryAccess,
    pub min_addr: MemoryAccess,
    pub max_addr: MemoryAccess,
    pub last_value: MemoryAccess,
    pub min_value: MemoryAccess,
    pub max_value: MemoryAccess,
}

impl MemoryRange {
    pub const fn new() -> Self {
        Self {
            last_addr: MemoryAccess {
                address: 0,
                size: 0,
                value: 0,
            },
            min_addr: MemoryAccess {
                address: u64::MAX,
                size: 0,
                value: 0,
            },
            max_addr: MemoryAccess {
                address: 0,
                size: 0,
                value: 0,
            },
            last_value: MemoryAccess {
                address: 0,
                size: 0,
                value: 0,
            },
            min_value: MemoryAccess {
                address: 0,
                size: 0,
                value: u64::MAX,
            },
            max_value: MemoryAccess {
                address: 0,
                size: 0,
                value: 0,
            },
        }
    }

    pub fn is_present(&self) -> bool {
        self.last_addr.size != 0
    }

    /// Access size shared by every recorded write, if any were recorded.
    pub fn size(&self) -> Option<u32> {
        self.is_present().then_some(self.last_addr.size)
    }

    /// Folds `access` into the aggregate. The caller is responsible for the
    /// size consistency check.
    pub fn observe(&mut self, access: MemoryAccess) {
        if self.max_addr.address <= access.address {
            self.max_addr = access;
        }
        if self.min_addr.address >= access.address {
            self.min_addr = access;
        }
        self.last_addr = access;
        if self.max_value.value <= access.value {
            self.max_value = access;
        }
        if self.min_value.value >= access.value {
            self.min_value = access;
        }
        self.last_value = access;
    }
}

impl Default for MemoryRange {
    fn default() -> Self {
        Self::new()
    }
}
