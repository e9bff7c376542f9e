use log::{error, warn};

/// Largest memory write, in bytes, that is tracked. Wider accesses are vector
/// or string operations and are ignored.
pub const MAX_ACCESS_SIZE: u32 = 8;

/// Source of memory contents for the traced process.
pub trait MemoryReader {
    /// Fills `buf` with the bytes at `address`. Returns false if they cannot
    /// be read.
    fn read(&self, address: u64, buf: &mut [u8]) -> bool;
}

/// The bytes of a single write, captured by the instrumentation engine at the
/// moment the write happened.
#[derive(Debug, Clone, Copy)]
pub struct RecordedWrite<'a> {
    pub address: u64,
    pub bytes: &'a [u8],
}

impl<'a> RecordedWrite<'a> {
    pub fn new(address: u64, bytes: &'a [u8]) -> Self {
        Self { address, bytes }
    }
}

impl MemoryReader for RecordedWrite<'_> {
    fn read(&self, address: u64, buf: &mut [u8]) -> bool {
        let offset = match address
            .checked_sub(self.address)
            .and_then(|offset| usize::try_from(offset).ok())
        {
            Some(offset) => offset,
            None => return false,
        };
        let end = match offset.checked_add(buf.len()) {
            Some(end) => end,
            None => return false,
        };
        match self.bytes.get(offset..end) {
            Some(src) => {
                buf.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}

/// Reads a little-endian value of `size` bytes. Sizes other than 1, 2, 4 and
/// 8 are not decoded and read as 0, as does memory that cannot be read.
pub fn read_value(reader: &dyn MemoryReader, address: u64, size: u32, instruction: u64) -> u64 {
    let mut buf = [0u8; 8];
    let len = match size {
        1 | 2 | 4 | 8 => size as usize,
        _ => {
            error!(
                "Unhandled memory access size {} ({} bits). Value set to 0 for 0x{:x}",
                size,
                u64::from(size) * 8,
                instruction
            );
            return 0;
        }
    };
    if !reader.read(address, &mut buf[..len]) {
        warn!(
            "Could not read {} bytes at 0x{:x} for 0x{:x}. Value set to 0",
            len, address, instruction
        );
        return 0;
    }
    u64::from_le_bytes(buf)
}
