use serde_derive::{Deserialize, Serialize};
use std::io::BufRead;

use crate::edge::EdgeType;
use crate::error::{Result, TraceError};
use crate::memory::RecordedWrite;
use crate::register::{RegisterSet, RegisterSnapshot};
use crate::tracer::TraceListener;

/// One event of a recorded trace, as an instrumentation engine delivers it.
/// Event logs store one JSON object per line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    ImageLoaded {
        base: u64,
        load_offset: u64,
        entry: u64,
    },
    InstructionExecuted {
        address: u64,
        disassembly: String,
        registers: RegisterSnapshot,
        #[serde(default)]
        written: RegisterSet,
        edge_type: EdgeType,
    },
    MemoryWritten {
        instruction: u64,
        address: u64,
        size: u32,
        /// Contents of the written memory right after the write.
        bytes: Vec<u8>,
    },
    TraceEnd,
}

impl TraceEvent {
    pub fn deliver(&self, listener: &dyn TraceListener) -> Result<()> {
        match self {
            TraceEvent::ImageLoaded {
                base,
                load_offset,
                entry,
            } => listener.on_image_loaded(*base, *load_offset, *entry),
            TraceEvent::InstructionExecuted {
                address,
                disassembly,
                registers,
                written,
                edge_type,
            } => listener.on_instruction_executed(
                *address,
                disassembly,
                registers,
                *written,
                *edge_type,
            ),
            TraceEvent::MemoryWritten {
                instruction,
                address,
                size,
                bytes,
            } => listener.on_memory_written(
                *instruction,
                *address,
                *size,
                &RecordedWrite::new(*address, bytes),
            ),
            TraceEvent::TraceEnd => listener.on_trace_end(),
        }
    }
}

/// Parses an event log lazily. Blank lines are skipped; a malformed line
/// yields an error carrying its 1-based line number.
pub fn events<R: BufRead>(reader: R) -> impl Iterator<Item = Result<TraceEvent>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str(&line).map_err(|source| TraceError::Event {
                    line: i + 1,
                    source,
                }),
            ),
            Err(err) => Some(Err(err.into())),
        })
}

/// Feeds every event of the log to `listener`, stopping at the first error.
/// Returns the number of events delivered.
pub fn replay<R: BufRead>(reader: R, listener: &dyn TraceListener) -> Result<usize> {
    replay_with(reader, listener, |_| {})
}

/// Like [`replay`], calling `on_event` after each event has been delivered.
pub fn replay_with<R, F>(reader: R, listener: &dyn TraceListener, mut on_event: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(&TraceEvent),
{
    let mut delivered = 0;
    for event in events(reader) {
        let event = event?;
        event.deliver(listener)?;
        on_event(&event);
        delivered += 1;
    }
    Ok(delivered)
}
