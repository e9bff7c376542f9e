//! The trace coordinator.
//!
//! Instrumentation engines deliver events through [`TraceListener`]. Every
//! event is applied under one global lock. The register shadow state and the
//! trace cursor are shared by all threads of the traced process.

use log::{debug, error, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::TraceConfig;
use crate::edge::{Edge, EdgeStore, EdgeType};
use crate::error::{Result, TraceError};
use crate::instruction::{InstructionRecord, InstructionStore};
use crate::memory::{read_value, MemoryReader, MAX_ACCESS_SIZE};
use crate::range::MemoryAccess;
use crate::register::{RegisterContext, RegisterSet, RegisterState};
use crate::report::Report;

/// Callbacks an instrumentation engine drives while the target runs.
pub trait TraceListener {
    fn on_image_loaded(&self, base: u64, load_offset: u64, entry: u64) -> Result<()>;

    fn on_instruction_executed(
        &self,
        address: u64,
        disassembly: &str,
        registers: &dyn RegisterContext,
        written: RegisterSet,
        edge_type: EdgeType,
    ) -> Result<()>;

    fn on_memory_written(
        &self,
        instruction: u64,
        address: u64,
        size: u32,
        memory: &dyn MemoryReader,
    ) -> Result<()>;

    fn on_trace_end(&self) -> Result<()>;
}

/// Load metadata of the main executable, replayed verbatim into the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub image_base: u64,
    pub load_offset: u64,
    pub entry_address: u64,
}

impl ImageInfo {
    pub fn first_address(&self) -> u64 {
        self.load_offset.wrapping_add(self.entry_address)
    }
}

/// The previously executed instruction and the edge type it decided for
/// whatever runs next. An address of 0 means nothing has run yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub previous: u64,
    pub edge_type: EdgeType,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            previous: 0,
            edge_type: EdgeType::Unknown,
        }
    }
}

#[derive(Debug, Default)]
pub struct TraceState {
    instructions: InstructionStore,
    edges: EdgeStore,
    registers: RegisterState,
    cursor: Cursor,
    image: ImageInfo,
    aborted: Option<u64>,
    finished: bool,
}

impl TraceState {
    pub fn instructions(&self) -> &InstructionStore {
        &self.instructions
    }

    pub fn edges(&self) -> &EdgeStore {
        &self.edges
    }

    pub fn registers(&self) -> &RegisterState {
        &self.registers
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn image(&self) -> ImageInfo {
        self.image
    }

    pub fn aborted_at(&self) -> Option<u64> {
        self.aborted
    }

    fn check_aborted(&self) -> Result<()> {
        match self.aborted {
            Some(address) => Err(TraceError::Aborted { address }),
            None => Ok(()),
        }
    }

    /// Events are accepted only until the report has been written.
    fn check_running(&self) -> Result<()> {
        self.check_aborted()?;
        if self.finished {
            return Err(TraceError::AlreadyFinished);
        }
        Ok(())
    }

    /// Records the error and refuses every later event.
    fn abort(&mut self, err: &TraceError) {
        let address = err.offending_address().unwrap_or(self.cursor.previous);
        error!("Aborting trace at 0x{:x}: {}", address, err);
        self.aborted = Some(address);
    }

    fn save_state(
        &mut self,
        address: u64,
        disassembly: &str,
        registers: &dyn RegisterContext,
        written: RegisterSet,
        edge_type: EdgeType,
    ) -> Result<()> {
        self.instructions.ensure(address, disassembly);
        self.instructions.record_visit(address);

        let touched = self.registers.diff_and_update(registers, written);
        self.instructions.record_registers(address, touched, registers);

        if self.cursor.previous != 0 {
            self.save_edge(self.cursor.previous, address, self.cursor.edge_type)?;
        }

        self.cursor = Cursor {
            previous: address,
            edge_type,
        };
        Ok(())
    }

    fn save_edge(&mut self, from: u64, to: u64, edge_type: EdgeType) -> Result<()> {
        self.edges.record(from, to, edge_type)?;
        self.instructions.link_successor(from, to);
        Ok(())
    }

    fn report(&self) -> Result<Report> {
        Report::build(
            self.image.image_base,
            self.image.first_address(),
            self.cursor.previous,
            &self.instructions,
            &self.edges,
        )
    }
}

/// Aggregates per-instruction and per-edge statistics for one traced process
/// and writes the report once tracing ends.
pub struct InsTracer {
    config: TraceConfig,
    state: Mutex<TraceState>,
}

impl InsTracer {
    /// Creates an empty trace. Fails if the output directory does not exist.
    pub fn new(config: TraceConfig) -> Result<Self> {
        config.output.validate()?;
        debug!("Tracing to {}", config.output);
        Ok(Self {
            config,
            state: Mutex::new(TraceState::default()),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(TraceConfig::from_env()?)
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, TraceState> {
        // Poisoning is ignored: fatal errors abort the trace through `aborted`.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the current state under the trace lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&TraceState) -> R) -> R {
        let state = self.lock();
        f(&*state)
    }

    pub fn instruction(&self, address: u64) -> Option<InstructionRecord> {
        self.lock().instructions.get(address).cloned()
    }

    pub fn edge(&self, from: u64, to: u64) -> Option<Edge> {
        self.lock().edges.get(from, to).copied()
    }

    /// Builds the report from the current state without modifying it.
    pub fn report(&self) -> Result<Report> {
        let state = self.lock();
        state.check_aborted()?;
        state.report()
    }
}

impl TraceListener for InsTracer {
    fn on_image_loaded(&self, base: u64, load_offset: u64, entry: u64) -> Result<()> {
        let mut state = self.lock();
        state.check_running()?;
        state.image = ImageInfo {
            image_base: base,
            load_offset,
            entry_address: entry,
        };
        info!("Image base: 0x{:x}", base);
        info!("Load offset: 0x{:x}", load_offset);
        info!("Image entry address: 0x{:x}", entry);
        info!("First instruction address: 0x{:x}", state.image.first_address());
        Ok(())
    }

    fn on_instruction_executed(
        &self,
        address: u64,
        disassembly: &str,
        registers: &dyn RegisterContext,
        written: RegisterSet,
        edge_type: EdgeType,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check_running()?;
        let result = state.save_state(address, disassembly, registers, written, edge_type);
        if let Err(err) = &result {
            state.abort(err);
        }
        result
    }

    fn on_memory_written(
        &self,
        instruction: u64,
        address: u64,
        size: u32,
        memory: &dyn MemoryReader,
    ) -> Result<()> {
        if size == 0 || size > MAX_ACCESS_SIZE {
            debug!(
                "Ignoring {} byte write at 0x{:x} by 0x{:x}",
                size, address, instruction
            );
            return Ok(());
        }
        let value = read_value(memory, address, size, instruction);

        let mut state = self.lock();
        state.check_running()?;
        match state
            .instructions
            .record_memory(instruction, MemoryAccess::new(address, size, value))
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    "Memory write by 0x{:x} before the instruction was traced, skipping",
                    instruction
                );
                Ok(())
            }
            Err(err) => {
                state.abort(&err);
                Err(err)
            }
        }
    }

    fn on_trace_end(&self) -> Result<()> {
        let mut state = self.lock();
        state.check_running()?;
        info!("Last instruction: 0x{:x}", state.cursor.previous);

        let report = match state.report() {
            Ok(report) => report,
            Err(err) => {
                state.abort(&err);
                return Err(err);
            }
        };
        let data = report.to_json(self.config.pretty)?;
        self.config.output.write_all(data.as_bytes())?;
        state.finished = true;
        info!(
            "Completed trace: {} instructions, {} edges written to {}",
            report.instructions.len(),
            report.edges.len(),
            self.config.output
        );
        Ok(())
    }
}
