//! Aggregating instruction tracer.
//!
//! An instrumentation engine reports every executed instruction and every
//! memory write of the traced process to an [`InsTracer`]. The tracer keeps
//! one record per instruction address (visit count, register and memory
//! ranges, last successor) and one record per control-flow edge, and writes
//! a JSON [`Report`] when the trace ends.

pub mod config;
pub mod edge;
pub mod error;
pub mod instruction;
pub mod memory;
pub mod output;
pub mod range;
pub mod register;
pub mod report;
pub mod trace_entry;
pub mod tracer;

pub use config::TraceConfig;
pub use edge::{EdgeType, InstructionClass};
pub use error::{Result, TraceError};
pub use memory::{MemoryReader, RecordedWrite};
pub use output::Output;
pub use register::{Register, RegisterContext, RegisterSet, RegisterSnapshot};
pub use report::Report;
pub use trace_entry::{replay, TraceEvent};
pub use tracer::{InsTracer, TraceListener};
