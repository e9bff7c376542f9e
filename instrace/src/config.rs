use std::env::var;

use crate::error::{Result, TraceError};
use crate::output::Output;

pub const OUTPUT_VAR: &str = "INSTRACE_OUTPUT";
pub const PRETTY_VAR: &str = "INSTRACE_PRETTY";
pub const DEFAULT_OUTPUT: &str = "itrace.out";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub output: Output,
    pub pretty: bool,
}

impl TraceConfig {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            pretty: false,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Configuration for an instrumentation adapter running inside the traced
    /// process, where the only channel from the launcher is the environment.
    pub fn from_env() -> Result<Self> {
        let output = match var(OUTPUT_VAR) {
            Ok(path) if !path.is_empty() => Output::parse(&path),
            _ => Output::parse(DEFAULT_OUTPUT),
        };
        let pretty = match var(PRETTY_VAR) {
            Ok(value) => parse_flag(&value)?,
            Err(_) => false,
        };
        Ok(Self { output, pretty })
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(Output::parse(DEFAULT_OUTPUT))
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => Err(TraceError::Config(format!(
            "{} must be a boolean, got {:?}",
            PRETTY_VAR, other
        ))),
    }
}
