//! Execution options

use crate::memory::MemConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest supported address space (pointers are 32 bits wide)
pub const MAX_MEMSZ: u64 = 1 << 32;

/// Options for running and checking programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecOptions {
    /// Size of the address space (MEMSZ)
    pub memsz: u64,
    /// Default allocation alignment (SYSALIGN), a power of two
    pub sysalign: u64,
    /// Twin addresses proposed per allocation
    pub max_candidates: usize,
    /// Steps before a run is cut off with a timeout
    pub step_budget: usize,
    /// Cap on the number of traces enumerated by exhaustive exploration
    pub explore_limit: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            memsz: 65_536,
            sysalign: 8,
            max_candidates: 4,
            step_budget: 10_000,
            explore_limit: 4096,
        }
    }
}

impl ExecOptions {
    /// Parses options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let opts: ExecOptions =
            serde_json::from_str(json).map_err(|e| Error::OptionsParse(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Checks that the options describe a usable machine
    pub fn validate(&self) -> Result<()> {
        self.mem_config().validate()?;
        if self.explore_limit == 0 {
            return Err(Error::invalid_options("explore_limit must be at least 1"));
        }
        Ok(())
    }

    /// Memory parameters derived from these options
    pub fn mem_config(&self) -> MemConfig {
        MemConfig {
            memsz: self.memsz,
            sysalign: self.sysalign,
            max_candidates: self.max_candidates,
        }
    }

    /// Sets MEMSZ
    pub fn with_memsz(mut self, memsz: u64) -> Self {
        self.memsz = memsz;
        self
    }

    /// Sets the twin-set size
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Sets the step budget
    pub fn with_step_budget(mut self, budget: usize) -> Self {
        self.step_budget = budget;
        self
    }
}
