use std::path::PathBuf;

use orion_error::StructError;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::logger::LogFormat;

pub const REPLAY_RATE_MIN: f64 = 1.0;
pub const REPLAY_RATE_MAX: f64 = 10000.0;

pub const LOG_FILE_DEFAULT: &str = "vsm.log";

/// Resolved runtime configuration, assembled from the CLI surface.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ruleset file (YAML).
    pub rules: PathBuf,
    /// Optional initial-state file: a YAML list of `name = value` strings.
    pub initial_state: Option<PathBuf>,
    /// `.vsi` signal-number map.
    pub signal_number_file: PathBuf,
    /// Transport identifiers; empty selects the stdio debug transport.
    pub ipc_modules: Vec<String>,
    /// Signal log destination; `-` means stdout, `None` the default file.
    pub log_file: Option<String>,
    pub log_format: LogFormat,
    /// When false, `condition: (…) => …` lines are suppressed. Emission
    /// side effects are unaffected.
    pub log_condition_checks: bool,
    pub replay_log_file: Option<PathBuf>,
    /// Percent of original rate for replay; 100 = real time.
    pub replay_rate: f64,
}

impl Config {
    pub fn validate(&self) -> RuntimeResult<()> {
        if !(REPLAY_RATE_MIN..=REPLAY_RATE_MAX).contains(&self.replay_rate) {
            return Err(StructError::from(RuntimeReason::Bootstrap).with_detail(format!(
                "Replay rate must be between {REPLAY_RATE_MIN} and {REPLAY_RATE_MAX}, inclusive"
            )));
        }
        Ok(())
    }
}
