//! Report run orchestration for sentra.
//!
//! [`ReportController`] executes one scheduled report run end to end against
//! a [`Ledger`]; [`sweep_stale_runs`] fails runs that stopped making
//! progress.

mod controller;
mod error;
mod ledger;
mod run;
mod watchdog;

pub use controller::{classify_run, ControllerSettings, ReportController, ReportPayload};
pub use error::{LedgerError, PipelineError};
pub use ledger::{Ledger, MemoryLedger, PgLedger};
pub use run::{JobDateSummary, JobRun, NewRun, RunState, StageLogEntry, TransitionError};
pub use watchdog::{sweep_stale_runs, WatchdogLimits};
