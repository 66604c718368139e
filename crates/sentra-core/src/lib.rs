//! Core domain types, consensus rules and configuration for sentra.

mod app_config;
mod config;
pub mod consensus;
pub mod types;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, ModelEndpointConfig, ReportSchedules};
pub use config::{load_app_config, load_app_config_from_env, parse_symbols};
pub use consensus::{consensus, consensus_with, ConsensusConfig};
pub use types::{
    Action, Agreement, Article, ConsensusResult, Direction, InvalidRecord, InvocationOutcome,
    InvocationStatus, ModelId, ModelInvocation, ModelKind, PendingInvocation, ReportType,
    RunStatus, Stage, TriggerSource,
};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
