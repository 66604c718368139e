use std::net::SocketAddr;

use crate::types::{ModelKind, ReportType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Connection settings for one inference endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpointConfig {
    pub base_url: String,
    pub kind: ModelKind,
    pub timeout_secs: u64,
}

/// Cron expressions (six-field, seconds first) for each report type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchedules {
    pub premarket: String,
    pub midday: String,
    pub end_of_day: String,
}

impl ReportSchedules {
    #[must_use]
    pub fn cron_for(&self, report_type: ReportType) -> &str {
        match report_type {
            ReportType::Premarket => &self.premarket,
            ReportType::Midday => &self.midday,
            ReportType::EndOfDay => &self.end_of_day,
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub symbols: Vec<String>,
    pub model_a: ModelEndpointConfig,
    pub model_b: ModelEndpointConfig,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_cap_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub max_concurrent_symbols: usize,
    pub run_deadline_secs: u64,
    pub max_stage_secs: u64,
    pub news_window_hours: u32,
    pub news_cache_ttl_secs: u64,
    pub analysis_cache_ttl_secs: u64,
    pub fast_cache_capacity: usize,
    pub schedules: ReportSchedules,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("symbols", &self.symbols)
            .field("model_a", &self.model_a)
            .field("model_b", &self.model_b)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_backoff_base_ms", &self.retry_backoff_base_ms)
            .field("retry_backoff_cap_ms", &self.retry_backoff_cap_ms)
            .field("breaker_threshold", &self.breaker_threshold)
            .field("breaker_cooldown_secs", &self.breaker_cooldown_secs)
            .field("max_concurrent_symbols", &self.max_concurrent_symbols)
            .field("run_deadline_secs", &self.run_deadline_secs)
            .field("max_stage_secs", &self.max_stage_secs)
            .field("news_window_hours", &self.news_window_hours)
            .field("news_cache_ttl_secs", &self.news_cache_ttl_secs)
            .field("analysis_cache_ttl_secs", &self.analysis_cache_ttl_secs)
            .field("fast_cache_capacity", &self.fast_cache_capacity)
            .field("schedules", &self.schedules)
            .finish()
    }
}
