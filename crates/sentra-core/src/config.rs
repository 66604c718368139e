use crate::app_config::{AppConfig, Environment, ModelEndpointConfig, ReportSchedules};
use crate::types::ModelKind;
use crate::ConfigError;

const DEFAULT_SYMBOLS: &str = "SPY,QQQ,AAPL,MSFT,NVDA";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the parsing/validation core, decoupled from the real environment
/// so tests can drive it from a `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_positive_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        match parse_u32(var, default)? {
            0 => Err(invalid(var, "must be at least 1".to_string())),
            n => Ok(n),
        }
    };

    let parse_kind = |var: &str, default: &str| -> Result<ModelKind, ConfigError> {
        or_default(var, default)
            .parse::<ModelKind>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("SENTRA_ENV", "development"))?;

    let bind_addr = parse_addr("SENTRA_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("SENTRA_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("SENTRA_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("SENTRA_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("SENTRA_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let symbols = parse_symbols(&or_default("SENTRA_SYMBOLS", DEFAULT_SYMBOLS))
        .map_err(|reason| invalid("SENTRA_SYMBOLS", reason))?;

    let model_a_kind = parse_kind("SENTRA_MODEL_A_KIND", "classifier")?;
    let model_a = ModelEndpointConfig {
        base_url: or_default("SENTRA_MODEL_A_URL", "http://localhost:8001"),
        kind: model_a_kind,
        timeout_secs: parse_u64(
            "SENTRA_MODEL_A_TIMEOUT_SECS",
            &model_a_kind.default_timeout_secs().to_string(),
        )?,
    };

    let model_b_kind = parse_kind("SENTRA_MODEL_B_KIND", "generative")?;
    let model_b = ModelEndpointConfig {
        base_url: or_default("SENTRA_MODEL_B_URL", "http://localhost:8002"),
        kind: model_b_kind,
        timeout_secs: parse_u64(
            "SENTRA_MODEL_B_TIMEOUT_SECS",
            &model_b_kind.default_timeout_secs().to_string(),
        )?,
    };

    let retry_max_attempts = parse_positive_u32("SENTRA_RETRY_MAX_ATTEMPTS", "3")?;
    let retry_backoff_base_ms = parse_u64("SENTRA_RETRY_BACKOFF_BASE_MS", "500")?;
    let retry_backoff_cap_ms = parse_u64("SENTRA_RETRY_BACKOFF_CAP_MS", "8000")?;
    let breaker_threshold = parse_positive_u32("SENTRA_BREAKER_THRESHOLD", "3")?;
    let breaker_cooldown_secs = parse_u64("SENTRA_BREAKER_COOLDOWN_SECS", "60")?;

    let max_concurrent_symbols = parse_usize("SENTRA_MAX_CONCURRENT_SYMBOLS", "5")?.max(1);
    let run_deadline_secs = parse_u64("SENTRA_RUN_DEADLINE_SECS", "1800")?;
    let max_stage_secs = parse_u64("SENTRA_MAX_STAGE_SECS", "600")?;

    let news_window_hours = parse_positive_u32("SENTRA_NEWS_WINDOW_HOURS", "24")?;
    let news_cache_ttl_secs = parse_u64("SENTRA_NEWS_CACHE_TTL_SECS", "900")?;
    let analysis_cache_ttl_secs = parse_u64("SENTRA_ANALYSIS_CACHE_TTL_SECS", "900")?;
    let fast_cache_capacity = parse_usize("SENTRA_FAST_CACHE_CAPACITY", "1024")?;

    let schedules = ReportSchedules {
        premarket: or_default("SENTRA_PREMARKET_CRON", "0 30 12 * * MON-FRI"),
        midday: or_default("SENTRA_MIDDAY_CRON", "0 0 17 * * MON-FRI"),
        end_of_day: or_default("SENTRA_END_OF_DAY_CRON", "0 15 21 * * MON-FRI"),
    };

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        symbols,
        model_a,
        model_b,
        retry_max_attempts,
        retry_backoff_base_ms,
        retry_backoff_cap_ms,
        breaker_threshold,
        breaker_cooldown_secs,
        max_concurrent_symbols,
        run_deadline_secs,
        max_stage_secs,
        news_window_hours,
        news_cache_ttl_secs,
        analysis_cache_ttl_secs,
        fast_cache_capacity,
        schedules,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for anything other than
/// `development`, `test` or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SENTRA_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

/// Parse a comma-separated ticker list.
///
/// Tickers are trimmed and upper-cased; duplicates are dropped keeping the
/// first occurrence. Only ASCII alphanumerics, `.` and `-` are accepted.
///
/// # Errors
///
/// Returns a reason string when a ticker contains other characters.
pub fn parse_symbols(raw: &str) -> Result<Vec<String>, String> {
    let mut symbols: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let symbol = part.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }
        if !symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(format!("invalid ticker '{symbol}'"));
        }
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    Ok(symbols)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
