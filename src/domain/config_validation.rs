//! Run configuration validation.
//!
//! Reads the `[run]` and `[data]` sections and rejects bad values before a
//! run starts.

use crate::domain::context::ExecutionMode;
use crate::domain::error::TradeflowError;
use crate::domain::market::Timeframe;
use crate::domain::run::RunConfig;
use crate::ports::config_port::ConfigPort;
use chrono::FixedOffset;

pub fn load_run_config(config: &dyn ConfigPort) -> Result<RunConfig, TradeflowError> {
    let defaults = RunConfig::default();
    Ok(RunConfig {
        mode: validate_mode(config)?,
        timezone: validate_timezone(config)?.unwrap_or(defaults.timezone),
        timeframes: validate_timeframes(config)?.unwrap_or(defaults.timeframes),
        history_limit: validate_positive(config, "history_limit", defaults.history_limit)?,
        async_workers: validate_positive(config, "async_workers", defaults.async_workers)?,
        force_square_off: config.get_bool("run", "force_square_off", defaults.force_square_off),
        symbol: config.get_string("data", "symbol"),
    })
}

fn invalid(key: &str, reason: String) -> TradeflowError {
    TradeflowError::ConfigInvalid {
        section: "run".to_string(),
        key: key.to_string(),
        reason,
    }
}

fn validate_mode(config: &dyn ConfigPort) -> Result<ExecutionMode, TradeflowError> {
    match config.get_string("run", "mode") {
        None => Ok(ExecutionMode::default()),
        Some(s) => ExecutionMode::parse(&s)
            .ok_or_else(|| invalid("mode", format!("expected sync or async, got '{}'", s))),
    }
}

fn validate_timezone(config: &dyn ConfigPort) -> Result<Option<FixedOffset>, TradeflowError> {
    config
        .get_string("run", "timezone")
        .map(|s| {
            parse_utc_offset(&s)
                .ok_or_else(|| invalid("timezone", format!("expected an offset like +05:30, got '{}'", s)))
        })
        .transpose()
}

/// Parses `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn validate_timeframes(config: &dyn ConfigPort) -> Result<Option<Vec<Timeframe>>, TradeflowError> {
    let Some(raw) = config.get_string("run", "timeframes") else {
        return Ok(None);
    };
    let mut timeframes: Vec<Timeframe> = Vec::new();
    for label in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let tf = Timeframe::new(label);
        if tf.duration().is_none() {
            return Err(invalid("timeframes", format!("unsupported timeframe '{}'", label)));
        }
        if !timeframes.contains(&tf) {
            timeframes.push(tf);
        }
    }
    if timeframes.is_empty() {
        return Err(invalid("timeframes", "at least one timeframe is required".to_string()));
    }
    Ok(Some(timeframes))
}

fn validate_positive(config: &dyn ConfigPort, key: &str, default: usize) -> Result<usize, TradeflowError> {
    let value = config.get_int("run", key, default as i64);
    if value <= 0 {
        return Err(invalid(key, format!("{} must be positive", key)));
    }
    Ok(value as usize)
}
