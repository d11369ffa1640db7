use crate::error::{EngineError, EngineResult};
use crate::models::TradeOn;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Per-instrument trading configuration threaded through every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub min_commission: f64,
    pub lot_size: f64,
    pub trade_on: TradeOn,
    #[serde(default)]
    pub allow_short_selling: bool,
}

impl BacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::config(format!(
                "initial_capital must be > 0 (value: {})",
                self.initial_capital
            )));
        }
        if !self.commission_rate.is_finite() || self.commission_rate < 0.0 {
            return Err(EngineError::config(format!(
                "commission_rate must be >= 0 (value: {})",
                self.commission_rate
            )));
        }
        if !self.min_commission.is_finite() || self.min_commission < 0.0 {
            return Err(EngineError::config(format!(
                "min_commission must be >= 0 (value: {})",
                self.min_commission
            )));
        }
        if !self.lot_size.is_finite() || self.lot_size <= 0.0 {
            return Err(EngineError::config(format!(
                "lot_size must be > 0 (value: {})",
                self.lot_size
            )));
        }
        Ok(())
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_capital = require_setting_f64(settings, "INITIAL_CAPITAL", None, None)?;
        let commission_rate = require_setting_f64(settings, "COMMISSION_RATE", Some(0.0), None)?;
        let min_commission = require_setting_f64(settings, "MIN_COMMISSION", Some(0.0), None)?;
        let lot_size = require_setting_f64(settings, "LOT_SIZE", None, None)?;
        let trade_on = require_setting(settings, "TRADE_ON")?
            .parse::<TradeOn>()
            .map_err(|err| anyhow!("Setting TRADE_ON is invalid: {}", err))?;
        let allow_short_selling = optional_setting_bool(settings, "ALLOW_SHORT_SELLING")?
            .unwrap_or(false);

        let config = Self {
            initial_capital,
            commission_rate,
            min_commission,
            lot_size,
            trade_on,
            allow_short_selling,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Inclusive range of window sizes scanned by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRange {
    pub min: usize,
    pub max: usize,
}

impl WindowRange {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn values(&self) -> impl Iterator<Item = usize> {
        self.min..=self.max
    }

    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            self.max - self.min + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationObjective {
    FinalCapital,
    Sharpe,
}

impl OptimizationObjective {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "final_capital" | "capital" | "net_pnl" => Ok(Self::FinalCapital),
            "sharpe" | "sharpe_ratio" => Ok(Self::Sharpe),
            other => Err(anyhow!(
                "OPTIMIZATION_OBJECTIVE must be FINAL_CAPITAL or SHARPE (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FinalCapital => "final capital",
            Self::Sharpe => "Sharpe ratio",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub past_window_range: WindowRange,
    pub trade_window_range: WindowRange,
    pub objective: OptimizationObjective,
    /// Worker thread cap; `None` uses every logical CPU.
    pub max_workers: Option<usize>,
    pub deadline: Option<Duration>,
    pub show_progress: bool,
}

impl OptimizerSettings {
    pub fn new(past_window_range: WindowRange, trade_window_range: WindowRange) -> Self {
        Self {
            past_window_range,
            trade_window_range,
            objective: OptimizationObjective::FinalCapital,
            max_workers: None,
            deadline: None,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.past_window_range.min < 1 {
            return Err(EngineError::config(format!(
                "past_window range must start at >= 1 (value: {})",
                self.past_window_range.min
            )));
        }
        if self.past_window_range.is_empty() {
            return Err(EngineError::config(format!(
                "past_window range is empty ({}..={})",
                self.past_window_range.min, self.past_window_range.max
            )));
        }
        if self.trade_window_range.is_empty() {
            return Err(EngineError::config(format!(
                "trade_window range is empty ({}..={})",
                self.trade_window_range.min, self.trade_window_range.max
            )));
        }
        if self.max_workers == Some(0) {
            return Err(EngineError::config("max_workers must be >= 1"));
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.past_window_range.len() * self.trade_window_range.len()
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let past_window_range = WindowRange::new(
            require_setting_usize(settings, "PAST_WINDOW_MIN", 1)?,
            require_setting_usize(settings, "PAST_WINDOW_MAX", 1)?,
        );
        let trade_window_range = WindowRange::new(
            require_setting_usize(settings, "TRADE_WINDOW_MIN", 0)?,
            require_setting_usize(settings, "TRADE_WINDOW_MAX", 0)?,
        );
        let objective = settings
            .get("OPTIMIZATION_OBJECTIVE")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(OptimizationObjective::parse)
            .transpose()?
            .unwrap_or(OptimizationObjective::FinalCapital);
        let max_workers = if settings.contains_key("OPTIMIZER_WORKERS") {
            Some(require_setting_usize(settings, "OPTIMIZER_WORKERS", 1)?)
        } else {
            None
        };
        let deadline = if settings.contains_key("OPTIMIZER_DEADLINE_SECS") {
            let secs = require_setting_f64(settings, "OPTIMIZER_DEADLINE_SECS", Some(0.0), None)?;
            Some(Duration::from_secs_f64(secs))
        } else {
            None
        };

        let optimizer_settings = Self {
            past_window_range,
            trade_window_range,
            objective,
            max_workers,
            deadline,
            show_progress: false,
        };
        optimizer_settings.validate()?;
        Ok(optimizer_settings)
    }
}

/// Reads a flat JSON object of setting names to values. Numbers and booleans
/// are accepted and stored in their string form.
pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {}", path.display()))?;
    let values: HashMap<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Settings file {} must be a JSON object", path.display()))?;

    values
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(anyhow!(
                        "Setting {} in {} must be a string, number or boolean (value: {})",
                        key,
                        path.display(),
                        other
                    ))
                }
            };
            Ok((key, text))
        })
        .collect()
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<usize> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn optional_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(anyhow!("Setting {} must be a boolean (value: {})", key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_settings() -> HashMap<String, String> {
        settings(&[
            ("INITIAL_CAPITAL", "10000"),
            ("COMMISSION_RATE", "0.001"),
            ("MIN_COMMISSION", "1.5"),
            ("LOT_SIZE", "0.01"),
            ("TRADE_ON", "Close"),
            ("PAST_WINDOW_MIN", "2"),
            ("PAST_WINDOW_MAX", "10"),
            ("TRADE_WINDOW_MIN", "0"),
            ("TRADE_WINDOW_MAX", "3"),
        ])
    }

    #[test]
    fn loads_backtest_config_from_settings() {
        let config = BacktestConfig::from_settings_map(&base_settings()).unwrap();
        assert_eq!(config.trade_on, TradeOn::Close);
        assert!((config.lot_size - 0.01).abs() < 1e-12);
        assert!(!config.allow_short_selling);
    }

    #[test]
    fn missing_setting_is_an_error() {
        let mut map = base_settings();
        map.remove("LOT_SIZE");
        let err = BacktestConfig::from_settings_map(&map).unwrap_err();
        assert!(err.to_string().contains("LOT_SIZE"));
    }

    #[test]
    fn rejects_non_positive_lot_size_and_negative_commission() {
        let mut map = base_settings();
        map.insert("LOT_SIZE".to_string(), "0".to_string());
        assert!(BacktestConfig::from_settings_map(&map).is_err());

        let mut map = base_settings();
        map.insert("COMMISSION_RATE".to_string(), "-0.1".to_string());
        assert!(BacktestConfig::from_settings_map(&map).is_err());
    }

    #[test]
    fn zero_commission_rate_is_allowed() {
        let mut map = base_settings();
        map.insert("COMMISSION_RATE".to_string(), "0".to_string());
        assert!(BacktestConfig::from_settings_map(&map).is_ok());
    }

    #[test]
    fn loads_optimizer_settings() {
        let optimizer = OptimizerSettings::from_settings_map(&base_settings()).unwrap();
        assert_eq!(optimizer.past_window_range, WindowRange::new(2, 10));
        assert_eq!(optimizer.trade_window_range, WindowRange::new(0, 3));
        assert_eq!(optimizer.cell_count(), 9 * 4);
        assert_eq!(optimizer.objective, OptimizationObjective::FinalCapital);
        assert_eq!(optimizer.max_workers, None);
    }

    #[test]
    fn reads_settings_file_with_mixed_value_types() {
        let path = std::env::temp_dir().join(format!("sr-engine-settings-{}.json", std::process::id()));
        fs::write(
            &path,
            r#"{"INITIAL_CAPITAL": 2500, "TRADE_ON": "open", "ALLOW_SHORT_SELLING": true}"#,
        )
        .unwrap();
        let map = load_settings_file(&path).unwrap();
        assert_eq!(map["INITIAL_CAPITAL"], "2500");
        assert_eq!(map["TRADE_ON"], "open");
        assert_eq!(map["ALLOW_SHORT_SELLING"], "true");

        fs::write(&path, r#"{"LOT_SIZE": [1, 2]}"#).unwrap();
        assert!(load_settings_file(&path).is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn parses_objective_and_worker_overrides() {
        let mut map = base_settings();
        map.insert("OPTIMIZATION_OBJECTIVE".to_string(), "SHARPE".to_string());
        map.insert("OPTIMIZER_WORKERS".to_string(), "3".to_string());
        map.insert("OPTIMIZER_DEADLINE_SECS".to_string(), "1.5".to_string());
        let optimizer = OptimizerSettings::from_settings_map(&map).unwrap();
        assert_eq!(optimizer.objective, OptimizationObjective::Sharpe);
        assert_eq!(optimizer.max_workers, Some(3));
        assert_eq!(optimizer.deadline, Some(Duration::from_millis(1500)));

        map.insert("OPTIMIZER_WORKERS".to_string(), "0".to_string());
        assert!(OptimizerSettings::from_settings_map(&map).is_err());
    }

    #[test]
    fn rejects_past_window_below_one() {
        let mut map = base_settings();
        map.insert("PAST_WINDOW_MIN".to_string(), "0".to_string());
        assert!(OptimizerSettings::from_settings_map(&map).is_err());
    }
}
