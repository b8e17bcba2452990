use std::str::FromStr;

use crate::alerts::DEFAULT_ALERT_THRESHOLD;
use crate::error::{PipelineError, Result};
use crate::forecast::ArimaSettings;
use crate::risk::{LevelThresholds, ScoringWeights};

/// Runtime settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub risk_high_threshold: f64,
    pub log_level: String,
    pub max_concurrent_fits: usize,
    pub forecast_confidence: f64,
    pub weights: ScoringWeights,
    pub levels: LevelThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            risk_high_threshold: DEFAULT_ALERT_THRESHOLD,
            log_level: "info".to_string(),
            max_concurrent_fits: 4,
            forecast_confidence: 0.95,
            weights: ScoringWeights::default(),
            levels: LevelThresholds::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or blank keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let read = |key: &str| get(key).map(|value| (key.to_string(), value));

        let settings = Settings {
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(
                read("DB_MAX_CONNECTIONS"),
                defaults.db_max_connections,
            )?,
            risk_high_threshold: parse_or(
                read("RISK_HIGH_THRESHOLD"),
                defaults.risk_high_threshold,
            )?,
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            max_concurrent_fits: parse_or(
                read("MAX_CONCURRENT_FITS"),
                defaults.max_concurrent_fits,
            )?,
            forecast_confidence: parse_or(
                read("FORECAST_CONFIDENCE"),
                defaults.forecast_confidence,
            )?,
            weights: defaults.weights,
            levels: defaults.levels,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.risk_high_threshold) {
            return Err(PipelineError::config(format!(
                "RISK_HIGH_THRESHOLD must be within [0, 1], got {}",
                self.risk_high_threshold
            )));
        }
        if !(self.forecast_confidence > 0.0 && self.forecast_confidence < 1.0) {
            return Err(PipelineError::config(format!(
                "FORECAST_CONFIDENCE must be within (0, 1), got {}",
                self.forecast_confidence
            )));
        }
        if self.db_max_connections == 0 || self.max_concurrent_fits == 0 {
            return Err(PipelineError::config(
                "DB_MAX_CONNECTIONS and MAX_CONCURRENT_FITS must be positive",
            ));
        }
        Ok(())
    }

    pub fn arima(&self, use_seasonal: bool) -> ArimaSettings {
        ArimaSettings {
            use_seasonal,
            confidence: self.forecast_confidence,
            max_concurrent_fits: self.max_concurrent_fits,
        }
    }
}

fn parse_or<T: FromStr>(raw: Option<(String, String)>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some((key, value)) => value
            .trim()
            .parse()
            .map_err(|_| PipelineError::config(format!("{key} has invalid value {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.risk_high_threshold, 0.70);
        assert_eq!(s.db_max_connections, 5);
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("DATABASE_URL", "postgres://localhost/outbreaks"),
            ("RISK_HIGH_THRESHOLD", "0.55"),
            ("MAX_CONCURRENT_FITS", "8"),
            ("LOG_LEVEL", "debug"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/outbreaks"));
        assert_eq!(s.risk_high_threshold, 0.55);
        assert_eq!(s.arima(false).max_concurrent_fits, 8);
        assert_eq!(s.log_level, "debug");
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        assert!(settings(&[("RISK_HIGH_THRESHOLD", "1.5")]).is_err());
        assert!(settings(&[("RISK_HIGH_THRESHOLD", "high")]).is_err());
        assert!(settings(&[("RISK_HIGH_THRESHOLD", "1.0")]).is_ok());
    }
}
