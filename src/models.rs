use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::climate::ClimateZone;
use crate::error::PipelineError;

/// Temporal resolution of a case observation. Untagged rows are legacy yearly data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Yearly,
    Monthly,
    Weekly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Yearly => "yearly",
            Granularity::Monthly => "monthly",
            Granularity::Weekly => "weekly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yearly" => Ok(Granularity::Yearly),
            "monthly" => Ok(Granularity::Monthly),
            "weekly" => Ok(Granularity::Weekly),
            "daily" => Ok(Granularity::Daily),
            other => Err(PipelineError::InvalidGranularity(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub region_id: String,
    pub region_name: Option<String>,
    pub disease: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseObservation {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub confirmed: i64,
    pub deaths: i64,
    pub recovered: i64,
    pub granularity: Option<Granularity>,
}

impl CaseObservation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            region_id: self.region_id.clone(),
            date: self.date,
            disease: self.disease.clone(),
            granularity: self.granularity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservationKey {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub granularity: Option<Granularity>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RiskKey {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlertKey {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ForecastKey {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub model_version: String,
}

/// Trailing-window indicators for one region. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub region_id: String,
    pub window_size: usize,
    pub today_confirmed: i64,
    pub past_confirmed: i64,
    pub today_deaths: i64,
    pub growth_rate: f64,
    pub death_ratio: f64,
    pub volatility_norm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    /// Only assigned by downstream consumers; the scorer stops at `High`.
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(PipelineError::config(format!("unknown risk level {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClimateInfo {
    Applied {
        base_risk: f64,
        climate_multiplier: f64,
        adjusted_risk: f64,
        explanation: String,
        season: String,
        is_monsoon: bool,
        zone: Option<ClimateZone>,
    },
    Disabled {
        base_risk: f64,
    },
}

impl ClimateInfo {
    pub fn base_risk(&self) -> f64 {
        match self {
            ClimateInfo::Applied { base_risk, .. } | ClimateInfo::Disabled { base_risk } => {
                *base_risk
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub drivers: Vec<String>,
    pub metrics: RegionMetrics,
    pub climate_info: ClimateInfo,
    pub updated_at: DateTime<Utc>,
}

impl RiskScore {
    pub fn key(&self) -> RiskKey {
        RiskKey {
            region_id: self.region_id.clone(),
            date: self.date,
            disease: self.disease.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            region_id: self.region_id.clone(),
            date: self.date,
            disease: self.disease.clone(),
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: Option<String>,
    pub pred_mean: f64,
    pub pred_lower: f64,
    pub pred_upper: f64,
    pub model_version: String,
    pub generated_at: DateTime<Utc>,
    pub source_granularity: Granularity,
    pub model_order: Option<String>,
}

impl Forecast {
    pub fn key(&self) -> ForecastKey {
        ForecastKey {
            region_id: self.region_id.clone(),
            date: self.date,
            disease: self.disease.clone(),
            model_version: self.model_version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub region_id: String,
    pub horizon: u32,
    pub mae: Option<f64>,
    pub mape: Option<f64>,
    pub points_compared: usize,
    pub model_version: Option<String>,
    pub dates_evaluated: Vec<NaiveDate>,
    pub evaluated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub region_id: String,
    pub region_name: Option<String>,
    pub confirmed_sum: i64,
    pub deaths_sum: i64,
    pub latest_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCounts {
    pub risk_scores: u64,
    pub alerts: u64,
    pub forecasts: u64,
}

/// A region left out of a batch, with the reason it was left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skipped {
    pub region_id: String,
    pub reason: String,
}

/// Per-region result: either records were produced or the region was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<T> {
    pub records: Vec<T>,
    pub skipped: Vec<Skipped>,
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn skip(&mut self, region_id: &str, reason: impl Into<String>) {
        self.skipped.push(Skipped {
            region_id: region_id.to_string(),
            reason: reason.into(),
        });
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| PipelineError::InvalidDate(value.to_string()))
}
