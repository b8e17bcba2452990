//! Persistence for observations and derived records.
//!
//! - **Store**: trait every backend implements
//! - **PgStore**: Postgres via sqlx
//! - **MemoryStore**: in-process maps, used for offline runs and tests

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    Alert, CaseObservation, DerivedCounts, Forecast, Granularity, Hotspot, Region, RiskScore,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which granularity tags qualify for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GranularityFilter {
    Any,
    /// Rows without a tag (legacy yearly data).
    Untagged,
    Exactly(Granularity),
}

impl GranularityFilter {
    /// Yearly requests only see untagged rows, even when tagged yearly rows exist.
    pub fn for_requested(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Yearly => GranularityFilter::Untagged,
            other => GranularityFilter::Exactly(other),
        }
    }

    pub fn matches(&self, tag: Option<Granularity>) -> bool {
        match self {
            GranularityFilter::Any => true,
            GranularityFilter::Untagged => tag.is_none(),
            GranularityFilter::Exactly(wanted) => tag == Some(*wanted),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFilter {
    pub region_id: Option<String>,
    pub disease: Option<String>,
    pub granularity: GranularityFilter,
    pub on_or_before: Option<NaiveDate>,
}

impl ObservationFilter {
    pub fn all() -> Self {
        Self {
            region_id: None,
            disease: None,
            granularity: GranularityFilter::Any,
            on_or_before: None,
        }
    }

    pub fn region(mut self, region_id: &str) -> Self {
        self.region_id = Some(region_id.to_string());
        self
    }

    pub fn disease(mut self, disease: Option<&str>) -> Self {
        self.disease = disease.map(str::to_string);
        self
    }

    pub fn granularity(mut self, granularity: GranularityFilter) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn on_or_before(mut self, date: Option<NaiveDate>) -> Self {
        self.on_or_before = date;
        self
    }

    pub fn matches(&self, obs: &CaseObservation) -> bool {
        self.region_id.as_deref().map_or(true, |r| obs.region_id == r)
            && disease_matches(self.disease.as_deref(), obs.disease.as_deref())
            && self.granularity.matches(obs.granularity)
            && self.on_or_before.map_or(true, |d| obs.date <= d)
    }
}

/// `None` as a filter means "any disease".
pub fn disease_matches(filter: Option<&str>, value: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(wanted) => value == Some(wanted),
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create or upgrade the schema. A no-op for in-memory stores.
    async fn init(&self) -> Result<()>;

    /// Returns `true` when the region was newly inserted.
    async fn upsert_region(&self, region: &Region) -> Result<bool>;

    /// Insert-if-absent on the observation key. Returns `true` when inserted.
    async fn insert_observation(&self, obs: &CaseObservation) -> Result<bool>;

    /// Region ids known for `disease`, or all distinct region ids, sorted.
    async fn list_regions(&self, disease: Option<&str>) -> Result<Vec<String>>;

    async fn latest_observation_date(&self, filter: &ObservationFilter)
        -> Result<Option<NaiveDate>>;

    /// The `limit` most recent matching observations, returned in ascending date order.
    async fn recent_observations(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<CaseObservation>>;

    async fn upsert_risk_score(&self, score: &RiskScore) -> Result<()>;

    async fn latest_risk_date(&self, disease: Option<&str>) -> Result<Option<NaiveDate>>;

    async fn risk_scores_on(&self, date: NaiveDate, disease: Option<&str>)
        -> Result<Vec<RiskScore>>;

    async fn upsert_alert(&self, alert: &Alert) -> Result<()>;

    async fn alerts_on(&self, date: NaiveDate, disease: Option<&str>) -> Result<Vec<Alert>>;

    async fn upsert_forecast(&self, forecast: &Forecast) -> Result<()>;

    /// Forecasts for a region in ascending date order.
    async fn forecasts_for_region(
        &self,
        region_id: &str,
        disease: Option<&str>,
        model_version: Option<&str>,
    ) -> Result<Vec<Forecast>>;

    /// Removes risk scores, alerts and forecasts tagged with `disease`.
    async fn delete_derived(&self, disease: &str) -> Result<DerivedCounts>;

    async fn count_derived(&self, disease: Option<&str>) -> Result<DerivedCounts>;

    /// Regions ranked by total confirmed cases.
    async fn hotspots(&self, limit: usize, disease: Option<&str>) -> Result<Vec<Hotspot>>;

    /// Store name for logging
    fn name(&self) -> &str;
}
