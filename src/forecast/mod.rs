//! Case forecasting.
//!
//! - **naive**: flat moving-average forecast
//! - **arima**: ARIMA/SARIMA with automatic order selection
//!
//! Both read a granularity-selected window of history and write one record
//! per forecast day, keyed by model version.

use chrono::{Duration, NaiveDate};
use tracing::warn;

use crate::error::Result;
use crate::models::{CaseObservation, Granularity};
use crate::store::{GranularityFilter, ObservationFilter, Store};

pub mod arima;
pub mod naive;

pub use arima::{generate_all_arima, ArimaSettings};
pub use naive::generate_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GranularityProfile {
    pub naive_lookback: usize,
    pub statistical_lookback: usize,
    pub seasonal_period: usize,
}

pub fn profile_for(granularity: Granularity) -> GranularityProfile {
    let (naive_lookback, statistical_lookback, seasonal_period) = match granularity {
        Granularity::Yearly => (3, 5, 1),
        Granularity::Monthly => (6, 24, 12),
        Granularity::Weekly => (12, 52, 52),
        Granularity::Daily => (7, 56, 7),
    };
    GranularityProfile {
        naive_lookback,
        statistical_lookback,
        seasonal_period,
    }
}

pub fn history_filter(
    region_id: &str,
    disease: Option<&str>,
    granularity: Granularity,
    as_of: NaiveDate,
) -> ObservationFilter {
    ObservationFilter::all()
        .region(region_id)
        .disease(disease)
        .granularity(GranularityFilter::for_requested(granularity))
        .on_or_before(Some(as_of))
}

/// Latest date with a qualifying observation when `date` is not given.
pub async fn resolve_target_date(
    store: &dyn Store,
    date: Option<NaiveDate>,
    disease: Option<&str>,
    granularity: Granularity,
) -> Result<Option<NaiveDate>> {
    if date.is_some() {
        return Ok(date);
    }
    let filter = ObservationFilter::all()
        .disease(disease)
        .granularity(GranularityFilter::for_requested(granularity));
    let latest = store.latest_observation_date(&filter).await?;
    if latest.is_none() {
        warn!(disease = ?disease, %granularity, "no observations to forecast from");
    }
    Ok(latest)
}

pub async fn load_history(
    store: &dyn Store,
    region_id: &str,
    disease: Option<&str>,
    granularity: Granularity,
    as_of: NaiveDate,
    lookback: usize,
) -> Result<Vec<CaseObservation>> {
    let filter = history_filter(region_id, disease, granularity, as_of);
    store.recent_observations(&filter, lookback).await
}

/// Days `1..=horizon` after `start`.
pub fn forecast_dates(start: NaiveDate, horizon: u32) -> impl Iterator<Item = NaiveDate> {
    (1..=i64::from(horizon)).map(move |day| start + Duration::days(day))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
