use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::forecast::arima::{arima_forecast, FitJob};
use crate::forecast::naive::naive_forecast;
use crate::forecast::{load_history, profile_for, round2, ArimaSettings};
use crate::metrics::mean;
use crate::models::{CaseObservation, EvaluationResult, Forecast, Granularity, Outcome};
use crate::store::{GranularityFilter, ObservationFilter, Store};

/// At most one observation per granularity tag, plus an untagged one, share a date.
const ROWS_PER_DATE: usize = 5;

/// Absolute percentage error, or `None` when the actual is zero.
pub fn safe_mape(actual: f64, predicted: f64) -> Option<f64> {
    if actual.abs() < 1e-10 {
        return None;
    }
    Some(((actual - predicted) / actual).abs() * 100.0)
}

/// Error summary of predictions against actuals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    pub mae: f64,
    pub mape: f64,
    pub rmse: f64,
}

/// Percentage errors divide by `max(actual, 1)` so zero actuals still count.
pub fn accuracy(predictions: &[f64], actuals: &[f64]) -> Option<AccuracyMetrics> {
    if predictions.is_empty() || predictions.len() != actuals.len() {
        return None;
    }
    let errors: Vec<f64> = predictions
        .iter()
        .zip(actuals)
        .map(|(p, a)| (p - a).abs())
        .collect();
    let pct: Vec<f64> = errors
        .iter()
        .zip(actuals)
        .map(|(e, a)| e / a.max(1.0) * 100.0)
        .collect();
    let squared: Vec<f64> = errors.iter().map(|e| e * e).collect();
    Some(AccuracyMetrics {
        mae: round2(mean(&errors)),
        mape: round2(mean(&pct)),
        rmse: round2(mean(&squared).sqrt()),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelComparison {
    pub region_id: String,
    pub date: NaiveDate,
    pub horizon: usize,
    pub actual_values: Vec<f64>,
    pub naive_predictions: Vec<f64>,
    pub arima_predictions: Vec<f64>,
    pub naive: Option<AccuracyMetrics>,
    pub arima: Option<AccuracyMetrics>,
    /// Why a model produced no predictions.
    pub notes: Vec<String>,
}

pub struct EvaluationEngine<'a> {
    store: &'a dyn Store,
}

impl<'a> EvaluationEngine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Compares stored forecasts with the observations that later arrived.
    ///
    /// Without `date` the window starts at the first day of the most recent
    /// forecast generation. Only one model version is scored: `model_version`
    /// if given, otherwise that of the earliest forecast in the window.
    pub async fn evaluate(
        &self,
        region_id: &str,
        date: Option<NaiveDate>,
        horizon: u32,
        disease: Option<&str>,
        model_version: Option<&str>,
    ) -> Result<EvaluationResult> {
        let forecasts = self
            .store
            .forecasts_for_region(region_id, disease, model_version)
            .await?;
        if forecasts.is_empty() {
            warn!(region = %region_id, "no forecasts found for region");
            return Ok(empty_result(
                region_id,
                horizon,
                model_version,
                "No forecasts found for this region",
            ));
        }

        let start = date.unwrap_or_else(|| latest_generation_start(&forecasts));
        let end = start + Duration::days(i64::from(horizon));
        let window: Vec<&Forecast> = forecasts
            .iter()
            .filter(|f| f.date >= start && f.date < end)
            .collect();
        let Some(first) = window.first() else {
            warn!(region = %region_id, start = %start, "no forecasts in evaluation window");
            return Ok(empty_result(
                region_id,
                horizon,
                model_version,
                "No forecasts in the evaluation window",
            ));
        };
        let version = model_version.unwrap_or(&first.model_version).to_string();

        let mut errors = Vec::new();
        let mut pct_errors = Vec::new();
        let mut dates = Vec::new();
        for forecast in window.into_iter().filter(|f| f.model_version == version) {
            let Some(actual) = self.actual_on(forecast).await? else {
                continue;
            };
            errors.push((actual - forecast.pred_mean).abs());
            if let Some(pct) = safe_mape(actual, forecast.pred_mean) {
                pct_errors.push(pct);
            }
            dates.push(forecast.date);
        }

        let mae = (!errors.is_empty()).then(|| round2(mean(&errors)));
        let mape = (!pct_errors.is_empty()).then(|| round2(mean(&pct_errors)));
        info!(
            region = %region_id,
            model_version = %version,
            mae = ?mae,
            mape = ?mape,
            points = errors.len(),
            "forecast evaluated"
        );

        Ok(EvaluationResult {
            region_id: region_id.to_string(),
            horizon,
            mae,
            mape,
            points_compared: errors.len(),
            model_version: Some(version),
            dates_evaluated: dates,
            evaluated_at: Utc::now(),
            error: None,
        })
    }

    /// Confirmed count observed on exactly the forecast's date, whatever its
    /// granularity. A row matching the forecast's source granularity wins a tie.
    async fn actual_on(&self, forecast: &Forecast) -> Result<Option<f64>> {
        let filter = ObservationFilter::all()
            .region(&forecast.region_id)
            .disease(forecast.disease.as_deref())
            .on_or_before(Some(forecast.date));
        let recent = self
            .store
            .recent_observations(&filter, ROWS_PER_DATE)
            .await?;
        let same_source = GranularityFilter::for_requested(forecast.source_granularity);
        let on_date: Vec<&CaseObservation> =
            recent.iter().filter(|o| o.date == forecast.date).collect();
        Ok(on_date
            .iter()
            .find(|o| same_source.matches(o.granularity))
            .or_else(|| on_date.first())
            .map(|o| o.confirmed as f64))
    }

    /// Naive and ARIMA forecasts from `date` scored against caller-supplied actuals.
    pub async fn compare_models(
        &self,
        region_id: &str,
        date: NaiveDate,
        actual_values: &[f64],
        disease: Option<&str>,
        granularity: Granularity,
        settings: ArimaSettings,
    ) -> Result<ModelComparison> {
        let horizon = actual_values.len();
        let profile = profile_for(granularity);
        let generated_at = Utc::now();
        let mut notes = Vec::new();

        let recent = load_history(
            self.store,
            region_id,
            disease,
            granularity,
            date,
            profile.naive_lookback,
        )
        .await?;
        let naive_predictions = match naive_forecast(
            region_id,
            disease,
            &recent,
            date,
            horizon as u32,
            granularity,
            generated_at,
        ) {
            Outcome::Done(forecasts) => forecasts.iter().map(|f| f.pred_mean).collect(),
            Outcome::Skipped(reason) => {
                notes.push(format!("naive: {reason}"));
                Vec::new()
            }
        };

        let history = load_history(
            self.store,
            region_id,
            disease,
            granularity,
            date,
            profile.statistical_lookback,
        )
        .await?;
        let job = FitJob {
            region_id: region_id.to_string(),
            disease: disease.map(str::to_string),
            history,
            target: date,
            horizon: horizon as u32,
            granularity,
        };
        let arima_predictions = match arima_forecast(&job, &settings, generated_at) {
            Outcome::Done(forecasts) => forecasts.iter().map(|f| f.pred_mean).collect(),
            Outcome::Skipped(reason) => {
                notes.push(format!("arima: {reason}"));
                Vec::new()
            }
        };

        Ok(ModelComparison {
            region_id: region_id.to_string(),
            date,
            horizon,
            actual_values: actual_values.to_vec(),
            naive: accuracy(&naive_predictions, actual_values),
            arima: accuracy(&arima_predictions, actual_values),
            naive_predictions,
            arima_predictions,
            notes,
        })
    }
}

fn latest_generation_start(forecasts: &[Forecast]) -> NaiveDate {
    let newest = forecasts.iter().map(|f| f.generated_at).max();
    forecasts
        .iter()
        .filter(|f| Some(f.generated_at) == newest)
        .map(|f| f.date)
        .min()
        .unwrap_or(forecasts[0].date)
}

fn empty_result(
    region_id: &str,
    horizon: u32,
    model_version: Option<&str>,
    error: &str,
) -> EvaluationResult {
    EvaluationResult {
        region_id: region_id.to_string(),
        horizon,
        mae: None,
        mape: None,
        points_compared: 0,
        model_version: model_version.map(str::to_string),
        dates_evaluated: Vec::new(),
        evaluated_at: Utc::now(),
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CaseObservation;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn forecast(d: u32, mean: f64, version: &str, generated_at: DateTime<Utc>) -> Forecast {
        Forecast {
            region_id: "R1".to_string(),
            date: day(d),
            disease: Some("DENGUE".to_string()),
            pred_mean: mean,
            pred_lower: mean * 0.9,
            pred_upper: mean * 1.1,
            model_version: version.to_string(),
            generated_at,
            source_granularity: Granularity::Daily,
            model_order: None,
        }
    }

    fn actual(d: u32, confirmed: i64) -> CaseObservation {
        CaseObservation {
            region_id: "R1".to_string(),
            date: day(d),
            disease: Some("DENGUE".to_string()),
            confirmed,
            deaths: 0,
            recovered: 0,
            granularity: Some(Granularity::Daily),
        }
    }

    #[test]
    fn mape_skips_zero_actuals() {
        assert_eq!(safe_mape(0.0, 5.0), None);
        assert_eq!(safe_mape(100.0, 90.0), Some(10.0));
    }

    #[test]
    fn accuracy_requires_matching_lengths() {
        assert!(accuracy(&[1.0], &[1.0, 2.0]).is_none());
        assert!(accuracy(&[], &[]).is_none());

        let m = accuracy(&[110.0, 90.0], &[100.0, 100.0]).unwrap();
        assert_eq!(m.mae, 10.0);
        assert_eq!(m.mape, 10.0);
        assert_eq!(m.rmse, 10.0);
    }

    #[tokio::test]
    async fn no_forecasts_yields_null_metrics() {
        let store = MemoryStore::new();
        let result = EvaluationEngine::new(&store)
            .evaluate("R404", None, 7, None, None)
            .await
            .unwrap();
        assert_eq!(result.mae, None);
        assert_eq!(result.mape, None);
        assert_eq!(result.points_compared, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn compares_latest_generation_against_actuals() {
        let store = MemoryStore::new();
        let old = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        store.upsert_forecast(&forecast(1, 500.0, "naive_v2", old)).await.unwrap();
        for d in 2..=4 {
            store.upsert_forecast(&forecast(d, 100.0, "naive_v2", new)).await.unwrap();
            store.upsert_forecast(&forecast(d, 300.0, "arima_v1", new)).await.unwrap();
        }
        store.insert_observation(&actual(2, 110)).await.unwrap();
        store.insert_observation(&actual(3, 0)).await.unwrap();
        // Day 4 has no actual and is excluded.

        let engine = EvaluationEngine::new(&store);
        let result = engine
            .evaluate("R1", None, 7, Some("DENGUE"), Some("naive_v2"))
            .await
            .unwrap();
        assert_eq!(result.model_version.as_deref(), Some("naive_v2"));
        assert_eq!(result.points_compared, 2);
        assert_eq!(result.dates_evaluated, vec![day(2), day(3)]);
        assert_eq!(result.mae, Some(55.0));
        assert_eq!(result.mape, Some(9.09));

        let arima = engine
            .evaluate("R1", Some(day(2)), 2, Some("DENGUE"), Some("arima_v1"))
            .await
            .unwrap();
        assert_eq!(arima.points_compared, 2);
        assert_eq!(arima.mae, Some(245.0));
    }

    #[tokio::test]
    async fn monthly_forecasts_score_against_daily_actuals() {
        let store = MemoryStore::new();
        let generated_at = Utc::now();
        for d in 2..=8 {
            let mut f = forecast(d, 100.0, "naive_v2", generated_at);
            f.source_granularity = Granularity::Monthly;
            store.upsert_forecast(&f).await.unwrap();
            store.insert_observation(&actual(d, 90)).await.unwrap();
        }
        // A monthly row on the same date is preferred for a monthly-sourced forecast.
        let mut monthly = actual(2, 100);
        monthly.granularity = Some(Granularity::Monthly);
        store.insert_observation(&monthly).await.unwrap();

        let result = EvaluationEngine::new(&store)
            .evaluate("R1", Some(day(2)), 7, Some("DENGUE"), None)
            .await
            .unwrap();
        assert_eq!(result.points_compared, 7);
        assert_eq!(result.dates_evaluated.first(), Some(&day(2)));
        // Six misses of 10 and one exact hit.
        assert_eq!(result.mae, Some(8.57));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn window_outside_forecasts_reports_error() {
        let store = MemoryStore::new();
        store
            .upsert_forecast(&forecast(1, 10.0, "naive_v2", Utc::now()))
            .await
            .unwrap();
        let result = EvaluationEngine::new(&store)
            .evaluate("R1", Some(day(20)), 7, None, None)
            .await
            .unwrap();
        assert_eq!(result.points_compared, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn compare_models_scores_both_models() {
        let store = MemoryStore::new();
        for d in 1..=20 {
            store.insert_observation(&actual(d, 100 + i64::from(d))).await.unwrap();
        }
        let comparison = EvaluationEngine::new(&store)
            .compare_models(
                "R1",
                day(20),
                &[121.0, 122.0, 123.0],
                Some("DENGUE"),
                Granularity::Daily,
                ArimaSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(comparison.naive_predictions.len(), 3);
        assert_eq!(comparison.arima_predictions.len(), 3);
        assert!(comparison.notes.is_empty());
        let arima = comparison.arima.unwrap();
        let naive = comparison.naive.unwrap();
        assert!(arima.mae < naive.mae);
    }
}
