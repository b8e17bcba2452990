use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use super::{forecast_dates, load_history, profile_for, resolve_target_date};
use crate::error::Result;
use crate::metrics::mean;
use crate::models::{BatchReport, CaseObservation, Forecast, Granularity, Outcome};
use crate::store::Store;

pub const NAIVE_MODEL_VERSION: &str = "naive_v2";

/// Half-width of the naive interval as a fraction of the mean.
const INTERVAL_FRACTION: f64 = 0.10;

/// Flat forecast at the mean of `history`, repeated for each horizon day.
pub fn naive_forecast(
    region_id: &str,
    disease: Option<&str>,
    history: &[CaseObservation],
    target: NaiveDate,
    horizon: u32,
    granularity: Granularity,
    generated_at: DateTime<Utc>,
) -> Outcome<Vec<Forecast>> {
    if history.is_empty() {
        return Outcome::Skipped(format!("no {granularity} history"));
    }

    let confirmed: Vec<f64> = history.iter().map(|o| o.confirmed as f64).collect();
    let pred_mean = mean(&confirmed).max(0.0);
    let pred_lower = pred_mean * (1.0 - INTERVAL_FRACTION);
    let pred_upper = pred_mean * (1.0 + INTERVAL_FRACTION);

    let forecasts = forecast_dates(target, horizon)
        .map(|date| Forecast {
            region_id: region_id.to_string(),
            date,
            disease: disease.map(str::to_string),
            pred_mean,
            pred_lower,
            pred_upper,
            model_version: NAIVE_MODEL_VERSION.to_string(),
            generated_at,
            source_granularity: granularity,
            model_order: None,
        })
        .collect();
    Outcome::Done(forecasts)
}

pub async fn generate_all(
    store: &dyn Store,
    date: Option<NaiveDate>,
    disease: Option<&str>,
    horizon: u32,
    granularity: Granularity,
) -> Result<(Option<NaiveDate>, BatchReport<Forecast>)> {
    let mut report = BatchReport::new();
    let Some(target) = resolve_target_date(store, date, disease, granularity).await? else {
        return Ok((None, report));
    };

    let regions = store.list_regions(disease).await?;
    let lookback = profile_for(granularity).naive_lookback;
    info!(
        date = %target,
        horizon,
        disease = ?disease,
        %granularity,
        regions = regions.len(),
        "generating naive forecasts"
    );

    let generated_at = Utc::now();
    for region_id in &regions {
        let history =
            load_history(store, region_id, disease, granularity, target, lookback).await?;
        let outcome = naive_forecast(
            region_id,
            disease,
            &history,
            target,
            horizon,
            granularity,
            generated_at,
        );
        match outcome {
            Outcome::Done(forecasts) => {
                for forecast in &forecasts {
                    store.upsert_forecast(forecast).await?;
                }
                report.records.extend(forecasts);
            }
            Outcome::Skipped(reason) => report.skip(region_id, reason),
        }
    }

    if report.skipped_count() > 0 {
        warn!(skipped = report.skipped_count(), "regions skipped due to missing data");
    }
    report
        .records
        .sort_by(|a, b| (&a.region_id, a.date).cmp(&(&b.region_id, b.date)));
    info!(records = report.records.len(), %granularity, "naive forecasts generated");
    Ok((Some(target), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;
    use crate::store::MemoryStore;

    fn monthly(region: &str, month: u32, confirmed: i64) -> CaseObservation {
        CaseObservation {
            region_id: region.to_string(),
            date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            disease: Some("DENGUE".to_string()),
            confirmed,
            deaths: 0,
            recovered: 0,
            granularity: Some(Granularity::Monthly),
        }
    }

    async fn region(store: &MemoryStore, id: &str) {
        store
            .upsert_region(&Region {
                region_id: id.to_string(),
                region_name: None,
                disease: Some("DENGUE".to_string()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn monthly_scenario_uses_six_point_mean() {
        let store = MemoryStore::new();
        region(&store, "R1").await;
        // An older point that falls outside the six-month lookback.
        store.insert_observation(&monthly("R1", 1, 10_000)).await.unwrap();
        for (i, c) in [100, 110, 120, 90, 95, 130].into_iter().enumerate() {
            store.insert_observation(&monthly("R1", i as u32 + 2, c)).await.unwrap();
        }

        let (date, report) = generate_all(&store, None, Some("DENGUE"), 7, Granularity::Monthly)
            .await
            .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 7, 1));
        assert_eq!(report.records.len(), 7);
        for f in &report.records {
            assert!((f.pred_mean - 107.5).abs() < 1e-9);
            assert!((f.pred_lower - 96.75).abs() < 1e-9);
            assert!((f.pred_upper - 118.25).abs() < 1e-9);
            assert_eq!(f.model_version, NAIVE_MODEL_VERSION);
            assert_eq!(f.source_granularity, Granularity::Monthly);
        }
        assert_eq!(report.records[0].date, NaiveDate::from_ymd_opt(2023, 7, 2).unwrap());
    }

    #[tokio::test]
    async fn regions_without_history_are_counted() {
        let store = MemoryStore::new();
        region(&store, "R1").await;
        region(&store, "R2").await;
        store.insert_observation(&monthly("R1", 1, 50)).await.unwrap();

        let (_, report) = generate_all(&store, None, Some("DENGUE"), 3, Granularity::Monthly)
            .await
            .unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.skipped[0].region_id, "R2");
    }

    #[tokio::test]
    async fn rerun_overwrites_same_keys() {
        let store = MemoryStore::new();
        region(&store, "R1").await;
        store.insert_observation(&monthly("R1", 1, 50)).await.unwrap();

        for _ in 0..2 {
            generate_all(&store, None, Some("DENGUE"), 5, Granularity::Monthly)
                .await
                .unwrap();
        }
        assert_eq!(store.count_derived(Some("DENGUE")).await.unwrap().forecasts, 5);
    }

    #[test]
    fn empty_history_is_skipped() {
        let target = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let out = naive_forecast("R1", None, &[], target, 7, Granularity::Weekly, Utc::now());
        assert!(matches!(out, Outcome::Skipped(_)));
    }
}
