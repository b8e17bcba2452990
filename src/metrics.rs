use chrono::NaiveDate;
use tracing::debug;

use crate::error::Result;
use crate::models::{CaseObservation, RegionMetrics};
use crate::store::{ObservationFilter, Store};

/// Trailing observations considered per region.
pub const METRICS_WINDOW: usize = 7;

/// Division that yields 0 instead of an infinity or NaN for a ~0 denominator.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < 1e-10 {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for fewer than two points.
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Derives indicators from a window sorted by ascending date.
pub fn derive_metrics(region_id: &str, window: &[CaseObservation]) -> Option<RegionMetrics> {
    let first = window.first()?;
    let last = window.last()?;

    let confirmed: Vec<f64> = window.iter().map(|o| o.confirmed as f64).collect();
    let today_confirmed = last.confirmed;
    let past_confirmed = first.confirmed;

    let growth_rate = safe_divide(
        (today_confirmed - past_confirmed) as f64,
        past_confirmed.max(1) as f64,
    );
    let death_ratio = safe_divide(last.deaths as f64, today_confirmed.max(1) as f64);
    let volatility_norm = safe_divide(sample_stdev(&confirmed), mean(&confirmed).max(1.0));

    Some(RegionMetrics {
        region_id: region_id.to_string(),
        window_size: window.len(),
        today_confirmed,
        past_confirmed,
        today_deaths: last.deaths,
        growth_rate,
        death_ratio,
        volatility_norm,
    })
}

pub struct MetricsComputer<'a> {
    store: &'a dyn Store,
}

impl<'a> MetricsComputer<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// `Ok(None)` when the region has no observations on or before `as_of`.
    pub async fn compute(
        &self,
        region_id: &str,
        disease: Option<&str>,
        as_of: NaiveDate,
    ) -> Result<Option<RegionMetrics>> {
        let filter = ObservationFilter::all()
            .region(region_id)
            .disease(disease)
            .on_or_before(Some(as_of));
        let window = self.store.recent_observations(&filter, METRICS_WINDOW).await?;
        if window.is_empty() {
            debug!(region = region_id, "no observations for metrics window");
            return Ok(None);
        }
        Ok(derive_metrics(region_id, &window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn series(confirmed: &[i64], deaths: &[i64]) -> Vec<CaseObservation> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        confirmed
            .iter()
            .zip(deaths)
            .enumerate()
            .map(|(i, (c, d))| CaseObservation {
                region_id: "R1".to_string(),
                date: start + Duration::days(i as i64),
                disease: Some("D1".to_string()),
                confirmed: *c,
                deaths: *d,
                recovered: 0,
                granularity: None,
            })
            .collect()
    }

    #[test]
    fn safe_divide_guards_zero() {
        assert_eq!(safe_divide(5.0, 0.0), 0.0);
        assert_eq!(safe_divide(5.0, 2.0), 2.5);
    }

    #[test]
    fn stdev_matches_sample_definition() {
        assert_eq!(sample_stdev(&[3.0]), 0.0);
        assert!((sample_stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138).abs() < 0.001);
    }

    #[test]
    fn derives_growth_mortality_and_volatility() {
        let window = series(&[100, 110, 120, 90, 95, 130, 140], &[1, 1, 1, 1, 1, 1, 2]);
        let metrics = derive_metrics("R1", &window).unwrap();
        assert_eq!(metrics.window_size, 7);
        assert!((metrics.growth_rate - 0.40).abs() < 1e-12);
        assert!((metrics.death_ratio - 2.0 / 140.0).abs() < 1e-12);
        assert!((metrics.volatility_norm - 0.166_541_53).abs() < 1e-6);
    }

    #[test]
    fn zero_counts_do_not_produce_infinities() {
        let window = series(&[0, 0, 0], &[0, 0, 3]);
        let metrics = derive_metrics("R1", &window).unwrap();
        assert_eq!(metrics.growth_rate, 0.0);
        assert_eq!(metrics.volatility_norm, 0.0);
        assert_eq!(metrics.death_ratio, 3.0);
        assert!(metrics.growth_rate.is_finite() && metrics.death_ratio.is_finite());
    }

    #[test]
    fn growth_from_zero_uses_floor_of_one() {
        let window = series(&[0, 5], &[0, 0]);
        let metrics = derive_metrics("R1", &window).unwrap();
        assert_eq!(metrics.growth_rate, 5.0);
    }

    #[test]
    fn empty_window_yields_none() {
        assert!(derive_metrics("R1", &[]).is_none());
    }

    #[tokio::test]
    async fn compute_uses_last_seven_on_or_before_date() {
        let store = MemoryStore::new();
        let rows = series(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], &[0; 10]);
        for row in &rows {
            store.insert_observation(row).await.unwrap();
        }
        let computer = MetricsComputer::new(&store);

        let metrics = computer
            .compute("R1", Some("D1"), rows[8].date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.window_size, 7);
        assert_eq!(metrics.past_confirmed, 3);
        assert_eq!(metrics.today_confirmed, 9);

        assert!(computer
            .compute("R1", Some("OTHER"), rows[8].date)
            .await
            .unwrap()
            .is_none());
    }
}
