use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::error::Result;
use crate::forecast;
use crate::models::{DerivedCounts, Granularity};
use crate::risk::{compute_risk_scores, RiskScorer};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkippedCounts {
    pub risk_scores: usize,
    pub forecasts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub disease: String,
    pub execution_date: Option<NaiveDate>,
    pub forecast_date: Option<NaiveDate>,
    /// Derived rows removed before the run, when a reset was requested.
    pub deleted: Option<DerivedCounts>,
    pub created: DerivedCounts,
    pub skipped: SkippedCounts,
    pub total: DerivedCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs climate-adjusted risk scoring, alerting and naive forecasting for one disease.
pub struct Pipeline<'a> {
    store: &'a dyn Store,
    scorer: &'a RiskScorer<'a>,
    alert_threshold: f64,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn Store, scorer: &'a RiskScorer<'a>, alert_threshold: f64) -> Self {
        Self {
            store,
            scorer,
            alert_threshold,
        }
    }

    pub async fn run(
        &self,
        disease: &str,
        reset: bool,
        horizon: u32,
        granularity: Granularity,
    ) -> Result<PipelineSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            disease,
            reset,
            horizon,
            %granularity,
            store = self.store.name(),
            "pipeline started"
        );

        self.store.init().await?;

        let deleted = if reset {
            let counts = self.store.delete_derived(disease).await?;
            info!(
                %run_id,
                risk_scores = counts.risk_scores,
                alerts = counts.alerts,
                forecasts = counts.forecasts,
                "derived data reset"
            );
            Some(counts)
        } else {
            None
        };

        let (execution_date, scores) = compute_risk_scores(
            self.store,
            self.scorer,
            None,
            Some(disease),
            true,
        )
        .await?;

        let alerts = match execution_date {
            Some(date) => {
                AlertEngine::new(self.store, self.alert_threshold)
                    .generate(Some(date), Some(disease))
                    .await?
                    .1
            }
            None => {
                warn!(%run_id, disease, "no execution date, skipping alerts");
                Default::default()
            }
        };

        let (forecast_date, forecasts) =
            forecast::generate_all(self.store, None, Some(disease), horizon, granularity).await?;

        let created = DerivedCounts {
            risk_scores: scores.records.len() as u64,
            alerts: alerts.records.len() as u64,
            forecasts: forecasts.records.len() as u64,
        };
        let skipped = SkippedCounts {
            risk_scores: scores.skipped_count(),
            forecasts: forecasts.skipped_count(),
        };
        let total = self.store.count_derived(Some(disease)).await?;

        info!(
            %run_id,
            risk_scores = created.risk_scores,
            alerts = created.alerts,
            forecasts = created.forecasts,
            skipped_risk = skipped.risk_scores,
            skipped_forecasts = skipped.forecasts,
            "pipeline finished"
        );

        Ok(PipelineSummary {
            run_id,
            disease: disease.to_string(),
            execution_date,
            forecast_date,
            deleted,
            created,
            skipped,
            total,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub async fn status(&self, disease: Option<&str>) -> Result<DerivedCounts> {
        self.store.count_derived(disease).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateAdjuster;
    use crate::ingest::seed;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeded_run_populates_every_stage() {
        let store = MemoryStore::new();
        seed(&store).await.unwrap();
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let pipeline = Pipeline::new(&store, &scorer, 0.70);

        let summary = pipeline.run("DENGUE", false, 7, Granularity::Monthly).await.unwrap();
        assert_eq!(summary.execution_date, NaiveDate::from_ymd_opt(2024, 8, 31));
        assert_eq!(summary.forecast_date, NaiveDate::from_ymd_opt(2024, 8, 1));
        assert_eq!(summary.created.risk_scores, 5);
        assert_eq!(summary.created.forecasts, 5 * 7);
        assert_eq!(summary.total.risk_scores, 5);
        assert_eq!(summary.skipped, SkippedCounts::default());

        // A second run upserts onto the same keys.
        let again = pipeline.run("DENGUE", false, 7, Granularity::Monthly).await.unwrap();
        assert_eq!(again.total, summary.total);
        assert_ne!(again.run_id, summary.run_id);
    }

    #[tokio::test]
    async fn reset_only_touches_the_given_disease() {
        let store = MemoryStore::new();
        seed(&store).await.unwrap();
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let pipeline = Pipeline::new(&store, &scorer, 0.70);

        pipeline.run("DENGUE", false, 3, Granularity::Monthly).await.unwrap();
        let covid = pipeline.run("COVID", false, 3, Granularity::Monthly).await.unwrap();

        let reset = pipeline.run("DENGUE", true, 3, Granularity::Monthly).await.unwrap();
        let deleted = reset.deleted.unwrap();
        assert_eq!(deleted.risk_scores, 5);
        assert_eq!(deleted.forecasts, 15);

        assert_eq!(pipeline.status(Some("COVID")).await.unwrap(), covid.total);
        assert_eq!(pipeline.status(Some("DENGUE")).await.unwrap(), reset.total);
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_run() {
        let store = MemoryStore::new();
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let summary = Pipeline::new(&store, &scorer, 0.70)
            .run("DENGUE", true, 7, Granularity::Monthly)
            .await
            .unwrap();
        assert_eq!(summary.execution_date, None);
        assert_eq!(summary.created, DerivedCounts::default());
        assert_eq!(summary.deleted, Some(DerivedCounts::default()));
    }
}
