use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{Alert, BatchReport, RiskScore};
use crate::store::Store;

pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.70;

pub fn reason_for(score: f64, threshold: f64) -> String {
    format!("Risk score {score:.2} >= threshold {threshold:.2}")
}

/// Alerts for every score at or above `threshold`, highest score first.
pub fn alerts_for(
    scores: &[RiskScore],
    threshold: f64,
    created_at: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = scores
        .iter()
        .filter(|s| s.risk_score >= threshold)
        .map(|s| Alert {
            region_id: s.region_id.clone(),
            date: s.date,
            disease: s.disease.clone(),
            risk_score: s.risk_score,
            risk_level: s.risk_level,
            reason: reason_for(s.risk_score, threshold),
            created_at,
        })
        .collect();
    alerts.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
    alerts
}

pub struct AlertEngine<'a> {
    store: &'a dyn Store,
    threshold: f64,
}

impl<'a> AlertEngine<'a> {
    pub fn new(store: &'a dyn Store, threshold: f64) -> Self {
        Self { store, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Thresholds the risk scores for `date` (default: latest scored date).
    /// Upserts by natural key, so repeated runs leave one alert per trigger.
    pub async fn generate(
        &self,
        date: Option<NaiveDate>,
        disease: Option<&str>,
    ) -> Result<(Option<NaiveDate>, BatchReport<Alert>)> {
        let mut report = BatchReport::new();

        let target = match date {
            Some(d) => d,
            None => match self.store.latest_risk_date(disease).await? {
                Some(d) => d,
                None => {
                    warn!(disease = ?disease, "no risk scores found for alert generation");
                    return Ok((None, report));
                }
            },
        };

        let scores = self.store.risk_scores_on(target, disease).await?;
        if scores.is_empty() {
            warn!(date = %target, "no risk scores for date");
            return Ok((Some(target), report));
        }

        info!(date = %target, disease = ?disease, threshold = self.threshold, "generating alerts");
        for alert in alerts_for(&scores, self.threshold, Utc::now()) {
            self.store.upsert_alert(&alert).await?;
            report.records.push(alert);
        }

        info!(alerts = report.records.len(), "alerts generated");
        Ok((Some(target), report))
    }
}
