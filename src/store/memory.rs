use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::{disease_matches, ObservationFilter, Store};
use crate::error::Result;
use crate::models::{
    Alert, AlertKey, CaseObservation, DerivedCounts, Forecast, ForecastKey, Hotspot,
    ObservationKey, Region, RiskKey, RiskScore,
};

#[derive(Debug, Default)]
struct Tables {
    regions: BTreeMap<(String, Option<String>), Region>,
    observations: BTreeMap<ObservationKey, CaseObservation>,
    risk_scores: BTreeMap<RiskKey, RiskScore>,
    alerts: BTreeMap<AlertKey, Alert>,
    forecasts: BTreeMap<ForecastKey, Forecast>,
}

/// In-memory store keyed by the same natural keys as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_region(&self, region: &Region) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let key = (region.region_id.clone(), region.disease.clone());
        match tables.regions.get_mut(&key) {
            Some(existing) => {
                if region.region_name.is_some() {
                    existing.region_name = region.region_name.clone();
                }
                Ok(false)
            }
            None => {
                tables.regions.insert(key, region.clone());
                Ok(true)
            }
        }
    }

    async fn insert_observation(&self, obs: &CaseObservation) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let key = obs.key();
        if tables.observations.contains_key(&key) {
            return Ok(false);
        }
        tables.observations.insert(key, obs.clone());
        Ok(true)
    }

    async fn list_regions(&self, disease: Option<&str>) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        let ids: BTreeSet<String> = tables
            .regions
            .values()
            .filter(|r| disease_matches(disease, r.disease.as_deref()))
            .map(|r| r.region_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn latest_observation_date(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Option<NaiveDate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .observations
            .values()
            .filter(|obs| filter.matches(obs))
            .map(|obs| obs.date)
            .max())
    }

    async fn recent_observations(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<CaseObservation>> {
        let tables = self.tables.read().await;
        let mut matching: Vec<CaseObservation> = tables
            .observations
            .values()
            .filter(|obs| filter.matches(obs))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date));
        matching.truncate(limit);
        matching.reverse();
        Ok(matching)
    }

    async fn upsert_risk_score(&self, score: &RiskScore) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.risk_scores.insert(score.key(), score.clone());
        Ok(())
    }

    async fn latest_risk_date(&self, disease: Option<&str>) -> Result<Option<NaiveDate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .risk_scores
            .values()
            .filter(|s| disease_matches(disease, s.disease.as_deref()))
            .map(|s| s.date)
            .max())
    }

    async fn risk_scores_on(
        &self,
        date: NaiveDate,
        disease: Option<&str>,
    ) -> Result<Vec<RiskScore>> {
        let tables = self.tables.read().await;
        Ok(tables
            .risk_scores
            .values()
            .filter(|s| s.date == date && disease_matches(disease, s.disease.as_deref()))
            .cloned()
            .collect())
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.alerts.insert(alert.key(), alert.clone());
        Ok(())
    }

    async fn alerts_on(&self, date: NaiveDate, disease: Option<&str>) -> Result<Vec<Alert>> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .values()
            .filter(|a| a.date == date && disease_matches(disease, a.disease.as_deref()))
            .cloned()
            .collect())
    }

    async fn upsert_forecast(&self, forecast: &Forecast) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.forecasts.insert(forecast.key(), forecast.clone());
        Ok(())
    }

    async fn forecasts_for_region(
        &self,
        region_id: &str,
        disease: Option<&str>,
        model_version: Option<&str>,
    ) -> Result<Vec<Forecast>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Forecast> = tables
            .forecasts
            .values()
            .filter(|f| {
                f.region_id == region_id
                    && disease_matches(disease, f.disease.as_deref())
                    && model_version.map_or(true, |v| f.model_version == v)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(found)
    }

    async fn delete_derived(&self, disease: &str) -> Result<DerivedCounts> {
        let mut tables = self.tables.write().await;
        let tagged = |value: &Option<String>| value.as_deref() == Some(disease);

        let before = (
            tables.risk_scores.len(),
            tables.alerts.len(),
            tables.forecasts.len(),
        );
        tables.risk_scores.retain(|_, s| !tagged(&s.disease));
        tables.alerts.retain(|_, a| !tagged(&a.disease));
        tables.forecasts.retain(|_, f| !tagged(&f.disease));

        Ok(DerivedCounts {
            risk_scores: (before.0 - tables.risk_scores.len()) as u64,
            alerts: (before.1 - tables.alerts.len()) as u64,
            forecasts: (before.2 - tables.forecasts.len()) as u64,
        })
    }

    async fn count_derived(&self, disease: Option<&str>) -> Result<DerivedCounts> {
        let tables = self.tables.read().await;
        Ok(DerivedCounts {
            risk_scores: tables
                .risk_scores
                .values()
                .filter(|s| disease_matches(disease, s.disease.as_deref()))
                .count() as u64,
            alerts: tables
                .alerts
                .values()
                .filter(|a| disease_matches(disease, a.disease.as_deref()))
                .count() as u64,
            forecasts: tables
                .forecasts
                .values()
                .filter(|f| disease_matches(disease, f.disease.as_deref()))
                .count() as u64,
        })
    }

    async fn hotspots(&self, limit: usize, disease: Option<&str>) -> Result<Vec<Hotspot>> {
        let tables = self.tables.read().await;
        let mut totals: BTreeMap<String, Hotspot> = BTreeMap::new();

        for obs in tables
            .observations
            .values()
            .filter(|o| disease_matches(disease, o.disease.as_deref()))
        {
            let entry = totals.entry(obs.region_id.clone()).or_insert_with(|| Hotspot {
                region_id: obs.region_id.clone(),
                region_name: None,
                confirmed_sum: 0,
                deaths_sum: 0,
                latest_date: obs.date,
            });
            entry.confirmed_sum += obs.confirmed;
            entry.deaths_sum += obs.deaths;
            entry.latest_date = entry.latest_date.max(obs.date);
        }

        for region in tables.regions.values() {
            if let Some(spot) = totals.get_mut(&region.region_id) {
                if spot.region_name.is_none() {
                    spot.region_name = region.region_name.clone();
                }
            }
        }

        let mut ranked: Vec<Hotspot> = totals.into_values().collect();
        ranked.sort_by(|a, b| b.confirmed_sum.cmp(&a.confirmed_sum));
        ranked.truncate(limit);
        Ok(ranked)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
