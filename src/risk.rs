use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::climate::{ClimateAdjuster, SIGNIFICANT_CHANGE_PCT};
use crate::error::Result;
use crate::metrics::MetricsComputer;
use crate::models::{BatchReport, ClimateInfo, RegionMetrics, RiskLevel, RiskScore};
use crate::store::{ObservationFilter, Store};

pub const HIGH_GROWTH: f64 = 0.30;
pub const HIGH_VOLATILITY: f64 = 0.15;
pub const HIGH_DEATH_RATIO: f64 = 0.02;

/// Composite weights. Each term is clipped to `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub growth: f64,
    pub volatility: f64,
    pub mortality: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            growth: 0.65,
            volatility: 0.25,
            mortality: 0.10,
        }
    }
}

/// Display bands. Alerting uses its own threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            high: 0.70,
            medium: 0.40,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: f64,
    pub level: RiskLevel,
    pub drivers: Vec<String>,
    pub climate: ClimateInfo,
}

pub fn clip01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}

pub struct RiskScorer<'a> {
    climate: &'a ClimateAdjuster,
    weights: ScoringWeights,
    levels: LevelThresholds,
}

impl<'a> RiskScorer<'a> {
    pub fn new(climate: &'a ClimateAdjuster) -> Self {
        Self {
            climate,
            weights: ScoringWeights::default(),
            levels: LevelThresholds::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_levels(mut self, levels: LevelThresholds) -> Self {
        self.levels = levels;
        self
    }

    pub fn base_score(&self, metrics: &RegionMetrics) -> f64 {
        self.weights.growth * clip01(metrics.growth_rate)
            + self.weights.volatility * clip01(metrics.volatility_norm * 2.0)
            + self.weights.mortality * clip01(metrics.death_ratio * 50.0)
    }

    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.levels.high {
            RiskLevel::High
        } else if score >= self.levels.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn score(
        &self,
        metrics: &RegionMetrics,
        date: NaiveDate,
        region_id: &str,
        climate_enabled: bool,
    ) -> ScoreOutcome {
        let base = self.base_score(metrics);
        let mut drivers = Vec::new();

        let (score, climate) = if climate_enabled {
            let adj = self
                .climate
                .apply(base, &date.to_string(), Some(region_id));
            if adj.relative_change_pct(base).abs() > SIGNIFICANT_CHANGE_PCT {
                drivers.push(adj.explanation.clone());
            }
            let info = ClimateInfo::Applied {
                base_risk: base,
                climate_multiplier: adj.multiplier,
                adjusted_risk: adj.adjusted,
                explanation: adj.explanation,
                season: adj.context.season.to_string(),
                is_monsoon: adj.context.is_monsoon,
                zone: adj.zone,
            };
            (adj.adjusted, info)
        } else {
            (base, ClimateInfo::Disabled { base_risk: base })
        };
        let score = clip01(score);

        if metrics.growth_rate >= HIGH_GROWTH {
            drivers.push("High 7-day growth".to_string());
        }
        if metrics.volatility_norm >= HIGH_VOLATILITY {
            drivers.push("High volatility".to_string());
        }
        if metrics.death_ratio >= HIGH_DEATH_RATIO {
            drivers.push("High death ratio".to_string());
        }
        if drivers.is_empty() {
            drivers.push("Stable trend".to_string());
        }

        ScoreOutcome {
            score,
            level: self.level_for(score),
            drivers,
            climate,
        }
    }
}

/// Scores every known region for `date` (default: latest observation) and
/// upserts the results. Regions without observations are skipped.
pub async fn compute_risk_scores(
    store: &dyn Store,
    scorer: &RiskScorer<'_>,
    date: Option<NaiveDate>,
    disease: Option<&str>,
    climate_enabled: bool,
) -> Result<(Option<NaiveDate>, BatchReport<RiskScore>)> {
    let mut report = BatchReport::new();

    let target = match date {
        Some(d) => d,
        None => {
            let filter = ObservationFilter::all().disease(disease);
            match store.latest_observation_date(&filter).await? {
                Some(d) => d,
                None => {
                    warn!(disease = ?disease, "no observations found, nothing to score");
                    return Ok((None, report));
                }
            }
        }
    };

    let regions = store.list_regions(disease).await?;
    info!(
        date = %target,
        disease = ?disease,
        climate_enabled,
        regions = regions.len(),
        "computing risk scores"
    );

    let computer = MetricsComputer::new(store);
    let updated_at = Utc::now();

    for region_id in &regions {
        let Some(metrics) = computer.compute(region_id, disease, target).await? else {
            report.skip(region_id, "no observations on or before date");
            continue;
        };

        let outcome = scorer.score(&metrics, target, region_id, climate_enabled);
        debug!(
            region_id = %region_id,
            base = outcome.climate.base_risk(),
            score = outcome.score,
            "region scored"
        );
        let record = RiskScore {
            region_id: region_id.clone(),
            date: target,
            disease: disease.map(str::to_string),
            risk_score: outcome.score,
            risk_level: outcome.level,
            drivers: outcome.drivers,
            metrics,
            climate_info: outcome.climate,
            updated_at,
        };
        store.upsert_risk_score(&record).await?;
        report.records.push(record);
    }

    if report.skipped_count() > 0 {
        warn!(skipped = report.skipped_count(), "regions skipped due to missing data");
    }

    report.records.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
    info!(computed = report.records.len(), "risk scores computed");
    Ok((Some(target), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseObservation, Region};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn metrics(growth: f64, volatility: f64, death: f64) -> RegionMetrics {
        RegionMetrics {
            region_id: "R1".to_string(),
            window_size: 7,
            today_confirmed: 100,
            past_confirmed: 100,
            today_deaths: 0,
            growth_rate: growth,
            death_ratio: death,
            volatility_norm: volatility,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn seed_scenario(store: &MemoryStore) -> NaiveDate {
        let start = date("2024-03-01");
        let confirmed = [100, 110, 120, 90, 95, 130, 140];
        let deaths = [1, 1, 1, 1, 1, 1, 2];
        store
            .upsert_region(&Region {
                region_id: "R1".to_string(),
                region_name: Some("Region One".to_string()),
                disease: Some("D1".to_string()),
            })
            .await
            .unwrap();
        for i in 0..7 {
            store
                .insert_observation(&CaseObservation {
                    region_id: "R1".to_string(),
                    date: start + Duration::days(i as i64),
                    disease: Some("D1".to_string()),
                    confirmed: confirmed[i],
                    deaths: deaths[i],
                    recovered: 0,
                    granularity: None,
                })
                .await
                .unwrap();
        }
        start + Duration::days(6)
    }

    #[test]
    fn score_is_bounded_and_drivers_never_empty() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let grid = [-5.0, 0.0, 0.1, 0.3, 0.8, 3.0, 50.0];
        for g in grid {
            for v in grid {
                for d in [0.0, 0.01, 0.02, 1.0] {
                    for month in ["2024-01-10", "2024-07-10"] {
                        for climate_enabled in [true, false] {
                            let out =
                                scorer.score(&metrics(g, v, d), date(month), "R1", climate_enabled);
                            assert!((0.0..=1.0).contains(&out.score));
                            assert!(!out.drivers.is_empty());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn sub_terms_are_clipped_before_weighting() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let out = scorer.score(&metrics(10.0, 0.0, 0.0), date("2024-05-10"), "R1", false);
        assert!((out.score - 0.65).abs() < 1e-12);
        let max = scorer.score(&metrics(10.0, 10.0, 10.0), date("2024-05-10"), "R1", false);
        assert!((max.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stable_metrics_report_stable_trend() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let out = scorer.score(&metrics(0.05, 0.05, 0.0), date("2024-05-10"), "R1", true);
        assert_eq!(out.drivers, vec!["Stable trend".to_string()]);
        assert_eq!(out.level, RiskLevel::Low);
    }

    #[test]
    fn climate_driver_only_added_for_significant_change() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);

        let july = scorer.score(&metrics(0.2, 0.05, 0.0), date("2024-07-10"), "R1", true);
        assert!(july.drivers[0].starts_with("Climate boost"));
        assert!(matches!(july.climate, ClimateInfo::Applied { is_monsoon: true, .. }));

        let may = scorer.score(&metrics(0.2, 0.05, 0.0), date("2024-05-10"), "R1", true);
        assert!(may.drivers.iter().all(|d| !d.contains("limate")));
    }

    #[test]
    fn level_uses_final_adjusted_score() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        // base 0.5 -> MEDIUM, July boost x1.8 -> 0.9 -> HIGH
        let m = metrics(0.5 / 0.65, 0.0, 0.0);
        let plain = scorer.score(&m, date("2024-07-10"), "R1", false);
        assert_eq!(plain.level, RiskLevel::Medium);
        let boosted = scorer.score(&m, date("2024-07-10"), "R1", true);
        assert_eq!(boosted.level, RiskLevel::High);
        assert!((boosted.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn custom_weights_and_levels_apply() {
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate)
            .with_weights(ScoringWeights {
                growth: 1.0,
                volatility: 0.0,
                mortality: 0.0,
            })
            .with_levels(LevelThresholds {
                high: 0.9,
                medium: 0.2,
            });
        let out = scorer.score(&metrics(0.5, 0.9, 0.9), date("2024-05-10"), "R1", false);
        assert!((out.score - 0.5).abs() < 1e-12);
        assert_eq!(out.level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn end_to_end_scenario_is_deterministic() {
        let store = MemoryStore::new();
        let last = seed_scenario(&store).await;
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);

        let (resolved, first) = compute_risk_scores(&store, &scorer, None, Some("D1"), false)
            .await
            .unwrap();
        assert_eq!(resolved, Some(last));
        assert_eq!(first.records.len(), 1);

        let score = &first.records[0];
        assert!((score.metrics.growth_rate - 0.40).abs() < 1e-12);
        let expected = 0.65 * 0.40
            + 0.25 * clip01(score.metrics.volatility_norm * 2.0)
            + 0.10 * clip01(score.metrics.death_ratio * 50.0);
        assert!((score.risk_score - expected).abs() < 1e-12);
        assert!((score.risk_score - 0.4147).abs() < 1e-3);
        assert_eq!(score.risk_level, RiskLevel::Medium);
        assert_eq!(
            score.drivers,
            vec!["High 7-day growth".to_string(), "High volatility".to_string()]
        );

        let (_, second) = compute_risk_scores(&store, &scorer, Some(last), Some("D1"), false)
            .await
            .unwrap();
        assert_eq!(second.records[0].risk_score, score.risk_score);
        assert_eq!(store.count_derived(Some("D1")).await.unwrap().risk_scores, 1);
    }

    #[tokio::test]
    async fn regions_without_data_are_skipped_not_fatal() {
        let store = MemoryStore::new();
        seed_scenario(&store).await;
        store
            .upsert_region(&Region {
                region_id: "R2".to_string(),
                region_name: None,
                disease: Some("D1".to_string()),
            })
            .await
            .unwrap();
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);

        let (_, report) = compute_risk_scores(&store, &scorer, None, Some("D1"), true)
            .await
            .unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.skipped[0].region_id, "R2");
    }

    #[tokio::test]
    async fn empty_store_is_a_soft_result() {
        let store = MemoryStore::new();
        let climate = ClimateAdjuster::default();
        let scorer = RiskScorer::new(&climate);
        let (date, report) = compute_risk_scores(&store, &scorer, None, None, true)
            .await
            .unwrap();
        assert!(date.is_none());
        assert!(report.records.is_empty());
    }
}
