use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{GranularityFilter, ObservationFilter, Store};
use crate::error::Result;
use crate::models::{
    Alert, CaseObservation, ClimateInfo, DerivedCounts, Forecast, Granularity, Hotspot, Region,
    RegionMetrics, RiskScore,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to Postgres");
        Ok(Self { pool })
    }
}

fn disease_col(disease: Option<&str>) -> &str {
    disease.unwrap_or("")
}

fn granularity_col(granularity: Option<Granularity>) -> &'static str {
    granularity.map_or("", |g| g.as_str())
}

fn granularity_bind(filter: GranularityFilter) -> Option<&'static str> {
    match filter {
        GranularityFilter::Any => None,
        GranularityFilter::Untagged => Some(""),
        GranularityFilter::Exactly(g) => Some(g.as_str()),
    }
}

fn optional(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn observation_from_row(row: &PgRow) -> Result<CaseObservation> {
    let granularity: String = row.try_get("granularity")?;
    Ok(CaseObservation {
        region_id: row.try_get("region_id")?,
        date: row.try_get("date")?,
        disease: optional(row.try_get("disease")?),
        confirmed: row.try_get("confirmed")?,
        deaths: row.try_get("deaths")?,
        recovered: row.try_get("recovered")?,
        granularity: match granularity.as_str() {
            "" => None,
            tag => Some(tag.parse()?),
        },
    })
}

fn risk_score_from_row(row: &PgRow) -> Result<RiskScore> {
    let level: String = row.try_get("risk_level")?;
    let metrics: Json<RegionMetrics> = row.try_get("metrics")?;
    let climate: Json<ClimateInfo> = row.try_get("climate_info")?;
    Ok(RiskScore {
        region_id: row.try_get("region_id")?,
        date: row.try_get("date")?,
        disease: optional(row.try_get("disease")?),
        risk_score: row.try_get("risk_score")?,
        risk_level: level.parse()?,
        drivers: row.try_get("drivers")?,
        metrics: metrics.0,
        climate_info: climate.0,
        updated_at: row.try_get("updated_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let level: String = row.try_get("risk_level")?;
    Ok(Alert {
        region_id: row.try_get("region_id")?,
        date: row.try_get("date")?,
        disease: optional(row.try_get("disease")?),
        risk_score: row.try_get("risk_score")?,
        risk_level: level.parse()?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn forecast_from_row(row: &PgRow) -> Result<Forecast> {
    let granularity: String = row.try_get("source_granularity")?;
    Ok(Forecast {
        region_id: row.try_get("region_id")?,
        date: row.try_get("date")?,
        disease: optional(row.try_get("disease")?),
        pred_mean: row.try_get("pred_mean")?,
        pred_lower: row.try_get("pred_lower")?,
        pred_upper: row.try_get("pred_upper")?,
        model_version: row.try_get("model_version")?,
        generated_at: row.try_get("generated_at")?,
        source_granularity: granularity.parse()?,
        model_order: row.try_get("model_order")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn init(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn upsert_region(&self, region: &Region) -> Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO outbreak_watch.regions (region_id, disease, region_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (region_id, disease) DO UPDATE
            SET region_name = COALESCE(EXCLUDED.region_name, regions.region_name)
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&region.region_id)
        .bind(disease_col(region.disease.as_deref()))
        .bind(&region.region_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("inserted")?)
    }

    async fn insert_observation(&self, obs: &CaseObservation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbreak_watch.cases
            (region_id, date, disease, granularity, confirmed, deaths, recovered)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (region_id, date, disease, granularity) DO NOTHING
            "#,
        )
        .bind(&obs.region_id)
        .bind(obs.date)
        .bind(disease_col(obs.disease.as_deref()))
        .bind(granularity_col(obs.granularity))
        .bind(obs.confirmed)
        .bind(obs.deaths)
        .bind(obs.recovered)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_regions(&self, disease: Option<&str>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT region_id FROM outbreak_watch.regions
            WHERE ($1::text IS NULL OR disease = $1)
            ORDER BY region_id
            "#,
        )
        .bind(disease)
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("region_id")?);
        }
        Ok(ids)
    }

    async fn latest_observation_date(
        &self,
        filter: &ObservationFilter,
    ) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(date) AS latest FROM outbreak_watch.cases
            WHERE ($1::text IS NULL OR region_id = $1)
              AND ($2::text IS NULL OR disease = $2)
              AND ($3::text IS NULL OR granularity = $3)
              AND ($4::date IS NULL OR date <= $4)
            "#,
        )
        .bind(filter.region_id.as_deref())
        .bind(filter.disease.as_deref())
        .bind(granularity_bind(filter.granularity))
        .bind(filter.on_or_before)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("latest")?)
    }

    async fn recent_observations(
        &self,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<CaseObservation>> {
        let rows = sqlx::query(
            r#"
            SELECT region_id, date, disease, granularity, confirmed, deaths, recovered
            FROM outbreak_watch.cases
            WHERE ($1::text IS NULL OR region_id = $1)
              AND ($2::text IS NULL OR disease = $2)
              AND ($3::text IS NULL OR granularity = $3)
              AND ($4::date IS NULL OR date <= $4)
            ORDER BY date DESC
            LIMIT $5
            "#,
        )
        .bind(filter.region_id.as_deref())
        .bind(filter.disease.as_deref())
        .bind(granularity_bind(filter.granularity))
        .bind(filter.on_or_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            observations.push(observation_from_row(row)?);
        }
        Ok(observations)
    }

    async fn upsert_risk_score(&self, score: &RiskScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbreak_watch.risk_scores
            (region_id, date, disease, risk_score, risk_level, drivers, metrics, climate_info,
             updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (region_id, date, disease) DO UPDATE
            SET risk_score = EXCLUDED.risk_score,
                risk_level = EXCLUDED.risk_level,
                drivers = EXCLUDED.drivers,
                metrics = EXCLUDED.metrics,
                climate_info = EXCLUDED.climate_info,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&score.region_id)
        .bind(score.date)
        .bind(disease_col(score.disease.as_deref()))
        .bind(score.risk_score)
        .bind(score.risk_level.as_str())
        .bind(&score.drivers)
        .bind(Json(&score.metrics))
        .bind(Json(&score.climate_info))
        .bind(score.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_risk_date(&self, disease: Option<&str>) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(date) AS latest FROM outbreak_watch.risk_scores
            WHERE ($1::text IS NULL OR disease = $1)
            "#,
        )
        .bind(disease)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("latest")?)
    }

    async fn risk_scores_on(
        &self,
        date: NaiveDate,
        disease: Option<&str>,
    ) -> Result<Vec<RiskScore>> {
        let rows = sqlx::query(
            r#"
            SELECT region_id, date, disease, risk_score, risk_level, drivers, metrics,
                   climate_info, updated_at
            FROM outbreak_watch.risk_scores
            WHERE date = $1 AND ($2::text IS NULL OR disease = $2)
            ORDER BY risk_score DESC
            "#,
        )
        .bind(date)
        .bind(disease)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(risk_score_from_row).collect()
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbreak_watch.alerts
            (region_id, date, disease, reason, risk_score, risk_level, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (region_id, date, disease, reason) DO UPDATE
            SET risk_score = EXCLUDED.risk_score,
                risk_level = EXCLUDED.risk_level,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&alert.region_id)
        .bind(alert.date)
        .bind(disease_col(alert.disease.as_deref()))
        .bind(&alert.reason)
        .bind(alert.risk_score)
        .bind(alert.risk_level.as_str())
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn alerts_on(&self, date: NaiveDate, disease: Option<&str>) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT region_id, date, disease, reason, risk_score, risk_level, created_at
            FROM outbreak_watch.alerts
            WHERE date = $1 AND ($2::text IS NULL OR disease = $2)
            ORDER BY risk_score DESC
            "#,
        )
        .bind(date)
        .bind(disease)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn upsert_forecast(&self, forecast: &Forecast) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbreak_watch.forecasts
            (region_id, date, disease, model_version, pred_mean, pred_lower, pred_upper,
             generated_at, source_granularity, model_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (region_id, date, disease, model_version) DO UPDATE
            SET pred_mean = EXCLUDED.pred_mean,
                pred_lower = EXCLUDED.pred_lower,
                pred_upper = EXCLUDED.pred_upper,
                generated_at = EXCLUDED.generated_at,
                source_granularity = EXCLUDED.source_granularity,
                model_order = EXCLUDED.model_order
            "#,
        )
        .bind(&forecast.region_id)
        .bind(forecast.date)
        .bind(disease_col(forecast.disease.as_deref()))
        .bind(&forecast.model_version)
        .bind(forecast.pred_mean)
        .bind(forecast.pred_lower)
        .bind(forecast.pred_upper)
        .bind(forecast.generated_at)
        .bind(forecast.source_granularity.as_str())
        .bind(&forecast.model_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn forecasts_for_region(
        &self,
        region_id: &str,
        disease: Option<&str>,
        model_version: Option<&str>,
    ) -> Result<Vec<Forecast>> {
        let rows = sqlx::query(
            r#"
            SELECT region_id, date, disease, model_version, pred_mean, pred_lower, pred_upper,
                   generated_at, source_granularity, model_order
            FROM outbreak_watch.forecasts
            WHERE region_id = $1
              AND ($2::text IS NULL OR disease = $2)
              AND ($3::text IS NULL OR model_version = $3)
            ORDER BY date ASC
            "#,
        )
        .bind(region_id)
        .bind(disease)
        .bind(model_version)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(forecast_from_row).collect()
    }

    async fn delete_derived(&self, disease: &str) -> Result<DerivedCounts> {
        let mut tx = self.pool.begin().await?;
        let risk = sqlx::query("DELETE FROM outbreak_watch.risk_scores WHERE disease = $1")
            .bind(disease)
            .execute(&mut *tx)
            .await?;
        let alerts = sqlx::query("DELETE FROM outbreak_watch.alerts WHERE disease = $1")
            .bind(disease)
            .execute(&mut *tx)
            .await?;
        let forecasts = sqlx::query("DELETE FROM outbreak_watch.forecasts WHERE disease = $1")
            .bind(disease)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(DerivedCounts {
            risk_scores: risk.rows_affected(),
            alerts: alerts.rows_affected(),
            forecasts: forecasts.rows_affected(),
        })
    }

    async fn count_derived(&self, disease: Option<&str>) -> Result<DerivedCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM outbreak_watch.risk_scores
                  WHERE ($1::text IS NULL OR disease = $1)) AS risk_scores,
                (SELECT COUNT(*) FROM outbreak_watch.alerts
                  WHERE ($1::text IS NULL OR disease = $1)) AS alerts,
                (SELECT COUNT(*) FROM outbreak_watch.forecasts
                  WHERE ($1::text IS NULL OR disease = $1)) AS forecasts
            "#,
        )
        .bind(disease)
        .fetch_one(&self.pool)
        .await?;

        let risk_scores: i64 = row.try_get("risk_scores")?;
        let alerts: i64 = row.try_get("alerts")?;
        let forecasts: i64 = row.try_get("forecasts")?;
        Ok(DerivedCounts {
            risk_scores: risk_scores.max(0) as u64,
            alerts: alerts.max(0) as u64,
            forecasts: forecasts.max(0) as u64,
        })
    }

    async fn hotspots(&self, limit: usize, disease: Option<&str>) -> Result<Vec<Hotspot>> {
        let rows = sqlx::query(
            r#"
            SELECT c.region_id,
                   MAX(r.region_name) AS region_name,
                   SUM(c.confirmed)::BIGINT AS confirmed_sum,
                   SUM(c.deaths)::BIGINT AS deaths_sum,
                   MAX(c.date) AS latest_date
            FROM outbreak_watch.cases c
            LEFT JOIN (
                SELECT region_id, MAX(region_name) AS region_name
                FROM outbreak_watch.regions
                GROUP BY region_id
            ) r ON r.region_id = c.region_id
            WHERE ($1::text IS NULL OR c.disease = $1)
            GROUP BY c.region_id
            ORDER BY confirmed_sum DESC, c.region_id
            LIMIT $2
            "#,
        )
        .bind(disease)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut spots = Vec::with_capacity(rows.len());
        for row in rows {
            spots.push(Hotspot {
                region_id: row.try_get("region_id")?,
                region_name: row.try_get("region_name")?,
                confirmed_sum: row.try_get("confirmed_sum")?,
                deaths_sum: row.try_get("deaths_sum")?,
                latest_date: row.try_get("latest_date")?,
            });
        }
        Ok(spots)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_columns_round_trip_as_empty_strings() {
        assert_eq!(disease_col(None), "");
        assert_eq!(optional(String::new()), None);
        assert_eq!(optional("DENGUE".to_string()), Some("DENGUE".to_string()));
        assert_eq!(granularity_col(None), "");
        assert_eq!(granularity_col(Some(Granularity::Weekly)), "weekly");
    }

    #[test]
    fn granularity_filter_binds() {
        assert_eq!(granularity_bind(GranularityFilter::Any), None);
        assert_eq!(granularity_bind(GranularityFilter::Untagged), Some(""));
        assert_eq!(
            granularity_bind(GranularityFilter::for_requested(Granularity::Monthly)),
            Some("monthly")
        );
    }
}
