use std::io;
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::climate::SeasonalTable;
use crate::error::{PipelineError, Result};
use crate::models::{parse_date, CaseObservation, Granularity, Region};
use crate::store::Store;

#[derive(Debug, Deserialize)]
struct CaseRow {
    region_id: String,
    region_name: Option<String>,
    date: String,
    disease: Option<String>,
    confirmed: i64,
    deaths: i64,
    recovered: i64,
    granularity: Option<String>,
}

impl CaseRow {
    fn into_parts(self) -> Result<(Region, CaseObservation)> {
        let disease = self
            .disease
            .map(|d| d.trim().to_ascii_uppercase())
            .filter(|d| !d.is_empty());
        let granularity = self
            .granularity
            .filter(|g| !g.trim().is_empty())
            .map(|g| g.parse::<Granularity>())
            .transpose()?;
        let region = Region {
            region_id: self.region_id.trim().to_string(),
            region_name: self.region_name.filter(|n| !n.trim().is_empty()),
            disease: disease.clone(),
        };
        let observation = CaseObservation {
            region_id: region.region_id.clone(),
            date: parse_date(&self.date)?,
            disease,
            confirmed: self.confirmed,
            deaths: self.deaths,
            recovered: self.recovered,
            granularity,
        };
        Ok((region, observation))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    pub regions_inserted: usize,
    pub observations_inserted: usize,
    pub rejected: usize,
}

pub async fn import_csv(store: &dyn Store, path: &Path) -> Result<ImportSummary> {
    let file = std::fs::File::open(path)?;
    let summary = import_reader(store, file).await?;
    info!(path = %path.display(), ?summary, "csv import finished");
    Ok(summary)
}

/// Rows with negative counts or an empty region id are rejected and counted.
pub async fn import_reader<R: io::Read>(store: &dyn Store, reader: R) -> Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut summary = ImportSummary::default();

    let rows: Vec<CaseRow> = reader.deserialize().collect::<std::result::Result<_, _>>()?;
    for row in rows {
        summary.rows += 1;
        let (region, observation) = row.into_parts()?;
        if region.region_id.is_empty()
            || observation.confirmed < 0
            || observation.deaths < 0
            || observation.recovered < 0
        {
            warn!(
                region = %region.region_id,
                date = %observation.date,
                "rejecting invalid case row"
            );
            summary.rejected += 1;
            continue;
        }
        if store.upsert_region(&region).await? {
            summary.regions_inserted += 1;
        }
        if store.insert_observation(&observation).await? {
            summary.observations_inserted += 1;
        }
    }
    Ok(summary)
}

const SEED_REGIONS: [(&str, &str, i64); 5] = [
    ("IN-MH", "Maharashtra", 180),
    ("IN-KA", "Karnataka", 120),
    ("IN-KL", "Kerala", 95),
    ("IN-DL", "Delhi", 60),
    ("IN-WB", "West Bengal", 140),
];

/// Daily series ending on this date and monthly series ending in its month.
const SEED_END: (i32, u32, u32) = (2024, 8, 31);

/// Inserts a small deterministic DENGUE and COVID dataset: 14 days of daily
/// counts and 24 months of monthly counts per region.
pub async fn seed(store: &dyn Store) -> Result<ImportSummary> {
    let (y, m, d) = SEED_END;
    let end = NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| PipelineError::config("seed end date out of range"))?;
    let table = SeasonalTable::default();
    let mut summary = ImportSummary::default();

    for (disease, scale) in [("DENGUE", 1.0), ("COVID", 0.4)] {
        for (index, (region_id, name, baseline)) in SEED_REGIONS.iter().enumerate() {
            let region = Region {
                region_id: region_id.to_string(),
                region_name: Some(name.to_string()),
                disease: Some(disease.to_string()),
            };
            if store.upsert_region(&region).await? {
                summary.regions_inserted += 1;
            }

            let base = *baseline as f64 * scale;
            // Even-indexed regions trend upwards, odd ones stay flat.
            let slope = if index % 2 == 0 { 0.06 } else { 0.005 };
            for day in 0..14i64 {
                let date = end - Duration::days(13 - day);
                let wobble = ((day * 7 + index as i64 * 3) % 5) as f64 - 2.0;
                let confirmed =
                    (base * (1.0 + slope * day as f64) + wobble * 3.0).round() as i64;
                let observation =
                    seed_observation(region_id, disease, date, confirmed, Granularity::Daily);
                summary.rows += 1;
                if store.insert_observation(&observation).await? {
                    summary.observations_inserted += 1;
                }
            }

            for offset in 0..24u32 {
                let months_back = 23 - offset;
                let total = y * 12 + m as i32 - 1 - months_back as i32;
                let Some(date) = NaiveDate::from_ymd_opt(total / 12, (total % 12) as u32 + 1, 1)
                else {
                    continue;
                };
                let seasonal = table.for_month(date.month());
                let confirmed =
                    (base * 30.0 * seasonal * (1.0 + 0.01 * offset as f64)).round() as i64;
                let observation =
                    seed_observation(region_id, disease, date, confirmed, Granularity::Monthly);
                summary.rows += 1;
                if store.insert_observation(&observation).await? {
                    summary.observations_inserted += 1;
                }
            }
        }
    }

    info!(?summary, "seed data inserted");
    Ok(summary)
}

fn seed_observation(
    region_id: &str,
    disease: &str,
    date: NaiveDate,
    confirmed: i64,
    granularity: Granularity,
) -> CaseObservation {
    let confirmed = confirmed.max(0);
    CaseObservation {
        region_id: region_id.to_string(),
        date,
        disease: Some(disease.to_string()),
        confirmed,
        deaths: confirmed / 100,
        recovered: confirmed * 8 / 10,
        granularity: Some(granularity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ObservationFilter};

    const CSV: &str = "\
region_id,region_name,date,disease,confirmed,deaths,recovered,granularity
IN-KA,Karnataka,2024-06-01,dengue,100,1,50,daily
IN-KA,Karnataka,2024-06-02,DENGUE,120,1,60,Daily
IN-KA,,2024-06-02,COVID,30,0,10,
IN-KL,Kerala,2024-06-02,DENGUE,-5,0,0,daily
";

    #[tokio::test]
    async fn imports_rows_and_rejects_negative_counts() {
        let store = MemoryStore::new();
        let summary = import_reader(&store, CSV.as_bytes()).await.unwrap();
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.observations_inserted, 3);
        assert_eq!(summary.regions_inserted, 2);

        let covid = store
            .recent_observations(&ObservationFilter::all().disease(Some("COVID")), 10)
            .await
            .unwrap();
        assert_eq!(covid.len(), 1);
        assert_eq!(covid[0].granularity, None);
    }

    #[tokio::test]
    async fn reimport_inserts_nothing_new() {
        let store = MemoryStore::new();
        import_reader(&store, CSV.as_bytes()).await.unwrap();
        let again = import_reader(&store, CSV.as_bytes()).await.unwrap();
        assert_eq!(again.observations_inserted, 0);
        assert_eq!(again.regions_inserted, 0);
    }

    #[tokio::test]
    async fn bad_date_is_an_error() {
        let store = MemoryStore::new();
        let bad = "region_id,region_name,date,disease,confirmed,deaths,recovered,granularity\n\
                   IN-KA,,06/01/2024,DENGUE,1,0,0,daily\n";
        let err = import_reader(&store, bad.as_bytes()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDate(_)));
    }

    #[tokio::test]
    async fn seed_is_idempotent_and_covers_both_granularities() {
        let store = MemoryStore::new();
        let first = seed(&store).await.unwrap();
        assert_eq!(first.observations_inserted, 2 * 5 * (14 + 24));
        let second = seed(&store).await.unwrap();
        assert_eq!(second.observations_inserted, 0);

        let regions = store.list_regions(Some("DENGUE")).await.unwrap();
        assert_eq!(regions.len(), 5);
    }
}
