use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::disease::{DiseaseRegistry, ResourceParams};
use crate::error::Result;
use crate::models::Granularity;
use crate::store::{GranularityFilter, ObservationFilter, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceDemand {
    pub general_beds: u64,
    pub icu_beds: u64,
    pub nurses: u64,
    pub oxygen_cylinders: u64,
}

impl ResourceDemand {
    /// Counts are truncated, as a fraction of a bed is not a bed.
    pub fn for_active_cases(active_cases: u64, params: &ResourceParams) -> Self {
        let active = active_cases as f64;
        let general_beds = (active * params.hospitalization_rate) as u64;
        let icu_beds = (active * params.icu_rate) as u64;
        let hospitalized = (general_beds + icu_beds) as f64;
        Self {
            general_beds,
            icu_beds,
            nurses: (hospitalized * params.nurse_ratio) as u64,
            oxygen_cylinders: (hospitalized * params.oxygen_rate) as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcePrediction {
    pub region_id: String,
    pub date: NaiveDate,
    pub disease: String,
    pub window_start: NaiveDate,
    pub active_cases: u64,
    /// Days in the window covered by observed cases.
    pub observed_days: usize,
    /// Days in the window filled in from stored forecasts.
    pub forecast_days: usize,
    pub params: ResourceParams,
    pub resources: ResourceDemand,
}

pub struct ResourcePlanner<'a> {
    store: &'a dyn Store,
    registry: &'a DiseaseRegistry,
}

impl<'a> ResourcePlanner<'a> {
    pub fn new(store: &'a dyn Store, registry: &'a DiseaseRegistry) -> Self {
        Self { store, registry }
    }

    pub fn params_for(&self, disease: &str) -> ResourceParams {
        match self.registry.get(disease) {
            Some(profile) => profile.resources,
            None => {
                warn!(disease, "no resource parameters for disease, using defaults");
                ResourceParams::default()
            }
        }
    }

    /// Estimates hospital demand on `date` from the cases still active then.
    ///
    /// Active cases are the new daily cases over the last `avg_stay_days`
    /// ending on `date`. Observed days take precedence; the remaining days
    /// come from the most recently generated forecast for that date.
    pub async fn predict_demand(
        &self,
        region_id: &str,
        date: NaiveDate,
        disease: &str,
    ) -> Result<ResourcePrediction> {
        let params = self.params_for(disease);
        let stay = params.avg_stay_days.max(1);
        let window_start = date - Duration::days(i64::from(stay) - 1);

        let filter = ObservationFilter::all()
            .region(region_id)
            .disease(Some(disease))
            .granularity(GranularityFilter::Exactly(Granularity::Daily))
            .on_or_before(Some(date));
        let observed: BTreeMap<NaiveDate, f64> = self
            .store
            .recent_observations(&filter, stay as usize)
            .await?
            .into_iter()
            .filter(|o| o.date >= window_start)
            .map(|o| (o.date, o.confirmed as f64))
            .collect();

        let mut forecast: BTreeMap<NaiveDate, (DateTime<Utc>, f64)> = BTreeMap::new();
        for f in self
            .store
            .forecasts_for_region(region_id, Some(disease), None)
            .await?
        {
            if f.date < window_start || f.date > date || observed.contains_key(&f.date) {
                continue;
            }
            let newer = forecast
                .get(&f.date)
                .map_or(true, |(generated_at, _)| f.generated_at > *generated_at);
            if newer {
                forecast.insert(f.date, (f.generated_at, f.pred_mean));
            }
        }

        let total: f64 = observed.values().sum::<f64>()
            + forecast.values().map(|(_, mean)| mean).sum::<f64>();
        let active_cases = total.max(0.0) as u64;
        if active_cases == 0 {
            warn!(
                region = %region_id,
                disease,
                start = %window_start,
                end = %date,
                "no case data in resource window"
            );
        }

        let resources = ResourceDemand::for_active_cases(active_cases, &params);
        info!(
            region = %region_id,
            disease,
            active_cases,
            general_beds = resources.general_beds,
            icu_beds = resources.icu_beds,
            "resource demand estimated"
        );

        Ok(ResourcePrediction {
            region_id: region_id.to_string(),
            date,
            disease: disease.to_string(),
            window_start,
            active_cases,
            observed_days: observed.len(),
            forecast_days: forecast.len(),
            params,
            resources,
        })
    }
}
