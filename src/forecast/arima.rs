//! ARIMA / seasonal ARIMA forecasting.
//!
//! Orders are chosen automatically: the differencing order by a
//! variance-reduction rule, then every ARMA(p, q) with p, q <= 3 is estimated
//! by Hannan-Rissanen regression and the lowest conditional-sum-of-squares
//! AIC wins. The seasonal variant applies one seasonal difference first.
//! Interval half-widths come from the psi-weights of the integrated model.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use nalgebra::{DMatrix, DVector};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use super::{forecast_dates, load_history, profile_for, resolve_target_date, round2};
use crate::error::Result;
use crate::metrics::mean;
use crate::models::{BatchReport, CaseObservation, Forecast, Granularity, Outcome};
use crate::store::Store;

pub const ARIMA_MODEL_VERSION: &str = "arima_v1";
pub const SARIMA_MODEL_VERSION: &str = "sarima_v1";

/// Fewest historical points a fit is attempted on.
pub const MIN_HISTORY: usize = 10;

const MAX_P: usize = 3;
const MAX_Q: usize = 3;
const MAX_D: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArimaSettings {
    pub use_seasonal: bool,
    /// Two-sided interval coverage, e.g. 0.95.
    pub confidence: f64,
    /// Upper bound on model fits running at once.
    pub max_concurrent_fits: usize,
}

impl Default for ArimaSettings {
    fn default() -> Self {
        Self {
            use_seasonal: true,
            confidence: 0.95,
            max_concurrent_fits: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    /// Period of the single seasonal difference, if one was applied.
    pub seasonal_period: Option<usize>,
}

impl fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.p, self.d, self.q)?;
        if let Some(m) = self.seasonal_period {
            write!(f, "x(0,1,0,{m})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone)]
struct ArmaFit {
    intercept: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    sigma2: f64,
    aic: f64,
    residuals: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FittedArima {
    pub order: ArimaOrder,
    pub intercept: f64,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sigma2: f64,
    pub aic: f64,
    /// `stages[0]` is the input series; each later stage is a difference of the one before.
    stages: Vec<Vec<f64>>,
    lags: Vec<usize>,
    residuals: Vec<f64>,
}

fn difference(series: &[f64], lag: usize) -> Vec<f64> {
    if series.len() <= lag {
        return Vec::new();
    }
    (lag..series.len()).map(|i| series[i] - series[i - lag]).collect()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Least squares on a row-major design matrix with `k` columns. `None` when
/// the design is rank deficient.
fn least_squares(rows: &[f64], k: usize, target: &[f64]) -> Option<Vec<f64>> {
    let n = target.len();
    if k == 0 || n <= k || rows.len() != n * k {
        return None;
    }
    let x = DMatrix::from_row_slice(n, k, rows);
    let y = DVector::from_column_slice(target);
    let svd = x.svd(true, true);
    let tol = svd.singular_values.max() * 1e-9;
    if svd.rank(tol) < k {
        return None;
    }
    let coef = svd.solve(&y, tol).ok()?;
    coef.iter().all(|v| v.is_finite()).then(|| coef.iter().copied().collect())
}

fn css_residuals(z: &[f64], intercept: f64, ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let p = ar.len();
    let mut residuals = vec![0.0; z.len()];
    for t in p..z.len() {
        let mut pred = intercept;
        for (i, phi) in ar.iter().enumerate() {
            pred += phi * z[t - 1 - i];
        }
        for (j, theta) in ma.iter().enumerate() {
            if t > j {
                pred += theta * residuals[t - 1 - j];
            }
        }
        residuals[t] = z[t] - pred;
    }
    residuals
}

fn fit_arma(z: &[f64], p: usize, q: usize) -> Option<ArmaFit> {
    let n = z.len();

    let (intercept, ar, ma) = if p == 0 && q == 0 {
        if n < 2 {
            return None;
        }
        (mean(z), Vec::new(), Vec::new())
    } else {
        // Long autoregression supplies innovation estimates for the MA lags.
        let long_order = if q > 0 { (p + q + 2).min(n / 3).max(1) } else { 0 };
        let innovations = if q > 0 {
            let rows: Vec<f64> = (long_order..n)
                .flat_map(|t| std::iter::once(1.0).chain((1..=long_order).map(move |i| z[t - i])))
                .collect();
            let coef = least_squares(&rows, long_order + 1, &z[long_order..])?;
            let mut e = vec![0.0; n];
            for t in long_order..n {
                let fitted: f64 = coef[0]
                    + (1..=long_order).map(|i| coef[i] * z[t - i]).sum::<f64>();
                e[t] = z[t] - fitted;
            }
            e
        } else {
            Vec::new()
        };

        let start = p.max(long_order + q);
        if n <= start + p + q + 2 {
            return None;
        }
        let innovations = &innovations;
        let rows: Vec<f64> = (start..n)
            .flat_map(|t| {
                std::iter::once(1.0)
                    .chain((1..=p).map(move |i| z[t - i]))
                    .chain((1..=q).map(move |j| innovations[t - j]))
            })
            .collect();
        let coef = least_squares(&rows, 1 + p + q, &z[start..])?;
        (coef[0], coef[1..1 + p].to_vec(), coef[1 + p..].to_vec())
    };

    // Sufficient conditions for stationarity and invertibility.
    if ar.iter().map(|c| c.abs()).sum::<f64>() >= 1.0
        || ma.iter().map(|c| c.abs()).sum::<f64>() >= 1.0
    {
        return None;
    }

    let residuals = css_residuals(z, intercept, &ar, &ma);
    let effective = n - p;
    let sigma2 = residuals[p..].iter().map(|r| r * r).sum::<f64>() / effective as f64;
    if !sigma2.is_finite() {
        return None;
    }
    let aic = effective as f64 * sigma2.max(1e-12).ln() + 2.0 * (p + q + 1) as f64;

    Some(ArmaFit {
        intercept,
        ar,
        ma,
        sigma2,
        aic,
        residuals,
    })
}

/// Fits the lowest-AIC model. `None` when the series is too short or nothing fits.
pub fn fit_auto(series: &[f64], seasonal_period: Option<usize>) -> Option<FittedArima> {
    if series.len() < MIN_HISTORY {
        return None;
    }
    let cleaned: Vec<f64> = series
        .iter()
        .map(|v| if v.is_finite() { *v } else { 0.0 })
        .collect();

    let mut stages = vec![cleaned];
    let mut lags = Vec::new();
    if let Some(m) = seasonal_period.filter(|m| *m > 1) {
        let seasonal = difference(&stages[0], m);
        stages.push(seasonal);
        lags.push(m);
    }

    let mut d = 0;
    while d < MAX_D {
        let current = &stages[stages.len() - 1];
        if current.len() < 4 {
            break;
        }
        let next = difference(current, 1);
        if variance(&next) + 1e-12 < variance(current) {
            stages.push(next);
            lags.push(1);
            d += 1;
        } else {
            break;
        }
    }

    let z = &stages[stages.len() - 1];
    let mut best: Option<(usize, usize, ArmaFit)> = None;
    for p in 0..=MAX_P {
        for q in 0..=MAX_Q {
            let Some(fit) = fit_arma(z, p, q) else {
                continue;
            };
            if best.as_ref().map_or(true, |(_, _, b)| fit.aic < b.aic) {
                best = Some((p, q, fit));
            }
        }
    }

    let (p, q, fit) = best?;
    let order = ArimaOrder {
        p,
        d,
        q,
        seasonal_period: seasonal_period.filter(|m| *m > 1),
    };
    debug!(%order, aic = fit.aic, sigma2 = fit.sigma2, "selected model order");

    Some(FittedArima {
        order,
        intercept: fit.intercept,
        ar: fit.ar,
        ma: fit.ma,
        sigma2: fit.sigma2,
        aic: fit.aic,
        stages,
        lags,
        residuals: fit.residuals,
    })
}

impl FittedArima {
    pub fn predict(&self, horizon: usize, confidence: f64) -> Prediction {
        let z = &self.stages[self.stages.len() - 1];
        let n = z.len();
        let mut ext_z = z.clone();
        let mut ext_e = self.residuals.clone();
        for _ in 0..horizon {
            let t = ext_z.len();
            let mut pred = self.intercept;
            for (i, phi) in self.ar.iter().enumerate() {
                if t > i {
                    pred += phi * ext_z[t - 1 - i];
                }
            }
            for (j, theta) in self.ma.iter().enumerate() {
                if t > j {
                    pred += theta * ext_e[t - 1 - j];
                }
            }
            ext_z.push(pred);
            ext_e.push(0.0);
        }

        let mut point = ext_z[n..].to_vec();
        for level in (0..self.lags.len()).rev() {
            let lag = self.lags[level];
            let mut ext = self.stages[level].clone();
            let base_len = ext.len();
            for step in point.iter() {
                let value = step + ext[ext.len() - lag];
                ext.push(value);
            }
            point = ext[base_len..].to_vec();
        }

        let psi = self.psi_weights(horizon);
        let z_score = normal_quantile(0.5 + confidence.clamp(0.5, 0.9999) / 2.0);
        let mut cumulative = 0.0;
        let mut prediction = Prediction {
            mean: Vec::with_capacity(horizon),
            lower: Vec::with_capacity(horizon),
            upper: Vec::with_capacity(horizon),
        };
        for (h, value) in point.iter().enumerate() {
            cumulative += psi[h] * psi[h];
            let half_width = z_score * (self.sigma2 * cumulative).sqrt();
            prediction.mean.push(value.max(0.0));
            prediction.lower.push((value - half_width).max(0.0));
            prediction.upper.push((value + half_width).max(0.0));
        }
        prediction
    }

    /// MA(infinity) weights of the full model, differencing included.
    fn psi_weights(&self, horizon: usize) -> Vec<f64> {
        let mut poly = vec![1.0];
        poly.extend(self.ar.iter().map(|phi| -phi));
        for lag in &self.lags {
            let mut factor = vec![0.0; lag + 1];
            factor[0] = 1.0;
            factor[*lag] = -1.0;
            poly = multiply(&poly, &factor);
        }
        let phi_star: Vec<f64> = poly.iter().skip(1).map(|c| -c).collect();

        let mut psi = vec![0.0; horizon.max(1)];
        psi[0] = 1.0;
        for j in 1..psi.len() {
            let mut value = self.ma.get(j - 1).copied().unwrap_or(0.0);
            for i in 1..=j.min(phi_star.len()) {
                value += phi_star[i - 1] * psi[j - i];
            }
            psi[j] = value;
        }
        psi
    }
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Everything one region's fit needs, owned so it can move to the blocking pool.
#[derive(Debug, Clone)]
pub struct FitJob {
    pub region_id: String,
    pub disease: Option<String>,
    pub history: Vec<CaseObservation>,
    pub target: NaiveDate,
    pub horizon: u32,
    pub granularity: Granularity,
}

pub fn arima_forecast(
    job: &FitJob,
    settings: &ArimaSettings,
    generated_at: DateTime<Utc>,
) -> Outcome<Vec<Forecast>> {
    if job.history.len() < MIN_HISTORY {
        return Outcome::Skipped(format!(
            "insufficient history: {} of {} points",
            job.history.len(),
            MIN_HISTORY
        ));
    }

    let series: Vec<f64> = job.history.iter().map(|o| o.confirmed as f64).collect();
    let period = profile_for(job.granularity).seasonal_period;
    let seasonal = settings.use_seasonal && period > 1 && series.len() >= period * 2;

    let Some(model) = fit_auto(&series, seasonal.then_some(period)) else {
        return Outcome::Skipped("model fit failed".to_string());
    };
    let prediction = model.predict(job.horizon as usize, settings.confidence);
    let model_version = if seasonal {
        SARIMA_MODEL_VERSION
    } else {
        ARIMA_MODEL_VERSION
    };
    let order = model.order.to_string();
    debug!(region_id = %job.region_id, %order, aic = model.aic, "fitted");

    let forecasts = forecast_dates(job.target, job.horizon)
        .enumerate()
        .map(|(i, date)| Forecast {
            region_id: job.region_id.clone(),
            date,
            disease: job.disease.clone(),
            pred_mean: round2(prediction.mean[i]),
            pred_lower: round2(prediction.lower[i]),
            pred_upper: round2(prediction.upper[i]),
            model_version: model_version.to_string(),
            generated_at,
            source_granularity: job.granularity,
            model_order: Some(order.clone()),
        })
        .collect();
    Outcome::Done(forecasts)
}

/// ARIMA forecasts for every region. Fits run on the blocking pool, at most
/// `settings.max_concurrent_fits` at a time; writes happen in region order.
pub async fn generate_all_arima(
    store: &dyn Store,
    date: Option<NaiveDate>,
    disease: Option<&str>,
    horizon: u32,
    granularity: Granularity,
    settings: ArimaSettings,
) -> Result<(Option<NaiveDate>, BatchReport<Forecast>)> {
    let mut report = BatchReport::new();
    let Some(target) = resolve_target_date(store, date, disease, granularity).await? else {
        return Ok((None, report));
    };

    let regions = store.list_regions(disease).await?;
    let lookback = profile_for(granularity).statistical_lookback;
    info!(
        date = %target,
        horizon,
        disease = ?disease,
        %granularity,
        seasonal = settings.use_seasonal,
        regions = regions.len(),
        "generating ARIMA forecasts"
    );

    let generated_at = Utc::now();
    let pool = Arc::new(Semaphore::new(settings.max_concurrent_fits.max(1)));
    let mut fits = JoinSet::new();
    let mut task_regions = HashMap::new();

    for region_id in &regions {
        let history =
            load_history(store, region_id, disease, granularity, target, lookback).await?;
        if history.len() < MIN_HISTORY {
            report.skip(
                region_id,
                format!("insufficient history: {} of {} points", history.len(), MIN_HISTORY),
            );
            continue;
        }

        let job = FitJob {
            region_id: region_id.clone(),
            disease: disease.map(str::to_string),
            history,
            target,
            horizon,
            granularity,
        };
        let pool = Arc::clone(&pool);
        let handle = fits.spawn(async move {
            let region_id = job.region_id.clone();
            let outcome = match pool.acquire_owned().await {
                Ok(permit) => tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    arima_forecast(&job, &settings, generated_at)
                })
                .await
                .unwrap_or_else(|err| Outcome::Skipped(format!("model fit aborted: {err}"))),
                Err(_) => Outcome::Skipped("fit pool closed".to_string()),
            };
            (region_id, outcome)
        });
        task_regions.insert(handle.id(), region_id.clone());
    }

    let mut outcomes = collect_fits(fits, &task_regions).await;
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut fitted = 0usize;
    for (region_id, outcome) in outcomes {
        match outcome {
            Outcome::Done(forecasts) => {
                for forecast in &forecasts {
                    store.upsert_forecast(forecast).await?;
                }
                fitted += 1;
                report.records.extend(forecasts);
            }
            Outcome::Skipped(reason) => {
                warn!(region = %region_id, %reason, "ARIMA forecast skipped");
                report.skip(&region_id, reason);
            }
        }
    }

    info!(
        fitted,
        skipped = report.skipped_count(),
        records = report.records.len(),
        "ARIMA forecasting complete"
    );
    Ok((Some(target), report))
}

type FitOutcome = (String, Outcome<Vec<Forecast>>);

/// Drains the fit tasks. A task that died is reported as a skip for its region.
async fn collect_fits(
    mut fits: JoinSet<FitOutcome>,
    task_regions: &HashMap<Id, String>,
) -> Vec<FitOutcome> {
    let mut outcomes = Vec::with_capacity(fits.len());
    while let Some(joined) = fits.join_next().await {
        match joined {
            Ok(pair) => outcomes.push(pair),
            Err(err) => {
                warn!(error = %err, "forecast task failed");
                if let Some(region_id) = task_regions.get(&err.id()) {
                    outcomes.push((
                        region_id.clone(),
                        Outcome::Skipped(format!("forecast task failed: {err}")),
                    ));
                }
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Region;
    use crate::store::MemoryStore;

    fn month(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022 + (i / 12) as i32, (i % 12) as u32 + 1, 1).unwrap()
    }

    fn monthly_rows(region: &str, values: &[f64]) -> Vec<CaseObservation> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| CaseObservation {
                region_id: region.to_string(),
                date: month(i),
                disease: Some("DENGUE".to_string()),
                confirmed: *v as i64,
                deaths: 0,
                recovered: 0,
                granularity: Some(Granularity::Monthly),
            })
            .collect()
    }

    const PATTERN: [f64; 12] = [
        20.0, 25.0, 30.0, 40.0, 60.0, 120.0, 200.0, 180.0, 140.0, 90.0, 50.0, 30.0,
    ];

    #[test]
    fn normal_quantile_matches_tables() {
        assert!((normal_quantile(0.975) - 1.959964).abs() < 1e-5);
        assert!(normal_quantile(0.5).abs() < 1e-9);
        assert!((normal_quantile(0.005) + 2.575829).abs() < 1e-5);
    }

    #[test]
    fn linear_trend_is_extrapolated() {
        let series: Vec<f64> = (1..=24).map(|i| 10.0 * i as f64).collect();
        let model = fit_auto(&series, None).unwrap();
        assert_eq!(model.order.d, 1);
        let pred = model.predict(3, 0.95);
        for (h, expected) in [250.0, 260.0, 270.0].iter().enumerate() {
            assert!((pred.mean[h] - expected).abs() < 1e-6, "{:?}", pred.mean);
        }
    }

    #[test]
    fn seasonal_difference_repeats_last_season() {
        let series: Vec<f64> = PATTERN.iter().chain(PATTERN.iter()).copied().collect();
        let model = fit_auto(&series, Some(12)).unwrap();
        assert_eq!(model.order.seasonal_period, Some(12));
        assert_eq!(model.order.to_string(), "(0,0,0)x(0,1,0,12)");
        let pred = model.predict(3, 0.95);
        for h in 0..3 {
            assert!((pred.mean[h] - PATTERN[h]).abs() < 1e-6);
        }
    }

    #[test]
    fn short_series_does_not_fit() {
        assert!(fit_auto(&[1.0; 9], None).is_none());
    }

    #[test]
    fn predictions_are_non_negative_and_ordered() {
        let declining: Vec<f64> = (0..20).map(|i| 100.0 - 5.0 * i as f64).collect();
        let pred = fit_auto(&declining, None).unwrap().predict(4, 0.95);
        assert_eq!(pred.mean[0], 0.0);
        assert!(pred.mean.iter().chain(&pred.lower).chain(&pred.upper).all(|v| *v >= 0.0));

        let noisy: Vec<f64> = (0..30)
            .map(|i| 200.0 + ((i * 37) % 11) as f64 * 4.0 - ((i * 13) % 7) as f64 * 3.0)
            .collect();
        let model = fit_auto(&noisy, None).unwrap();
        let pred = model.predict(7, 0.95);
        assert_eq!(pred.mean.len(), 7);
        for h in 0..7 {
            assert!(pred.lower[h] <= pred.mean[h] && pred.mean[h] <= pred.upper[h]);
        }
        // Uncertainty does not shrink with the horizon.
        let width = |h: usize| pred.upper[h] - pred.lower[h];
        assert!(width(6) + 1e-9 >= width(0));
    }

    #[test]
    fn job_with_short_history_is_skipped() {
        let job = FitJob {
            region_id: "R1".to_string(),
            disease: None,
            history: monthly_rows("R1", &[5.0; 6]),
            target: month(6),
            horizon: 7,
            granularity: Granularity::Monthly,
        };
        let out = arima_forecast(&job, &ArimaSettings::default(), Utc::now());
        assert!(matches!(out, Outcome::Skipped(reason) if reason.contains("insufficient")));
    }

    #[tokio::test]
    async fn batch_fits_sufficient_regions_and_skips_others() {
        let store = MemoryStore::new();
        for id in ["R1", "R2"] {
            store
                .upsert_region(&Region {
                    region_id: id.to_string(),
                    region_name: None,
                    disease: Some("DENGUE".to_string()),
                })
                .await
                .unwrap();
        }
        let full: Vec<f64> = PATTERN.iter().chain(PATTERN.iter()).copied().collect();
        for row in monthly_rows("R1", &full).iter().chain(&monthly_rows("R2", &full[..5])) {
            store.insert_observation(row).await.unwrap();
        }

        let (date, seasonal) = generate_all_arima(
            &store,
            None,
            Some("DENGUE"),
            4,
            Granularity::Monthly,
            ArimaSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(date, Some(month(23)));
        assert_eq!(seasonal.records.len(), 4);
        assert_eq!(seasonal.skipped_count(), 1);
        assert_eq!(seasonal.skipped[0].region_id, "R2");
        assert!(seasonal.records.iter().all(|f| f.model_version == SARIMA_MODEL_VERSION));

        let plain = ArimaSettings {
            use_seasonal: false,
            ..ArimaSettings::default()
        };
        let (_, arima) =
            generate_all_arima(&store, None, Some("DENGUE"), 4, Granularity::Monthly, plain)
                .await
                .unwrap();
        assert!(arima.records.iter().all(|f| f.model_version == ARIMA_MODEL_VERSION));

        // Both variants coexist under distinct keys.
        let stored = store
            .forecasts_for_region("R1", Some("DENGUE"), None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 8);
    }

    fn exploding_fit() -> FitOutcome {
        panic!("fit blew up")
    }

    #[tokio::test]
    async fn failed_fit_task_counts_as_skip() {
        let mut fits: JoinSet<FitOutcome> = JoinSet::new();
        let mut task_regions = HashMap::new();
        let ok = fits.spawn(async { ("R1".to_string(), Outcome::Done(Vec::new())) });
        task_regions.insert(ok.id(), "R1".to_string());
        let failed = fits.spawn(async { exploding_fit() });
        task_regions.insert(failed.id(), "R2".to_string());

        let mut outcomes = collect_fits(fits, &task_regions).await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], (ref r, Outcome::Done(_)) if r == "R1"));
        assert!(matches!(outcomes[1], (ref r, Outcome::Skipped(_)) if r == "R2"));
    }
}
