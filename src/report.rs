use std::fmt::Write;

use chrono::NaiveDate;

use crate::disease::DiseaseRegistry;
use crate::error::Result;
use crate::models::{Alert, DerivedCounts, Hotspot, RiskLevel, RiskScore};
use crate::store::Store;

/// Everything a report renders, gathered up front so rendering stays pure.
#[derive(Debug, Clone, Default)]
pub struct ReportData {
    pub date: Option<NaiveDate>,
    pub scores: Vec<RiskScore>,
    pub alerts: Vec<Alert>,
    pub hotspots: Vec<Hotspot>,
    pub counts: DerivedCounts,
}

pub async fn gather(store: &dyn Store, disease: Option<&str>) -> Result<ReportData> {
    let date = store.latest_risk_date(disease).await?;
    let (mut scores, alerts) = match date {
        Some(d) => (
            store.risk_scores_on(d, disease).await?,
            store.alerts_on(d, disease).await?,
        ),
        None => (Vec::new(), Vec::new()),
    };
    scores.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));

    Ok(ReportData {
        date,
        scores,
        alerts,
        hotspots: store.hotspots(5, disease).await?,
        counts: store.count_derived(disease).await?,
    })
}

pub fn level_mix(scores: &[RiskScore]) -> Vec<(RiskLevel, usize)> {
    [RiskLevel::Critical, RiskLevel::High, RiskLevel::Medium, RiskLevel::Low]
        .into_iter()
        .map(|level| (level, scores.iter().filter(|s| s.risk_level == level).count()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

pub fn build_report(
    disease: Option<&str>,
    registry: &DiseaseRegistry,
    data: &ReportData,
) -> String {
    let mut output = String::new();
    let profile = disease.and_then(|id| registry.get(id));
    let label = match (disease, profile) {
        (_, Some(p)) => format!("{} ({})", p.name, p.disease_id),
        (Some(id), None) => id.to_string(),
        (None, None) => "all diseases".to_string(),
    };

    let _ = writeln!(output, "# Outbreak Watch Report");
    match data.date {
        Some(date) => {
            let _ = writeln!(output, "Generated for {label} (risk scores as of {date})");
        }
        None => {
            let _ = writeln!(output, "Generated for {label} (no risk scores yet)");
        }
    }
    if let Some(p) = profile {
        let _ = writeln!(
            output,
            "Severity {:?}, case fatality {:.1}%, climate sensitive: {}",
            p.severity,
            p.case_fatality_rate * 100.0,
            if p.climate_sensitive() { "yes" } else { "no" }
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Levels");

    let mix = level_mix(&data.scores);
    if mix.is_empty() {
        let _ = writeln!(output, "No regions scored.");
    } else {
        for (level, count) in mix {
            let _ = writeln!(output, "- {level}: {count} regions");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Regions");
    if data.scores.is_empty() {
        let _ = writeln!(output, "No regions scored.");
    } else {
        for score in data.scores.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} score {:.2} ({}): {}",
                score.region_id,
                score.risk_score,
                score.risk_level,
                score.drivers.join("; ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts");
    if data.alerts.is_empty() {
        let _ = writeln!(output, "No alerts raised.");
    } else {
        for alert in &data.alerts {
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                alert.region_id, alert.risk_level, alert.reason
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Hotspots");
    if data.hotspots.is_empty() {
        let _ = writeln!(output, "No case data recorded.");
    } else {
        for spot in &data.hotspots {
            let _ = writeln!(
                output,
                "- {} {} confirmed, {} deaths (latest {})",
                spot.region_name.as_deref().unwrap_or(&spot.region_id),
                spot.confirmed_sum,
                spot.deaths_sum,
                spot.latest_date
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Stored: {} risk scores, {} alerts, {} forecasts.",
        data.counts.risk_scores, data.counts.alerts, data.counts.forecasts
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClimateInfo, RegionMetrics};
    use chrono::Utc;

    fn score(region: &str, value: f64, level: RiskLevel) -> RiskScore {
        RiskScore {
            region_id: region.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            disease: Some("DENGUE".to_string()),
            risk_score: value,
            risk_level: level,
            drivers: vec!["High 7-day growth".to_string(), "High volatility".to_string()],
            metrics: RegionMetrics {
                region_id: region.to_string(),
                window_size: 7,
                today_confirmed: 10,
                past_confirmed: 5,
                today_deaths: 0,
                growth_rate: 1.0,
                death_ratio: 0.0,
                volatility_norm: 0.3,
            },
            climate_info: ClimateInfo::Disabled { base_risk: value },
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn empty_report_has_placeholders() {
        let report = build_report(None, &DiseaseRegistry::builtin(), &ReportData::default());
        assert!(report.contains("all diseases (no risk scores yet)"));
        assert!(report.contains("No alerts raised."));
        assert!(report.contains("Stored: 0 risk scores"));
    }

    #[test]
    fn report_uses_registry_name_and_lists_scores() {
        let data = ReportData {
            date: NaiveDate::from_ymd_opt(2024, 7, 1),
            scores: vec![
                score("IN-KA", 0.81, RiskLevel::High),
                score("IN-KL", 0.2, RiskLevel::Low),
            ],
            ..ReportData::default()
        };
        let report = build_report(Some("dengue"), &DiseaseRegistry::builtin(), &data);
        assert!(report.contains("Dengue Fever (DENGUE)"));
        assert!(report.contains("case fatality 1.0%, climate sensitive: yes"));
        assert!(report.contains("- HIGH: 1 regions"));
        assert!(report.contains("- IN-KA score 0.81 (HIGH): High 7-day growth; High volatility"));
    }
}
