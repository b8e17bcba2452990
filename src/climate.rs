//! Seasonal (monsoon) adjustment of risk scores.
//!
//! The multiplier depends only on the calendar month. Regions resolve to a
//! climate zone which is reported alongside the adjustment; the default
//! table applies the same multipliers to every zone.

use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Relative change (percent) beyond which an adjustment counts as a boost or reduction.
pub const SIGNIFICANT_CHANGE_PCT: f64 = 10.0;

const MONTH_ABBREV: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimateZone {
    North,
    South,
    East,
    West,
    Central,
}

/// Month-indexed transmission multipliers, January first.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalTable {
    multipliers: [f64; 12],
}

impl SeasonalTable {
    pub fn new(multipliers: [f64; 12]) -> Self {
        Self { multipliers }
    }

    pub fn for_month(&self, month: u32) -> f64 {
        match month {
            1..=12 => self.multipliers[(month - 1) as usize],
            _ => 1.0,
        }
    }
}

impl Default for SeasonalTable {
    fn default() -> Self {
        Self::new([0.5, 0.5, 0.7, 0.8, 1.0, 1.5, 1.8, 1.7, 1.5, 1.2, 0.8, 0.6])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Monsoon,
    PostMonsoon,
    PreMonsoon,
    Winter,
    Unknown,
}

impl Season {
    pub fn for_month(month: u32) -> Self {
        match month {
            6..=9 => Season::Monsoon,
            10 | 11 => Season::PostMonsoon,
            3..=5 => Season::PreMonsoon,
            1 | 2 | 12 => Season::Winter,
            _ => Season::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Monsoon => "monsoon",
            Season::PostMonsoon => "post_monsoon",
            Season::PreMonsoon => "pre_monsoon",
            Season::Winter => "winter",
            Season::Unknown => "unknown",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Season::Monsoon => "Monsoon",
            Season::PostMonsoon => "Post-monsoon",
            Season::PreMonsoon => "Pre-monsoon",
            Season::Winter | Season::Unknown => "Winter",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalContext {
    pub month: u32,
    pub climate_multiplier: f64,
    pub is_monsoon: bool,
    pub is_peak_monsoon: bool,
    pub is_post_monsoon: bool,
    pub is_pre_monsoon: bool,
    pub season: Season,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub adjusted: f64,
    pub multiplier: f64,
    pub explanation: String,
    pub context: SeasonalContext,
    pub zone: Option<ClimateZone>,
}

impl Adjustment {
    /// Percent change from `base` to the adjusted score; zero for a zero base.
    pub fn relative_change_pct(&self, base: f64) -> f64 {
        if base > 0.0 {
            (self.adjusted - base) / base * 100.0
        } else {
            0.0
        }
    }
}

pub struct ClimateAdjuster {
    table: SeasonalTable,
    zones: HashMap<String, ClimateZone>,
}

impl ClimateAdjuster {
    pub fn new(table: SeasonalTable, zones: HashMap<String, ClimateZone>) -> Self {
        Self { table, zones }
    }

    pub fn zone_for(&self, region_id: &str) -> Option<ClimateZone> {
        self.zones.get(region_id).copied()
    }

    pub fn multiplier_for(&self, date: &str, _region_id: Option<&str>) -> (f64, String) {
        let month = match parse_calendar_date(date) {
            Ok(parsed) => parsed.month(),
            Err(err) => return (1.0, format!("Error parsing date: {err}")),
        };

        let multiplier = self.table.for_month(month);
        let season = Season::for_month(month);
        let phase = match month {
            7 => "peak",
            6 | 8 => "active",
            9 => "late phase",
            10 | 11 => "elevated humidity",
            3..=5 => "warming phase",
            _ => "low transmission",
        };
        let intensity = if multiplier >= 1.5 {
            "Very high"
        } else if multiplier >= 1.2 {
            "High"
        } else if multiplier >= 0.8 {
            "Moderate"
        } else {
            "Low"
        };
        tracing::trace!(month, phase, multiplier, "resolved climate multiplier");

        let explanation = format!(
            "{} ({}) - {} transmission risk",
            season.label(),
            MONTH_ABBREV[(month - 1) as usize],
            intensity
        );
        (multiplier, explanation)
    }

    pub fn seasonal_context(&self, date: &str) -> SeasonalContext {
        match parse_calendar_date(date) {
            Ok(parsed) => {
                let month = parsed.month();
                SeasonalContext {
                    month,
                    climate_multiplier: self.table.for_month(month),
                    is_monsoon: (6..=9).contains(&month),
                    is_peak_monsoon: month == 7 || month == 8,
                    is_post_monsoon: month == 10 || month == 11,
                    is_pre_monsoon: (3..=5).contains(&month),
                    season: Season::for_month(month),
                    error: None,
                }
            }
            Err(err) => SeasonalContext {
                month: 0,
                climate_multiplier: 1.0,
                is_monsoon: false,
                is_peak_monsoon: false,
                is_post_monsoon: false,
                is_pre_monsoon: false,
                season: Season::Unknown,
                error: Some(err),
            },
        }
    }

    /// Scales `base` by the month multiplier, clipped to `[0, 1]`.
    pub fn apply(&self, base: f64, date: &str, region_id: Option<&str>) -> Adjustment {
        let (multiplier, climate_explanation) = self.multiplier_for(date, region_id);
        let context = self.seasonal_context(date);
        let adjusted = (base * multiplier).clamp(0.0, 1.0);

        let mut adjustment = Adjustment {
            adjusted,
            multiplier,
            explanation: String::new(),
            context,
            zone: region_id.and_then(|id| self.zone_for(id)),
        };

        let pct = adjustment.relative_change_pct(base);
        adjustment.explanation = if pct > SIGNIFICANT_CHANGE_PCT {
            format!("Climate boost: +{pct:.0}% ({climate_explanation})")
        } else if pct < -SIGNIFICANT_CHANGE_PCT {
            format!("Climate reduction: {pct:.0}% ({climate_explanation})")
        } else {
            format!("Neutral climate impact ({climate_explanation})")
        };
        adjustment
    }
}

impl Default for ClimateAdjuster {
    fn default() -> Self {
        Self::new(SeasonalTable::default(), default_zones())
    }
}

pub fn default_zones() -> HashMap<String, ClimateZone> {
    use ClimateZone::*;

    [
        ("IN-DL", North),
        ("IN-HR", North),
        ("IN-PB", North),
        ("IN-UP", North),
        ("IN-RJ", North),
        ("IN-KA", South),
        ("IN-TN", South),
        ("IN-KL", South),
        ("IN-AP", South),
        ("IN-TG", South),
        ("IN-MH", West),
        ("IN-GA", West),
        ("IN-WB", East),
        ("IN-OR", East),
        ("IN-AS", East),
        ("IN-MN", East),
        ("IN-NL", East),
        ("IN-MP", Central),
        ("IN-CT", Central),
    ]
    .into_iter()
    .map(|(id, zone)| (id.to_string(), zone))
    .collect()
}

fn parse_calendar_date(value: &str) -> Result<NaiveDate, String> {
    let trimmed = value.trim();
    if let Ok(date) = trimmed.parse::<NaiveDate>() {
        return Ok(date);
    }
    trimmed
        .parse::<NaiveDateTime>()
        .map(|dt| dt.date())
        .map_err(|err| format!("{trimmed:?}: {err}"))
}
