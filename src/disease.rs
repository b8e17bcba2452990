use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionMode {
    Vector,
    Airborne,
    Waterborne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiseaseProfile {
    pub disease_id: &'static str,
    pub name: &'static str,
    pub transmission_mode: TransmissionMode,
    pub severity: Severity,
    pub incubation_period_days: u32,
    pub case_fatality_rate: f64,
    pub temperature_sensitive: bool,
    pub rainfall_sensitive: bool,
    pub humidity_sensitive: bool,
    pub alert_threshold_multiplier: f64,
    pub high_risk_case_threshold: u32,
    pub icd_code: &'static str,
    pub vaccine_available: bool,
    pub resources: ResourceParams,
}

/// Care demand per active case, used for hospital resource planning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceParams {
    pub hospitalization_rate: f64,
    pub icu_rate: f64,
    /// Cases stay active for this many days after being reported.
    pub avg_stay_days: u32,
    /// Nurses per hospitalized patient.
    pub nurse_ratio: f64,
    /// Oxygen cylinders per hospitalized patient per day.
    pub oxygen_rate: f64,
}

impl Default for ResourceParams {
    fn default() -> Self {
        Self {
            hospitalization_rate: 0.1,
            icu_rate: 0.01,
            avg_stay_days: 7,
            nurse_ratio: 0.1,
            oxygen_rate: 0.1,
        }
    }
}

fn resource_params(disease_id: &str) -> ResourceParams {
    let params = |hospitalization_rate: f64,
                  icu_rate: f64,
                  avg_stay_days: u32,
                  nurse_ratio: f64,
                  oxygen_rate: f64| ResourceParams {
        hospitalization_rate,
        icu_rate,
        avg_stay_days,
        nurse_ratio,
        oxygen_rate,
    };
    match disease_id {
        "DENGUE" => params(0.20, 0.03, 5, 0.15, 0.05),
        "MALARIA" => params(0.15, 0.02, 4, 0.12, 0.08),
        "CHIKUNGUNYA" => params(0.10, 0.005, 3, 0.10, 0.02),
        "COVID" => params(0.05, 0.005, 5, 0.15, 0.10),
        _ => ResourceParams::default(),
    }
}

impl DiseaseProfile {
    pub fn climate_sensitive(&self) -> bool {
        self.temperature_sensitive || self.rainfall_sensitive || self.humidity_sensitive
    }
}

macro_rules! profile {
    ($id:literal, $name:literal, $mode:ident, $severity:ident, $incubation:literal,
     $cfr:literal, [$temp:literal, $rain:literal, $humid:literal],
     $multiplier:literal, $cases:literal, $icd:literal, $vaccine:literal) => {
        DiseaseProfile {
            disease_id: $id,
            name: $name,
            transmission_mode: TransmissionMode::$mode,
            severity: Severity::$severity,
            incubation_period_days: $incubation,
            case_fatality_rate: $cfr,
            temperature_sensitive: $temp,
            rainfall_sensitive: $rain,
            humidity_sensitive: $humid,
            alert_threshold_multiplier: $multiplier,
            high_risk_case_threshold: $cases,
            icd_code: $icd,
            vaccine_available: $vaccine,
            resources: resource_params($id),
        }
    };
}

fn builtin_profiles() -> Vec<DiseaseProfile> {
    // id, name, transmission, severity, incubation days, case fatality,
    // [temperature, rainfall, humidity] sensitivity, alert multiplier,
    // high-risk case count, ICD-10, vaccine
    vec![
        profile!(
            "DENGUE", "Dengue Fever", Vector, Moderate, 7, 0.01,
            [true, true, true], 1.5, 100, "A90", true
        ),
        profile!(
            "COVID", "COVID-19", Airborne, High, 5, 0.02,
            [true, false, true], 1.3, 500, "U07.1", true
        ),
        profile!(
            "MALARIA", "Malaria", Vector, High, 14, 0.003,
            [true, true, true], 1.4, 150, "B50-B54", true
        ),
        profile!(
            "TUBERCULOSIS", "Tuberculosis (TB)", Airborne, High, 90, 0.15,
            [false, false, true], 1.2, 50, "A15-A19", true
        ),
        profile!(
            "INFLUENZA", "Influenza (Flu)", Airborne, Moderate, 2, 0.001,
            [true, false, true], 1.5, 200, "J09-J11", true
        ),
        profile!(
            "CHOLERA", "Cholera", Waterborne, High, 3, 0.05,
            [true, true, false], 1.3, 50, "A00", true
        ),
        profile!(
            "CHIKUNGUNYA", "Chikungunya", Vector, Moderate, 5, 0.001,
            [true, true, true], 1.5, 100, "A92.0", false
        ),
        profile!(
            "TYPHOID", "Typhoid Fever", Waterborne, Moderate, 14, 0.01,
            [true, true, false], 1.4, 75, "A01.0", true
        ),
        profile!(
            "JAPANESE_ENCEPHALITIS", "Japanese Encephalitis", Vector, Critical, 10, 0.30,
            [true, true, true], 1.2, 25, "A83.0", true
        ),
        profile!(
            "MEASLES", "Measles", Airborne, High, 14, 0.002,
            [false, false, false], 1.2, 30, "B05", true
        ),
    ]
}

/// Known diseases keyed by upper-case id. Built once at start-up.
#[derive(Debug, Clone)]
pub struct DiseaseRegistry {
    profiles: BTreeMap<&'static str, DiseaseProfile>,
}

impl DiseaseRegistry {
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.disease_id, p))
            .collect();
        Self { profiles }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, disease_id: &str) -> Option<&DiseaseProfile> {
        self.profiles
            .get(disease_id.trim().to_ascii_uppercase().as_str())
    }

    pub fn contains(&self, disease_id: &str) -> bool {
        self.get(disease_id).is_some()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &DiseaseProfile> {
        self.profiles.values()
    }

    /// Profiles grouped by how the disease spreads.
    pub fn by_transmission(&self) -> BTreeMap<TransmissionMode, Vec<&DiseaseProfile>> {
        let mut groups: BTreeMap<TransmissionMode, Vec<&DiseaseProfile>> = BTreeMap::new();
        for profile in self.profiles() {
            groups.entry(profile.transmission_mode).or_default().push(profile);
        }
        groups
    }
}

impl Default for DiseaseRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
