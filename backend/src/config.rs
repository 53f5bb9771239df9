//! Core configuration loaded from TOML.
//!
//! Institutional parameters (clinic-day mapping, FMIT and night-float rules,
//! swap windows, resilience thresholds) are configuration, not code; every
//! field has a default so an empty file is a valid configuration.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::models::Session;

/// Tier-1 regulatory limits. Defaults are the ACGME figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryLimits {
    #[serde(default = "default_max_weekly_hours")]
    pub max_weekly_hours: f64,
    #[serde(default = "default_rolling_window_days")]
    pub rolling_window_days: u32,
    #[serde(default = "default_min_days_off")]
    pub min_days_off_in_window: u32,
    #[serde(default = "default_days_off_window")]
    pub days_off_window_days: u32,
    #[serde(default = "default_max_consecutive_duty_days")]
    pub max_consecutive_duty_days: u32,
    #[serde(default = "default_pgy1_duty_period_hours")]
    pub pgy1_duty_period_hours: f64,
    #[serde(default = "default_pgy2plus_duty_period_hours")]
    pub pgy2plus_duty_period_hours: f64,
    #[serde(default = "default_transition_hours")]
    pub transition_hours: f64,
    #[serde(default = "default_pgy1_min_rest_hours")]
    pub pgy1_min_rest_hours: f64,
    #[serde(default = "default_pgy2plus_min_rest_hours")]
    pub pgy2plus_min_rest_hours: f64,
    #[serde(default = "default_max_consecutive_nights")]
    pub max_consecutive_nights: u32,
    #[serde(default = "default_max_call_ratio")]
    pub max_call_ratio: f64,
    #[serde(default = "default_pgy1_per_faculty")]
    pub pgy1_max_per_faculty: u32,
    #[serde(default = "default_pgy2plus_per_faculty")]
    pub pgy2plus_max_per_faculty: u32,
}

impl Default for RegulatoryLimits {
    fn default() -> Self {
        toml::from_str("").expect("empty regulatory limits parse")
    }
}

fn default_max_weekly_hours() -> f64 {
    80.0
}
fn default_rolling_window_days() -> u32 {
    28
}
fn default_min_days_off() -> u32 {
    4
}
fn default_days_off_window() -> u32 {
    28
}
fn default_max_consecutive_duty_days() -> u32 {
    6
}
fn default_pgy1_duty_period_hours() -> f64 {
    16.0
}
fn default_pgy2plus_duty_period_hours() -> f64 {
    24.0
}
fn default_transition_hours() -> f64 {
    4.0
}
fn default_pgy1_min_rest_hours() -> f64 {
    10.0
}
fn default_pgy2plus_min_rest_hours() -> f64 {
    8.0
}
fn default_max_consecutive_nights() -> u32 {
    6
}
fn default_max_call_ratio() -> f64 {
    1.0 / 3.0
}
fn default_pgy1_per_faculty() -> u32 {
    2
}
fn default_pgy2plus_per_faculty() -> u32 {
    4
}

/// One row of the PGY clinic-day table, e.g. PGY-1 on Wednesday AM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicDayRule {
    pub pgy: u8,
    /// Weekday name, lowercase ("monday" .. "sunday").
    pub weekday: String,
    pub session: Session,
}

impl ClinicDayRule {
    pub fn weekday_parsed(&self) -> Option<Weekday> {
        match self.weekday.to_ascii_lowercase().as_str() {
            "monday" => Some(Weekday::Mon),
            "tuesday" => Some(Weekday::Tue),
            "wednesday" => Some(Weekday::Wed),
            "thursday" => Some(Weekday::Thu),
            "friday" => Some(Weekday::Fri),
            "saturday" => Some(Weekday::Sat),
            "sunday" => Some(Weekday::Sun),
            _ => None,
        }
    }
}

/// Tier-2 institutional parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionalRules {
    #[serde(default = "default_fmit_max_consecutive_weeks")]
    pub fmit_max_consecutive_weeks: u32,
    #[serde(default = "default_post_fmit_blocked_days")]
    pub post_fmit_blocked_days: u32,
    #[serde(default = "default_night_float_headcount")]
    pub night_float_headcount: u32,
    #[serde(default = "default_clinic_days")]
    pub clinic_days: Vec<ClinicDayRule>,
    /// Activity types excluded on a post-call day.
    #[serde(default = "default_post_call_exclusions")]
    pub post_call_excluded_activities: Vec<String>,
}

impl Default for InstitutionalRules {
    fn default() -> Self {
        toml::from_str("").expect("empty institutional rules parse")
    }
}

fn default_fmit_max_consecutive_weeks() -> u32 {
    1
}
fn default_post_fmit_blocked_days() -> u32 {
    3
}
fn default_night_float_headcount() -> u32 {
    1
}
fn default_clinic_days() -> Vec<ClinicDayRule> {
    vec![
        ClinicDayRule {
            pgy: 1,
            weekday: "wednesday".to_string(),
            session: Session::Am,
        },
        ClinicDayRule {
            pgy: 2,
            weekday: "tuesday".to_string(),
            session: Session::Pm,
        },
        ClinicDayRule {
            pgy: 3,
            weekday: "monday".to_string(),
            session: Session::Pm,
        },
    ]
}
fn default_post_call_exclusions() -> Vec<String> {
    vec![
        "inpatient".to_string(),
        "clinic".to_string(),
        "procedure".to_string(),
        "call".to_string(),
    ]
}

/// Soft-constraint weights. Regulatory and institutional tiers are hard and
/// carry fixed dominance weights; only these are tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftWeights {
    #[serde(default = "default_call_spacing_weight")]
    pub call_spacing: f64,
    #[serde(default = "default_call_spacing_min_gap")]
    pub call_spacing_min_gap_nights: u32,
    #[serde(default = "default_weekend_distribution_weight")]
    pub weekend_distribution: f64,
    #[serde(default = "default_workload_balance_weight")]
    pub workload_balance: f64,
    #[serde(default = "default_target_gini")]
    pub workload_target_gini: f64,
    #[serde(default = "default_preference_weight")]
    pub preference_honor: f64,
    #[serde(default = "default_template_balance_weight")]
    pub template_balance: f64,
}

impl Default for SoftWeights {
    fn default() -> Self {
        toml::from_str("").expect("empty soft weights parse")
    }
}

fn default_call_spacing_weight() -> f64 {
    8.0
}
fn default_call_spacing_min_gap() -> u32 {
    2
}
fn default_weekend_distribution_weight() -> f64 {
    4.0
}
fn default_workload_balance_weight() -> f64 {
    2.0
}
fn default_target_gini() -> f64 {
    0.15
}
fn default_preference_weight() -> f64 {
    1.0
}
fn default_template_balance_weight() -> f64 {
    2.0
}

/// Swap engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSettings {
    #[serde(default = "default_rollback_window_hours")]
    pub rollback_window_hours: u64,
    #[serde(default = "default_auto_match_threshold")]
    pub auto_match_threshold: f64,
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,
    #[serde(default = "default_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
}

impl Default for SwapSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty swap settings parse")
    }
}

fn default_rollback_window_hours() -> u64 {
    24
}
fn default_auto_match_threshold() -> f64 {
    0.6
}
fn default_max_chain_length() -> usize {
    5
}
fn default_execute_timeout_secs() -> u64 {
    30
}

/// Resilience analyzer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_degraded_utilization")]
    pub degraded_utilization: f64,
    #[serde(default = "default_degraded_n1")]
    pub degraded_n1_vulnerability: f64,
    #[serde(default = "default_n2_sample_threshold")]
    pub n2_sampling_threshold: usize,
    #[serde(default = "default_n2_min_samples")]
    pub n2_min_samples: usize,
    #[serde(default = "default_backfill_cap_secs")]
    pub backfill_cap_secs: u64,
    #[serde(default = "default_churn_window_days")]
    pub churn_window_days: u32,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty resilience settings parse")
    }
}

fn default_degraded_utilization() -> f64 {
    0.85
}
fn default_degraded_n1() -> f64 {
    0.30
}
fn default_n2_sample_threshold() -> usize {
    30
}
fn default_n2_min_samples() -> usize {
    100
}
fn default_backfill_cap_secs() -> u64 {
    10
}
fn default_churn_window_days() -> u32 {
    7
}

/// Engine-level parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_backup_max_age_hours")]
    pub backup_max_age_hours: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        toml::from_str("").expect("empty engine settings parse")
    }
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_num_workers() -> usize {
    8
}
fn default_backup_max_age_hours() -> u64 {
    2
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    50
}

/// Top-level configuration for the scheduling core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub limits: RegulatoryLimits,
    #[serde(default)]
    pub institutional: InstitutionalRules,
    #[serde(default)]
    pub soft: SoftWeights,
    #[serde(default)]
    pub swap: SwapSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl CoreConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
    }

    /// Clinic-day slot for a PGY level, if configured.
    pub fn clinic_day_for(&self, pgy: u8) -> Option<(Weekday, Session)> {
        self.institutional
            .clinic_days
            .iter()
            .find(|r| r.pgy == pgy)
            .and_then(|r| r.weekday_parsed().map(|w| (w, r.session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_acgme_defaults() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.limits.max_weekly_hours, 80.0);
        assert_eq!(config.limits.rolling_window_days, 28);
        assert_eq!(config.limits.max_consecutive_duty_days, 6);
        assert_eq!(config.limits.pgy1_duty_period_hours, 16.0);
        assert_eq!(config.soft.call_spacing, 8.0);
        assert_eq!(config.swap.rollback_window_hours, 24);
        assert_eq!(config.resilience.degraded_utilization, 0.85);
    }

    #[test]
    fn clinic_day_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.clinic_day_for(1), Some((Weekday::Wed, Session::Am)));
        assert_eq!(config.clinic_day_for(2), Some((Weekday::Tue, Session::Pm)));
        assert_eq!(config.clinic_day_for(3), Some((Weekday::Mon, Session::Pm)));
        assert_eq!(config.clinic_day_for(9), None);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[limits]\nmax_weekly_hours = 72.0\n\n[swap]\nrollback_window_hours = 48"
        )
        .unwrap();
        let config = CoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.limits.max_weekly_hours, 72.0);
        assert_eq!(config.limits.rolling_window_days, 28);
        assert_eq!(config.swap.rollback_window_hours, 48);
        assert_eq!(config.swap.max_chain_length, 5);
    }

    #[test]
    fn bad_weekday_yields_none() {
        let rule = ClinicDayRule {
            pgy: 1,
            weekday: "wednesdy".to_string(),
            session: Session::Am,
        };
        assert!(rule.weekday_parsed().is_none());
    }
}
