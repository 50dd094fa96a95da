use crate::clock::{self, ClockError, RolloverPolicy, Timetables, WeekendPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const CONFIG_ENV: &str = "CAMPUSD_CONFIG";

const REFERENCE_JSON: &str = include_str!("../assets/reference.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config is not valid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("preset {key}: {message}")]
    Preset { key: String, message: String },
    #[error("timetable {key}: {source}")]
    Timetable {
        key: String,
        #[source]
        source: ClockError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Subject list and credit hours for one class, in calculator order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub subjects: Vec<String>,
    pub hours: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleSettings {
    pub rollover_policy: RolloverPolicy,
    pub weekend_policy: WeekendPolicy,
    pub tick_interval_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            rollover_policy: RolloverPolicy::AutoAdvance,
            weekend_policy: WeekendPolicy::ShowFirstDay,
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSettings {
    pub email_domain: String,
    /// Student-number prefix to grade, e.g. `nv22` => 12.
    pub cohorts: BTreeMap<String, i64>,
    pub bootstrap_admins: Vec<String>,
    pub min_password_length: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            email_domain: "nvtc.edu.bh".to_string(),
            cohorts: BTreeMap::new(),
            bootstrap_admins: Vec::new(),
            min_password_length: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeadlineSettings {
    pub caution_days: i64,
    pub safe_days: i64,
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            caution_days: 2,
            safe_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedSettings {
    pub poll_interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
        }
    }
}

/// Reference data and policies, loaded once at startup and read-only after.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub presets: BTreeMap<String, Preset>,
    pub timetables: Timetables,
    pub schedule: ScheduleSettings,
    pub auth: AuthSettings,
    pub specialties: Vec<Specialty>,
    pub deadlines: DeadlineSettings,
    pub feeds: FeedSettings,
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The reference data compiled into the binary.
    pub fn reference() -> Result<Self, ConfigError> {
        Self::from_json(REFERENCE_JSON)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// `$CAMPUSD_CONFIG` when set, otherwise the built-in reference data.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => Self::from_path(Path::new(&p)),
            _ => Self::reference(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, preset) in &self.presets {
            if preset.subjects.len() != preset.hours.len() {
                return Err(ConfigError::Preset {
                    key: key.clone(),
                    message: format!(
                        "{} subjects but {} hour entries",
                        preset.subjects.len(),
                        preset.hours.len()
                    ),
                });
            }
            if let Some(h) = preset.hours.iter().find(|h| !(h.is_finite() && **h > 0.0)) {
                return Err(ConfigError::Preset {
                    key: key.clone(),
                    message: format!("hours must be positive, got {h}"),
                });
            }
        }
        for (key, week) in &self.timetables {
            for (weekday, periods) in &week.schedules {
                if !clock::is_school_day(*weekday) {
                    return Err(ConfigError::Invalid(format!(
                        "timetable {key}: weekday {weekday} is outside the school week"
                    )));
                }
                clock::validate_day(*weekday, periods).map_err(|source| {
                    ConfigError::Timetable {
                        key: key.clone(),
                        source,
                    }
                })?;
            }
        }
        if self.schedule.tick_interval_ms == 0 || self.feeds.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timer intervals must be greater than zero".to_string(),
            ));
        }
        if self.deadlines.caution_days > self.deadlines.safe_days {
            return Err(ConfigError::Invalid(format!(
                "deadlines.cautionDays ({}) exceeds deadlines.safeDays ({})",
                self.deadlines.caution_days, self.deadlines.safe_days
            )));
        }
        Ok(())
    }

    pub fn specialty_by_name(&self, name: &str) -> Option<&Specialty> {
        self.specialties.iter().find(|s| s.name == name)
    }

    pub fn specialty_by_code(&self, code: &str) -> Option<&Specialty> {
        self.specialties.iter().find(|s| s.code == code)
    }

    /// Class key to fall back on when a request names none.
    pub fn default_class_key(&self) -> Option<&str> {
        self.timetables.keys().next().map(|k| k.as_str())
    }
}
