//! Application-level configuration loading, including the problem catalog.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    dao::models::{ContestConfigEntity, SubjectSettingsEntity},
    state::{
        contest::{AnswerKind, SubjectId},
        coordinator::DEFAULT_RETRY_BUDGET,
    },
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CONTEST_ARENA_CONFIG_PATH";

/// Linear difficulty estimate: `base + step * (index - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DifficultyCurve {
    pub base: f64,
    pub step: f64,
}

impl DifficultyCurve {
    pub fn estimate(&self, index: u32) -> f64 {
        self.base + self.step * f64::from(index.saturating_sub(1))
    }
}

/// Everything the server knows about one subject.
#[derive(Debug, Clone, Deserialize)]
pub struct SubjectConfig {
    pub display_name: String,
    pub answer_kind: AnswerKind,
    #[serde(default)]
    pub default_problem_count: u32,
    pub correct_score: f64,
    pub blank_score: f64,
    pub difficulty: DifficultyCurve,
    /// Problem references, e.g. `2019_AMC_10A_Problems/Problem_5`.
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub default_max_participants: u32,
    pub default_round_minutes: u32,
    pub retry_budget: u32,
    pub fetch_timeout_ms: u64,
    pub subjects: IndexMap<SubjectId, SubjectConfig>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        subjects = config.subjects.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    pub fn subject(&self, id: &SubjectId) -> Option<&SubjectConfig> {
        self.subjects.get(id)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Settings a freshly created room starts with.
    pub fn default_contest(&self) -> ContestConfigEntity {
        let subjects = self
            .subjects
            .iter()
            .map(|(id, subject)| {
                (
                    id.clone(),
                    SubjectSettingsEntity {
                        selected: subject.default_problem_count > 0,
                        problem_count: subject.default_problem_count,
                        correct_score: subject.correct_score,
                        blank_score: subject.blank_score,
                    },
                )
            })
            .collect();
        ContestConfigEntity { subjects }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_max_participants: 8,
            default_round_minutes: 60,
            retry_budget: DEFAULT_RETRY_BUDGET,
            fetch_timeout_ms: 10_000,
            subjects: default_subjects(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in catalog shipped with the binary.
fn default_subjects() -> IndexMap<SubjectId, SubjectConfig> {
    let years = 2010..=2023;
    let amc = |level: &str, variants: &[&str]| -> Vec<String> {
        years
            .clone()
            .flat_map(|year| {
                variants.iter().flat_map(move |variant| {
                    (1..=25).map(move |n| format!("{year}_AMC_{level}{variant}_Problems/Problem_{n}"))
                })
            })
            .collect()
    };
    let aime: Vec<String> = years
        .clone()
        .flat_map(|year| {
            ["I", "II"].into_iter().flat_map(move |part| {
                (1..=15).map(move |n| format!("{year}_AIME_{part}_Problems/Problem_{n}"))
            })
        })
        .collect();

    let multiple_choice = |display_name: &str, count, base, step, pool| SubjectConfig {
        display_name: display_name.to_string(),
        answer_kind: AnswerKind::MultipleChoice,
        default_problem_count: count,
        correct_score: 6.0,
        blank_score: 1.5,
        difficulty: DifficultyCurve { base, step },
        pool,
    };

    IndexMap::from([
        (
            SubjectId::new("amc8"),
            multiple_choice("AMC 8", 0, 1.0, 0.12, amc("8", &[""])),
        ),
        (
            SubjectId::new("amc10"),
            multiple_choice("AMC 10", 10, 2.0, 0.15, amc("10", &["A", "B"])),
        ),
        (
            SubjectId::new("amc12"),
            multiple_choice("AMC 12", 0, 2.5, 0.18, amc("12", &["A", "B"])),
        ),
        (
            SubjectId::new("aime"),
            SubjectConfig {
                display_name: "AIME".into(),
                answer_kind: AnswerKind::Integer,
                default_problem_count: 0,
                correct_score: 10.0,
                blank_score: 0.0,
                difficulty: DifficultyCurve {
                    base: 5.0,
                    step: 0.3,
                },
                pool: aime,
            },
        ),
    ])
}
