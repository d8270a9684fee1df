#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use tenancy_engines::simulation::{SimulationConfig, DEFAULT_SUCCESS_PROBABILITY};
use tenancy_engines::submission::SubmissionTrackerConfig;
use tenancy_kernel_contracts::{ContractViolation, Validate};
use tenancy_storage::DecodePolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL_MS_RANGE: std::ops::RangeInclusive<u64> = 100..=60_000;

/// Demo flag. Read once when the reconciler is built; never toggled at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Inactive,
    Active,
}

impl SimulationMode {
    pub fn is_active(self) -> bool {
        self == SimulationMode::Active
    }

    /// Accepts the same spellings the app's `?demo=` query parameter does.
    pub fn from_flag(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" | "demo" => SimulationMode::Active,
            _ => SimulationMode::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    pub simulation_mode: SimulationMode,
    pub poll_interval: Duration,
    pub submission: SubmissionTrackerConfig,
    pub simulation: SimulationConfig,
    pub decode_policy: DecodePolicy,
}

impl ReconcilerConfig {
    pub fn mvp_v1(simulation_mode: SimulationMode) -> Self {
        Self {
            simulation_mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
            submission: default_submission_config(simulation_mode),
            simulation: SimulationConfig::mvp_v1(),
            decode_policy: DecodePolicy::for_build(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Out-of-range or unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let simulation_mode = lookup("TENANCY_SIMULATION_MODE")
            .map(|v| SimulationMode::from_flag(&v))
            .unwrap_or(SimulationMode::Inactive);

        let poll_interval = lookup("TENANCY_POLL_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| POLL_INTERVAL_MS_RANGE.contains(v))
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let submission = lookup("TENANCY_SUBMISSION_WINDOW_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(|secs| SubmissionTrackerConfig {
                completion_window: Duration::from_secs(secs),
            })
            .unwrap_or_else(|| default_submission_config(simulation_mode));

        let success_probability = lookup("TENANCY_SIMULATION_SUCCESS_PROBABILITY")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|p| (0.0..=1.0).contains(p))
            .unwrap_or(DEFAULT_SUCCESS_PROBABILITY);

        let decode_policy = match lookup("TENANCY_STRICT_ROW_DECODE")
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("1" | "true" | "on" | "strict") => DecodePolicy::Strict,
            Some("0" | "false" | "off" | "lenient") => DecodePolicy::Lenient,
            _ => DecodePolicy::for_build(),
        };

        Self {
            simulation_mode,
            poll_interval,
            submission,
            simulation: SimulationConfig {
                success_probability,
            },
            decode_policy,
        }
    }
}

impl Validate for ReconcilerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let poll_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX);
        if !POLL_INTERVAL_MS_RANGE.contains(&poll_ms) {
            return Err(ContractViolation::InvalidRange {
                field: "reconciler_config.poll_interval",
                min: *POLL_INTERVAL_MS_RANGE.start() as f64,
                max: *POLL_INTERVAL_MS_RANGE.end() as f64,
                got: poll_ms as f64,
            });
        }
        if self.submission.completion_window.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "reconciler_config.submission.completion_window",
                reason: "must be > 0",
            });
        }
        self.simulation.validate()
    }
}

fn default_submission_config(mode: SimulationMode) -> SubmissionTrackerConfig {
    if mode.is_active() {
        SubmissionTrackerConfig::demo_v1()
    } else {
        SubmissionTrackerConfig::production_v1()
    }
}
