//! Driver configuration.
//!
//! Built once (either explicitly or from `WE_*` environment variables) and
//! handed to the driver at construction; nothing reads configuration lazily.

use crate::error::{Result, WeError};

/// How AdjustCount orders subgroups when choosing where to split or merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjustOrder {
    /// Lightest subgroup (by summed weight) first.
    #[default]
    AggregateWeight,
    /// Smallest subgroup (by walker count) first.
    Membership,
}

impl AdjustOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weight" | "aggregate_weight" => Some(Self::AggregateWeight),
            "membership" | "count" => Some(Self::Membership),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Split walkers heavier than this multiple of the ideal weight.
    pub split_threshold_factor: f64,
    /// Merge light walkers whose cumulative weight stays under this multiple of
    /// the ideal weight.
    pub merge_cutoff_factor: f64,
    pub largest_allowed_weight: Option<f64>,
    pub smallest_allowed_weight: Option<f64>,
    pub do_adjust_counts: bool,
    pub do_thresholds: bool,
    pub subgroup_policy: String,
    pub sorting_policy: String,
    pub rng_seed: u64,
    /// Run per-bin passes on the rayon pool. Output is identical either way.
    pub parallel: bool,
    /// Rayon pool size; `None` falls back to scheduler hints.
    pub threads: Option<usize>,
    pub adjust_order: AdjustOrder,
    /// Linkage radius for the `cluster` subgroup policy.
    pub subgroup_radius: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            split_threshold_factor: 2.0,
            merge_cutoff_factor: 1.0,
            largest_allowed_weight: None,
            smallest_allowed_weight: None,
            do_adjust_counts: true,
            do_thresholds: false,
            subgroup_policy: "trivial".to_string(),
            sorting_policy: "weight".to_string(),
            rng_seed: 0,
            parallel: true,
            threads: None,
            adjust_order: AdjustOrder::AggregateWeight,
            subgroup_radius: 0.1,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| WeError::config(format!("{key}={raw:?} could not be parsed"))),
        _ => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(WeError::config(format!("{key}={raw:?} is not a boolean"))),
        },
        _ => Ok(None),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl DriverConfig {
    /// Defaults overridden by any `WE_*` variables present, then validated.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("WE_SPLIT_THRESHOLD")? {
            cfg.split_threshold_factor = v;
        }
        if let Some(v) = env_parse("WE_MERGE_CUTOFF")? {
            cfg.merge_cutoff_factor = v;
        }
        if let Some(v) = env_parse("WE_LARGEST_ALLOWED_WEIGHT")? {
            cfg.largest_allowed_weight = Some(v);
        }
        if let Some(v) = env_parse("WE_SMALLEST_ALLOWED_WEIGHT")? {
            cfg.smallest_allowed_weight = Some(v);
        }
        if let Some(v) = env_bool("WE_ADJUST_COUNTS")? {
            cfg.do_adjust_counts = v;
        }
        if let Some(v) = env_bool("WE_THRESHOLDS")? {
            cfg.do_thresholds = v;
        }
        if let Some(v) = env_string("WE_SUBGROUP_POLICY") {
            cfg.subgroup_policy = v;
        }
        if let Some(v) = env_string("WE_SORTING_POLICY") {
            cfg.sorting_policy = v;
        }
        if let Some(v) = env_parse("WE_SEED")? {
            cfg.rng_seed = v;
        }
        if let Some(v) = env_bool("WE_PARALLEL")? {
            cfg.parallel = v;
        }
        if let Some(v) = env_parse("WE_THREADS")? {
            cfg.threads = Some(v);
        }
        if let Some(raw) = env_string("WE_ADJUST_ORDER") {
            cfg.adjust_order = AdjustOrder::parse(&raw)
                .ok_or_else(|| WeError::config(format!("WE_ADJUST_ORDER={raw:?} is unknown")))?;
        }
        if let Some(v) = env_parse("WE_SUBGROUP_RADIUS")? {
            cfg.subgroup_radius = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.split_threshold_factor >= 1.0) {
            return Err(WeError::config(format!(
                "split_threshold_factor must be >= 1 (got {})",
                self.split_threshold_factor
            )));
        }
        if !(self.merge_cutoff_factor > 0.0 && self.merge_cutoff_factor <= 1.0) {
            return Err(WeError::config(format!(
                "merge_cutoff_factor must lie in (0, 1] (got {})",
                self.merge_cutoff_factor
            )));
        }
        for (name, bound) in [
            ("largest_allowed_weight", self.largest_allowed_weight),
            ("smallest_allowed_weight", self.smallest_allowed_weight),
        ] {
            if let Some(b) = bound {
                if !(b > 0.0 && b.is_finite()) {
                    return Err(WeError::config(format!("{name} must be positive (got {b})")));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.smallest_allowed_weight, self.largest_allowed_weight) {
            if lo >= hi {
                return Err(WeError::config(format!(
                    "smallest_allowed_weight {lo} must be below largest_allowed_weight {hi}"
                )));
            }
        }
        if self.do_thresholds
            && self.largest_allowed_weight.is_none()
            && self.smallest_allowed_weight.is_none()
        {
            return Err(WeError::config(
                "do_thresholds requires largest_allowed_weight and/or smallest_allowed_weight",
            ));
        }
        if self.threads == Some(0) {
            return Err(WeError::config("threads must be at least 1"));
        }
        if !(self.subgroup_radius >= 0.0) {
            return Err(WeError::config("subgroup_radius must be non-negative"));
        }
        Ok(())
    }
}
