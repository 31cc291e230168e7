#![forbid(unsafe_code)]

//! Per-canvas virtualization configuration.
//!
//! A [`VirtualizationConfig`] is created once per canvas mount and replaced
//! wholesale when it changes; fields are private so a config can only come
//! from the validating builder, from serde (which runs the same validation),
//! or from the environment.
//!
//! # Environment
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `ARCHICANVAS_VIRTUALIZATION` | `enabled` | bool |
//! | `ARCHICANVAS_BUFFER_ZONE` | `buffer_zone` | non-negative float (screen px) |
//! | `ARCHICANVAS_MAX_VISIBLE` | `max_visible_items` | integer |
//! | `ARCHICANVAS_SPATIAL_INDEX` | `enable_spatial_index` | bool |
//! | `ARCHICANVAS_PERF_MONITOR` | `enable_performance_monitoring` | bool |
//! | `ARCHICANVAS_DEBUG` | `debug_mode` | bool |
//!
//! Invalid values are reported as diagnostics and the default is kept.

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lod::{self, LodThreshold};

const ENV_ENABLED: &str = "ARCHICANVAS_VIRTUALIZATION";
const ENV_BUFFER_ZONE: &str = "ARCHICANVAS_BUFFER_ZONE";
const ENV_MAX_VISIBLE: &str = "ARCHICANVAS_MAX_VISIBLE";
const ENV_SPATIAL_INDEX: &str = "ARCHICANVAS_SPATIAL_INDEX";
const ENV_PERF_MONITOR: &str = "ARCHICANVAS_PERF_MONITOR";
const ENV_DEBUG: &str = "ARCHICANVAS_DEBUG";

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Configuration parsed from the environment plus any diagnostics.
#[derive(Debug, Clone)]
pub struct VirtualizationConfigParse {
    pub config: VirtualizationConfig,
    pub errors: Vec<ConfigError>,
}

/// Virtualization settings for one canvas instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "VirtualizationConfigBuilder")]
pub struct VirtualizationConfig {
    enabled: bool,
    buffer_zone: f64,
    max_visible_items: usize,
    lod_thresholds: Vec<LodThreshold>,
    enable_spatial_index: bool,
    enable_performance_monitoring: bool,
    debug_mode: bool,
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_zone: 200.0,
            max_visible_items: 1000,
            lod_thresholds: lod::default_thresholds(),
            enable_spatial_index: true,
            enable_performance_monitoring: false,
            debug_mode: false,
        }
    }
}

impl VirtualizationConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> VirtualizationConfigBuilder {
        VirtualizationConfigBuilder::default()
    }

    /// Parse config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> VirtualizationConfigParse {
        Self::from_env_with(|key| env::var(key).ok())
    }

    /// Parse config through an arbitrary key lookup.
    pub fn from_env_with<F>(mut get: F) -> VirtualizationConfigParse
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut errors = Vec::new();

        let mut read_bool = |key: &str, field: &'static str, slot: &mut bool, errors: &mut Vec<ConfigError>| {
            if let Some(value) = get(key) {
                match parse_bool(&value) {
                    Some(parsed) => *slot = parsed,
                    None => errors.push(ConfigError::new(field, value, "expected bool (1/0/true/false)")),
                }
            }
        };
        read_bool(ENV_ENABLED, "enabled", &mut config.enabled, &mut errors);
        read_bool(
            ENV_SPATIAL_INDEX,
            "enable_spatial_index",
            &mut config.enable_spatial_index,
            &mut errors,
        );
        read_bool(
            ENV_PERF_MONITOR,
            "enable_performance_monitoring",
            &mut config.enable_performance_monitoring,
            &mut errors,
        );
        read_bool(ENV_DEBUG, "debug_mode", &mut config.debug_mode, &mut errors);

        if let Some(value) = get(ENV_BUFFER_ZONE) {
            match parse_f64(&value) {
                Some(parsed) if parsed >= 0.0 => config.buffer_zone = parsed,
                _ => errors.push(ConfigError::new(
                    "buffer_zone",
                    value,
                    "expected non-negative number",
                )),
            }
        }

        if let Some(value) = get(ENV_MAX_VISIBLE) {
            match parse_usize(&value) {
                Some(parsed) => config.max_visible_items = parsed,
                None => errors.push(ConfigError::new(
                    "max_visible_items",
                    value,
                    "expected non-negative integer",
                )),
            }
        }

        if let Err(mut validation) = config.validate() {
            errors.append(&mut validation);
        }

        VirtualizationConfigParse { config, errors }
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if !self.buffer_zone.is_finite() || self.buffer_zone < 0.0 {
            errors.push(ConfigError::new(
                "buffer_zone",
                self.buffer_zone.to_string(),
                "must be finite and >= 0",
            ));
        }
        validate_thresholds(&self.lod_thresholds, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Copy of this config with virtualization switched on or off.
    #[must_use]
    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Prefetch margin in screen pixels.
    pub fn buffer_zone(&self) -> f64 {
        self.buffer_zone
    }

    pub fn max_visible_items(&self) -> usize {
        self.max_visible_items
    }

    pub fn lod_thresholds(&self) -> &[LodThreshold] {
        &self.lod_thresholds
    }

    pub fn enable_spatial_index(&self) -> bool {
        self.enable_spatial_index
    }

    pub fn enable_performance_monitoring(&self) -> bool {
        self.enable_performance_monitoring
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Short human-readable summary for debug overlays.
    #[must_use]
    pub fn summary_short(&self) -> String {
        let enabled = if self.enabled { "on" } else { "off" };
        let index = if self.enable_spatial_index { "index" } else { "scan" };
        format!(
            "Virtualization: {enabled} · {index} · cap {} · buffer {}px",
            self.max_visible_items, self.buffer_zone
        )
    }
}

/// Builder for [`VirtualizationConfig`]; also the serde input shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualizationConfigBuilder {
    enabled: bool,
    buffer_zone: f64,
    max_visible_items: usize,
    lod_thresholds: Vec<LodThreshold>,
    enable_spatial_index: bool,
    enable_performance_monitoring: bool,
    debug_mode: bool,
}

impl Default for VirtualizationConfigBuilder {
    fn default() -> Self {
        let d = VirtualizationConfig::default();
        Self {
            enabled: d.enabled,
            buffer_zone: d.buffer_zone,
            max_visible_items: d.max_visible_items,
            lod_thresholds: d.lod_thresholds,
            enable_spatial_index: d.enable_spatial_index,
            enable_performance_monitoring: d.enable_performance_monitoring,
            debug_mode: d.debug_mode,
        }
    }
}

impl VirtualizationConfigBuilder {
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Prefetch margin in screen pixels.
    #[must_use]
    pub fn with_buffer_zone(mut self, px: f64) -> Self {
        self.buffer_zone = px;
        self
    }

    #[must_use]
    pub fn with_max_visible_items(mut self, cap: usize) -> Self {
        self.max_visible_items = cap;
        self
    }

    #[must_use]
    pub fn with_lod_thresholds(mut self, thresholds: Vec<LodThreshold>) -> Self {
        self.lod_thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_spatial_index(mut self, enabled: bool) -> Self {
        self.enable_spatial_index = enabled;
        self
    }

    #[must_use]
    pub fn with_performance_monitoring(mut self, enabled: bool) -> Self {
        self.enable_performance_monitoring = enabled;
        self
    }

    #[must_use]
    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Validate and produce the config, failing on the first violation.
    pub fn build(self) -> Result<VirtualizationConfig, ConfigError> {
        let config = VirtualizationConfig {
            enabled: self.enabled,
            buffer_zone: self.buffer_zone,
            max_visible_items: self.max_visible_items,
            lod_thresholds: self.lod_thresholds,
            enable_spatial_index: self.enable_spatial_index,
            enable_performance_monitoring: self.enable_performance_monitoring,
            debug_mode: self.debug_mode,
        };
        match config.validate() {
            Ok(()) => Ok(config),
            Err(mut errors) => Err(errors.swap_remove(0)),
        }
    }
}

impl TryFrom<VirtualizationConfigBuilder> for VirtualizationConfig {
    type Error = ConfigError;

    fn try_from(builder: VirtualizationConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

fn validate_thresholds(thresholds: &[LodThreshold], errors: &mut Vec<ConfigError>) {
    if thresholds.is_empty() {
        errors.push(ConfigError::new("lod_thresholds", "[]", "must not be empty"));
        return;
    }
    for (i, t) in thresholds.iter().enumerate() {
        if t.zoom_ceiling.is_nan() || t.zoom_ceiling <= 0.0 {
            errors.push(ConfigError::new(
                "lod_thresholds",
                format!("[{i}].zoom_ceiling={}", t.zoom_ceiling),
                "zoom ceiling must be > 0",
            ));
        }
    }
    for (i, pair) in thresholds.windows(2).enumerate() {
        let (a, b) = (&pair[0], &pair[1]);
        if !(a.zoom_ceiling < b.zoom_ceiling) {
            errors.push(ConfigError::new(
                "lod_thresholds",
                format!("[{}]={} >= [{}]={}", i, a.zoom_ceiling, i + 1, b.zoom_ceiling),
                "zoom ceilings must be strictly ascending",
            ));
        }
        if a.level > b.level {
            errors.push(ConfigError::new(
                "lod_thresholds",
                format!("[{}]={} > [{}]={}", i, a.level.as_str(), i + 1, b.level.as_str()),
                "levels must be non-decreasing",
            ));
        }
    }
}

#[inline]
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[inline]
fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse().ok()
}

#[inline]
fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lod::LodLevel;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate() {
        let config = VirtualizationConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enabled());
        assert_eq!(config.max_visible_items(), 1000);
        assert_eq!(config.lod_thresholds().len(), 3);
    }

    #[test]
    fn builder_rejects_negative_buffer_zone() {
        let err = VirtualizationConfig::builder()
            .with_buffer_zone(-5.0)
            .build()
            .unwrap_err();
        assert_eq!(err.field, "buffer_zone");
    }

    #[test]
    fn builder_rejects_unsorted_thresholds() {
        let err = VirtualizationConfig::builder()
            .with_lod_thresholds(vec![
                LodThreshold::new(1.0, LodLevel::Medium, true, false),
                LodThreshold::new(0.5, LodLevel::High, true, true),
            ])
            .build()
            .unwrap_err();
        assert_eq!(err.field, "lod_thresholds");
        assert!(err.message.contains("ascending"));
    }

    #[test]
    fn validate_reports_every_violation() {
        let config = VirtualizationConfig {
            buffer_zone: f64::NAN,
            lod_thresholds: vec![
                LodThreshold::new(1.0, LodLevel::High, true, true),
                LodThreshold::new(2.0, LodLevel::Low, false, false),
            ],
            ..VirtualizationConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("non-decreasing")));
    }

    #[test]
    fn empty_thresholds_rejected() {
        let err = VirtualizationConfig::builder()
            .with_lod_thresholds(Vec::new())
            .build()
            .unwrap_err();
        assert!(err.message.contains("empty"));
    }

    #[test]
    fn zero_cap_is_allowed() {
        let config = VirtualizationConfig::builder()
            .with_max_visible_items(0)
            .build()
            .unwrap();
        assert_eq!(config.max_visible_items(), 0);
    }

    #[test]
    fn with_enabled_replaces_wholesale() {
        let on = VirtualizationConfig::default();
        let off = on.with_enabled(false);
        assert!(on.enabled());
        assert!(!off.enabled());
        assert_eq!(off.max_visible_items(), on.max_visible_items());
    }

    #[test]
    fn env_overrides_apply() {
        let parse = VirtualizationConfig::from_env_with(lookup(&[
            (ENV_ENABLED, "off"),
            (ENV_BUFFER_ZONE, "64"),
            (ENV_MAX_VISIBLE, "250"),
            (ENV_SPATIAL_INDEX, "0"),
            (ENV_PERF_MONITOR, "yes"),
            (ENV_DEBUG, "true"),
        ]));
        assert!(parse.errors.is_empty(), "{:?}", parse.errors);
        let c = parse.config;
        assert!(!c.enabled());
        assert_eq!(c.buffer_zone(), 64.0);
        assert_eq!(c.max_visible_items(), 250);
        assert!(!c.enable_spatial_index());
        assert!(c.enable_performance_monitoring());
        assert!(c.debug_mode());
    }

    #[test]
    fn env_invalid_values_keep_defaults() {
        let parse = VirtualizationConfig::from_env_with(lookup(&[
            (ENV_BUFFER_ZONE, "-1"),
            (ENV_MAX_VISIBLE, "lots"),
            (ENV_DEBUG, "maybe"),
        ]));
        assert_eq!(parse.errors.len(), 3);
        assert_eq!(parse.config, VirtualizationConfig::default());
        let fields: Vec<&str> = parse.errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"buffer_zone"));
        assert!(fields.contains(&"max_visible_items"));
        assert!(fields.contains(&"debug_mode"));
    }

    #[test]
    fn serde_round_trip_validates() {
        let json = serde_json::to_string(&VirtualizationConfig::default()).unwrap();
        assert!(json.contains("\"maxVisibleItems\":1000"));
        let back: VirtualizationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VirtualizationConfig::default());

        let bad = r#"{"bufferZone": -10}"#;
        assert!(serde_json::from_str::<VirtualizationConfig>(bad).is_err());
    }

    #[test]
    fn display_includes_field_and_value() {
        let err = ConfigError::new("buffer_zone", "-1", "must be finite and >= 0");
        assert_eq!(err.to_string(), "buffer_zone=-1 (must be finite and >= 0)");
    }
}
