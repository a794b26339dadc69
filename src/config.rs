//! TOML-based station configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::station::billing::{TariffTable, TariffWindow};
use crate::station::strategy::StrategyKind;
use crate::station::types::Mode;

/// Top-level station configuration parsed from TOML.
///
/// All fields have defaults matching the reference deployment: three fast
/// piles at 30 units/h, three slow piles at 7 units/h, six waiting slots
/// per mode, and the standard three-tier tariff. Load from TOML with
/// [`StationConfig::from_toml_file`] or use [`StationConfig::standard`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Scheduling and billing parameters.
    pub station: StationSection,
    /// Waiting-area capacities.
    pub queues: QueueConfig,
    /// The fixed pile set; piles are not provisioned at runtime.
    pub piles: Vec<PileConfig>,
    /// Time-of-day tariff windows, contiguous from midnight to midnight.
    pub tariff: Vec<TariffWindow>,
}

/// Scheduling and billing parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationSection {
    /// Initial scheduling strategy: `"priority"` or `"time_order"`.
    pub strategy: StrategyKind,
    /// Service fee as a fraction of the energy cost.
    pub service_fee_rate: f64,
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::TimeOrder,
            service_fee_rate: 0.1,
        }
    }
}

/// Waiting-area capacities, per mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum waiting fast requests.
    pub fast_capacity: usize,
    /// Maximum waiting slow requests.
    pub slow_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fast_capacity: 6,
            slow_capacity: 6,
        }
    }
}

/// One charging pile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PileConfig {
    /// Unique pile identifier, e.g. `"A"`.
    pub id: String,
    /// Charging mode this pile serves.
    pub mode: Mode,
    /// Delivery rate in energy units per hour.
    pub rate: f64,
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"queues.fast_capacity"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {} — {}", self.field, self.message)
    }
}

fn default_piles() -> Vec<PileConfig> {
    let pile = |id: &str, mode, rate| PileConfig {
        id: id.to_string(),
        mode,
        rate,
    };
    vec![
        pile("A", Mode::Fast, 30.0),
        pile("B", Mode::Fast, 30.0),
        pile("C", Mode::Fast, 30.0),
        pile("D", Mode::Slow, 7.0),
        pile("E", Mode::Slow, 7.0),
        pile("F", Mode::Slow, 7.0),
    ]
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl StationConfig {
    /// Returns the reference deployment: piles A–C fast, D–F slow.
    pub fn standard() -> Self {
        Self {
            station: StationSection::default(),
            queues: QueueConfig::default(),
            piles: default_piles(),
            tariff: TariffTable::standard().windows().to_vec(),
        }
    }

    /// Returns a minimal station for deterministic tests: one pile per
    /// mode and two waiting slots per mode.
    pub fn compact() -> Self {
        Self {
            station: StationSection::default(),
            queues: QueueConfig {
                fast_capacity: 2,
                slow_capacity: 2,
            },
            piles: vec![
                PileConfig {
                    id: "A".to_string(),
                    mode: Mode::Fast,
                    rate: 30.0,
                },
                PileConfig {
                    id: "D".to_string(),
                    mode: Mode::Slow,
                    rate: 7.0,
                },
            ],
            tariff: TariffTable::standard().windows().to_vec(),
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["standard", "compact"];

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "standard" => Ok(Self::standard()),
            "compact" => Ok(Self::compact()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let s = &self.station;
        if !(s.service_fee_rate.is_finite() && (0.0..1.0).contains(&s.service_fee_rate)) {
            errors.push(ConfigError {
                field: "station.service_fee_rate".into(),
                message: "must be in [0.0, 1.0)".into(),
            });
        }

        if self.queues.fast_capacity == 0 {
            errors.push(ConfigError {
                field: "queues.fast_capacity".into(),
                message: "must be > 0".into(),
            });
        }
        if self.queues.slow_capacity == 0 {
            errors.push(ConfigError {
                field: "queues.slow_capacity".into(),
                message: "must be > 0".into(),
            });
        }

        if self.piles.is_empty() {
            errors.push(ConfigError {
                field: "piles".into(),
                message: "at least one pile is required".into(),
            });
        }
        for (i, pile) in self.piles.iter().enumerate() {
            if pile.id.trim().is_empty() {
                errors.push(ConfigError {
                    field: format!("piles[{i}].id"),
                    message: "must be non-empty".into(),
                });
            }
            if !(pile.rate.is_finite() && pile.rate > 0.0) {
                errors.push(ConfigError {
                    field: format!("piles[{i}].rate"),
                    message: "must be finite and > 0".into(),
                });
            }
            if self.piles[..i].iter().any(|p| p.id == pile.id) {
                errors.push(ConfigError {
                    field: format!("piles[{i}].id"),
                    message: format!("duplicate pile id \"{}\"", pile.id),
                });
            }
        }

        if let Err(e) = TariffTable::new(self.tariff.clone()) {
            errors.push(ConfigError {
                field: "tariff".into(),
                message: e.to_string(),
            });
        }

        errors
    }

    /// Builds the tariff table from the configured windows.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a malformed window list; [`Self::validate`]
    /// reports the same condition.
    pub fn tariff_table(&self) -> Result<TariffTable, ConfigError> {
        TariffTable::new(self.tariff.clone()).map_err(|e| ConfigError {
            field: "tariff".into(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_preset_valid() {
        let cfg = StationConfig::standard();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "standard should be valid: {errors:?}");
        assert_eq!(cfg.piles.len(), 6);
    }

    #[test]
    fn compact_preset_valid() {
        let cfg = StationConfig::compact();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "compact should be valid: {errors:?}");
        assert_eq!(cfg.queues.fast_capacity, 2);
    }

    #[test]
    fn from_preset_unknown() {
        let err = StationConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[station]
strategy = "priority"
service_fee_rate = 0.05

[queues]
fast_capacity = 4
slow_capacity = 8

[[piles]]
id = "A"
mode = "fast"
rate = 60.0

[[piles]]
id = "D"
mode = "slow"
rate = 7.0

[[tariff]]
start = "00:00:00"
end = "12:00:00"
rate = 0.5
tier = "valley"

[[tariff]]
start = "12:00:00"
end = "00:00:00"
rate = 1.0
tier = "peak"
"#;
        let cfg = StationConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(
            cfg.as_ref().map(|c| c.station.strategy),
            Some(StrategyKind::Priority)
        );
        assert_eq!(cfg.as_ref().map(|c| c.queues.fast_capacity), Some(4));
        assert_eq!(cfg.as_ref().map(|c| c.piles.len()), Some(2));
        assert_eq!(cfg.as_ref().map(|c| c.validate().len()), Some(0));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[station]
strategy = "time_order"
bogus_field = true
"#;
        let result = StationConfig::from_toml_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[queues]
fast_capacity = 3
"#;
        let cfg = StationConfig::from_toml_str(toml);
        assert!(cfg.is_ok());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.queues.fast_capacity), Some(3));
        // slow capacity and piles kept default
        assert_eq!(cfg.as_ref().map(|c| c.queues.slow_capacity), Some(6));
        assert_eq!(cfg.as_ref().map(|c| c.piles.len()), Some(6));
    }

    #[test]
    fn validation_catches_zero_capacity() {
        let mut cfg = StationConfig::standard();
        cfg.queues.fast_capacity = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "queues.fast_capacity"));
    }

    #[test]
    fn validation_catches_duplicate_pile_ids() {
        let mut cfg = StationConfig::standard();
        cfg.piles[1].id = "A".into();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.message.contains("duplicate")));
    }

    #[test]
    fn validation_catches_bad_service_fee() {
        let mut cfg = StationConfig::standard();
        cfg.station.service_fee_rate = 1.5;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "station.service_fee_rate"));
    }

    #[test]
    fn validation_catches_gapped_tariff() {
        let mut cfg = StationConfig::standard();
        cfg.tariff.remove(2);
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "tariff"));
    }

    #[test]
    fn validation_catches_nonpositive_rate() {
        let mut cfg = StationConfig::standard();
        cfg.piles[0].rate = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "piles[0].rate"));
    }
}
