//! Simulation configuration and scenario loading
//!
//! All durations are milliseconds of simulated time.

use serde::Deserialize;
use std::path::Path;

use super::error::ConfigurationError;
use super::geometry::Vector2D;
use super::world::SimWorld;

/// Tunables shared by every terminal and signal in a world
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Radius growth per millisecond, before `PROPAGATION_SCALE`
    pub growth_rate: f64,
    /// Radius at which a signal has reached everything it ever will
    pub max_radius: f64,
    /// Poisson rate (per ms) of RTS origination; zero disables it
    pub rts_rate: f64,
    /// Length of one backoff slot
    pub backoff_unit: f64,
    /// Gap a terminal keeps after its own transmission finishes
    pub inter_frame_space: f64,
    /// How long a sent RTS waits for its CTS
    pub cts_timeout: f64,
    /// RTS retries after CTS timeouts before the request is dropped
    pub max_rts_retries: u32,
    /// How long a sent DATA frame waits for its ACK
    pub ack_timeout: f64,
    /// Automatic DATA resends before the delivery is abandoned
    pub max_data_retries: u32,
    /// How long an overheard foreign CTS silences a terminal
    pub quiet_timeout: f64,
    /// Reservation advertised in RTS and CTS frames
    pub reservation: f64,
    /// How long a finished signal stays in the world
    pub retention: f64,
    /// DATA payload length in bytes
    pub data_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            growth_rate: 10.0,
            max_radius: 128.0,
            rts_rate: 0.0005,
            backoff_unit: 200.0,
            inter_frame_space: 50.0,
            cts_timeout: 3000.0,
            max_rts_retries: 4,
            ack_timeout: 3000.0,
            max_data_retries: 3,
            quiet_timeout: 5000.0,
            reservation: 4000.0,
            retention: 500.0,
            data_size: 32,
        }
    }
}

impl SimConfig {
    /// Reject parameters the tick loop cannot work with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_signal(self.growth_rate, self.max_radius)?;

        let non_negative = [
            ("rts_rate", self.rts_rate),
            ("backoff_unit", self.backoff_unit),
            ("inter_frame_space", self.inter_frame_space),
            ("cts_timeout", self.cts_timeout),
            ("ack_timeout", self.ack_timeout),
            ("quiet_timeout", self.quiet_timeout),
            ("reservation", self.reservation),
            ("retention", self.retention),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

/// Growth rate and ceiling must both be strictly positive and finite
pub fn validate_signal(growth_rate: f64, max_radius: f64) -> Result<(), ConfigurationError> {
    if growth_rate.is_nan() || growth_rate <= 0.0 {
        return Err(ConfigurationError::NonPositiveGrowthRate(growth_rate));
    }
    if !growth_rate.is_finite() {
        return Err(ConfigurationError::InvalidParameter {
            name: "growth_rate",
            value: growth_rate,
        });
    }
    if max_radius.is_nan() || max_radius <= 0.0 {
        return Err(ConfigurationError::NonPositiveMaxRadius(max_radius));
    }
    if !max_radius.is_finite() {
        return Err(ConfigurationError::InvalidParameter {
            name: "max_radius",
            value: max_radius,
        });
    }
    Ok(())
}

/// A sensing range is optional, but when present it must be a non-negative distance
pub fn validate_range(range: Option<f64>) -> Result<(), ConfigurationError> {
    match range {
        Some(r) if r.is_nan() || r < 0.0 => Err(ConfigurationError::NegativeRange(r)),
        _ => Ok(()),
    }
}

/// One terminal placement in a scenario file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalSpec {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub range: Option<f64>,
}

/// A world description loaded from TOML
///
/// ```toml
/// seed = 7
///
/// [config]
/// rts_rate = 0.001
///
/// [[terminals]]
/// x = 0.0
/// y = 0.0
/// range = 150.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub config: SimConfig,
    #[serde(default)]
    pub terminals: Vec<TerminalSpec>,
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::Load(e.to_string()))
    }

    /// Load a scenario from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Build a populated world. `seed_override` wins over the file's seed.
    pub fn build(&self, seed_override: Option<u64>) -> Result<SimWorld, ConfigurationError> {
        let seed = seed_override.or(self.seed);
        let mut world = SimWorld::with_config(self.config, seed)?;
        for placement in &self.terminals {
            world.add_terminal(Vector2D::new(placement.x, placement.y), placement.range)?;
        }
        Ok(world)
    }
}
