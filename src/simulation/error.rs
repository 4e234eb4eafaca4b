//! Errors raised while building a simulation
//!
//! Steady-state ticking never fails; everything here is caught at
//! construction time.

use super::types::TerminalId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("signal growth rate must be strictly positive, got {0}")]
    NonPositiveGrowthRate(f64),

    #[error("signal maximum radius must be strictly positive, got {0}")]
    NonPositiveMaxRadius(f64),

    #[error("terminal sensing range must be non-negative, got {0}")]
    NegativeRange(f64),

    #[error("invalid value for `{name}`: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("terminal not found: {0}")]
    UnknownTerminal(TerminalId),

    #[error("failed to load scenario: {0}")]
    Load(String),
}
