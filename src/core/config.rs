//! Protocol configuration and parameters.
//!
//! This module defines all configurable parameters of both engines.
//! Configuration can be built from defaults, loaded from a JSON file, and
//! overridden from environment variables:
//! - `SWAPLEND_ADMIN` - hex address of the lending administrator
//! - `SWAPLEND_FEE_PER_MILLE` - AMM swap fee
//! - `SWAPLEND_MAX_EVENTS` - events retained in memory per engine

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::validation::validate_fee;

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// AMM engine parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmParams {
    /// Swap fee in per mille (3 = 0.3%)
    pub fee_per_mille: u128,
    /// Maximum events kept in memory
    pub max_events: usize,
}

impl Default for AmmParams {
    fn default() -> Self {
        Self {
            fee_per_mille: DEFAULT_FEE_PER_MILLE,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// Lending engine parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingParams {
    /// Nominal annual borrow rate reported on borrow events (WAD)
    pub nominal_borrow_rate: u128,
    /// Maximum events kept in memory
    pub max_events: usize,
}

impl Default for LendingParams {
    fn default() -> Self {
        Self {
            nominal_borrow_rate: NOMINAL_BORROW_RATE,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Complete protocol configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Single administrative authority of the lending engine
    pub admin: Address,
    /// AMM parameters
    #[serde(default)]
    pub amm: AmmParams,
    /// Lending parameters
    #[serde(default)]
    pub lending: LendingParams,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            admin: Address::from_label("admin"),
            amm: AmmParams::default(),
            lending: LendingParams::default(),
        }
    }
}

impl ProtocolConfig {
    /// Create a configuration with the given administrator
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            ..Default::default()
        }
    }

    /// Override the swap fee
    pub fn with_fee(mut self, fee_per_mille: u128) -> Self {
        self.amm.fee_per_mille = fee_per_mille;
        self
    }

    /// Override event retention for both engines
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.amm.max_events = max_events;
        self.lending.max_events = max_events;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        validate_fee(self.amm.fee_per_mille)?;
        if self.lending.nominal_borrow_rate > WAD {
            return Err(Error::Config(format!(
                "nominal borrow rate {} exceeds 100%",
                self.lending.nominal_borrow_rate
            )));
        }
        if self.amm.max_events == 0 || self.lending.max_events == 0 {
            return Err(Error::Config("max_events must be greater than 0".into()));
        }
        Ok(())
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| Error::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("{}: {}", parent.display(), e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(admin) = std::env::var("SWAPLEND_ADMIN") {
            self.admin = Address::from_hex(&admin)
                .map_err(|e| Error::Config(format!("SWAPLEND_ADMIN: {}", e)))?;
        }

        if let Ok(fee) = std::env::var("SWAPLEND_FEE_PER_MILLE") {
            self.amm.fee_per_mille = fee
                .parse()
                .map_err(|e| Error::Config(format!("SWAPLEND_FEE_PER_MILLE: {}", e)))?;
        }

        if let Ok(max) = std::env::var("SWAPLEND_MAX_EVENTS") {
            let max_events: usize = max
                .parse()
                .map_err(|e| Error::Config(format!("SWAPLEND_MAX_EVENTS: {}", e)))?;
            self = self.with_max_events(max_events);
        }

        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.amm.fee_per_mille, 3);
        assert_eq!(config.lending.nominal_borrow_rate, NOMINAL_BORROW_RATE);
    }

    #[test]
    fn test_invalid_fee_rejected() {
        let config = ProtocolConfig::default().with_fee(1000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_event_retention_rejected() {
        let config = ProtocolConfig::default().with_max_events(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ProtocolConfig::new(Address::from_label("operator")).with_fee(5);
        config.save(&path).unwrap();

        let loaded = ProtocolConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let admin = Address::from_label("operator");
        std::fs::write(&path, format!("{{\"admin\":\"{}\"}}", admin.to_hex())).unwrap();

        let loaded = ProtocolConfig::load(&path).unwrap();
        assert_eq!(loaded.admin, admin);
        assert_eq!(loaded.amm, AmmParams::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProtocolConfig::load(dir.path().join("missing.json")),
            Err(Error::Config(_))
        ));
    }
}
