//! Run-scoped parameter objects distributed to workers.
//!
//! The orchestrator owns one master copy of the emulation parameter set and
//! hands a cloned snapshot to each worker at launch, so runtime mutation
//! never affects in-flight workers. Storage handles are passed through
//! verbatim; the orchestrator never calls into them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Historical time window a run replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive replay start.
    pub start: DateTime<Utc>,
    /// Exclusive replay stop.
    pub stop: DateTime<Utc>,
}

/// Emulation parameter set.
///
/// Serializable so runs can be described in configuration files and job
/// manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulationSettings {
    /// Virtual market-time step between generated events, in seconds.
    pub market_time_step_secs: u64,
    /// Whether orders match when price merely touches the limit level.
    pub match_on_touch: bool,
    /// Flat commission charged per simulated trade.
    pub commission_per_trade: Decimal,
    /// Initial balance of each simulated portfolio.
    pub initial_balance: Decimal,
}

impl Default for EmulationSettings {
    fn default() -> Self {
        Self {
            market_time_step_secs: 60,
            match_on_touch: false,
            commission_per_trade: Decimal::ZERO,
            initial_balance: Decimal::new(100_000, 0),
        }
    }
}

/// Opaque market-data storage registry handle.
pub trait StorageRegistry: Send + Sync {}

/// Opaque default storage location handle.
pub trait StorageDrive: Send + Sync {}

/// Data format tag forwarded to every worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// Packed binary market-data files.
    #[default]
    Binary,
    /// Plain-text CSV market-data files.
    Csv,
}

/// Storage pass-through configuration handed verbatim to every worker.
#[derive(Clone)]
pub struct StorageBinding {
    /// Storage registry handle.
    pub registry: Arc<dyn StorageRegistry>,
    /// Default storage location.
    pub drive: Arc<dyn StorageDrive>,
    /// Data format tag.
    pub format: StorageFormat,
}

impl std::fmt::Debug for StorageBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBinding")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emulation_settings_default() {
        let settings = EmulationSettings::default();

        assert_eq!(settings.market_time_step_secs, 60);
        assert!(!settings.match_on_touch);
        assert_eq!(settings.commission_per_trade, Decimal::ZERO);
        assert_eq!(settings.initial_balance, Decimal::new(100_000, 0));
    }

    #[test]
    fn test_emulation_settings_serde_roundtrip() {
        let settings = EmulationSettings {
            market_time_step_secs: 300,
            match_on_touch: true,
            commission_per_trade: Decimal::new(25, 2),
            initial_balance: Decimal::new(50_000, 0),
        };

        let json = serde_json::to_string(&settings).unwrap();
        let parsed: EmulationSettings = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_storage_format_serde_tag() {
        let json = serde_json::to_string(&StorageFormat::Csv).unwrap();
        assert_eq!(json, "\"csv\"");

        let parsed: StorageFormat = serde_json::from_str("\"binary\"").unwrap();
        assert_eq!(parsed, StorageFormat::Binary);
    }
}
