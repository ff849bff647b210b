//! Configuration snapshot for the iterator module. Loading this from an
//! actual file on disk is an external concern; this only specifies the
//! shape and the safe defaults.

use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

use iter_types::delegation::SelectionPolicy as DelegationSelectionPolicy;
use iter_types::hints::HintsConfig;

fn default_max_referrals() -> u32 {
    30
}

fn default_max_cname_chain() -> u32 {
    16
}

fn default_per_target_timeout_ms() -> u64 {
    3000
}

fn default_max_targets_per_dp() -> usize {
    16
}

fn default_selection_policy() -> SelectionPolicy {
    SelectionPolicy::RttOrdered
}

/// `iter_types::delegation::SelectionPolicy`, mirrored here so it can
/// derive `Deserialize` without coupling that crate to `serde` for a
/// config-only concern.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    RoundRobin,
    RttOrdered,
    Random,
}

impl From<SelectionPolicy> for DelegationSelectionPolicy {
    fn from(policy: SelectionPolicy) -> Self {
        match policy {
            SelectionPolicy::RoundRobin => DelegationSelectionPolicy::RoundRobin,
            SelectionPolicy::RttOrdered => DelegationSelectionPolicy::RttOrdered,
            SelectionPolicy::Random => DelegationSelectionPolicy::Random,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IteratorConfig {
    #[serde(default)]
    pub hints: HintsConfig,

    #[serde(default = "default_max_referrals")]
    pub max_referrals: u32,

    #[serde(default = "default_max_cname_chain")]
    pub max_cname_chain: u32,

    #[serde(default = "default_per_target_timeout_ms")]
    pub per_target_timeout_ms: u64,

    #[serde(default = "default_max_targets_per_dp")]
    pub max_targets_per_dp: usize,

    #[serde(default = "default_selection_policy")]
    pub selection_policy: SelectionPolicy,
}

impl IteratorConfig {
    pub fn per_target_timeout(&self) -> Duration {
        Duration::from_millis(self.per_target_timeout_ms)
    }

    pub fn new(filename: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(filename))
            .build()?
            .try_deserialize()
    }
}

impl Default for IteratorConfig {
    fn default() -> Self {
        IteratorConfig {
            hints: HintsConfig::default(),
            max_referrals: default_max_referrals(),
            max_cname_chain: default_max_cname_chain(),
            per_target_timeout_ms: default_per_target_timeout_ms(),
            max_targets_per_dp: default_max_targets_per_dp(),
            selection_policy: default_selection_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_bounds() {
        let cfg = IteratorConfig::default();
        assert_eq!(30, cfg.max_referrals);
        assert_eq!(16, cfg.max_cname_chain);
        assert_eq!(Duration::from_secs(3), cfg.per_target_timeout());
        assert_eq!(16, cfg.max_targets_per_dp);
    }
}
