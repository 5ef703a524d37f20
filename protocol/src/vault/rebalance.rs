//! Rebalance advice. Read-only: compares each active asset's share of total
//! value with its target weight and flags deviations of at least
//! [`REBALANCE_THRESHOLD_BPS`].
//!
//! Nothing here trades. The report tells an agent *that* the allocation has
//! drifted; what to swap, and through which route, is the agent's call via
//! `Vault::rebalance`.

use serde::{Deserialize, Serialize};

use super::assets::AssetRegistry;
use super::error::VaultError;
use super::ids::AssetId;
use super::math::mul_div;
use crate::config::{BPS_DENOMINATOR, REBALANCE_THRESHOLD_BPS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDeviation {
    pub asset_id: AssetId,
    pub balance: u128,
    pub current_weight_bps: u32,
    pub target_weight_bps: u32,
    pub deviation_bps: u32,
    pub exceeds_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub total_value: u128,
    pub threshold_bps: u32,
    pub needs_rebalancing: bool,
    pub assets: Vec<AssetDeviation>,
}

pub fn report(registry: &AssetRegistry) -> Result<RebalanceReport, VaultError> {
    let total_value = registry.total_value()?;
    let mut assets = Vec::new();
    for record in registry.active() {
        // An empty vault has no allocation to deviate from.
        let current_weight_bps = if total_value == 0 {
            0
        } else {
            let w = mul_div(
                record.cached_balance,
                u128::from(BPS_DENOMINATOR),
                total_value,
            )?;
            u32::try_from(w).map_err(|_| VaultError::ArithmeticOverflow)?
        };
        let deviation_bps = current_weight_bps.abs_diff(record.target_weight_bps);
        assets.push(AssetDeviation {
            asset_id: record.asset_id,
            balance: record.cached_balance,
            current_weight_bps,
            target_weight_bps: record.target_weight_bps,
            deviation_bps,
            exceeds_threshold: total_value > 0 && deviation_bps >= REBALANCE_THRESHOLD_BPS,
        });
    }
    Ok(RebalanceReport {
        total_value,
        threshold_bps: REBALANCE_THRESHOLD_BPS,
        needs_rebalancing: assets.iter().any(|a| a.exceeds_threshold),
        assets,
    })
}

pub fn needs_rebalancing(registry: &AssetRegistry) -> Result<bool, VaultError> {
    Ok(report(registry)?.needs_rebalancing)
}
