//! # Fee Accrual
//!
//! Two fees, both paid by minting new shares to the primary agent:
//!
//! - **Management fee**: time-weighted, charged on total value.
//!   `total_value * mgmt_bps * elapsed / (10000 * 31_536_000)`
//! - **Performance fee**: charged only on NAV gains above the high-water
//!   mark. `profit = (nav - hwm) * supply / SCALE`, fee
//!   `profit * perf_bps / 10000`; the mark then ratchets up to NAV.
//!
//! Fee shares are sized so that, after minting, they are worth exactly the
//! fee at the new dilution: `fees * supply / (total_value - fees)`. A fee
//! that mints no shares (empty vault, or rounding to zero) is not a fee at
//! all: the breakdown comes back empty and nothing is counted as collected.
//!
//! Left alone long enough, the management fee can grow past the vault's
//! whole value, at which point assessment refuses with `FeeExceedsValue`.
//! The owner's way out is a rate change, which forgives the backlog via
//! [`FeeState::restart_accrual`].
//!
//! Assessment ([`FeeState::assess`]) is pure; [`FeeState::apply`] commits a
//! breakdown. The engine mints the shares in between.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::math::{checked_add, mul_div};
use super::valuation::nav_per_share;
use crate::config::{
    BPS_DENOMINATOR, MAX_MANAGEMENT_FEE_BPS, MAX_PERFORMANCE_FEE_BPS, SCALE, SECONDS_PER_YEAR,
};

/// Persistent fee parameters and accrual cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeState {
    pub management_fee_bps: u32,
    pub performance_fee_bps: u32,
    pub last_collection: DateTime<Utc>,
    /// Highest NAV per share ever charged against, scaled by `SCALE`.
    pub high_water_mark_nav: u128,
    pub total_fees_collected: u128,
}

/// Outcome of a fee assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub elapsed_secs: u64,
    pub management_fee: u128,
    pub performance_fee: u128,
    pub total_fees: u128,
    pub fee_shares: u128,
    pub nav_per_share: u128,
    pub high_water_mark_nav: u128,
}

impl FeeBreakdown {
    pub fn is_empty(&self) -> bool {
        self.total_fees == 0
    }
}

impl FeeState {
    pub fn new(
        management_fee_bps: u32,
        performance_fee_bps: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, VaultError> {
        check_rates(management_fee_bps, performance_fee_bps)?;
        Ok(Self {
            management_fee_bps,
            performance_fee_bps,
            last_collection: now,
            high_water_mark_nav: SCALE,
            total_fees_collected: 0,
        })
    }

    /// Compute fees owed at `now` without changing anything.
    pub fn assess(
        &self,
        total_value: u128,
        total_supply: u128,
        now: DateTime<Utc>,
    ) -> Result<FeeBreakdown, VaultError> {
        let elapsed_secs = u64::try_from((now - self.last_collection).num_seconds()).unwrap_or(0);
        let nav = nav_per_share(total_value, total_supply)?;
        if elapsed_secs == 0 {
            return Ok(FeeBreakdown {
                nav_per_share: nav,
                high_water_mark_nav: self.high_water_mark_nav,
                ..FeeBreakdown::default()
            });
        }

        let management_fee = mul_div(
            total_value,
            u128::from(self.management_fee_bps) * u128::from(elapsed_secs),
            u128::from(BPS_DENOMINATOR) * u128::from(SECONDS_PER_YEAR),
        )?;

        let (performance_fee, high_water_mark_nav) = if nav > self.high_water_mark_nav {
            let profit = mul_div(nav - self.high_water_mark_nav, total_supply, SCALE)?;
            let fee = mul_div(
                profit,
                u128::from(self.performance_fee_bps),
                u128::from(BPS_DENOMINATOR),
            )?;
            (fee, nav)
        } else {
            (0, self.high_water_mark_nav)
        };

        let total_fees = checked_add(management_fee, performance_fee)?;
        let fee_shares = if total_fees == 0 || total_supply == 0 {
            0
        } else {
            if total_fees >= total_value {
                return Err(VaultError::FeeExceedsValue {
                    fees: total_fees,
                    total_value,
                });
            }
            mul_div(total_fees, total_supply, total_value - total_fees)?
        };
        if fee_shares == 0 {
            // Nothing to mint means nothing was charged. The cursor still
            // moves; the mark stays where it was.
            return Ok(FeeBreakdown {
                elapsed_secs,
                nav_per_share: nav,
                high_water_mark_nav: self.high_water_mark_nav,
                ..FeeBreakdown::default()
            });
        }

        Ok(FeeBreakdown {
            elapsed_secs,
            management_fee,
            performance_fee,
            total_fees,
            fee_shares,
            nav_per_share: nav,
            high_water_mark_nav,
        })
    }

    /// Commit an assessment made at `now`.
    pub fn apply(&mut self, breakdown: &FeeBreakdown, now: DateTime<Utc>) -> Result<(), VaultError> {
        if breakdown.elapsed_secs == 0 {
            return Ok(());
        }
        self.total_fees_collected = checked_add(self.total_fees_collected, breakdown.total_fees)?;
        self.high_water_mark_nav = self.high_water_mark_nav.max(breakdown.high_water_mark_nav);
        self.last_collection = now;
        Ok(())
    }

    /// Forgive everything accrued since the last collection and start the
    /// clock again at `now`. The high-water mark is left alone.
    pub fn restart_accrual(&mut self, now: DateTime<Utc>) {
        self.last_collection = now;
    }

    pub fn set_rates(&mut self, management_fee_bps: u32, performance_fee_bps: u32) -> Result<(), VaultError> {
        check_rates(management_fee_bps, performance_fee_bps)?;
        self.management_fee_bps = management_fee_bps;
        self.performance_fee_bps = performance_fee_bps;
        Ok(())
    }
}

fn check_rates(management_fee_bps: u32, performance_fee_bps: u32) -> Result<(), VaultError> {
    if management_fee_bps > MAX_MANAGEMENT_FEE_BPS {
        return Err(VaultError::InvalidFeeRate {
            rate_bps: management_fee_bps,
            cap_bps: MAX_MANAGEMENT_FEE_BPS,
        });
    }
    if performance_fee_bps > MAX_PERFORMANCE_FEE_BPS {
        return Err(VaultError::InvalidFeeRate {
            rate_bps: performance_fee_bps,
            cap_bps: MAX_PERFORMANCE_FEE_BPS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn nothing_accrues_without_elapsed_time() {
        let fees = FeeState::new(200, 2_000, t0()).unwrap();
        let b = fees.assess(1_000_000, 1_000_000, t0()).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.elapsed_secs, 0);
    }

    #[test]
    fn management_fee_is_time_weighted() {
        let fees = FeeState::new(200, 0, t0()).unwrap();
        let one_year = t0() + Duration::seconds(SECONDS_PER_YEAR as i64);
        let b = fees.assess(1_000_000, 1_000_000, one_year).unwrap();
        // 2% of 1,000,000 over a full year.
        assert_eq!(b.management_fee, 20_000);
        assert_eq!(b.performance_fee, 0);
        // 20_000 * 1_000_000 / 980_000
        assert_eq!(b.fee_shares, 20_408);
    }

    #[test]
    fn performance_fee_only_above_high_water_mark() {
        let fees = FeeState::new(0, 2_000, t0()).unwrap();
        let later = t0() + Duration::seconds(60);
        // NAV 1.1: profit 100 on 1000 shares, 20% of it.
        let b = fees.assess(1_100, 1_000, later).unwrap();
        assert_eq!(b.performance_fee, 20);
        assert_eq!(b.high_water_mark_nav, SCALE / 10 * 11);

        // NAV below the mark: nothing.
        let b = fees.assess(900, 1_000, later).unwrap();
        assert_eq!(b.performance_fee, 0);
        assert_eq!(b.high_water_mark_nav, SCALE);
    }

    #[test]
    fn apply_ratchets_and_accumulates() {
        let mut fees = FeeState::new(0, 2_000, t0()).unwrap();
        let later = t0() + Duration::seconds(60);
        let b = fees.assess(1_100, 1_000, later).unwrap();
        fees.apply(&b, later).unwrap();
        assert_eq!(fees.high_water_mark_nav, SCALE / 10 * 11);
        assert_eq!(fees.total_fees_collected, 20);
        assert_eq!(fees.last_collection, later);

        let even_later = later + Duration::seconds(60);
        let b = fees.assess(1_000, 1_000, even_later).unwrap();
        fees.apply(&b, even_later).unwrap();
        assert_eq!(fees.high_water_mark_nav, SCALE / 10 * 11);
        assert_eq!(fees.last_collection, even_later);
    }

    #[test]
    fn fees_cannot_swallow_the_vault() {
        let fees = FeeState::new(1_000, 0, t0()).unwrap();
        let far = t0() + Duration::seconds(SECONDS_PER_YEAR as i64 * 10);
        assert_eq!(
            fees.assess(1_000, 1_000, far),
            Err(VaultError::FeeExceedsValue { fees: 1_000, total_value: 1_000 })
        );
    }

    #[test]
    fn no_fee_is_charged_without_shares_to_dilute() {
        let mut fees = FeeState::new(1_000, 2_000, t0()).unwrap();
        let later = t0() + Duration::seconds(SECONDS_PER_YEAR as i64);
        // Tokens donated to an empty vault.
        let b = fees.assess(5_000, 0, later).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.fee_shares, 0);
        assert_eq!(b.elapsed_secs, SECONDS_PER_YEAR);
        fees.apply(&b, later).unwrap();
        assert_eq!(fees.total_fees_collected, 0);
        assert_eq!(fees.last_collection, later);
        assert_eq!(fees.high_water_mark_nav, SCALE);
    }

    #[test]
    fn restart_accrual_forgives_the_backlog() {
        let mut fees = FeeState::new(1_000, 0, t0()).unwrap();
        let far = t0() + Duration::seconds(SECONDS_PER_YEAR as i64 * 10);
        assert!(fees.assess(1_000, 1_000, far).is_err());
        fees.restart_accrual(far);
        assert!(fees.assess(1_000, 1_000, far).unwrap().is_empty());
    }

    #[test]
    fn rate_caps_enforced() {
        let mut fees = FeeState::new(200, 2_000, t0()).unwrap();
        assert!(matches!(
            fees.set_rates(MAX_MANAGEMENT_FEE_BPS + 1, 0),
            Err(VaultError::InvalidFeeRate { .. })
        ));
        assert!(fees.set_rates(0, MAX_PERFORMANCE_FEE_BPS).is_ok());
    }
}
