//! # Valuation
//!
//! Pure share-pricing math. Total value is the sum of cached balances over
//! active assets, one unit of any asset counting as one unit of value. There
//! is no oracle.
//!
//! Deposits are priced against the value *before* the deposit lands:
//!
//! ```text
//! shares = amount                               if supply == 0
//! shares = amount * supply / total_value        otherwise
//! ```
//!
//! Withdrawals go through two floored divisions, in this order:
//!
//! ```text
//! withdraw_value = shares * total_value / supply
//! amount_out     = withdraw_value * asset_balance / total_value
//! ```
//!
//! Both roundings favour the vault, so a deposit followed by a withdrawal
//! never returns more than went in.

use serde::{Deserialize, Serialize};

use super::error::VaultError;
use super::math::mul_div;
use crate::config::SCALE;

/// NAV per share scaled by [`SCALE`]; exactly `SCALE` for an empty vault.
pub fn nav_per_share(total_value: u128, total_supply: u128) -> Result<u128, VaultError> {
    if total_supply == 0 {
        return Ok(SCALE);
    }
    mul_div(total_value, SCALE, total_supply)
}

/// Shares minted for a deposit of `amount`.
///
/// # Errors
///
/// `ZeroValue` when shares exist but the vault is worth nothing, and
/// `ZeroShares` when the result floors to zero.
pub fn shares_for_deposit(
    amount: u128,
    total_supply: u128,
    total_value: u128,
) -> Result<u128, VaultError> {
    if total_supply == 0 {
        return Ok(amount);
    }
    if total_value == 0 {
        return Err(VaultError::ZeroValue);
    }
    let shares = mul_div(amount, total_supply, total_value)?;
    if shares == 0 {
        return Err(VaultError::ZeroShares);
    }
    Ok(shares)
}

/// Result of pricing a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawQuote {
    pub withdraw_value: u128,
    pub amount_out: u128,
}

/// Price a redemption of `shares` into one asset bucket.
pub fn quote_withdrawal(
    shares: u128,
    total_supply: u128,
    total_value: u128,
    asset_balance: u128,
) -> Result<WithdrawQuote, VaultError> {
    let withdraw_value = mul_div(shares, total_value, total_supply)?;
    let amount_out = if total_value == 0 {
        0
    } else {
        mul_div(withdraw_value, asset_balance, total_value)?
    };
    Ok(WithdrawQuote {
        withdraw_value,
        amount_out,
    })
}
