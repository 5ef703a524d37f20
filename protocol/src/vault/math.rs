//! Wide-intermediate integer math.
//!
//! Share and fee formulas multiply two `u128` quantities before dividing
//! (`amount * supply / value`). At 18-decimal scales the product overflows
//! `u128`, so every such expression goes through [`mul_div`], which keeps
//! the intermediate in 256 bits and floors the result.

use uint::construct_uint;

use super::error::VaultError;

construct_uint! {
    /// 256-bit unsigned integer for intermediate products.
    pub struct U256(4);
}

/// `floor(a * b / denominator)`.
///
/// Fails with `DivisionByZero` when `denominator == 0` and with
/// `ArithmeticOverflow` when the quotient does not fit in `u128`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, VaultError> {
    if denominator == 0 {
        return Err(VaultError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    let quotient = product / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(VaultError::ArithmeticOverflow);
    }
    Ok(quotient.as_u128())
}

pub fn checked_add(a: u128, b: u128) -> Result<u128, VaultError> {
    a.checked_add(b).ok_or(VaultError::ArithmeticOverflow)
}

pub fn checked_sub(a: u128, b: u128) -> Result<u128, VaultError> {
    a.checked_sub(b).ok_or(VaultError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_floors() {
        assert_eq!(mul_div(10, 10, 3).unwrap(), 33);
        assert_eq!(mul_div(0, 10, 3).unwrap(), 0);
    }

    #[test]
    fn mul_div_survives_wide_products() {
        // 1e30 * 1e30 overflows u128 but the quotient fits.
        let big = 1_000_000_000_000_000_000_000_000_000_000u128;
        assert_eq!(mul_div(big, big, big).unwrap(), big);
    }

    #[test]
    fn mul_div_rejects_zero_denominator() {
        assert!(matches!(mul_div(1, 1, 0), Err(VaultError::DivisionByZero)));
    }

    #[test]
    fn mul_div_rejects_oversized_quotient() {
        assert!(matches!(
            mul_div(u128::MAX, 2, 1),
            Err(VaultError::ArithmeticOverflow)
        ));
    }
}
