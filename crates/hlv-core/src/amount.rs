//! Integer conversion between the two legs' native units.
//!
//! The contract chain denominates the locked token in 18-decimal base units
//! ("wei"); the payment network uses satoshis (8 decimals). All arithmetic is
//! integer-only and rounds down.

use crate::error::CoreError;

/// Base units of the 18-decimal chain token per satoshi.
pub const WEI_PER_SAT: u128 = 10_000_000_000;

/// Convert a chain amount to satoshis, rounding down.
///
/// Rejects zero and negative inputs, and inputs that round down to zero.
pub fn wei_to_sats(wei: i128) -> Result<u64, CoreError> {
    if wei <= 0 {
        return Err(CoreError::InvalidAmount(format!(
            "chain amount must be positive, got {}",
            wei
        )));
    }
    let sats = wei as u128 / WEI_PER_SAT;
    if sats == 0 {
        return Err(CoreError::InvalidAmount(format!(
            "chain amount {} is below one satoshi",
            wei
        )));
    }
    u64::try_from(sats)
        .map_err(|_| CoreError::InvalidAmount(format!("chain amount {} overflows", wei)))
}

/// Convert satoshis to the chain's base units.
pub fn sats_to_wei(sats: i128) -> Result<u128, CoreError> {
    if sats <= 0 {
        return Err(CoreError::InvalidAmount(format!(
            "payment amount must be positive, got {}",
            sats
        )));
    }
    (sats as u128)
        .checked_mul(WEI_PER_SAT)
        .ok_or_else(|| CoreError::InvalidAmount(format!("payment amount {} overflows", sats)))
}

/// `floor(value * bps / 10_000)` without floating point.
pub fn apply_basis_points(value: u64, bps: u32) -> u64 {
    ((value as u128 * bps as u128) / 10_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wei_to_sats_rounds_down() {
        assert_eq!(wei_to_sats(10_000_000_000).unwrap(), 1);
        assert_eq!(wei_to_sats(19_999_999_999).unwrap(), 1);
        assert_eq!(wei_to_sats(100_000_000_000_000).unwrap(), 10_000);
    }

    #[test]
    fn test_wei_to_sats_rejects_dust() {
        assert!(matches!(
            wei_to_sats(9_999_999_999),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_rejects_zero_and_negative() {
        assert!(wei_to_sats(0).is_err());
        assert!(wei_to_sats(-1).is_err());
        assert!(sats_to_wei(0).is_err());
        assert!(sats_to_wei(-10_000).is_err());
    }

    #[test]
    fn test_sats_to_wei() {
        assert_eq!(sats_to_wei(10).unwrap(), 100_000_000_000);
        assert_eq!(sats_to_wei(10_000).unwrap(), 100_000_000_000_000);
    }

    #[test]
    fn test_sats_to_wei_overflow() {
        assert!(sats_to_wei(i128::MAX).is_err());
    }

    #[test]
    fn test_apply_basis_points() {
        assert_eq!(apply_basis_points(1_000, 2_000), 200);
        assert_eq!(apply_basis_points(9, 2_000), 1);
        assert_eq!(apply_basis_points(4, 2_000), 0);
        assert_eq!(apply_basis_points(u64::MAX, 10_000), u64::MAX);
    }
}
