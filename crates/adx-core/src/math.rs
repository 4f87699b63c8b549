//! # Safe Math Operations
//!
//! Overflow-checked arithmetic and the clearing-price fee split.

use crate::constants::PERCENT_DENOMINATOR;
use crate::errors::{AdxError, AdxResult};

macro_rules! safe_arith {
    ($fn_name:ident, $type:ty, $checked_method:ident) => {
        pub fn $fn_name(a: $type, b: $type) -> AdxResult<$type> {
            a.$checked_method(b).ok_or(AdxError::MathOverflow)
        }
    };
}

safe_arith!(safe_add_u64, u64, checked_add);
safe_arith!(safe_sub_u64, u64, checked_sub);

/// Platform fee and publisher payment carved out of a clearing price
#[cfg_attr(feature = "client", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub platform_fee: u64,
    pub publisher_payment: u64,
}

/// `platform_fee = floor(price * fee_pct / 100)`, publisher gets the rest.
/// The two parts always sum to `clearing_price` exactly.
pub fn split_clearing_price(clearing_price: u64, fee_pct: u8) -> AdxResult<FeeSplit> {
    if fee_pct as u64 > PERCENT_DENOMINATOR {
        return Err(AdxError::InvalidPercentages);
    }
    let fee = (clearing_price as u128 * fee_pct as u128) / PERCENT_DENOMINATOR as u128;
    // fee <= clearing_price, so the cast and subtraction cannot fail
    let platform_fee = fee as u64;
    Ok(FeeSplit {
        platform_fee,
        publisher_payment: clearing_price - platform_fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_split() {
        let split = split_clearing_price(3_000_000, 20).unwrap();
        assert_eq!(split.platform_fee, 600_000);
        assert_eq!(split.publisher_payment, 2_400_000);
    }

    #[test]
    fn test_split_rounds_fee_down() {
        let split = split_clearing_price(999, 15).unwrap();
        assert_eq!(split.platform_fee, 149);
        assert_eq!(split.publisher_payment, 850);
    }

    #[test]
    fn test_rejects_fee_above_hundred() {
        assert_eq!(split_clearing_price(10, 101), Err(AdxError::InvalidPercentages));
    }

    #[test]
    fn test_checked_ops() {
        assert_eq!(safe_add_u64(u64::MAX, 1), Err(AdxError::MathOverflow));
        assert_eq!(safe_sub_u64(0, 1), Err(AdxError::MathOverflow));
        assert_eq!(safe_add_u64(2, 3), Ok(5));
    }

    proptest! {
        #[test]
        fn prop_split_has_no_leftover(price in any::<u64>(), fee_pct in 0u8..=100) {
            let split = split_clearing_price(price, fee_pct).unwrap();
            prop_assert_eq!(split.platform_fee as u128 + split.publisher_payment as u128, price as u128);
            prop_assert_eq!(
                split.platform_fee as u128,
                price as u128 * fee_pct as u128 / 100
            );
        }
    }
}
