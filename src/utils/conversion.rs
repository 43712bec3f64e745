//! Type conversion utilities.

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use once_cell::sync::Lazy;

/// Decimals of on-chain fixed-point weights and rates.
const WAD_DECIMALS: u8 = 18;

/// Convert U256 to f64 with decimal adjustment.
///
/// Goes through BigDecimal so values above 2^53 keep their leading digits.
/// Returns `None` when the result is not a finite f64.
pub fn u256_to_f64(value: U256, decimals: u8) -> Option<f64> {
    let bytes: [u8; 32] = value.to_le_bytes();
    let big_int = BigInt::from_bytes_le(num_bigint::Sign::Plus, &bytes);
    let adjusted = BigDecimal::from(big_int) / big_pow10(decimals);

    adjusted.to_f64().filter(|result| result.is_finite())
}

/// Convert an 18-decimal fixed-point value (gauge weight, provider rate) to f64.
pub fn wad_to_f64(value: U256) -> Option<f64> {
    u256_to_f64(value, WAD_DECIMALS)
}

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}
