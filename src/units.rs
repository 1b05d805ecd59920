//! Fixed-point scale constants and Bitcoin unit helpers.
//!
//! HashCredit moves value through three different fixed-point scales at
//! once: satoshis, an 8-fractional-digit BTC/USD price, and a
//! 6-fractional-digit stablecoin unit. Keeping the scale constants named
//! here (rather than scattered as magic numbers) is what makes the
//! credit-limit conversion in `credit_manager` auditable.

use ruint::aliases::U256;

/// Satoshis per Bitcoin.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Fractional digits carried by `RiskParameters::btc_price_usd`.
pub const PRICE_SCALE: u64 = 100_000_000;

/// Smallest unit of the stablecoin (6 decimals, e.g. USDC-style).
pub const STABLE_UNIT: u64 = 1_000_000;

/// Basis-point denominator.
pub const BPS_DENOM: u64 = 10_000;

/// Seconds in a non-leap year, used for all APR/accrual math.
pub const SECONDS_PER_YEAR: u64 = 365 * 86_400;

/// Converts a satoshi amount, scaled BTC/USD price, and a basis-point rate
/// into stablecoin smallest units.
///
/// `raw = amountSats * btcPriceUsd * rateBps * STABLE_UNIT /
/// (SATS_PER_BTC * PRICE_SCALE * BPS_DENOM)`
///
/// Computed in `U256` because the product of the four scaled factors can
/// exceed `u128::MAX` for worst-case configured parameters (extreme price
/// or extreme payout volume); the result is always small enough to narrow
/// back to `u128` once the shared divisor has been applied.
pub fn sats_price_bps_to_stable(amount_sats: u64, btc_price_usd: u64, rate_bps: u64) -> u128 {
    let numerator = U256::from(amount_sats)
        * U256::from(btc_price_usd)
        * U256::from(rate_bps)
        * U256::from(STABLE_UNIT);
    let denominator =
        U256::from(SATS_PER_BTC) * U256::from(PRICE_SCALE) * U256::from(BPS_DENOM);
    let result = numerator / denominator;
    result.to::<u128>()
}

/// Simple-interest accrual: `principal * aprBps * elapsedSeconds /
/// (BPS_DENOM * SECONDS_PER_YEAR)`, computed in `U256` for the same reason.
pub fn accrue_interest(principal: u128, apr_bps: u64, elapsed_seconds: u64) -> u128 {
    if principal == 0 || apr_bps == 0 || elapsed_seconds == 0 {
        return 0;
    }
    let numerator = U256::from(principal) * U256::from(apr_bps) * U256::from(elapsed_seconds);
    let denominator = U256::from(BPS_DENOM) * U256::from(SECONDS_PER_YEAR);
    (numerator / denominator).to::<u128>()
}

/// Convert satoshis to a fixed 8-decimal BTC display string, e.g.
/// "0.00100000".
pub fn sats_to_btc_string(sats: u64) -> String {
    let whole = sats / SATS_PER_BTC;
    let frac = sats % SATS_PER_BTC;
    format!("{whole}.{frac:08}")
}
