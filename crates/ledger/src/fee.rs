//! Gas constants and fee checks.
//!
//! All amounts are in wei (1 gwei = 10^9 wei).

use crate::LedgerError;

/// Gas budget for one `addReport` call. Covers a long text plus a URL.
pub const DEFAULT_GAS_LIMIT: u64 = 500_000;

pub const GWEI: u128 = 1_000_000_000;

/// Upper bound on what one transaction can cost.
pub fn max_fee_wei(gas_price: u128, gas_limit: u64) -> u128 {
    gas_price.saturating_mul(gas_limit as u128)
}

/// Refuse to send when the price is above the operator's ceiling.
pub fn check_ceiling(gas_price: u128, ceiling: Option<u128>) -> Result<(), LedgerError> {
    match ceiling {
        Some(ceiling) if gas_price > ceiling => Err(LedgerError::FeeAboveCeiling {
            price: gas_price,
            ceiling,
        }),
        _ => Ok(()),
    }
}

/// Render wei as gwei with up to three decimals, for log lines.
pub fn format_gwei(wei: u128) -> String {
    let whole = wei / GWEI;
    let milli = (wei % GWEI) / 1_000_000;
    if milli == 0 {
        format!("{whole} gwei")
    } else {
        format!("{whole}.{milli:03} gwei")
    }
}
