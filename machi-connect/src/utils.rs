//! Formatting and quantity parsing helpers.

use alloy::primitives::U256;
use alloy::primitives::utils::{format_ether, format_units};

/// Shorten an address for display: `0x1234...abcd`.
///
/// Strings too short to shorten are returned unchanged.
#[must_use]
pub fn shorten(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Format a wei balance as ether with `fixed` decimals.
///
/// A zero balance renders as `0 ETH`.
#[must_use]
pub fn format_balance(balance: U256, fixed: usize) -> String {
    if balance.is_zero() {
        return "0 ETH".to_string();
    }
    let eth: f64 = format_ether(balance).parse().unwrap_or(0.0);
    format!("{eth:.fixed$}")
}

/// Format a wei amount as an ether decimal string without rounding.
#[must_use]
pub fn format_eth(wei: U256) -> String {
    format_ether(wei)
}

/// Format a wei fee as gwei.
#[must_use]
pub fn format_gwei(wei: u128) -> String {
    format_units(U256::from(wei), "gwei").unwrap_or_else(|_| wei.to_string())
}

/// Encode a quantity as a `0x`-prefixed hex string.
#[must_use]
pub fn to_hex(value: U256) -> String {
    format!("{value:#x}")
}

/// Whether `value` is a `0x`-prefixed hex string.
#[must_use]
pub fn is_hex(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse a JSON-RPC quantity: `0x`-prefixed hex or a plain decimal string.
#[must_use]
pub fn parse_quantity(value: &str) -> Option<U256> {
    let value = value.trim();
    if let Some(digits) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        if digits.is_empty() {
            return None;
        }
        U256::from_str_radix(digits, 16).ok()
    } else if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        U256::from_str_radix(value, 10).ok()
    } else {
        None
    }
}

/// Parse a chain id quantity such as `0x89`.
#[must_use]
pub fn parse_chain_id(value: &str) -> Option<u64> {
    parse_quantity(value).and_then(|v| u64::try_from(v).ok())
}
