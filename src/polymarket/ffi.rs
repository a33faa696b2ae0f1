//! C ABI of the external Polymarket order engine.
//!
//! The engine works in 6-decimal raw units (1_000_000 == 1.0); the rest
//! of the crate is 8-decimal, so wrappers multiply by 100 on the way
//! in. Linking the real engine requires the `polymarket-ffi` feature;
//! without it the stubs report not-initialized so the crate stays
//! buildable and testable.

use crate::num::{Price, Quantity, Volume};
use std::os::raw::c_char;

pub const POLYMARKET_OK: i32 = 0;
pub const POLYMARKET_ERR_NOT_INITIALIZED: i32 = -1;
pub const POLYMARKET_ERR_INVALID_PK: i32 = -2;
pub const POLYMARKET_ERR_AUTH_FAILED: i32 = -3;
pub const POLYMARKET_ERR_INVALID_TOKEN: i32 = -4;
pub const POLYMARKET_ERR_ORDER_FAILED: i32 = -5;
pub const POLYMARKET_ERR_CANCEL_FAILED: i32 = -6;
pub const POLYMARKET_ERR_MIN_ORDER_SIZE: i32 = -7;
pub const POLYMARKET_ERR_MIN_SHARES: i32 = -8;

/// External raw scale: 6 decimals.
pub const RAW_SCALE: i64 = 1_000_000;
/// 6-decimal raw to 8-decimal raw.
const SCALE_FACTOR: i64 = 100;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawOrderResult {
    pub success: bool,
    pub filled_qty_raw: i64,
    pub avg_price_raw: i64,
    pub latency_ms: u64,
    pub error_code: i32,
    pub order_id: [c_char; 128],
}

impl RawOrderResult {
    pub fn not_initialized() -> Self {
        Self {
            success: false,
            filled_qty_raw: 0,
            avg_price_raw: 0,
            latency_ms: 0,
            error_code: POLYMARKET_ERR_NOT_INITIALIZED,
            order_id: [0; 128],
        }
    }
}

pub fn error_message(code: i32) -> &'static str {
    match code {
        POLYMARKET_OK => "OK",
        POLYMARKET_ERR_NOT_INITIALIZED => "executor not initialized",
        POLYMARKET_ERR_INVALID_PK => "invalid private key",
        POLYMARKET_ERR_AUTH_FAILED => "authentication failed",
        POLYMARKET_ERR_INVALID_TOKEN => "invalid token id",
        POLYMARKET_ERR_ORDER_FAILED => "order failed",
        POLYMARKET_ERR_CANCEL_FAILED => "cancel failed",
        POLYMARKET_ERR_MIN_ORDER_SIZE => "order size below minimum",
        POLYMARKET_ERR_MIN_SHARES => "shares below market minimum",
        _ => "unknown error",
    }
}

pub fn order_id_string(result: &RawOrderResult) -> String {
    let bytes: Vec<u8> = result
        .order_id
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn quantity_from_raw6(raw: i64) -> Quantity {
    Quantity::from_raw(raw * SCALE_FACTOR)
}

pub fn price_from_raw6(raw: i64) -> Price {
    Price::from_raw(raw * SCALE_FACTOR)
}

pub fn volume_from_raw6(raw: i64) -> Volume {
    Volume::from_raw(raw * SCALE_FACTOR)
}

#[cfg(feature = "polymarket-ffi")]
pub(crate) mod raw {
    use super::RawOrderResult;
    use std::os::raw::{c_char, c_double};

    #[link(name = "polymarket_engine")]
    extern "C" {
        pub fn polymarket_init(private_key: *const c_char, funder_wallet: *const c_char) -> i32;
        pub fn polymarket_warmup() -> i32;
        pub fn polymarket_prefetch(token_id: *const c_char) -> i32;
        pub fn polymarket_market_buy(token_id: *const c_char, usdc_amount: c_double) -> RawOrderResult;
        pub fn polymarket_market_sell(token_id: *const c_char, size: c_double) -> RawOrderResult;
        pub fn polymarket_limit_buy(
            token_id: *const c_char,
            price: c_double,
            usdc_amount: c_double,
        ) -> RawOrderResult;
        pub fn polymarket_limit_sell(
            token_id: *const c_char,
            price: c_double,
            size: c_double,
        ) -> RawOrderResult;
        pub fn polymarket_cancel(order_id: *const c_char) -> i32;
        pub fn polymarket_cancel_all() -> i32;
        pub fn polymarket_get_balance() -> i64;
        pub fn polymarket_get_token_balance(token_id: *const c_char) -> i64;
        pub fn polymarket_shutdown();
    }
}

#[cfg(not(feature = "polymarket-ffi"))]
#[allow(unused_variables)]
pub(crate) mod raw {
    use super::{RawOrderResult, POLYMARKET_ERR_NOT_INITIALIZED};
    use std::os::raw::{c_char, c_double};

    pub unsafe fn polymarket_init(private_key: *const c_char, funder_wallet: *const c_char) -> i32 {
        POLYMARKET_ERR_NOT_INITIALIZED
    }

    pub unsafe fn polymarket_warmup() -> i32 {
        POLYMARKET_ERR_NOT_INITIALIZED
    }

    pub unsafe fn polymarket_prefetch(token_id: *const c_char) -> i32 {
        POLYMARKET_ERR_NOT_INITIALIZED
    }

    pub unsafe fn polymarket_market_buy(token_id: *const c_char, usdc_amount: c_double) -> RawOrderResult {
        RawOrderResult::not_initialized()
    }

    pub unsafe fn polymarket_market_sell(token_id: *const c_char, size: c_double) -> RawOrderResult {
        RawOrderResult::not_initialized()
    }

    pub unsafe fn polymarket_limit_buy(
        token_id: *const c_char,
        price: c_double,
        usdc_amount: c_double,
    ) -> RawOrderResult {
        RawOrderResult::not_initialized()
    }

    pub unsafe fn polymarket_limit_sell(
        token_id: *const c_char,
        price: c_double,
        size: c_double,
    ) -> RawOrderResult {
        RawOrderResult::not_initialized()
    }

    pub unsafe fn polymarket_cancel(order_id: *const c_char) -> i32 {
        POLYMARKET_ERR_NOT_INITIALIZED
    }

    pub unsafe fn polymarket_cancel_all() -> i32 {
        POLYMARKET_ERR_NOT_INITIALIZED
    }

    pub unsafe fn polymarket_get_balance() -> i64 {
        i64::from(POLYMARKET_ERR_NOT_INITIALIZED)
    }

    pub unsafe fn polymarket_get_token_balance(token_id: *const c_char) -> i64 {
        i64::from(POLYMARKET_ERR_NOT_INITIALIZED)
    }

    pub unsafe fn polymarket_shutdown() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_conversion_is_x100() {
        // 1.5 shares in 6-decimal raw.
        assert_eq!(quantity_from_raw6(1_500_000), Quantity::from_double(1.5));
        // 0.45 USDC price.
        assert_eq!(price_from_raw6(450_000), Price::from_double(0.45));
        assert_eq!(volume_from_raw6(10_000_000), Volume::from_double(10.0));
    }

    #[test]
    fn order_id_reads_to_nul() {
        let mut result = RawOrderResult::not_initialized();
        for (i, b) in b"0xdeadbeef".iter().enumerate() {
            result.order_id[i] = *b as c_char;
        }
        assert_eq!(order_id_string(&result), "0xdeadbeef");

        let empty = RawOrderResult::not_initialized();
        assert_eq!(order_id_string(&empty), "");
    }

    #[test]
    fn error_messages_cover_known_codes() {
        assert_eq!(error_message(POLYMARKET_OK), "OK");
        assert_eq!(error_message(POLYMARKET_ERR_AUTH_FAILED), "authentication failed");
        assert_eq!(error_message(-99), "unknown error");
    }
}
