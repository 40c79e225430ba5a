//! Error taxonomy for the backtesting core.
//!
//! `BacktestError` covers the two fatal kinds from the error design:
//! malformed input discovered at `run()` preconditions, and internal
//! invariant violations. Order rejection is deliberately not part of
//! this enum — it is reported through the order-update callback as a
//! [`RejectReason`], never as a `Result::Err`, so a strategy submitting
//! a bad order never unwinds the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal invariant violated: {0}")]
    Programmer(String),
}

/// Why an order submission was rejected. Carried on `Order::status`
/// and passed to `Strategy::on_order_update`; never an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RejectReason {
    InvalidAmount,
    InvalidPrice,
    InsufficientMargin,
    ReduceOnlyWithoutPosition,
    ReduceOnlySameSide,
    PostOnlyWouldCross,
    EmptyBook,
    InsufficientLiquidity,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RejectReason::InvalidAmount => "invalid amount",
            RejectReason::InvalidPrice => "invalid price",
            RejectReason::InsufficientMargin => "insufficient margin",
            RejectReason::ReduceOnlyWithoutPosition => "reduce-only without position",
            RejectReason::ReduceOnlySameSide => "reduce-only same side",
            RejectReason::PostOnlyWouldCross => "post-only would fill immediately",
            RejectReason::EmptyBook => "empty order book",
            RejectReason::InsufficientLiquidity => "insufficient liquidity",
        };
        write!(f, "{msg}")
    }
}

/// Why `simulate_market`/`check_limit` did not produce a (full) fill.
/// Distinct from [`RejectReason`]: this describes a book-query outcome,
/// not an order admission failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnfilledReason {
    EmptyBook,
    InsufficientLiquidity,
    PriceNotReached,
}

impl std::fmt::Display for UnfilledReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            UnfilledReason::EmptyBook => "empty order book",
            UnfilledReason::InsufficientLiquidity => "insufficient liquidity",
            UnfilledReason::PriceNotReached => "price not reached",
        };
        write!(f, "{msg}")
    }
}
