//! Depth-snapshot order book for a single symbol.
//!
//! Two flat, already-sorted ladders (bids descending, asks ascending)
//! that a depth event wholly replaces — no incremental level
//! maintenance, no queue-position model within a level. This is a
//! different concept from a resting-own-orders book: it holds market
//! depth, not orders this engine has placed, and a fill against it
//! never mutates the ladder (the next depth event is the only thing
//! that changes it).

use crate::error::UnfilledReason;
use crate::types::Side;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct FillResult {
    pub success: bool,
    pub avg_price: f64,
    pub fills: Vec<(f64, f64)>,
    pub slippage: f64,
    pub filled: f64,
    pub remaining: f64,
    pub reason: Option<UnfilledReason>,
}

impl FillResult {
    fn unfilled(amount: f64, reason: UnfilledReason) -> Self {
        Self {
            success: false,
            avg_price: 0.0,
            fills: Vec::new(),
            slippage: 0.0,
            filled: 0.0,
            remaining: amount,
            reason: Some(reason),
        }
    }
}

pub struct OrderBook {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    last_price: f64,
    last_trade_time: Option<DateTime<Utc>>,
    update_time: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_price: 0.0,
            last_trade_time: None,
            update_time: None,
        }
    }

    /// Replaces both ladders. Callers are expected to hand in bids
    /// descending and asks ascending per the event schema; the book
    /// does no incremental maintenance and trusts this ordering.
    pub fn update(&mut self, bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>, t: DateTime<Utc>) {
        self.bids = bids;
        self.asks = asks;
        self.update_time = Some(t);
    }

    pub fn update_last(&mut self, price: f64, t: DateTime<Utc>) {
        self.last_price = price;
        self.last_trade_time = Some(t);
        self.update_time = Some(t);
    }

    pub fn best_bid(&self) -> f64 {
        self.bids.first().map(|(p, _)| *p).unwrap_or(0.0)
    }

    pub fn best_ask(&self) -> f64 {
        self.asks.first().map(|(p, _)| *p).unwrap_or(0.0)
    }

    pub fn last_price(&self) -> f64 {
        self.last_price
    }

    /// Average of best bid/ask; falls back to last trade price if
    /// either side of the book is empty.
    pub fn mid(&self) -> f64 {
        let bid = self.best_bid();
        let ask = self.best_ask();
        if bid > 0.0 && ask > 0.0 {
            (bid + ask) / 2.0
        } else {
            self.last_price
        }
    }

    /// Consumes the opposing ladder level-by-level until `amount` is
    /// satisfied or the ladder is exhausted. Never mutates the
    /// ladder — depth events are the only thing that change it.
    pub fn simulate_market(&self, side: Side, amount: f64) -> FillResult {
        let ladder: &[(f64, f64)] = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        if ladder.is_empty() {
            return FillResult::unfilled(amount, UnfilledReason::EmptyBook);
        }

        let initial_price = ladder[0].0;
        let mut remaining = amount;
        let mut fills = Vec::new();
        let mut notional = 0.0;
        let mut filled = 0.0;

        for &(price, qty) in ladder {
            if remaining <= 1e-12 {
                break;
            }
            let take = qty.min(remaining);
            if take <= 0.0 {
                continue;
            }
            fills.push((price, take));
            notional += price * take;
            filled += take;
            remaining -= take;
        }

        if remaining > 1e-9 {
            return FillResult {
                success: false,
                avg_price: if filled > 0.0 { notional / filled } else { 0.0 },
                fills,
                slippage: 0.0,
                filled,
                remaining,
                reason: Some(UnfilledReason::InsufficientLiquidity),
            };
        }

        let avg_price = notional / filled;
        let slippage = ((avg_price - initial_price) / initial_price) * side.sign();

        FillResult {
            success: true,
            avg_price,
            fills,
            slippage,
            filled,
            remaining: 0.0,
            reason: None,
        }
    }

    /// Fixed-slippage market fill: ignores ladder depth beyond the
    /// top of book and fills the whole amount at
    /// `top * (1 + fixed_slippage * side_sign)`, the simplified model
    /// a host without full depth history can select instead of
    /// `simulate_market`'s level-by-level consumption.
    pub fn simulate_market_fixed(&self, side: Side, amount: f64, fixed_slippage: f64) -> FillResult {
        let top = match side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        };
        if top <= 0.0 {
            return FillResult::unfilled(amount, UnfilledReason::EmptyBook);
        }
        let avg_price = top * (1.0 + fixed_slippage * side.sign());
        FillResult {
            success: true,
            avg_price,
            fills: vec![(avg_price, amount)],
            slippage: fixed_slippage * side.sign(),
            filled: amount,
            remaining: 0.0,
            reason: None,
        }
    }

    /// A buy crosses when `price >= best_ask`; a sell crosses when
    /// `price <= best_bid`. Crossing runs `simulate_market`; the limit
    /// price is only an admission test, never the execution price
    /// (no price improvement — a crossing limit fills at the levels
    /// it takes).
    pub fn check_limit(&self, side: Side, price: f64, amount: f64) -> FillResult {
        let crosses = match side {
            Side::Buy => {
                let ask = self.best_ask();
                ask > 0.0 && price >= ask
            }
            Side::Sell => {
                let bid = self.best_bid();
                bid > 0.0 && price <= bid
            }
        };

        if crosses {
            self.simulate_market(side, amount)
        } else {
            FillResult::unfilled(amount, UnfilledReason::PriceNotReached)
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn t() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn empty_book_market_order_is_unfilled_with_empty_book_reason() {
        let book = OrderBook::new();
        let r = book.simulate_market(Side::Buy, 1.0);
        assert!(!r.success);
        assert_eq!(r.reason, Some(UnfilledReason::EmptyBook));
        assert_eq!(r.remaining, 1.0);
    }

    #[test]
    fn market_buy_consumes_asks_level_by_level() {
        let mut book = OrderBook::new();
        book.update(vec![(100.0, 10.0)], vec![(101.0, 1.0), (102.0, 5.0)], t());

        let r = book.simulate_market(Side::Buy, 3.0);
        assert!(r.success);
        assert_eq!(r.filled, 3.0);
        assert_eq!(r.fills, vec![(101.0, 1.0), (102.0, 2.0)]);
        let expected_avg = (101.0 * 1.0 + 102.0 * 2.0) / 3.0;
        assert_relative_eq!(r.avg_price, expected_avg, epsilon = 1e-9);
        let expected_slippage = (expected_avg - 101.0) / 101.0;
        assert_relative_eq!(r.slippage, expected_slippage, epsilon = 1e-9);
    }

    #[test]
    fn market_order_larger_than_depth_is_unfilled() {
        let mut book = OrderBook::new();
        book.update(vec![], vec![(101.0, 1.0)], t());

        let r = book.simulate_market(Side::Buy, 5.0);
        assert!(!r.success);
        assert_eq!(r.reason, Some(UnfilledReason::InsufficientLiquidity));
        assert_eq!(r.filled, 1.0);
        assert_eq!(r.remaining, 4.0);
    }

    #[test]
    fn check_limit_buy_crosses_when_price_at_or_above_ask() {
        let mut book = OrderBook::new();
        book.update(vec![(100.0, 10.0)], vec![(101.0, 10.0)], t());

        let crossing = book.check_limit(Side::Buy, 101.5, 1.0);
        assert!(crossing.success);

        let not_crossing = book.check_limit(Side::Buy, 100.5, 1.0);
        assert!(!not_crossing.success);
        assert_eq!(not_crossing.reason, Some(UnfilledReason::PriceNotReached));
    }

    #[test]
    fn mid_falls_back_to_last_price_when_book_one_sided() {
        let mut book = OrderBook::new();
        book.update(vec![], vec![], t());
        book.update_last(100.5, t());
        assert_eq!(book.mid(), 100.5);
    }
}
