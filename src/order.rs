//! Order record and admission request.
//!
//! Fields follow the data model directly: identity, side, kind, limit
//! price, requested/filled/remaining amount, volume-weighted average
//! fill price, status, post-only/reduce-only flags, timestamps,
//! accumulated fee and realized PnL, and an optional client id. The
//! monotonic id counter lives on [`crate::matching::MatchingEngine`],
//! not here — the order record itself carries no global state, so a
//! freshly reset engine reproduces identical ids across runs.

use crate::error::RejectReason;
use crate::pool::Poolable;
use crate::types::{Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

impl Default for OrderKind {
    fn default() -> Self {
        OrderKind::Market
    }
}

/// `pending → {filled | partial | open | rejected}`;
/// `open → {partial | filled | canceled}`;
/// `partial → {filled | canceled}`.
/// Terminals: filled, canceled, rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Pending,
    Open,
    Partial,
    Filled,
    Canceled,
    Rejected,
}

impl Default for OrderState {
    fn default() -> Self {
        OrderState::Pending
    }
}

impl OrderState {
    pub fn is_active(self) -> bool {
        matches!(self, OrderState::Open | OrderState::Partial)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Canceled | OrderState::Rejected)
    }
}

/// A strategy's request to admit an order, independent of the pooled
/// record that will back it.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub amount: f64,
    pub limit_price: Option<f64>,
    pub post_only: bool,
    pub reduce_only: bool,
    pub client_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<Symbol>, side: Side, amount: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            amount,
            limit_price: None,
            post_only: false,
            reduce_only: false,
            client_id: None,
        }
    }

    pub fn limit(symbol: impl Into<Symbol>, side: Side, amount: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            amount,
            limit_price: Some(price),
            post_only: false,
            reduce_only: false,
            client_id: None,
        }
    }

    pub fn post_only(mut self) -> Self {
        self.post_only = true;
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub limit_price: Option<f64>,
    pub amount: f64,
    pub filled: f64,
    pub remaining: f64,
    pub avg_fill_price: f64,
    pub status: OrderState,
    pub post_only: bool,
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fee: f64,
    pub realized_pnl: f64,
    pub client_id: Option<String>,
    /// Set by `reject`; the human-readable reason is derived from this
    /// at dispatch time rather than stored as a string on the record.
    pub reject_reason: Option<RejectReason>,
}

impl Default for Order {
    fn default() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Self {
            id: 0,
            symbol: Symbol::new(""),
            side: Side::Buy,
            kind: OrderKind::Market,
            limit_price: None,
            amount: 0.0,
            filled: 0.0,
            remaining: 0.0,
            avg_fill_price: 0.0,
            status: OrderState::Pending,
            post_only: false,
            reduce_only: false,
            created_at: epoch,
            updated_at: epoch,
            fee: 0.0,
            realized_pnl: 0.0,
            client_id: None,
            reject_reason: None,
        }
    }
}

impl Poolable for Order {
    fn reset(&mut self) {
        *self = Order::default();
    }
}

impl Order {
    /// Reinitializes a zeroed pooled record for a fresh admission.
    pub fn init(&mut self, id: OrderId, req: &OrderRequest, t: DateTime<Utc>) {
        self.id = id;
        self.symbol = req.symbol.clone();
        self.side = req.side;
        self.kind = req.kind;
        self.limit_price = req.limit_price;
        self.amount = req.amount;
        self.filled = 0.0;
        self.remaining = req.amount;
        self.avg_fill_price = 0.0;
        self.status = OrderState::Pending;
        self.post_only = req.post_only;
        self.reduce_only = req.reduce_only;
        self.created_at = t;
        self.updated_at = t;
        self.fee = 0.0;
        self.realized_pnl = 0.0;
        self.client_id = req.client_id.clone();
        self.reject_reason = None;
    }

    pub fn reject(&mut self, reason: RejectReason, t: DateTime<Utc>) {
        self.status = OrderState::Rejected;
        self.updated_at = t;
        self.reject_reason = Some(reason);
        tracing::warn!(order_id = self.id, symbol = %self.symbol, reason = %reason, "order rejected");
    }

    /// Applies a fill's VWAP/fee/state bookkeeping to this order.
    pub fn apply_fill(&mut self, fill_qty: f64, fill_price: f64, fee: f64, t: DateTime<Utc>) {
        let new_filled = self.filled + fill_qty;
        self.avg_fill_price = if new_filled > 0.0 {
            (self.avg_fill_price * self.filled + fill_price * fill_qty) / new_filled
        } else {
            self.avg_fill_price
        };
        self.filled = new_filled;
        self.remaining = (self.amount - self.filled).max(0.0);
        self.fee += fee;
        self.updated_at = t;
        self.status = if self.remaining <= 1e-9 { OrderState::Filled } else { OrderState::Partial };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_from_request_zeroes_fill_state() {
        let mut order = Order::default();
        let req = OrderRequest::limit(Symbol::new("BTCUSDT"), Side::Buy, 2.0, 100.0);
        let t = Utc::now();
        order.init(1, &req, t);
        assert_eq!(order.remaining, 2.0);
        assert_eq!(order.status, OrderState::Pending);
    }

    #[test]
    fn apply_fill_transitions_to_partial_then_filled() {
        let mut order = Order::default();
        let req = OrderRequest::market(Symbol::new("BTCUSDT"), Side::Buy, 2.0);
        order.init(1, &req, Utc::now());

        order.apply_fill(1.0, 100.0, 0.02, Utc::now());
        assert_eq!(order.status, OrderState::Partial);
        assert_eq!(order.avg_fill_price, 100.0);

        order.apply_fill(1.0, 102.0, 0.02, Utc::now());
        assert_eq!(order.status, OrderState::Filled);
        assert!((order.avg_fill_price - 101.0).abs() < 1e-9);
        assert!((order.remaining).abs() < 1e-9);
    }
}
