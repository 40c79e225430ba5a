//! Matching engine: owns every symbol's order book and the active-
//! order set, validates and admits orders, matches them against depth,
//! and settles fills into the account.
//!
//! Rust mapping of the "callback slot" state: rather than storing
//! `FnMut` callback slots that would alias the backtest engine calling
//! into them, `submit_order`/`cancel_order`/`cancel_all`/`update_book`
//! return the orders and fills they produced; `BacktestEngine` (the
//! sole owner of both this engine and the strategy) dispatches them to
//! the strategy hooks. Same observable dispatch, no self-referential
//! callback graph.

use crate::account::Account;
use crate::error::RejectReason;
use crate::order::{Order, OrderKind, OrderRequest, OrderState};
use crate::orderbook::OrderBook;
use crate::pool::ObjectPool;
use crate::position::PositionParams;
use crate::types::{Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: crate::order::OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    pub fee: f64,
    pub realized_pnl: f64,
    pub slippage: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fee/margin/slippage parameters a submission or fill needs, carried
/// in from the active `Config` by the backtest engine. Avoids coupling
/// this module to `Config` directly.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
    pub leverage: f64,
    pub maintenance_margin_rate: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub fixed_slippage: f64,
    pub use_fixed_slippage: bool,
}

pub struct MatchingEngine {
    books: HashMap<Symbol, OrderBook>,
    pool: ObjectPool<Order>,
    order_index: HashMap<crate::order::OrderId, usize>,
    active_ids: Vec<crate::order::OrderId>,
    next_id: crate::order::OrderId,
    orders_submitted: u64,
    orders_filled: u64,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// `capacity` pre-sizes the order pool's backing slab, per the
    /// `pre_allocate_orders` config knob — avoids slab reallocation
    /// churn on long backtests with a known order-count ballpark.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            books: HashMap::new(),
            pool: ObjectPool::with_capacity(capacity),
            order_index: HashMap::with_capacity(capacity),
            active_ids: Vec::new(),
            next_id: 1,
            orders_submitted: 0,
            orders_filled: 0,
        }
    }

    pub fn orders_submitted(&self) -> u64 {
        self.orders_submitted
    }

    pub fn orders_filled(&self) -> u64 {
        self.orders_filled
    }

    fn book_mut(&mut self, symbol: &Symbol) -> &mut OrderBook {
        self.books.entry(symbol.clone()).or_insert_with(OrderBook::new)
    }

    /// Dispatches a marketable fill to the configured slippage model.
    /// A free function (not `&self`) so it can be called while a
    /// `&OrderBook` borrowed out of `self.books` is still live.
    fn exec_fill(book: &OrderBook, side: Side, amount: f64, params: &MatchParams) -> crate::orderbook::FillResult {
        if params.use_fixed_slippage {
            book.simulate_market_fixed(side, amount, params.fixed_slippage)
        } else {
            book.simulate_market(side, amount)
        }
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    pub fn top_of_book(&self, symbol: &Symbol) -> (f64, f64) {
        self.books.get(symbol).map(|b| (b.best_bid(), b.best_ask())).unwrap_or((0.0, 0.0))
    }

    pub fn get_order(&self, id: crate::order::OrderId) -> Option<&Order> {
        self.order_index.get(&id).map(|&idx| self.pool.get(idx))
    }

    pub fn active_orders(&self, symbol: Option<&Symbol>) -> Vec<&Order> {
        self.active_ids
            .iter()
            .filter_map(|id| self.order_index.get(id).map(|&idx| self.pool.get(idx)))
            .filter(|o| symbol.map(|s| &o.symbol == s).unwrap_or(true))
            .collect()
    }


    /// Validates, admits, and (if marketable) immediately executes an
    /// order. Returns the terminal/resting order plus any fills it
    /// generated at submission. A rejected order is never inserted
    /// into the active set.
    pub fn submit_order(
        &mut self,
        account: &mut Account,
        req: OrderRequest,
        t: DateTime<Utc>,
        params: MatchParams,
    ) -> (Order, Vec<Fill>) {
        self.orders_submitted += 1;
        let id = self.next_id;
        self.next_id += 1;

        let idx = self.pool.acquire();
        let order_slot = self.pool.get_mut(idx);
        order_slot.init(id, &req, t);

        let mut amount = req.amount;

        if amount <= 0.0 {
            let order = self.pool.get_mut(idx);
            order.reject(RejectReason::InvalidAmount, t);
            let snapshot = order.clone();
            self.pool.release(idx);
            return (snapshot, Vec::new());
        }

        if matches!(req.kind, OrderKind::Limit) {
            let valid_price = req.limit_price.map(|p| p > 0.0).unwrap_or(false);
            if !valid_price {
                let order = self.pool.get_mut(idx);
                order.reject(RejectReason::InvalidPrice, t);
                let snapshot = order.clone();
                self.pool.release(idx);
                return (snapshot, Vec::new());
            }
        }

        if req.reduce_only {
            let position = account.get_or_create_position(&req.symbol);
            if position.is_flat() {
                let order = self.pool.get_mut(idx);
                order.reject(RejectReason::ReduceOnlyWithoutPosition, t);
                let snapshot = order.clone();
                self.pool.release(idx);
                return (snapshot, Vec::new());
            }
            let position_side = crate::types::PositionSide::from_side(req.side);
            if position.side == position_side {
                let order = self.pool.get_mut(idx);
                order.reject(RejectReason::ReduceOnlySameSide, t);
                let snapshot = order.clone();
                self.pool.release(idx);
                return (snapshot, Vec::new());
            }
            if amount > position.size {
                amount = position.size;
                self.pool.get_mut(idx).amount = amount;
                self.pool.get_mut(idx).remaining = amount;
            }
        } else {
            let book = self.book_mut(&req.symbol);
            let estimated_price = match req.kind {
                OrderKind::Market => match req.side {
                    Side::Buy => book.best_ask(),
                    Side::Sell => book.best_bid(),
                },
                OrderKind::Limit => req.limit_price.unwrap_or(0.0),
            };
            let required = amount * estimated_price / params.leverage;
            if !account.has_enough_margin(required) {
                let order = self.pool.get_mut(idx);
                order.reject(RejectReason::InsufficientMargin, t);
                let snapshot = order.clone();
                self.pool.release(idx);
                return (snapshot, Vec::new());
            }
        }

        if req.post_only {
            let book = self.book_mut(&req.symbol);
            let price = req.limit_price.unwrap_or(0.0);
            let would_cross = match req.side {
                Side::Buy => {
                    let ask = book.best_ask();
                    ask > 0.0 && price >= ask
                }
                Side::Sell => {
                    let bid = book.best_bid();
                    bid > 0.0 && price <= bid
                }
            };
            if would_cross {
                let order = self.pool.get_mut(idx);
                order.reject(RejectReason::PostOnlyWouldCross, t);
                let snapshot = order.clone();
                self.pool.release(idx);
                return (snapshot, Vec::new());
            }
        }

        let mut fills = Vec::new();
        let book = self.books.entry(req.symbol.clone()).or_insert_with(OrderBook::new);
        let exec = match req.kind {
            OrderKind::Market => Self::exec_fill(book, req.side, amount, &params),
            OrderKind::Limit => book.check_limit(req.side, req.limit_price.unwrap_or(0.0), amount),
        };

        match req.kind {
            OrderKind::Market => {
                if exec.success {
                    let fee = amount * exec.avg_price * params.taker_fee;
                    let fill = self.settle_fill(account, idx, amount, exec.avg_price, fee, exec.slippage, t, params);
                    fills.push(fill);
                } else {
                    let reason = match exec.reason {
                        Some(crate::error::UnfilledReason::EmptyBook) => RejectReason::EmptyBook,
                        _ => RejectReason::InsufficientLiquidity,
                    };
                    let order = self.pool.get_mut(idx);
                    order.reject(reason, t);
                    let snapshot = order.clone();
                    self.pool.release(idx);
                    return (snapshot, Vec::new());
                }
            }
            OrderKind::Limit => {
                if exec.filled > 0.0 {
                    let fee = exec.filled * exec.avg_price * params.taker_fee;
                    let fill = self.settle_fill(account, idx, exec.filled, exec.avg_price, fee, exec.slippage, t, params);
                    fills.push(fill);
                }
                let remaining = self.pool.get(idx).remaining;
                if remaining > 1e-9 {
                    self.pool.get_mut(idx).status = OrderState::Open;
                    self.order_index.insert(id, idx);
                    self.active_ids.push(id);
                    let snapshot = self.pool.get(idx).clone();
                    return (snapshot, fills);
                }
            }
        }

        self.orders_filled += 1;
        let snapshot = self.pool.get(idx).clone();
        self.pool.release(idx);
        (snapshot, fills)
    }

    fn settle_fill(
        &mut self,
        account: &mut Account,
        idx: usize,
        fill_qty: f64,
        fill_price: f64,
        fee: f64,
        slippage: f64,
        t: DateTime<Utc>,
        params: MatchParams,
    ) -> Fill {
        let (order_id, symbol, side) = {
            let order = self.pool.get_mut(idx);
            order.apply_fill(fill_qty, fill_price, fee, t);
            (order.id, order.symbol.clone(), order.side)
        };

        let realized = {
            let position = account.get_or_create_position(&symbol);
            let realized = position.update(
                side,
                fill_qty,
                fill_price,
                PositionParams { leverage: params.leverage, maintenance_margin_rate: params.maintenance_margin_rate },
            );
            position.trading_fee += fee;
            realized
        };
        account.deduct_fee(fee);
        if realized != 0.0 {
            account.add_realized(realized);
        }
        account.refresh();

        tracing::info!(order_id, symbol = %symbol, side = ?side, price = fill_price, amount = fill_qty, fee, "fill processed");

        Fill { order_id, symbol, side, price: fill_price, amount: fill_qty, fee, realized_pnl: realized, slippage, timestamp: t }
    }

    pub fn cancel_order(&mut self, id: crate::order::OrderId, t: DateTime<Utc>) -> Option<Order> {
        let idx = *self.order_index.get(&id)?;
        self.active_ids.retain(|&x| x != id);
        self.order_index.remove(&id);
        let order = self.pool.get_mut(idx);
        order.status = OrderState::Canceled;
        order.updated_at = t;
        let snapshot = order.clone();
        self.pool.release(idx);
        Some(snapshot)
    }

    pub fn cancel_all(&mut self, symbol: Option<&Symbol>, t: DateTime<Utc>) -> Vec<Order> {
        let ids: Vec<_> = self
            .active_ids
            .iter()
            .copied()
            .filter(|id| {
                self.order_index
                    .get(id)
                    .map(|&idx| symbol.map(|s| &self.pool.get(idx).symbol == s).unwrap_or(true))
                    .unwrap_or(false)
            })
            .collect();
        ids.into_iter().filter_map(|id| self.cancel_order(id, t)).collect()
    }

    /// Replaces the ladder for `symbol`, then re-matches every active
    /// order resting on that symbol against the new depth. Returns,
    /// per touched order, the fills it produced at this update — the
    /// caller dispatches both fill and order-update notifications from
    /// that list plus `get_order` for the post-update snapshot.
    pub fn update_book(
        &mut self,
        account: &mut Account,
        symbol: &Symbol,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        t: DateTime<Utc>,
        params: MatchParams,
    ) -> Vec<(Order, Vec<Fill>)> {
        self.book_mut(symbol).update(bids, asks, t);

        let candidate_ids: Vec<_> = self
            .active_ids
            .iter()
            .copied()
            .filter(|id| self.order_index.get(id).map(|&idx| &self.pool.get(idx).symbol == symbol).unwrap_or(false))
            .collect();

        let mut touched = Vec::new();
        for id in candidate_ids {
            let idx = match self.order_index.get(&id) {
                Some(&idx) => idx,
                None => continue,
            };
            let (side, price, remaining) = {
                let order = self.pool.get(idx);
                (order.side, order.limit_price.unwrap_or(0.0), order.remaining)
            };
            let exec = self.book_mut(symbol).check_limit(side, price, remaining);
            if exec.filled <= 0.0 {
                continue;
            }
            let fee = exec.filled * exec.avg_price * params.maker_fee;
            let fill = self.settle_fill(account, idx, exec.filled, exec.avg_price, fee, exec.slippage, t, params);
            let order_snapshot = self.pool.get(idx).clone();
            touched.push((order_snapshot.clone(), vec![fill]));

            let is_complete = order_snapshot.status == OrderState::Filled;
            if is_complete {
                self.active_ids.retain(|&x| x != id);
                self.order_index.remove(&id);
                self.orders_filled += 1;
                self.pool.release(idx);
            }
        }
        touched
    }

    pub fn update_last(&mut self, account: &mut Account, symbol: &Symbol, price: f64, t: DateTime<Utc>) {
        self.book_mut(symbol).update_last(price, t);
        let position = account.get_or_create_position(symbol);
        if !position.is_flat() {
            position.update_mark(price);
        }
        account.refresh();
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}
