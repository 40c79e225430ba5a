//! Backtest engine: the main loop.
//!
//! Pulls events off the time-sorted queue, advances the simulated
//! clock, runs the funding/liquidation checks, dispatches to the
//! matching engine and the strategy, samples equity, and finally
//! computes the result record. Phase ordering per event is fixed:
//! funding check, liquidation check, dispatch, equity sampling — with
//! a deterministic sorted close-out at the end of the run.

use crate::account::{Account, AccountSnapshot};
use crate::config::Config;
use crate::error::BacktestError;
use crate::event::{Event, EventKind, EventQueue};
use crate::matching::{Fill, MatchParams, MatchingEngine};
use crate::order::{Order, OrderId, OrderRequest};
use crate::position::Position;
use crate::stats::{self, BacktestResult, EquitySample, ResultInputs};
use crate::strategy::Strategy;
use crate::types::{PositionSide, Side, Symbol};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Columnar trade row, per the external event-input schema.
#[derive(Debug, Clone, Copy)]
pub struct TradeRow {
    pub timestamp_ms: i64,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
}

/// Columnar depth-snapshot row.
#[derive(Debug, Clone)]
pub struct DepthRow {
    pub timestamp_ms: i64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Columnar funding-rate row.
#[derive(Debug, Clone, Copy)]
pub struct FundingRow {
    pub timestamp_ms: i64,
    pub rate: f64,
}

/// Columnar candle row.
#[derive(Debug, Clone, Copy)]
pub struct CandleRow {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// The capability surface a strategy hook is given: submit/cancel
/// orders, close positions, and read account/position/book state, all
/// at the engine's current simulated clock.
///
/// Borrows the engine's live state for the duration of one hook call.
/// Order submissions made through this handle settle immediately
/// against [`MatchingEngine`] and return their (order, fills) directly
/// to the caller for convenience, but the same pair is also queued
/// (`pending`) rather than dispatched to `on_order_fill`/
/// `on_order_update` right away — the strategy trait object is already
/// mutably borrowed running the hook that holds this context, so a
/// second call back into it is not expressible without interior
/// mutability the single-threaded model has no need for. The engine's
/// run loop drains the queue and dispatches those notifications
/// immediately after the hook call returns and the borrow ends, so
/// every admitted order still reaches `on_order_update` (and every
/// fill still reaches `on_order_fill`) exactly once, just after rather
/// than during the submitting hook. Fills and order-update
/// notifications for book-driven cascades (resting limits re-matched
/// by a depth update) go through the identical dispatch path.
pub struct EngineContext<'a> {
    matching: &'a mut MatchingEngine,
    account: &'a mut Account,
    config: &'a Config,
    clock: DateTime<Utc>,
    /// Orders (and fills) admitted through this context since it was
    /// created; drained by `take_pending`.
    pending: Vec<(Order, Vec<Fill>)>,
}

impl<'a> EngineContext<'a> {
    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Drains the notifications queued by this context's submissions
    /// since it was created. The caller dispatches them once the
    /// borrow on the engine's state this context holds has ended.
    fn take_pending(&mut self) -> Vec<(Order, Vec<Fill>)> {
        std::mem::take(&mut self.pending)
    }

    fn match_params(&self) -> MatchParams {
        MatchParams {
            leverage: self.config.leverage,
            maintenance_margin_rate: self.config.maintenance_margin_rate,
            maker_fee: self.config.maker_fee,
            taker_fee: self.config.taker_fee,
            fixed_slippage: self.config.fixed_slippage,
            use_fixed_slippage: matches!(self.config.slippage_model, crate::config::SlippageModel::Fixed),
        }
    }

    /// Submits any order request; the general entry point the
    /// market/limit convenience methods below are built on. The
    /// returned order/fills are also queued for `on_order_fill`/
    /// `on_order_update` dispatch once the current hook returns.
    pub fn submit(&mut self, req: OrderRequest) -> (Order, Vec<Fill>) {
        let params = self.match_params();
        let (order, fills) = self.matching.submit_order(self.account, req, self.clock, params);
        self.pending.push((order.clone(), fills.clone()));
        (order, fills)
    }

    pub fn market_buy(&mut self, symbol: impl Into<Symbol>, amount: f64) -> (Order, Vec<Fill>) {
        self.submit(OrderRequest::market(symbol, Side::Buy, amount))
    }

    pub fn market_sell(&mut self, symbol: impl Into<Symbol>, amount: f64) -> (Order, Vec<Fill>) {
        self.submit(OrderRequest::market(symbol, Side::Sell, amount))
    }

    pub fn limit_buy(&mut self, symbol: impl Into<Symbol>, amount: f64, price: f64) -> (Order, Vec<Fill>) {
        self.submit(OrderRequest::limit(symbol, Side::Buy, amount, price))
    }

    pub fn limit_sell(&mut self, symbol: impl Into<Symbol>, amount: f64, price: f64) -> (Order, Vec<Fill>) {
        self.submit(OrderRequest::limit(symbol, Side::Sell, amount, price))
    }

    pub fn cancel_order(&mut self, id: OrderId) -> Option<Order> {
        let order = self.matching.cancel_order(id, self.clock)?;
        self.pending.push((order.clone(), Vec::new()));
        Some(order)
    }

    pub fn cancel_all(&mut self, symbol: Option<&Symbol>) -> Vec<Order> {
        let orders = self.matching.cancel_all(symbol, self.clock);
        self.pending.extend(orders.iter().cloned().map(|o| (o, Vec::new())));
        orders
    }

    /// Emits a reduce-only market order sized to fully close the
    /// current position, if any. No-op (returns `None`) when flat.
    pub fn close_position(&mut self, symbol: &Symbol) -> Option<(Order, Vec<Fill>)> {
        let position = self.account.get_position(symbol)?;
        if position.is_flat() {
            return None;
        }
        let side = match position.side {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
            PositionSide::None => return None,
        };
        let amount = position.size;
        Some(self.submit(OrderRequest::market(symbol.clone(), side, amount).reduce_only()))
    }

    pub fn close_all_positions(&mut self) -> Vec<(Order, Vec<Fill>)> {
        let symbols: Vec<Symbol> = self.account.symbols_in_order().to_vec();
        symbols.iter().filter_map(|s| self.close_position(s)).collect()
    }

    pub fn account_snapshot(&self) -> AccountSnapshot {
        self.account.snapshot()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.account.get_position(symbol).cloned()
    }

    pub fn top_of_book(&self, symbol: &Symbol) -> (f64, f64) {
        self.matching.top_of_book(symbol)
    }

    pub fn active_orders(&self, symbol: Option<&Symbol>) -> Vec<Order> {
        self.matching.active_orders(symbol).into_iter().cloned().collect()
    }
}

pub struct BacktestEngine {
    config: Config,
    matching: MatchingEngine,
    account: Account,
    events: EventQueue,
    strategy: Option<Box<dyn Strategy>>,
    funding_cache: HashMap<Symbol, f64>,
    equity_curve: Vec<EquitySample>,
    trade_ledger: Vec<Fill>,
    clock: DateTime<Utc>,
    last_funding_time: Option<DateTime<Utc>>,
    last_equity_time: Option<DateTime<Utc>>,
    events_processed: u64,
}

impl BacktestEngine {
    pub fn new(config: Config) -> Self {
        let account = Account::new(config.initial_capital, config.liquidation_fee_rate);
        let matching = MatchingEngine::with_capacity(config.pre_allocate_orders);
        Self {
            config,
            matching,
            account,
            events: EventQueue::new(),
            strategy: None,
            funding_cache: HashMap::new(),
            equity_curve: Vec::new(),
            trade_ledger: Vec::new(),
            clock: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            last_funding_time: None,
            last_equity_time: None,
            events_processed: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn load_events(&mut self, events: Vec<Event>) {
        self.events.extend(events);
    }

    pub fn load_trades(&mut self, symbol: impl Into<Symbol>, rows: &[TradeRow]) {
        let symbol = symbol.into();
        self.events.extend(rows.iter().map(|r| Event {
            timestamp: from_ms(r.timestamp_ms),
            symbol: symbol.clone(),
            kind: EventKind::Trade { price: r.price, amount: r.amount, side: r.side },
        }));
    }

    pub fn load_depth(&mut self, symbol: impl Into<Symbol>, rows: &[DepthRow]) {
        let symbol = symbol.into();
        self.events.extend(rows.iter().map(|r| Event {
            timestamp: from_ms(r.timestamp_ms),
            symbol: symbol.clone(),
            kind: EventKind::Depth { bids: r.bids.clone(), asks: r.asks.clone() },
        }));
    }

    pub fn load_funding(&mut self, symbol: impl Into<Symbol>, rows: &[FundingRow]) {
        let symbol = symbol.into();
        self.events.extend(rows.iter().map(|r| Event {
            timestamp: from_ms(r.timestamp_ms),
            symbol: symbol.clone(),
            kind: EventKind::Funding { rate: r.rate },
        }));
    }

    pub fn load_candles(&mut self, symbol: impl Into<Symbol>, rows: &[CandleRow]) {
        let symbol = symbol.into();
        self.events.extend(rows.iter().map(|r| Event {
            timestamp: from_ms(r.timestamp_ms),
            symbol: symbol.clone(),
            kind: EventKind::Candle { open: r.open, high: r.high, low: r.low, close: r.close, volume: r.volume },
        }));
    }

    /// Binds the strategy and invokes its init hook immediately, with
    /// a reference to the engine (the clock is not yet meaningful —
    /// it is reset to the first event's timestamp at `run()`).
    pub fn set_strategy(&mut self, mut strategy: Box<dyn Strategy>) {
        let pending = {
            let mut ctx = self.context();
            strategy.on_init(&mut ctx);
            ctx.take_pending()
        };
        self.dispatch_notifications(strategy.as_mut(), pending);
        self.strategy = Some(strategy);
    }

    fn context(&mut self) -> EngineContext<'_> {
        EngineContext {
            matching: &mut self.matching,
            account: &mut self.account,
            config: &self.config,
            clock: self.clock,
            pending: Vec::new(),
        }
    }

    fn match_params(&self) -> MatchParams {
        MatchParams {
            leverage: self.config.leverage,
            maintenance_margin_rate: self.config.maintenance_margin_rate,
            maker_fee: self.config.maker_fee,
            taker_fee: self.config.taker_fee,
            fixed_slippage: self.config.fixed_slippage,
            use_fixed_slippage: matches!(self.config.slippage_model, crate::config::SlippageModel::Fixed),
        }
    }

    /// Settles one funding interval across every non-flat position,
    /// using the cached rate for its symbol (0/unknown is a no-op).
    fn settle_funding(&mut self) {
        let symbols: Vec<Symbol> = self
            .account
            .positions_in_order()
            .filter(|p| !p.is_flat())
            .map(|p| p.symbol.clone())
            .collect();

        for symbol in symbols {
            let rate = *self.funding_cache.get(&symbol).unwrap_or(&0.0);
            if rate == 0.0 {
                continue;
            }
            let fee = {
                let position = self.account.get_or_create_position(&symbol);
                position.apply_funding(rate)
            };
            self.account.deduct_funding(fee);
            tracing::info!(symbol = %symbol, rate, fee, "funding settled");
        }
        self.account.refresh();
    }

    /// Liquidates every position whose mark has crossed its
    /// liquidation price, in deterministic (insertion) symbol order.
    fn check_liquidations(&mut self) {
        let to_liquidate: Vec<(Symbol, f64)> = self
            .account
            .positions_in_order()
            .filter(|p| !p.is_flat() && p.should_liquidate(p.mark_price))
            .map(|p| (p.symbol.clone(), p.mark_price))
            .collect();

        for (symbol, mark) in to_liquidate {
            self.account.liquidate(&symbol, mark);
        }
    }

    fn sample_equity(&mut self) {
        self.account.refresh();
        let snapshot = self.account.snapshot();
        let unrealized: f64 = snapshot.positions.iter().map(|p| p.unrealized_pnl).sum();
        self.equity_curve.push(EquitySample {
            timestamp: self.clock,
            equity: snapshot.equity,
            balance: snapshot.balance,
            unrealized_pnl: unrealized,
        });
    }

    /// Appends every fill to the trade ledger and dispatches
    /// `on_order_fill`/`on_order_update` for each (order, fills) pair —
    /// the single place this happens, whether the pair came from a
    /// resting-limit cascade triggered by a depth update or was drained
    /// from an `EngineContext` after a strategy submitted an order from
    /// inside a hook.
    fn dispatch_notifications(&mut self, strategy: &mut dyn Strategy, notifications: Vec<(Order, Vec<Fill>)>) {
        for (order, fills) in notifications {
            self.trade_ledger.extend(fills.iter().cloned());
            for fill in &fills {
                let mut ctx = self.context();
                strategy.on_order_fill(&mut ctx, fill);
            }
            let reason = order.reject_reason.map(|r| r.to_string());
            let mut ctx = self.context();
            strategy.on_order_update(&mut ctx, &order, reason.as_deref());
        }
    }

    /// Runs the loaded events to completion against the bound
    /// strategy. Precondition: a strategy is set and at least one
    /// event is loaded; violating either is `InvalidInput`, not a
    /// panic — a fatal-but-reported precondition failure, not an
    /// internal invariant violation.
    pub fn run(&mut self) -> Result<BacktestResult, BacktestError> {
        if self.events.is_empty() {
            return Err(BacktestError::InvalidInput("no events loaded".to_string()));
        }
        let mut strategy = self
            .strategy
            .take()
            .ok_or_else(|| BacktestError::InvalidInput("no strategy set".to_string()))?;

        self.events.sort();
        let events: Vec<Event> = self.events.iter().cloned().collect();

        let start_time = events[0].timestamp;
        self.clock = start_time;
        self.last_funding_time = Some(start_time);
        self.last_equity_time = Some(start_time);

        let funding_interval = Duration::milliseconds(self.config.funding_interval_ms);
        let equity_interval = Duration::milliseconds(self.config.equity_sampling_interval_ms);
        let wall_clock_start = std::time::Instant::now();

        for event in &events {
            self.clock = event.timestamp;
            self.events_processed += 1;

            // A funding observation updates the rate cache before this
            // event's own settlement check, so a rate landing exactly on
            // an interval boundary is available to the settlement it
            // triggers (see DESIGN.md: funding-cache-vs-settlement
            // ordering). The `on_funding` hook still fires in its usual
            // dispatch slot below.
            if let EventKind::Funding { rate } = &event.kind {
                self.funding_cache.insert(event.symbol.clone(), *rate);
            }

            if self.clock - self.last_funding_time.unwrap() >= funding_interval {
                self.settle_funding();
                self.last_funding_time = Some(self.clock);
            }

            self.check_liquidations();

            match &event.kind {
                EventKind::Trade { price, amount, side } => {
                    self.matching.update_last(&mut self.account, &event.symbol, *price, self.clock);
                    let mut ctx = self.context();
                    strategy.on_trade(&mut ctx, *price, *amount, *side);
                    let pending = ctx.take_pending();
                    self.dispatch_notifications(strategy.as_mut(), pending);
                }
                EventKind::Depth { bids, asks } => {
                    let params = self.match_params();
                    let touched = self.matching.update_book(
                        &mut self.account,
                        &event.symbol,
                        bids.clone(),
                        asks.clone(),
                        self.clock,
                        params,
                    );
                    self.dispatch_notifications(strategy.as_mut(), touched);
                    let mut ctx = self.context();
                    strategy.on_depth(&mut ctx);
                    let pending = ctx.take_pending();
                    self.dispatch_notifications(strategy.as_mut(), pending);
                }
                EventKind::Funding { rate } => {
                    let mut ctx = self.context();
                    strategy.on_funding(&mut ctx, *rate);
                    let pending = ctx.take_pending();
                    self.dispatch_notifications(strategy.as_mut(), pending);
                }
                EventKind::Candle { open, high, low, close, volume } => {
                    self.matching.update_last(&mut self.account, &event.symbol, *close, self.clock);
                    let mut ctx = self.context();
                    strategy.on_kline(&mut ctx, *open, *high, *low, *close, *volume);
                    let pending = ctx.take_pending();
                    self.dispatch_notifications(strategy.as_mut(), pending);
                }
            }

            if self.clock - self.last_equity_time.unwrap() >= equity_interval {
                self.sample_equity();
                self.last_equity_time = Some(self.clock);
            }
        }

        self.sample_equity();

        let wall_clock_ms = wall_clock_start.elapsed().as_millis() as i64;
        let snapshot = self.account.snapshot();
        let result = stats::compute(ResultInputs {
            start_time,
            end_time: self.clock,
            wall_clock_ms,
            initial_capital: self.config.initial_capital,
            account: &snapshot,
            equity_curve: &self.equity_curve,
            trade_ledger: &self.trade_ledger,
            events_processed: self.events_processed,
            orders_submitted: self.matching.orders_submitted(),
            orders_filled: self.matching.orders_filled(),
        });

        let pending = {
            let mut ctx = self.context();
            strategy.on_end(&mut ctx, &result);
            ctx.take_pending()
        };
        self.dispatch_notifications(strategy.as_mut(), pending);

        self.strategy = Some(strategy);
        Ok(result)
    }

    /// Restores initial capital, clears positions/orders/ledger/curve,
    /// and keeps the loaded events and bound strategy so `run()` can
    /// be called again and reproduce the original result bit-for-bit.
    pub fn reset(&mut self) {
        self.account.reset();
        self.matching = MatchingEngine::with_capacity(self.config.pre_allocate_orders);
        self.funding_cache.clear();
        self.equity_curve.clear();
        self.trade_ledger.clear();
        self.clock = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        self.last_funding_time = None;
        self.last_equity_time = None;
        self.events_processed = 0;
    }
}
