//! Strategy contract.
//!
//! Every hook is optional with a default no-op body, the same shape
//! the original `Strategy` trait used for `notify_order`/`notify_trade`/
//! `init` — generalized here to the full observation surface (trade,
//! depth, funding, candle, fill, order-update, init, end) the engine
//! drives. A strategy receives an [`EngineContext`] on every hook and
//! may submit/cancel orders, close positions, or read account/position/
//! book state through it at the current simulated clock.

use crate::engine::EngineContext;
use crate::matching::Fill;
use crate::order::Order;
use crate::stats::BacktestResult;
use crate::types::Side;

pub trait Strategy {
    /// Called once before the first event, with a reference to the
    /// engine so the strategy can, e.g., read initial book state.
    fn on_init(&mut self, _ctx: &mut EngineContext) {}

    fn on_trade(&mut self, _ctx: &mut EngineContext, _price: f64, _amount: f64, _side: Side) {}

    fn on_depth(&mut self, _ctx: &mut EngineContext) {}

    fn on_funding(&mut self, _ctx: &mut EngineContext, _rate: f64) {}

    fn on_kline(&mut self, _ctx: &mut EngineContext, _open: f64, _high: f64, _low: f64, _close: f64, _volume: f64) {}

    /// Called when a fill occurs, whether or not this strategy
    /// submitted the order that generated it.
    fn on_order_fill(&mut self, _ctx: &mut EngineContext, fill: &Fill) {
        tracing::info!(
            order_id = fill.order_id,
            symbol = %fill.symbol,
            side = ?fill.side,
            price = fill.price,
            amount = fill.amount,
            fee = fill.fee,
            "order filled"
        );
    }

    /// Called on every order state transition, with the rejection
    /// reason (if any) as a human-readable string.
    fn on_order_update(&mut self, _ctx: &mut EngineContext, order: &Order, reason: Option<&str>) {
        if let Some(reason) = reason {
            tracing::warn!(order_id = order.id, symbol = %order.symbol, reason, "order update");
        }
    }

    /// Called once after the final event, with the computed result.
    fn on_end(&mut self, _ctx: &mut EngineContext, _result: &BacktestResult) {}
}
