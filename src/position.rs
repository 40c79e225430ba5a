//! Leveraged per-symbol position.
//!
//! One position per symbol; size and entry track a size-weighted
//! average, matching the FIFO-close/reverse logic the order-management
//! position manager uses, generalized here with leverage, margin, and
//! liquidation fields the unleveraged original lacked.

use crate::types::{PositionSide, Side, Symbol};
use serde::{Deserialize, Serialize};

/// Parameters the position formulas are computed against. Passed
/// explicitly to `update`/`update_mark` rather than stored on the
/// position, so a strategy can (in principle) change leverage between
/// updates without the position module reaching into account config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionParams {
    pub leverage: f64,
    pub maintenance_margin_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub funding_fee: f64,
    pub trading_fee: f64,
    pub notional: f64,
    pub initial_margin: f64,
    pub maintenance_margin: f64,
    pub liquidation_price: f64,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            side: PositionSide::None,
            size: 0.0,
            entry_price: 0.0,
            mark_price: 0.0,
            leverage: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            funding_fee: 0.0,
            trading_fee: 0.0,
            notional: 0.0,
            initial_margin: 0.0,
            maintenance_margin: 0.0,
            liquidation_price: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::None
    }

    /// Applies a fill of `qty` at `price` on `side`, returning the PnL
    /// realized by this fill (0 unless it closes or reduces an
    /// existing position in the opposite direction).
    pub fn update(&mut self, side: Side, qty: f64, price: f64, params: PositionParams) -> f64 {
        let realized = if self.is_flat() {
            self.side = PositionSide::from_side(side);
            self.size = qty;
            self.entry_price = price;
            self.leverage = params.leverage;
            0.0
        } else if self.side == PositionSide::from_side(side) {
            // same direction: size-weighted average entry
            let new_size = self.size + qty;
            self.entry_price = (self.entry_price * self.size + price * qty) / new_size;
            self.size = new_size;
            self.leverage = params.leverage;
            0.0
        } else if qty < self.size {
            // opposite direction, partial close
            let realized = (price - self.entry_price) * qty * self.side.sign();
            self.size -= qty;
            realized
        } else if (qty - self.size).abs() < 1e-12 {
            // opposite direction, exact close
            let realized = (price - self.entry_price) * qty * self.side.sign();
            self.side = PositionSide::None;
            self.size = 0.0;
            self.entry_price = 0.0;
            self.leverage = 0.0;
            realized
        } else {
            // opposite direction, closes and reverses
            let realized = (price - self.entry_price) * self.size * self.side.sign();
            let residual = qty - self.size;
            self.side = PositionSide::from_side(side);
            self.size = residual;
            self.entry_price = price;
            self.leverage = params.leverage;
            realized
        };

        self.recompute_margin(params);
        // A fill is the best available mark until the next trade/depth/
        // candle event supplies one; without this a freshly-opened
        // position reads mark_price=0 and appears instantly liquidatable.
        self.update_mark(price);
        realized
    }

    fn recompute_margin(&mut self, params: PositionParams) {
        if self.is_flat() {
            self.initial_margin = 0.0;
            self.maintenance_margin = 0.0;
            self.liquidation_price = 0.0;
            return;
        }
        let entry_notional = self.size * self.entry_price;
        self.initial_margin = entry_notional / params.leverage;
        self.maintenance_margin = entry_notional * params.maintenance_margin_rate;
        self.liquidation_price = match self.side {
            PositionSide::Long => {
                self.entry_price * (1.0 - 1.0 / params.leverage + params.maintenance_margin_rate)
            }
            PositionSide::Short => {
                self.entry_price * (1.0 + 1.0 / params.leverage - params.maintenance_margin_rate)
            }
            PositionSide::None => 0.0,
        };
    }

    /// Refreshes mark price, notional, and unrealized PnL. Does not
    /// touch margin/liquidation price — those are entry-anchored and
    /// only change on `update`.
    pub fn update_mark(&mut self, mark: f64) {
        self.mark_price = mark;
        if self.is_flat() {
            self.notional = 0.0;
            self.unrealized_pnl = 0.0;
            return;
        }
        self.notional = self.size * mark;
        self.unrealized_pnl = (mark - self.entry_price) * self.size * self.side.sign();
    }

    /// Settles one funding interval at `rate`, returning the fee
    /// (positive = outflow). No-op on a flat position.
    pub fn apply_funding(&mut self, rate: f64) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        let fee = self.notional * rate * self.side.sign();
        self.funding_fee += fee;
        fee
    }

    pub fn should_liquidate(&self, mark: f64) -> bool {
        match self.side {
            PositionSide::Long => mark <= self.liquidation_price,
            PositionSide::Short => mark >= self.liquidation_price,
            PositionSide::None => false,
        }
    }

    /// Resets to flat, clearing cumulative fee/PnL accumulators —
    /// used after a liquidation.
    pub fn reset(&mut self) {
        let symbol = self.symbol.clone();
        *self = Position::flat(symbol);
    }
}
