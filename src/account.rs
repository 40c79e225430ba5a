//! Multi-symbol portfolio ledger.
//!
//! Owns every position, tracked through an insertion-ordered map so
//! settlement/liquidation/snapshot iteration is deterministic —
//! generalizing the order-management position manager's insertion-
//! order map to account-level balance/margin/equity bookkeeping.

use crate::position::Position;
use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub available: f64,
    pub used_margin: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
    pub total_funding_fees: f64,
    pub liquidation_count: u64,
    pub positions: Vec<Position>,
}

pub struct Account {
    pub initial_capital: f64,
    pub balance: f64,
    pub equity: f64,
    pub available: f64,
    pub used_margin: f64,
    pub realized_pnl: f64,
    pub total_fees: f64,
    pub total_funding_fees: f64,
    pub liquidation_count: u64,
    pub liquidation_fee_rate: f64,
    positions: HashMap<Symbol, Position>,
    position_order: Vec<Symbol>,
}

impl Account {
    pub fn new(initial_capital: f64, liquidation_fee_rate: f64) -> Self {
        Self {
            initial_capital,
            balance: initial_capital,
            equity: initial_capital,
            available: initial_capital,
            used_margin: 0.0,
            realized_pnl: 0.0,
            total_fees: 0.0,
            total_funding_fees: 0.0,
            liquidation_count: 0,
            liquidation_fee_rate,
            positions: HashMap::new(),
            position_order: Vec::new(),
        }
    }

    /// Unknown symbol on query creates an empty (flat) position rather
    /// than failing.
    pub fn get_or_create_position(&mut self, symbol: &Symbol) -> &mut Position {
        if !self.positions.contains_key(symbol) {
            self.positions.insert(symbol.clone(), Position::flat(symbol.clone()));
            self.position_order.push(symbol.clone());
        }
        self.positions.get_mut(symbol).expect("just inserted")
    }

    pub fn get_position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Deterministic (insertion-order) iteration over every tracked
    /// position, used by funding/liquidation passes and snapshots.
    pub fn positions_in_order(&self) -> impl Iterator<Item = &Position> {
        self.position_order.iter().filter_map(move |s| self.positions.get(s))
    }

    pub fn symbols_in_order(&self) -> &[Symbol] {
        &self.position_order
    }

    pub fn deduct_fee(&mut self, fee: f64) {
        self.balance -= fee;
        self.total_fees += fee;
    }

    pub fn deduct_funding(&mut self, fee: f64) {
        self.balance -= fee;
        self.total_funding_fees += fee;
    }

    pub fn add_realized(&mut self, pnl: f64) {
        self.balance += pnl;
        self.realized_pnl += pnl;
    }

    pub fn has_enough_margin(&self, required: f64) -> bool {
        self.available >= required
    }

    /// Liquidates the position for `symbol` at mark price `mark`:
    /// the initial margin is consumed, the unrealized PnL at mark is
    /// realized, and a liquidation fee (notional x LFR) is charged.
    pub fn liquidate(&mut self, symbol: &Symbol, mark: f64) {
        let Some(position) = self.positions.get_mut(symbol) else { return };
        if position.is_flat() {
            return;
        }
        position.update_mark(mark);
        let liquidation_fee = position.notional * self.liquidation_fee_rate;
        let initial_margin = position.initial_margin;
        let unrealized = position.unrealized_pnl;

        self.balance += unrealized - initial_margin - liquidation_fee;
        self.realized_pnl += unrealized;
        self.total_fees += liquidation_fee;

        position.reset();
        self.liquidation_count += 1;

        tracing::info!(
            symbol = %symbol,
            mark,
            liquidation_fee,
            "position liquidated"
        );

        self.refresh();
    }

    /// Recomputes equity/used-margin/available from live positions.
    /// `equity = balance + sum(unrealized pnl)`; `used margin = sum
    /// (initial margin over non-flat positions)`;
    /// `available = equity - used margin`.
    pub fn refresh(&mut self) {
        let mut unrealized_sum = 0.0;
        let mut margin_sum = 0.0;
        for position in self.positions.values() {
            unrealized_sum += position.unrealized_pnl;
            if !position.is_flat() {
                margin_sum += position.initial_margin;
            }
        }
        self.equity = self.balance + unrealized_sum;
        self.used_margin = margin_sum;
        self.available = self.equity - self.used_margin;
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance: self.balance,
            equity: self.equity,
            available: self.available,
            used_margin: self.used_margin,
            realized_pnl: self.realized_pnl,
            total_fees: self.total_fees,
            total_funding_fees: self.total_funding_fees,
            liquidation_count: self.liquidation_count,
            positions: self.positions_in_order().cloned().collect(),
        }
    }

    pub fn reset(&mut self) {
        self.balance = self.initial_capital;
        self.equity = self.initial_capital;
        self.available = self.initial_capital;
        self.used_margin = 0.0;
        self.realized_pnl = 0.0;
        self.total_fees = 0.0;
        self.total_funding_fees = 0.0;
        self.liquidation_count = 0;
        self.positions.clear();
        self.position_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionParams;
    use crate::types::Side;

    #[test]
    fn refresh_recomputes_equity_and_available() {
        let mut account = Account::new(1_000.0, 0.006);
        let symbol = Symbol::new("BTCUSDT");
        {
            let pos = account.get_or_create_position(&symbol);
            pos.update(Side::Buy, 1.0, 100.0, PositionParams { leverage: 100.0, maintenance_margin_rate: 0.004 });
            pos.update_mark(105.0);
        }
        account.refresh();
        assert!((account.equity - 1_005.0).abs() < 1e-9);
        assert!((account.used_margin - 1.0).abs() < 1e-9);
        assert!((account.available - 1_004.0).abs() < 1e-9);
    }

    #[test]
    fn liquidation_reduces_balance_by_margin_fee_and_loss() {
        let mut account = Account::new(1_000.0, 0.006);
        let symbol = Symbol::new("BTCUSDT");
        {
            let pos = account.get_or_create_position(&symbol);
            pos.update(Side::Buy, 1.0, 100.0, PositionParams { leverage: 100.0, maintenance_margin_rate: 0.004 });
        }
        account.refresh();

        account.liquidate(&symbol, 99.3);

        assert_eq!(account.liquidation_count, 1);
        assert!(account.get_position(&symbol).unwrap().is_flat());
        // initial_margin=1, liquidation_fee=99.3*0.006, unrealized=(99.3-100)*1=-0.7
        let expected_balance = 1_000.0 + (-0.7) - 1.0 - (99.3 * 0.006);
        assert!((account.balance - expected_balance).abs() < 1e-9);
    }

    #[test]
    fn has_enough_margin_compares_against_available() {
        let account = Account::new(1_000.0, 0.006);
        assert!(account.has_enough_margin(999.0));
        assert!(!account.has_enough_margin(1_001.0));
    }
}
