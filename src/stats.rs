//! Result record and return/risk statistics.
//!
//! Peak-tracking drawdown loop, win/loss partition, profit factor with
//! the no-losses/no-wins edge cases, extended with Sortino and the
//! hourly annualization factor, since this core samples equity hourly
//! by default rather than daily.

use crate::account::AccountSnapshot;
use crate::matching::Fill;
use crate::position::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Samples per year at the default hourly cadence: `sqrt(365 * 24)`
/// annualizes Sharpe/Sortino the way a daily backtest would annualize
/// by `sqrt(365)`.
pub const ANNUALIZATION_PERIODS_PER_YEAR: f64 = 365.0 * 24.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquitySample {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub balance: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub avg_trade_return: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskStats {
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub final_balance: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_fees: f64,
    pub total_funding_fees: f64,
    pub trade_stats: TradeStats,
    pub risk_stats: RiskStats,
    pub events_processed: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub liquidation_count: u64,
    pub equity_curve: Vec<EquitySample>,
    pub trade_ledger: Vec<Fill>,
    pub final_positions: Vec<Position>,
}

impl Default for BacktestResult {
    fn default() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Self {
            start_time: epoch,
            end_time: epoch,
            duration_ms: 0,
            initial_capital: 0.0,
            final_equity: 0.0,
            final_balance: 0.0,
            total_return: 0.0,
            total_return_pct: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            total_fees: 0.0,
            total_funding_fees: 0.0,
            trade_stats: TradeStats::default(),
            risk_stats: RiskStats::default(),
            events_processed: 0,
            orders_submitted: 0,
            orders_filled: 0,
            liquidation_count: 0,
            equity_curve: Vec::new(),
            trade_ledger: Vec::new(),
            final_positions: Vec::new(),
        }
    }
}

/// Inputs gathered by the backtest engine over the run, handed to
/// [`compute`] as plain data so the statistics math stays independent
/// of the engine's internal state machine.
pub struct ResultInputs<'a> {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub wall_clock_ms: i64,
    pub initial_capital: f64,
    pub account: &'a AccountSnapshot,
    pub equity_curve: &'a [EquitySample],
    pub trade_ledger: &'a [Fill],
    pub events_processed: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
}

pub fn compute(inputs: ResultInputs<'_>) -> BacktestResult {
    let final_equity = inputs.equity_curve.last().map(|s| s.equity).unwrap_or(inputs.initial_capital);
    let final_balance = inputs.account.balance;
    let unrealized_pnl: f64 = inputs.account.positions.iter().map(|p| p.unrealized_pnl).sum();

    let total_return = if inputs.initial_capital > 0.0 {
        (final_equity - inputs.initial_capital) / inputs.initial_capital
    } else {
        0.0
    };

    let trade_stats = compute_trade_stats(inputs.trade_ledger);
    let risk_stats = compute_risk_stats(inputs.equity_curve, inputs.initial_capital, total_return);

    BacktestResult {
        start_time: inputs.start_time,
        end_time: inputs.end_time,
        duration_ms: inputs.wall_clock_ms,
        initial_capital: inputs.initial_capital,
        final_equity,
        final_balance,
        total_return,
        total_return_pct: total_return * 100.0,
        realized_pnl: inputs.account.realized_pnl,
        unrealized_pnl,
        total_fees: inputs.account.total_fees,
        total_funding_fees: inputs.account.total_funding_fees,
        trade_stats,
        risk_stats,
        events_processed: inputs.events_processed,
        orders_submitted: inputs.orders_submitted,
        orders_filled: inputs.orders_filled,
        liquidation_count: inputs.account.liquidation_count,
        equity_curve: inputs.equity_curve.to_vec(),
        trade_ledger: inputs.trade_ledger.to_vec(),
        final_positions: inputs.account.positions.clone(),
    }
}

/// A "trade" for these statistics is a fill that realized PnL — i.e.
/// one that closed or reduced a position. A pure opening fill always
/// realizes exactly 0 and has no win/loss outcome to contribute; folding
/// it into `total_trades` would dilute `win_rate`/`avg_trade_return`
/// with entries that are neither a win nor a loss. `trade_ledger` (on
/// [`BacktestResult`]) still carries every fill, opens included — only
/// this statistics rollup narrows to closing fills.
fn compute_trade_stats(fills: &[Fill]) -> TradeStats {
    let closing: Vec<&Fill> = fills.iter().filter(|f| f.realized_pnl != 0.0).collect();
    if closing.is_empty() {
        return TradeStats::default();
    }

    let winning: Vec<&Fill> = closing.iter().filter(|f| f.realized_pnl > 0.0).copied().collect();
    let losing: Vec<&Fill> = closing.iter().filter(|f| f.realized_pnl < 0.0).copied().collect();

    let gross_wins: f64 = winning.iter().map(|f| f.realized_pnl).sum();
    let gross_losses: f64 = losing.iter().map(|f| f.realized_pnl.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_wins / gross_losses
    } else if gross_wins > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if !winning.is_empty() { gross_wins / winning.len() as f64 } else { 0.0 };
    let avg_loss = if !losing.is_empty() { gross_losses / losing.len() as f64 } else { 0.0 };

    let total_return: f64 = closing.iter().map(|f| f.realized_pnl).sum();

    TradeStats {
        total_trades: closing.len() as u64,
        winning_trades: winning.len() as u64,
        losing_trades: losing.len() as u64,
        win_rate: winning.len() as f64 / closing.len() as f64,
        avg_win,
        avg_loss,
        profit_factor,
        avg_trade_return: total_return / closing.len() as f64,
    }
}

fn compute_risk_stats(curve: &[EquitySample], initial_capital: f64, total_return: f64) -> RiskStats {
    if curve.len() < 2 {
        return RiskStats::default();
    }

    let mut peak = initial_capital.max(curve[0].equity);
    let mut max_dd: f64 = 0.0;
    for sample in curve {
        if sample.equity > peak {
            peak = sample.equity;
        }
        if peak > 0.0 {
            let dd = (peak - sample.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    let returns: Vec<f64> = curve
        .windows(2)
        .map(|w| if w[0].equity != 0.0 { (w[1].equity - w[0].equity) / w[0].equity } else { 0.0 })
        .collect();

    let sharpe = sharpe_ratio(&returns);
    let sortino = sortino_ratio(&returns);
    let calmar = if max_dd > 0.0 { total_return / max_dd } else { 0.0 };

    RiskStats {
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd * 100.0,
        sharpe,
        sortino,
        calmar,
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn stdev(xs: &[f64], mean_val: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let variance = xs.iter().map(|r| (r - mean_val).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean_return = mean(returns);
    let std_dev = stdev(returns, mean_return);
    if std_dev == 0.0 {
        0.0
    } else {
        (mean_return / std_dev) * ANNUALIZATION_PERIODS_PER_YEAR.sqrt()
    }
}

fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mean_return = mean(returns);
    let negative: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    if negative.is_empty() {
        return 0.0;
    }
    let downside_mean = mean(&negative);
    let downside_dev = stdev(&negative, downside_mean);
    if downside_dev == 0.0 {
        0.0
    } else {
        (mean_return / downside_dev) * ANNUALIZATION_PERIODS_PER_YEAR.sqrt()
    }
}
