//! Matching engine performance benchmarks.
//!
//! Run with: `cargo bench`
//! View results: `open target/criterion/report/index.html`

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use perp_backtest_core::{Account, MatchParams, MatchingEngine, OrderRequest, Side, Symbol};

fn params() -> MatchParams {
    MatchParams {
        leverage: 10.0,
        maintenance_margin_rate: 0.004,
        maker_fee: 0.0002,
        taker_fee: 0.0005,
        fixed_slippage: 0.0001,
        use_fixed_slippage: false,
    }
}

fn deep_book() -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let bids = (0..50).map(|i| (100.0 - i as f64 * 0.1, 5.0)).collect();
    let asks = (0..50).map(|i| (100.1 + i as f64 * 0.1, 5.0)).collect();
    (bids, asks)
}

fn benchmark_market_order_submission(c: &mut Criterion) {
    c.bench_function("market_order_against_deep_book", |b| {
        b.iter(|| {
            let mut matching = MatchingEngine::new();
            let mut account = Account::new(1_000_000.0, 0.006);
            let symbol = Symbol::new("BTCUSDT");
            let (bids, asks) = deep_book();
            matching.update_book(&mut account, &symbol, bids, asks, Utc::now(), params());

            let req = OrderRequest::market(symbol, Side::Buy, black_box(0.01));
            let (order, _fills) = matching.submit_order(&mut account, req, Utc::now(), params());
            black_box(order);
        });
    });
}

fn benchmark_repeated_fills(c: &mut Criterion) {
    c.bench_function("1000_sequential_market_fills", |b| {
        b.iter(|| {
            let mut matching = MatchingEngine::new();
            let mut account = Account::new(1_000_000.0, 0.006);
            let symbol = Symbol::new("BTCUSDT");
            let (bids, asks) = deep_book();
            matching.update_book(&mut account, &symbol, bids, asks, Utc::now(), params());

            for i in 0..1000 {
                let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
                let req = OrderRequest::market(symbol.clone(), side, 0.001);
                let (order, _fills) = matching.submit_order(&mut account, req, Utc::now(), params());
                black_box(order);
            }
        });
    });
}

fn benchmark_depth_update_rematch(c: &mut Criterion) {
    c.bench_function("depth_update_rematches_100_resting_limits", |b| {
        b.iter(|| {
            let mut matching = MatchingEngine::new();
            let mut account = Account::new(1_000_000.0, 0.006);
            let symbol = Symbol::new("BTCUSDT");
            let (bids, asks) = deep_book();
            matching.update_book(&mut account, &symbol, bids.clone(), asks.clone(), Utc::now(), params());

            // Rests below the current best ask so none of these fill at submission time.
            for _ in 0..100 {
                let req = OrderRequest::limit(symbol.clone(), Side::Buy, 0.01, 99.9);
                matching.submit_order(&mut account, req, Utc::now(), params());
            }

            // Shifts the ladder down far enough to cross every resting order at once.
            let (crossed_bids, crossed_asks): (Vec<_>, Vec<_>) = bids
                .into_iter()
                .zip(asks.into_iter())
                .map(|((bp, bq), (ap, aq))| ((bp - 5.0, bq), (ap - 5.0, aq)))
                .unzip();
            let touched = matching.update_book(&mut account, &symbol, crossed_bids, crossed_asks, Utc::now(), params());
            black_box(touched);
        });
    });
}

criterion_group!(
    benches,
    benchmark_market_order_submission,
    benchmark_repeated_fills,
    benchmark_depth_update_rematch
);
criterion_main!(benches);
