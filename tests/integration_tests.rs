//! Integration tests for the backtest engine.
//!
//! These exercise [`BacktestEngine`] end-to-end through its public API
//! rather than the matching engine's internals directly.

use perp_backtest_core::{
    BacktestEngine, Config, DepthRow, EngineContext, OrderRequest, OrderState, Side,
    SlippageModel, Strategy, TradeRow,
};

fn depth(ts: i64, bid: f64, ask: f64) -> DepthRow {
    DepthRow { timestamp_ms: ts, bids: vec![(bid, 10.0)], asks: vec![(ask, 10.0)] }
}

struct NoopStrategy;
impl Strategy for NoopStrategy {}

#[test]
fn config_loads_from_json_with_partial_overrides() {
    let dir = std::env::temp_dir().join(format!("perp_backtest_core_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, r#"{"initial_capital": 50000.0, "leverage": 20.0}"#).unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.initial_capital, 50_000.0);
    assert_eq!(config.leverage, 20.0);
    // untouched fields keep their defaults
    assert_eq!(config.maker_fee, 0.0002);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn post_only_order_rejected_at_engine_level_never_opens_a_position() {
    struct CrossingPostOnly;
    impl Strategy for CrossingPostOnly {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            let req = OrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 999.0).post_only();
            let (order, fills) = ctx.submit(req);
            assert_eq!(order.status, OrderState::Rejected);
            assert!(fills.is_empty());
        }
    }

    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 101.0)]);
    eng.set_strategy(Box::new(CrossingPostOnly));
    let result = eng.run().unwrap();

    assert_eq!(result.orders_filled, 0);
    assert!(result.final_positions.iter().all(|p| p.is_flat()));
}

#[test]
fn reduce_only_order_clamps_to_position_size_at_engine_level() {
    struct OpenThenOverReduce {
        opened: bool,
    }
    impl Strategy for OpenThenOverReduce {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            if !self.opened {
                ctx.market_buy("BTCUSDT", 1.0);
                self.opened = true;
            }
        }

        fn on_trade(&mut self, ctx: &mut EngineContext, _price: f64, _amount: f64, _side: Side) {
            let req = OrderRequest::market("BTCUSDT", Side::Sell, 5.0).reduce_only();
            ctx.submit(req);
        }
    }

    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 101.0)]);
    eng.load_trades("BTCUSDT", &[TradeRow { timestamp_ms: 1, price: 101.0, amount: 1.0, side: Side::Buy }]);
    eng.set_strategy(Box::new(OpenThenOverReduce { opened: false }));

    let result = eng.run().unwrap();
    assert!(result.final_positions.iter().all(|p| p.is_flat()));
    assert_eq!(result.orders_filled, 2);
}

#[test]
fn fixed_slippage_model_fills_entire_amount_at_one_offset_price() {
    struct SingleBuy;
    impl Strategy for SingleBuy {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            ctx.market_buy("BTCUSDT", 2.0);
        }
    }

    let mut config = Config::default();
    config.slippage_model = SlippageModel::Fixed;
    config.fixed_slippage = 0.001;
    let mut eng = BacktestEngine::new(config);
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 100.0)]);
    eng.set_strategy(Box::new(SingleBuy));

    let result = eng.run().unwrap();
    assert_eq!(result.trade_ledger.len(), 1);
    let expected_price = 100.0 * 1.001;
    assert!((result.trade_ledger[0].price - expected_price).abs() < 1e-9);
}

#[test]
fn multi_symbol_run_keeps_positions_independent() {
    struct OpenBoth {
        done: bool,
    }
    impl Strategy for OpenBoth {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            let btc = ctx.top_of_book(&perp_backtest_core::Symbol::new("BTCUSDT"));
            let eth = ctx.top_of_book(&perp_backtest_core::Symbol::new("ETHUSDT"));
            let both_ready = btc.0 > 0.0 && btc.1 > 0.0 && eth.0 > 0.0 && eth.1 > 0.0;
            if !self.done && both_ready {
                ctx.market_buy("BTCUSDT", 1.0);
                ctx.market_sell("ETHUSDT", 1.0);
                self.done = true;
            }
        }
    }

    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 101.0), depth(1, 100.0, 101.0)]);
    eng.load_depth("ETHUSDT", &[depth(0, 50.0, 51.0), depth(1, 50.0, 51.0)]);
    eng.set_strategy(Box::new(OpenBoth { done: false }));

    let result = eng.run().unwrap();
    assert_eq!(result.final_positions.len(), 2);
    assert!(result.final_positions.iter().any(|p| p.symbol.as_str() == "BTCUSDT" && p.side == perp_backtest_core::PositionSide::Long));
    assert!(result.final_positions.iter().any(|p| p.symbol.as_str() == "ETHUSDT" && p.side == perp_backtest_core::PositionSide::Short));
}

#[test]
fn cancel_order_removes_resting_limit_before_it_can_fill() {
    struct PlaceThenCancel {
        order_id: Option<perp_backtest_core::OrderId>,
    }
    impl Strategy for PlaceThenCancel {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            if self.order_id.is_none() {
                let (order, _fills) = ctx.limit_buy("BTCUSDT", 1.0, 99.0);
                self.order_id = Some(order.id);
                ctx.cancel_order(order.id);
            }
        }
    }

    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth(
        "BTCUSDT",
        &[depth(0, 98.0, 101.0), depth(1, 99.5, 101.0)],
    );
    eng.set_strategy(Box::new(PlaceThenCancel { order_id: None }));

    let result = eng.run().unwrap();
    assert_eq!(result.orders_filled, 0);
    assert!(result.final_positions.iter().all(|p| p.is_flat()));
}

#[test]
fn noop_strategy_never_submits_orders() {
    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 101.0)]);
    eng.set_strategy(Box::new(NoopStrategy));
    let result = eng.run().unwrap();
    assert_eq!(result.orders_submitted, 0);
    assert_eq!(result.final_equity, 10_000.0);
}

#[test]
fn rejected_order_has_rejected_status_and_empty_fills() {
    struct EmptyBookSell;
    impl Strategy for EmptyBookSell {
        fn on_depth(&mut self, ctx: &mut EngineContext) {
            let (order, fills) = ctx.market_sell("ETHUSDT", 1.0);
            assert_eq!(order.status, OrderState::Rejected);
            assert!(fills.is_empty());
        }
    }

    let mut eng = BacktestEngine::new(Config::default());
    eng.load_depth("BTCUSDT", &[depth(0, 100.0, 101.0)]);
    eng.set_strategy(Box::new(EmptyBookSell));
    eng.run().unwrap();
}
