use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use orb_broker::paper::{PaperBroker, PaperScript};
use orb_broker::{ClientSettings, OptionRight, OrderKind};
use orb_core::{AppConfig, Bar, ConfigLoader, FixedClock, GexProviderKind, SignalType};
use orb_engine::{Engine, EngineState};
use orb_strategy::{GexError, GexResolver, GexResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const CONFIG: &str = r#"
[connection]
host = "127.0.0.1"
port = 4002
client_id = 7
reconnect_backoff_secs = 3

[instrument]
ticker = "SPX"
exchange = "CBOE"
currency = "USD"
exchange_timezone = "America/New_York"

[opening_range]
market_open_time = "09:30:00"
duration_minutes = 15
bar_size = "1 min"
wait_buffer_seconds = 5
historical_data_timeout_seconds = 10

[breakout]
bar_size_seconds = 60
silence_timeout_seconds = 30

[gex]
provider = "ib"
days_to_expiration = 0
strikes_quantity = 40
option_multiplier = 100

[trade_management]
take_profit_pct = 50
stop_loss_pct = 20

[trade_management.trailing_stop]
activation_profit_pct = 10
trail_pct = 10

[trade_execution]
total_quantity = 1
"#;

struct FixedResolver {
    strike: Decimal,
    fail: bool,
}

#[async_trait]
impl GexResolver for FixedResolver {
    async fn get_max_gamma_strike(&self, _ticker: &str) -> Result<GexResult, GexError> {
        if self.fail {
            return Err(GexError::no_data("provider offline"));
        }
        Ok(GexResult {
            strike: self.strike,
            expiration: expiration(),
            strikes: Some(vec![dec!(3990), dec!(4000), dec!(4010)]),
        })
    }

    fn kind(&self) -> GexProviderKind {
        GexProviderKind::Gexbot
    }
}

fn resolver(strike: Decimal) -> FixedResolver {
    FixedResolver { strike, fail: false }
}

fn expiration() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

/// 10:00 New York, after the 09:30-09:45 window.
fn after_window() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
}

fn config() -> AppConfig {
    ConfigLoader::from_toml_str(CONFIG).unwrap()
}

fn opening_bars() -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
    vec![
        Bar::new(start, dec!(3995), dec!(4000), dec!(3992), dec!(3998), dec!(10)),
        Bar::new(
            start + chrono::Duration::minutes(1),
            dec!(3998),
            dec!(3999),
            dec!(3990),
            dec!(3994),
            dec!(12),
        ),
    ]
}

/// Eleven rising 5 s bars inside 15:00, then one bar that closes the candle.
fn breakout_bars() -> Vec<Bar> {
    let minute = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
    let mut bars = Vec::new();
    let mut open = dec!(4001.0);
    for i in 0..11i64 {
        let close = dec!(4001.0) + dec!(0.25) * Decimal::from(i);
        bars.push(Bar::new(
            minute + chrono::Duration::seconds(7 + 5 * i),
            open,
            close + dec!(0.25),
            dec!(4000.5),
            close,
            dec!(1),
        ));
        open = close;
    }
    bars.push(Bar::new(
        minute + chrono::Duration::seconds(62),
        dec!(4003.5),
        dec!(4004),
        dec!(4003),
        dec!(4003.75),
        dec!(1),
    ));
    bars
}

fn script() -> PaperScript {
    PaperScript {
        next_valid_id: 100,
        historical_bars: opening_bars(),
        realtime_bars: breakout_bars(),
        underlying_price: dec!(4003.5),
        option_price: dec!(2.00),
        chain_expirations: vec![expiration()],
        chain_strikes: vec![dec!(3990), dec!(4000), dec!(4010)],
        ..PaperScript::default()
    }
}

fn build(
    config: AppConfig,
    script: PaperScript,
    resolver: FixedResolver,
    now: DateTime<Utc>,
) -> (Arc<PaperBroker>, Engine) {
    let settings = ClientSettings::from_config(&config.connection, &config.engine);
    let (paper, client) = PaperBroker::client(script, settings);
    let clock = Arc::new(FixedClock::new(now));
    let engine = Engine::new(Arc::new(config), Arc::new(client), Box::new(resolver), clock);
    (paper, engine)
}

#[tokio::test(start_paused = true)]
async fn test_bullish_session_submits_bracket() {
    let (paper, mut engine) = build(config(), script(), resolver(dec!(4010)), after_window());
    let states = engine.subscribe_state();

    engine.run().await.unwrap();

    assert_eq!(engine.state(), EngineState::Shutdown);
    assert_eq!(*states.borrow(), EngineState::Shutdown);
    let range = engine.opening_range().unwrap();
    assert_eq!((range.high, range.low), (dec!(4000), dec!(3990)));

    let signal = engine.signal().unwrap();
    assert_eq!(signal.signal_type, SignalType::Buy);
    assert_eq!(signal.price, Some(dec!(4003.5)));
    assert_eq!(engine.execution_price(), Some(dec!(4003.5)));
    assert_eq!(engine.gex_result().unwrap().strike, dec!(4010));

    // Strike above spot on a bullish break buys the ATM call.
    let placed = paper.placed_orders();
    assert_eq!(placed.len(), 3);
    let (contract, parent) = &placed[0];
    assert_eq!(contract.strike, Some(dec!(4000)));
    assert_eq!(contract.right, Some(OptionRight::Call));
    assert_eq!(Some(parent.order_id), engine.parent_order_id());
    assert_eq!(parent.kind, OrderKind::Limit { price: dec!(2.00) });
    assert_eq!(placed[1].1.kind, OrderKind::Limit { price: dec!(3.00) });
    assert_eq!(placed[2].1.kind, OrderKind::Stop { aux_price: dec!(1.60) });

    assert_eq!(paper.disconnect_calls(), 1);
    assert_eq!(paper.active_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_strike_ends_session_without_orders() {
    let (paper, mut engine) = build(config(), script(), resolver(Decimal::ZERO), after_window());

    engine.run().await.unwrap();

    assert_eq!(engine.state(), EngineState::Shutdown);
    assert!(engine.signal().is_some());
    assert!(engine.gex_result().is_none());
    assert!(paper.placed_orders().is_empty());
    assert_eq!(paper.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resolver_error_ends_session() {
    let failing = FixedResolver {
        strike: dec!(4010),
        fail: true,
    };
    let (paper, mut engine) = build(config(), script(), failing, after_window());

    engine.run().await.unwrap();

    assert_eq!(engine.state(), EngineState::Shutdown);
    assert!(paper.placed_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_in_place() {
    let script = PaperScript {
        connect_failures: 2,
        ..script()
    };
    let (paper, mut engine) = build(config(), script, resolver(dec!(4010)), after_window());
    let started = tokio::time::Instant::now();

    assert_eq!(engine.step().await.unwrap(), EngineState::Connecting);
    assert_eq!(engine.step().await.unwrap(), EngineState::Connecting);
    assert_eq!(engine.step().await.unwrap(), EngineState::GettingOpeningRange);

    assert_eq!(paper.connect_attempts(), 3);
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_opening_window_to_close() {
    // 09:40 New York: five minutes of window left.
    let early = Utc.with_ymd_and_hms(2026, 3, 2, 14, 40, 0).unwrap();
    let (_paper, mut engine) = build(config(), script(), resolver(dec!(4010)), early);
    engine.step().await.unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert!(started.elapsed() >= Duration::from_secs(5 * 60 + 5));
}

#[tokio::test(start_paused = true)]
async fn test_empty_opening_range_shuts_down() {
    let script = PaperScript {
        historical_bars: Vec::new(),
        ..script()
    };
    let (paper, mut engine) = build(config(), script, resolver(dec!(4010)), after_window());

    engine.step().await.unwrap();
    assert_eq!(engine.step().await.unwrap(), EngineState::Shutdown);
    assert!(engine.opening_range().is_none());
    assert_eq!(paper.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bad_timezone_at_point_of_use_shuts_down() {
    let mut config = config();
    config.instrument.exchange_timezone = "Mars/Olympus_Mons".to_string();
    let (_paper, mut engine) = build(config, script(), resolver(dec!(4010)), after_window());

    engine.step().await.unwrap();
    assert_eq!(engine.step().await.unwrap(), EngineState::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_silence_while_connected_resubscribes() {
    let script = PaperScript {
        realtime_bars: Vec::new(),
        ..script()
    };
    let (paper, mut engine) = build(config(), script, resolver(dec!(4010)), after_window());
    engine.step().await.unwrap();
    engine.step().await.unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(paper.connect_attempts(), 1);
    assert_eq!(paper.active_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stray_bar_during_silence_still_resubscribes() {
    let script = PaperScript {
        realtime_bars: Vec::new(),
        ..script()
    };
    let (paper, mut engine) = build(config(), script, resolver(dec!(4010)), after_window());
    engine.step().await.unwrap();
    engine.step().await.unwrap();

    // A late bar from some earlier subscription, then nothing.
    paper.emit_realtime_bar(9999, breakout_bars().remove(0));

    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert_eq!(paper.connect_attempts(), 1);
    assert_eq!(paper.active_streams(), 0);
    assert_eq!(paper.disconnect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_reconnects_and_resumes_monitoring() {
    let script = PaperScript {
        disconnect_after_bars: Some(1),
        ..script()
    };
    let (paper, mut engine) = build(config(), script, resolver(dec!(4010)), after_window());
    engine.step().await.unwrap();
    engine.step().await.unwrap();
    let range = *engine.opening_range().unwrap();

    assert_eq!(engine.step().await.unwrap(), EngineState::Connecting);
    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert_eq!(paper.connect_attempts(), 2);
    assert_eq!(engine.opening_range(), Some(&range));

    // Monitoring picks the feed back up on a fresh subscription.
    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert_eq!(paper.active_streams(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_idempotent() {
    let (paper, mut engine) = build(config(), script(), resolver(dec!(4010)), after_window());
    engine.step().await.unwrap();
    engine.step().await.unwrap();
    assert_eq!(engine.step().await.unwrap(), EngineState::MonitoringBreakout);
    assert_eq!(paper.active_streams(), 1);

    engine.shutdown();
    engine.shutdown();

    assert_eq!(engine.state(), EngineState::Shutdown);
    assert_eq!(paper.active_streams(), 0);
    assert_eq!(paper.disconnect_calls(), 1);
    assert_eq!(engine.step().await.unwrap(), EngineState::Shutdown);
    assert_eq!(paper.disconnect_calls(), 1);
}
