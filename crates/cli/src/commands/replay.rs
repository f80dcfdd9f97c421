//! `replay`: feed a CSV of 5-second bars through the engine on the paper
//! broker.
//!
//! Bars inside the session's opening window become the historical answer;
//! later bars are streamed as real-time bars. The clock is pinned to the
//! window end so the engine never waits.

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use orb_broker::paper::{PaperBroker, PaperScript};
use orb_broker::ClientSettings;
use orb_core::{AppConfig, Bar, Clock, ConfigLoader, FixedClock, GexProviderKind, OpeningWindow};
use orb_engine::{Engine, EngineState};
use orb_strategy::{GexError, GexResolver, GexResult};
use rust_decimal::Decimal;

use crate::logging;

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Config file path
    #[arg(short, long, default_value = orb_core::config_loader::DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// CSV with header `timestamp,open,high,low,close,volume` (RFC 3339 timestamps)
    #[arg(short, long)]
    pub bars: String,

    /// Premium the paper broker quotes for every option
    #[arg(long)]
    pub option_price: Decimal,

    /// Use this strike instead of asking the configured GEX provider
    #[arg(long)]
    pub gex_strike: Option<Decimal>,

    /// Spacing of the paper option chain's strikes
    #[arg(long, default_value = "5")]
    pub strike_step: Decimal,

    /// Real time between streamed bars
    #[arg(long, default_value_t = 250)]
    pub pace_ms: u64,
}

pub async fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    logging::init(&config.logging)?;

    let file = std::fs::File::open(&args.bars)
        .with_context(|| format!("Failed to open CSV file: {}", args.bars))?;
    let bars = parse_bars(file).with_context(|| format!("Failed to read bars from {}", args.bars))?;
    let session = Session::split(&config, bars)?;
    tracing::info!(
        historical = session.historical.len(),
        realtime = session.realtime.len(),
        date = %session.date,
        "Replay session prepared"
    );

    let spot = session.reference_price();
    let script = PaperScript {
        historical_bars: session.historical.clone(),
        realtime_bars: session.realtime.clone(),
        bar_interval: Duration::from_millis(args.pace_ms),
        underlying_price: spot,
        option_price: args.option_price,
        chain_expirations: vec![session.date],
        chain_strikes: strike_ladder(spot, args.strike_step, 20),
        ..PaperScript::default()
    };

    let config = Arc::new(config);
    let settings = ClientSettings::from_config(&config.connection, &config.engine);
    let (paper, client) = PaperBroker::client(script, settings);
    let broker = Arc::new(client);
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(session.window_end));

    let mut engine = match args.gex_strike {
        Some(strike) => {
            let resolver = FixedStrike {
                strike,
                expiration: session.date,
                kind: config.gex.provider,
            };
            Engine::new(Arc::clone(&config), broker, Box::new(resolver), clock)
        }
        None => Engine::from_config(Arc::clone(&config), broker, clock)?,
    };

    // Queued bars still drain at one per step after the feed runs dry.
    let grace = Duration::from_millis(config.engine.step_interval_ms * 5 + args.pace_ms);
    let mut states = engine.subscribe_state();
    let feed_done = {
        let paper = Arc::clone(&paper);
        async move {
            paper.wait_exhausted().await;
            tokio::time::sleep(grace).await;
            loop {
                if *states.borrow_and_update() == EngineState::MonitoringBreakout {
                    return;
                }
                if states.changed().await.is_err() {
                    return;
                }
            }
        }
    };

    tokio::select! {
        result = engine.run() => result?,
        () = feed_done => tracing::info!("Replay bars exhausted without a trade"),
        _ = tokio::signal::ctrl_c() => tracing::warn!("Interrupted"),
    }
    engine.shutdown();

    print_report(&engine, &paper);
    Ok(())
}

fn print_report(engine: &Engine, paper: &PaperBroker) {
    match engine.opening_range() {
        Some(range) => println!("Opening range:  {} - {}", range.low, range.high),
        None => println!("Opening range:  none"),
    }
    match (engine.signal(), engine.execution_price()) {
        (Some(signal), Some(price)) => {
            println!("Breakout:       {} at {} ({})", signal.signal_type, price, signal.timestamp);
        }
        _ => println!("Breakout:       none"),
    }
    if let Some(gex) = engine.gex_result() {
        println!("GEX strike:     {} exp {}", gex.strike, gex.expiration_code());
    }
    let orders = paper.placed_orders();
    if orders.is_empty() {
        println!("Orders:         none");
    }
    for (contract, order) in orders {
        println!(
            "Order {:>6}:   {} {} {} {:?} {:?}",
            order.order_id,
            order.action,
            order.quantity,
            contract.display_name(),
            order.kind,
            order.tif
        );
    }
}

/// Answers every lookup with the strike given on the command line.
struct FixedStrike {
    strike: Decimal,
    expiration: NaiveDate,
    kind: GexProviderKind,
}

#[async_trait]
impl GexResolver for FixedStrike {
    async fn get_max_gamma_strike(&self, ticker: &str) -> Result<GexResult, GexError> {
        tracing::info!(ticker, strike = %self.strike, "Using fixed GEX strike");
        Ok(GexResult {
            strike: self.strike,
            expiration: self.expiration,
            strikes: None,
        })
    }

    fn kind(&self) -> GexProviderKind {
        self.kind
    }
}

/// Replay input split around the opening window.
#[derive(Debug)]
struct Session {
    date: NaiveDate,
    window_end: DateTime<Utc>,
    historical: Vec<Bar>,
    realtime: Vec<Bar>,
}

impl Session {
    fn split(config: &AppConfig, mut bars: Vec<Bar>) -> Result<Self> {
        bars.sort_by_key(|b| b.timestamp);
        let Some(first) = bars.first() else {
            bail!("No bars to replay");
        };
        let tz = config.instrument.timezone()?;
        let window = OpeningWindow::for_session(first.timestamp, tz, &config.opening_range)?;
        let date = window.start.with_timezone(&tz).date_naive();

        let (historical, realtime): (Vec<Bar>, Vec<Bar>) = bars
            .into_iter()
            .filter(|b| b.timestamp >= window.start)
            .partition(|b| b.timestamp < window.end);
        if historical.is_empty() {
            bail!("No bars inside the opening window starting {}", window.start);
        }
        Ok(Self {
            date,
            window_end: window.end,
            historical,
            realtime,
        })
    }

    /// Last close of the opening window.
    fn reference_price(&self) -> Decimal {
        self.historical.last().map_or(Decimal::ZERO, |b| b.close)
    }
}

fn parse_bars<R: Read>(input: R) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut bars = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() < 6 {
            bail!("Row {}: expected 6 columns, found {}", line + 1, record.len());
        }
        let field = |i: usize| -> Result<Decimal> {
            Decimal::from_str(record[i].trim())
                .with_context(|| format!("Row {}: bad number {:?}", line + 1, &record[i]))
        };
        let timestamp: DateTime<Utc> = record[0]
            .trim()
            .parse()
            .with_context(|| format!("Row {}: bad timestamp {:?}", line + 1, &record[0]))?;
        bars.push(Bar::new(timestamp, field(1)?, field(2)?, field(3)?, field(4)?, field(5)?));
    }
    Ok(bars)
}

/// `2 * half_width + 1` strikes spaced `step` apart around `spot`.
fn strike_ladder(spot: Decimal, step: Decimal, half_width: i64) -> Vec<Decimal> {
    if step <= Decimal::ZERO || spot <= Decimal::ZERO {
        return Vec::new();
    }
    let center = (spot / step).round() * step;
    (-half_width..=half_width)
        .map(|i| center + step * Decimal::from(i))
        .filter(|s| *s > Decimal::ZERO)
        .collect()
}
