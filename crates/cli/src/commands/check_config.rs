//! `check-config`: load, validate and summarize a configuration file.

use std::fmt::Write;

use anyhow::Result;
use clap::Args;
use orb_core::{AppConfig, ConfigLoader, OpeningWindow};

use crate::logging;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = orb_core::config_loader::DEFAULT_CONFIG_PATH)]
    pub config: String,
}

pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    logging::init(&config.logging)?;
    tracing::info!(path = %args.config, "Configuration is valid");
    println!("{}", summary(&config)?);
    Ok(())
}

fn summary(config: &AppConfig) -> Result<String> {
    let tz = config.instrument.timezone()?;
    let window = OpeningWindow::for_session(chrono::Utc::now(), tz, &config.opening_range)?;
    let or = &config.opening_range;
    let tm = &config.trade_management;
    let ticks = &tm.tick_size;

    let mut out = String::new();
    writeln!(
        out,
        "Instrument:     {} on {} ({}, {})",
        config.instrument.ticker, config.instrument.exchange, config.instrument.currency, tz
    )?;
    writeln!(
        out,
        "Broker:         {}:{} client {}",
        config.connection.host, config.connection.port, config.connection.client_id
    )?;
    writeln!(
        out,
        "Opening range:  {} + {} min of \"{}\" bars ({} s)",
        or.market_open_time,
        or.duration_minutes,
        or.bar_size,
        window.duration_seconds()
    )?;
    writeln!(
        out,
        "Breakout:       {} s candles from {} s bars, silence after {} s",
        config.breakout.bar_size_seconds,
        config.breakout.realtime_bar_seconds,
        config.breakout.silence_timeout_seconds
    )?;
    writeln!(
        out,
        "GEX:            {} provider, {} DTE, {} strikes, multiplier {}",
        config.gex.provider,
        config.gex.days_to_expiration,
        config.gex.strikes_quantity,
        config.gex.option_multiplier
    )?;
    writeln!(
        out,
        "Bracket:        TP {}% / SL {}%, trail {}% every {}% of profit",
        tm.take_profit_pct,
        tm.stop_loss_pct,
        tm.trailing_stop.trail_pct,
        tm.trailing_stop.activation_profit_pct
    )?;
    writeln!(
        out,
        "Ticks:          {} below {}, {} at or above",
        ticks.below, ticks.threshold, ticks.at_or_above
    )?;
    write!(
        out,
        "Order:          {} contract(s), {:?} entry",
        config.trade_execution.total_quantity,
        config.trade_execution.order_defaults.entry_order_type
    )?;
    Ok(out)
}
