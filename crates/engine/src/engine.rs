//! The session driver.
//!
//! One foreground loop runs one stage per step and sleeps
//! `engine.step_interval_ms` between steps. Stage failures never escape a
//! step: they become an `Abort` outcome and end the session through
//! [`Engine::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use orb_broker::{BrokerClient, Contract, RequestId};
use orb_core::session::format_exchange_time;
use orb_core::{AppConfig, Clock, OpeningRange, OpeningWindow, Signal};
use orb_options_manager::OrderManager;
use orb_strategy::{
    create_resolver, BreakoutDetector, GexResolver, GexResult, OpeningRangeCalculator,
};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::state::{EngineState, StageOutcome};

pub struct Engine {
    config: Arc<AppConfig>,
    broker: Arc<BrokerClient>,
    resolver: Box<dyn GexResolver>,
    orders: OrderManager,
    clock: Arc<dyn Clock>,
    underlying: Contract,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    connected: bool,
    opening_range: Option<OpeningRange>,
    detector: Option<BreakoutDetector>,
    subscription: Option<RequestId>,
    signal: Option<Signal>,
    execution_price: Option<Decimal>,
    gex: Option<GexResult>,
    parent_order_id: Option<RequestId>,
}

impl Engine {
    pub fn new(
        config: Arc<AppConfig>,
        broker: Arc<BrokerClient>,
        resolver: Box<dyn GexResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let instrument = &config.instrument;
        let underlying =
            Contract::underlying(&instrument.ticker, &instrument.exchange, &instrument.currency);
        let orders = OrderManager::new(Arc::clone(&broker), Arc::clone(&config));
        Self {
            config,
            broker,
            resolver,
            orders,
            clock,
            underlying,
            state: EngineState::Connecting,
            state_tx: watch::Sender::new(EngineState::Connecting),
            connected: false,
            opening_range: None,
            detector: None,
            subscription: None,
            signal: None,
            execution_price: None,
            gex: None,
            parent_order_id: None,
        }
    }

    /// Builds an engine with the GEX provider selected in `config`.
    ///
    /// # Errors
    ///
    /// Fails when the provider cannot be constructed.
    pub fn from_config(
        config: Arc<AppConfig>,
        broker: Arc<BrokerClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let resolver = create_resolver(&config, Arc::clone(&broker), Arc::clone(&clock))?;
        Ok(Self::new(config, broker, resolver, clock))
    }

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Receiver that sees every state change, for drivers that cannot
    /// borrow the engine while it runs.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub const fn opening_range(&self) -> Option<&OpeningRange> {
        self.opening_range.as_ref()
    }

    #[must_use]
    pub const fn signal(&self) -> Option<&Signal> {
        self.signal.as_ref()
    }

    #[must_use]
    pub const fn execution_price(&self) -> Option<Decimal> {
        self.execution_price
    }

    #[must_use]
    pub const fn gex_result(&self) -> Option<&GexResult> {
        self.gex.as_ref()
    }

    /// Parent id of the bracket submitted this session.
    #[must_use]
    pub const fn parent_order_id(&self) -> Option<RequestId> {
        self.parent_order_id
    }

    #[must_use]
    pub const fn order_manager(&self) -> &OrderManager {
        &self.orders
    }

    /// Steps until `Shutdown`.
    ///
    /// # Errors
    ///
    /// Only an impossible transition escapes; the engine is shut down
    /// before it is returned.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let interval = Duration::from_millis(self.config.engine.step_interval_ms);
        info!(
            ticker = %self.config.instrument.ticker,
            provider = %self.resolver.kind(),
            "Engine started"
        );

        while !self.state.is_terminal() {
            if let Err(e) = self.step().await {
                error!(state = %self.state, error = %e, "Engine loop failed, shutting down");
                self.shutdown();
                return Err(e);
            }
            if !self.state.is_terminal() {
                tokio::time::sleep(interval).await;
            }
        }

        self.shutdown();
        info!("Engine stopped");
        Ok(())
    }

    /// Runs the current stage once and applies its outcome.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] if a stage produced an outcome its
    /// state cannot take.
    pub async fn step(&mut self) -> Result<EngineState, EngineError> {
        let from = self.state;
        let result = match from {
            EngineState::Connecting => Ok(self.connect().await),
            EngineState::GettingOpeningRange => self.get_opening_range().await,
            EngineState::MonitoringBreakout => self.monitor_breakout().await,
            EngineState::AnalyzingGex => self.analyze_gex().await,
            EngineState::PendingTradeExecution => self.execute_trade().await,
            EngineState::Shutdown => return Ok(from),
        };
        let outcome = result.unwrap_or_else(|e| StageOutcome::abort(e.to_string()));

        let to = from.next(&outcome)?;
        if to != from {
            match &outcome {
                StageOutcome::Abort(reason) => {
                    warn!(from = %from, to = %to, reason = %reason, "State transition");
                }
                other => info!(from = %from, to = %to, reason = other.label(), "State transition"),
            }
        }
        self.set_state(to);
        if to.is_terminal() {
            self.shutdown();
        }
        Ok(to)
    }

    /// Cancels the live bar subscription and disconnects. Safe to call any
    /// number of times.
    pub fn shutdown(&mut self) {
        self.release_subscription();
        if self.connected {
            self.broker.disconnect();
            self.connected = false;
        }
        if self.state != EngineState::Shutdown {
            info!(
                from = %self.state,
                to = %EngineState::Shutdown,
                reason = "shutdown requested",
                "State transition"
            );
            self.set_state(EngineState::Shutdown);
        }
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Periodic position management between steps: drains order statuses and
    /// trails stops.
    ///
    /// # Errors
    ///
    /// Propagates order-manager failures.
    pub async fn manage_positions(&mut self) -> Result<(), EngineError> {
        self.orders.manage_positions().await?;
        Ok(())
    }

    async fn connect(&mut self) -> StageOutcome {
        match self.broker.connect().await {
            Ok(()) => {
                self.connected = true;
                if self.opening_range.is_some() {
                    StageOutcome::Resume
                } else {
                    StageOutcome::Advance
                }
            }
            Err(e) => {
                let backoff = Duration::from_secs(self.config.connection.reconnect_backoff_secs);
                warn!(error = %e, backoff_secs = backoff.as_secs(), "Connection failed, retrying");
                tokio::time::sleep(backoff).await;
                StageOutcome::Stay
            }
        }
    }

    async fn get_opening_range(&mut self) -> Result<StageOutcome, EngineError> {
        let tz = self.config.instrument.timezone()?;
        let cfg = &self.config.opening_range;
        let window = OpeningWindow::for_session(self.clock.now(), tz, cfg)?;

        if let Some(remaining) = window.remaining(self.clock.now()) {
            let wait = remaining + Duration::from_secs(cfg.wait_buffer_seconds);
            info!(
                window_end = %format_exchange_time(window.end, tz),
                wait_secs = wait.as_secs(),
                "Waiting for the opening window to close"
            );
            tokio::time::sleep(wait).await;
        }

        let end_time = format_exchange_time(window.end, tz);
        let duration = format!("{} S", window.duration_seconds());
        let bars = self
            .broker
            .historical_bars(
                &self.underlying,
                &end_time,
                &duration,
                &cfg.bar_size,
                Duration::from_secs(cfg.historical_data_timeout_seconds),
            )
            .await?;

        let mut calculator = OpeningRangeCalculator::new();
        calculator.add_bars(&bars);
        let Some(range) = calculator.calculate() else {
            return Ok(StageOutcome::abort(format!(
                "no bars for the opening window ending {end_time}"
            )));
        };

        info!(high = %range.high, low = %range.low, bars = bars.len(), "Opening range established");
        self.opening_range = Some(range);
        Ok(StageOutcome::Advance)
    }

    async fn monitor_breakout(&mut self) -> Result<StageOutcome, EngineError> {
        let range = self.opening_range.ok_or(EngineError::MissingContext {
            state: self.state,
            what: "opening range",
        })?;
        if self.detector.is_none() {
            self.detector = Some(BreakoutDetector::new(
                &self.config.instrument.ticker,
                self.config.breakout.bar_size_seconds,
            )?);
        }

        let req_id = match self.subscription {
            Some(req_id) => req_id,
            None => match self
                .broker
                .subscribe_real_time_bars(&self.underlying, self.config.breakout.realtime_bar_seconds)
            {
                Ok(req_id) => {
                    self.subscription = Some(req_id);
                    req_id
                }
                Err(e) if e.is_connectivity() => {
                    warn!(error = %e, "Cannot subscribe to real-time bars");
                    return Ok(StageOutcome::Reconnect);
                }
                Err(e) => return Err(e.into()),
            },
        };

        let silence = Duration::from_secs(self.config.breakout.silence_timeout_seconds);
        let bar = match self.broker.next_real_time_bar(req_id, silence).await {
            Ok(bar) => bar,
            Err(e) if e.is_silence() => {
                self.release_subscription();
                if self.broker.is_connected() {
                    warn!(
                        req_id,
                        silence_secs = silence.as_secs(),
                        error = %e,
                        "Real-time bars went silent, resubscribing"
                    );
                    return Ok(StageOutcome::Stay);
                }
                warn!(req_id, "Real-time bars went silent and the transport is down");
                return Ok(StageOutcome::Reconnect);
            }
            Err(e) if e.is_connectivity() => {
                warn!(req_id, error = %e, "Lost connection while monitoring");
                self.release_subscription();
                return Ok(StageOutcome::Reconnect);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(detector) = self.detector.as_mut() else {
            return Err(EngineError::MissingContext {
                state: self.state,
                what: "breakout detector",
            });
        };
        let signal = detector.on_bar(&bar, &range);
        if !signal.is_actionable() {
            debug!(bar = %bar.timestamp, close = %bar.close, "No breakout");
            return Ok(StageOutcome::Stay);
        }

        let price = signal.price.unwrap_or(bar.close);
        info!(signal = %signal.signal_type, %price, "Breakout detected");
        self.release_subscription();
        self.execution_price = Some(price);
        self.signal = Some(signal);
        Ok(StageOutcome::Advance)
    }

    async fn analyze_gex(&mut self) -> Result<StageOutcome, EngineError> {
        let result = self
            .resolver
            .get_max_gamma_strike(&self.config.instrument.ticker)
            .await?;
        if result.strike <= Decimal::ZERO {
            return Ok(StageOutcome::abort(format!(
                "{} resolver returned strike {}",
                self.resolver.kind(),
                result.strike
            )));
        }

        info!(
            provider = %self.resolver.kind(),
            strike = %result.strike,
            expiration = %result.expiration_code(),
            strikes = result.strikes.as_ref().map(Vec::len),
            "GEX strike resolved"
        );
        self.gex = Some(result);
        Ok(StageOutcome::Advance)
    }

    async fn execute_trade(&mut self) -> Result<StageOutcome, EngineError> {
        let missing = |what| EngineError::MissingContext {
            state: EngineState::PendingTradeExecution,
            what,
        };
        let signal = self.signal.as_ref().ok_or_else(|| missing("breakout signal"))?;
        let spot = self.execution_price.ok_or_else(|| missing("execution price"))?;
        let gex = self.gex.as_ref().ok_or_else(|| missing("GEX result"))?;

        match self.orders.place_trade(signal, spot, gex).await {
            Ok(parent_order_id) => {
                info!(parent_order_id, "Bracket submitted");
                self.parent_order_id = Some(parent_order_id);
            }
            Err(e) => error!(error = %e, "Trade placement failed"),
        }
        Ok(StageOutcome::Advance)
    }

    fn release_subscription(&mut self) {
        if let Some(req_id) = self.subscription.take() {
            self.broker.cancel_real_time_bars(req_id);
        }
    }
}
