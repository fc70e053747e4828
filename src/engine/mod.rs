//! Overlay Engine - the single cooperative driver loop
//!
//! Owns the candle buffer, aggregator, watchdog, ledger and render bridge,
//! and multiplexes commands, background results, push deltas and the driving
//! clock in one `select!`. All network work happens in session-owned tasks
//! that report back through an internal channel tagged with their
//! subscription generation.

mod clock;
mod session;

pub use clock::{ClockEvents, DrivingClock};
pub use session::Session;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::candles::{CandleStream, KlineEvent, SubscriptionGeneration};
use crate::config::AppConfig;
use crate::exchange::CandleProvider;
use crate::overlay::{
    apply_probability_updates, AggregatedIntervalResult, AnnotationLedger, AnnotationLine,
    Countdown, ExpiryWatchdog, MultiIntervalAggregator, ProbabilityUpdate, POLYMARKET_NAMESPACE,
};
use crate::period::PeriodAligner;
use crate::persistence::{CycleRecorder, SettingsStore};
use crate::polymarket::{profile, OrderGateway, OrderOutcome, OrderRequest, PredictionMarket};
use crate::render::{CrosshairEvent, RenderBridge, RenderSurface};
use crate::types::{find_symbol, Candle, Interval, SymbolConfig, SymbolKey, Ticker24h};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Wall-clock source; injectable so tests can run on virtual time
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug)]
pub enum EngineCommand {
    SwitchSymbol(String),
    /// Also persisted as the interval preference
    SwitchInterval(Interval),
    SetUserLines(Vec<AnnotationLine>),
    SetIntervalVisible { interval: Interval, visible: bool },
    SetAllIntervalsVisible(bool),
    /// Probability polling only runs while the detail panel is open
    SetDetailOpen(bool),
    PlaceOrder {
        request: OrderRequest,
        reply: oneshot::Sender<OrderOutcome>,
    },
    /// `Some` stores the signing key, `None` forgets it
    StoreKey(Option<String>),
    Resize { width: u32, height: u32 },
    Shutdown,
}

/// Results reported back by background tasks
#[derive(Debug)]
enum EngineEvent {
    CandlesLoaded {
        generation: SubscriptionGeneration,
        candles: Vec<Candle>,
    },
    Ticker {
        generation: SubscriptionGeneration,
        ticker: Ticker24h,
    },
    Aggregated {
        generation: SubscriptionGeneration,
        cycle: u64,
        results: Vec<AggregatedIntervalResult>,
    },
    Probabilities {
        generation: SubscriptionGeneration,
        updates: Vec<ProbabilityUpdate>,
    },
    ExpiryRefreshDue {
        generation: SubscriptionGeneration,
    },
    Crosshair(CrosshairEvent),
}

impl EngineEvent {
    fn generation(&self) -> Option<SubscriptionGeneration> {
        match self {
            EngineEvent::CandlesLoaded { generation, .. }
            | EngineEvent::Ticker { generation, .. }
            | EngineEvent::Aggregated { generation, .. }
            | EngineEvent::Probabilities { generation, .. }
            | EngineEvent::ExpiryRefreshDue { generation } => Some(*generation),
            EngineEvent::Crosshair(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalView {
    #[serde(flatten)]
    pub result: AggregatedIntervalResult,
    pub countdown: Option<Countdown>,
}

/// Everything a client needs to draw the panel around the chart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub symbol: String,
    pub interval: Interval,
    pub generation: u64,
    pub ticker: Option<Ticker24h>,
    pub last_candle: Option<Candle>,
    pub candle_count: usize,
    pub intervals: Vec<IntervalView>,
    pub lines: Vec<AnnotationLine>,
    pub visible_intervals: Vec<Interval>,
    pub detail_open: bool,
    pub refresh_pending: bool,
    pub crosshair: Option<CrosshairEvent>,
}

/// Collaborators the engine drives
pub struct EngineDeps<S: RenderSurface> {
    pub candles: Arc<dyn CandleProvider>,
    pub market: Arc<dyn PredictionMarket>,
    pub orders: Arc<dyn OrderGateway>,
    pub surface: S,
    pub settings: Option<SettingsStore>,
    pub recorder: Option<CycleRecorder>,
}

/// Cloneable front door to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<OverlaySnapshot>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Overlay engine has stopped"))
    }

    pub async fn switch_symbol(&self, symbol: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SwitchSymbol(symbol.into())).await
    }

    pub async fn switch_interval(&self, interval: Interval) -> Result<()> {
        self.send(EngineCommand::SwitchInterval(interval)).await
    }

    pub async fn set_user_lines(&self, lines: Vec<AnnotationLine>) -> Result<()> {
        self.send(EngineCommand::SetUserLines(lines)).await
    }

    pub async fn set_interval_visible(&self, interval: Interval, visible: bool) -> Result<()> {
        self.send(EngineCommand::SetIntervalVisible { interval, visible })
            .await
    }

    pub async fn set_all_intervals_visible(&self, visible: bool) -> Result<()> {
        self.send(EngineCommand::SetAllIntervalsVisible(visible)).await
    }

    pub async fn set_detail_open(&self, open: bool) -> Result<()> {
        self.send(EngineCommand::SetDetailOpen(open)).await
    }

    /// Submit an order and wait for its one-shot outcome
    pub async fn place_order(&self, request: OrderRequest) -> Result<OrderOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.send(EngineCommand::PlaceOrder { request, reply }).await?;
        outcome.await.context("Order outcome was dropped")
    }

    pub async fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.send(EngineCommand::Resize { width, height }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown).await
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlaySnapshot> {
        self.snapshot.clone()
    }
}

pub struct OverlayEngine<S: RenderSurface> {
    candles: Arc<dyn CandleProvider>,
    aggregator: MultiIntervalAggregator,
    orders: Arc<dyn OrderGateway>,
    settings: Option<SettingsStore>,
    recorder: Option<CycleRecorder>,

    stream: CandleStream,
    watchdog: ExpiryWatchdog,
    ledger: AnnotationLedger,
    bridge: RenderBridge<S>,
    clock: DrivingClock,
    session: Session,

    tracked: Vec<Interval>,
    visible: BTreeSet<Interval>,
    results: Vec<AggregatedIntervalResult>,
    countdowns: Vec<Countdown>,
    ticker: Option<Ticker24h>,
    crosshair: Option<CrosshairEvent>,
    detail_open: bool,
    aggregation_cycle: u64,
    applied_cycle: u64,

    candle_limit: usize,
    expiry_delay: Duration,
    now: NowFn,

    commands: mpsc::Receiver<EngineCommand>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    snapshot_tx: watch::Sender<OverlaySnapshot>,
}

impl<S: RenderSurface> OverlayEngine<S> {
    pub fn new(config: &AppConfig, deps: EngineDeps<S>) -> Result<(Self, EngineHandle)> {
        let symbol = find_symbol(&config.chart.default_symbol)
            .with_context(|| format!("Unknown symbol {}", config.chart.default_symbol))?;
        let interval = deps
            .settings
            .as_ref()
            .and_then(SettingsStore::interval)
            .unwrap_or(config.chart.default_interval);
        let bridge = RenderBridge::attach(deps.surface).context("Failed to attach render surface")?;

        let mut tracked: Vec<Interval> = Vec::new();
        for &iv in &config.polymarket.tracked_intervals {
            if profile(iv).is_none() {
                warn!(interval = %iv, "No prediction market for tracked interval, skipping");
            } else if !tracked.contains(&iv) {
                tracked.push(iv);
            }
        }
        tracked.sort();

        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(OverlaySnapshot::default());

        let key = SymbolKey {
            symbol: symbol.symbol,
            interval,
        };
        let engine = Self {
            candles: deps.candles,
            aggregator: MultiIntervalAggregator::new(
                deps.market,
                PeriodAligner::prediction_market(),
                config.polymarket.default_probability,
            ),
            orders: deps.orders,
            settings: deps.settings,
            recorder: deps.recorder,
            stream: CandleStream::new(),
            watchdog: ExpiryWatchdog::new(),
            ledger: AnnotationLedger::new(),
            bridge,
            clock: DrivingClock::new(&config.schedule),
            session: Session::new(symbol, key, SubscriptionGeneration::default()),
            visible: tracked.iter().copied().collect(),
            tracked,
            results: Vec::new(),
            countdowns: Vec::new(),
            ticker: None,
            crosshair: None,
            detail_open: false,
            aggregation_cycle: 0,
            applied_cycle: 0,
            candle_limit: config.chart.candle_limit,
            expiry_delay: Duration::from_millis(config.polymarket.expiry_refresh_delay_ms),
            now: Arc::new(Utc::now),
            commands,
            events_tx,
            events_rx,
            snapshot_tx,
        };
        let handle = EngineHandle {
            commands: commands_tx,
            snapshot,
        };
        Ok((engine, handle))
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, now: NowFn) -> Self {
        self.now = now;
        self
    }

    /// Route surface crosshair events into the loop; drops when the loop is backed up
    fn forward_crosshair(&mut self) -> Result<()> {
        let events = self.events_tx.clone();
        self.bridge.on_crosshair(Box::new(move |event| {
            if let Err(e) = events.try_send(EngineEvent::Crosshair(event)) {
                debug!(error = %e, "Crosshair event dropped");
            }
        }))?;
        Ok(())
    }

    pub async fn run(mut self) -> Result<()> {
        self.forward_crosshair()?;

        let key = self.session.key();
        self.start_session(self.session.symbol(), key.interval)?;
        info!(source = %key, tracked = ?self.tracked, "🚀 Overlay engine started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command)?,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event)?,
                kline = self.session.next_kline() => {
                    if let Some(event) = kline {
                        self.handle_kline(event)?;
                    }
                }
                events = self.clock.tick() => self.handle_clock(events)?,
            }
        }

        self.session.teardown();
        self.bridge.dispose();
        info!("🛑 Overlay engine stopped");
        Ok(())
    }

    /// Tear the current session down and start a fresh generation
    fn start_session(&mut self, symbol: &'static SymbolConfig, interval: Interval) -> Result<()> {
        let generation = self.session.generation().next();
        let key = SymbolKey {
            symbol: symbol.symbol,
            interval,
        };

        self.session.teardown();
        self.session = Session::new(symbol, key, generation);
        self.stream.reset(key, generation);
        self.clock.reset();
        self.watchdog.clear();
        self.results.clear();
        self.countdowns.clear();
        self.ticker = None;
        self.ledger.remove_system_namespace(POLYMARKET_NAMESPACE);

        self.bridge.set_identity(key)?;
        self.bridge.replace_all_lines(&self.ledger)?;

        let subscription = self.candles.subscribe(symbol.symbol, interval, generation);
        self.session.attach_subscription(subscription);
        self.spawn_candle_load();
        self.spawn_ticker();
        self.spawn_aggregation();

        info!(source = %key, generation = %generation, "🔄 Session started");
        self.publish();
        Ok(())
    }

    fn handle_command(&mut self, command: EngineCommand) -> Result<()> {
        match command {
            EngineCommand::SwitchSymbol(name) => {
                let Some(symbol) = find_symbol(&name) else {
                    warn!(symbol = %name, "Unknown symbol, ignoring switch");
                    return Ok(());
                };
                let current = self.session.key();
                if symbol.symbol != current.symbol {
                    // User levels are prices on the old symbol's scale
                    let dropped = self.ledger.user_lines().len();
                    self.ledger.set_user_lines(Vec::new());
                    if dropped > 0 {
                        debug!(dropped, "User lines cleared on symbol switch");
                    }
                    self.start_session(symbol, current.interval)?;
                }
            }
            EngineCommand::SwitchInterval(interval) => {
                if interval == self.session.key().interval {
                    return Ok(());
                }
                if let Some(settings) = self.settings.as_mut() {
                    if let Err(e) = settings.set_interval(interval) {
                        warn!(error = %e, "Failed to persist interval preference");
                    }
                }
                self.start_session(self.session.symbol(), interval)?;
            }
            EngineCommand::SetUserLines(lines) => {
                let report = self.ledger.set_user_lines(lines);
                if report.change.any() {
                    self.bridge.sync_lines(&self.ledger, report.change)?;
                }
                self.publish();
            }
            EngineCommand::SetIntervalVisible { interval, visible } => {
                self.set_visible(&[interval], visible)?
            }
            EngineCommand::SetAllIntervalsVisible(visible) => {
                let all = self.tracked.clone();
                self.set_visible(&all, visible)?;
            }
            EngineCommand::SetDetailOpen(open) => {
                self.detail_open = open;
                if open {
                    self.spawn_probabilities();
                }
                self.publish();
            }
            EngineCommand::PlaceOrder { request, reply } => self.place_order(request, reply),
            EngineCommand::StoreKey(key) => {
                if let Some(settings) = self.settings.as_mut() {
                    let stored = match key {
                        Some(key) => settings.save_key(&key),
                        None => settings.clear_key(),
                    };
                    if let Err(e) = stored {
                        warn!(error = %e, "Failed to update stored signing key");
                    }
                }
            }
            EngineCommand::Resize { width, height } => self.bridge.resize(width, height)?,
            EngineCommand::Shutdown => {}
        }
        Ok(())
    }

    fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        if let Some(generation) = event.generation() {
            if !self.session.is_current(generation) {
                debug!(
                    stale = %generation,
                    current = %self.session.generation(),
                    "Dropping result from torn-down session"
                );
                return Ok(());
            }
        }

        match event {
            EngineEvent::CandlesLoaded {
                generation,
                candles,
            } => {
                let update = self.stream.load(generation, candles);
                self.bridge.apply_candles(&self.stream, &update)?;
            }
            EngineEvent::Ticker { ticker, .. } => self.ticker = Some(ticker),
            EngineEvent::Aggregated { cycle, results, .. } => {
                if cycle < self.applied_cycle {
                    debug!(cycle, applied = self.applied_cycle, "Dropping superseded aggregation");
                    return Ok(());
                }
                self.applied_cycle = cycle;
                self.apply_results(results)?;
            }
            EngineEvent::Probabilities { updates, .. } => {
                if apply_probability_updates(&mut self.results, &updates) > 0 {
                    self.sync_system_lines()?;
                }
            }
            EngineEvent::ExpiryRefreshDue { .. } => {
                self.session.release_refresh();
                self.spawn_aggregation();
            }
            EngineEvent::Crosshair(event) => self.crosshair = Some(event),
        }
        self.publish();
        Ok(())
    }

    fn handle_kline(&mut self, event: KlineEvent) -> Result<()> {
        let update = self.stream.apply(event);
        if update.is_change() {
            self.bridge.apply_candles(&self.stream, &update)?;
            self.publish();
        }
        Ok(())
    }

    fn handle_clock(&mut self, events: ClockEvents) -> Result<()> {
        if events.expiry {
            self.run_watchdog();
        }
        if events.ticker {
            self.spawn_ticker();
        }
        if events.aggregation {
            self.spawn_aggregation();
        }
        if events.probability {
            self.spawn_probabilities();
        }
        self.publish();
        Ok(())
    }

    fn run_watchdog(&mut self) {
        if self.results.is_empty() {
            return;
        }
        let tick = self.watchdog.tick((self.now)(), &self.results);
        self.countdowns = tick.countdowns;
        if tick.refresh_due {
            self.schedule_expiry_refresh();
        }
    }

    fn apply_results(&mut self, mut results: Vec<AggregatedIntervalResult>) -> Result<()> {
        // Intervals hidden while the cycle was in flight stay hidden
        results.retain(|r| self.visible.contains(&r.interval));

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record(self.session.key().symbol, &results, (self.now)()) {
                warn!(error = %e, "Failed to record aggregation cycle");
            }
        }

        self.results = results;
        self.run_watchdog();
        self.sync_system_lines()
    }

    /// Rebuild the system namespace from the current results
    fn sync_system_lines(&mut self) -> Result<()> {
        let lines = self.results.iter().map(AnnotationLine::from_result).collect();
        let change = self.ledger.replace_namespace(POLYMARKET_NAMESPACE, lines);
        if change.any() {
            self.bridge.sync_lines(&self.ledger, change)?;
        }
        Ok(())
    }

    fn set_visible(&mut self, intervals: &[Interval], visible: bool) -> Result<()> {
        let mut changed = false;
        for &interval in intervals {
            if !self.tracked.contains(&interval) {
                debug!(interval = %interval, "Interval is not tracked");
                continue;
            }
            changed |= if visible {
                self.visible.insert(interval)
            } else {
                self.visible.remove(&interval)
            };
        }
        if !changed {
            return Ok(());
        }

        if visible {
            self.spawn_aggregation();
        } else {
            self.results.retain(|r| self.visible.contains(&r.interval));
            self.countdowns.retain(|c| self.visible.contains(&c.interval));
            if self.visible.is_empty() {
                let change = self.ledger.remove_system_namespace(POLYMARKET_NAMESPACE);
                self.bridge.sync_lines(&self.ledger, change)?;
            } else {
                self.sync_system_lines()?;
            }
        }
        self.publish();
        Ok(())
    }

    fn visible_tracked(&self) -> Vec<Interval> {
        self.tracked
            .iter()
            .copied()
            .filter(|iv| self.visible.contains(iv))
            .collect()
    }

    fn spawn_candle_load(&mut self) {
        let provider = self.candles.clone();
        let events = self.events_tx.clone();
        let generation = self.session.generation();
        let key = self.session.key();
        let limit = self.candle_limit;

        self.session.spawn(async move {
            match provider
                .fetch_candles(key.symbol, key.interval, limit, None)
                .await
            {
                Ok(candles) => {
                    debug!(source = %key, count = candles.len(), "Candles loaded");
                    let _ = events
                        .send(EngineEvent::CandlesLoaded {
                            generation,
                            candles,
                        })
                        .await;
                }
                Err(e) => warn!(source = %key, error = %e, "Candle load failed"),
            }
        });
    }

    fn spawn_ticker(&mut self) {
        let provider = self.candles.clone();
        let events = self.events_tx.clone();
        let generation = self.session.generation();
        let symbol = self.session.key().symbol;

        self.session.spawn(async move {
            match provider.fetch_ticker(symbol).await {
                Ok(ticker) => {
                    let _ = events.send(EngineEvent::Ticker { generation, ticker }).await;
                }
                Err(e) => debug!(symbol, error = %e, "Ticker poll failed"),
            }
        });
    }

    fn spawn_aggregation(&mut self) {
        let symbol = self.session.symbol();
        if !symbol.has_prediction_markets() {
            return;
        }
        let intervals = self.visible_tracked();
        if intervals.is_empty() {
            return;
        }

        self.aggregation_cycle += 1;
        let cycle = self.aggregation_cycle;
        let aggregator = self.aggregator.clone();
        let events = self.events_tx.clone();
        let generation = self.session.generation();
        let now = (self.now)();

        self.session.spawn(async move {
            let results = aggregator.refresh(symbol, &intervals, now).await;
            let _ = events
                .send(EngineEvent::Aggregated {
                    generation,
                    cycle,
                    results,
                })
                .await;
        });
    }

    fn spawn_probabilities(&mut self) {
        if !self.detail_open || !self.results.iter().any(|r| r.primary_token_id.is_some()) {
            return;
        }
        let aggregator = self.aggregator.clone();
        let events = self.events_tx.clone();
        let generation = self.session.generation();
        let results = self.results.clone();

        self.session.spawn(async move {
            let updates = aggregator.fetch_probabilities(&results).await;
            if !updates.is_empty() {
                let _ = events
                    .send(EngineEvent::Probabilities {
                        generation,
                        updates,
                    })
                    .await;
            }
        });
    }

    /// One delayed re-aggregation; a pending one absorbs later requests
    fn schedule_expiry_refresh(&mut self) {
        if !self.session.claim_refresh() {
            debug!("Expiry refresh already pending");
            return;
        }
        let events = self.events_tx.clone();
        let generation = self.session.generation();
        let delay = self.expiry_delay;

        self.session.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(EngineEvent::ExpiryRefreshDue { generation })
                .await;
        });
    }

    fn place_order(&mut self, mut request: OrderRequest, reply: oneshot::Sender<OrderOutcome>) {
        if request.private_key.trim().is_empty() {
            if let Some(key) = self.settings.as_ref().and_then(SettingsStore::load_key) {
                request.private_key = key;
            }
        }
        let orders = self.orders.clone();

        // Not session-owned: a symbol switch never cancels a submitted order
        tokio::spawn(async move {
            let outcome = orders.place(request).await;
            if reply.send(outcome).is_err() {
                debug!("Order caller went away before the outcome arrived");
            }
        });
    }

    fn publish(&self) {
        let key = self.session.key();
        let intervals = self
            .results
            .iter()
            .map(|r| IntervalView {
                result: r.clone(),
                countdown: self
                    .countdowns
                    .iter()
                    .find(|c| c.interval == r.interval)
                    .cloned(),
            })
            .collect();

        self.snapshot_tx.send_replace(OverlaySnapshot {
            symbol: key.symbol.to_string(),
            interval: key.interval,
            generation: self.session.generation().0,
            ticker: self.ticker.clone(),
            last_candle: self.stream.last().cloned(),
            candle_count: self.stream.len(),
            intervals,
            lines: self.ledger.visible_lines(),
            visible_intervals: self.visible_tracked(),
            detail_open: self.detail_open,
            refresh_pending: self.session.refresh_pending(),
            crosshair: self.crosshair,
        });
    }
}
