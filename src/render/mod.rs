//! Render module - bridge between overlay state and the chart surface
//!
//! The surface is an external collaborator that only understands imperative
//! calls. [`RenderBridge`] mirrors the ledger and candle buffer into those
//! calls and owns every renderer-native handle it creates.

mod broadcast;

pub use broadcast::{BroadcastSurface, CrosshairInjector, RenderCommand};

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::candles::{CandleStream, CandleUpdate};
use crate::overlay::{AnnotationLedger, AnnotationLine, LedgerChange, LineId, LineStyle};
use crate::types::{Candle, SymbolKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("render container is missing")]
    ContainerMissing,
    #[error("render surface already disposed")]
    Disposed,
}

/// Renderer-native line object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Pointer position reported by the surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosshairEvent {
    pub time: Option<i64>,
    pub price: Option<Decimal>,
}

pub type CrosshairListener = Box<dyn Fn(CrosshairEvent) + Send + Sync>;

/// Everything the surface needs to draw one horizontal line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    pub price: Decimal,
    pub color: String,
    pub style: LineStyle,
    pub label: String,
    pub width: u8,
    /// Horizontal span in candle time; `None` spans the whole series
    pub time_range: Option<(i64, i64)>,
}

impl LineSpec {
    pub fn from_line(line: &AnnotationLine, time_range: Option<(i64, i64)>) -> Self {
        Self {
            price: line.price,
            color: line.color.clone(),
            style: line.style,
            label: line.label.clone(),
            width: line.width,
            time_range,
        }
    }
}

/// Interface of the chart surface
pub trait RenderSurface: Send {
    /// Size of the hosting container, `None` when it does not exist
    fn container_size(&self) -> Option<(u32, u32)>;
    fn set_series(&mut self, candles: &[Candle]);
    fn update_last(&mut self, candle: &Candle);
    fn append(&mut self, candle: &Candle, evict_oldest: bool);
    fn create_line(&mut self, spec: &LineSpec) -> LineHandle;
    fn update_line(&mut self, handle: LineHandle, spec: &LineSpec);
    fn remove_line(&mut self, handle: LineHandle);
    fn fit_content(&mut self);
    fn resize(&mut self, width: u32, height: u32);
    fn subscribe_crosshair(&mut self, listener: CrosshairListener) -> ListenerId;
    fn unsubscribe_crosshair(&mut self, id: ListenerId);
    fn dispose(&mut self);
}

#[derive(Debug)]
struct MirroredLine {
    id: LineId,
    handle: LineHandle,
    spec: LineSpec,
}

/// Owner of every renderer-native object on one surface
pub struct RenderBridge<S: RenderSurface> {
    surface: S,
    identity: Option<SymbolKey>,
    user: Vec<MirroredLine>,
    system: Vec<MirroredLine>,
    time_range: Option<(i64, i64)>,
    fitted: bool,
    listeners: Vec<ListenerId>,
    disposed: bool,
}

impl<S: RenderSurface> RenderBridge<S> {
    /// Bind to a surface; fails when it has no container to draw into
    pub fn attach(surface: S) -> Result<Self, RenderError> {
        let Some((width, height)) = surface.container_size() else {
            return Err(RenderError::ContainerMissing);
        };
        debug!(width, height, "Render surface attached");
        Ok(Self {
            surface,
            identity: None,
            user: Vec::new(),
            system: Vec::new(),
            time_range: None,
            fitted: false,
            listeners: Vec::new(),
            disposed: false,
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn line_count(&self) -> usize {
        self.user.len() + self.system.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<(), RenderError> {
        if self.disposed {
            Err(RenderError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Switch the data source; returns whether it changed
    ///
    /// A new identity clears every line and re-arms the first-load auto-fit.
    pub fn set_identity(&mut self, key: SymbolKey) -> Result<bool, RenderError> {
        self.ensure_live()?;
        if self.identity == Some(key) {
            return Ok(false);
        }
        self.clear_lines();
        self.surface.set_series(&[]);
        self.identity = Some(key);
        self.time_range = None;
        self.fitted = false;
        info!(source = %key, "🖼️ Render source switched");
        Ok(true)
    }

    /// Mirror one candle merge onto the surface
    pub fn apply_candles(
        &mut self,
        stream: &CandleStream,
        update: &CandleUpdate,
    ) -> Result<(), RenderError> {
        self.ensure_live()?;
        match update {
            CandleUpdate::Reloaded => {
                self.surface.set_series(&stream.candles());
                if !self.fitted && !stream.is_empty() {
                    self.surface.fit_content();
                    self.fitted = true;
                }
            }
            CandleUpdate::ReplacedLast(candle) => self.surface.update_last(candle),
            CandleUpdate::Appended { appended, evicted } => {
                self.surface.append(appended, evicted.is_some())
            }
            CandleUpdate::Ignored(_) => return Ok(()),
        }
        self.extend_lines(stream.time_range())
    }

    /// Recreate the subsets flagged in `change`
    pub fn sync_lines(
        &mut self,
        ledger: &AnnotationLedger,
        change: LedgerChange,
    ) -> Result<(), RenderError> {
        self.ensure_live()?;
        let range = self.time_range;
        if change.user {
            Self::recreate(&mut self.surface, &mut self.user, ledger.user_lines(), range);
        }
        if change.system {
            Self::recreate(&mut self.surface, &mut self.system, ledger.system_lines(), range);
        }
        Ok(())
    }

    /// Drop every line and redraw the whole ledger
    pub fn replace_all_lines(&mut self, ledger: &AnnotationLedger) -> Result<(), RenderError> {
        self.sync_lines(
            ledger,
            LedgerChange {
                user: true,
                system: true,
            },
        )
    }

    fn recreate(
        surface: &mut S,
        mirrored: &mut Vec<MirroredLine>,
        lines: &[AnnotationLine],
        range: Option<(i64, i64)>,
    ) {
        for old in mirrored.drain(..) {
            surface.remove_line(old.handle);
        }
        for line in lines {
            let spec = LineSpec::from_line(line, range);
            let handle = surface.create_line(&spec);
            mirrored.push(MirroredLine {
                id: line.id.clone(),
                handle,
                spec,
            });
        }
    }

    /// Stretch every line across a new candle span
    pub fn extend_lines(&mut self, range: Option<(i64, i64)>) -> Result<(), RenderError> {
        self.ensure_live()?;
        if range == self.time_range {
            return Ok(());
        }
        self.time_range = range;
        for line in self.user.iter_mut().chain(self.system.iter_mut()) {
            line.spec.time_range = range;
            self.surface.update_line(line.handle, &line.spec);
        }
        Ok(())
    }

    /// Handles of mirrored lines by id, for diagnostics
    pub fn handles(&self) -> HashMap<LineId, LineHandle> {
        self.user
            .iter()
            .chain(self.system.iter())
            .map(|l| (l.id.clone(), l.handle))
            .collect()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.ensure_live()?;
        self.surface.resize(width, height);
        Ok(())
    }

    pub fn on_crosshair(&mut self, listener: CrosshairListener) -> Result<ListenerId, RenderError> {
        self.ensure_live()?;
        let id = self.surface.subscribe_crosshair(listener);
        self.listeners.push(id);
        Ok(id)
    }

    fn clear_lines(&mut self) {
        for line in self.user.drain(..).chain(self.system.drain(..)) {
            self.surface.remove_line(line.handle);
        }
    }

    /// Tear down every line and listener, then the surface itself
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear_lines();
        for id in self.listeners.drain(..) {
            self.surface.unsubscribe_crosshair(id);
        }
        self.surface.dispose();
        self.disposed = true;
        debug!("Render surface disposed");
    }
}

impl<S: RenderSurface> Drop for RenderBridge<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::{KlineEvent, SubscriptionGeneration};
    use crate::overlay::POLYMARKET_NAMESPACE;
    use crate::types::Interval;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        calls: Vec<String>,
        live_lines: Vec<LineHandle>,
        listeners: usize,
        next: u64,
    }

    struct RecordingSurface {
        state: Arc<Mutex<Recorded>>,
        size: Option<(u32, u32)>,
    }

    impl RecordingSurface {
        fn new() -> (Self, Arc<Mutex<Recorded>>) {
            let state = Arc::new(Mutex::new(Recorded::default()));
            (
                Self {
                    state: state.clone(),
                    size: Some((800, 600)),
                },
                state,
            )
        }

        fn log(&self, call: String) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    impl RenderSurface for RecordingSurface {
        fn container_size(&self) -> Option<(u32, u32)> {
            self.size
        }
        fn set_series(&mut self, candles: &[Candle]) {
            self.log(format!("set_series({})", candles.len()));
        }
        fn update_last(&mut self, candle: &Candle) {
            self.log(format!("update_last({})", candle.time));
        }
        fn append(&mut self, candle: &Candle, evict_oldest: bool) {
            self.log(format!("append({},{})", candle.time, evict_oldest));
        }
        fn create_line(&mut self, spec: &LineSpec) -> LineHandle {
            let mut s = self.state.lock().unwrap();
            s.next += 1;
            let handle = LineHandle(s.next);
            s.live_lines.push(handle);
            s.calls.push(format!("create_line({})", spec.label));
            handle
        }
        fn update_line(&mut self, handle: LineHandle, _spec: &LineSpec) {
            self.log(format!("update_line({})", handle.0));
        }
        fn remove_line(&mut self, handle: LineHandle) {
            let mut s = self.state.lock().unwrap();
            s.live_lines.retain(|h| *h != handle);
            s.calls.push(format!("remove_line({})", handle.0));
        }
        fn fit_content(&mut self) {
            self.log("fit_content".into());
        }
        fn resize(&mut self, width: u32, height: u32) {
            self.log(format!("resize({}x{})", width, height));
        }
        fn subscribe_crosshair(&mut self, _listener: CrosshairListener) -> ListenerId {
            let mut s = self.state.lock().unwrap();
            s.listeners += 1;
            ListenerId(s.listeners as u64)
        }
        fn unsubscribe_crosshair(&mut self, _id: ListenerId) {
            self.state.lock().unwrap().listeners -= 1;
        }
        fn dispose(&mut self) {
            self.log("dispose".into());
        }
    }

    fn candle(time: i64) -> Candle {
        Candle {
            time,
            open: dec!(1),
            high: dec!(2),
            low: dec!(1),
            close: dec!(2),
            volume: dec!(3),
        }
    }

    fn key(symbol: &'static str) -> SymbolKey {
        SymbolKey {
            symbol,
            interval: Interval::Min5,
        }
    }

    fn line(id: LineId, label: &str) -> AnnotationLine {
        AnnotationLine {
            id,
            price: dec!(100),
            color: "#fff".into(),
            style: LineStyle::Dashed,
            label: label.into(),
            width: 1,
        }
    }

    fn calls(state: &Arc<Mutex<Recorded>>) -> Vec<String> {
        std::mem::take(&mut state.lock().unwrap().calls)
    }

    #[test]
    fn missing_container_is_an_error() {
        let (mut surface, _) = RecordingSurface::new();
        surface.size = None;
        assert_eq!(RenderBridge::attach(surface).err(), Some(RenderError::ContainerMissing));
    }

    #[test]
    fn first_load_fits_once() {
        let (surface, state) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        let gen = SubscriptionGeneration(1);
        let mut stream = CandleStream::new();
        stream.reset(key("BTCUSDT"), gen);
        bridge.set_identity(key("BTCUSDT")).unwrap();
        calls(&state);

        let update = stream.load(gen, vec![candle(100), candle(200)]);
        bridge.apply_candles(&stream, &update).unwrap();
        let update = stream.load(gen, vec![candle(100), candle(200)]);
        bridge.apply_candles(&stream, &update).unwrap();
        assert_eq!(calls(&state), vec!["set_series(2)", "fit_content", "set_series(2)"]);

        let update = stream.apply(KlineEvent {
            generation: gen,
            candle: candle(200),
            closed: false,
        });
        bridge.apply_candles(&stream, &update).unwrap();
        let update = stream.apply_delta(candle(300));
        bridge.apply_candles(&stream, &update).unwrap();
        assert_eq!(calls(&state), vec!["update_last(200)", "append(300,true)"]);
    }

    #[test]
    fn only_the_changed_subset_is_recreated() {
        let (surface, state) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        let mut ledger = AnnotationLedger::new();
        ledger.upsert_system(line(LineId::system(POLYMARKET_NAMESPACE, "5m"), "5m"));
        let edit = ledger.set_user_lines(vec![line(LineId::user("u"), "mine")]);
        bridge.replace_all_lines(&ledger).unwrap();
        calls(&state);

        bridge.sync_lines(&ledger, edit.change).unwrap();
        assert_eq!(calls(&state), vec!["remove_line(1)", "create_line(mine)"]);
        assert_eq!(state.lock().unwrap().live_lines.len(), 2);
        assert_eq!(bridge.line_count(), 2);
    }

    #[test]
    fn identity_change_clears_lines_and_refits() {
        let (surface, state) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        let mut ledger = AnnotationLedger::new();
        ledger.upsert_system(line(LineId::system(POLYMARKET_NAMESPACE, "1h"), "1h"));

        assert!(bridge.set_identity(key("BTCUSDT")).unwrap());
        bridge.replace_all_lines(&ledger).unwrap();
        assert!(!bridge.set_identity(key("BTCUSDT")).unwrap());
        assert!(bridge.set_identity(key("ETHUSDT")).unwrap());

        assert!(state.lock().unwrap().live_lines.is_empty());
        assert_eq!(bridge.line_count(), 0);
    }

    #[test]
    fn new_candle_span_updates_existing_lines() {
        let (surface, state) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        let mut ledger = AnnotationLedger::new();
        ledger.upsert_system(line(LineId::system(POLYMARKET_NAMESPACE, "5m"), "5m"));
        bridge.replace_all_lines(&ledger).unwrap();
        calls(&state);

        bridge.extend_lines(Some((100, 200))).unwrap();
        bridge.extend_lines(Some((100, 200))).unwrap();
        assert_eq!(calls(&state), vec!["update_line(1)"]);
    }

    #[test]
    fn dispose_releases_lines_and_listeners() {
        let (surface, state) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        let mut ledger = AnnotationLedger::new();
        ledger.set_user_lines(vec![line(LineId::user("a"), "a")]);
        bridge.replace_all_lines(&ledger).unwrap();
        bridge.on_crosshair(Box::new(|_| {})).unwrap();
        bridge.on_crosshair(Box::new(|_| {})).unwrap();

        drop(bridge);
        let s = state.lock().unwrap();
        assert!(s.live_lines.is_empty());
        assert_eq!(s.listeners, 0);
        assert_eq!(s.calls.last().map(String::as_str), Some("dispose"));
    }

    #[test]
    fn disposed_bridge_rejects_calls() {
        let (surface, _) = RecordingSurface::new();
        let mut bridge = RenderBridge::attach(surface).unwrap();
        bridge.dispose();
        assert_eq!(bridge.resize(10, 10), Err(RenderError::Disposed));
        assert!(bridge.is_disposed());
    }
}
