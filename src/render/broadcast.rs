//! Broadcast Surface
//!
//! Render surface that serialises every call as a JSON [`RenderCommand`] on a
//! broadcast channel; a browser client draws them. A mirror of the current
//! series and lines lets late joiners catch up with one replay.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    CrosshairEvent, CrosshairListener, LineHandle, LineSpec, ListenerId, RenderSurface,
};
use crate::types::Candle;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RenderCommand {
    SetSeries { candles: Vec<Candle> },
    UpdateLast { candle: Candle },
    Append { candle: Candle, evict_oldest: bool },
    CreateLine { handle: LineHandle, line: LineSpec },
    UpdateLine { handle: LineHandle, line: LineSpec },
    RemoveLine { handle: LineHandle },
    FitContent,
    Resize { width: u32, height: u32 },
    Dispose,
}

#[derive(Debug, Default)]
struct Mirror {
    candles: Vec<Candle>,
    lines: BTreeMap<u64, LineSpec>,
}

type Listeners = Arc<Mutex<HashMap<ListenerId, CrosshairListener>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct BroadcastSurface {
    tx: broadcast::Sender<String>,
    size: Option<(u32, u32)>,
    next_handle: u64,
    next_listener: u64,
    mirror: Arc<Mutex<Mirror>>,
    listeners: Listeners,
}

impl BroadcastSurface {
    /// Create a surface with the given channel capacity and container size
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            size: Some((width, height)),
            next_handle: 0,
            next_listener: 0,
            mirror: Arc::new(Mutex::new(Mirror::default())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Surface without a container; attaching a bridge to it fails
    pub fn detached(capacity: usize) -> Self {
        Self {
            size: None,
            ..Self::new(capacity, 0, 0)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Handle that feeds client pointer events back to the listeners
    pub fn injector(&self) -> CrosshairInjector {
        CrosshairInjector {
            listeners: self.listeners.clone(),
            mirror: self.mirror.clone(),
            tx: self.tx.clone(),
        }
    }

    fn send(&self, cmd: &RenderCommand) {
        if let Ok(json) = serde_json::to_string(cmd) {
            // No receivers is fine
            let _ = self.tx.send(json);
        }
    }
}

impl RenderSurface for BroadcastSurface {
    fn container_size(&self) -> Option<(u32, u32)> {
        self.size
    }

    fn set_series(&mut self, candles: &[Candle]) {
        lock(&self.mirror).candles = candles.to_vec();
        self.send(&RenderCommand::SetSeries {
            candles: candles.to_vec(),
        });
    }

    fn update_last(&mut self, candle: &Candle) {
        if let Some(last) = lock(&self.mirror).candles.last_mut() {
            *last = candle.clone();
        }
        self.send(&RenderCommand::UpdateLast {
            candle: candle.clone(),
        });
    }

    fn append(&mut self, candle: &Candle, evict_oldest: bool) {
        {
            let mut mirror = lock(&self.mirror);
            if evict_oldest && !mirror.candles.is_empty() {
                mirror.candles.remove(0);
            }
            mirror.candles.push(candle.clone());
        }
        self.send(&RenderCommand::Append {
            candle: candle.clone(),
            evict_oldest,
        });
    }

    fn create_line(&mut self, spec: &LineSpec) -> LineHandle {
        self.next_handle += 1;
        let handle = LineHandle(self.next_handle);
        lock(&self.mirror).lines.insert(handle.0, spec.clone());
        self.send(&RenderCommand::CreateLine {
            handle,
            line: spec.clone(),
        });
        handle
    }

    fn update_line(&mut self, handle: LineHandle, spec: &LineSpec) {
        lock(&self.mirror).lines.insert(handle.0, spec.clone());
        self.send(&RenderCommand::UpdateLine {
            handle,
            line: spec.clone(),
        });
    }

    fn remove_line(&mut self, handle: LineHandle) {
        lock(&self.mirror).lines.remove(&handle.0);
        self.send(&RenderCommand::RemoveLine { handle });
    }

    fn fit_content(&mut self) {
        self.send(&RenderCommand::FitContent);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = Some((width, height));
        self.send(&RenderCommand::Resize { width, height });
    }

    fn subscribe_crosshair(&mut self, listener: CrosshairListener) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        lock(&self.listeners).insert(id, listener);
        id
    }

    fn unsubscribe_crosshair(&mut self, id: ListenerId) {
        lock(&self.listeners).remove(&id);
    }

    fn dispose(&mut self) {
        lock(&self.listeners).clear();
        *lock(&self.mirror) = Mirror::default();
        self.send(&RenderCommand::Dispose);
    }
}

/// Client-side half of the surface: pointer events in, replay out
#[derive(Clone)]
pub struct CrosshairInjector {
    listeners: Listeners,
    mirror: Arc<Mutex<Mirror>>,
    tx: broadcast::Sender<String>,
}

impl CrosshairInjector {
    /// Fan a pointer event out to every registered listener
    pub fn inject(&self, event: CrosshairEvent) -> usize {
        let listeners = lock(&self.listeners);
        for listener in listeners.values() {
            listener(event);
        }
        listeners.len()
    }

    /// Commands that rebuild the current picture from scratch
    pub fn replay(&self) -> Vec<String> {
        let mirror = lock(&self.mirror);
        let mut commands = vec![RenderCommand::SetSeries {
            candles: mirror.candles.clone(),
        }];
        commands.extend(mirror.lines.iter().map(|(handle, spec)| RenderCommand::CreateLine {
            handle: LineHandle(*handle),
            line: spec.clone(),
        }));
        debug!(commands = commands.len(), "Replaying render state");
        commands
            .iter()
            .filter_map(|cmd| serde_json::to_string(cmd).ok())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}
