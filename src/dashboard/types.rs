//! Dashboard wire types

use serde::{Deserialize, Serialize};

use crate::engine::{EngineCommand, OverlaySnapshot};
use crate::overlay::AnnotationLine;
use crate::render::CrosshairEvent;
use crate::types::Interval;

/// Standard API response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Server-to-client messages besides render commands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    Snapshot(OverlaySnapshot),
}

/// Client-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Crosshair(CrosshairEvent),
    SwitchSymbol { symbol: String },
    SwitchInterval { interval: Interval },
    SetUserLines { lines: Vec<AnnotationLine> },
    SetIntervalVisible { interval: Interval, visible: bool },
    SetAllIntervalsVisible { visible: bool },
    SetDetailOpen { open: bool },
    Resize { width: u32, height: u32 },
}

impl ClientMessage {
    /// Engine command for this message; `None` for pointer events
    pub fn into_command(self) -> Option<EngineCommand> {
        let command = match self {
            ClientMessage::Crosshair(_) => return None,
            ClientMessage::SwitchSymbol { symbol } => EngineCommand::SwitchSymbol(symbol),
            ClientMessage::SwitchInterval { interval } => EngineCommand::SwitchInterval(interval),
            ClientMessage::SetUserLines { lines } => EngineCommand::SetUserLines(lines),
            ClientMessage::SetIntervalVisible { interval, visible } => {
                EngineCommand::SetIntervalVisible { interval, visible }
            }
            ClientMessage::SetAllIntervalsVisible { visible } => {
                EngineCommand::SetAllIntervalsVisible(visible)
            }
            ClientMessage::SetDetailOpen { open } => EngineCommand::SetDetailOpen(open),
            ClientMessage::Resize { width, height } => EngineCommand::Resize { width, height },
        };
        Some(command)
    }
}
