//! Messages exchanged with remote clients.
//!
//! Serialized as one JSON object per line with an `"event"` tag field.

use crate::domain::model::{ArmPose, DispatchEntry, PortInfo, TelemetryLine};
use serde::{Deserialize, Serialize};

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientRequest {
    ListPorts,
    Open {
        #[serde(default)]
        path: Option<String>,
    },
    /// Raw command text, one `<servo> <angle>` per line.
    Send { command: String },
    /// Natural-language intent for the translator.
    Process { text: String },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Processing,
    Completed,
    Error,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    SerialPorts {
        ports: Vec<PortInfo>,
    },
    SerialConnected {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CommandSent {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SerialClosed {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    LlmResponse {
        status: TranslationStatus,
        message: String,
    },
    Telemetry {
        line: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pose: Option<ArmPose>,
    },
    /// The request line could not be understood.
    Error {
        message: String,
    },
}

impl From<TelemetryLine> for ServerEvent {
    fn from(t: TelemetryLine) -> Self {
        ServerEvent::Telemetry {
            line: t.line,
            pose: t.pose,
        }
    }
}

impl From<DispatchEntry> for ServerEvent {
    fn from(entry: DispatchEntry) -> Self {
        match entry {
            DispatchEntry::Sent(outcome) => ServerEvent::CommandSent {
                success: outcome.success,
                command: Some(outcome.line),
                error: outcome.error,
            },
            DispatchEntry::Rejected(rejected) => ServerEvent::CommandSent {
                success: false,
                command: Some(rejected.line),
                error: Some(rejected.reason),
            },
        }
    }
}
