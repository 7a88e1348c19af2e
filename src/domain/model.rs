use serde::{Deserialize, Serialize};
use std::fmt;

/// Line terminator used in both directions on the serial link.
pub const LINE_DELIMITER: &str = "\r\n";

/// One of the three servos on the arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ServoId {
    Yaw,
    UpperArm,
    Forearm,
}

impl ServoId {
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(ServoId::Yaw),
            1 => Some(ServoId::UpperArm),
            2 => Some(ServoId::Forearm),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            ServoId::Yaw => 0,
            ServoId::UpperArm => 1,
            ServoId::Forearm => 2,
        }
    }

    /// Largest angle, in degrees, the servo can physically reach.
    pub fn max_angle(self) -> u32 {
        match self {
            ServoId::Yaw => 360,
            ServoId::UpperArm | ServoId::Forearm => 180,
        }
    }
}

impl From<ServoId> for u8 {
    fn from(id: ServoId) -> Self {
        id.index()
    }
}

impl TryFrom<u8> for ServoId {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        ServoId::from_index(u32::from(value)).ok_or_else(|| format!("unknown servo id {}", value))
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// A validated servo command. Only the validator builds these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Command {
    servo: ServoId,
    angle: u32,
}

impl Command {
    pub(crate) fn new(servo: ServoId, angle: u32) -> Self {
        Self { servo, angle }
    }

    pub fn servo(&self) -> ServoId {
        self.servo
    }

    pub fn angle(&self) -> u32 {
        self.angle
    }

    /// Bytes as they go on the wire, delimiter included.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}{}", self, LINE_DELIMITER).into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.servo, self.angle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    pub manufacturer: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Result of sending one command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub line: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A line that looked like a command but was refused by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line: String,
    pub reason: String,
}

/// Result of one input line, reported as soon as it is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEntry {
    Sent(DispatchOutcome),
    Rejected(RejectedLine),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
    pub rejected: Vec<RejectedLine>,
    /// Set when a not-open or I/O failure stopped the batch.
    pub halted: bool,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.halted && self.outcomes.iter().all(|o| o.success)
    }

    pub fn sent_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Servo angles reported by the firmware, e.g. `Yaw: 180 | Arm1: 90 | Arm2: 90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmPose {
    pub yaw: i32,
    pub arm1: i32,
    pub arm2: i32,
}

impl ArmPose {
    pub fn parse(line: &str) -> Option<Self> {
        let mut yaw = None;
        let mut arm1 = None;
        let mut arm2 = None;

        for field in line.split('|') {
            let (key, value) = field.split_once(':')?;
            let value: i32 = value.trim().parse().ok()?;
            match key.trim() {
                "Yaw" => yaw = Some(value),
                "Arm1" => arm1 = Some(value),
                "Arm2" => arm2 = Some(value),
                _ => return None,
            }
        }

        Some(Self {
            yaw: yaw?,
            arm1: arm1?,
            arm2: arm2?,
        })
    }
}

/// One line read from the device, as fanned out to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryLine {
    pub line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<ArmPose>,
}

impl TelemetryLine {
    pub fn new(line: impl Into<String>) -> Self {
        let line = line.into();
        let pose = ArmPose::parse(&line);
        Self { line, pose }
    }
}
