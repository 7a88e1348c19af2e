use crate::domain::model::{Command, ServoId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static COMMAND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+)[ \t]+([0-9]+)\s*$").expect("command grammar is a valid regex")
});

/// How strictly angles are checked against each servo's range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Any non-negative angle passes; the firmware is left to clamp.
    #[default]
    Permissive,
    /// Angles above the servo's physical limit are refused.
    ServoLimits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The line is not in `<servo> <angle>` form. Callers treat it as prose.
    NotACommand,
    UnknownServo(u32),
    AngleOutOfRange { servo: ServoId, angle: u32 },
}

impl Rejection {
    /// True for lines shaped like a command that still got refused.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Rejection::NotACommand)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotACommand => write!(f, "not a command"),
            Rejection::UnknownServo(id) => write!(f, "unknown servo id {} (expected 0, 1 or 2)", id),
            Rejection::AngleOutOfRange { servo, angle } => write!(
                f,
                "angle {} out of range for servo {} (0-{})",
                angle,
                servo,
                servo.max_angle()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandValidator {
    policy: ValidationPolicy,
}

impl CommandValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn parse(&self, line: &str) -> Result<Command, Rejection> {
        let caps = COMMAND_LINE.captures(line).ok_or(Rejection::NotACommand)?;

        // 超出 u32 的數字一律視為非指令
        let servo_index: u32 = caps[1].parse().map_err(|_| Rejection::NotACommand)?;
        let angle: u32 = caps[2].parse().map_err(|_| Rejection::NotACommand)?;

        let servo = ServoId::from_index(servo_index).ok_or(Rejection::UnknownServo(servo_index))?;

        if self.policy == ValidationPolicy::ServoLimits && angle > servo.max_angle() {
            return Err(Rejection::AngleOutOfRange { servo, angle });
        }

        Ok(Command::new(servo, angle))
    }

    /// Whether any line of `text` parses as a command.
    pub fn contains_commands(&self, text: &str) -> bool {
        text.lines().any(|line| self.parse(line).is_ok())
    }
}
