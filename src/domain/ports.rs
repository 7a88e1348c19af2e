use crate::domain::model::PortInfo;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Fixed link parameters: 8 data bits, 1 stop bit, no parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// How long a single read may block before reporting `TimedOut`.
    pub read_timeout: Duration,
}

impl LinkSettings {
    pub const BAUD_RATE: u32 = 115_200;
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: Self::BAUD_RATE,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Opens and enumerates serial devices. Every method may block.
pub trait SerialBackend: Send + Sync + 'static {
    fn list_ports(&self) -> Result<Vec<PortInfo>>;
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>>;
}

/// An open serial connection. Every method may block.
pub trait SerialLink: Send + 'static {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Independent read half. Reads return `TimedOut` when idle.
    fn reader(&mut self) -> io::Result<Box<dyn io::Read + Send>>;

    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Turns free-text intent into command lines or an explanatory message.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, intent: &str) -> Result<String>;
}
