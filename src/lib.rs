pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{RelayConfig, TranslatorConfig};

pub use adapters::{llm::ChatTranslator, serial::NativeSerialBackend, transport::TransportServer};
pub use core::{
    dispatcher::CommandDispatcher,
    hub::TelemetryHub,
    relay::RelayEngine,
    session::DeviceSession,
    validator::{CommandValidator, ValidationPolicy},
};
pub use utils::error::{RelayError, Result};
