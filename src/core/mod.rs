pub mod dispatcher;
pub mod hub;
pub mod line_codec;
pub mod relay;
pub mod session;
pub mod validator;

pub use crate::domain::model::{Command, DeviceState, DispatchReport, PortInfo};
pub use crate::domain::ports::{SerialBackend, SerialLink, Translator};
pub use crate::utils::error::Result;
