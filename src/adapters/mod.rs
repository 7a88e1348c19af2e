// Adapters layer: concrete implementations for external systems (serial devices, model endpoint, client transport).

pub mod llm;
pub mod serial;
pub mod transport;
