// Domain layer: models, wire events and ports shared by core and adapters.

pub mod events;
pub mod model;
pub mod ports;
