// Domain layer: core models and ports (interfaces). The admin protocol and metric sinks live in adapters.

pub mod model;
pub mod ports;
