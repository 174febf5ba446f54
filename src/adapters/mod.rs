// Adapters layer: concrete implementations of the domain ports (admin session, metric sinks).

pub mod reporters;
pub mod soap;

pub use reporters::{DogStatsdReporter, LogReporter, PrometheusReporter, Reporter};
pub use soap::SoapAdminSession;
