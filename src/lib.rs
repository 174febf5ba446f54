pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{Reporter, SoapAdminSession};
pub use config::{CheckConfig, ResolvedInstance};
pub use self::core::{
    aggregator::QuotaAggregator,
    check::{CheckRun, QuotaCheck},
};
pub use domain::model::{DomainQuotaResult, QuotaStatus};
pub use utils::error::{ErrorKind, QuotaError, Result};
