pub mod aggregator;
pub mod check;

pub use crate::domain::model::{
    AccountQuota, DomainQuotaResult, Failure, QuotaStatus, RawAccountRecord,
};
pub use crate::domain::ports::{AdminSession, MetricReporter, RecordStream};
pub use crate::utils::error::Result;
