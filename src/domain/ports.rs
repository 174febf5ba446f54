use crate::domain::model::{DomainQuotaResult, RawAccountRecord};
use crate::utils::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Forward-only sequence of account records; an `Err` item aborts the domain.
pub type RecordStream<'a> = BoxStream<'a, Result<RawAccountRecord>>;

#[async_trait]
pub trait AdminSession: Send + Sync {
    /// Fails with `Auth` on rejected credentials and `Transport`/`Http` on network or TLS failure.
    async fn authenticate(&mut self) -> Result<()>;

    /// Fails with `DomainNotFound` when the upstream does not know `domain`.
    async fn fetch_domain_quota<'a>(&'a self, domain: &str) -> Result<RecordStream<'a>>;
}

#[async_trait]
pub trait MetricReporter: Send + Sync {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()>;
}

#[async_trait]
impl<R: MetricReporter + ?Sized> MetricReporter for &R {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()> {
        (**self).emit(result).await
    }
}
