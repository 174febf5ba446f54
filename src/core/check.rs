use crate::core::aggregator::QuotaAggregator;
use crate::domain::model::{DomainQuotaResult, QuotaStatus, RawAccountRecord};
use crate::domain::ports::{AdminSession, MetricReporter};
use crate::utils::error::{QuotaError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

/// Outcome of one collection cycle, as handed back to the host.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRun {
    pub collected_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub result: DomainQuotaResult,
}

/// Runs authenticate → fetch → aggregate → emit for a single domain.
///
/// `run` borrows the check mutably, so one instance never has two cycles in flight.
pub struct QuotaCheck<S: AdminSession, R: MetricReporter> {
    session: S,
    reporter: R,
    aggregator: QuotaAggregator,
    domain: String,
    timeout: Option<Duration>,
}

impl<S: AdminSession, R: MetricReporter> QuotaCheck<S, R> {
    pub fn new(session: S, reporter: R, domain: impl Into<String>) -> Self {
        Self {
            session,
            reporter,
            aggregator: QuotaAggregator::new(),
            domain: domain.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub async fn run(&mut self) -> Result<CheckRun> {
        self.run_until(std::future::pending()).await
    }

    /// Like `run`, but a completed `cancel` future aborts collection with a `Cancelled` failure.
    /// The failure is still reported.
    pub async fn run_until<F>(&mut self, cancel: F) -> Result<CheckRun>
    where
        F: Future<Output = ()>,
    {
        let collected_at = Utc::now();
        let started = Instant::now();
        let domain = self.domain.clone();
        let limit = self.timeout;

        tracing::info!("🚀 Collecting quota usage for {}", domain);

        let result = {
            let collect = collect(&mut self.session, &self.aggregator, &domain);
            let bounded = async {
                match limit {
                    Some(limit) => match tokio::time::timeout(limit, collect).await {
                        Ok(result) => result,
                        Err(_) => {
                            DomainQuotaResult::failed(&domain, &QuotaError::cancelled_after(limit))
                        }
                    },
                    None => collect.await,
                }
            };

            tokio::select! {
                result = bounded => result,
                () = cancel => DomainQuotaResult::failed(
                    &domain,
                    &QuotaError::Cancelled { reason: "cancelled by host".to_string() },
                ),
            }
        };

        let elapsed = started.elapsed();
        log_outcome(&result, elapsed);

        self.reporter.emit(&result).await?;

        Ok(CheckRun {
            collected_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            result,
        })
    }
}

async fn collect<S: AdminSession>(
    session: &mut S,
    aggregator: &QuotaAggregator,
    domain: &str,
) -> DomainQuotaResult {
    if let Err(e) = session.authenticate().await {
        return aggregator.aggregate(domain, Err::<Vec<Result<RawAccountRecord>>, _>(e));
    }
    tracing::debug!("Authenticated, requesting quota usage for {}", domain);

    let records = session.fetch_domain_quota(domain).await;
    aggregator.aggregate_stream(domain, records).await
}

fn log_outcome(result: &DomainQuotaResult, elapsed: Duration) {
    match result.status {
        QuotaStatus::Complete => tracing::info!(
            "✅ {}: {} bytes over {} accounts ({:?})",
            result.domain,
            result.total_used_bytes,
            result.account_count,
            elapsed
        ),
        QuotaStatus::PartialSuccess => tracing::warn!(
            "⚠️ {}: {} bytes over {} accounts, {} skipped ({:?})",
            result.domain,
            result.total_used_bytes,
            result.account_count,
            result.skipped_count,
            elapsed
        ),
        QuotaStatus::Failed => match &result.failure {
            Some(failure) => tracing::error!(
                "❌ {}: collection failed ({}): {}",
                result.domain,
                failure.kind,
                failure.message
            ),
            None => tracing::error!(
                "❌ {}: no valid accounts ({} skipped)",
                result.domain,
                result.skipped_count
            ),
        },
    }
}
