use crate::domain::model::{AccountQuota, DomainQuotaResult, QuotaStatus, RawAccountRecord};
use crate::utils::error::{QuotaError, Result};
use futures::{Stream, StreamExt};
use std::collections::HashSet;

/// Sums per-account quota usage for one domain.
///
/// Record-level problems (malformed or repeated accounts) are tallied as skipped and never
/// abort the domain. An upstream error, whether it prevented the fetch or arrived mid-stream,
/// discards any partial sum and produces a `Failed` result carrying the error kind.
///
/// Records are pulled one at a time and never buffered, but repeated-account detection keeps
/// every distinct account id seen in the cycle, so memory grows with the number of accounts
/// in the domain (a few dozen bytes per id).
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaAggregator;

impl QuotaAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregates an already-available sequence of records.
    pub fn aggregate<I>(&self, domain: &str, records: Result<I>) -> DomainQuotaResult
    where
        I: IntoIterator<Item = Result<RawAccountRecord>>,
    {
        let records = match start(domain, records) {
            Ok(records) => records,
            Err(result) => return result,
        };

        let mut tally = Tally::default();
        for item in records {
            match item {
                Ok(record) => tally.observe(&record),
                Err(e) => return abort(domain, &tally, &e),
            }
        }
        tally.finish(domain)
    }

    /// Aggregates a lazily fetched stream, pulling one record at a time.
    pub async fn aggregate_stream<S>(&self, domain: &str, records: Result<S>) -> DomainQuotaResult
    where
        S: Stream<Item = Result<RawAccountRecord>>,
    {
        let records = match start(domain, records) {
            Ok(records) => records,
            Err(result) => return result,
        };
        let mut records = std::pin::pin!(records);

        let mut tally = Tally::default();
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => tally.observe(&record),
                Err(e) => return abort(domain, &tally, &e),
            }
        }
        tally.finish(domain)
    }
}

fn start<T>(domain: &str, records: Result<T>) -> std::result::Result<T, DomainQuotaResult> {
    if domain.trim().is_empty() {
        let error = QuotaError::ConfigError {
            message: "domain must not be empty".to_string(),
        };
        return Err(DomainQuotaResult::failed(domain, &error));
    }

    records.map_err(|e| {
        tracing::error!("❌ Upstream call for {} failed: {} ({})", domain, e, e.kind());
        DomainQuotaResult::failed(domain, &e)
    })
}

fn abort(domain: &str, tally: &Tally, error: &QuotaError) -> DomainQuotaResult {
    tracing::error!(
        "❌ Record stream for {} failed after {} records, discarding partial sum: {}",
        domain,
        tally.counted + tally.skipped,
        error
    );
    DomainQuotaResult::failed(domain, error)
}

#[derive(Debug, Default)]
struct Tally {
    // ids of counted accounts; O(accounts) for the lifetime of one cycle
    total: u128,
    counted: u64,
    skipped: u64,
    seen: HashSet<String>,
}

impl Tally {
    fn observe(&mut self, record: &RawAccountRecord) {
        match AccountQuota::from_raw(record) {
            Ok(account) => {
                if self.seen.contains(&account.account_id) {
                    tracing::debug!("Skipping repeated account {}", account.account_id);
                    self.skipped += 1;
                    return;
                }
                self.total += u128::from(account.used_bytes);
                self.counted += 1;
                self.seen.insert(account.account_id);
            }
            Err(e) => {
                tracing::debug!("Skipping record: {}", e);
                self.skipped += 1;
            }
        }
    }

    fn finish(self, domain: &str) -> DomainQuotaResult {
        let status = match (self.counted, self.skipped) {
            (0, _) => QuotaStatus::Failed,
            (_, 0) => QuotaStatus::Complete,
            _ => QuotaStatus::PartialSuccess,
        };

        tracing::debug!(
            "Aggregated {}: {} bytes over {} accounts, {} skipped",
            domain,
            self.total,
            self.counted,
            self.skipped
        );

        DomainQuotaResult {
            domain: domain.to_string(),
            total_used_bytes: self.total,
            account_count: self.counted,
            skipped_count: self.skipped,
            status,
            failure: None,
        }
    }
}
