use super::degradation_summary;
use crate::domain::model::{DomainQuotaResult, QuotaStatus};
use crate::domain::ports::MetricReporter;
use crate::utils::error::Result;
use async_trait::async_trait;

/// Writes the gauge and any degradation signal to the log.
#[derive(Debug, Clone)]
pub struct LogReporter {
    metric_name: String,
}

impl LogReporter {
    pub fn new(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
        }
    }
}

#[async_trait]
impl MetricReporter for LogReporter {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()> {
        if result.has_gauge() {
            tracing::info!(
                metric = %self.metric_name,
                value = %result.total_used_bytes,
                domain = %result.domain,
                "📊 {}={} #domain:{}",
                self.metric_name,
                result.total_used_bytes,
                result.domain
            );
        }

        match result.status {
            QuotaStatus::Complete => {}
            QuotaStatus::PartialSuccess => tracing::warn!(
                domain = %result.domain,
                skipped = result.skipped_count,
                "⚠️ Quota aggregation degraded: {}",
                degradation_summary(result)
            ),
            QuotaStatus::Failed => tracing::error!(
                domain = %result.domain,
                kind = result.failure_kind().map(|k| k.as_str()).unwrap_or("NoValidAccounts"),
                "❌ Quota aggregation failed, gauge not emitted: {}",
                degradation_summary(result)
            ),
        }
        Ok(())
    }
}
