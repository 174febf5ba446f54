mod log_reporter;
mod statsd;
mod textfile;

pub use log_reporter::LogReporter;
pub use statsd::DogStatsdReporter;
pub use textfile::PrometheusReporter;

use crate::config::{ReporterConfig, ReporterKind};
use crate::domain::model::DomainQuotaResult;
use crate::domain::ports::MetricReporter;
use crate::utils::error::{QuotaError, Result};
use async_trait::async_trait;

/// The metric sink selected by `[reporter] kind`.
pub enum Reporter {
    Log(LogReporter),
    DogStatsd(DogStatsdReporter),
    Prometheus(PrometheusReporter),
}

impl Reporter {
    pub async fn from_config(config: &ReporterConfig) -> Result<Self> {
        let reporter = match config.kind {
            ReporterKind::Log => Reporter::Log(LogReporter::new(&config.metric_name)),
            ReporterKind::Dogstatsd => Reporter::DogStatsd(
                DogStatsdReporter::connect(
                    &config.statsd_address,
                    &config.metric_name,
                    config.tags.clone(),
                )
                .await?,
            ),
            ReporterKind::Prometheus => {
                let path = config
                    .textfile_path
                    .as_deref()
                    .ok_or_else(|| QuotaError::MissingConfigError {
                        field: "reporter.textfile_path".to_string(),
                    })?;
                Reporter::Prometheus(PrometheusReporter::new(&config.metric_name, path)?)
            }
        };
        Ok(reporter)
    }
}

#[async_trait]
impl MetricReporter for Reporter {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()> {
        match self {
            Reporter::Log(reporter) => reporter.emit(result).await,
            Reporter::DogStatsd(reporter) => reporter.emit(result).await,
            Reporter::Prometheus(reporter) => reporter.emit(result).await,
        }
    }
}

/// One-line summary used as the secondary signal for degraded cycles.
fn degradation_summary(result: &DomainQuotaResult) -> String {
    let mut summary = format!(
        "status={} accounts={} skipped={}",
        result.status.as_str(),
        result.account_count,
        result.skipped_count
    );
    if let Some(failure) = &result.failure {
        summary.push_str(&format!(" kind={} error={}", failure.kind, failure.message));
    }
    summary
}
