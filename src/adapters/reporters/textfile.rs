use crate::domain::model::{DomainQuotaResult, QuotaStatus};
use crate::domain::ports::MetricReporter;
use crate::utils::error::{ErrorKind, QuotaError, Result};
use async_trait::async_trait;
use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// `kind` label for a failed cycle that summed no account but carried no boundary error.
const NO_VALID_ACCOUNTS: &str = "NoValidAccounts";
use std::path::{Path, PathBuf};

/// Keeps per-domain series in a private registry and rewrites a node-exporter textfile on
/// every emit.
///
/// The registry lives only as long as the process, so every series describes the latest
/// cycle: `_last_failure{kind}` is a 0/1 gauge rather than a running counter.
pub struct PrometheusReporter {
    registry: Registry,
    usage_bytes: GaugeVec,
    accounts: IntGaugeVec,
    skipped_accounts: IntGaugeVec,
    up: IntGaugeVec,
    last_failure: IntGaugeVec,
    textfile_path: PathBuf,
}

fn report_error(e: prometheus::Error) -> QuotaError {
    QuotaError::Report {
        message: e.to_string(),
    }
}

impl PrometheusReporter {
    pub fn new(metric_name: &str, textfile_path: impl AsRef<Path>) -> Result<Self> {
        let prefix = metric_name.replace('.', "_");
        let registry = Registry::new();

        let usage_bytes = GaugeVec::new(
            Opts::new(format!("{}_bytes", prefix), "Storage used by all accounts of the domain"),
            &["domain"],
        )
        .map_err(report_error)?;
        let accounts = IntGaugeVec::new(
            Opts::new(format!("{}_accounts", prefix), "Accounts summed in the last cycle"),
            &["domain"],
        )
        .map_err(report_error)?;
        let skipped_accounts = IntGaugeVec::new(
            Opts::new(
                format!("{}_skipped_accounts", prefix),
                "Malformed or repeated account records skipped in the last cycle",
            ),
            &["domain"],
        )
        .map_err(report_error)?;
        let up = IntGaugeVec::new(
            Opts::new(format!("{}_up", prefix), "1 if the last cycle produced a usage value"),
            &["domain"],
        )
        .map_err(report_error)?;
        let last_failure = IntGaugeVec::new(
            Opts::new(
                format!("{}_last_failure", prefix),
                "1 for the failure kind of the last cycle if it failed",
            ),
            &["domain", "kind"],
        )
        .map_err(report_error)?;

        registry
            .register(Box::new(usage_bytes.clone()))
            .map_err(report_error)?;
        registry
            .register(Box::new(accounts.clone()))
            .map_err(report_error)?;
        registry
            .register(Box::new(skipped_accounts.clone()))
            .map_err(report_error)?;
        registry.register(Box::new(up.clone())).map_err(report_error)?;
        registry
            .register(Box::new(last_failure.clone()))
            .map_err(report_error)?;

        Ok(Self {
            registry,
            usage_bytes,
            accounts,
            skipped_accounts,
            up,
            last_failure,
            textfile_path: textfile_path.as_ref().to_path_buf(),
        })
    }

    fn record(&self, result: &DomainQuotaResult) {
        let domain = result.domain.as_str();

        self.accounts
            .with_label_values(&[domain])
            .set(i64::try_from(result.account_count).unwrap_or(i64::MAX));
        self.skipped_accounts
            .with_label_values(&[domain])
            .set(i64::try_from(result.skipped_count).unwrap_or(i64::MAX));

        if result.has_gauge() {
            // f64 is exact up to 2^53 bytes (8 PiB); larger totals are rounded
            self.usage_bytes
                .with_label_values(&[domain])
                .set(result.total_used_bytes as f64);
            self.up.with_label_values(&[domain]).set(1);
        } else {
            // 失敗時移除舊值，避免把過期的用量當成最新結果
            let _ = self.usage_bytes.remove_label_values(&[domain]);
            self.up.with_label_values(&[domain]).set(0);
        }

        for kind in ErrorKind::ALL
            .iter()
            .map(|k| k.as_str())
            .chain(std::iter::once(NO_VALID_ACCOUNTS))
        {
            let _ = self.last_failure.remove_label_values(&[domain, kind]);
        }
        if result.status == QuotaStatus::Failed {
            let kind = result
                .failure_kind()
                .map(|k| k.as_str())
                .unwrap_or(NO_VALID_ACCOUNTS);
            self.last_failure.with_label_values(&[domain, kind]).set(1);
        }
    }

    /// Text exposition of every series in the registry.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(report_error)?;
        String::from_utf8(buffer).map_err(|e| QuotaError::Report {
            message: e.to_string(),
        })
    }

    async fn write_textfile(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.textfile_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.textfile_path.with_extension("prom.tmp");
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.textfile_path).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricReporter for PrometheusReporter {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()> {
        self.record(result);
        let contents = self.render()?;

        tracing::debug!("Writing metrics to {}", self.textfile_path.display());
        self.write_textfile(&contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::QuotaError;
    use tempfile::TempDir;

    fn complete(domain: &str, total: u128) -> DomainQuotaResult {
        DomainQuotaResult {
            domain: domain.into(),
            total_used_bytes: total,
            account_count: 1,
            skipped_count: 0,
            status: QuotaStatus::Complete,
            failure: None,
        }
    }

    #[tokio::test]
    async fn test_writes_textfile_with_domain_label() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quota.prom");
        let reporter = PrometheusReporter::new("quota.usage", &path).unwrap();

        reporter.emit(&complete("example.com", 500)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("quota_usage_bytes{domain=\"example.com\"} 500"));
        assert!(contents.contains("quota_usage_up{domain=\"example.com\"} 1"));
        assert!(!dir.path().join("quota.prom.tmp").exists());
    }

    #[tokio::test]
    async fn test_failure_removes_usage_and_counts_kind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("quota.prom");
        let reporter = PrometheusReporter::new("quota.usage", &path).unwrap();

        reporter.emit(&complete("example.com", 500)).await.unwrap();
        reporter
            .emit(&DomainQuotaResult::failed(
                "example.com",
                &QuotaError::Auth {
                    message: "expired".into(),
                },
            ))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("quota_usage_bytes{domain=\"example.com\"}"));
        assert!(contents.contains("quota_usage_up{domain=\"example.com\"} 0"));
        assert!(contents
            .contains("quota_usage_last_failure{domain=\"example.com\",kind=\"AuthError\"} 1"));
    }

    #[tokio::test]
    async fn test_last_failure_tracks_latest_cycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quota.prom");
        let reporter = PrometheusReporter::new("quota.usage", &path).unwrap();
        let auth_failure = DomainQuotaResult::failed(
            "example.com",
            &QuotaError::Auth {
                message: "expired".into(),
            },
        );

        reporter.emit(&auth_failure).await.unwrap();
        reporter.emit(&auth_failure).await.unwrap();
        let rendered = reporter.render().unwrap();
        assert!(rendered
            .contains("quota_usage_last_failure{domain=\"example.com\",kind=\"AuthError\"} 1"));

        reporter
            .emit(&DomainQuotaResult::failed(
                "example.com",
                &QuotaError::Transport {
                    message: "503".into(),
                },
            ))
            .await
            .unwrap();
        let rendered = reporter.render().unwrap();
        assert!(!rendered.contains("kind=\"AuthError\""));
        assert!(rendered
            .contains("quota_usage_last_failure{domain=\"example.com\",kind=\"TransportError\"} 1"));

        reporter.emit(&complete("example.com", 500)).await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("quota_usage_last_failure{"));
        assert!(contents.contains("quota_usage_bytes{domain=\"example.com\"} 500"));
    }

    #[test]
    fn test_usage_above_f64_precision_is_rounded() {
        let dir = TempDir::new().unwrap();
        let reporter = PrometheusReporter::new("quota.usage", dir.path().join("q.prom")).unwrap();

        reporter.record(&complete("example.com", (1u128 << 53) + 1));

        let value = reporter.usage_bytes.with_label_values(&["example.com"]).get();
        assert_eq!(value, 9_007_199_254_740_992.0);
    }

    #[tokio::test]
    async fn test_domains_share_one_textfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quota.prom");
        let reporter = PrometheusReporter::new("quota.usage", &path).unwrap();

        reporter.emit(&complete("a.example.com", 10)).await.unwrap();
        reporter.emit(&complete("b.example.com", 20)).await.unwrap();

        let rendered = reporter.render().unwrap();
        assert!(rendered.contains("quota_usage_bytes{domain=\"a.example.com\"} 10"));
        assert!(rendered.contains("quota_usage_bytes{domain=\"b.example.com\"} 20"));
    }
}
