use super::degradation_summary;
use crate::domain::model::{DomainQuotaResult, QuotaStatus};
use crate::domain::ports::MetricReporter;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::net::UdpSocket;

/// Sends DogStatsD datagrams: a gauge per cycle and an event for degraded cycles.
pub struct DogStatsdReporter {
    socket: UdpSocket,
    metric_name: String,
    tags: Vec<String>,
}

impl DogStatsdReporter {
    pub async fn connect(address: &str, metric_name: &str, tags: Vec<String>) -> Result<Self> {
        let bind_address = if address.starts_with('[') {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind_address).await?;
        socket.connect(address).await?;
        tracing::debug!("DogStatsD reporter sending to {}", address);

        Ok(Self {
            socket,
            metric_name: metric_name.to_string(),
            tags,
        })
    }

    fn tag_list(&self, domain: &str) -> String {
        std::iter::once(format!("domain:{}", domain))
            .chain(self.tags.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn gauge_datagram(&self, result: &DomainQuotaResult) -> String {
        format!(
            "{}:{}|g|#{}",
            self.metric_name,
            result.total_used_bytes,
            self.tag_list(&result.domain)
        )
    }

    fn event_datagram(&self, result: &DomainQuotaResult, timestamp: i64) -> Option<String> {
        if !result.is_degraded() {
            return None;
        }
        let (title, alert_type) = if result.status == QuotaStatus::Failed {
            (
                format!("Quota collection failed for {}", result.domain),
                "error",
            )
        } else {
            (
                format!("Quota collection degraded for {}", result.domain),
                "warning",
            )
        };
        let text = degradation_summary(result).replace('\n', "\\n");

        Some(format!(
            "_e{{{},{}}}:{}|{}|d:{}|t:{}|#{}",
            title.len(),
            text.len(),
            title,
            text,
            timestamp,
            alert_type,
            self.tag_list(&result.domain)
        ))
    }
}

#[async_trait]
impl MetricReporter for DogStatsdReporter {
    async fn emit(&self, result: &DomainQuotaResult) -> Result<()> {
        if result.has_gauge() {
            let datagram = self.gauge_datagram(result);
            tracing::debug!("DogStatsD -> {}", datagram);
            self.socket.send(datagram.as_bytes()).await?;
        }

        if let Some(event) = self.event_datagram(result, Utc::now().timestamp()) {
            tracing::debug!("DogStatsD -> {}", event);
            self.socket.send(event.as_bytes()).await?;
        }
        Ok(())
    }
}
