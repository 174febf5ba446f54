use crate::utils::error::{ErrorKind, QuotaError};
use serde::{Deserialize, Serialize};

/// One account entry exactly as the admin API returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawAccountRecord {
    pub data: serde_json::Value,
}

impl From<serde_json::Value> for RawAccountRecord {
    fn from(data: serde_json::Value) -> Self {
        Self { data }
    }
}

/// A validated account quota entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountQuota {
    pub account_id: String,
    pub used_bytes: u64,
}

impl AccountQuota {
    /// Validates a raw record. The account id is taken from `id`, falling back to `name`.
    pub fn from_raw(record: &RawAccountRecord) -> Result<Self, QuotaError> {
        let obj = record
            .data
            .as_object()
            .ok_or_else(|| QuotaError::MalformedRecord {
                account: None,
                reason: "record is not an object".to_string(),
            })?;

        let account_id = ["id", "name"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| QuotaError::MalformedRecord {
                account: None,
                reason: "missing account id".to_string(),
            })?
            .to_string();

        let used_bytes = match obj.get("used") {
            Some(value) => parse_used_bytes(value).map_err(|reason| QuotaError::MalformedRecord {
                account: Some(account_id.clone()),
                reason,
            })?,
            None => {
                return Err(QuotaError::MalformedRecord {
                    account: Some(account_id),
                    reason: "missing 'used' field".to_string(),
                })
            }
        };

        Ok(Self {
            account_id,
            used_bytes,
        })
    }
}

fn parse_used_bytes(value: &serde_json::Value) -> Result<u64, String> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("'used' must be a non-negative integer, got {}", n)),
        serde_json::Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
            .parse::<u64>()
            .map_err(|e| format!("'used' is out of range: {}", e)),
        other => Err(format!("'used' is not numeric: {}", other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuotaStatus {
    Complete,
    PartialSuccess,
    Failed,
}

impl QuotaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaStatus::Complete => "complete",
            QuotaStatus::PartialSuccess => "partial_success",
            QuotaStatus::Failed => "failed",
        }
    }
}

/// Why a cycle failed at the boundary rather than at record level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&QuotaError> for Failure {
    fn from(error: &QuotaError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainQuotaResult {
    pub domain: String,
    pub total_used_bytes: u128,
    pub account_count: u64,
    pub skipped_count: u64,
    pub status: QuotaStatus,
    pub failure: Option<Failure>,
}

impl DomainQuotaResult {
    /// A zeroed `Failed` result that records the boundary error.
    pub fn failed(domain: &str, error: &QuotaError) -> Self {
        Self {
            domain: domain.to_string(),
            total_used_bytes: 0,
            account_count: 0,
            skipped_count: 0,
            status: QuotaStatus::Failed,
            failure: Some(Failure::from(error)),
        }
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn is_degraded(&self) -> bool {
        self.status != QuotaStatus::Complete
    }

    /// A gauge value is only meaningful when at least one account was summed.
    pub fn has_gauge(&self) -> bool {
        self.status != QuotaStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawAccountRecord {
        RawAccountRecord::from(value)
    }

    #[test]
    fn test_parse_valid_record() {
        let account =
            AccountQuota::from_raw(&raw(json!({"id": "a", "name": "a@example.com", "used": 1000})))
                .unwrap();
        assert_eq!(account.account_id, "a");
        assert_eq!(account.used_bytes, 1000);
    }

    #[test]
    fn test_name_used_when_id_missing() {
        let account = AccountQuota::from_raw(&raw(json!({"name": "b@example.com", "used": "2048"})))
            .unwrap();
        assert_eq!(account.account_id, "b@example.com");
        assert_eq!(account.used_bytes, 2048);
    }

    #[test]
    fn test_rejects_malformed_used() {
        for used in [json!("bad"), json!(-1), json!(1.5), json!(null), json!(true), json!("")] {
            let err = AccountQuota::from_raw(&raw(json!({"id": "c", "used": used}))).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedRecordError);
        }
    }

    #[test]
    fn test_rejects_missing_fields() {
        assert!(AccountQuota::from_raw(&raw(json!({"id": "d"}))).is_err());
        assert!(AccountQuota::from_raw(&raw(json!({"used": 10}))).is_err());
        assert!(AccountQuota::from_raw(&raw(json!([1, 2]))).is_err());
    }

    #[test]
    fn test_failed_result_keeps_error_kind() {
        let result = DomainQuotaResult::failed(
            "example.com",
            &QuotaError::DomainNotFound {
                domain: "example.com".into(),
            },
        );
        assert_eq!(result.status, QuotaStatus::Failed);
        assert_eq!(result.total_used_bytes, 0);
        assert_eq!(result.failure_kind(), Some(ErrorKind::DomainNotFoundError));
        assert!(!result.has_gauge());
        assert!(result.is_degraded());
    }

    #[test]
    fn test_only_complete_is_not_degraded() {
        let complete = DomainQuotaResult {
            domain: "example.com".into(),
            total_used_bytes: 500,
            account_count: 1,
            skipped_count: 0,
            status: QuotaStatus::Complete,
            failure: None,
        };
        assert!(!complete.is_degraded());

        let partial = DomainQuotaResult {
            skipped_count: 1,
            status: QuotaStatus::PartialSuccess,
            ..complete.clone()
        };
        assert!(partial.is_degraded());
        assert!(partial.has_gauge());
    }
}
