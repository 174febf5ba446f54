use crate::utils::error::{QuotaError, Result};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(QuotaError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_file_extension(field_name: &str, file: &str, allowed_extensions: &[&str]) -> Result<()> {
    match std::path::Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some(extension) if allowed_extensions.contains(&extension) => Ok(()),
        Some(extension) => Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: format!(
                "Unsupported file extension: {}. Allowed extensions: {}",
                extension,
                allowed_extensions.join(", ")
            ),
        }),
        None => Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: "File has no extension or invalid filename".to_string(),
        }),
    }
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| QuotaError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    // 未被替換的 ${VAR} 代表環境變數缺失
    if value.starts_with("${") && value.ends_with('}') {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Environment variable is not set".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// Accepts `host:port` or `[v6]:port`; the host is not resolved here.
pub fn validate_socket_address(field_name: &str, address: &str) -> Result<()> {
    let invalid = |reason: &str| QuotaError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("Expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("Host cannot be empty"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("Port must be between 1 and 65535")),
        Ok(_) => Ok(()),
    }
}

pub fn validate_metric_name(field_name: &str, name: &str) -> Result<()> {
    static METRIC_NAME: OnceLock<Regex> = OnceLock::new();
    let pattern = METRIC_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("metric name pattern is valid")
    });

    if !pattern.is_match(name) {
        return Err(QuotaError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: name.to_string(),
            reason: "Metric names may contain only letters, digits, '_' and '.'".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("endpoint_url", "https://mail.example.com:7071").is_ok());
        assert!(validate_url("endpoint_url", "http://10.0.0.51:7071").is_ok());
        assert!(validate_url("endpoint_url", "").is_err());
        assert!(validate_url("endpoint_url", "invalid-url").is_err());
        assert!(validate_url("endpoint_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("page_size", 500usize, 1, 10_000).is_ok());
        assert!(validate_range("page_size", 0usize, 1, 10_000).is_err());
        assert!(validate_range("timeout_seconds", 3601u64, 1, 3600).is_err());
    }

    #[test]
    fn test_validate_file_extension() {
        assert!(validate_file_extension("textfile_path", "/var/lib/quota.prom", &["prom"]).is_ok());
        assert!(validate_file_extension("textfile_path", "/var/lib/quota.txt", &["prom"]).is_err());
        assert!(validate_file_extension("textfile_path", "/var/lib/quota", &["prom"]).is_err());
    }

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("username", "admin").is_ok());
        assert!(validate_non_empty_string("username", "   ").is_err());
        assert!(validate_non_empty_string("password", "${ADMIN_PASS}").is_err());
    }

    #[test]
    fn test_validate_socket_address() {
        assert!(validate_socket_address("statsd_address", "127.0.0.1:8125").is_ok());
        assert!(validate_socket_address("statsd_address", "statsd.local:8125").is_ok());
        assert!(validate_socket_address("statsd_address", "[::1]:8125").is_ok());
        assert!(validate_socket_address("statsd_address", "127.0.0.1").is_err());
        assert!(validate_socket_address("statsd_address", ":8125").is_err());
        assert!(validate_socket_address("statsd_address", "host:0").is_err());
    }

    #[test]
    fn test_validate_metric_name() {
        assert!(validate_metric_name("metric_name", "quota.usage").is_ok());
        assert!(validate_metric_name("metric_name", "zmail_quota").is_ok());
        assert!(validate_metric_name("metric_name", "9quota").is_err());
        assert!(validate_metric_name("metric_name", "quota usage").is_err());
    }
}
