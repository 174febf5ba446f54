use crate::utils::error::{QuotaError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_METRIC_NAME: &str = "quota.usage";
pub const DEFAULT_STATSD_ADDRESS: &str = "127.0.0.1:8125";

/// A credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub init_config: InstanceSettings,
    #[serde(default)]
    pub instances: Vec<InstanceSettings>,
    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Keys accepted both in `[init_config]` and in each `[[instances]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceSettings {
    pub domain: Option<String>,
    pub endpoint_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub timeout_seconds: Option<u64>,
    pub page_size: Option<usize>,
    pub tls_verify: Option<bool>,
}

impl InstanceSettings {
    /// 實例設定優先，未設定的鍵再回退到共用設定
    fn overlay(&self, shared: &InstanceSettings) -> InstanceSettings {
        InstanceSettings {
            domain: self.domain.clone().or_else(|| shared.domain.clone()),
            endpoint_url: self.endpoint_url.clone().or_else(|| shared.endpoint_url.clone()),
            username: self.username.clone().or_else(|| shared.username.clone()),
            password: self.password.clone().or_else(|| shared.password.clone()),
            timeout_seconds: self.timeout_seconds.or(shared.timeout_seconds),
            page_size: self.page_size.or(shared.page_size),
            tls_verify: self.tls_verify.or(shared.tls_verify),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Log,
    Dogstatsd,
    Prometheus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterConfig {
    #[serde(default)]
    pub kind: ReporterKind,
    #[serde(default = "default_metric_name")]
    pub metric_name: String,
    #[serde(default = "default_statsd_address")]
    pub statsd_address: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub textfile_path: Option<String>,
}

fn default_metric_name() -> String {
    DEFAULT_METRIC_NAME.to_string()
}

fn default_statsd_address() -> String {
    DEFAULT_STATSD_ADDRESS.to_string()
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            kind: ReporterKind::default(),
            metric_name: default_metric_name(),
            statsd_address: default_statsd_address(),
            tags: Vec::new(),
            textfile_path: None,
        }
    }
}

impl Validate for ReporterConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_metric_name("reporter.metric_name", &self.metric_name)?;

        match self.kind {
            ReporterKind::Log => {}
            ReporterKind::Dogstatsd => {
                validation::validate_socket_address("reporter.statsd_address", &self.statsd_address)?;
                for tag in &self.tags {
                    validation::validate_non_empty_string("reporter.tags", tag)?;
                }
            }
            ReporterKind::Prometheus => {
                let path =
                    validation::validate_required_field("reporter.textfile_path", &self.textfile_path)?;
                validation::validate_path("reporter.textfile_path", path)?;
                // node_exporter 的 textfile collector 只讀取 *.prom
                validation::validate_file_extension("reporter.textfile_path", path, &["prom"])?;
            }
        }
        Ok(())
    }
}

/// Fully resolved settings for one domain's collection cycle.
#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub domain: String,
    pub endpoint_url: String,
    pub username: String,
    pub password: Secret,
    pub timeout: Duration,
    pub page_size: usize,
    pub tls_verify: bool,
}

impl CheckConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| QuotaError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| QuotaError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ADMIN_PASSWORD})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR
            .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    /// Merges `[init_config]` under instance `index` and validates the result.
    pub fn resolve_instance(&self, index: usize) -> Result<ResolvedInstance> {
        let instance = self
            .instances
            .get(index)
            .ok_or_else(|| QuotaError::MissingConfigError {
                field: format!("instances[{}]", index),
            })?;
        let merged = instance.overlay(&self.init_config);
        let field = |name: &str| format!("instances[{}].{}", index, name);

        let domain = validation::validate_required_field(&field("domain"), &merged.domain)?;
        validation::validate_non_empty_string(&field("domain"), domain)?;

        let endpoint_url =
            validation::validate_required_field(&field("endpoint_url"), &merged.endpoint_url)?;
        validation::validate_url(&field("endpoint_url"), endpoint_url)?;

        let username = validation::validate_required_field(&field("username"), &merged.username)?;
        validation::validate_non_empty_string(&field("username"), username)?;

        let password = validation::validate_required_field(&field("password"), &merged.password)?;
        validation::validate_non_empty_string(&field("password"), password.expose())?;

        let timeout_seconds = merged.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        validation::validate_range(&field("timeout_seconds"), timeout_seconds, 1, 3600)?;

        let page_size = merged.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        validation::validate_range(&field("page_size"), page_size, 1, 10_000)?;

        Ok(ResolvedInstance {
            domain: domain.trim().to_string(),
            endpoint_url: endpoint_url.clone(),
            username: username.clone(),
            password: password.clone(),
            timeout: Duration::from_secs(timeout_seconds),
            page_size,
            tls_verify: merged.tls_verify.unwrap_or(true),
        })
    }

    pub fn resolved_instances(&self) -> Result<Vec<ResolvedInstance>> {
        (0..self.instances.len())
            .map(|index| self.resolve_instance(index))
            .collect()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if self.instances.is_empty() {
            return Err(QuotaError::ConfigValidationError {
                field: "instances".to_string(),
                message: "at least one [[instances]] entry is required".to_string(),
            });
        }

        // 同一網域只能有一個實例，避免重疊收集
        let mut domains = HashSet::new();
        for instance in self.resolved_instances()? {
            if !domains.insert(instance.domain.to_ascii_lowercase()) {
                return Err(QuotaError::ConfigValidationError {
                    field: "instances".to_string(),
                    message: format!("domain '{}' is configured more than once", instance.domain),
                });
            }
        }

        self.reporter.validate()
    }
}

impl Validate for CheckConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[init_config]
endpoint_url = "https://mail.example.com:7071"
username = "admin@example.com"
password = "s3cret"

[[instances]]
domain = "example.com"
"#;

    #[test]
    fn test_parse_basic_config() {
        let config = CheckConfig::from_toml_str(BASIC).unwrap();
        config.validate().unwrap();

        let instance = config.resolve_instance(0).unwrap();
        assert_eq!(instance.domain, "example.com");
        assert_eq!(instance.endpoint_url, "https://mail.example.com:7071");
        assert_eq!(instance.username, "admin@example.com");
        assert_eq!(instance.password.expose(), "s3cret");
        assert_eq!(instance.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert_eq!(instance.page_size, DEFAULT_PAGE_SIZE);
        assert!(instance.tls_verify);
        assert_eq!(config.reporter.kind, ReporterKind::Log);
        assert_eq!(config.reporter.metric_name, "quota.usage");
    }

    #[test]
    fn test_instance_overrides_init_config() {
        let toml_content = r#"
[init_config]
endpoint_url = "https://shared.example.com:7071"
username = "admin"
password = "shared"
page_size = 100

[[instances]]
domain = "a.example.com"

[[instances]]
domain = "b.example.com"
endpoint_url = "https://other.example.com:7071"
password = "override"
tls_verify = false
"#;
        let config = CheckConfig::from_toml_str(toml_content).unwrap();
        let instances = config.resolved_instances().unwrap();

        assert_eq!(instances[0].endpoint_url, "https://shared.example.com:7071");
        assert_eq!(instances[0].password.expose(), "shared");
        assert_eq!(instances[1].endpoint_url, "https://other.example.com:7071");
        assert_eq!(instances[1].password.expose(), "override");
        assert_eq!(instances[1].page_size, 100);
        assert!(!instances[1].tls_verify);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("QUOTA_GAUGE_TEST_PASSWORD", "from-env");

        let toml_content = r#"
[init_config]
endpoint_url = "https://mail.example.com:7071"
username = "admin"
password = "${QUOTA_GAUGE_TEST_PASSWORD}"

[[instances]]
domain = "example.com"
"#;
        let config = CheckConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.resolve_instance(0).unwrap().password.expose(), "from-env");

        std::env::remove_var("QUOTA_GAUGE_TEST_PASSWORD");
    }

    #[test]
    fn test_unset_env_var_fails_validation() {
        let toml_content = r#"
[init_config]
endpoint_url = "https://mail.example.com:7071"
username = "admin"
password = "${QUOTA_GAUGE_TEST_UNSET_VARIABLE}"

[[instances]]
domain = "example.com"
"#;
        let config = CheckConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_domain_rejected() {
        let toml_content = r#"
[init_config]
endpoint_url = "https://mail.example.com:7071"
username = "admin"
password = "pw"

[[instances]]
page_size = 10
"#;
        let config = CheckConfig::from_toml_str(toml_content).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, QuotaError::MissingConfigError { ref field } if field == "instances[0].domain"));
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_url = BASIC.replace("https://mail.example.com:7071", "mail.example.com");
        assert!(CheckConfig::from_toml_str(&bad_url).unwrap().validate().is_err());

        let bad_page = format!("{}page_size = 0\n", BASIC);
        assert!(CheckConfig::from_toml_str(&bad_page).unwrap().validate().is_err());

        let no_instances = r#"
[init_config]
endpoint_url = "https://mail.example.com:7071"
"#;
        assert!(CheckConfig::from_toml_str(no_instances).unwrap().validate().is_err());
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let toml_content = format!("{}\n[[instances]]\ndomain = \"EXAMPLE.com\"\n", BASIC);
        let config = CheckConfig::from_toml_str(&toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(QuotaError::ConfigValidationError { .. })
        ));
    }

    #[test]
    fn test_reporter_validation() {
        let prometheus_without_path = format!("{}\n[reporter]\nkind = \"prometheus\"\n", BASIC);
        assert!(CheckConfig::from_toml_str(&prometheus_without_path)
            .unwrap()
            .validate()
            .is_err());

        let prometheus = format!(
            "{}\n[reporter]\nkind = \"prometheus\"\ntextfile_path = \"/tmp/quota.prom\"\n",
            BASIC
        );
        assert!(CheckConfig::from_toml_str(&prometheus).unwrap().validate().is_ok());

        let statsd = format!(
            "{}\n[reporter]\nkind = \"dogstatsd\"\nstatsd_address = \"nope\"\n",
            BASIC
        );
        assert!(CheckConfig::from_toml_str(&statsd).unwrap().validate().is_err());
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let config = CheckConfig::from_toml_str(BASIC).unwrap();
        let instance = config.resolve_instance(0).unwrap();
        let rendered = format!("{:?}", instance);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("Secret(***)"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = CheckConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.instances.len(), 1);

        assert!(CheckConfig::from_file("/nonexistent/quota-gauge.toml").is_err());
    }
}
