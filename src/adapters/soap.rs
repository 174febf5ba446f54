use crate::config::{ResolvedInstance, Secret};
use crate::domain::model::RawAccountRecord;
use crate::domain::ports::{AdminSession, RecordStream};
use crate::utils::error::{QuotaError, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

const SOAP_PATH: &str = "/service/admin/soap";
const ADMIN_NAMESPACE: &str = "urn:zimbraAdmin";
const CONTEXT_NAMESPACE: &str = "urn:zimbra";

/// Admin session over the JSON flavour of the groupware SOAP admin API.
pub struct SoapAdminSession {
    client: Client,
    soap_url: Url,
    username: String,
    password: Secret,
    page_size: usize,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "authToken")]
    auth_token: TokenField,
    lifetime: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenField {
    Plain(String),
    Content(Content),
    List(Vec<Content>),
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "_content")]
    content: String,
}

impl TokenField {
    fn into_token(self) -> Option<String> {
        let token = match self {
            TokenField::Plain(token) => Some(token),
            TokenField::Content(c) => Some(c.content),
            TokenField::List(list) => list.into_iter().next().map(|c| c.content),
        };
        token.filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct QuotaUsagePage {
    #[serde(default)]
    account: Vec<Value>,
    #[serde(default)]
    more: bool,
    #[serde(rename = "searchTotal")]
    search_total: Option<u64>,
}

impl SoapAdminSession {
    pub fn new(instance: &ResolvedInstance) -> Result<Self> {
        if !instance.tls_verify {
            tracing::warn!("⚠️ TLS certificate verification disabled for {}", instance.endpoint_url);
        }

        let client = Client::builder()
            .timeout(instance.timeout)
            .danger_accept_invalid_certs(!instance.tls_verify)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            soap_url: soap_url(&instance.endpoint_url)?,
            username: instance.username.clone(),
            password: instance.password.clone(),
            page_size: instance.page_size,
            auth_token: None,
        })
    }

    pub fn soap_url(&self) -> &Url {
        &self.soap_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    async fn call(
        &self,
        request_name: &str,
        request: Value,
        token: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Value> {
        let envelope = build_envelope(request_name, request, token);

        tracing::debug!("Making {} to: {}", request_name, self.soap_url);
        let response = self
            .client
            .post(self.soap_url.clone())
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("{} response status: {}", request_name, status);
        let text = response.text().await?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(QuotaError::MalformedResponse {
                    message: format!("{} returned a non-JSON body: {}", request_name, e),
                })
            }
            Err(_) => {
                return Err(QuotaError::Transport {
                    message: format!("{} failed with HTTP {}", request_name, status),
                })
            }
        };

        if let Some(fault) = body.pointer("/Body/Fault") {
            return Err(fault_error(fault, domain));
        }
        if !status.is_success() {
            return Err(QuotaError::Transport {
                message: format!("{} failed with HTTP {}", request_name, status),
            });
        }

        let response_name = request_name.replace("Request", "Response");
        body.pointer(&format!("/Body/{}", response_name))
            .cloned()
            .ok_or_else(|| QuotaError::MalformedResponse {
                message: format!("response has no Body.{}", response_name),
            })
    }

    async fn fetch_page(&self, token: &str, domain: &str, offset: usize) -> Result<QuotaUsagePage> {
        let request = json!({
            "domain": domain,
            "limit": self.page_size,
            "offset": offset,
            "sortBy": "account",
            "sortAscending": true,
        });

        let response = self
            .call("GetQuotaUsageRequest", request, Some(token), Some(domain))
            .await?;
        let page: QuotaUsagePage =
            serde_json::from_value(response).map_err(|e| QuotaError::MalformedResponse {
                message: format!("GetQuotaUsageResponse: {}", e),
            })?;

        tracing::debug!(
            "Fetched {} accounts for {} at offset {} (more: {})",
            page.account.len(),
            domain,
            offset,
            page.more
        );
        Ok(page)
    }

    async fn next_page(
        &self,
        token: &str,
        domain: &str,
        cursor: Option<usize>,
    ) -> Result<Option<(Vec<Value>, Option<usize>)>> {
        let Some(offset) = cursor else {
            return Ok(None);
        };
        let page = self.fetch_page(token, domain, offset).await?;
        let next = next_offset(offset, &page)?;
        Ok(Some((page.account, next)))
    }
}

#[async_trait]
impl AdminSession for SoapAdminSession {
    async fn authenticate(&mut self) -> Result<()> {
        let request = json!({
            "name": self.username,
            "password": self.password.expose(),
        });

        let response = self.call("AuthRequest", request, None, None).await?;
        let auth: AuthResponse =
            serde_json::from_value(response).map_err(|e| QuotaError::MalformedResponse {
                message: format!("AuthResponse: {}", e),
            })?;

        let token = auth
            .auth_token
            .into_token()
            .ok_or_else(|| QuotaError::MalformedResponse {
                message: "AuthResponse carried no authToken".to_string(),
            })?;

        if let Some(lifetime) = auth.lifetime {
            tracing::debug!("Admin token lifetime: {} ms", lifetime);
        }
        tracing::info!("🔐 Authenticated to {} as {}", self.soap_url, self.username);
        self.auth_token = Some(token);
        Ok(())
    }

    async fn fetch_domain_quota<'a>(&'a self, domain: &str) -> Result<RecordStream<'a>> {
        let token = self
            .auth_token
            .clone()
            .ok_or_else(|| QuotaError::Auth {
                message: "session is not authenticated".to_string(),
            })?;

        // 第一頁同步取得，網域不存在或授權錯誤會直接回傳錯誤
        let first = self.fetch_page(&token, domain, 0).await?;
        if let Some(total) = first.search_total {
            tracing::info!("📥 {} reports {} accounts", domain, total);
        }
        let next = next_offset(0, &first)?;

        let domain = domain.to_string();
        let remaining = stream::try_unfold(next, move |cursor| {
            let token = token.clone();
            let domain = domain.clone();
            async move { self.next_page(&token, &domain, cursor).await }
        })
        .map_ok(|accounts| stream::iter(into_records(accounts)))
        .try_flatten();

        Ok(stream::iter(into_records(first.account))
            .chain(remaining)
            .boxed())
    }
}

fn into_records(accounts: Vec<Value>) -> impl Iterator<Item = Result<RawAccountRecord>> {
    accounts.into_iter().map(|data| Ok(RawAccountRecord::from(data)))
}

fn next_offset(offset: usize, page: &QuotaUsagePage) -> Result<Option<usize>> {
    if !page.more {
        return Ok(None);
    }
    if page.account.is_empty() {
        return Err(QuotaError::MalformedResponse {
            message: format!(
                "page at offset {} reported more results but carried no accounts",
                offset
            ),
        });
    }
    Ok(Some(offset + page.account.len()))
}

fn soap_url(endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| QuotaError::InvalidConfigValueError {
        field: "endpoint_url".to_string(),
        value: endpoint.to_string(),
        reason: format!("Invalid URL format: {}", e),
    })?;

    let base = url.path().trim_end_matches('/').to_string();
    if !base.ends_with(SOAP_PATH) {
        url.set_path(&format!("{}{}", base, SOAP_PATH));
    }
    Ok(url)
}

fn build_envelope(request_name: &str, mut request: Value, token: Option<&str>) -> Value {
    if let Some(obj) = request.as_object_mut() {
        obj.insert("_jsns".to_string(), json!(ADMIN_NAMESPACE));
    }

    let mut body = Map::new();
    body.insert(request_name.to_string(), request);

    let mut envelope = Map::new();
    if let Some(token) = token {
        envelope.insert(
            "Header".to_string(),
            json!({ "context": { "_jsns": CONTEXT_NAMESPACE, "authToken": token } }),
        );
    }
    envelope.insert("Body".to_string(), Value::Object(body));
    Value::Object(envelope)
}

fn fault_error(fault: &Value, domain: Option<&str>) -> QuotaError {
    let code = fault
        .pointer("/Detail/Error/Code")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let reason = fault
        .pointer("/Reason/Text")
        .and_then(Value::as_str)
        .unwrap_or("no reason given");

    match code {
        "account.AUTH_FAILED" | "service.AUTH_EXPIRED" | "service.AUTH_REQUIRED"
        | "service.PERM_DENIED" => QuotaError::Auth {
            message: format!("{}: {}", code, reason),
        },
        "account.NO_SUCH_DOMAIN" => QuotaError::DomainNotFound {
            domain: domain.unwrap_or(reason).to_string(),
        },
        _ => QuotaError::Transport {
            message: format!("{}: {}", code, reason),
        },
    }
}
