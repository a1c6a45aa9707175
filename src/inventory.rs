use crate::config::InventoryConfig;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const REQUEST_TIMEOUT_SECS: u64 = 60;
const DEVICES_PATH: &str = "api/1.0/devices/";
const IPS_PATH: &str = "api/1.0/ips/";
const IP_CUSTOM_FIELDS_PATH: &str = "api/1.0/custom_fields/ip_address/";
const DOQL_PATH: &str = "services/data/v1.0/query/";
const TAG_SEPARATOR: &str = ", ";

/// One row of the device/IP query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryRecord {
    pub ipaddress_pk: Option<u64>,
    pub ip_address: Option<String>,
    pub ipaddress_tags: Option<String>,
    pub device_pk: Option<u64>,
    pub name: Option<String>,
    pub device_tags: Option<String>,
}

impl InventoryRecord {
    pub fn device_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn ip_address(&self) -> &str {
        self.ip_address.as_deref().unwrap_or("")
    }

    pub fn device_tags(&self) -> &str {
        self.device_tags.as_deref().unwrap_or("")
    }

    pub fn ipaddress_tags(&self) -> &str {
        self.ipaddress_tags.as_deref().unwrap_or("")
    }
}

/// Entity a tag update applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    Device(String),
    IpAddress(String),
}

impl TagTarget {
    fn path(&self) -> &'static str {
        match self {
            Self::Device(_) => DEVICES_PATH,
            Self::IpAddress(_) => IPS_PATH,
        }
    }

    fn key(&self) -> (&'static str, &str) {
        match self {
            Self::Device(name) => ("name", name),
            Self::IpAddress(ip) => ("ipaddress", ip),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
}

/// Source of records to probe and sink for the results.
///
/// Updates are best effort: they return `false` on any failure and never
/// leave an error for the caller to handle.
#[async_trait]
pub trait Inventory {
    async fn records(&self) -> Result<Vec<InventoryRecord>>;

    async fn set_tags(&self, target: &TagTarget, existing_tags: &str, new_tags: &str) -> bool;

    async fn set_custom_field(&self, record_id: u64, key: &str, value: &str, notes: &str) -> bool;
}

/// REST client for a Device42-style inventory.
#[derive(Debug, Clone)]
pub struct InventoryClient {
    client: Client,
    base_url: String,
    user: String,
    password: String,
    query: String,
}

impl InventoryClient {
    pub fn new(config: &InventoryConfig) -> Result<Self> {
        log::debug!("[inventory] new: url={} user={}", config.url, config.user);

        // Inventory appliances commonly run with self-signed certificates
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .wrap_err("Failed to build inventory HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            query: config.query().to_string(),
        })
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        params: &T,
    ) -> Result<serde_json::Value> {
        let path = if method == Method::GET {
            path.to_string()
        } else {
            with_trailing_slash(path)
        };
        let url = format!("{}/{}", self.base_url, path);

        log::trace!("[inventory] request: method={} url={}", method, url);
        let request_start = Instant::now();

        let request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&self.user, Some(&self.password));
        let request = if method == Method::GET {
            request.query(params)
        } else {
            request.form(params)
        };

        let response = request
            .send()
            .await
            .wrap_err_with(|| format!("{} {} failed", method, path))?;

        let status = response.status();
        log::trace!("[inventory] response: method={} path={} status={} duration={}ms",
            method, path, status, request_start.elapsed().as_millis());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            eyre::bail!("HTTP {} ({}) Error {}: {}", method, path, status, body.trim());
        }

        response
            .json()
            .await
            .wrap_err_with(|| format!("Invalid JSON in response to {} {}", method, path))
    }

    /// Run a DOQL query and decode the rows.
    pub async fn doql(&self, query: &str) -> Result<Vec<InventoryRecord>> {
        log::debug!("[inventory] doql: query_len={}", query.len());

        let params = [("output_type", "json"), ("query", query)];
        let value = self.send(Method::POST, DOQL_PATH, &params).await?;
        let records: Vec<InventoryRecord> =
            serde_json::from_value(value).wrap_err("Unexpected DOQL result shape")?;

        log::debug!("[inventory] doql_completed: records={}", records.len());
        Ok(records)
    }

    async fn update(&self, method: Method, path: &str, params: &[(&str, &str)]) -> bool {
        match self.send(method.clone(), path, params).await {
            Ok(value) => {
                let ok = api_succeeded(&value);
                if !ok {
                    log::warn!("[inventory] update_rejected: method={} path={} response={}", method, path, value);
                }
                ok
            }
            Err(e) => {
                log::error!("[inventory] update_failed: method={} path={} error={:#}", method, path, e);
                false
            }
        }
    }
}

#[async_trait]
impl Inventory for InventoryClient {
    async fn records(&self) -> Result<Vec<InventoryRecord>> {
        self.doql(&self.query).await
    }

    async fn set_tags(&self, target: &TagTarget, existing_tags: &str, new_tags: &str) -> bool {
        let tags = merge_tags(existing_tags, new_tags);
        let (key, value) = target.key();
        log::debug!("[inventory] set_tags: {}={} tags={}", key, value, tags);

        let params = [(key, value), ("tags", tags.as_str())];
        self.update(Method::POST, target.path(), &params).await
    }

    async fn set_custom_field(&self, record_id: u64, key: &str, value: &str, notes: &str) -> bool {
        log::debug!("[inventory] set_custom_field: id={} key={} value={}", record_id, key, value);

        let id = record_id.to_string();
        let params = [("id", id.as_str()), ("key", key), ("value", value), ("notes", notes)];
        self.update(Method::PUT, IP_CUSTOM_FIELDS_PATH, &params).await
    }
}

/// Append `new_tags` to an existing comma separated tag list.
pub fn merge_tags(existing_tags: &str, new_tags: &str) -> String {
    if existing_tags.trim().is_empty() {
        new_tags.to_string()
    } else if existing_tags.split(',').any(|tag| tag.trim() == new_tags.trim()) {
        existing_tags.to_string()
    } else {
        format!("{}{}{}", existing_tags, TAG_SEPARATOR, new_tags)
    }
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

fn api_succeeded(value: &serde_json::Value) -> bool {
    serde_json::from_value::<ApiResponse>(value.clone())
        .map(|response| response.code == 0)
        .unwrap_or(false)
}
