//! REST client
//!
//! Thin layer over the injected [`HttpClient`]: resolves request paths
//! against the instance URL, attaches the bearer token and JSON headers, and
//! decodes responses.

use bridge_traits::http::{HttpClient, HttpRequest};
use bytes::Bytes;
use core_runtime::logging::strip_host;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{RestError, Result};
use crate::request::RestRequest;
use crate::types::QueryResponse;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Response of one REST call, any status
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as JSON, `Value::Null` when empty.
    pub fn as_value(&self) -> Result<Value> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-success status into [`RestError::ApiError`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RestError::ApiError {
                status_code: self.status,
                message: self.text(),
            })
        }
    }
}

/// REST client bound to one instance and API version
///
/// # Example
///
/// ```ignore
/// use provider_rest::{RestClient, RestRequest};
///
/// let client = RestClient::new(http_client, "https://example.my.salesforce.com", "v60.0", token);
/// let response = client
///     .send(RestRequest::retrieve(client.api_version(), "Account", "001", &[]))
///     .await?;
/// ```
#[derive(Clone)]
pub struct RestClient {
    http_client: Arc<dyn HttpClient>,
    instance_url: String,
    api_version: String,
    access_token: String,
}

impl RestClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        instance_url: impl Into<String>,
        api_version: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            access_token: access_token.into(),
        }
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    fn to_http_request(&self, request: &RestRequest) -> Result<HttpRequest> {
        let mut http = HttpRequest::new(
            request.method,
            format!("{}{}", self.instance_url, request.path),
        )
        .bearer_token(self.access_token.as_str())
        .header("Accept", "application/json")
        .timeout(REQUEST_TIMEOUT);

        if let Some(body) = &request.body {
            http = http.json(body)?;
        }

        Ok(http)
    }

    /// Send a request. Non-success statuses are returned, not raised.
    ///
    /// # Errors
    ///
    /// Only transport failures (no response at all) are errors.
    #[instrument(skip(self, request), fields(method = %request.method, path = %strip_host(&request.path)))]
    pub async fn send(&self, request: RestRequest) -> Result<RestResponse> {
        let http_request = self.to_http_request(&request)?;
        let response = self.http_client.execute(http_request).await?;

        if response.is_success() {
            debug!(status = response.status, "REST call succeeded");
        } else {
            warn!(status = response.status, "REST call returned non-success status");
        }

        Ok(RestResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    /// Send and fail on any non-success status.
    pub async fn send_checked(&self, request: RestRequest) -> Result<RestResponse> {
        self.send(request).await?.error_for_status()
    }

    /// Run a query and follow `nextRecordsUrl` until done.
    #[instrument(skip(self))]
    pub async fn query_all(&self, soql: &str) -> Result<Vec<Value>> {
        let mut page: QueryResponse = self
            .send_checked(RestRequest::query(&self.api_version, soql))
            .await?
            .json()?;
        let mut records = std::mem::take(&mut page.records);

        while let (false, Some(next)) = (page.done, page.next_records_url.take()) {
            debug!(fetched = records.len(), total = page.total_size, "Fetching next query page");
            page = self
                .send_checked(RestRequest::new(
                    bridge_traits::http::HttpMethod::Get,
                    next,
                    None,
                ))
                .await?
                .json()?;
            records.append(&mut page.records);
        }

        Ok(records)
    }
}
