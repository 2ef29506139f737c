//! # Engine Configuration
//!
//! Builder-style configuration for the sync engine.
//!
//! ## Overview
//!
//! [`EngineConfig`] gathers the REST endpoint, credentials, the injected
//! bridges and the tuning knobs. [`EngineConfigBuilder::build`] validates
//! everything up front so a misconfigured host fails before the first sync.
//!
//! ## Required
//!
//! - `instance_url` - `https://` base of the data service instance
//! - `access_token` - OAuth bearer token
//! - `LocalStore` - record store bridge
//!
//! ## Optional (with defaults)
//!
//! - `HttpClient` - desktop default: reqwest (`desktop-shims` feature)
//! - `Clock` - system clock
//! - `api_version` - `v60.0`
//! - `page_size` - dirty-id page size, 2000
//! - `logging` - when set, the service installs the global subscriber
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .instance_url("https://example.my.salesforce.com")
//!     .access_token(token)
//!     .local_store(Arc::new(MyStore::open()?))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::{Clock, HttpClient, LocalStore, SystemClock};
use std::sync::Arc;

/// Default REST API version segment
pub const DEFAULT_API_VERSION: &str = "v60.0";

/// Default page size when enumerating dirty rows
pub const DEFAULT_PAGE_SIZE: usize = 2000;

const MAX_PAGE_SIZE: usize = 10_000;

/// Validated engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Instance base URL without trailing slash
    pub instance_url: String,
    /// API version segment, e.g. `v60.0`
    pub api_version: String,
    pub access_token: String,
    pub http_client: Arc<dyn HttpClient>,
    pub local_store: Arc<dyn LocalStore>,
    pub clock: Arc<dyn Clock>,
    /// Rows fetched per dirty-id query
    pub page_size: usize,
    pub event_buffer_size: usize,
    pub logging: Option<LoggingConfig>,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .field("access_token", &"[REDACTED]")
            .field("http_client", &"HttpClient { ... }")
            .field("local_store", &"LocalStore { ... }")
            .field("page_size", &self.page_size)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("logging", &self.logging)
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Checks value ranges and formats.
    pub fn validate(&self) -> Result<()> {
        if !(self.instance_url.starts_with("https://") || self.instance_url.starts_with("http://"))
        {
            return Err(Error::InvalidValue {
                field: "instance_url".to_string(),
                message: format!("expected an http(s) URL, got '{}'", self.instance_url),
            });
        }

        if self.access_token.trim().is_empty() {
            return Err(Error::Config("Access token cannot be empty".to_string()));
        }

        if !self.api_version.starts_with('v') {
            return Err(Error::InvalidValue {
                field: "api_version".to_string(),
                message: format!("expected a value like 'v60.0', got '{}'", self.api_version),
            });
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidValue {
                field: "page_size".to_string(),
                message: format!("must be between 1 and {}", MAX_PAGE_SIZE),
            });
        }

        if self.event_buffer_size == 0 {
            return Err(Error::InvalidValue {
                field: "event_buffer_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn local_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LocalStore".to_string(),
        message: "A LocalStore implementation is required to read and rewrite records. \
                 Desktop: bridge_desktop::MemoryRecordStore or a host-backed store. \
                 Mobile: inject the platform store adapter."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: enable the 'desktop-shims' feature. \
                 Mobile: inject the platform-native adapter."
            .to_string(),
    })
}

/// Builder for [`EngineConfig`]
#[derive(Default)]
pub struct EngineConfigBuilder {
    instance_url: Option<String>,
    api_version: Option<String>,
    access_token: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    local_store: Option<Arc<dyn LocalStore>>,
    clock: Option<Arc<dyn Clock>>,
    page_size: Option<usize>,
    event_buffer_size: Option<usize>,
    logging: Option<LoggingConfig>,
}

impl EngineConfigBuilder {
    /// Trailing slashes are dropped.
    pub fn instance_url(mut self, url: impl Into<String>) -> Self {
        self.instance_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Validate and assemble the configuration.
    ///
    /// # Errors
    ///
    /// - `Config` when the instance URL or access token is missing
    /// - `CapabilityMissing` when no `LocalStore` (or, without
    ///   `desktop-shims`, no `HttpClient`) was injected
    /// - `InvalidValue` for out-of-range settings
    pub fn build(self) -> Result<EngineConfig> {
        let instance_url = self.instance_url.ok_or_else(|| {
            Error::Config("Instance URL is required. Use .instance_url() to set it.".to_string())
        })?;

        let access_token = self.access_token.ok_or_else(|| {
            Error::Config("Access token is required. Use .access_token() to set it.".to_string())
        })?;

        let local_store = self.local_store.ok_or_else(local_store_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = EngineConfig {
            instance_url,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            access_token,
            http_client,
            local_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            logging: self.logging,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::store::{DirtyParentQuery, Record, TransactionId};

    struct NullHttpClient;

    #[async_trait]
    impl HttpClient for NullHttpClient {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            unimplemented!("not used by config tests")
        }
    }

    struct NullStore;

    #[async_trait]
    impl LocalStore for NullStore {
        async fn query_dirty_ids(
            &self,
            _store: &str,
            _id_field: &str,
            _page_index: usize,
            _page_size: usize,
        ) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn query_dirty_parent_ids(
            &self,
            _query: &DirtyParentQuery,
            _page_index: usize,
            _page_size: usize,
        ) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn retrieve(
            &self,
            _store: &str,
            _field: &str,
            _values: &[String],
        ) -> BridgeResult<Vec<Record>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _store: &str, record: Record) -> BridgeResult<Record> {
            Ok(record)
        }

        async fn delete(&self, _store: &str, _entry_id: i64) -> BridgeResult<()> {
            Ok(())
        }

        async fn delete_where_id_in(
            &self,
            _store: &str,
            _field: &str,
            _values: &[String],
        ) -> BridgeResult<()> {
            Ok(())
        }

        async fn begin_transaction(&self) -> BridgeResult<TransactionId> {
            Ok(TransactionId(1))
        }

        async fn commit_transaction(&self, _transaction_id: TransactionId) -> BridgeResult<()> {
            Ok(())
        }

        async fn rollback_transaction(&self, _transaction_id: TransactionId) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn base_builder() -> EngineConfigBuilder {
        EngineConfig::builder()
            .instance_url("https://example.my.salesforce.com/")
            .access_token("00Dxx!token")
            .http_client(Arc::new(NullHttpClient))
            .local_store(Arc::new(NullStore))
    }

    #[test]
    fn test_build_with_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.instance_url, "https://example.my.salesforce.com");
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_missing_local_store_is_capability_error() {
        let result = EngineConfig::builder()
            .instance_url("https://example.my.salesforce.com")
            .access_token("token")
            .http_client(Arc::new(NullHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "LocalStore")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_instance_url() {
        let result = EngineConfig::builder()
            .access_token("token")
            .local_store(Arc::new(NullStore))
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            base_builder().page_size(0).build(),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            base_builder().api_version("60.0").build(),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            base_builder().instance_url("example.com").build(),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            base_builder().access_token("  ").build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = base_builder().build().unwrap();
        let rendered = format!("{:?}", config);

        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("00Dxx!token"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_desktop_default_http_client() {
        let config = EngineConfig::builder()
            .instance_url("https://example.my.salesforce.com")
            .access_token("token")
            .local_store(Arc::new(NullStore))
            .build();

        assert!(config.is_ok());
    }
}
