//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP transport,
//! record store, clock) into the sync engine. Desktop hosts typically enable
//! the `desktop-shims` feature, which supplies a reqwest-backed HTTP client
//! and an in-memory record store.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{Clock, LocalStore};
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::logging::init_logging;
use core_sync::{SyncContext, SyncState, SyncUpReport, SyncUpTask};
use provider_rest::RestClient;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Primary façade exposed to host applications.
///
/// Owns the REST client, the record store and the event bus for one
/// instance and one set of credentials.
#[derive(Clone)]
pub struct SyncService {
    client: RestClient,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    page_size: usize,
}

impl SyncService {
    /// Create a service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configuration carries a logging setup that cannot be
    /// installed.
    pub fn new(config: EngineConfig) -> Result<Self> {
        if let Some(logging) = config.logging.clone() {
            init_logging(logging)?;
        }

        let client = RestClient::new(
            config.http_client.clone(),
            config.instance_url.as_str(),
            config.api_version.as_str(),
            config.access_token.as_str(),
        );
        info!(api_version = %config.api_version, "Sync service ready");

        Ok(Self {
            client,
            store: config.local_store,
            clock: config.clock,
            events: EventBus::new(config.event_buffer_size),
            page_size: config.page_size,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn local_store(&self) -> Arc<dyn LocalStore> {
        Arc::clone(&self.store)
    }

    fn task(&self, soup_name: &str) -> SyncUpTask {
        let ctx = SyncContext::new(self.client.clone(), Arc::clone(&self.store), soup_name)
            .with_page_size(self.page_size);
        SyncUpTask::new(ctx, Arc::clone(&self.clock), self.events.clone())
    }

    /// Run one sync-up to completion.
    pub async fn sync_up(&self, state: SyncState) -> Result<SyncUpReport> {
        self.sync_up_with_cancel(state, CancellationToken::new())
            .await
    }

    /// Run one sync-up, stopping between pages once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only a state that is already running is rejected; engine failures
    /// come back as a `Failed` report.
    pub async fn sync_up_with_cancel(
        &self,
        state: SyncState,
        cancel: CancellationToken,
    ) -> Result<SyncUpReport> {
        let task = self.task(&state.soup_name);
        Ok(task.run(state, cancel).await?)
    }
}

/// Convenience bootstrapper for desktop hosts: reqwest transport and an
/// in-memory record store.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// let service = core_service::bootstrap_desktop("https://example.my.salesforce.com", "token")?;
/// let _events = service.subscribe();
/// # Ok(())
/// # }
/// ```
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub fn bootstrap_desktop(
    instance_url: impl Into<String>,
    access_token: impl Into<String>,
) -> Result<SyncService> {
    let store: Arc<dyn LocalStore> = Arc::new(bridge_desktop::MemoryRecordStore::new());
    let config = EngineConfig::builder()
        .instance_url(instance_url)
        .access_token(access_token)
        .local_store(store)
        .build()?;
    SyncService::new(config)
}
