//! Sync-up task driver
//!
//! Runs one [`SyncState`]: locates dirty rows, hands them to the target page
//! by page, and keeps the state and the event bus up to date.

use bridge_traits::store::SOUP_ENTRY_ID;
use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::error::{Result, SyncError};
use crate::state::SyncState;
use crate::target::{SyncContext, SyncUpOutcome};

/// Result of one run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncUpReport {
    /// State after the run: `Done`, `Failed` or `Stopped`
    pub state: SyncState,
    /// Dirty rows found when the run started
    pub records_total: u64,
    /// Rows handed to the target
    pub records_processed: u64,
    pub outcome: SyncUpOutcome,
}

impl SyncUpReport {
    pub fn is_success(&self) -> bool {
        self.state.status == crate::state::SyncStatus::Done
    }
}

/// Drives sync-up runs against one store and one server
pub struct SyncUpTask {
    ctx: SyncContext,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl SyncUpTask {
    /// `ctx.soup_name` is replaced per run by the state's store location.
    pub fn new(ctx: SyncContext, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self { ctx, clock, events }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.emit(CoreEvent::Sync(event));
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Run `state` to completion, failure or cancellation.
    ///
    /// Engine failures end the run in `Failed` and are reported through the
    /// returned state, not as an `Err`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidStateTransition`] when `state` is already running.
    #[instrument(skip_all, fields(sync_id = state.id, target = state.target.kind()))]
    pub async fn run(&self, state: SyncState, cancel: CancellationToken) -> Result<SyncUpReport> {
        let state = state.start(self.now())?;

        let mut ctx = self.ctx.clone().with_sync_id(state.id);
        ctx.soup_name = state
            .target
            .soup_name()
            .unwrap_or(state.soup_name.as_str())
            .to_string();
        let ctx = ctx.with_event_bus(self.events.clone());

        let mut report = SyncUpReport {
            state,
            records_total: 0,
            records_processed: 0,
            outcome: SyncUpOutcome::default(),
        };

        match self.process(&ctx, &mut report, &cancel).await {
            Ok(()) => {
                report.state = report.state.clone().complete(self.now())?;
                let outcome = report.outcome;
                info!(
                    processed = report.records_processed,
                    uploaded = outcome.uploaded,
                    failed = outcome.failed,
                    conflicts = outcome.conflicts,
                    "Sync-up finished"
                );
                self.emit(SyncEvent::Completed {
                    sync_id: report.state.id,
                    records_processed: report.records_processed,
                    records_uploaded: outcome.uploaded,
                    records_failed: outcome.failed,
                    records_conflicted: outcome.conflicts,
                    duration_ms: report.state.duration_millis().unwrap_or(0),
                });
            }
            Err(SyncError::Cancelled) => {
                report.state = report.state.clone().stop(self.now())?;
                info!(processed = report.records_processed, "Sync-up stopped");
                self.emit(SyncEvent::Cancelled {
                    sync_id: report.state.id,
                    records_processed: report.records_processed,
                });
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Sync-up failed");
                report.state = report.state.clone().fail(message.clone(), self.now())?;
                self.emit(SyncEvent::Failed {
                    sync_id: report.state.id,
                    message,
                    records_processed: report.records_processed,
                });
            }
        }

        Ok(report)
    }

    async fn process(
        &self,
        ctx: &SyncContext,
        report: &mut SyncUpReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = report.state.target.clone();
        let options = report.state.options.clone();

        let ids = target.dirty_record_ids(ctx).await?;
        let total = ids.len() as u64;
        report.records_total = total;
        report.state.update_progress(0, total)?;

        self.emit(SyncEvent::Started {
            sync_id: report.state.id,
            store: ctx.soup_name.clone(),
            target: target.kind().to_string(),
            total_records: total,
        });

        for page in ids.chunks(target.max_batch_size()) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let records = ctx.store.retrieve(&ctx.soup_name, SOUP_ENTRY_ID, page).await?;
            let outcome = target
                .sync_up_records(ctx, records, &options.fieldlist, options.merge_mode)
                .await?;

            report.outcome.merge(outcome);
            report.records_processed += page.len() as u64;
            report
                .state
                .update_progress(report.records_processed, total)?;

            self.emit(SyncEvent::Progress {
                sync_id: report.state.id,
                records_processed: report.records_processed,
                total_records: total,
                percent: report.state.progress,
            });
        }

        Ok(())
    }
}
