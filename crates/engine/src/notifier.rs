//! Run summary publication.

use std::collections::BTreeMap;
use std::sync::Arc;

use patchflow_core::clients::NotificationChannel;
use patchflow_core::types::Timestamp;
use patchflow_core::{OsCounts, OsKey, RunSummary, SkipReason};
use serde::Serialize;
use uuid::Uuid;

use crate::error::NotifyError;

/// Subject line of the summary notification.
pub const SUMMARY_SUBJECT: &str = "Patch Flow Summary";

/// Largest message the notification channel accepts, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

#[derive(Serialize)]
struct SummaryMessage<'a> {
    timestamp: Timestamp,
    summary: &'a RunSummary,
}

/// Fallback body when the full summary does not fit in one message.
#[derive(Serialize)]
struct CompactSummary<'a> {
    run_id: Uuid,
    timestamp: Timestamp,
    per_os: &'a BTreeMap<OsKey, OsCounts>,
    skipped: &'a BTreeMap<OsKey, SkipReason>,
    totals: OsCounts,
    store_write_failures: usize,
    warnings: &'a [String],
    truncated: bool,
}

#[derive(Serialize)]
struct CompactMessage<'a> {
    timestamp: Timestamp,
    summary: CompactSummary<'a>,
}

/// Publishes one summary per run.
#[derive(Clone)]
pub struct SummaryNotifier {
    channel: Arc<dyn NotificationChannel>,
}

impl SummaryNotifier {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self { channel }
    }

    /// Publish `summary` as pretty JSON.
    ///
    /// When the full body is over [`MAX_MESSAGE_BYTES`] the per-machine
    /// records are left out and `truncated` is set.
    pub async fn publish(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        let message = render_message(summary)?;

        if let Err(e) = self.channel.publish(SUMMARY_SUBJECT, &message).await {
            tracing::error!(run_id = %summary.run_id, error = %e, "Failed to publish run summary");
            return Err(e.into());
        }

        tracing::info!(
            run_id = %summary.run_id,
            bytes = message.len(),
            "Run summary published",
        );
        Ok(())
    }
}

fn render_message(summary: &RunSummary) -> Result<String, NotifyError> {
    let full = serde_json::to_string_pretty(&SummaryMessage {
        timestamp: summary.timestamp,
        summary,
    })?;
    if full.len() <= MAX_MESSAGE_BYTES {
        return Ok(full);
    }

    tracing::warn!(
        run_id = %summary.run_id,
        bytes = full.len(),
        "Run summary too large, publishing without per-machine records",
    );
    let compact = serde_json::to_string_pretty(&CompactMessage {
        timestamp: summary.timestamp,
        summary: CompactSummary {
            run_id: summary.run_id,
            timestamp: summary.timestamp,
            per_os: &summary.per_os,
            skipped: &summary.skipped,
            totals: summary.totals(),
            store_write_failures: summary.store_write_failures,
            warnings: &summary.warnings,
            truncated: true,
        },
    })?;
    Ok(compact)
}
