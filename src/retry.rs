//! Retry sweeps over failed analyses.
//!
//! Records come from [`Ledger::list_failed_analyses`] in ascending id order.
//! Per record:
//!
//! 1. Source image missing: record the failure, no call.
//! 2. Source image larger than `max_image_bytes`: skip, leave the record as
//!    is for manual handling.
//! 3. Otherwise: [`ImageProcessor::reprocess`], which overwrites the record.
//!
//! Calls are spaced by `retry_delay`, which is longer than the first-pass
//! inter-call delay.

use std::time::Duration;

use crate::ledger::{Ledger, RetryFilter};
use crate::models::now_rfc3339;
use crate::processor::ImageProcessor;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub selected: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped_oversize: usize,
}

pub struct Retrier {
    processor: ImageProcessor,
    max_image_bytes: u64,
    retry_delay: Duration,
}

impl Retrier {
    pub fn new(processor: ImageProcessor, max_image_bytes: u64, retry_delay: Duration) -> Self {
        Self {
            processor,
            max_image_bytes,
            retry_delay,
        }
    }

    fn ledger(&self) -> &Ledger {
        self.processor.ledger()
    }

    pub async fn retry_failed(&self, filter: &RetryFilter) -> anyhow::Result<RetryStats> {
        let records = self.ledger().list_failed_analyses(filter).await?;
        let mut stats = RetryStats {
            selected: records.len(),
            ..RetryStats::default()
        };
        tracing::info!(selected = stats.selected, predicate = ?filter.predicate, "retry sweep");

        let mut called = false;
        for mut record in records {
            let size = match std::fs::metadata(&record.image_path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(image = %record.image_path, error = %e, "image missing, not retried");
                    record.timestamp = now_rfc3339();
                    record.success = false;
                    record.status_code = None;
                    record.error_message = Some(format!("Image file not found: {}", e));
                    self.ledger().update_analysis(&record).await?;
                    stats.failed += 1;
                    continue;
                }
            };

            if size > self.max_image_bytes {
                tracing::info!(
                    image = %record.image_path,
                    bytes = size,
                    limit = self.max_image_bytes,
                    "image too large, left for manual handling"
                );
                stats.skipped_oversize += 1;
                continue;
            }

            if called && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
            called = true;

            match self.processor.reprocess(&record).await {
                Ok(updated) if updated.success => stats.successful += 1,
                Ok(_) => stats.failed += 1,
                Err(e) => {
                    tracing::error!(image = %record.image_path, error = %e, "retry failed");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }
}
