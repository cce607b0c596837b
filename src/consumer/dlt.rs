//! Dead-letter handling.
//!
//! Records the failure (topic, partition, offset, reason, original
//! payload) to the audit store and raises a `DLT_EVENT` alert requiring
//! manual intervention. DLT records are never re-consumed by this
//! engine — there is no feedback loop back into the partition worker.

use std::sync::Arc;

use chrono::Utc;

use crate::alerts::{AlertManager, Severity};
use crate::collaborators::{AlertSink, DltRecord, Notifier, Store};
use crate::error::IngestError;

pub struct DltHandler<St: Store + ?Sized, Sk: AlertSink + ?Sized, N: Notifier + ?Sized> {
    store: Arc<St>,
    alerts: Arc<AlertManager<Sk, N>>,
}

impl<St: Store + ?Sized, Sk: AlertSink + ?Sized, N: Notifier + ?Sized> DltHandler<St, Sk, N> {
    pub fn new(store: Arc<St>, alerts: Arc<AlertManager<Sk, N>>) -> Self {
        Self { store, alerts }
    }

    pub async fn handle(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        reason_code: &'static str,
        detail: String,
        original_payload: Vec<u8>,
    ) -> Result<(), IngestError> {
        self.store
            .persist_dlt(DltRecord {
                topic: topic.to_string(),
                partition,
                offset,
                reason_code,
                detail: detail.clone(),
                original_payload,
                occurred_at: Utc::now(),
            })
            .await?;

        self.alerts
            .raise(
                "DLT_EVENT",
                format!("{topic}:{partition}"),
                Severity::High,
                format!("record at offset {offset} dead-lettered ({reason_code}): {detail}"),
            )
            .await?;
        Ok(())
    }
}
