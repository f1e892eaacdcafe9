//! Source registry and poll scheduler.
//!
//! Registering a source installs a named repeatable producer in the job
//! store that emits a fetch job every poll interval. Manual triggers enqueue
//! a high-priority one-shot fetch immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use inlet_core::{
    jobs::priority, EnqueueOptions, Error, FetchJob, QueueName, Result, SourceDescriptor,
    SourceKind, TriggeredBy,
};
use inlet_store::JobStore;

/// Name of the repeatable schedule entry for a source.
fn schedule_name(source_id: &str) -> String {
    format!("poll:{}", source_id)
}

fn fetch_payload(source: &SourceDescriptor, triggered_by: TriggeredBy) -> FetchJob {
    FetchJob {
        source_id: source.id.clone(),
        kind: source.kind,
        display_name: source.display_name.clone(),
        endpoint: source.endpoint.clone(),
        settings: source.settings.clone(),
        cursor: None,
        triggered_by,
        triggered_at: Utc::now(),
    }
}

/// Owns the set of registered sources and their poll schedules.
pub struct SourceRegistry {
    store: Arc<dyn JobStore>,
    sources: Mutex<HashMap<String, SourceDescriptor>>,
}

impl SourceRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Register a source and install its repeatable fetch producer.
    ///
    /// Disabled sources are refused, as are kinds that are never polled.
    pub async fn schedule(&self, source: SourceDescriptor) -> Result<()> {
        if !source.enabled {
            return Err(Error::InvalidData(format!(
                "source {} is disabled",
                source.id
            )));
        }
        let Some(interval) = source.effective_poll_interval() else {
            return Err(Error::InvalidData(format!(
                "source kind {} is never scheduled",
                source.kind
            )));
        };

        let payload = serde_json::to_value(fetch_payload(&source, TriggeredBy::Schedule))?;
        self.store
            .schedule_repeating(&schedule_name(&source.id), QueueName::Fetch, payload, interval)
            .await?;

        info!(
            source_id = %source.id,
            source_kind = source.kind.as_str(),
            poll_interval_secs = interval.as_secs(),
            "Scheduled source"
        );
        self.sources
            .lock()
            .expect("registry mutex poisoned")
            .insert(source.id.clone(), source);
        Ok(())
    }

    /// Enqueue a high-priority one-shot fetch for a source right now.
    pub async fn trigger_now(&self, source: &SourceDescriptor) -> Result<String> {
        if !source.enabled {
            return Err(Error::InvalidData(format!(
                "source {} is disabled",
                source.id
            )));
        }
        let payload = serde_json::to_value(fetch_payload(source, TriggeredBy::Manual))?;
        let job_id = self
            .store
            .enqueue(
                QueueName::Fetch,
                payload,
                EnqueueOptions::default().with_priority(priority::MANUAL),
            )
            .await?;
        debug!(source_id = %source.id, job_id = %job_id, "Manual fetch triggered");
        Ok(job_id)
    }

    /// Remove a source's repeating schedule and registry entry.
    pub async fn unschedule(&self, source_id: &str, _kind: SourceKind) -> Result<()> {
        self.store
            .cancel_repeating(&schedule_name(source_id))
            .await?;
        self.sources
            .lock()
            .expect("registry mutex poisoned")
            .remove(source_id);
        info!(source_id = %source_id, "Unscheduled source");
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Option<SourceDescriptor> {
        self.sources
            .lock()
            .expect("registry mutex poisoned")
            .get(source_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<SourceDescriptor> {
        self.sources
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}
