//! Manual upload adapter.
//!
//! Uploads never poll: the management surface packs the submitted items
//! into a one-shot fetch job's settings, and this adapter just unwraps
//! them. A user-supplied `idempotency_key` attribute is forwarded verbatim;
//! the collaborator stays the authority on uniqueness.

use async_trait::async_trait;
use tracing::debug;

use inlet_core::{Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

pub struct UploadAdapter;

#[async_trait]
impl FetchAdapter for UploadAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Upload
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        _cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let Some(raw_items) = source.settings.extra.get("items") else {
            return Err(Error::InvalidData(
                "upload source carries no items".to_string(),
            ));
        };
        let items: Vec<RawItem> = serde_json::from_value(raw_items.clone())
            .map_err(|e| Error::InvalidData(format!("unparsable upload items: {}", e)))?;

        let counts = FetchCounts {
            fetched: items.len() as u64,
            ..FetchCounts::default()
        };
        debug!(source_id = %source.id, item_count = items.len(), "Unpacked manual upload");
        Ok(FetchOutcome {
            items,
            counts,
            ..FetchOutcome::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inlet_core::SourceSettings;

    fn upload_source(extra: serde_json::Value) -> SourceDescriptor {
        SourceDescriptor {
            id: "upload-1".into(),
            kind: SourceKind::Upload,
            display_name: "Manual uploads".into(),
            endpoint: String::new(),
            enabled: true,
            poll_interval_secs: 0,
            settings: SourceSettings {
                extra,
                ..SourceSettings::default()
            },
        }
    }

    #[tokio::test]
    async fn test_unpacks_items() {
        let mut item = RawItem::new("up-1", SourceKind::Upload);
        item.title = Some("Uploaded video".into());
        item.url = Some("https://cdn.example.com/up-1.mp4".into());
        item.fetched_at = Utc::now();

        let source = upload_source(serde_json::json!({ "items": [item] }));
        let outcome = UploadAdapter.fetch(&source, None).await.unwrap();
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.counts.fetched, 1);
        assert_eq!(outcome.items[0].external_id, "up-1");
        assert!(!outcome.more);
    }

    #[tokio::test]
    async fn test_missing_items_is_invalid_data() {
        let source = upload_source(serde_json::Value::Null);
        let err = UploadAdapter.fetch(&source, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
