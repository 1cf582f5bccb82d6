use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{LogEntry, RunStore, StoreError};
use crate::modules::segmenter::Chunk;

/// Stores chunk snapshots and log entries as JSON objects in an S3 bucket
///
/// Layout under `prefix`:
/// - `runs/{run_id}/chunks/{sequence:06}-{chunk_id}.json`
/// - `logs/{unix_millis:013}-{uuid}.json`
pub struct S3Store {
    s3_client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(s3_client: S3Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            s3_client,
            bucket: bucket.into(),
            prefix,
        }
    }

    fn run_prefix(&self, run_id: &str) -> String {
        format!("{}runs/{}/chunks/", self.prefix, run_id)
    }

    fn chunk_key(&self, run_id: &str, chunk: &Chunk) -> String {
        format!("{}{:06}-{}.json", self.run_prefix(run_id), chunk.sequence, chunk.id)
    }

    fn logs_prefix(&self) -> String {
        format!("{}logs/", self.prefix)
    }

    fn log_key(&self, entry: &LogEntry) -> String {
        format!(
            "{}{:013}-{}.json",
            self.logs_prefix(),
            entry.timestamp.timestamp_millis().max(0),
            uuid::Uuid::new_v4()
        )
    }

    async fn put_json(&self, key: &str, content: Vec<u8>) -> Result<()> {
        debug!("Uploading {} bytes to s3://{}/{}", content.len(), self.bucket, key);

        self.s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into())
            .content_type("application/json")
            .send()
            .await
            .context(format!("Failed to upload {} to S3 bucket {}", key, self.bucket))?;

        Ok(())
    }

    async fn get_object_bytes(&self, key: &str) -> Result<Bytes> {
        let response = self
            .s3_client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context(format!("Failed to download {} from S3", key))?;

        let body = response.body.collect().await
            .context(format!("Failed to read S3 object body for {}", key))?;

        Ok(body.into_bytes())
    }

    /// List every object key under a prefix, following continuation tokens
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.s3_client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(1000);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await
                .context("Failed to list objects in S3")?;

            for object in response.contents() {
                let key = object.key().unwrap_or_default();
                if key.ends_with('/') || !key.ends_with(".json") {
                    continue;
                }
                keys.push(key.to_string());
            }

            continuation_token = response.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    async fn load_chunks(&self, run_id: &str) -> Result<Vec<Chunk>> {
        let keys = self.list_keys(&self.run_prefix(run_id)).await?;
        let mut chunks = Vec::with_capacity(keys.len());

        for key in keys {
            let bytes = self.get_object_bytes(&key).await?;
            let chunk: Chunk = serde_json::from_slice(&bytes)
                .context(format!("Failed to parse chunk snapshot {}", key))?;
            chunks.push(chunk);
        }

        chunks.sort_by_key(|c| c.sequence);
        Ok(chunks)
    }

    async fn remove_run(&self, run_id: &str) -> Result<usize> {
        let keys = self.list_keys(&self.run_prefix(run_id)).await?;
        for key in &keys {
            self.s3_client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .context(format!("Failed to delete {} from S3", key))?;
        }
        Ok(keys.len())
    }

    async fn load_recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut keys = self.list_keys(&self.logs_prefix()).await?;
        // zero-padded millisecond prefix sorts chronologically
        keys.sort_unstable_by(|a, b| b.cmp(a));

        let mut entries = Vec::new();
        for key in keys.into_iter().take(limit) {
            let bytes = self.get_object_bytes(&key).await?;
            match serde_json::from_slice::<LogEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable log entry {}: {}", key, e),
            }
        }
        Ok(entries)
    }
}

fn backend_error(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{:#}", err))
}

#[async_trait]
impl RunStore for S3Store {
    async fn save_chunk(&self, run_id: &str, chunk: &Chunk) -> Result<(), StoreError> {
        let body = serde_json::to_vec(chunk)?;
        self.put_json(&self.chunk_key(run_id, chunk), body).await.map_err(backend_error)
    }

    async fn chunks_for_run(&self, run_id: &str) -> Result<Vec<Chunk>, StoreError> {
        self.load_chunks(run_id).await.map_err(backend_error)
    }

    async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        let removed = self.remove_run(run_id).await.map_err(backend_error)?;
        info!("Deleted {} chunk snapshots for run {} from s3://{}", removed, run_id, self.bucket);
        Ok(())
    }

    async fn add_log_entry(&self, entry: LogEntry) -> Result<(), StoreError> {
        let body = serde_json::to_vec(&entry)?;
        self.put_json(&self.log_key(&entry), body).await.map_err(backend_error)
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        self.load_recent_logs(limit).await.map_err(backend_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::persistence::{LogKind, LogLevel};
    use aws_sdk_s3::config::{BehaviorVersion, Region};

    fn offline_store(prefix: &str) -> S3Store {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("eu-west-2"))
            .build();
        S3Store::new(S3Client::from_conf(config), "bucket", prefix)
    }

    #[test]
    fn test_prefix_gets_trailing_slash() {
        assert_eq!(offline_store("transform").prefix, "transform/");
        assert_eq!(offline_store("transform/").prefix, "transform/");
        assert_eq!(offline_store("").prefix, "");
    }

    #[test]
    fn test_chunk_keys_sort_by_sequence() {
        let store = offline_store("jobs");
        let mut chunk = Chunk::new(7, 0, 1, "a".to_string());
        chunk.id = "abc".to_string();

        assert_eq!(store.chunk_key("run-9", &chunk), "jobs/runs/run-9/chunks/000007-abc.json");
        assert!(store.chunk_key("r", &Chunk::new(9, 0, 1, "a".into()))
            < store.chunk_key("r", &Chunk::new(10, 0, 1, "a".into())));
    }

    #[test]
    fn test_log_keys_live_under_logs_prefix() {
        let store = offline_store("jobs");
        let entry = LogEntry::new(LogLevel::Info, LogKind::ApiRequest, serde_json::json!({}));
        let key = store.log_key(&entry);

        assert!(key.starts_with("jobs/logs/"));
        assert!(key.ends_with(".json"));
    }
}
