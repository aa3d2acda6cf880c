use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::types::{Event, Operation};

const OPERATION_FILE: &str = "operation.json";
const EVENTS_FILE: &str = "events.jsonl";

/// File-backed [`Store`]: one subdirectory per operation id under a configured
/// root data directory, holding `operation.json` (full snapshot, temp-file +
/// rename) and `events.jsonl` (append-only, one JSON object per line).
///
/// No donor analogue exists for this backend (the donor persists durably via
/// Postgres); the temp-file + rename technique and the directory-per-id layout
/// are a standard crash-safe-write pattern for a local filesystem store.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn operation_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path).await?;
            tmp.write_all(contents).await?;
            tmp.sync_all().await?;
        }
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let dir = self.operation_dir(op.id);
        fs::create_dir_all(&dir).await?;
        let contents = serde_json::to_vec_pretty(op)?;
        Self::write_atomic(&dir.join(OPERATION_FILE), &contents).await
    }

    async fn load_operation(&self, id: Uuid) -> Result<Operation, StoreError> {
        let path = self.operation_dir(id).join(OPERATION_FILE);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| StoreError::OperationNotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(id) = Uuid::parse_str(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            match self.load_operation(id).await {
                Ok(op) => out.push(op),
                Err(_) => {
                    tracing::warn!(%id, "skipping unreadable operation directory during startup scan");
                }
            }
        }
        Ok(out)
    }

    async fn delete_operation(&self, id: Uuid) -> Result<(), StoreError> {
        let dir = self.operation_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::OperationNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_event(&self, operation_id: Uuid, event: Event) -> Result<(), StoreError> {
        let dir = self.operation_dir(operation_id);
        if !dir.exists() {
            return Err(StoreError::OperationNotFound(operation_id));
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn load_events(&self, operation_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let path = self.operation_dir(operation_id).join(EVENTS_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&bytes);

        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(_) => {
                    // Largest prefix that parses: a crash mid-write can only ever
                    // truncate the *last* line, so stop here rather than erroring.
                    tracing::warn!(operation_id = %operation_id, "truncating events.jsonl at first unparsable line");
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ClusterSnapshot, EventType, InstanceCycleParams, InstanceInfo, InstanceRole, OperationParams, OperationRequest,
    };
    use chrono::Utc;

    fn sample_operation() -> Operation {
        Operation::new(
            Uuid::now_v7(),
            OperationRequest {
                cluster_id: "demo".into(),
                region: None,
                params: OperationParams::InstanceCycle(InstanceCycleParams {
                    exclude_instances: vec![],
                    skip_temp_instance: true,
                }),
                wait_timeout: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let mut op = sample_operation();
        op.steps = crate::builders::build_steps(
            &op.params,
            &ClusterSnapshot {
                cluster_id: "demo".into(),
                engine_version: "15.4".into(),
                instances: vec![InstanceInfo {
                    id: "w".into(),
                    role: InstanceRole::Writer,
                    instance_type: "db.r6g.large".into(),
                    status: "available".into(),
                    autoscaled: false,
                }],
                upgrade_targets: vec![],
                orderable_instance_types: vec![],
                active_blue_green_deployment: None,
                parameter_group_name: None,
            },
        )
        .unwrap();
        op.current_step_index = 1;
        op.pause_before_steps.insert(2);
        store.save_operation(&op).await.unwrap();

        let loaded = store.load_operation(op.id).await.unwrap();
        assert_eq!(loaded, op, "round trip must be byte-identical after JSON normalisation");
    }

    #[tokio::test]
    async fn events_append_and_load_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();

        store
            .append_event(op.id, Event::new(EventType::OperationCreated, "created"))
            .await
            .unwrap();
        store
            .append_event(op.id, Event::new(EventType::OperationStarted, "started"))
            .await
            .unwrap();

        let events = store.load_events(op.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::OperationCreated);
    }

    #[tokio::test]
    async fn truncated_trailing_line_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();
        store
            .append_event(op.id, Event::new(EventType::OperationCreated, "created"))
            .await
            .unwrap();

        // Simulate a crash mid-write: append a line with no trailing newline and
        // invalid JSON.
        let events_path = dir.path().join(op.id.to_string()).join(EVENTS_FILE);
        let mut existing = fs::read(&events_path).await.unwrap();
        existing.extend_from_slice(b"{\"timestamp\":\"2024");
        fs::write(&events_path, &existing).await.unwrap();

        let events = store.load_events(op.id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn list_operations_rebuilds_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        store.save_operation(&sample_operation()).await.unwrap();
        store.save_operation(&sample_operation()).await.unwrap();

        // A fresh store instance pointed at the same directory should see both.
        let reopened = FileStore::new(dir.path()).await.unwrap();
        assert_eq!(reopened.list_operations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let op = sample_operation();
        store.save_operation(&op).await.unwrap();
        store.delete_operation(op.id).await.unwrap();

        assert!(matches!(
            store.load_operation(op.id).await.unwrap_err(),
            StoreError::OperationNotFound(_)
        ));
    }
}
