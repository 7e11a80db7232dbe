use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dicom_core::Tag;
use futures_util::stream::BoxStream;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::database_manager::blocking;
use crate::storage::index::{IndexRecord, InstanceIndex};
use crate::storage::{
    DuplicatePolicy, KeyLocks, ObjectStore, PutOutcome, StoreError, StoreResult, StoredInstance,
    SECONDARY_KEYS,
};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.redb";
const LIST_PAGE_SIZE: usize = 256;
const GET_ATTEMPTS: usize = 3;

/// Filesystem-backed object store
///
/// Layout under the root path:
/// - `objects/<xx>/<uid>.<version>.dcm`: payload files, never modified in place
/// - `tmp/`: payloads being written
/// - `index.redb`: the instance index
///
/// A payload is written to `tmp/`, synced and renamed into `objects/`, then
/// published by committing its index record. The superseded payload of an
/// overwritten instance is removed after the commit.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root_path: PathBuf,
    index: InstanceIndex,
    locks: Arc<KeyLocks>,
    duplicates: DuplicatePolicy,
    page_size: usize,
}

impl FilesystemObjectStore {
    /// Open or create a store rooted at the given path
    pub fn open<P: AsRef<Path>>(root_path: P, duplicates: DuplicatePolicy) -> StoreResult<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for dir in [OBJECTS_DIR, TMP_DIR] {
            std::fs::create_dir_all(root_path.join(dir)).map_err(|e| {
                StoreError::Config(format!(
                    "Failed to create storage directory '{}': {}",
                    root_path.join(dir).display(),
                    e
                ))
            })?;
        }

        let index = InstanceIndex::open(&root_path.join(INDEX_FILE))?;

        Ok(Self {
            root_path,
            index,
            locks: Arc::new(KeyLocks::new()),
            duplicates,
            page_size: LIST_PAGE_SIZE,
        })
    }

    /// Override the number of index records fetched per `list` page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.root_path
    }

    fn write_payload(&self, sop_instance_uid: &str, payload: &[u8]) -> StoreResult<String> {
        let version = uuid::Uuid::new_v4().simple().to_string();
        let relative = format!(
            "{}/{}/{}.{}.dcm",
            OBJECTS_DIR,
            &version[..2],
            file_stem(sop_instance_uid),
            version
        );
        let final_path = self.root_path.join(&relative);
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut temp = tempfile::NamedTempFile::new_in(self.root_path.join(TMP_DIR))?;
        temp.write_all(payload)?;
        temp.as_file().sync_all()?;
        temp.persist(&final_path).map_err(|e| StoreError::Io(e.error))?;

        Ok(relative)
    }

    fn put_blocking(&self, instance: StoredInstance, payload: Bytes) -> StoreResult<PutOutcome> {
        let uid = instance.sop_instance_uid.clone();

        if self.duplicates == DuplicatePolicy::Reject && self.index.get(&uid)?.is_some() {
            return Err(StoreError::Duplicate(uid));
        }

        let payload_path = self.write_payload(&uid, &payload)?;
        let record = IndexRecord {
            instance,
            payload_path,
            payload_len: payload.len() as u64,
            stored_at: Utc::now(),
        };

        let previous = match self.index.upsert(&record) {
            Ok(previous) => previous,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(self.root_path.join(&record.payload_path)) {
                    tracing::warn!(
                        "Failed to remove unpublished payload {}: {}",
                        record.payload_path,
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        match previous {
            Some(old) => {
                tracing::warn!(
                    "Overwrote stored instance {} (previously stored {})",
                    uid,
                    old.stored_at
                );
                if old.payload_path != record.payload_path {
                    if let Err(e) = std::fs::remove_file(self.root_path.join(&old.payload_path)) {
                        tracing::warn!("Failed to remove superseded payload {}: {}", old.payload_path, e);
                    }
                }
                Ok(PutOutcome::Replaced)
            }
            None => Ok(PutOutcome::Created),
        }
    }

    fn get_blocking(&self, sop_instance_uid: &str) -> StoreResult<Option<(StoredInstance, Bytes)>> {
        // A concurrent overwrite can remove the payload between reading the
        // record and opening the file; the fresh record names the new one.
        for _ in 0..GET_ATTEMPTS {
            let Some(record) = self.index.get(sop_instance_uid)? else {
                return Ok(None);
            };
            match std::fs::read(self.root_path.join(&record.payload_path)) {
                Ok(bytes) => return Ok(Some((record.instance, Bytes::from(bytes)))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("payload of {} is missing", sop_instance_uid),
        )))
    }
}

/// File name stem for a UID: UIDs are digits and dots, anything else is replaced
fn file_stem(sop_instance_uid: &str) -> String {
    sop_instance_uid
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, instance: StoredInstance, payload: Bytes) -> StoreResult<PutOutcome> {
        if instance.sop_instance_uid.is_empty() {
            return Err(StoreError::InvalidInstance(
                "missing SOP Instance UID".to_string(),
            ));
        }

        let _guard = self.locks.lock(&instance.sop_instance_uid).await;
        let store = self.clone();
        blocking(move || store.put_blocking(instance, payload)).await
    }

    async fn get(&self, sop_instance_uid: &str) -> StoreResult<Option<(StoredInstance, Bytes)>> {
        let store = self.clone();
        let uid = sop_instance_uid.to_string();
        blocking(move || store.get_blocking(&uid)).await
    }

    fn list(&self) -> BoxStream<'static, StoreResult<StoredInstance>> {
        let index = self.index.clone();
        let page_size = self.page_size;

        Box::pin(async_stream::try_stream! {
            let mut after: Option<String> = None;
            loop {
                let page_index = index.clone();
                let cursor = after.clone();
                let page = blocking(move || page_index.page(cursor.as_deref(), page_size)).await?;
                let exhausted = page.len() < page_size;

                for record in page {
                    after = Some(record.instance.sop_instance_uid.clone());
                    yield record.instance;
                }
                if exhausted {
                    break;
                }
            }
        })
    }

    fn is_indexed(&self, tag: Tag) -> bool {
        SECONDARY_KEYS.contains(&tag)
    }

    async fn lookup(&self, tag: Tag, value: &str) -> StoreResult<Vec<StoredInstance>> {
        if !self.is_indexed(tag) {
            return Err(StoreError::Config(format!("{} has no secondary index", tag)));
        }

        let index = self.index.clone();
        let value = value.to_string();
        blocking(move || {
            let mut instances = Vec::new();
            for uid in index.lookup(tag, &value)? {
                if let Some(record) = index.get(&uid)? {
                    instances.push(record.instance);
                }
            }
            Ok(instances)
        })
        .await
    }

    async fn len(&self) -> StoreResult<usize> {
        let index = self.index.clone();
        blocking(move || index.len()).await
    }
}
